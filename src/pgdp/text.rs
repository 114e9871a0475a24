use unicode_normalization::UnicodeNormalization;

/// Proofreader marker for a page without text.
const BLANK_PAGE: &str = "[Blank Page]";
const NOTE_OPEN: &str = "[**";

/// Turns a proofread page into the per-line ground truth used for alignment.
///
/// Text is NFC-normalised, proofreader notes (`[**...]`) are removed, runs of
/// spaces collapse to one, and blank lines are dropped.
pub fn process_page_text(raw: &str) -> Vec<String> {
    let text: String = raw.replace("\r\n", "\n").nfc().collect();
    if text.trim() == BLANK_PAGE {
        return Vec::new();
    }
    strip_notes(&text)
        .lines()
        .map(collapse_spaces)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Removes `[**...]` notes, honouring nested brackets inside a note.
fn strip_notes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(NOTE_OPEN) {
        out.push_str(&rest[..start]);
        let mut depth = 0usize;
        let mut end = rest.len();
        for (idx, ch) in rest[start..].char_indices() {
            match ch {
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        end = start + idx + ch.len_utf8();
                        break;
                    }
                }
                _ => {}
            }
        }
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}

fn collapse_spaces(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_and_cleans_lines() {
        let raw = "  The  quick\r\n\r\nbrown   fox [**typo? jumpt]\njumps\n";
        assert_eq!(
            process_page_text(raw),
            vec!["The quick", "brown fox", "jumps"]
        );
    }

    #[test]
    fn nested_note_is_removed_whole() {
        assert_eq!(
            process_page_text("a [**see [Illustration] here] b"),
            vec!["a b"]
        );
        assert_eq!(process_page_text("[**unterminated note"), Vec::<String>::new());
    }

    #[test]
    fn blank_page_has_no_lines() {
        assert!(process_page_text("[Blank Page]").is_empty());
        assert!(process_page_text("\n \n").is_empty());
    }

    #[test]
    fn composes_decomposed_characters() {
        let decomposed = "cafe\u{301}";
        assert_eq!(process_page_text(decomposed), vec!["caf\u{e9}"]);
    }
}
