use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use pgdp_labeler::core::raster::InkThreshold;
use pgdp_labeler::matching::AlignmentConfig;
use pgdp_labeler::ocr::CommandOcrEngine;
use pgdp_labeler::pgdp::list_projects;
use pgdp_labeler::pipeline::{ExportSet, LabelerConfig, LabelingSession, DEFAULT_OCR_COMMAND};

#[derive(Parser, Debug)]
#[command(name = "pgdp-labeler")]
#[command(version, about = "Label OCR output against PGDP proofread text", long_about = None)]
struct Cli {
    #[command(flatten)]
    dirs: DirArgs,

    /// Log debug detail (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct DirArgs {
    /// Downloaded PGDP projects
    #[arg(long, env = "PGDP_SOURCE_DIR", default_value = "source-pgdp-data/output")]
    source_dir: PathBuf,

    /// Saved labeled pages
    #[arg(long, env = "PGDP_LABELED_DIR", default_value = "labeled-ocr")]
    labeled_dir: PathBuf,

    #[arg(long, env = "PGDP_TRAINING_DIR", default_value = "ml-training")]
    training_dir: PathBuf,

    #[arg(long, env = "PGDP_VALIDATION_DIR", default_value = "ml-validation")]
    validation_dir: PathBuf,

    /// OCR program; receives `--image <path>` and prints page JSON
    #[arg(long, env = "PGDP_OCR_COMMAND", default_value = DEFAULT_OCR_COMMAND)]
    ocr_command: String,

    /// Fixed ink threshold (0-255) instead of Otsu
    #[arg(long)]
    ink_level: Option<u8>,

    /// Alignment cost of an unpaired word
    #[arg(
        long,
        default_value_t = 100,
        value_parser = clap::value_parser!(i64).range(0..=AlignmentConfig::MAX_GAP_PENALTY)
    )]
    gap_penalty: i64,
}

#[derive(Args, Debug)]
struct PageArgs {
    /// Project id (directory name under the source dir)
    project: String,

    /// Zero-based page index; all pages when omitted
    #[arg(short, long)]
    page: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List downloaded projects
    Projects,

    /// Run OCR, align with ground truth and save labeled pages
    Label {
        #[command(flatten)]
        target: PageArgs,

        /// Ignore saved labels and run OCR again
        #[arg(short, long)]
        force: bool,
    },

    /// Print per-page match statistics
    Stats {
        #[command(flatten)]
        target: PageArgs,
    },

    /// Re-snap word boxes to the ink on the page
    Refine {
        #[command(flatten)]
        target: PageArgs,

        /// Crop bottom and expand to content before refining
        #[arg(long)]
        expand: bool,

        #[arg(long, default_value_t = 2)]
        padding: u32,
    },

    /// Mark every exact-match line validated
    ValidateExact {
        #[command(flatten)]
        target: PageArgs,
    },

    /// Fill missing ground truth from the OCR text
    CopyOcr {
        #[command(flatten)]
        target: PageArgs,
    },

    /// Write detection and recognition training data
    Export {
        #[command(flatten)]
        target: PageArgs,

        #[arg(long, value_enum, default_value_t = SetKind::Training)]
        set: SetKind,
    },

    /// Write an HTML report of line statuses
    Report {
        #[command(flatten)]
        target: PageArgs,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
enum SetKind {
    Training,
    Validation,
}

impl From<SetKind> for ExportSet {
    fn from(kind: SetKind) -> Self {
        match kind {
            SetKind::Training => ExportSet::Training,
            SetKind::Validation => ExportSet::Validation,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = build_config(&cli.dirs);
    match cli.command {
        Commands::Projects => show_projects(&config),
        Commands::Label { target, force } => label(config, &target, force),
        Commands::Stats { target } => for_each_page(config, &target, false, |session, idx| {
            let page = session.page(idx)?;
            let stats = page.stats();
            println!(
                "{}: {} lines, {} exact, {} mismatched, {} validated ({:.1}%)",
                session.prefix(idx),
                stats.total_lines,
                stats.exact_matches,
                stats.mismatches,
                stats.validated,
                stats.accuracy() * 100.0
            );
            Ok(())
        }),
        Commands::Refine {
            target,
            expand,
            padding,
        } => for_each_page(config, &target, true, |session, idx| {
            let page = session.page(idx)?;
            if expand {
                page.expand_and_refine_all(padding)?;
            } else {
                page.refine_all(padding)?;
            }
            Ok(())
        }),
        Commands::ValidateExact { target } => for_each_page(config, &target, true, |session, idx| {
            let marked = session.page(idx)?.mark_exact_matches_validated();
            println!("{}: validated {marked} line(s)", session.prefix(idx));
            Ok(())
        }),
        Commands::CopyOcr { target } => for_each_page(config, &target, true, |session, idx| {
            let filled = session.page(idx)?.copy_ocr_to_ground_truth();
            println!("{}: filled {filled} word(s)", session.prefix(idx));
            Ok(())
        }),
        Commands::Export { target, set } => for_each_page(config, &target, false, |session, idx| {
            session.page(idx)?;
            let path = session.export(idx, set.into())?;
            println!("{}: {}", session.prefix(idx), path.display());
            Ok(())
        }),
        Commands::Report { target } => for_each_page(config, &target, false, |session, idx| {
            print!("{}", session.page(idx)?.validation_report());
            let path = session.report(idx)?;
            println!("report: {}", path.display());
            Ok(())
        }),
    }
}

fn build_config(dirs: &DirArgs) -> LabelerConfig {
    let mut config = LabelerConfig::new(
        dirs.source_dir.clone(),
        dirs.labeled_dir.clone(),
        dirs.training_dir.clone(),
        dirs.validation_dir.clone(),
    );
    config.ocr_command = dirs.ocr_command.clone();
    if let Some(level) = dirs.ink_level {
        config.ink_threshold = InkThreshold::Fixed(level);
    }
    config.alignment = AlignmentConfig {
        gap_penalty: dirs.gap_penalty,
    };
    config
}

fn open_session(config: LabelerConfig, project: &str) -> Result<LabelingSession<CommandOcrEngine>> {
    let engine = config.ocr_engine()?;
    LabelingSession::open(config, project, engine)
}

fn page_indices(
    session: &LabelingSession<CommandOcrEngine>,
    target: &PageArgs,
) -> Result<Vec<usize>> {
    match target.page {
        Some(idx) if idx >= session.page_count() => anyhow::bail!(
            "page {idx} out of range: project {} has {} pages",
            target.project,
            session.page_count()
        ),
        Some(idx) => Ok(vec![idx]),
        None => Ok((0..session.page_count()).collect()),
    }
}

fn for_each_page<F>(
    config: LabelerConfig,
    target: &PageArgs,
    save: bool,
    mut action: F,
) -> Result<()>
where
    F: FnMut(&mut LabelingSession<CommandOcrEngine>, usize) -> Result<()>,
{
    let mut session = open_session(config, &target.project)?;
    for idx in page_indices(&session, target)? {
        action(&mut session, idx).with_context(|| format!("page {idx} failed"))?;
        if save {
            session.save(idx)?;
        }
    }
    Ok(())
}

fn show_projects(config: &LabelerConfig) -> Result<()> {
    let projects = list_projects(&config.source_dir)
        .with_context(|| format!("failed to list {}", config.source_dir.display()))?;
    if projects.is_empty() {
        println!("no projects under {}", config.source_dir.display());
    }
    for project in projects {
        println!("{project}");
    }
    Ok(())
}

fn label(config: LabelerConfig, target: &PageArgs, force: bool) -> Result<()> {
    for_each_page(config, target, true, |session, idx| {
        let page = if force {
            session.force_refresh(idx)?
        } else {
            session.page(idx)?
        };
        let stats = page.stats();
        println!(
            "{}: {}/{} lines exact",
            session.prefix(idx),
            stats.exact_matches,
            stats.total_lines
        );
        Ok(())
    })
}
