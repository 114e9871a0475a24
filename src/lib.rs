pub mod core;
pub mod export;
pub mod matching;
pub mod ocr;
pub mod pgdp;
pub mod pipeline;

pub use crate::core::document::Document;
pub use crate::core::error::{LabelError, LabelResult};
pub use crate::core::geometry::BBox;
pub use crate::core::model::{Line, MatchStatus, MergeDirection, UnmatchedWord, Word};
pub use crate::core::page::{Page, PageEvent, PageObserver};
