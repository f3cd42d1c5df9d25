#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod analysis;
pub mod chunker;
pub mod indexer;
pub mod pipeline;
pub mod utils;

pub use chunker::{Chunker, ExtractedDocument};
pub use indexer::{IndexReport, Indexer};
pub use pipeline::{DefaultPaperServices, PaperPipeline, PaperServices, PaperUpload, ProcessedPaper};
