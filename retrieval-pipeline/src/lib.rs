#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod answer_stream;
pub mod catalog;
pub mod citations;
pub mod passage;
pub mod pipeline;
pub mod retriever;
pub mod scope;
pub mod translation;
pub mod web_search;

pub use answer_stream::{AnswerSettings, ChatEvent, ChatOrchestrator, ChatRequest, ChatTurn};
pub use catalog::PaperCatalog;
pub use passage::{PassageAssistant, PassageMode, PassageRequest, PassageResult};
pub use pipeline::{AssembledContext, AssemblyTuning, ContextAssembler, ContextRequest};
pub use retriever::{Citation, RetrievalResult, Retriever};
pub use scope::{ScopeFilter, ScopeRequest};
