pub mod config;
pub mod embedding;
pub mod lazy;
pub mod llm;
pub mod monitor;
pub mod rag_runtime;
pub mod tasks;
pub mod worker_pool;
