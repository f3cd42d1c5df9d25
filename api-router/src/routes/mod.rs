pub mod chat;
pub mod context;
pub mod monitor;
pub mod papers;
pub mod passage;
pub mod probes;
