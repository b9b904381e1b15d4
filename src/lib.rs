pub mod api;
pub mod cache;
pub mod concurrency;
pub mod config;
pub mod driver;
pub mod fetch;
pub mod formats;
pub mod handler;
pub mod identifier;
pub mod media;
pub mod mirror;
pub mod observability;
pub mod pipeline;
pub mod query;
pub mod selection;
pub mod storage;
pub mod thread;

#[cfg(test)]
pub(crate) mod testing;

pub use identifier::{Identifier, Placeholder};
pub use pipeline::{Pipeline, PipelineError, QueryReport};
