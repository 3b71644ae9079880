pub mod catalog;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod list_file;
pub mod migrate;
pub mod model;
pub mod pipeline;
pub mod predicate;
pub mod reconcile;
pub mod resolve;
pub mod runtime;
pub mod tagging;
