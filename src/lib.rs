pub mod analyzer;
pub mod cache;
pub mod chat;
pub mod cli;
pub mod completion;
pub mod config;
pub mod diff;
pub mod indexer;
pub mod mentions;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod project_map;
pub mod session;
pub mod util;
pub mod verify;
