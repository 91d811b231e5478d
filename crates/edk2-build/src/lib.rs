pub mod artifacts;
pub mod builder;
pub mod config;
pub mod context;
pub mod driver;
pub mod environment;
pub mod error;
pub mod executor;
pub mod rebase;
pub mod version;
pub mod workspace;

pub use error::{Error, Result};
