pub mod config;
pub mod error;
pub(crate) mod flags;
pub mod format;
pub mod metadata;
pub mod state;
