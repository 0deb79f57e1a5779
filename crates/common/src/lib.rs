//! Error plumbing shared by the qregistry crates.

pub mod error;

pub use error::FromMessage;
