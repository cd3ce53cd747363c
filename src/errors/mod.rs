//! # Error Handling
//!
//! Error types for the sniplane control plane, built on `thiserror`.
//! Component-specific failures (signing, synthesis) have their own enums and
//! convert into [`Error`] at the component boundary.

pub mod types;

pub use types::{Error, Result};
