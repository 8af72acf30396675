//! `herald-core` — shared configuration, errors, and timing helpers.
//!
//! Everything here is dependency-light so every other crate in the
//! workspace can pull it in without cycles.

pub mod backoff;
pub mod config;
pub mod error;

pub use config::HeraldConfig;
pub use error::{HeraldError, Result};
