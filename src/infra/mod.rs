//! Infrastructure layer: configuration, logging setup and their errors.

pub mod config;
pub mod error;
pub mod logging;
