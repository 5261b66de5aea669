//! # zapflow-core
//!
//! Core types, collaborator traits, configuration, and error handling for zapflow.

pub mod clock;
pub mod config;
pub mod error;
pub mod message;
pub mod records;
pub mod traits;

pub use config::shellexpand;
