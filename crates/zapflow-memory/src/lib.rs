//! # zapflow-memory
//!
//! Persistent storage for zapflow (SQLite-backed): conversation context,
//! instance variables, contacts, the message/event/alert logs, and scheduled jobs.

pub mod store;

pub use store::Store;
