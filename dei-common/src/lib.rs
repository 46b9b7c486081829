//! # DEI Common Library
//!
//! Shared code for the Daily Event Insurance email services:
//! - Database initialization, schema and migrations
//! - Row models for scheduled emails and nurture sequences
//! - Configuration loading
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
