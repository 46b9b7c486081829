//! Persistence for scheduled emails and nurture sequences
//!
//! Thin query layer over sqlx. Insert helpers accept any SQLite executor so
//! callers can group them in a transaction.

pub mod emails;
pub mod sequences;

pub use emails::NewScheduledEmail;
pub use sequences::NewEmailSequence;
