//! Operational HTTP API for dei-mailer
//!
//! - `GET /health`
//! - `POST /api/process`: cron trigger for one processing pass
//! - `GET /api/stats`: scheduled email counts per status

pub mod health;
pub mod process;

pub use health::health_routes;
pub use process::process_routes;
