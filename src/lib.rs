//! Batch delivery of personalised HTML email over SMTP.
//!
//! The `dispatcher` drives a run: recipients are split into batches, each
//! message is composed per recipient (`composer`), sent with bounded retry
//! (`retry`) through a `transport`, and every terminal outcome is appended to
//! the `outcome_log` as soon as it is known.

pub mod composer;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod outcome_log;
pub mod recipients;
pub mod retry;
pub mod template;
pub mod transport;
pub mod types;
