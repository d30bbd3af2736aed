//! Utility functions.

pub mod env;
pub mod format;
pub mod time;

pub use format::{format_percent, format_tokens, usage_bar};
pub use time::{format_age, format_countdown, format_local};
