//! Commit message rendering.
//!
//! `{{date}}` and `{{numFiles}}` are each substituted once, at their first
//! occurrence. Anything else in the template is left as written.

use std::fmt::Write;

use chrono::{DateTime, Local};

use crate::config::DEFAULT_DATE_FORMAT;

pub const DATE: &str = "{{date}}";
pub const NUM_FILES: &str = "{{numFiles}}";

/// Inputs for one rendering. `num_files` is `None` when the caller did not
/// count changes, in which case `{{numFiles}}` stays in place.
#[derive(Debug, Clone, Copy)]
pub struct MessageContext<'a> {
    pub num_files: Option<usize>,
    pub now: DateTime<Local>,
    pub date_format: &'a str,
}

pub fn format_message(template: &str, ctx: &MessageContext<'_>) -> String {
    let mut message = template.to_string();
    if let Some(count) = ctx.num_files {
        message = message.replacen(NUM_FILES, &count.to_string(), 1);
    }
    if message.contains(DATE) {
        message = message.replacen(DATE, &format_date(&ctx.now, ctx.date_format), 1);
    }
    message
}

/// Renders `now` with a strftime format, falling back to the default format
/// when chrono rejects it.
pub fn format_date(now: &DateTime<Local>, format: &str) -> String {
    let mut out = String::new();
    if write!(out, "{}", now.format(format)).is_err() {
        out.clear();
        // the default format is always valid
        let _ = write!(out, "{}", now.format(DEFAULT_DATE_FORMAT));
    }
    out
}
