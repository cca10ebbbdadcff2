//! Query diagnostics: elapsed-time logging with a readable query string.
//!
//! Controlled by a process-wide flag. When the flag is off nothing is
//! rendered or measured.

use crate::models::QueryParam;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Tracing target for per-query timing lines.
pub const QUERY_LOG_TARGET: &str = "ephemeral_db::query";

static LOGGING: AtomicBool = AtomicBool::new(false);

/// Enable or disable query timing logs for the whole process.
pub fn set_logging(enabled: bool) {
    LOGGING.store(enabled, Ordering::Relaxed);
}

pub fn is_logging() -> bool {
    LOGGING.load(Ordering::Relaxed)
}

/// Literal SQL form of a parameter.
///
/// Booleans and numbers are written bare, NULL as `NULL`, everything else is
/// single-quoted without escaping.
pub fn render_param(param: &QueryParam) -> String {
    match param {
        QueryParam::Null => "NULL".to_string(),
        QueryParam::Bool(v) => v.to_string(),
        QueryParam::Int(v) => v.to_string(),
        QueryParam::UInt(v) => v.to_string(),
        QueryParam::Float(v) => v.to_string(),
        QueryParam::String(v) => format!("'{}'", v),
        QueryParam::Bytes(v) => format!("'{}'", String::from_utf8_lossy(v)),
        QueryParam::Timestamp(v) => format!("'{}'", v.format("%Y-%m-%d %H:%M:%S%.f")),
    }
}

/// Substitute `?` placeholders left to right with literal parameter values.
///
/// Best effort, for logs only: placeholders inside string literals are
/// replaced too, surplus parameters are ignored and surplus placeholders are
/// left as they are.
pub fn render_query(query: &str, params: &[QueryParam]) -> String {
    if params.is_empty() {
        return query.to_string();
    }

    let mut rendered = String::with_capacity(query.len() + params.len() * 8);
    let mut params = params.iter();
    for ch in query.chars() {
        match ch {
            '?' => match params.next() {
                Some(param) => rendered.push_str(&render_param(param)),
                None => rendered.push(ch),
            },
            _ => rendered.push(ch),
        }
    }
    rendered
}

/// Guard that logs the elapsed time of a query when dropped.
#[must_use = "the timer logs when it is dropped"]
pub struct QueryTimer {
    started: Option<(Instant, String)>,
}

impl QueryTimer {
    /// Start timing `query` if logging is enabled.
    pub fn start(query: &str, params: &[QueryParam]) -> Self {
        let started = is_logging().then(|| (Instant::now(), render_query(query, params)));
        Self { started }
    }

    pub fn is_active(&self) -> bool {
        self.started.is_some()
    }
}

impl Drop for QueryTimer {
    fn drop(&mut self) {
        if let Some((start, query)) = self.started.take() {
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            tracing::info!(
                target: QUERY_LOG_TARGET,
                elapsed_ms,
                "[{:.2}ms] {}",
                elapsed_ms,
                query
            );
        }
    }
}
