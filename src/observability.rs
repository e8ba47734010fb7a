//! Logging infrastructure for the table store.
//!
//! Events are emitted through `tracing` with target "tablestore" and always
//! carry an `event` field for filtering.
//!
//! ## Library Integration
//!
//! The crate never installs a global subscriber. Applications configure
//! tracing via `tracing_subscriber` or similar.
//!
//! ## Conventions
//!
//! - `event`: snake_case event name (required)
//! - `component`: subsystem emitting the event ("write", "commit", "scan", ...)
//! - Use `%` for Display, `?` for Debug formatting
//! - Per-row events are never logged; keep fields to per-file or per-commit granularity

/// Target for all table store log events.
pub(crate) const TABLESTORE_TARGET: &str = "tablestore";

/// Macro for info-level log events.
///
/// # Example
/// ```ignore
/// log_info!(
///     component = "commit",
///     event = "snapshot_published",
///     snapshot_id = id,
///     commit_user = %user,
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::TABLESTORE_TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::TABLESTORE_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::TABLESTORE_TARGET, $($field)*)
    };
}

/// Macro for error-level log events.
macro_rules! log_error {
    ($($field:tt)*) => {
        ::tracing::error!(target: $crate::observability::TABLESTORE_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
