//! The user-facing progress stream.
//!
//! Progress lines are a data contract (exact `"{table}: {message}"` format,
//! suppressible, redirectable), so they flow through an explicit [`Reporter`]
//! value rather than the `tracing` diagnostics layer.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// Destination for progress and status lines, one line per event.
#[derive(Clone, Default)]
pub enum Reporter {
    /// Emit nothing.
    Suppressed,
    /// Write to the process standard error stream.
    #[default]
    Stderr,
    /// Write to a caller-supplied sink.
    Sink(Arc<Mutex<Box<dyn Write + Send>>>),
}

impl Reporter {
    /// Wrap a custom writer.
    pub fn sink(writer: impl Write + Send + 'static) -> Self {
        Reporter::Sink(Arc::new(Mutex::new(Box::new(writer))))
    }

    /// Emit one `"{table}: {message}"` line, flushed.
    ///
    /// Write failures are reported via `tracing` and otherwise swallowed;
    /// a broken progress sink must not fail a migration.
    pub(crate) fn emit(&self, table: &str, message: &str) {
        match self {
            Reporter::Suppressed => {}
            Reporter::Stderr => {
                let stderr = std::io::stderr();
                let mut out = stderr.lock();
                let _ = writeln!(out, "{table}: {message}");
                let _ = out.flush();
            }
            Reporter::Sink(writer) => {
                let Ok(mut out) = writer.lock() else {
                    tracing::warn!(%table, "progress sink mutex poisoned, dropping message");
                    return;
                };
                if let Err(err) = writeln!(out, "{table}: {message}").and_then(|_| out.flush()) {
                    tracing::warn!(%table, %err, "failed to write progress line");
                }
            }
        }
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reporter::Suppressed => f.write_str("Reporter::Suppressed"),
            Reporter::Stderr => f.write_str("Reporter::Stderr"),
            Reporter::Sink(_) => f.write_str("Reporter::Sink(..)"),
        }
    }
}
