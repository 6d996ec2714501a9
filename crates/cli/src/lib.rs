//! Ambient-stack helpers shared by every graphd binary: logging setup and
//! an early-exit-on-error trait.

mod logging;

pub use logging::{init_logging, LogArgs, LogFormat};

/// Helper trait for exiting the process early when a `Result` carries a
/// fault that should never reach the caller (used at binary boundaries
/// only; library crates propagate `Result` normally).
pub trait OrBail<T> {
    fn or_bail(self, message: &str) -> T;
}

impl<T, E> OrBail<T> for Result<T, E>
where
    E: std::fmt::Display + std::fmt::Debug,
{
    fn or_bail(self, message: &str) -> T {
        match self {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(error_details = ?e, message);
                tracing::error!(error = %e, message);
                std::process::exit(1);
            }
        }
    }
}
