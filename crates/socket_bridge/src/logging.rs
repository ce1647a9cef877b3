//! Logger capability consumed by the server.
//!
//! The host application decides where server diagnostics end up by handing a
//! [`ServerLogger`] to the server at construction. [`TracingLogger`] forwards
//! everything to the `tracing` macros and is what the bundled binary uses.

use std::error::Error;
use tracing::{error, info, warn};

/// Reporting interface for server diagnostics.
///
/// Implementations must be cheap to call from many tasks at once; the server
/// shares one logger between the accept loop and every connection.
pub trait ServerLogger: Send + Sync {
    /// Routine lifecycle information.
    fn info(&self, message: &str);

    /// Recoverable problems that may need attention.
    fn warning(&self, message: &str);

    /// Failures that end an operation or an instance.
    fn severe(&self, message: &str);

    /// A failure with its underlying error attached.
    fn exception(&self, message: &str, error: &dyn Error);
}

/// [`ServerLogger`] backed by `tracing`.
///
/// `severe` and `exception` both map to `error!`; the error of an exception is
/// attached as the `error` field.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    name: String,
}

impl TracingLogger {
    /// Creates a logger that tags every record with `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The tag attached to every record.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new("socket_bridge")
    }
}

impl ServerLogger for TracingLogger {
    fn info(&self, message: &str) {
        info!(logger = %self.name, "{}", message);
    }

    fn warning(&self, message: &str) {
        warn!(logger = %self.name, "{}", message);
    }

    fn severe(&self, message: &str) {
        error!(logger = %self.name, "{}", message);
    }

    fn exception(&self, message: &str, error: &dyn Error) {
        error!(logger = %self.name, error = %error, "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_logger_accepts_all_levels() {
        let logger = TracingLogger::new("test");
        assert_eq!(logger.name(), "test");

        // No subscriber is installed; the calls must simply not panic
        logger.info("info");
        logger.warning("warning");
        logger.severe("severe");
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        logger.exception("exception", &err);
    }

    #[test]
    fn test_default_name() {
        assert_eq!(TracingLogger::default().name(), "socket_bridge");
    }
}
