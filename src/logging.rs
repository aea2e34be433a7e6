//! Logging configuration using tracing
//!
//! Structured logging to stderr, filtered with the RUST_LOG environment variable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber
///
/// Filtering comes from RUST_LOG, defaulting to "warn" for quiet CLI output.
///
/// # Example RUST_LOG values
/// - `RUST_LOG=info` - Show info and above
/// - `RUST_LOG=jiralink::client=debug` - Every Jira request
/// - `RUST_LOG=jiralink=debug,reqwest=info` - Different levels per crate
///
/// # Errors
/// Returns an error if the subscriber has already been initialized
pub fn init() -> crate::Result<()> {
    init_with_level("warn")
}

/// [`init`] with a different fallback level when RUST_LOG is unset
pub fn init_with_level(default_level: &str) -> crate::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| crate::JiraLinkError::Other(format!("Failed to initialize tracing: {}", e)))?;

    Ok(())
}

/// Initialize logging for tests (no-op if already initialized)
pub fn init_test() {
    let _ = init_with_level("debug");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        init_test();
        let err = init().unwrap_err();
        assert!(err.to_string().contains("Failed to initialize tracing"));
    }

    #[test]
    fn test_structured_fields() {
        init_test();
        tracing::info!(instance = "https://jira.example.com", user = "u1", "Connected user");
        tracing::warn!(error = %crate::JiraLinkError::not_found("instance"), "Lookup failed");
    }
}
