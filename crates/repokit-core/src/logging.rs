//! Tracing subscriber bootstrap

use anyhow::Context;
use tracing_subscriber::EnvFilter;

/// Directive applied on top of `RUST_LOG`
pub const DEFAULT_DIRECTIVE: &str = "repokit_core=info";

/// Install a fmt subscriber filtered by `RUST_LOG` plus `directive`
///
/// Fails if a global subscriber is already installed, so calling it twice is
/// harmless for callers that ignore the error.
pub fn init_tracing(directive: Option<&str>) -> anyhow::Result<()> {
    let directive = directive.unwrap_or(DEFAULT_DIRECTIVE);
    let filter = EnvFilter::from_default_env().add_directive(
        directive
            .parse()
            .with_context(|| format!("Invalid tracing directive: {directive}"))?,
    );

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        let _ = init_tracing(None);

        // a subscriber is installed now, whichever call installed it
        let err = init_tracing(Some("repokit_core=debug")).unwrap_err();
        assert!(err.to_string().contains("Failed to install tracing subscriber"));
    }

    #[test]
    fn test_invalid_directive_is_rejected() {
        let err = init_tracing(Some("repokit_core=loud")).unwrap_err();
        assert!(err.to_string().contains("Invalid tracing directive"));
    }
}
