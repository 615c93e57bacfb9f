//! Logging setup for binaries and tests that drive the solver.
//!
//! The engine itself only emits `tracing` events: `debug!` per iteration and per
//! strategy change, `info!`/`warn!` for the final summary and `error!` for fatal
//! conditions. Nothing is printed unless a subscriber is installed.

use tracing::Level;

/// Install a formatting subscriber at INFO, overridable through `RUST_LOG`.
///
/// ```no_run
/// descent_ladder::init_logger();
/// tracing::info!("ready");
/// ```
pub fn init_logger() -> bool {
    init_logger_with_level(Level::INFO)
}

/// Install a formatting subscriber with the given default level.
///
/// Returns `false` if a global subscriber was already installed, which makes it
/// safe to call from several tests.
///
/// ```bash
/// RUST_LOG=descent_ladder=debug cargo run --bin my_optimizer
/// ```
pub fn init_logger_with_level(default_level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;

    #[test]
    fn test_second_install_is_refused() {
        init_logger_with_level(Level::WARN);
        assert_that(&init_logger()).is_false();
    }
}
