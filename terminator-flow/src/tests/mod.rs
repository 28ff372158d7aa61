mod mock_driver;

use crate::config::EngineConfig;
use crate::domain_hints::DomainHintStore;
use crate::resolver::SelectorResolver;
use crate::FlowEngine;
use mock_driver::MockDriver;
use std::sync::Arc;

// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with_target(true)
        .with_test_writer()
        .try_init();
}

pub(crate) fn resolver_for(driver: &MockDriver, config: &EngineConfig) -> Arc<SelectorResolver> {
    Arc::new(SelectorResolver::new(
        Arc::new(driver.clone()),
        config.resolver.clone(),
    ))
}

pub(crate) fn engine_for(driver: &MockDriver, config: EngineConfig) -> FlowEngine {
    FlowEngine::new(
        Arc::new(driver.clone()),
        Arc::new(DomainHintStore::in_memory()),
        config,
    )
}

/// Defaults with short waits so failing paths finish quickly.
pub(crate) fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.default_step_timeout_ms = 500;
    config.window_wait_ms = 500;
    config.executor.launch_max_wait_ms = 2_000;
    config.executor.navigation_max_wait_ms = 2_000;
    config.executor.artifact_dir = std::env::temp_dir().join("terminator-flow-test-artifacts");
    config
}

/// Formatted log lines captured by a thread-local subscriber.
#[derive(Clone, Default)]
pub(crate) struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    pub(crate) fn warnings_containing(&self, needle: &str) -> usize {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .filter(|line| line.contains("WARN") && line.contains(needle))
            .count()
    }
}

/// Route this thread's warnings into a buffer until the guard drops.
pub(crate) fn capture_warnings() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
