//! Declarative desktop UI flows driven through accessibility APIs
//!
//! A [`Flow`] is an ordered list of steps (launch, click, type, navigate,
//! assert, ...). [`FlowEngine`] resolves each step's window and element,
//! performs the action, checks its assertions and returns an
//! [`ExecutionReport`].

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

pub mod assertions;
pub mod config;
pub mod domain_hints;
pub mod element;
pub mod errors;
pub mod executor;
pub mod flow;
pub mod orchestrator;
pub mod platforms;
pub mod report;
pub mod resolver;
pub mod selector;
#[cfg(test)]
mod tests;
pub mod wait;

pub use assertions::AssertionEvaluator;
pub use config::{AmbiguityPolicy, EngineConfig, NotExistsMode};
pub use domain_hints::DomainHintStore;
pub use element::{Bounds, ElementSnapshot, UIElement, WindowHandle, WindowInfo};
pub use errors::AutomationError;
pub use executor::ActionExecutor;
pub use flow::{Action, ActionKind, Assertion, AssertionKind, Flow, Step};
pub use orchestrator::{RunContext, StepOrchestrator};
pub use platforms::AccessibilityDriver;
pub use report::{ExecutionReport, FlowVerdict, StepReport, StepStatus};
pub use resolver::{SelectorMatch, SelectorResolver};
pub use selector::Selector;

/// Install a `RUST_LOG`-driven fmt subscriber, defaulting to `info`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .try_init();
}

/// The main entry point for running flows
pub struct FlowEngine {
    driver: Arc<dyn AccessibilityDriver>,
    resolver: Arc<SelectorResolver>,
    hints: Arc<DomainHintStore>,
    orchestrator: StepOrchestrator,
}

impl FlowEngine {
    /// Build an engine around an existing driver and hint store.
    pub fn new(
        driver: Arc<dyn AccessibilityDriver>,
        hints: Arc<DomainHintStore>,
        config: EngineConfig,
    ) -> Self {
        let resolver = Arc::new(SelectorResolver::new(
            Arc::clone(&driver),
            config.resolver.clone(),
        ));
        let executor = ActionExecutor::new(
            Arc::clone(&driver),
            Arc::clone(&hints),
            config.executor.clone(),
        );
        let evaluator = AssertionEvaluator::new(
            Arc::clone(&resolver),
            config.assertions.clone(),
            config.default_step_timeout(),
        );
        let orchestrator =
            StepOrchestrator::new(Arc::clone(&resolver), executor, evaluator, config);
        Self {
            driver,
            resolver,
            hints,
            orchestrator,
        }
    }

    /// Platform driver, persisted hints and environment overrides.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use terminator_flow::{Flow, FlowEngine};
    /// # async fn demo() -> Result<(), terminator_flow::AutomationError> {
    /// let engine = FlowEngine::new_default()?;
    /// let flow = Flow::from_file("calculator.json")?;
    /// let report = engine.run(&flow).await;
    /// println!("{}", report.summary());
    /// # Ok(())
    /// # }
    /// ```
    pub fn new_default() -> Result<Self, AutomationError> {
        Self::with_config(EngineConfig::from_env())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, AutomationError> {
        let driver = platforms::create_driver()?;
        let hints = match config.resolved_hints_path() {
            Some(path) => DomainHintStore::load(path),
            None => DomainHintStore::in_memory(),
        };
        Ok(Self::new(driver, Arc::new(hints), config))
    }

    pub fn driver(&self) -> &Arc<dyn AccessibilityDriver> {
        &self.driver
    }

    pub fn resolver(&self) -> &Arc<SelectorResolver> {
        &self.resolver
    }

    pub fn hints(&self) -> &Arc<DomainHintStore> {
        &self.hints
    }

    #[instrument(skip(self, flow), fields(flow = %flow.test_name))]
    pub async fn run(&self, flow: &Flow) -> ExecutionReport {
        self.orchestrator.run(flow, CancellationToken::new()).await
    }

    /// Run `flow`, stopping at the next poll or step boundary once `cancel` fires.
    #[instrument(skip(self, flow, cancel), fields(flow = %flow.test_name))]
    pub async fn run_with_cancellation(
        &self,
        flow: &Flow,
        cancel: CancellationToken,
    ) -> ExecutionReport {
        self.orchestrator.run(flow, cancel).await
    }
}
