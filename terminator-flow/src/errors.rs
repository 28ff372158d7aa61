use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Window not found: {0}")]
    WindowNotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Ambiguous selector '{selector}': {candidates} candidates matched")]
    AmbiguousSelector { selector: String, candidates: usize },

    #[error("Element is detached from the UI tree: {0}")]
    ElementDetached(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AutomationError {
    /// A step or assertion was authored wrong. Never worth retrying.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            AutomationError::InvalidArgument(_)
                | AutomationError::UnknownAction(_)
                | AutomationError::InvalidSelector(_)
        )
    }

    /// The target could not be pinned down: not found in time, or matched
    /// more than once under the strict ambiguity policy. A normal failed
    /// outcome rather than an engine error.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            AutomationError::ElementNotFound(_)
                | AutomationError::WindowNotFound(_)
                | AutomationError::Timeout(_)
                | AutomationError::AmbiguousSelector { .. }
        )
    }

    /// The UI changed underneath us between resolution and use.
    pub fn is_transient(&self) -> bool {
        matches!(self, AutomationError::ElementDetached(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AutomationError::Cancelled(_))
    }
}

impl From<serde_json::Error> for AutomationError {
    fn from(error: serde_json::Error) -> Self {
        AutomationError::Serialization(error.to_string())
    }
}

impl From<serde_yaml::Error> for AutomationError {
    fn from(error: serde_yaml::Error) -> Self {
        AutomationError::Serialization(error.to_string())
    }
}
