// Error types shared across the engine
use crate::value::Shape;
use assessor_common::types::ErrorCode;
use std::time::Duration;
use thiserror::Error;

/// Well-known fault kinds. Units may raise any other kind name.
pub mod kinds {
    /// Ancestor of every fault.
    pub const FAULT: &str = "Fault";
    pub const PANIC: &str = "Panic";
    pub const ILLEGAL_ARGUMENT: &str = "IllegalArgument";
    pub const ILLEGAL_STATE: &str = "IllegalState";
    pub const INDEX_OUT_OF_BOUNDS: &str = "IndexOutOfBounds";
    pub const NO_SUCH_ELEMENT: &str = "NoSuchElement";
    pub const UNSUPPORTED_OPERATION: &str = "UnsupportedOperation";
    /// Raised when submission code touches a unit that was never loaded.
    pub const UNDEFINED_UNIT: &str = "UndefinedUnit";
    pub const WORKER_LOST: &str = "WorkerLost";
}

/// A failure raised by submission code.
///
/// `lineage` lists the ancestor kinds, nearest first, so a check expecting a
/// broader kind accepts a more specific one.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct Fault {
    pub kind: String,
    pub lineage: Vec<String>,
    pub message: String,
}

impl Fault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            lineage: vec![kinds::FAULT.to_string()],
            message: message.into(),
        }
    }

    /// Insert `parent` as the nearest ancestor.
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.lineage.insert(0, parent.into());
        self
    }

    pub fn is_a(&self, kind: &str) -> bool {
        self.kind == kind || self.lineage.iter().any(|k| k == kind)
    }

    pub fn panic(message: impl Into<String>) -> Self {
        Self::new(kinds::PANIC, message)
    }

    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::new(kinds::ILLEGAL_ARGUMENT, message)
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(kinds::ILLEGAL_STATE, message)
    }

    pub fn index_out_of_bounds(message: impl Into<String>) -> Self {
        Self::new(kinds::INDEX_OUT_OF_BOUNDS, message)
    }

    pub fn no_such_element(message: impl Into<String>) -> Self {
        Self::new(kinds::NO_SUCH_ELEMENT, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(kinds::UNSUPPORTED_OPERATION, message)
    }

    pub fn undefined_unit(unit: impl Into<String>) -> Self {
        Self::new(kinds::UNDEFINED_UNIT, unit)
    }
}

/// Why a sandboxed call produced no value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureCause {
    #[error("timed out after {}ms", .limit.as_millis())]
    Timeout { limit: Duration },
    #[error(transparent)]
    Raised(Fault),
}

impl FailureCause {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FailureCause::Timeout { .. })
    }

    pub fn fault(&self) -> Option<&Fault> {
        match self {
            FailureCause::Raised(fault) => Some(fault),
            FailureCause::Timeout { .. } => None,
        }
    }
}

impl From<Fault> for FailureCause {
    fn from(fault: Fault) -> Self {
        FailureCause::Raised(fault)
    }
}

/// Reported by a build service when an artifact cannot become a loaded unit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildFailure {
    #[error("file not found: {file}")]
    FileMissing { file: String },
    #[error("expected file {expected}, found {found}")]
    WrongIdentity { expected: String, found: String },
    #[error("compilation of {file} failed: {diagnostics}")]
    Compilation { file: String, diagnostics: String },
    #[error("loading {file} failed: {diagnostics}")]
    Load { file: String, diagnostics: String },
}

impl BuildFailure {
    pub fn code(&self) -> ErrorCode {
        match self {
            BuildFailure::FileMissing { .. } => ErrorCode::MissingFile,
            BuildFailure::WrongIdentity { .. } => ErrorCode::WrongFileName,
            BuildFailure::Compilation { .. } => ErrorCode::CompilationError,
            BuildFailure::Load { .. } => ErrorCode::LoadingError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SymbolNotFound {
    #[error("{unit}.{name}{shape}")]
    Operation { unit: String, name: String, shape: Shape },
    #[error("{unit}.{name}")]
    Field { unit: String, name: String },
    #[error("new {unit}{shape}")]
    Constructor { unit: String, shape: Shape },
    #[error("{unit}.{name}")]
    Unit { unit: String, name: String },
}

/// Signal that stops the current check body.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Interrupt {
    /// A failing assertion. The message, when present, becomes a generic failure.
    #[error("check aborted{}", .0.as_deref().map(|m| format!(": {}", m)).unwrap_or_default())]
    ManualFailure(Option<String>),
    #[error("symbol not found: {0}")]
    SymbolNotFound(#[from] SymbolNotFound),
    #[error("undefined unit referenced: {0}")]
    UndefinedUnit(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl Interrupt {
    /// Abort the check after a Result was already logged.
    pub fn abort() -> Self {
        Interrupt::ManualFailure(None)
    }

    /// Abort the check and log `message` as a generic failure.
    pub fn fail(message: impl Into<String>) -> Self {
        Interrupt::ManualFailure(Some(message.into()))
    }
}

impl From<FailureCause> for Interrupt {
    fn from(cause: FailureCause) -> Self {
        match cause {
            FailureCause::Raised(fault) if fault.kind == kinds::UNDEFINED_UNIT => {
                Interrupt::UndefinedUnit(fault.message)
            }
            other => Interrupt::Unexpected(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TypeTag;

    #[test]
    fn test_fault_lineage() {
        let fault = Fault::new("EmptyQueue", "queue is empty")
            .extends(kinds::NO_SUCH_ELEMENT)
            .extends("QueueError");
        assert!(fault.is_a("EmptyQueue"));
        assert!(fault.is_a(kinds::NO_SUCH_ELEMENT));
        assert!(fault.is_a("QueueError"));
        assert!(fault.is_a(kinds::FAULT));
        assert!(!fault.is_a(kinds::ILLEGAL_ARGUMENT));
        assert_eq!(fault.to_string(), "EmptyQueue: queue is empty");
    }

    #[test]
    fn test_build_failure_codes() {
        let failure = BuildFailure::Compilation {
            file: "Queue.java".into(),
            diagnostics: "line 3: missing ;".into(),
        };
        assert_eq!(failure.code(), ErrorCode::CompilationError);
        assert_eq!(failure.to_string(), "compilation of Queue.java failed: line 3: missing ;");
    }

    #[test]
    fn test_symbol_not_found_rendering() {
        let missing = SymbolNotFound::Operation {
            unit: "Queue".into(),
            name: "enqueue".into(),
            shape: Shape::from([TypeTag::Int]),
        };
        assert_eq!(missing.to_string(), "Queue.enqueue(int)");
    }

    #[test]
    fn test_interrupt_from_failure_cause() {
        let undefined: Interrupt = FailureCause::Raised(Fault::undefined_unit("Node")).into();
        assert_eq!(undefined, Interrupt::UndefinedUnit("Node".into()));

        let timeout: Interrupt = FailureCause::Timeout { limit: Duration::from_millis(10) }.into();
        assert!(matches!(timeout, Interrupt::Unexpected(_)));
        assert_eq!(Interrupt::fail("nope").to_string(), "check aborted: nope");
    }
}
