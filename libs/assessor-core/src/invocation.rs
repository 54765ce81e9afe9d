/// Assertion/Result Engine
///
/// **Core Responsibility:**
/// - Turn one sandboxed call into an immutable `InvocationRecord`
/// - Judge the record against an expectation and log exactly one Result
/// - Abort the current check (via `Interrupt`) when the judgement fails
///
/// Arguments, results and the receiver rendering are captured when the call is
/// made, so messages show the state the call actually saw.
use crate::error::{FailureCause, Interrupt};
use crate::runner::Session;
use crate::side_effects::SideEffectChecker;
use crate::value::{Instance, Value};
use assessor_common::types::{EqualityKind, ErrorCode, Outcome};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Operation { unit: String, name: String },
    Constructor { unit: String },
}

#[derive(Debug, Clone)]
pub struct InvocationRecord {
    target: Target,
    receiver: Option<String>,
    arguments: Vec<Value>,
    outcome: Result<Value, FailureCause>,
    elapsed: Duration,
}

impl InvocationRecord {
    /// `receiver` is the receiver as rendered before the call. `arguments` and
    /// a successful result are snapshotted here.
    pub fn new(
        target: Target,
        receiver: Option<String>,
        arguments: &[Value],
        outcome: Result<Value, FailureCause>,
        elapsed: Duration,
    ) -> Self {
        Self {
            target,
            receiver,
            arguments: arguments.iter().map(Value::snapshot).collect(),
            outcome: outcome.map(|v| v.snapshot()),
            elapsed,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn receiver(&self) -> Option<&str> {
        self.receiver.as_deref()
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn outcome(&self) -> &Result<Value, FailureCause> {
        &self.outcome
    }

    pub fn value(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&FailureCause> {
        self.outcome.as_ref().err()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn timed_out(&self) -> bool {
        matches!(&self.outcome, Err(cause) if cause.is_timeout())
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

impl fmt::Display for InvocationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.arguments.iter().map(|a| a.to_string()).collect();
        match (&self.target, &self.receiver) {
            (Target::Constructor { unit }, _) => write!(f, "new {}({})", unit, args.join(", ")),
            (Target::Operation { name, .. }, Some(receiver)) => {
                write!(f, "{}.{}({})", receiver, name, args.join(", "))
            }
            (Target::Operation { unit, name }, None) => write!(f, "{}.{}({})", unit, name, args.join(", ")),
        }
    }
}

fn join(values: &[Value]) -> String {
    let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", items.join(", "))
}

/// Multiset comparison: same length and every element matched once.
pub fn is_permutation(actual: &[Value], expected: &[Value]) -> bool {
    if actual.len() != expected.len() {
        return false;
    }
    let mut remaining: Vec<&Value> = actual.iter().collect();
    for item in expected {
        match remaining.iter().position(|v| *v == item) {
            Some(index) => {
                remaining.swap_remove(index);
            }
            None => return false,
        }
    }
    true
}

fn failure_outcome(call: &str, cause: &FailureCause) -> Outcome {
    match cause {
        FailureCause::Timeout { .. } => Outcome::error(
            ErrorCode::MethodTimeout,
            format!(
                "Method execution timed out: {}. Have you checked for infinite loops or unbounded recursion?",
                call
            ),
        ),
        FailureCause::Raised(fault) => Outcome::error(
            ErrorCode::UnexpectedException,
            format!(
                "{} should not have thrown any exceptions, but threw {} with message \"{}\"",
                call, fault.kind, fault.message
            ),
        ),
    }
}

/// A completed operation call, waiting to be judged.
pub struct MethodCall<'s> {
    session: &'s mut Session,
    record: InvocationRecord,
}

impl<'s> MethodCall<'s> {
    pub(crate) fn new(session: &'s mut Session, record: InvocationRecord) -> Self {
        Self { session, record }
    }

    pub fn record(&self) -> &InvocationRecord {
        &self.record
    }

    pub fn is_success(&self) -> bool {
        self.record.is_success()
    }

    fn reject(self, cause: &FailureCause) -> Interrupt {
        let outcome = failure_outcome(&self.record.to_string(), cause);
        self.session.log(outcome);
        Interrupt::abort()
    }

    fn judge(self, passed: bool, code: ErrorCode, message: String) -> Result<(), Interrupt> {
        self.session.log(Outcome::judged(passed, code, message));
        if passed {
            Ok(())
        } else {
            Err(Interrupt::abort())
        }
    }

    fn compare<F>(self, kind: EqualityKind, expectation: String, accept: F) -> Result<Value, Interrupt>
    where
        F: FnOnce(&Value) -> bool,
    {
        let actual = match self.record.outcome.clone() {
            Ok(actual) => actual,
            Err(cause) => return Err(self.reject(&cause)),
        };
        let call = self.record.to_string();
        let passed = accept(&actual);
        let message = if passed {
            format!("{} returned <{}>", call, actual)
        } else {
            format!("{} returned wrong result: {} but was <{}>", call, expectation, actual)
        };
        self.judge(passed, ErrorCode::WrongResult(kind), message)?;
        Ok(actual)
    }

    /// The result, or a logged failure when the call did not produce one.
    pub fn get_or_fail(self) -> Result<Value, Interrupt> {
        match self.record.outcome.clone() {
            Ok(value) => Ok(value),
            Err(cause) => Err(self.reject(&cause)),
        }
    }

    /// Like `get_or_fail`, but a failure logs `message` as a generic failure.
    pub fn get_or_fail_with(self, message: &str) -> Result<Value, Interrupt> {
        match self.record.outcome.clone() {
            Ok(value) => Ok(value),
            Err(_) => {
                self.session.log(Outcome::failure(message));
                Err(Interrupt::abort())
            }
        }
    }

    pub fn assert_equals(self, expected: impl Into<Value>) -> Result<Value, Interrupt> {
        let expected = expected.into().snapshot();
        let expectation = format!("Expected <{}>", expected);
        self.compare(EqualityKind::Exact, expectation, |actual| *actual == expected)
    }

    pub fn assert_equals_any<I, V>(self, expected: I) -> Result<Value, Interrupt>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let expected: Vec<Value> = expected.into_iter().map(|v| v.into().snapshot()).collect();
        let expectation = format!("Expected one of {}", join(&expected));
        self.compare(EqualityKind::Any, expectation, |actual| expected.contains(actual))
    }

    pub fn assert_is_permutation<I, V>(self, expected: I) -> Result<Value, Interrupt>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let expected: Vec<Value> = expected.into_iter().map(|v| v.into().snapshot()).collect();
        let expectation = format!("Expected a permutation of <{}>", join(&expected));
        self.compare(EqualityKind::Permutation, expectation, |actual| {
            actual
                .sequence()
                .map_or(false, |items| is_permutation(&items, &expected))
        })
    }

    /// Element-wise comparison of a returned list or array.
    pub fn assert_content<I, V>(self, expected: I) -> Result<Value, Interrupt>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let expected: Vec<Value> = expected.into_iter().map(|v| v.into().snapshot()).collect();
        let expectation = format!("Expected content <{}>", join(&expected));
        self.compare(EqualityKind::Content, expectation, |actual| {
            actual.sequence().map_or(false, |items| items == expected)
        })
    }

    fn assert_bool(self, wanted: bool, message: Option<&str>) -> Result<(), Interrupt> {
        let actual = match self.record.outcome.clone() {
            Ok(actual) => actual,
            Err(cause) => return Err(self.reject(&cause)),
        };
        if actual.as_bool() == Some(wanted) {
            let message = format!("{} returned <{}>", self.record, wanted);
            return self.judge(true, ErrorCode::Success, message);
        }
        match message {
            Some(message) => {
                self.session.log(Outcome::failure(message));
                Err(Interrupt::abort())
            }
            None => {
                let message = format!(
                    "{} returned wrong result: Expected <{}> but was <{}>",
                    self.record, wanted, actual
                );
                self.judge(false, ErrorCode::WrongResult(EqualityKind::Exact), message)
            }
        }
    }

    pub fn assert_true(self) -> Result<(), Interrupt> {
        self.assert_bool(true, None)
    }

    pub fn assert_true_with(self, message: &str) -> Result<(), Interrupt> {
        self.assert_bool(true, Some(message))
    }

    pub fn assert_false(self) -> Result<(), Interrupt> {
        self.assert_bool(false, None)
    }

    pub fn assert_false_with(self, message: &str) -> Result<(), Interrupt> {
        self.assert_bool(false, Some(message))
    }

    /// Passes when the call raised a fault of `kind` or a descendant of it.
    pub fn assert_throws(self, kind: &str) -> Result<(), Interrupt> {
        let call = self.record.to_string();
        match self.record.outcome.clone() {
            Ok(value) => self.judge(
                false,
                ErrorCode::MissingRequiredException,
                format!("{} returned <{}> but should have thrown {}", call, value, kind),
            ),
            Err(cause @ FailureCause::Timeout { .. }) => Err(self.reject(&cause)),
            Err(FailureCause::Raised(fault)) => {
                if fault.is_a(kind) {
                    self.judge(true, ErrorCode::Success, format!("{} threw {} as expected", call, fault.kind))
                } else {
                    self.judge(
                        false,
                        ErrorCode::WrongExceptionType,
                        format!(
                            "{} threw the wrong type of exception: Expected {} but threw {}",
                            call, kind, fault.kind
                        ),
                    )
                }
            }
        }
    }

    pub fn assert_does_not_throw(self) -> Result<Value, Interrupt> {
        match self.record.outcome.clone() {
            Ok(value) => {
                let message = format!("{} did not throw", self.record);
                self.judge(true, ErrorCode::Success, message)?;
                Ok(value)
            }
            Err(cause) => Err(self.reject(&cause)),
        }
    }

    /// Judges the state left behind by the call rather than its result.
    ///
    /// A call that raised is still judged on its effect; a timed-out call is not,
    /// since its worker may still be running.
    pub fn assert_produces_side_effect(self, checker: &dyn SideEffectChecker) -> Result<(), Interrupt> {
        if let Err(cause @ FailureCause::Timeout { .. }) = &self.record.outcome {
            let cause = cause.clone();
            return Err(self.reject(&cause));
        }
        let passed = checker.check();
        let message = format!(
            "Calling {} {} the intended effect: {}",
            self.record,
            if passed { "produced" } else { "did not produce" },
            checker.message(passed)
        );
        self.judge(passed, ErrorCode::IncorrectSideEffect, message)
    }
}

/// A completed constructor call.
pub struct ObjectInstantiation<'s> {
    session: &'s mut Session,
    record: InvocationRecord,
    instance: Result<Instance, FailureCause>,
}

impl<'s> ObjectInstantiation<'s> {
    pub(crate) fn new(session: &'s mut Session, record: InvocationRecord, instance: Result<Instance, FailureCause>) -> Self {
        Self {
            session,
            record,
            instance,
        }
    }

    pub fn record(&self) -> &InvocationRecord {
        &self.record
    }

    pub fn get_or_fail(self) -> Result<Instance, Interrupt> {
        match self.instance {
            Ok(instance) => Ok(instance),
            Err(cause) => {
                let message = match &cause {
                    FailureCause::Timeout { .. } => format!(
                        "Constructor for {} timed out. Have you checked for infinite loops or unbounded recursion?",
                        self.record
                    ),
                    FailureCause::Raised(fault) => format!(
                        "Constructor for {} threw unexpected {} with message \"{}\"",
                        self.record, fault.kind, fault.message
                    ),
                };
                self.session.log(Outcome::error(ErrorCode::InstantiationError, message));
                Err(Interrupt::abort())
            }
        }
    }

    /// The instance or the raw cause, without logging anything.
    pub fn get_or_throw(self) -> Result<Instance, FailureCause> {
        self.instance
    }

    pub fn assert_throws(self, kind: &str) -> Result<(), Interrupt> {
        let (passed, code, message) = match &self.instance {
            Ok(_) => (
                false,
                ErrorCode::MissingRequiredException,
                format!("{} did not throw any exceptions, but should have thrown {}", self.record, kind),
            ),
            Err(FailureCause::Timeout { .. }) => (
                false,
                ErrorCode::MethodTimeout,
                format!(
                    "Constructor for {} timed out. Have you checked for infinite loops or unbounded recursion?",
                    self.record
                ),
            ),
            Err(FailureCause::Raised(fault)) if fault.is_a(kind) => (
                true,
                ErrorCode::Success,
                format!("{} threw {} as expected", self.record, fault.kind),
            ),
            Err(FailureCause::Raised(fault)) => (
                false,
                ErrorCode::WrongExceptionType,
                format!(
                    "{} threw the wrong type of exception: Expected {} but threw {}",
                    self.record, kind, fault.kind
                ),
            ),
        };
        self.session.log(Outcome::judged(passed, code, message));
        if passed {
            Ok(())
        } else {
            Err(Interrupt::abort())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Fault;

    fn make_record(outcome: Result<Value, FailureCause>) -> InvocationRecord {
        InvocationRecord::new(
            Target::Operation {
                unit: "Queue".into(),
                name: "dequeue".into(),
            },
            None,
            &[Value::Int(1)],
            outcome,
            Duration::from_millis(1),
        )
    }

    #[test]
    fn test_permutation_is_multiset() {
        let ints = |v: &[i64]| v.iter().map(|i| Value::Int(*i)).collect::<Vec<_>>();
        assert!(is_permutation(&ints(&[3, 1, 2]), &ints(&[1, 2, 3])));
        assert!(!is_permutation(&ints(&[1, 2, 2]), &ints(&[1, 2, 3])));
        assert!(!is_permutation(&ints(&[1, 1, 2]), &ints(&[1, 2, 2])));
        assert!(!is_permutation(&ints(&[1, 2]), &ints(&[1, 2, 3])));
        assert!(is_permutation(&[], &[]));
    }

    #[test]
    fn test_record_rendering() {
        let record = make_record(Ok(Value::Int(1)));
        assert_eq!(record.to_string(), "Queue.dequeue(1)");
        assert!(record.is_success());
        assert!(!record.timed_out());

        let ctor = InvocationRecord::new(
            Target::Constructor { unit: "Queue".into() },
            None,
            &[Value::Int(4), Value::from("x")],
            Err(FailureCause::Raised(Fault::illegal_argument("capacity"))),
            Duration::ZERO,
        );
        assert_eq!(ctor.to_string(), "new Queue(4, x)");
    }

    #[test]
    fn test_record_snapshots_arguments() {
        let array = crate::value::ArrayRef::new(vec![Value::Int(2), Value::Int(1)]);
        let record = InvocationRecord::new(
            Target::Operation {
                unit: "Sorter".into(),
                name: "sort".into(),
            },
            None,
            &[Value::Array(array.clone())],
            Ok(Value::Array(array.clone())),
            Duration::ZERO,
        );
        array.set(0, Value::Int(9));
        assert_eq!(record.to_string(), "Sorter.sort([2, 1])");
        assert_eq!(record.value().map(|v| v.to_string()), Some("[2, 1]".to_string()));
    }

    #[test]
    fn test_failure_outcome_messages() {
        let timeout = failure_outcome("Queue.dequeue()", &FailureCause::Timeout { limit: Duration::from_secs(5) });
        assert_eq!(timeout.code, ErrorCode::MethodTimeout);
        assert!(timeout.message.unwrap().starts_with("Method execution timed out: Queue.dequeue()"));

        let raised = failure_outcome("Queue.dequeue()", &FailureCause::Raised(Fault::no_such_element("empty")));
        assert_eq!(raised.code, ErrorCode::UnexpectedException);
        assert_eq!(
            raised.message.unwrap(),
            "Queue.dequeue() should not have thrown any exceptions, but threw NoSuchElement with message \"empty\""
        );
    }
}
