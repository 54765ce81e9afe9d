/// Test Execution State Machine
///
/// **Core Responsibility:**
/// Run every check of a suite against one submission, in declaration order,
/// and collect the Results each check logs.
///
/// **Run order:**
/// 1. Copy included fixtures into the submission directory
/// 2. Build precompile-if-present units found in the submission
/// 3. Before-all hooks (failures logged, never fatal)
/// 4. For each check: before-each hooks, required units, then the body
///
/// A failing assertion unwinds only the body that raised it. Units are built
/// at most once per run. A failure is memoized and reported under the first
/// check that requires the unit; later dependent checks are skipped silently.
use crate::error::{BuildFailure, Interrupt, SymbolNotFound};
use crate::files;
use crate::invocation::{InvocationRecord, MethodCall, ObjectInstantiation, Target};
use crate::resolver::Resolver;
use crate::sandbox::Sandbox;
use crate::suite::{CheckBody, Suite};
use crate::unit::{BuildService, FieldHandle, Loadable, LoadedUnit, OperationHandle};
use crate::value::{Instance, Shape, Value};
use assessor_common::types::{CheckDefinition, CheckRecord, ErrorCode, Outcome, Submission};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Compiled units and failed builds for one run.
#[derive(Default)]
struct UnitCache {
    loaded: HashMap<String, Arc<LoadedUnit>>,
    // failure plus whether it has been logged yet
    failed: HashMap<String, (BuildFailure, bool)>,
}

/// Per-submission state handed to hooks and check bodies.
pub struct Session {
    submission: Arc<Submission>,
    build: Arc<dyn BuildService>,
    sandbox: Arc<Sandbox>,
    resolver: Resolver,
    cache: UnitCache,
    fixtures: HashMap<String, Value>,
    records: Vec<CheckRecord>,
    setup: Vec<Outcome>,
    invocations: Vec<InvocationRecord>,
    current: Option<usize>,
}

impl Session {
    pub(crate) fn new(
        submission: Arc<Submission>,
        build: Arc<dyn BuildService>,
        sandbox: Arc<Sandbox>,
        resolver: Resolver,
        definitions: Vec<CheckDefinition>,
    ) -> Self {
        Self {
            submission,
            build,
            sandbox,
            resolver,
            cache: UnitCache::default(),
            fixtures: HashMap::new(),
            records: definitions.into_iter().map(CheckRecord::new).collect(),
            setup: Vec::new(),
            invocations: Vec::new(),
            current: None,
        }
    }

    pub fn submission(&self) -> &Submission {
        &self.submission
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// The check currently running, `None` during setup.
    pub fn current_check(&self) -> Option<&CheckDefinition> {
        self.current.map(|i| &self.records[i].definition)
    }

    /// Every call made so far in this run.
    pub fn invocations(&self) -> &[InvocationRecord] {
        &self.invocations
    }

    /// Append a Result to the current check, or to setup outside any check.
    pub fn log(&mut self, outcome: Outcome) {
        debug!(
            submission = %self.submission.name,
            code = %outcome.code,
            passed = outcome.passed,
            "Result logged"
        );
        match self.current {
            Some(index) => self.records[index].outcomes.push(outcome),
            None => self.setup.push(outcome),
        }
    }

    fn record_invocation(&mut self, record: &InvocationRecord) {
        if let Some(index) = self.current {
            self.records[index].trace.push(record.to_string());
        }
        self.invocations.push(record.clone());
    }

    // ----- fixtures -----

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.fixtures.insert(name.to_string(), value.into());
    }

    pub fn fixture(&self, name: &str) -> Option<&Value> {
        self.fixtures.get(name)
    }

    /// Fixture holding an object; a missing one fails the check.
    pub fn instance(&self, name: &str) -> Result<Instance, Interrupt> {
        self.fixtures
            .get(name)
            .and_then(Value::as_instance)
            .cloned()
            .ok_or_else(|| Interrupt::fail(format!("Setup did not produce {}", name)))
    }

    // ----- units -----

    fn build_failure_outcome(failure: &BuildFailure) -> Outcome {
        let message = match failure {
            BuildFailure::FileMissing { file } => {
                format!("File not found: {}. Did you submit it with the correct name?", file)
            }
            BuildFailure::WrongIdentity { expected, found } => {
                format!("Wrong file name: expected {} but the file declares {}.", expected, found)
            }
            BuildFailure::Compilation { file, diagnostics } => {
                format!("Compilation error in {}: {}", file, diagnostics)
            }
            BuildFailure::Load { file, diagnostics } => format!("Could not load {}: {}", file, diagnostics),
        };
        Outcome::error(failure.code(), message)
    }

    /// Locate and build `file`, logging what went wrong when `report` is set.
    fn load_unit(&mut self, file: &str, report: bool) -> Result<Arc<LoadedUnit>, BuildFailure> {
        if let Some(unit) = self.cache.loaded.get(file) {
            return Ok(unit.clone());
        }
        // logged once, under the first check that asks for it
        if let Some((failure, reported)) = self.cache.failed.get(file).cloned() {
            if report && !reported {
                self.log(Self::build_failure_outcome(&failure));
                self.cache.failed.insert(file.to_string(), (failure.clone(), true));
            }
            return Err(failure);
        }

        let located = files::find_closest_descendant(
            &self.submission.directory,
            file,
            self.resolver.metric(),
            self.resolver.tolerance(),
        );

        let result = match located {
            None => Err(BuildFailure::FileMissing { file: file.to_string() }),
            Some(path) => {
                let found = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if found != file && report {
                    self.log(Outcome::error(
                        ErrorCode::WrongFileName,
                        format!(
                            "Could not find file {}, but found file with similar name: {}. Please use the exact file name.",
                            file, found
                        ),
                    ));
                }
                let started = Instant::now();
                let built = self.build.prepare(&self.submission, &path);
                debug!(
                    submission = %self.submission.name,
                    file = %found,
                    ok = built.is_ok(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Build finished"
                );
                built
            }
        };

        match result {
            Ok(unit) => {
                self.cache.loaded.insert(file.to_string(), unit.clone());
                Ok(unit)
            }
            Err(failure) => {
                info!(submission = %self.submission.name, file = %file, error = %failure, "Unit unavailable");
                if report {
                    self.log(Self::build_failure_outcome(&failure));
                }
                self.cache.failed.insert(file.to_string(), (failure.clone(), report));
                Err(failure)
            }
        }
    }

    /// A loaded unit by file name or unit name, building it on first use.
    ///
    /// A bare unit name is looked up among loaded units and their nested units,
    /// then mapped to the expected or submitted file whose stem matches it.
    pub fn unit(&mut self, name: &str) -> Result<Arc<LoadedUnit>, Interrupt> {
        if let Some(unit) = self.cache.loaded.values().find(|u| u.unit_name() == name) {
            return Ok(unit.clone());
        }
        let resolver = self.resolver;
        if let Some(unit) = self
            .cache
            .loaded
            .values()
            .find_map(|u| resolver.nested(&**u, name).ok())
        {
            return Ok(unit);
        }

        let file = if Path::new(name).extension().is_some() {
            name.to_string()
        } else {
            self.source_for(name).ok_or_else(|| {
                Interrupt::UndefinedUnit(format!("{} (no submitted file declares it)", name))
            })?
        };
        self.load_unit(&file, false)
            .map_err(|failure| Interrupt::UndefinedUnit(format!("{} ({})", name, failure)))
    }

    fn source_for(&self, unit: &str) -> Option<String> {
        self.submission
            .expected
            .iter()
            .chain(self.submission.files.iter())
            .find(|file| Path::new(file.as_str()).file_stem().and_then(|stem| stem.to_str()) == Some(unit))
            .cloned()
    }

    pub fn nested_unit(&self, unit: &LoadedUnit, name: &str) -> Result<Arc<LoadedUnit>, Interrupt> {
        Ok(self.resolver.nested(unit, name)?)
    }

    // ----- symbols -----

    pub fn method(&mut self, unit: &LoadedUnit, name: &str, shape: impl Into<Shape>) -> Result<OperationHandle, Interrupt> {
        let shape = shape.into();
        let resolved = self.resolver.operation(unit, name, &shape)?;
        if let Some(close) = resolved.close_match {
            self.log(Outcome::error(
                ErrorCode::WrongSymbolName,
                format!(
                    "Could not find method {}.{}{}, but found method with similar name: {}. Please use the exact name.",
                    unit.unit_name(),
                    close.requested,
                    shape,
                    close.found
                ),
            ));
        }
        Ok(resolved.handle)
    }

    pub fn field(&mut self, unit: &LoadedUnit, name: &str) -> Result<FieldHandle, Interrupt> {
        let resolved = self.resolver.field(unit, name)?;
        if let Some(close) = resolved.close_match {
            self.log(Outcome::error(
                ErrorCode::WrongSymbolName,
                format!(
                    "Could not find attribute {}.{}, but found attribute with similar name: {}. Please use the exact name.",
                    unit.unit_name(),
                    close.requested,
                    close.found
                ),
            ));
        }
        Ok(resolved.handle)
    }

    /// Read a field of `instance` through the sandbox.
    pub fn get_property(&mut self, instance: &Instance, unit: &LoadedUnit, name: &str) -> Result<Value, Interrupt> {
        let field = self.field(unit, name)?;
        let instance = instance.clone();
        self.sandbox
            .run(move || field.read(&instance))
            .map_err(Interrupt::from)
    }

    // ----- calls -----

    pub fn invoke(&mut self, operation: &OperationHandle, receiver: Option<&Instance>, args: Vec<Value>) -> MethodCall<'_> {
        let receiver_view = receiver.map(|r| r.to_string());
        let snapshot: Vec<Value> = args.iter().map(Value::snapshot).collect();

        let started = Instant::now();
        let outcome = self.sandbox.invoke(operation, receiver, &args);
        let record = InvocationRecord::new(
            Target::Operation {
                unit: operation.unit().to_string(),
                name: operation.name().to_string(),
            },
            receiver_view,
            &snapshot,
            outcome,
            started.elapsed(),
        );

        self.record_invocation(&record);
        MethodCall::new(self, record)
    }

    /// Resolve `name` against the argument shape, then invoke it.
    pub fn call(
        &mut self,
        unit: &LoadedUnit,
        name: &str,
        receiver: Option<&Instance>,
        args: Vec<Value>,
    ) -> Result<MethodCall<'_>, Interrupt> {
        let operation = self.method(unit, name, Shape::of(&args))?;
        Ok(self.invoke(&operation, receiver, args))
    }

    pub fn instantiate(&mut self, unit: &LoadedUnit, args: Vec<Value>) -> Result<ObjectInstantiation<'_>, Interrupt> {
        let constructor = self.resolver.constructor(unit, &Shape::of(&args))?;
        let snapshot: Vec<Value> = args.iter().map(Value::snapshot).collect();

        let started = Instant::now();
        let instance = self.sandbox.instantiate(&constructor, &args);
        let record = InvocationRecord::new(
            Target::Constructor {
                unit: unit.unit_name().to_string(),
            },
            None,
            &snapshot,
            instance.clone().map(Value::Object),
            started.elapsed(),
        );

        self.record_invocation(&record);
        Ok(ObjectInstantiation::new(self, record, instance))
    }

    // ----- free assertions -----

    pub fn assert_condition(&mut self, condition: bool, message: &str) -> Result<(), Interrupt> {
        if condition {
            self.log(Outcome::success(message));
            Ok(())
        } else {
            Err(Interrupt::fail(message))
        }
    }

    pub fn assert_condition_false(&mut self, condition: bool, message: &str) -> Result<(), Interrupt> {
        self.assert_condition(!condition, message)
    }

    /// Abort the check with a generic failure.
    pub fn fail(&self, message: &str) -> Interrupt {
        Interrupt::fail(message)
    }

    // ----- state machine -----

    fn context(&self) -> String {
        self.current_check()
            .map(|d| d.description.clone())
            .unwrap_or_else(|| "setup".to_string())
    }

    fn classify(&mut self, interrupt: Interrupt) {
        let outcome = match interrupt {
            Interrupt::ManualFailure(None) => return,
            Interrupt::ManualFailure(Some(message)) => Outcome::failure(message),
            Interrupt::SymbolNotFound(missing) => match &missing {
                SymbolNotFound::Operation { .. } => Outcome::error(
                    ErrorCode::MethodNotImplemented,
                    format!(
                        "Method not implemented: {}. Are you sure you used the correct name and parameter types?",
                        missing
                    ),
                ),
                SymbolNotFound::Field { .. } => Outcome::error(
                    ErrorCode::AttributeNotImplemented,
                    format!("Attribute not implemented: {}. Did you use the correct name?", missing),
                ),
                SymbolNotFound::Constructor { .. } => Outcome::error(
                    ErrorCode::ConstructorNotImplemented,
                    format!(
                        "Constructor not implemented: {}. Are you sure you used the correct parameter types?",
                        missing
                    ),
                ),
                SymbolNotFound::Unit { .. } => Outcome::error(
                    ErrorCode::ReferencedUnitNotFound,
                    format!("Nested unit not found: {}", missing),
                ),
            },
            Interrupt::UndefinedUnit(unit) => Outcome::error(
                ErrorCode::ReferencedUnitNotFound,
                format!(
                    "Undefined unit referenced when executing check \"{}\": {}",
                    self.context(),
                    unit
                ),
            ),
            Interrupt::Unexpected(message) => {
                error!(
                    submission = %self.submission.name,
                    check = %self.context(),
                    error = %message,
                    "Unexpected error in check"
                );
                Outcome::error(
                    ErrorCode::UnexpectedError,
                    format!("Unexpected error while running \"{}\": {}", self.context(), message),
                )
            }
        };
        self.log(outcome);
    }

    /// Run a hook or body, turning any unwinding into a Result.
    fn run_guarded(&mut self, body: &CheckBody) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| body(self)));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(interrupt)) => self.classify(interrupt),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                self.classify(Interrupt::Unexpected(message));
            }
        }
    }

    fn enter(&mut self, index: usize) {
        self.current = Some(index);
    }

    fn leave(&mut self) {
        self.current = None;
    }

    fn skip_current(&mut self) {
        if let Some(index) = self.current {
            self.records[index].skipped = true;
        }
    }

    fn finish(self) -> RunOutput {
        RunOutput {
            checks: self.records,
            setup: self.setup,
            invocations: self.invocations.len(),
        }
    }
}

/// What one run produced, before grading.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub checks: Vec<CheckRecord>,
    pub setup: Vec<Outcome>,
    pub invocations: usize,
}

/// Runs a suite against one submission at a time.
#[derive(Clone)]
pub struct TestRunner {
    suite: Arc<Suite>,
    build: Arc<dyn BuildService>,
    sandbox: Arc<Sandbox>,
    resolver: Resolver,
}

impl TestRunner {
    pub fn new(suite: Arc<Suite>, build: Arc<dyn BuildService>, sandbox: Arc<Sandbox>) -> Self {
        Self {
            suite,
            build,
            sandbox,
            resolver: Resolver::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn suite(&self) -> &Suite {
        &self.suite
    }

    fn copy_includes(&self, submission: &Submission) {
        for include in self.suite.includes() {
            let Some(name) = include.file_name() else {
                warn!(path = %include.display(), "Include has no file name, skipping");
                continue;
            };
            let target = submission.directory.join(name);
            if let Err(e) = fs::copy(include, &target) {
                warn!(
                    submission = %submission.name,
                    include = %include.display(),
                    error = %e,
                    "Could not include file"
                );
            }
        }
    }

    #[tracing::instrument(skip(self, submission), fields(submission = %submission.name, checks = self.suite.checks().len()))]
    pub fn run(&self, submission: Arc<Submission>) -> RunOutput {
        info!(valid = submission.is_valid(), "Starting run");
        self.copy_includes(&submission);

        let mut session = Session::new(
            submission.clone(),
            self.build.clone(),
            self.sandbox.clone(),
            self.resolver,
            self.suite.definitions().cloned().collect(),
        );

        for file in self.suite.precompile() {
            if files::find_descendant(&submission.directory, file).is_some() {
                // failures are logged under setup and memoized
                let _ = session.load_unit(file, true);
            }
        }

        for hook in self.suite.before_all() {
            session.run_guarded(hook);
        }

        for (index, check) in self.suite.checks().iter().enumerate() {
            session.enter(index);

            for hook in self.suite.before_each() {
                session.run_guarded(hook);
            }

            let mut ready = true;
            for unit in &check.definition.required_units {
                if session.load_unit(unit, true).is_err() {
                    ready = false;
                }
            }

            if ready {
                session.run_guarded(check.body());
            } else {
                debug!(check = %check.definition.description, "Required unit missing, skipping body");
                session.skip_current();
            }
        }
        session.leave();

        let output = session.finish();
        info!(
            invocations = output.invocations,
            skipped = output.checks.iter().filter(|c| c.skipped).count(),
            "Run finished"
        );
        output
    }
}
