/// Loaded units and the build-service seam.
///
/// **Core Responsibility:**
/// - Expose a submission's operations, constructors and fields as callable handles
/// - Let a `BuildService` turn a submitted file into a `LoadedUnit`
/// - Provide an in-memory registry service for embedding and tests
use crate::error::{BuildFailure, Fault};
use crate::value::{Instance, Shape, Value};
use assessor_common::types::Submission;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

pub type OperationFn = Arc<dyn Fn(Option<&Instance>, &[Value]) -> Result<Value, Fault> + Send + Sync>;
pub type ConstructorFn = Arc<dyn Fn(&[Value]) -> Result<Instance, Fault> + Send + Sync>;
pub type FieldFn = Arc<dyn Fn(&Instance) -> Result<Value, Fault> + Send + Sync>;

#[derive(Clone)]
pub struct OperationHandle {
    unit: Arc<str>,
    name: String,
    shape: Shape,
    body: OperationFn,
}

impl OperationHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Calls the operation directly on the current thread, without a timeout.
    pub fn invoke(&self, receiver: Option<&Instance>, args: &[Value]) -> Result<Value, Fault> {
        (self.body)(receiver, args)
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.unit, self.name, self.shape)
    }
}

#[derive(Clone)]
pub struct ConstructorHandle {
    unit: Arc<str>,
    shape: Shape,
    body: ConstructorFn,
}

impl ConstructorHandle {
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn instantiate(&self, args: &[Value]) -> Result<Instance, Fault> {
        (self.body)(args)
    }
}

impl fmt::Debug for ConstructorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "new {}{}", self.unit, self.shape)
    }
}

#[derive(Clone)]
pub struct FieldHandle {
    unit: Arc<str>,
    name: String,
    body: FieldFn,
}

impl FieldHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn read(&self, instance: &Instance) -> Result<Value, Fault> {
        (self.body)(instance)
    }
}

impl fmt::Debug for FieldHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.unit, self.name)
    }
}

/// Capability interface over a loaded unit.
pub trait Loadable: Send + Sync {
    fn unit_name(&self) -> &str;
    fn operations(&self) -> &[OperationHandle];
    fn constructors(&self) -> &[ConstructorHandle];
    fn fields(&self) -> &[FieldHandle];

    fn nested_units(&self) -> &[Arc<LoadedUnit>] {
        &[]
    }

    /// Exact lookup by name and parameter shape.
    fn resolve(&self, name: &str, shape: &Shape) -> Option<&OperationHandle> {
        self.operations()
            .iter()
            .find(|op| op.name == name && op.shape.matches(shape))
    }
}

pub struct LoadedUnit {
    name: Arc<str>,
    source_file: Option<String>,
    operations: Vec<OperationHandle>,
    constructors: Vec<ConstructorHandle>,
    fields: Vec<FieldHandle>,
    nested: Vec<Arc<LoadedUnit>>,
}

impl LoadedUnit {
    pub fn builder(name: &str) -> UnitBuilder {
        UnitBuilder::new(name)
    }

    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }
}

impl Loadable for LoadedUnit {
    fn unit_name(&self) -> &str {
        &self.name
    }

    fn operations(&self) -> &[OperationHandle] {
        &self.operations
    }

    fn constructors(&self) -> &[ConstructorHandle] {
        &self.constructors
    }

    fn fields(&self) -> &[FieldHandle] {
        &self.fields
    }

    fn nested_units(&self) -> &[Arc<LoadedUnit>] {
        &self.nested
    }
}

impl fmt::Debug for LoadedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedUnit")
            .field("name", &self.name)
            .field("operations", &self.operations)
            .field("constructors", &self.constructors)
            .field("fields", &self.fields)
            .field("nested", &self.nested.len())
            .finish()
    }
}

pub struct UnitBuilder {
    unit: LoadedUnit,
}

impl UnitBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            unit: LoadedUnit {
                name: Arc::from(name),
                source_file: None,
                operations: Vec::new(),
                constructors: Vec::new(),
                fields: Vec::new(),
                nested: Vec::new(),
            },
        }
    }

    pub fn source_file(mut self, file: impl Into<String>) -> Self {
        self.unit.source_file = Some(file.into());
        self
    }

    pub fn operation<F>(mut self, name: &str, shape: impl Into<Shape>, body: F) -> Self
    where
        F: Fn(Option<&Instance>, &[Value]) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.unit.operations.push(OperationHandle {
            unit: self.unit.name.clone(),
            name: name.to_string(),
            shape: shape.into(),
            body: Arc::new(body),
        });
        self
    }

    pub fn constructor<F>(mut self, shape: impl Into<Shape>, body: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Instance, Fault> + Send + Sync + 'static,
    {
        self.unit.constructors.push(ConstructorHandle {
            unit: self.unit.name.clone(),
            shape: shape.into(),
            body: Arc::new(body),
        });
        self
    }

    pub fn field<F>(mut self, name: &str, body: F) -> Self
    where
        F: Fn(&Instance) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.unit.fields.push(FieldHandle {
            unit: self.unit.name.clone(),
            name: name.to_string(),
            body: Arc::new(body),
        });
        self
    }

    pub fn nested(mut self, unit: LoadedUnit) -> Self {
        self.unit.nested.push(Arc::new(unit));
        self
    }

    pub fn build(self) -> LoadedUnit {
        self.unit
    }
}

/// Turns a submitted source file into a loaded unit.
///
/// `source` is the path of the file inside the submission directory. Called at
/// most once per file per run; the runner caches both successes and failures.
pub trait BuildService: Send + Sync {
    fn prepare(&self, submission: &Submission, source: &Path) -> Result<Arc<LoadedUnit>, BuildFailure>;

    /// Drop any isolated loading contexts once a batch is over.
    fn release(&self) {}
}

type UnitFactory = Arc<dyn Fn() -> Result<LoadedUnit, BuildFailure> + Send + Sync>;

/// Build service backed by units registered in memory.
///
/// Lookups go by submission name and file name; `"*"` as the submission name
/// applies to every submission without a more specific entry.
#[derive(Default)]
pub struct RegistryBuildService {
    factories: Mutex<HashMap<(String, String), UnitFactory>>,
    prepared: AtomicUsize,
    released: AtomicUsize,
}

impl RegistryBuildService {
    pub const ANY_SUBMISSION: &'static str = "*";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, submission: &str, file: &str, factory: F)
    where
        F: Fn() -> LoadedUnit + Send + Sync + 'static,
    {
        self.insert(submission, file, Arc::new(move || Ok(factory())));
    }

    pub fn register_failure(&self, submission: &str, file: &str, failure: BuildFailure) {
        self.insert(submission, file, Arc::new(move || Err(failure.clone())));
    }

    fn insert(&self, submission: &str, file: &str, factory: UnitFactory) {
        self.factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((submission.to_string(), file.to_string()), factory);
    }

    /// Number of `prepare` calls so far.
    pub fn prepared(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl BuildService for RegistryBuildService {
    fn prepare(&self, submission: &Submission, source: &Path) -> Result<Arc<LoadedUnit>, BuildFailure> {
        self.prepared.fetch_add(1, Ordering::SeqCst);
        let file = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let factory = {
            let factories = self.factories.lock().unwrap_or_else(PoisonError::into_inner);
            factories
                .get(&(submission.name.clone(), file.clone()))
                .or_else(|| factories.get(&(Self::ANY_SUBMISSION.to_string(), file.clone())))
                .cloned()
        };

        debug!(submission = %submission.name, file = %file, found = factory.is_some(), "Preparing unit");
        match factory {
            Some(factory) => factory().map(Arc::new),
            None => Err(BuildFailure::Load {
                file,
                diagnostics: "no unit registered for this file".to_string(),
            }),
        }
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TypeTag;
    use std::collections::BTreeSet;

    fn make_counter_unit() -> LoadedUnit {
        UnitBuilder::new("Counter")
            .source_file("Counter.java")
            .constructor(Shape::empty(), |_| Ok(Instance::new("Counter", Mutex::new(0i64))))
            .operation("increment", [TypeTag::Int], |receiver, args| {
                let counter = receiver
                    .and_then(|r| r.downcast_ref::<Mutex<i64>>())
                    .ok_or_else(|| Fault::illegal_state("no counter"))?;
                let step = args[0].as_int().unwrap_or(0);
                let mut value = counter.lock().unwrap_or_else(PoisonError::into_inner);
                *value += step;
                Ok(Value::Int(*value))
            })
            .field("count", |instance| {
                let counter = instance
                    .downcast_ref::<Mutex<i64>>()
                    .ok_or_else(|| Fault::illegal_state("no counter"))?;
                let value = *counter.lock().unwrap_or_else(PoisonError::into_inner);
                Ok(Value::Int(value))
            })
            .build()
    }

    #[test]
    fn test_builder_and_direct_invoke() {
        let unit = make_counter_unit();
        assert_eq!(unit.unit_name(), "Counter");
        assert_eq!(unit.source_file(), Some("Counter.java"));

        let instance = unit.constructors()[0].instantiate(&[]).unwrap();
        let op = unit.resolve("increment", &Shape::from([TypeTag::Int])).unwrap();
        assert_eq!(op.invoke(Some(&instance), &[Value::Int(3)]).unwrap(), Value::Int(3));
        assert_eq!(op.invoke(Some(&instance), &[Value::Int(2)]).unwrap(), Value::Int(5));
        assert_eq!(unit.fields()[0].read(&instance).unwrap(), Value::Int(5));
        assert!(unit.resolve("increment", &Shape::empty()).is_none());
    }

    #[test]
    fn test_registry_service_lookup_order() {
        let service = RegistryBuildService::new();
        service.register(RegistryBuildService::ANY_SUBMISSION, "Counter.java", make_counter_unit);
        service.register_failure(
            "bob",
            "Counter.java",
            BuildFailure::Compilation {
                file: "Counter.java".into(),
                diagnostics: "oops".into(),
            },
        );

        let alice = Submission::new(1, "alice", "/a", BTreeSet::new(), BTreeSet::new());
        let bob = Submission::new(2, "bob", "/b", BTreeSet::new(), BTreeSet::new());

        assert!(service.prepare(&alice, Path::new("/a/Counter.java")).is_ok());
        assert!(matches!(
            service.prepare(&bob, Path::new("/b/Counter.java")),
            Err(BuildFailure::Compilation { .. })
        ));
        assert!(matches!(
            service.prepare(&alice, Path::new("/a/Other.java")),
            Err(BuildFailure::Load { .. })
        ));
        assert_eq!(service.prepared(), 3);
    }
}
