/// Dynamic values exchanged with submission code.
///
/// **Core Responsibility:**
/// - Carry arguments, results and receivers across the sandbox boundary
/// - Model shared mutable arrays with reference semantics (`ArrayRef`)
/// - Provide deep snapshots so recorded calls never observe later mutation
/// - Structural equality and rendering used by the assertion messages
use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Bool,
    Int,
    Float,
    Char,
    Str,
    List,
    Array,
    Object(String),
    /// Matches any argument type.
    Any,
}

impl TypeTag {
    pub fn object(name: impl Into<String>) -> Self {
        TypeTag::Object(name.into())
    }

    pub fn matches(&self, other: &TypeTag) -> bool {
        matches!(self, TypeTag::Any) || matches!(other, TypeTag::Any) || self == other
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Bool => write!(f, "bool"),
            TypeTag::Int => write!(f, "int"),
            TypeTag::Float => write!(f, "double"),
            TypeTag::Char => write!(f, "char"),
            TypeTag::Str => write!(f, "String"),
            TypeTag::List => write!(f, "List"),
            TypeTag::Array => write!(f, "Array"),
            TypeTag::Object(name) => write!(f, "{}", name),
            TypeTag::Any => write!(f, "Object"),
        }
    }
}

/// Ordered parameter types of an operation or constructor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Shape(Vec<TypeTag>);

impl Shape {
    pub fn new(tags: Vec<TypeTag>) -> Self {
        Shape(tags)
    }

    pub fn empty() -> Self {
        Shape(Vec::new())
    }

    /// Shape inferred from concrete argument values.
    pub fn of(args: &[Value]) -> Self {
        Shape(args.iter().map(Value::type_tag).collect())
    }

    pub fn tags(&self) -> &[TypeTag] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, other: &Shape) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a.matches(b))
    }
}

impl<const N: usize> From<[TypeTag; N]> for Shape {
    fn from(tags: [TypeTag; N]) -> Self {
        Shape(tags.to_vec())
    }
}

impl From<Vec<TypeTag>> for Shape {
    fn from(tags: Vec<TypeTag>) -> Self {
        Shape(tags)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|t| t.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}

trait Inspect: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync + fmt::Debug> Inspect for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

type Equality = fn(&dyn Any, &dyn Any) -> bool;

fn equal_as<T: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// An object created by a submission constructor.
///
/// Cloning shares the underlying state. Two instances are equal when they are
/// the same object, or when the unit registered a value equality for them.
#[derive(Clone)]
pub struct Instance {
    type_name: Arc<str>,
    state: Arc<dyn Inspect>,
    equality: Option<Equality>,
}

impl Instance {
    pub fn new<T: Any + Send + Sync + fmt::Debug>(type_name: &str, state: T) -> Self {
        Self {
            type_name: Arc::from(type_name),
            state: Arc::new(state),
            equality: None,
        }
    }

    /// Like `new`, but instances holding equal states compare equal.
    pub fn comparable<T: Any + Send + Sync + fmt::Debug + PartialEq>(type_name: &str, state: T) -> Self {
        Self {
            equality: Some(equal_as::<T>),
            ..Self::new(type_name, state)
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.any().downcast_ref::<T>()
    }

    fn any(&self) -> &dyn Any {
        (*self.state).as_any()
    }

    pub fn same(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        if self.same(other) {
            return true;
        }
        match self.equality {
            Some(eq) => self.type_name == other.type_name && eq(self.any(), other.any()),
            None => false,
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.type_name, self.state)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.state)
    }
}

/// Shared mutable array. Clones alias the same storage.
#[derive(Clone, Default)]
pub struct ArrayRef(Arc<Mutex<Vec<Value>>>);

impl ArrayRef {
    pub fn new(values: Vec<Value>) -> Self {
        ArrayRef(Arc::new(Mutex::new(values)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Vec<Value>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.lock().get(index).cloned()
    }

    /// Returns false when `index` is out of bounds.
    pub fn set(&self, index: usize, value: Value) -> bool {
        match self.lock().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Shallow copy of the current elements; nested arrays still alias.
    pub fn elements(&self) -> Vec<Value> {
        self.lock().clone()
    }

    pub fn same(&self, other: &ArrayRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Array{:?}", self.elements())
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    /// Immutable sequence, also the frozen form of an array.
    List(Vec<Value>),
    Array(ArrayRef),
    Object(Instance),
}

impl Value {
    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(ArrayRef::new(values))
    }

    pub fn ints<I: IntoIterator<Item = i64>>(values: I) -> Self {
        Value::List(values.into_iter().map(Value::Int).collect())
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Null => TypeTag::Any,
            Value::Bool(_) => TypeTag::Bool,
            Value::Int(_) => TypeTag::Int,
            Value::Float(_) => TypeTag::Float,
            Value::Char(_) => TypeTag::Char,
            Value::Str(_) => TypeTag::Str,
            Value::List(_) => TypeTag::List,
            Value::Array(_) => TypeTag::Array,
            Value::Object(instance) => TypeTag::Object(instance.type_name().to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Value::Object(instance) => Some(instance),
            _ => None,
        }
    }

    /// Current elements of a list or array, `None` for scalars.
    pub fn sequence(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items.clone()),
            Value::Array(array) => Some(array.elements()),
            _ => None,
        }
    }

    /// Deep copy with every shared array frozen into a list.
    ///
    /// Each array lock is held only while its direct elements are cloned.
    pub fn snapshot(&self) -> Value {
        match self {
            Value::List(items) => Value::List(items.iter().map(Value::snapshot).collect()),
            Value::Array(array) => Value::List(array.elements().iter().map(Value::snapshot).collect()),
            other => other.clone(),
        }
    }

    /// Natural ordering for scalars of the same kind.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Array(a), Value::Array(b)) if a.same(b) => true,
            (Value::List(_) | Value::Array(_), Value::List(_) | Value::Array(_)) => {
                // elements are copied out so no two locks are ever held together
                match (self.sequence(), other.sequence()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Char(c) => write!(f, "{}", c),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(_) | Value::Array(_) => {
                let items: Vec<String> = self
                    .sequence()
                    .unwrap_or_default()
                    .iter()
                    .map(|v| v.to_string())
                    .collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Object(instance) => write!(f, "{}", instance),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Char(c)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<ArrayRef> for Value {
    fn from(array: ArrayRef) -> Self {
        Value::Array(array)
    }
}

impl From<Instance> for Value {
    fn from(instance: Instance) -> Self {
        Value::Object(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    #[test]
    fn test_snapshot_freezes_shared_array() {
        let array = ArrayRef::new(vec![Value::Int(1), Value::Int(2)]);
        let live = Value::Array(array.clone());
        let frozen = live.snapshot();

        array.set(0, Value::Int(99));

        assert_eq!(frozen.to_string(), "[1, 2]");
        assert_eq!(live.to_string(), "[99, 2]");
        assert!(matches!(frozen, Value::List(_)));
    }

    #[test]
    fn test_snapshot_is_deep() {
        let inner = ArrayRef::new(vec![Value::Int(1)]);
        let outer = Value::array(vec![Value::Array(inner.clone())]);
        let frozen = outer.snapshot();

        inner.set(0, Value::Int(5));
        assert_eq!(frozen.to_string(), "[[1]]");
    }

    #[test]
    fn test_sequence_equality_across_kinds() {
        let list = Value::ints([1, 2, 3]);
        let array = Value::array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(list, array);
        assert_eq!(array, array.clone());
        assert_ne!(list, Value::ints([1, 2]));
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn test_instance_identity_and_comparable() {
        let a = Instance::new("Point", Point { x: 1, y: 2 });
        let b = Instance::new("Point", Point { x: 1, y: 2 });
        assert_eq!(a, a.clone());
        assert_ne!(a, b);

        let c = Instance::comparable("Point", Point { x: 1, y: 2 });
        let d = Instance::comparable("Point", Point { x: 1, y: 2 });
        assert_eq!(c, d);
        assert_eq!(c.downcast_ref::<Point>().map(|p| p.x), Some(1));
        assert!(c.downcast_ref::<String>().is_none());
    }

    #[test]
    fn test_shape_matching_and_display() {
        let shape = Shape::from([TypeTag::Int, TypeTag::Str]);
        assert_eq!(shape.to_string(), "(int, String)");
        assert!(shape.matches(&Shape::from([TypeTag::Int, TypeTag::Any])));
        assert!(!shape.matches(&Shape::from([TypeTag::Int])));
        assert_eq!(Shape::of(&[Value::Int(1), Value::from("x")]), shape);
    }

    #[test]
    fn test_compare() {
        assert_eq!(Value::Int(1).compare(&Value::Int(2)), Some(Ordering::Less));
        assert_eq!(Value::from("b").compare(&Value::from("a")), Some(Ordering::Greater));
        assert_eq!(Value::Int(1).compare(&Value::from("a")), None);
    }
}
