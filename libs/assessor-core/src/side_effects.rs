// Checkers for state changes made by a call
use crate::value::{ArrayRef, Value};
use std::cmp::Ordering;

/// Inspects state after a call. `message` describes the outcome either way.
pub trait SideEffectChecker {
    fn check(&self) -> bool;
    fn message(&self, success: bool) -> String;
}

/// Checks that a shared array is sorted.
pub struct IsSorted {
    name: String,
    array: ArrayRef,
    ascending: bool,
}

impl IsSorted {
    pub fn ascending(name: impl Into<String>, array: &ArrayRef) -> Self {
        Self {
            name: name.into(),
            array: array.clone(),
            ascending: true,
        }
    }

    pub fn descending(name: impl Into<String>, array: &ArrayRef) -> Self {
        Self {
            ascending: false,
            ..Self::ascending(name, array)
        }
    }

    fn in_order(&self, a: &Value, b: &Value) -> bool {
        let wrong = if self.ascending { Ordering::Greater } else { Ordering::Less };
        matches!(a.compare(b), Some(ordering) if ordering != wrong)
    }
}

impl SideEffectChecker for IsSorted {
    fn check(&self) -> bool {
        let items = self.array.elements();
        items.windows(2).all(|pair| self.in_order(&pair[0], &pair[1]))
    }

    fn message(&self, success: bool) -> String {
        format!(
            "the array {} is {} in {} order.",
            self.name,
            if success { "sorted" } else { "not sorted" },
            if self.ascending { "ascending" } else { "descending" }
        )
    }
}

/// Checker built from closures, for one-off effects.
pub struct Predicate<C, M> {
    check: C,
    message: M,
}

impl<C, M> Predicate<C, M>
where
    C: Fn() -> bool,
    M: Fn(bool) -> String,
{
    pub fn new(check: C, message: M) -> Self {
        Self { check, message }
    }
}

impl<C, M> SideEffectChecker for Predicate<C, M>
where
    C: Fn() -> bool,
    M: Fn(bool) -> String,
{
    fn check(&self) -> bool {
        (self.check)()
    }

    fn message(&self, success: bool) -> String {
        (self.message)(success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_array(values: &[i64]) -> ArrayRef {
        ArrayRef::new(values.iter().map(|v| Value::Int(*v)).collect())
    }

    #[test]
    fn test_is_sorted_ascending() {
        let array = make_array(&[1, 2, 2, 5]);
        let checker = IsSorted::ascending("numbers", &array);
        assert!(checker.check());
        assert_eq!(checker.message(true), "the array numbers is sorted in ascending order.");

        array.set(0, Value::Int(9));
        assert!(!checker.check());
        assert_eq!(checker.message(false), "the array numbers is not sorted in ascending order.");
    }

    #[test]
    fn test_is_sorted_descending_and_edge_cases() {
        assert!(IsSorted::descending("a", &make_array(&[5, 3, 3, 1])).check());
        assert!(!IsSorted::descending("a", &make_array(&[1, 3])).check());
        assert!(IsSorted::ascending("a", &make_array(&[])).check());

        let mixed = ArrayRef::new(vec![Value::Int(1), Value::from("x")]);
        assert!(!IsSorted::ascending("mixed", &mixed).check());
    }

    #[test]
    fn test_predicate() {
        let checker = Predicate::new(|| true, |ok| format!("ok={}", ok));
        assert!(checker.check());
        assert_eq!(checker.message(false), "ok=false");
    }
}
