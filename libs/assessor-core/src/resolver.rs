/// Symbol resolution against loaded units.
///
/// Exact name and shape always wins. Otherwise a same-shape candidate whose
/// name is within the configured edit-distance ratio is accepted and reported
/// back as a close match so the caller can log it.
use crate::error::SymbolNotFound;
use crate::levenshtein::Levenshtein;
use crate::unit::{ConstructorHandle, FieldHandle, Loadable, LoadedUnit, OperationHandle};
use crate::value::Shape;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_NAME_TOLERANCE: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseMatch {
    pub requested: String,
    pub found: String,
}

#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub handle: T,
    pub close_match: Option<CloseMatch>,
}

impl<T> Resolved<T> {
    fn exact(handle: T) -> Self {
        Self { handle, close_match: None }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    metric: Levenshtein,
    tolerance: f64,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(DEFAULT_NAME_TOLERANCE)
    }
}

impl Resolver {
    pub fn new(tolerance: f64) -> Self {
        Self {
            metric: Levenshtein::default(),
            tolerance,
        }
    }

    pub fn metric(&self) -> &Levenshtein {
        &self.metric
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn names_match(&self, requested: &str, candidate: &str) -> bool {
        self.metric.similar(requested, candidate, self.tolerance)
    }

    /// Among `candidates`, the one closest to `requested` within tolerance.
    /// Ties keep declaration order.
    fn closest<'a, T>(&self, requested: &str, candidates: impl Iterator<Item = (&'a str, T)>) -> Option<(&'a str, T)> {
        let mut best: Option<(f64, &'a str, T)> = None;
        for (name, item) in candidates {
            if !self.names_match(requested, name) {
                continue;
            }
            let distance = self.metric.distance(requested, name);
            if best.as_ref().map_or(true, |(d, _, _)| distance < *d) {
                best = Some((distance, name, item));
            }
        }
        best.map(|(_, name, item)| (name, item))
    }

    pub fn operation(
        &self,
        unit: &dyn Loadable,
        name: &str,
        shape: &Shape,
    ) -> Result<Resolved<OperationHandle>, SymbolNotFound> {
        if let Some(op) = unit.resolve(name, shape) {
            return Ok(Resolved::exact(op.clone()));
        }

        let same_shape = unit
            .operations()
            .iter()
            .filter(|op| op.shape().matches(shape))
            .map(|op| (op.name(), op));

        match self.closest(name, same_shape) {
            Some((found, op)) => {
                debug!(unit = %unit.unit_name(), requested = %name, found = %found, "Accepted close operation name");
                Ok(Resolved {
                    handle: op.clone(),
                    close_match: Some(CloseMatch {
                        requested: name.to_string(),
                        found: found.to_string(),
                    }),
                })
            }
            None => Err(SymbolNotFound::Operation {
                unit: unit.unit_name().to_string(),
                name: name.to_string(),
                shape: shape.clone(),
            }),
        }
    }

    pub fn constructor(&self, unit: &dyn Loadable, shape: &Shape) -> Result<ConstructorHandle, SymbolNotFound> {
        unit.constructors()
            .iter()
            .find(|c| c.shape().matches(shape))
            .cloned()
            .ok_or_else(|| SymbolNotFound::Constructor {
                unit: unit.unit_name().to_string(),
                shape: shape.clone(),
            })
    }

    /// Exact, then case-insensitive, then fuzzy.
    pub fn field(&self, unit: &dyn Loadable, name: &str) -> Result<Resolved<FieldHandle>, SymbolNotFound> {
        let fields = unit.fields();
        if let Some(field) = fields.iter().find(|f| f.name() == name) {
            return Ok(Resolved::exact(field.clone()));
        }
        if let Some(field) = fields.iter().find(|f| f.name().eq_ignore_ascii_case(name)) {
            return Ok(Resolved::exact(field.clone()));
        }

        match self.closest(name, fields.iter().map(|f| (f.name(), f))) {
            Some((found, field)) => Ok(Resolved {
                handle: field.clone(),
                close_match: Some(CloseMatch {
                    requested: name.to_string(),
                    found: found.to_string(),
                }),
            }),
            None => Err(SymbolNotFound::Field {
                unit: unit.unit_name().to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// Nested units match case-insensitively.
    pub fn nested(&self, unit: &dyn Loadable, name: &str) -> Result<Arc<LoadedUnit>, SymbolNotFound> {
        unit.nested_units()
            .iter()
            .find(|n| n.unit_name().eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| SymbolNotFound::Unit {
                unit: unit.unit_name().to_string(),
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitBuilder;
    use crate::value::{Instance, TypeTag, Value};

    fn make_queue_unit() -> LoadedUnit {
        UnitBuilder::new("Queue")
            .constructor([TypeTag::Int], |_| Ok(Instance::new("Queue", ())))
            .operation("enqueue", [TypeTag::Int], |_, _| Ok(Value::Null))
            .operation("dequeue", Shape::empty(), |_, _| Ok(Value::Int(1)))
            .operation("size", Shape::empty(), |_, _| Ok(Value::Int(0)))
            .field("capacity", |_| Ok(Value::Int(8)))
            .nested(UnitBuilder::new("Node").build())
            .build()
    }

    #[test]
    fn test_exact_operation() {
        let unit = make_queue_unit();
        let resolved = Resolver::default()
            .operation(&unit, "enqueue", &Shape::from([TypeTag::Int]))
            .unwrap();
        assert_eq!(resolved.handle.name(), "enqueue");
        assert!(resolved.close_match.is_none());
    }

    #[test]
    fn test_close_operation_name_accepted() {
        let unit = make_queue_unit();
        let resolved = Resolver::default()
            .operation(&unit, "enqueu", &Shape::from([TypeTag::Int]))
            .unwrap();
        assert_eq!(resolved.handle.name(), "enqueue");
        assert_eq!(
            resolved.close_match,
            Some(CloseMatch {
                requested: "enqueu".into(),
                found: "enqueue".into()
            })
        );
    }

    #[test]
    fn test_distant_or_wrong_shape_rejected() {
        let unit = make_queue_unit();
        let resolver = Resolver::default();
        assert!(matches!(
            resolver.operation(&unit, "enq", &Shape::from([TypeTag::Int])),
            Err(SymbolNotFound::Operation { .. })
        ));
        // right name, wrong shape
        assert!(resolver.operation(&unit, "enqueue", &Shape::from([TypeTag::Str])).is_err());
    }

    #[test]
    fn test_constructor_and_nested() {
        let unit = make_queue_unit();
        let resolver = Resolver::default();
        assert!(resolver.constructor(&unit, &Shape::from([TypeTag::Int])).is_ok());
        assert!(matches!(
            resolver.constructor(&unit, &Shape::empty()),
            Err(SymbolNotFound::Constructor { .. })
        ));
        assert_eq!(resolver.nested(&unit, "node").unwrap().unit_name(), "Node");
        assert!(resolver.nested(&unit, "Edge").is_err());
    }

    #[test]
    fn test_field_lookup_order() {
        let unit = make_queue_unit();
        let resolver = Resolver::default();
        let exact = resolver.field(&unit, "Capacity").unwrap();
        assert!(exact.close_match.is_none());

        let fuzzy = resolver.field(&unit, "capacty").unwrap();
        assert_eq!(fuzzy.handle.name(), "capacity");
        assert!(fuzzy.close_match.is_some());

        assert!(resolver.field(&unit, "head").is_err());
    }
}
