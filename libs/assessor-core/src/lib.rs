//! Automated assessment engine: runs suites of weighted checks against student
//! submissions through a bounded sandbox and grades the Results.

pub mod clustering;
pub mod doubling;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod files;
pub mod invocation;
pub mod levenshtein;
pub mod progress;
pub mod resolver;
pub mod runner;
pub mod sandbox;
pub mod side_effects;
pub mod suite;
pub mod unit;
pub mod value;


pub use error::{BuildFailure, FailureCause, Fault, Interrupt, SymbolNotFound};
pub use executor::{validate_submissions, BatchExecutor};
pub use runner::{RunOutput, Session, TestRunner};
pub use sandbox::Sandbox;
pub use suite::{Suite, SuiteBuilder};
pub use unit::{BuildService, Loadable, LoadedUnit, RegistryBuildService, UnitBuilder};
pub use value::{ArrayRef, Instance, Shape, TypeTag, Value};
