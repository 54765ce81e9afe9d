// Test suites: check definitions paired with their bodies, plus hooks
use crate::error::Interrupt;
use crate::runner::Session;
use assessor_common::types::CheckDefinition;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub type CheckBody = Arc<dyn Fn(&mut Session) -> Result<(), Interrupt> + Send + Sync>;

#[derive(Clone)]
pub struct Check {
    pub definition: CheckDefinition,
    body: CheckBody,
}

impl Check {
    pub fn body(&self) -> &CheckBody {
        &self.body
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check").field("definition", &self.definition).finish()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SuiteError {
    #[error("check \"{0}\" has a negative or undefined weight")]
    InvalidWeight(String),
    #[error("check \"{0}\" has a negative or undefined penalty")]
    InvalidPenalty(String),
    #[error("check \"{0}\" is declared twice")]
    DuplicateCheck(String),
}

/// Read-only description of everything run against each submission.
#[derive(Clone)]
pub struct Suite {
    name: String,
    includes: Vec<PathBuf>,
    precompile: Vec<String>,
    before_all: Vec<CheckBody>,
    before_each: Vec<CheckBody>,
    checks: Vec<Check>,
}

impl Suite {
    pub fn builder(name: impl Into<String>) -> SuiteBuilder {
        SuiteBuilder {
            suite: Suite {
                name: name.into(),
                includes: Vec::new(),
                precompile: Vec::new(),
                before_all: Vec::new(),
                before_each: Vec::new(),
                checks: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    pub fn definitions(&self) -> impl Iterator<Item = &CheckDefinition> {
        self.checks.iter().map(|c| &c.definition)
    }

    pub fn includes(&self) -> &[PathBuf] {
        &self.includes
    }

    pub fn precompile(&self) -> &[String] {
        &self.precompile
    }

    pub fn before_all(&self) -> &[CheckBody] {
        &self.before_all
    }

    pub fn before_each(&self) -> &[CheckBody] {
        &self.before_each
    }

    /// Every file some check requires; submissions are validated against it.
    pub fn required_files(&self) -> BTreeSet<String> {
        self.definitions()
            .flat_map(|d| d.required_units.iter().cloned())
            .collect()
    }
}

impl fmt::Debug for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite")
            .field("name", &self.name)
            .field("checks", &self.checks)
            .field("precompile", &self.precompile)
            .finish()
    }
}

pub struct SuiteBuilder {
    suite: Suite,
}

impl SuiteBuilder {
    /// Copy `path` into every submission directory before anything runs.
    pub fn include(mut self, path: impl Into<PathBuf>) -> Self {
        self.suite.includes.push(path.into());
        self
    }

    /// Build `file` up front when the submission has it; absence is not an error.
    pub fn precompile_if_present(mut self, file: impl Into<String>) -> Self {
        self.suite.precompile.push(file.into());
        self
    }

    pub fn before_all<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Session) -> Result<(), Interrupt> + Send + Sync + 'static,
    {
        self.suite.before_all.push(Arc::new(hook));
        self
    }

    pub fn before_each<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Session) -> Result<(), Interrupt> + Send + Sync + 'static,
    {
        self.suite.before_each.push(Arc::new(hook));
        self
    }

    pub fn check<F>(mut self, definition: CheckDefinition, body: F) -> Self
    where
        F: Fn(&mut Session) -> Result<(), Interrupt> + Send + Sync + 'static,
    {
        self.suite.checks.push(Check {
            definition,
            body: Arc::new(body),
        });
        self
    }

    pub fn build(self) -> Result<Suite, SuiteError> {
        self.validate()?;
        Ok(self.suite)
    }

    fn validate(&self) -> Result<(), SuiteError> {
        let mut seen = BTreeSet::new();
        for definition in self.suite.definitions() {
            if !(definition.weight >= 0.0) {
                return Err(SuiteError::InvalidWeight(definition.description.clone()));
            }
            if !(definition.penalty >= 0.0) {
                return Err(SuiteError::InvalidPenalty(definition.description.clone()));
            }
            if !seen.insert(definition.description.as_str()) {
                return Err(SuiteError::DuplicateCheck(definition.description.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_files_union() {
        let suite = Suite::builder("queues")
            .check(CheckDefinition::new("a", 1.0).requires(["Queue.java"]), |_| Ok(()))
            .check(CheckDefinition::new("b", 1.0).requires(["Queue.java", "Node.java"]), |_| Ok(()))
            .check(CheckDefinition::new("c", 1.0), |_| Ok(()))
            .build()
            .unwrap();
        let files: Vec<String> = suite.required_files().into_iter().collect();
        assert_eq!(files, vec!["Node.java", "Queue.java"]);
        assert_eq!(suite.checks().len(), 3);
    }

    #[test]
    fn test_invalid_definitions_rejected() {
        let negative = Suite::builder("s")
            .check(CheckDefinition::new("neg", -1.0), |_| Ok(()))
            .build();
        assert_eq!(negative.unwrap_err(), SuiteError::InvalidWeight("neg".into()));

        let nan = Suite::builder("s")
            .check(CheckDefinition::new("nan", 1.0).with_penalty(f64::NAN), |_| Ok(()))
            .build();
        assert_eq!(nan.unwrap_err(), SuiteError::InvalidPenalty("nan".into()));

        let twice = Suite::builder("s")
            .check(CheckDefinition::new("x", 1.0), |_| Ok(()))
            .check(CheckDefinition::new("x", 2.0), |_| Ok(()))
            .build();
        assert_eq!(twice.unwrap_err(), SuiteError::DuplicateCheck("x".into()));
    }
}
