// Shared data model for the assessor crates
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error};
use uuid::Uuid;
use walkdir::WalkDir;

pub type SubmissionId = u64;

/// One student's hand-in: a directory plus the file names found in it.
///
/// `valid` is computed once at creation: every expected file name must be
/// present somewhere below the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub name: String,
    pub directory: PathBuf,
    pub files: BTreeSet<String>,
    pub expected: BTreeSet<String>,
    valid: bool,
}

impl Submission {
    pub fn new(
        id: SubmissionId,
        name: impl Into<String>,
        directory: impl Into<PathBuf>,
        files: BTreeSet<String>,
        expected: BTreeSet<String>,
    ) -> Self {
        let valid = expected.is_subset(&files);
        Self {
            id,
            name: name.into(),
            directory: directory.into(),
            files,
            expected,
            valid,
        }
    }

    /// Scan `directory` recursively and record every regular file name.
    /// The submission name is the directory's own name.
    pub fn from_dir(id: SubmissionId, directory: &Path, expected: &BTreeSet<String>) -> Self {
        let name = directory
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| directory.display().to_string());

        let mut files = BTreeSet::new();
        if directory.is_dir() {
            for entry in WalkDir::new(directory).into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_file() {
                    files.insert(entry.file_name().to_string_lossy().into_owned());
                }
            }
        } else {
            error!(submission = %name, path = %directory.display(), "Submission path is not a directory");
        }

        let submission = Self::new(id, name, directory, files, expected.clone());
        debug!(
            submission = %submission.name,
            files = submission.files.len(),
            valid = submission.valid,
            "Scanned submission"
        );
        submission
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Expected files that were not handed in.
    pub fn missing_files(&self) -> Vec<&str> {
        self.expected
            .difference(&self.files)
            .map(String::as_str)
            .collect()
    }

    pub fn contains(&self, file: &str) -> bool {
        self.files.contains(file)
    }
}

impl fmt::Display for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.id)
    }
}

/// Plain description of a graded check. The body lives elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDefinition {
    pub description: String,
    pub weight: f64,
    #[serde(default)]
    pub penalty: f64,
    #[serde(default)]
    pub required_units: Vec<String>,
    #[serde(default)]
    pub hard_requirement: bool,
}

impl CheckDefinition {
    pub fn new(description: impl Into<String>, weight: f64) -> Self {
        Self {
            description: description.into(),
            weight,
            penalty: 0.0,
            required_units: Vec::new(),
            hard_requirement: false,
        }
    }

    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn requires<I, S>(mut self, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_units.extend(units.into_iter().map(Into::into));
        self
    }

    pub fn hard(mut self) -> Self {
        self.hard_requirement = true;
        self
    }
}

/// How an expected value was compared against the actual one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqualityKind {
    Exact,
    Any,
    Permutation,
    Content,
}

impl fmt::Display for EqualityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EqualityKind::Exact => "exact",
            EqualityKind::Any => "any",
            EqualityKind::Permutation => "permutation",
            EqualityKind::Content => "content",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Success,
    /// Generic failure raised by an explicit `fail(message)`. Disqualifies partial credit.
    AssertionFailed,
    WrongResult(EqualityKind),
    MethodTimeout,
    UnexpectedException,
    MissingRequiredException,
    WrongExceptionType,
    IncorrectSideEffect,
    MethodNotImplemented,
    AttributeNotImplemented,
    ConstructorNotImplemented,
    ReferencedUnitNotFound,
    WrongSymbolName,
    MissingFile,
    WrongFileName,
    CompilationError,
    LoadingError,
    InstantiationError,
    UnexpectedError,
    SchedulerTimeout,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Success => write!(f, "Success"),
            ErrorCode::AssertionFailed => write!(f, "Assertion Failed"),
            ErrorCode::WrongResult(kind) => write!(f, "Wrong Method Result ({})", kind),
            ErrorCode::MethodTimeout => write!(f, "Method Timeout"),
            ErrorCode::UnexpectedException => write!(f, "Unexpected Exception"),
            ErrorCode::MissingRequiredException => write!(f, "Missing Required Exception"),
            ErrorCode::WrongExceptionType => write!(f, "Wrong Exception Type"),
            ErrorCode::IncorrectSideEffect => write!(f, "Incorrect Side Effect"),
            ErrorCode::MethodNotImplemented => write!(f, "Method Not Implemented"),
            ErrorCode::AttributeNotImplemented => write!(f, "Attribute Not Implemented"),
            ErrorCode::ConstructorNotImplemented => write!(f, "Constructor Not Implemented"),
            ErrorCode::ReferencedUnitNotFound => write!(f, "Undefined Unit Reference"),
            ErrorCode::WrongSymbolName => write!(f, "Wrong Symbol Name"),
            ErrorCode::MissingFile => write!(f, "Missing File"),
            ErrorCode::WrongFileName => write!(f, "Wrong File Name"),
            ErrorCode::CompilationError => write!(f, "Compilation Error"),
            ErrorCode::LoadingError => write!(f, "Loading Error"),
            ErrorCode::InstantiationError => write!(f, "Instantiation Error"),
            ErrorCode::UnexpectedError => write!(f, "Unexpected Error"),
            ErrorCode::SchedulerTimeout => write!(f, "Scheduler Timeout"),
        }
    }
}

/// A single logged observation inside a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub code: ErrorCode,
    pub passed: bool,
    pub message: Option<String>,
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Success,
            passed: true,
            message: Some(message.into()),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::error(ErrorCode::AssertionFailed, message)
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            passed: false,
            message: Some(message.into()),
        }
    }

    /// Builds a pass or a fail with the given code depending on `passed`.
    pub fn judged(passed: bool, code: ErrorCode, message: impl Into<String>) -> Self {
        if passed {
            Self::success(message)
        } else {
            Self::error(code, message)
        }
    }

    /// True for the generic failure that disqualifies partial credit.
    pub fn is_generic_failure(&self) -> bool {
        self.code == ErrorCode::AssertionFailed
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.passed { "[pass]" } else { "[fail]" };
        write!(f, "{}{}", tag, self.message.as_deref().unwrap_or(""))
    }
}

/// Outcomes logged under one check for one submission, in logging order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub definition: CheckDefinition,
    pub outcomes: Vec<Outcome>,
    /// Rendered calls made while the check ran.
    #[serde(default)]
    pub trace: Vec<String>,
    /// Set when a required unit failed to build and the body never ran.
    #[serde(default)]
    pub skipped: bool,
}

impl CheckRecord {
    pub fn new(definition: CheckDefinition) -> Self {
        Self {
            definition,
            outcomes: Vec::new(),
            trace: Vec::new(),
            skipped: false,
        }
    }

    pub fn correct(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }
}

/// Evaluation of one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub submission: Submission,
    pub checks: Vec<CheckRecord>,
    /// Outcomes logged outside any check (includes, precompilation, hooks, scheduler).
    pub setup: Vec<Outcome>,
    pub grade: f64,
    pub max_grade: f64,
    /// False when the scheduler gave up on the run.
    pub completed: bool,
}

impl Entry {
    pub fn outcomes(&self) -> impl Iterator<Item = &Outcome> {
        self.setup
            .iter()
            .chain(self.checks.iter().flat_map(|c| c.outcomes.iter()))
    }

    /// Number of failing outcomes per error code.
    pub fn error_histogram(&self) -> BTreeMap<ErrorCode, usize> {
        let mut histogram = BTreeMap::new();
        for outcome in self.outcomes().filter(|o| !o.passed) {
            *histogram.entry(outcome.code).or_insert(0) += 1;
        }
        histogram
    }

    pub fn error_codes(&self) -> BTreeSet<ErrorCode> {
        self.outcomes()
            .filter(|o| !o.passed)
            .map(|o| o.code)
            .collect()
    }

    /// Failure messages, each prefixed with the check it belongs to.
    pub fn failure_messages(&self) -> Vec<String> {
        let mut messages: Vec<String> = self
            .setup
            .iter()
            .filter(|o| !o.passed)
            .filter_map(|o| o.message.clone())
            .collect();
        for check in &self.checks {
            for outcome in check.outcomes.iter().filter(|o| !o.passed) {
                if let Some(message) = &outcome.message {
                    messages.push(format!("[{}] {}", check.definition.description, message));
                }
            }
        }
        messages
    }

    pub fn passed_count(&self) -> usize {
        self.outcomes().filter(|o| o.passed).count()
    }

    pub fn outcome_count(&self) -> usize {
        self.outcomes().count()
    }
}

/// Pairwise score emitted by an external similarity detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityPair<T = String> {
    pub first: T,
    pub second: T,
    pub score: f64,
}

impl<T> SimilarityPair<T> {
    pub fn new(first: T, second: T, score: f64) -> Self {
        Self { first, second, score }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub description: String,
    pub created_at: DateTime<Utc>,
    entries: Vec<Entry>,
    clusters: Option<Vec<BTreeSet<String>>>,
}

impl Report {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            created_at: Utc::now(),
            entries: Vec::new(),
            clusters: None,
        }
    }

    pub fn add(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, submission: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.submission.name == submission)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    pub fn set_clusters(&mut self, clusters: Vec<BTreeSet<String>>) {
        self.clusters = Some(clusters);
    }

    pub fn has_clusters(&self) -> bool {
        self.clusters.is_some()
    }

    pub fn clusters(&self) -> &[BTreeSet<String>] {
        self.clusters.as_deref().unwrap_or(&[])
    }

    /// The cluster containing `submission`, if any.
    pub fn cluster_of(&self, submission: &str) -> Option<&BTreeSet<String>> {
        self.clusters().iter().find(|c| c.contains(submission))
    }

    pub fn max_grade(&self) -> f64 {
        self.entries.first().map(|e| e.max_grade).unwrap_or(0.0)
    }

    /// Plain-text rendering: one block per submission, then the clusters.
    pub fn summary(&self) -> String {
        let mut out = format!("=== {} ===\n", self.description);
        for entry in &self.entries {
            out.push_str(&format!(
                "{}: {:.2}/{:.2}{}\n",
                entry.submission.name,
                entry.grade,
                entry.max_grade,
                if entry.completed { "" } else { " (incomplete)" }
            ));
            for (code, count) in entry.error_histogram() {
                out.push_str(&format!("  {} x{}\n", code, count));
            }
            for message in entry.failure_messages() {
                out.push_str(&format!("  - {}\n", message));
            }
        }
        if let Some(clusters) = &self.clusters {
            out.push_str(&format!("Clusters: {}\n", clusters.len()));
            for cluster in clusters {
                let members: Vec<&str> = cluster.iter().map(String::as_str).collect();
                out.push_str(&format!("  {{{}}}\n", members.join(", ")));
            }
        }
        out
    }
}

impl<'a> IntoIterator for &'a Report {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn make_entry(checks: Vec<CheckRecord>) -> Entry {
        Entry {
            submission: Submission::new(1, "alice", "/tmp/alice", names(&["Queue.java"]), names(&["Queue.java"])),
            checks,
            setup: Vec::new(),
            grade: 0.0,
            max_grade: 10.0,
            completed: true,
        }
    }

    #[test]
    fn test_submission_validity() {
        let ok = Submission::new(1, "a", "/a", names(&["A.java", "B.java"]), names(&["A.java"]));
        assert!(ok.is_valid());

        let missing = Submission::new(2, "b", "/b", names(&["A.java"]), names(&["A.java", "B.java"]));
        assert!(!missing.is_valid());
        assert_eq!(missing.missing_files(), vec!["B.java"]);
    }

    #[test]
    fn test_submission_from_dir_walks_nested_folders() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("bob");
        fs::create_dir_all(root.join("src/util")).unwrap();
        fs::write(root.join("src/Queue.java"), "class Queue {}").unwrap();
        fs::write(root.join("src/util/Node.java"), "class Node {}").unwrap();

        let submission = Submission::from_dir(7, &root, &names(&["Queue.java", "Node.java"]));

        assert_eq!(submission.name, "bob");
        assert_eq!(submission.id, 7);
        assert!(submission.is_valid());
        assert!(submission.contains("Node.java"));
    }

    #[test]
    fn test_submission_from_missing_dir_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let submission = Submission::from_dir(1, &dir.path().join("nobody"), &names(&["Queue.java"]));
        assert!(!submission.is_valid());
        assert!(submission.files.is_empty());
    }

    #[test]
    fn test_outcome_rendering() {
        assert_eq!(Outcome::success("ok").to_string(), "[pass]ok");
        assert_eq!(Outcome::failure("boom").to_string(), "[fail]boom");
        assert!(Outcome::failure("boom").is_generic_failure());
        assert!(!Outcome::error(ErrorCode::MethodTimeout, "slow").is_generic_failure());
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::WrongResult(EqualityKind::Permutation).to_string(), "Wrong Method Result (permutation)");
        assert_eq!(ErrorCode::AssertionFailed.to_string(), "Assertion Failed");
    }

    #[test]
    fn test_entry_histogram_and_messages() {
        let mut record = CheckRecord::new(CheckDefinition::new("enqueue", 2.0));
        record.outcomes.push(Outcome::success("fine"));
        record.outcomes.push(Outcome::error(ErrorCode::MethodTimeout, "too slow"));
        record.outcomes.push(Outcome::error(ErrorCode::MethodTimeout, "still slow"));
        let mut entry = make_entry(vec![record]);
        entry.setup.push(Outcome::error(ErrorCode::WrongFileName, "found queue.java"));

        let histogram = entry.error_histogram();
        assert_eq!(histogram.get(&ErrorCode::MethodTimeout), Some(&2));
        assert_eq!(histogram.get(&ErrorCode::WrongFileName), Some(&1));
        assert_eq!(histogram.get(&ErrorCode::Success), None);

        assert_eq!(entry.error_codes().len(), 2);
        assert_eq!(
            entry.failure_messages(),
            vec![
                "found queue.java".to_string(),
                "[enqueue] too slow".to_string(),
                "[enqueue] still slow".to_string(),
            ]
        );
        assert_eq!(entry.passed_count(), 1);
        assert_eq!(entry.outcome_count(), 4);
    }

    #[test]
    fn test_report_clusters_and_summary() {
        let mut report = Report::new("Assignment 1");
        report.add(make_entry(Vec::new()));
        assert!(!report.has_clusters());
        assert!(report.cluster_of("alice").is_none());

        report.set_clusters(vec![names(&["alice", "carol"])]);
        assert_eq!(report.cluster_of("alice"), Some(&names(&["alice", "carol"])));
        assert!(report.cluster_of("dave").is_none());

        let summary = report.summary();
        assert!(summary.contains("=== Assignment 1 ==="));
        assert!(summary.contains("alice: 0.00/10.00"));
        assert!(summary.contains("{alice, carol}"));
    }

    #[test]
    fn test_report_serializes_to_json() {
        let mut report = Report::new("json");
        report.add(make_entry(vec![CheckRecord::new(CheckDefinition::new("c", 1.0).with_penalty(0.5))]));
        let json = serde_json::to_string(&report).unwrap();
        let back: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back.entries()[0].checks[0].definition.penalty, 0.5);
    }
}
