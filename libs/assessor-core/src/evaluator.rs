/// Grading - Pure Scoring of Logged Results
///
/// **Core Responsibility:**
/// Turn the Results logged under each check into a grade.
///
/// **Critical Properties:**
/// - Knows nothing about the sandbox, units or submissions
/// - Pure function: (check records) -> grade, recomputable at any time
///
/// **Scoring Rules:**
/// - A check with no Results contributes nothing
/// - No passing Result, or any generic "Assertion Failed" Result:
///   grade = max(0, grade - penalty)
/// - Otherwise: grade += correct / total * weight
/// - max_grade = sum of all weights
/// - Final grade is never negative and never NaN
use assessor_common::types::{CheckDefinition, CheckRecord, Entry, Outcome, Submission};
use crate::runner::RunOutput;

/// Contribution of one check given the running grade.
fn apply(grade: f64, record: &CheckRecord) -> f64 {
    let total = record.total();
    if total == 0 {
        return grade;
    }
    let correct = record.correct();
    let disqualified = correct == 0 || record.outcomes.iter().any(Outcome::is_generic_failure);

    if disqualified {
        (grade - record.definition.penalty).max(0.0)
    } else {
        grade + correct as f64 / total as f64 * record.definition.weight
    }
}

pub fn grade(records: &[CheckRecord]) -> f64 {
    let grade = records.iter().fold(0.0, apply);
    if grade.is_nan() {
        0.0
    } else {
        grade.max(0.0)
    }
}

pub fn max_grade<'a>(definitions: impl IntoIterator<Item = &'a CheckDefinition>) -> f64 {
    definitions.into_iter().map(|d| d.weight).sum()
}

/// Grade a finished run into an Entry.
pub fn evaluate(submission: Submission, output: RunOutput, max: f64) -> Entry {
    let grade = grade(&output.checks);
    Entry {
        submission,
        checks: output.checks,
        setup: output.setup,
        grade,
        max_grade: max,
        completed: true,
    }
}

/// Entry for a run the scheduler gave up on; every check is left empty.
pub fn incomplete(submission: Submission, definitions: &[CheckDefinition], reason: Outcome, max: f64) -> Entry {
    Entry {
        submission,
        checks: definitions.iter().cloned().map(CheckRecord::new).collect(),
        setup: vec![reason],
        grade: 0.0,
        max_grade: max,
        completed: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assessor_common::types::{EqualityKind, ErrorCode};

    fn make_record(weight: f64, penalty: f64, outcomes: Vec<Outcome>) -> CheckRecord {
        let mut record = CheckRecord::new(CheckDefinition::new(format!("check w={}", weight), weight).with_penalty(penalty));
        record.outcomes = outcomes;
        record
    }

    fn pass() -> Outcome {
        Outcome::success("ok")
    }

    fn wrong() -> Outcome {
        Outcome::error(ErrorCode::WrongResult(EqualityKind::Exact), "wrong")
    }

    #[test]
    fn test_weight_and_penalty_example() {
        let records = vec![
            make_record(10.0, 3.0, vec![pass(), pass(), wrong(), wrong()]),
            make_record(5.0, 0.0, vec![wrong(), Outcome::failure("nope")]),
        ];
        assert_eq!(grade(&records), 5.0);
    }

    #[test]
    fn test_all_pass() {
        let records = vec![
            make_record(2.0, 1.0, vec![pass(), pass()]),
            make_record(3.0, 1.0, vec![pass()]),
        ];
        assert_eq!(grade(&records), 5.0);
        assert_eq!(max_grade(records.iter().map(|r| &r.definition)), 5.0);
    }

    #[test]
    fn test_penalty_floors_at_zero() {
        let records = vec![
            make_record(1.0, 0.0, vec![pass(), wrong()]),
            make_record(4.0, 10.0, vec![wrong()]),
            make_record(2.0, 0.0, vec![pass()]),
        ];
        // 0.5, then floored to 0, then +2
        assert_eq!(grade(&records), 2.0);
    }

    #[test]
    fn test_generic_failure_disqualifies_partial_credit() {
        let records = vec![make_record(10.0, 1.0, vec![pass(), pass(), Outcome::failure("explicit")])];
        assert_eq!(grade(&records), 0.0);
    }

    #[test]
    fn test_empty_check_contributes_nothing() {
        let records = vec![make_record(10.0, 5.0, vec![]), make_record(1.0, 0.0, vec![pass()])];
        assert_eq!(grade(&records), 1.0);
    }

    #[test]
    fn test_nan_weight_normalized() {
        let records = vec![make_record(f64::NAN, 0.0, vec![pass()])];
        assert_eq!(grade(&records), 0.0);
    }

    #[test]
    fn test_grade_within_bounds() {
        let records = vec![
            make_record(3.0, 1.0, vec![pass(), wrong(), pass()]),
            make_record(7.0, 2.0, vec![wrong(), wrong()]),
            make_record(1.0, 0.5, vec![pass()]),
        ];
        let g = grade(&records);
        assert!(g >= 0.0);
        assert!(g <= max_grade(records.iter().map(|r| &r.definition)));
    }

    #[test]
    fn test_incomplete_entry() {
        let submission = Submission::new(1, "late", "/late", Default::default(), Default::default());
        let definitions = vec![CheckDefinition::new("a", 2.0)];
        let entry = incomplete(submission, &definitions, Outcome::error(ErrorCode::SchedulerTimeout, "gave up"), 2.0);
        assert!(!entry.completed);
        assert_eq!(entry.grade, 0.0);
        assert_eq!(entry.checks.len(), 1);
        assert_eq!(entry.error_codes().into_iter().collect::<Vec<_>>(), vec![ErrorCode::SchedulerTimeout]);
    }
}
