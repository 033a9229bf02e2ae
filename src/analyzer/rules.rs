//! Declarative heuristic rules for output classification.
//!
//! The heuristic surface is data: each rule pairs a lowercase phrase
//! with the signal field it feeds and the confidence weight it adds.
//! Matching is case-insensitive substring search over normalized text,
//! so rules can be tuned without touching the analyzer control flow.

/// Signal field a heuristic rule contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalField {
    /// Natural-language completion claim ("all tasks are complete").
    Completion,
    /// Test-execution activity ("running tests", "npm test").
    TestActivity,
}

/// A single heuristic rule.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicRule {
    /// Lowercase phrase matched as a substring.
    pub phrase: &'static str,
    /// Confidence added when the phrase matches.
    pub weight: i64,
    /// Which signal the match feeds.
    pub field: SignalField,
}

/// Base confidence when a structured status block is present.
pub const STRUCTURED_BLOCK_BASE: i64 = 100;

/// Base confidence when completion is inferred from phrases alone.
pub const HEURISTIC_COMPLETION_BASE: i64 = 40;

/// Bonus for an explicit `EXIT_SIGNAL: true` field.
pub const EXIT_SIGNAL_BONUS: i64 = 25;

/// Bonus for an explicit `TESTS_STATUS: PASSING` field.
pub const TESTS_PASSING_BONUS: i64 = 15;

/// Bonus when the VCS reports modified files this iteration.
pub const FILES_MODIFIED_BONUS: i64 = 10;

/// Bonus when output contracts sharply after a long iteration.
pub const OUTPUT_CONTRACTION_BONUS: i64 = 5;

/// Output longer than this counts as "long and detailed" for the
/// contraction heuristic.
pub const LONG_OUTPUT_CHARS: u64 = 2000;

/// The full rule table, evaluated against normalized (lowercased) text.
///
/// Completion weights are additive and uncapped; a heavily-corroborated
/// iteration may score above 100. Test-activity rules carry no weight,
/// they only feed the test-only classification.
pub const HEURISTIC_RULES: &[HeuristicRule] = &[
    // Completion phrases
    HeuristicRule {
        phrase: "all tasks are complete",
        weight: 10,
        field: SignalField::Completion,
    },
    HeuristicRule {
        phrase: "all tasks complete",
        weight: 10,
        field: SignalField::Completion,
    },
    HeuristicRule {
        phrase: "finished implementing",
        weight: 10,
        field: SignalField::Completion,
    },
    HeuristicRule {
        phrase: "implementation is complete",
        weight: 10,
        field: SignalField::Completion,
    },
    HeuristicRule {
        phrase: "ready for review",
        weight: 10,
        field: SignalField::Completion,
    },
    HeuristicRule {
        phrase: "nothing left to do",
        weight: 10,
        field: SignalField::Completion,
    },
    HeuristicRule {
        phrase: "work is complete",
        weight: 10,
        field: SignalField::Completion,
    },
    HeuristicRule {
        phrase: "no remaining tasks",
        weight: 10,
        field: SignalField::Completion,
    },
    // Test-execution phrases
    HeuristicRule {
        phrase: "running tests",
        weight: 0,
        field: SignalField::TestActivity,
    },
    HeuristicRule {
        phrase: "running the tests",
        weight: 0,
        field: SignalField::TestActivity,
    },
    HeuristicRule {
        phrase: "npm test",
        weight: 0,
        field: SignalField::TestActivity,
    },
    HeuristicRule {
        phrase: "cargo test",
        weight: 0,
        field: SignalField::TestActivity,
    },
    HeuristicRule {
        phrase: "pytest",
        weight: 0,
        field: SignalField::TestActivity,
    },
    HeuristicRule {
        phrase: "all tests passed",
        weight: 0,
        field: SignalField::TestActivity,
    },
    HeuristicRule {
        phrase: "all tests pass",
        weight: 0,
        field: SignalField::TestActivity,
    },
    HeuristicRule {
        phrase: "test suite passed",
        weight: 0,
        field: SignalField::TestActivity,
    },
    HeuristicRule {
        phrase: "tests are passing",
        weight: 0,
        field: SignalField::TestActivity,
    },
];

/// Rules matching the given normalized text.
pub fn matching_rules(normalized: &str) -> impl Iterator<Item = &'static HeuristicRule> + '_ {
    HEURISTIC_RULES
        .iter()
        .filter(move |rule| normalized.contains(rule.phrase))
}

/// Check whether a single line reads as test activity.
///
/// Used by the test-only classifier: a line counts as test activity
/// when it matches any test rule phrase.
#[must_use]
pub fn is_test_activity_line(line: &str) -> bool {
    let normalized = line.to_lowercase();
    HEURISTIC_RULES
        .iter()
        .filter(|rule| rule.field == SignalField::TestActivity)
        .any(|rule| normalized.contains(rule.phrase))
}
