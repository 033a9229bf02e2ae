//! Response analysis: raw agent output to a structured signal.
//!
//! One iteration of agent output is classified along two paths. The
//! high-trust path parses a sentinel-delimited status block and takes
//! the exit signal directly from its explicit field. The heuristic path
//! matches a declarative phrase-rule table against the normalized text.
//! Both feed a single unbounded confidence score: the structured block
//! sets a base near 100 and corroborating evidence adds uncapped
//! bonuses, so callers must treat any score `>= 100` as maximal rather
//! than assuming 100 is a ceiling.
//!
//! Analysis never fails on malformed input; the worst case is a
//! conservative result with every flag false and a zero score.

pub mod block;
pub mod rules;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::store::{RecordKind, StateStore};

use block::{parse_status_block, StatusBlock};
use rules::{
    matching_rules, SignalField, EXIT_SIGNAL_BONUS, FILES_MODIFIED_BONUS,
    HEURISTIC_COMPLETION_BASE, LONG_OUTPUT_CHARS, OUTPUT_CONTRACTION_BONUS,
    STRUCTURED_BLOCK_BASE, TESTS_PASSING_BONUS,
};

/// Structured signal derived from one iteration's output.
///
/// Immutable once created; the latest result fully replaces the
/// previously persisted one. History lives in the exit-signal tracker,
/// not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Whether a sentinel-delimited status block was found.
    pub has_structured_block: bool,
    /// Explicit or inferred "stop the loop" indication.
    pub exit_signal: bool,
    /// Unbounded additive confidence score (>= 100 means maximal).
    pub confidence_score: i64,
    /// Whether the iteration's content was solely test execution.
    pub is_test_only: bool,
    /// Whether a natural-language completion claim was found.
    pub has_completion_signal: bool,
    /// Files modified this iteration, as reported by the VCS collaborator.
    pub files_modified: u32,
    /// Free-form `STATUS` field, carried through if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Free-form `WORK_TYPE` field, carried through if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_type: Option<String>,
    /// Free-form `RECOMMENDATION` field, carried through if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    /// Iteration index this result was derived from.
    pub loop_index: u64,
    /// Raw output length in chars, kept for the length-trend heuristic.
    pub output_chars: u64,
    /// When the analysis ran.
    pub timestamp: DateTime<Utc>,
}

impl AnalysisResult {
    /// Conservative fallback: every flag false, zero confidence.
    #[must_use]
    pub fn conservative(loop_index: u64, files_modified: u32, output_chars: u64) -> Self {
        Self {
            has_structured_block: false,
            exit_signal: false,
            confidence_score: 0,
            is_test_only: false,
            has_completion_signal: false,
            files_modified,
            status: None,
            work_type: None,
            recommendation: None,
            loop_index,
            output_chars,
            timestamp: Utc::now(),
        }
    }

    /// Check whether the evidence is maximally convincing.
    #[must_use]
    pub fn is_maximal_confidence(&self) -> bool {
        self.confidence_score >= 100
    }
}

/// Converts raw agent output into an [`AnalysisResult`] each iteration.
///
/// Holds the previous iteration's output length for the weak
/// "winding down" trend signal; that length is seeded from the
/// persisted latest result so the trend survives a restart.
pub struct ResponseAnalyzer<S: StateStore> {
    store: Arc<S>,
    prev_output_chars: Option<u64>,
}

impl<S: StateStore> ResponseAnalyzer<S> {
    /// Create an analyzer, seeding the length trend from the last
    /// persisted result if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error only for unexpected store failures; a missing
    /// or corrupted record starts fresh.
    pub fn new(store: Arc<S>) -> Result<Self> {
        let prev: Option<AnalysisResult> = store.load(RecordKind::Analysis)?;
        Ok(Self {
            store,
            prev_output_chars: prev.map(|r| r.output_chars),
        })
    }

    /// Analyze one iteration's output.
    ///
    /// `files_modified` comes from the VCS collaborator; the analyzer
    /// treats it as ground truth over anything the agent claims.
    ///
    /// # Errors
    ///
    /// Returns an error only if persisting the result fails. Malformed
    /// output never fails: the structured path degrades to heuristics
    /// and the heuristics degrade to the conservative fallback.
    pub fn analyze(
        &mut self,
        output: &str,
        loop_index: u64,
        files_modified: u32,
    ) -> Result<AnalysisResult> {
        let output_chars = output.chars().count() as u64;
        let result = self.classify(output, loop_index, files_modified, output_chars);

        // Overwrite, never append: the latest result is the record.
        self.store.save(RecordKind::Analysis, &result)?;
        self.prev_output_chars = Some(output_chars);

        Ok(result)
    }

    fn classify(
        &self,
        output: &str,
        loop_index: u64,
        files_modified: u32,
        output_chars: u64,
    ) -> AnalysisResult {
        if output.trim().is_empty() {
            return AnalysisResult::conservative(loop_index, files_modified, output_chars);
        }

        let block = parse_status_block(output);
        let normalized = output.to_lowercase();

        let completion_rules: Vec<_> = matching_rules(&normalized)
            .filter(|rule| rule.field == SignalField::Completion)
            .collect();

        let mut score: i64 = 0;

        let exit_signal = block
            .as_ref()
            .and_then(|b| b.exit_signal)
            .unwrap_or(false);

        if block.is_some() {
            score += STRUCTURED_BLOCK_BASE;
        }
        if exit_signal {
            score += EXIT_SIGNAL_BONUS;
        }
        if block.as_ref().is_some_and(StatusBlock::tests_passing) {
            score += TESTS_PASSING_BONUS;
        }
        if files_modified > 0 {
            score += FILES_MODIFIED_BONUS;
        }

        let phrase_completion = !completion_rules.is_empty();
        if phrase_completion && block.is_none() {
            score += HEURISTIC_COMPLETION_BASE;
        }
        score += completion_rules.iter().map(|rule| rule.weight).sum::<i64>();

        let has_completion_signal =
            phrase_completion || block.as_ref().is_some_and(StatusBlock::reports_complete);

        if self.output_contracted_sharply(output_chars) {
            score += OUTPUT_CONTRACTION_BONUS;
            debug!(
                loop_index,
                output_chars, "Output contracted sharply, nudging confidence"
            );
        }

        let is_test_only = files_modified == 0 && is_test_only_output(output);

        let (status, work_type, recommendation) = match &block {
            Some(b) => (
                b.status.clone(),
                b.work_type.clone(),
                b.recommendation.clone(),
            ),
            None => (None, None, None),
        };

        AnalysisResult {
            has_structured_block: block.is_some(),
            exit_signal,
            confidence_score: score,
            is_test_only,
            has_completion_signal,
            files_modified,
            status,
            work_type,
            recommendation,
            loop_index,
            output_chars,
            timestamp: Utc::now(),
        }
    }

    /// A sharp contraction after a long, detailed output reads as the
    /// agent winding down. Weak signal: a nudge, never a halt trigger.
    fn output_contracted_sharply(&self, output_chars: u64) -> bool {
        match self.prev_output_chars {
            Some(prev) => prev >= LONG_OUTPUT_CHARS && output_chars * 4 < prev,
            None => false,
        }
    }
}

/// Check whether every meaningful line of the output is test activity.
///
/// The status block, if any, is stripped first: it is reporting, not
/// activity.
fn is_test_only_output(output: &str) -> bool {
    let without_block = strip_status_block(output);

    let mut saw_line = false;
    for line in without_block.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        saw_line = true;
        if !rules::is_test_activity_line(trimmed) {
            return false;
        }
    }
    saw_line
}

fn strip_status_block(output: &str) -> String {
    match (output.find(block::BLOCK_START), output.find(block::BLOCK_END)) {
        (Some(start), Some(end)) if end > start => {
            let after = end + block::BLOCK_END.len();
            format!("{}{}", &output[..start], &output[after..])
        }
        _ => output.to_string(),
    }
}
