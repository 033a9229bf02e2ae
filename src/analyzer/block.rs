//! Structured status block parsing.
//!
//! Well-behaved agents end each iteration with a sentinel-delimited
//! block of `KEY: value` lines:
//!
//! ```text
//! ---AGENT_STATUS---
//! STATUS: IN_PROGRESS
//! TASKS_COMPLETED_THIS_LOOP: 2
//! FILES_MODIFIED: 3
//! TESTS_STATUS: PASSING
//! WORK_TYPE: implementation
//! EXIT_SIGNAL: false
//! RECOMMENDATION: continue
//! ---END_AGENT_STATUS---
//! ```
//!
//! Parsing is best-effort: unknown keys are ignored and a malformed
//! value degrades that one field rather than failing the block.

use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Start sentinel for the status block.
pub const BLOCK_START: &str = "---AGENT_STATUS---";

/// End sentinel for the status block.
pub const BLOCK_END: &str = "---END_AGENT_STATUS---";

/// Parsed fields of a structured status block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusBlock {
    /// Free-form `STATUS` value (e.g. `IN_PROGRESS`, `COMPLETE`).
    pub status: Option<String>,
    /// `TASKS_COMPLETED_THIS_LOOP` count.
    pub tasks_completed: Option<u32>,
    /// `FILES_MODIFIED` count as reported by the agent.
    pub files_modified: Option<u32>,
    /// `TESTS_STATUS` value (e.g. `PASSING`, `FAILING`).
    pub tests_status: Option<String>,
    /// Free-form `WORK_TYPE` value.
    pub work_type: Option<String>,
    /// Explicit `EXIT_SIGNAL` flag.
    pub exit_signal: Option<bool>,
    /// Free-form `RECOMMENDATION` value.
    pub recommendation: Option<String>,
}

impl StatusBlock {
    /// Check whether the agent explicitly claims tests are passing.
    #[must_use]
    pub fn tests_passing(&self) -> bool {
        self.tests_status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("PASSING"))
    }

    /// Check whether the agent reports the overall task as complete.
    #[must_use]
    pub fn reports_complete(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("COMPLETE"))
    }
}

fn key_value_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*([A-Z][A-Z0-9_]*)\s*:\s*(.*?)\s*$").expect("valid key-value regex")
    })
}

/// Extract and parse the status block from raw agent output.
///
/// Returns `None` when no complete sentinel pair is present. The last
/// block wins if the output somehow contains several.
#[must_use]
pub fn parse_status_block(output: &str) -> Option<StatusBlock> {
    let start = output.rfind(BLOCK_START)?;
    let after_start = start + BLOCK_START.len();
    let end_offset = output[after_start..].find(BLOCK_END)?;
    let body = &output[after_start..after_start + end_offset];

    let mut block = StatusBlock::default();

    for capture in key_value_regex().captures_iter(body) {
        let key = &capture[1];
        let value = capture[2].trim();
        if value.is_empty() {
            continue;
        }

        match key {
            "STATUS" => block.status = Some(value.to_string()),
            "TASKS_COMPLETED_THIS_LOOP" => match value.parse() {
                Ok(n) => block.tasks_completed = Some(n),
                Err(_) => debug!("Unparseable TASKS_COMPLETED_THIS_LOOP: '{}'", value),
            },
            "FILES_MODIFIED" => match value.parse() {
                Ok(n) => block.files_modified = Some(n),
                Err(_) => debug!("Unparseable FILES_MODIFIED: '{}'", value),
            },
            "TESTS_STATUS" => block.tests_status = Some(value.to_string()),
            "WORK_TYPE" => block.work_type = Some(value.to_string()),
            "EXIT_SIGNAL" => block.exit_signal = parse_bool(value),
            "RECOMMENDATION" => block.recommendation = Some(value.to_string()),
            _ => {}
        }
    }

    Some(block)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        other => {
            debug!("Unparseable boolean: '{}'", other);
            None
        }
    }
}
