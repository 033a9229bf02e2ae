//! Exit signal tracking across iterations.
//!
//! Keeps three independent rolling windows of recent analyzer signals
//! and answers whether the pattern they show is strong enough to
//! recommend a voluntary stop. This is the "work looks done" half of
//! the halt decision; the circuit breaker owns the "agent is broken"
//! half.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analyzer::AnalysisResult;
use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::store::{RecordKind, StateStore};
use crate::window::RollingWindow;

/// Default capacity of each rolling window.
pub const DEFAULT_WINDOW_CAPACITY: usize = 5;

/// In-memory exit-signal state: three bounded windows of loop indices.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitSignalState {
    /// Loops whose output was solely test execution.
    pub test_only_loops: RollingWindow<u64>,
    /// Loops carrying an explicit exit signal.
    pub done_signals: RollingWindow<u64>,
    /// Loops carrying a natural-language completion claim.
    pub completion_indicators: RollingWindow<u64>,
}

impl ExitSignalState {
    /// Create empty state with the given per-window capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            test_only_loops: RollingWindow::new(capacity),
            done_signals: RollingWindow::new(capacity),
            completion_indicators: RollingWindow::new(capacity),
        }
    }
}

impl Default for ExitSignalState {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

/// Persisted form of [`ExitSignalState`]: three plain arrays, each at
/// most the window capacity long, plus an update timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitSignalRecord {
    /// Loop indices of recent test-only iterations.
    pub test_only_loops: Vec<u64>,
    /// Loop indices of recent explicit exit signals.
    pub done_signals: Vec<u64>,
    /// Loop indices of recent completion claims.
    pub completion_indicators: Vec<u64>,
    /// When this record was last written.
    pub updated_at: DateTime<Utc>,
}

impl ExitSignalRecord {
    fn from_state(state: &ExitSignalState) -> Self {
        Self {
            test_only_loops: state.test_only_loops.to_vec(),
            done_signals: state.done_signals.to_vec(),
            completion_indicators: state.completion_indicators.to_vec(),
            updated_at: Utc::now(),
        }
    }

    fn into_state(self, capacity: usize) -> ExitSignalState {
        let mut state = ExitSignalState::new(capacity);
        for index in self.test_only_loops {
            state.test_only_loops.push(index);
        }
        for index in self.done_signals {
            state.done_signals.push(index);
        }
        for index in self.completion_indicators {
            state.completion_indicators.push(index);
        }
        state
    }
}

/// Maintains the exit-signal windows and the voluntary-stop verdict.
pub struct ExitSignalTracker<S: StateStore> {
    store: Arc<S>,
    state: ExitSignalState,
    // Test-only entries pushed since construction. Loop indices restart
    // at 1 every run while the windows persist, so a restored entry can
    // be numerically adjacent to a new run's index by coincidence; the
    // consecutive count must not cross that boundary.
    test_only_this_run: u32,
}

impl<S: StateStore> ExitSignalTracker<S> {
    /// Create a tracker, restoring persisted windows if present.
    ///
    /// # Errors
    ///
    /// Returns an error only for unexpected store failures; missing or
    /// corrupted state reinitializes empty.
    pub fn new(store: Arc<S>, capacity: usize) -> Result<Self> {
        let record: Option<ExitSignalRecord> = store.load(RecordKind::ExitSignals)?;
        let state = match record {
            Some(record) => record.into_state(capacity),
            None => ExitSignalState::new(capacity),
        };
        Ok(Self {
            store,
            state,
            test_only_this_run: 0,
        })
    }

    /// Record one iteration's analyzer signals and persist the windows.
    ///
    /// # Errors
    ///
    /// Returns an error if the updated state cannot be persisted.
    pub fn update(&mut self, result: &AnalysisResult, loop_index: u64) -> Result<&ExitSignalState> {
        if result.is_test_only {
            self.state.test_only_loops.push(loop_index);
            self.test_only_this_run += 1;
        }
        if result.exit_signal {
            self.state.done_signals.push(loop_index);
        }
        if result.has_completion_signal {
            self.state.completion_indicators.push(loop_index);
        }

        debug!(
            loop_index,
            test_only = self.state.test_only_loops.len(),
            done = self.state.done_signals.len(),
            completion = self.state.completion_indicators.len(),
            "Exit signal windows updated"
        );

        self.store
            .save(RecordKind::ExitSignals, &ExitSignalRecord::from_state(&self.state))?;

        Ok(&self.state)
    }

    /// Current state (windows oldest-to-newest).
    #[must_use]
    pub fn state(&self) -> &ExitSignalState {
        &self.state
    }

    /// Length of the trailing run of consecutive test-only loop indices.
    ///
    /// An intervening non-test-only iteration breaks the run: indices
    /// [2, 4, 5] count as 2, not 3. Entries restored from a previous
    /// run never extend it, so the count is capped at the number of
    /// test-only iterations this tracker has recorded itself.
    #[must_use]
    pub fn consecutive_test_only_count(&self) -> u32 {
        trailing_consecutive_run(&self.state.test_only_loops).min(self.test_only_this_run)
    }

    /// Number of explicit done signals retained in the window.
    #[must_use]
    pub fn recent_done_signal_count(&self) -> u32 {
        self.state.done_signals.len() as u32
    }

    /// Number of completion claims retained in the window.
    #[must_use]
    pub fn recent_completion_count(&self) -> u32 {
        self.state.completion_indicators.len() as u32
    }

    /// Whether the recent pattern recommends a voluntary stop.
    ///
    /// Distinct from the circuit breaker: this says "the work looks
    /// done", not "the agent is broken".
    #[must_use]
    pub fn recommends_stop(&self, config: &SupervisorConfig) -> bool {
        let test_only = self.consecutive_test_only_count();
        if test_only >= config.max_consecutive_test_loops {
            info!(
                test_only,
                threshold = config.max_consecutive_test_loops,
                "Consecutive test-only loops reached stop threshold"
            );
            return true;
        }

        let done = self.recent_done_signal_count();
        if done >= config.max_consecutive_done_signals {
            info!(
                done,
                threshold = config.max_consecutive_done_signals,
                "Recent done signals reached stop threshold"
            );
            return true;
        }

        false
    }
}

fn trailing_consecutive_run(window: &RollingWindow<u64>) -> u32 {
    let entries = window.to_vec();
    let mut run = 0u32;
    let mut expected: Option<u64> = None;

    for index in entries.iter().rev() {
        match expected {
            None => {
                run = 1;
                expected = index.checked_sub(1);
            }
            Some(want) if *index == want => {
                run += 1;
                expected = index.checked_sub(1);
            }
            _ => break,
        }
        if expected.is_none() {
            break;
        }
    }

    run
}
