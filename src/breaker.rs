//! Failure-detecting circuit breaker.
//!
//! Two independent triggers share one remedy. Stagnation: consecutive
//! iterations with zero modified files walk the breaker through
//! `CLOSED -> HALF_OPEN -> OPEN`. Repeated error: an agent that keeps
//! changing files but fails the same way every loop is just as broken,
//! so an identical-signature error streak forces `OPEN` on its own.
//!
//! The state is always a pure function of the two counters. It is
//! persisted for operators to inspect, but recomputed from the counters
//! on every load so a crash that persisted only one of the two can
//! never leave state and counters disagreeing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::store::{RecordKind, StateStore};

/// Transition history entries kept on disk.
const MAX_HISTORY_ENTRIES: usize = 200;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    /// Normal operation.
    #[serde(rename = "CLOSED")]
    Closed,
    /// Warning: stagnation building up.
    #[serde(rename = "HALF_OPEN")]
    HalfOpen,
    /// Halt: execution must stop.
    #[serde(rename = "OPEN")]
    Open,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
            Self::Open => write!(f, "OPEN"),
        }
    }
}

/// Which trigger opened the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// Consecutive no-progress iterations reached the halt threshold.
    Stagnation,
    /// An identical error signature repeated past the streak threshold.
    RepeatedError,
}

/// Persisted breaker record.
///
/// `state` is written for observability; on load it is recomputed from
/// the counters and a contradictory stored value is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerRecord {
    /// Derived state at the time of writing.
    pub state: BreakerState,
    /// Consecutive iterations with zero modified files.
    pub consecutive_no_progress: u32,
    /// Current identical-error streak length.
    pub consecutive_same_error: u32,
    /// Signature of the last observed error, if any.
    pub last_error_signature: Option<String>,
    /// When this record was last written.
    pub updated_at: DateTime<Utc>,
}

impl Default for CircuitBreakerRecord {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_no_progress: 0,
            consecutive_same_error: 0,
            last_error_signature: None,
            updated_at: Utc::now(),
        }
    }
}

/// One observability entry per state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// State before the transition.
    pub from: BreakerState,
    /// State after the transition.
    pub to: BreakerState,
    /// Human-readable cause.
    pub reason: String,
    /// Iteration that caused the transition (`None` for manual resets
    /// between runs).
    pub loop_index: Option<u64>,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
}

/// The failure-detecting state machine owning the halt verdict.
pub struct CircuitBreaker<S: StateStore> {
    store: Arc<S>,
    no_progress_warn: u32,
    no_progress_halt: u32,
    same_error_halt: u32,
    consecutive_no_progress: u32,
    consecutive_same_error: u32,
    last_error_signature: Option<String>,
    state: BreakerState,
    history: Vec<TransitionRecord>,
}

impl<S: StateStore> CircuitBreaker<S> {
    /// Create a breaker, restoring persisted counters if present.
    ///
    /// # Errors
    ///
    /// Returns an error only for unexpected store failures; missing or
    /// corrupted records reinitialize to defaults.
    pub fn new(store: Arc<S>, config: &SupervisorConfig) -> Result<Self> {
        let record: CircuitBreakerRecord = store
            .load(RecordKind::CircuitBreaker)?
            .unwrap_or_default();
        let history: Vec<TransitionRecord> = store
            .load(RecordKind::CircuitBreakerHistory)?
            .unwrap_or_default();

        let mut breaker = Self {
            store,
            no_progress_warn: config.no_progress_warn_threshold,
            no_progress_halt: config.no_progress_halt_threshold,
            same_error_halt: config.same_error_halt_threshold,
            consecutive_no_progress: record.consecutive_no_progress,
            consecutive_same_error: record.consecutive_same_error,
            last_error_signature: record.last_error_signature.clone(),
            state: BreakerState::Closed,
            history,
        };

        // State is derived, never trusted from disk
        breaker.state = breaker.derive_state();
        if record.state != breaker.state {
            warn!(
                stored = %record.state,
                derived = %breaker.state,
                "Persisted breaker state contradicts counters, using derived state"
            );
        }

        Ok(breaker)
    }

    /// Record one iteration's outcome and persist the result.
    ///
    /// Progress always wins: any modified file forces `CLOSED` and
    /// zeroes the no-progress counter regardless of the prior state.
    /// The repeated-error trigger is independent and can hold the
    /// breaker `OPEN` even while files are changing.
    ///
    /// # Errors
    ///
    /// Returns an error if the updated record cannot be persisted.
    pub fn record_loop_result(
        &mut self,
        loop_index: u64,
        files_modified: u32,
        had_error: bool,
        error_signature: Option<&str>,
    ) -> Result<BreakerState> {
        if files_modified > 0 {
            self.consecutive_no_progress = 0;
        } else {
            self.consecutive_no_progress += 1;
        }

        if had_error {
            match (error_signature, self.last_error_signature.as_deref()) {
                (Some(sig), Some(last)) if sig == last => {
                    self.consecutive_same_error += 1;
                }
                (Some(sig), _) => {
                    self.consecutive_same_error = 0;
                    self.last_error_signature = Some(sig.to_string());
                }
                (None, _) => {
                    // Error with no derivable signature cannot repeat
                    self.consecutive_same_error = 0;
                    self.last_error_signature = None;
                }
            }
        } else {
            self.consecutive_same_error = 0;
            self.last_error_signature = None;
        }

        let reason = self.transition_reason(files_modified, had_error);
        self.apply_derived_state(Some(loop_index), &reason)?;

        Ok(self.state)
    }

    /// Whether execution must halt.
    #[must_use]
    pub fn should_halt_execution(&self) -> bool {
        self.state == BreakerState::Open
    }

    /// Which trigger is holding the breaker open, if any.
    #[must_use]
    pub fn halt_reason(&self) -> Option<HaltReason> {
        if self.consecutive_same_error >= self.same_error_halt {
            Some(HaltReason::RepeatedError)
        } else if self.consecutive_no_progress >= self.no_progress_halt {
            Some(HaltReason::Stagnation)
        } else {
            None
        }
    }

    /// Operator override: force `CLOSED` and zero both counters.
    ///
    /// The reset is appended to the transition history even when the
    /// breaker was already `CLOSED`, so every manual override leaves an
    /// audit entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset record cannot be persisted.
    pub fn reset(&mut self, reason: &str) -> Result<()> {
        self.consecutive_no_progress = 0;
        self.consecutive_same_error = 0;
        self.last_error_signature = None;

        let from = self.state;
        self.state = self.derive_state();
        let reason = format!("manual reset: {}", reason);
        self.history.push(TransitionRecord {
            from,
            to: self.state,
            reason: reason.clone(),
            loop_index: None,
            timestamp: Utc::now(),
        });
        self.trim_history();
        self.persist()?;

        info!("Circuit breaker reset ({})", reason);
        Ok(())
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Current no-progress streak.
    #[must_use]
    pub fn consecutive_no_progress(&self) -> u32 {
        self.consecutive_no_progress
    }

    /// Current identical-error streak.
    #[must_use]
    pub fn consecutive_same_error(&self) -> u32 {
        self.consecutive_same_error
    }

    /// Signature of the last observed error.
    #[must_use]
    pub fn last_error_signature(&self) -> Option<&str> {
        self.last_error_signature.as_deref()
    }

    /// Transition history, oldest first.
    #[must_use]
    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// Snapshot of the persisted record form.
    #[must_use]
    pub fn record(&self) -> CircuitBreakerRecord {
        CircuitBreakerRecord {
            state: self.state,
            consecutive_no_progress: self.consecutive_no_progress,
            consecutive_same_error: self.consecutive_same_error,
            last_error_signature: self.last_error_signature.clone(),
            updated_at: Utc::now(),
        }
    }

    fn derive_state(&self) -> BreakerState {
        if self.consecutive_same_error >= self.same_error_halt {
            BreakerState::Open
        } else if self.consecutive_no_progress >= self.no_progress_halt {
            BreakerState::Open
        } else if self.consecutive_no_progress >= self.no_progress_warn {
            BreakerState::HalfOpen
        } else {
            BreakerState::Closed
        }
    }

    fn transition_reason(&self, files_modified: u32, had_error: bool) -> String {
        if self.consecutive_same_error >= self.same_error_halt {
            format!(
                "same error repeated {} times",
                self.consecutive_same_error
            )
        } else if files_modified > 0 {
            format!("progress detected ({} files modified)", files_modified)
        } else if had_error {
            format!(
                "no progress for {} iterations (with error)",
                self.consecutive_no_progress
            )
        } else {
            format!(
                "no progress for {} iterations",
                self.consecutive_no_progress
            )
        }
    }

    fn apply_derived_state(&mut self, loop_index: Option<u64>, reason: &str) -> Result<()> {
        let next = self.derive_state();
        if next != self.state {
            info!(
                from = %self.state,
                to = %next,
                reason,
                "Circuit breaker transition"
            );
            self.history.push(TransitionRecord {
                from: self.state,
                to: next,
                reason: reason.to_string(),
                loop_index,
                timestamp: Utc::now(),
            });
            self.trim_history();
            self.state = next;
        }

        self.persist()
    }

    fn trim_history(&mut self) {
        if self.history.len() > MAX_HISTORY_ENTRIES {
            let excess = self.history.len() - MAX_HISTORY_ENTRIES;
            self.history.drain(..excess);
        }
    }

    fn persist(&mut self) -> Result<()> {
        self.store.save(RecordKind::CircuitBreaker, &self.record())?;
        self.store
            .save(RecordKind::CircuitBreakerHistory, &self.history)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn breaker() -> CircuitBreaker<MemoryStore> {
        CircuitBreaker::new(Arc::new(MemoryStore::new()), &SupervisorConfig::default())
            .expect("breaker")
    }

    #[test]
    fn test_stagnation_walks_closed_half_open_open() {
        let mut breaker = breaker();

        assert_eq!(
            breaker.record_loop_result(1, 0, false, None).unwrap(),
            BreakerState::Closed
        );
        assert_eq!(
            breaker.record_loop_result(2, 0, false, None).unwrap(),
            BreakerState::HalfOpen
        );
        assert_eq!(
            breaker.record_loop_result(3, 0, false, None).unwrap(),
            BreakerState::Open
        );
        assert!(breaker.should_halt_execution());
        assert_eq!(breaker.halt_reason(), Some(HaltReason::Stagnation));
    }

    #[test]
    fn test_stays_open_past_threshold() {
        let mut breaker = breaker();

        for i in 1..=6u64 {
            breaker.record_loop_result(i, 0, false, None).unwrap();
        }

        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.consecutive_no_progress(), 6);
    }

    #[test]
    fn test_progress_forces_closed_from_any_state() {
        let mut breaker = breaker();

        // Drive to OPEN
        for i in 1..=3u64 {
            breaker.record_loop_result(i, 0, false, None).unwrap();
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        // One productive iteration recovers everything
        let state = breaker.record_loop_result(4, 5, false, None).unwrap();
        assert_eq!(state, BreakerState::Closed);
        assert_eq!(breaker.consecutive_no_progress(), 0);
        assert!(!breaker.should_halt_execution());
    }

    #[test]
    fn test_progress_recovers_from_half_open() {
        let mut breaker = breaker();

        breaker.record_loop_result(1, 0, false, None).unwrap();
        breaker.record_loop_result(2, 0, false, None).unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        let state = breaker.record_loop_result(3, 5, false, None).unwrap();
        assert_eq!(state, BreakerState::Closed);
    }

    #[test]
    fn test_repeated_error_opens_despite_progress() {
        let mut breaker = breaker();

        // Files change every loop, but the same failure repeats:
        // first occurrence seeds the signature, five repeats trip it.
        for i in 1..=6u64 {
            breaker
                .record_loop_result(i, 1, true, Some("sig-abc"))
                .unwrap();
        }

        assert_eq!(breaker.consecutive_same_error(), 5);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.halt_reason(), Some(HaltReason::RepeatedError));
    }

    #[test]
    fn test_differing_signature_resets_error_streak() {
        let mut breaker = breaker();

        for i in 1..=4u64 {
            breaker
                .record_loop_result(i, 1, true, Some("sig-abc"))
                .unwrap();
        }
        assert_eq!(breaker.consecutive_same_error(), 3);

        breaker
            .record_loop_result(5, 1, true, Some("sig-other"))
            .unwrap();
        assert_eq!(breaker.consecutive_same_error(), 0);
        assert_eq!(breaker.last_error_signature(), Some("sig-other"));
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_success_resets_error_streak() {
        let mut breaker = breaker();

        for i in 1..=3u64 {
            breaker
                .record_loop_result(i, 1, true, Some("sig-abc"))
                .unwrap();
        }
        assert_eq!(breaker.consecutive_same_error(), 2);

        breaker.record_loop_result(4, 1, false, None).unwrap();
        assert_eq!(breaker.consecutive_same_error(), 0);
        assert!(breaker.last_error_signature().is_none());

        // The same signature after a clean iteration starts a new streak
        breaker
            .record_loop_result(5, 1, true, Some("sig-abc"))
            .unwrap();
        assert_eq!(breaker.consecutive_same_error(), 0);
    }

    #[test]
    fn test_reset_is_idempotent_recovery() {
        let mut breaker = breaker();

        for i in 1..=3u64 {
            breaker.record_loop_result(i, 0, false, None).unwrap();
        }
        assert!(breaker.should_halt_execution());

        breaker.reset("operator request").unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.consecutive_no_progress(), 0);
        assert_eq!(breaker.consecutive_same_error(), 0);

        // Resetting an already-closed breaker keeps it closed
        breaker.reset("again").unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_reset_always_appends_history_entry() {
        let mut breaker = breaker();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.history().is_empty());

        // A reset with no state change still leaves an audit entry
        breaker.reset("operator override").unwrap();

        let history = breaker.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from, BreakerState::Closed);
        assert_eq!(history[0].to, BreakerState::Closed);
        assert!(history[0].reason.contains("operator override"));
        assert_eq!(history[0].loop_index, None);

        breaker.reset("second override").unwrap();
        assert_eq!(breaker.history().len(), 2);
    }

    #[test]
    fn test_transitions_recorded_in_history() {
        let mut breaker = breaker();

        for i in 1..=3u64 {
            breaker.record_loop_result(i, 0, false, None).unwrap();
        }
        breaker.record_loop_result(4, 2, false, None).unwrap();

        let history = breaker.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].from, BreakerState::Closed);
        assert_eq!(history[0].to, BreakerState::HalfOpen);
        assert_eq!(history[1].to, BreakerState::Open);
        assert_eq!(history[2].to, BreakerState::Closed);
        assert!(history[2].reason.contains("progress"));
        assert_eq!(history[1].loop_index, Some(3));
    }

    #[test]
    fn test_counters_persist_across_restart() {
        let store = Arc::new(MemoryStore::new());
        let config = SupervisorConfig::default();

        {
            let mut breaker = CircuitBreaker::new(Arc::clone(&store), &config).expect("breaker");
            breaker.record_loop_result(1, 0, false, None).unwrap();
            breaker.record_loop_result(2, 0, false, None).unwrap();
        }

        let restored = CircuitBreaker::new(Arc::clone(&store), &config).expect("breaker");
        assert_eq!(restored.consecutive_no_progress(), 2);
        assert_eq!(restored.state(), BreakerState::HalfOpen);
        assert_eq!(restored.history().len(), 1);
    }

    #[test]
    fn test_state_recomputed_from_counters_on_load() {
        let store = Arc::new(MemoryStore::new());
        let config = SupervisorConfig::default();

        // Simulate a crash that persisted a stale state alongside
        // counters that demand OPEN.
        store
            .save(
                RecordKind::CircuitBreaker,
                &CircuitBreakerRecord {
                    state: BreakerState::Closed,
                    consecutive_no_progress: 4,
                    consecutive_same_error: 0,
                    last_error_signature: None,
                    updated_at: Utc::now(),
                },
            )
            .unwrap();

        let breaker = CircuitBreaker::new(Arc::clone(&store), &config).expect("breaker");
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.should_halt_execution());
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let record = CircuitBreakerRecord {
            state: BreakerState::HalfOpen,
            consecutive_no_progress: 2,
            consecutive_same_error: 1,
            last_error_signature: Some("sig".to_string()),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"HALF_OPEN\""));
        let restored: CircuitBreakerRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_corrupted_record_reinitializes() {
        let store = Arc::new(MemoryStore::new());
        store.inject_raw(
            RecordKind::CircuitBreaker,
            serde_json::json!({"state": 42, "garbage": true}),
        );

        let breaker =
            CircuitBreaker::new(Arc::clone(&store), &SupervisorConfig::default()).expect("breaker");
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.consecutive_no_progress(), 0);
    }
}
