//! Loop orchestration.
//!
//! One iteration is a fixed pipeline: invoke the agent under its
//! deadline, ask the VCS collaborator how many files changed, analyze
//! the output, update the exit-signal tracker, record into the circuit
//! breaker, then combine the verdicts into continue-or-stop. Analysis
//! and state updates for iteration N are persisted before iteration
//! N+1 begins; there is no batching across iterations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::analyzer::ResponseAnalyzer;
use crate::breaker::{CircuitBreaker, HaltReason};
use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::invoker::AgentInvoker;
use crate::ratelimit::HourlyRateLimiter;
use crate::store::StateStore;
use crate::tracker::ExitSignalTracker;
use crate::vcs::VcsStatus;

/// Terminal classification of a supervised run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The work looks done (voluntary stop).
    Completed,
    /// Breaker opened on consecutive no-progress iterations.
    Stagnated,
    /// Breaker opened on a repeated identical error.
    ErrorLoop,
    /// Hourly invocation budget exhausted.
    RateLimited,
    /// Iteration cap reached without completion.
    MaxIterations,
    /// Operator interrupted the run between iterations.
    Cancelled,
}

impl std::fmt::Display for LoopOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "COMPLETED"),
            Self::Stagnated => write!(f, "STAGNATED"),
            Self::ErrorLoop => write!(f, "ERROR_LOOP"),
            Self::RateLimited => write!(f, "RATE_LIMITED"),
            Self::MaxIterations => write!(f, "MAX_ITERATIONS"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl LoopOutcome {
    /// Whether this outcome means the supervised work succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Stagnated => 3,
            Self::ErrorLoop => 4,
            Self::RateLimited => 5,
            Self::MaxIterations => 6,
            Self::Cancelled => 130,
        }
    }
}

/// Record of one loop pass. Created by the controller, read-only after.
#[derive(Debug, Clone)]
pub struct LoopIteration {
    /// 1-based iteration index.
    pub index: u64,
    /// Raw agent output (stdout).
    pub output: String,
    /// Wall-clock duration of the agent invocation.
    pub duration: std::time::Duration,
    /// Files modified, from the VCS collaborator.
    pub files_modified: u32,
    /// Whether the invocation failed or timed out.
    pub had_error: bool,
    /// Error text (stderr), when present.
    pub error_text: Option<String>,
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Terminal classification.
    pub outcome: LoopOutcome,
    /// Iterations executed.
    pub iterations: u32,
    /// Unique id for this supervised run.
    pub session_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    /// Total wall-clock duration.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Drives the supervised loop: one agent invocation in flight at a
/// time, strictly sequential.
pub struct LoopController<A, V, S>
where
    A: AgentInvoker,
    V: VcsStatus,
    S: StateStore,
{
    config: SupervisorConfig,
    agent: A,
    vcs: V,
    analyzer: ResponseAnalyzer<S>,
    tracker: ExitSignalTracker<S>,
    breaker: CircuitBreaker<S>,
    limiter: HourlyRateLimiter,
    cancel: Arc<AtomicBool>,
    session_id: String,
}

impl<A, V, S> LoopController<A, V, S>
where
    A: AgentInvoker,
    V: VcsStatus,
    S: StateStore,
{
    /// Create a controller over the given collaborators, restoring any
    /// persisted supervisor state from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if persisted state cannot be accessed.
    pub fn new(config: SupervisorConfig, agent: A, vcs: V, store: Arc<S>) -> Result<Self> {
        let analyzer = ResponseAnalyzer::new(Arc::clone(&store))?;
        let tracker = ExitSignalTracker::new(Arc::clone(&store), config.signal_window_capacity)?;
        let breaker = CircuitBreaker::new(Arc::clone(&store), &config)?;
        let limiter = HourlyRateLimiter::new(config.max_calls_per_hour);

        Ok(Self {
            config,
            agent,
            vcs,
            analyzer,
            tracker,
            breaker,
            limiter,
            cancel: Arc::new(AtomicBool::new(false)),
            session_id: Uuid::new_v4().to_string(),
        })
    }

    /// Flag checked at the iteration boundary; set it to request a
    /// cooperative stop. An in-flight agent call is bounded by its own
    /// timeout, not preempted.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Access the breaker (operator introspection and reset).
    #[must_use]
    pub fn breaker(&mut self) -> &mut CircuitBreaker<S> {
        &mut self.breaker
    }

    /// Run the supervised loop with the given prompt.
    ///
    /// # Errors
    ///
    /// Returns an error only for unrecoverable conditions (missing
    /// agent binary, irrecoverable store failures). Agent failures,
    /// timeouts, and halts are classified in the returned summary.
    pub async fn run(&mut self, prompt: &str) -> Result<RunSummary> {
        let started_at = Utc::now();
        info!(session_id = %self.session_id, "Starting supervised loop");

        let mut iterations = 0u32;
        let mut outcome = LoopOutcome::MaxIterations;

        for index in 1..=u64::from(self.config.max_iterations) {
            if self.cancel.load(Ordering::SeqCst) {
                info!("Cancellation requested, stopping at loop boundary");
                outcome = LoopOutcome::Cancelled;
                break;
            }

            if !self.limiter.try_acquire(Utc::now()) {
                warn!(
                    max_calls_per_hour = self.limiter.max_calls_per_hour(),
                    "Hourly invocation budget exhausted"
                );
                outcome = LoopOutcome::RateLimited;
                break;
            }

            let iteration = self.run_iteration(index, prompt).await?;
            iterations += 1;

            if let Some(terminal) = self.classify(&iteration)? {
                outcome = terminal;
                break;
            }
        }

        let summary = RunSummary {
            outcome,
            iterations,
            session_id: self.session_id.clone(),
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            outcome = %summary.outcome,
            iterations = summary.iterations,
            "Supervised loop finished"
        );

        Ok(summary)
    }

    async fn run_iteration(&mut self, index: u64, prompt: &str) -> Result<LoopIteration> {
        let start = Instant::now();

        let agent_outcome = match self.agent.run(prompt).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_recoverable() => {
                // Invocation failures feed the repeated-error trigger
                // instead of crashing the controller
                warn!("Agent invocation failed: {}", e);
                crate::invoker::AgentOutcome::failure(e.to_string(), -1)
            }
            Err(e) => return Err(e),
        };

        let files_modified = match self.vcs.modified_file_count() {
            Ok(count) => count,
            Err(e) => {
                warn!("Could not read VCS status, assuming no progress: {}", e);
                0
            }
        };

        let iteration = LoopIteration {
            index,
            output: agent_outcome.stdout.clone(),
            duration: start.elapsed(),
            files_modified,
            had_error: agent_outcome.had_error(),
            error_text: if agent_outcome.stderr.is_empty() {
                None
            } else {
                Some(agent_outcome.stderr.clone())
            },
        };

        let analysis = self
            .analyzer
            .analyze(&iteration.output, index, files_modified)?;
        self.tracker.update(&analysis, index)?;

        let signature = agent_outcome.error_signature();
        self.breaker.record_loop_result(
            index,
            files_modified,
            iteration.had_error,
            signature.as_deref(),
        )?;

        if let Err(e) = self.vcs.checkpoint() {
            warn!("Could not checkpoint VCS state: {}", e);
        }

        info!(
            loop_index = index,
            files_modified,
            had_error = iteration.had_error,
            confidence = analysis.confidence_score,
            breaker = %self.breaker.state(),
            duration_ms = iteration.duration.as_millis() as u64,
            "Iteration finished"
        );

        Ok(iteration)
    }

    // Voluntary stop is checked before the breaker: an agent that only
    // reruns a passing suite makes no repository progress either, and
    // "the work looks done" is the more truthful verdict of the two.
    fn classify(&self, iteration: &LoopIteration) -> Result<Option<LoopOutcome>> {
        if self.tracker.recommends_stop(&self.config) {
            info!(
                loop_index = iteration.index,
                "Exit signals recommend a voluntary stop"
            );
            return Ok(Some(LoopOutcome::Completed));
        }

        if self.breaker.should_halt_execution() {
            let outcome = match self.breaker.halt_reason() {
                Some(HaltReason::RepeatedError) => LoopOutcome::ErrorLoop,
                _ => LoopOutcome::Stagnated,
            };
            warn!(
                loop_index = iteration.index,
                outcome = %outcome,
                "Circuit breaker open, halting"
            );
            return Ok(Some(outcome));
        }

        Ok(None)
    }
}
