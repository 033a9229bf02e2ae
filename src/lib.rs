//! Loopguard - Autonomous Agent Loop Supervisor
//!
//! Supervises a long-running autonomous coding agent that is invoked
//! repeatedly in a loop, deciding after every iteration whether to
//! continue, stop because the work is done, or halt because the agent
//! is stuck. Progress is measured from version control, never from
//! what the agent claims.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`analyzer`] - Per-iteration output classification and confidence scoring
//! - [`breaker`] - Three-state circuit breaker over progress and error counters
//! - [`config`] - Configuration loading, env overrides, and validation
//! - [`controller`] - The supervised loop itself and terminal outcome classification
//! - [`error`] - Custom error types and handling
//! - [`invoker`] - Bounded agent invocation (traits, process runner, mocks)
//! - [`store`] - Persistent supervisor state under `.loopguard/`
//! - [`tracker`] - Rolling windows of exit signals across recent iterations
//! - [`vcs`] - Repository-derived progress measurement
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use loopguard::config::SupervisorConfig;
//! use loopguard::controller::LoopController;
//! use loopguard::invoker::ProcessInvoker;
//! use loopguard::store::FileStore;
//! use loopguard::vcs::GitStatus;
//!
//! let config = SupervisorConfig::load(".")?;
//! let agent = ProcessInvoker::new("claude", ".");
//! let vcs = GitStatus::new(".")?;
//! let store = Arc::new(FileStore::new("."));
//!
//! let mut controller = LoopController::new(config, agent, vcs, store)?;
//! let summary = controller.run("continue the work").await?;
//! println!("{}", summary.outcome);
//! ```

pub mod analyzer;
pub mod breaker;
pub mod config;
pub mod controller;
pub mod error;
pub mod invoker;
pub mod ratelimit;
pub mod store;
pub mod tracker;
pub mod vcs;
pub mod window;

// Re-export commonly used types
pub use error::{LoopguardError, Result};

// Re-export config types
pub use config::{SupervisorConfig, CONFIG_FILENAME};

// Re-export analysis types
pub use analyzer::{AnalysisResult, ResponseAnalyzer};

// Re-export breaker types
pub use breaker::{BreakerState, CircuitBreaker, CircuitBreakerRecord, HaltReason};

// Re-export controller types
pub use controller::{LoopController, LoopIteration, LoopOutcome, RunSummary};

// Re-export invocation seam
pub use invoker::{AgentInvoker, AgentOutcome, MockAgent, ProcessInvoker};

// Re-export persistence seam
pub use store::{FileStore, MemoryStore, RecordKind, StateStore, STATE_DIR};

// Re-export tracker types
pub use tracker::{ExitSignalState, ExitSignalTracker};

// Re-export VCS seam
pub use vcs::{GitStatus, MockVcs, VcsStatus};
