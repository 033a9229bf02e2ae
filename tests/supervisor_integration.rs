//! Full-pipeline supervisor tests over mocked collaborators.
//!
//! These exercise the analyzer, tracker, breaker, and controller
//! together, the way a real run composes them, with the agent and the
//! repository scripted.

use std::sync::Arc;

use loopguard::config::SupervisorConfig;
use loopguard::controller::{LoopController, LoopOutcome};
use loopguard::invoker::{AgentOutcome, MockAgent};
use loopguard::store::{FileStore, MemoryStore, RecordKind, StateStore};
use loopguard::vcs::MockVcs;
use tempfile::TempDir;

fn config() -> SupervisorConfig {
    SupervisorConfig {
        max_iterations: 20,
        ..SupervisorConfig::default()
    }
}

fn idle() -> AgentOutcome {
    AgentOutcome::success("Still investigating the failing module.")
}

fn done() -> AgentOutcome {
    AgentOutcome::success(
        "All tasks finished.\n\
         ---AGENT_STATUS---\n\
         STATUS: COMPLETE\n\
         TASKS_COMPLETED_THIS_LOOP: 0\n\
         FILES_MODIFIED: 0\n\
         TESTS_STATUS: PASSING\n\
         EXIT_SIGNAL: true\n\
         RECOMMENDATION: EXIT_LOOP\n\
         ---END_AGENT_STATUS---",
    )
}

fn test_only() -> AgentOutcome {
    AgentOutcome::success("Running tests...\ncargo test\nAll tests passed.")
}

#[tokio::test]
async fn test_stagnation_scenario() {
    // Three iterations without repository changes halt the run.
    let mut controller = LoopController::new(
        config(),
        MockAgent::with_outcomes(vec![idle(), idle(), idle()]),
        MockVcs::with_counts(vec![0, 0, 0]),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let summary = controller.run("work").await.unwrap();
    assert_eq!(summary.outcome, LoopOutcome::Stagnated);
    assert_eq!(summary.iterations, 3);
    assert_eq!(summary.outcome.exit_code(), 3);
}

#[tokio::test]
async fn test_error_loop_scenario() {
    // The same failure six times opens the breaker even though the
    // repository changes every iteration.
    let failure = || AgentOutcome::failure("error[E0308]: mismatched types at line 10", 101);
    let mut controller = LoopController::new(
        config(),
        MockAgent::with_outcomes((0..6).map(|_| failure()).collect()),
        MockVcs::with_counts(vec![2; 6]),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let summary = controller.run("work").await.unwrap();
    assert_eq!(summary.outcome, LoopOutcome::ErrorLoop);
    assert_eq!(summary.iterations, 6);
}

#[tokio::test]
async fn test_alternating_errors_never_trip_the_breaker() {
    // Error signatures that keep changing reset the same-error counter,
    // so the run ends at the iteration cap instead.
    let outcomes = vec![
        AgentOutcome::failure("error: type mismatch", 1),
        AgentOutcome::failure("error: missing import", 1),
        AgentOutcome::failure("error: type mismatch", 1),
        AgentOutcome::failure("error: missing import", 1),
    ];
    let supervisor_config = SupervisorConfig {
        max_iterations: 4,
        ..SupervisorConfig::default()
    };
    let mut controller = LoopController::new(
        supervisor_config,
        MockAgent::with_outcomes(outcomes),
        MockVcs::with_counts(vec![1; 4]),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let summary = controller.run("work").await.unwrap();
    assert_eq!(summary.outcome, LoopOutcome::MaxIterations);
}

#[tokio::test]
async fn test_voluntary_stop_on_done_signals() {
    let mut controller = LoopController::new(
        config(),
        MockAgent::with_outcomes(vec![
            AgentOutcome::success("made progress on the parser"),
            done(),
            done(),
        ]),
        MockVcs::with_counts(vec![3, 1, 0]),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let summary = controller.run("work").await.unwrap();
    assert_eq!(summary.outcome, LoopOutcome::Completed);
    assert_eq!(summary.iterations, 3);
    assert_eq!(summary.outcome.exit_code(), 0);
}

#[tokio::test]
async fn test_voluntary_stop_on_test_only_loops() {
    // Three consecutive iterations that only run tests with no file
    // changes read as "nothing left to build".
    let mut controller = LoopController::new(
        config(),
        MockAgent::with_outcomes(vec![
            AgentOutcome::success("implemented the feature"),
            test_only(),
            test_only(),
            test_only(),
        ]),
        MockVcs::with_counts(vec![4, 0, 0, 0]),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let summary = controller.run("work").await.unwrap();
    assert_eq!(summary.outcome, LoopOutcome::Completed);
    assert_eq!(summary.iterations, 4);
}

#[tokio::test]
async fn test_recovery_after_near_stagnation() {
    // Two idle loops, then progress resumes: the breaker closes and
    // the run continues to its natural end.
    let mut controller = LoopController::new(
        config(),
        MockAgent::with_outcomes(vec![
            idle(),
            idle(),
            AgentOutcome::success("fixed the borrow checker error"),
            done(),
            done(),
        ]),
        MockVcs::with_counts(vec![0, 0, 2, 1, 0]),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let summary = controller.run("work").await.unwrap();
    assert_eq!(summary.outcome, LoopOutcome::Completed);
    assert_eq!(summary.iterations, 5);
}

#[tokio::test]
async fn test_state_survives_supervisor_restart() {
    // Two idle iterations in a first run, then the process "restarts"
    // with the same state directory: one more idle iteration must trip
    // the breaker, because the counters came back from disk.
    let temp = TempDir::new().unwrap();
    let supervisor_config = SupervisorConfig {
        max_iterations: 2,
        ..SupervisorConfig::default()
    };

    let mut first = LoopController::new(
        supervisor_config.clone(),
        MockAgent::with_outcomes(vec![idle(), idle()]),
        MockVcs::with_counts(vec![0, 0]),
        Arc::new(FileStore::new(temp.path())),
    )
    .unwrap();
    let summary = first.run("work").await.unwrap();
    assert_eq!(summary.outcome, LoopOutcome::MaxIterations);

    let mut second = LoopController::new(
        config(),
        MockAgent::with_outcomes(vec![idle()]),
        MockVcs::with_counts(vec![0]),
        Arc::new(FileStore::new(temp.path())),
    )
    .unwrap();
    let summary = second.run("work").await.unwrap();
    assert_eq!(summary.outcome, LoopOutcome::Stagnated);
    assert_eq!(summary.iterations, 1);
}

#[tokio::test]
async fn test_restart_does_not_splice_test_only_runs() {
    // Loop indices restart at 1 every run while the windows persist.
    // Test-only loops [2, 3] left by a previous run must not combine
    // with a single test-only loop in the next run into a fake streak
    // of three and a false COMPLETED verdict.
    let temp = TempDir::new().unwrap();

    let first_config = SupervisorConfig {
        max_iterations: 3,
        ..SupervisorConfig::default()
    };
    let mut first = LoopController::new(
        first_config,
        MockAgent::with_outcomes(vec![
            AgentOutcome::success("reworking the parser"),
            test_only(),
            test_only(),
        ]),
        MockVcs::with_counts(vec![2, 0, 0]),
        Arc::new(FileStore::new(temp.path())),
    )
    .unwrap();
    let summary = first.run("work").await.unwrap();
    assert_eq!(summary.outcome, LoopOutcome::MaxIterations);

    let second_config = SupervisorConfig {
        max_iterations: 4,
        ..SupervisorConfig::default()
    };
    let mut second = LoopController::new(
        second_config,
        MockAgent::with_outcomes(vec![
            AgentOutcome::success("wiring the new module"),
            AgentOutcome::success("still wiring"),
            AgentOutcome::success("adjusting the call sites"),
            test_only(),
        ]),
        MockVcs::with_counts(vec![1, 1, 1, 0]),
        Arc::new(FileStore::new(temp.path())),
    )
    .unwrap();
    let summary = second.run("work").await.unwrap();
    assert_eq!(summary.outcome, LoopOutcome::MaxIterations);
    assert_eq!(summary.iterations, 4);
}

#[tokio::test]
async fn test_analysis_record_persisted_every_iteration() {
    let store = Arc::new(MemoryStore::new());
    let mut controller = LoopController::new(
        config(),
        MockAgent::with_outcomes(vec![done(), done()]),
        MockVcs::with_counts(vec![1, 1]),
        Arc::clone(&store),
    )
    .unwrap();

    controller.run("work").await.unwrap();

    let analysis: Option<loopguard::AnalysisResult> =
        store.load(RecordKind::Analysis).unwrap();
    let analysis = analysis.expect("analysis persisted");
    assert_eq!(analysis.loop_index, 2);
    assert!(analysis.exit_signal);
    assert!(analysis.has_structured_block);

    let breaker: Option<loopguard::CircuitBreakerRecord> =
        store.load(RecordKind::CircuitBreaker).unwrap();
    assert!(breaker.is_some());
}

#[tokio::test]
async fn test_corrupt_state_self_heals() {
    // A truncated JSON record is treated as absent; the run proceeds
    // from fresh counters instead of failing.
    let temp = TempDir::new().unwrap();
    let state_dir = temp.path().join(".loopguard");
    std::fs::create_dir_all(&state_dir).unwrap();
    std::fs::write(state_dir.join("circuit_breaker.json"), "{\"state\": \"OP").unwrap();

    let mut controller = LoopController::new(
        config(),
        MockAgent::with_outcomes(vec![done(), done()]),
        MockVcs::with_counts(vec![1, 1]),
        Arc::new(FileStore::new(temp.path())),
    )
    .unwrap();

    let summary = controller.run("work").await.unwrap();
    assert_eq!(summary.outcome, LoopOutcome::Completed);
}
