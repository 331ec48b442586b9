// tests/flow_state.rs

use std::error::Error;

use monoflow::engine::{FlowState, StatusEvent, Transition, aggregate_step_result};
use monoflow::errors::MonoflowError;
use monoflow::status::{
    ErrorInfo, ExecutionStatus, Status, StepResult, combine_statuses,
};
use monoflow_test_utils::builders::{RepoBuilder, steps_graph};

type TestResult = Result<(), Box<dyn Error>>;

/// Two steps (`build` then `test`) over two independent packages.
fn two_by_two() -> FlowState {
    let hashed = RepoBuilder::new()
        .package("alpha", &[])
        .package("beta", &[])
        .hash();
    let steps = steps_graph(&[("build", &[]), ("test", &[0])]);
    FlowState::new(&steps, &hashed.artifacts)
}

fn passed() -> StepResult {
    StepResult::done(Status::Passed, 5)
}

#[test]
fn status_severity_order() {
    assert!(Status::Failed > Status::SkippedAsFailed);
    assert!(Status::SkippedAsFailed > Status::SkippedAsPassed);
    assert!(Status::SkippedAsPassed > Status::Passed);

    assert_eq!(
        combine_statuses([Status::Passed, Status::SkippedAsFailed, Status::SkippedAsPassed]),
        Status::SkippedAsFailed
    );
    assert_eq!(combine_statuses(Vec::new()), Status::SkippedAsPassed);
    assert!(Status::Failed.is_failure());
    assert!(!Status::SkippedAsPassed.is_failure());
}

#[test]
fn step_result_serializes_with_execution_status_tag() -> TestResult {
    let value = serde_json::to_value(StepResult::done(Status::SkippedAsPassed, 3))?;
    assert_eq!(value["executionStatus"], "done");
    assert_eq!(value["status"], "skippedAsPassed");
    assert_eq!(value["durationMs"], 3);

    let value = serde_json::to_value(StepResult::Scheduled)?;
    assert_eq!(value["executionStatus"], "scheduled");
    Ok(())
}

#[test]
fn new_state_is_all_scheduled() {
    let state = two_by_two();
    assert_eq!(state.by_step().len(), 2);
    assert_eq!(state.by_artifact().len(), 2);
    for row in state.by_step() {
        assert_eq!(row.step_result, StepResult::Scheduled);
        assert!(row.artifacts_result.iter().all(|c| *c == StepResult::Scheduled));
    }
    assert!(!state.is_complete());
    assert_eq!(state.unfinished_steps(), vec!["build", "test"]);
}

#[test]
fn cells_move_forward_only() -> TestResult {
    let mut state = two_by_two();

    assert_eq!(
        state.apply(&StatusEvent::cell(0, 0, StepResult::Running))?,
        Transition::Applied
    );
    assert_eq!(state.apply(&StatusEvent::cell(0, 0, passed()))?, Transition::Applied);

    // Regressions and duplicates leave the cell untouched.
    assert!(matches!(
        state.apply(&StatusEvent::cell(0, 0, StepResult::Running))?,
        Transition::Ignored(_)
    ));
    assert!(matches!(
        state.apply(&StatusEvent::cell(
            0,
            0,
            StepResult::aborted(Status::SkippedAsFailed, vec![], vec![])
        ))?,
        Transition::Ignored(_)
    ));
    assert_eq!(state.cell(0, 0), Some(&passed()));
    Ok(())
}

#[test]
fn scheduled_can_jump_straight_to_aborted() -> TestResult {
    let mut state = two_by_two();
    let aborted = StepResult::aborted(Status::SkippedAsPassed, vec!["cached".into()], vec![]);
    assert_eq!(
        state.apply(&StatusEvent::cell(1, 1, aborted.clone()))?,
        Transition::Applied
    );
    assert_eq!(state.cell(1, 1), Some(&aborted));
    Ok(())
}

#[test]
fn by_artifact_view_mirrors_by_step() -> TestResult {
    let mut state = two_by_two();
    state.apply(&StatusEvent::cell(1, 0, StepResult::Running))?;
    state.apply(&StatusEvent::cell(0, 1, passed()))?;

    for row in state.by_step() {
        for (artifact_index, cell) in row.artifacts_result.iter().enumerate() {
            assert_eq!(
                &state.by_artifact()[artifact_index].steps_result[row.step_index],
                cell
            );
        }
    }
    assert_eq!(state.by_artifact()[0].artifact_name, "alpha");
    Ok(())
}

#[test]
fn aggregate_requires_terminal_cells() -> TestResult {
    let mut state = two_by_two();
    state.apply(&StatusEvent::cell(0, 0, passed()))?;

    let err = state
        .apply(&StatusEvent::step(0, StepResult::done(Status::Passed, 1)))
        .unwrap_err();
    assert!(matches!(err, MonoflowError::InvariantViolation(_)), "got {err:?}");
    Ok(())
}

#[test]
fn done_aggregate_needs_a_done_cell() -> TestResult {
    let mut state = two_by_two();
    let skipped = StepResult::aborted(Status::SkippedAsPassed, vec![], vec![]);
    state.apply(&StatusEvent::cell(0, 0, skipped.clone()))?;
    state.apply(&StatusEvent::cell(0, 1, skipped))?;

    let err = state
        .apply(&StatusEvent::step(0, StepResult::done(Status::SkippedAsPassed, 1)))
        .unwrap_err();
    assert!(matches!(err, MonoflowError::InvariantViolation(_)), "got {err:?}");
    Ok(())
}

#[test]
fn aborted_aggregate_forbids_done_cells() -> TestResult {
    let mut state = two_by_two();
    state.apply(&StatusEvent::cell(0, 0, passed()))?;
    state.apply(&StatusEvent::cell(
        0,
        1,
        StepResult::aborted(Status::SkippedAsPassed, vec![], vec![]),
    ))?;

    let err = state
        .apply(&StatusEvent::step(
            0,
            StepResult::aborted(Status::SkippedAsPassed, vec![], vec![]),
        ))
        .unwrap_err();
    assert!(matches!(err, MonoflowError::InvariantViolation(_)), "got {err:?}");
    Ok(())
}

#[test]
fn aggregate_cannot_understate_its_cells() -> TestResult {
    let mut state = two_by_two();
    state.apply(&StatusEvent::cell(0, 0, passed()))?;
    state.apply(&StatusEvent::cell(0, 1, StepResult::done(Status::Failed, 2)))?;

    let err = state
        .apply(&StatusEvent::step(0, StepResult::done(Status::Passed, 3)))
        .unwrap_err();
    assert!(matches!(err, MonoflowError::InvariantViolation(_)), "got {err:?}");
    Ok(())
}

#[test]
fn cells_are_frozen_once_the_step_is_terminal() -> TestResult {
    let mut state = two_by_two();
    state.apply(&StatusEvent::cell(0, 0, passed()))?;
    state.apply(&StatusEvent::cell(0, 1, passed()))?;
    state.apply(&StatusEvent::step(0, StepResult::done(Status::Passed, 3)))?;

    // A duplicate terminal cell is ignored, not an error.
    assert!(matches!(
        state.apply(&StatusEvent::cell(0, 1, StepResult::done(Status::Failed, 1)))?,
        Transition::Ignored(_)
    ));
    Ok(())
}

#[test]
fn unknown_indexes_are_invariant_violations() {
    let mut state = two_by_two();
    assert!(matches!(
        state.apply(&StatusEvent::step(7, StepResult::Running)),
        Err(MonoflowError::InvariantViolation(_))
    ));
    assert!(matches!(
        state.apply(&StatusEvent::cell(0, 9, StepResult::Running)),
        Err(MonoflowError::InvariantViolation(_))
    ));
}

#[test]
fn completion_and_combined_status() -> TestResult {
    let mut state = two_by_two();
    for step in 0..2 {
        for artifact in 0..2 {
            state.apply(&StatusEvent::cell(step, artifact, passed()))?;
        }
    }
    state.apply(&StatusEvent::step(0, StepResult::done(Status::Passed, 1)))?;
    assert!(!state.is_complete());

    state.apply(&StatusEvent::step(1, StepResult::done(Status::SkippedAsFailed, 1)))?;
    assert!(state.is_complete());
    assert!(state.unfinished_steps().is_empty());
    assert_eq!(state.combined_status(), Status::SkippedAsFailed);
    Ok(())
}

#[test]
fn aggregate_is_done_when_any_cell_ran() -> TestResult {
    let cells = vec![
        passed(),
        StepResult::aborted(Status::SkippedAsFailed, vec![], vec![]),
    ];
    let result = aggregate_step_result(&cells, 10, vec![], vec![])?;

    assert_eq!(result.execution_status(), ExecutionStatus::Done);
    assert_eq!(result.status(), Some(Status::SkippedAsFailed));
    Ok(())
}

#[test]
fn aggregate_is_aborted_when_nothing_ran() -> TestResult {
    let cells = vec![
        StepResult::aborted(Status::SkippedAsPassed, vec![], vec![]),
        StepResult::aborted(Status::SkippedAsFailed, vec![], vec![]),
    ];
    let result = aggregate_step_result(&cells, 10, vec![], vec![])?;

    assert_eq!(result.execution_status(), ExecutionStatus::Aborted);
    assert_eq!(result.status(), Some(Status::SkippedAsFailed));
    Ok(())
}

#[test]
fn step_errors_fail_a_done_aggregate() -> TestResult {
    let result = aggregate_step_result(
        &[passed()],
        10,
        vec![],
        vec![ErrorInfo::new("after hook failed")],
    )?;
    assert_eq!(result.status(), Some(Status::Failed));
    assert_eq!(result.errors().len(), 1);
    Ok(())
}

#[test]
fn aggregate_of_no_cells_is_skipped_as_passed() -> TestResult {
    let result = aggregate_step_result(&[], 0, vec![], vec![])?;
    assert_eq!(result.execution_status(), ExecutionStatus::Aborted);
    assert_eq!(result.status(), Some(Status::SkippedAsPassed));
    Ok(())
}

#[test]
fn aggregate_rejects_pending_cells() {
    let err = aggregate_step_result(&[StepResult::Running], 0, vec![], vec![]).unwrap_err();
    assert!(matches!(err, MonoflowError::InvariantViolation(_)));
}
