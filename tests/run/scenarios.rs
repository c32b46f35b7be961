//! BDD scenarios for the run workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{RunContext, run_context};

#[scenario(
    path = "tests/features/run.feature",
    name = "Reuse a running instance and capture output in order"
)]
fn scenario_reuse_running_instance(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Create an instance when none is running"
)]
fn scenario_create_instance(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Wait for the SSH daemon on a fresh instance"
)]
fn scenario_wait_for_ssh_daemon(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Give up when the SSH daemon never answers"
)]
fn scenario_connect_gives_up(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Do not retry a rejected key"
)]
fn scenario_rejected_key(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Stop at the first failing command"
)]
fn scenario_abort_on_failure(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Keep going after a failing command"
)]
fn scenario_keep_going(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Creation rejected by the control plane"
)]
fn scenario_creation_rejected(run_context: RunContext) {
    let _ = run_context;
}
