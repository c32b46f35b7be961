//! BDD step definitions for the `sortie` run workflow.

use std::net::IpAddr;

use rstest_bdd_macros::{given, then, when};
use sortie::FailurePolicy;
use sortie::test_support::{ScriptedDial, instance};
use tokio::runtime::Runtime;

use super::test_helpers::{MAX_ATTEMPTS, RunContext, RunOutcome};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("invalid scenario input: {0}")]
    Input(String),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn parse_ip(address: &str) -> Result<IpAddr, StepError> {
    address
        .parse()
        .map_err(|err| StepError::Input(format!("{address}: {err}")))
}

fn split_list(list: &str) -> Vec<String> {
    list.split(';').map(str::to_owned).collect()
}

#[given("a running instance at \"{address}\"")]
fn running_instance(run_context: RunContext, address: String) -> Result<RunContext, StepError> {
    let ip = parse_ip(&address)?;
    run_context
        .backend
        .push_listing(vec![instance("srv-running", "running", Some(ip))]);
    Ok(run_context)
}

#[given("no running instance")]
fn no_running_instance(run_context: RunContext) -> RunContext {
    run_context
        .backend
        .push_listing(vec![instance("srv-stopped", "stopped", None)]);
    run_context
}

#[given("the new instance becomes running at \"{address}\"")]
fn new_instance_boots(run_context: RunContext, address: String) -> Result<RunContext, StepError> {
    let ip = parse_ip(&address)?;
    run_context
        .backend
        .push_describe(Some(instance("scripted-id", "starting", None)));
    run_context
        .backend
        .set_default_describe(Some(instance("scripted-id", "running", Some(ip))));
    Ok(run_context)
}

#[given("the control plane rejects creation")]
fn creation_rejected(run_context: RunContext) -> RunContext {
    run_context.backend.fail_on_create();
    run_context
}

#[given("the first \"{count}\" connection attempts are refused")]
fn refused_attempts(run_context: RunContext, count: u32) -> RunContext {
    for attempt in 1..=count {
        run_context.dialer.push_dial(ScriptedDial::Refuse(format!(
            "connection refused (attempt {attempt})"
        )));
    }
    run_context
}

#[given("the key is rejected")]
fn key_rejected(run_context: RunContext) -> RunContext {
    run_context
        .dialer
        .push_dial(ScriptedDial::RejectKey(String::from("publickey denied")));
    run_context
}

#[given("the remote prints \"{output}\" for the next command")]
fn remote_prints(run_context: RunContext, output: String) -> RunContext {
    run_context.dialer.push_output(format!("{output}\n"), 0);
    run_context
}

#[given("the remote exits with status \"{status}\" for the next command")]
fn remote_fails(run_context: RunContext, status: i32) -> RunContext {
    run_context.dialer.push_output(String::new(), status);
    run_context
}

#[given("the failure policy is keep-going")]
fn keep_going(run_context: RunContext) -> RunContext {
    run_context.set_policy(FailurePolicy::Continue);
    run_context
}

#[when("I run the commands \"{commands}\"")]
fn run_commands(run_context: RunContext, commands: String) -> Result<RunContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let orchestrator = run_context.orchestrator();
    let requests = split_list(&commands)
        .into_iter()
        .map(sortie::CommandRequest::new)
        .collect();

    let result = runtime.block_on(async move { orchestrator.execute(requests, |_| {}).await });

    run_context.set_outcome(match result {
        Ok(report) => RunOutcome::Success {
            address: report.instance.public_ip,
            outputs: report
                .results
                .into_iter()
                .map(|result| result.output.trim_end().to_owned())
                .collect(),
        },
        Err(err) => RunOutcome::Failure(err.to_string()),
    });
    Ok(run_context)
}

fn success(run_context: &RunContext) -> Result<(IpAddr, Vec<String>), StepError> {
    match run_context.outcome() {
        Some(RunOutcome::Success { address, outputs }) => Ok((address, outputs)),
        Some(RunOutcome::Failure(message)) => Err(StepError::Assertion(format!(
            "run failed unexpectedly: {message}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

fn expect_count(what: &str, actual: u32, expected: u32) -> Result<(), StepError> {
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected} {what}, got {actual}"
        )))
    }
}

#[then("the run succeeds")]
fn run_succeeds(run_context: &RunContext) -> Result<(), StepError> {
    success(run_context).map(|_| ())
}

#[then("the run fails with \"{message}\"")]
fn run_fails(run_context: &RunContext, message: String) -> Result<(), StepError> {
    match run_context.outcome() {
        Some(RunOutcome::Failure(actual)) if actual.contains(&message) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected failure containing '{message}', got {other:?}"
        ))),
    }
}

#[then("the captured outputs are \"{outputs}\"")]
fn captured_outputs(run_context: &RunContext, outputs: String) -> Result<(), StepError> {
    let (_, actual) = success(run_context)?;
    let expected = split_list(&outputs);
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected outputs {expected:?}, got {actual:?}"
        )))
    }
}

#[then("the commands ran on \"{address}\"")]
fn ran_on(run_context: &RunContext, address: String) -> Result<(), StepError> {
    let expected = parse_ip(&address)?;
    let (actual, _) = success(run_context)?;
    let dialled = run_context.dialer.addresses();
    if actual == expected && dialled.iter().all(|addr| addr.ip() == expected) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected}, ran on {actual} after dialling {dialled:?}"
        )))
    }
}

#[then("\"{count}\" instances were created")]
fn instances_created(run_context: &RunContext, count: u32) -> Result<(), StepError> {
    expect_count("creations", run_context.backend.create_calls(), count)
}

#[then("\"{count}\" connection attempts were made")]
fn connection_attempts(run_context: &RunContext, count: u32) -> Result<(), StepError> {
    if count > MAX_ATTEMPTS {
        return Err(StepError::Input(format!(
            "scenarios allow at most {MAX_ATTEMPTS} attempts"
        )));
    }
    expect_count("connection attempts", run_context.dialer.dial_calls(), count)
}

#[then("\"{count}\" commands were executed")]
fn commands_executed(run_context: &RunContext, count: u32) -> Result<(), StepError> {
    let executed = u32::try_from(run_context.dialer.executed().len())
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    expect_count("executed commands", executed, count)
}
