//! Binary entry point for the `sortie` CLI.

use std::env;
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr};
use std::process;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tracing::info;

use sortie::backend::BackendError;
use sortie::remote::Dialer;
use sortie::telemetry::{default_level, init_tracing};
use sortie::test_support::{ScriptedBackend, ScriptedDialer, instance};
use sortie::{
    Backend, CommandFileError, CommandRequest, CommandResult, ConfigError, Credential,
    CredentialError, InstanceRequest, Provisioner, RemoteError, RemoteExecutor, RunOrchestrator,
    ScalewayBackend, ScalewayBackendError, ScalewayConfig, SessionConfig, Ssh2Dialer,
    load_commands,
};

mod cli;

use cli::Cli;

/// Replaces the control plane and SSH transport with scripted doubles.
const FAKE_RUN_MODE_ENV: &str = "SORTIE_FAKE_RUN_MODE";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("command file error: {0}")]
    Commands(#[from] CommandFileError),
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),
    #[error("backend error: {0}")]
    Backend(#[from] ScalewayBackendError),
    #[error("remote setup error: {0}")]
    Remote(#[from] RemoteError),
    #[error("invalid instance request: {0}")]
    Request(#[from] BackendError),
    #[error("run failed: {0}")]
    Run(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json, default_level(cli.verbose));

    let exit_code = match dispatch(&cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: &Cli) -> Result<(), CliError> {
    let mut session = SessionConfig::load_without_cli_args()?;
    apply_overrides(&mut session, cli);
    session.validate()?;

    let commands = load_commands(Utf8Path::new(&session.command_file))?;
    info!(count = commands.len(), path = %session.command_file, "loaded commands");

    if let Ok(mode) = env::var(FAKE_RUN_MODE_ENV) {
        return run_fake(&session, commands, &mode).await;
    }

    let backend = ScalewayBackend::new(ScalewayConfig::load_without_cli_args()?)?;
    let request = backend.default_request()?;
    let credential = Credential::load(session.ssh_user.clone(), &session.pem_path()?)?;

    let provisioner = Provisioner::new(backend, request).with_wait_policy(session.wait_policy());
    let executor = RemoteExecutor::new(Ssh2Dialer, credential, session.retry_policy())?
        .with_port(session.socket_port());
    let orchestrator = RunOrchestrator::new(provisioner, executor)
        .with_failure_policy(session.failure_policy());
    execute(&orchestrator, commands).await
}

fn apply_overrides(session: &mut SessionConfig, cli: &Cli) {
    if let Some(path) = &cli.commands {
        session.command_file.clone_from(path);
    }
    if cli.keep_going {
        session.keep_going = true;
    }
}

async fn execute<B, D>(
    orchestrator: &RunOrchestrator<B, D>,
    commands: Vec<CommandRequest>,
) -> Result<(), CliError>
where
    B: Backend,
    D: Dialer + Send + Sync + 'static,
{
    orchestrator
        .execute(commands, |result| write_result(io::stdout(), result))
        .await
        .map(|_| ())
        .map_err(|err| CliError::Run(err.to_string()))
}

/// Runs against an in-process instance that echoes each command.
/// `fail-first` makes the first command exit with status 1.
async fn run_fake(
    session: &SessionConfig,
    commands: Vec<CommandRequest>,
    mode: &str,
) -> Result<(), CliError> {
    let backend = ScriptedBackend::new();
    backend.push_listing(vec![instance(
        "fake-instance",
        "running",
        Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
    )]);
    let dialer = ScriptedDialer::new();
    for (index, command) in commands.iter().enumerate() {
        let status = i32::from(mode == "fail-first" && index == 0);
        dialer.push_output(format!("{command}: done\n"), status);
    }

    let request = InstanceRequest::builder()
        .image_label("fake-image")
        .instance_type("fake-type")
        .zone("fr-par-1")
        .project_id("fake-project")
        .architecture("x86_64")
        .key_name("fake-key")
        .build()?;
    let provisioner = Provisioner::new(backend, request).with_wait_policy(session.wait_policy());
    let executor = RemoteExecutor::new(
        dialer,
        Credential::new(session.ssh_user.clone(), String::new()),
        session.retry_policy(),
    )?
    .with_port(session.socket_port());
    let orchestrator = RunOrchestrator::new(provisioner, executor)
        .with_failure_policy(session.failure_policy());
    execute(&orchestrator, commands).await
}

fn write_result(mut target: impl Write, result: &CommandResult) {
    writeln!(target, "\n> {}", result.command).ok();
    target.write_all(result.output.as_bytes()).ok();
    if !result.output.is_empty() && !result.output.ends_with('\n') {
        writeln!(target).ok();
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "error: {err}").ok();
}
