//! Tests for configuration loading and validation.

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use sortie::test_support::EnvGuard;
use sortie::{ConfigError, FailurePolicy, ScalewayConfig, SessionConfig};

#[fixture]
fn valid_config() -> ScalewayConfig {
    ScalewayConfig {
        access_key: Some(String::from("SCWACCESSKEYEXAMPLE")),
        secret_key: String::from("SCWSECRETKEYEXAMPLE"),
        default_organization_id: None,
        default_project_id: String::from("11111111-2222-3333-4444-555555555555"),
        default_zone: String::from("fr-par-1"),
        default_instance_type: String::from("DEV1-S"),
        default_image: String::from("Ubuntu 24.04 Noble Numbat"),
        default_architecture: String::from("x86_64"),
        ssh_key_name: String::from("grader"),
        security_group_id: None,
    }
}

#[rstest]
#[case::secret(|c: &mut ScalewayConfig| c.secret_key.clear(), "SCW_SECRET_KEY", "secret_key")]
#[case::project(|c: &mut ScalewayConfig| c.default_project_id.clear(), "SCW_DEFAULT_PROJECT_ID", "default_project_id")]
#[case::image(|c: &mut ScalewayConfig| c.default_image.clear(), "SCW_DEFAULT_IMAGE", "default_image")]
#[case::instance_type(|c: &mut ScalewayConfig| c.default_instance_type.clear(), "SCW_DEFAULT_INSTANCE_TYPE", "default_instance_type")]
#[case::zone(|c: &mut ScalewayConfig| c.default_zone.clear(), "SCW_DEFAULT_ZONE", "default_zone")]
#[case::architecture(|c: &mut ScalewayConfig| c.default_architecture.clear(), "SCW_DEFAULT_ARCHITECTURE", "default_architecture")]
#[case::ssh_key(|c: &mut ScalewayConfig| c.ssh_key_name = String::from("  "), "SCW_SSH_KEY_NAME", "ssh_key_name")]
fn validation_errors_name_env_var_and_key(
    valid_config: ScalewayConfig,
    #[case] mutate: fn(&mut ScalewayConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let error = cfg.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(message.contains(env_var), "missing env var: {message}");
    assert!(message.contains(toml_key), "missing TOML key: {message}");
    assert!(message.contains("sortie.toml"), "missing config file: {message}");
}

#[rstest]
fn blank_security_group_is_invalid(valid_config: ScalewayConfig) {
    let cfg = ScalewayConfig {
        security_group_id: Some(String::from(" ")),
        ..valid_config
    };
    assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
}

#[rstest]
fn as_request_carries_every_field(valid_config: ScalewayConfig) {
    let cfg = ScalewayConfig {
        security_group_id: Some(String::from("sg-1")),
        default_organization_id: Some(String::from("org-1")),
        ..valid_config
    };

    let request = cfg.as_request().expect("request should build");

    assert_eq!(request.image_label, "Ubuntu 24.04 Noble Numbat");
    assert_eq!(request.instance_type, "DEV1-S");
    assert_eq!(request.zone, "fr-par-1");
    assert_eq!(request.project_id, "11111111-2222-3333-4444-555555555555");
    assert_eq!(request.organisation_id.as_deref(), Some("org-1"));
    assert_eq!(request.architecture, "x86_64");
    assert_eq!(request.key_name, "grader");
    assert_eq!(request.security_group_id.as_deref(), Some("sg-1"));
}

#[tokio::test]
async fn session_config_loads_defaults_and_env_overrides() {
    let _guard = EnvGuard::set_vars(&[
        ("SORTIE_CONFIG_PATH", None),
        ("SORTIE_SSH_USER", Some("ubuntu")),
        ("SORTIE_CONNECT_ATTEMPTS", Some("2")),
        ("SORTIE_KEEP_GOING", None),
        ("SORTIE_COMMAND_FILE", None),
    ])
    .await;

    let session = SessionConfig::load_without_cli_args().expect("session config should load");

    assert_eq!(session.ssh_user, "ubuntu");
    assert_eq!(session.connect_attempts, 2);
    assert_eq!(session.ssh_port, 22);
    assert_eq!(session.command_file, "cmd");
    assert_eq!(session.failure_policy(), FailurePolicy::Abort);
    assert_eq!(session.ready_timeout_secs, 600);
}

#[tokio::test]
async fn pem_path_falls_back_to_environment() {
    let _guard = EnvGuard::set_vars(&[
        ("SORTIE_CONFIG_PATH", None),
        ("SORTIE_PEM_PATH", None),
        ("PEM_PATH", Some("/keys/grader.pem")),
    ])
    .await;

    let session = SessionConfig::load_without_cli_args().expect("session config should load");

    assert_eq!(
        session.pem_path().expect("PEM_PATH should resolve"),
        Utf8PathBuf::from("/keys/grader.pem")
    );
}

#[tokio::test]
async fn pem_path_missing_is_reported() {
    let _guard = EnvGuard::set_vars(&[
        ("SORTIE_CONFIG_PATH", None),
        ("SORTIE_PEM_PATH", None),
        ("PEM_PATH", None),
    ])
    .await;

    let session = SessionConfig::load_without_cli_args().expect("session config should load");

    let err = session.pem_path().expect_err("no key path configured");
    assert!(matches!(err, ConfigError::MissingField(ref message) if message.contains("PEM_PATH")));
}
