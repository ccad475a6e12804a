//! Unit tests for worker configuration.

use std::time::Duration;

use clap::Parser;
use rstest::rstest;

use super::*;

#[derive(Debug, Parser)]
struct Harness {
    #[command(flatten)]
    config: Config,
}

fn parse(args: &[&str]) -> Config {
    let argv = std::iter::once("stepworker").chain(args.iter().copied());
    Harness::try_parse_from(argv)
        .expect("arguments should parse")
        .config
}

#[test]
fn default_config_validates() {
    Config::default().validate().expect("defaults are valid");
}

#[test]
fn default_handshake_matches_constants() {
    let settings = Config::default().handshake();
    assert_eq!(settings, HandshakeSettings::default());
    assert_eq!(settings.window(), Duration::from_secs(5));
}

#[test]
fn flags_override_defaults() {
    let config = parse(&[
        "--log-format",
        "compact",
        "--base-dir",
        "/srv/worker",
        "--handshake-window-ms",
        "750",
    ]);
    assert_eq!(config.log_format(), LogFormat::Compact);
    assert_eq!(config.base_dir().as_str(), "/srv/worker");
    assert_eq!(config.handshake().window(), Duration::from_millis(750));
    assert_eq!(config.reserved_env_prefix(), DEFAULT_RESERVED_ENV_PREFIX);
}

#[rstest]
#[case::json("json", LogFormat::Json)]
#[case::upper("COMPACT", LogFormat::Compact)]
fn log_format_parses_case_insensitively(#[case] raw: &str, #[case] expected: LogFormat) {
    let parsed: LogFormat = raw.parse().expect("format parses");
    assert_eq!(parsed, expected);
}

#[test]
fn blank_prefix_is_rejected() {
    let config = Config {
        reserved_env_prefix: String::from("  "),
        ..Config::default()
    };
    assert_eq!(config.validate(), Err(ConfigError::EmptyReservedPrefix));
}

#[rstest]
#[case::window("handshake_window_ms")]
#[case::poll("handshake_poll_ms")]
#[case::call("call_timeout_ms")]
fn zero_durations_are_rejected(#[case] field: &'static str) {
    let mut config = Config::default();
    match field {
        "handshake_window_ms" => config.handshake_window_ms = 0,
        "handshake_poll_ms" => config.handshake_poll_ms = 0,
        _ => config.call_timeout_ms = 0,
    }
    assert_eq!(config.validate(), Err(ConfigError::ZeroDuration { field }));
}

#[test]
fn termination_grace_uses_milliseconds() {
    let config = Config {
        termination_grace_ms: 1_500,
        ..Config::default()
    };
    assert_eq!(config.termination_grace(), Duration::from_millis(1_500));
}

#[test]
fn call_timeout_flag_overrides_default() {
    assert_eq!(
        Config::default().call_timeout(),
        Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS)
    );
    let config = parse(&["--call-timeout-ms", "250"]);
    assert_eq!(config.call_timeout(), Duration::from_millis(250));
}

#[test]
fn partial_json_fills_in_defaults() {
    let config: Config = serde_json::from_str(
        r#"{"log_format": "compact", "base_dir": "/srv/plugins", "handshake_window_ms": 800}"#,
    )
    .expect("config should deserialize");

    assert_eq!(config.log_format(), LogFormat::Compact);
    assert_eq!(config.base_dir().as_str(), "/srv/plugins");
    assert_eq!(config.handshake().window(), Duration::from_millis(800));
    assert_eq!(config.reserved_env_prefix(), DEFAULT_RESERVED_ENV_PREFIX);
}
