//! Unit tests for socket resolution, connection and health checks.

use mockable::MockEnv;
use rstest::{fixture, rstest};

use super::{EngineConnector, SocketResolver};
use crate::engine::test_support::{MockEngine, runtime, server_error};
use crate::error::{ContainerError, VulnlabError};

// =============================================================================
// Fixtures
// =============================================================================

/// Fixture providing a `MockEnv` that returns `None` for all environment
/// variable queries.
#[fixture]
fn empty_env() -> MockEnv {
    let mut env = MockEnv::new();
    env.expect_string().returning(|_| None);
    env
}

/// Build a `MockEnv` answering from a fixed table.
fn env_with_vars(mappings: &'static [(&'static str, &'static str)]) -> MockEnv {
    let mut env = MockEnv::new();
    env.expect_string().returning(move |key| {
        mappings
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| String::from(*value))
    });
    env
}

// =============================================================================
// SocketResolver
// =============================================================================

#[rstest]
fn resolver_returns_none_when_no_env_vars_set(empty_env: MockEnv) {
    let resolver = SocketResolver::new(&empty_env);
    assert!(resolver.resolve_from_env().is_none());
}

#[rstest]
#[case::docker_host(&[("DOCKER_HOST", "unix:///docker.sock")], "unix:///docker.sock")]
#[case::container_host(&[("CONTAINER_HOST", "unix:///container.sock")], "unix:///container.sock")]
#[case::podman_host(&[("PODMAN_HOST", "unix:///podman.sock")], "unix:///podman.sock")]
#[case::docker_over_podman(
    &[("DOCKER_HOST", "unix:///docker.sock"), ("PODMAN_HOST", "unix:///podman.sock")],
    "unix:///docker.sock"
)]
#[case::container_over_podman(
    &[("CONTAINER_HOST", "unix:///container.sock"), ("PODMAN_HOST", "unix:///podman.sock")],
    "unix:///container.sock"
)]
#[case::skips_empty(
    &[("DOCKER_HOST", ""), ("PODMAN_HOST", "unix:///podman.sock")],
    "unix:///podman.sock"
)]
#[case::tcp_endpoint(&[("DOCKER_HOST", "tcp://remotehost:2375")], "tcp://remotehost:2375")]
fn resolver_follows_fallback_order(
    #[case] vars: &'static [(&'static str, &'static str)],
    #[case] expected: &str,
) {
    let env = env_with_vars(vars);
    let resolver = SocketResolver::new(&env);
    assert_eq!(resolver.resolve_from_env().as_deref(), Some(expected));
}

#[rstest]
fn resolver_skips_all_empty_values() {
    let env = env_with_vars(&[("DOCKER_HOST", ""), ("CONTAINER_HOST", ""), ("PODMAN_HOST", "")]);
    let resolver = SocketResolver::new(&env);
    assert!(resolver.resolve_from_env().is_none());
}

#[cfg(unix)]
#[rstest]
fn default_socket_is_unix_socket() {
    assert_eq!(
        SocketResolver::<MockEnv>::default_socket(),
        "unix:///var/run/docker.sock"
    );
}

// =============================================================================
// EngineConnector::resolve_socket
// =============================================================================

#[rstest]
#[case::config_wins(Some("unix:///config.sock"), "unix:///config.sock")]
#[case::empty_config_falls_through(Some(""), "unix:///docker.sock")]
#[case::env_when_no_config(None, "unix:///docker.sock")]
fn resolve_socket_prefers_config_over_env(
    #[case] config_socket: Option<&str>,
    #[case] expected: &str,
) {
    let env = env_with_vars(&[("DOCKER_HOST", "unix:///docker.sock")]);
    let resolver = SocketResolver::new(&env);
    assert_eq!(EngineConnector::resolve_socket(config_socket, &resolver), expected);
}

#[cfg(unix)]
#[rstest]
fn resolve_socket_uses_default_when_no_source_available(empty_env: MockEnv) {
    let resolver = SocketResolver::new(&empty_env);
    assert_eq!(
        EngineConnector::resolve_socket(None, &resolver),
        "unix:///var/run/docker.sock"
    );
}

// =============================================================================
// EngineConnector::connect
// =============================================================================

#[rstest]
#[case::tcp_with_hostname("tcp://host:2375")]
#[case::tcp_with_ip("tcp://192.168.1.100:2376")]
#[case::http_endpoint("http://remotehost:2375")]
#[case::https_endpoint("https://remotehost:2376")]
fn connect_http_compatible_endpoints_creates_client(#[case] endpoint: &str) {
    // connect_with_http builds the client without touching the network.
    let result = EngineConnector::connect(endpoint);
    assert!(result.is_ok(), "connect {endpoint} failed: {:?}", result.err());
}

#[rstest]
fn connect_with_fallback_uses_tcp_from_env() {
    let env = env_with_vars(&[("DOCKER_HOST", "tcp://192.168.1.100:2376")]);
    let resolver = SocketResolver::new(&env);
    let result = EngineConnector::connect_with_fallback(None, &resolver);
    assert!(result.is_ok(), "fallback connect failed: {:?}", result.err());
}

#[rstest]
#[case("/var/run/docker.sock", "unix:///var/run/docker.sock")]
#[case("//./pipe/docker_engine", "npipe:////./pipe/docker_engine")]
fn bare_paths_gain_a_scheme(#[case] path: &str, #[case] expected: &str) {
    assert_eq!(EngineConnector::normalize_bare_path(path), expected);
}

// =============================================================================
// Health checks
// =============================================================================

#[rstest]
fn health_check_succeeds_when_engine_answers(
    runtime: std::io::Result<tokio::runtime::Runtime>,
) -> std::io::Result<()> {
    let rt = runtime?;
    let mut engine = MockEngine::new();
    engine
        .expect_ping()
        .times(1)
        .returning(|| Box::pin(async { Ok(()) }));

    let result = rt.block_on(EngineConnector::health_check_async(&engine));

    assert!(result.is_ok(), "health check failed: {:?}", result.err());
    Ok(())
}

#[rstest]
fn health_check_reports_engine_failure(
    runtime: std::io::Result<tokio::runtime::Runtime>,
) -> std::io::Result<()> {
    let rt = runtime?;
    let mut engine = MockEngine::new();
    engine
        .expect_ping()
        .returning(|| Box::pin(async { Err(server_error(500, "daemon wedged")) }));

    let result = rt.block_on(EngineConnector::health_check_async(&engine));

    assert!(matches!(
        result,
        Err(VulnlabError::Container(
            ContainerError::HealthCheckFailed { .. }
        ))
    ));
    Ok(())
}

#[rstest]
fn ping_on_missing_socket_names_the_path(
    runtime: std::io::Result<tokio::runtime::Runtime>,
) -> std::io::Result<()> {
    let rt = runtime?;
    let mut engine = MockEngine::new();
    engine.expect_ping().returning(|| {
        Box::pin(async {
            Err(bollard::errors::Error::IOError {
                err: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            })
        })
    });

    let result = rt.block_on(EngineConnector::ping_with_timeout(
        &engine,
        Some("unix:///run/vulnlab/missing.sock"),
    ));

    assert!(matches!(
        result,
        Err(VulnlabError::Container(ContainerError::SocketNotFound { .. }))
    ));
    Ok(())
}
