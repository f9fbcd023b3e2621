//! Proxy controller contract tests against a mock controller.

use gridwx_service::config::EgressConfig;
use gridwx_service::egress::{probe_controller, Egress, EgressError, EgressRotator, ProxyController};
use gridwx_service::pipeline::Sleeper;
use httpmock::prelude::*;
use serde_json::json;
use std::net::TcpListener;
use std::time::Duration;

#[derive(Default)]
struct RecordingSleeper {
    slept: Vec<Duration>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&mut self, duration: Duration) {
        self.slept.push(duration);
    }
}

fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn config_for(server: &MockServer) -> EgressConfig {
    EgressConfig {
        host: "127.0.0.1".to_string(),
        candidate_ports: vec![unused_port(), server.port()],
        group: "GLOBAL".to_string(),
        secret: Some("s3cret".to_string()),
        verify_url: server.url("/ip"),
        verify_attempts: 2,
        verify_retry_secs: 2,
        ..EgressConfig::default()
    }
}

fn proxies_body(members: &[&str]) -> serde_json::Value {
    json!({
        "proxies": {
            "GLOBAL": { "type": "Selector", "now": "DIRECT", "all": members },
            "DIRECT": { "type": "Direct" },
            "Auto": { "type": "URLTest", "all": ["HK-01"] },
            "HK-01": { "type": "Shadowsocks" },
            "JP-02": { "type": "Vmess" }
        }
    })
}

fn mock_version(server: &MockServer, status: u16) {
    server.mock(|when, then| {
        when.method(GET).path("/version");
        then.status(status).json_body(json!({ "version": "1.18.0" }));
    });
}

#[test]
fn test_probe_skips_dead_ports() {
    let server = MockServer::start();
    mock_version(&server, 200);

    let ports = [unused_port(), server.port()];
    let url = probe_controller("127.0.0.1", &ports, Duration::from_millis(500)).unwrap();
    assert_eq!(url, format!("http://127.0.0.1:{}", server.port()));
}

#[test]
fn test_probe_accepts_unauthorized_version() {
    let server = MockServer::start();
    mock_version(&server, 401);

    assert!(probe_controller("127.0.0.1", &[server.port()], Duration::from_millis(500)).is_ok());
}

#[test]
fn test_probe_ignores_other_services() {
    let server = MockServer::start();
    mock_version(&server, 404);

    let err = probe_controller("127.0.0.1", &[server.port()], Duration::from_millis(500)).unwrap_err();
    assert!(matches!(err, EgressError::ControllerUnavailable { .. }));
}

#[test]
fn test_discover_lists_usable_nodes_with_bearer_secret() {
    let server = MockServer::start();
    mock_version(&server, 200);
    let proxies = server.mock(|when, then| {
        when.method(GET).path("/proxies").header("Authorization", "Bearer s3cret");
        then.status(200).json_body(proxies_body(&["DIRECT", "Auto", "GLOBAL", "HK-01", "JP-02"]));
    });

    let controller = ProxyController::discover(&config_for(&server), None).unwrap();

    proxies.assert();
    let names: Vec<&str> = controller.nodes().iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["HK-01", "JP-02"]);
}

#[test]
fn test_discover_rejected_secret() {
    let server = MockServer::start();
    mock_version(&server, 401);
    server.mock(|when, then| {
        when.method(GET).path("/proxies");
        then.status(401).json_body(json!({ "message": "Unauthorized" }));
    });

    let err = ProxyController::discover(&config_for(&server), None).err().unwrap();
    assert!(matches!(err, EgressError::ControllerUnauthorized(_)));
}

#[test]
fn test_discover_nothing_listening() {
    let config = EgressConfig {
        candidate_ports: vec![unused_port()],
        probe_timeout_ms: 200,
        ..EgressConfig::default()
    };

    let err = ProxyController::discover(&config, None).err().unwrap();
    assert!(matches!(err, EgressError::ControllerUnavailable { .. }));

    let egress = Egress::discover(&config, None);
    assert!(!egress.is_enabled());
}

#[test]
fn test_rotate_switches_group() {
    let server = MockServer::start();
    mock_version(&server, 200);
    server.mock(|when, then| {
        when.method(GET).path("/proxies");
        then.status(200).json_body(proxies_body(&["DIRECT", "HK-01"]));
    });
    let switch = server.mock(|when, then| {
        when.method(PUT)
            .path("/proxies/GLOBAL")
            .header("Authorization", "Bearer s3cret")
            .json_body(json!({ "name": "HK-01" }));
        then.status(204);
    });

    let mut egress = Egress::discover(&config_for(&server), None);
    assert!(egress.is_enabled());

    let node = egress.rotate().unwrap();
    assert_eq!(node.name, "HK-01");
    switch.assert();
}

#[test]
fn test_rotate_reports_controller_failure() {
    let server = MockServer::start();
    mock_version(&server, 200);
    server.mock(|when, then| {
        when.method(GET).path("/proxies");
        then.status(200).json_body(proxies_body(&["HK-01", "JP-02"]));
    });
    server.mock(|when, then| {
        when.method(PUT).path("/proxies/GLOBAL");
        then.status(500);
    });

    let mut controller = ProxyController::discover(&config_for(&server), None).unwrap().with_seed(1);
    let err = controller.rotate().unwrap_err();
    assert!(matches!(err, EgressError::RotationFailed { .. }));
    assert!(controller.current().is_none());
}

#[test]
fn test_rotate_with_rejected_secret() {
    let server = MockServer::start();
    mock_version(&server, 200);
    server.mock(|when, then| {
        when.method(GET).path("/proxies");
        then.status(200).json_body(proxies_body(&["HK-01", "JP-02"]));
    });
    server.mock(|when, then| {
        when.method(PUT).path("/proxies/GLOBAL");
        then.status(401);
    });

    let mut egress = Egress::discover(&config_for(&server), None);
    let err = egress.rotate().unwrap_err();
    assert!(matches!(err, EgressError::ControllerUnauthorized(_)));

    egress.disable();
    assert!(!egress.is_enabled());
}

#[test]
fn test_rotations_cover_all_nodes_before_repeating() {
    let server = MockServer::start();
    mock_version(&server, 200);
    server.mock(|when, then| {
        when.method(GET).path("/proxies");
        then.status(200).json_body(proxies_body(&["HK-01", "JP-02"]));
    });
    let switch = server.mock(|when, then| {
        when.method(PUT).path("/proxies/GLOBAL");
        then.status(204);
    });

    let mut controller = ProxyController::discover(&config_for(&server), None).unwrap().with_seed(42);
    let first = controller.rotate().unwrap();
    let second = controller.rotate().unwrap();
    let third = controller.rotate().unwrap();

    assert_ne!(first, second);
    assert_ne!(second, third);
    assert_eq!(switch.hits(), 3);
}

#[test]
fn test_verify_reports_identity() {
    let server = MockServer::start();
    mock_version(&server, 200);
    server.mock(|when, then| {
        when.method(GET).path("/proxies");
        then.status(200).json_body(proxies_body(&["HK-01"]));
    });
    server.mock(|when, then| {
        when.method(GET).path("/ip");
        then.status(200).json_body(json!({ "ip": "203.0.113.9" }));
    });

    let mut controller = ProxyController::discover(&config_for(&server), None).unwrap();
    let mut sleeper = RecordingSleeper::default();
    assert_eq!(controller.verify(&mut sleeper), Some("203.0.113.9".to_string()));
    assert!(sleeper.slept.is_empty());
}

#[test]
fn test_verify_failure_is_not_fatal() {
    let server = MockServer::start();
    mock_version(&server, 200);
    server.mock(|when, then| {
        when.method(GET).path("/proxies");
        then.status(200).json_body(proxies_body(&["HK-01"]));
    });
    let ip = server.mock(|when, then| {
        when.method(GET).path("/ip");
        then.status(503);
    });

    let mut controller = ProxyController::discover(&config_for(&server), None).unwrap();
    let mut sleeper = RecordingSleeper::default();
    assert_eq!(controller.verify(&mut sleeper), None);
    assert_eq!(ip.hits(), 2);
    assert_eq!(sleeper.slept, vec![Duration::from_secs(2)]);
}
