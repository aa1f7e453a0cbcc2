//! TLS integration tests
//!
//! These tests generate a self-signed certificate using rcgen, start a mock
//! storage speaking the framed protocol over TLS, and check each certificate
//! policy of the client.
//!
//! Run with: cargo test --test tls_integration_test

mod support;

use cps_client::{ClientConfig, Command, Connection, ErrorKind, TlsPolicy};
use support::{init_tracing, ok_reply, Action, MockServer, Tagged};

fn config(descriptor: &str) -> ClientConfig {
    ClientConfig::new(descriptor, "docs", "root", "secret")
}

#[tokio::test]
async fn test_default_policy_accepts_self_signed() {
    init_tracing();
    let (server, _fingerprint) = MockServer::tls(|r| Action::Reply(ok_reply(r))).await;
    let conn = Connection::new(config(&server.descriptor)).unwrap();

    for label in ["t1", "t2"] {
        let reply = conn.send_request(&Command::Search, &Tagged(label)).await.unwrap();
        assert_eq!(reply["label"], label);
    }
    assert_eq!(server.connections(), 1);
    assert_eq!(server.requests()[1].storage.as_deref(), Some("docs"));
}

#[tokio::test]
async fn test_matching_fingerprint_connects() {
    let (server, fingerprint) = MockServer::tls(|r| Action::Reply(ok_reply(r))).await;
    let config = ClientConfig {
        ssl_fingerprint: Some(fingerprint),
        ..config(&server.descriptor)
    };
    let conn = Connection::new(config).unwrap();
    assert!(matches!(
        conn.endpoint(),
        cps_client::Endpoint::TcpTls { policy: TlsPolicy::Fingerprint(_), .. }
    ));

    let reply = conn.send_request(&Command::Status, &Tagged("fp")).await.unwrap();
    assert_eq!(reply["label"], "fp");
}

#[tokio::test]
async fn test_fingerprint_with_colons_connects() {
    let (server, fingerprint) = MockServer::tls(|r| Action::Reply(ok_reply(r))).await;
    let pinned = fingerprint
        .as_bytes()
        .chunks(2)
        .map(|pair| std::str::from_utf8(pair).unwrap().to_uppercase())
        .collect::<Vec<_>>()
        .join(":");
    let config = ClientConfig {
        ssl_fingerprint: Some(pinned),
        ..config(&server.descriptor)
    };
    let conn = Connection::new(config).unwrap();

    conn.send_request(&Command::Status, &Tagged("fp")).await.unwrap();
}

#[tokio::test]
async fn test_wrong_fingerprint_fails_handshake() {
    let (server, _fingerprint) = MockServer::tls(|r| Action::Reply(ok_reply(r))).await;
    let config = ClientConfig {
        ssl_fingerprint: Some("00".repeat(32)),
        ..config(&server.descriptor)
    };
    let conn = Connection::new(config).unwrap();

    let err = conn.send_request(&Command::Status, &Tagged("fp")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection, "{}", err);
    assert!(server.requests().is_empty());

    let stats = conn.pool().stats();
    assert_eq!((stats.idle, stats.busy, stats.connects), (0, 0, 0));
}

#[tokio::test]
async fn test_reject_unauthorized_refuses_self_signed() {
    let (server, _fingerprint) = MockServer::tls(|r| Action::Reply(ok_reply(r))).await;
    let config = ClientConfig {
        reject_unauthorized: true,
        ..config(&server.descriptor)
    };
    let conn = Connection::new(config).unwrap();

    let err = conn.send_request(&Command::Status, &Tagged("ca")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection, "{}", err);
    assert!(server.requests().is_empty());
}
