use super::*;
use crate::{
    ErrorCategory, Outcome, SessionState,
    check::id_of,
    ledger::{CleanupLedger, ResourceKind},
};
use serde_json::json;
use tokio::test;

#[test]
async fn test_handshake_lists_tools() {
    let backend = FakeBackend::new();
    let client = backend.client().await;

    assert_eq!(client.state(), SessionState::Ready);
    assert!(client.server_name().is_some());
    for tool in ["create_note", "delete_note", "pke_create_keyset", "backup_status"] {
        assert!(client.has_tool(tool), "{tool} not advertised");
    }
}

#[test]
async fn test_initialize_twice_fails() {
    let backend = FakeBackend::new();
    let mut client = backend.client().await;

    assert!(matches!(
        client.initialize().await,
        Err(Error::AlreadyInitialized)
    ));
    // The live session is unaffected.
    assert!(client.call("list_notes", json!({})).await.is_ok());
}

#[test]
async fn test_close_is_idempotent() {
    let backend = FakeBackend::new();
    let mut client = backend.client().await;

    assert!(client.close().await);
    assert!(!client.close().await);
    assert_eq!(client.state(), SessionState::Closed);
    assert!(matches!(
        client.call("list_notes", json!({})).await,
        Err(Error::SessionClosed)
    ));
}

#[test]
async fn test_call_round_trip() {
    let backend = FakeBackend::new();
    let client = backend.client().await;

    let created = client
        .call("create_note", json!({"content": "# A", "tags": ["t"]}))
        .await
        .unwrap();
    let id = id_of(&created).unwrap();

    let note = client.call("get_note", json!({"id": id})).await.unwrap();
    assert_eq!(note["original"]["content"], json!("# A"));
}

#[test]
async fn test_server_error_is_classified() {
    let backend = FakeBackend::new();
    let client = backend.client().await;

    let failure = client
        .call_expect_error(
            "delete_note",
            json!({"id": "00000000-0000-0000-0000-000000000000"}),
        )
        .await
        .unwrap();
    assert_eq!(failure.status, Some(404));
    assert_eq!(failure.category, ErrorCategory::NotFound);
    assert!(failure.mentions_any(&["not found"]));
}

#[test]
async fn test_protocol_error_is_a_failure() {
    let backend = FakeBackend::new();
    let client = backend.client().await;
    let note = client
        .call("create_note", json!({"content": "# J"}))
        .await
        .unwrap();

    let outcome = client
        .invoke(
            "create_job",
            json!({"note_id": id_of(&note).unwrap(), "job_type": "bogus"}),
        )
        .await
        .unwrap();
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.category, ErrorCategory::Validation, "{failure}");
}

#[test]
async fn test_unexpected_success() {
    let backend = FakeBackend::new();
    let client = backend.client().await;

    let err = client
        .call_expect_error("list_notes", json!({}))
        .await
        .unwrap_err();
    match err {
        Error::UnexpectedSuccess { operation, payload } => {
            assert_eq!(operation, "list_notes");
            assert!(payload.get("notes").is_some());
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
async fn test_non_object_arguments_rejected() {
    let backend = FakeBackend::new();
    let client = backend.client().await;

    assert!(matches!(
        client.invoke("list_notes", json!([1, 2])).await,
        Err(Error::InvalidArguments(_))
    ));
    assert!(matches!(
        client.invoke("list_collections", serde_json::Value::Null).await,
        Ok(Outcome::Success(_))
    ));
}

#[test]
async fn test_unknown_tool_is_a_failure() {
    let backend = FakeBackend::new();
    let client = backend.client().await;

    let outcome = client.invoke("no_such_tool", json!({})).await.unwrap();
    assert!(!outcome.is_success());
}

#[test]
async fn test_unauthenticated_calls_fail_with_auth() {
    let backend = FakeBackend::with_options(Options {
        authenticated: false,
        ..Options::default()
    });
    let client = backend.client().await;

    let failure = client
        .call_expect_error("list_notes", json!({}))
        .await
        .unwrap();
    assert_eq!(failure.category, ErrorCategory::Auth);
}

#[test(start_paused = true)]
async fn test_stalled_call_times_out_and_keeps_tracked_records() {
    let backend = FakeBackend::new();
    let client = backend.client().await;
    let mut ledger = CleanupLedger::new();

    let note = client
        .call("create_note", json!({"content": "# Before the stall"}))
        .await
        .unwrap();
    let note = id_of(&note).unwrap();
    ledger.track(ResourceKind::Note, &note);

    backend.store().set_stalled(true);
    let outcome = client.invoke("list_notes", json!({})).await.unwrap();
    let Outcome::Failure(failure) = outcome else {
        panic!("stalled call returned {outcome:?}");
    };
    assert_eq!(failure.category, ErrorCategory::Timeout);
    assert_eq!(client.state(), SessionState::Ready);
    assert_eq!(ledger.len(), 1);

    // Teardown still reaches the record once the server answers again.
    backend.store().set_stalled(false);
    let report = ledger.drain(&client).await;
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(backend.store().record_count(), 0);
}
