//! Host verifier against the fake backend.

mod common;

use std::collections::HashMap;

use common::{example_host, Call, Harness};
use extdb_operator::reconciler::HostReconciler;
use extdb_operator::store::HostStore;
use extdb_operator::types::{Credential, EngineKind, HostDescriptor};
use extdb_operator::{ReconcileAction, ReconcileError, Reconciler};

#[tokio::test]
async fn verified_host_reports_success() {
    let h = Harness::new();
    let key = h.add_host("main", example_host()).await;

    let action = HostReconciler::new(h.ctx.clone()).reconcile(&key).await.unwrap();
    assert_eq!(action, ReconcileAction::Done);

    let record = h.store.get_host(&key).await.unwrap().unwrap();
    assert_eq!(
        record.status.connection_status,
        "connection with host 'db.internal' was successful"
    );
    assert!(record.status.last_connection_time.is_some());
    assert_eq!(
        h.backend.calls(),
        vec![Call::CheckConnection {
            address: "db.internal".into(),
            principal: "admin".into(),
        }]
    );
    assert_eq!(h.backend.admin_passwords(), vec!["s3cret".to_string()]);
}

#[tokio::test]
async fn connection_failure_is_persisted_and_returned() {
    let h = Harness::new();
    let key = h.add_host("main", example_host()).await;
    let reconciler = HostReconciler::new(h.ctx.clone());

    // A good pass first, so there is a success time to keep
    reconciler.reconcile(&key).await.unwrap();
    let first = h.store.get_host(&key).await.unwrap().unwrap();

    h.backend.set_unreachable(Some("connection refused"));
    let err = reconciler.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Connection(_)));

    let record = h.store.get_host(&key).await.unwrap().unwrap();
    let message = &record.status.connection_status;
    assert!(message.contains("db.internal"), "{message}");
    assert!(message.contains("connection refused"), "{message}");
    assert_eq!(
        record.status.last_connection_time,
        first.status.last_connection_time
    );
}

#[tokio::test]
async fn unsupported_engine_does_no_io() {
    let h = Harness::new();
    let key = h
        .add_host(
            "legacy",
            HostDescriptor::new("db.internal", EngineKind::from("oracle"), "admin"),
        )
        .await;

    let err = HostReconciler::new(h.ctx.clone())
        .reconcile(&key)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::UnsupportedEngine { .. }));

    let record = h.store.get_host(&key).await.unwrap().unwrap();
    assert_eq!(
        record.status.connection_status,
        "database engine 'oracle' is not supported"
    );
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn password_comes_from_secret_store() {
    let h = Harness::new();
    h.secrets
        .insert(
            "default",
            "db-admin",
            HashMap::from([("password".to_string(), "from-secret".to_string())]),
        )
        .await;
    let host = HostDescriptor::new("db.internal", EngineKind::Mysql, "root")
        .with_credential(Credential::secret_ref("db-admin", "password"));
    let key = h.add_host("main", host).await;

    HostReconciler::new(h.ctx.clone()).reconcile(&key).await.unwrap();
    assert_eq!(h.backend.admin_passwords(), vec!["from-secret".to_string()]);
}

#[tokio::test]
async fn missing_secret_is_a_connection_error() {
    let h = Harness::new();
    let host = HostDescriptor::new("db.internal", EngineKind::Postgres, "admin")
        .with_credential(Credential::secret_ref("absent", "password"));
    let key = h.add_host("main", host).await;

    let err = HostReconciler::new(h.ctx.clone())
        .reconcile(&key)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Connection(_)));

    let record = h.store.get_host(&key).await.unwrap().unwrap();
    assert_eq!(
        record.status.connection_status,
        "failed to connect to 'admin@db.internal': credential unavailable: \
         secret 'default/absent' not found"
    );
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn invalid_descriptor_is_reported() {
    let h = Harness::new();
    let key = h
        .add_host("main", HostDescriptor::new("", EngineKind::Postgres, "admin"))
        .await;

    let err = HostReconciler::new(h.ctx.clone())
        .reconcile(&key)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Invalid(_)));

    let record = h.store.get_host(&key).await.unwrap().unwrap();
    assert_eq!(
        record.status.connection_status,
        "invalid descriptor: host address must not be empty"
    );
}

#[tokio::test]
async fn missing_host_is_not_an_error() {
    let h = Harness::new();
    let action = HostReconciler::new(h.ctx.clone())
        .reconcile(&common::key("ghost"))
        .await
        .unwrap();
    assert_eq!(action, ReconcileAction::Done);
}
