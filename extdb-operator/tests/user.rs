//! User reconciler against the fake backend.

mod common;

use std::collections::HashMap;

use common::{example_host, Call, Harness};
use extdb_operator::reconciler::UserReconciler;
use extdb_operator::store::UserStore;
use extdb_operator::types::{Credential, DatabaseDescriptor, Grant, UserDescriptor};
use extdb_operator::{ReconcileAction, ReconcileError, Reconciler};

fn app_user() -> UserDescriptor {
    UserDescriptor::new("orders", "app")
        .with_credential(Credential::inline("app-pw"))
        .with_grant(Grant::new("TABLE", &["SELECT", "INSERT"]))
}

#[tokio::test]
async fn user_is_created_on_referenced_database() {
    let h = Harness::new();
    h.add_host("main", example_host()).await;
    h.add_database("orders", DatabaseDescriptor::new("orders_prod", "main"))
        .await;
    let key = h.add_user("orders-app", app_user()).await;

    let action = UserReconciler::new(h.ctx.clone()).reconcile(&key).await.unwrap();
    assert_eq!(action, ReconcileAction::Done);

    assert_eq!(
        h.backend.calls(),
        vec![Call::CreateUser {
            database: "orders_prod".into(),
            username: "app".into(),
            password: "app-pw".into(),
        }]
    );
    // Providers connect with the host's credentials, not the user's
    assert_eq!(h.backend.admin_passwords(), vec!["s3cret".to_string()]);

    let record = h.store.get_user(&key).await.unwrap().unwrap();
    assert_eq!(record.status.reconcile_status, "user 'app' successfully reconciled");
    assert!(record.status.last_reconcile_time.is_some());
}

#[tokio::test]
async fn user_password_from_secret() {
    let h = Harness::new();
    h.secrets
        .insert(
            "default",
            "app-credentials",
            HashMap::from([("pw".to_string(), "from-secret".to_string())]),
        )
        .await;
    h.add_host("main", example_host()).await;
    h.add_database("orders", DatabaseDescriptor::new("orders", "main"))
        .await;
    let user = UserDescriptor::new("orders", "app")
        .with_credential(Credential::secret_ref("app-credentials", "pw"))
        .with_grant(Grant::new("DATABASE", &["CONNECT"]));
    let key = h.add_user("orders-app", user).await;

    UserReconciler::new(h.ctx.clone()).reconcile(&key).await.unwrap();
    assert!(matches!(
        &h.backend.calls()[..],
        [Call::CreateUser { password, .. }] if password == "from-secret"
    ));
}

#[tokio::test]
async fn empty_database_ref_is_reported() {
    let h = Harness::new();
    let mut user = app_user();
    user.database_ref = String::new();
    let key = h.add_user("orders-app", user).await;

    let err = UserReconciler::new(h.ctx.clone())
        .reconcile(&key)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::ReferenceNotSet { kind: "database" }
    ));
    let record = h.store.get_user(&key).await.unwrap().unwrap();
    assert_eq!(record.status.reconcile_status, "database reference is not set");
}

#[tokio::test]
async fn dangling_database_ref_is_reported() {
    let h = Harness::new();
    let key = h.add_user("orders-app", app_user()).await;

    UserReconciler::new(h.ctx.clone())
        .reconcile(&key)
        .await
        .unwrap_err();
    let record = h.store.get_user(&key).await.unwrap().unwrap();
    assert_eq!(record.status.reconcile_status, "database 'orders' not found");
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn user_without_grants_is_rejected() {
    let h = Harness::new();
    h.add_host("main", example_host()).await;
    h.add_database("orders", DatabaseDescriptor::new("orders", "main"))
        .await;
    let key = h
        .add_user("orders-app", UserDescriptor::new("orders", "app"))
        .await;

    let err = UserReconciler::new(h.ctx.clone())
        .reconcile(&key)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Invalid(_)));
    let record = h.store.get_user(&key).await.unwrap().unwrap();
    assert_eq!(
        record.status.reconcile_status,
        "invalid descriptor: at least one privilege grant is required"
    );
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn reconciling_twice_is_harmless() {
    let h = Harness::new();
    h.add_host("main", example_host()).await;
    h.add_database("orders", DatabaseDescriptor::new("orders", "main"))
        .await;
    let key = h.add_user("orders-app", app_user()).await;
    let reconciler = UserReconciler::new(h.ctx.clone());

    reconciler.reconcile(&key).await.unwrap();
    reconciler.reconcile(&key).await.unwrap();
    assert!(h.backend.has_user("app"));

    let record = h.store.get_user(&key).await.unwrap().unwrap();
    assert_eq!(record.status.reconcile_status, "user 'app' successfully reconciled");
}
