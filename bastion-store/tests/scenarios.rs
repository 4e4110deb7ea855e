//! End-to-end coverage for spec.md §8's scenarios that need a running
//! `Store`, wired through `bastion-core`'s services the way
//! `bastion-ssh`'s frontend does, but without a real SSH peer.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use bastion_core::auth_gate::{AuthAttempt, AuthGate, AuthGateConfig, AuthOutcome};
use bastion_core::catalog::Catalog;
use bastion_core::ticket_machine::{TicketMachine, WaitOutcome};
use bastion_store::Store;
use tokio::sync::Notify;
use uuid::Uuid;

fn open_temp_store() -> Store {
    let path = std::env::temp_dir().join(format!("bastion-scenario-{}.redb", Uuid::new_v4()));
    Store::open(&path).expect("open temp store")
}

fn local_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn gate(catalog: Arc<dyn Catalog>) -> AuthGate {
    AuthGate::new(
        catalog,
        AuthGateConfig {
            max_try_login: 15,
            login_block_time: Duration::from_secs(60),
            otp_duration: Duration::from_secs(60),
        },
    )
}

/// S1: a permitted user authenticates with the right password and the
/// successful attempt is recorded in the audit log.
#[tokio::test]
async fn password_login_succeeds_and_is_audited() {
    let store = open_temp_store();
    bastion_store::seed_demo_data(&store).expect("seed");
    let catalog: Arc<dyn Catalog> = Arc::new(store);
    let auth_gate = gate(catalog.clone());

    let outcome = auth_gate
        .authenticate(AuthAttempt {
            username: "alice",
            password: "demo-password",
            public_key: None,
            remote_addr: local_addr(),
        })
        .await;

    assert!(matches!(outcome, AuthOutcome::Success(ref user) if user.username == "alice"));

    let asset = catalog.get_asset_by_name("web1").await.expect("web1 exists");
    let user = match outcome {
        AuthOutcome::Success(user) => user,
        _ => unreachable!(),
    };
    let sys_users = catalog
        .get_system_users_for_permission(user.id, asset.id)
        .await
        .expect("permission lookup");
    assert_eq!(sys_users.len(), 1);
    assert_eq!(sys_users[0].username, "root");
    assert!(!catalog
        .needs_login_confirm(user.id, asset.id)
        .await
        .expect("needs_login_confirm"));
}

/// S2: repeated wrong passwords return Failed until the configured
/// attempt budget is exhausted, then Blocked.
#[tokio::test]
async fn repeated_bad_password_blocks_after_max_tries() {
    let store = open_temp_store();
    bastion_store::seed_demo_data(&store).expect("seed");
    let catalog: Arc<dyn Catalog> = Arc::new(store);
    let auth_gate = AuthGate::new(
        catalog,
        AuthGateConfig {
            max_try_login: 3,
            login_block_time: Duration::from_secs(60),
            otp_duration: Duration::from_secs(60),
        },
    );

    for _ in 0..3 {
        let outcome = auth_gate
            .authenticate(AuthAttempt {
                username: "alice",
                password: "wrong",
                public_key: None,
                remote_addr: local_addr(),
            })
            .await;
        assert!(matches!(outcome, AuthOutcome::Failed));
    }

    let outcome = auth_gate
        .authenticate(AuthAttempt {
            username: "alice",
            password: "wrong",
            public_key: None,
            remote_addr: local_addr(),
        })
        .await;
    assert!(matches!(outcome, AuthOutcome::Blocked));
}

/// S3: a permission with `needConfirm=true` blocks the ticket machine
/// until an admin (here, simulated directly through the Catalog) approves
/// it, and `wait` resolves to `Approve`.
#[tokio::test]
async fn needs_confirm_permission_waits_for_approval() {
    let store = open_temp_store();
    bastion_store::seed_demo_data(&store).expect("seed");
    let catalog: Arc<dyn Catalog> = Arc::new(store);

    let bob = catalog.get_user("bob").await.expect("bob exists");
    let db1 = catalog.get_asset_by_name("db1").await.expect("db1 exists");
    assert!(catalog
        .needs_login_confirm(bob.id, db1.id)
        .await
        .expect("needs_login_confirm"));

    let machine = TicketMachine::new(&*catalog);
    let (ticket_id, _reviewers) = machine
        .check_is_needed(bob.id, db1.id, "bob", "db1", "deploy")
        .await
        .expect("check_is_needed")
        .expect("ticket required");

    let catalog_for_approval = catalog.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        catalog_for_approval
            .update_ticket_state(ticket_id, bastion_common::model::TicketState::Approved, "admin")
            .await
            .expect("approve ticket");
    });

    let outcome = machine.wait(ticket_id, std::future::pending()).await;
    assert!(matches!(outcome, WaitOutcome::Approve { approver } if approver == "admin"));
}

/// S4: the client cancels before a reviewer acts; `wait` returns `Cancel`
/// and the ticket is left `closed` rather than pending forever.
#[tokio::test]
async fn cancelling_the_wait_closes_the_ticket() {
    let store = open_temp_store();
    bastion_store::seed_demo_data(&store).expect("seed");
    let catalog: Arc<dyn Catalog> = Arc::new(store);

    let bob = catalog.get_user("bob").await.expect("bob exists");
    let db1 = catalog.get_asset_by_name("db1").await.expect("db1 exists");

    let machine = TicketMachine::new(&*catalog);
    let (ticket_id, _reviewers) = machine
        .check_is_needed(bob.id, db1.id, "bob", "db1", "deploy")
        .await
        .expect("check_is_needed")
        .expect("ticket required");

    let cancel = Arc::new(Notify::new());
    let cancel_trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel_trigger.notify_one();
    });

    let outcome = machine.wait(ticket_id, cancel.notified()).await;
    assert!(matches!(outcome, WaitOutcome::Cancel));

    let (state, _) = catalog.get_ticket_state(ticket_id).await.expect("ticket still exists");
    assert_eq!(state, bastion_common::model::TicketState::Closed);
}
