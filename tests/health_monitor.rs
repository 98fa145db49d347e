//! Integration tests for health checks, escalation, and sweep reports.

mod common;

use std::time::Duration;

use common::{Harness, VALID_CODE, monitor_config, rpc, transport, unspaced};
use outreach_pool::accounts::AccountStatus;
use outreach_pool::error::SessionError;
use outreach_pool::monitor::{CheckOutcome, SweepReport};

const PHONE: &str = "+15550000001";

#[tokio::test]
async fn healthy_account_stays_active() {
    let h = Harness::new().await;
    let monitor = h.monitor(monitor_config(3));
    let account = h.authorized(PHONE).await;

    assert!(monitor.check_account(&account).await);
    assert_eq!(h.reload(account.id).await.status, AccountStatus::Active);
    assert_eq!(monitor.error_count(account.id).await, 0);
    assert_eq!(h.gateway.live_sessions(), 0);
}

#[tokio::test]
async fn three_transient_failures_disable() {
    let h = Harness::new().await;
    let monitor = h.monitor(monitor_config(3));
    let account = h.authorized(PHONE).await;
    h.gateway.fail_probes(PHONE, transport(), 3);

    assert_eq!(
        monitor.check_account_detailed(&account).await,
        CheckOutcome::Failing { consecutive: 1 }
    );
    assert_eq!(
        monitor.check_account_detailed(&account).await,
        CheckOutcome::Failing { consecutive: 2 }
    );
    assert_eq!(h.reload(account.id).await.status, AccountStatus::Active);

    assert_eq!(
        monitor.check_account_detailed(&account).await,
        CheckOutcome::Disabled
    );
    assert_eq!(h.reload(account.id).await.status, AccountStatus::Disabled);
    assert_eq!(monitor.error_count(account.id).await, 0);
    assert_eq!(h.notifier.disabled(), vec![PHONE.to_string()]);
    assert!(h.notifier.blocked().is_empty());
}

#[tokio::test]
async fn terminal_signal_blocks_immediately() {
    let h = Harness::new().await;
    let monitor = h.monitor(monitor_config(3));
    let account = h.authorized(PHONE).await;
    h.gateway.fail_probes(PHONE, transport(), 1);
    h.gateway.fail_probes(PHONE, rpc("AUTH_KEY_UNREGISTERED"), 1);

    assert!(!monitor.check_account(&account).await);
    assert_eq!(monitor.error_count(account.id).await, 1);

    assert_eq!(
        monitor.check_account_detailed(&account).await,
        CheckOutcome::Blocked
    );
    assert_eq!(h.reload(account.id).await.status, AccountStatus::Blocked);
    assert_eq!(monitor.error_count(account.id).await, 0);
    assert_eq!(h.notifier.blocked(), vec![PHONE.to_string()]);
}

#[tokio::test]
async fn success_resets_the_failure_streak() {
    let h = Harness::new().await;
    let monitor = h.monitor(monitor_config(3));
    let account = h.authorized(PHONE).await;

    h.gateway.fail_probes(PHONE, transport(), 2);
    assert!(!monitor.check_account(&account).await);
    assert!(!monitor.check_account(&account).await);
    assert_eq!(monitor.error_count(account.id).await, 2);

    assert!(monitor.check_account(&account).await);
    assert_eq!(monitor.error_count(account.id).await, 0);

    h.gateway.fail_probes(PHONE, transport(), 2);
    assert!(!monitor.check_account(&account).await);
    assert!(!monitor.check_account(&account).await);
    assert_eq!(h.reload(account.id).await.status, AccountStatus::Active);
}

#[tokio::test]
async fn probe_timeout_counts_as_transient() {
    let h = Harness::new().await;
    let monitor = h.monitor(monitor_config(3));
    let account = h.authorized(PHONE).await;
    h.gateway.hang(PHONE, Duration::from_secs(5));

    assert_eq!(
        monitor.check_account_detailed(&account).await,
        CheckOutcome::Failing { consecutive: 1 }
    );
    assert_eq!(h.gateway.live_sessions(), 0);
    assert_eq!(h.reload(account.id).await.status, AccountStatus::Active);
}

#[tokio::test]
async fn connect_failure_counts_as_transient() {
    let h = Harness::new().await;
    let monitor = h.monitor(monitor_config(1));
    let account = h.authorized(PHONE).await;
    h.gateway.fail_connect(PHONE, SessionError::Transport("refused".into()));

    assert_eq!(
        monitor.check_account_detailed(&account).await,
        CheckOutcome::Disabled
    );
    assert_eq!(h.gateway.probes(), 0);
    assert_eq!(h.reload(account.id).await.status, AccountStatus::Disabled);
}

#[tokio::test]
async fn unrecognized_rpc_code_is_transient() {
    let h = Harness::new().await;
    let monitor = h.monitor(monitor_config(3));
    let account = h.authorized(PHONE).await;
    h.gateway.fail_probes(PHONE, rpc("FLOOD_WAIT_420"), 1);

    assert_eq!(
        monitor.check_account_detailed(&account).await,
        CheckOutcome::Failing { consecutive: 1 }
    );
}

#[tokio::test]
async fn blocked_account_is_never_demoted_to_disabled() {
    let h = Harness::new().await;
    let pool = h.pool(unspaced(20));
    let monitor = h.monitor(monitor_config(1));
    let mut account = h.authorized(PHONE).await;
    let stale = account.clone();

    h.gateway.fail_send(PHONE, rpc("SESSION_REVOKED"));
    assert!(!pool.send(&mut account, "@alice", "hi").await);
    assert_eq!(h.reload(account.id).await.status, AccountStatus::Blocked);

    h.gateway.fail_probes(PHONE, transport(), 1);
    assert!(!monitor.check_account(&stale).await);
    assert_eq!(h.reload(account.id).await.status, AccountStatus::Blocked);
    assert!(h.notifier.disabled().is_empty());
}

#[tokio::test]
async fn sweep_reports_consistent_tally() {
    let h = Harness::new().await;
    let monitor = h.monitor(monitor_config(3));
    h.authorized("+15550000001").await;
    h.authorized("+15550000002").await;
    h.authorized("+15550000003").await;
    h.store.create_account("+15550000004").await.unwrap();

    h.gateway
        .fail_probes("+15550000002", rpc("USER_DEACTIVATED"), 1);
    h.gateway.fail_probes("+15550000003", transport(), 1);

    let report = monitor.sweep_all().await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            total: 3,
            active: 2,
            disabled: 0,
            blocked: 1,
        }
    );
    assert_eq!(report.total, report.active + report.disabled + report.blocked);
    assert_eq!(h.notifier.reports(), vec![report]);
    assert_eq!(h.gateway.live_sessions(), 0);
}

#[tokio::test]
async fn sweep_counts_disabled_accounts() {
    let h = Harness::new().await;
    let monitor = h.monitor(monitor_config(1));
    h.authorized("+15550000001").await;
    h.authorized("+15550000002").await;
    h.gateway.fail_probes("+15550000002", transport(), 1);

    let report = monitor.sweep_all().await.unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.active, 1);
    assert_eq!(report.disabled, 1);

    // Disabled accounts drop out of the next sweep.
    let next = monitor.sweep_all().await.unwrap();
    assert_eq!(next.total, 1);
    assert_eq!(next.active, 1);
    assert_eq!(h.notifier.reports().len(), 2);
}

#[tokio::test]
async fn empty_pool_sweep_still_reports() {
    let h = Harness::new().await;
    let monitor = h.monitor(monitor_config(3));

    let report = monitor.sweep_all().await.unwrap();
    assert_eq!(report, SweepReport::default());
    assert_eq!(h.notifier.reports().len(), 1);
}

#[tokio::test]
async fn reauthorized_account_starts_a_fresh_streak() {
    let h = Harness::new().await;
    let pool = h.pool(unspaced(20));
    let monitor = h.monitor(monitor_config(3));
    let mut account = h.authorized(PHONE).await;

    h.gateway.fail_probes(PHONE, transport(), 2);
    assert!(!monitor.check_account(&account).await);
    assert!(!monitor.check_account(&account).await);
    assert_eq!(monitor.error_count(account.id).await, 2);

    h.gateway.fail_send(PHONE, rpc("SESSION_REVOKED"));
    assert!(!pool.send(&mut account, "@alice", "hi").await);
    assert_eq!(h.reload(account.id).await.status, AccountStatus::Blocked);
    assert_eq!(monitor.error_count(account.id).await, 0);

    pool.enroll(PHONE).await.unwrap();
    assert!(pool.complete_authorization(PHONE, VALID_CODE).await);
    let account = h.reload(account.id).await;
    assert_eq!(account.status, AccountStatus::Active);

    h.gateway.fail_probes(PHONE, transport(), 1);
    assert_eq!(
        monitor.check_account_detailed(&account).await,
        CheckOutcome::Failing { consecutive: 1 }
    );
    assert_eq!(h.reload(account.id).await.status, AccountStatus::Active);
}

#[tokio::test]
async fn admin_disable_clears_the_streak_seen_by_the_monitor() {
    let h = Harness::new().await;
    let pool = h.pool(unspaced(20));
    let monitor = h.monitor(monitor_config(3));
    let account = h.authorized(PHONE).await;

    h.gateway.fail_probes(PHONE, transport(), 2);
    assert!(!monitor.check_account(&account).await);
    assert!(!monitor.check_account(&account).await);

    assert!(pool.update_status(PHONE, AccountStatus::Disabled).await);
    assert_eq!(monitor.error_count(account.id).await, 0);

    assert!(pool.update_status(PHONE, AccountStatus::Active).await);
    let account = h.reload(account.id).await;
    h.gateway.fail_probes(PHONE, transport(), 1);
    assert_eq!(
        monitor.check_account_detailed(&account).await,
        CheckOutcome::Failing { consecutive: 1 }
    );
}

#[tokio::test]
async fn stuck_disconnect_is_abandoned_after_the_check_timeout() {
    let h = Harness::new().await;
    let monitor = h.monitor(monitor_config(3));
    let account = h.authorized(PHONE).await;
    h.gateway.hang_disconnect(PHONE, Duration::from_secs(3600));

    let healthy = tokio::time::timeout(Duration::from_secs(2), monitor.check_account(&account))
        .await
        .expect("check finishes despite a stuck disconnect");
    assert!(healthy);

    let report = tokio::time::timeout(Duration::from_secs(2), monitor.sweep_all())
        .await
        .expect("sweep finishes despite a stuck disconnect")
        .unwrap();
    assert_eq!(report.active, 1);
}
