//! End-to-end gate scenarios against the mock platform.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use guidegate_core::access::{FailPolicy, MembershipOracle, MembershipStatus, RetryConfig};
use guidegate_core::gate::{
    FailureReason, GateSettings, GateState, RECHECK_MEMBERSHIP, RECHECK_NOTICE, REQUEST_ASSET,
    STATS_REJECTED,
};
use guidegate_core::platform::MockPlatform;
use guidegate_core::{
    AssetDelivery, CallbackRequest, CountPolicy, DeliveryGate, DownloadLedger, GateOutcome,
    MemoryStorage, MessageRef, PlatformError, RedbStorage, StatsReply, Storage, UserId,
};

const ADMIN: UserId = UserId(395925643);

struct Harness {
    platform: Arc<MockPlatform>,
    ledger: Arc<DownloadLedger>,
    gate: Arc<DeliveryGate<MockPlatform>>,
}

fn harness(
    storage: Arc<dyn Storage>,
    policy: CountPolicy,
    fail_policy: FailPolicy,
    asset: &Path,
) -> Harness {
    let platform = Arc::new(MockPlatform::new());
    let ledger = Arc::new(DownloadLedger::open(storage, policy).unwrap());
    let oracle = MembershipOracle::new(platform.clone(), "@guides").with_retry(RetryConfig {
        max_attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 2,
        jitter: false,
    });
    let delivery = AssetDelivery::new(platform.clone(), asset, Some("Enjoy".into()));
    let settings = GateSettings {
        channel_id: "@guides".into(),
        channel_url: "https://t.me/guides".into(),
        admin_id: ADMIN,
        admin_contact_url: format!("tg://user?id={}", ADMIN),
        fail_policy,
    };
    let gate = Arc::new(DeliveryGate::new(
        platform.clone(),
        oracle,
        delivery,
        ledger.clone(),
        settings,
    ));
    Harness {
        platform,
        ledger,
        gate,
    }
}

fn write_asset(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("guide.pdf");
    std::fs::write(&path, b"%PDF-1.4").unwrap();
    path
}

fn press(user: UserId, data: &str) -> CallbackRequest {
    CallbackRequest {
        callback_id: format!("cb-{}", user),
        user,
        message: Some(MessageRef {
            chat_id: user.0,
            message_id: 42,
        }),
        data: Some(data.to_string()),
    }
}

#[tokio::test]
async fn member_requests_twice_under_dedup() {
    let dir = tempfile::tempdir().unwrap();
    let asset = write_asset(&dir);
    let h = harness(
        Arc::new(MemoryStorage::new()),
        CountPolicy::Dedup,
        FailPolicy::FailClosed,
        &asset,
    );
    h.platform.set_status(UserId(1), MembershipStatus::Member);

    let first = h.gate.handle_callback(&press(UserId(1), REQUEST_ASSET)).await.unwrap();
    let second = h.gate.handle_callback(&press(UserId(1), REQUEST_ASSET)).await.unwrap();

    assert!(matches!(first.outcome, GateOutcome::Delivered(r) if r.global_count == 1 && r.first_time));
    assert!(matches!(second.outcome, GateOutcome::Delivered(r) if r.global_count == 1 && !r.first_time));
    assert_eq!(h.platform.documents_for(UserId(1)), 2);
    assert_eq!(h.ledger.global_count().unwrap(), 1);
}

#[tokio::test]
async fn member_requests_twice_without_dedup() {
    let dir = tempfile::tempdir().unwrap();
    let asset = write_asset(&dir);
    let h = harness(
        Arc::new(MemoryStorage::new()),
        CountPolicy::NoDedup,
        FailPolicy::FailClosed,
        &asset,
    );
    h.platform.set_status(UserId(1), MembershipStatus::Administrator);

    h.gate.handle_callback(&press(UserId(1), REQUEST_ASSET)).await;
    let second = h.gate.handle_callback(&press(UserId(1), REQUEST_ASSET)).await.unwrap();

    assert!(matches!(second.outcome, GateOutcome::Delivered(r) if r.global_count == 2));
    assert_eq!(h.ledger.global_count().unwrap(), 2);
}

#[tokio::test]
async fn non_member_subscribes_then_rechecks() {
    let dir = tempfile::tempdir().unwrap();
    let asset = write_asset(&dir);
    let h = harness(
        Arc::new(MemoryStorage::new()),
        CountPolicy::Dedup,
        FailPolicy::FailClosed,
        &asset,
    );

    let blocked = h.gate.handle_callback(&press(UserId(2), REQUEST_ASSET)).await.unwrap();
    assert_eq!(blocked.outcome, GateOutcome::Blocked { notice_only: false });
    assert_eq!(h.platform.documents_for(UserId(2)), 0);

    let still = h.gate.handle_callback(&press(UserId(2), RECHECK_MEMBERSHIP)).await.unwrap();
    assert_eq!(still.outcome, GateOutcome::Blocked { notice_only: true });
    assert_eq!(
        h.platform.callback_answers().last().cloned(),
        Some((Some(RECHECK_NOTICE.to_string()), true))
    );

    h.platform.set_status(UserId(2), MembershipStatus::Member);
    let report = h.gate.handle_callback(&press(UserId(2), RECHECK_MEMBERSHIP)).await.unwrap();
    assert_eq!(
        report.trail,
        vec![
            GateState::Blocked,
            GateState::AwaitingDecision,
            GateState::Delivering,
            GateState::Delivered
        ]
    );
    assert_eq!(h.platform.documents_for(UserId(2)), 1);
    assert_eq!(h.ledger.global_count().unwrap(), 1);
}

#[tokio::test]
async fn legacy_button_payloads_still_work() {
    let dir = tempfile::tempdir().unwrap();
    let asset = write_asset(&dir);
    let h = harness(
        Arc::new(MemoryStorage::new()),
        CountPolicy::Dedup,
        FailPolicy::FailClosed,
        &asset,
    );
    h.platform.set_status(UserId(3), MembershipStatus::Owner);

    let report = h.gate.handle_callback(&press(UserId(3), "download")).await.unwrap();
    assert!(matches!(report.outcome, GateOutcome::Delivered(_)));
    let recheck = h.gate.handle_callback(&press(UserId(3), "check")).await.unwrap();
    assert_eq!(recheck.trail.first(), Some(&GateState::Blocked));
}

#[tokio::test]
async fn asset_missing_leaves_counter_alone() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        Arc::new(MemoryStorage::new()),
        CountPolicy::Dedup,
        FailPolicy::FailClosed,
        &dir.path().join("guide.pdf"),
    );
    h.platform.set_status(UserId(4), MembershipStatus::Member);

    let report = h.gate.handle_callback(&press(UserId(4), REQUEST_ASSET)).await.unwrap();
    assert_eq!(report.outcome, GateOutcome::Failed(FailureReason::AssetMissing));
    assert_eq!(h.ledger.global_count().unwrap(), 0);
    assert!(h.ledger.records().unwrap().is_empty());
}

#[tokio::test]
async fn oracle_outage_respects_fail_policy() {
    let dir = tempfile::tempdir().unwrap();
    let asset = write_asset(&dir);

    for (policy, delivered) in [(FailPolicy::FailClosed, false), (FailPolicy::FailOpen, true)] {
        let h = harness(Arc::new(MemoryStorage::new()), CountPolicy::Dedup, policy, &asset);
        h.platform.push_member_error(
            UserId(5),
            PlatformError::Api {
                code: 400,
                description: "Bad Request: member list is inaccessible".into(),
            },
        );

        let report = h.gate.handle_callback(&press(UserId(5), REQUEST_ASSET)).await.unwrap();
        assert_eq!(matches!(report.outcome, GateOutcome::Delivered(_)), delivered);
        assert_eq!(h.ledger.global_count().unwrap(), delivered as u64);
        // Permanent errors are not retried
        assert_eq!(h.platform.member_calls(), 1);
    }
}

#[tokio::test]
async fn stats_only_for_admin() {
    let dir = tempfile::tempdir().unwrap();
    let asset = write_asset(&dir);
    let h = harness(
        Arc::new(MemoryStorage::new()),
        CountPolicy::Dedup,
        FailPolicy::FailClosed,
        &asset,
    );
    h.platform.set_status(UserId(6), MembershipStatus::Member);
    h.gate.handle_callback(&press(UserId(6), REQUEST_ASSET)).await;

    let before = h.ledger.global_count().unwrap();
    assert!(matches!(h.gate.handle_stats(UserId(6)).await, StatsReply::Rejected));
    assert_eq!(h.platform.last_message().unwrap().1, STATS_REJECTED);
    assert_eq!(h.ledger.global_count().unwrap(), before);

    assert!(matches!(
        h.gate.handle_stats(ADMIN).await,
        StatsReply::Report(stats) if stats.global_count == 1 && stats.unique_recipients == 1
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_lose_no_increments() {
    let dir = tempfile::tempdir().unwrap();
    let asset = write_asset(&dir);
    let h = harness(
        Arc::new(MemoryStorage::new()),
        CountPolicy::Dedup,
        FailPolicy::FailClosed,
        &asset,
    );
    for i in 0..50 {
        h.platform.set_status(UserId(i), MembershipStatus::Member);
    }

    let tasks: Vec<_> = (0..50)
        .flat_map(|i| [i, i])
        .map(|i| {
            let gate = h.gate.clone();
            tokio::spawn(async move { gate.handle_callback(&press(UserId(i), REQUEST_ASSET)).await })
        })
        .collect();
    for task in tasks {
        let report = task.await.unwrap().unwrap();
        assert!(matches!(report.outcome, GateOutcome::Delivered(_)));
    }

    assert_eq!(h.ledger.global_count().unwrap(), 50);
    assert_eq!(h.ledger.unique_recipients().unwrap(), 50);
}

#[tokio::test]
async fn durable_counter_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let asset = write_asset(&dir);
    let db = dir.path().join("downloads.redb");

    {
        let h = harness(
            Arc::new(RedbStorage::open(Some(&db)).unwrap()),
            CountPolicy::Dedup,
            FailPolicy::FailClosed,
            &asset,
        );
        for i in 1..=3 {
            h.platform.set_status(UserId(i), MembershipStatus::Member);
            h.gate.handle_callback(&press(UserId(i), REQUEST_ASSET)).await;
        }
        assert_eq!(h.ledger.global_count().unwrap(), 3);
    }

    let h = harness(
        Arc::new(RedbStorage::open(Some(&db)).unwrap()),
        CountPolicy::Dedup,
        FailPolicy::FailClosed,
        &asset,
    );
    assert_eq!(h.ledger.global_count().unwrap(), 3);
    assert!(h.ledger.storage_info().to_string().contains("durable"));

    h.platform.set_status(UserId(1), MembershipStatus::Member);
    let report = h.gate.handle_callback(&press(UserId(1), REQUEST_ASSET)).await.unwrap();
    assert!(matches!(report.outcome, GateOutcome::Delivered(r) if r.global_count == 3 && !r.first_time));
}
