//! ============================================================================
//! Delivery Gate - Membership check, delivery and counting per request
//! ============================================================================
//! Each inbound action runs a fresh [`GateRun`]; nothing carries over between
//! requests. The ledger is touched only after the asset actually went out,
//! and never while a network call is in flight.
//! ============================================================================

mod render;
mod state;

pub use render::{RECHECK_NOTICE, STATS_REJECTED};
pub use state::{
    FailureReason, GateAction, GateOutcome, GateReport, GateState, RECHECK_MEMBERSHIP,
    REQUEST_ASSET,
};

use std::sync::Arc;
use tracing::{error, info, warn};

use state::GateRun;

use crate::access::{AccessDecision, FailPolicy, MembershipOracle};
use crate::config::BotConfig;
use crate::delivery::{AssetDelivery, DeliveryOutcome};
use crate::ledger::{DeliveryReceipt, DownloadLedger, LedgerStats};
use crate::platform::{InlineKeyboard, MessagingPlatform};
use crate::types::{MessageRef, PlatformError, StorageError, UserId};

/// Gate settings that only affect decisions and rendering
#[derive(Debug, Clone)]
pub struct GateSettings {
    pub channel_id: String,
    pub channel_url: String,
    pub admin_id: UserId,
    pub admin_contact_url: String,
    pub fail_policy: FailPolicy,
}

impl From<&BotConfig> for GateSettings {
    fn from(config: &BotConfig) -> Self {
        Self {
            channel_id: config.channel_id.clone(),
            channel_url: config.channel_url.clone(),
            admin_id: config.admin_id,
            admin_contact_url: config.admin_contact_url.clone(),
            fail_policy: config.fail_policy,
        }
    }
}

/// A button press, independent of the transport that carried it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackRequest {
    pub callback_id: String,
    pub user: UserId,
    /// Message holding the pressed button, edited in place when present
    pub message: Option<MessageRef>,
    pub data: Option<String>,
}

/// Reply to an admin stats request
#[derive(Debug, Clone)]
pub enum StatsReply {
    Rejected,
    Report(LedgerStats),
    Unavailable,
}

/// Orchestrates oracle, delivery and ledger for every request
pub struct DeliveryGate<P: MessagingPlatform> {
    platform: Arc<P>,
    oracle: MembershipOracle<P>,
    delivery: AssetDelivery<P>,
    ledger: Arc<DownloadLedger>,
    settings: GateSettings,
}

impl<P: MessagingPlatform + 'static> DeliveryGate<P> {
    pub fn new(
        platform: Arc<P>,
        oracle: MembershipOracle<P>,
        delivery: AssetDelivery<P>,
        ledger: Arc<DownloadLedger>,
        settings: GateSettings,
    ) -> Self {
        Self {
            platform,
            oracle,
            delivery,
            ledger,
            settings,
        }
    }

    /// Wire the gate from the runtime configuration
    pub fn from_config(platform: Arc<P>, ledger: Arc<DownloadLedger>, config: &BotConfig) -> Self {
        let oracle = MembershipOracle::new(platform.clone(), config.channel_id.clone())
            .with_timeout(config.oracle_timeout)
            .with_budget(config.oracle_budget)
            .with_retry(config.oracle_retry.clone());
        let delivery = AssetDelivery::new(
            platform.clone(),
            config.asset_path.clone(),
            config.asset_caption.clone(),
        );
        Self::new(platform, oracle, delivery, ledger, GateSettings::from(config))
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// `/start` and `/help`
    pub async fn handle_start(&self, user: UserId, first_name: &str) {
        let (text, keyboard) = render::welcome(first_name, &self.settings.channel_id);
        log_render(
            self.platform.send_message(user, &text, Some(&keyboard)).await,
            "welcome",
        );
    }

    /// Dispatch a button press. Unknown payloads are acknowledged and ignored.
    pub async fn handle_callback(&self, request: &CallbackRequest) -> Option<GateReport> {
        match request.data.as_deref().and_then(GateAction::parse) {
            Some(GateAction::RequestAsset) => Some(self.request_asset(request).await),
            Some(GateAction::RecheckMembership) => Some(self.recheck_membership(request).await),
            None => {
                warn!(
                    "Ignoring unknown callback {:?} from {}",
                    request.data, request.user
                );
                log_render(
                    self.platform
                        .answer_callback(&request.callback_id, None, false)
                        .await,
                    "callback ack",
                );
                None
            }
        }
    }

    /// "request asset" from a fresh request
    pub async fn request_asset(&self, request: &CallbackRequest) -> GateReport {
        log_render(
            self.platform
                .answer_callback(&request.callback_id, None, false)
                .await,
            "callback ack",
        );

        let mut run = GateRun::start(request.user, GateState::Idle);
        run.advance(GateState::AwaitingDecision);

        let (_, decision) = self
            .oracle
            .decide(request.user, self.settings.fail_policy)
            .await;

        match decision {
            AccessDecision::Granted => {
                run.advance(GateState::Delivering);
                let outcome = self.deliver_and_count(request).await;
                run.finish(outcome)
            }
            AccessDecision::Denied => {
                let (text, keyboard) = render::blocked(&self.settings.channel_url);
                self.show(request, &text, &keyboard).await;
                info!("Blocked {}: not subscribed to {}", request.user, self.settings.channel_id);
                run.finish(GateOutcome::Blocked { notice_only: false })
            }
        }
    }

    /// "recheck membership" pressed on the subscribe prompt
    pub async fn recheck_membership(&self, request: &CallbackRequest) -> GateReport {
        let mut run = GateRun::start(request.user, GateState::Blocked);
        run.advance(GateState::AwaitingDecision);

        let (_, decision) = self
            .oracle
            .decide(request.user, self.settings.fail_policy)
            .await;

        match decision {
            AccessDecision::Granted => {
                log_render(
                    self.platform
                        .answer_callback(&request.callback_id, None, false)
                        .await,
                    "callback ack",
                );
                run.advance(GateState::Delivering);
                let outcome = self.deliver_and_count(request).await;
                run.finish(outcome)
            }
            AccessDecision::Denied => {
                log_render(
                    self.platform
                        .answer_callback(&request.callback_id, Some(render::RECHECK_NOTICE), true)
                        .await,
                    "recheck notice",
                );
                run.finish(GateOutcome::Blocked { notice_only: true })
            }
        }
    }

    /// `/stats`, restricted to the configured admin
    pub async fn handle_stats(&self, user: UserId) -> StatsReply {
        if user != self.settings.admin_id {
            warn!("Rejected stats request from {}", user);
            log_render(
                self.platform
                    .send_message(user, render::STATS_REJECTED, None)
                    .await,
                "stats rejection",
            );
            return StatsReply::Rejected;
        }

        match self.ledger.stats() {
            Ok(stats) => {
                let text = render::stats(&stats);
                log_render(self.platform.send_message(user, &text, None).await, "stats");
                StatsReply::Report(stats)
            }
            Err(e) => {
                error!("Failed to read ledger stats: {}", e);
                let (text, _) = render::generic_failure();
                log_render(self.platform.send_message(user, &text, None).await, "stats");
                StatsReply::Unavailable
            }
        }
    }

    async fn deliver_and_count(&self, request: &CallbackRequest) -> GateOutcome {
        match self.delivery.deliver(request.user).await {
            Ok(DeliveryOutcome::Delivered) => match self.record(request.user).await {
                Ok(receipt) => {
                    let (text, keyboard) =
                        render::delivered(receipt.global_count, &self.settings.channel_url);
                    self.show(request, &text, &keyboard).await;
                    info!(
                        "User {} downloaded (first_time={}). Total: {}",
                        request.user, receipt.first_time, receipt.global_count
                    );
                    GateOutcome::Delivered(receipt)
                }
                Err(e) => {
                    error!(
                        "Delivered to {} but failed to record the download: {}",
                        request.user, e
                    );
                    let (text, keyboard) = render::generic_failure();
                    self.show(request, &text, &keyboard).await;
                    GateOutcome::Failed(FailureReason::Storage)
                }
            },
            Ok(DeliveryOutcome::AssetMissing) => {
                let (text, keyboard) = render::asset_missing(&self.settings.admin_contact_url);
                self.show(request, &text, &keyboard).await;
                GateOutcome::Failed(FailureReason::AssetMissing)
            }
            Err(e) => {
                warn!("Failed to send the asset to {}: {}", request.user, e);
                let (text, keyboard) = render::generic_failure();
                self.show(request, &text, &keyboard).await;
                GateOutcome::Failed(FailureReason::Transport)
            }
        }
    }

    /// Ledger writes block on disk, so they run off the async workers
    async fn record(&self, user: UserId) -> Result<DeliveryReceipt, StorageError> {
        let ledger = self.ledger.clone();
        tokio::task::spawn_blocking(move || ledger.record_delivery(user))
            .await
            .map_err(|e| StorageError::Backend(format!("Ledger task failed: {}", e)))?
    }

    /// Edit the message holding the button, or send a new one
    async fn show(&self, request: &CallbackRequest, text: &str, keyboard: &InlineKeyboard) {
        let result = match request.message {
            Some(message) => {
                self.platform
                    .edit_message(message, text, Some(keyboard))
                    .await
            }
            None => {
                self.platform
                    .send_message(request.user, text, Some(keyboard))
                    .await
            }
        };
        log_render(result, "gate outcome");
    }
}

fn log_render(result: Result<(), PlatformError>, what: &str) {
    if let Err(e) = result {
        warn!("Failed to render {}: {}", what, e);
    }
}
