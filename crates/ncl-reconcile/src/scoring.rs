//! NGO reputation scoring from campaign history.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use ncl_core::{
    Campaign, CampaignStatus, NgoScore, ReportStatus, ScoreEvent, ScoreEventKind, ScoreTier,
    WithdrawalRequest, WithdrawalStatus,
};
use ncl_storage::{read_json_opt, write_json_atomic, DataDir};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::manager::{CampaignFilter, CampaignManager};
use crate::withdrawals::WithdrawalLedger;
use crate::LedgerError;

/// Weights applied by [`calculate_ngo_score`]. Any key may be overridden from `scoring.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub max_score: f64,
    pub upheld_report_penalty: f64,
    pub pending_report_penalty: f64,
    pub rejected_withdrawal_penalty: f64,
    pub missing_withdrawal_update_penalty: f64,
    pub withdrawal_update_window_days: i64,
    pub inactivity_penalty: f64,
    pub inactivity_window_days: i64,
    pub update_bonus: f64,
    pub update_bonus_cap_per_campaign: f64,
    pub completed_campaign_bonus: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_score: 100.0,
            upheld_report_penalty: 15.0,
            pending_report_penalty: 3.0,
            rejected_withdrawal_penalty: 10.0,
            missing_withdrawal_update_penalty: 5.0,
            withdrawal_update_window_days: 30,
            inactivity_penalty: 5.0,
            inactivity_window_days: 30,
            update_bonus: 2.0,
            update_bonus_cap_per_campaign: 10.0,
            completed_campaign_bonus: 5.0,
        }
    }
}

/// Longest window a config may ask for.
pub const MAX_WINDOW_DAYS: i64 = 36_500;

impl ScoringConfig {
    /// Defaults when the file is absent.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: Self = match std::fs::read_to_string(path) {
            Ok(text) => {
                serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
        };
        config
            .validate()
            .with_context(|| format!("invalid scoring config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, days) in [
            ("withdrawal_update_window_days", self.withdrawal_update_window_days),
            ("inactivity_window_days", self.inactivity_window_days),
        ] {
            if !(0..=MAX_WINDOW_DAYS).contains(&days) {
                anyhow::bail!("{name} must be between 0 and {MAX_WINDOW_DAYS}, got {days}");
            }
        }
        if !self.max_score.is_finite() || self.max_score <= 0.0 {
            anyhow::bail!("max_score must be a positive number");
        }
        Ok(())
    }
}

fn window(days: i64) -> Duration {
    Duration::days(days.clamp(0, MAX_WINDOW_DAYS))
}

/// Recompute an NGO's score from scratch. Pure: same inputs and `now`, same result.
pub fn calculate_ngo_score(
    ngo_id: &str,
    campaigns: &[Campaign],
    withdrawals: &[WithdrawalRequest],
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> NgoScore {
    let mut history = Vec::new();

    let mut own_campaigns = campaigns.iter().filter(|c| c.ngo_id == ngo_id).collect::<Vec<_>>();
    own_campaigns.sort_by(|a, b| a.id.cmp(&b.id));

    for campaign in &own_campaigns {
        for report in &campaign.reports {
            let (kind, delta) = match report.status {
                ReportStatus::Upheld => (ScoreEventKind::UpheldReport, -config.upheld_report_penalty),
                ReportStatus::Pending => (ScoreEventKind::PendingReport, -config.pending_report_penalty),
                ReportStatus::Dismissed => continue,
            };
            history.push(ScoreEvent {
                kind,
                delta,
                campaign_id: Some(campaign.id.clone()),
                description: format!("report: {}", report.reason),
                at: report.created_at,
            });
        }

        let mut updates = campaign.updates.iter().collect::<Vec<_>>();
        updates.sort_by_key(|u| u.created_at);
        let mut awarded = 0.0;
        for update in updates {
            let delta = config
                .update_bonus
                .min(config.update_bonus_cap_per_campaign - awarded);
            if delta <= 0.0 {
                break;
            }
            awarded += delta;
            history.push(ScoreEvent {
                kind: ScoreEventKind::CampaignUpdate,
                delta,
                campaign_id: Some(campaign.id.clone()),
                description: format!("update: {}", update.title),
                at: update.created_at,
            });
        }

        if campaign.status == CampaignStatus::Active {
            let last_activity = campaign
                .updates
                .iter()
                .map(|u| u.created_at)
                .max()
                .map_or(campaign.created_at, |u| u.max(campaign.created_at));
            if now - last_activity > window(config.inactivity_window_days) {
                history.push(ScoreEvent {
                    kind: ScoreEventKind::InactiveCampaign,
                    delta: -config.inactivity_penalty,
                    campaign_id: Some(campaign.id.clone()),
                    description: format!(
                        "no update in {} days",
                        (now - last_activity).num_days()
                    ),
                    at: now,
                });
            }
        }

        if campaign.status == CampaignStatus::Completed {
            history.push(ScoreEvent {
                kind: ScoreEventKind::CompletedCampaign,
                delta: config.completed_campaign_bonus,
                campaign_id: Some(campaign.id.clone()),
                description: "campaign completed".into(),
                at: campaign.updated_at,
            });
        }
    }

    let mut own_withdrawals = withdrawals.iter().filter(|w| w.ngo_id == ngo_id).collect::<Vec<_>>();
    own_withdrawals.sort_by_key(|w| w.requested_at);
    let grace = window(config.withdrawal_update_window_days);

    for withdrawal in own_withdrawals {
        let reviewed_at = withdrawal.reviewed_at.unwrap_or(withdrawal.requested_at);
        match withdrawal.status {
            WithdrawalStatus::Rejected => history.push(ScoreEvent {
                kind: ScoreEventKind::RejectedWithdrawal,
                delta: -config.rejected_withdrawal_penalty,
                campaign_id: Some(withdrawal.campaign_id.clone()),
                description: format!("withdrawal {} rejected", withdrawal.id),
                at: reviewed_at,
            }),
            WithdrawalStatus::Approved if now - reviewed_at >= grace => {
                let accounted_for = own_campaigns
                    .iter()
                    .filter(|c| c.id == withdrawal.campaign_id)
                    .flat_map(|c| c.updates.iter())
                    .any(|u| u.created_at >= reviewed_at && u.created_at <= reviewed_at + grace);
                if !accounted_for {
                    history.push(ScoreEvent {
                        kind: ScoreEventKind::MissingWithdrawalUpdate,
                        delta: -config.missing_withdrawal_update_penalty,
                        campaign_id: Some(withdrawal.campaign_id.clone()),
                        description: format!(
                            "no campaign update within {} days of withdrawal {}",
                            config.withdrawal_update_window_days, withdrawal.id
                        ),
                        at: reviewed_at + grace,
                    });
                }
            }
            _ => {}
        }
    }

    let raw = config.max_score + history.iter().map(|e| e.delta).sum::<f64>();
    let current_score = raw.clamp(0.0, config.max_score);
    NgoScore {
        ngo_id: ngo_id.to_string(),
        current_score,
        max_score: config.max_score,
        tier: ScoreTier::from_score(current_score),
        history,
        calculated_at: now,
    }
}

/// Recomputes scores on request and keeps `ngo-scores.json` current.
#[derive(Debug)]
pub struct ScoreService {
    data: DataDir,
    config: ScoringConfig,
    campaigns: Arc<CampaignManager>,
    withdrawals: Arc<WithdrawalLedger>,
    write_lock: Mutex<()>,
}

impl ScoreService {
    pub fn new(
        data: DataDir,
        config: ScoringConfig,
        campaigns: Arc<CampaignManager>,
        withdrawals: Arc<WithdrawalLedger>,
    ) -> Self {
        Self {
            data,
            config,
            campaigns,
            withdrawals,
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub async fn refresh(&self, ngo_id: &str) -> Result<NgoScore, LedgerError> {
        let campaigns = self
            .campaigns
            .list_campaigns(&CampaignFilter {
                ngo_id: Some(ngo_id.to_string()),
                ..Default::default()
            })
            .await?;
        let withdrawals = self.withdrawals.list(None).await?;
        if campaigns.is_empty() && !withdrawals.iter().any(|w| w.ngo_id == ngo_id) {
            return Err(LedgerError::NgoNotFound(ngo_id.to_string()));
        }

        let score = calculate_ngo_score(ngo_id, &campaigns, &withdrawals, &self.config, Utc::now());

        let _guard = self.write_lock.lock().await;
        let mut all = self.stored_scores().await?;
        all.insert(ngo_id.to_string(), score.clone());
        write_json_atomic(&self.data.ngo_scores_path(), &all).await?;
        info!(ngo_id, score = score.current_score, tier = ?score.tier, "ngo score refreshed");
        Ok(score)
    }

    pub async fn stored_scores(&self) -> Result<BTreeMap<String, NgoScore>, LedgerError> {
        Ok(read_json_opt(&self.data.ngo_scores_path())
            .await?
            .unwrap_or_default())
    }
}
