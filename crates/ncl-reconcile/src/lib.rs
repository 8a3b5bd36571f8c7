//! Reconciliation, scoring and background jobs over the campaign data directory.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ncl_adapters::{JsonRpcStatusSource, SourceError, TransactionStatusSource};
use ncl_storage::{DataDir, HttpClientConfig, JsonRpcClient, StorageError};
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

mod export;
mod manager;
mod merge;
mod review;
mod scoring;
mod tracker;
mod withdrawals;

pub use export::{export_snapshot, export_snapshot_async, SnapshotFile, SnapshotManifest};
pub use manager::{CampaignFilter, CampaignManager, ReconcileSummary, ReviewDecision};
pub use merge::{merge_campaign, merge_donations};
pub use review::{
    build_review_queue, DuplicateCandidate, DuplicateConfig, DuplicateDetector, DuplicateVerdict,
    OpenReport, PendingCampaign, ReviewQueue,
};
pub use scoring::{calculate_ngo_score, ScoreService, ScoringConfig};
pub use tracker::{ConfirmationSummary, ConfirmationTracker};
pub use withdrawals::{WithdrawalDecision, WithdrawalInput, WithdrawalLedger};

pub const CRATE_NAME: &str = "ncl-reconcile";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("campaign {0} not found")]
    CampaignNotFound(String),
    #[error("donation {tx_hash} not found in campaign {campaign_id}")]
    DonationNotFound { campaign_id: String, tx_hash: String },
    #[error("report {0} not found")]
    ReportNotFound(String),
    #[error("withdrawal {0} not found")]
    WithdrawalNotFound(String),
    #[error("ngo {0} has no campaigns or withdrawals")]
    NgoNotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::CampaignNotFound(_)
                | Self::DonationNotFound { .. }
                | Self::ReportNotFound(_)
                | Self::WithdrawalNotFound(_)
                | Self::NgoNotFound(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub data_dir: PathBuf,
    pub export_dir: PathBuf,
    pub web_port: u16,
    pub rpc_url: Option<String>,
    pub scheduler_enabled: bool,
    pub reconcile_cron: String,
    pub confirm_cron: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl PlatformConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("NCL_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./mock")),
            export_dir: std::env::var("NCL_EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./exports")),
            web_port: std::env::var("NCL_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            rpc_url: std::env::var("NCL_RPC_URL").ok().filter(|v| !v.trim().is_empty()),
            scheduler_enabled: std::env::var("NCL_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            reconcile_cron: std::env::var("NCL_RECONCILE_CRON")
                .unwrap_or_else(|_| "0 */10 * * * *".to_string()),
            confirm_cron: std::env::var("NCL_CONFIRM_CRON")
                .unwrap_or_else(|_| "0 * * * * *".to_string()),
            user_agent: std::env::var("NCL_USER_AGENT")
                .unwrap_or_else(|_| "ncl-ledger/0.1".to_string()),
            http_timeout_secs: std::env::var("NCL_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        }
    }

    /// Config rooted at `data_dir` with everything else at its default; used by tests and tools.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            export_dir: data_dir.join("exports"),
            data_dir,
            web_port: 3000,
            rpc_url: None,
            scheduler_enabled: false,
            reconcile_cron: "0 */10 * * * *".to_string(),
            confirm_cron: "0 * * * * *".to_string(),
            user_agent: "ncl-ledger/0.1".to_string(),
            http_timeout_secs: 20,
        }
    }
}

/// All services over one data directory, wired once per process.
pub struct Platform {
    pub config: PlatformConfig,
    pub campaigns: Arc<CampaignManager>,
    pub withdrawals: Arc<WithdrawalLedger>,
    pub scores: Arc<ScoreService>,
    pub tracker: Option<Arc<ConfirmationTracker>>,
}

impl Platform {
    pub fn open(config: PlatformConfig) -> Result<Self> {
        let status = match &config.rpc_url {
            Some(url) => {
                let client = JsonRpcClient::new(
                    url.clone(),
                    HttpClientConfig {
                        timeout: Duration::from_secs(config.http_timeout_secs),
                        user_agent: Some(config.user_agent.clone()),
                        ..HttpClientConfig::default()
                    },
                )
                .with_context(|| format!("building rpc client for {url}"))?;
                Some(Arc::new(JsonRpcStatusSource::new(client)) as Arc<dyn TransactionStatusSource>)
            }
            None => None,
        };
        Self::with_status_source(config, status)
    }

    pub fn with_status_source(
        config: PlatformConfig,
        status: Option<Arc<dyn TransactionStatusSource>>,
    ) -> Result<Self> {
        let data = DataDir::new(&config.data_dir);
        let scoring = ScoringConfig::load(&data.scoring_config_path())?;
        let campaigns = Arc::new(CampaignManager::new(data.clone()));
        let withdrawals = Arc::new(WithdrawalLedger::new(data.clone(), campaigns.clone()));
        let scores = Arc::new(ScoreService::new(
            data,
            scoring,
            campaigns.clone(),
            withdrawals.clone(),
        ));
        let tracker = status.map(|s| Arc::new(ConfirmationTracker::new(campaigns.clone(), s)));
        if tracker.is_none() {
            info!("no transaction status source configured; confirmation tracker disabled");
        }
        Ok(Self {
            config,
            campaigns,
            withdrawals,
            scores,
            tracker,
        })
    }

    pub async fn review_queue(&self) -> Result<ReviewQueue, LedgerError> {
        let campaigns = self.campaigns.list_campaigns(&CampaignFilter::default()).await?;
        let withdrawals = self.withdrawals.list(None).await?;
        Ok(build_review_queue(
            &campaigns,
            &withdrawals,
            &DuplicateDetector::new(DuplicateConfig::default()),
        ))
    }

    /// Refresh every NGO's score and write a parquet snapshot of the whole ledger.
    pub async fn export_snapshot(&self) -> Result<PathBuf, LedgerError> {
        let campaigns = self.campaigns.list_campaigns(&CampaignFilter::default()).await?;
        let ngo_ids = campaigns
            .iter()
            .map(|c| c.ngo_id.clone())
            .filter(|id| !id.is_empty())
            .collect::<BTreeSet<_>>();
        let mut scores = Vec::with_capacity(ngo_ids.len());
        for ngo_id in ngo_ids {
            scores.push(self.scores.refresh(&ngo_id).await?);
        }
        Ok(export_snapshot_async(self.config.export_dir.clone(), campaigns, scores).await?)
    }

    /// Scheduler with the reconcile-all job and, when a status source exists, the tracker job.
    pub async fn maybe_build_scheduler(&self) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;

        let campaigns = self.campaigns.clone();
        let cron = self.config.reconcile_cron.as_str();
        let job = Job::new_async(cron, move |_uuid, _l| {
            let campaigns = campaigns.clone();
            Box::pin(async move {
                if let Err(err) = campaigns.reconcile_all().await {
                    warn!(error = %err, "scheduled reconcile failed");
                }
            })
        })
        .with_context(|| format!("creating reconcile job for cron {cron}"))?;
        sched.add(job).await.context("adding reconcile job")?;

        if let Some(tracker) = &self.tracker {
            let tracker = tracker.clone();
            let cron = self.config.confirm_cron.as_str();
            let job = Job::new_async(cron, move |_uuid, _l| {
                let tracker = tracker.clone();
                Box::pin(async move {
                    if let Err(err) = tracker.run_once().await {
                        warn!(error = %err, "scheduled confirmation pass failed");
                    }
                })
            })
            .with_context(|| format!("creating confirmation job for cron {cron}"))?;
            sched.add(job).await.context("adding confirmation job")?;
        }

        Ok(Some(sched))
    }

    /// Build and start the scheduler. Keep the returned handle alive for as long as jobs should run.
    pub async fn start_scheduler(&self) -> Result<Option<JobScheduler>> {
        let Some(sched) = self.maybe_build_scheduler().await? else {
            return Ok(None);
        };
        sched.start().await.context("starting scheduler")?;
        info!(
            reconcile_cron = %self.config.reconcile_cron,
            confirm_cron = %self.config.confirm_cron,
            tracker = self.tracker.is_some(),
            "scheduler started"
        );
        Ok(Some(sched))
    }
}

pub async fn reconcile_all_from_env() -> Result<ReconcileSummary> {
    let platform = Platform::open(PlatformConfig::from_env())?;
    Ok(platform.campaigns.reconcile_all().await?)
}
