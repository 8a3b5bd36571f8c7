//! Campaign manager: load, reconcile and mutate campaigns across all file sources.

use std::collections::BTreeSet;

use chrono::Utc;
use ncl_adapters::{
    CampaignSource, ClientCacheSource, ComprehensiveSource, DonationFileSource, LegacySource,
    SourceSnapshot,
};
use ncl_core::{
    new_id, Campaign, CampaignPatch, CampaignReport, CampaignStats, CampaignStatus, CampaignUpdate,
    ClientCacheSnapshot, DonationRecord, DonationStatus, NewCampaign, NewDonation, NewReport,
    NewUpdate, ReportStatus, DEFAULT_CURRENCY,
};
use ncl_storage::{sanitize_id, DataDir};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, info_span, warn, Instrument};

use crate::merge::merge_campaign;
use crate::LedgerError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CampaignFilter {
    pub status: Option<CampaignStatus>,
    #[serde(alias = "ngo")]
    pub ngo_id: Option<String>,
    pub tag: Option<String>,
}

impl CampaignFilter {
    pub fn matches(&self, campaign: &Campaign) -> bool {
        self.status.map_or(true, |s| campaign.status == s)
            && self.ngo_id.as_deref().map_or(true, |n| campaign.ngo_id == n)
            && self
                .tag
                .as_deref()
                .map_or(true, |t| campaign.tags.iter().any(|tag| tag.eq_ignore_ascii_case(t)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject { reason: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub reconciled: usize,
    pub failed: usize,
    pub total_donations: usize,
    pub run_at: chrono::DateTime<Utc>,
}

/// Single-writer owner of the campaign files.
///
/// Every mutating call holds `write_lock` across its read-merge-write cycle.
#[derive(Debug)]
pub struct CampaignManager {
    comprehensive: ComprehensiveSource,
    legacy: LegacySource,
    donation_files: DonationFileSource,
    write_lock: Mutex<()>,
}

impl CampaignManager {
    pub fn new(data: DataDir) -> Self {
        Self {
            comprehensive: ComprehensiveSource::new(data.clone()),
            legacy: LegacySource::new(data.clone()),
            donation_files: DonationFileSource::new(data),
            write_lock: Mutex::new(()),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    async fn collect_snapshots(
        &self,
        campaign_id: &str,
        cache: Option<ClientCacheSnapshot>,
    ) -> Result<Vec<SourceSnapshot>, LedgerError> {
        let cache = cache.map(ClientCacheSource::new);
        let mut sources: Vec<&dyn CampaignSource> = Vec::with_capacity(4);
        sources.push(&self.comprehensive);
        sources.push(&self.legacy);
        sources.push(&self.donation_files);
        if let Some(cache) = &cache {
            sources.push(cache);
        }

        let mut snapshots = Vec::with_capacity(sources.len());
        for source in sources {
            if let Some(snapshot) = source.load(campaign_id).await? {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }

    /// Merged view of a campaign without writing anything back.
    pub async fn load_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>, LedgerError> {
        let campaign_id = sanitize_id(campaign_id)?;
        let snapshots = self.collect_snapshots(campaign_id, None).await?;
        Ok(merge_campaign(campaign_id, snapshots, Utc::now()))
    }

    async fn require_campaign(
        &self,
        campaign_id: &str,
        cache: Option<ClientCacheSnapshot>,
    ) -> Result<Campaign, LedgerError> {
        let campaign_id = sanitize_id(campaign_id)?;
        let snapshots = self.collect_snapshots(campaign_id, cache).await?;
        merge_campaign(campaign_id, snapshots, Utc::now())
            .ok_or_else(|| LedgerError::CampaignNotFound(campaign_id.to_string()))
    }

    /// Recompute stats, then write the comprehensive file, the legacy entry and the donation file.
    async fn persist(&self, campaign: &mut Campaign) -> Result<(), LedgerError> {
        campaign.recompute_stats();
        self.comprehensive.write(campaign).await?;
        self.legacy.upsert(campaign.to_legacy()).await?;
        self.donation_files
            .write(&campaign.id, &campaign.donations, Utc::now())
            .await?;
        Ok(())
    }

    pub async fn reconcile_campaign(
        &self,
        campaign_id: &str,
        cache: Option<ClientCacheSnapshot>,
    ) -> Result<Campaign, LedgerError> {
        let span = info_span!("reconcile_campaign", campaign_id);
        async {
            let _guard = self.lock().await;
            let mut campaign = self.require_campaign(campaign_id, cache).await?;
            self.persist(&mut campaign).await?;
            info!(
                donations = campaign.donations.len(),
                confirmed_amount = campaign.stats.confirmed_amount,
                pending_amount = campaign.stats.pending_amount,
                unique_donors = campaign.stats.unique_donors,
                "campaign reconciled"
            );
            Ok::<_, LedgerError>(campaign)
        }
        .instrument(span)
        .await
    }

    /// Ids known to the legacy array or the comprehensive directory.
    pub async fn known_ids(&self) -> Result<Vec<String>, LedgerError> {
        let mut ids = BTreeSet::new();
        for legacy in self.legacy.read_all().await? {
            if sanitize_id(&legacy.id).is_ok() {
                ids.insert(legacy.id);
            } else {
                warn!(id = %legacy.id, "skipping legacy campaign with unusable id");
            }
        }
        ids.extend(self.comprehensive.known_ids().await?);
        Ok(ids.into_iter().collect())
    }

    pub async fn reconcile_all(&self) -> Result<ReconcileSummary, LedgerError> {
        let mut summary = ReconcileSummary {
            reconciled: 0,
            failed: 0,
            total_donations: 0,
            run_at: Utc::now(),
        };
        for id in self.known_ids().await? {
            match self.reconcile_campaign(&id, None).await {
                Ok(campaign) => {
                    summary.reconciled += 1;
                    summary.total_donations += campaign.donations.len();
                }
                Err(err) => {
                    summary.failed += 1;
                    warn!(campaign_id = %id, error = %err, "reconcile failed");
                }
            }
        }
        info!(
            reconciled = summary.reconciled,
            failed = summary.failed,
            "reconcile-all finished"
        );
        Ok(summary)
    }

    /// Merged campaigns, newest first.
    pub async fn list_campaigns(&self, filter: &CampaignFilter) -> Result<Vec<Campaign>, LedgerError> {
        let mut out = Vec::new();
        for id in self.known_ids().await? {
            match self.load_campaign(&id).await {
                Ok(Some(campaign)) if filter.matches(&campaign) => out.push(campaign),
                Ok(_) => {}
                Err(err) => warn!(campaign_id = %id, error = %err, "skipping unreadable campaign"),
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    pub async fn create_campaign(&self, new: NewCampaign) -> Result<Campaign, LedgerError> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(LedgerError::Validation("title must not be empty".into()));
        }
        if new.ngo_id.trim().is_empty() {
            return Err(LedgerError::Validation("ngoId must not be empty".into()));
        }
        validate_target(new.target_amount)?;

        let _guard = self.lock().await;
        let id = match new.id.as_deref() {
            Some(id) => sanitize_id(id)?.to_string(),
            None => new_id(),
        };
        if self.load_campaign(&id).await?.is_some() {
            return Err(LedgerError::Conflict(format!("campaign {id} already exists")));
        }

        let now = Utc::now();
        let mut campaign = Campaign {
            id,
            title: title.to_string(),
            description: new.description,
            ngo_id: new.ngo_id.trim().to_string(),
            ngo_name: new.ngo_name,
            target_amount: new.target_amount,
            currency: new
                .currency
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            status: CampaignStatus::PendingReview,
            tags: new.tags,
            images: new.images,
            created_at: now,
            updated_at: now,
            end_date: new.end_date,
            stats: CampaignStats::default(),
            donations: Vec::new(),
            updates: Vec::new(),
            reports: Vec::new(),
        };
        self.persist(&mut campaign).await?;
        info!(campaign_id = %campaign.id, ngo_id = %campaign.ngo_id, "campaign created");
        Ok(campaign)
    }

    pub async fn update_campaign(
        &self,
        campaign_id: &str,
        patch: CampaignPatch,
    ) -> Result<Campaign, LedgerError> {
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(LedgerError::Validation("title must not be empty".into()));
            }
        }
        if let Some(target) = patch.target_amount {
            validate_target(target)?;
        }

        let _guard = self.lock().await;
        let mut campaign = self.require_campaign(campaign_id, None).await?;
        if let Some(status) = patch.status {
            check_patch_status(&campaign, status)?;
        }
        if let Some(title) = patch.title {
            campaign.title = title.trim().to_string();
        }
        if let Some(description) = patch.description {
            campaign.description = description;
        }
        if let Some(ngo_name) = patch.ngo_name {
            campaign.ngo_name = Some(ngo_name);
        }
        if let Some(target) = patch.target_amount {
            campaign.target_amount = target;
        }
        if let Some(status) = patch.status {
            campaign.status = status;
        }
        if let Some(tags) = patch.tags {
            campaign.tags = tags;
        }
        if let Some(images) = patch.images {
            campaign.images = images;
        }
        if let Some(end_date) = patch.end_date {
            campaign.end_date = Some(end_date);
        }
        campaign.updated_at = Utc::now();
        self.persist(&mut campaign).await?;
        Ok(campaign)
    }

    /// Admin decision on a campaign waiting in `pending_review`.
    pub async fn review_campaign(
        &self,
        campaign_id: &str,
        decision: ReviewDecision,
    ) -> Result<Campaign, LedgerError> {
        let _guard = self.lock().await;
        let mut campaign = self.require_campaign(campaign_id, None).await?;
        if campaign.status != CampaignStatus::PendingReview {
            return Err(LedgerError::Conflict(format!(
                "campaign {} is {}, not pending_review",
                campaign.id,
                campaign.status.as_str()
            )));
        }
        campaign.status = match &decision {
            ReviewDecision::Approve => CampaignStatus::Active,
            ReviewDecision::Reject { reason } => {
                info!(campaign_id = %campaign.id, reason = %reason, "campaign rejected");
                CampaignStatus::Rejected
            }
        };
        campaign.updated_at = Utc::now();
        self.persist(&mut campaign).await?;
        Ok(campaign)
    }

    /// Append a pending donation. A repeated transaction hash returns the stored record instead.
    pub async fn record_donation(
        &self,
        campaign_id: &str,
        new: NewDonation,
    ) -> Result<(DonationRecord, bool), LedgerError> {
        if !new.amount.is_finite() || new.amount <= 0.0 {
            return Err(LedgerError::Validation("amount must be greater than zero".into()));
        }
        let donor = new.donor_address.trim();
        if donor.is_empty() {
            return Err(LedgerError::Validation("donorAddress must not be empty".into()));
        }
        let tx_hash = new
            .transaction_hash
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(ToString::to_string);

        let _guard = self.lock().await;
        let mut campaign = self.require_campaign(campaign_id, None).await?;
        if let Some(hash) = &tx_hash {
            if let Some(existing) = campaign.find_donation(hash) {
                info!(campaign_id = %campaign.id, tx_hash = %hash, "duplicate donation submission");
                return Ok((existing.clone(), false));
            }
        }
        if campaign.status != CampaignStatus::Active {
            return Err(LedgerError::Conflict(format!(
                "campaign {} is {} and does not accept donations",
                campaign.id,
                campaign.status.as_str()
            )));
        }

        let record = DonationRecord {
            id: new_id(),
            campaign_id: campaign.id.clone(),
            donor_address: donor.to_string(),
            amount: new.amount,
            currency: new
                .currency
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| campaign.currency.clone()),
            transaction_hash: tx_hash,
            status: DonationStatus::Pending,
            timestamp: Utc::now(),
            anonymous: new.anonymous,
            message: new.message,
            confirmed_at: None,
            block_number: None,
        };
        campaign.donations.push(record.clone());
        self.persist(&mut campaign).await?;
        info!(campaign_id = %campaign.id, donation_id = %record.id, amount = record.amount, "donation recorded");
        Ok((record, true))
    }

    /// Move a donation out of `pending`. Terminal states never change.
    pub async fn update_donation_status(
        &self,
        campaign_id: &str,
        tx_hash: &str,
        status: DonationStatus,
        block_number: Option<u64>,
    ) -> Result<DonationRecord, LedgerError> {
        let _guard = self.lock().await;
        let mut campaign = self.require_campaign(campaign_id, None).await?;
        let Some(donation) = campaign.donations.iter_mut().find(|d| d.has_tx_hash(tx_hash)) else {
            return Err(LedgerError::DonationNotFound {
                campaign_id: campaign.id.clone(),
                tx_hash: tx_hash.to_string(),
            });
        };

        if donation.status == status {
            return Ok(donation.clone());
        }
        if donation.status.is_terminal() {
            return Err(LedgerError::Conflict(format!(
                "donation {} is already {}",
                tx_hash,
                donation.status.as_str()
            )));
        }

        donation.status = status;
        donation.block_number = block_number.or(donation.block_number);
        if status == DonationStatus::Confirmed {
            donation.confirmed_at = Some(Utc::now());
        }
        let updated = donation.clone();
        self.persist(&mut campaign).await?;
        info!(
            campaign_id = %campaign.id,
            tx_hash,
            status = updated.status.as_str(),
            "donation status updated"
        );
        Ok(updated)
    }

    pub async fn add_update(
        &self,
        campaign_id: &str,
        new: NewUpdate,
    ) -> Result<CampaignUpdate, LedgerError> {
        if new.title.trim().is_empty() {
            return Err(LedgerError::Validation("update title must not be empty".into()));
        }
        let _guard = self.lock().await;
        let mut campaign = self.require_campaign(campaign_id, None).await?;
        let now = Utc::now();
        let update = CampaignUpdate {
            id: new_id(),
            title: new.title.trim().to_string(),
            content: new.content,
            created_at: now,
            images: new.images,
        };
        campaign.updates.push(update.clone());
        campaign.updated_at = now;
        self.persist(&mut campaign).await?;
        Ok(update)
    }

    pub async fn add_report(
        &self,
        campaign_id: &str,
        new: NewReport,
    ) -> Result<CampaignReport, LedgerError> {
        if new.reason.trim().is_empty() {
            return Err(LedgerError::Validation("report reason must not be empty".into()));
        }
        let _guard = self.lock().await;
        let mut campaign = self.require_campaign(campaign_id, None).await?;
        let report = CampaignReport {
            id: new_id(),
            reason: new.reason.trim().to_string(),
            details: new.details,
            reporter_address: new.reporter_address,
            created_at: Utc::now(),
            status: ReportStatus::Pending,
        };
        campaign.reports.push(report.clone());
        self.persist(&mut campaign).await?;
        warn!(campaign_id = %campaign.id, report_id = %report.id, "campaign reported");
        Ok(report)
    }

    pub async fn resolve_report(
        &self,
        campaign_id: &str,
        report_id: &str,
        outcome: ReportStatus,
    ) -> Result<CampaignReport, LedgerError> {
        if outcome == ReportStatus::Pending {
            return Err(LedgerError::Validation("a report can only be dismissed or upheld".into()));
        }
        let _guard = self.lock().await;
        let mut campaign = self.require_campaign(campaign_id, None).await?;
        let Some(report) = campaign.reports.iter_mut().find(|r| r.id == report_id) else {
            return Err(LedgerError::ReportNotFound(report_id.to_string()));
        };
        if report.status != ReportStatus::Pending {
            return Err(LedgerError::Conflict(format!("report {report_id} is already resolved")));
        }
        report.status = outcome;
        let resolved = report.clone();
        self.persist(&mut campaign).await?;
        Ok(resolved)
    }

    pub async fn campaign_stats(&self, campaign_id: &str) -> Result<CampaignStats, LedgerError> {
        Ok(self.require_campaign(campaign_id, None).await?.stats)
    }

    pub async fn campaign_donations(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<DonationRecord>, LedgerError> {
        Ok(self.require_campaign(campaign_id, None).await?.donations)
    }

    /// Donation history of one donor across every campaign, newest first.
    pub async fn donations_by_donor(&self, address: &str) -> Result<Vec<DonationRecord>, LedgerError> {
        let address = address.trim();
        let mut out = self
            .list_campaigns(&CampaignFilter::default())
            .await?
            .into_iter()
            .flat_map(|c| c.donations)
            .filter(|d| d.donor_address.trim().eq_ignore_ascii_case(address))
            .collect::<Vec<_>>();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }

    /// Pending donations that carry a transaction hash, as `(campaign_id, donation)`.
    pub async fn pending_donations(&self) -> Result<Vec<(String, DonationRecord)>, LedgerError> {
        Ok(self
            .list_campaigns(&CampaignFilter::default())
            .await?
            .into_iter()
            .flat_map(|c| {
                let id = c.id;
                c.donations
                    .into_iter()
                    .filter(|d| d.status == DonationStatus::Pending && d.transaction_hash.is_some())
                    .map(move |d| (id.clone(), d))
            })
            .collect())
    }
}

/// Moves into or out of `pending_review` and `rejected` belong to the admin review.
fn check_patch_status(campaign: &Campaign, next: CampaignStatus) -> Result<(), LedgerError> {
    let gated = |s: CampaignStatus| matches!(s, CampaignStatus::PendingReview | CampaignStatus::Rejected);
    if next != campaign.status && (gated(campaign.status) || gated(next)) {
        return Err(LedgerError::Conflict(format!(
            "campaign {} cannot move from {} to {} without review",
            campaign.id,
            campaign.status.as_str(),
            next.as_str()
        )));
    }
    Ok(())
}

fn validate_target(target: f64) -> Result<(), LedgerError> {
    if target.is_finite() && target > 0.0 {
        Ok(())
    } else {
        Err(LedgerError::Validation("targetAmount must be greater than zero".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ncl_core::LegacyCampaign;
    use tempfile::tempdir;

    fn new_campaign(id: &str) -> NewCampaign {
        NewCampaign {
            id: Some(id.into()),
            title: "School Meals".into(),
            description: "Lunch for 200 pupils".into(),
            ngo_id: "ngo-7".into(),
            target_amount: 10.0,
            tags: vec!["education".into()],
            ..Default::default()
        }
    }

    fn donation_input(donor: &str, amount: f64, hash: &str) -> NewDonation {
        NewDonation {
            donor_address: donor.into(),
            amount,
            currency: None,
            transaction_hash: Some(hash.into()),
            anonymous: false,
            message: None,
        }
    }

    async fn active_campaign(manager: &CampaignManager, id: &str) -> Campaign {
        manager.create_campaign(new_campaign(id)).await.expect("create");
        manager
            .review_campaign(id, ReviewDecision::Approve)
            .await
            .expect("approve")
    }

    #[tokio::test]
    async fn create_writes_comprehensive_legacy_and_donation_files() {
        let dir = tempdir().expect("tempdir");
        let manager = CampaignManager::new(DataDir::new(dir.path()));
        let campaign = manager.create_campaign(new_campaign("c1")).await.expect("create");

        assert_eq!(campaign.status, CampaignStatus::PendingReview);
        assert!(dir.path().join("campaigns/campaign_c1.json").exists());
        assert!(dir.path().join("donations/c1.json").exists());
        let legacy: Vec<LegacyCampaign> =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("campaigns.json")).unwrap())
                .unwrap();
        assert_eq!(legacy.len(), 1);
        assert_eq!(legacy[0].raised_amount, Some(0.0));

        let again = manager.create_campaign(new_campaign("c1")).await;
        assert!(matches!(again, Err(LedgerError::Conflict(_))));
    }

    #[tokio::test]
    async fn create_validates_input() {
        let dir = tempdir().expect("tempdir");
        let manager = CampaignManager::new(DataDir::new(dir.path()));
        let mut bad = new_campaign("c1");
        bad.target_amount = 0.0;
        assert!(matches!(
            manager.create_campaign(bad).await,
            Err(LedgerError::Validation(_))
        ));
        let mut bad = new_campaign("c1");
        bad.title = "  ".into();
        assert!(matches!(
            manager.create_campaign(bad).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn donations_require_an_active_campaign_and_dedup_by_hash() {
        let dir = tempdir().expect("tempdir");
        let manager = CampaignManager::new(DataDir::new(dir.path()));
        manager.create_campaign(new_campaign("c1")).await.unwrap();

        let early = manager
            .record_donation("c1", donation_input("0xA", 1.0, "0x01"))
            .await;
        assert!(matches!(early, Err(LedgerError::Conflict(_))));

        manager.review_campaign("c1", ReviewDecision::Approve).await.unwrap();
        let (first, created) = manager
            .record_donation("c1", donation_input("0xA", 1.0, "0xAB"))
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.status, DonationStatus::Pending);

        let (dup, created) = manager
            .record_donation("c1", donation_input("0xA", 1.0, "0xab"))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(dup.id, first.id);

        let stats = manager.campaign_stats("c1").await.unwrap();
        assert_eq!(stats.total_donations, 1);
        assert_eq!(stats.pending_amount, 1.0);
    }

    #[tokio::test]
    async fn status_transitions_are_one_way() {
        let dir = tempdir().expect("tempdir");
        let manager = CampaignManager::new(DataDir::new(dir.path()));
        active_campaign(&manager, "c1").await;
        manager
            .record_donation("c1", donation_input("0xA", 2.5, "0xfeed"))
            .await
            .unwrap();

        let confirmed = manager
            .update_donation_status("c1", "0xFEED", DonationStatus::Confirmed, Some(12))
            .await
            .unwrap();
        assert_eq!(confirmed.status, DonationStatus::Confirmed);
        assert_eq!(confirmed.block_number, Some(12));
        assert!(confirmed.confirmed_at.is_some());

        let same = manager
            .update_donation_status("c1", "0xfeed", DonationStatus::Confirmed, None)
            .await
            .unwrap();
        assert_eq!(same.block_number, Some(12));

        let flip = manager
            .update_donation_status("c1", "0xfeed", DonationStatus::Failed, None)
            .await;
        assert!(matches!(flip, Err(LedgerError::Conflict(_))));

        let missing = manager
            .update_donation_status("c1", "0xnope", DonationStatus::Failed, None)
            .await;
        assert!(matches!(missing, Err(LedgerError::DonationNotFound { .. })));

        let stats = manager.campaign_stats("c1").await.unwrap();
        assert_eq!(stats.confirmed_amount, 2.5);
        assert_eq!(stats.progress_percent, 25.0);
    }

    #[tokio::test]
    async fn reconcile_merges_legacy_only_campaign_and_orphan_donation_file() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("campaigns.json"),
            r#"[{"id":"7","title":"Flood Relief","ngoId":"ngo-2","targetAmount":20,"status":"active","raisedAmount":99}]"#,
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("donations")).unwrap();
        std::fs::write(
            dir.path().join("donations/7.json"),
            r#"[{"id":"d1","donorAddress":"0xAA","amount":4,"transactionHash":"0x1","status":"confirmed","timestamp":"2026-01-02T00:00:00Z"},
                {"id":"d2","donorAddress":"0xaa","amount":1,"transactionHash":"0x2","status":"pending","timestamp":"2026-01-03T00:00:00Z"}]"#,
        )
        .unwrap();

        let manager = CampaignManager::new(DataDir::new(dir.path()));
        let cache = ClientCacheSnapshot {
            donations: vec![DonationRecord {
                id: "local".into(),
                campaign_id: "7".into(),
                donor_address: "0xBB".into(),
                amount: 0.5,
                currency: "ETH".into(),
                transaction_hash: Some("0x3".into()),
                status: DonationStatus::Pending,
                timestamp: Utc.with_ymd_and_hms(2026, 1, 4, 0, 0, 0).single().unwrap(),
                anonymous: true,
                message: None,
                confirmed_at: None,
                block_number: None,
            }],
            campaign: None,
            cached_at: None,
        };
        let campaign = manager.reconcile_campaign("7", Some(cache)).await.expect("reconcile");

        assert_eq!(campaign.title, "Flood Relief");
        assert_eq!(campaign.donations.len(), 3);
        assert_eq!(campaign.stats.confirmed_amount, 4.0);
        assert_eq!(campaign.stats.pending_amount, 1.5);
        assert_eq!(campaign.stats.unique_donors, 2);

        // Written back: the comprehensive copy now carries the cached donation, and the
        // legacy projection has recomputed totals instead of the stale 99.
        let reloaded = manager.load_campaign("7").await.unwrap().unwrap();
        assert_eq!(reloaded.donations.len(), 3);
        let legacy: Vec<LegacyCampaign> =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("campaigns.json")).unwrap())
                .unwrap();
        assert_eq!(legacy[0].raised_amount, Some(4.0));
        assert_eq!(legacy[0].donor_count, Some(2));
    }

    #[tokio::test]
    async fn unknown_campaign_is_not_found() {
        let dir = tempdir().expect("tempdir");
        let manager = CampaignManager::new(DataDir::new(dir.path()));
        assert!(manager.load_campaign("ghost").await.unwrap().is_none());
        assert!(matches!(
            manager.reconcile_campaign("ghost", None).await,
            Err(LedgerError::CampaignNotFound(_))
        ));
    }

    #[tokio::test]
    async fn listing_filters_and_donor_history() {
        let dir = tempdir().expect("tempdir");
        let manager = CampaignManager::new(DataDir::new(dir.path()));
        active_campaign(&manager, "c1").await;
        let mut other = new_campaign("c2");
        other.ngo_id = "ngo-9".into();
        other.tags = vec!["health".into()];
        manager.create_campaign(other).await.unwrap();

        manager
            .record_donation("c1", donation_input("0xDonor", 1.0, "0x10"))
            .await
            .unwrap();

        let active = manager
            .list_campaigns(&CampaignFilter {
                status: Some(CampaignStatus::Active),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "c1");

        let health = manager
            .list_campaigns(&CampaignFilter {
                tag: Some("HEALTH".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(health.len(), 1);
        assert_eq!(health[0].id, "c2");

        let history = manager.donations_by_donor("0xdonor").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(manager.pending_donations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn updates_reports_and_review_rules() {
        let dir = tempdir().expect("tempdir");
        let manager = CampaignManager::new(DataDir::new(dir.path()));
        active_campaign(&manager, "c1").await;

        let again = manager.review_campaign("c1", ReviewDecision::Approve).await;
        assert!(matches!(again, Err(LedgerError::Conflict(_))));

        manager
            .add_update(
                "c1",
                NewUpdate {
                    title: "First wells dug".into(),
                    content: "Three of ten done".into(),
                    images: vec![],
                },
            )
            .await
            .unwrap();
        let report = manager
            .add_report(
                "c1",
                NewReport {
                    reason: "misleading photos".into(),
                    details: None,
                    reporter_address: Some("0xR".into()),
                },
            )
            .await
            .unwrap();

        let resolved = manager
            .resolve_report("c1", &report.id, ReportStatus::Upheld)
            .await
            .unwrap();
        assert_eq!(resolved.status, ReportStatus::Upheld);
        assert!(matches!(
            manager.resolve_report("c1", &report.id, ReportStatus::Dismissed).await,
            Err(LedgerError::Conflict(_))
        ));

        let campaign = manager.load_campaign("c1").await.unwrap().unwrap();
        assert_eq!(campaign.updates.len(), 1);
        assert_eq!(campaign.reports.len(), 1);
    }

    #[tokio::test]
    async fn patch_cannot_bypass_admin_review() {
        let dir = tempdir().expect("tempdir");
        let manager = CampaignManager::new(DataDir::new(dir.path()));
        manager.create_campaign(new_campaign("c1")).await.unwrap();

        let activate = CampaignPatch {
            status: Some(CampaignStatus::Active),
            ..Default::default()
        };
        assert!(matches!(
            manager.update_campaign("c1", activate.clone()).await,
            Err(LedgerError::Conflict(_))
        ));
        assert!(matches!(
            manager
                .record_donation("c1", donation_input("0xD", 1.0, "0x99"))
                .await,
            Err(LedgerError::Conflict(_))
        ));

        // Same status and non-status edits still go through while pending.
        let edited = manager
            .update_campaign(
                "c1",
                CampaignPatch {
                    title: Some("School Meals 2026".into()),
                    status: Some(CampaignStatus::PendingReview),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.status, CampaignStatus::PendingReview);

        manager.review_campaign("c1", ReviewDecision::Approve).await.unwrap();
        let paused = manager
            .update_campaign(
                "c1",
                CampaignPatch {
                    status: Some(CampaignStatus::Paused),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(paused.status, CampaignStatus::Paused);
        assert_eq!(
            manager.update_campaign("c1", activate).await.unwrap().status,
            CampaignStatus::Active
        );
        assert!(matches!(
            manager
                .update_campaign(
                    "c1",
                    CampaignPatch {
                        status: Some(CampaignStatus::Rejected),
                        ..Default::default()
                    },
                )
                .await,
            Err(LedgerError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn comprehensive_file_without_title_merges_with_legacy_entry() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("campaigns.json"),
            r#"[{"id":"9","title":"Legacy Title","ngoId":"ngo-3","targetAmount":5,"status":"active"}]"#,
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("campaigns")).unwrap();
        std::fs::write(
            dir.path().join("campaigns/campaign_9.json"),
            r#"{"id":"9","description":"Newer text","stats":{"totalAmount":1}}"#,
        )
        .unwrap();
        let manager = CampaignManager::new(DataDir::new(dir.path()));

        let campaign = manager.load_campaign("9").await.unwrap().expect("known");
        assert_eq!(campaign.title, "Legacy Title");
        assert_eq!(campaign.description, "Newer text");
        assert_eq!(campaign.status, CampaignStatus::Active);

        let summary = manager.reconcile_all().await.unwrap();
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.reconciled, 1);
    }
}
