//! Core domain model for NCL campaigns, donations and NGO reputation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "ncl-core";

pub const DEFAULT_CURRENCY: &str = "ETH";
pub const DEFAULT_CAMPAIGN_TITLE: &str = "Untitled campaign";

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

/// Fresh identifier in the compact form used across the data files.
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Lifecycle of a campaign. Request bodies must use the canonical names; stored files go
/// through [`lenient_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    #[default]
    PendingReview,
    Active,
    Paused,
    Completed,
    Rejected,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingReview => "pending_review",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "draft" => Self::Draft,
            "active" | "approved" | "live" => Self::Active,
            "paused" | "inactive" => Self::Paused,
            "completed" | "ended" | "closed" => Self::Completed,
            "rejected" => Self::Rejected,
            _ => Self::PendingReview,
        }
    }
}

/// Status field of a stored campaign. Older writers used spellings like `approved` or
/// `awaiting approval`; anything unrecognised lands in `pending_review`.
pub fn lenient_status<'de, D>(deserializer: D) -> Result<Option<CampaignStatus>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.map(|s| CampaignStatus::parse_lenient(&s)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    #[default]
    Pending,
    Confirmed,
    Failed,
}

impl DonationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Ordering used when two copies of the same donation disagree.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Confirmed | Self::Failed => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationRecord {
    pub id: String,
    #[serde(default)]
    pub campaign_id: String,
    pub donor_address: String,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub status: DonationStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

impl DonationRecord {
    /// Lower-cased transaction hash, or the record id when the donation never reached the chain.
    pub fn dedup_key(&self) -> String {
        match self.transaction_hash.as_deref().map(str::trim) {
            Some(hash) if !hash.is_empty() => hash.to_ascii_lowercase(),
            _ => format!("id:{}", self.id),
        }
    }

    pub fn has_tx_hash(&self, tx_hash: &str) -> bool {
        self.transaction_hash
            .as_deref()
            .is_some_and(|h| h.trim().eq_ignore_ascii_case(tx_hash.trim()))
    }

    pub fn counts_toward_totals(&self) -> bool {
        self.status != DonationStatus::Failed
    }
}

/// Aggregates derived from a campaign's donations. Never maintained incrementally.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStats {
    pub total_donations: usize,
    pub confirmed_donations: usize,
    pub pending_donations: usize,
    pub total_amount: f64,
    pub confirmed_amount: f64,
    pub pending_amount: f64,
    pub unique_donors: usize,
    pub progress_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_donation_at: Option<DateTime<Utc>>,
}

impl CampaignStats {
    pub fn compute(donations: &[DonationRecord], target_amount: f64) -> Self {
        let mut stats = Self::default();
        let mut donors = HashSet::new();

        for donation in donations.iter().filter(|d| d.counts_toward_totals()) {
            stats.total_donations += 1;
            match donation.status {
                DonationStatus::Confirmed => {
                    stats.confirmed_donations += 1;
                    stats.confirmed_amount += donation.amount;
                }
                DonationStatus::Pending => {
                    stats.pending_donations += 1;
                    stats.pending_amount += donation.amount;
                }
                DonationStatus::Failed => {}
            }
            let donor = donation.donor_address.trim().to_ascii_lowercase();
            if !donor.is_empty() {
                donors.insert(donor);
            }
            stats.last_donation_at = stats.last_donation_at.max(Some(donation.timestamp));
        }

        stats.total_amount = stats.confirmed_amount + stats.pending_amount;
        stats.unique_donors = donors.len();
        stats.progress_percent = if target_amount > 0.0 {
            stats.confirmed_amount / target_amount * 100.0
        } else {
            0.0
        };
        stats
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignUpdate {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    Pending,
    Dismissed,
    Upheld,
}

/// Donor-filed flag against a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignReport {
    pub id: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter_address: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: ReportStatus,
}

/// Comprehensive campaign representation: the preferred on-disk form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ngo_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ngo_name: Option<String>,
    #[serde(default)]
    pub target_amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub status: CampaignStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: CampaignStats,
    #[serde(default)]
    pub donations: Vec<DonationRecord>,
    #[serde(default)]
    pub updates: Vec<CampaignUpdate>,
    #[serde(default)]
    pub reports: Vec<CampaignReport>,
}

impl Campaign {
    pub fn recompute_stats(&mut self) {
        self.stats = CampaignStats::compute(&self.donations, self.target_amount);
    }

    pub fn find_donation(&self, tx_hash: &str) -> Option<&DonationRecord> {
        self.donations.iter().find(|d| d.has_tx_hash(tx_hash))
    }

    /// Flat projection written back into `campaigns.json`.
    pub fn to_legacy(&self) -> LegacyCampaign {
        LegacyCampaign {
            id: self.id.clone(),
            title: Some(self.title.clone()),
            description: Some(self.description.clone()),
            ngo_id: Some(self.ngo_id.clone()),
            ngo_name: self.ngo_name.clone(),
            target_amount: Some(self.target_amount),
            raised_amount: Some(self.stats.confirmed_amount),
            donor_count: Some(self.stats.unique_donors),
            currency: Some(self.currency.clone()),
            status: Some(self.status),
            tags: self.tags.clone(),
            images: self.images.clone(),
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
            end_date: self.end_date,
            extra: serde_json::Map::new(),
        }
    }
}

/// Entry of the flat `campaigns.json` array. Only `id` is guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyCampaign {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ngo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ngo_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raised_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub donor_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_status",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<CampaignStatus>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// Fields written by older UI code that this crate does not model; carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LegacyCampaign {
    pub fn fields(&self) -> CampaignFields {
        CampaignFields {
            title: self.title.clone(),
            description: self.description.clone(),
            ngo_id: self.ngo_id.clone(),
            ngo_name: self.ngo_name.clone(),
            target_amount: self.target_amount,
            currency: self.currency.clone(),
            status: self.status,
            tags: self.tags.clone(),
            images: self.images.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            end_date: self.end_date,
        }
    }
}

/// Campaign scalar fields as seen by one source; absent means "this source does not know".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignFields {
    pub title: Option<String>,
    pub description: Option<String>,
    pub ngo_id: Option<String>,
    pub ngo_name: Option<String>,
    pub target_amount: Option<f64>,
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<CampaignStatus>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// What a browser held in local storage, posted back for merging. Lowest precedence of all
/// sources, and never enough on its own to make a campaign exist.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCacheSnapshot {
    #[serde(default)]
    pub donations: Vec<DonationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<CampaignFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub id: String,
    pub campaign_id: String,
    pub ngo_id: String,
    pub amount: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub status: WithdrawalStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreTier {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl ScoreTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Excellent
        } else if score >= 60.0 {
            Self::Good
        } else if score >= 40.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreEventKind {
    UpheldReport,
    PendingReport,
    RejectedWithdrawal,
    MissingWithdrawalUpdate,
    InactiveCampaign,
    CampaignUpdate,
    CompletedCampaign,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEvent {
    pub kind: ScoreEventKind,
    pub delta: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    pub description: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NgoScore {
    pub ngo_id: String,
    pub current_score: f64,
    pub max_score: f64,
    pub tier: ScoreTier,
    #[serde(default)]
    pub history: Vec<ScoreEvent>,
    pub calculated_at: DateTime<Utc>,
}

/// Creation request for a campaign.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCampaign {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub ngo_id: String,
    #[serde(default)]
    pub ngo_name: Option<String>,
    pub target_amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

/// Partial update; `None` leaves the stored value alone.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub ngo_name: Option<String>,
    pub target_amount: Option<f64>,
    pub status: Option<CampaignStatus>,
    pub tags: Option<Vec<String>>,
    pub images: Option<Vec<String>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDonation {
    pub donor_address: String,
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUpdate {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReport {
    pub reason: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub reporter_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn donation(donor: &str, amount: f64, status: DonationStatus, hour: u32) -> DonationRecord {
        DonationRecord {
            id: format!("{donor}-{hour}"),
            campaign_id: "c1".into(),
            donor_address: donor.into(),
            amount,
            currency: DEFAULT_CURRENCY.into(),
            transaction_hash: Some(format!("0xAB{hour}")),
            status,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).single().unwrap(),
            anonymous: false,
            message: None,
            confirmed_at: None,
            block_number: None,
        }
    }

    #[test]
    fn stats_split_confirmed_and_pending_and_skip_failed() {
        let donations = vec![
            donation("0xAAA", 1.5, DonationStatus::Confirmed, 1),
            donation("0xaaa", 0.5, DonationStatus::Pending, 2),
            donation("0xBBB", 2.0, DonationStatus::Failed, 3),
            donation("0xCCC", 1.0, DonationStatus::Confirmed, 4),
        ];
        let stats = CampaignStats::compute(&donations, 10.0);

        assert_eq!(stats.total_donations, 3);
        assert_eq!(stats.confirmed_donations, 2);
        assert_eq!(stats.pending_donations, 1);
        assert_eq!(stats.confirmed_amount, 2.5);
        assert_eq!(stats.pending_amount, 0.5);
        assert_eq!(stats.total_amount, 3.0);
        assert_eq!(stats.unique_donors, 2);
        assert_eq!(stats.progress_percent, 25.0);
        assert_eq!(stats.last_donation_at, Some(donations[3].timestamp));
    }

    #[test]
    fn zero_target_reports_zero_progress() {
        let donations = vec![donation("0xAAA", 1.0, DonationStatus::Confirmed, 1)];
        assert_eq!(CampaignStats::compute(&donations, 0.0).progress_percent, 0.0);
    }

    #[test]
    fn dedup_key_is_case_insensitive_and_falls_back_to_id() {
        let mut d = donation("0xAAA", 1.0, DonationStatus::Pending, 1);
        assert_eq!(d.dedup_key(), "0xab1");
        assert!(d.has_tx_hash("0xab1"));
        d.transaction_hash = Some("  ".into());
        assert_eq!(d.dedup_key(), "id:0xAAA-1");
    }

    #[test]
    fn legacy_status_strings_decode_leniently() {
        let parsed: Vec<LegacyCampaign> = serde_json::from_str(
            r#"[{"id":"1","status":"approved"},{"id":"2","status":"Pending"},{"id":"3","status":"ended"},
                {"id":"4","status":"paused"},{"id":"5","status":"something-else"}]"#,
        )
        .unwrap();
        let parsed = parsed.iter().filter_map(|c| c.status).collect::<Vec<_>>();
        assert_eq!(
            parsed,
            vec![
                CampaignStatus::Active,
                CampaignStatus::PendingReview,
                CampaignStatus::Completed,
                CampaignStatus::Paused,
                CampaignStatus::PendingReview,
            ]
        );
        assert_eq!(
            serde_json::to_string(&CampaignStatus::PendingReview).unwrap(),
            r#""pending_review""#
        );

        let fields: CampaignFields =
            serde_json::from_str(r#"{"status":"awaiting approval","title":"t"}"#).unwrap();
        assert_eq!(fields.status, Some(CampaignStatus::PendingReview));
        let fields: CampaignFields = serde_json::from_str(r#"{"title":"t"}"#).unwrap();
        assert_eq!(fields.status, None);
    }

    #[test]
    fn request_bodies_use_strict_status_names() {
        let patch: CampaignPatch = serde_json::from_str(r#"{"status":"paused"}"#).unwrap();
        assert_eq!(patch.status, Some(CampaignStatus::Paused));
        assert!(serde_json::from_str::<CampaignPatch>(r#"{"status":"actvie"}"#).is_err());
        assert!(serde_json::from_str::<CampaignPatch>(r#"{"status":"approved"}"#).is_err());
    }

    #[test]
    fn score_tiers_follow_thresholds() {
        assert_eq!(ScoreTier::from_score(100.0), ScoreTier::Excellent);
        assert_eq!(ScoreTier::from_score(79.9), ScoreTier::Good);
        assert_eq!(ScoreTier::from_score(40.0), ScoreTier::Fair);
        assert_eq!(ScoreTier::from_score(12.0), ScoreTier::Poor);
    }
}
