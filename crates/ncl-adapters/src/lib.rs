//! Campaign source adapters + transaction status sources.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ncl_core::{
    Campaign, CampaignFields, CampaignReport, CampaignUpdate, ClientCacheSnapshot, DonationRecord,
    LegacyCampaign,
};
use ncl_storage::{read_json_opt, write_json_atomic, DataDir, FetchError, JsonRpcClient, StorageError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "ncl-adapters";

/// Where a piece of campaign data came from. Declaration order is merge precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Comprehensive,
    Legacy,
    DonationFile,
    ClientCache,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Everything one source knows about a campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSnapshot {
    pub kind: SourceKind,
    pub fields: Option<CampaignFields>,
    pub donations: Vec<DonationRecord>,
    pub updates: Vec<CampaignUpdate>,
    pub reports: Vec<CampaignReport>,
}

impl SourceSnapshot {
    pub fn empty(kind: SourceKind) -> Self {
        Self {
            kind,
            fields: None,
            donations: Vec::new(),
            updates: Vec::new(),
            reports: Vec::new(),
        }
    }
}

#[async_trait]
pub trait CampaignSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// `None` when this source has never heard of the campaign.
    async fn load(&self, campaign_id: &str) -> Result<Option<SourceSnapshot>, SourceError>;
}

/// Read-side shape of `campaigns/campaign_<id>.json`.
///
/// Every scalar is optional so a partial or hand-edited file still merges with the other
/// sources. Stored `stats` are not read back; they are recomputed on every merge.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComprehensiveFile {
    #[serde(flatten)]
    pub fields: CampaignFields,
    #[serde(default)]
    pub donations: Vec<DonationRecord>,
    #[serde(default)]
    pub updates: Vec<CampaignUpdate>,
    #[serde(default)]
    pub reports: Vec<CampaignReport>,
}

/// Per-campaign comprehensive file: `campaigns/campaign_<id>.json`.
#[derive(Debug, Clone)]
pub struct ComprehensiveSource {
    data: DataDir,
}

impl ComprehensiveSource {
    pub fn new(data: DataDir) -> Self {
        Self { data }
    }

    pub async fn read(&self, campaign_id: &str) -> Result<Option<ComprehensiveFile>, SourceError> {
        let path = self.data.comprehensive_path(campaign_id)?;
        Ok(read_json_opt(&path).await?)
    }

    pub async fn write(&self, campaign: &Campaign) -> Result<(), SourceError> {
        let path = self.data.comprehensive_path(&campaign.id)?;
        write_json_atomic(&path, campaign).await?;
        Ok(())
    }

    pub async fn known_ids(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.data.list_comprehensive_ids().await?)
    }
}

#[async_trait]
impl CampaignSource for ComprehensiveSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Comprehensive
    }

    async fn load(&self, campaign_id: &str) -> Result<Option<SourceSnapshot>, SourceError> {
        let Some(mut file) = self.read(campaign_id).await? else {
            return Ok(None);
        };
        for donation in &mut file.donations {
            if donation.campaign_id.is_empty() {
                donation.campaign_id = campaign_id.to_string();
            }
        }
        Ok(Some(SourceSnapshot {
            kind: SourceKind::Comprehensive,
            fields: Some(file.fields),
            donations: file.donations,
            updates: file.updates,
            reports: file.reports,
        }))
    }
}

/// The flat `campaigns.json` array.
#[derive(Debug, Clone)]
pub struct LegacySource {
    data: DataDir,
}

impl LegacySource {
    pub fn new(data: DataDir) -> Self {
        Self { data }
    }

    pub async fn read_all(&self) -> Result<Vec<LegacyCampaign>, SourceError> {
        let path = self.data.legacy_campaigns_path();
        Ok(read_json_opt(&path).await?.unwrap_or_default())
    }

    /// Replace the entry with the same id, or append. Unmodelled fields of the old entry survive.
    pub async fn upsert(&self, mut entry: LegacyCampaign) -> Result<(), SourceError> {
        let mut all = self.read_all().await?;
        match all.iter_mut().find(|c| c.id == entry.id) {
            Some(existing) => {
                for (key, value) in std::mem::take(&mut existing.extra) {
                    entry.extra.entry(key).or_insert(value);
                }
                *existing = entry;
            }
            None => all.push(entry),
        }
        write_json_atomic(&self.data.legacy_campaigns_path(), &all).await?;
        Ok(())
    }
}

#[async_trait]
impl CampaignSource for LegacySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Legacy
    }

    async fn load(&self, campaign_id: &str) -> Result<Option<SourceSnapshot>, SourceError> {
        let all = self.read_all().await?;
        Ok(all.into_iter().find(|c| c.id == campaign_id).map(|legacy| SourceSnapshot {
            fields: Some(legacy.fields()),
            ..SourceSnapshot::empty(SourceKind::Legacy)
        }))
    }
}

/// On-disk shape of `donations/<id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDonationFile {
    #[serde(default)]
    pub campaign_id: String,
    pub donations: Vec<DonationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DonationFileRepr {
    Wrapped(CampaignDonationFile),
    Bare(Vec<DonationRecord>),
}

/// Campaign-scoped donation file; older writers stored a bare array.
#[derive(Debug, Clone)]
pub struct DonationFileSource {
    data: DataDir,
}

impl DonationFileSource {
    pub fn new(data: DataDir) -> Self {
        Self { data }
    }

    pub async fn read(&self, campaign_id: &str) -> Result<Option<Vec<DonationRecord>>, SourceError> {
        let path = self.data.donations_path(campaign_id)?;
        let repr: Option<DonationFileRepr> = read_json_opt(&path).await?;
        Ok(repr.map(|r| match r {
            DonationFileRepr::Wrapped(file) => file.donations,
            DonationFileRepr::Bare(donations) => donations,
        }))
    }

    pub async fn write(
        &self,
        campaign_id: &str,
        donations: &[DonationRecord],
        now: DateTime<Utc>,
    ) -> Result<(), SourceError> {
        let path = self.data.donations_path(campaign_id)?;
        let file = CampaignDonationFile {
            campaign_id: campaign_id.to_string(),
            donations: donations.to_vec(),
            last_updated: Some(now),
        };
        write_json_atomic(&path, &file).await?;
        Ok(())
    }
}

#[async_trait]
impl CampaignSource for DonationFileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::DonationFile
    }

    async fn load(&self, campaign_id: &str) -> Result<Option<SourceSnapshot>, SourceError> {
        let Some(mut donations) = self.read(campaign_id).await? else {
            return Ok(None);
        };
        for donation in &mut donations {
            if donation.campaign_id.is_empty() {
                donation.campaign_id = campaign_id.to_string();
            }
        }
        Ok(Some(SourceSnapshot {
            donations,
            ..SourceSnapshot::empty(SourceKind::DonationFile)
        }))
    }
}

/// One-shot source over a snapshot posted by a browser client.
#[derive(Debug, Clone)]
pub struct ClientCacheSource {
    snapshot: ClientCacheSnapshot,
}

impl ClientCacheSource {
    pub fn new(snapshot: ClientCacheSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl CampaignSource for ClientCacheSource {
    fn kind(&self) -> SourceKind {
        SourceKind::ClientCache
    }

    async fn load(&self, campaign_id: &str) -> Result<Option<SourceSnapshot>, SourceError> {
        // Browser caches are shared across campaign pages; keep only what belongs here.
        let donations = self
            .snapshot
            .donations
            .iter()
            .filter(|d| d.campaign_id.is_empty() || d.campaign_id == campaign_id)
            .cloned()
            .map(|mut d| {
                d.campaign_id = campaign_id.to_string();
                d
            })
            .collect::<Vec<_>>();
        let fields = self.snapshot.campaign.clone();
        debug!(
            campaign_id,
            cached = donations.len(),
            has_fields = fields.is_some(),
            "client cache snapshot"
        );
        if donations.is_empty() && fields.is_none() {
            return Ok(None);
        }
        Ok(Some(SourceSnapshot {
            fields,
            donations,
            ..SourceSnapshot::empty(SourceKind::ClientCache)
        }))
    }
}

/// On-chain outcome of a donation transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxLookup {
    Pending,
    Confirmed { block: Option<u64> },
    Failed { block: Option<u64> },
    Unknown,
}

#[async_trait]
pub trait TransactionStatusSource: Send + Sync {
    async fn status(&self, tx_hash: &str) -> Result<TxLookup, SourceError>;
}

/// Receipt lookup over an Ethereum-compatible JSON-RPC endpoint.
#[derive(Debug)]
pub struct JsonRpcStatusSource {
    rpc: JsonRpcClient,
}

impl JsonRpcStatusSource {
    pub fn new(rpc: JsonRpcClient) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl TransactionStatusSource for JsonRpcStatusSource {
    async fn status(&self, tx_hash: &str) -> Result<TxLookup, SourceError> {
        let receipt = self
            .rpc
            .call("eth_getTransactionReceipt", serde_json::json!([tx_hash]))
            .await?;
        Ok(parse_receipt(&receipt))
    }
}

/// A `null` receipt means the transaction is not mined yet.
pub fn parse_receipt(receipt: &serde_json::Value) -> TxLookup {
    if receipt.is_null() {
        return TxLookup::Pending;
    }
    let block = receipt
        .get("blockNumber")
        .and_then(|b| b.as_str())
        .and_then(parse_hex_u64);
    match receipt.get("status").and_then(|s| s.as_str()).and_then(parse_hex_u64) {
        Some(1) => TxLookup::Confirmed { block },
        Some(0) => TxLookup::Failed { block },
        _ => TxLookup::Unknown,
    }
}

fn parse_hex_u64(raw: &str) -> Option<u64> {
    let digits = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))?;
    u64::from_str_radix(digits, 16).ok()
}

/// Fixed answers keyed by transaction hash, for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticStatusSource {
    answers: HashMap<String, TxLookup>,
}

impl StaticStatusSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tx_hash: &str, lookup: TxLookup) -> Self {
        self.answers.insert(tx_hash.trim().to_ascii_lowercase(), lookup);
        self
    }
}

#[async_trait]
impl TransactionStatusSource for StaticStatusSource {
    async fn status(&self, tx_hash: &str) -> Result<TxLookup, SourceError> {
        Ok(self
            .answers
            .get(&tx_hash.trim().to_ascii_lowercase())
            .copied()
            .unwrap_or(TxLookup::Unknown))
    }
}
