//! Parquet snapshots of the reconciled ledger.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    BooleanArray, Float64Array, RecordBatch, StringArray, UInt32Array, UInt64Array,
};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use ncl_core::{Campaign, NgoScore};
use ncl_storage::{sha256_hex, write_json_atomic};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub files: Vec<SnapshotFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Write the three tables and `manifest.json` under `<out_root>/<timestamp>/`.
///
/// Returns the manifest path.
pub fn export_snapshot(
    out_root: &Path,
    campaigns: &[Campaign],
    scores: &[NgoScore],
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    let snapshot_dir = out_root.join(now.format("%Y%m%dT%H%M%SZ").to_string());
    std::fs::create_dir_all(&snapshot_dir)
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let campaigns_path = snapshot_dir.join("campaigns.parquet");
    let donations_path = snapshot_dir.join("donations.parquet");
    let scores_path = snapshot_dir.join("ngo_scores.parquet");

    write_campaigns_parquet(&campaigns_path, campaigns)?;
    write_donations_parquet(&donations_path, campaigns)?;
    write_scores_parquet(&scores_path, scores)?;

    let manifest = SnapshotManifest {
        schema_version: 1,
        generated_at: now,
        files: vec![
            manifest_entry("campaigns", &snapshot_dir, &campaigns_path)?,
            manifest_entry("donations", &snapshot_dir, &donations_path)?,
            manifest_entry("ngo_scores", &snapshot_dir, &scores_path)?,
        ],
    };
    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing snapshot manifest")?;
    std::fs::write(&manifest_path, bytes)
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    info!(
        dir = %snapshot_dir.display(),
        campaigns = campaigns.len(),
        scores = scores.len(),
        "snapshot exported"
    );
    Ok(manifest_path)
}

/// Async wrapper for callers on the runtime; also refreshes `latest.json` next to the snapshots.
pub async fn export_snapshot_async(
    out_root: PathBuf,
    campaigns: Vec<Campaign>,
    scores: Vec<NgoScore>,
) -> Result<PathBuf> {
    let root = out_root.clone();
    let manifest_path = tokio::task::spawn_blocking(move || {
        export_snapshot(&root, &campaigns, &scores, Utc::now())
    })
    .await
    .context("snapshot export task panicked")??;

    let pointer = serde_json::json!({ "manifest": manifest_path.display().to_string() });
    write_json_atomic(&out_root.join("latest.json"), &pointer).await?;
    Ok(manifest_path)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_campaigns_parquet(path: &Path, campaigns: &[Campaign]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("id", DataType::Utf8, false),
        ArrowField::new("title", DataType::Utf8, false),
        ArrowField::new("ngo_id", DataType::Utf8, false),
        ArrowField::new("status", DataType::Utf8, false),
        ArrowField::new("currency", DataType::Utf8, false),
        ArrowField::new("target_amount", DataType::Float64, false),
        ArrowField::new("confirmed_amount", DataType::Float64, false),
        ArrowField::new("pending_amount", DataType::Float64, false),
        ArrowField::new("unique_donors", DataType::UInt32, false),
        ArrowField::new("progress_percent", DataType::Float64, false),
        ArrowField::new("created_at", DataType::Utf8, false),
    ]));

    let ids = StringArray::from(campaigns.iter().map(|c| Some(c.id.as_str())).collect::<Vec<_>>());
    let titles = StringArray::from(campaigns.iter().map(|c| Some(c.title.as_str())).collect::<Vec<_>>());
    let ngo_ids = StringArray::from(campaigns.iter().map(|c| Some(c.ngo_id.as_str())).collect::<Vec<_>>());
    let statuses = StringArray::from(
        campaigns
            .iter()
            .map(|c| Some(c.status.as_str()))
            .collect::<Vec<_>>(),
    );
    let currencies = StringArray::from(
        campaigns
            .iter()
            .map(|c| Some(c.currency.as_str()))
            .collect::<Vec<_>>(),
    );
    let targets = Float64Array::from(campaigns.iter().map(|c| c.target_amount).collect::<Vec<_>>());
    let confirmed = Float64Array::from(
        campaigns
            .iter()
            .map(|c| c.stats.confirmed_amount)
            .collect::<Vec<_>>(),
    );
    let pending = Float64Array::from(campaigns.iter().map(|c| c.stats.pending_amount).collect::<Vec<_>>());
    let donors = UInt32Array::from(
        campaigns
            .iter()
            .map(|c| u32::try_from(c.stats.unique_donors).unwrap_or(u32::MAX))
            .collect::<Vec<_>>(),
    );
    let progress = Float64Array::from(
        campaigns
            .iter()
            .map(|c| c.stats.progress_percent)
            .collect::<Vec<_>>(),
    );
    let created = StringArray::from(
        campaigns
            .iter()
            .map(|c| Some(c.created_at.to_rfc3339()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(ids),
            Arc::new(titles),
            Arc::new(ngo_ids),
            Arc::new(statuses),
            Arc::new(currencies),
            Arc::new(targets),
            Arc::new(confirmed),
            Arc::new(pending),
            Arc::new(donors),
            Arc::new(progress),
            Arc::new(created),
        ],
    )
    .context("building campaigns record batch")?;
    write_parquet(path, batch)
}

fn write_donations_parquet(path: &Path, campaigns: &[Campaign]) -> Result<()> {
    let rows = campaigns
        .iter()
        .flat_map(|c| c.donations.iter().map(move |d| (c.id.as_str(), d)))
        .collect::<Vec<_>>();

    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("campaign_id", DataType::Utf8, false),
        ArrowField::new("donation_id", DataType::Utf8, false),
        ArrowField::new("donor_address", DataType::Utf8, true),
        ArrowField::new("amount", DataType::Float64, false),
        ArrowField::new("currency", DataType::Utf8, false),
        ArrowField::new("transaction_hash", DataType::Utf8, true),
        ArrowField::new("status", DataType::Utf8, false),
        ArrowField::new("timestamp", DataType::Utf8, false),
        ArrowField::new("anonymous", DataType::Boolean, false),
        ArrowField::new("block_number", DataType::UInt64, true),
    ]));

    let campaign_ids = StringArray::from(rows.iter().map(|(c, _)| Some(*c)).collect::<Vec<_>>());
    let donation_ids = StringArray::from(rows.iter().map(|(_, d)| Some(d.id.as_str())).collect::<Vec<_>>());
    // Anonymous donors are exported without an address.
    let donors = StringArray::from(
        rows.iter()
            .map(|(_, d)| (!d.anonymous).then_some(d.donor_address.as_str()))
            .collect::<Vec<_>>(),
    );
    let amounts = Float64Array::from(rows.iter().map(|(_, d)| d.amount).collect::<Vec<_>>());
    let currencies = StringArray::from(rows.iter().map(|(_, d)| Some(d.currency.as_str())).collect::<Vec<_>>());
    let hashes = StringArray::from(
        rows.iter()
            .map(|(_, d)| d.transaction_hash.as_deref())
            .collect::<Vec<_>>(),
    );
    let statuses = StringArray::from(rows.iter().map(|(_, d)| Some(d.status.as_str())).collect::<Vec<_>>());
    let timestamps = StringArray::from(
        rows.iter()
            .map(|(_, d)| Some(d.timestamp.to_rfc3339()))
            .collect::<Vec<_>>(),
    );
    let anonymous = BooleanArray::from(rows.iter().map(|(_, d)| d.anonymous).collect::<Vec<_>>());
    let blocks = UInt64Array::from(rows.iter().map(|(_, d)| d.block_number).collect::<Vec<_>>());

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(campaign_ids),
            Arc::new(donation_ids),
            Arc::new(donors),
            Arc::new(amounts),
            Arc::new(currencies),
            Arc::new(hashes),
            Arc::new(statuses),
            Arc::new(timestamps),
            Arc::new(anonymous),
            Arc::new(blocks),
        ],
    )
    .context("building donations record batch")?;
    write_parquet(path, batch)
}

fn write_scores_parquet(path: &Path, scores: &[NgoScore]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("ngo_id", DataType::Utf8, false),
        ArrowField::new("current_score", DataType::Float64, false),
        ArrowField::new("max_score", DataType::Float64, false),
        ArrowField::new("tier", DataType::Utf8, false),
        ArrowField::new("events", DataType::UInt32, false),
        ArrowField::new("calculated_at", DataType::Utf8, false),
    ]));

    let ngo_ids = StringArray::from(scores.iter().map(|s| Some(s.ngo_id.as_str())).collect::<Vec<_>>());
    let current = Float64Array::from(scores.iter().map(|s| s.current_score).collect::<Vec<_>>());
    let max = Float64Array::from(scores.iter().map(|s| s.max_score).collect::<Vec<_>>());
    let tiers = StringArray::from(
        scores
            .iter()
            .map(|s| Some(format!("{:?}", s.tier).to_ascii_lowercase()))
            .collect::<Vec<_>>(),
    );
    let events = UInt32Array::from(
        scores
            .iter()
            .map(|s| u32::try_from(s.history.len()).unwrap_or(u32::MAX))
            .collect::<Vec<_>>(),
    );
    let calculated = StringArray::from(
        scores
            .iter()
            .map(|s| Some(s.calculated_at.to_rfc3339()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(ngo_ids),
            Arc::new(current),
            Arc::new(max),
            Arc::new(tiers),
            Arc::new(events),
            Arc::new(calculated),
        ],
    )
    .context("building ngo_scores record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, snapshot_dir: &Path, path: &Path) -> Result<SnapshotFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path
        .strip_prefix(snapshot_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(SnapshotFile {
        name: name.to_string(),
        path: rel,
        sha256: sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}
