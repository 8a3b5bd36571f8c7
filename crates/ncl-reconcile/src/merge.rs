//! Field-level merge of campaign sources.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use ncl_adapters::{SourceKind, SourceSnapshot};
use ncl_core::{
    Campaign, CampaignFields, CampaignReport, CampaignStats, CampaignUpdate, DonationRecord,
    DEFAULT_CAMPAIGN_TITLE, DEFAULT_CURRENCY,
};

/// Merge everything the sources know about `id`.
///
/// Scalars come from the first source (by precedence) that has a non-empty value. A campaign
/// exists only if the comprehensive or legacy source carries fields for it; donation files and
/// client caches alone never resurrect a campaign, though a cache may still fill gaps.
pub fn merge_campaign(
    id: &str,
    mut snapshots: Vec<SourceSnapshot>,
    now: DateTime<Utc>,
) -> Option<Campaign> {
    snapshots.sort_by_key(|s| s.kind);
    let known = snapshots
        .iter()
        .any(|s| s.fields.is_some() && s.kind <= SourceKind::Legacy);
    if !known {
        return None;
    }
    let fields = snapshots
        .iter()
        .filter_map(|s| s.fields.as_ref())
        .collect::<Vec<_>>();

    let created_at = fields.iter().filter_map(|f| f.created_at).min().unwrap_or(now);
    let updated_at = fields
        .iter()
        .filter_map(|f| f.updated_at)
        .max()
        .unwrap_or(created_at)
        .max(created_at);

    let mut campaign = Campaign {
        id: id.to_string(),
        title: first_text(&fields, |f| f.title.as_deref())
            .unwrap_or_else(|| DEFAULT_CAMPAIGN_TITLE.to_string()),
        description: first_text(&fields, |f| f.description.as_deref()).unwrap_or_default(),
        ngo_id: first_text(&fields, |f| f.ngo_id.as_deref()).unwrap_or_default(),
        ngo_name: first_text(&fields, |f| f.ngo_name.as_deref()),
        target_amount: fields
            .iter()
            .filter_map(|f| f.target_amount)
            .find(|t| t.is_finite() && *t > 0.0)
            .unwrap_or(0.0),
        currency: first_text(&fields, |f| f.currency.as_deref())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        status: fields.iter().find_map(|f| f.status).unwrap_or_default(),
        tags: first_list(&fields, |f| &f.tags),
        images: first_list(&fields, |f| &f.images),
        created_at,
        updated_at,
        end_date: fields.iter().find_map(|f| f.end_date),
        stats: CampaignStats::default(),
        donations: merge_donations(&snapshots),
        updates: merge_updates(&snapshots),
        reports: merge_reports(&snapshots),
    };
    campaign.recompute_stats();
    Some(campaign)
}

fn first_text<'a>(
    fields: &[&'a CampaignFields],
    get: impl Fn(&'a CampaignFields) -> Option<&'a str>,
) -> Option<String> {
    fields
        .iter()
        .filter_map(|f| get(*f))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn first_list<'a>(
    fields: &[&'a CampaignFields],
    get: impl Fn(&'a CampaignFields) -> &'a Vec<String>,
) -> Vec<String> {
    fields
        .iter()
        .map(|f| get(*f))
        .find(|list| !list.is_empty())
        .cloned()
        .unwrap_or_default()
}

/// Union of all donations, deduplicated by transaction hash (or id when unhashed).
///
/// The copy with the more advanced status wins; on a tie the higher-precedence source wins.
/// Optional fields missing on the winner are taken from the loser.
pub fn merge_donations(snapshots: &[SourceSnapshot]) -> Vec<DonationRecord> {
    let mut merged: Vec<DonationRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for snapshot in snapshots {
        for donation in &snapshot.donations {
            let key = donation.dedup_key();
            match index.get(&key) {
                Some(&slot) => {
                    let existing = &mut merged[slot];
                    if donation.status.rank() > existing.status.rank() {
                        let mut winner = donation.clone();
                        fill_missing(&mut winner, existing);
                        *existing = winner;
                    } else {
                        fill_missing(existing, donation);
                    }
                }
                None => {
                    index.insert(key, merged.len());
                    merged.push(donation.clone());
                }
            }
        }
    }

    merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    merged
}

fn fill_missing(target: &mut DonationRecord, other: &DonationRecord) {
    if target.transaction_hash.is_none() {
        target.transaction_hash = other.transaction_hash.clone();
    }
    if target.message.is_none() {
        target.message = other.message.clone();
    }
    if target.confirmed_at.is_none() {
        target.confirmed_at = other.confirmed_at;
    }
    if target.block_number.is_none() {
        target.block_number = other.block_number;
    }
}

fn merge_updates(snapshots: &[SourceSnapshot]) -> Vec<CampaignUpdate> {
    let mut seen = HashSet::new();
    let mut out = snapshots
        .iter()
        .flat_map(|s| s.updates.iter())
        .filter(|u| seen.insert(u.id.clone()))
        .cloned()
        .collect::<Vec<_>>();
    out.sort_by_key(|u| u.created_at);
    out
}

fn merge_reports(snapshots: &[SourceSnapshot]) -> Vec<CampaignReport> {
    let mut seen = HashSet::new();
    let mut out = snapshots
        .iter()
        .flat_map(|s| s.reports.iter())
        .filter(|r| seen.insert(r.id.clone()))
        .cloned()
        .collect::<Vec<_>>();
    out.sort_by_key(|r| r.created_at);
    out
}
