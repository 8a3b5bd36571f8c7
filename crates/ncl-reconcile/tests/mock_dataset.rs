use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use ncl_core::{CampaignStatus, DonationStatus, LegacyCampaign, ScoreTier};
use ncl_reconcile::{
    calculate_ngo_score, CampaignFilter, DuplicateVerdict, Platform, PlatformConfig,
};

fn mock_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../mock")
        .canonicalize()
        .unwrap()
}

fn copy_tree(from: &Path, to: &Path) {
    std::fs::create_dir_all(to).unwrap();
    for entry in std::fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_tree(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), target).unwrap();
        }
    }
}

fn open_copy() -> (tempfile::TempDir, Platform) {
    let dir = tempfile::tempdir().unwrap();
    copy_tree(&mock_dir(), dir.path());
    let platform = Platform::open(PlatformConfig::for_data_dir(dir.path())).unwrap();
    (dir, platform)
}

#[tokio::test]
async fn mock_dataset_reconciles_all_three_sources() {
    let (dir, platform) = open_copy();

    let summary = platform.campaigns.reconcile_all().await.unwrap();
    assert_eq!(summary.reconciled, 3);
    assert_eq!(summary.failed, 0);

    let water = platform.campaigns.load_campaign("1").await.unwrap().unwrap();
    assert_eq!(water.status, CampaignStatus::Active);
    assert_eq!(water.description, "Boreholes and hand pumps for three villages.");
    assert_eq!(water.tags, vec!["water".to_string(), "health".to_string()]);
    assert_eq!(water.donations.len(), 3);
    let upgraded = water.find_donation("0xbbb2").unwrap();
    assert_eq!(upgraded.status, DonationStatus::Confirmed);
    assert_eq!(upgraded.block_number, Some(120));
    assert_eq!(upgraded.message.as_deref(), Some("Good luck with the wells"));
    assert_eq!(water.stats.confirmed_amount, 3.0);
    assert_eq!(water.stats.pending_amount, 0.5);
    assert_eq!(water.stats.unique_donors, 2);
    assert_eq!(water.stats.progress_percent, 30.0);

    // Campaign 2 only ever existed in the legacy array plus a bare donation file.
    let meals = platform.campaigns.load_campaign("2").await.unwrap().unwrap();
    assert_eq!(meals.status, CampaignStatus::Active);
    assert_eq!(meals.stats.total_donations, 1);
    assert_eq!(meals.stats.progress_percent, 25.0);
    assert!(dir.path().join("campaigns/campaign_2.json").exists());

    let legacy: Vec<LegacyCampaign> = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("campaigns.json")).unwrap(),
    )
    .unwrap();
    let entry = legacy.iter().find(|c| c.id == "1").unwrap();
    assert_eq!(entry.raised_amount, Some(3.0));
    assert_eq!(entry.donor_count, Some(2));
    assert_eq!(entry.extra.get("featured"), Some(&serde_json::Value::Bool(true)));

    let pending = platform
        .campaigns
        .list_campaigns(&CampaignFilter {
            status: Some(CampaignStatus::PendingReview),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "3");
}

#[tokio::test]
async fn mock_dataset_review_queue_and_scores() {
    let (_dir, platform) = open_copy();

    let queue = platform.review_queue().await.unwrap();
    assert_eq!(queue.pending_campaigns.len(), 1);
    assert_eq!(queue.open_reports.len(), 1);
    assert!(queue.pending_withdrawals.is_empty());
    assert_eq!(queue.duplicate_candidates.len(), 1);
    let candidate = &queue.duplicate_candidates[0];
    let mut pair = [candidate.campaign_a.as_str(), candidate.campaign_b.as_str()];
    pair.sort_unstable();
    assert_eq!(pair, ["1", "3"]);
    assert_eq!(candidate.verdict, DuplicateVerdict::Review);

    let campaigns = platform
        .campaigns
        .list_campaigns(&CampaignFilter::default())
        .await
        .unwrap();
    let withdrawals = platform.withdrawals.list(None).await.unwrap();
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).single().unwrap();
    let score = calculate_ngo_score(
        "ngo-aqua",
        &campaigns,
        &withdrawals,
        platform.scores.config(),
        now,
    );
    // pending report -3, one update +2, campaign idle since January -5; the withdrawal was
    // followed by an update inside its window.
    assert_eq!(score.current_score, 94.0);
    assert_eq!(score.tier, ScoreTier::Excellent);

    // Stored stats say 0.5; the merged view has 3.0 confirmed with 1.0 already withdrawn.
    assert_eq!(platform.withdrawals.available("1").await.unwrap(), 2.0);
}
