//! Admin review queue: campaigns awaiting approval, open reports, pending withdrawals and
//! near-duplicate campaigns posted by the same NGO.

use ncl_core::{
    Campaign, CampaignReport, CampaignStatus, ReportStatus, WithdrawalRequest, WithdrawalStatus,
};
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DuplicateConfig {
    pub auto_flag_threshold: f64,
    pub review_threshold: f64,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            auto_flag_threshold: 0.95,
            review_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateVerdict {
    LikelyDuplicate,
    Review,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCandidate {
    pub ngo_id: String,
    pub campaign_a: String,
    pub campaign_b: String,
    pub similarity: f64,
    pub verdict: DuplicateVerdict,
}

pub struct DuplicateDetector {
    config: DuplicateConfig,
}

impl DuplicateDetector {
    pub fn new(config: DuplicateConfig) -> Self {
        Self { config }
    }

    pub fn normalize_title(input: &str) -> String {
        input
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn similarity(&self, a: &Campaign, b: &Campaign) -> f64 {
        jaro_winkler(&Self::normalize_title(&a.title), &Self::normalize_title(&b.title))
    }

    /// Pairwise comparison within each NGO; rejected campaigns are ignored.
    pub fn find(&self, campaigns: &[Campaign]) -> Vec<DuplicateCandidate> {
        let live = campaigns
            .iter()
            .filter(|c| c.status != CampaignStatus::Rejected && !c.ngo_id.is_empty())
            .collect::<Vec<_>>();
        let mut out = Vec::new();

        for i in 0..live.len() {
            for j in (i + 1)..live.len() {
                let (a, b) = (live[i], live[j]);
                if a.ngo_id != b.ngo_id {
                    continue;
                }
                let score = self.similarity(a, b);
                let verdict = if score >= self.config.auto_flag_threshold {
                    DuplicateVerdict::LikelyDuplicate
                } else if score >= self.config.review_threshold {
                    DuplicateVerdict::Review
                } else {
                    continue;
                };
                out.push(DuplicateCandidate {
                    ngo_id: a.ngo_id.clone(),
                    campaign_a: a.id.clone(),
                    campaign_b: b.id.clone(),
                    similarity: score,
                    verdict,
                });
            }
        }

        out.sort_by(|x, y| y.similarity.total_cmp(&x.similarity));
        out
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCampaign {
    pub id: String,
    pub title: String,
    pub ngo_id: String,
    pub target_amount: f64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenReport {
    pub campaign_id: String,
    pub report: CampaignReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueue {
    pub pending_campaigns: Vec<PendingCampaign>,
    pub open_reports: Vec<OpenReport>,
    pub pending_withdrawals: Vec<WithdrawalRequest>,
    pub duplicate_candidates: Vec<DuplicateCandidate>,
}

pub fn build_review_queue(
    campaigns: &[Campaign],
    withdrawals: &[WithdrawalRequest],
    detector: &DuplicateDetector,
) -> ReviewQueue {
    let mut pending_campaigns = campaigns
        .iter()
        .filter(|c| c.status == CampaignStatus::PendingReview)
        .map(|c| PendingCampaign {
            id: c.id.clone(),
            title: c.title.clone(),
            ngo_id: c.ngo_id.clone(),
            target_amount: c.target_amount,
            created_at: c.created_at,
        })
        .collect::<Vec<_>>();
    pending_campaigns.sort_by_key(|c| c.created_at);

    let mut open_reports = campaigns
        .iter()
        .flat_map(|c| {
            c.reports
                .iter()
                .filter(|r| r.status == ReportStatus::Pending)
                .map(|r| OpenReport {
                    campaign_id: c.id.clone(),
                    report: r.clone(),
                })
        })
        .collect::<Vec<_>>();
    open_reports.sort_by_key(|r| r.report.created_at);

    ReviewQueue {
        pending_campaigns,
        open_reports,
        pending_withdrawals: withdrawals
            .iter()
            .filter(|w| w.status == WithdrawalStatus::Pending)
            .cloned()
            .collect(),
        duplicate_candidates: detector.find(campaigns),
    }
}
