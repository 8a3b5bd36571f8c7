//! Moves pending donations to `confirmed`/`failed` from on-chain receipts.

use std::sync::Arc;

use ncl_adapters::{TransactionStatusSource, TxLookup};
use ncl_core::DonationStatus;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::manager::CampaignManager;
use crate::LedgerError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationSummary {
    pub checked: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub still_pending: usize,
    pub errors: usize,
}

pub struct ConfirmationTracker {
    campaigns: Arc<CampaignManager>,
    status: Arc<dyn TransactionStatusSource>,
}

impl ConfirmationTracker {
    pub fn new(campaigns: Arc<CampaignManager>, status: Arc<dyn TransactionStatusSource>) -> Self {
        Self { campaigns, status }
    }

    /// One pass over every pending donation that has a transaction hash.
    ///
    /// Lookup and write failures are logged and counted; they never abort the pass.
    pub async fn run_once(&self) -> Result<ConfirmationSummary, LedgerError> {
        let mut summary = ConfirmationSummary::default();

        for (campaign_id, donation) in self.campaigns.pending_donations().await? {
            let Some(tx_hash) = donation.transaction_hash.as_deref() else {
                continue;
            };
            summary.checked += 1;

            let (status, block) = match self.status.status(tx_hash).await {
                Ok(TxLookup::Confirmed { block }) => (DonationStatus::Confirmed, block),
                Ok(TxLookup::Failed { block }) => (DonationStatus::Failed, block),
                Ok(TxLookup::Pending | TxLookup::Unknown) => {
                    debug!(campaign_id = %campaign_id, tx_hash, "still pending");
                    summary.still_pending += 1;
                    continue;
                }
                Err(err) => {
                    warn!(campaign_id = %campaign_id, tx_hash, error = %err, "receipt lookup failed");
                    summary.errors += 1;
                    continue;
                }
            };

            match self
                .campaigns
                .update_donation_status(&campaign_id, tx_hash, status, block)
                .await
            {
                Ok(_) if status == DonationStatus::Confirmed => summary.confirmed += 1,
                Ok(_) => summary.failed += 1,
                Err(err) => {
                    warn!(campaign_id = %campaign_id, tx_hash, error = %err, "status update failed");
                    summary.errors += 1;
                }
            }
        }

        info!(
            checked = summary.checked,
            confirmed = summary.confirmed,
            failed = summary.failed,
            still_pending = summary.still_pending,
            errors = summary.errors,
            "confirmation pass finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ncl_adapters::{SourceError, StaticStatusSource};
    use ncl_core::{NewCampaign, NewDonation};
    use ncl_storage::{DataDir, FetchError};
    use tempfile::tempdir;

    use crate::manager::ReviewDecision;

    struct Broken;

    #[async_trait]
    impl TransactionStatusSource for Broken {
        async fn status(&self, _tx_hash: &str) -> Result<TxLookup, SourceError> {
            Err(FetchError::Malformed("node offline".into()).into())
        }
    }

    async fn seeded(dir: &std::path::Path) -> Arc<CampaignManager> {
        let manager = Arc::new(CampaignManager::new(DataDir::new(dir)));
        manager
            .create_campaign(NewCampaign {
                id: Some("c1".into()),
                title: "Medical Kits".into(),
                ngo_id: "ngo-3".into(),
                target_amount: 9.0,
                ..Default::default()
            })
            .await
            .unwrap();
        manager.review_campaign("c1", ReviewDecision::Approve).await.unwrap();
        for hash in ["0xaa", "0xbb", "0xcc"] {
            manager
                .record_donation(
                    "c1",
                    NewDonation {
                        donor_address: format!("donor-{hash}"),
                        amount: 1.0,
                        currency: None,
                        transaction_hash: Some(hash.into()),
                        anonymous: false,
                        message: None,
                    },
                )
                .await
                .unwrap();
        }
        manager
    }

    #[tokio::test]
    async fn applies_receipts_and_leaves_unmined_transactions_alone() {
        let dir = tempdir().expect("tempdir");
        let manager = seeded(dir.path()).await;
        let status = StaticStatusSource::new()
            .with("0xAA", TxLookup::Confirmed { block: Some(101) })
            .with("0xbb", TxLookup::Failed { block: Some(102) })
            .with("0xcc", TxLookup::Pending);
        let tracker = ConfirmationTracker::new(manager.clone(), Arc::new(status));

        let summary = tracker.run_once().await.unwrap();
        assert_eq!(
            summary,
            ConfirmationSummary {
                checked: 3,
                confirmed: 1,
                failed: 1,
                still_pending: 1,
                errors: 0,
            }
        );

        let donations = manager.campaign_donations("c1").await.unwrap();
        let aa = donations.iter().find(|d| d.has_tx_hash("0xaa")).unwrap();
        assert_eq!(aa.status, DonationStatus::Confirmed);
        assert_eq!(aa.block_number, Some(101));
        let stats = manager.campaign_stats("c1").await.unwrap();
        assert_eq!(stats.confirmed_amount, 1.0);
        assert_eq!(stats.pending_amount, 1.0);

        // Second pass only sees the one still pending.
        let again = tracker.run_once().await.unwrap();
        assert_eq!(again.checked, 1);
    }

    #[tokio::test]
    async fn lookup_errors_are_counted_not_fatal() {
        let dir = tempdir().expect("tempdir");
        let manager = seeded(dir.path()).await;
        let tracker = ConfirmationTracker::new(manager.clone(), Arc::new(Broken));

        let summary = tracker.run_once().await.unwrap();
        assert_eq!(summary.checked, 3);
        assert_eq!(summary.errors, 3);
        assert_eq!(manager.pending_donations().await.unwrap().len(), 3);
    }
}
