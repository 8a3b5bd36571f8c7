//! Withdrawal requests against confirmed campaign funds (`withdrawals.json`).

use std::sync::Arc;

use chrono::Utc;
use ncl_core::{new_id, WithdrawalRequest, WithdrawalStatus};
use ncl_storage::{read_json_opt, write_json_atomic, DataDir};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::manager::CampaignManager;
use crate::LedgerError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalInput {
    pub campaign_id: String,
    pub amount: f64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum WithdrawalDecision {
    Approve {
        #[serde(default)]
        note: Option<String>,
    },
    Reject {
        #[serde(default)]
        note: Option<String>,
    },
}

#[derive(Debug)]
pub struct WithdrawalLedger {
    data: DataDir,
    campaigns: Arc<CampaignManager>,
    write_lock: Mutex<()>,
}

impl WithdrawalLedger {
    pub fn new(data: DataDir, campaigns: Arc<CampaignManager>) -> Self {
        Self {
            data,
            campaigns,
            write_lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<Vec<WithdrawalRequest>, LedgerError> {
        Ok(read_json_opt(&self.data.withdrawals_path())
            .await?
            .unwrap_or_default())
    }

    pub async fn list(&self, campaign_id: Option<&str>) -> Result<Vec<WithdrawalRequest>, LedgerError> {
        let mut all = self.read_all().await?;
        if let Some(campaign_id) = campaign_id {
            all.retain(|w| w.campaign_id == campaign_id);
        }
        all.sort_by_key(|w| w.requested_at);
        Ok(all)
    }

    /// Confirmed funds not yet claimed by a pending or approved withdrawal.
    pub async fn available(&self, campaign_id: &str) -> Result<f64, LedgerError> {
        let stats = self.campaigns.campaign_stats(campaign_id).await?;
        let claimed = self
            .read_all()
            .await?
            .iter()
            .filter(|w| w.campaign_id == campaign_id && w.status != WithdrawalStatus::Rejected)
            .map(|w| w.amount)
            .sum::<f64>();
        Ok((stats.confirmed_amount - claimed).max(0.0))
    }

    pub async fn request(&self, input: WithdrawalInput) -> Result<WithdrawalRequest, LedgerError> {
        if !input.amount.is_finite() || input.amount <= 0.0 {
            return Err(LedgerError::Validation("amount must be greater than zero".into()));
        }

        let _guard = self.write_lock.lock().await;
        let campaign = self
            .campaigns
            .load_campaign(&input.campaign_id)
            .await?
            .ok_or_else(|| LedgerError::CampaignNotFound(input.campaign_id.clone()))?;
        let available = self.available(&campaign.id).await?;
        if input.amount > available {
            return Err(LedgerError::Validation(format!(
                "requested {} exceeds available {}",
                input.amount, available
            )));
        }

        let request = WithdrawalRequest {
            id: new_id(),
            campaign_id: campaign.id.clone(),
            ngo_id: campaign.ngo_id.clone(),
            amount: input.amount,
            reason: input.reason,
            status: WithdrawalStatus::Pending,
            requested_at: Utc::now(),
            reviewed_at: None,
            review_note: None,
        };
        let mut all = self.read_all().await?;
        all.push(request.clone());
        write_json_atomic(&self.data.withdrawals_path(), &all).await?;
        info!(withdrawal_id = %request.id, campaign_id = %request.campaign_id, amount = request.amount, "withdrawal requested");
        Ok(request)
    }

    pub async fn review(
        &self,
        withdrawal_id: &str,
        decision: WithdrawalDecision,
    ) -> Result<WithdrawalRequest, LedgerError> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        let Some(request) = all.iter_mut().find(|w| w.id == withdrawal_id) else {
            return Err(LedgerError::WithdrawalNotFound(withdrawal_id.to_string()));
        };
        if request.status != WithdrawalStatus::Pending {
            return Err(LedgerError::Conflict(format!(
                "withdrawal {withdrawal_id} was already reviewed"
            )));
        }
        let (status, note) = match decision {
            WithdrawalDecision::Approve { note } => (WithdrawalStatus::Approved, note),
            WithdrawalDecision::Reject { note } => (WithdrawalStatus::Rejected, note),
        };
        request.status = status;
        request.review_note = note;
        request.reviewed_at = Some(Utc::now());
        let reviewed = request.clone();
        write_json_atomic(&self.data.withdrawals_path(), &all).await?;
        info!(withdrawal_id, status = ?reviewed.status, "withdrawal reviewed");
        Ok(reviewed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ReviewDecision;
    use ncl_core::{DonationStatus, NewCampaign, NewDonation};
    use tempfile::tempdir;

    async fn funded_campaign(manager: &CampaignManager) {
        manager
            .create_campaign(NewCampaign {
                id: Some("c1".into()),
                title: "Shelter".into(),
                ngo_id: "ngo-1".into(),
                target_amount: 10.0,
                ..Default::default()
            })
            .await
            .unwrap();
        manager.review_campaign("c1", ReviewDecision::Approve).await.unwrap();
        for (hash, amount) in [("0x1", 3.0), ("0x2", 2.0)] {
            manager
                .record_donation(
                    "c1",
                    NewDonation {
                        donor_address: "0xd".into(),
                        amount,
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
            .update_donation_status("c1", "0x1", DonationStatus::Confirmed, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn withdrawals_are_bounded_by_confirmed_funds() {
        let dir = tempdir().expect("tempdir");
        let data = DataDir::new(dir.path());
        let manager = Arc::new(CampaignManager::new(data.clone()));
        funded_campaign(&manager).await;
        let ledger = WithdrawalLedger::new(data, manager);

        // Only the confirmed 3.0 counts; the pending 2.0 does not.
        assert_eq!(ledger.available("c1").await.unwrap(), 3.0);
        let too_much = ledger
            .request(WithdrawalInput {
                campaign_id: "c1".into(),
                amount: 4.0,
                reason: "tents".into(),
            })
            .await;
        assert!(matches!(too_much, Err(LedgerError::Validation(_))));

        let first = ledger
            .request(WithdrawalInput {
                campaign_id: "c1".into(),
                amount: 2.0,
                reason: "tents".into(),
            })
            .await
            .unwrap();
        assert_eq!(first.ngo_id, "ngo-1");
        assert_eq!(ledger.available("c1").await.unwrap(), 1.0);

        let rejected = ledger
            .review(&first.id, WithdrawalDecision::Reject { note: Some("no invoice".into()) })
            .await
            .unwrap();
        assert_eq!(rejected.status, WithdrawalStatus::Rejected);
        assert_eq!(ledger.available("c1").await.unwrap(), 3.0);

        assert!(matches!(
            ledger.review(&first.id, WithdrawalDecision::Approve { note: None }).await,
            Err(LedgerError::Conflict(_))
        ));
        assert!(matches!(
            ledger.review("missing", WithdrawalDecision::Approve { note: None }).await,
            Err(LedgerError::WithdrawalNotFound(_))
        ));
        assert_eq!(ledger.list(Some("c1")).await.unwrap().len(), 1);
        assert!(ledger.list(Some("c2")).await.unwrap().is_empty());
    }
}
