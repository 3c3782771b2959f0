use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::campaign::db::CampaignStore;
use crate::campaign::{Campaign, CampaignId};
use crate::error::Error;

use super::Database;

/// Process-local campaign storage. Every operation runs under one mutex,
/// which is what makes exclusive activation atomic here.
#[derive(Debug, Default)]
pub struct MemoryCampaignStore {
    campaigns: Mutex<Vec<Campaign>>,
}

#[async_trait]
impl CampaignStore for MemoryCampaignStore {
    #[tracing::instrument(skip(self, campaign), fields(campaign_id = %campaign.id))]
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), Error> {
        let mut campaigns = self.campaigns.lock();
        if campaigns.iter().any(|c| c.id == campaign.id) {
            return Err(Error::ExistentialState(format!(
                "campaign {} already exists",
                campaign.id
            )));
        }
        campaigns.push(campaign.clone());

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_campaigns(&self) -> Result<Vec<Campaign>, Error> {
        let mut campaigns = self.campaigns.lock().clone();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(campaigns)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_campaign_by_id(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<Campaign>, Error> {
        let campaigns = self.campaigns.lock();

        Ok(campaigns.iter().find(|c| c.id == campaign_id).cloned())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_active_campaign(&self) -> Result<Option<Campaign>, Error> {
        let campaigns = self.campaigns.lock();

        Ok(campaigns.iter().find(|c| c.active).cloned())
    }

    #[tracing::instrument(skip(self))]
    async fn is_campaign_active(&self, campaign_id: CampaignId) -> Result<bool, Error> {
        let campaigns = self.campaigns.lock();

        Ok(campaigns.iter().any(|c| c.id == campaign_id && c.active))
    }

    #[tracing::instrument(skip(self))]
    async fn activate_campaign_exclusively(&self, campaign_id: CampaignId) -> Result<(), Error> {
        let mut campaigns = self.campaigns.lock();
        if !campaigns.iter().any(|c| c.id == campaign_id) {
            return Err(Error::CampaignNotFound { campaign_id });
        }

        let now = Utc::now();
        for campaign in campaigns.iter_mut() {
            let active = campaign.id == campaign_id;
            if campaign.active != active {
                campaign.active = active;
                campaign.modified_at = now;
            }
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_campaign(&self, campaign_id: CampaignId) -> Result<(), Error> {
        self.campaigns.lock().retain(|c| c.id != campaign_id);

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryDatabase {
    campaigns: MemoryCampaignStore,
}

impl MemoryDatabase {
    pub fn new() -> MemoryDatabase {
        MemoryDatabase::default()
    }
}

impl Database for MemoryDatabase {
    fn campaigns(&self) -> &dyn CampaignStore {
        &self.campaigns
    }
}
