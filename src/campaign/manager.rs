use bytes::Bytes;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::Error;
use crate::imaging::{Compositor, QrGenerator};
use crate::user::UserId;

use super::cache::ActiveArtifactCache;
use super::{Campaign, CampaignId, CAMPAIGN_LIFETIME_DAYS};

/// Owns the active-campaign cache and keeps it in step with the store.
///
/// The store decides which campaign is active. The cache only saves the
/// artifact lookup and is re-validated against the store on every read, so
/// a stale slot heals itself instead of surfacing as an error.
#[derive(Debug, Default)]
pub struct CampaignManager {
    cache: ActiveArtifactCache,
    generator: QrGenerator,
    compositor: Compositor,
}

impl CampaignManager {
    pub fn new(
        cache: ActiveArtifactCache,
        generator: QrGenerator,
        compositor: Compositor,
    ) -> CampaignManager {
        CampaignManager {
            cache,
            generator,
            compositor,
        }
    }

    pub fn cache(&self) -> &ActiveArtifactCache {
        &self.cache
    }

    /// Creates a campaign and makes it the active one.
    #[tracing::instrument(skip(self, db))]
    pub async fn create_campaign(
        &self,
        db: &dyn Database,
        name: String,
        url: String,
        created_by: UserId,
    ) -> Result<Campaign, Error> {
        let artifact = self.generator.generate(&url)?;

        let now = Utc::now();
        let mut campaign = Campaign {
            id: CampaignId::new(),
            name,
            url,
            artifact,
            active: false,
            created_by,
            expires_at: now + Duration::days(CAMPAIGN_LIFETIME_DAYS),
            created_at: now,
            modified_at: now,
        };

        // inserted inactive so a unique-active index never sees two actives
        db.campaigns().insert_campaign(&campaign).await?;
        db.campaigns()
            .activate_campaign_exclusively(campaign.id)
            .await?;
        campaign.active = true;

        self.cache.set(campaign.id, campaign.artifact.clone());
        info!(campaign_id = %campaign.id, "created and activated campaign");

        Ok(campaign)
    }

    #[tracing::instrument(skip(self, db))]
    pub async fn get_campaigns(&self, db: &dyn Database) -> Result<Vec<Campaign>, Error> {
        let campaigns = db.campaigns().fetch_campaigns().await?;

        Ok(campaigns)
    }

    #[tracing::instrument(skip(self, db))]
    pub async fn get_campaign_by_id(
        &self,
        db: &dyn Database,
        campaign_id: CampaignId,
    ) -> Result<Option<Campaign>, Error> {
        let campaign = db.campaigns().fetch_campaign_by_id(campaign_id).await?;

        Ok(campaign)
    }

    #[tracing::instrument(skip(self, db))]
    pub async fn get_active_campaign(&self, db: &dyn Database) -> Result<Campaign, Error> {
        if let Some(entry) = self.cache.get() {
            let cached = db
                .campaigns()
                .fetch_campaign_by_id(entry.campaign_id)
                .await?;

            match cached {
                Some(campaign) if campaign.active => return Ok(campaign),
                _ => self.evict(entry.campaign_id),
            }
        }

        self.load_active_campaign(db).await
    }

    /// Artifact of the active campaign. A cached entry is confirmed against
    /// the store without loading the stored artifact again.
    async fn active_artifact(&self, db: &dyn Database) -> Result<Bytes, Error> {
        if let Some(entry) = self.cache.get() {
            if db.campaigns().is_campaign_active(entry.campaign_id).await? {
                return Ok(entry.artifact);
            }
            self.evict(entry.campaign_id);
        }

        Ok(self.load_active_campaign(db).await?.artifact)
    }

    async fn load_active_campaign(&self, db: &dyn Database) -> Result<Campaign, Error> {
        let campaign = db
            .campaigns()
            .fetch_active_campaign()
            .await?
            .ok_or(Error::NoActiveCampaign)?;

        self.cache.set(campaign.id, campaign.artifact.clone());

        Ok(campaign)
    }

    fn evict(&self, campaign_id: CampaignId) {
        debug!(campaign_id = %campaign_id, "evicting stale active campaign");
        self.cache.clear_if(campaign_id);
    }

    /// Makes `campaign_id` the only active campaign.
    #[tracing::instrument(skip(self, db))]
    pub async fn set_active_campaign(
        &self,
        db: &dyn Database,
        campaign_id: CampaignId,
    ) -> Result<Campaign, Error> {
        match db
            .campaigns()
            .activate_campaign_exclusively(campaign_id)
            .await
        {
            Ok(()) => {}
            Err(err @ Error::CampaignNotFound { .. }) => return Err(err),
            Err(err) => {
                // the store may have deactivated everything before failing
                warn!(error = %err, "activation failed, dropping cached campaign");
                self.cache.clear();
                return Err(err);
            }
        }

        let campaign = db.campaigns().fetch_campaign_by_id(campaign_id).await?;
        match campaign {
            Some(campaign) if campaign.active => {
                self.cache.set(campaign.id, campaign.artifact.clone());
                Ok(campaign)
            }
            Some(campaign) => {
                // another activation committed after ours
                self.cache.clear();
                Ok(campaign)
            }
            None => {
                self.cache.clear();
                Err(Error::CampaignNotFound { campaign_id })
            }
        }
    }

    #[tracing::instrument(skip(self, db))]
    pub async fn delete_campaign(
        &self,
        db: &dyn Database,
        campaign_id: CampaignId,
    ) -> Result<(), Error> {
        db.campaigns()
            .fetch_campaign_by_id(campaign_id)
            .await?
            .ok_or(Error::CampaignNotFound { campaign_id })?;

        db.campaigns().delete_campaign(campaign_id).await?;

        if self.cache.clear_if(campaign_id) {
            debug!("deleted campaign was cached as active");
        }

        Ok(())
    }

    /// Stamps the active campaign's artifact onto `carrier` and returns the
    /// result as PNG.
    #[tracing::instrument(skip(self, db, carrier), fields(carrier_len = carrier.len()))]
    pub async fn process_image(&self, db: &dyn Database, carrier: Bytes) -> Result<Bytes, Error> {
        let artifact = self.active_artifact(db).await?;

        let compositor = self.compositor;
        tokio::task::spawn_blocking(move || compositor.composite(&carrier, &artifact)).await?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use image::ImageFormat;

    use super::*;
    use crate::database::test::MockDatabase;
    use crate::database::MemoryDatabase;
    use crate::imaging::fixtures;
    use crate::imaging::qr::MAX_PAYLOAD_LEN;

    async fn create(manager: &CampaignManager, db: &dyn Database, name: &str) -> Campaign {
        manager
            .create_campaign(
                db,
                name.to_string(),
                format!("https://example.com/{}", name),
                UserId::new(),
            )
            .await
            .unwrap()
    }

    async fn active_count(db: &dyn Database) -> usize {
        db.campaigns()
            .fetch_campaigns()
            .await
            .unwrap()
            .iter()
            .filter(|c| c.active)
            .count()
    }

    #[tokio::test]
    async fn created_campaign_becomes_active() {
        let db = MemoryDatabase::new();
        let manager = CampaignManager::default();

        let campaign = create(&manager, &db, "launch").await;
        let active = manager.get_active_campaign(&db).await.unwrap();

        assert!(campaign.active);
        assert_eq!(active.id, campaign.id);
        assert_eq!(active.artifact, campaign.artifact);
        assert_eq!(manager.cache().get().unwrap().campaign_id, campaign.id);
        assert_eq!(
            campaign.expires_at - campaign.created_at,
            Duration::days(CAMPAIGN_LIFETIME_DAYS)
        );
    }

    #[tokio::test]
    async fn only_latest_created_campaign_is_active() {
        let db = MemoryDatabase::new();
        let manager = CampaignManager::default();

        let first = create(&manager, &db, "first").await;
        let second = create(&manager, &db, "second").await;

        assert_eq!(active_count(&db).await, 1);
        assert!(
            !db.campaigns()
                .fetch_campaign_by_id(first.id)
                .await
                .unwrap()
                .unwrap()
                .active
        );
        assert_eq!(manager.get_active_campaign(&db).await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn create_rejects_unencodable_url_without_persisting() {
        let db = MemoryDatabase::new();
        let manager = CampaignManager::default();

        let result = manager
            .create_campaign(
                &db,
                "huge".to_string(),
                "x".repeat(MAX_PAYLOAD_LEN + 1),
                UserId::new(),
            )
            .await;

        assert!(matches!(result, Err(Error::ArtifactEncodingFailed { .. })));
        assert!(db.campaigns().fetch_campaigns().await.unwrap().is_empty());
        assert_eq!(manager.cache().get(), None);
    }

    #[tokio::test]
    async fn create_leaves_cache_alone_when_insert_fails() {
        let mut db = MockDatabase::new();
        db.campaigns.on_insert_campaign = Some(Box::new(|_| {
            Err(Error::ExistentialState("insert failed".into()))
        }));
        let manager = CampaignManager::default();

        let result = manager
            .create_campaign(
                &db,
                "broken".to_string(),
                "https://example.com".to_string(),
                UserId::new(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(manager.cache().get(), None);
    }

    #[tokio::test]
    async fn create_leaves_cache_alone_when_activation_fails() {
        let mut db = MockDatabase::new();
        db.campaigns.on_activate_campaign_exclusively = Some(Box::new(|_| {
            Err(Error::ExistentialState("activation failed".into()))
        }));
        let manager = CampaignManager::default();
        let previous = CampaignId::new();
        manager.cache().set(previous, Bytes::from_static(b"previous"));

        let result = manager
            .create_campaign(
                &db,
                "broken".to_string(),
                "https://example.com".to_string(),
                UserId::new(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(manager.cache().get().unwrap().campaign_id, previous);
    }

    #[tokio::test]
    async fn get_active_without_campaigns_reports_none_active() {
        let db = MemoryDatabase::new();
        let manager = CampaignManager::default();

        let result = manager.get_active_campaign(&db).await;

        assert_eq!(result.unwrap_err(), Error::NoActiveCampaign);
    }

    #[tokio::test]
    async fn get_active_heals_stale_cache() {
        let db = MemoryDatabase::new();
        let manager = CampaignManager::default();
        let first = create(&manager, &db, "first").await;
        let other = CampaignManager::default();
        let second = create(&other, &db, "second").await;

        // `manager` still caches the first campaign
        assert_eq!(manager.cache().get().unwrap().campaign_id, first.id);

        let active = manager.get_active_campaign(&db).await.unwrap();

        assert_eq!(active.id, second.id);
        assert_eq!(manager.cache().get().unwrap().campaign_id, second.id);
    }

    #[tokio::test]
    async fn get_active_does_not_refetch_active_campaign_when_cache_is_valid() {
        let mut db = MockDatabase::new();
        db.campaigns.on_fetch_active_campaign = Some(Box::new(|_| {
            Err(Error::ExistentialState("cache was not used".into()))
        }));
        let manager = CampaignManager::default();
        let campaign = create(&manager, &db, "cached").await;

        let active = manager.get_active_campaign(&db).await.unwrap();

        assert_eq!(active.id, campaign.id);
    }

    #[tokio::test]
    async fn set_active_switches_campaign_and_cache() {
        let db = MemoryDatabase::new();
        let manager = CampaignManager::default();
        let first = create(&manager, &db, "first").await;
        let second = create(&manager, &db, "second").await;
        manager.set_active_campaign(&db, first.id).await.unwrap();
        assert_eq!(manager.cache().get().unwrap().campaign_id, first.id);

        let activated = manager.set_active_campaign(&db, second.id).await.unwrap();

        assert!(activated.active);
        assert_eq!(manager.get_active_campaign(&db).await.unwrap().id, second.id);
        assert!(
            !db.campaigns()
                .fetch_campaign_by_id(first.id)
                .await
                .unwrap()
                .unwrap()
                .active
        );
        assert_eq!(active_count(&db).await, 1);
    }

    #[tokio::test]
    async fn set_active_unknown_campaign_keeps_cache() {
        let db = MemoryDatabase::new();
        let manager = CampaignManager::default();
        let campaign = create(&manager, &db, "kept").await;
        let missing = CampaignId::new();

        let result = manager.set_active_campaign(&db, missing).await;

        assert_eq!(
            result.unwrap_err(),
            Error::CampaignNotFound {
                campaign_id: missing
            }
        );
        assert_eq!(manager.cache().get().unwrap().campaign_id, campaign.id);
        assert_eq!(manager.get_active_campaign(&db).await.unwrap().id, campaign.id);
    }

    #[tokio::test]
    async fn set_active_failure_drops_cache() {
        let mut db = MockDatabase::new();
        let manager = CampaignManager::default();
        let campaign = create(&manager, &db, "cached").await;
        db.campaigns.on_activate_campaign_exclusively = Some(Box::new(|_| {
            Err(Error::ExistentialState("connection reset".into()))
        }));

        let result = manager.set_active_campaign(&db, campaign.id).await;

        assert_eq!(
            result.unwrap_err(),
            Error::ExistentialState("connection reset".into())
        );
        assert_eq!(manager.cache().get(), None);
    }

    #[tokio::test]
    async fn delete_active_campaign_leaves_nothing_active() {
        let db = MemoryDatabase::new();
        let manager = CampaignManager::default();
        let campaign = create(&manager, &db, "doomed").await;

        manager.delete_campaign(&db, campaign.id).await.unwrap();

        assert_eq!(manager.cache().get(), None);
        assert_eq!(
            manager.get_active_campaign(&db).await.unwrap_err(),
            Error::NoActiveCampaign
        );
    }

    #[tokio::test]
    async fn delete_inactive_campaign_keeps_cache() {
        let db = MemoryDatabase::new();
        let manager = CampaignManager::default();
        let old = create(&manager, &db, "old").await;
        let current = create(&manager, &db, "current").await;

        manager.delete_campaign(&db, old.id).await.unwrap();

        assert_eq!(manager.cache().get().unwrap().campaign_id, current.id);
        assert!(db.campaigns().fetch_campaign_by_id(old.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_unknown_campaign_is_not_found() {
        let db = MemoryDatabase::new();
        let manager = CampaignManager::default();
        let missing = CampaignId::new();

        let result = manager.delete_campaign(&db, missing).await;

        assert_eq!(
            result.unwrap_err(),
            Error::CampaignNotFound {
                campaign_id: missing
            }
        );
    }

    #[tokio::test]
    async fn process_image_without_active_campaign_fails() {
        let db = MemoryDatabase::new();
        let manager = CampaignManager::default();
        let carrier = Bytes::from(fixtures::png(400, 300, [1, 2, 3, 255]));

        let result = manager.process_image(&db, carrier).await;

        assert_eq!(result.unwrap_err(), Error::NoActiveCampaign);
    }

    #[tokio::test]
    async fn process_image_rejects_non_image_upload() {
        let db = MemoryDatabase::new();
        let manager = CampaignManager::default();
        create(&manager, &db, "promo").await;

        let result = manager
            .process_image(&db, Bytes::from_static(b"just some text"))
            .await;

        assert_eq!(result.unwrap_err(), Error::UnsupportedImageFormat);
    }

    #[tokio::test]
    async fn process_image_returns_png_of_carrier_size() {
        let db = MemoryDatabase::new();
        let manager = CampaignManager::default();
        create(&manager, &db, "promo").await;
        let carrier = Bytes::from(fixtures::png(1000, 500, [1, 2, 3, 255]));

        let output = manager.process_image(&db, carrier.clone()).await.unwrap();
        let again = manager.process_image(&db, carrier).await.unwrap();

        let decoded = image::load_from_memory_with_format(&output, ImageFormat::Png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1000, 500));
        assert_eq!(output, again);
    }

    #[tokio::test]
    async fn process_image_uses_newly_activated_artifact() {
        let db = MemoryDatabase::new();
        let manager = CampaignManager::default();
        let first = create(&manager, &db, "first").await;
        let second = create(&manager, &db, "second").await;
        let carrier = Bytes::from(fixtures::png(300, 300, [1, 2, 3, 255]));
        let compositor = Compositor::default();

        manager.set_active_campaign(&db, first.id).await.unwrap();
        let output = manager.process_image(&db, carrier.clone()).await.unwrap();

        assert_eq!(output, compositor.composite(&carrier, &first.artifact).unwrap());
        assert_ne!(output, compositor.composite(&carrier, &second.artifact).unwrap());
    }

    #[tokio::test]
    async fn concurrent_activations_leave_one_active() {
        let db = Arc::new(MemoryDatabase::new());
        let manager = Arc::new(CampaignManager::default());
        let mut ids = vec![];
        for name in &["a", "b", "c", "d", "e"] {
            ids.push(create(&manager, &*db, name).await.id);
        }

        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let db = Arc::clone(&db);
                let manager = Arc::clone(&manager);
                let campaign_id = ids[i % ids.len()];
                tokio::spawn(async move {
                    manager
                        .set_active_campaign(&*db, campaign_id)
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(active_count(&*db).await, 1);
        let stored = db
            .campaigns()
            .fetch_active_campaign()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(manager.get_active_campaign(&*db).await.unwrap().id, stored.id);
    }

    #[tokio::test]
    async fn process_image_stamps_cached_artifact() {
        let mut db = MockDatabase::new();
        let manager = CampaignManager::default();
        let campaign = create(&manager, &db, "cached").await;
        let cached_artifact = Bytes::from(fixtures::png(8, 8, [255, 0, 0, 255]));
        manager.cache().set(campaign.id, cached_artifact.clone());
        db.campaigns.on_fetch_campaign_by_id = Some(Box::new(|_| {
            Err(Error::ExistentialState("full record was loaded".into()))
        }));
        db.campaigns.on_fetch_active_campaign = Some(Box::new(|_| {
            Err(Error::ExistentialState("active record was loaded".into()))
        }));
        let carrier = Bytes::from(fixtures::png(300, 300, [1, 2, 3, 255]));
        let compositor = Compositor::default();

        let output = manager.process_image(&db, carrier.clone()).await.unwrap();

        assert_eq!(output, compositor.composite(&carrier, &cached_artifact).unwrap());
        assert_ne!(output, compositor.composite(&carrier, &campaign.artifact).unwrap());
    }

    #[tokio::test]
    async fn process_image_replaces_stale_cached_artifact() {
        let db = MemoryDatabase::new();
        let manager = CampaignManager::default();
        let current = create(&manager, &db, "current").await;
        let stale = CampaignId::new();
        manager
            .cache()
            .set(stale, Bytes::from(fixtures::png(8, 8, [255, 0, 0, 255])));
        let carrier = Bytes::from(fixtures::png(300, 300, [1, 2, 3, 255]));
        let compositor = Compositor::default();

        let output = manager.process_image(&db, carrier.clone()).await.unwrap();

        assert_eq!(output, compositor.composite(&carrier, &current.artifact).unwrap());
        assert_eq!(manager.cache().get().unwrap().campaign_id, current.id);
    }
}
