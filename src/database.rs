use mongodb::Client;
use tracing::info;

use crate::campaign::db::{self as campaign_db, CampaignStore, MongoCampaignStore};
use crate::error::Error;

mod memory;

pub use memory::{MemoryCampaignStore, MemoryDatabase};

/// Where persistent state lives. Handlers and managers only ever see this
/// trait so the backing engine can be swapped.
pub trait Database: Send + Sync {
    fn campaigns(&self) -> &dyn CampaignStore;
}

#[derive(Debug, Clone)]
pub struct MongoDatabase {
    campaigns: MongoCampaignStore,
}

impl MongoDatabase {
    pub async fn initialize(uri: &str, name: &str) -> Result<MongoDatabase, Error> {
        info!("connecting to db: {}", uri);
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(name);

        campaign_db::initialize(&db).await?;

        Ok(MongoDatabase {
            campaigns: MongoCampaignStore::new(client, &db),
        })
    }
}

impl Database for MongoDatabase {
    fn campaigns(&self) -> &dyn CampaignStore {
        &self.campaigns
    }
}
