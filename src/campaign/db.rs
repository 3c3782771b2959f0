use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::Document;
use mongodb::error::{
    Error as DatabaseError, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT,
};
use mongodb::options::FindOptions;
use mongodb::{bson, Client, ClientSession, Collection, Database};
use tracing::{debug, warn};

use crate::error::Error;

use super::{Campaign, CampaignId};

pub const CAMPAIGNS: &str = "campaigns";

/// How many times an activation transaction is attempted when the server
/// reports a transient conflict.
pub const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

/// Durable storage for campaigns.
///
/// Implementations must keep at most one campaign active at any committed
/// point; `activate_campaign_exclusively` is the only way a campaign becomes
/// active.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), Error>;

    /// All campaigns, newest first.
    async fn fetch_campaigns(&self) -> Result<Vec<Campaign>, Error>;

    async fn fetch_campaign_by_id(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<Campaign>, Error>;

    async fn fetch_active_campaign(&self) -> Result<Option<Campaign>, Error>;

    /// Whether `campaign_id` exists and is the active campaign, without
    /// loading its artifact.
    async fn is_campaign_active(&self, campaign_id: CampaignId) -> Result<bool, Error>;

    /// Deactivates every campaign and activates `campaign_id` as one atomic
    /// unit. Fails with `Error::CampaignNotFound` and changes nothing if the
    /// campaign does not exist; any other error leaves the outcome unknown.
    async fn activate_campaign_exclusively(&self, campaign_id: CampaignId) -> Result<(), Error>;

    async fn delete_campaign(&self, campaign_id: CampaignId) -> Result<(), Error>;
}

/// Checks that the deployment can run multi-document transactions and
/// creates the collection's indexes.
pub async fn initialize(db: &Database) -> Result<(), Error> {
    let hello = db.run_command(bson::doc! { "hello": 1 }, None).await?;
    if !supports_transactions(&hello) {
        return Err(Error::InvalidConfiguration {
            key: "DATABASE_URL",
            reason: "campaign activation needs transactions, which require a replica set or \
                     sharded cluster; use a single-node replica set or DATABASE_URL=memory"
                .to_string(),
        });
    }

    db.run_command(
        bson::doc! {
            "createIndexes": CAMPAIGNS,
            "indexes": [
                {
                    "key": { "active": 1 },
                    "name": "unique_active",
                    "unique": true,
                    "partialFilterExpression": { "active": true },
                },
                { "key": { "created_at": -1 }, "name": "by_created_at" },
            ]
        },
        None,
    )
    .await?;

    Ok(())
}

/// Replica set members report `setName`, mongos routers report
/// `msg: "isdbgrid"`. Standalone servers have neither.
fn supports_transactions(hello: &Document) -> bool {
    hello.contains_key("setName") || hello.get_str("msg").map_or(false, |msg| msg == "isdbgrid")
}

fn is_transient(err: &DatabaseError) -> bool {
    err.contains_label(TRANSIENT_TRANSACTION_ERROR)
}

#[derive(Debug, Clone)]
pub struct MongoCampaignStore {
    client: Client,
    campaigns: Collection<Campaign>,
}

impl MongoCampaignStore {
    pub fn new(client: Client, db: &Database) -> MongoCampaignStore {
        MongoCampaignStore {
            client,
            campaigns: db.collection(CAMPAIGNS),
        }
    }

    /// One attempt at exclusive activation. Returns whether the campaign
    /// existed; when it did not the transaction is aborted.
    async fn run_activation(
        &self,
        session: &mut ClientSession,
        campaign_id: CampaignId,
    ) -> Result<bool, DatabaseError> {
        let now = bson::DateTime::from_chrono(Utc::now());

        session.start_transaction(None).await?;

        self.campaigns
            .update_many_with_session(
                bson::doc! { "active": true },
                bson::doc! { "$set": { "active": false, "modified_at": now } },
                None,
                session,
            )
            .await?;

        let result = self
            .campaigns
            .update_one_with_session(
                bson::doc! { "_id": campaign_id },
                bson::doc! { "$set": { "active": true, "modified_at": now } },
                None,
                session,
            )
            .await?;

        if result.matched_count == 0 {
            session.abort_transaction().await?;
            return Ok(false);
        }

        loop {
            match session.commit_transaction().await {
                Err(err) if err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) => {
                    warn!(error = %err, "commit outcome unknown, retrying commit");
                }
                result => return result.map(|()| true),
            }
        }
    }
}

#[async_trait]
impl CampaignStore for MongoCampaignStore {
    #[tracing::instrument(skip(self, campaign), fields(campaign_id = %campaign.id))]
    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), Error> {
        self.campaigns.insert_one(campaign, None).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_campaigns(&self) -> Result<Vec<Campaign>, Error> {
        let options = FindOptions::builder()
            .sort(bson::doc! { "created_at": -1 })
            .build();

        let campaigns: Vec<Campaign> = self
            .campaigns
            .find(bson::doc! {}, options)
            .await?
            .try_collect()
            .await?;

        Ok(campaigns)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_campaign_by_id(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<Campaign>, Error> {
        let campaign = self
            .campaigns
            .find_one(bson::doc! { "_id": campaign_id }, None)
            .await?;

        Ok(campaign)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_active_campaign(&self) -> Result<Option<Campaign>, Error> {
        let campaign = self
            .campaigns
            .find_one(bson::doc! { "active": true }, None)
            .await?;

        Ok(campaign)
    }

    #[tracing::instrument(skip(self))]
    async fn is_campaign_active(&self, campaign_id: CampaignId) -> Result<bool, Error> {
        let count = self
            .campaigns
            .count_documents(bson::doc! { "_id": campaign_id, "active": true }, None)
            .await?;

        Ok(count > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn activate_campaign_exclusively(&self, campaign_id: CampaignId) -> Result<(), Error> {
        let mut session = self.client.start_session(None).await?;

        let mut attempt = 1;
        loop {
            match self.run_activation(&mut session, campaign_id).await {
                Ok(true) => return Ok(()),
                Ok(false) => return Err(Error::CampaignNotFound { campaign_id }),
                Err(err) if is_transient(&err) && attempt < MAX_TRANSACTION_ATTEMPTS => {
                    debug!(attempt, error = %err, "retrying activation transaction");
                    if let Err(err) = session.abort_transaction().await {
                        debug!(error = %err, "transaction was already aborted");
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn delete_campaign(&self, campaign_id: CampaignId) -> Result<(), Error> {
        self.campaigns
            .delete_one(bson::doc! { "_id": campaign_id }, None)
            .await?;

        Ok(())
    }
}
