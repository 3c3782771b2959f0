use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::typedid::{TypedId, TypedIdMarker};
use crate::user::UserId;

pub mod cache;
pub mod db;
pub mod endpoints;
pub mod manager;
pub use endpoints::{CampaignBody, CreateCampaignBody};

pub type CampaignId = TypedId<Campaign>;

/// How long a campaign stays valid after it is created.
pub const CAMPAIGN_LIFETIME_DAYS: i64 = 7;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Campaign {
    #[serde(rename = "_id")]
    pub id: CampaignId,
    pub name: String,
    pub url: String,
    /// PNG rendering of `url`, fixed at creation.
    pub artifact: Bytes,
    pub active: bool,
    pub created_by: UserId,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub modified_at: DateTime<Utc>,
}

impl TypedIdMarker for Campaign {
    fn tag() -> &'static str {
        "CPN"
    }
}
