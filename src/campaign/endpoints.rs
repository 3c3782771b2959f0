use actix_multipart::Multipart;
use actix_web::web::{Data, Json, Path};
use actix_web::{delete, get, post, put, HttpResponse};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::Error;
use crate::imaging::OUTPUT_CONTENT_TYPE;
use crate::user::{Caller, UserId};
use crate::utils::SuccessBody;

use super::manager::CampaignManager;
use super::{Campaign, CampaignId};

/// Largest carrier image accepted by `process-image`.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Name of the multipart field holding the carrier image.
pub const IMAGE_FIELD: &str = "image";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateCampaignBody {
    pub name: String,
    pub url: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CampaignBody {
    pub id: CampaignId,
    pub name: String,
    pub url: String,
    pub active: bool,
    pub created_by: UserId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl CampaignBody {
    pub fn render(campaign: Campaign) -> CampaignBody {
        CampaignBody {
            id: campaign.id,
            name: campaign.name,
            url: campaign.url,
            active: campaign.active,
            created_by: campaign.created_by,
            expires_at: campaign.expires_at,
            created_at: campaign.created_at,
            modified_at: campaign.modified_at,
        }
    }
}

#[post("/campaigns")]
#[tracing::instrument(skip(db, manager))]
pub async fn create_campaign(
    db: Data<Box<dyn Database>>,
    manager: Data<CampaignManager>,
    caller: Caller,
    body: Json<CreateCampaignBody>,
) -> Result<HttpResponse, Error> {
    caller.require_admin()?;
    let body = body.into_inner();

    if body.name.trim().is_empty() {
        return Err(Error::MissingField { field: "name" });
    }
    if body.url.trim().is_empty() {
        return Err(Error::MissingField { field: "url" });
    }

    let campaign = manager
        .create_campaign(&***db, body.name, body.url, caller.user_id)
        .await?;

    Ok(HttpResponse::Created().json(CampaignBody::render(campaign)))
}

#[get("/campaigns")]
#[tracing::instrument(skip(db, manager))]
pub async fn get_campaigns(
    db: Data<Box<dyn Database>>,
    manager: Data<CampaignManager>,
    caller: Caller,
) -> Result<Json<Vec<CampaignBody>>, Error> {
    caller.require_admin()?;

    let campaigns = manager.get_campaigns(&***db).await?;

    let body = campaigns.into_iter().map(CampaignBody::render).collect();

    Ok(Json(body))
}

#[get("/campaigns/ACTIVE")]
#[tracing::instrument(skip(db, manager))]
pub async fn get_active_campaign(
    db: Data<Box<dyn Database>>,
    manager: Data<CampaignManager>,
    _caller: Caller,
) -> Result<Json<CampaignBody>, Error> {
    let campaign = manager.get_active_campaign(&***db).await?;

    Ok(Json(CampaignBody::render(campaign)))
}

#[get("/campaigns/{campaign_id}")]
#[tracing::instrument(skip(db, manager))]
pub async fn get_campaign_by_id(
    db: Data<Box<dyn Database>>,
    manager: Data<CampaignManager>,
    caller: Caller,
    params: Path<CampaignId>,
) -> Result<Json<CampaignBody>, Error> {
    caller.require_admin()?;
    let campaign_id = params.into_inner();

    let campaign = manager
        .get_campaign_by_id(&***db, campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound { campaign_id })?;

    Ok(Json(CampaignBody::render(campaign)))
}

#[put("/campaigns/{campaign_id}/activate")]
#[tracing::instrument(skip(db, manager))]
pub async fn activate_campaign(
    db: Data<Box<dyn Database>>,
    manager: Data<CampaignManager>,
    caller: Caller,
    params: Path<CampaignId>,
) -> Result<Json<CampaignBody>, Error> {
    caller.require_admin()?;
    let campaign_id = params.into_inner();

    let campaign = manager.set_active_campaign(&***db, campaign_id).await?;

    Ok(Json(CampaignBody::render(campaign)))
}

#[delete("/campaigns/{campaign_id}")]
#[tracing::instrument(skip(db, manager))]
pub async fn delete_campaign(
    db: Data<Box<dyn Database>>,
    manager: Data<CampaignManager>,
    caller: Caller,
    params: Path<CampaignId>,
) -> Result<Json<SuccessBody>, Error> {
    caller.require_admin()?;
    let campaign_id = params.into_inner();

    manager.delete_campaign(&***db, campaign_id).await?;

    Ok(Json(SuccessBody {}))
}

#[post("/campaigns/process-image")]
#[tracing::instrument(skip(db, manager, payload))]
pub async fn process_image(
    db: Data<Box<dyn Database>>,
    manager: Data<CampaignManager>,
    _caller: Caller,
    payload: Multipart,
) -> Result<HttpResponse, Error> {
    let carrier = read_image_field(payload).await?;

    let output = manager.process_image(&***db, carrier).await?;

    Ok(HttpResponse::Ok()
        .content_type(OUTPUT_CONTENT_TYPE)
        .body(output))
}

/// Pulls the carrier image out of a multipart upload, skipping any other
/// fields and refusing to buffer more than `MAX_IMAGE_BYTES`.
async fn read_image_field(mut payload: Multipart) -> Result<Bytes, Error> {
    while let Some(mut field) = payload.try_next().await? {
        if field.content_disposition().get_name() != Some(IMAGE_FIELD) {
            while field.try_next().await?.is_some() {}
            continue;
        }

        let mut image = BytesMut::new();
        while let Some(chunk) = field.try_next().await? {
            if image.len() + chunk.len() > MAX_IMAGE_BYTES {
                return Err(Error::ImageTooLarge {
                    limit: MAX_IMAGE_BYTES,
                });
            }
            image.extend_from_slice(&chunk);
        }

        if image.is_empty() {
            return Err(Error::MissingField { field: IMAGE_FIELD });
        }

        return Ok(image.freeze());
    }

    Err(Error::MissingField { field: IMAGE_FIELD })
}
