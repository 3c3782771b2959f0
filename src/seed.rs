use tracing::info;
use uuid::Uuid;

use crate::campaign::manager::CampaignManager;
use crate::database::Database;
use crate::error::Error;
use crate::user::UserId;

/// Owner recorded on campaigns created by the server itself.
pub fn system_user_id() -> UserId {
    UserId::from_uuid(Uuid::nil())
}

/// Creates a demo campaign when the store holds none, so a fresh deployment
/// can stamp images right away.
pub async fn seed(db: &dyn Database, manager: &CampaignManager) -> Result<(), Error> {
    if !db.campaigns().fetch_campaigns().await?.is_empty() {
        info!("campaigns already present, skipping seed");
        return Ok(());
    }

    let campaign = manager
        .create_campaign(
            db,
            "Demo Campaign".to_string(),
            "https://example.com/welcome".to_string(),
            system_user_id(),
        )
        .await?;

    info!(campaign_id = %campaign.id, "seeded demo campaign");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;

    #[tokio::test]
    async fn seeds_empty_store_once() {
        let db = MemoryDatabase::new();
        let manager = CampaignManager::default();

        seed(&db, &manager).await.unwrap();
        seed(&db, &manager).await.unwrap();

        let campaigns = db.campaigns().fetch_campaigns().await.unwrap();
        assert_eq!(campaigns.len(), 1);
        assert!(campaigns[0].active);
        assert_eq!(
            campaigns[0].created_by.to_string(),
            "USR-00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            manager.get_active_campaign(&db).await.unwrap().id,
            campaigns[0].id
        );
    }
}
