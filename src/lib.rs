use actix_web::web::{self, Data, JsonConfig, PathConfig, ServiceConfig};
use actix_web::{App, HttpResponse, HttpServer};
use tracing::info;
use tracing_actix_web::TracingLogger;

pub mod campaign;
pub mod config;
pub mod database;
pub mod error;
pub mod imaging;
pub mod seed;
pub mod typedid;
pub mod user;
pub mod utils;

pub use campaign::{CampaignBody, CreateCampaignBody};

use crate::campaign::cache::ActiveArtifactCache;
use crate::campaign::manager::CampaignManager;
use crate::config::Config;
use crate::database::{Database, MemoryDatabase, MongoDatabase};
use crate::error::Error;
use crate::imaging::{Compositor, QrGenerator};

/// Registers extractor configuration and every route. The caller provides
/// `Data<Box<dyn Database>>` and `Data<CampaignManager>`.
pub fn configure(cfg: &mut ServiceConfig) {
    cfg.app_data(JsonConfig::default().error_handler(|err, _req| {
        // format json errors with custom format
        Error::InvalidJson(err).into()
    }))
    .app_data(PathConfig::default().error_handler(|err, _req| {
        // format path errors with custom format
        Error::InvalidPath(err).into()
    }))
    .service(utils::health)
    .service(
        web::scope("/api/v1")
            .service(campaign::endpoints::create_campaign)
            .service(campaign::endpoints::get_campaigns)
            .service(campaign::endpoints::process_image)
            // must precede the `{campaign_id}` route
            .service(campaign::endpoints::get_active_campaign)
            .service(campaign::endpoints::get_campaign_by_id)
            .service(campaign::endpoints::activate_campaign)
            .service(campaign::endpoints::delete_campaign),
    );
}

pub async fn path_not_found() -> Result<HttpResponse, Error> {
    Err(Error::PathNotFound)
}

pub async fn run(config: Config) -> Result<(), Error> {
    let db: Box<dyn Database> = if config.uses_memory_database() {
        info!("using in-memory database");
        Box::new(MemoryDatabase::new())
    } else {
        let db = MongoDatabase::initialize(&config.database_url, &config.database_name).await?;
        Box::new(db)
    };

    let manager = CampaignManager::new(
        ActiveArtifactCache::new(),
        QrGenerator::new(config.artifact_size),
        Compositor::new(config.overlay_margin),
    );

    if config.seed_demo_campaign {
        seed::seed(&*db, &manager).await?;
    }

    let db = Data::new(db);
    let manager = Data::new(manager);

    info!("listening on {}:{}", config.host, config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(db.clone())
            .app_data(manager.clone())
            .wrap(TracingLogger::default())
            .configure(configure)
            .default_service(web::to(path_not_found))
    })
    .bind(config.address())?
    .run()
    .await?;

    Ok(())
}
