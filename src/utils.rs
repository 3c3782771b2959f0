use actix_web::get;
use actix_web::web::Json;
use serde::{Deserialize, Serialize};

/// Empty JSON object returned by endpoints with nothing else to say.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SuccessBody {}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HealthBody {
    pub status: String,
}

#[get("/health")]
pub async fn health() -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok".to_string(),
    })
}
