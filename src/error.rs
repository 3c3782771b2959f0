use std::fmt::{Debug, Display};
use std::io::Error as IoError;

use actix_multipart::MultipartError;
use actix_web::error::{JsonPayloadError, PathError};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use derivative::Derivative;
use image::ImageError;
use mongodb::error::Error as DatabaseError;
use serde::{Serialize, Serializer};
use tokio::task::JoinError;

use crate::campaign::CampaignId;

#[derive(Debug, Serialize, Derivative)]
#[derivative(PartialEq, Eq)]
#[serde(untagged)]
pub enum Error {
    // 400
    #[serde(serialize_with = "display")]
    InvalidJson(#[derivative(PartialEq = "ignore")] JsonPayloadError),
    #[serde(serialize_with = "display")]
    InvalidPath(#[derivative(PartialEq = "ignore")] PathError),
    InvalidMultipart(String),
    MissingField {
        field: &'static str,
    },
    ArtifactEncodingFailed {
        reason: String,
    },
    UnsupportedImageFormat,

    // 401
    Unauthenticated,

    // 403
    InsufficientPermissions,

    // 404
    PathNotFound,
    CampaignNotFound {
        campaign_id: CampaignId,
    },
    NoActiveCampaign,

    // 413
    ImageTooLarge {
        limit: usize,
    },
    ImageDimensionsTooLarge {
        max_width: u32,
        max_height: u32,
    },

    // 500
    ExistentialState(String),
    InvalidConfiguration {
        key: &'static str,
        reason: String,
    },
    #[serde(serialize_with = "display")]
    FailedDatabaseCall(#[derivative(PartialEq = "ignore")] DatabaseError),
    #[serde(serialize_with = "display")]
    FailedImageOperation(#[derivative(PartialEq = "ignore")] ImageError),
    #[serde(serialize_with = "display")]
    FailedBackgroundTask(#[derivative(PartialEq = "ignore")] JoinError),
    #[serde(serialize_with = "display")]
    IoError(#[derivative(PartialEq = "ignore")] IoError),
}

impl Error {
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidJson(_) => "E4001000",
            Error::InvalidPath(_) => "E4001001",
            Error::InvalidMultipart(_) => "E4001002",
            Error::MissingField { .. } => "E4001003",
            Error::ArtifactEncodingFailed { .. } => "E4001004",
            Error::UnsupportedImageFormat => "E4001005",
            Error::Unauthenticated => "E4011000",
            Error::InsufficientPermissions => "E4031000",
            Error::PathNotFound => "E4041000",
            Error::CampaignNotFound { .. } => "E4041001",
            Error::NoActiveCampaign => "E4041002",
            Error::ImageTooLarge { .. } => "E4131000",
            Error::ImageDimensionsTooLarge { .. } => "E4131001",
            Error::ExistentialState(_) => "E5001000",
            Error::InvalidConfiguration { .. } => "E5001001",
            Error::FailedDatabaseCall(_) => "E5001002",
            Error::FailedImageOperation(_) => "E5001003",
            Error::FailedBackgroundTask(_) => "E5001004",
            Error::IoError(_) => "E5001005",
        }
    }

    pub fn error_message(&self) -> &'static str {
        match self {
            Error::InvalidJson(_) => "The given json could not be parsed",
            Error::InvalidPath(_) => "The given path could not be parsed",
            Error::InvalidMultipart(_) => "The given multipart form could not be parsed",
            Error::MissingField { .. } => "A required field is missing or empty",
            Error::ArtifactEncodingFailed { .. } => {
                "The given url could not be encoded as a QR code"
            }
            Error::UnsupportedImageFormat => {
                "Invalid image format, only PNG and JPEG are supported"
            }
            Error::Unauthenticated => "The request does not carry a valid identity",
            Error::InsufficientPermissions => "The caller is not allowed to perform this action",
            Error::PathNotFound => "The requested path was not found",
            Error::CampaignNotFound { .. } => "The requested campaign was not found",
            Error::NoActiveCampaign => "There is no active campaign",
            Error::ImageTooLarge { .. } => "The uploaded image exceeds the size limit",
            Error::ImageDimensionsTooLarge { .. } => {
                "The uploaded image exceeds the dimension limit"
            }
            Error::ExistentialState(_) => "The server detected an invalid state",
            Error::InvalidConfiguration { .. } => "The server is misconfigured",
            Error::FailedDatabaseCall(_) => {
                "An error occurred when communicating with the database"
            }
            Error::FailedImageOperation(_) => "An error occurred when processing an image",
            Error::FailedBackgroundTask(_) => "A background task failed to complete",
            Error::IoError(_) => "An error occurred during an I/O operation",
        }
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidJson(_) => StatusCode::BAD_REQUEST,
            Error::InvalidPath(_) => StatusCode::BAD_REQUEST,
            Error::InvalidMultipart(_) => StatusCode::BAD_REQUEST,
            Error::MissingField { .. } => StatusCode::BAD_REQUEST,
            Error::ArtifactEncodingFailed { .. } => StatusCode::BAD_REQUEST,
            Error::UnsupportedImageFormat => StatusCode::BAD_REQUEST,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions => StatusCode::FORBIDDEN,
            Error::PathNotFound => StatusCode::NOT_FOUND,
            Error::CampaignNotFound { .. } => StatusCode::NOT_FOUND,
            Error::NoActiveCampaign => StatusCode::NOT_FOUND,
            Error::ImageTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::ImageDimensionsTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::ExistentialState(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::InvalidConfiguration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::FailedDatabaseCall(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::FailedImageOperation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::FailedBackgroundTask(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        #[derive(Serialize)]
        struct Dummy<'a> {
            error_code: &'static str,
            error_message: &'static str,
            #[serde(skip_serializing_if = "Option::is_none")]
            error_meta: Option<&'a Error>,
        }

        let status = self.status_code();

        // internal details stay in the logs
        let error_meta = if status.is_server_error() {
            tracing::error!(error_code = self.error_code(), error = %self, "request failed");
            None
        } else {
            Some(self)
        };

        HttpResponse::build(status).json(&Dummy {
            error_code: self.error_code(),
            error_message: self.error_message(),
            error_meta,
        })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        Debug::fmt(self, f)
    }
}

impl From<DatabaseError> for Error {
    fn from(error: DatabaseError) -> Error {
        Error::FailedDatabaseCall(error)
    }
}

impl From<ImageError> for Error {
    fn from(error: ImageError) -> Error {
        Error::FailedImageOperation(error)
    }
}

impl From<JoinError> for Error {
    fn from(error: JoinError) -> Error {
        Error::FailedBackgroundTask(error)
    }
}

impl From<MultipartError> for Error {
    fn from(error: MultipartError) -> Error {
        Error::InvalidMultipart(error.to_string())
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InvalidJson(err) => Some(err),
            Error::InvalidPath(err) => Some(err),
            Error::FailedDatabaseCall(err) => Some(err),
            Error::FailedImageOperation(err) => Some(err),
            Error::FailedBackgroundTask(err) => Some(err),
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

fn display<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Display,
    S: Serializer,
{
    serializer.collect_str(value)
}
