use std::str::FromStr;

use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::typedid::{TypedId, TypedIdMarker};

/// Header carrying the authenticated user's id, set by the gateway.
pub const USER_ID_HEADER: &str = "X-User-Id";
/// Header carrying the authenticated user's role, set by the gateway.
pub const USER_ROLE_HEADER: &str = "X-User-Role";

pub type UserId = TypedId<User>;

#[derive(Clone, Debug)]
pub struct User;

impl TypedIdMarker for User {
    fn tag() -> &'static str {
        "USR"
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl FromStr for Role {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            _ => Err(Error::Unauthenticated),
        }
    }
}

/// The identity of whoever made the current request.
///
/// Token validation happens upstream; by the time a request reaches this
/// service its identity has been reduced to the two gateway headers.
#[derive(Clone, Debug)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn require_admin(&self) -> Result<(), Error> {
        match self.role {
            Role::Admin => Ok(()),
            Role::User => Err(Error::InsufficientPermissions),
        }
    }

    fn from_headers(req: &HttpRequest) -> Result<Caller, Error> {
        let user_id = header(req, USER_ID_HEADER)?
            .parse::<UserId>()
            .map_err(|_| Error::Unauthenticated)?;
        let role = header(req, USER_ROLE_HEADER)?.parse::<Role>()?;

        Ok(Caller { user_id, role })
    }
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> Result<&'a str, Error> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or(Error::Unauthenticated)
}

impl FromRequest for Caller {
    type Error = Error;
    type Future = Ready<Result<Caller, Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(Caller::from_headers(req))
    }
}
