use std::future::{ready, Ready};

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use uuid::Uuid;

use crate::{config::Config, error::ServiceError};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const AUTH_EMAIL_HEADER: &str = "x-auth-email";
pub const PROXY_SECRET_HEADER: &str = "x-proxy-secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// A user row from the database session.
    SessionUser,
    /// An OAuth session email mapped through UUID v5.
    OAuthEmail,
}

/// The stable owner key for reservations and lottery applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub source: IdentitySource,
}

/// Deterministic user id for an OAuth email.
pub fn user_id_from_email(namespace: &Uuid, email: &str) -> Uuid {
    let normalized = email.trim().to_lowercase();
    Uuid::new_v5(namespace, normalized.as_bytes())
}

pub fn parse_user_id(raw: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ServiceError::InvalidUserId)
}

impl Identity {
    pub fn resolve(
        session_user: Option<&str>,
        oauth_email: Option<&str>,
        namespace: &Uuid,
    ) -> Result<Self, ServiceError> {
        if let Some(raw) = session_user.filter(|s| !s.trim().is_empty()) {
            return Ok(Identity {
                user_id: parse_user_id(raw)?,
                source: IdentitySource::SessionUser,
            });
        }

        match oauth_email.map(str::trim).filter(|s| !s.is_empty()) {
            Some(email) if email.contains('@') => Ok(Identity {
                user_id: user_id_from_email(namespace, email),
                source: IdentitySource::OAuthEmail,
            }),
            Some(_) => Err(ServiceError::InvalidUserId),
            None => Err(ServiceError::MissingIdentity),
        }
    }
}

pub(crate) fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

impl FromRequest for Identity {
    type Error = ServiceError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let namespace = req
            .app_data::<web::Data<Config>>()
            .map(|config| config.identity_namespace)
            .unwrap_or(crate::config::DEFAULT_IDENTITY_NAMESPACE);

        let session_user = match req.headers().get(USER_ID_HEADER).map(|v| v.to_str()) {
            Some(Err(_)) => return ready(Err(ServiceError::InvalidUserId)),
            Some(Ok(raw)) => Some(raw),
            None => None,
        };

        ready(Identity::resolve(session_user, header(req, AUTH_EMAIL_HEADER), &namespace))
    }
}
