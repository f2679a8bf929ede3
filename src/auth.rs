//! Admin gate: password login sessions and OAuth email allow-listing.

use std::{
    collections::HashMap,
    future::{ready, Ready},
    sync::Mutex,
    time::{Duration, Instant},
};

use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};
use log::warn;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    config::Config,
    error::ServiceError,
    identity::{self, AUTH_EMAIL_HEADER, PROXY_SECRET_HEADER},
};

/// Lowercase hex SHA-256, the format stored in `admin_passwords`.
pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

/// Longest session lifetime accepted from configuration.
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Live admin session tokens.
pub struct AdminSessions {
    ttl: Duration,
    tokens: Mutex<HashMap<Uuid, Instant>>,
}

impl AdminSessions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: ttl.min(MAX_SESSION_TTL),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self) -> Uuid {
        let token = Uuid::new_v4();
        let now = Instant::now();
        let expires_at = now.checked_add(self.ttl).unwrap_or(now);
        self.lock().insert(token, expires_at);
        token
    }

    pub fn is_valid(&self, token: &Uuid) -> bool {
        let mut tokens = self.lock();
        match tokens.get(token).copied() {
            Some(expires_at) if expires_at > Instant::now() => true,
            Some(_) => {
                tokens.remove(token);
                false
            }
            None => false,
        }
    }

    /// Drops expired tokens, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut tokens = self.lock();
        let before = tokens.len();
        tokens.retain(|_, expires_at| *expires_at > now);
        before - tokens.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Instant>> {
        // a poisoned map only holds tokens, keep serving
        self.tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminSession {
    Token(Uuid),
    AllowListedEmail,
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

fn authorize(req: &HttpRequest) -> Result<AdminSession, ServiceError> {
    if let Some(raw) = bearer_token(req) {
        let sessions = req.app_data::<web::Data<AdminSessions>>();
        return match (Uuid::parse_str(raw), sessions) {
            (Ok(token), Some(sessions)) if sessions.is_valid(&token) => Ok(AdminSession::Token(token)),
            _ => {
                warn!("rejected admin request with unknown or expired token");
                Err(ServiceError::MissingIdentity)
            }
        };
    }

    if let Some(email) = identity::header(req, AUTH_EMAIL_HEADER) {
        let presented = identity::header(req, PROXY_SECRET_HEADER);
        let allowed = req
            .app_data::<web::Data<Config>>()
            .is_some_and(|config| config.proxy_secret_matches(presented) && config.is_admin_email(email));
        if allowed {
            return Ok(AdminSession::AllowListedEmail);
        }
        warn!("rejected admin request from non-admin email");
    }

    Err(ServiceError::MissingIdentity)
}

impl FromRequest for AdminSession {
    type Error = ServiceError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authorize(req))
    }
}
