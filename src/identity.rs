//! Authenticated identity
//!
//! Token verification happens in front of this service. By the time a request
//! arrives the gateway has resolved the user and forwarded the id in a header.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::InvalidHeaderName, request::Parts, HeaderMap, HeaderName},
};

use crate::error::AppError;
use crate::state::AppState;

/// Resolves the acting user of a request
pub trait IdentityProvider: Send + Sync {
    /// The numeric user id, or `None` when the request is anonymous
    fn identify(&self, headers: &HeaderMap) -> Option<i64>;
}

/// Reads the user id from a single request header
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    header: HeaderName,
}

impl HeaderIdentity {
    pub fn new(header: &str) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            header: HeaderName::from_bytes(header.as_bytes())?,
        })
    }
}

impl IdentityProvider for HeaderIdentity {
    fn identify(&self, headers: &HeaderMap) -> Option<i64> {
        headers
            .get(&self.header)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}

/// The acting user, extracted through the configured `IdentityProvider`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub i64);

#[async_trait]
impl FromRequestParts<AppState> for Actor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state
            .identity()
            .identify(&parts.headers)
            .map(Actor)
            .ok_or_else(|| AppError::Unauthorized("No authenticated user on request".to_string()))
    }
}
