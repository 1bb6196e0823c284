//! Collaborator seams supplied by the host application.

use async_trait::async_trait;

use crate::error::ApiResult;

/// Supplies the bearer credential attached to outgoing requests.
///
/// Looked up per request; the access layer attaches it as an
/// `Authorization` header and never persists it.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The current bearer token, or `None` for unauthenticated calls.
    async fn bearer_token(&self) -> ApiResult<Option<String>>;
}

/// Reports OS-level network connectivity as observed by the host shell.
pub trait ConnectivityProbe: Send + Sync {
    /// Whether the device currently has a network path.
    fn is_online(&self) -> bool;
}

/// Probe that always reports an online device.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl ConnectivityProbe for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Fixed-token provider for tests and headless tooling.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl StaticToken {
    /// Provider returning the given token on every lookup.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// Provider for unauthenticated calls.
    pub fn anonymous() -> Self {
        Self(None)
    }
}

#[async_trait]
impl AuthProvider for StaticToken {
    async fn bearer_token(&self) -> ApiResult<Option<String>> {
        Ok(self.0.clone())
    }
}
