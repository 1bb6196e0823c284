//! Cache partitioning: entity kinds and tenant/brand scope keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The fixed set of cacheable entity types.
///
/// Each kind maps to one storage partition and carries a default TTL
/// tiered by volatility: session lists churn constantly, brand metadata
/// is near-static.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Active chat sessions for a tenant/brand.
    Sessions,
    /// Brand metadata.
    Brands,
    /// Messaging channel connections.
    Connections,
}

impl EntityKind {
    /// Every cacheable kind, for sweep and clear operations.
    pub const ALL: [EntityKind; 3] = [Self::Sessions, Self::Brands, Self::Connections];

    /// Storage partition name for this kind.
    pub fn partition(self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Brands => "brands",
            Self::Connections => "connections",
        }
    }

    /// Default TTL applied when the caller does not supply one.
    pub fn default_ttl(self) -> Duration {
        match self {
            Self::Sessions => Duration::from_secs(5 * 60),
            Self::Connections => Duration::from_secs(60 * 60),
            Self::Brands => Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.partition())
    }
}

/// Tenant (and optionally brand) scope for a cached entry.
///
/// Text form is `{tenant_id}` or `{tenant_id}:{brand_id}`, matching the
/// cache key layout `{entity}:{tenant}[:{brand}]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    /// Owning tenant.
    pub tenant_id: String,
    /// Brand within the tenant, when the entity is brand-scoped.
    pub brand_id: Option<String>,
}

impl ScopeKey {
    /// Scope covering a whole tenant.
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            brand_id: None,
        }
    }

    /// Scope narrowed to one brand.
    pub fn branded(tenant_id: impl Into<String>, brand_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            brand_id: Some(brand_id.into()),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.brand_id {
            Some(brand) => write!(f, "{}:{}", self.tenant_id, brand),
            None => f.write_str(&self.tenant_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_key_text_forms() {
        assert_eq!(ScopeKey::tenant("t1").to_string(), "t1");
        assert_eq!(ScopeKey::branded("t1", "b1").to_string(), "t1:b1");
    }

    #[test]
    fn ttls_are_tiered_by_volatility() {
        assert!(EntityKind::Sessions.default_ttl() < EntityKind::Connections.default_ttl());
        assert!(EntityKind::Connections.default_ttl() < EntityKind::Brands.default_ttl());
    }

    #[test]
    fn partitions_are_distinct() {
        let mut names: Vec<_> = EntityKind::ALL.iter().map(|k| k.partition()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EntityKind::ALL.len());
    }
}
