//! Picks and, after the first connection, refines the [`Dialect`] used for a
//! given endpoint (spec.md §4.5).

use std::sync::Arc;
use std::time::Duration;

use crate::dialect::{dialect_for_code, Dialect, DialectCode};
use crate::driver::{DbClient, Driver};
use crate::error::Result;
use crate::url_classifier::{self, RdsUrlType};

/// The endpoint→dialect cache TTL. Resolves the open question in spec.md §9
/// about the ambiguous `86_400_000_000_000` constant: we implement the
/// documented 24-hour intent rather than the apparent nanosecond/millisecond
/// mismatch.
pub const ENDPOINT_DIALECT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Picks a [`Dialect`] by, in priority order: an explicit user override, a
/// cached endpoint→dialect mapping, or the host's URL classification
/// combined with the requested [`crate::dialect::DatabaseType`].
pub struct DialectManager {
    cache: crate::cache::SlidingExpirationCache<String, DialectCode>,
    user_override: Option<DialectCode>,
}

impl DialectManager {
    pub fn new(user_override: Option<DialectCode>) -> Self {
        Self {
            cache: crate::cache::SlidingExpirationCache::new(ENDPOINT_DIALECT_TTL),
            user_override,
        }
    }

    /// Resolves the initial dialect for `host`, before any connection has
    /// been made.
    pub async fn get_dialect(
        &self,
        host: &str,
        database_type: crate::dialect::DatabaseType,
    ) -> Box<dyn Dialect> {
        if let Some(code) = self.user_override {
            return dialect_for_code(code);
        }
        if let Some(code) = self.cache.get(&host.to_string()).await {
            return dialect_for_code(code);
        }
        dialect_for_code(default_code_for(host, database_type))
    }

    /// After the first successful connection, probes `dialect`'s
    /// [`Dialect::update_candidates`] in order and promotes the cluster to
    /// the first that reports true from `is_dialect`. The winning code is
    /// cached against both `original_host` and `new_host` (spec.md §4.5).
    pub async fn get_dialect_for_update(
        &self,
        dialect: &dyn Dialect,
        driver: &dyn Driver,
        client: &dyn DbClient,
        original_host: &str,
        new_host: &str,
    ) -> Result<Box<dyn Dialect>> {
        for candidate_code in dialect.update_candidates() {
            let candidate = dialect_for_code(candidate_code);
            if candidate.is_dialect(driver, client).await? {
                self.cache
                    .put(original_host.to_string(), candidate_code, ENDPOINT_DIALECT_TTL)
                    .await;
                self.cache
                    .put(new_host.to_string(), candidate_code, ENDPOINT_DIALECT_TTL)
                    .await;
                return Ok(candidate);
            }
        }
        Ok(dialect_for_code(dialect.code()))
    }
}

fn default_code_for(host: &str, database_type: crate::dialect::DatabaseType) -> DialectCode {
    use crate::dialect::DatabaseType::*;
    let url_type = url_classifier::classify(host);
    match (database_type, url_type) {
        (Mysql, t) if t.is_rds_cluster() || t == RdsUrlType::RdsInstance => DialectCode::AuroraMysql,
        (Mysql, _) => DialectCode::Mysql,
        (Postgres, t) if t.is_rds_cluster() || t == RdsUrlType::RdsInstance => {
            DialectCode::AuroraPostgres
        }
        (Postgres, _) => DialectCode::Postgres,
    }
}
