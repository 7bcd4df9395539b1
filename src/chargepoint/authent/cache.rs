//! Authorization cache.
//!
//! Bounded FIFO cache of idTags the Central System has recently accepted.
//! Expired rows are removed lazily on lookup; only `Accepted` entries are
//! retained on update so a transient `Blocked` response to Authorize never
//! sticks.

use std::sync::Arc;

use chrono::Utc;
use rust_ocpp::v1_6::messages::clear_cache::{ClearCacheRequest, ClearCacheResponse};
use rust_ocpp::v1_6::types::{AuthorizationStatus, ClearCacheStatus, IdTagInfo};
use tracing::{debug, info, warn};

use super::{status_from_str, status_to_str};
use crate::chargepoint::ocpp_config::OcppConfig;
use crate::infrastructure::database::AuthCacheRepository;
use crate::messages::MessageDispatcher;
use crate::support::errors::StationResult;

pub struct AuthentCache {
    repo: AuthCacheRepository,
    ocpp_config: Arc<OcppConfig>,
}

impl AuthentCache {
    /// Build the cache and (re)install the eviction trigger for the
    /// configured bound.
    pub async fn init(
        repo: AuthCacheRepository,
        ocpp_config: Arc<OcppConfig>,
        max_entries: u32,
    ) -> StationResult<Arc<Self>> {
        repo.install_eviction_trigger(max_entries).await?;
        Ok(Arc::new(Self { repo, ocpp_config }))
    }

    pub fn register_handlers(
        self: &Arc<Self>,
        dispatcher: &MessageDispatcher,
    ) -> StationResult<()> {
        let cache = self.clone();
        dispatcher.register_typed("ClearCache", move |_request: ClearCacheRequest| {
            let cache = cache.clone();
            async move {
                let status = if cache.ocpp_config.authorization_cache_enabled() {
                    match cache.clear().await {
                        Ok(()) => ClearCacheStatus::Accepted,
                        Err(e) => {
                            warn!(error = %e, "ClearCache failed");
                            ClearCacheStatus::Rejected
                        }
                    }
                } else {
                    warn!("ClearCache rejected: authorization cache is disabled");
                    ClearCacheStatus::Rejected
                };
                info!(?status, "ClearCache");
                Ok(ClearCacheResponse { status })
            }
        })
    }

    /// Look up a tag. Expired rows are deleted and count as a miss.
    pub async fn check(&self, id_tag: &str) -> StationResult<Option<IdTagInfo>> {
        let row = match self.repo.find(id_tag).await? {
            Some(row) => row,
            None => return Ok(None),
        };

        if let Some(expiry) = row.expiry {
            if expiry < Utc::now() {
                debug!(tag = id_tag, "Cache entry expired, deleting");
                self.repo.delete_by_tag(id_tag).await?;
                return Ok(None);
            }
        }

        Ok(Some(IdTagInfo {
            status: status_from_str(&row.status),
            expiry_date: row.expiry,
            parent_id_tag: row.parent,
        }))
    }

    /// Record the Central System's verdict for a tag.
    ///
    /// Only `Accepted` is stored; any other status removes an existing row,
    /// because those verdicts may be transient and must not be served from
    /// the cache later.
    pub async fn update(&self, id_tag: &str, info: &IdTagInfo) -> StationResult<()> {
        if !self.ocpp_config.authorization_cache_enabled() {
            return Ok(());
        }

        if info.status == AuthorizationStatus::Accepted {
            self.repo
                .upsert(
                    id_tag,
                    info.parent_id_tag.clone(),
                    info.expiry_date,
                    status_to_str(&info.status),
                )
                .await?;
        } else {
            let deleted = self.repo.delete_by_tag(id_tag).await?;
            if deleted > 0 {
                debug!(tag = id_tag, status = ?info.status, "Cache entry dropped");
            }
        }
        Ok(())
    }

    pub async fn clear(&self) -> StationResult<()> {
        let removed = self.repo.clear().await?;
        info!(removed, "Authorization cache cleared");
        Ok(())
    }

    pub async fn count(&self) -> StationResult<u64> {
        Ok(self.repo.count().await?)
    }

    pub fn enabled(&self) -> bool {
        self.ocpp_config.authorization_cache_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::{init_database, Repositories};
    use chrono::Duration;

    async fn test_cache(max_entries: u32) -> Arc<AuthentCache> {
        let db = init_database("sqlite::memory:").await.unwrap();
        let repos = Repositories::new(db);
        let config = OcppConfig::load(repos.internal_config.clone(), 2)
            .await
            .unwrap();
        AuthentCache::init(repos.auth_cache, config, max_entries)
            .await
            .unwrap()
    }

    fn accepted(expiry: Option<chrono::DateTime<Utc>>) -> IdTagInfo {
        IdTagInfo {
            status: AuthorizationStatus::Accepted,
            expiry_date: expiry,
            parent_id_tag: Some("PARENT".into()),
        }
    }

    #[tokio::test]
    async fn accepted_entry_is_cached() {
        let cache = test_cache(10).await;
        cache.update("ABC", &accepted(None)).await.unwrap();

        let info = cache.check("ABC").await.unwrap().unwrap();
        assert_eq!(info.status, AuthorizationStatus::Accepted);
        assert_eq!(info.parent_id_tag.as_deref(), Some("PARENT"));
    }

    #[tokio::test]
    async fn non_accepted_status_deletes_entry() {
        let cache = test_cache(10).await;
        cache.update("ABC", &accepted(None)).await.unwrap();

        let blocked = IdTagInfo {
            status: AuthorizationStatus::Blocked,
            expiry_date: None,
            parent_id_tag: None,
        };
        cache.update("ABC", &blocked).await.unwrap();
        assert!(cache.check("ABC").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_deleted_on_lookup() {
        let cache = test_cache(10).await;
        cache
            .update("X", &accepted(Some(Utc::now() - Duration::seconds(1))))
            .await
            .unwrap();
        assert_eq!(cache.count().await.unwrap(), 1);

        assert!(cache.check("X").await.unwrap().is_none());
        assert_eq!(cache.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn future_expiry_is_a_hit() {
        let cache = test_cache(10).await;
        cache
            .update("Y", &accepted(Some(Utc::now() + Duration::hours(1))))
            .await
            .unwrap();
        assert!(cache.check("Y").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn eviction_keeps_count_bounded() {
        let cache = test_cache(3).await;
        for i in 0..6 {
            cache
                .update(&format!("TAG{}", i), &accepted(None))
                .await
                .unwrap();
        }
        assert!(cache.count().await.unwrap() <= 3);

        // Oldest rows were the ones evicted.
        assert!(cache.check("TAG0").await.unwrap().is_none());
        assert!(cache.check("TAG5").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let cache = test_cache(10).await;
        cache.update("A", &accepted(None)).await.unwrap();
        cache.update("B", &accepted(None)).await.unwrap();
        cache.clear().await.unwrap();
        assert_eq!(cache.count().await.unwrap(), 0);
    }
}
