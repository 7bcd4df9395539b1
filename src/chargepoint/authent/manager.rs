//! Authorization decision chain.
//!
//! Local list first, cache second, central Authorize last; the first
//! authority that knows the tag wins. While offline the station falls back
//! to the configured offline policy, so swipes keep working through an
//! outage.

use std::sync::Arc;

use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use tracing::{debug, info};

use super::{AuthentCache, AuthentLocalList};
use crate::chargepoint::ocpp_config::OcppConfig;
use crate::messages::MessageSender;
use crate::support::errors::StationResult;

pub struct AuthentManager {
    local_list: Arc<AuthentLocalList>,
    cache: Arc<AuthentCache>,
    ocpp_config: Arc<OcppConfig>,
    sender: MessageSender,
}

impl AuthentManager {
    pub fn new(
        local_list: Arc<AuthentLocalList>,
        cache: Arc<AuthentCache>,
        ocpp_config: Arc<OcppConfig>,
        sender: MessageSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_list,
            cache,
            ocpp_config,
            sender,
        })
    }

    /// Decide whether `id_tag` may charge.
    pub async fn authorize(&self, id_tag: &str) -> StationResult<IdTagInfo> {
        if self.local_list.enabled() {
            if let Some(info) = self.local_list.check(id_tag).await? {
                debug!(tag = id_tag, status = ?info.status, "Authorized from local list");
                return Ok(info);
            }
        }

        if self.cache.enabled() {
            if let Some(info) = self.cache.check(id_tag).await? {
                debug!(tag = id_tag, status = ?info.status, "Authorized from cache");
                return Ok(info);
            }
        }

        if self.sender.is_connected() {
            let response: AuthorizeResponse = self
                .sender
                .call(
                    "Authorize",
                    &AuthorizeRequest {
                        id_tag: id_tag.to_string(),
                    },
                )
                .await?;
            info!(tag = id_tag, status = ?response.id_tag_info.status, "Authorized by central system");
            self.cache.update(id_tag, &response.id_tag_info).await?;
            return Ok(response.id_tag_info);
        }

        Ok(self.offline_decision(id_tag))
    }

    /// Parent id tag for reservation matching, from whatever local authority
    /// knows the tag.
    pub async fn parent_id_tag(&self, id_tag: &str) -> StationResult<Option<String>> {
        if self.local_list.enabled() {
            if let Some(info) = self.local_list.check(id_tag).await? {
                return Ok(info.parent_id_tag);
            }
        }
        if self.cache.enabled() {
            if let Some(info) = self.cache.check(id_tag).await? {
                return Ok(info.parent_id_tag);
            }
        }
        Ok(None)
    }

    /// Record a Central System verdict obtained outside the Authorize flow
    /// (StartTransaction / StopTransaction confirmations carry one too).
    pub async fn on_central_verdict(&self, id_tag: &str, info: &IdTagInfo) -> StationResult<()> {
        self.cache.update(id_tag, info).await
    }

    fn offline_decision(&self, id_tag: &str) -> IdTagInfo {
        let status = if self.ocpp_config.local_authorize_offline()
            && self.ocpp_config.allow_offline_tx_for_unknown_id()
        {
            AuthorizationStatus::Accepted
        } else {
            AuthorizationStatus::Invalid
        };
        info!(tag = id_tag, ?status, "Offline authorization decision");
        IdTagInfo {
            status,
            expiry_date: None,
            parent_id_tag: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::{init_database, Repositories};
    use crate::messages::MessageDispatcher;
    use crate::rpc::{RpcClient, RpcClientConfig};
    use crate::support::shutdown::ShutdownSignal;
    use std::time::Duration;

    async fn test_manager() -> (Arc<AuthentManager>, Arc<AuthentCache>, Arc<OcppConfig>) {
        let db = init_database("sqlite::memory:").await.unwrap();
        let repos = Repositories::new(db);
        let config = OcppConfig::load(repos.internal_config.clone(), 2)
            .await
            .unwrap();
        let cache = AuthentCache::init(repos.auth_cache, config.clone(), 10)
            .await
            .unwrap();
        let local_list = AuthentLocalList::init(
            repos.auth_local_list,
            repos.internal_config,
            config.clone(),
        )
        .await
        .unwrap();

        // A client that never connects: every decision stays local.
        let rpc = RpcClient::new(
            RpcClientConfig {
                central_system_url: "ws://127.0.0.1:1/ocpp".into(),
                chargepoint_id: "CP".into(),
                basic_auth: None,
                ping_interval: Duration::from_secs(60),
                call_timeout: Duration::from_millis(50),
                reconnect_backoff_min: Duration::from_secs(1),
                reconnect_backoff_max: Duration::from_secs(1),
            },
            Arc::new(MessageDispatcher::new()),
            ShutdownSignal::new(),
        );
        let sender = MessageSender::new(rpc);
        let manager = AuthentManager::new(local_list, cache.clone(), config.clone(), sender);
        (manager, cache, config)
    }

    fn accepted() -> IdTagInfo {
        IdTagInfo {
            status: AuthorizationStatus::Accepted,
            expiry_date: None,
            parent_id_tag: None,
        }
    }

    #[tokio::test]
    async fn cache_hit_authorizes_offline() {
        let (manager, cache, _) = test_manager().await;
        cache.update("ABC", &accepted()).await.unwrap();

        let info = manager.authorize("ABC").await.unwrap();
        assert_eq!(info.status, AuthorizationStatus::Accepted);
    }

    #[tokio::test]
    async fn unknown_tag_offline_is_invalid_by_default() {
        let (manager, _, _) = test_manager().await;
        let info = manager.authorize("NOBODY").await.unwrap();
        assert_eq!(info.status, AuthorizationStatus::Invalid);
    }

    #[tokio::test]
    async fn unknown_tag_offline_accepted_when_configured() {
        let (manager, _, config) = test_manager().await;
        config
            .set_from_central("AllowOfflineTxForUnknownId", "true")
            .await;
        let info = manager.authorize("NOBODY").await.unwrap();
        assert_eq!(info.status, AuthorizationStatus::Accepted);
    }

    #[tokio::test]
    async fn disabled_cache_is_skipped() {
        let (manager, cache, config) = test_manager().await;
        cache.update("ABC", &accepted()).await.unwrap();
        config
            .set_from_central("AuthorizationCacheEnabled", "false")
            .await;

        let info = manager.authorize("ABC").await.unwrap();
        // Offline and cache disabled: the tag is unknown.
        assert_eq!(info.status, AuthorizationStatus::Invalid);
    }
}
