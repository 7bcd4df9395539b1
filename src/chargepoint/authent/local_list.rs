//! Local authorization list.
//!
//! A versioned replica of the Central System's whitelist. `SendLocalList`
//! replaces it wholesale (`Full`) or edits it entry by entry
//! (`Differential`); the persisted version advances only when an update is
//! accepted, and an update is accepted only when its `listVersion` is
//! strictly greater than the stored one.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rust_ocpp::v1_6::messages::get_local_list_version::{
    GetLocalListVersionRequest, GetLocalListVersionResponse,
};
use rust_ocpp::v1_6::messages::send_local_list::{SendLocalListRequest, SendLocalListResponse};
use rust_ocpp::v1_6::types::{AuthorizationData, IdTagInfo, UpdateStatus, UpdateType};
use tracing::{info, warn};

use super::{status_from_str, status_to_str};
use crate::chargepoint::ocpp_config::OcppConfig;
use crate::infrastructure::database::repositories::internal_config_repository::LOCAL_LIST_VERSION_KEY;
use crate::infrastructure::database::repositories::AuthLocalListRepository;
use crate::infrastructure::database::InternalConfigRepository;
use crate::messages::dispatcher::CallFault;
use crate::messages::MessageDispatcher;
use crate::rpc::frame::RpcErrorCode;
use crate::support::errors::StationResult;

use crate::infrastructure::database::repositories::auth_local_list_repository::ListEntry;

pub struct AuthentLocalList {
    repo: AuthLocalListRepository,
    internal_config: InternalConfigRepository,
    ocpp_config: Arc<OcppConfig>,
    version: AtomicI32,
}

impl AuthentLocalList {
    pub async fn init(
        repo: AuthLocalListRepository,
        internal_config: InternalConfigRepository,
        ocpp_config: Arc<OcppConfig>,
    ) -> StationResult<Arc<Self>> {
        let version = match internal_config.get(LOCAL_LIST_VERSION_KEY).await? {
            Some(value) => value.parse().unwrap_or(0),
            None => {
                internal_config.set(LOCAL_LIST_VERSION_KEY, "0").await?;
                0
            }
        };
        info!(version, "Local authorization list loaded");

        Ok(Arc::new(Self {
            repo,
            internal_config,
            ocpp_config,
            version: AtomicI32::new(version),
        }))
    }

    pub fn register_handlers(
        self: &Arc<Self>,
        dispatcher: &MessageDispatcher,
    ) -> StationResult<()> {
        let list = self.clone();
        dispatcher.register_typed(
            "GetLocalListVersion",
            move |_request: GetLocalListVersionRequest| {
                let list = list.clone();
                async move {
                    Ok(GetLocalListVersionResponse {
                        list_version: list.version(),
                    })
                }
            },
        )?;

        let list = self.clone();
        dispatcher.register_typed("SendLocalList", move |request: SendLocalListRequest| {
            let list = list.clone();
            async move { list.handle_send_local_list(request).await }
        })?;

        Ok(())
    }

    pub fn version(&self) -> i32 {
        self.version.load(Ordering::SeqCst)
    }

    /// Look up a tag. Expired entries count as a miss but stay in the list;
    /// only a list update from the Central System removes them.
    pub async fn check(&self, id_tag: &str) -> StationResult<Option<IdTagInfo>> {
        let row = match self.repo.find(id_tag).await? {
            Some(row) => row,
            None => return Ok(None),
        };

        if let Some(expiry) = row.expiry {
            if expiry < Utc::now() {
                return Ok(None);
            }
        }

        Ok(Some(IdTagInfo {
            status: status_from_str(&row.status),
            expiry_date: row.expiry,
            parent_id_tag: row.parent,
        }))
    }

    pub fn enabled(&self) -> bool {
        self.ocpp_config.local_auth_list_enabled()
    }

    async fn handle_send_local_list(
        &self,
        request: SendLocalListRequest,
    ) -> Result<SendLocalListResponse, CallFault> {
        info!(
            list_version = request.list_version,
            update_type = ?request.update_type,
            entries = request
                .local_authorization_list
                .as_ref()
                .map(|l| l.len())
                .unwrap_or(0),
            "SendLocalList"
        );

        if !self.enabled() {
            return Ok(SendLocalListResponse {
                status: UpdateStatus::NotSupported,
            });
        }

        let entries = request.local_authorization_list.unwrap_or_default();

        let max_send = self.ocpp_config.send_local_list_max_length();
        if max_send > 0 && entries.len() > max_send {
            return Err(CallFault::new(
                RpcErrorCode::OccurenceConstraintViolation,
                format!(
                    "List carries {} entries, SendLocalListMaxLength is {}",
                    entries.len(),
                    max_send
                ),
            ));
        }

        // Only a strictly newer version is applied. (OCPP 1.6 §5.14: the
        // version number of an update must be greater than the stored one.)
        if request.list_version <= self.version() {
            warn!(
                requested = request.list_version,
                stored = self.version(),
                "SendLocalList version mismatch"
            );
            return Ok(SendLocalListResponse {
                status: UpdateStatus::VersionMismatch,
            });
        }

        let status = match request.update_type {
            UpdateType::Full => self.full_update(entries).await,
            UpdateType::Differential => self.differential_update(entries).await,
        };

        if status == UpdateStatus::Accepted {
            self.version.store(request.list_version, Ordering::SeqCst);
            if let Err(e) = self
                .internal_config
                .set(LOCAL_LIST_VERSION_KEY, &request.list_version.to_string())
                .await
            {
                warn!(error = %e, "Failed to persist local list version");
            }
        }

        info!(?status, version = self.version(), "SendLocalList done");
        Ok(SendLocalListResponse { status })
    }

    /// Atomic replace. Every entry must carry its `idTagInfo`.
    async fn full_update(&self, entries: Vec<AuthorizationData>) -> UpdateStatus {
        let max_length = self.ocpp_config.local_auth_list_max_length();
        if max_length > 0 && entries.len() > max_length {
            warn!(
                entries = entries.len(),
                max_length, "Full update exceeds LocalAuthListMaxLength"
            );
            return UpdateStatus::Failed;
        }

        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            let info = match entry.id_tag_info {
                Some(info) => info,
                None => {
                    warn!(tag = entry.id_tag.as_str(), "Full update entry without idTagInfo");
                    return UpdateStatus::Failed;
                }
            };
            rows.push(ListEntry {
                tag: entry.id_tag,
                parent: info.parent_id_tag,
                expiry: info.expiry_date,
                status: status_to_str(&info.status).to_string(),
            });
        }

        match self.repo.replace_all(rows).await {
            Ok(()) => UpdateStatus::Accepted,
            Err(e) => {
                warn!(error = %e, "Full local list update failed");
                UpdateStatus::Failed
            }
        }
    }

    /// Entry-wise edit: no `idTagInfo` deletes the tag, otherwise upsert.
    async fn differential_update(&self, entries: Vec<AuthorizationData>) -> UpdateStatus {
        for entry in entries {
            let result = match entry.id_tag_info {
                None => self.repo.delete_by_tag(&entry.id_tag).await.map(|_| ()),
                Some(info) => {
                    self.repo
                        .upsert(
                            &entry.id_tag,
                            info.parent_id_tag,
                            info.expiry_date,
                            status_to_str(&info.status),
                        )
                        .await
                }
            };
            if let Err(e) = result {
                warn!(error = %e, "Differential local list update failed");
                return UpdateStatus::Failed;
            }
        }
        UpdateStatus::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::{init_database, Repositories};
    use rust_ocpp::v1_6::types::AuthorizationStatus;

    async fn test_list() -> Arc<AuthentLocalList> {
        let db = init_database("sqlite::memory:").await.unwrap();
        let repos = Repositories::new(db);
        let config = OcppConfig::load(repos.internal_config.clone(), 2)
            .await
            .unwrap();
        AuthentLocalList::init(repos.auth_local_list, repos.internal_config, config)
            .await
            .unwrap()
    }

    fn entry(tag: &str, status: Option<AuthorizationStatus>) -> AuthorizationData {
        AuthorizationData {
            id_tag: tag.to_string(),
            id_tag_info: status.map(|status| IdTagInfo {
                status,
                expiry_date: None,
                parent_id_tag: None,
            }),
        }
    }

    fn full(version: i32, list: Vec<AuthorizationData>) -> SendLocalListRequest {
        SendLocalListRequest {
            list_version: version,
            local_authorization_list: Some(list),
            update_type: UpdateType::Full,
        }
    }

    fn differential(version: i32, list: Vec<AuthorizationData>) -> SendLocalListRequest {
        SendLocalListRequest {
            list_version: version,
            local_authorization_list: Some(list),
            update_type: UpdateType::Differential,
        }
    }

    #[tokio::test]
    async fn full_update_replaces_and_advances_version() {
        let list = test_list().await;
        let response = list
            .handle_send_local_list(full(
                1,
                vec![
                    entry("A", Some(AuthorizationStatus::Accepted)),
                    entry("B", Some(AuthorizationStatus::Blocked)),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(response.status, UpdateStatus::Accepted);
        assert_eq!(list.version(), 1);

        let info = list.check("A").await.unwrap().unwrap();
        assert_eq!(info.status, AuthorizationStatus::Accepted);
        let info = list.check("B").await.unwrap().unwrap();
        assert_eq!(info.status, AuthorizationStatus::Blocked);
    }

    #[tokio::test]
    async fn equal_version_is_a_mismatch_and_leaves_store_untouched() {
        let list = test_list().await;
        list.handle_send_local_list(full(5, vec![entry("A", Some(AuthorizationStatus::Accepted))]))
            .await
            .unwrap();

        let response = list
            .handle_send_local_list(full(5, vec![entry("B", Some(AuthorizationStatus::Accepted))]))
            .await
            .unwrap();
        assert_eq!(response.status, UpdateStatus::VersionMismatch);
        assert_eq!(list.version(), 5);
        assert!(list.check("A").await.unwrap().is_some());
        assert!(list.check("B").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_update_without_id_tag_info_fails() {
        let list = test_list().await;
        let response = list
            .handle_send_local_list(full(1, vec![entry("A", None)]))
            .await
            .unwrap();
        assert_eq!(response.status, UpdateStatus::Failed);
        assert_eq!(list.version(), 0);
    }

    #[tokio::test]
    async fn differential_delete_removes_entry() {
        let list = test_list().await;
        list.handle_send_local_list(full(1, vec![entry("A", Some(AuthorizationStatus::Accepted))]))
            .await
            .unwrap();

        // No idTagInfo ⇒ delete tag A.
        let response = list
            .handle_send_local_list(differential(2, vec![entry("A", None)]))
            .await
            .unwrap();
        assert_eq!(response.status, UpdateStatus::Accepted);
        assert_eq!(list.version(), 2);
        assert!(list.check("A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn differential_upserts_new_and_existing() {
        let list = test_list().await;
        list.handle_send_local_list(differential(
            1,
            vec![entry("A", Some(AuthorizationStatus::Accepted))],
        ))
        .await
        .unwrap();
        list.handle_send_local_list(differential(
            2,
            vec![
                entry("A", Some(AuthorizationStatus::Blocked)),
                entry("B", Some(AuthorizationStatus::Accepted)),
            ],
        ))
        .await
        .unwrap();

        assert_eq!(
            list.check("A").await.unwrap().unwrap().status,
            AuthorizationStatus::Blocked
        );
        assert_eq!(
            list.check("B").await.unwrap().unwrap().status,
            AuthorizationStatus::Accepted
        );
    }

    #[tokio::test]
    async fn disabled_feature_reports_not_supported() {
        let list = test_list().await;
        list.ocpp_config
            .set_from_central("LocalAuthListEnabled", "false")
            .await;
        let response = list
            .handle_send_local_list(full(1, vec![entry("A", Some(AuthorizationStatus::Accepted))]))
            .await
            .unwrap();
        assert_eq!(response.status, UpdateStatus::NotSupported);
    }

    #[tokio::test]
    async fn oversized_list_is_an_occurence_violation() {
        let list = test_list().await;
        let entries: Vec<_> = (0..200)
            .map(|i| entry(&format!("T{}", i), Some(AuthorizationStatus::Accepted)))
            .collect();
        let fault = list
            .handle_send_local_list(full(1, entries))
            .await
            .unwrap_err();
        assert_eq!(fault.code, RpcErrorCode::OccurenceConstraintViolation);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_but_stays() {
        let list = test_list().await;
        let expired = AuthorizationData {
            id_tag: "OLD".into(),
            id_tag_info: Some(IdTagInfo {
                status: AuthorizationStatus::Accepted,
                expiry_date: Some(Utc::now() - chrono::Duration::hours(1)),
                parent_id_tag: None,
            }),
        };
        list.handle_send_local_list(full(1, vec![expired])).await.unwrap();
        assert!(list.check("OLD").await.unwrap().is_none());
        // Still in the store, only a list update removes it.
        assert_eq!(list.repo.count().await.unwrap(), 1);
    }
}
