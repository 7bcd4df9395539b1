//! Standardized OCPP configuration keys.
//!
//! This is the key/value namespace the Central System can read with
//! `GetConfiguration` and write with `ChangeConfiguration`. Values live in
//! memory for synchronous reads; writes are persisted to the internal config
//! store and replayed over the defaults at startup. Components that must
//! react to a change (meter sampling intervals, heartbeat) subscribe to the
//! change broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use rust_ocpp::v1_6::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse,
};
use rust_ocpp::v1_6::messages::get_configuration::{
    GetConfigurationRequest, GetConfigurationResponse,
};
use rust_ocpp::v1_6::types::{ConfigurationStatus, KeyValue};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::infrastructure::database::repositories::internal_config_repository::OCPP_CONFIG_KEY_PREFIX;
use crate::infrastructure::database::InternalConfigRepository;
use crate::messages::MessageDispatcher;
use crate::support::errors::StationResult;

// ── Key names ──────────────────────────────────────────────────

pub const AUTHORIZATION_CACHE_ENABLED: &str = "AuthorizationCacheEnabled";
pub const ALLOW_OFFLINE_TX_FOR_UNKNOWN_ID: &str = "AllowOfflineTxForUnknownId";
pub const AUTHORIZE_REMOTE_TX_REQUESTS: &str = "AuthorizeRemoteTxRequests";
pub const CLOCK_ALIGNED_DATA_INTERVAL: &str = "ClockAlignedDataInterval";
pub const CONNECTION_TIMEOUT: &str = "ConnectionTimeOut";
pub const GET_CONFIGURATION_MAX_KEYS: &str = "GetConfigurationMaxKeys";
pub const HEARTBEAT_INTERVAL: &str = "HeartbeatInterval";
pub const LOCAL_AUTHORIZE_OFFLINE: &str = "LocalAuthorizeOffline";
pub const LOCAL_PRE_AUTHORIZE: &str = "LocalPreAuthorize";
pub const METER_VALUES_SAMPLED_DATA: &str = "MeterValuesSampledData";
pub const METER_VALUE_SAMPLE_INTERVAL: &str = "MeterValueSampleInterval";
pub const NUMBER_OF_CONNECTORS: &str = "NumberOfConnectors";
pub const STOP_TRANSACTION_ON_INVALID_ID: &str = "StopTransactionOnInvalidId";
pub const STOP_TXN_SAMPLED_DATA: &str = "StopTxnSampledData";
pub const SUPPORTED_FEATURE_PROFILES: &str = "SupportedFeatureProfiles";
pub const TRANSACTION_MESSAGE_ATTEMPTS: &str = "TransactionMessageAttempts";
pub const TRANSACTION_MESSAGE_RETRY_INTERVAL: &str = "TransactionMessageRetryInterval";
pub const WEB_SOCKET_PING_INTERVAL: &str = "WebSocketPingInterval";
pub const LOCAL_AUTH_LIST_ENABLED: &str = "LocalAuthListEnabled";
pub const LOCAL_AUTH_LIST_MAX_LENGTH: &str = "LocalAuthListMaxLength";
pub const SEND_LOCAL_LIST_MAX_LENGTH: &str = "SendLocalListMaxLength";
pub const RESERVE_CONNECTOR_ZERO_SUPPORTED: &str = "ReserveConnectorZeroSupported";
pub const CHARGE_PROFILE_MAX_STACK_LEVEL: &str = "ChargeProfileMaxStackLevel";
pub const CHARGING_SCHEDULE_ALLOWED_CHARGING_RATE_UNIT: &str =
    "ChargingScheduleAllowedChargingRateUnit";
pub const CHARGING_SCHEDULE_MAX_PERIODS: &str = "ChargingScheduleMaxPeriods";
pub const MAX_CHARGING_PROFILES_INSTALLED: &str = "MaxChargingProfilesInstalled";

#[derive(Debug, Clone, Copy, PartialEq)]
enum ValueKind {
    Bool,
    Int,
    CsvList,
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    readonly: bool,
    kind: ValueKind,
}

/// In-memory OCPP configuration with persisted overrides.
pub struct OcppConfig {
    entries: std::sync::RwLock<HashMap<String, Entry>>,
    repo: InternalConfigRepository,
    changes: broadcast::Sender<(String, String)>,
}

impl OcppConfig {
    /// Build the defaults, replay persisted overrides, and return the store.
    pub async fn load(
        repo: InternalConfigRepository,
        connector_count: u32,
    ) -> StationResult<Arc<Self>> {
        let mut entries = default_entries(connector_count);

        for (key, value) in repo.get_by_prefix(OCPP_CONFIG_KEY_PREFIX).await? {
            match entries.get_mut(&key) {
                Some(entry) if !entry.readonly => entry.value = value,
                _ => warn!(key, "Ignoring persisted override for unknown or read-only key"),
            }
        }

        let (changes, _) = broadcast::channel(16);
        Ok(Arc::new(Self {
            entries: std::sync::RwLock::new(entries),
            repo,
            changes,
        }))
    }

    /// Register the GetConfiguration / ChangeConfiguration handlers.
    pub fn register_handlers(
        self: &Arc<Self>,
        dispatcher: &MessageDispatcher,
    ) -> StationResult<()> {
        let config = self.clone();
        dispatcher.register_typed(
            "GetConfiguration",
            move |request: GetConfigurationRequest| {
                let config = config.clone();
                async move { Ok(config.handle_get_configuration(request)) }
            },
        )?;

        let config = self.clone();
        dispatcher.register_typed(
            "ChangeConfiguration",
            move |request: ChangeConfigurationRequest| {
                let config = config.clone();
                async move {
                    let status = config.set_from_central(&request.key, &request.value).await;
                    Ok(ChangeConfigurationResponse { status })
                }
            },
        )?;

        Ok(())
    }

    fn handle_get_configuration(&self, request: GetConfigurationRequest) -> GetConfigurationResponse {
        let entries = self.entries.read().unwrap();

        let mut configuration_key = Vec::new();
        let mut unknown_key = Vec::new();

        match request.key {
            Some(keys) if !keys.is_empty() => {
                for key in keys {
                    match entries.get(&key) {
                        Some(entry) => configuration_key.push(KeyValue {
                            key,
                            readonly: entry.readonly,
                            value: Some(entry.value.clone()),
                        }),
                        None => unknown_key.push(key),
                    }
                }
            }
            _ => {
                let mut keys: Vec<_> = entries.keys().cloned().collect();
                keys.sort();
                for key in keys {
                    let entry = &entries[&key];
                    configuration_key.push(KeyValue {
                        key,
                        readonly: entry.readonly,
                        value: Some(entry.value.clone()),
                    });
                }
            }
        }

        GetConfigurationResponse {
            configuration_key: Some(configuration_key),
            unknown_key: if unknown_key.is_empty() {
                None
            } else {
                Some(unknown_key)
            },
        }
    }

    /// Apply a ChangeConfiguration write.
    pub async fn set_from_central(&self, key: &str, value: &str) -> ConfigurationStatus {
        let (kind, readonly) = {
            let entries = self.entries.read().unwrap();
            match entries.get(key) {
                Some(entry) => (entry.kind, entry.readonly),
                None => return ConfigurationStatus::NotSupported,
            }
        };

        if readonly {
            return ConfigurationStatus::Rejected;
        }
        if !value_is_valid(kind, value) {
            warn!(key, value, "Rejecting malformed configuration value");
            return ConfigurationStatus::Rejected;
        }

        {
            let mut entries = self.entries.write().unwrap();
            if let Some(entry) = entries.get_mut(key) {
                entry.value = value.to_string();
            }
        }

        let persisted_key = format!("{}{}", OCPP_CONFIG_KEY_PREFIX, key);
        if let Err(e) = self.repo.set(&persisted_key, value).await {
            warn!(key, error = %e, "Failed to persist configuration change");
        }

        info!(key, value, "Configuration changed");
        let _ = self.changes.send((key.to_string(), value.to_string()));
        ConfigurationStatus::Accepted
    }

    /// Subscribe to configuration changes `(key, new_value)`.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<(String, String)> {
        self.changes.subscribe()
    }

    // ── Typed accessors ────────────────────────────────────

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap()
            .get(key)
            .map(|e| e.value.clone())
    }

    pub fn bool_value(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn int_value(&self, key: &str) -> i64 {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    pub fn authorization_cache_enabled(&self) -> bool {
        self.bool_value(AUTHORIZATION_CACHE_ENABLED)
    }

    pub fn local_auth_list_enabled(&self) -> bool {
        self.bool_value(LOCAL_AUTH_LIST_ENABLED)
    }

    pub fn local_authorize_offline(&self) -> bool {
        self.bool_value(LOCAL_AUTHORIZE_OFFLINE)
    }

    pub fn allow_offline_tx_for_unknown_id(&self) -> bool {
        self.bool_value(ALLOW_OFFLINE_TX_FOR_UNKNOWN_ID)
    }

    pub fn authorize_remote_tx_requests(&self) -> bool {
        self.bool_value(AUTHORIZE_REMOTE_TX_REQUESTS)
    }

    pub fn stop_transaction_on_invalid_id(&self) -> bool {
        self.bool_value(STOP_TRANSACTION_ON_INVALID_ID)
    }

    pub fn heartbeat_interval_secs(&self) -> u64 {
        self.int_value(HEARTBEAT_INTERVAL).max(0) as u64
    }

    pub fn meter_value_sample_interval_secs(&self) -> u64 {
        self.int_value(METER_VALUE_SAMPLE_INTERVAL).max(0) as u64
    }

    pub fn clock_aligned_data_interval_secs(&self) -> u64 {
        self.int_value(CLOCK_ALIGNED_DATA_INTERVAL).max(0) as u64
    }

    pub fn transaction_message_attempts(&self) -> u32 {
        self.int_value(TRANSACTION_MESSAGE_ATTEMPTS).max(1) as u32
    }

    pub fn transaction_message_retry_interval_secs(&self) -> u64 {
        self.int_value(TRANSACTION_MESSAGE_RETRY_INTERVAL).max(0) as u64
    }

    pub fn local_auth_list_max_length(&self) -> usize {
        self.int_value(LOCAL_AUTH_LIST_MAX_LENGTH).max(0) as usize
    }

    pub fn send_local_list_max_length(&self) -> usize {
        self.int_value(SEND_LOCAL_LIST_MAX_LENGTH).max(0) as usize
    }

    pub fn reserve_connector_zero_supported(&self) -> bool {
        self.bool_value(RESERVE_CONNECTOR_ZERO_SUPPORTED)
    }

    pub fn meter_values_sampled_data(&self) -> Vec<String> {
        self.get(METER_VALUES_SAMPLED_DATA)
            .map(|csv| {
                csv.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn value_is_valid(kind: ValueKind, value: &str) -> bool {
    match kind {
        ValueKind::Bool => {
            value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false")
        }
        ValueKind::Int => value.parse::<i64>().is_ok(),
        ValueKind::CsvList => !value.is_empty(),
    }
}

fn default_entries(connector_count: u32) -> HashMap<String, Entry> {
    let mut map = HashMap::new();
    let mut add = |key: &str, value: String, readonly: bool, kind: ValueKind| {
        map.insert(
            key.to_string(),
            Entry {
                value,
                readonly,
                kind,
            },
        );
    };

    add(AUTHORIZATION_CACHE_ENABLED, "true".into(), false, ValueKind::Bool);
    add(ALLOW_OFFLINE_TX_FOR_UNKNOWN_ID, "false".into(), false, ValueKind::Bool);
    add(AUTHORIZE_REMOTE_TX_REQUESTS, "false".into(), false, ValueKind::Bool);
    add(CLOCK_ALIGNED_DATA_INTERVAL, "0".into(), false, ValueKind::Int);
    add(CONNECTION_TIMEOUT, "60".into(), false, ValueKind::Int);
    add(GET_CONFIGURATION_MAX_KEYS, "50".into(), true, ValueKind::Int);
    add(HEARTBEAT_INTERVAL, "300".into(), false, ValueKind::Int);
    add(LOCAL_AUTHORIZE_OFFLINE, "true".into(), false, ValueKind::Bool);
    add(LOCAL_PRE_AUTHORIZE, "true".into(), false, ValueKind::Bool);
    add(
        METER_VALUES_SAMPLED_DATA,
        "Energy.Active.Import.Register".into(),
        false,
        ValueKind::CsvList,
    );
    add(METER_VALUE_SAMPLE_INTERVAL, "0".into(), false, ValueKind::Int);
    add(
        NUMBER_OF_CONNECTORS,
        connector_count.to_string(),
        true,
        ValueKind::Int,
    );
    add(STOP_TRANSACTION_ON_INVALID_ID, "true".into(), false, ValueKind::Bool);
    add(
        STOP_TXN_SAMPLED_DATA,
        "Energy.Active.Import.Register".into(),
        false,
        ValueKind::CsvList,
    );
    add(
        SUPPORTED_FEATURE_PROFILES,
        "Core,LocalAuthListManagement,Reservation,SmartCharging,RemoteTrigger".into(),
        true,
        ValueKind::CsvList,
    );
    add(TRANSACTION_MESSAGE_ATTEMPTS, "5".into(), false, ValueKind::Int);
    add(TRANSACTION_MESSAGE_RETRY_INTERVAL, "10".into(), false, ValueKind::Int);
    add(WEB_SOCKET_PING_INTERVAL, "60".into(), false, ValueKind::Int);
    add(LOCAL_AUTH_LIST_ENABLED, "true".into(), false, ValueKind::Bool);
    add(LOCAL_AUTH_LIST_MAX_LENGTH, "1000".into(), true, ValueKind::Int);
    add(SEND_LOCAL_LIST_MAX_LENGTH, "100".into(), true, ValueKind::Int);
    add(RESERVE_CONNECTOR_ZERO_SUPPORTED, "false".into(), true, ValueKind::Bool);
    add(CHARGE_PROFILE_MAX_STACK_LEVEL, "10".into(), true, ValueKind::Int);
    add(
        CHARGING_SCHEDULE_ALLOWED_CHARGING_RATE_UNIT,
        "Current,Power".into(),
        true,
        ValueKind::CsvList,
    );
    add(CHARGING_SCHEDULE_MAX_PERIODS, "24".into(), true, ValueKind::Int);
    add(MAX_CHARGING_PROFILES_INSTALLED, "32".into(), true, ValueKind::Int);

    map
}
