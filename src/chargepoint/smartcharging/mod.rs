//! Smart charging: stacked profile store and setpoint evaluation.
//!
//! Profiles are keyed by `(purpose, stackLevel, connector)`; installing at an
//! occupied key replaces the previous profile. TxProfiles bind to a running
//! transaction; when one arrives between RemoteStart and the
//! StartTransaction confirmation it is parked on the connector and
//! materialized once the transaction id is known. Every installed profile is
//! persisted and the in-memory index is rebuilt at startup.

pub mod schedule;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_ocpp::v1_6::messages::clear_charging_profile::{
    ClearChargingProfileRequest, ClearChargingProfileResponse,
};
use rust_ocpp::v1_6::messages::get_composite_schedule::{
    GetCompositeScheduleRequest, GetCompositeScheduleResponse,
};
use rust_ocpp::v1_6::messages::set_charging_profile::{
    SetChargingProfileRequest, SetChargingProfileResponse,
};
use rust_ocpp::v1_6::types::{
    ChargingProfile, ChargingProfileKindType, ChargingProfilePurposeType, ChargingProfileStatus,
    ChargingRateUnitType, ChargingSchedule, ChargingSchedulePeriod, ClearChargingProfileStatus,
    GetCompositeScheduleStatus, RecurrencyKindType,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chargepoint::connectors::Connectors;
use crate::config::SmartChargingConfig;
use crate::infrastructure::database::repositories::charging_profile_repository::ProfileRecord;
use crate::infrastructure::database::ChargingProfileRepository;
use crate::messages::dispatcher::CallFault;
use crate::messages::MessageDispatcher;
use crate::support::errors::StationResult;
use crate::support::shutdown::ShutdownSignal;
use crate::support::timer::{spawn_periodic, TimerHandle};

pub use schedule::Setpoint;

/// Transaction context captured once per evaluation.
#[derive(Debug, Clone, Copy, Default)]
struct TxContext {
    active: bool,
    transaction_id: Option<i32>,
    transaction_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct Installed {
    connector_id: u32,
    profile: ChargingProfile,
}

pub struct SmartChargingManager {
    nominal_voltage: f64,
    cleanup_interval: StdDuration,
    connectors: Arc<Connectors>,
    repo: ChargingProfileRepository,
    profiles: Mutex<Vec<Installed>>,
}

impl SmartChargingManager {
    /// Rebuild the in-memory index from the persisted profiles.
    pub async fn init(
        config: &SmartChargingConfig,
        connectors: Arc<Connectors>,
        repo: ChargingProfileRepository,
    ) -> StationResult<Arc<Self>> {
        let mut profiles = Vec::new();
        for row in repo.load_all().await? {
            match record_to_profile(&row) {
                Ok((connector_id, profile)) => profiles.push(Installed {
                    connector_id,
                    profile,
                }),
                Err(e) => warn!(
                    profile_id = row.profile_id,
                    error = %e,
                    "Dropping unreadable persisted profile"
                ),
            }
        }
        info!(installed = profiles.len(), "Charging profiles restored");

        Ok(Arc::new(Self {
            nominal_voltage: config.nominal_voltage,
            cleanup_interval: StdDuration::from_secs(config.profile_cleanup_interval_secs),
            connectors,
            repo,
            profiles: Mutex::new(profiles),
        }))
    }

    /// Start the periodic expired-profile cleanup.
    pub fn start(self: &Arc<Self>, shutdown: ShutdownSignal) -> TimerHandle {
        let manager = self.clone();
        spawn_periodic("profile-cleanup", self.cleanup_interval, shutdown, move || {
            let manager = manager.clone();
            async move {
                manager.cleanup_expired().await;
            }
        })
    }

    pub fn register_handlers(
        self: &Arc<Self>,
        dispatcher: &MessageDispatcher,
    ) -> StationResult<()> {
        let manager = self.clone();
        dispatcher.register_typed(
            "SetChargingProfile",
            move |request: SetChargingProfileRequest| {
                let manager = manager.clone();
                async move { manager.handle_set_charging_profile(request).await }
            },
        )?;

        let manager = self.clone();
        dispatcher.register_typed(
            "ClearChargingProfile",
            move |request: ClearChargingProfileRequest| {
                let manager = manager.clone();
                async move { manager.handle_clear_charging_profile(request).await }
            },
        )?;

        let manager = self.clone();
        dispatcher.register_typed(
            "GetCompositeSchedule",
            move |request: GetCompositeScheduleRequest| {
                let manager = manager.clone();
                async move { manager.handle_get_composite_schedule(request).await }
            },
        )?;

        Ok(())
    }

    // ── Handlers ───────────────────────────────────────────

    async fn handle_set_charging_profile(
        &self,
        request: SetChargingProfileRequest,
    ) -> Result<SetChargingProfileResponse, CallFault> {
        let connector_id = request.connector_id;
        let mut profile = request.cs_charging_profiles;
        info!(
            connector_id,
            profile_id = profile.charging_profile_id,
            purpose = ?profile.charging_profile_purpose,
            stack_level = profile.stack_level,
            "SetChargingProfile"
        );

        if connector_id < 0 || !self.connectors.is_valid(connector_id as u32) {
            return Err(CallFault::property_constraint(format!(
                "Invalid connector id {}",
                connector_id
            )));
        }
        let connector_id = connector_id as u32;

        // Keep periods ordered; evaluation relies on it.
        profile
            .charging_schedule
            .charging_schedule_period
            .sort_by_key(|p| p.start_period);

        let status = match profile.charging_profile_purpose {
            ChargingProfilePurposeType::ChargePointMaxProfile => {
                if connector_id != 0 {
                    warn!("ChargePointMaxProfile is only valid on connector 0");
                    ChargingProfileStatus::Rejected
                } else {
                    self.install(connector_id, profile).await
                }
            }
            ChargingProfilePurposeType::TxDefaultProfile => self.install(connector_id, profile).await,
            ChargingProfilePurposeType::TxProfile => {
                if self.install_tx_profile(connector_id, profile).await {
                    ChargingProfileStatus::Accepted
                } else {
                    ChargingProfileStatus::Rejected
                }
            }
        };

        Ok(SetChargingProfileResponse { status })
    }

    async fn handle_clear_charging_profile(
        &self,
        request: ClearChargingProfileRequest,
    ) -> Result<ClearChargingProfileResponse, CallFault> {
        info!(
            id = ?request.id,
            connector_id = ?request.connector_id,
            purpose = ?request.charging_profile_purpose,
            stack_level = ?request.stack_level,
            "ClearChargingProfile"
        );

        let mut profiles = self.profiles.lock().await;
        let mut removed_ids = Vec::new();
        profiles.retain(|installed| {
            let matches = request
                .id
                .map_or(true, |id| installed.profile.charging_profile_id == id)
                && request
                    .connector_id
                    .map_or(true, |cid| installed.connector_id as i32 == cid)
                && request.charging_profile_purpose.as_ref().map_or(true, |p| {
                    installed.profile.charging_profile_purpose == *p
                })
                && request
                    .stack_level
                    .map_or(true, |level| installed.profile.stack_level as i32 == level);
            if matches {
                removed_ids.push(installed.profile.charging_profile_id);
            }
            !matches
        });
        drop(profiles);

        if removed_ids.is_empty() {
            return Ok(ClearChargingProfileResponse {
                status: ClearChargingProfileStatus::Unknown,
            });
        }

        if let Err(e) = self.repo.delete_by_profile_ids(&removed_ids).await {
            warn!(error = %e, "Failed to delete cleared profiles");
        }
        info!(removed = removed_ids.len(), "Charging profiles cleared");
        Ok(ClearChargingProfileResponse {
            status: ClearChargingProfileStatus::Accepted,
        })
    }

    async fn handle_get_composite_schedule(
        &self,
        request: GetCompositeScheduleRequest,
    ) -> Result<GetCompositeScheduleResponse, CallFault> {
        if request.connector_id < 0 || !self.connectors.is_valid(request.connector_id as u32) {
            return Err(CallFault::property_constraint(format!(
                "Invalid connector id {}",
                request.connector_id
            )));
        }
        let connector_id = request.connector_id as u32;
        let unit = request
            .charging_rate_unit
            .clone()
            .unwrap_or(ChargingRateUnitType::A);
        let now = Utc::now();

        let periods = self
            .composite_schedule(connector_id, now, request.duration.max(0) as i64, unit.clone())
            .await;

        if periods.is_empty() {
            return Ok(GetCompositeScheduleResponse {
                status: GetCompositeScheduleStatus::Rejected,
                connector_id: None,
                schedule_start: None,
                charging_schedule: None,
            });
        }

        Ok(GetCompositeScheduleResponse {
            status: GetCompositeScheduleStatus::Accepted,
            connector_id: Some(request.connector_id),
            schedule_start: Some(now),
            charging_schedule: Some(ChargingSchedule {
                duration: Some(request.duration),
                start_schedule: Some(now),
                charging_rate_unit: unit,
                charging_schedule_period: periods,
                min_charging_rate: None,
            }),
        })
    }

    // ── Profile store ──────────────────────────────────────

    /// Install a ChargePointMax or TxDefault profile, replacing the one at
    /// the same `(purpose, stackLevel, connector)` if present.
    async fn install(&self, connector_id: u32, profile: ChargingProfile) -> ChargingProfileStatus {
        let record = match profile_to_record(connector_id, &profile) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Unserializable charging profile");
                return ChargingProfileStatus::Rejected;
            }
        };

        let mut profiles = self.profiles.lock().await;
        profiles.retain(|installed| {
            installed.profile.charging_profile_id != profile.charging_profile_id
                && !(installed.connector_id == connector_id
                    && installed.profile.charging_profile_purpose
                        == profile.charging_profile_purpose
                    && installed.profile.stack_level == profile.stack_level)
        });
        profiles.push(Installed {
            connector_id,
            profile,
        });
        drop(profiles);

        if let Err(e) = self.repo.save(record).await {
            warn!(error = %e, "Failed to persist charging profile");
            return ChargingProfileStatus::Rejected;
        }
        ChargingProfileStatus::Accepted
    }

    /// Install a TxProfile. Requires a running transaction on the connector;
    /// if the transaction id is not known yet (between RemoteStart and the
    /// StartTransaction confirmation) the profile is parked on the connector.
    pub async fn install_tx_profile(&self, connector_id: u32, profile: ChargingProfile) -> bool {
        if !self.connectors.is_chargeable(connector_id) {
            return false;
        }
        let connector = match self.connectors.get(connector_id) {
            Some(connector) => connector,
            None => return false,
        };

        let mut state = connector.lock().await;
        if !state.transaction_active {
            warn!(connector_id, "TxProfile without a running transaction");
            return false;
        }

        match state.transaction_id {
            Some(tx_id) => {
                if let Some(bound) = profile.transaction_id {
                    if bound != tx_id {
                        warn!(
                            connector_id,
                            bound, tx_id, "TxProfile bound to a different transaction"
                        );
                        return false;
                    }
                }
                drop(state);
                let mut profile = profile;
                profile.transaction_id = Some(tx_id);
                self.install(connector_id, profile).await == ChargingProfileStatus::Accepted
            }
            None => {
                debug!(connector_id, "Parking TxProfile until transaction id is known");
                state.pending_tx_profiles.push(profile);
                true
            }
        }
    }

    /// Materialize profiles parked on the connector now that the transaction
    /// id is known.
    pub async fn assign_pending_tx_profiles(&self, connector_id: u32, transaction_id: i32) {
        let connector = match self.connectors.get(connector_id) {
            Some(connector) => connector,
            None => return,
        };
        let pending = {
            let mut state = connector.lock().await;
            std::mem::take(&mut state.pending_tx_profiles)
        };
        for mut profile in pending {
            profile.transaction_id = Some(transaction_id);
            debug!(
                connector_id,
                transaction_id,
                profile_id = profile.charging_profile_id,
                "Materializing pending TxProfile"
            );
            self.install(connector_id, profile).await;
        }
    }

    /// Delete all TxProfiles of a connector (transaction ended).
    pub async fn clear_tx_profiles(&self, connector_id: u32) {
        if let Some(connector) = self.connectors.get(connector_id) {
            connector.lock().await.pending_tx_profiles.clear();
        }

        let mut profiles = self.profiles.lock().await;
        let mut removed_ids = Vec::new();
        profiles.retain(|installed| {
            let is_tx = installed.connector_id == connector_id
                && installed.profile.charging_profile_purpose
                    == ChargingProfilePurposeType::TxProfile;
            if is_tx {
                removed_ids.push(installed.profile.charging_profile_id);
            }
            !is_tx
        });
        drop(profiles);

        if !removed_ids.is_empty() {
            if let Err(e) = self.repo.delete_by_profile_ids(&removed_ids).await {
                warn!(error = %e, "Failed to delete TxProfiles");
            }
        }
    }

    async fn cleanup_expired(&self) {
        let now = Utc::now();
        let mut profiles = self.profiles.lock().await;
        let mut removed_ids = Vec::new();
        profiles.retain(|installed| {
            let expired = installed.profile.charging_profile_kind
                != ChargingProfileKindType::Recurring
                && installed
                    .profile
                    .valid_to
                    .map(|valid_to| valid_to < now)
                    .unwrap_or(false);
            if expired {
                removed_ids.push(installed.profile.charging_profile_id);
            }
            !expired
        });
        drop(profiles);

        if !removed_ids.is_empty() {
            info!(removed = removed_ids.len(), "Expired charging profiles removed");
            if let Err(e) = self.repo.delete_by_profile_ids(&removed_ids).await {
                warn!(error = %e, "Failed to delete expired profiles");
            }
        }
    }

    pub async fn installed_count(&self) -> usize {
        self.profiles.lock().await.len()
    }

    // ── Evaluation ─────────────────────────────────────────

    async fn tx_context(&self, connector_id: u32) -> TxContext {
        match self.connectors.get(connector_id) {
            Some(connector) => {
                let state = connector.lock().await;
                TxContext {
                    active: state.transaction_active,
                    transaction_id: state.transaction_id,
                    transaction_start: state.transaction_start,
                }
            }
            None => TxContext::default(),
        }
    }

    /// Evaluate the charge point and connector setpoints in effect now.
    ///
    /// Pure with respect to the profile store: evaluating twice yields the
    /// same result and changes nothing.
    pub async fn get_setpoint(
        &self,
        connector_id: u32,
        unit: ChargingRateUnitType,
    ) -> (Option<Setpoint>, Option<Setpoint>) {
        let now = Utc::now();
        let tx = self.tx_context(connector_id).await;
        let profiles = self.profiles.lock().await;

        let charge_point = self.charge_point_setpoint_at(&profiles, now, unit.clone());
        let connector = if self.connectors.is_chargeable(connector_id) {
            self.connector_setpoint_at(&profiles, connector_id, now, tx, unit)
        } else {
            None
        };
        (charge_point, connector)
    }

    /// Highest-stack-level active ChargePointMaxProfile on connector 0.
    fn charge_point_setpoint_at(
        &self,
        profiles: &[Installed],
        t: DateTime<Utc>,
        unit: ChargingRateUnitType,
    ) -> Option<Setpoint> {
        profiles
            .iter()
            .filter(|installed| {
                installed.connector_id == 0
                    && installed.profile.charging_profile_purpose
                        == ChargingProfilePurposeType::ChargePointMaxProfile
                    && schedule::is_valid_at(&installed.profile, t)
            })
            .filter_map(|installed| {
                schedule::active_period(&installed.profile, t, None)
                    .map(|period| (installed.profile.stack_level, &installed.profile, period))
            })
            .max_by_key(|(stack_level, _, _)| *stack_level)
            .map(|(_, profile, period)| {
                schedule::setpoint_from_period(profile, &period, unit, self.nominal_voltage)
            })
    }

    /// Highest-stack-level active profile among TxProfile (transaction
    /// running), the connector's TxDefaultProfile and the connector-0
    /// TxDefault fallback. TxProfile wins ties.
    fn connector_setpoint_at(
        &self,
        profiles: &[Installed],
        connector_id: u32,
        t: DateTime<Utc>,
        tx: TxContext,
        unit: ChargingRateUnitType,
    ) -> Option<Setpoint> {
        profiles
            .iter()
            .filter_map(|installed| {
                let profile = &installed.profile;
                let is_tx_profile = profile.charging_profile_purpose
                    == ChargingProfilePurposeType::TxProfile;
                let candidate = match profile.charging_profile_purpose {
                    ChargingProfilePurposeType::TxProfile => {
                        installed.connector_id == connector_id
                            && tx.active
                            && match (profile.transaction_id, tx.transaction_id) {
                                (Some(bound), Some(current)) => bound == current,
                                _ => true,
                            }
                    }
                    ChargingProfilePurposeType::TxDefaultProfile => {
                        installed.connector_id == connector_id || installed.connector_id == 0
                    }
                    ChargingProfilePurposeType::ChargePointMaxProfile => false,
                };
                if !candidate || !schedule::is_valid_at(profile, t) {
                    return None;
                }
                schedule::active_period(profile, t, tx.transaction_start)
                    .map(|period| (profile.stack_level, is_tx_profile, profile, period))
            })
            .max_by_key(|(stack_level, is_tx_profile, _, _)| (*stack_level, *is_tx_profile))
            .map(|(_, _, profile, period)| {
                schedule::setpoint_from_period(profile, &period, unit, self.nominal_voltage)
            })
    }

    /// Effective limit for a connector at `t`: the connector setpoint capped
    /// by the charge point setpoint (connector 0 reports the cap itself).
    fn effective_limit_at(
        &self,
        profiles: &[Installed],
        connector_id: u32,
        t: DateTime<Utc>,
        tx: TxContext,
        unit: ChargingRateUnitType,
    ) -> Option<Setpoint> {
        let charge_point = self.charge_point_setpoint_at(profiles, t, unit.clone());
        if connector_id == 0 {
            return charge_point;
        }
        let connector = self.connector_setpoint_at(profiles, connector_id, t, tx, unit);
        match (charge_point, connector) {
            (Some(cp), Some(conn)) => {
                if cp.value < conn.value {
                    Some(cp)
                } else {
                    Some(conn)
                }
            }
            (cp, None) => cp,
            (None, conn) => conn,
        }
    }

    /// Coalesced schedule over `[now, now+duration)`, stepping at every
    /// boundary where a contributing profile's active period can change.
    async fn composite_schedule(
        &self,
        connector_id: u32,
        now: DateTime<Utc>,
        duration_secs: i64,
        unit: ChargingRateUnitType,
    ) -> Vec<ChargingSchedulePeriod> {
        let tx = self.tx_context(connector_id).await;
        let profiles = self.profiles.lock().await;

        let mut boundaries: BTreeSet<i64> = BTreeSet::new();
        boundaries.insert(0);
        for installed in profiles.iter() {
            collect_boundaries(
                &installed.profile,
                now,
                duration_secs,
                tx.transaction_start,
                &mut boundaries,
            );
        }

        let mut periods: Vec<ChargingSchedulePeriod> = Vec::new();
        for offset in boundaries {
            let t = now + Duration::seconds(offset);
            let setpoint =
                self.effective_limit_at(&profiles, connector_id, t, tx, unit.clone());
            let Some(setpoint) = setpoint else { continue };

            let same_as_last = periods.last().map(|last| {
                last.limit == Decimal::from_f32_retain(setpoint.value).unwrap_or_default()
                    && last.number_phases == Some(setpoint.number_phases as i32)
            });
            if same_as_last == Some(true) {
                continue;
            }
            periods.push(ChargingSchedulePeriod {
                start_period: offset as i32,
                limit: Decimal::from_f32_retain(setpoint.value).unwrap_or_default(),
                number_phases: Some(setpoint.number_phases as i32),
            });
        }
        periods
    }
}

/// Offsets (seconds from `now`) at which `profile`'s contribution can
/// change within the window.
fn collect_boundaries(
    profile: &ChargingProfile,
    now: DateTime<Utc>,
    duration_secs: i64,
    transaction_start: Option<DateTime<Utc>>,
    boundaries: &mut BTreeSet<i64>,
) {
    let mut add_instant = |instant: DateTime<Utc>| {
        let offset = (instant - now).num_seconds();
        if offset > 0 && offset < duration_secs {
            boundaries.insert(offset);
        }
    };

    if let Some(valid_from) = profile.valid_from {
        add_instant(valid_from);
    }
    if let Some(valid_to) = profile.valid_to {
        add_instant(valid_to);
    }

    let Some(start) = schedule::resolve_schedule_start(profile, now, transaction_start) else {
        // Not started yet: an Absolute/Recurring schedule may still begin
        // inside the window.
        if let Some(anchor) = profile.charging_schedule.start_schedule {
            if anchor > now {
                let mut add = |instant: DateTime<Utc>| {
                    let offset = (instant - now).num_seconds();
                    if offset > 0 && offset < duration_secs {
                        boundaries.insert(offset);
                    }
                };
                for period in &profile.charging_schedule.charging_schedule_period {
                    add(anchor + Duration::seconds(period.start_period as i64));
                }
                if let Some(schedule_duration) = profile.charging_schedule.duration {
                    add(anchor + Duration::seconds(schedule_duration as i64));
                }
            }
        }
        return;
    };

    let recurrence_secs = match profile.charging_profile_kind {
        ChargingProfileKindType::Recurring => Some(match profile.recurrency_kind {
            Some(RecurrencyKindType::Weekly) => 7 * 86_400,
            _ => 86_400,
        }),
        _ => None,
    };

    let mut cycle_start = start;
    loop {
        for period in &profile.charging_schedule.charging_schedule_period {
            add_instant(cycle_start + Duration::seconds(period.start_period as i64));
        }
        if let Some(schedule_duration) = profile.charging_schedule.duration {
            add_instant(cycle_start + Duration::seconds(schedule_duration as i64));
        }

        match recurrence_secs {
            Some(secs) => {
                cycle_start = cycle_start + Duration::seconds(secs);
                if (cycle_start - now).num_seconds() >= duration_secs {
                    break;
                }
            }
            None => break,
        }
    }
}

// ── Persistence conversion ─────────────────────────────────────

fn purpose_to_str(purpose: &ChargingProfilePurposeType) -> &'static str {
    match purpose {
        ChargingProfilePurposeType::ChargePointMaxProfile => "ChargePointMaxProfile",
        ChargingProfilePurposeType::TxDefaultProfile => "TxDefaultProfile",
        ChargingProfilePurposeType::TxProfile => "TxProfile",
    }
}

fn purpose_from_str(purpose: &str) -> Option<ChargingProfilePurposeType> {
    match purpose {
        "ChargePointMaxProfile" => Some(ChargingProfilePurposeType::ChargePointMaxProfile),
        "TxDefaultProfile" => Some(ChargingProfilePurposeType::TxDefaultProfile),
        "TxProfile" => Some(ChargingProfilePurposeType::TxProfile),
        _ => None,
    }
}

fn kind_to_str(kind: &ChargingProfileKindType) -> &'static str {
    match kind {
        ChargingProfileKindType::Absolute => "Absolute",
        ChargingProfileKindType::Recurring => "Recurring",
        ChargingProfileKindType::Relative => "Relative",
    }
}

fn kind_from_str(kind: &str) -> Option<ChargingProfileKindType> {
    match kind {
        "Absolute" => Some(ChargingProfileKindType::Absolute),
        "Recurring" => Some(ChargingProfileKindType::Recurring),
        "Relative" => Some(ChargingProfileKindType::Relative),
        _ => None,
    }
}

fn recurrency_to_str(kind: &RecurrencyKindType) -> &'static str {
    match kind {
        RecurrencyKindType::Daily => "Daily",
        RecurrencyKindType::Weekly => "Weekly",
    }
}

fn recurrency_from_str(kind: &str) -> Option<RecurrencyKindType> {
    match kind {
        "Daily" => Some(RecurrencyKindType::Daily),
        "Weekly" => Some(RecurrencyKindType::Weekly),
        _ => None,
    }
}

fn profile_to_record(
    connector_id: u32,
    profile: &ChargingProfile,
) -> Result<ProfileRecord, serde_json::Error> {
    Ok(ProfileRecord {
        profile_id: profile.charging_profile_id,
        connector_id: connector_id as i32,
        stack_level: profile.stack_level as i32,
        purpose: purpose_to_str(&profile.charging_profile_purpose).to_string(),
        kind: kind_to_str(&profile.charging_profile_kind).to_string(),
        recurrency_kind: profile.recurrency_kind.as_ref().map(|k| recurrency_to_str(k).to_string()),
        valid_from: profile.valid_from,
        valid_to: profile.valid_to,
        transaction_id: profile.transaction_id,
        schedule_json: serde_json::to_string(&profile.charging_schedule)?,
    })
}

fn record_to_profile(
    row: &crate::infrastructure::database::entities::charging_profile::Model,
) -> Result<(u32, ChargingProfile), serde_json::Error> {
    let charging_schedule: ChargingSchedule = serde_json::from_str(&row.schedule_json)?;
    let profile = ChargingProfile {
        charging_profile_id: row.profile_id,
        transaction_id: row.transaction_id,
        stack_level: row.stack_level.max(0) as u32,
        charging_profile_purpose: purpose_from_str(&row.purpose)
            .unwrap_or(ChargingProfilePurposeType::TxDefaultProfile),
        charging_profile_kind: kind_from_str(&row.kind)
            .unwrap_or(ChargingProfileKindType::Absolute),
        recurrency_kind: row
            .recurrency_kind
            .as_deref()
            .and_then(recurrency_from_str),
        valid_from: row.valid_from,
        valid_to: row.valid_to,
        charging_schedule,
    };
    Ok((row.connector_id.max(0) as u32, profile))
}
