//! Charging schedule evaluation.
//!
//! Pure functions: given a profile and an instant, decide whether the
//! profile is active and which schedule period applies. No clock reads, no
//! side effects. Callers pass `now` in, which keeps the setpoint
//! computation idempotent and testable.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_ocpp::v1_6::types::{
    ChargingProfile, ChargingProfileKindType, ChargingRateUnitType, ChargingSchedulePeriod,
    RecurrencyKindType,
};

/// A numeric charging limit in effect at some instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Setpoint {
    pub value: f32,
    pub unit: ChargingRateUnitType,
    pub number_phases: u32,
}

/// Whether `t` falls inside the profile's validity window. Absent bounds
/// are treated as ±∞.
pub fn is_valid_at(profile: &ChargingProfile, t: DateTime<Utc>) -> bool {
    if let Some(valid_from) = profile.valid_from {
        if t < valid_from {
            return false;
        }
    }
    if let Some(valid_to) = profile.valid_to {
        if t >= valid_to {
            return false;
        }
    }
    true
}

/// Resolve the instant the profile's schedule starts for evaluation at `t`.
///
/// - `Absolute`: `startSchedule` as given (required; missing ⇒ inactive).
/// - `Recurring`: the latest daily/weekly recurrence of `startSchedule`
///   that is not after `t`.
/// - `Relative`: the start of the running transaction, or `t` when none.
pub fn resolve_schedule_start(
    profile: &ChargingProfile,
    t: DateTime<Utc>,
    transaction_start: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match profile.charging_profile_kind {
        ChargingProfileKindType::Absolute => profile.charging_schedule.start_schedule,
        ChargingProfileKindType::Recurring => {
            let anchor = profile.charging_schedule.start_schedule?;
            if t < anchor {
                return None;
            }
            let period_secs = match profile.recurrency_kind {
                Some(RecurrencyKindType::Weekly) => 7 * 86_400,
                // Daily when unspecified; a recurring profile without a
                // recurrency kind is daily in practice.
                _ => 86_400,
            };
            let elapsed = (t - anchor).num_seconds();
            let k = elapsed / period_secs;
            Some(anchor + Duration::seconds(k * period_secs))
        }
        ChargingProfileKindType::Relative => Some(transaction_start.unwrap_or(t)),
    }
}

/// The period of `profile` covering `t`, if any: the last period whose
/// `startPeriod` offset has been reached, within the schedule duration.
pub fn active_period(
    profile: &ChargingProfile,
    t: DateTime<Utc>,
    transaction_start: Option<DateTime<Utc>>,
) -> Option<ChargingSchedulePeriod> {
    let schedule_start = resolve_schedule_start(profile, t, transaction_start)?;
    let offset = (t - schedule_start).num_seconds();
    if offset < 0 {
        return None;
    }
    if let Some(duration) = profile.charging_schedule.duration {
        if offset >= duration as i64 {
            return None;
        }
    }

    profile
        .charging_schedule
        .charging_schedule_period
        .iter()
        .filter(|period| (period.start_period as i64) <= offset)
        .max_by_key(|period| period.start_period)
        .cloned()
}

/// Convert a charging rate between W and A.
///
/// `P = √3 × U × I × phases / 3` with nominal phase voltage `U`.
pub fn convert_rate(
    value: f32,
    from: ChargingRateUnitType,
    to: ChargingRateUnitType,
    number_phases: u32,
    nominal_voltage: f64,
) -> f32 {
    if from == to {
        return value;
    }
    let phases = number_phases.max(1) as f64;
    let factor = 3f64.sqrt() * nominal_voltage * phases / 3.0;
    match to {
        ChargingRateUnitType::W => (value as f64 * factor) as f32,
        ChargingRateUnitType::A => (value as f64 / factor) as f32,
    }
}

/// Build the setpoint a profile period imposes, in the requested unit.
pub fn setpoint_from_period(
    profile: &ChargingProfile,
    period: &ChargingSchedulePeriod,
    unit: ChargingRateUnitType,
    nominal_voltage: f64,
) -> Setpoint {
    let number_phases = period.number_phases.unwrap_or(1).max(1) as u32;
    let value = convert_rate(
        period.limit.to_f32().unwrap_or_default(),
        profile.charging_schedule.charging_rate_unit.clone(),
        unit.clone(),
        number_phases,
        nominal_voltage,
    );
    Setpoint {
        value,
        unit,
        number_phases,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_ocpp::v1_6::types::{ChargingProfilePurposeType, ChargingSchedule};

    fn period(start: i32, limit: f32) -> ChargingSchedulePeriod {
        ChargingSchedulePeriod {
            start_period: start,
            limit: Decimal::from_f32_retain(limit).unwrap_or_default(),
            number_phases: None,
        }
    }

    fn profile(
        kind: ChargingProfileKindType,
        start_schedule: Option<DateTime<Utc>>,
        periods: Vec<ChargingSchedulePeriod>,
    ) -> ChargingProfile {
        ChargingProfile {
            charging_profile_id: 1,
            transaction_id: None,
            stack_level: 0,
            charging_profile_purpose: ChargingProfilePurposeType::TxDefaultProfile,
            charging_profile_kind: kind,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            charging_schedule: ChargingSchedule {
                duration: None,
                start_schedule,
                charging_rate_unit: ChargingRateUnitType::A,
                charging_schedule_period: periods,
                min_charging_rate: None,
            },
        }
    }

    #[test]
    fn validity_window() {
        let now = Utc::now();
        let mut p = profile(ChargingProfileKindType::Absolute, Some(now), vec![]);
        assert!(is_valid_at(&p, now));

        p.valid_from = Some(now + Duration::hours(1));
        assert!(!is_valid_at(&p, now));

        p.valid_from = Some(now - Duration::hours(1));
        p.valid_to = Some(now - Duration::minutes(1));
        assert!(!is_valid_at(&p, now));
    }

    #[test]
    fn absolute_without_start_schedule_is_inactive() {
        let now = Utc::now();
        let p = profile(ChargingProfileKindType::Absolute, None, vec![period(0, 16.0)]);
        assert!(active_period(&p, now, None).is_none());
    }

    #[test]
    fn absolute_picks_last_started_period() {
        let now = Utc::now();
        let start = now - Duration::seconds(4000);
        let p = profile(
            ChargingProfileKindType::Absolute,
            Some(start),
            vec![period(0, 32.0), period(3600, 16.0), period(7200, 8.0)],
        );
        // 4000s in: second period is active.
        let active = active_period(&p, now, None).unwrap();
        assert_eq!(active.limit.to_f32().unwrap(), 16.0);
    }

    #[test]
    fn future_schedule_is_inactive() {
        let now = Utc::now();
        let p = profile(
            ChargingProfileKindType::Absolute,
            Some(now + Duration::hours(1)),
            vec![period(0, 32.0)],
        );
        assert!(active_period(&p, now, None).is_none());
    }

    #[test]
    fn duration_bounds_the_schedule() {
        let now = Utc::now();
        let mut p = profile(
            ChargingProfileKindType::Absolute,
            Some(now - Duration::seconds(100)),
            vec![period(0, 32.0)],
        );
        p.charging_schedule.duration = Some(60);
        assert!(active_period(&p, now, None).is_none());

        p.charging_schedule.duration = Some(7200);
        assert!(active_period(&p, now, None).is_some());
    }

    #[test]
    fn recurring_daily_wraps_to_today() {
        let now = Utc::now();
        // Anchored 10 days ago, 300 seconds before "now" in the day cycle.
        let anchor = now - Duration::days(10) - Duration::seconds(300);
        let mut p = profile(
            ChargingProfileKindType::Recurring,
            Some(anchor),
            vec![period(0, 20.0), period(600, 10.0)],
        );
        p.recurrency_kind = Some(RecurrencyKindType::Daily);

        let start = resolve_schedule_start(&p, now, None).unwrap();
        assert_eq!((now - start).num_seconds(), 300);
        let active = active_period(&p, now, None).unwrap();
        assert_eq!(active.limit.to_f32().unwrap(), 20.0);
    }

    #[test]
    fn recurring_weekly_period_length() {
        let now = Utc::now();
        let anchor = now - Duration::days(8);
        let mut p = profile(
            ChargingProfileKindType::Recurring,
            Some(anchor),
            vec![period(0, 20.0)],
        );
        p.recurrency_kind = Some(RecurrencyKindType::Weekly);

        let start = resolve_schedule_start(&p, now, None).unwrap();
        assert_eq!((now - start).num_days(), 1);
    }

    #[test]
    fn relative_uses_transaction_start() {
        let now = Utc::now();
        let tx_start = now - Duration::seconds(500);
        let p = profile(
            ChargingProfileKindType::Relative,
            None,
            vec![period(0, 32.0), period(400, 6.0)],
        );

        let active = active_period(&p, now, Some(tx_start)).unwrap();
        assert_eq!(active.limit.to_f32().unwrap(), 6.0);

        // No transaction: schedule starts "now", first period applies.
        let active = active_period(&p, now, None).unwrap();
        assert_eq!(active.limit.to_f32().unwrap(), 32.0);
    }

    #[test]
    fn rate_conversion_roundtrip() {
        let watts = convert_rate(16.0, ChargingRateUnitType::A, ChargingRateUnitType::W, 3, 230.0);
        // √3 × 230 × 16 ≈ 6373 W on three phases.
        assert!((watts - 6373.0).abs() < 5.0);

        let amps = convert_rate(watts, ChargingRateUnitType::W, ChargingRateUnitType::A, 3, 230.0);
        assert!((amps - 16.0).abs() < 0.01);

        // Same unit: untouched.
        assert_eq!(
            convert_rate(16.0, ChargingRateUnitType::A, ChargingRateUnitType::A, 3, 230.0),
            16.0
        );
    }

    #[test]
    fn setpoint_defaults_to_one_phase() {
        let now = Utc::now();
        let p = profile(
            ChargingProfileKindType::Absolute,
            Some(now),
            vec![period(0, 16.0)],
        );
        let sp = setpoint_from_period(
            &p,
            &p.charging_schedule.charging_schedule_period[0],
            ChargingRateUnitType::A,
            230.0,
        );
        assert_eq!(sp.number_phases, 1);
        assert_eq!(sp.value, 16.0);
    }
}
