//! # Derived Values
//!
//! Higher-level status computed from a decoded register map. Everything here
//! is a pure function of the map: missing or malformed inputs fall back to
//! neutral defaults and never fail.
//!
//! Text values are language-neutral keys (`"replace_filter"`, `"manual_low"`)
//! except the legacy `next_filter_change` sentence.

use crate::codec::round_to;
use crate::models::flow_factor;
use crate::register_map::DeviceModel;
use crate::value::{DecodedValueMap, Value};

const SECONDS_PER_DAY: i64 = 86_400;
const DAYS_PER_MONTH: i64 = 30;
/// Above this the remaining filter time is reported as "more than 18 months".
const MAX_BUCKET_DAYS: i64 = 548;
/// At or above this the remaining filter time is reported in months.
const MONTHS_FROM_DAYS: i64 = 31;
/// Best-case heat exchanger efficiency.
const MAX_RECOVERY_EFFICIENCY: f64 = 0.82;

const UNKNOWN: &str = "unknown";

/// Compute the derived keys for `model` from the decoded `values`.
///
/// `nominal_max_flow` is the unit variant's nominal air flow in m³/h and
/// only affects the SAVE flow-rate estimates.
///
/// ```rust
/// use systemair_modbus::{derived, DecodedValueMap, DeviceModel, Value};
///
/// let mut values = DecodedValueMap::new();
/// values.insert("time_to_filter_replacement", Value::Int(2_000_000));
///
/// let out = derived::compute(DeviceModel::Save, &values, None);
/// assert_eq!(out["filter_time_remaining_days"], Value::Int(23));
/// assert_eq!(out["next_filter_change_status"], Value::from("ok"));
/// ```
pub fn compute(
    model: DeviceModel,
    values: &DecodedValueMap,
    nominal_max_flow: Option<u16>,
) -> DecodedValueMap {
    let mut out = match model {
        DeviceModel::Save => save(values, flow_factor(nominal_max_flow)),
        DeviceModel::LegacyCd4 => legacy_cd4(values),
    };
    if let Some(temp) = calculated_exhaust_temperature(values) {
        out.insert("calculated_exhaust_temperature", Value::Float(temp));
    }
    out
}

/// Estimated exhaust air temperature from extract/outdoor temperature and
/// heat recovery activity (0..100 %), rounded to 0.1 °C.
pub fn calculated_exhaust_temperature(values: &DecodedValueMap) -> Option<f64> {
    let outdoor = values.get("outdoor_temperature")?.as_f64()?;
    let extract = values.get("extract_temperature")?.as_f64()?;
    let recovery = values.get("heat_recovery")?.as_f64()?;

    let eta = (MAX_RECOVERY_EFFICIENCY * recovery / 100.0).clamp(0.0, MAX_RECOVERY_EFFICIENCY);
    let exhaust = extract - eta * (extract - outdoor);
    exhaust.is_finite().then(|| round_to(exhaust, 1))
}

fn int_or(values: &DecodedValueMap, key: &str, default: i64) -> i64 {
    values
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or(default)
}

fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

// ============================================================================
// SAVE
// ============================================================================

fn save(values: &DecodedValueMap, flow_factor: f64) -> DecodedValueMap {
    let mut out = DecodedValueMap::new();

    save_filter(values, &mut out);

    let season = match int_or(values, "summer_winter_operation_1_0", -1) {
        0 => "summer",
        1 => "winter",
        _ => UNKNOWN,
    };
    out.insert("active_season", text(season));

    let iaq = match int_or(values, "iaq_level", -1) {
        0 => "economy",
        1 => "good",
        2 => "improve",
        _ => UNKNOWN,
    };
    out.insert("iaq_level_text", text(iaq));

    let regulation = match int_or(values, "supply_air_room_exhaust_reg", -1) {
        0 => "supply_air",
        1 => "room",
        2 => "exhaust",
        _ => UNKNOWN,
    };
    out.insert("regulation_mode_text", text(regulation));

    let mode = save_mode_status(
        int_or(values, "mode_status_register", -1),
        int_or(values, "manual_mode_command_register", -1),
    );
    out.insert("mode_status_text", text(mode));

    let flow = |key| (int_or(values, key, 0) as f64 * flow_factor).round_ties_even() as i64;
    out.insert("exhaust_air_flow_rate", Value::Int(flow("extractor_fan_pwr_fact")));
    out.insert("supply_air_flow_rate", Value::Int(flow("supply_air_fan_pwr_fact")));

    out
}

fn save_filter(values: &DecodedValueMap, out: &mut DecodedValueMap) {
    let seconds = int_or(values, "time_to_filter_replacement", 0);
    let alarm = int_or(values, "filter_alarm", 0) == 1;
    let warning = int_or(values, "filter_warning_alarm", 0) == 1;

    let (days, months) = if seconds > 0 {
        let days = seconds / SECONDS_PER_DAY;
        (days, days / DAYS_PER_MONTH)
    } else {
        (0, 0)
    };

    out.insert("filter_time_remaining_s", Value::Int(seconds));
    out.insert("filter_time_remaining_days", Value::Int(days));
    out.insert("filter_time_remaining_months", Value::Int(months));

    let status = if alarm {
        "replace_filter"
    } else if warning {
        "warning"
    } else if seconds <= 0 {
        UNKNOWN
    } else {
        "ok"
    };
    out.insert("next_filter_change_status", text(status));

    let bucket = if seconds <= 0 {
        UNKNOWN
    } else if days > MAX_BUCKET_DAYS {
        "more_than_18_months"
    } else if days >= MONTHS_FROM_DAYS {
        "months"
    } else {
        "days"
    };
    out.insert("next_filter_change_bucket", text(bucket));

    let legacy = if alarm {
        "Replace filter!".to_owned()
    } else if warning {
        "Filter warning".to_owned()
    } else if seconds <= 0 {
        "Unknown".to_owned()
    } else if days > MAX_BUCKET_DAYS {
        "More than 18 months".to_owned()
    } else if days >= MONTHS_FROM_DAYS {
        format!("{} months", months)
    } else {
        format!("{} days", days)
    };
    out.insert("next_filter_change", Value::Text(legacy));
}

fn save_mode_status(mode: i64, manual_speed: i64) -> &'static str {
    match mode {
        0 => "auto",
        1 => match manual_speed {
            0 => "manual_stop",
            2 => "manual_low",
            3 => "manual_normal",
            4 => "manual_high",
            _ => "manual_unknown",
        },
        2 => "party",
        3 => "boost",
        4 => "fireplace",
        5 => "away",
        6 => "holiday",
        7 => "cooker_hood",
        8 => "vacuum_cleaner",
        9 => "cdi1",
        10 => "cdi2",
        11 => "cdi3",
        12 => "pressure_guard",
        _ => UNKNOWN,
    }
}

// ============================================================================
// Legacy CD4
// ============================================================================

fn legacy_cd4(values: &DecodedValueMap) -> DecodedValueMap {
    let mut out = DecodedValueMap::new();

    let mode = match values.get("fan_speed_level").and_then(Value::as_i64) {
        Some(0) => "manual_stop",
        Some(1) => "manual_low",
        Some(2) => "manual_normal",
        Some(3) => "manual_high",
        _ => UNKNOWN,
    };
    out.insert("mode_status_text", text(mode));
    out.insert("active_season", text(UNKNOWN));
    out.insert("iaq_level_text", text(UNKNOWN));
    out.insert("regulation_mode_text", text(UNKNOWN));

    let months = values.get("filter_months").and_then(Value::as_i64);
    let days = values.get("filter_days").and_then(Value::as_i64);
    let next = match (months, days) {
        (Some(months), Some(days)) => {
            let remaining = (months * DAYS_PER_MONTH - days).max(0);
            if remaining >= MONTHS_FROM_DAYS {
                format!("{} months", remaining / DAYS_PER_MONTH)
            } else {
                format!("{} days", remaining)
            }
        }
        _ => "Unknown".to_owned(),
    };
    out.insert("next_filter_change", Value::Text(next));

    out
}
