//! Register tables for the supported Systemair models.
//!
//! All addresses are Modbus client offsets (documentation address - 1).

use crate::register_map::{DeviceModel, Encoding, RegisterDefinition, RegisterMap};

const fn holding_u16(key: &'static str, address: u16) -> RegisterDefinition {
    RegisterDefinition::holding(key, address).encoding(Encoding::Uint16)
}

const fn input_u16(key: &'static str, address: u16) -> RegisterDefinition {
    RegisterDefinition::input(key, address).encoding(Encoding::Uint16)
}

const fn input_u32(key: &'static str, address: u16) -> RegisterDefinition {
    RegisterDefinition::input(key, address).encoding(Encoding::Uint32)
}

/// Signed 0.1 °C holding register.
const fn holding_temp(key: &'static str, address: u16) -> RegisterDefinition {
    RegisterDefinition::holding(key, address).temperature()
}

/// Unsigned 0.1 °C holding register (setpoints).
const fn holding_temp_u16(key: &'static str, address: u16) -> RegisterDefinition {
    holding_temp(key, address).encoding(Encoding::Uint16)
}

const fn input_temp(key: &'static str, address: u16) -> RegisterDefinition {
    RegisterDefinition::input(key, address).temperature()
}

// ============================================================================
// SAVE
// ============================================================================

pub const ADDR_MODE_STATUS: u16 = 1160;
pub const ADDR_MODE_COMMAND: u16 = 1161;
pub const ADDR_MANUAL_SPEED_COMMAND: u16 = 1130;
pub const ADDR_SUPPLY_AIR_SETPOINT: u16 = 2000;
pub const ADDR_ECO_HEAT_OFFSET: u16 = 2503;
pub const ADDR_ECO_MODE: u16 = 2504;
pub const ADDR_FREE_COOLING_ENABLE: u16 = 4100;
pub const ADDR_FILTER_REPLACEMENT_PERIOD: u16 = 7000;

const SAVE_REGISTERS: &[RegisterDefinition] = &[
    // Modes and time settings
    input_u16("summer_winter_operation_1_0", 1038),
    holding_u16("holiday_mode_duration", 1100).unit("days"),
    holding_u16("away_mode_duration", 1101).unit("h"),
    holding_u16("fireplace_mode_duration", 1102).unit("min"),
    holding_u16("refresh_mode_duration", 1103).unit("min"),
    holding_u16("crowded_mode_duration", 1104).unit("h"),
    input_u32("countdown_mode_time", 1110).unit("s"),
    // System status
    input_u16("iaq_level", 1122),
    holding_u16("manual_mode_command_register", ADDR_MANUAL_SPEED_COMMAND),
    input_u16("mode_status_register", ADDR_MODE_STATUS),
    holding_u16("mode_command_register", ADDR_MODE_COMMAND),
    // Fan speeds per special mode
    input_u16("saf_speed_holiday", 1220).unit("rpm"),
    input_u16("eaf_speed_holiday", 1221).unit("rpm"),
    input_u16("saf_speed_cooker_hood", 1222).unit("rpm"),
    input_u16("eaf_speed_cooker_hood", 1223).unit("rpm"),
    input_u16("saf_speed_vacuumcleaner", 1224).unit("rpm"),
    input_u16("eaf_speed_vacuumcleaner", 1225).unit("rpm"),
    // Outdoor compensation
    holding_u16("fan_speed_comp_winter", 1251).unit("%"),
    holding_temp("fan_speed_comp_checked", 1252),
    holding_temp("fan_speed_comp_winter_max_temp", 1253),
    input_u16("fan_speed_comp_read", 1254).unit("%"),
    holding_temp("fan_speed_comp_winter_start_temp", 1255),
    holding_temp("fan_speed_comp_summer_start_temp", 1256),
    holding_temp("fan_speed_comp_max_temp", 1257),
    holding_u16("fan_speed_comp_summer", 1258).unit("%"),
    // Fan level status
    input_u16("saf_speed_low", 1302).unit("rpm"),
    input_u16("eaf_speed_low", 1303).unit("rpm"),
    holding_u16("fan_manual_stop_allowed_register", 1352),
    // Fan limits
    holding_u16("saf_speed_minimum_rpm", 1410).unit("rpm"),
    holding_u16("eaf_speed_minimum_rpm", 1411).unit("rpm"),
    holding_u16("saf_speed_low_rpm", 1412).unit("rpm"),
    holding_u16("eaf_speed_low_rpm", 1413).unit("rpm"),
    holding_u16("saf_speed_normal", 1414).unit("rpm"),
    holding_u16("eaf_speed_normal", 1415).unit("rpm"),
    holding_u16("saf_speed_high", 1416).unit("rpm"),
    holding_u16("eaf_speed_high", 1417).unit("rpm"),
    holding_u16("saf_speed_maximum", 1418).unit("rpm"),
    holding_u16("eaf_speed_maximum", 1419).unit("rpm"),
    // Temperature settings
    holding_temp_u16("supply_air_setpoint", ADDR_SUPPLY_AIR_SETPOINT),
    holding_temp_u16("exhaust_air_sp", 2012),
    holding_temp_u16("exhaust_air_min_sp", 2020),
    holding_temp_u16("exhaust_air_max_sp", 2021),
    holding_u16("supply_air_room_exhaust_reg", 2030),
    // Heating and humidity
    input_u16("triac_after_manual_override", 2148).unit("%"),
    holding_u16("moisture_extraction_sp", 2202)
        .unit("%")
        .device_class("humidity"),
    holding_u16("calculated_moisture_extraction", 2210)
        .unit("%")
        .device_class("humidity"),
    holding_u16("calculated_moisture_intake", 2211)
        .unit("%")
        .device_class("humidity"),
    // Eco
    holding_temp_u16("eco_heat_offset", ADDR_ECO_HEAT_OFFSET),
    holding_u16("eco_mode", ADDR_ECO_MODE),
    input_u16("eco_function_active", 2505),
    // Free cooling
    holding_u16("free_cooling_enable", ADDR_FREE_COOLING_ENABLE),
    holding_temp("free_cooling_daytime_min_temp", 4101),
    holding_temp("free_cooling_night_high_limit", 4102),
    holding_temp("free_cooling_night_low_limit", 4103),
    holding_temp("free_cooling_room_cancel_temp", 4104),
    holding_u16("free_cooling_start_time_h", 4105),
    holding_u16("free_cooling_start_time_m", 4106),
    holding_u16("free_cooling_end_time_h", 4107),
    holding_u16("free_cooling_end_time_m", 4108),
    input_u16("free_cooling_active", 4110),
    holding_u16("free_cooling_min_speed_saf", 4111),
    holding_u16("free_cooling_min_speed_eaf", 4112),
    // Filter
    holding_u16("filter_replacement_period", ADDR_FILTER_REPLACEMENT_PERIOD).unit("months"),
    input_u32("time_to_filter_replacement", 7004).unit("s"),
    input_u32("filter_replacement_time", 7001).unit("s"),
    // Sensors
    input_u16("digital_ui_1", 12020),
    input_temp("outdoor_temperature", 12101),
    input_temp("supply_temperature", 12102),
    input_temp("efficiency_temperature", 12106),
    input_temp("overheat_temperature", 12107),
    input_u16("relative_moisture_extraction", 12135)
        .unit("%")
        .device_class("humidity"),
    input_u16("saf_speed_rpm", 12400).unit("rpm"),
    input_u16("eaf_speed_rpm", 12401).unit("rpm"),
    input_temp("extract_temperature", 12543),
    // Outputs and alarms
    input_u16("supply_air_fan_pwr_fact", 14000).unit("%"),
    input_u16("extractor_fan_pwr_fact", 14001).unit("%"),
    input_u16("heat_recovery", 14102).unit("%"),
    input_u16("triac_control_signal", 14380),
    input_u16("filter_alarm", 15141),
    input_u16("supply_air_temp_low_alarm", 15176),
    input_u16("filter_warning_alarm", 15543),
    input_u16("filter_warning_alarm_delay_counter", 15548),
    input_u16("a_alarm", 15900),
    input_u16("b_alarm", 15901),
    input_u16("c_alarm", 15902),
];

/// Systemair SAVE register map.
pub const SAVE: RegisterMap = RegisterMap::new(DeviceModel::Save, SAVE_REGISTERS);

// ============================================================================
// Legacy CD4
// ============================================================================

pub const ADDR_FAN_SPEED_LEVEL: u16 = 100;

/// Deliberately small: older panels fault on reads of unknown registers.
const LEGACY_CD4_REGISTERS: &[RegisterDefinition] = &[
    holding_u16("fan_speed_level", ADDR_FAN_SPEED_LEVEL),
    holding_u16("system_type", 500),
    holding_u16("system_prog_v_high", 501),
    holding_u16("system_prog_v_mid", 502),
    holding_u16("system_prog_v_low", 503),
    holding_u16("filter_months", 600).unit("months"),
    holding_u16("filter_days", 601).unit("days"),
    holding_u16("sf_rpm", 110).unit("rpm"),
    holding_u16("ef_rpm", 111).unit("rpm"),
    holding_u16("manual_fan_stop_allowed", 113),
];

/// Systemair CD4 / D24810 register map.
pub const LEGACY_CD4: RegisterMap = RegisterMap::new(DeviceModel::LegacyCd4, LEGACY_CD4_REGISTERS);

// ============================================================================
// Unit variants
// ============================================================================

/// A named unit variant and its nominal maximum air flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitVariant {
    pub name: &'static str,
    /// m³/h at 50 Pa reference pressure.
    pub nominal_max_flow: Option<u16>,
}

const fn variant(name: &'static str, nominal_max_flow: Option<u16>) -> UnitVariant {
    UnitVariant {
        name,
        nominal_max_flow,
    }
}

pub const GENERIC_UNIT_VARIANT: &str = "Generic (legacy x3)";

pub const UNIT_VARIANTS: &[UnitVariant] = &[
    variant(GENERIC_UNIT_VARIANT, None),
    variant("VSR 150/B", Some(169)),
    variant("VSR 200/B", Some(284)),
    variant("VSR 300", Some(368)),
    variant("VSR 400", Some(615)),
    variant("VSR 500", Some(609)),
    variant("VSR 700", Some(870)),
    variant("VTR 100/B", Some(150)),
    variant("VTR 150/B", Some(268)),
    variant("VTR 250/B", Some(307)),
    variant("VTR 275/B", Some(316)),
    variant("VTR 300", Some(368)),
    variant("VTR 350/B", Some(504)),
    variant("VTR 500", Some(572)),
    variant("VTR 700", Some(951)),
];

/// Look up a unit variant by name, ignoring case and surrounding whitespace.
pub fn find_unit_variant(name: &str) -> Option<&'static UnitVariant> {
    let name = name.trim();
    UNIT_VARIANTS
        .iter()
        .find(|v| v.name.eq_ignore_ascii_case(name))
}

/// m³/h per fan percent. Without a nominal flow the legacy factor 3 applies.
pub fn flow_factor(nominal_max_flow: Option<u16>) -> f64 {
    match nominal_max_flow {
        Some(qv) if qv > 0 => f64::from(qv) / 100.0,
        _ => 3.0,
    }
}
