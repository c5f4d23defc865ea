//! Declarative register maps.
//!
//! A [`RegisterMap`] is a static, ordered list of [`RegisterDefinition`]s for
//! one device model. Definitions are built in `const` context, see
//! [`crate::models`] for the concrete tables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModbusError;

/// Register class, selecting the read function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterClass {
    Holding,
    Input,
}

impl fmt::Display for RegisterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Holding => write!(f, "holding"),
            Self::Input => write!(f, "input"),
        }
    }
}

/// Raw encoding of a value in the register space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Int16,
    Uint16,
    /// Two registers, low word at the lower address.
    Uint32,
}

impl Encoding {
    #[inline]
    pub const fn register_count(self) -> u16 {
        match self {
            Self::Int16 | Self::Uint16 => 1,
            Self::Uint32 => 2,
        }
    }
}

/// One readable/writable cell of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterDefinition {
    /// Unique key within a map; becomes the key in the decoded map.
    pub key: &'static str,
    /// Client offset (documentation address minus one).
    pub address: u16,
    pub class: RegisterClass,
    pub encoding: Encoding,
    pub scale: f64,
    pub offset: f64,
    /// Decimal places to round the scaled value to.
    pub precision: Option<u8>,
    pub unit: Option<&'static str>,
    pub device_class: Option<&'static str>,
}

impl RegisterDefinition {
    /// An unscaled int16 definition.
    pub const fn new(key: &'static str, address: u16, class: RegisterClass) -> Self {
        Self {
            key,
            address,
            class,
            encoding: Encoding::Int16,
            scale: 1.0,
            offset: 0.0,
            precision: None,
            unit: None,
            device_class: None,
        }
    }

    pub const fn holding(key: &'static str, address: u16) -> Self {
        Self::new(key, address, RegisterClass::Holding)
    }

    pub const fn input(key: &'static str, address: u16) -> Self {
        Self::new(key, address, RegisterClass::Input)
    }

    pub const fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub const fn scaled(mut self, scale: f64, precision: u8) -> Self {
        self.scale = scale;
        self.precision = Some(precision);
        self
    }

    pub const fn offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    pub const fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn device_class(mut self, device_class: &'static str) -> Self {
        self.device_class = Some(device_class);
        self
    }

    /// 0.1 °C signed temperature.
    pub const fn temperature(self) -> Self {
        self.encoding(Encoding::Int16)
            .scaled(0.1, 1)
            .unit("°C")
            .device_class("temperature")
    }

    #[inline]
    pub const fn register_count(&self) -> u16 {
        self.encoding.register_count()
    }

    /// First address after this definition.
    #[inline]
    pub fn end_exclusive(&self) -> u32 {
        u32::from(self.address) + u32::from(self.register_count())
    }
}

/// Supported device models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceModel {
    /// Systemair SAVE (SAVE Touch / SAVE Connect)
    #[default]
    Save,
    /// Systemair CD4 / D24810 legacy panel
    LegacyCd4,
}

impl DeviceModel {
    pub const fn id(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::LegacyCd4 => "legacy_cd4",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Save => "Systemair SAVE",
            Self::LegacyCd4 => "Systemair CD4 (legacy)",
        }
    }

    pub fn register_map(self) -> RegisterMap {
        match self {
            Self::Save => crate::models::SAVE,
            Self::LegacyCd4 => crate::models::LEGACY_CD4,
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for DeviceModel {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "save" => Ok(Self::Save),
            "legacy_cd4" => Ok(Self::LegacyCd4),
            other => Err(ModbusError::configuration(format!(
                "Unknown device model '{}'",
                other
            ))),
        }
    }
}

/// Named, ordered register set of one model.
#[derive(Debug, Clone, Copy)]
pub struct RegisterMap {
    pub model: DeviceModel,
    definitions: &'static [RegisterDefinition],
}

impl RegisterMap {
    pub const fn new(model: DeviceModel, definitions: &'static [RegisterDefinition]) -> Self {
        Self { model, definitions }
    }

    /// Definition used as the connectivity probe.
    pub fn first(&self) -> Option<&'static RegisterDefinition> {
        self.definitions.first()
    }

    pub fn definitions(&self) -> &'static [RegisterDefinition] {
        self.definitions
    }

    pub fn get(&self, key: &str) -> Option<&'static RegisterDefinition> {
        self.definitions.iter().find(|d| d.key == key)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
