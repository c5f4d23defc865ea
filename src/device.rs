//! Ventilation unit facade
//!
//! Binds a [`RegisterClient`] to a device model and unit variant and exposes
//! the operations a host polling coordinator needs: probe, poll, write and
//! close.

use tracing::{debug, info};

use crate::client::RegisterClient;
use crate::codec;
use crate::config::{ConfigError, UnitConfig};
use crate::derived;
use crate::error::{ModbusError, ModbusResult};
use crate::profile::GatewayProfile;
use crate::protocol::SlaveId;
use crate::register_map::{DeviceModel, RegisterMap};
use crate::transport::{ModbusTransport, TcpTransport};
use crate::value::DecodedValueMap;

/// One configured ventilation unit.
pub struct VentilationUnit<T: ModbusTransport = TcpTransport> {
    client: RegisterClient<T>,
    map: RegisterMap,
    nominal_max_flow: Option<u16>,
}

impl VentilationUnit<TcpTransport> {
    /// Unit behind a Modbus TCP gateway. Connects on first use.
    pub fn connect_tcp(
        host: impl Into<String>,
        port: u16,
        unit: SlaveId,
        profile: GatewayProfile,
        model: DeviceModel,
        nominal_max_flow: Option<u16>,
    ) -> Self {
        Self::new(
            RegisterClient::tcp(host, port, unit, profile),
            model,
            nominal_max_flow,
        )
    }

    pub fn from_config(config: &UnitConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::connect_tcp(
            config.host.clone(),
            config.port,
            config.unit_id,
            config.profile(),
            config.model,
            config.nominal_max_flow(),
        ))
    }
}

impl<T: ModbusTransport + 'static> VentilationUnit<T> {
    pub fn new(client: RegisterClient<T>, model: DeviceModel, nominal_max_flow: Option<u16>) -> Self {
        Self {
            client,
            map: model.register_map(),
            nominal_max_flow,
        }
    }

    pub fn model(&self) -> DeviceModel {
        self.map.model
    }

    pub fn client(&self) -> &RegisterClient<T> {
        &self.client
    }

    /// Check that the unit answers by reading the model's first register.
    pub async fn probe(&self) -> ModbusResult<()> {
        let first = self.map.first().ok_or_else(|| {
            ModbusError::configuration(format!("{} has no registers", self.map.model))
        })?;

        match self
            .client
            .read_register_map(std::slice::from_ref(first))
            .await
        {
            Ok(values) if values.contains_key(first.key) => {
                info!("{} answered probe", self.map.model.display_name());
                Ok(())
            }
            Ok(_) => Err(ModbusError::connection(format!(
                "cannot connect: no answer for {} @{}",
                first.key, first.address
            ))),
            Err(e) => Err(ModbusError::connection(format!("cannot connect: {}", e))),
        }
    }

    /// Read the full register map and add the derived keys.
    pub async fn poll(&self) -> ModbusResult<DecodedValueMap> {
        let mut values = self.client.read_register_map(self.map.definitions()).await?;
        let derived = derived::compute(self.map.model, &values, self.nominal_max_flow);
        debug!(
            "Polled {} registers, {} derived values",
            values.len(),
            derived.len()
        );
        values.extend(derived);
        Ok(values)
    }

    pub async fn write_register(&self, address: u16, value: u16) -> ModbusResult<()> {
        self.client.write_register(address, value).await
    }

    /// Write a setpoint in °C; see [`codec::temperature_to_raw`].
    pub async fn write_temperature(&self, address: u16, celsius: f64) -> ModbusResult<()> {
        debug!(
            "Writing {} °C ({}) to {}",
            celsius,
            codec::temperature_to_raw(celsius),
            address
        );
        self.client.write_temperature(address, celsius).await
    }

    pub async fn close(&self) {
        self.client.close().await;
    }
}
