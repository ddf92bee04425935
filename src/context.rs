use crate::{NovaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;

/// Storage backend connection details for one attached volume. `data` is
/// opaque to this crate and handed straight to the destination provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub driver_volume_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ConnectionInfo {
    pub fn volume_id(&self) -> Option<&str> {
        self.data.get("volume_id").and_then(|id| id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub dev: String,
    pub bus: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub boot_index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDeviceMapping {
    pub serial: String,
    #[serde(default)]
    pub connection_info: Option<ConnectionInfo>,
    pub dev: String,
    #[serde(default = "default_bus")]
    pub bus: String,
    #[serde(default = "default_device_type")]
    pub device_type: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub boot_index: Option<u32>,
}

fn default_bus() -> String {
    "virtio".to_string()
}

fn default_device_type() -> String {
    "disk".to_string()
}

impl BlockDeviceMapping {
    pub fn new(serial: impl Into<String>, dev: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            connection_info: None,
            dev: dev.into(),
            bus: default_bus(),
            device_type: default_device_type(),
            format: None,
            boot_index: None,
        }
    }

    pub fn with_connection_info(mut self, connection_info: ConnectionInfo) -> Self {
        self.connection_info = Some(connection_info);
        self
    }

    pub fn as_disk_info(&self) -> DiskInfo {
        DiskInfo {
            dev: self.dev.clone(),
            bus: self.bus.clone(),
            device_type: self.device_type.clone(),
            format: self.format.clone(),
            boot_index: self.boot_index,
        }
    }
}

/// Listen addresses for the two graphics types that carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsListenAddrs {
    pub vnc: Option<IpAddr>,
    pub spice: Option<IpAddr>,
}

impl GraphicsListenAddrs {
    pub fn for_type(&self, graphics_type: &str) -> Option<IpAddr> {
        match graphics_type {
            "vnc" => self.vnc,
            "spice" => self.spice,
            _ => None,
        }
    }
}

/// What the destination host told us about itself before migration starts.
/// Every address is optional; an unset address leaves matching devices alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationContext {
    #[serde(default)]
    pub graphics_listen_addr_vnc: Option<IpAddr>,
    #[serde(default)]
    pub graphics_listen_addr_spice: Option<IpAddr>,
    #[serde(default)]
    pub serial_listen_addr: Option<String>,
    #[serde(default, rename = "block_device")]
    block_devices: Vec<BlockDeviceMapping>,
}

impl MigrationContext {
    pub fn new(block_devices: Vec<BlockDeviceMapping>) -> Result<Self> {
        let context = Self {
            block_devices,
            ..Default::default()
        };
        context.validate()?;
        Ok(context)
    }

    pub fn with_vnc_listen(mut self, addr: IpAddr) -> Self {
        self.graphics_listen_addr_vnc = Some(addr);
        self
    }

    pub fn with_spice_listen(mut self, addr: IpAddr) -> Self {
        self.graphics_listen_addr_spice = Some(addr);
        self
    }

    pub fn with_serial_listen(mut self, addr: impl Into<String>) -> Self {
        self.serial_listen_addr = Some(addr.into());
        self
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let context: MigrationContext = toml::from_str(contents)?;
        context.validate()?;
        Ok(context)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let context: MigrationContext = serde_json::from_str(contents)?;
        context.validate()?;
        Ok(context)
    }

    /// Serials key the volume lookup, so each may appear only once.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for bdm in &self.block_devices {
            if !seen.insert(bdm.serial.as_str()) {
                return Err(NovaError::DuplicateSerial(bdm.serial.clone()));
            }
        }
        Ok(())
    }

    pub fn block_device(&self, serial: &str) -> Option<&BlockDeviceMapping> {
        self.block_devices.iter().find(|bdm| bdm.serial == serial)
    }

    /// `None` when neither graphics address was provided.
    pub fn graphics_listen_addrs(&self) -> Option<GraphicsListenAddrs> {
        if self.graphics_listen_addr_vnc.is_none() && self.graphics_listen_addr_spice.is_none() {
            return None;
        }
        Some(GraphicsListenAddrs {
            vnc: self.graphics_listen_addr_vnc,
            spice: self.graphics_listen_addr_spice,
        })
    }

    pub fn serial_listen_addr(&self) -> Option<&str> {
        self.serial_listen_addr.as_deref()
    }
}
