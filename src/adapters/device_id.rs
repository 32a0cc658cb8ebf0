//! Module identity derived from the ESP32 factory MAC address.
//!
//! `W4RP-XXYYZZ` (last 3 bytes of the 6-byte MAC in uppercase hex) unless
//! the configuration carries an override. The id doubles as the BLE
//! advertising name when no name override is set.

use core::fmt::Write;

use crate::config::ModuleConfig;

pub type ModuleId = heapless::String<24>;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// `W4RP-XXYYZZ` from the last 3 MAC bytes.
pub fn module_id(mac: &MacAddress) -> ModuleId {
    let mut id = ModuleId::new();
    let _ = write!(id, "W4RP-{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]);
    id
}

/// Configured override, else the MAC-derived id.
pub fn resolve(config: &ModuleConfig, mac: &MacAddress) -> ModuleId {
    match &config.module_id_override {
        Some(id) if !id.is_empty() => crate::rules::model::ident(id),
        _ => module_id(mac),
    }
}
