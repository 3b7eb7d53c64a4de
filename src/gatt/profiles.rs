// bleclient Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.

//! Readers for the well-known Generic Access (0x1800) and Device
//! Information (0x180A) services.

use std::fmt;

use log::debug;

use crate::api::{BleUuid, GattService};
use crate::constants::*;
use crate::octets::OctetView;

use super::GattClient;

/// Peripheral Preferred Connection Parameters (0x2A04): four u16 fields.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PreferredConnectionParameters {
    /// Minimum connection interval in 1.25 ms units.
    pub min_conn_interval: u16,
    /// Maximum connection interval in 1.25 ms units.
    pub max_conn_interval: u16,
    pub slave_latency: u16,
    /// Supervision timeout in 10 ms units.
    pub supervision_timeout: u16,
}

/// The Generic Access service contents.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GenericAccess {
    pub device_name: String,
    /// Raw appearance category value (0x2A01).
    pub appearance: u16,
    pub preferred_connection_parameters: PreferredConnectionParameters,
}

impl fmt::Display for GenericAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GenericAccess['{}', appearance 0x{:04x}, conn {}..{} x1.25ms, latency {}, timeout {}x10ms]",
            self.device_name,
            self.appearance,
            self.preferred_connection_parameters.min_conn_interval,
            self.preferred_connection_parameters.max_conn_interval,
            self.preferred_connection_parameters.slave_latency,
            self.preferred_connection_parameters.supervision_timeout
        )
    }
}

/// PnP ID characteristic (0x2A50).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct PnpId {
    pub vendor_id_source: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_version: u16,
}

/// The Device Information service contents. Characteristics the server does
/// not expose stay at their empty defaults.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct DeviceInformation {
    pub system_id: Vec<u8>,
    pub model_number: String,
    pub serial_number: String,
    pub firmware_revision: String,
    pub hardware_revision: String,
    pub software_revision: String,
    pub manufacturer: String,
    pub regulatory_cert_data: Vec<u8>,
    pub pnp_id: PnpId,
}

/// UTF-8 value of a GATT name-like characteristic, trailing NULs stripped.
fn gatt_name_to_string(value: &[u8]) -> String {
    let end = value
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);
    String::from_utf8_lossy(&value[..end]).into_owned()
}

impl GattClient {
    /// Reads the Generic Access service from the discovered services.
    ///
    /// Returns a populated record only when both a non-empty device name
    /// and the preferred connection parameters could be read.
    pub fn get_generic_access(&self, services: &[GattService]) -> Option<GenericAccess> {
        let service_uuid = BleUuid::Uuid16(GATT_GENERIC_ACCESS_SERVICE_UUID);
        let mut device_name = String::new();
        let mut appearance = 0u16;
        let mut preferred = None;

        for decl in services
            .iter()
            .flat_map(|service| service.characteristics.iter())
            .filter(|decl| decl.service_uuid == service_uuid)
        {
            if decl.uuid == BleUuid::Uuid16(GATT_DEVICE_NAME_UUID) {
                if let Ok(value) = self.read_characteristic_value(decl, None) {
                    device_name = gatt_name_to_string(&value);
                }
            } else if decl.uuid == BleUuid::Uuid16(GATT_APPEARANCE_UUID) {
                if let Ok(value) = self.read_characteristic_value(decl, None) {
                    if let Ok(category) = OctetView::new(&value).get_u16(0, true) {
                        appearance = category;
                    }
                }
            } else if decl.uuid
                == BleUuid::Uuid16(GATT_PERIPHERAL_PREFERRED_CONNECTION_PARAMETERS_UUID)
            {
                if let Ok(value) = self.read_characteristic_value(decl, None) {
                    let v = OctetView::new(&value);
                    if let (Ok(min), Ok(max), Ok(latency), Ok(timeout)) = (
                        v.get_u16(0, true),
                        v.get_u16(2, true),
                        v.get_u16(4, true),
                        v.get_u16(6, true),
                    ) {
                        preferred = Some(PreferredConnectionParameters {
                            min_conn_interval: min,
                            max_conn_interval: max,
                            slave_latency: latency,
                            supervision_timeout: timeout,
                        });
                    }
                }
            }
        }

        match (device_name.is_empty(), preferred) {
            (false, Some(preferred_connection_parameters)) => {
                let result = GenericAccess {
                    device_name,
                    appearance,
                    preferred_connection_parameters,
                };
                debug!("generic access: {}", result);
                Some(result)
            }
            _ => None,
        }
    }

    /// Reads the Device Information service from the discovered services.
    ///
    /// Returns a record when any matching characteristic was found; fields
    /// that could not be read default to empty.
    pub fn get_device_information(&self, services: &[GattService]) -> Option<DeviceInformation> {
        let service_uuid = BleUuid::Uuid16(GATT_DEVICE_INFORMATION_SERVICE_UUID);
        let mut info = DeviceInformation::default();
        let mut found = false;

        for decl in services
            .iter()
            .flat_map(|service| service.characteristics.iter())
            .filter(|decl| decl.service_uuid == service_uuid)
        {
            found = true;
            let value = match self.read_characteristic_value(decl, None) {
                Ok(value) => value,
                Err(_) => continue,
            };
            let uuid = decl.uuid;
            if uuid == BleUuid::Uuid16(GATT_SYSTEM_ID_UUID) {
                info.system_id = value;
            } else if uuid == BleUuid::Uuid16(GATT_REGULATORY_CERT_DATA_LIST_UUID) {
                info.regulatory_cert_data = value;
            } else if uuid == BleUuid::Uuid16(GATT_PNP_ID_UUID) {
                let v = OctetView::new(&value);
                if let (Ok(source), Ok(vendor), Ok(product), Ok(version)) = (
                    v.get_u8(0),
                    v.get_u16(1, true),
                    v.get_u16(3, true),
                    v.get_u16(5, true),
                ) {
                    info.pnp_id = PnpId {
                        vendor_id_source: source,
                        vendor_id: vendor,
                        product_id: product,
                        product_version: version,
                    };
                }
            } else if uuid == BleUuid::Uuid16(GATT_MODEL_NUMBER_STRING_UUID) {
                info.model_number = gatt_name_to_string(&value);
            } else if uuid == BleUuid::Uuid16(GATT_SERIAL_NUMBER_STRING_UUID) {
                info.serial_number = gatt_name_to_string(&value);
            } else if uuid == BleUuid::Uuid16(GATT_FIRMWARE_REVISION_STRING_UUID) {
                info.firmware_revision = gatt_name_to_string(&value);
            } else if uuid == BleUuid::Uuid16(GATT_HARDWARE_REVISION_STRING_UUID) {
                info.hardware_revision = gatt_name_to_string(&value);
            } else if uuid == BleUuid::Uuid16(GATT_SOFTWARE_REVISION_STRING_UUID) {
                info.software_revision = gatt_name_to_string(&value);
            } else if uuid == BleUuid::Uuid16(GATT_MANUFACTURER_NAME_STRING_UUID) {
                info.manufacturer = gatt_name_to_string(&value);
            }
        }

        found.then_some(info)
    }
}
