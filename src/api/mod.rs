// bleclient Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.

//! The public type model: device addresses, UUIDs, the GATT attribute
//! hierarchy discovered from a server and the listener types fed by the
//! engine's reader thread.

mod bdaddr;
pub mod bleuuid;

use std::fmt;

use bitflags::bitflags;

pub use self::bdaddr::{BdAddr, ParseBdAddrError};
pub use self::bleuuid::{uuid_from_u16, uuid_from_u32, BleUuid};

/// The address type accompanying a [`BdAddr`] on the wire.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum AddressType {
    BrEdr,
    LePublic,
    LeRandom,
    #[default]
    Undefined,
}

impl AddressType {
    pub fn from_u8(v: u8) -> AddressType {
        match v {
            0x00 => AddressType::BrEdr,
            0x01 => AddressType::LePublic,
            0x02 => AddressType::LeRandom,
            _ => AddressType::Undefined,
        }
    }

    pub fn num(&self) -> u8 {
        match *self {
            AddressType::BrEdr => 0x00,
            AddressType::LePublic => 0x01,
            AddressType::LeRandom => 0x02,
            AddressType::Undefined => 0xFF,
        }
    }
}

bitflags! {
    /// A set of properties that indicate what operations are supported by a
    /// characteristic.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CharPropFlags: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

impl Default for CharPropFlags {
    fn default() -> Self {
        CharPropFlags::empty()
    }
}

/// What a discovered handle range belongs to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HandleRangeKind {
    Service,
    CharacteristicDecl,
    CharacteristicValue,
    Descriptor,
}

/// A `[start_handle, end_handle]` attribute range tagged with its UUID.
///
/// Valid ranges satisfy `0x0001 <= start_handle <= end_handle <= 0xFFFF`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct GattHandleRange {
    pub kind: HandleRangeKind,
    pub start_handle: u16,
    pub end_handle: u16,
    pub uuid: BleUuid,
}

impl GattHandleRange {
    pub fn is_valid(&self) -> bool {
        0x0001 <= self.start_handle && self.start_handle <= self.end_handle
    }
}

impl fmt::Display for GattHandleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}[0x{:04x}..0x{:04x}, {}]",
            self.kind, self.start_handle, self.end_handle, self.uuid
        )
    }
}

/// A handle plus the UUID stored at that handle, as returned by descriptor
/// discovery.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct GattUuidHandle {
    pub handle: u16,
    pub uuid: BleUuid,
}

/// The Client Characteristic Configuration descriptor of a characteristic:
/// bit 0 enables notifications, bit 1 enables indications.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ClientCharConfig {
    pub handle: u16,
    pub value: u16,
}

impl ClientCharConfig {
    pub fn notifying(&self) -> bool {
        self.value & 0x01 != 0
    }

    pub fn indicating(&self) -> bool {
        self.value & 0x02 != 0
    }
}

/// A characteristic declaration discovered within a primary service.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GattCharacteristic {
    /// UUID of the service this characteristic belongs to, by value. The
    /// declaration deliberately does not point back at its service.
    pub service_uuid: BleUuid,
    /// End handle of the owning service's range.
    pub service_handle_end: u16,
    /// Handle of the characteristic declaration attribute.
    pub handle: u16,
    pub properties: CharPropFlags,
    /// Handle of the characteristic value attribute.
    pub value_handle: u16,
    pub uuid: BleUuid,
    /// The Client Characteristic Configuration descriptor, when one was
    /// discovered in this characteristic's handle interval.
    pub config: Option<ClientCharConfig>,
}

impl fmt::Display for GattCharacteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Characteristic[{}, decl 0x{:04x}, value 0x{:04x}, props {:?}]",
            self.uuid, self.handle, self.value_handle, self.properties
        )
    }
}

/// A discovered primary service: its declaration range and the
/// characteristic declarations found inside it, ordered by ascending handle.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GattService {
    pub declaration: GattHandleRange,
    pub characteristics: Vec<GattCharacteristic>,
}

impl fmt::Display for GattService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Service[{}, {} characteristics]",
            self.declaration,
            self.characteristics.len()
        )
    }
}

/// A value change pushed by the server via `ATT_HANDLE_VALUE_NTF`.
///
/// Handed to the notification listener as an owned, immutable value; the
/// listener may retain it after returning.
#[derive(Debug, Clone)]
pub struct ValueNotification {
    /// Address of the server that sent the notification.
    pub device: BdAddr,
    /// The declaration whose value handle matched, if discovery has run.
    pub characteristic: Option<GattCharacteristic>,
    pub handle: u16,
    pub value: Vec<u8>,
}

/// A value change pushed by the server via `ATT_HANDLE_VALUE_IND`.
#[derive(Debug, Clone)]
pub struct ValueIndication {
    pub device: BdAddr,
    pub characteristic: Option<GattCharacteristic>,
    pub handle: u16,
    pub value: Vec<u8>,
    /// Whether `ATT_HANDLE_VALUE_CFM` was already written when the listener
    /// runs. The confirmation, when enabled, is sent before dispatch.
    pub confirmation_sent: bool,
}

/// Called on the engine's reader thread for each notification. Must not
/// block; a panic is caught and logged by the dispatcher.
pub type NotificationHandler = Box<dyn FnMut(ValueNotification) + Send>;

/// Called on the engine's reader thread for each indication. Must not block;
/// a panic is caught and logged by the dispatcher.
pub type IndicationHandler = Box<dyn FnMut(ValueIndication) + Send>;
