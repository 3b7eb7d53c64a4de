//! BLE UUIDs in their 16-, 32- and 128-bit wire variants, with conversion to
//! and from the canonical 128-bit form via the Bluetooth Base UUID.

use std::fmt;
use std::hash::{Hash, Hasher};

use uuid::Uuid;

use crate::{Error, Result};

const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;
const BLUETOOTH_BASE_MASK: u128 = 0x00000000_ffff_ffff_ffff_ffffffffffff;
const BLUETOOTH_BASE_MASK_16: u128 = 0xffff0000_ffff_ffff_ffff_ffffffffffff;

/// Convert a 32-bit BLE short UUID to a full 128-bit UUID by filling in the
/// standard Bluetooth Base UUID.
pub const fn uuid_from_u32(short: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Convert a 16-bit BLE short UUID to a full 128-bit UUID by filling in the
/// standard Bluetooth Base UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    uuid_from_u32(short as u32)
}

/// A UUID in one of the three widths BLE puts on the wire.
///
/// Equality, ordering-free comparison and hashing work across widths: a
/// `Uuid16(0x180F)` equals the `Uuid128` spelling
/// `0000180f-0000-1000-8000-00805f9b34fb`.
#[derive(Debug, Clone, Copy)]
pub enum BleUuid {
    Uuid16(u16),
    Uuid32(u32),
    Uuid128(Uuid),
}

impl BleUuid {
    /// Octet count of this variant on the wire.
    pub fn type_size(&self) -> usize {
        match self {
            BleUuid::Uuid16(_) => 2,
            BleUuid::Uuid32(_) => 4,
            BleUuid::Uuid128(_) => 16,
        }
    }

    /// The canonical 128-bit form.
    pub fn as_uuid128(&self) -> Uuid {
        match *self {
            BleUuid::Uuid16(v) => uuid_from_u16(v),
            BleUuid::Uuid32(v) => uuid_from_u32(v),
            BleUuid::Uuid128(v) => v,
        }
    }

    /// If this is a Base-UUID value, its 16-bit short form.
    pub fn to_ble_u16(&self) -> Option<u16> {
        let value = self.as_uuid128().as_u128();
        if value & BLUETOOTH_BASE_MASK_16 == BLUETOOTH_BASE_UUID {
            Some((value >> 96) as u16)
        } else {
            None
        }
    }

    /// If this is a Base-UUID value, its 32-bit short form.
    pub fn to_ble_u32(&self) -> Option<u32> {
        let value = self.as_uuid128().as_u128();
        if value & BLUETOOTH_BASE_MASK == BLUETOOTH_BASE_UUID {
            Some((value >> 96) as u32)
        } else {
            None
        }
    }

    /// Parses a little-endian wire UUID of 2, 4 or 16 octets.
    pub fn from_wire(data: &[u8]) -> Result<BleUuid> {
        match data.len() {
            2 => Ok(BleUuid::Uuid16(u16::from_le_bytes([data[0], data[1]]))),
            4 => Ok(BleUuid::Uuid32(u32::from_le_bytes([
                data[0], data[1], data[2], data[3],
            ]))),
            16 => {
                let mut b = [0u8; 16];
                b.copy_from_slice(data);
                Ok(BleUuid::Uuid128(Uuid::from_u128(u128::from_le_bytes(b))))
            }
            n => Err(Error::InvalidArgument(format!(
                "invalid UUID wire size {}",
                n
            ))),
        }
    }

    /// Little-endian wire encoding of this variant.
    pub fn to_wire(&self) -> Vec<u8> {
        match *self {
            BleUuid::Uuid16(v) => v.to_le_bytes().to_vec(),
            BleUuid::Uuid32(v) => v.to_le_bytes().to_vec(),
            BleUuid::Uuid128(v) => v.as_u128().to_le_bytes().to_vec(),
        }
    }
}

impl PartialEq for BleUuid {
    fn eq(&self, other: &Self) -> bool {
        self.as_uuid128() == other.as_uuid128()
    }
}

impl Eq for BleUuid {}

impl Hash for BleUuid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_uuid128().hash(state);
    }
}

impl From<Uuid> for BleUuid {
    fn from(uuid: Uuid) -> Self {
        BleUuid::Uuid128(uuid)
    }
}

impl fmt::Display for BleUuid {
    /// Short format where applicable: `0x180f` / `0x11223344`, otherwise the
    /// canonical hyphenated 128-bit form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BleUuid::Uuid16(v) => write!(f, "{:#06x}", v),
            BleUuid::Uuid32(v) => write!(f, "{:#010x}", v),
            BleUuid::Uuid128(v) => write!(f, "{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_from_u32_test() {
        assert_eq!(
            uuid_from_u32(0x11223344),
            Uuid::parse_str("11223344-0000-1000-8000-00805f9b34fb").unwrap()
        );
    }

    #[test]
    fn uuid_from_u16_test() {
        assert_eq!(
            uuid_from_u16(0x1122),
            Uuid::parse_str("00001122-0000-1000-8000-00805f9b34fb").unwrap()
        );
    }

    #[test]
    fn equality_across_widths() {
        let short = BleUuid::Uuid16(0x180F);
        let wide = BleUuid::Uuid32(0x0000180F);
        let full = BleUuid::Uuid128(
            Uuid::parse_str("0000180f-0000-1000-8000-00805f9b34fb").unwrap(),
        );
        assert_eq!(short, wide);
        assert_eq!(short, full);
        assert_ne!(short, BleUuid::Uuid16(0x1810));
    }

    #[test]
    fn type_sizes() {
        assert_eq!(BleUuid::Uuid16(0).type_size(), 2);
        assert_eq!(BleUuid::Uuid32(0).type_size(), 4);
        assert_eq!(BleUuid::Uuid128(Uuid::nil()).type_size(), 16);
    }

    #[test]
    fn short_form_detection() {
        assert_eq!(BleUuid::Uuid16(0x1234).to_ble_u16(), Some(0x1234));
        assert_eq!(BleUuid::Uuid32(0x12345678).to_ble_u16(), None);
        assert_eq!(BleUuid::Uuid32(0x12345678).to_ble_u32(), Some(0x12345678));
        assert_eq!(BleUuid::Uuid128(Uuid::nil()).to_ble_u32(), None);
    }

    #[test]
    fn wire_round_trip() {
        let wire16 = [0x0F, 0x18];
        assert_eq!(BleUuid::from_wire(&wire16).unwrap(), BleUuid::Uuid16(0x180F));
        assert_eq!(BleUuid::Uuid16(0x180F).to_wire(), wire16.to_vec());

        let wire128: Vec<u8> = (1..=16).collect();
        let parsed = BleUuid::from_wire(&wire128).unwrap();
        assert_eq!(parsed.to_wire(), wire128);
        assert!(BleUuid::from_wire(&wire128[..3]).is_err());
    }

    #[test]
    fn short_display() {
        assert_eq!(BleUuid::Uuid16(0x1122).to_string(), "0x1122");
        assert_eq!(BleUuid::Uuid32(0x11223344).to_string(), "0x11223344");
    }
}
