// bleclient Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.

//! Implementation of the EUI-48 Bluetooth device address.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::Error as CrateError;

/// Stores the 6 byte address used to identify Bluetooth devices.
///
/// Bytes are kept in wire order: least-significant octet first, as the
/// address appears in advertising reports and HCI events. The textual form
/// `XX:XX:XX:XX:XX:XX` puts the most-significant octet leftmost.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
#[repr(C)]
pub struct BdAddr {
    address: [u8; 6],
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseBdAddrError {
    #[error("Bluetooth address string must be 17 characters of form XX:XX:XX:XX:XX:XX")]
    IncorrectLength,
    #[error("All digits in a Bluetooth address must be hex-digits [0-9a-fA-F]")]
    InvalidDigit,
}

impl From<ParseBdAddrError> for CrateError {
    fn from(e: ParseBdAddrError) -> Self {
        CrateError::InvalidBdAddr(e.to_string())
    }
}

impl BdAddr {
    /// `00:00:00:00:00:00`
    pub const ANY_DEVICE: BdAddr = BdAddr { address: [0; 6] };
    /// `FF:FF:FF:FF:FF:FF`
    pub const ALL_DEVICE: BdAddr = BdAddr {
        address: [0xFF; 6],
    };
    /// `00:00:00:FF:FF:FF`
    pub const LOCAL_DEVICE: BdAddr = BdAddr {
        address: [0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00],
    };

    pub fn into_inner(self) -> [u8; 6] {
        self.address
    }

    pub fn bytes(&self) -> &[u8; 6] {
        &self.address
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::UpperHex>::fmt(self, f)
    }
}

impl fmt::UpperHex for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.address;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a[5], a[4], a[3], a[2], a[1], a[0]
        )
    }
}

impl fmt::LowerHex for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.address;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a[5], a[4], a[3], a[2], a[1], a[0]
        )
    }
}

impl fmt::Debug for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl AsRef<[u8]> for BdAddr {
    fn as_ref(&self) -> &[u8] {
        &self.address
    }
}

impl From<[u8; 6]> for BdAddr {
    /// Builds an address from a wire-order array (`address[0]` is the LSB).
    fn from(address: [u8; 6]) -> Self {
        Self { address }
    }
}

impl<'a> TryFrom<&'a [u8]> for BdAddr {
    type Error = ParseBdAddrError;

    fn try_from(slice: &'a [u8]) -> Result<Self, Self::Error> {
        if slice.len() < 6 {
            Err(ParseBdAddrError::IncorrectLength)
        } else {
            let mut cpy = [0; 6];
            cpy.copy_from_slice(&slice[..6]);
            Ok(cpy.into())
        }
    }
}

impl From<u64> for BdAddr {
    fn from(int: u64) -> Self {
        let mut cpy = [0; 6];
        cpy.copy_from_slice(&int.to_le_bytes()[..6]);
        cpy.into()
    }
}

impl From<BdAddr> for u64 {
    fn from(addr: BdAddr) -> Self {
        let mut slice = [0; 8];
        slice[..6].copy_from_slice(&addr.address);
        u64::from_le_bytes(slice)
    }
}

impl FromStr for BdAddr {
    type Err = ParseBdAddrError;

    /// Parses a Bluetooth address of the form `AA:BB:CC:DD:EE:FF`,
    /// most-significant octet first. All hex-digits `[0-9a-fA-F]` are
    /// allowed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 17 {
            return Err(ParseBdAddrError::IncorrectLength);
        }
        let bytes = s
            .split(':')
            .map(|part| {
                if part.len() != 2 {
                    return Err(ParseBdAddrError::IncorrectLength);
                }
                u8::from_str_radix(part, 16).map_err(|_| ParseBdAddrError::InvalidDigit)
            })
            .collect::<Result<Vec<u8>, _>>()?;

        if bytes.len() != 6 {
            return Err(ParseBdAddrError::IncorrectLength);
        }
        let mut address = [0; 6];
        for (i, b) in bytes.into_iter().enumerate() {
            address[5 - i] = b;
        }
        Ok(BdAddr { address })
    }
}
