//! Attribute Protocol PDUs: a factory that classifies received buffers by
//! their opcode octet into typed, owned PDU values, and builders for the
//! request PDUs this client issues.
//!
//! All multi-byte ATT fields are little-endian on the wire.

use std::fmt;

use bytes::{BufMut, BytesMut};
use num_enum::TryFromPrimitive;
use thiserror::Error;

use crate::api::{BleUuid, GattUuidHandle};
use crate::constants::*;
use crate::octets::OctetView;
use crate::{Error as CrateError, Result};

/// Error codes carried by `ATT_ERROR_RSP` (BT Core Spec v5.2: Vol 3, Part F, 3.4.1.1).
#[derive(Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, Error)]
#[repr(u8)]
pub enum AttErrorCode {
    #[error("invalid handle")]
    InvalidHandle = 0x01,
    #[error("read not permitted")]
    ReadNotPermitted = 0x02,
    #[error("write not permitted")]
    WriteNotPermitted = 0x03,
    #[error("invalid PDU")]
    InvalidPdu = 0x04,
    #[error("insufficient authentication")]
    InsufficientAuthentication = 0x05,
    #[error("request not supported")]
    RequestNotSupported = 0x06,
    #[error("invalid offset")]
    InvalidOffset = 0x07,
    #[error("insufficient authorization")]
    InsufficientAuthorization = 0x08,
    #[error("prepare queue full")]
    PrepareQueueFull = 0x09,
    #[error("attribute not found")]
    AttributeNotFound = 0x0A,
    #[error("attribute not long")]
    AttributeNotLong = 0x0B,
    #[error("insufficient encryption key size")]
    InsufficientEncryptionKeySize = 0x0C,
    #[error("invalid attribute value length")]
    InvalidAttributeValueLength = 0x0D,
    #[error("unlikely error")]
    UnlikelyError = 0x0E,
    #[error("insufficient encryption")]
    InsufficientEncryption = 0x0F,
    #[error("unsupported group type")]
    UnsupportedGroupType = 0x10,
    #[error("insufficient resources")]
    InsufficientResources = 0x11,
    #[error("database out of sync")]
    DatabaseOutOfSync = 0x12,
    #[error("value not allowed")]
    ValueNotAllowed = 0x13,
}

/// One element of an `ATT_READ_BY_TYPE_RSP`: the attribute handle and the
/// raw attribute value of `element_size - 2` octets.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TypeElement {
    pub handle: u16,
    pub value: Vec<u8>,
}

/// One element of an `ATT_READ_BY_GROUP_TYPE_RSP`: a group handle range and
/// the group's UUID.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GroupElement {
    pub start_handle: u16,
    pub end_handle: u16,
    pub uuid: BleUuid,
}

/// A received ATT PDU, classified by opcode.
///
/// Opcodes this client never receives as a GATT client (requests, commands)
/// land in `Unknown` and are kept with their payload for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttPdu {
    Error {
        request_opcode: u8,
        handle: u16,
        code: u8,
    },
    ExchangeMtuRsp {
        mtu: u16,
    },
    FindInformationRsp {
        elements: Vec<GattUuidHandle>,
    },
    ReadByTypeRsp {
        element_size: usize,
        elements: Vec<TypeElement>,
    },
    ReadByGroupTypeRsp {
        element_size: usize,
        elements: Vec<GroupElement>,
    },
    ReadRsp {
        value: Vec<u8>,
    },
    ReadBlobRsp {
        value: Vec<u8>,
    },
    WriteRsp,
    HandleValueNtf {
        handle: u16,
        value: Vec<u8>,
    },
    HandleValueInd {
        handle: u16,
        value: Vec<u8>,
    },
    MultipleHandleValueNtf {
        data: Vec<u8>,
    },
    Unknown {
        opcode: u8,
        data: Vec<u8>,
    },
}

impl AttPdu {
    pub fn opcode(&self) -> u8 {
        match self {
            AttPdu::Error { .. } => ATT_ERROR_RSP,
            AttPdu::ExchangeMtuRsp { .. } => ATT_EXCHANGE_MTU_RSP,
            AttPdu::FindInformationRsp { .. } => ATT_FIND_INFORMATION_RSP,
            AttPdu::ReadByTypeRsp { .. } => ATT_READ_BY_TYPE_RSP,
            AttPdu::ReadByGroupTypeRsp { .. } => ATT_READ_BY_GROUP_TYPE_RSP,
            AttPdu::ReadRsp { .. } => ATT_READ_RSP,
            AttPdu::ReadBlobRsp { .. } => ATT_READ_BLOB_RSP,
            AttPdu::WriteRsp => ATT_WRITE_RSP,
            AttPdu::HandleValueNtf { .. } => ATT_HANDLE_VALUE_NTF,
            AttPdu::HandleValueInd { .. } => ATT_HANDLE_VALUE_IND,
            AttPdu::MultipleHandleValueNtf { .. } => ATT_MULTIPLE_HANDLE_VALUE_NTF,
            AttPdu::Unknown { opcode, .. } => *opcode,
        }
    }

    /// The named error code, when this is an `Error` PDU carrying a known
    /// code.
    pub fn error_code(&self) -> Option<AttErrorCode> {
        match self {
            AttPdu::Error { code, .. } => AttErrorCode::try_from(*code).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for AttPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttPdu::Error {
                request_opcode,
                handle,
                code,
            } => write!(
                f,
                "AttErrorRsp[req 0x{:02x}, handle 0x{:04x}, code 0x{:02x}]",
                request_opcode, handle, code
            ),
            other => write!(f, "AttPdu[opcode 0x{:02x}]", other.opcode()),
        }
    }
}

/// Classifies a received buffer by its first octet and parses it into a
/// typed [`AttPdu`].
pub fn specialise(buffer: &[u8]) -> Result<AttPdu> {
    let v = OctetView::new(buffer);
    let opcode = v.get_u8(0)?;
    match opcode {
        ATT_ERROR_RSP => Ok(AttPdu::Error {
            request_opcode: v.get_u8(1)?,
            handle: v.get_u16(2, true)?,
            code: v.get_u8(4)?,
        }),
        ATT_EXCHANGE_MTU_RSP => Ok(AttPdu::ExchangeMtuRsp {
            mtu: v.get_u16(1, true)?,
        }),
        ATT_FIND_INFORMATION_RSP => {
            let uuid_size = match v.get_u8(1)? {
                0x01 => 2,
                0x02 => 16,
                format => {
                    return Err(CrateError::Protocol(format!(
                        "find information response with invalid format 0x{:02x}",
                        format
                    )))
                }
            };
            let element_size = 2 + uuid_size;
            let count = (v.size() - 2) / element_size;
            let mut elements = Vec::with_capacity(count);
            for i in 0..count {
                let offset = 2 + i * element_size;
                elements.push(GattUuidHandle {
                    handle: v.get_u16(offset, true)?,
                    uuid: v.get_uuid(offset + 2, uuid_size)?,
                });
            }
            Ok(AttPdu::FindInformationRsp { elements })
        }
        ATT_READ_BY_TYPE_RSP => {
            let element_size = v.get_u8(1)? as usize;
            if element_size < 2 {
                return Err(CrateError::Protocol(format!(
                    "read by type response with element size {}",
                    element_size
                )));
            }
            let count = (v.size() - 2) / element_size;
            let mut elements = Vec::with_capacity(count);
            for i in 0..count {
                let offset = 2 + i * element_size;
                elements.push(TypeElement {
                    handle: v.get_u16(offset, true)?,
                    value: v.get_bytes(offset + 2, element_size - 2)?.to_vec(),
                });
            }
            Ok(AttPdu::ReadByTypeRsp {
                element_size,
                elements,
            })
        }
        ATT_READ_BY_GROUP_TYPE_RSP => {
            let element_size = v.get_u8(1)? as usize;
            if element_size < 6 {
                return Err(CrateError::Protocol(format!(
                    "read by group type response with element size {}",
                    element_size
                )));
            }
            let count = (v.size() - 2) / element_size;
            let mut elements = Vec::with_capacity(count);
            for i in 0..count {
                let offset = 2 + i * element_size;
                elements.push(GroupElement {
                    start_handle: v.get_u16(offset, true)?,
                    end_handle: v.get_u16(offset + 2, true)?,
                    uuid: v.get_uuid(offset + 2 + 2, element_size - 2 - 2)?,
                });
            }
            Ok(AttPdu::ReadByGroupTypeRsp {
                element_size,
                elements,
            })
        }
        ATT_READ_RSP => Ok(AttPdu::ReadRsp {
            value: buffer[1..].to_vec(),
        }),
        ATT_READ_BLOB_RSP => Ok(AttPdu::ReadBlobRsp {
            value: buffer[1..].to_vec(),
        }),
        ATT_WRITE_RSP => Ok(AttPdu::WriteRsp),
        ATT_HANDLE_VALUE_NTF => Ok(AttPdu::HandleValueNtf {
            handle: v.get_u16(1, true)?,
            value: buffer[3..].to_vec(),
        }),
        ATT_HANDLE_VALUE_IND => Ok(AttPdu::HandleValueInd {
            handle: v.get_u16(1, true)?,
            value: buffer[3..].to_vec(),
        }),
        ATT_MULTIPLE_HANDLE_VALUE_NTF => Ok(AttPdu::MultipleHandleValueNtf {
            data: buffer[1..].to_vec(),
        }),
        opcode => Ok(AttPdu::Unknown {
            opcode,
            data: buffer[1..].to_vec(),
        }),
    }
}

/// Largest attribute value payload a read response may carry at `used_mtu`.
pub fn max_read_value_size(used_mtu: u16) -> usize {
    used_mtu as usize - 1
}

fn put_uuid_le(buf: &mut BytesMut, uuid: &BleUuid) {
    match *uuid {
        BleUuid::Uuid16(u) => buf.put_u16_le(u),
        BleUuid::Uuid32(u) => buf.put_u32_le(u),
        BleUuid::Uuid128(u) => buf.put_slice(&u.as_u128().to_le_bytes()),
    }
}

pub fn exchange_mtu_req(client_rx_mtu: u16) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(3);
    buf.put_u8(ATT_EXCHANGE_MTU_REQ);
    buf.put_u16_le(client_rx_mtu);
    buf.to_vec()
}

pub fn read_by_group_type_req(start_handle: u16, end_handle: u16, group_type: &BleUuid) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(5 + group_type.type_size());
    buf.put_u8(ATT_READ_BY_GROUP_TYPE_REQ);
    buf.put_u16_le(start_handle);
    buf.put_u16_le(end_handle);
    put_uuid_le(&mut buf, group_type);
    buf.to_vec()
}

pub fn read_by_type_req(start_handle: u16, end_handle: u16, attribute_type: &BleUuid) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(5 + attribute_type.type_size());
    buf.put_u8(ATT_READ_BY_TYPE_REQ);
    buf.put_u16_le(start_handle);
    buf.put_u16_le(end_handle);
    put_uuid_le(&mut buf, attribute_type);
    buf.to_vec()
}

pub fn find_information_req(start_handle: u16, end_handle: u16) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(ATT_FIND_INFORMATION_REQ);
    buf.put_u16_le(start_handle);
    buf.put_u16_le(end_handle);
    buf.to_vec()
}

pub fn read_req(handle: u16) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(3);
    buf.put_u8(ATT_READ_REQ);
    buf.put_u16_le(handle);
    buf.to_vec()
}

pub fn read_blob_req(handle: u16, value_offset: u16) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(ATT_READ_BLOB_REQ);
    buf.put_u16_le(handle);
    buf.put_u16_le(value_offset);
    buf.to_vec()
}

pub fn write_req(handle: u16, value: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(3 + value.len());
    buf.put_u8(ATT_WRITE_REQ);
    buf.put_u16_le(handle);
    buf.put_slice(value);
    buf.to_vec()
}

pub fn write_cmd(handle: u16, value: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(3 + value.len());
    buf.put_u8(ATT_WRITE_CMD);
    buf.put_u16_le(handle);
    buf.put_slice(value);
    buf.to_vec()
}

pub fn handle_value_cfm() -> Vec<u8> {
    vec![ATT_HANDLE_VALUE_CFM]
}
