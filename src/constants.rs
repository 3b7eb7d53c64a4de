//! Protocol constants: GAP AD element types, GATT attribute/service/
//! characteristic types, ATT opcodes and client defaults.

// GAP AD element types (BT Core Specification Supplement, Part A / assigned
// numbers "Common Data Types").
pub const GAP_FLAGS: u8 = 0x01;
pub const GAP_UUID16_INCOMPLETE: u8 = 0x02;
pub const GAP_UUID16_COMPLETE: u8 = 0x03;
pub const GAP_UUID32_INCOMPLETE: u8 = 0x04;
pub const GAP_UUID32_COMPLETE: u8 = 0x05;
pub const GAP_UUID128_INCOMPLETE: u8 = 0x06;
pub const GAP_UUID128_COMPLETE: u8 = 0x07;
pub const GAP_NAME_LOCAL_SHORT: u8 = 0x08;
pub const GAP_NAME_LOCAL_COMPLETE: u8 = 0x09;
pub const GAP_TX_POWER_LEVEL: u8 = 0x0A;
pub const GAP_SSP_CLASS_OF_DEVICE: u8 = 0x0D;
pub const GAP_SSP_HASH_C192: u8 = 0x0E;
pub const GAP_SSP_RANDOMIZER_R192: u8 = 0x0F;
pub const GAP_DEVICE_ID: u8 = 0x10;
pub const GAP_SLAVE_CONN_IVAL_RANGE: u8 = 0x12;
pub const GAP_SOLICIT_UUID16: u8 = 0x14;
pub const GAP_SOLICIT_UUID128: u8 = 0x15;
pub const GAP_SVC_DATA_UUID16: u8 = 0x16;
pub const GAP_PUB_TRGT_ADDR: u8 = 0x17;
pub const GAP_RND_TRGT_ADDR: u8 = 0x18;
pub const GAP_APPEARANCE: u8 = 0x19;
pub const GAP_SOLICIT_UUID32: u8 = 0x1F;
pub const GAP_SVC_DATA_UUID32: u8 = 0x20;
pub const GAP_SVC_DATA_UUID128: u8 = 0x21;
pub const GAP_MANUFACTURE_SPECIFIC: u8 = 0xFF;

// ATT opcodes (BT Core Spec v5.2: Vol 3, Part F, 3.4.8).
pub const ATT_ERROR_RSP: u8 = 0x01;
pub const ATT_EXCHANGE_MTU_REQ: u8 = 0x02;
pub const ATT_EXCHANGE_MTU_RSP: u8 = 0x03;
pub const ATT_FIND_INFORMATION_REQ: u8 = 0x04;
pub const ATT_FIND_INFORMATION_RSP: u8 = 0x05;
pub const ATT_READ_BY_TYPE_REQ: u8 = 0x08;
pub const ATT_READ_BY_TYPE_RSP: u8 = 0x09;
pub const ATT_READ_REQ: u8 = 0x0A;
pub const ATT_READ_RSP: u8 = 0x0B;
pub const ATT_READ_BLOB_REQ: u8 = 0x0C;
pub const ATT_READ_BLOB_RSP: u8 = 0x0D;
pub const ATT_READ_BY_GROUP_TYPE_REQ: u8 = 0x10;
pub const ATT_READ_BY_GROUP_TYPE_RSP: u8 = 0x11;
pub const ATT_WRITE_REQ: u8 = 0x12;
pub const ATT_WRITE_RSP: u8 = 0x13;
pub const ATT_WRITE_CMD: u8 = 0x52;
pub const ATT_HANDLE_VALUE_NTF: u8 = 0x1B;
pub const ATT_HANDLE_VALUE_IND: u8 = 0x1D;
pub const ATT_HANDLE_VALUE_CFM: u8 = 0x1E;
pub const ATT_MULTIPLE_HANDLE_VALUE_NTF: u8 = 0x23;

// GATT attribute (declaration) types.
pub const GATT_PRIMARY_SERVICE_UUID: u16 = 0x2800;
pub const GATT_SECONDARY_SERVICE_UUID: u16 = 0x2801;
pub const GATT_INCLUDE_UUID: u16 = 0x2802;
pub const GATT_CHARAC_UUID: u16 = 0x2803;
pub const GATT_CLIENT_CHARAC_CFG_UUID: u16 = 0x2902;

// GATT service types read by the profile helpers.
pub const GATT_GENERIC_ACCESS_SERVICE_UUID: u16 = 0x1800;
pub const GATT_DEVICE_INFORMATION_SERVICE_UUID: u16 = 0x180A;

// GATT characteristic types (Generic Access).
pub const GATT_DEVICE_NAME_UUID: u16 = 0x2A00;
pub const GATT_APPEARANCE_UUID: u16 = 0x2A01;
pub const GATT_PERIPHERAL_PREFERRED_CONNECTION_PARAMETERS_UUID: u16 = 0x2A04;

// GATT characteristic types (Device Information).
pub const GATT_SYSTEM_ID_UUID: u16 = 0x2A23;
pub const GATT_MODEL_NUMBER_STRING_UUID: u16 = 0x2A24;
pub const GATT_SERIAL_NUMBER_STRING_UUID: u16 = 0x2A25;
pub const GATT_FIRMWARE_REVISION_STRING_UUID: u16 = 0x2A26;
pub const GATT_HARDWARE_REVISION_STRING_UUID: u16 = 0x2A27;
pub const GATT_SOFTWARE_REVISION_STRING_UUID: u16 = 0x2A28;
pub const GATT_MANUFACTURER_NAME_STRING_UUID: u16 = 0x2A29;
pub const GATT_REGULATORY_CERT_DATA_LIST_UUID: u16 = 0x2A2A;
pub const GATT_PNP_ID_UUID: u16 = 0x2A50;

// Client defaults.

/// Largest ATT PDU this client announces in `ATT_EXCHANGE_MTU_REQ`.
pub const CLIENT_MAX_MTU: u16 = 512;

/// ATT_MTU before the exchange completed (BT Core Spec v5.2: Vol 3, Part F, 3.2.8).
pub const DEFAULT_ATT_MTU: u16 = 23;

/// Poll timeout of the reader's blocking L2CAP read. Bounds how long
/// `disconnect()` may wait for the reader to notice the stop flag.
pub const L2CAP_READER_POLL_TIMEOUT_MS: u64 = 100;

/// Capacity of the bounded inbound PDU queue between reader and caller.
pub const ATT_PDU_QUEUE_CAPACITY: usize = 128;

/// How long a synchronous procedure waits for its response PDU.
pub const GATT_REPLY_TIMEOUT_MS: u64 = 3000;
