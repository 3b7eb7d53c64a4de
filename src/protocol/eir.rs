//! Decoder for LE Advertising Data / Extended Inquiry Response payloads.
//!
//! Both formats carry a stream of length-type-value elements; advertising
//! events additionally batch several reports in a column-major layout. The
//! decoder fills an [`EirReport`] and records which fields were populated in
//! a dirty mask, so absent and zero-valued fields stay distinguishable.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use log::{debug, warn};
use nom::bytes::complete::take;
use nom::number::complete::le_u8;
use nom::IResult;

use crate::api::{AddressType, BdAddr, BleUuid};
use crate::constants::*;
use crate::octets::OctetView;

bitflags! {
    /// Which fields of an [`EirReport`] have been populated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EirDataType: u32 {
        const EVT_TYPE = 1 << 0;
        const BDADDR_TYPE = 1 << 1;
        const BDADDR = 1 << 2;
        const FLAGS = 1 << 3;
        const NAME = 1 << 4;
        const NAME_SHORT = 1 << 5;
        const RSSI = 1 << 6;
        const TX_POWER = 1 << 7;
        const MANUF_DATA = 1 << 8;
        const DEVICE_CLASS = 1 << 9;
        const APPEARANCE = 1 << 10;
        const HASH = 1 << 11;
        const RANDOMIZER = 1 << 12;
        const DEVICE_ID = 1 << 13;
        const SERVICE_UUID = 1 << 14;
    }
}

impl Default for EirDataType {
    fn default() -> Self {
        EirDataType::empty()
    }
}

/// Where a report's bytes came from.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum ReportSource {
    #[default]
    NotAvailable,
    AdvertisingData,
    ExtendedInquiry,
}

impl fmt::Display for ReportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReportSource::NotAvailable => "N/A",
            ReportSource::AdvertisingData => "AD",
            ReportSource::ExtendedInquiry => "EIR",
        })
    }
}

/// Manufacturer specific data: the assigned company identifier and the
/// vendor payload following it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ManufacturerData {
    pub company: u16,
    pub data: Vec<u8>,
}

/// Maximum stored length of complete and shortened local names.
const MAX_NAME_LENGTH: usize = 30;

/// One decoded advertising / inquiry report.
///
/// Created by the decoder, mutated only while decoding, then handed out
/// immutable. Every getter is gated on the dirty mask: a field reads back
/// `Some` exactly when its [`EirDataType`] bit is set.
#[derive(Debug, Clone, Default)]
pub struct EirReport {
    source: ReportSource,
    timestamp_ms: u64,
    evt_type: u8,
    address_type: AddressType,
    address: BdAddr,
    flags: i8,
    name: String,
    name_short: String,
    rssi: i8,
    tx_power: i8,
    device_class: u32,
    appearance: u16,
    hash: [u8; 16],
    randomizer: [u8; 16],
    did_source: u16,
    did_vendor: u16,
    did_product: u16,
    did_version: u16,
    msd: Option<ManufacturerData>,
    services: Vec<BleUuid>,
    unhandled: Vec<(u8, Vec<u8>)>,
    mask: EirDataType,
}

impl EirReport {
    pub fn new(source: ReportSource) -> Self {
        EirReport {
            source,
            ..Default::default()
        }
    }

    pub fn source(&self) -> ReportSource {
        self.source
    }

    pub fn data_set(&self) -> EirDataType {
        self.mask
    }

    pub fn is_set(&self, bit: EirDataType) -> bool {
        self.mask.contains(bit)
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn evt_type(&self) -> Option<u8> {
        self.is_set(EirDataType::EVT_TYPE).then_some(self.evt_type)
    }

    pub fn address_type(&self) -> Option<AddressType> {
        self.is_set(EirDataType::BDADDR_TYPE)
            .then_some(self.address_type)
    }

    pub fn address(&self) -> Option<BdAddr> {
        self.is_set(EirDataType::BDADDR).then_some(self.address)
    }

    pub fn flags(&self) -> Option<i8> {
        self.is_set(EirDataType::FLAGS).then_some(self.flags)
    }

    pub fn name(&self) -> Option<&str> {
        self.is_set(EirDataType::NAME).then_some(self.name.as_str())
    }

    pub fn name_short(&self) -> Option<&str> {
        self.is_set(EirDataType::NAME_SHORT)
            .then_some(self.name_short.as_str())
    }

    pub fn rssi(&self) -> Option<i8> {
        self.is_set(EirDataType::RSSI).then_some(self.rssi)
    }

    pub fn tx_power(&self) -> Option<i8> {
        self.is_set(EirDataType::TX_POWER).then_some(self.tx_power)
    }

    /// 24-bit class of device.
    pub fn device_class(&self) -> Option<u32> {
        self.is_set(EirDataType::DEVICE_CLASS)
            .then_some(self.device_class)
    }

    pub fn appearance(&self) -> Option<u16> {
        self.is_set(EirDataType::APPEARANCE)
            .then_some(self.appearance)
    }

    pub fn hash(&self) -> Option<&[u8; 16]> {
        self.is_set(EirDataType::HASH).then_some(&self.hash)
    }

    pub fn randomizer(&self) -> Option<&[u8; 16]> {
        self.is_set(EirDataType::RANDOMIZER)
            .then_some(&self.randomizer)
    }

    /// Device ID as `(source, vendor, product, version)`.
    pub fn device_id(&self) -> Option<(u16, u16, u16, u16)> {
        self.is_set(EirDataType::DEVICE_ID).then_some((
            self.did_source,
            self.did_vendor,
            self.did_product,
            self.did_version,
        ))
    }

    pub fn manufacturer_data(&self) -> Option<&ManufacturerData> {
        self.msd.as_ref()
    }

    /// Advertised service UUIDs, deduplicated by value equality.
    pub fn services(&self) -> &[BleUuid] {
        &self.services
    }

    /// AD elements of types this decoder does not interpret, kept verbatim
    /// as `(type, data)` for upstream inspection.
    pub fn unhandled(&self) -> &[(u8, Vec<u8>)] {
        &self.unhandled
    }

    /// The kernel-modalias rendition of the Device ID field.
    pub fn device_id_modalias(&self) -> String {
        match self.did_source {
            0x0001 => format!(
                "bluetooth:v{:04X}p{:04X}d{:04X}",
                self.did_vendor, self.did_product, self.did_version
            ),
            0x0002 => format!(
                "usb:v{:04X}p{:04X}d{:04X}",
                self.did_vendor, self.did_product, self.did_version
            ),
            _ => format!(
                "source<0x{:X}>:v{:04X}p{:04X}d{:04X}",
                self.did_source, self.did_vendor, self.did_product, self.did_version
            ),
        }
    }

    fn set(&mut self, bit: EirDataType) {
        self.mask.insert(bit);
    }

    fn set_timestamp(&mut self, millis: u64) {
        self.timestamp_ms = millis;
    }

    fn set_evt_type(&mut self, evt_type: u8) {
        self.evt_type = evt_type;
        self.set(EirDataType::EVT_TYPE);
    }

    fn set_address_type(&mut self, raw: u8) {
        self.address_type = AddressType::from_u8(raw);
        self.set(EirDataType::BDADDR_TYPE);
    }

    fn set_address(&mut self, address: BdAddr) {
        self.address = address;
        self.set(EirDataType::BDADDR);
    }

    fn set_flags(&mut self, flags: i8) {
        self.flags = flags;
        self.set(EirDataType::FLAGS);
    }

    fn set_name(&mut self, buffer: &[u8]) {
        self.name = get_string(buffer, MAX_NAME_LENGTH);
        self.set(EirDataType::NAME);
    }

    fn set_short_name(&mut self, buffer: &[u8]) {
        self.name_short = get_string(buffer, MAX_NAME_LENGTH);
        self.set(EirDataType::NAME_SHORT);
    }

    fn set_rssi(&mut self, rssi: i8) {
        self.rssi = rssi;
        self.set(EirDataType::RSSI);
    }

    fn set_tx_power(&mut self, tx_power: i8) {
        self.tx_power = tx_power;
        self.set(EirDataType::TX_POWER);
    }

    fn set_device_class(&mut self, device_class: u32) {
        self.device_class = device_class;
        self.set(EirDataType::DEVICE_CLASS);
    }

    fn set_appearance(&mut self, appearance: u16) {
        self.appearance = appearance;
        self.set(EirDataType::APPEARANCE);
    }

    fn set_hash(&mut self, hash: &[u8]) {
        self.hash.copy_from_slice(&hash[..16]);
        self.set(EirDataType::HASH);
    }

    fn set_randomizer(&mut self, randomizer: &[u8]) {
        self.randomizer.copy_from_slice(&randomizer[..16]);
        self.set(EirDataType::RANDOMIZER);
    }

    fn set_device_id(&mut self, source: u16, vendor: u16, product: u16, version: u16) {
        self.did_source = source;
        self.did_vendor = vendor;
        self.did_product = product;
        self.did_version = version;
        self.set(EirDataType::DEVICE_ID);
    }

    fn set_manufacturer_data(&mut self, company: u16, data: &[u8]) {
        self.msd = Some(ManufacturerData {
            company,
            data: data.to_vec(),
        });
        self.set(EirDataType::MANUF_DATA);
    }

    fn add_service(&mut self, uuid: BleUuid) {
        if !self.services.iter().any(|known| *known == uuid) {
            self.services.push(uuid);
        }
        self.set(EirDataType::SERVICE_UUID);
    }

    /// Decodes a length-type-value element stream into this report and
    /// returns the number of elements consumed.
    ///
    /// A zero length octet ends the significant part. A truncated element
    /// halts decoding; everything decoded up to that point stands.
    pub fn read_data(&mut self, data: &[u8]) -> usize {
        let mut count = 0;
        let mut rest = data;
        while !rest.is_empty() {
            match eir_element(rest) {
                Ok((_, None)) => break,
                Ok((next, Some((elem_type, elem_data)))) => {
                    count += 1;
                    self.apply_element(elem_type, elem_data);
                    rest = next;
                }
                Err(_) => {
                    debug!(
                        "{} data stream truncated after {} elements",
                        self.source, count
                    );
                    break;
                }
            }
        }
        count
    }

    fn apply_element(&mut self, elem_type: u8, data: &[u8]) {
        let v = OctetView::new(data);
        match elem_type {
            GAP_FLAGS => {
                if let Ok(flags) = v.get_i8(0) {
                    self.set_flags(flags);
                }
            }
            GAP_UUID16_INCOMPLETE | GAP_UUID16_COMPLETE => {
                for chunk in data.chunks_exact(2) {
                    self.add_service(BleUuid::Uuid16(u16::from_le_bytes([chunk[0], chunk[1]])));
                }
            }
            GAP_UUID32_INCOMPLETE | GAP_UUID32_COMPLETE => {
                for chunk in data.chunks_exact(4) {
                    self.add_service(BleUuid::Uuid32(u32::from_le_bytes([
                        chunk[0], chunk[1], chunk[2], chunk[3],
                    ])));
                }
            }
            GAP_UUID128_INCOMPLETE | GAP_UUID128_COMPLETE => {
                for chunk in data.chunks_exact(16) {
                    if let Ok(uuid) = BleUuid::from_wire(chunk) {
                        self.add_service(uuid);
                    }
                }
            }
            GAP_NAME_LOCAL_SHORT => self.set_short_name(data),
            GAP_NAME_LOCAL_COMPLETE => self.set_name(data),
            GAP_TX_POWER_LEVEL => {
                if let Ok(power) = v.get_i8(0) {
                    self.set_tx_power(power);
                }
            }
            GAP_SSP_CLASS_OF_DEVICE => {
                if data.len() >= 3 {
                    self.set_device_class(
                        data[0] as u32 | (data[1] as u32) << 8 | (data[2] as u32) << 16,
                    );
                }
            }
            GAP_DEVICE_ID => {
                if data.len() >= 8 {
                    self.set_device_id(
                        u16::from_le_bytes([data[0], data[1]]),
                        u16::from_le_bytes([data[2], data[3]]),
                        u16::from_le_bytes([data[4], data[5]]),
                        u16::from_le_bytes([data[6], data[7]]),
                    );
                }
            }
            GAP_APPEARANCE => {
                if let Ok(appearance) = v.get_u16(0, true) {
                    self.set_appearance(appearance);
                }
            }
            GAP_SSP_HASH_C192 => {
                if data.len() >= 16 {
                    self.set_hash(data);
                }
            }
            GAP_SSP_RANDOMIZER_R192 => {
                if data.len() >= 16 {
                    self.set_randomizer(data);
                }
            }
            GAP_MANUFACTURE_SPECIFIC => {
                if let Ok(company) = v.get_u16(0, true) {
                    self.set_manufacturer_data(company, &data[2..]);
                }
            }
            _ => {
                debug!(
                    "{}: unhandled element type 0x{:02x} with {} bytes net",
                    self.source,
                    elem_type,
                    data.len()
                );
                self.unhandled.push((elem_type, data.to_vec()));
            }
        }
    }

    /// Decodes an `LE Advertising Report` batch.
    ///
    /// The first octet is the report count; only counts in `1..=0x19` are
    /// accepted. The batch stores its reports column-major: per column one
    /// entry per report, in the order event type, address type, address,
    /// AD data length, AD data, RSSI. All reports share one timestamp. On a
    /// truncated column a warning is logged and the reports parsed so far
    /// are returned.
    pub fn read_ad_reports(data: &[u8]) -> Vec<EirReport> {
        let num_reports = match data.first() {
            Some(&n) => n as usize,
            None => return Vec::new(),
        };
        if num_reports == 0 || num_reports > 0x19 {
            debug!("AD reports: invalid report count {}", num_reports);
            return Vec::new();
        }

        let timestamp = current_millis();
        let mut reports: Vec<EirReport> = Vec::with_capacity(num_reports);
        let mut ad_data_len = [0usize; 0x19];
        let mut offset = 1usize;

        let truncated = |offset: usize| {
            warn!(
                "AD reports: incomplete batch of {} reports within {} bytes, stopped at offset {}",
                num_reports,
                data.len(),
                offset
            );
        };

        for _ in 0..num_reports {
            if offset >= data.len() {
                truncated(offset);
                return reports;
            }
            let mut report = EirReport::new(ReportSource::AdvertisingData);
            report.set_timestamp(timestamp);
            report.set_evt_type(data[offset]);
            reports.push(report);
            offset += 1;
        }
        for i in 0..reports.len() {
            if offset >= data.len() {
                truncated(offset);
                return reports;
            }
            reports[i].set_address_type(data[offset]);
            offset += 1;
        }
        for i in 0..reports.len() {
            if offset + 6 > data.len() {
                truncated(offset);
                return reports;
            }
            if let Ok(addr) = BdAddr::try_from(&data[offset..offset + 6]) {
                reports[i].set_address(addr);
            }
            offset += 6;
        }
        for i in 0..reports.len() {
            if offset >= data.len() {
                truncated(offset);
                return reports;
            }
            ad_data_len[i] = data[offset] as usize;
            offset += 1;
        }
        for i in 0..reports.len() {
            if offset + ad_data_len[i] > data.len() {
                truncated(offset);
                return reports;
            }
            reports[i].read_data(&data[offset..offset + ad_data_len[i]]);
            offset += ad_data_len[i];
        }
        for i in 0..reports.len() {
            if offset >= data.len() {
                truncated(offset);
                return reports;
            }
            reports[i].set_rssi(data[offset] as i8);
            offset += 1;
        }
        debug!(
            "AD reports: completed {} reports within {} bytes, {} bytes left",
            reports.len(),
            data.len(),
            data.len() - offset
        );
        reports
    }
}

impl fmt::Display for EirReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EirReport::{}[address[{}, {:?}], name['{}'/'{}'], set{:?}, evt-type {}, rssi {}, tx-power {}, appearance 0x{:04x}, {} services]",
            self.source,
            self.address,
            self.address_type,
            self.name,
            self.name_short,
            self.mask,
            self.evt_type,
            self.rssi,
            self.tx_power,
            self.appearance,
            self.services.len()
        )
    }
}

/// One length-type-value element. `Ok(None)` marks the zero-length end of
/// the significant part; a parse error means the element header claims more
/// bytes than the stream holds.
fn eir_element(i: &[u8]) -> IResult<&[u8], Option<(u8, &[u8])>> {
    let (i, len) = le_u8(i)?;
    if len == 0 {
        return Ok((i, None));
    }
    let (i, elem_type) = le_u8(i)?;
    let (i, data) = take(len as usize - 1)(i)?;
    Ok((i, Some((elem_type, data))))
}

/// UTF-8 string from a GATT/EIR buffer, cut at the first NUL and capped at
/// `max` bytes.
fn get_string(buffer: &[u8], max: usize) -> String {
    let capped = &buffer[..buffer.len().min(max)];
    let end = capped.iter().position(|&b| b == 0).unwrap_or(capped.len());
    String::from_utf8_lossy(&capped[..end]).into_owned()
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
