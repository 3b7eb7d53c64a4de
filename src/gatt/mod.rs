// bleclient Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.

//! The client-side GATT engine.
//!
//! A [`GattClient`] owns an L2CAP channel and a background reader thread.
//! The reader classifies every received ATT PDU: handle-value notifications
//! and indications are dispatched inline to the installed listeners, all
//! other PDUs are pushed onto a bounded inbound queue. The synchronous
//! procedures (MTU exchange, discovery, reads, writes) each send one request
//! and take one PDU from that queue; callers serialise procedure calls.

pub mod l2cap;
#[cfg(test)]
pub(crate) mod mock;
pub mod profiles;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::api::{
    BleUuid, ClientCharConfig, GattCharacteristic, GattHandleRange, GattService, GattUuidHandle,
    HandleRangeKind, IndicationHandler, NotificationHandler, ValueIndication, ValueNotification,
    CharPropFlags,
};
use crate::constants::*;
use crate::octets::{OctetView, Octets};
use crate::protocol::att::{self, AttErrorCode, AttPdu};
use crate::{Error, Result};

use self::l2cap::{ChannelState, L2capChannel};

/// Engine state. Everything above `Disconnected` means the channel is open.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub enum ClientState {
    Error,
    Disconnected,
    Connecting,
    Connected,
    RequestInProgress,
    DiscoveringCharacteristics,
    GetClientCharConfig,
    WaitWriteResponse,
    WaitReadResponse,
}

struct Shared {
    channel: Box<dyn L2capChannel>,
    state: Mutex<ClientState>,
    server_mtu: AtomicU16,
    used_mtu: AtomicU16,
    services: Mutex<Vec<GattService>>,
    should_stop: AtomicBool,
    reader_running: AtomicBool,
    notification_listener: Mutex<Option<NotificationHandler>>,
    indication_listener: Mutex<Option<IndicationHandler>>,
    send_confirmation: AtomicBool,
}

impl Shared {
    fn state(&self) -> ClientState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: ClientState) {
        *self.state.lock().unwrap() = state;
    }

    /// Checks that engine state, channel open flag and channel state agree
    /// on open-ness. Any disagreement is an invalid state.
    fn validate_state(&self) -> Result<ClientState> {
        let state = self.state();
        let a = state > ClientState::Disconnected;
        let b = self.channel.is_open();
        let c = self.channel.state() > ChannelState::Disconnected;
        if (a || b || c) && !(a && b && c) {
            return Err(Error::InvalidState(format!(
                "inconsistent open state: client {:?}, l2cap[open {}, state {:?}]",
                state,
                b,
                self.channel.state()
            )));
        }
        Ok(state)
    }

    /// Sends one ATT PDU. Refuses PDUs above the negotiated MTU; a failed
    /// transport write moves the engine into the `Error` state.
    fn send(&self, pdu: &[u8]) -> Result<()> {
        if self.validate_state()? <= ClientState::Disconnected {
            return Err(Error::NotConnected);
        }
        let used_mtu = self.used_mtu.load(Ordering::Relaxed) as usize;
        if pdu.len() > used_mtu {
            return Err(Error::InvalidArgument(format!(
                "PDU size {} exceeds used MTU {}",
                pdu.len(),
                used_mtu
            )));
        }
        match self.channel.write(pdu) {
            Ok(written) if written == pdu.len() => Ok(()),
            Ok(written) => {
                error!("l2cap short write: {} of {} octets", written, pdu.len());
                self.set_state(ClientState::Error);
                Err(Error::Transport(format!(
                    "short write: {} of {} octets",
                    written,
                    pdu.len()
                )))
            }
            Err(e) => {
                error!("l2cap write error: {}", e);
                self.set_state(ClientState::Error);
                Err(e)
            }
        }
    }

    /// The declaration whose value handle equals `handle`, if known.
    fn find_characteristic(&self, handle: u16) -> Option<GattCharacteristic> {
        self.services
            .lock()
            .unwrap()
            .iter()
            .flat_map(|service| service.characteristics.iter())
            .find(|decl| decl.value_handle == handle)
            .cloned()
    }
}

/// Restores the engine to `Connected` when a procedure scope ends, unless
/// something else (e.g. a transport failure) moved the state elsewhere.
struct ProcedureGuard<'a> {
    shared: &'a Shared,
    target: ClientState,
    armed: bool,
}

impl<'a> ProcedureGuard<'a> {
    fn enter(shared: &'a Shared, target: ClientState) -> Self {
        let mut state = shared.state.lock().unwrap();
        let armed = *state == ClientState::Connected;
        if armed {
            *state = target;
        }
        ProcedureGuard {
            shared,
            target,
            armed,
        }
    }
}

impl Drop for ProcedureGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.shared.state.lock().unwrap();
            if *state == self.target {
                *state = ClientState::Connected;
            }
        }
    }
}

/// Client-side GATT protocol engine over one L2CAP channel.
pub struct GattClient {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    inbound: Mutex<Option<Receiver<AttPdu>>>,
}

impl GattClient {
    pub fn new(channel: Box<dyn L2capChannel>) -> Self {
        GattClient {
            shared: Arc::new(Shared {
                channel,
                state: Mutex::new(ClientState::Disconnected),
                server_mtu: AtomicU16::new(DEFAULT_ATT_MTU),
                used_mtu: AtomicU16::new(DEFAULT_ATT_MTU),
                services: Mutex::new(Vec::new()),
                should_stop: AtomicBool::new(false),
                reader_running: AtomicBool::new(false),
                notification_listener: Mutex::new(None),
                indication_listener: Mutex::new(None),
                send_confirmation: AtomicBool::new(false),
            }),
            reader: Mutex::new(None),
            inbound: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ClientState {
        self.shared.state()
    }

    pub fn validate_state(&self) -> Result<ClientState> {
        self.shared.validate_state()
    }

    /// MTU announced by the server, after `connect` negotiated it.
    pub fn server_mtu(&self) -> u16 {
        self.shared.server_mtu.load(Ordering::Relaxed)
    }

    /// MTU this connection actually uses; `send` refuses anything larger.
    pub fn used_mtu(&self) -> u16 {
        self.shared.used_mtu.load(Ordering::Relaxed)
    }

    /// Services discovered by the last `discover_primary_services` run.
    pub fn services(&self) -> Vec<GattService> {
        self.shared.services.lock().unwrap().clone()
    }

    /// Opens the channel, starts the reader thread and negotiates the MTU.
    /// Idempotent when already open.
    pub fn connect(&self) -> Result<()> {
        if self.shared.validate_state()? > ClientState::Disconnected {
            debug!("connect: already open");
            return Ok(());
        }
        self.shared.set_state(ClientState::Connecting);
        let channel_state = match self.shared.channel.connect() {
            Ok(state) => state,
            Err(e) => {
                self.shared.set_state(ClientState::Disconnected);
                return Err(e);
            }
        };
        if channel_state <= ChannelState::Disconnected {
            debug!("connect: could not connect l2cap channel");
            self.shared.set_state(ClientState::Disconnected);
            return Err(Error::NotConnected);
        }
        self.shared.set_state(ClientState::Connected);

        let (tx, rx) = mpsc::sync_channel(ATT_PDU_QUEUE_CAPACITY);
        *self.inbound.lock().unwrap() = Some(rx);
        self.shared.should_stop.store(false, Ordering::SeqCst);
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("gatt-l2cap-reader".into())
            .spawn(move || reader_loop(shared, tx))
            .map_err(|e| Error::Internal(format!("spawning reader thread: {}", e)))?;
        *self.reader.lock().unwrap() = Some(handle);

        match self.exchange_mtu(CLIENT_MAX_MTU) {
            Ok(0) => warn!("connect: ignoring zero server MTU"),
            Ok(mtu) => self
                .shared
                .server_mtu
                .store(mtu.min(CLIENT_MAX_MTU), Ordering::Relaxed),
            Err(e) => warn!("connect: MTU exchange failed: {}", e),
        }
        let used = CLIENT_MAX_MTU.min(self.shared.server_mtu.load(Ordering::Relaxed));
        self.shared.used_mtu.store(used, Ordering::Relaxed);
        debug!(
            "connect: server MTU {}, used MTU {}",
            self.server_mtu(),
            used
        );
        Ok(())
    }

    /// Stops and joins the reader, closes the channel and resets the state.
    /// Idempotent.
    pub fn disconnect(&self) -> Result<()> {
        let open = self.shared.channel.is_open() || self.shared.state() > ClientState::Disconnected;
        let reader_alive = self.reader.lock().unwrap().is_some();
        if !open && !reader_alive {
            return Ok(());
        }
        debug!("disconnect start");
        self.shared.should_stop.store(true, Ordering::SeqCst);
        self.shared.set_state(ClientState::Disconnected);
        self.shared.channel.disconnect();
        if let Some(handle) = self.reader.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("disconnect: reader thread panicked");
            }
        }
        *self.inbound.lock().unwrap() = None;
        debug!("disconnect end");
        Ok(())
    }

    /// Installs the notification listener, returning the previous one.
    pub fn set_notification_listener(
        &self,
        listener: Option<NotificationHandler>,
    ) -> Option<NotificationHandler> {
        std::mem::replace(
            &mut *self.shared.notification_listener.lock().unwrap(),
            listener,
        )
    }

    /// Installs the indication listener, returning the previous one. When
    /// `send_confirmation` is set, `ATT_HANDLE_VALUE_CFM` is written before
    /// the listener runs.
    pub fn set_indication_listener(
        &self,
        listener: Option<IndicationHandler>,
        send_confirmation: bool,
    ) -> Option<IndicationHandler> {
        self.shared
            .send_confirmation
            .store(send_confirmation, Ordering::SeqCst);
        std::mem::replace(
            &mut *self.shared.indication_listener.lock().unwrap(),
            listener,
        )
    }

    /// The discovered declaration whose value handle equals `handle`.
    pub fn find_characteristic(&self, handle: u16) -> Option<GattCharacteristic> {
        self.shared.find_characteristic(handle)
    }

    fn receive_next(&self) -> Result<AttPdu> {
        let guard = self.inbound.lock().unwrap();
        let rx = guard.as_ref().ok_or(Error::NotConnected)?;
        match rx.recv_timeout(Duration::from_millis(GATT_REPLY_TIMEOUT_MS)) {
            Ok(pdu) => Ok(pdu),
            Err(RecvTimeoutError::Timeout) => Err(Error::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(Error::NotConnected),
        }
    }

    /// BT Core Spec v5.2: Vol 3, Part G GATT: 4.3.1 Exchange MTU.
    ///
    /// Returns the MTU announced by the server, 0 when the reply was not an
    /// `ATT_EXCHANGE_MTU_RSP`.
    pub fn exchange_mtu(&self, client_rx_mtu: u16) -> Result<u16> {
        if client_rx_mtu > CLIENT_MAX_MTU {
            return Err(Error::InvalidArgument(format!(
                "client MTU {} exceeds maximum {}",
                client_rx_mtu, CLIENT_MAX_MTU
            )));
        }
        let _guard = ProcedureGuard::enter(&self.shared, ClientState::RequestInProgress);
        self.shared.send(&att::exchange_mtu_req(client_rx_mtu))?;
        match self.receive_next()? {
            AttPdu::ExchangeMtuRsp { mtu } => Ok(mtu),
            other => {
                warn!("exchange MTU: unexpected reply {}", other);
                Ok(0)
            }
        }
    }

    /// Performs the full three-phase discovery: primary services, their
    /// characteristic declarations and their client characteristic
    /// configuration descriptors. Returns the (possibly partial) result and
    /// retains it for `find_characteristic` and the profile helpers.
    pub fn discover_primary_services(&self) -> Result<Vec<GattService>> {
        let mut services = self.discover_services()?;
        for service in services.iter_mut() {
            if self.discover_characteristics(service)? {
                self.discover_client_char_config(service)?;
            }
        }
        *self.shared.services.lock().unwrap() = services.clone();
        Ok(services)
    }

    /// BT Core Spec v5.2: Vol 3, Part G GATT: 4.4.1 Discover All Primary
    /// Services.
    ///
    /// Complete when an `ATT_ERROR_RSP` is received or the last end group
    /// handle is 0xFFFF.
    fn discover_services(&self) -> Result<Vec<GattService>> {
        let _guard = ProcedureGuard::enter(&self.shared, ClientState::RequestInProgress);
        let group_type = BleUuid::Uuid16(GATT_PRIMARY_SERVICE_UUID);
        let mut services = Vec::new();
        let mut start_handle: u16 = 0x0001;
        loop {
            let req = att::read_by_group_type_req(start_handle, 0xFFFF, &group_type);
            debug!("service discovery send: start 0x{:04x}", start_handle);
            if let Err(e) = self.shared.send(&req) {
                error!("service discovery send failed: {}", e);
                break;
            }
            match self.receive_next() {
                Ok(AttPdu::ReadByGroupTypeRsp { elements, .. }) => {
                    for element in &elements {
                        let declaration = GattHandleRange {
                            kind: HandleRangeKind::Service,
                            start_handle: element.start_handle,
                            end_handle: element.end_handle,
                            uuid: element.uuid,
                        };
                        debug!("service discovered: {}", declaration);
                        services.push(GattService {
                            declaration,
                            characteristics: Vec::new(),
                        });
                    }
                    match elements.last() {
                        Some(last) if last.end_handle < 0xFFFF => {
                            start_handle = last.end_handle + 1;
                        }
                        _ => break, // end of communication
                    }
                }
                Ok(AttPdu::Error { .. }) => break, // end of communication
                Ok(other) => {
                    warn!("service discovery: unexpected reply {}", other);
                    break;
                }
                Err(e) => {
                    warn!("service discovery: {}", e);
                    break;
                }
            }
        }
        Ok(services)
    }

    /// BT Core Spec v5.2: Vol 3, Part G GATT: 4.6.1 Discover All
    /// Characteristics of a Service. Returns whether any were found.
    fn discover_characteristics(&self, service: &mut GattService) -> Result<bool> {
        let _guard = ProcedureGuard::enter(&self.shared, ClientState::DiscoveringCharacteristics);
        let characteristic_type = BleUuid::Uuid16(GATT_CHARAC_UUID);
        let end_handle = service.declaration.end_handle;
        let mut handle = service.declaration.start_handle;
        service.characteristics.clear();
        loop {
            let req = att::read_by_type_req(handle, end_handle, &characteristic_type);
            debug!("characteristic discovery send: start 0x{:04x}", handle);
            if let Err(e) = self.shared.send(&req) {
                error!("characteristic discovery send failed: {}", e);
                break;
            }
            match self.receive_next() {
                Ok(AttPdu::ReadByTypeRsp { elements, .. }) => {
                    for element in &elements {
                        // value: properties, value handle and characteristic UUID
                        let value = OctetView::new(&element.value);
                        let decl = (|| -> Result<GattCharacteristic> {
                            Ok(GattCharacteristic {
                                service_uuid: service.declaration.uuid,
                                service_handle_end: end_handle,
                                handle: element.handle,
                                properties: CharPropFlags::from_bits_truncate(value.get_u8(0)?),
                                value_handle: value.get_u16(1, true)?,
                                uuid: value.get_uuid(3, value.size().saturating_sub(3))?,
                                config: None,
                            })
                        })();
                        match decl {
                            Ok(decl) => {
                                debug!("characteristic discovered: {}", decl);
                                service.characteristics.push(decl);
                            }
                            Err(e) => warn!("characteristic discovery: bad element: {}", e),
                        }
                    }
                    match elements.last() {
                        Some(last) if last.handle < end_handle => handle = last.handle + 1,
                        _ => break, // end of communication
                    }
                }
                Ok(AttPdu::Error { .. }) => break, // end of communication
                Ok(other) => {
                    warn!("characteristic discovery: unexpected reply {}", other);
                    break;
                }
                Err(e) => {
                    warn!("characteristic discovery: {}", e);
                    break;
                }
            }
        }
        Ok(!service.characteristics.is_empty())
    }

    /// BT Core Spec v5.2: Vol 3, Part G GATT: 3.3.3.3 Client Characteristic
    /// Configuration. Attaches each discovered descriptor to the
    /// characteristic whose value-handle interval contains it.
    fn discover_client_char_config(&self, service: &mut GattService) -> Result<()> {
        let _guard = ProcedureGuard::enter(&self.shared, ClientState::GetClientCharConfig);
        let config_type = BleUuid::Uuid16(GATT_CLIENT_CHARAC_CFG_UUID);
        let end_handle = service.declaration.end_handle;
        let mut handle = service.declaration.start_handle;
        loop {
            let req = att::read_by_type_req(handle, end_handle, &config_type);
            debug!("client char config discovery send: start 0x{:04x}", handle);
            if let Err(e) = self.shared.send(&req) {
                error!("client char config discovery send failed: {}", e);
                break;
            }
            match self.receive_next() {
                Ok(AttPdu::ReadByTypeRsp {
                    element_size,
                    elements,
                }) => {
                    for element in &elements {
                        if element_size != 4 {
                            warn!(
                                "client char config discovery: unexpected element size {}",
                                element_size
                            );
                            continue;
                        }
                        let value = OctetView::new(&element.value);
                        let config_handle = element.handle;
                        let config_value = match value.get_u16(0, true) {
                            Ok(v) => v,
                            Err(e) => {
                                warn!("client char config discovery: bad element: {}", e);
                                continue;
                            }
                        };
                        attach_client_char_config(
                            service,
                            ClientCharConfig {
                                handle: config_handle,
                                value: config_value,
                            },
                        );
                    }
                    match elements.last() {
                        Some(last) if last.handle < end_handle => handle = last.handle + 1,
                        _ => break, // end of communication
                    }
                }
                Ok(AttPdu::Error { .. }) => break, // end of communication
                Ok(other) => {
                    warn!("client char config discovery: unexpected reply {}", other);
                    break;
                }
                Err(e) => {
                    warn!("client char config discovery: {}", e);
                    break;
                }
            }
        }
        Ok(())
    }

    /// BT Core Spec v5.2: Vol 3, Part G GATT: 4.7.1 Discover All
    /// Characteristic Descriptors.
    pub fn discover_descriptors(&self, service: &GattHandleRange) -> Result<Vec<GattUuidHandle>> {
        let _guard = ProcedureGuard::enter(&self.shared, ClientState::RequestInProgress);
        let end_handle = service.end_handle;
        let mut handle = service.start_handle.saturating_add(1);
        let mut descriptors = Vec::new();
        loop {
            let req = att::find_information_req(handle, end_handle);
            debug!("descriptor discovery send: start 0x{:04x}", handle);
            if let Err(e) = self.shared.send(&req) {
                error!("descriptor discovery send failed: {}", e);
                break;
            }
            match self.receive_next() {
                Ok(AttPdu::FindInformationRsp { elements }) => {
                    for element in &elements {
                        debug!(
                            "descriptor discovered: handle 0x{:04x}, {}",
                            element.handle, element.uuid
                        );
                        descriptors.push(*element);
                    }
                    match elements.last() {
                        Some(last) if last.handle < end_handle => handle = last.handle + 1,
                        _ => break, // end of communication
                    }
                }
                Ok(AttPdu::Error { .. }) => break, // end of communication
                Ok(other) => {
                    warn!("descriptor discovery: unexpected reply {}", other);
                    break;
                }
                Err(e) => {
                    warn!("descriptor discovery: {}", e);
                    break;
                }
            }
        }
        Ok(descriptors)
    }

    /// BT Core Spec v5.2: Vol 3, Part G GATT: 4.8.1 Read Characteristic
    /// Value and 4.8.3 Read Long Characteristic Value.
    ///
    /// `expected_length` semantics: `Some(n)` stops once `n` octets were
    /// collected, `Some(0)` performs a single request, `None` keeps issuing
    /// blob requests until the value is exhausted.
    pub fn read_characteristic_value(
        &self,
        decl: &GattCharacteristic,
        expected_length: Option<usize>,
    ) -> Result<Vec<u8>> {
        let _guard = ProcedureGuard::enter(&self.shared, ClientState::WaitReadResponse);
        let max_value_size = att::max_read_value_size(self.used_mtu());
        let mut out = Octets::with_capacity(max_value_size);
        let mut offset = 0usize;
        debug!(
            "read characteristic value: {}, expected {:?}",
            decl, expected_length
        );
        loop {
            match expected_length {
                Some(0) if offset > 0 => break, // done with one request
                Some(expected) if expected > 0 && offset >= expected => break,
                _ => {}
            }
            let req = if offset == 0 {
                att::read_req(decl.value_handle)
            } else {
                att::read_blob_req(decl.value_handle, offset as u16)
            };
            if let Err(e) = self.shared.send(&req) {
                error!("read characteristic value send failed: {}", e);
                break;
            }
            match self.receive_next() {
                Ok(AttPdu::ReadRsp { value }) => {
                    out.append(&value);
                    offset += value.len();
                    if value.len() < max_value_size {
                        break; // no full PDU used, end of communication
                    }
                }
                Ok(AttPdu::ReadBlobRsp { value }) => {
                    if value.is_empty() {
                        break; // no more data, end of communication
                    }
                    out.append(&value);
                    offset += value.len();
                    if value.len() < max_value_size {
                        break; // no full PDU used, end of communication
                    }
                }
                Ok(pdu @ AttPdu::Error { .. }) => {
                    // A value no longer than ATT_MTU-1 answers the first
                    // blob request with AttributeNotLong.
                    if pdu.error_code() != Some(AttErrorCode::AttributeNotLong) {
                        warn!("read characteristic value: unexpected error {}", pdu);
                    }
                    break;
                }
                Ok(other) => {
                    warn!("read characteristic value: unexpected reply {}", other);
                    break;
                }
                Err(e) => {
                    warn!("read characteristic value: {}", e);
                    break;
                }
            }
        }
        if offset > 0 {
            Ok(out.into_vec())
        } else {
            Err(Error::Protocol(
                "characteristic value read yielded no data".into(),
            ))
        }
    }

    /// BT Core Spec v5.2: Vol 3, Part G GATT: 4.9.3 Write Characteristic
    /// Value.
    pub fn write_characteristic_value(
        &self,
        decl: &GattCharacteristic,
        value: &[u8],
    ) -> Result<()> {
        debug!("write characteristic value: {}, {} octets", decl, value.len());
        self.write_with_response(decl.value_handle, value)
    }

    /// Write Without Response (BT Core Spec v5.2: Vol 3, Part G GATT: 4.9.1).
    pub fn write_characteristic_value_cmd(
        &self,
        decl: &GattCharacteristic,
        value: &[u8],
    ) -> Result<()> {
        let _guard = ProcedureGuard::enter(&self.shared, ClientState::WaitWriteResponse);
        self.shared.send(&att::write_cmd(decl.value_handle, value))
    }

    /// BT Core Spec v5.2: Vol 3, Part G GATT: 3.3.3.3 Client Characteristic
    /// Configuration and 4.9.3 Write Characteristic Value.
    pub fn write_client_char_config(
        &self,
        cccd: &ClientCharConfig,
        value: &[u8],
    ) -> Result<()> {
        self.write_with_response(cccd.handle, value)
    }

    /// Composes and writes the client characteristic configuration value:
    /// bit 0 enables notifications, bit 1 enables indications.
    pub fn config_indication_notification(
        &self,
        cccd: &ClientCharConfig,
        enable_notification: bool,
        enable_indication: bool,
    ) -> Result<()> {
        let value = enable_notification as u16 | (enable_indication as u16) << 1;
        debug!(
            "config indication/notification: handle 0x{:04x}, notify {}, indicate {}",
            cccd.handle, enable_notification, enable_indication
        );
        let mut ccc = Octets::with_capacity(2);
        ccc.resize(2)?;
        ccc.put_u16(0, value, true)?;
        self.write_client_char_config(cccd, ccc.as_ref())
    }

    fn write_with_response(&self, handle: u16, value: &[u8]) -> Result<()> {
        let _guard = ProcedureGuard::enter(&self.shared, ClientState::WaitWriteResponse);
        self.shared.send(&att::write_req(handle, value))?;
        match self.receive_next()? {
            AttPdu::WriteRsp => Ok(()),
            AttPdu::Error {
                request_opcode,
                handle,
                code,
            } => {
                warn!(
                    "write request: error response: req 0x{:02x}, handle 0x{:04x}, code 0x{:02x}",
                    request_opcode, handle, code
                );
                Err(Error::Att {
                    opcode: request_opcode,
                    handle,
                    code,
                })
            }
            other => {
                warn!("write request: unexpected reply {}", other);
                Err(Error::Protocol(format!(
                    "unexpected reply to write request: {}",
                    other
                )))
            }
        }
    }
}

impl Drop for GattClient {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

/// Attaches `config` to the characteristic whose interval
/// `(value_handle, next value_handle or service end]` contains it.
fn attach_client_char_config(service: &mut GattService, config: ClientCharConfig) {
    for index in 0..service.characteristics.len() {
        let interval_end = match service.characteristics.get(index + 1) {
            Some(next) => next.value_handle,
            None => service.characteristics[index].service_handle_end,
        };
        let decl = &mut service.characteristics[index];
        if config.handle > decl.value_handle && config.handle <= interval_end {
            debug!(
                "client char config discovered: handle 0x{:04x}, value 0x{:04x} for {}",
                config.handle, config.value, decl
            );
            decl.config = Some(config);
        }
    }
}

fn reader_loop(shared: Arc<Shared>, inbound: SyncSender<AttPdu>) {
    shared.reader_running.store(true, Ordering::SeqCst);
    info!("l2cap reader started");
    let mut buffer = vec![0u8; CLIENT_MAX_MTU as usize];
    let poll_timeout = Duration::from_millis(L2CAP_READER_POLL_TIMEOUT_MS);

    while !shared.should_stop.load(Ordering::SeqCst) {
        match shared.validate_state() {
            Ok(state) if state <= ClientState::Disconnected => {
                debug!("reader: not connected");
                break;
            }
            Err(e) => {
                if !shared.should_stop.load(Ordering::SeqCst) {
                    error!("reader: {}", e);
                }
                break;
            }
            Ok(_) => {}
        }

        let len = match shared.channel.read(&mut buffer, poll_timeout) {
            Ok(0) | Err(Error::TimedOut) => continue,
            Ok(len) => len,
            Err(e) => {
                if !shared.should_stop.load(Ordering::SeqCst) {
                    warn!("reader: l2cap read error: {}", e);
                }
                continue;
            }
        };
        let pdu = match att::specialise(&buffer[..len]) {
            Ok(pdu) => pdu,
            Err(e) => {
                warn!("reader: dropping undecodable PDU: {}", e);
                continue;
            }
        };
        match pdu {
            AttPdu::HandleValueNtf { handle, value } => {
                debug!("reader: NTF handle 0x{:04x}, {} octets", handle, value.len());
                let notification = ValueNotification {
                    device: shared.channel.device(),
                    characteristic: shared.find_characteristic(handle),
                    handle,
                    value,
                };
                dispatch_notification(&shared, notification);
            }
            AttPdu::HandleValueInd { handle, value } => {
                // The confirmation goes out before the listener runs, so
                // listeners observe confirmation_sent deterministically.
                let mut confirmation_sent = false;
                if shared.send_confirmation.load(Ordering::SeqCst) {
                    confirmation_sent = shared.send(&att::handle_value_cfm()).is_ok();
                    debug!(
                        "reader: IND handle 0x{:04x}, confirmation sent {}",
                        handle, confirmation_sent
                    );
                }
                let indication = ValueIndication {
                    device: shared.channel.device(),
                    characteristic: shared.find_characteristic(handle),
                    handle,
                    value,
                    confirmation_sent,
                };
                dispatch_indication(&shared, indication);
            }
            AttPdu::MultipleHandleValueNtf { data } => {
                info!(
                    "reader: multiple handle value notification not supported, dropping {} octets",
                    data.len()
                );
            }
            other => {
                if !enqueue_blocking(&shared, &inbound, other) {
                    break;
                }
            }
        }
    }
    info!("l2cap reader stopped");
    shared.reader_running.store(false, Ordering::SeqCst);
}

/// Blocking put onto the bounded inbound queue. Keeps observing the stop
/// flag so a full queue cannot wedge `disconnect`.
fn enqueue_blocking(shared: &Shared, inbound: &SyncSender<AttPdu>, pdu: AttPdu) -> bool {
    let mut pdu = pdu;
    loop {
        match inbound.try_send(pdu) {
            Ok(()) => return true,
            Err(TrySendError::Full(returned)) => {
                if shared.should_stop.load(Ordering::SeqCst) {
                    return false;
                }
                pdu = returned;
                thread::sleep(Duration::from_millis(1));
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("reader: inbound queue closed");
                return false;
            }
        }
    }
}

fn dispatch_notification(shared: &Shared, notification: ValueNotification) {
    let mut guard = shared.notification_listener.lock().unwrap();
    if let Some(listener) = guard.as_mut() {
        if panic::catch_unwind(AssertUnwindSafe(|| listener(notification))).is_err() {
            error!("notification listener panicked");
        }
    }
}

fn dispatch_indication(shared: &Shared, indication: ValueIndication) {
    let mut guard = shared.indication_listener.lock().unwrap();
    if let Some(listener) = guard.as_mut() {
        if panic::catch_unwind(AssertUnwindSafe(|| listener(indication))).is_err() {
            error!("indication listener panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use super::mock::MockChannel;
    use super::*;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Responder that answers the MTU exchange with `mtu` and delegates
    /// everything else to `script`.
    fn scripted(
        mtu: u16,
        mut script: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    ) -> impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static {
        move |req: &[u8]| {
            if req.first() == Some(&ATT_EXCHANGE_MTU_REQ) {
                let b = mtu.to_le_bytes();
                vec![vec![ATT_EXCHANGE_MTU_RSP, b[0], b[1]]]
            } else {
                script(req)
            }
        }
    }

    fn connected(
        responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    ) -> (GattClient, MockChannel) {
        init_logs();
        let mock = MockChannel::new(responder);
        let client = GattClient::new(Box::new(mock.clone()));
        client.connect().unwrap();
        (client, mock)
    }

    fn error_rsp(request_opcode: u8, handle_lo: u8, handle_hi: u8, code: u8) -> Vec<u8> {
        vec![ATT_ERROR_RSP, request_opcode, handle_lo, handle_hi, code]
    }

    fn characteristic(value_handle: u16) -> GattCharacteristic {
        GattCharacteristic {
            service_uuid: BleUuid::Uuid16(0x180F),
            service_handle_end: 0xFFFF,
            handle: value_handle - 1,
            properties: CharPropFlags::READ,
            value_handle,
            uuid: BleUuid::Uuid16(0x2A19),
            config: None,
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn connect_negotiates_mtu_and_send_refuses_oversize() {
        let (client, _mock) = connected(scripted(185, |_| Vec::new()));
        assert_eq!(client.server_mtu(), 185);
        assert_eq!(client.used_mtu(), 185);

        // A 186 octet PDU (3 header + 183 value) must be refused.
        let decl = characteristic(0x0003);
        let err = client
            .write_characteristic_value(&decl, &[0u8; 183])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(client.state(), ClientState::Connected);
        client.disconnect().unwrap();
    }

    #[test]
    fn connect_is_idempotent() {
        let (client, mock) = connected(scripted(247, |_| Vec::new()));
        client.connect().unwrap();
        let mtu_requests = mock
            .written()
            .iter()
            .filter(|pdu| pdu[0] == ATT_EXCHANGE_MTU_REQ)
            .count();
        assert_eq!(mtu_requests, 1);
        client.disconnect().unwrap();
    }

    #[test]
    fn zero_server_mtu_is_ignored() {
        let (client, _mock) = connected(scripted(0, |_| Vec::new()));
        assert_eq!(client.server_mtu(), DEFAULT_ATT_MTU);
        assert_eq!(client.used_mtu(), DEFAULT_ATT_MTU);
        client.disconnect().unwrap();
    }

    #[test]
    fn exchange_mtu_rejects_oversize_request() {
        let (client, _mock) = connected(scripted(247, |_| Vec::new()));
        assert!(matches!(
            client.exchange_mtu(CLIENT_MAX_MTU + 1),
            Err(Error::InvalidArgument(_))
        ));
        client.disconnect().unwrap();
    }

    #[test]
    fn primary_service_discovery_advances_and_ends_on_error_rsp() {
        let (client, mock) = connected(scripted(512, |req| match req[0] {
            ATT_READ_BY_GROUP_TYPE_REQ => {
                let start = u16::from_le_bytes([req[1], req[2]]);
                if start == 0x0001 {
                    vec![vec![
                        ATT_READ_BY_GROUP_TYPE_RSP,
                        6,
                        0x01, 0x00, 0x07, 0x00, 0x00, 0x18, // 1..7 0x1800
                        0x08, 0x00, 0x0B, 0x00, 0x0A, 0x18, // 8..11 0x180A
                    ]]
                } else {
                    vec![error_rsp(ATT_READ_BY_GROUP_TYPE_REQ, req[1], req[2], 0x0A)]
                }
            }
            ATT_READ_BY_TYPE_REQ => {
                vec![error_rsp(ATT_READ_BY_TYPE_REQ, req[1], req[2], 0x0A)]
            }
            _ => Vec::new(),
        }));

        let services = client.discover_primary_services().unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].declaration.start_handle, 1);
        assert_eq!(services[0].declaration.end_handle, 7);
        assert_eq!(services[0].declaration.uuid, BleUuid::Uuid16(0x1800));
        assert_eq!(services[1].declaration.start_handle, 8);
        assert_eq!(services[1].declaration.end_handle, 11);
        assert_eq!(services[1].declaration.uuid, BleUuid::Uuid16(0x180A));

        // The second round asked from the last end group handle + 1.
        let written = mock.written();
        let second_group_req: Vec<&Vec<u8>> = written
            .iter()
            .filter(|pdu| pdu[0] == ATT_READ_BY_GROUP_TYPE_REQ)
            .collect();
        assert_eq!(second_group_req.len(), 2);
        assert_eq!(
            u16::from_le_bytes([second_group_req[1][1], second_group_req[1][2]]),
            12
        );
        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(client.services(), services);
        client.disconnect().unwrap();
    }

    #[test]
    fn characteristic_and_client_char_config_discovery() {
        let (client, _mock) = connected(scripted(512, |req| match req[0] {
            ATT_READ_BY_GROUP_TYPE_REQ => {
                let start = u16::from_le_bytes([req[1], req[2]]);
                if start == 0x0001 {
                    vec![vec![
                        ATT_READ_BY_GROUP_TYPE_RSP,
                        6,
                        0x01, 0x00, 0x0B, 0x00, 0x0D, 0x18, // 1..11 0x180D
                    ]]
                } else {
                    vec![error_rsp(ATT_READ_BY_GROUP_TYPE_REQ, req[1], req[2], 0x0A)]
                }
            }
            ATT_READ_BY_TYPE_REQ => {
                let start = u16::from_le_bytes([req[1], req[2]]);
                let attribute_type = u16::from_le_bytes([req[5], req[6]]);
                if attribute_type == GATT_CHARAC_UUID {
                    if start == 0x0001 {
                        // decl handle 2: props notify|read, value handle 3, uuid 0x2A37
                        vec![vec![
                            ATT_READ_BY_TYPE_RSP,
                            7,
                            0x02, 0x00, 0x12, 0x03, 0x00, 0x37, 0x2A,
                        ]]
                    } else {
                        vec![error_rsp(ATT_READ_BY_TYPE_REQ, req[1], req[2], 0x0A)]
                    }
                } else {
                    // client characteristic configuration at handle 4
                    if start == 0x0001 {
                        vec![vec![ATT_READ_BY_TYPE_RSP, 4, 0x04, 0x00, 0x00, 0x00]]
                    } else {
                        vec![error_rsp(ATT_READ_BY_TYPE_REQ, req[1], req[2], 0x0A)]
                    }
                }
            }
            _ => Vec::new(),
        }));

        let services = client.discover_primary_services().unwrap();
        assert_eq!(services.len(), 1);
        let service = &services[0];
        assert_eq!(service.characteristics.len(), 1);
        let decl = &service.characteristics[0];
        assert_eq!(decl.handle, 2);
        assert_eq!(decl.value_handle, 3);
        assert_eq!(decl.uuid, BleUuid::Uuid16(0x2A37));
        assert_eq!(decl.service_uuid, BleUuid::Uuid16(0x180D));
        assert_eq!(decl.service_handle_end, 11);
        assert!(decl.properties.contains(CharPropFlags::NOTIFY | CharPropFlags::READ));
        assert!(service.declaration.start_handle <= decl.value_handle);
        assert!(decl.value_handle <= service.declaration.end_handle);

        // CCCD handle 4 lies within (value handle 3, service end 11].
        assert_eq!(
            decl.config,
            Some(ClientCharConfig {
                handle: 4,
                value: 0,
            })
        );

        assert_eq!(client.find_characteristic(3).unwrap().uuid, decl.uuid);
        assert!(client.find_characteristic(2).is_none());
        client.disconnect().unwrap();
    }

    #[test]
    fn long_read_collects_expected_length() {
        let (client, mock) = connected(scripted(23, |req| match req[0] {
            ATT_READ_REQ => {
                let mut rsp = vec![ATT_READ_RSP];
                rsp.extend(std::iter::repeat(0xA0).take(22));
                vec![rsp]
            }
            ATT_READ_BLOB_REQ => {
                let offset = u16::from_le_bytes([req[3], req[4]]);
                let chunk = match offset {
                    22 | 44 => 22,
                    66 => 34,
                    _ => return vec![error_rsp(ATT_READ_BLOB_REQ, req[1], req[2], 0x07)],
                };
                let mut rsp = vec![ATT_READ_BLOB_RSP];
                rsp.extend(std::iter::repeat(0xA0).take(chunk));
                vec![rsp]
            }
            _ => Vec::new(),
        }));

        let decl = characteristic(0x0003);
        let value = client
            .read_characteristic_value(&decl, Some(100))
            .unwrap();
        assert_eq!(value.len(), 100);

        let offsets: Vec<u16> = mock
            .written()
            .iter()
            .filter(|pdu| pdu[0] == ATT_READ_BLOB_REQ)
            .map(|pdu| u16::from_le_bytes([pdu[3], pdu[4]]))
            .collect();
        assert_eq!(offsets, vec![22, 44, 66]);
        client.disconnect().unwrap();
    }

    #[test]
    fn read_stops_after_partial_pdu() {
        let (client, mock) = connected(scripted(512, |req| match req[0] {
            ATT_READ_REQ => vec![vec![ATT_READ_RSP, 1, 2, 3, 4, 5]],
            _ => Vec::new(),
        }));
        let decl = characteristic(0x0003);
        let value = client.read_characteristic_value(&decl, None).unwrap();
        assert_eq!(value, vec![1, 2, 3, 4, 5]);
        let reads = mock
            .written()
            .iter()
            .filter(|pdu| pdu[0] == ATT_READ_REQ || pdu[0] == ATT_READ_BLOB_REQ)
            .count();
        assert_eq!(reads, 1);
        client.disconnect().unwrap();
    }

    #[test]
    fn long_read_terminates_on_empty_blob() {
        let (client, _mock) = connected(scripted(23, |req| match req[0] {
            ATT_READ_REQ => {
                let mut rsp = vec![ATT_READ_RSP];
                rsp.extend(std::iter::repeat(0x55).take(22));
                vec![rsp]
            }
            ATT_READ_BLOB_REQ => vec![vec![ATT_READ_BLOB_RSP]],
            _ => Vec::new(),
        }));
        let decl = characteristic(0x0003);
        let value = client.read_characteristic_value(&decl, None).unwrap();
        assert_eq!(value.len(), 22);
        client.disconnect().unwrap();
    }

    #[test]
    fn long_read_terminates_on_attribute_not_long() {
        let (client, _mock) = connected(scripted(23, |req| match req[0] {
            ATT_READ_REQ => {
                let mut rsp = vec![ATT_READ_RSP];
                rsp.extend(std::iter::repeat(0x55).take(22));
                vec![rsp]
            }
            ATT_READ_BLOB_REQ => vec![error_rsp(ATT_READ_BLOB_REQ, req[1], req[2], 0x0B)],
            _ => Vec::new(),
        }));
        let decl = characteristic(0x0003);
        let value = client.read_characteristic_value(&decl, None).unwrap();
        assert_eq!(value.len(), 22);
        client.disconnect().unwrap();
    }

    #[test]
    fn read_with_zero_expected_length_is_single_request() {
        let (client, mock) = connected(scripted(23, |req| match req[0] {
            ATT_READ_REQ => {
                let mut rsp = vec![ATT_READ_RSP];
                rsp.extend(std::iter::repeat(0x55).take(22));
                vec![rsp]
            }
            _ => Vec::new(),
        }));
        let decl = characteristic(0x0003);
        let value = client.read_characteristic_value(&decl, Some(0)).unwrap();
        assert_eq!(value.len(), 22);
        assert!(mock
            .written()
            .iter()
            .all(|pdu| pdu[0] != ATT_READ_BLOB_REQ));
        client.disconnect().unwrap();
    }

    #[test]
    fn descriptor_discovery_accumulates_until_error_rsp() {
        let (client, mock) = connected(scripted(247, |req| match req[0] {
            ATT_FIND_INFORMATION_REQ => {
                let start = u16::from_le_bytes([req[1], req[2]]);
                if start == 0x0002 {
                    vec![vec![
                        ATT_FIND_INFORMATION_RSP,
                        0x01,
                        0x04, 0x00, 0x02, 0x29, // handle 4, cccd
                        0x05, 0x00, 0x01, 0x29, // handle 5, user description
                    ]]
                } else {
                    vec![error_rsp(ATT_FIND_INFORMATION_REQ, req[1], req[2], 0x0A)]
                }
            }
            _ => Vec::new(),
        }));
        let range = GattHandleRange {
            kind: HandleRangeKind::Service,
            start_handle: 0x0001,
            end_handle: 0x000B,
            uuid: BleUuid::Uuid16(0x180D),
        };
        let descriptors = client.discover_descriptors(&range).unwrap();
        assert_eq!(
            descriptors,
            vec![
                GattUuidHandle {
                    handle: 4,
                    uuid: BleUuid::Uuid16(0x2902),
                },
                GattUuidHandle {
                    handle: 5,
                    uuid: BleUuid::Uuid16(0x2901),
                },
            ]
        );
        // First request starts one past the service declaration handle.
        let first = mock
            .written()
            .iter()
            .find(|pdu| pdu[0] == ATT_FIND_INFORMATION_REQ)
            .unwrap()
            .clone();
        assert_eq!(u16::from_le_bytes([first[1], first[2]]), 0x0002);
        client.disconnect().unwrap();
    }

    #[test]
    fn config_indication_notification_writes_exact_value() {
        let (client, mock) = connected(scripted(247, |req| match req[0] {
            ATT_WRITE_REQ => vec![vec![ATT_WRITE_RSP]],
            _ => Vec::new(),
        }));
        let cccd = ClientCharConfig {
            handle: 0x0010,
            value: 0,
        };
        client
            .config_indication_notification(&cccd, true, false)
            .unwrap();
        let last = mock.written().pop().unwrap();
        assert_eq!(last, vec![ATT_WRITE_REQ, 0x10, 0x00, 0x01, 0x00]);
        client.disconnect().unwrap();
    }

    #[test]
    fn write_without_response_sends_command() {
        let (client, mock) = connected(scripted(247, |_| Vec::new()));
        let decl = characteristic(0x0003);
        client
            .write_characteristic_value_cmd(&decl, &[0xAA, 0xBB])
            .unwrap();
        let last = mock.written().pop().unwrap();
        assert_eq!(last, vec![ATT_WRITE_CMD, 0x03, 0x00, 0xAA, 0xBB]);
        client.disconnect().unwrap();
    }

    #[test]
    fn write_surfaces_error_response() {
        let (client, _mock) = connected(scripted(247, |req| match req[0] {
            ATT_WRITE_REQ => vec![error_rsp(ATT_WRITE_REQ, req[1], req[2], 0x03)],
            _ => Vec::new(),
        }));
        let decl = characteristic(0x0003);
        let err = client
            .write_characteristic_value(&decl, &[0x01])
            .unwrap_err();
        assert!(matches!(err, Error::Att { code: 0x03, .. }));
        assert_eq!(client.state(), ClientState::Connected);
        client.disconnect().unwrap();
    }

    #[test]
    fn unexpected_reply_terminates_procedure() {
        let (client, _mock) = connected(scripted(247, |req| match req[0] {
            ATT_READ_REQ => vec![vec![ATT_WRITE_RSP]],
            _ => Vec::new(),
        }));
        let decl = characteristic(0x0003);
        assert!(client.read_characteristic_value(&decl, None).is_err());
        assert_eq!(client.state(), ClientState::Connected);
        client.disconnect().unwrap();
    }

    #[test]
    fn notification_dispatch_reaches_listener() {
        let (client, mock) = connected(scripted(247, |_| Vec::new()));
        let received: Arc<Mutex<Vec<ValueNotification>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let previous = client.set_notification_listener(Some(Box::new(move |notification| {
            sink.lock().unwrap().push(notification);
        })));
        assert!(previous.is_none());

        mock.push_inbound(vec![ATT_HANDLE_VALUE_NTF, 0x03, 0x00, 1, 2, 3]);
        wait_until(|| !received.lock().unwrap().is_empty());

        let notification = received.lock().unwrap().remove(0);
        assert_eq!(notification.handle, 3);
        assert_eq!(notification.value, vec![1, 2, 3]);
        assert_eq!(notification.device, mock.device());
        assert!(notification.characteristic.is_none());

        let previous = client.set_notification_listener(None);
        assert!(previous.is_some());
        client.disconnect().unwrap();
    }

    #[test]
    fn indication_confirmation_sent_before_listener() {
        let (client, mock) = connected(scripted(247, |_| Vec::new()));
        let observer = mock.clone();
        client.set_indication_listener(
            Some(Box::new(move |indication| {
                observer.push_event(format!("listener:cfm={}", indication.confirmation_sent));
            })),
            true,
        );

        mock.push_inbound(vec![ATT_HANDLE_VALUE_IND, 0x03, 0x00, 0x2A]);
        wait_until(|| {
            mock.events()
                .iter()
                .any(|event| event.starts_with("listener"))
        });

        let events = mock.events();
        let cfm_at = events
            .iter()
            .position(|event| event == "write:0x1e")
            .expect("confirmation was written");
        let listener_at = events
            .iter()
            .position(|event| event == "listener:cfm=true")
            .expect("listener observed sent confirmation");
        assert!(cfm_at < listener_at);
        client.disconnect().unwrap();
    }

    #[test]
    fn indication_without_confirmation() {
        let (client, mock) = connected(scripted(247, |_| Vec::new()));
        let observer = mock.clone();
        client.set_indication_listener(
            Some(Box::new(move |indication| {
                observer.push_event(format!("listener:cfm={}", indication.confirmation_sent));
            })),
            false,
        );

        mock.push_inbound(vec![ATT_HANDLE_VALUE_IND, 0x03, 0x00, 0x2A]);
        wait_until(|| {
            mock.events()
                .iter()
                .any(|event| event.starts_with("listener"))
        });

        let events = mock.events();
        assert!(events.iter().any(|event| event == "listener:cfm=false"));
        assert!(events.iter().all(|event| event != "write:0x1e"));
        client.disconnect().unwrap();
    }

    #[test]
    fn listener_panic_does_not_kill_reader() {
        let (client, mock) = connected(scripted(247, |_| Vec::new()));
        client.set_notification_listener(Some(Box::new(|_| {
            panic!("listener failure");
        })));
        mock.push_inbound(vec![ATT_HANDLE_VALUE_NTF, 0x03, 0x00, 1]);

        let received: Arc<Mutex<Vec<ValueNotification>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        thread::sleep(Duration::from_millis(200));
        client.set_notification_listener(Some(Box::new(move |notification| {
            sink.lock().unwrap().push(notification);
        })));
        mock.push_inbound(vec![ATT_HANDLE_VALUE_NTF, 0x04, 0x00, 2]);
        wait_until(|| !received.lock().unwrap().is_empty());
        client.disconnect().unwrap();
    }

    #[test]
    fn disconnect_is_idempotent_and_restores_state() {
        let (client, _mock) = connected(scripted(247, |_| Vec::new()));
        client.disconnect().unwrap();
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(!client.shared.reader_running.load(Ordering::SeqCst));
        client.disconnect().unwrap();

        let decl = characteristic(0x0003);
        assert!(matches!(
            client.write_characteristic_value(&decl, &[0]),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn validate_state_detects_transport_mismatch() {
        let (client, mock) = connected(scripted(247, |_| Vec::new()));
        mock.force_close();
        assert!(matches!(
            client.validate_state(),
            Err(Error::InvalidState(_))
        ));
        client.disconnect().unwrap();
        assert!(client.validate_state().is_ok());
    }
}
