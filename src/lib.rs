// bleclient Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.

//! bleclient is a host-side Bluetooth Low Energy client library. It decodes
//! LE advertising / Extended Inquiry Response (EIR) payloads into
//! [`protocol::eir::EirReport`] records, and drives a client-side GATT engine
//! ([`gatt::GattClient`]) that speaks the Attribute Protocol over an L2CAP
//! connection-oriented channel supplied by the caller.
//!
//! The L2CAP transport itself is not part of this crate: callers provide an
//! implementation of [`gatt::l2cap::L2capChannel`], typically backed by a
//! `BTPROTO_L2CAP` socket bound to the ATT channel.
//!
//! ```no_run
//! use bleclient::gatt::GattClient;
//! # fn example(channel: Box<dyn bleclient::gatt::l2cap::L2capChannel>) -> bleclient::Result<()> {
//! let client = GattClient::new(channel);
//! client.connect()?;
//! for service in client.discover_primary_services()? {
//!     println!("{}", service.declaration.uuid);
//! }
//! client.disconnect()?;
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

pub mod api;
pub mod constants;
pub mod gatt;
pub mod octets;
pub mod protocol;

#[derive(Debug, Error)]
pub enum Error {
    /// The caller supplied an invalid value, e.g. an MTU beyond the client
    /// maximum or a PDU larger than the negotiated MTU.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine and its transport disagree on open-ness.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// Bounds-checked octet access outside the backing store.
    #[error("octet access out of range: offset {offset} + length {length} > size {size}")]
    IndexOutOfRange {
        offset: usize,
        length: usize,
        size: usize,
    },

    #[error("invalid Bluetooth address: {0}")]
    InvalidBdAddr(String),

    #[error("not connected")]
    NotConnected,

    /// The L2CAP channel reported a non-timeout read/write failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A received PDU could not be interpreted in the current context.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered a request with `ATT_ERROR_RSP`.
    #[error("attribute error response: request opcode 0x{opcode:02x}, handle 0x{handle:04x}, code 0x{code:02x}")]
    Att { opcode: u8, handle: u16, code: u8 },

    #[error("timed out")]
    TimedOut,
}

pub type Result<T> = std::result::Result<T, Error>;
