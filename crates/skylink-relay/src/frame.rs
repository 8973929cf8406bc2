//! Datagram layout on the shared relay port.
//!
//! - data: `<vehicle_id>:<raw flight-controller bytes>`
//! - handshake: `DRONE:<vehicle_id>`, once at startup
//! - liveness: `HEARTBEAT:<vehicle_id>`
//!
//! Identifiers are restricted to `[A-Za-z0-9_-]` so the `:` after the id is
//! always the separator and no id can be mistaken for another id's prefix.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::RelayError;

pub const SEPARATOR: u8 = b':';
pub const MAX_ID_LEN: usize = 64;

const HANDSHAKE_TAG: &str = "DRONE";
const HEARTBEAT_TAG: &str = "HEARTBEAT";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VehicleId(String);

impl VehicleId {
    pub fn parse(id: &str) -> Result<Self, RelayError> {
        let invalid = |reason| Err(RelayError::InvalidVehicleId { id: id.to_string(), reason });
        if id.is_empty() {
            return invalid("empty");
        }
        if id.len() > MAX_ID_LEN {
            return invalid("longer than 64 bytes");
        }
        if !id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
            return invalid("only ASCII letters, digits, '_' and '-' are allowed");
        }
        if id == HANDSHAKE_TAG || id == HEARTBEAT_TAG {
            return invalid("reserved for relay control messages");
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for VehicleId {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn tagged(tag: &str, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(tag.len() + 1 + body.len());
    out.put_slice(tag.as_bytes());
    out.put_u8(SEPARATOR);
    out.put_slice(body);
    out.freeze()
}

pub fn data_frame(id: &VehicleId, payload: &[u8]) -> Bytes {
    tagged(id.as_str(), payload)
}

pub fn handshake(id: &VehicleId) -> Bytes {
    tagged(HANDSHAKE_TAG, id.as_str().as_bytes())
}

pub fn heartbeat(id: &VehicleId) -> Bytes {
    tagged(HEARTBEAT_TAG, id.as_str().as_bytes())
}

/// Payload of a data frame addressed to `id`, or `None` for anything else.
pub fn strip_data_frame<'a>(id: &VehicleId, datagram: &'a [u8]) -> Option<&'a [u8]> {
    datagram
        .strip_prefix(id.as_str().as_bytes())?
        .strip_prefix(&[SEPARATOR])
}
