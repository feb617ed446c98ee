//! Line encoding and decoding.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::constants::ERROR_PREFIX;
use crate::error::ProtoError;
use crate::limits::MAX_LINE_LEN;
use crate::messages::PartyCode;

/// Encode a message as a single JSON line, terminator included.
pub fn encode_line<T: Serialize>(msg: &T) -> Result<Bytes, ProtoError> {
    let mut out = serde_json::to_vec(msg)?;
    if out.len() > MAX_LINE_LEN {
        return Err(ProtoError::LineTooLong(out.len()));
    }
    out.push(b'\n');
    Ok(Bytes::from(out))
}

/// Encode a bare text line (party code, member count, error reply).
pub fn encode_raw_line(text: &str) -> Result<Bytes, ProtoError> {
    if text.contains('\n') {
        return Err(ProtoError::EmbeddedNewline);
    }
    if text.len() > MAX_LINE_LEN {
        return Err(ProtoError::LineTooLong(text.len()));
    }
    let mut out = Vec::with_capacity(text.len() + 1);
    out.extend_from_slice(text.as_bytes());
    out.push(b'\n');
    Ok(Bytes::from(out))
}

/// Decode one JSON line. The terminator must already be stripped; a trailing
/// `\r` is tolerated.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, ProtoError> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return Err(ProtoError::Empty);
    }
    Ok(serde_json::from_str(line)?)
}

/// Reply to the initial request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerReply {
    /// Party created or joined.
    Accepted(PartyCode),
    /// Request refused; carries the full error line.
    Rejected(String),
}

impl ServerReply {
    pub fn parse(line: &str) -> Result<Self, ProtoError> {
        let line = line.trim();
        if line.starts_with(ERROR_PREFIX) {
            return Ok(Self::Rejected(line.to_string()));
        }
        PartyCode::parse(line)
            .map(Self::Accepted)
            .map_err(|_| ProtoError::UnexpectedReply(line.to_string()))
    }
}

/// Parse a member-count line sent to the host.
pub fn parse_member_count(line: &str) -> Result<usize, ProtoError> {
    let line = line.trim();
    line.parse()
        .map_err(|_| ProtoError::UnexpectedReply(line.to_string()))
}
