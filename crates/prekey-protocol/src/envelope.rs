//! Text envelope around binary messages: standard base64 followed by `.`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::ProtocolError;

pub const TERMINATOR: char = '.';

pub fn encode(message: &[u8]) -> String {
    let mut out = STANDARD.encode(message);
    out.push(TERMINATOR);
    out
}

pub fn decode(envelope: &str) -> Result<Vec<u8>, ProtocolError> {
    let payload = envelope
        .strip_suffix(TERMINATOR)
        .ok_or(ProtocolError::MissingPunctuation)?;
    STANDARD
        .decode(payload)
        .map_err(|_| ProtocolError::CorruptBase64)
}
