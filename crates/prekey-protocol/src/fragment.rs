//! Fragment text format and in-order reassembly of one fragmented message.
//!
//! A fragment reads `?OTRP|<id>|<sender>|<receiver>,<index>,<total>,<piece>,`
//! where `id` is decimal, the two tags are hex and `index` is 1-based.
//! Pieces are slices of the complete envelope, terminator included.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ProtocolError;

pub const FRAGMENT_PREFIX: &str = "?OTRP|";
pub const SENDER_TAG: u32 = 0xBEEF;
pub const RECEIVER_TAG: u32 = 0xCADE;
/// Width of the largest possible header, `?OTRP|4294967295|FFFFFFFF|FFFFFFFF,65535,65535,`.
pub const FRAGMENT_OVERHEAD: usize = 47;

pub fn is_fragment(text: &str) -> bool {
    text.starts_with(FRAGMENT_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub identifier: u32,
    pub sender_tag: u32,
    pub receiver_tag: u32,
    pub index: u16,
    pub total: u16,
    pub piece: String,
}

impl Fragment {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let body = text
            .strip_prefix(FRAGMENT_PREFIX)
            .and_then(|rest| rest.strip_suffix(','))
            .ok_or(ProtocolError::Fragmentation)?;

        let fields: Vec<&str> = body.split(',').collect();
        let [head, index, total, piece] = fields.as_slice() else {
            return Err(ProtocolError::Fragmentation);
        };
        let tags: Vec<&str> = head.split('|').collect();
        let [identifier, sender, receiver] = tags.as_slice() else {
            return Err(ProtocolError::Fragmentation);
        };

        let fragment = Self {
            identifier: identifier.parse().map_err(|_| ProtocolError::Fragmentation)?,
            sender_tag: u32::from_str_radix(sender, 16).map_err(|_| ProtocolError::Fragmentation)?,
            receiver_tag: u32::from_str_radix(receiver, 16)
                .map_err(|_| ProtocolError::Fragmentation)?,
            index: index.parse().map_err(|_| ProtocolError::Fragmentation)?,
            total: total.parse().map_err(|_| ProtocolError::Fragmentation)?,
            piece: (*piece).to_string(),
        };
        if fragment.index == 0 || fragment.index > fragment.total {
            return Err(ProtocolError::Fragmentation);
        }
        Ok(fragment)
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{FRAGMENT_PREFIX}{}|{:X}|{:X},{},{},{},",
            self.identifier, self.sender_tag, self.receiver_tag, self.index, self.total, self.piece
        )
    }
}

/// Split `encoded` into fragments whose pieces hold at most `piece_len`
/// characters.
pub fn split(
    encoded: &str,
    piece_len: usize,
    identifier: u32,
) -> Result<Vec<Fragment>, ProtocolError> {
    let chunks: Vec<&[u8]> = encoded.as_bytes().chunks(piece_len.max(1)).collect();
    let total = u16::try_from(chunks.len()).map_err(|_| {
        ProtocolError::Serialization(format!("{} fragments exceed the limit", chunks.len()))
    })?;
    chunks
        .into_iter()
        .zip(1..=total)
        .map(|(chunk, index)| {
            let piece = std::str::from_utf8(chunk).map_err(|_| {
                ProtocolError::Serialization("fragment split inside a character".into())
            })?;
            Ok(Fragment {
                identifier,
                sender_tag: SENDER_TAG,
                receiver_tag: RECEIVER_TAG,
                index,
                total,
                piece: piece.to_string(),
            })
        })
        .collect()
}

/// Render `encoded` as transport messages no longer than `max_len`.
///
/// A `max_len` of zero disables fragmentation. Otherwise anything longer
/// than one piece is split.
pub fn fragment_message(
    encoded: String,
    max_len: usize,
    identifier: u32,
) -> Result<Vec<String>, ProtocolError> {
    if max_len == 0 {
        return Ok(vec![encoded]);
    }
    let piece_len = max_len.saturating_sub(FRAGMENT_OVERHEAD).max(1);
    if encoded.len() <= piece_len {
        return Ok(vec![encoded]);
    }
    Ok(split(&encoded, piece_len, identifier)?
        .iter()
        .map(ToString::to_string)
        .collect())
}

/// Pieces received so far for one fragmented message.
#[derive(Debug, Clone, Default)]
pub struct Reassembly {
    total: u16,
    pieces: BTreeMap<u16, String>,
}

impl Reassembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `fragment`. A total that disagrees with earlier pieces of the
    /// same message is an error and leaves the state untouched.
    pub fn add(&mut self, fragment: Fragment) -> Result<(), ProtocolError> {
        if self.pieces.is_empty() {
            self.total = fragment.total;
        } else if self.total != fragment.total {
            return Err(ProtocolError::Fragmentation);
        }
        self.pieces.insert(fragment.index, fragment.piece);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.pieces.len() == usize::from(self.total)
    }

    /// Concatenate pieces in index order, or `None` if some are missing.
    pub fn assemble(&self) -> Option<String> {
        self.is_complete()
            .then(|| self.pieces.values().map(String::as_str).collect())
    }
}
