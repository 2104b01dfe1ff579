//! APDU descriptors and the Thai ID applet command catalogue.
//!
//! The byte values here are fixed by the card scheme. Changing them means
//! talking to a different card generation, so they are constants rather than
//! configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::decode::{decode_raw, decode_text, FieldValue};
use crate::core::utils::{describe_status_word, format_hex_spaced};

/// SELECT by AID, Lc = 8.
pub const SELECT: [u8; 5] = [0x00, 0xA4, 0x04, 0x00, 0x08];

/// Thai national ID applet identifier.
pub const APPLET_ID: [u8; 8] = [0xA0, 0x00, 0x00, 0x00, 0x54, 0x48, 0x00, 0x01];

/// First two ATR bytes reported by legacy readers that need the alternate
/// GET RESPONSE variant.
pub const LEGACY_ATR_PREFIX: [u8; 2] = [0x3B, 0x67];

/// Base instruction for photo segments; the segment index goes at
/// [`PHOTO_SEGMENT_OFFSET`].
pub const PHOTO_BASE: [u8; 7] = [0x80, 0xB0, 0x00, 0x78, 0x00, 0x00, 0xFF];

/// Position of the segment selector inside [`PHOTO_BASE`].
pub const PHOTO_SEGMENT_OFFSET: usize = 4;

/// Decoder applied to the fetched payload of a command.
pub type Decoder = fn(&[u8]) -> FieldValue;

/// Instruction prefix used for the fetch phase of every read.
///
/// Chosen once from the ATR at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadVariant {
    /// `00 C0 00 01`, for readers whose ATR starts with `3B 67`.
    Legacy,
    /// `00 C0 00 00`
    Standard,
}

impl ReadVariant {
    pub fn from_atr(atr: &[u8]) -> Self {
        if atr.starts_with(&LEGACY_ATR_PREFIX) {
            ReadVariant::Legacy
        } else {
            ReadVariant::Standard
        }
    }

    pub const fn prefix(self) -> [u8; 4] {
        match self {
            ReadVariant::Legacy => [0x00, 0xC0, 0x00, 0x01],
            ReadVariant::Standard => [0x00, 0xC0, 0x00, 0x00],
        }
    }

    /// Build the fetch APDU for an instruction: prefix plus the requested
    /// length (the instruction's last byte).
    pub fn fetch_for(self, instruction: &[u8]) -> Vec<u8> {
        let mut fetch = self.prefix().to_vec();
        if let Some(&le) = instruction.last() {
            fetch.push(le);
        }
        fetch
    }
}

/// Two-byte status trailer of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusWord {
    pub sw1: u8,
    pub sw2: u8,
}

impl StatusWord {
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// `90 00`, or `61 xx` (more data available).
    pub const fn is_success(&self) -> bool {
        matches!((self.sw1, self.sw2), (0x90, 0x00) | (0x61, _))
    }

    pub fn describe(&self) -> String {
        describe_status_word(self.sw1, self.sw2)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X}", self.sw1, self.sw2)
    }
}

/// Payload and status word of one transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub data: Vec<u8>,
    pub status: StatusWord,
}

impl RawResponse {
    pub fn new(data: Vec<u8>, sw1: u8, sw2: u8) -> Self {
        Self {
            data,
            status: StatusWord::new(sw1, sw2),
        }
    }

    /// Split a response APDU into data and trailer. Responses shorter than
    /// two bytes carry no status; they are kept as data with `00 00`.
    pub fn from_rapdu(rapdu: &[u8]) -> Self {
        if rapdu.len() < 2 {
            return Self::new(rapdu.to_vec(), 0x00, 0x00);
        }
        let (data, sw) = rapdu.split_at(rapdu.len() - 2);
        Self::new(data.to_vec(), sw[0], sw[1])
    }
}

/// Immutable description of one field read: instruction, diagnostic label
/// and payload decoder.
#[derive(Clone, Copy)]
pub struct ApduCommand {
    pub instruction: [u8; 7],
    pub label: &'static str,
    pub decoder: Decoder,
}

impl ApduCommand {
    /// Command whose payload is Thai text.
    pub const fn text(instruction: [u8; 7], label: &'static str) -> Self {
        Self {
            instruction,
            label,
            decoder: decode_text,
        }
    }

    /// Command whose payload is returned untouched.
    pub const fn raw(instruction: [u8; 7], label: &'static str) -> Self {
        Self {
            instruction,
            label,
            decoder: decode_raw,
        }
    }

    pub const fn with_decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// Requested response length (Le).
    pub const fn requested_length(&self) -> u8 {
        self.instruction[6]
    }

    pub fn decode(&self, data: &[u8]) -> FieldValue {
        (self.decoder)(data)
    }

    /// Photo segment command for a 1-based segment index.
    pub fn photo_segment(index: u8) -> Self {
        let mut instruction = PHOTO_BASE;
        instruction[PHOTO_SEGMENT_OFFSET] = index;
        Self::raw(instruction, "Photo")
    }
}

impl fmt::Debug for ApduCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApduCommand")
            .field("instruction", &format_hex_spaced(&self.instruction))
            .field("label", &self.label)
            .finish()
    }
}

/// Fields stored by the Thai ID applet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Cid,
    ThaiFullName,
    EnglishFullName,
    DateOfBirth,
    Gender,
    Issuer,
    IssueDate,
    ExpiryDate,
    Address,
}

impl Field {
    pub const ALL: [Field; 9] = [
        Field::Cid,
        Field::ThaiFullName,
        Field::EnglishFullName,
        Field::DateOfBirth,
        Field::Gender,
        Field::Issuer,
        Field::IssueDate,
        Field::ExpiryDate,
        Field::Address,
    ];

    pub const fn command(self) -> ApduCommand {
        match self {
            Field::Cid => ApduCommand::text([0x80, 0xB0, 0x00, 0x04, 0x02, 0x00, 0x0D], "CID"),
            Field::ThaiFullName => {
                ApduCommand::text([0x80, 0xB0, 0x00, 0x11, 0x02, 0x00, 0x64], "TH Fullname")
            }
            Field::EnglishFullName => {
                ApduCommand::text([0x80, 0xB0, 0x00, 0x75, 0x02, 0x00, 0x64], "EN Fullname")
            }
            Field::DateOfBirth => {
                ApduCommand::text([0x80, 0xB0, 0x00, 0xD9, 0x02, 0x00, 0x08], "Date of birth")
            }
            Field::Gender => ApduCommand::text([0x80, 0xB0, 0x00, 0xE1, 0x02, 0x00, 0x01], "Gender"),
            Field::Issuer => {
                ApduCommand::text([0x80, 0xB0, 0x00, 0xF6, 0x02, 0x00, 0x64], "Card Issuer")
            }
            Field::IssueDate => {
                ApduCommand::text([0x80, 0xB0, 0x01, 0x67, 0x02, 0x00, 0x08], "Issue Date")
            }
            Field::ExpiryDate => {
                ApduCommand::text([0x80, 0xB0, 0x01, 0x6F, 0x02, 0x00, 0x08], "Expire Date")
            }
            Field::Address => {
                ApduCommand::text([0x80, 0xB0, 0x15, 0x79, 0x02, 0x00, 0x64], "Address")
            }
        }
    }

    pub const fn label(self) -> &'static str {
        self.command().label
    }

    /// Stable snake_case key used in profiles and on the command line.
    pub const fn key(self) -> &'static str {
        match self {
            Field::Cid => "cid",
            Field::ThaiFullName => "thai_full_name",
            Field::EnglishFullName => "english_full_name",
            Field::DateOfBirth => "date_of_birth",
            Field::Gender => "gender",
            Field::Issuer => "issuer",
            Field::IssueDate => "issue_date",
            Field::ExpiryDate => "expiry_date",
            Field::Address => "address",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        Field::ALL
            .into_iter()
            .find(|field| field.key() == wanted)
            .ok_or_else(|| format!("Unknown field: {s}"))
    }
}
