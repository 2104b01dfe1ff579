//! Thai ID Reader - PC/SC access to Thai national ID cards
//!
//! This library connects to a contact reader, selects the ID applet, reads
//! text fields and assembles the photograph. The `cli` module is the
//! command-line front end built on top of it.
pub mod cli;
pub mod core;

// Re-export commonly used types
pub use crate::core::{
    apdu::{ApduCommand, Field, RawResponse, ReadVariant, StatusWord},
    card::{CardHandle, SessionState, DEFAULT_PHOTO_SEGMENTS},
    config::ReaderConfig,
    decode::{thai_to_unicode, FieldValue},
    error::{CardError, ConnectionError},
    format::{format_cid_hyphenated, format_cid_spaced, format_thai_date, ThaiDate},
    policy::{LenientStatusPolicy, StatusPolicy, StatusPolicyKind, StrictStatusPolicy},
    profile::{read_profile, CardProfile},
    reader::{enumerate_readers, CardChannel, PcscChannel, PcscReader, Reader},
    transcript::{ExchangeRecord, Phase, Transcript},
    utils::{describe_status_word, format_hex, format_hex_spaced},
};

// Common error type
pub type Result<T> = anyhow::Result<T>;
