use std::path::PathBuf;

use thiserror::Error;

/// Failures while opening a session with a reader.
///
/// These are fatal to a read session. The messages are written for the
/// operator at the desk, not for a developer.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("No smart card readers found")]
    NoReaders,

    #[error("Cannot reach the smart card service, please start the Smart Card service")]
    ServiceUnavailable,

    #[error("Reader '{reader}' is in use by another session")]
    ReaderClaimed { reader: String },

    #[error("No card inserted in reader '{reader}'")]
    NoCard { reader: String },

    #[error("Unknown reader: {0}")]
    UnknownReader(String),

    #[error("Invalid reader name: {0}")]
    InvalidReaderName(String),

    #[error("Session is already connected")]
    AlreadyConnected,

    #[error("Session has faulted; open a new session to retry")]
    SessionFaulted,

    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),
}

impl ConnectionError {
    /// Map a PC/SC connect failure to the operator-facing variant.
    pub fn from_connect(reader: &str, err: pcsc::Error) -> Self {
        match err {
            pcsc::Error::NoService | pcsc::Error::ServiceStopped => Self::ServiceUnavailable,
            pcsc::Error::NoReadersAvailable => Self::NoReaders,
            pcsc::Error::SharingViolation => Self::ReaderClaimed {
                reader: reader.to_string(),
            },
            pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard => Self::NoCard {
                reader: reader.to_string(),
            },
            pcsc::Error::UnknownReader | pcsc::Error::ReaderUnavailable => {
                Self::UnknownReader(reader.to_string())
            }
            other => Self::Pcsc(other),
        }
    }
}

/// Errors raised by a [`CardHandle`](crate::core::card::CardHandle).
#[derive(Debug, Error)]
pub enum CardError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Transmit failed during {label}: {source}")]
    Transport {
        label: String,
        #[source]
        source: pcsc::Error,
    },

    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("{step} returned status {sw1:02X} {sw2:02X}")]
    Status { step: String, sw1: u8, sw2: u8 },

    #[error("Photo segment {index} could not be read")]
    SegmentRead {
        index: usize,
        #[source]
        source: Box<CardError>,
    },

    #[error("Segment count must be between 1 and 255, got {0}")]
    InvalidSegmentCount(usize),

    #[error("Identity '{0}' cannot be used as a file name")]
    InvalidIdentity(String),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
