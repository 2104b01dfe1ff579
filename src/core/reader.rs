use std::ffi::CString;
use std::fmt;

use pcsc::{Card, Context, Protocols, Scope, ShareMode, MAX_BUFFER_SIZE};
use serde::{Deserialize, Serialize};

use crate::core::apdu::RawResponse;
use crate::core::error::ConnectionError;
use crate::core::utils::format_hex_spaced;

/// Information about a PCSC reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reader {
    pub name: String,
    pub card_present: bool,
    pub atr: Option<Vec<u8>>,
}

/// Low-level channel to one reader slot.
///
/// A channel is opened once and then carries strictly ordered
/// request/response pairs; it is never shared between sessions.
#[cfg_attr(test, mockall::automock)]
pub trait CardChannel {
    /// Open the connection and return the card's answer-to-reset.
    fn open(&mut self) -> Result<Vec<u8>, ConnectionError>;

    /// Send one command APDU and wait for the response.
    fn transmit(&mut self, apdu: &[u8]) -> Result<RawResponse, pcsc::Error>;
}

/// How the connection is shared with other PC/SC clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareModeSetting {
    /// A second session on the same reader fails with a sharing violation.
    #[default]
    Exclusive,
    Shared,
}

impl From<ShareModeSetting> for ShareMode {
    fn from(mode: ShareModeSetting) -> Self {
        match mode {
            ShareModeSetting::Exclusive => ShareMode::Exclusive,
            ShareModeSetting::Shared => ShareMode::Shared,
        }
    }
}

impl std::str::FromStr for ShareModeSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exclusive" => Ok(ShareModeSetting::Exclusive),
            "shared" => Ok(ShareModeSetting::Shared),
            _ => Err(format!("Invalid share mode: {s}")),
        }
    }
}

/// PCSC context wrapper used to enumerate readers and open channels
pub struct PcscReader {
    context: Context,
}

impl PcscReader {
    /// Establish a PCSC context
    pub fn new() -> Result<Self, ConnectionError> {
        let context = Context::establish(Scope::User).map_err(|e| match e {
            pcsc::Error::NoService | pcsc::Error::ServiceStopped => {
                ConnectionError::ServiceUnavailable
            }
            other => ConnectionError::Pcsc(other),
        })?;

        Ok(Self { context })
    }

    /// List all available readers. An empty list means no reader is attached.
    pub fn list_readers(&self) -> Result<Vec<Reader>, ConnectionError> {
        let names = reader_names(self.context.list_readers_owned())?;

        let mut reader_infos = Vec::with_capacity(names.len());
        for name in names {
            let (card_present, atr) = self.reader_status(&name);
            reader_infos.push(Reader {
                name,
                card_present,
                atr,
            });
        }

        Ok(reader_infos)
    }

    /// Probe a reader with a short shared connection to read card presence and ATR
    fn reader_status(&self, reader_name: &str) -> (bool, Option<Vec<u8>>) {
        let Ok(reader_cstr) = CString::new(reader_name) else {
            return (false, None);
        };

        match self
            .context
            .connect(&reader_cstr, ShareMode::Shared, Protocols::ANY)
        {
            Ok(card) => match card.status2_owned() {
                Ok(status) => (true, Some(status.atr().to_vec())),
                Err(_) => (true, None),
            },
            Err(_) => (false, None),
        }
    }

    /// Prepare a channel to the named reader. Nothing is opened until
    /// [`CardChannel::open`] is called.
    pub fn channel(
        &self,
        reader_name: &str,
        share_mode: ShareModeSetting,
    ) -> Result<PcscChannel, ConnectionError> {
        let reader = CString::new(reader_name)
            .map_err(|_| ConnectionError::InvalidReaderName(reader_name.to_string()))?;

        Ok(PcscChannel {
            context: self.context.clone(),
            reader,
            share_mode,
            card: None,
        })
    }
}

/// Interpret a reader listing; PC/SC reports "no readers" as an error.
fn reader_names(listing: Result<Vec<CString>, pcsc::Error>) -> Result<Vec<String>, ConnectionError> {
    match listing {
        Ok(names) => Ok(names
            .into_iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect()),
        Err(pcsc::Error::NoReadersAvailable) => Ok(Vec::new()),
        Err(pcsc::Error::NoService) | Err(pcsc::Error::ServiceStopped) => {
            Err(ConnectionError::ServiceUnavailable)
        }
        Err(e) => Err(ConnectionError::Pcsc(e)),
    }
}

/// List the readers attached to this machine.
pub fn enumerate_readers() -> Result<Vec<Reader>, ConnectionError> {
    PcscReader::new()?.list_readers()
}

/// Resolve a reader given either its index in `readers` or its exact name.
pub fn resolve_reader(readers: &[Reader], name_or_index: &str) -> Result<String, ConnectionError> {
    if readers.is_empty() {
        return Err(ConnectionError::NoReaders);
    }

    if let Ok(index) = name_or_index.trim().parse::<usize>() {
        return readers
            .get(index)
            .map(|r| r.name.clone())
            .ok_or_else(|| ConnectionError::UnknownReader(name_or_index.to_string()));
    }

    readers
        .iter()
        .find(|r| r.name == name_or_index)
        .map(|r| r.name.clone())
        .ok_or_else(|| ConnectionError::UnknownReader(name_or_index.to_string()))
}

/// Live PC/SC connection to one reader
pub struct PcscChannel {
    context: Context,
    reader: CString,
    share_mode: ShareModeSetting,
    card: Option<Card>,
}

impl PcscChannel {
    pub fn reader_name(&self) -> String {
        self.reader.to_string_lossy().to_string()
    }
}

impl CardChannel for PcscChannel {
    fn open(&mut self) -> Result<Vec<u8>, ConnectionError> {
        let name = self.reader_name();
        if self.card.is_some() {
            return Err(ConnectionError::AlreadyConnected);
        }

        log::info!("Connecting to reader: {name}");
        let card = self
            .context
            .connect(&self.reader, self.share_mode.into(), Protocols::ANY)
            .map_err(|e| ConnectionError::from_connect(&name, e))?;

        let atr = card
            .status2_owned()
            .map_err(|e| ConnectionError::from_connect(&name, e))?
            .atr()
            .to_vec();

        log::info!("ATR: {}", format_hex_spaced(&atr));
        self.card = Some(card);
        Ok(atr)
    }

    fn transmit(&mut self, apdu: &[u8]) -> Result<RawResponse, pcsc::Error> {
        let card = self.card.as_ref().ok_or(pcsc::Error::InvalidHandle)?;

        let mut response_buf = [0; MAX_BUFFER_SIZE];
        let rapdu = card.transmit(apdu, &mut response_buf)?;
        Ok(RawResponse::from_rapdu(rapdu))
    }
}

impl fmt::Debug for PcscChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscChannel")
            .field("reader", &self.reader)
            .field("share_mode", &self.share_mode)
            .field("connected", &self.card.is_some())
            .finish()
    }
}

impl Drop for PcscChannel {
    fn drop(&mut self) {
        if let Some(card) = self.card.take() {
            let _ = card
                .disconnect(pcsc::Disposition::LeaveCard)
                .map_err(|_e| log::warn!("Failed to disconnect cleanly from card"));
            log::info!("Disconnected from reader");
        }
    }
}
