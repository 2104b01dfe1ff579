//! Card session: connect, select the applet, then read fields and the photo.
//!
//! Every field read is a probe/fetch pair. The probe sends the field's own
//! instruction and its response is discarded; the fetch sends the read
//! variant prefix plus the requested length and carries the real payload.
//! Target readers return stale or empty data if the probe is skipped.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;

use crate::core::apdu::{ApduCommand, Field, RawResponse, ReadVariant, StatusWord, APPLET_ID, SELECT};
use crate::core::config::ReaderConfig;
use crate::core::decode::FieldValue;
use crate::core::error::{CardError, ConnectionError};
use crate::core::policy::{LenientStatusPolicy, StatusPolicy};
use crate::core::reader::CardChannel;
use crate::core::transcript::{ExchangeRecord, Phase, Transcript};
use crate::core::utils::format_hex_spaced;

/// Default upper bound on photo segments.
pub const DEFAULT_PHOTO_SEGMENTS: usize = 20;

/// Lifecycle of a [`CardHandle`]. States only move forward; a handle that
/// hit an error is `Faulted` and must be replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connected,
    AppletSelected,
    Reading,
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unconnected => "unconnected",
            SessionState::Connected => "connected",
            SessionState::AppletSelected => "applet-selected",
            SessionState::Reading => "reading",
            SessionState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// One read session against one card.
pub struct CardHandle<C: CardChannel> {
    channel: C,
    state: SessionState,
    atr: Vec<u8>,
    read_variant: Option<ReadVariant>,
    policy: Box<dyn StatusPolicy>,
    photo_dir: PathBuf,
    transcript: Transcript,
}

impl<C: CardChannel> CardHandle<C> {
    /// Handle with the lenient status policy, writing photos to the current
    /// directory.
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            state: SessionState::Unconnected,
            atr: Vec::new(),
            read_variant: None,
            policy: Box::new(LenientStatusPolicy),
            photo_dir: PathBuf::from("."),
            transcript: Transcript::new(),
        }
    }

    pub fn with_config(channel: C, config: &ReaderConfig) -> Self {
        Self::new(channel)
            .with_policy(config.status_policy.build())
            .with_photo_dir(&config.photo_dir)
    }

    pub fn with_policy(mut self, policy: Box<dyn StatusPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_photo_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.photo_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn atr(&self) -> &[u8] {
        &self.atr
    }

    /// Read variant chosen at connect time; `None` before connecting.
    pub fn read_variant(&self) -> Option<ReadVariant> {
        self.read_variant
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Open the channel, record the ATR and fix the read variant for the
    /// rest of the session.
    pub fn connect(&mut self) -> Result<(), ConnectionError> {
        match self.state {
            SessionState::Unconnected => {}
            SessionState::Faulted => return Err(ConnectionError::SessionFaulted),
            _ => return Err(ConnectionError::AlreadyConnected),
        }

        let atr = match self.channel.open() {
            Ok(atr) => atr,
            Err(e) => {
                log::error!("Connect failed: {e}");
                self.state = SessionState::Faulted;
                return Err(e);
            }
        };

        let variant = ReadVariant::from_atr(&atr);
        log::info!("ATR: {} ({variant:?} read variant)", format_hex_spaced(&atr));

        self.atr = atr;
        self.read_variant = Some(variant);
        self.state = SessionState::Connected;
        Ok(())
    }

    /// Select the Thai ID applet. The status word is returned for
    /// diagnostics; whether a failure status is fatal is up to the policy.
    pub fn select_applet(&mut self) -> Result<StatusWord, CardError> {
        self.require("select applet", &[SessionState::Connected])?;

        let mut apdu = SELECT.to_vec();
        apdu.extend_from_slice(&APPLET_ID);

        let response = self.exchange(Phase::Select, "Select Applet", &apdu)?;
        let status = response.status;
        log::info!("Select Applet: {status} ({})", status.describe());

        if let Err(e) = self.policy.check("Select Applet", status) {
            self.state = SessionState::Faulted;
            return Err(e);
        }

        self.state = SessionState::AppletSelected;
        Ok(status)
    }

    /// Run the probe/fetch exchange for one instruction and return the fetch
    /// payload.
    pub fn get_data(&mut self, label: &str, instruction: &[u8]) -> Result<Vec<u8>, CardError> {
        self.require(
            "read data",
            &[SessionState::AppletSelected, SessionState::Reading],
        )?;
        let variant = self.read_variant.ok_or_else(|| CardError::InvalidState {
            operation: "read data",
            state: self.state.to_string(),
        })?;
        self.state = SessionState::Reading;

        let probe = self.exchange(Phase::Probe, label, instruction)?;
        log::debug!("{label} probe status {} ignored", probe.status);

        let fetch = variant.fetch_for(instruction);
        let response = self.exchange(Phase::Fetch, label, &fetch)?;

        if let Err(e) = self.policy.check(label, response.status) {
            self.state = SessionState::Faulted;
            return Err(e);
        }

        Ok(response.data)
    }

    /// Read and decode one field.
    pub fn read_field(&mut self, command: &ApduCommand) -> Result<FieldValue, CardError> {
        let data = self.get_data(command.label, &command.instruction)?;
        let value = command.decode(&data);
        log::info!("{}: {}", command.label, value);
        Ok(value)
    }

    /// Read a catalogue field as text.
    pub fn read_text(&mut self, field: Field) -> Result<String, CardError> {
        self.read_field(&field.command()).map(FieldValue::into_text)
    }

    /// Assemble the photo from segments `1..=segments`, in order. Any failed
    /// segment aborts the whole read.
    pub fn read_photo_bytes(&mut self, segments: usize) -> Result<Vec<u8>, CardError> {
        let last = u8::try_from(segments)
            .ok()
            .filter(|&n| n > 0)
            .ok_or(CardError::InvalidSegmentCount(segments))?;

        let mut photo = Vec::new();
        for segment in 1..=last {
            let index = usize::from(segment);
            let command = ApduCommand::photo_segment(segment);
            let chunk = self
                .read_field(&command)
                .map_err(|e| CardError::SegmentRead {
                    index,
                    source: Box::new(e),
                })?
                .into_bytes();
            log::debug!("Photo segment {index}: {} bytes", chunk.len());
            photo.extend_from_slice(&chunk);
        }

        Ok(photo)
    }

    /// Read the photo and write it as `<identity>.jpg` in the photo
    /// directory. Nothing is written unless every segment was read.
    pub fn read_photo(&mut self, identity: &str, segments: usize) -> Result<PathBuf, CardError> {
        if !is_safe_identity(identity) {
            return Err(CardError::InvalidIdentity(identity.to_string()));
        }

        let photo = self.read_photo_bytes(segments)?;

        let path = self.photo_dir.join(format!("{identity}.jpg"));
        fs::write(&path, &photo).map_err(|source| CardError::Io {
            path: path.clone(),
            source,
        })?;

        log::info!("Photo saved as {} ({} bytes)", path.display(), photo.len());
        Ok(path)
    }

    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<(), CardError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CardError::InvalidState {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    /// Transmit one APDU, recording it in the transcript.
    fn exchange(&mut self, phase: Phase, label: &str, apdu: &[u8]) -> Result<RawResponse, CardError> {
        let start_time = Instant::now();
        let timestamp = Utc::now();

        log::debug!("{label} {phase:?} >> {}", format_hex_spaced(apdu));
        let result = self.channel.transmit(apdu);
        let duration_ms = start_time.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                log::debug!(
                    "{label} {phase:?} << {} [{}]",
                    format_hex_spaced(&response.data),
                    response.status
                );
                self.transcript.push(ExchangeRecord {
                    timestamp,
                    phase,
                    label: label.to_string(),
                    apdu: apdu.to_vec(),
                    data: response.data.clone(),
                    sw1: response.status.sw1,
                    sw2: response.status.sw2,
                    success: true,
                    error: None,
                    duration_ms,
                });
                Ok(response)
            }
            Err(e) => {
                log::error!("{label} {phase:?} transmit failed: {e}");
                self.transcript.push(ExchangeRecord {
                    timestamp,
                    phase,
                    label: label.to_string(),
                    apdu: apdu.to_vec(),
                    data: Vec::new(),
                    sw1: 0,
                    sw2: 0,
                    success: false,
                    error: Some(e.to_string()),
                    duration_ms,
                });
                self.state = SessionState::Faulted;
                Err(CardError::Transport {
                    label: label.to_string(),
                    source: e,
                })
            }
        }
    }
}

impl<C: CardChannel> fmt::Debug for CardHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardHandle")
            .field("state", &self.state)
            .field("atr", &format_hex_spaced(&self.atr))
            .field("read_variant", &self.read_variant)
            .field("policy", &self.policy)
            .field("exchanges", &self.transcript.len())
            .finish()
    }
}

/// Identities become file names, so only plain characters are accepted.
fn is_safe_identity(identity: &str) -> bool {
    !identity.is_empty()
        && identity
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::StrictStatusPolicy;
    use crate::core::reader::MockCardChannel;
    use mockall::predicate::eq;
    use mockall::Sequence;

    const LEGACY_ATR: [u8; 4] = [0x3B, 0x67, 0x00, 0x00];
    const STANDARD_ATR: [u8; 4] = [0x3B, 0x68, 0x00, 0x00];

    fn ok(data: &[u8]) -> Result<RawResponse, pcsc::Error> {
        Ok(RawResponse::new(data.to_vec(), 0x90, 0x00))
    }

    fn selected_handle(mut channel: MockCardChannel, atr: &'static [u8]) -> CardHandle<MockCardChannel> {
        channel.expect_open().times(1).returning(move || Ok(atr.to_vec()));
        channel
            .expect_transmit()
            .withf(|apdu| apdu.starts_with(&SELECT))
            .times(1)
            .returning(|_| ok(&[]));

        let mut handle = CardHandle::new(channel);
        handle.connect().unwrap();
        handle.select_applet().unwrap();
        handle
    }

    #[test]
    fn test_connect_derives_read_variant() {
        let mut channel = MockCardChannel::new();
        channel.expect_open().returning(|| Ok(LEGACY_ATR.to_vec()));

        let mut handle = CardHandle::new(channel);
        assert_eq!(handle.state(), SessionState::Unconnected);
        assert_eq!(handle.read_variant(), None);

        handle.connect().unwrap();
        assert_eq!(handle.state(), SessionState::Connected);
        assert_eq!(handle.atr(), &LEGACY_ATR);
        assert_eq!(handle.read_variant(), Some(ReadVariant::Legacy));
    }

    #[test]
    fn test_connect_twice_is_rejected() {
        let mut channel = MockCardChannel::new();
        channel.expect_open().times(1).returning(|| Ok(STANDARD_ATR.to_vec()));

        let mut handle = CardHandle::new(channel);
        handle.connect().unwrap();
        assert!(matches!(handle.connect(), Err(ConnectionError::AlreadyConnected)));
    }

    #[test]
    fn test_connect_failure_faults_handle() {
        let mut channel = MockCardChannel::new();
        channel
            .expect_open()
            .returning(|| Err(ConnectionError::ServiceUnavailable));

        let mut handle = CardHandle::new(channel);
        assert!(matches!(
            handle.connect(),
            Err(ConnectionError::ServiceUnavailable)
        ));
        assert_eq!(handle.state(), SessionState::Faulted);

        let err = handle.connect().unwrap_err();
        assert!(matches!(err, ConnectionError::SessionFaulted));
        assert_eq!(err.to_string(), "Session has faulted; open a new session to retry");
    }

    #[test]
    fn test_select_sends_applet_id() {
        let mut channel = MockCardChannel::new();
        channel.expect_open().returning(|| Ok(STANDARD_ATR.to_vec()));
        channel
            .expect_transmit()
            .with(eq(vec![
                0x00, 0xA4, 0x04, 0x00, 0x08, 0xA0, 0x00, 0x00, 0x00, 0x54, 0x48, 0x00, 0x01,
            ]))
            .times(1)
            .returning(|_| Ok(RawResponse::new(Vec::new(), 0x61, 0x0A)));

        let mut handle = CardHandle::new(channel);
        handle.connect().unwrap();
        let status = handle.select_applet().unwrap();

        assert_eq!(status, StatusWord::new(0x61, 0x0A));
        assert_eq!(handle.state(), SessionState::AppletSelected);
        assert_eq!(handle.transcript().phases(), vec![Phase::Select]);
    }

    #[test]
    fn test_select_before_connect_is_rejected() {
        let mut handle = CardHandle::new(MockCardChannel::new());
        assert!(matches!(
            handle.select_applet(),
            Err(CardError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_lenient_select_continues_on_bad_status() {
        let mut channel = MockCardChannel::new();
        channel.expect_open().returning(|| Ok(STANDARD_ATR.to_vec()));
        channel
            .expect_transmit()
            .returning(|_| Ok(RawResponse::new(Vec::new(), 0x6A, 0x82)));

        let mut handle = CardHandle::new(channel);
        handle.connect().unwrap();
        assert_eq!(handle.select_applet().unwrap(), StatusWord::new(0x6A, 0x82));
        assert_eq!(handle.state(), SessionState::AppletSelected);
    }

    #[test]
    fn test_strict_select_fails_on_bad_status() {
        let mut channel = MockCardChannel::new();
        channel.expect_open().returning(|| Ok(STANDARD_ATR.to_vec()));
        channel
            .expect_transmit()
            .returning(|_| Ok(RawResponse::new(Vec::new(), 0x6A, 0x82)));

        let mut handle = CardHandle::new(channel).with_policy(Box::new(StrictStatusPolicy));
        handle.connect().unwrap();
        assert!(matches!(
            handle.select_applet(),
            Err(CardError::Status { sw1: 0x6A, sw2: 0x82, .. })
        ));
        assert_eq!(handle.state(), SessionState::Faulted);
    }

    #[test]
    fn test_read_field_probe_then_fetch() {
        let mut channel = MockCardChannel::new();
        let mut seq = Sequence::new();
        channel.expect_open().returning(|| Ok(LEGACY_ATR.to_vec()));
        channel
            .expect_transmit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ok(&[]));
        channel
            .expect_transmit()
            .with(eq(vec![0x80, 0xB0, 0x00, 0x04, 0x02, 0x00, 0x0D]))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(RawResponse::new(Vec::new(), 0x61, 0x0D)));
        channel
            .expect_transmit()
            .with(eq(vec![0x00, 0xC0, 0x00, 0x01, 0x0D]))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ok(b"1234567890123"));

        let mut handle = CardHandle::new(channel);
        handle.connect().unwrap();
        handle.select_applet().unwrap();

        let value = handle.read_field(&Field::Cid.command()).unwrap();
        assert_eq!(value, FieldValue::Text("1234567890123".to_string()));
        assert_eq!(handle.state(), SessionState::Reading);
        assert_eq!(
            handle.transcript().phases(),
            vec![Phase::Select, Phase::Probe, Phase::Fetch]
        );
    }

    fn gender_code(bytes: &[u8]) -> FieldValue {
        match bytes.first() {
            Some(b'1') => FieldValue::Text("male".to_string()),
            Some(b'2') => FieldValue::Text("female".to_string()),
            _ => FieldValue::Binary(bytes.to_vec()),
        }
    }

    #[test]
    fn test_read_field_uses_command_decoder() {
        let mut channel = MockCardChannel::new();
        channel
            .expect_transmit()
            .with(eq(Field::Gender.command().instruction.to_vec()))
            .times(1)
            .returning(|_| Ok(RawResponse::new(Vec::new(), 0x61, 0x01)));
        channel
            .expect_transmit()
            .with(eq(vec![0x00, 0xC0, 0x00, 0x00, 0x01]))
            .times(1)
            .returning(|_| ok(b"2"));
        let mut handle = selected_handle(channel, &STANDARD_ATR);

        let command = Field::Gender.command().with_decoder(gender_code);
        let value = handle.read_field(&command).unwrap();
        assert_eq!(value, FieldValue::Text("female".to_string()));
    }

    #[test]
    fn test_read_before_select_is_rejected() {
        let mut channel = MockCardChannel::new();
        channel.expect_open().returning(|| Ok(STANDARD_ATR.to_vec()));
        channel.expect_transmit().never();

        let mut handle = CardHandle::new(channel);
        handle.connect().unwrap();
        assert!(matches!(
            handle.read_text(Field::Cid),
            Err(CardError::InvalidState { operation: "read data", .. })
        ));
    }

    #[test]
    fn test_strict_fetch_status_fails_read() {
        let mut channel = MockCardChannel::new();
        channel.expect_open().returning(|| Ok(STANDARD_ATR.to_vec()));
        channel
            .expect_transmit()
            .withf(|apdu| apdu.starts_with(&SELECT))
            .returning(|_| ok(&[]));
        channel
            .expect_transmit()
            .withf(|apdu| apdu[0] == 0x80)
            .returning(|_| Ok(RawResponse::new(Vec::new(), 0x6A, 0x82)));
        channel
            .expect_transmit()
            .withf(|apdu| apdu[..2] == [0x00, 0xC0])
            .returning(|_| Ok(RawResponse::new(Vec::new(), 0x6B, 0x00)));

        let mut handle = CardHandle::new(channel).with_policy(Box::new(StrictStatusPolicy));
        handle.connect().unwrap();
        handle.select_applet().unwrap();

        // the probe's 6A 82 is never checked; the fetch's 6B 00 is
        assert!(matches!(
            handle.read_text(Field::Gender),
            Err(CardError::Status { sw1: 0x6B, .. })
        ));
    }

    #[test]
    fn test_transport_failure_faults_handle() {
        let mut channel = MockCardChannel::new();
        channel
            .expect_transmit()
            .withf(|apdu| apdu[0] == 0x80)
            .returning(|_| Err(pcsc::Error::RemovedCard));
        let mut handle = selected_handle(channel, &STANDARD_ATR);

        assert!(matches!(
            handle.read_text(Field::Address),
            Err(CardError::Transport { source: pcsc::Error::RemovedCard, .. })
        ));
        assert_eq!(handle.state(), SessionState::Faulted);
        assert!(matches!(
            handle.read_text(Field::Address),
            Err(CardError::InvalidState { .. })
        ));
        assert_eq!(handle.transcript().statistics().failed_exchanges, 1);
    }

    #[test]
    fn test_photo_segments_in_order() {
        let mut channel = MockCardChannel::new();
        channel
            .expect_transmit()
            .withf(|apdu| apdu[0] == 0x80)
            .times(3)
            .returning(|_| ok(&[]));

        let mut seq = Sequence::new();
        for chunk in [[0xFFu8, 0xD8], [0x01, 0x02], [0xFF, 0xD9]] {
            channel
                .expect_transmit()
                .with(eq(vec![0x00, 0xC0, 0x00, 0x00, 0xFF]))
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_| ok(&chunk));
        }
        let mut handle = selected_handle(channel, &STANDARD_ATR);

        let photo = handle.read_photo_bytes(3).unwrap();
        assert_eq!(photo, vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);

        let probes: Vec<u8> = handle
            .transcript()
            .records()
            .iter()
            .filter(|r| r.phase == Phase::Probe)
            .map(|r| r.apdu[4])
            .collect();
        assert_eq!(probes, vec![1, 2, 3]);
    }

    #[test]
    fn test_photo_segment_count_bounds() {
        let mut handle = selected_handle(MockCardChannel::new(), &STANDARD_ATR);
        assert!(matches!(
            handle.read_photo_bytes(0),
            Err(CardError::InvalidSegmentCount(0))
        ));
        assert!(matches!(
            handle.read_photo_bytes(256),
            Err(CardError::InvalidSegmentCount(256))
        ));
    }

    #[test]
    fn test_photo_rejects_path_like_identity() {
        let mut handle = selected_handle(MockCardChannel::new(), &STANDARD_ATR);
        assert!(matches!(
            handle.read_photo("../etc/passwd", 1),
            Err(CardError::InvalidIdentity(_))
        ));
        assert!(matches!(
            handle.read_photo("", 1),
            Err(CardError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_safe_identity() {
        assert!(is_safe_identity("1234567890123"));
        assert!(is_safe_identity("card_01-a"));
        assert!(!is_safe_identity("a/b"));
        assert!(!is_safe_identity("a b"));
    }
}
