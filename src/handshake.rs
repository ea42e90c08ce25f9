use serde::Serialize;
use std::fmt;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use crate::cipher::{decrypt_block, KeySource};
use crate::error::HandshakeError;
use crate::protocol::{Frame, FRAME_HEX_LEN};
use crate::signal::{PresenceGuard, PresenceSignal};
use crate::transport::{Channel, ChannelOpener, Clock, Deadline, SystemClock};

/// Total time allowed for one attempt
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

/// Bytes requested per poll of the channel
const READ_CHUNK_SIZE: usize = 256;

/// Hex-string ranges holding the DU and display numbers
const DU_NUMBER_HEX: std::ops::Range<usize> = 4..20;
const DISPLAY_NUMBER_HEX: std::ops::Range<usize> = 20..36;

/// Minimum firmware version that expects encrypted transfer traffic
const ENCRYPTION_MIN_FIRMWARE: (u8, u8) = (11, 8);

/// Identity read from the DU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResult {
    pub du_number: u64,
    pub display_number: u64,
    /// Whether the firmware transfer that follows must be encrypted
    pub is_encryption_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    AwaitData,
    Accumulating,
    FrameReady,
    ValidatingPlain,
    Decrypting,
    Validated,
    Extracting,
    Done,
    Failed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Progress and outcome reported by a spawned handshake
#[derive(Debug)]
pub enum HandshakeEvent {
    Status(String),
    Done(Result<HandshakeResult, HandshakeError>),
}

/// Hex accumulator for a single attempt
#[derive(Debug, Default)]
struct RawStream {
    hex: String,
}

impl RawStream {
    fn push(&mut self, bytes: &[u8]) {
        self.hex.push_str(&hex::encode(bytes));
    }

    fn hex_len(&self) -> usize {
        self.hex.len()
    }

    fn is_complete(&self) -> bool {
        self.hex.len() >= FRAME_HEX_LEN
    }

    /// First frame's worth of hex; anything after it is discarded
    fn frame_hex(&self) -> Option<&str> {
        self.hex.get(..FRAME_HEX_LEN)
    }
}

/// A frame that passed marker and checksum validation, tagged by the path that got it there
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedFrame {
    Plain(Frame),
    Decrypted(Frame),
}

impl ValidatedFrame {
    pub fn frame(&self) -> &Frame {
        match self {
            ValidatedFrame::Plain(frame) | ValidatedFrame::Decrypted(frame) => frame,
        }
    }

    pub fn was_encrypted(&self) -> bool {
        matches!(self, ValidatedFrame::Decrypted(_))
    }
}

/// Firmware (major, minor) at or above 11/8 in *both* components requires encrypted transfers
pub fn encryption_enabled(firmware: (u8, u8)) -> bool {
    firmware.0 >= ENCRYPTION_MIN_FIRMWARE.0 && firmware.1 >= ENCRYPTION_MIN_FIRMWARE.1
}

/// Parse the DU and display numbers out of the received frame hex.
///
/// Reads the hex exactly as it came off the wire, so on the encrypted path
/// the numbers come from the ciphertext, not the decrypted frame.
pub fn extract_identity(frame_hex: &str) -> Result<(u64, u64), HandshakeError> {
    let field = |range: std::ops::Range<usize>| {
        frame_hex
            .get(range)
            .and_then(|digits| u64::from_str_radix(digits, 16).ok())
            .ok_or(HandshakeError::InvalidHex)
    };

    Ok((field(DU_NUMBER_HEX)?, field(DISPLAY_NUMBER_HEX)?))
}

/// Validate a frame whose markers are present in the clear
fn validate_plain(frame: Frame) -> Result<ValidatedFrame, HandshakeError> {
    if !frame.has_valid_checksum() {
        return Err(HandshakeError::CrcMismatch);
    }
    Ok(ValidatedFrame::Plain(frame))
}

/// Decrypt a frame with no clear markers and validate the plaintext
fn decrypt_and_validate(
    frame: &Frame,
    key_source: &dyn KeySource,
) -> Result<ValidatedFrame, HandshakeError> {
    let key = key_source.data_key().ok_or_else(|| {
        log::error!("No decryption key available for encrypted frame");
        HandshakeError::KeyUnavailable
    })?;

    let plaintext = decrypt_block(frame.as_bytes(), &key).map_err(|e| {
        log::error!("Frame decryption failed: {}", e);
        HandshakeError::InvalidData
    })?;
    let decrypted = Frame::from_bytes(plaintext).ok_or(HandshakeError::InvalidData)?;

    if !decrypted.has_valid_markers() {
        log::debug!("Decrypted frame has no valid markers");
        return Err(HandshakeError::InvalidData);
    }
    if !decrypted.has_valid_checksum() {
        log::debug!("Decrypted frame failed checksum");
        return Err(HandshakeError::InvalidData);
    }

    Ok(ValidatedFrame::Decrypted(decrypted))
}

fn enter(state: &mut HandshakeState, next: HandshakeState) {
    log::trace!("Handshake {} -> {}", state, next);
    *state = next;
}

/// Poll the channel until a full frame's worth of hex arrives or the deadline passes
fn accumulate(
    channel: &mut dyn Channel,
    clock: &dyn Clock,
    deadline: &Deadline,
    state: &mut HandshakeState,
) -> Result<RawStream, HandshakeError> {
    let mut stream = RawStream::default();
    let mut read_buf = [0u8; READ_CHUNK_SIZE];

    while !stream.is_complete() {
        if deadline.expired(clock) {
            log::debug!(
                "Deadline passed after {:?} with {} hex characters",
                deadline.elapsed(clock),
                stream.hex_len()
            );
            return Err(HandshakeError::Timeout);
        }

        let n = channel
            .read_chunk(&mut read_buf)
            .map_err(|e| HandshakeError::SerialRead(e.to_string()))?;
        if n == 0 {
            continue;
        }

        stream.push(&read_buf[..n]);
        if *state == HandshakeState::AwaitData {
            enter(state, HandshakeState::Accumulating);
        }
        log::trace!("HEX += {}", hex::encode(&read_buf[..n]));
        log::trace!("LEN: {}", stream.hex_len());
    }

    Ok(stream)
}

/// One-shot DU handshake: read a frame, validate it (decrypting when needed),
/// and extract the DU identity.
pub struct HandshakeReader {
    opener: Box<dyn ChannelOpener>,
    signal: Box<dyn PresenceSignal>,
    key_source: Box<dyn KeySource>,
    clock: Box<dyn Clock>,
    deadline: Duration,
}

impl HandshakeReader {
    pub fn new(
        opener: Box<dyn ChannelOpener>,
        signal: Box<dyn PresenceSignal>,
        key_source: Box<dyn KeySource>,
    ) -> Self {
        HandshakeReader {
            opener,
            signal,
            key_source,
            clock: Box::new(SystemClock),
            deadline: DEFAULT_DEADLINE,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run one attempt on the calling thread.
    ///
    /// The presence line is asserted for the duration and released on every
    /// exit path; the channel is closed before this returns.
    pub fn run(&mut self, status: &mut dyn FnMut(&str)) -> Result<HandshakeResult, HandshakeError> {
        let mut state = HandshakeState::Init;
        let result = self.attempt(&mut state, status);

        match &result {
            Ok(identity) => {
                enter(&mut state, HandshakeState::Done);
                log::info!(
                    "DU: {} Display: {} (encryption {})",
                    identity.du_number,
                    identity.display_number,
                    if identity.is_encryption_enabled { "enabled" } else { "disabled" }
                );
            }
            Err(e) => {
                log::error!("Handshake failed in {} with {}: {}", state, e.code(), e);
                enter(&mut state, HandshakeState::Failed);
            }
        }

        result
    }

    fn attempt(
        &mut self,
        state: &mut HandshakeState,
        status: &mut dyn FnMut(&str),
    ) -> Result<HandshakeResult, HandshakeError> {
        let HandshakeReader {
            opener,
            signal,
            key_source,
            clock,
            deadline,
        } = self;
        let clock: &dyn Clock = &**clock;

        let _presence = PresenceGuard::assert(&mut **signal);
        let deadline = Deadline::start(clock, *deadline);
        status("Waiting for DU...");

        log::debug!("Opening {}", opener.describe());
        let mut channel = opener
            .open()
            .map_err(|e| HandshakeError::SerialOpen(e.to_string()))?;

        enter(state, HandshakeState::AwaitData);
        let stream = accumulate(channel.as_mut(), clock, &deadline, state)?;
        drop(channel);

        enter(state, HandshakeState::FrameReady);
        let frame_hex = stream.frame_hex().ok_or(HandshakeError::InvalidHex)?;
        if stream.hex_len() > FRAME_HEX_LEN {
            log::debug!(
                "Discarding {} bytes after the frame",
                (stream.hex_len() - FRAME_HEX_LEN) / 2
            );
        }
        let raw = Frame::from_hex(frame_hex).map_err(|_| HandshakeError::InvalidHex)?;

        let validated = if raw.has_valid_markers() {
            enter(state, HandshakeState::ValidatingPlain);
            log::info!("Unencrypted data detected");
            validate_plain(raw)?
        } else {
            enter(state, HandshakeState::Decrypting);
            log::info!("Encrypted data detected, decrypting...");
            status("Decrypting DU data...");
            decrypt_and_validate(&raw, &**key_source)?
        };
        enter(state, HandshakeState::Validated);

        enter(state, HandshakeState::Extracting);
        let (du_number, display_number) = extract_identity(frame_hex)?;
        let firmware = validated.frame().firmware_version();
        log::debug!(
            "Firmware {}.{} ({} frame)",
            firmware.0,
            firmware.1,
            if validated.was_encrypted() { "decrypted" } else { "plain" }
        );

        Ok(HandshakeResult {
            du_number,
            display_number,
            is_encryption_enabled: encryption_enabled(firmware),
        })
    }

    /// Run the attempt on a dedicated worker thread
    pub fn spawn(mut self) -> HandshakeHandle {
        let (sender, events) = mpsc::channel();

        let worker = thread::spawn(move || {
            let status_sender = sender.clone();
            let result = self.run(&mut |message: &str| {
                let _ = status_sender.send(HandshakeEvent::Status(message.to_string()));
            });
            let _ = sender.send(HandshakeEvent::Done(result));
        });

        HandshakeHandle {
            events,
            worker: Some(worker),
        }
    }
}

/// Handle to a handshake running on its worker thread
pub struct HandshakeHandle {
    events: Receiver<HandshakeEvent>,
    worker: Option<thread::JoinHandle<()>>,
}

impl HandshakeHandle {
    /// Event stream: any number of `Status`, then exactly one `Done`
    #[cfg(test)]
    pub fn events(&self) -> &Receiver<HandshakeEvent> {
        &self.events
    }

    /// Block until the attempt finishes, passing status messages to `on_status`
    pub fn wait(mut self, mut on_status: impl FnMut(&str)) -> Result<HandshakeResult, HandshakeError> {
        let mut outcome = None;

        for event in self.events.iter() {
            match event {
                HandshakeEvent::Status(message) => on_status(&message),
                HandshakeEvent::Done(result) => {
                    outcome = Some(result);
                    break;
                }
            }
        }

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        outcome.unwrap_or(Err(HandshakeError::WorkerLost))
    }
}
