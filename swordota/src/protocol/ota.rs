//! Block-by-block OTA transfer.
//!
//! The artifact is replayed to the bootloader one frame at a time. After
//! every frame the bootloader answers with a single status byte:
//!
//! ```text
//! host                           device
//!  |  frame i (TOTAL_SIZE bytes)   |
//!  | ----------------------------> |
//!  |          status byte          |
//!  | <---------------------------- |
//!  |  frame i+1 ...                |
//! ```
//!
//! Only one frame is ever in flight. A rejected frame is resent up to
//! [`OtaConfig::max_attempts`] times before the transfer is aborted.

use std::fmt;
use std::io::{self, ErrorKind};
use std::thread;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::image::{CHUNK_SIZE, START_OFFSET, TOTAL_SIZE};
use crate::port::{NativePort, Port, SerialConfig};

/// Status byte for an accepted frame.
pub const ACK: u8 = b'V';

/// Decoded bootloader status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// `V`: frame written to flash.
    Written,
    /// `M`: bad magic.
    BadMagic,
    /// `C`: checksum mismatch.
    BadChecksum,
    /// `S`: address below the update window.
    BelowWindow,
    /// `E`: address at or past the end of the update window.
    BeyondWindow,
    /// Any other byte.
    Unknown(u8),
    /// Nothing arrived within the acknowledgment timeout.
    NoAck,
}

impl AckStatus {
    /// Decode a status byte.
    pub fn from_byte(b: u8) -> Self {
        match b {
            ACK => Self::Written,
            b'M' => Self::BadMagic,
            b'C' => Self::BadChecksum,
            b'S' => Self::BelowWindow,
            b'E' => Self::BeyondWindow,
            other => Self::Unknown(other),
        }
    }

    /// Wire byte, `None` for [`AckStatus::NoAck`].
    pub fn as_byte(self) -> Option<u8> {
        match self {
            Self::Written => Some(ACK),
            Self::BadMagic => Some(b'M'),
            Self::BadChecksum => Some(b'C'),
            Self::BelowWindow => Some(b'S'),
            Self::BeyondWindow => Some(b'E'),
            Self::Unknown(b) => Some(b),
            Self::NoAck => None,
        }
    }

    /// Whether the frame was accepted.
    pub fn is_ack(self) -> bool {
        self == Self::Written
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Written => write!(f, "written"),
            Self::BadMagic => write!(f, "bad magic"),
            Self::BadChecksum => write!(f, "bad checksum"),
            Self::BelowWindow => write!(f, "address below update window"),
            Self::BeyondWindow => write!(f, "address beyond update window"),
            Self::Unknown(b) => write!(f, "unknown status 0x{b:02X}"),
            Self::NoAck => write!(f, "no acknowledgment"),
        }
    }
}

/// Transfer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashState {
    /// Port attached, not configured yet.
    Idle,
    /// Port configured, nothing sent.
    Connected,
    /// Frame `i` written, waiting for its status byte.
    Sending(usize),
    /// Frame `i` accepted.
    Acked(usize),
    /// Frame `i` rejected or unanswered.
    Nacked(usize),
    /// Every frame accepted, port closed.
    Done,
    /// Transfer given up, port closed.
    Aborted,
}

/// OTA transfer options.
#[derive(Debug, Clone)]
pub struct OtaConfig {
    /// How long to wait for a status byte.
    pub ack_timeout: Duration,
    /// Attempts per frame, including the first one.
    pub max_attempts: u32,
    /// Pause before resending a rejected frame.
    pub retry_delay: Duration,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(2000),
            max_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Progress of the current transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSession {
    /// Offset of the frame in flight.
    pub offset: usize,
    /// Bytes acknowledged so far.
    pub transferred: usize,
    /// Artifact size.
    pub total: usize,
    /// Last status observed.
    pub last_ack: Option<AckStatus>,
}

type InterruptChecker = Box<dyn Fn() -> bool + Send>;

/// OTA flash client.
///
/// Owns the port for the whole transfer and closes it when the transfer
/// ends, successfully or not.
pub struct OtaClient<P: Port> {
    port: P,
    config: OtaConfig,
    state: FlashState,
    session: TransferSession,
    interrupted: InterruptChecker,
}

impl OtaClient<NativePort> {
    /// Open `port_name` at 115200 8N1 and attach a client to it.
    pub fn open(port_name: &str, config: OtaConfig) -> Result<Self> {
        let serial = SerialConfig::new(port_name).with_timeout(config.ack_timeout);
        let port = NativePort::open(&serial)?;
        info!("Opened {port_name} @ {} baud", serial.baud_rate);
        Ok(Self::new(port, config))
    }
}

impl<P: Port> OtaClient<P> {
    /// Create a client on an already opened port.
    pub fn new(port: P, config: OtaConfig) -> Self {
        Self {
            port,
            config,
            state: FlashState::Idle,
            session: TransferSession::default(),
            interrupted: Box::new(crate::is_interrupted_requested),
        }
    }

    /// Replace the global interrupt checker for this client.
    #[must_use]
    pub fn with_interrupt_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.interrupted = Box::new(checker);
        self
    }

    /// Current state.
    pub fn state(&self) -> FlashState {
        self.state
    }

    /// Progress of the current or last transfer.
    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the client and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Configure the port for acknowledgment reads.
    pub fn connect(&mut self) -> Result<()> {
        self.port
            .set_timeout(self.config.ack_timeout)?;
        self.state = FlashState::Connected;
        debug!(
            "Connected on {} (ack timeout {:?})",
            self.port.name(),
            self.config.ack_timeout
        );
        Ok(())
    }

    /// Send `ciphertext` frame by frame.
    ///
    /// `progress` receives `(bytes_acknowledged, total)` after every accepted
    /// frame. On error the port is closed and the error carries the frame
    /// index and offset that failed.
    pub fn flash<F>(&mut self, ciphertext: &[u8], mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        self.session = TransferSession {
            total: ciphertext.len(),
            ..TransferSession::default()
        };

        let result = self.run(ciphertext, &mut progress);
        match result {
            Ok(()) => {
                self.state = FlashState::Done;
                self.port.close()?;
                info!("Flashed {} bytes", self.session.total);
                Ok(())
            },
            Err(e) => {
                self.state = FlashState::Aborted;
                if let Err(close_err) = self.port.close() {
                    warn!("Failed to close {}: {close_err}", self.port.name());
                }
                warn!(
                    "Transfer aborted at offset {}/{}",
                    self.session.offset, self.session.total
                );
                Err(e)
            },
        }
    }

    fn run(&mut self, ciphertext: &[u8], progress: &mut dyn FnMut(usize, usize)) -> Result<()> {
        let total = ciphertext.len();
        if total % TOTAL_SIZE != 0 {
            return Err(Error::ArtifactMisaligned {
                len: total,
                frame_size: TOTAL_SIZE,
            });
        }

        if self.state == FlashState::Idle {
            self.connect()?;
        }

        debug!("Sending {} frames ({total} bytes)", total / TOTAL_SIZE);
        for (block, frame) in ciphertext.chunks(TOTAL_SIZE).enumerate() {
            if (self.interrupted)() {
                return Err(Error::Interrupted);
            }

            self.session.offset = block * TOTAL_SIZE;
            self.send_block(block, frame)?;

            self.session.transferred = self.session.offset + frame.len();
            progress(self.session.transferred, total);
        }

        Ok(())
    }

    fn send_block(&mut self, block: usize, frame: &[u8]) -> Result<()> {
        let max_attempts = self
            .config
            .max_attempts
            .max(1);
        let addr = START_OFFSET + block * CHUNK_SIZE;
        let mut status = AckStatus::NoAck;

        for attempt in 1..=max_attempts {
            self.state = FlashState::Sending(block);
            trace!("Sending frame {block} address 0x{addr:04X} (attempt {attempt})");

            self.port
                .write_all(frame)
                .and_then(|()| self.port.flush())
                .map_err(|source| self.transport_error(block, source))?;

            status = self.read_ack(block)?;
            self.session.last_ack = Some(status);
            trace!("Frame {block}: {status}");

            if status.is_ack() {
                self.state = FlashState::Acked(block);
                return Ok(());
            }

            self.state = FlashState::Nacked(block);
            warn!(
                "Frame {block} at 0x{addr:04X} rejected: {status} (attempt {attempt}/{max_attempts})"
            );
            if attempt < max_attempts {
                thread::sleep(self.config.retry_delay);
                self.port
                    .clear_buffers()
                    .map_err(|e| self.transport_error(block, into_io(e)))?;
            }
        }

        Err(Error::ProtocolNack {
            block,
            status,
            attempts: max_attempts,
            offset: self.session.offset,
            total: self.session.total,
        })
    }

    /// Read one status byte; a timeout counts as no acknowledgment.
    fn read_ack(&mut self, block: usize) -> Result<AckStatus> {
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(1) => Ok(AckStatus::from_byte(buf[0])),
            Ok(_) => Ok(AckStatus::NoAck),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Ok(AckStatus::NoAck)
            },
            Err(e) => Err(self.transport_error(block, e)),
        }
    }

    fn transport_error(&self, block: usize, source: io::Error) -> Error {
        Error::TransportIo {
            block,
            offset: self.session.offset,
            total: self.session.total,
            source,
        }
    }
}

/// Unwrap a port error to the I/O error underneath.
fn into_io(err: Error) -> io::Error {
    match err {
        Error::Io(e) => e,
        Error::Serial(e) => e.into(),
        other => io::Error::other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{MockPort, Reply};

    fn config(max_attempts: u32) -> OtaConfig {
        OtaConfig {
            ack_timeout: Duration::from_millis(50),
            max_attempts,
            retry_delay: Duration::ZERO,
        }
    }

    /// Artifact whose frames are filled with their index.
    fn artifact(blocks: usize) -> Vec<u8> {
        (0..blocks)
            .flat_map(|i| std::iter::repeat_n(i as u8, TOTAL_SIZE))
            .collect()
    }

    #[test]
    fn test_ack_status_decoding() {
        assert_eq!(AckStatus::from_byte(b'V'), AckStatus::Written);
        assert_eq!(AckStatus::from_byte(b'M'), AckStatus::BadMagic);
        assert_eq!(AckStatus::from_byte(b'C'), AckStatus::BadChecksum);
        assert_eq!(AckStatus::from_byte(b'S'), AckStatus::BelowWindow);
        assert_eq!(AckStatus::from_byte(b'E'), AckStatus::BeyondWindow);
        assert_eq!(AckStatus::from_byte(0x00), AckStatus::Unknown(0));
        assert!(AckStatus::Written.is_ack());
        assert!(!AckStatus::NoAck.is_ack());
        assert_eq!(AckStatus::BadChecksum.as_byte(), Some(b'C'));
        assert_eq!(AckStatus::NoAck.as_byte(), None);
    }

    #[test]
    fn test_all_frames_acked() {
        let _ = env_logger::builder().is_test(true).try_init();

        let data = artifact(3);
        let mut client = OtaClient::new(MockPort::acking(3), config(3));
        assert_eq!(client.state(), FlashState::Idle);

        let mut progress = Vec::new();
        client
            .flash(&data, |done, total| progress.push((done, total)))
            .unwrap();

        assert_eq!(client.state(), FlashState::Done);
        assert_eq!(progress, vec![(80, 240), (160, 240), (240, 240)]);
        assert_eq!(client.session().transferred, 240);
        assert_eq!(client.session().last_ack, Some(AckStatus::Written));

        let port = client.into_port();
        assert!(port.closed);
        assert_eq!(port.timeout, Duration::from_millis(50));
        assert_eq!(port.writes.len(), 3);
        for (i, write) in port.writes.iter().enumerate() {
            assert_eq!(write.len(), TOTAL_SIZE);
            assert_eq!(write, &data[i * TOTAL_SIZE..(i + 1) * TOTAL_SIZE]);
        }
    }

    #[test]
    fn test_nack_on_second_block_never_sends_third() {
        let data = artifact(2);
        let port = MockPort::new(&[
            Reply::Byte(b'V'),
            Reply::Byte(0x00),
            Reply::Byte(0x00),
            Reply::Byte(0x00),
        ]);
        let mut client = OtaClient::new(port, config(3));

        let mut progress = Vec::new();
        let err = client
            .flash(&data, |done, _| progress.push(done))
            .unwrap_err();

        match err {
            Error::ProtocolNack {
                block,
                status,
                attempts,
                offset,
                total,
            } => {
                assert_eq!(block, 1);
                assert_eq!(status, AckStatus::Unknown(0));
                assert_eq!(attempts, 3);
                assert_eq!(offset, 80);
                assert_eq!(total, 160);
            },
            other => panic!("expected ProtocolNack, got {other:?}"),
        }
        assert_eq!(client.state(), FlashState::Aborted);
        assert_eq!(progress, vec![80]);

        let port = client.into_port();
        assert!(port.closed);
        assert_eq!(port.writes.len(), 4);
        assert_eq!(port.writes[0], &data[..TOTAL_SIZE]);
        for write in &port.writes[1..] {
            assert_eq!(write, &data[TOTAL_SIZE..]);
        }
        assert_eq!(port.clears, 2);
    }

    #[test]
    fn test_single_attempt_aborts_on_first_nack() {
        let port = MockPort::new(&[Reply::Byte(b'V'), Reply::Byte(0x00)]);
        let mut client = OtaClient::new(port, config(1));

        assert!(matches!(
            client.flash(&artifact(2), |_, _| {}),
            Err(Error::ProtocolNack { block: 1, attempts: 1, .. })
        ));
        assert_eq!(client.into_port().writes.len(), 2);
    }

    #[test]
    fn test_nack_then_ack_recovers() {
        let port = MockPort::new(&[Reply::Byte(b'V'), Reply::Byte(b'C'), Reply::Byte(b'V')]);
        let mut client = OtaClient::new(port, config(3));

        client.flash(&artifact(2), |_, _| {}).unwrap();
        assert_eq!(client.state(), FlashState::Done);

        let port = client.into_port();
        assert_eq!(port.writes.len(), 3);
        assert_eq!(port.writes[1], port.writes[2]);
        assert_eq!(port.clears, 1);
    }

    #[test]
    fn test_timeout_counts_as_nack() {
        let port = MockPort::new(&[Reply::Timeout, Reply::Timeout]);
        let mut client = OtaClient::new(port, config(2));

        let err = client.flash(&artifact(1), |_, _| {}).unwrap_err();
        assert!(matches!(
            err,
            Error::ProtocolNack {
                block: 0,
                status: AckStatus::NoAck,
                attempts: 2,
                ..
            }
        ));
        assert_eq!(client.session().last_ack, Some(AckStatus::NoAck));
    }

    #[test]
    fn test_write_failure_aborts_without_retry() {
        let mut port = MockPort::acking(3);
        port.fail_write_at = Some(1);
        let mut client = OtaClient::new(port, config(5));

        let err = client.flash(&artifact(3), |_, _| {}).unwrap_err();
        match err {
            Error::TransportIo {
                block,
                offset,
                total,
                source,
            } => {
                assert_eq!((block, offset, total), (1, 80, 240));
                assert_eq!(source.kind(), ErrorKind::BrokenPipe);
            },
            other => panic!("expected TransportIo, got {other:?}"),
        }
        assert_eq!(client.state(), FlashState::Aborted);
        let port = client.into_port();
        assert!(port.closed);
        assert_eq!(port.writes.len(), 1);
    }

    #[test]
    fn test_clear_failure_during_retry_aborts_with_context() {
        let mut port = MockPort::new(&[Reply::Byte(b'V'), Reply::Byte(b'C'), Reply::Byte(b'V')]);
        port.fail_clear = true;
        let mut client = OtaClient::new(port, config(3));

        let err = client
            .flash(&artifact(2), |_, _| {})
            .unwrap_err();
        match err {
            Error::TransportIo {
                block,
                offset,
                total,
                source,
            } => {
                assert_eq!((block, offset, total), (1, 80, 160));
                assert_eq!(source.kind(), ErrorKind::BrokenPipe);
            },
            other => panic!("expected TransportIo, got {other:?}"),
        }
        assert_eq!(client.state(), FlashState::Aborted);
        assert_eq!(client.session().transferred, 80);

        let port = client.into_port();
        assert!(port.closed);
        assert_eq!(port.writes.len(), 2);
    }

    #[test]
    fn test_read_failure_aborts() {
        let port = MockPort::new(&[Reply::Fail]);
        let mut client = OtaClient::new(port, config(3));

        assert!(matches!(
            client.flash(&artifact(2), |_, _| {}),
            Err(Error::TransportIo { block: 0, .. })
        ));
        assert_eq!(client.into_port().writes.len(), 1);
    }

    #[test]
    fn test_misaligned_artifact_rejected() {
        let mut client = OtaClient::new(MockPort::acking(2), config(3));

        let err = client.flash(&[0u8; TOTAL_SIZE + 1], |_, _| {}).unwrap_err();
        assert!(matches!(
            err,
            Error::ArtifactMisaligned {
                len: 81,
                frame_size: TOTAL_SIZE
            }
        ));
        assert_eq!(client.state(), FlashState::Aborted);
        assert!(client.into_port().writes.is_empty());
    }

    #[test]
    fn test_interrupt_stops_before_next_block() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let stop = Arc::new(AtomicBool::new(false));
        let checker = Arc::clone(&stop);
        let mut client = OtaClient::new(MockPort::acking(3), config(3))
            .with_interrupt_checker(move || checker.load(Ordering::Relaxed));

        let err = client
            .flash(&artifact(3), |_, _| stop.store(true, Ordering::Relaxed))
            .unwrap_err();
        assert!(matches!(err, Error::Interrupted));
        assert_eq!(client.session().transferred, 80);

        let port = client.into_port();
        assert!(port.closed);
        assert_eq!(port.writes.len(), 1);
    }

    #[test]
    fn test_empty_artifact_is_done() {
        let mut client = OtaClient::new(MockPort::acking(0), config(3));
        client.flash(&[], |_, _| panic!("no progress expected")).unwrap();
        assert_eq!(client.state(), FlashState::Done);
    }
}
