use crate::checksum::crc8;
use crate::transport::Transport;
use crate::{FrameCodec, LinkError, MessageToken, DEFAULT_MAX_FRAME};
use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt::Debug;
use core::time::Duration;
use log::*;

/// START: start needle, stop needle, continuous reporting
const CMD_START: u8 = 0x01;
/// INFO request
const CMD_INFO: u8 = 0x03;
/// TEST request
const CMD_TEST: u8 = 0x04;
/// LINE: line number, needle bits, flags, crc
const CMD_LINE: u8 = 0x42;

/// Bytes requested from the transport on every poll
pub const DEFAULT_READ_CHUNK: usize = 1000;
/// Longest a poll waits for the transport
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Decoded frames held before the oldest is dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Receiver of the anomalies the driver absorbs
///
/// Nothing reported here is returned to the caller of the driver. The
/// default methods log through the `log` facade.
pub trait Diagnostics {
    /// The transport refused to open `port`
    fn connection_failed(&mut self, port: &str, error: &dyn Debug) {
        error!("could not open serial port {}: {:?}", port, error);
    }

    /// An I/O operation failed or was attempted while not open
    fn io_error(&mut self, error: LinkError, operation: &'static str, detail: &dyn Debug) {
        warn!("serial {} failed: {} ({:?})", operation, error, detail);
    }

    /// A frame could not be decoded and was dropped
    fn malformed_frame(&mut self, error: &LinkError, partial: &[u8]) {
        warn!("dropping malformed frame: {} after {:02x?}", error, partial);
    }

    /// A frame arrived with an unrecognized token
    fn unknown_message(&mut self, payload: &[u8]) {
        debug!("unknown message: {:02x?}", payload);
    }

    /// The pending queue was full and its oldest frame was dropped
    fn frame_dropped(&mut self, payload: &[u8]) {
        warn!("receive queue full, dropping {:02x?}", payload);
    }
}

/// Diagnostics that only log
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {}

/// Tunables for a `ProtocolDriver`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// max bytes read per poll
    pub read_chunk: usize,
    /// max wait per poll
    pub read_timeout: Duration,
    /// pending frames kept before dropping the oldest, at least 1
    pub queue_capacity: usize,
    /// when set, `send_line` rejects line data of any other length
    pub line_width: Option<usize>,
    /// longest incoming payload, at least 1
    pub max_frame: usize,
}

impl DriverConfig {
    /// Create the default configuration
    pub const fn new() -> Self {
        DriverConfig {
            read_chunk: DEFAULT_READ_CHUNK,
            read_timeout: DEFAULT_READ_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            line_width: None,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    /// Read at most `read_chunk` bytes per poll
    pub const fn with_read_chunk(mut self, read_chunk: usize) -> Self {
        self.read_chunk = read_chunk;
        self
    }

    /// Wait at most `read_timeout` per poll
    pub const fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Keep at most `queue_capacity` decoded frames
    pub const fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Require `line_data` of exactly `bytes` bytes in `send_line`
    pub const fn with_line_width(mut self, bytes: usize) -> Self {
        self.line_width = Some(bytes);
        self
    }

    /// Drop incoming frames longer than `max_frame` bytes
    pub const fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig::new()
    }
}

/// Connection lifecycle
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    Closed,
    Open,
    /// transport held after an I/O error, behaves as closed until reopened
    Faulted,
}

/// Result of one `poll`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    /// the decoded frame, absent when nothing was received
    pub payload: Option<Vec<u8>>,
    pub token: MessageToken,
    /// the byte after the token, 0 when there is none or the token is unknown
    pub aux: u8,
}

impl Incoming {
    /// no message available
    pub const fn none() -> Self {
        Incoming {
            payload: None,
            token: MessageToken::None,
            aux: 0,
        }
    }

    /// Returns true if no message was received
    pub fn is_none(&self) -> bool {
        self.payload.is_none()
    }
}

/// Link driver for the knitting machine controller
///
/// Commands are written immediately and in call order. Replies are
/// collected by `poll`, which has to be called repeatedly, e.g. from a
/// timer, and hands out one reply per call in arrival order.
///
/// The driver owns its transport and closes it when dropped.
#[derive(Debug)]
pub struct ProtocolDriver<T: Transport, D: Diagnostics = LogDiagnostics> {
    transport: T,
    diagnostics: D,
    config: DriverConfig,
    codec: FrameCodec,
    pending: VecDeque<Vec<u8>>,
    read_buffer: Vec<u8>,
    state: LinkState,
}

impl<T: Transport> ProtocolDriver<T, LogDiagnostics> {
    /// Create a closed driver with the default configuration
    pub fn new(transport: T) -> Self {
        ProtocolDriver::with_diagnostics(transport, DriverConfig::new(), LogDiagnostics)
    }

    /// Create a closed driver
    pub fn with_config(transport: T, config: DriverConfig) -> Self {
        ProtocolDriver::with_diagnostics(transport, config, LogDiagnostics)
    }
}

impl<T: Transport, D: Diagnostics> ProtocolDriver<T, D> {
    /// Create a closed driver reporting to `diagnostics`
    pub fn with_diagnostics(transport: T, config: DriverConfig, diagnostics: D) -> Self {
        let queue_capacity = config.queue_capacity.max(1);
        let max_frame = config.max_frame.max(1);
        ProtocolDriver {
            transport,
            diagnostics,
            config: DriverConfig {
                queue_capacity,
                max_frame,
                ..config
            },
            codec: FrameCodec::with_max_frame(max_frame),
            pending: VecDeque::with_capacity(queue_capacity),
            read_buffer: vec![0; config.read_chunk.max(1)],
            state: LinkState::Closed,
        }
    }

    /// Open the connection to `port`
    ///
    /// Does nothing if already open. After an I/O fault the transport is
    /// closed and opened again. Any partially received data is discarded.
    pub fn open(&mut self, port: &str) -> Result<(), LinkError> {
        match self.state {
            LinkState::Open => {
                debug!("serial port already open");
                return Ok(());
            }
            LinkState::Faulted => self.close(),
            LinkState::Closed => {}
        }
        if let Err(e) = self.transport.open(port) {
            self.diagnostics.connection_failed(port, &e);
            return Err(LinkError::Connection);
        }
        self.codec.reset();
        self.pending.clear();
        self.state = LinkState::Open;
        info!("opened serial port {}", port);
        Ok(())
    }

    /// Close the connection
    ///
    /// Safe to call at any time. A failing transport close is reported to
    /// diagnostics, the driver is closed afterwards either way.
    pub fn close(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }
        match self.transport.close() {
            Ok(()) => info!("closing serial port successful"),
            Err(e) => self.diagnostics.io_error(LinkError::Io, "close", &e),
        }
        self.state = LinkState::Closed;
    }

    /// Returns true while the link can carry traffic
    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open && self.transport.is_open()
    }

    /// Current lifecycle state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Ask the controller to start knitting between two needles
    pub fn send_start(&mut self, start_needle: u8, stop_needle: u8, continuous_reporting: bool) {
        self.write_frame(&[
            CMD_START,
            start_needle,
            stop_needle,
            continuous_reporting as u8,
        ]);
    }

    /// Ask the controller for its firmware information
    pub fn send_info_request(&mut self) {
        self.write_frame(&[CMD_INFO]);
    }

    /// Ask the controller to enter test mode
    pub fn send_test_request(&mut self) {
        self.write_frame(&[CMD_TEST]);
    }

    /// Send one row of needle data
    ///
    /// The CRC-8 covers the command byte, line number, line data and flags.
    /// `line_data` is forwarded as given unless the configuration pins a
    /// line width, in which case a mismatch fails and nothing is written.
    pub fn send_line(
        &mut self,
        line_number: u8,
        line_data: &[u8],
        flags: u8,
    ) -> Result<(), LinkError> {
        if let Some(expected) = self.config.line_width {
            if line_data.len() != expected {
                return Err(LinkError::LineLength {
                    expected,
                    actual: line_data.len(),
                });
            }
        }
        let mut data = Vec::with_capacity(line_data.len() + 4);
        data.push(CMD_LINE);
        data.push(line_number);
        data.extend_from_slice(line_data);
        data.push(flags);
        let crc = crc8(&data);
        data.push(crc);
        self.write_frame(&data);
        Ok(())
    }

    /// Read what the transport has and return the oldest pending reply
    ///
    /// Returns `Incoming::none()` when closed, faulted, or when no complete
    /// frame is waiting. At most one frame is returned per call, the rest
    /// stay queued for later polls.
    pub fn poll(&mut self) -> Incoming {
        if self.state != LinkState::Open {
            return Incoming::none();
        }
        match self
            .transport
            .read(&mut self.read_buffer, self.config.read_timeout)
        {
            Ok(0) => {}
            Ok(n) => {
                let n = n.min(self.read_buffer.len());
                trace!("read {} bytes", n);
                let frames = self
                    .codec
                    .decode_reporting(&self.read_buffer[..n], &mut self.diagnostics);
                for frame in frames {
                    self.enqueue(frame);
                }
            }
            Err(e) => {
                self.fault("read", &e);
                return Incoming::none();
            }
        }
        match self.pending.pop_front() {
            Some(payload) => self.classify(payload),
            None => Incoming::none(),
        }
    }

    /// Number of decoded frames waiting for `poll`
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Configuration in effect, with bounds applied
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Borrow the diagnostics receiver
    pub fn diagnostics(&self) -> &D {
        &self.diagnostics
    }

    fn enqueue(&mut self, frame: Vec<u8>) {
        if self.pending.len() >= self.config.queue_capacity {
            if let Some(dropped) = self.pending.pop_front() {
                self.diagnostics.frame_dropped(&dropped);
            }
        }
        self.pending.push_back(frame);
    }

    fn classify(&mut self, payload: Vec<u8>) -> Incoming {
        let (token, aux) = MessageToken::classify(Some(payload.as_slice()));
        if token == MessageToken::Unknown {
            self.diagnostics.unknown_message(&payload);
        } else {
            debug!("received {:?} aux 0x{:02x}", token, aux);
        }
        Incoming {
            payload: Some(payload),
            token,
            aux,
        }
    }

    fn write_frame(&mut self, payload: &[u8]) {
        if self.state != LinkState::Open {
            self.diagnostics.io_error(LinkError::NotOpen, "write", &self.state);
            return;
        }
        debug!("sending {:02x?}", payload);
        if let Err(e) = self.transport.write(&FrameCodec::encode(payload)) {
            self.fault("write", &e);
        }
    }

    fn fault(&mut self, operation: &'static str, error: &dyn Debug) {
        self.diagnostics.io_error(LinkError::Io, operation, error);
        self.state = LinkState::Faulted;
    }
}

impl<T: Transport, D: Diagnostics> Drop for ProtocolDriver<T, D> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{END, ESC, ESC_END};
    use test_log::test;

    #[derive(Debug, PartialEq)]
    enum MockError {
        Refused,
        Broken,
    }

    /// transport handing out scripted read chunks and recording writes
    #[derive(Debug, Default)]
    struct MockTransport {
        open: bool,
        refuse_open: bool,
        fail_read: bool,
        fail_write: bool,
        fail_close: bool,
        opens: usize,
        closes: usize,
        rx: VecDeque<Vec<u8>>,
        tx: Vec<Vec<u8>>,
    }

    impl MockTransport {
        fn receive(&mut self, chunk: &[u8]) {
            self.rx.push_back(chunk.to_vec());
        }
    }

    impl Transport for MockTransport {
        type Error = MockError;

        fn open(&mut self, _port: &str) -> Result<(), MockError> {
            if self.refuse_open {
                return Err(MockError::Refused);
            }
            self.opens += 1;
            self.open = true;
            Ok(())
        }

        fn close(&mut self) -> Result<(), MockError> {
            self.closes += 1;
            self.open = false;
            if self.fail_close {
                Err(MockError::Broken)
            } else {
                Ok(())
            }
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, MockError> {
            if self.fail_read {
                return Err(MockError::Broken);
            }
            match self.rx.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.rx.push_front(chunk[n..].to_vec());
                    }
                    Ok(n)
                }
                None => Ok(0),
            }
        }

        fn write(&mut self, bytes: &[u8]) -> Result<(), MockError> {
            if self.fail_write {
                return Err(MockError::Broken);
            }
            self.tx.push(bytes.to_vec());
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct Recorder {
        connection_failures: usize,
        io: Vec<(LinkError, &'static str)>,
        malformed: Vec<LinkError>,
        unknown: Vec<Vec<u8>>,
        dropped: Vec<Vec<u8>>,
    }

    impl Diagnostics for Recorder {
        fn connection_failed(&mut self, _port: &str, _error: &dyn Debug) {
            self.connection_failures += 1;
        }

        fn io_error(&mut self, error: LinkError, operation: &'static str, _detail: &dyn Debug) {
            self.io.push((error, operation));
        }

        fn malformed_frame(&mut self, error: &LinkError, _partial: &[u8]) {
            self.malformed.push(*error);
        }

        fn unknown_message(&mut self, payload: &[u8]) {
            self.unknown.push(payload.to_vec());
        }

        fn frame_dropped(&mut self, payload: &[u8]) {
            self.dropped.push(payload.to_vec());
        }
    }

    fn open_driver(config: DriverConfig) -> ProtocolDriver<MockTransport, Recorder> {
        let mut driver =
            ProtocolDriver::with_diagnostics(MockTransport::default(), config, Recorder::default());
        driver.open("/dev/ttyACM0").unwrap();
        driver
    }

    #[test]
    fn start_command() {
        let mut driver = open_driver(DriverConfig::new());
        driver.send_start(0, 199, true);
        assert_eq!(
            driver.transport().tx,
            vec![FrameCodec::encode(&[0x01, 0x00, 0xc7, 0x01])]
        );
        driver.send_start(10, 20, false);
        assert_eq!(driver.transport().tx[1], vec![END, 0x01, 10, 20, 0x00, END]);
    }

    #[test]
    fn info_and_test_requests() {
        let mut driver = open_driver(DriverConfig::new());
        driver.send_info_request();
        driver.send_test_request();
        assert_eq!(
            driver.transport().tx,
            vec![vec![END, 0x03, END], vec![END, 0x04, END]]
        );
    }

    #[test]
    fn line_checksum() {
        let mut driver = open_driver(DriverConfig::new());
        driver.send_line(5, &[0xff, 0x00], 0x01).unwrap();
        let crc = crc8(&[0x42, 0x05, 0xff, 0x00, 0x01]);
        assert_eq!(crc, 0x67);
        assert_eq!(
            driver.transport().tx,
            vec![FrameCodec::encode(&[0x42, 0x05, 0xff, 0x00, 0x01, crc])]
        );
    }

    #[test]
    fn line_data_is_escaped() {
        let mut driver = open_driver(DriverConfig::new());
        driver.send_line(0, &[END], 0).unwrap();
        let crc = crc8(&[0x42, 0x00, END, 0x00]);
        let mut expected = vec![END, 0x42, 0x00, ESC, ESC_END, 0x00];
        expected.extend_from_slice(&FrameCodec::encode(&[crc])[1..]);
        assert_eq!(driver.transport().tx, vec![expected]);
    }

    #[test]
    fn line_width_is_enforced_when_configured() {
        let mut driver = open_driver(DriverConfig::new().with_line_width(25));
        assert_eq!(
            driver.send_line(1, &[0xff, 0x00], 0),
            Err(LinkError::LineLength {
                expected: 25,
                actual: 2
            })
        );
        assert!(driver.transport().tx.is_empty());
        driver.send_line(1, &[0u8; 25], 0).unwrap();
        assert_eq!(driver.transport().tx.len(), 1);
    }

    #[test]
    fn line_width_is_not_checked_by_default() {
        let mut driver = open_driver(DriverConfig::new());
        driver.send_line(1, &[], 0).unwrap();
        driver.send_line(2, &[0u8; 40], 0).unwrap();
        assert_eq!(driver.transport().tx.len(), 2);
    }

    #[test]
    fn commands_are_written_in_order() {
        let mut driver = open_driver(DriverConfig::new());
        driver.send_info_request();
        driver.send_start(0, 199, false);
        driver.send_line(0, &[0xaa], 0).unwrap();
        driver.send_test_request();
        let commands: Vec<u8> = driver.transport().tx.iter().map(|f| f[1]).collect();
        assert_eq!(commands, vec![0x03, 0x01, 0x42, 0x04]);
    }

    #[test]
    fn poll_returns_replies_in_arrival_order() {
        let mut driver = open_driver(DriverConfig::new());
        let mut stream = FrameCodec::encode(&[0xc1, 0x01]);
        stream.extend(FrameCodec::encode(&[0x82, 0x05]));
        stream.extend(FrameCodec::encode(&[0xc3, 0x05, 0x01, 0x00]));
        let (first, second) = stream.split_at(7);
        driver.transport_mut().receive(first);
        driver.transport_mut().receive(second);

        let reply = driver.poll();
        assert_eq!(reply.payload, Some(vec![0xc1, 0x01]));
        assert_eq!(reply.token, MessageToken::ConfirmStart);
        assert_eq!(reply.aux, 0x01);

        let reply = driver.poll();
        assert_eq!(reply.token, MessageToken::RequestLine);
        assert_eq!(reply.aux, 0x05);
        assert_eq!(driver.pending(), 1);

        let reply = driver.poll();
        assert_eq!(reply.payload, Some(vec![0xc3, 0x05, 0x01, 0x00]));
        assert_eq!(reply.token, MessageToken::ConfirmInfo);

        assert_eq!(driver.poll(), Incoming::none());
    }

    #[test]
    fn reply_split_over_many_reads() {
        let mut driver = open_driver(DriverConfig::new().with_read_chunk(2));
        driver
            .transport_mut()
            .receive(&FrameCodec::encode(&[0x84, 0x01, 0xc0, 0xdb]));
        let mut reply = Incoming::none();
        for _ in 0..8 {
            reply = driver.poll();
            if !reply.is_none() {
                break;
            }
        }
        assert_eq!(reply.token, MessageToken::IndicateState);
        assert_eq!(reply.payload, Some(vec![0x84, 0x01, 0xc0, 0xdb]));
    }

    #[test]
    fn unknown_reply_is_surfaced() {
        let mut driver = open_driver(DriverConfig::new());
        driver.transport_mut().receive(&FrameCodec::encode(&[0x99]));
        let reply = driver.poll();
        assert_eq!(reply.payload, Some(vec![0x99]));
        assert_eq!(reply.token, MessageToken::Unknown);
        assert_eq!(reply.aux, 0);
        assert_eq!(driver.diagnostics().unknown, vec![vec![0x99]]);
    }

    #[test]
    fn malformed_frame_is_reported_and_skipped() {
        let mut driver = open_driver(DriverConfig::new());
        driver
            .transport_mut()
            .receive(&[END, 0xc4, ESC, 0x00, END, END, 0xc4, 0x01, END]);
        let reply = driver.poll();
        assert_eq!(reply.token, MessageToken::ConfirmTest);
        assert_eq!(reply.aux, 0x01);
        assert_eq!(
            driver.diagnostics().malformed,
            vec![LinkError::InvalidEscape(0x00)]
        );
    }

    #[test]
    fn queue_drops_oldest_when_full() {
        let mut driver = open_driver(DriverConfig::new().with_queue_capacity(2));
        let mut stream = FrameCodec::encode(&[0x82, 0x01]);
        stream.extend(FrameCodec::encode(&[0x82, 0x02]));
        stream.extend(FrameCodec::encode(&[0x82, 0x03]));
        driver.transport_mut().receive(&stream);
        assert_eq!(driver.poll().aux, 0x02);
        assert_eq!(driver.poll().aux, 0x03);
        assert!(driver.poll().is_none());
        assert_eq!(driver.diagnostics().dropped, vec![vec![0x82, 0x01]]);
    }

    #[test]
    fn overlong_reply_is_reported_and_skipped() {
        let mut driver = open_driver(DriverConfig::new().with_max_frame(8));
        let mut stream = vec![END];
        stream.extend_from_slice(&[0x84; 12]);
        stream.extend(FrameCodec::encode(&[0x84, 0x01]));
        driver.transport_mut().receive(&stream);
        let reply = driver.poll();
        assert_eq!(reply.payload, Some(vec![0x84, 0x01]));
        assert_eq!(
            driver.diagnostics().malformed,
            vec![LinkError::FrameTooLong(8)]
        );
        assert!(driver.poll().is_none());
    }

    #[test]
    fn zero_queue_capacity_keeps_one_frame() {
        let driver = open_driver(
            DriverConfig::new()
                .with_queue_capacity(0)
                .with_max_frame(0),
        );
        assert_eq!(driver.config().queue_capacity, 1);
        assert_eq!(driver.config().max_frame, 1);
    }

    #[test]
    fn closed_driver_is_quiet() {
        let mut driver = ProtocolDriver::with_diagnostics(
            MockTransport::default(),
            DriverConfig::new(),
            Recorder::default(),
        );
        driver.transport_mut().receive(&FrameCodec::encode(&[0xc1, 0x01]));
        assert!(!driver.is_open());
        assert_eq!(driver.poll(), Incoming::none());
        driver.send_info_request();
        assert!(driver.transport().tx.is_empty());
        assert_eq!(driver.diagnostics().io, vec![(LinkError::NotOpen, "write")]);
    }

    #[test]
    fn close_is_idempotent() {
        let mut driver = ProtocolDriver::new(MockTransport::default());
        driver.close();
        driver.close();
        assert!(!driver.is_open());
        assert_eq!(driver.transport().closes, 0);

        driver.open("/dev/ttyACM0").unwrap();
        assert!(driver.is_open());
        driver.close();
        driver.close();
        assert!(!driver.is_open());
        assert_eq!(driver.transport().closes, 1);
    }

    #[test]
    fn failed_close_still_closes() {
        let mut driver = open_driver(DriverConfig::new());
        driver.transport_mut().fail_close = true;
        driver.close();
        assert_eq!(driver.state(), LinkState::Closed);
        assert_eq!(driver.diagnostics().io, vec![(LinkError::Io, "close")]);
    }

    #[test]
    fn open_failure_leaves_driver_closed() {
        let transport = MockTransport {
            refuse_open: true,
            ..MockTransport::default()
        };
        let mut driver =
            ProtocolDriver::with_diagnostics(transport, DriverConfig::new(), Recorder::default());
        assert_eq!(driver.open("/dev/missing"), Err(LinkError::Connection));
        assert!(!driver.is_open());
        assert_eq!(driver.state(), LinkState::Closed);
        assert_eq!(driver.diagnostics().connection_failures, 1);
    }

    #[test]
    fn open_twice_is_noop() {
        let mut driver = open_driver(DriverConfig::new());
        assert_eq!(driver.open("/dev/ttyACM0"), Ok(()));
        assert_eq!(driver.transport().opens, 1);
    }

    #[test]
    fn reopen_discards_partial_frames() {
        let mut driver = open_driver(DriverConfig::new());
        driver.transport_mut().receive(&[END, 0xc1]);
        assert!(driver.poll().is_none());
        driver.close();
        driver.open("/dev/ttyACM0").unwrap();
        driver.transport_mut().receive(&[0x07, END]);
        let reply = driver.poll();
        assert_eq!(reply.payload, Some(vec![0x07]));
        assert_eq!(reply.token, MessageToken::Unknown);
    }

    #[test]
    fn read_error_faults_until_reopened() {
        let mut driver = open_driver(DriverConfig::new());
        driver.transport_mut().fail_read = true;
        assert!(driver.poll().is_none());
        assert_eq!(driver.state(), LinkState::Faulted);
        assert!(!driver.is_open());
        assert_eq!(driver.diagnostics().io, vec![(LinkError::Io, "read")]);

        driver.transport_mut().fail_read = false;
        driver.transport_mut().receive(&FrameCodec::encode(&[0xc4, 0x01]));
        assert!(driver.poll().is_none());

        driver.open("/dev/ttyACM0").unwrap();
        assert_eq!(driver.transport().closes, 1);
        assert_eq!(driver.transport().opens, 2);
        assert_eq!(driver.poll().token, MessageToken::ConfirmTest);
    }

    #[test]
    fn write_error_faults() {
        let mut driver = open_driver(DriverConfig::new());
        driver.transport_mut().fail_write = true;
        driver.send_test_request();
        assert_eq!(driver.state(), LinkState::Faulted);
        driver.send_info_request();
        assert_eq!(
            driver.diagnostics().io,
            vec![(LinkError::Io, "write"), (LinkError::NotOpen, "write")]
        );
    }

    #[test]
    fn drop_closes_transport() {
        let mut transport = MockTransport::default();
        {
            let mut driver = ProtocolDriver::new(&mut transport);
            driver.open("/dev/ttyACM0").unwrap();
            driver.send_info_request();
        }
        assert!(!transport.open);
        assert_eq!(transport.closes, 1);
        assert_eq!(transport.tx.len(), 1);
    }
}
