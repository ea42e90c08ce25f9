use serialport::SerialPort;
use std::io::{self, ErrorKind, Read};
use std::time::{Duration, Instant};

use crate::config::SerialConfig;

/// Byte source the handshake reads from
pub trait Channel: Send {
    /// Read whatever arrives within the per-read timeout; `Ok(0)` when nothing did
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens a fresh channel for each handshake attempt
pub trait ChannelOpener: Send {
    fn open(&self) -> io::Result<Box<dyn Channel>>;

    /// Human-readable name for log lines
    fn describe(&self) -> String;
}

/// Serial port opener (8N1, no flow control)
pub struct SerialOpener {
    config: SerialConfig,
}

impl SerialOpener {
    pub fn new(config: SerialConfig) -> Self {
        SerialOpener { config }
    }
}

impl ChannelOpener for SerialOpener {
    fn open(&self) -> io::Result<Box<dyn Channel>> {
        let mut port = serialport::new(&self.config.port, self.config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(self.config.read_timeout_ms))
            .open()?;

        // Keep DTR asserted while reading
        if let Err(e) = port.write_data_terminal_ready(true) {
            log::warn!("Failed to set DTR on {}: {}", self.config.port, e);
        }

        // Drop anything left over from a previous attempt
        if let Err(e) = port.clear(serialport::ClearBuffer::Input) {
            log::warn!("Failed to clear input buffer on {}: {}", self.config.port, e);
        }

        Ok(Box::new(SerialChannel { port }))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.config.port, self.config.baud_rate)
    }
}

/// Open serial port; closed when dropped
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl Channel for SerialChannel {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e),
        }
    }
}

/// Time source for the handshake deadline
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Total time budget measured from the moment it starts, not from the last byte
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn start(clock: &dyn Clock, budget: Duration) -> Self {
        Deadline {
            started: clock.now(),
            budget,
        }
    }

    pub fn elapsed(&self, clock: &dyn Clock) -> Duration {
        clock.now().saturating_duration_since(self.started)
    }

    pub fn expired(&self, clock: &dyn Clock) -> bool {
        self.elapsed(clock) >= self.budget
    }
}
