//! Serial transport to the bootloader.
//!
//! The bootloader UART runs at a fixed 115200 baud, 8 data bits, no parity,
//! one stop bit and no flow control. Only the device path and the read
//! timeout vary between hosts, so that is all [`SerialConfig`] carries.
//!
//! The OTA client talks to a [`Port`]: a blocking byte stream whose reads
//! give up after [`Port::timeout`]. [`NativePort`] is the `serialport`
//! backed implementation.
//!
//! ```text
//! OtaClient --frames--> Port --bytes--> UART --> bootloader
//!           <--status--      <--byte---
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::io::Write;
//!
//! use swordota::port::{NativePort, Port, SerialConfig};
//!
//! fn main() -> swordota::Result<()> {
//!     let mut port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0"))?;
//!     port.write_all(&[0u8; 80])?;
//!     port.close()
//! }
//! ```

pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Baud rate of the bootloader UART.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default serial device on Linux hosts.
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Read timeout used until the client installs its acknowledgment timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Where and how long to wait; the line settings are fixed at 8N1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Bootloader settings on `port_name`.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PORT)
    }
}

/// A serial device found on the host.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Device path.
    pub name: String,
    /// USB vendor ID, for USB adapters.
    pub vid: Option<u16>,
    /// USB product ID, for USB adapters.
    pub pid: Option<u16>,
    /// USB product string, if the adapter reports one.
    pub product: Option<String>,
}

/// Byte stream to the device.
///
/// Reads block for at most [`Port::timeout`] and fail with
/// [`std::io::ErrorKind::TimedOut`] when nothing arrives.
pub trait Port: Read + Write + Send {
    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Current read timeout.
    fn timeout(&self) -> Duration;

    /// Drop anything buffered in either direction.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Device path.
    fn name(&self) -> &str;

    /// Release the device. Further I/O fails with `NotConnected`.
    fn close(&mut self) -> Result<()>;
}

/// Listing of the serial devices present on the host.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

pub use native::{NativePort, NativePortEnumerator};
