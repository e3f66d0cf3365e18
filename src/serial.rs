//! Serial transport for the MEX line protocol.
//!
//! The beam expander speaks newline-terminated ASCII at 57600 baud, 8 data bits,
//! odd parity and two stop bits. [`Transport`] owns one such connection and offers
//! exactly two primitives, [`Transport::send_line`] and [`Transport::read_line`].
//!
//! # Types
//!
//! - [`SerialConfig`]: connection settings, fixed once the port is open
//! - [`SerialPortIO`]: trait alias combining `AsyncRead + AsyncWrite` for serial ports
//! - [`DynSerial`]: type-erased boxed serial port
//!
//! Any [`SerialPortIO`] can back a transport, so tests drive it with
//! `tokio::io::duplex` instead of hardware:
//!
//! ```rust,ignore
//! let (host, device) = tokio::io::duplex(64);
//! let mut transport = Transport::from_port("test", Box::new(device), Duration::from_secs(1));
//! ```

use crate::error::{MexError, MexResult};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Default serial device of the expander.
pub const DEFAULT_PORT: &str = "/dev/ttyMEX";

/// Line rate of the MEX controller.
pub const BAUD_RATE: u32 = 57_600;

/// How long [`Transport::read_line`] waits for a terminator.
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Bounded wait for stale input before each command goes out.
pub const DRAIN_WINDOW: Duration = Duration::from_millis(20);

/// Trait alias for async serial port I/O.
///
/// Implemented by `tokio_serial::SerialStream` (real hardware),
/// `tokio::io::DuplexStream` (testing) and any mock with the async I/O traits.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Connection settings for the expander's serial line.
///
/// Only the port and the read timeout vary; the framing is fixed by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialConfig {
    /// Serial port path (e.g. "/dev/ttyMEX", "COM3")
    pub port: String,
    /// Bounded wait for one reply line
    pub timeout: Duration,
}

impl SerialConfig {
    /// Settings for `port` with the standard one second read timeout.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            timeout: READ_TIMEOUT,
        }
    }

    /// Override the read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fixed line rate, [`BAUD_RATE`].
    pub fn baud_rate(&self) -> u32 {
        BAUD_RATE
    }

    /// Eight data bits.
    pub fn data_bits(&self) -> tokio_serial::DataBits {
        tokio_serial::DataBits::Eight
    }

    /// Odd parity.
    pub fn parity(&self) -> tokio_serial::Parity {
        tokio_serial::Parity::Odd
    }

    /// Two stop bits.
    pub fn stop_bits(&self) -> tokio_serial::StopBits {
        tokio_serial::StopBits::Two
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PORT)
    }
}

/// One open serial conversation with the expander.
///
/// Not reentrant: a `send_line` must be followed by its `read_line` before the
/// next command goes out. The store enforces this with its port gate.
///
/// The port is released by [`Transport::close`] or, failing that, on drop.
pub struct Transport {
    port_name: String,
    port: Option<BufReader<DynSerial>>,
    timeout: Duration,
}

impl Transport {
    /// Open the serial port described by `config`.
    ///
    /// Opening is wrapped in `spawn_blocking` so the async runtime is not
    /// stalled while the OS configures the line.
    ///
    /// # Errors
    ///
    /// Returns [`MexError::Connection`] if the port cannot be opened with the
    /// expander's settings.
    pub async fn open(config: &SerialConfig) -> MexResult<Self> {
        use tokio::task::spawn_blocking;
        use tokio_serial::SerialPortBuilderExt;

        let builder = tokio_serial::new(&config.port, config.baud_rate())
            .data_bits(config.data_bits())
            .parity(config.parity())
            .stop_bits(config.stop_bits())
            .flow_control(tokio_serial::FlowControl::None);

        let port = spawn_blocking(move || builder.open_native_async())
            .await
            .map_err(|e| {
                MexError::connection(&config.port, format!("port opening task failed: {}", e))
            })?
            .map_err(|e| MexError::connection(&config.port, e.to_string()))?;

        tracing::info!(port = %config.port, baud = BAUD_RATE, "MEX serial port opened");

        Ok(Self::from_port(
            config.port.clone(),
            Box::new(port),
            config.timeout,
        ))
    }

    /// Wrap an already open port.
    pub fn from_port(port_name: impl Into<String>, port: DynSerial, timeout: Duration) -> Self {
        Self {
            port_name: port_name.into(),
            port: Some(BufReader::new(port)),
            timeout,
        }
    }

    /// Name the port was opened with.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// `false` once [`Transport::close`] has run.
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn port_mut(&mut self) -> MexResult<&mut BufReader<DynSerial>> {
        let name = &self.port_name;
        self.port
            .as_mut()
            .ok_or_else(|| MexError::connection(name.as_str(), "port is closed"))
    }

    /// Discard input left over from an earlier exchange.
    ///
    /// Empties the read buffer, then reads and drops whatever arrives within
    /// [`DRAIN_WINDOW`]. A late reply to a timed-out command ends up here
    /// instead of being taken for the answer to the next one. Returns the
    /// number of bytes dropped.
    pub async fn drain(&mut self) -> MexResult<usize> {
        let port = self.port_mut()?;

        let mut discarded = port.buffer().len();
        port.consume(discarded);

        let mut scratch = [0u8; 256];
        let deadline = tokio::time::Instant::now() + DRAIN_WINDOW;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, port.get_mut().read(&mut scratch)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => discarded += n,
                // read errors surface on the exchange that follows
                Ok(Err(_)) | Err(_) => break,
            }
        }

        if discarded > 0 {
            tracing::debug!(port = %self.port_name, discarded, "MEX discarded stale input");
        }
        Ok(discarded)
    }

    /// Write `text` followed by a single `\n`.
    ///
    /// Stale input is drained first (see [`Transport::drain`]), so the next
    /// [`Transport::read_line`] only sees bytes sent after this command.
    ///
    /// # Errors
    ///
    /// [`MexError::Io`] on write failure, [`MexError::Connection`] after close.
    pub async fn send_line(&mut self, text: &str) -> MexResult<()> {
        self.drain().await?;
        tracing::trace!(port = %self.port_name, line = %text.escape_default(), "MEX send");
        let line = format!("{}\n", text);
        let port = self.port_mut()?.get_mut();
        port.write_all(line.as_bytes()).await?;
        port.flush().await?;
        Ok(())
    }

    /// Read one reply line, waiting at most the configured timeout.
    ///
    /// The line terminator (`\n`, optionally preceded by `\r`) is stripped. If
    /// the timeout elapses first, whatever arrived so far is returned, possibly
    /// an empty string. A timeout is not an error here; the codec reports the
    /// truncated reply.
    ///
    /// # Errors
    ///
    /// [`MexError::Io`] on read failure, [`MexError::Connection`] after close.
    pub async fn read_line(&mut self) -> MexResult<String> {
        let timeout = self.timeout;
        let port = self.port_mut()?;

        // read_until keeps partial bytes in `buf` when the timeout cancels it
        let mut buf = Vec::with_capacity(64);
        let timed_out = match tokio::time::timeout(timeout, port.read_until(b'\n', &mut buf)).await
        {
            Ok(result) => {
                result?;
                false
            }
            Err(_) => true,
        };

        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(&['\r', '\n'][..])
            .to_string();

        if timed_out {
            tracing::debug!(
                port = %self.port_name,
                partial = %line.escape_default(),
                timeout_ms = timeout.as_millis() as u64,
                "MEX read timed out"
            );
        } else {
            tracing::trace!(port = %self.port_name, line = %line.escape_default(), "MEX recv");
        }

        Ok(line)
    }

    /// Release the port. Calling this again is a no-op.
    pub async fn close(&mut self) -> MexResult<()> {
        if let Some(mut port) = self.port.take() {
            let result = port.get_mut().shutdown().await;
            tracing::info!(port = %self.port_name, "MEX serial port closed");
            result?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("port_name", &self.port_name)
            .field("open", &self.is_open())
            .field("timeout", &self.timeout)
            .finish()
    }
}
