//! Parameter store: the public surface of the MEX driver.
//!
//! [`ParameterStore`] resolves logical parameter names to protocol tags, runs
//! request/response cycles over the shared [`Transport`], and keeps a debounced
//! snapshot of the device status.
//!
//! # Usage
//!
//! ```rust,ignore
//! use optogama_mex::{ParameterStore, SerialConfig};
//! use std::time::Instant;
//!
//! let store = ParameterStore::open(&SerialConfig::new("/dev/ttyMEX")).await?;
//! store.set("wavelength", 1064.0).await?;
//! let magnification = store.get("magnification").await?;
//! let status = store.refresh_status(Instant::now()).await?;
//! store.close().await?;
//! ```
//!
//! # Concurrency
//!
//! Every cycle holds the port gate (an async mutex around the transport) from
//! the write until the reply has been read, so concurrent callers queue up
//! instead of interleaving bytes on the wire. The status snapshot lives behind
//! its own lock and is replaced whole.

use crate::codec::{self, ParameterTag, STATUS_QUERY};
use crate::error::{MexError, MexResult};
use crate::serial::{SerialConfig, Transport};
use crate::status::{self, DeviceState, DeviceStatus};
use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::instrument;

/// Minimum age of the cached status before `refresh_status` goes to the wire.
pub const STATUS_DEBOUNCE: Duration = Duration::from_millis(200);

/// Logical parameter names and the tags they map to.
pub const PARAMETER_TABLE: [(&str, ParameterTag); 4] = [
    ("wavelength", ParameterTag::Cwl),
    ("magnification", ParameterTag::Mag),
    ("mag_offset", ParameterTag::Mof),
    ("divergence", ParameterTag::Dof),
];

/// Resolve a logical parameter name.
///
/// # Errors
///
/// [`MexError::UnknownParameter`] if `name` is not in [`PARAMETER_TABLE`].
pub fn resolve(name: &str) -> MexResult<ParameterTag> {
    PARAMETER_TABLE
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, tag)| *tag)
        .ok_or_else(|| MexError::UnknownParameter(name.to_string()))
}

/// Last successfully decoded status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Decoded status word
    pub status: DeviceStatus,
    /// Bit 6 of the status word
    pub limit_low: bool,
    /// Bit 7 of the status word
    pub limit_high: bool,
    /// Caller-supplied time of the refresh that produced this snapshot
    pub refreshed_at: Instant,
}

impl StatusSnapshot {
    fn new(status: DeviceStatus, refreshed_at: Instant) -> Self {
        Self {
            status,
            limit_low: status.limit_low(),
            limit_high: status.limit_high(),
            refreshed_at,
        }
    }

    /// Device state derived from the status word.
    pub fn state(&self) -> DeviceState {
        self.status.state()
    }
}

/// Driver for the Optogama MEX motorized beam expander.
pub struct ParameterStore {
    /// Port gate: one request/response cycle at a time
    gate: Mutex<Transport>,
    /// `None` until the first successful status refresh
    snapshot: RwLock<Option<StatusSnapshot>>,
    debounce: Duration,
}

impl ParameterStore {
    /// Open the serial port and build a store around it.
    ///
    /// # Errors
    ///
    /// [`MexError::Connection`] if the port cannot be opened.
    pub async fn open(config: &SerialConfig) -> MexResult<Self> {
        Ok(Self::new(Transport::open(config).await?))
    }

    /// Build a store over an open transport with the default debounce window.
    pub fn new(transport: Transport) -> Self {
        Self::with_debounce(transport, STATUS_DEBOUNCE)
    }

    /// Build a store with a custom status debounce window.
    pub fn with_debounce(transport: Transport, debounce: Duration) -> Self {
        Self {
            gate: Mutex::new(transport),
            snapshot: RwLock::new(None),
            debounce,
        }
    }

    /// Status debounce window in use.
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// One command/reply cycle on an already held transport.
    async fn transaction(transport: &mut Transport, command: &str) -> MexResult<String> {
        transport.send_line(command).await?;
        transport.read_line().await
    }

    /// Send an arbitrary line and return the reply as-is.
    ///
    /// No validation is applied; an empty string means the read timed out.
    #[instrument(skip(self), err)]
    pub async fn query_raw(&self, command: &str) -> MexResult<String> {
        let mut transport = self.gate.lock().await;
        Self::transaction(&mut transport, command).await
    }

    /// Read a parameter by logical name (`wavelength`, `magnification`,
    /// `mag_offset`, `divergence`).
    #[instrument(skip(self), err)]
    pub async fn get(&self, name: &str) -> MexResult<f64> {
        self.get_tag(resolve(name)?).await
    }

    /// Write a parameter by logical name.
    #[instrument(skip(self), err)]
    pub async fn set(&self, name: &str, value: f64) -> MexResult<()> {
        self.set_tag(resolve(name)?, value).await
    }

    /// Read a parameter by tag.
    pub async fn get_tag(&self, tag: ParameterTag) -> MexResult<f64> {
        let request = codec::build_query(tag);
        let reply = {
            let mut transport = self.gate.lock().await;
            Self::transaction(&mut transport, &request).await?
        };
        let value = codec::parse_query_reply(tag, &reply)?;
        tracing::debug!(%tag, value, "MEX parameter read");
        Ok(value)
    }

    /// Write a parameter by tag. Only the echoed tag is verified.
    pub async fn set_tag(&self, tag: ParameterTag, value: f64) -> MexResult<()> {
        let request = codec::build_set(tag, value)?;
        let reply = {
            let mut transport = self.gate.lock().await;
            Self::transaction(&mut transport, &request).await?
        };
        codec::parse_set_reply(tag, &reply)?;
        tracing::debug!(%tag, value, "MEX parameter written");
        Ok(())
    }

    /// Refresh the status snapshot, at most once per debounce window.
    ///
    /// If the cached snapshot is no older than the window at `now`, it is
    /// returned without touching the port. Otherwise the status is queried,
    /// decoded and stored. On error the previous snapshot is kept.
    #[instrument(skip(self), err)]
    pub async fn refresh_status(&self, now: Instant) -> MexResult<DeviceStatus> {
        let mut transport = self.gate.lock().await;

        if let Some(cached) = *self.snapshot.read() {
            if now.saturating_duration_since(cached.refreshed_at) <= self.debounce {
                return Ok(cached.status);
            }
        }

        let reply = Self::transaction(&mut transport, STATUS_QUERY).await?;
        let status = status::decode(status::parse_status(&reply)?);
        let snapshot = StatusSnapshot::new(status, now);
        let previous = self.snapshot.write().replace(snapshot);

        let state = status.state();
        if previous.map(|p| p.state()) != Some(state) {
            tracing::info!(%state, %status, "MEX device state changed");
        }
        tracing::debug!(
            %status,
            limit_low = snapshot.limit_low,
            limit_high = snapshot.limit_high,
            "MEX status refreshed"
        );

        Ok(status)
    }

    /// Limit-low flag from the last snapshot; `false` before the first refresh.
    pub fn read_limit_low(&self) -> bool {
        self.snapshot.read().map_or(false, |s| s.limit_low)
    }

    /// Limit-high flag from the last snapshot; `false` before the first refresh.
    pub fn read_limit_high(&self) -> bool {
        self.snapshot.read().map_or(false, |s| s.limit_high)
    }

    /// Cached device state, `None` until the first refresh succeeds.
    pub fn state(&self) -> Option<DeviceState> {
        self.snapshot().map(|s| s.state())
    }

    /// Last successful status snapshot, if any.
    pub fn snapshot(&self) -> Option<StatusSnapshot> {
        *self.snapshot.read()
    }

    /// Close the serial port. Waits for any in-flight cycle first.
    pub async fn close(&self) -> MexResult<()> {
        self.gate.lock().await.close().await
    }
}

impl std::fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterStore")
            .field("snapshot", &self.snapshot())
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}
