//! # Optogama MEX Beam Expander Driver
//!
//! Control magnification, wavelength and offset factors of an Optogama
//! motorized beam expander connected via serial.
//!
//! ## Crate Structure
//!
//! - **`serial`**: [`Transport`], the line-oriented serial connection (57600 baud,
//!   8O2, 1 s read timeout).
//! - **`codec`**: the `MEX>` wire grammar. Builds requests and validates the
//!   echoed replies.
//! - **`status`**: decodes the 8-bit status word into [`DeviceState`] and the two
//!   limit-switch flags.
//! - **`store`**: [`ParameterStore`], the `get`/`set`/`refresh_status` surface an
//!   instrument host drives.
//! - **`error`**: [`MexError`], returned by every fallible operation.
//! - **`config`**: [`MexConfig`], defaults layered with `MEX_*` environment variables.
//! - **`logging`**: `tracing-subscriber` setup.
//!
//! ## Example
//!
//! ```rust,ignore
//! use optogama_mex::{MexConfig, ParameterStore};
//! use std::time::Instant;
//!
//! let config = MexConfig::load()?;
//! let store = ParameterStore::open(&config.serial()).await?;
//!
//! store.set("wavelength", 1064.0).await?;
//! let status = store.refresh_status(Instant::now()).await?;
//! println!("{} limit_low={}", status.state(), store.read_limit_low());
//!
//! store.close().await?;
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod serial;
pub mod status;
pub mod store;

pub use codec::ParameterTag;
pub use config::MexConfig;
pub use error::{ErrorKind, MexError, MexResult};
pub use serial::{SerialConfig, Transport};
pub use status::{DeviceState, DeviceStatus};
pub use store::{ParameterStore, StatusSnapshot};
