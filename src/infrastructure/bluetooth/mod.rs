//! Bluetooth Module
//!
//! Connection-managed access to GATT characteristics and GAP advertisements.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     BluetoothService                      │
//! │   (façade: read / write / invoke / subscribe / close)     │
//! └───────────┬──────────────────┬───────────────────────────┘
//!             │                  │
//!             ▼                  ▼
//! ┌───────────────────┐  ┌──────────────────┐
//! │ ConnectionManager │  │ Characteristic   │
//! │ - idle timers     │  │ Handle           │
//! │ - hold counting   │  │ - service lookup │
//! └─────────┬─────────┘  │ - raw read/write │
//!           │            └──────────────────┘
//!           ▼
//! ┌───────────────────┐
//! │ Discovery         │
//! │ Coordinator       │
//! └─────────┬─────────┘
//!           ▼
//!      RadioStack (host Bluetooth stack)
//! ```
//!
//! ## Modules
//!
//! - [`radio`] - Traits the host Bluetooth stack implements
//! - [`scanner`] - Shared, reference-counted discovery
//! - [`connection`] - Connection registry, idle disconnect and holds
//! - [`access`] - Service/characteristic resolution and raw operations
//! - [`service`] - Main service coordinator
//! - `winrt` - Windows radio stack (Windows only)

pub mod access;
pub mod connection;
pub mod radio;
pub mod scanner;
pub mod service;
#[cfg(windows)]
pub mod winrt;

// Re-export main service for convenience
pub use service::{BluetoothService, Subscription};
#[cfg(windows)]
pub use winrt::WinRtRadio;
