//! Schema-driven BLE GATT/GAP binding.
//!
//! Resources are described declaratively (locator plus payload schema); the
//! binding connects on demand, drops idle links, and converts characteristic
//! bytes to and from typed [`Value`]s.

pub mod codec;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::locator::{DeviceAddress, OperationKind, ResourceLocator, Verb};
pub use domain::resource::{Resource, ResourceCatalog};
pub use domain::schema::ResourceSchema;
pub use domain::settings::{BindingSettings, SettingsService};
pub use domain::value::Value;
pub use error::{BindingError, BindingResult, CodecError, CodecResult};
pub use infrastructure::bluetooth::{BluetoothService, Subscription};
