//! Radio Stack Module
//!
//! The binding never talks to an adapter directly. Everything it needs from the
//! host's Bluetooth stack goes through these traits, so a real stack and an
//! in-process stub are interchangeable.
//!
//! Failures are opaque `anyhow::Error`s; the access layer wraps them with
//! device, service and characteristic context.

use crate::domain::locator::DeviceAddress;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Values pushed by a characteristic after notifications were enabled.
///
/// The stream ends when the stack drops its sender.
pub type NotificationStream = mpsc::UnboundedReceiver<Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Acknowledged write request.
    WithResponse,
    /// Write command, no acknowledgement.
    WithoutResponse,
}

/// One manufacturer-specific entry of an advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManufacturerData {
    pub company_id: u16,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait RadioStack: Send + Sync {
    async fn start_discovery(&self) -> Result<()>;

    async fn stop_discovery(&self) -> Result<()>;

    async fn is_discovering(&self) -> Result<bool>;

    /// Resolve once `address` has been observed by an active discovery.
    ///
    /// Implementations may wait indefinitely; callers bound the wait.
    async fn wait_for_device(&self, address: DeviceAddress) -> Result<Arc<dyn Peripheral>>;

    /// Manufacturer data last advertised by `address`, in advertisement order.
    async fn manufacturer_data(&self, address: DeviceAddress) -> Result<Vec<ManufacturerData>>;
}

#[async_trait]
pub trait Peripheral: Send + Sync {
    fn address(&self) -> DeviceAddress;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn gatt_session(&self) -> Result<Arc<dyn GattSession>>;
}

#[async_trait]
pub trait GattSession: Send + Sync {
    /// Primary service by UUID, `None` when the device does not offer it.
    async fn service(&self, uuid: Uuid) -> Result<Option<Arc<dyn GattService>>>;
}

#[async_trait]
pub trait GattService: Send + Sync {
    async fn characteristic(&self, uuid: Uuid) -> Result<Option<Arc<dyn GattCharacteristic>>>;
}

#[async_trait]
pub trait GattCharacteristic: Send + Sync {
    async fn read_value(&self) -> Result<Vec<u8>>;

    async fn write_value(&self, value: &[u8], mode: WriteMode) -> Result<()>;

    async fn start_notifications(&self) -> Result<NotificationStream>;

    async fn stop_notifications(&self) -> Result<()>;
}
