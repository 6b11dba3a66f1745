//! Characteristic access on a live connection.

use crate::domain::locator::DeviceAddress;
use crate::error::{BindingError, BindingResult};
use crate::infrastructure::bluetooth::connection::Connection;
use crate::infrastructure::bluetooth::radio::{GattCharacteristic, NotificationStream, WriteMode};
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// A resolved characteristic; every failure carries device, service and
/// characteristic context.
#[derive(Clone)]
pub struct CharacteristicHandle {
    device: DeviceAddress,
    service: Uuid,
    characteristic: Uuid,
    inner: Arc<dyn GattCharacteristic>,
}

impl CharacteristicHandle {
    /// Resolve the service, then the characteristic, on `connection`.
    pub async fn resolve(connection: &Connection, service: Uuid, characteristic: Uuid) -> BindingResult<Self> {
        let device = connection.address;
        let context = format!("service {service} of {device}");

        let gatt_service = connection
            .session
            .service(service)
            .await
            .map_err(|source| BindingError::Radio {
                operation: "get_service",
                context: context.clone(),
                source,
            })?
            .ok_or(BindingError::ServiceNotFound { device, service })?;
        debug!("Got primary service {} on {}", service, device);

        let inner = gatt_service
            .characteristic(characteristic)
            .await
            .map_err(|source| BindingError::Radio {
                operation: "get_characteristic",
                context,
                source,
            })?
            .ok_or(BindingError::CharacteristicNotFound {
                device,
                service,
                characteristic,
            })?;
        debug!(
            "Got characteristic {} from service {} of {}",
            characteristic, service, device
        );

        Ok(Self {
            device,
            service,
            characteristic,
            inner,
        })
    }

    fn context(&self) -> String {
        format!(
            "characteristic {} of service {} on {}",
            self.characteristic, self.service, self.device
        )
    }

    fn wrap(&self, operation: &'static str) -> impl FnOnce(anyhow::Error) -> BindingError + '_ {
        move |source| BindingError::Radio {
            operation,
            context: self.context(),
            source,
        }
    }

    pub async fn read(&self) -> BindingResult<Vec<u8>> {
        let value = self.inner.read_value().await.map_err(self.wrap("read"))?;
        trace!("Read {} byte(s) from {}: {:02X?}", value.len(), self.context(), value);
        Ok(value)
    }

    pub async fn write(&self, value: &[u8], mode: WriteMode) -> BindingResult<()> {
        trace!("Writing {:02X?} to {} ({:?})", value, self.context(), mode);
        let operation = match mode {
            WriteMode::WithResponse => "write",
            WriteMode::WithoutResponse => "write-without-response",
        };
        self.inner
            .write_value(value, mode)
            .await
            .map_err(self.wrap(operation))
    }

    pub async fn start_notifications(&self) -> BindingResult<NotificationStream> {
        debug!("Starting notifications on {}", self.context());
        self.inner
            .start_notifications()
            .await
            .map_err(self.wrap("start_notifications"))
    }

    pub async fn stop_notifications(&self) -> BindingResult<()> {
        debug!("Stopping notifications on {}", self.context());
        self.inner
            .stop_notifications()
            .await
            .map_err(self.wrap("stop_notifications"))
    }
}
