//! Bluetooth Service Module
//!
//! Binding façade: turns resource-level read/write/invoke/subscribe calls into
//! connection management, characteristic access and transcoding.
//!
//! Every GATT operation runs under a connection lease, so the idle timer is
//! suspended while the operation touches the link and re-armed once it is done.

use crate::codec::{decode, encode};
use crate::domain::locator::{DeviceAddress, OperationKind, ResourceLocator, Scheme, Verb};
use crate::domain::resource::{Resource, ResourceCatalog};
use crate::domain::schema::ResourceSchema;
use crate::domain::settings::BindingSettings;
use crate::domain::value::Value;
use crate::error::{BindingError, BindingResult};
use crate::infrastructure::bluetooth::access::CharacteristicHandle;
use crate::infrastructure::bluetooth::connection::{ConnectionConfig, ConnectionLease, ConnectionManager};
use crate::infrastructure::bluetooth::radio::{ManufacturerData, NotificationStream, RadioStack, WriteMode};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MANUFACTURER_DATA: &str = "manufacturerData";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Main Bluetooth service coordinating all BLE operations
pub struct BluetoothService {
    radio: Arc<dyn RadioStack>,
    connections: ConnectionManager,
}

impl BluetoothService {
    pub fn new(radio: Arc<dyn RadioStack>, settings: &BindingSettings) -> Self {
        Self::with_config(radio, ConnectionConfig::from(settings))
    }

    pub fn with_config(radio: Arc<dyn RadioStack>, config: ConnectionConfig) -> Self {
        Self {
            connections: ConnectionManager::new(Arc::clone(&radio), config),
            radio,
        }
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Read and decode a property.
    pub async fn read(&self, resource: &Resource) -> BindingResult<Value> {
        let locator = resource.form(Verb::ReadProperty)?;
        match locator.scheme {
            Scheme::Gap => self.read_advertisement(locator, resource.schema.as_ref()).await,
            Scheme::Gatt => {
                let bytes = self.read_raw(locator).await?;
                Ok(decode(&bytes, resource.schema()?)?)
            }
        }
    }

    /// Encode and write a property.
    pub async fn write(&self, resource: &Resource, value: &Value) -> BindingResult<()> {
        let locator = resource.form(Verb::WriteProperty)?;
        let bytes = encode(value, resource.schema()?)?;
        self.write_raw(locator, &bytes).await
    }

    /// Invoke an action by writing its input.
    ///
    /// Without an input a single zero byte is written. Actions have no result
    /// payload, so this always yields `Value::Null`.
    pub async fn invoke(&self, resource: &Resource, input: Option<&Value>) -> BindingResult<Value> {
        let locator = resource.form(Verb::InvokeAction)?;
        let bytes = match input {
            Some(value) => encode(value, resource.schema()?)?,
            None => vec![0],
        };
        self.write_raw(locator, &bytes).await?;
        Ok(Value::Null)
    }

    /// Start notifications and hold the connection until unsubscribed.
    pub async fn subscribe(&self, resource: &Resource) -> BindingResult<Subscription> {
        let locator = resource.form(Verb::SubscribeEvent)?;
        require_operation(locator, |op| op == OperationKind::Notify)?;
        let schema = resource.schema()?.clone();
        let (service, characteristic) = locator.gatt_address()?;

        let (connection, lease) = self.connections.acquire(locator.device).await?;
        let handle = CharacteristicHandle::resolve(&connection, service, characteristic).await?;
        let stream = handle.start_notifications().await?;
        info!("Subscribed to {}", locator);

        Ok(Subscription {
            handle,
            stream,
            schema,
            lease: Some(lease),
        })
    }

    /// Raw characteristic read.
    pub async fn read_raw(&self, locator: &ResourceLocator) -> BindingResult<Vec<u8>> {
        require_operation(locator, |op| op == OperationKind::Read)?;
        let (service, characteristic) = locator.gatt_address()?;
        let (connection, _lease) = self.connections.acquire(locator.device).await?;
        debug!("Invoke read on {}", locator);
        CharacteristicHandle::resolve(&connection, service, characteristic)
            .await?
            .read()
            .await
    }

    /// Raw characteristic write, with or without response per the locator.
    pub async fn write_raw(&self, locator: &ResourceLocator, bytes: &[u8]) -> BindingResult<()> {
        let mode = match require_operation(locator, |op| op.is_write())? {
            OperationKind::WriteWithoutResponse => WriteMode::WithoutResponse,
            _ => WriteMode::WithResponse,
        };
        let (service, characteristic) = locator.gatt_address()?;
        let (connection, _lease) = self.connections.acquire(locator.device).await?;
        debug!("Invoke {:?} on {}", mode, locator);
        CharacteristicHandle::resolve(&connection, service, characteristic)
            .await?
            .write(bytes, mode)
            .await
    }

    /// Connect every device the catalog addresses over GATT.
    pub async fn connect(&self, catalog: &ResourceCatalog) -> BindingResult<()> {
        for device in catalog.gatt_devices() {
            self.connections.connect(device).await?;
        }
        Ok(())
    }

    /// Disconnect every device the catalog addresses over GATT.
    pub async fn disconnect(&self, catalog: &ResourceCatalog) -> BindingResult<()> {
        for device in catalog.gatt_devices() {
            self.connections.disconnect(device).await?;
        }
        Ok(())
    }

    pub fn set_auto_disconnect(&self, enabled: bool) {
        self.connections.set_auto_disconnect(enabled);
    }

    /// Disconnect everything and stop discovery.
    pub async fn close(&self) -> BindingResult<()> {
        let disconnected = self.connections.disconnect_all().await;
        self.connections.discovery().shutdown().await?;
        info!("Bluetooth service closed");
        disconnected
    }

    async fn read_advertisement(
        &self,
        locator: &ResourceLocator,
        schema: Option<&ResourceSchema>,
    ) -> BindingResult<Value> {
        let device = locator.device;
        let resource = locator.extra.first().map(String::as_str).unwrap_or(MANUFACTURER_DATA);
        if resource != MANUFACTURER_DATA {
            return Err(BindingError::Operation(format!(
                "only '{MANUFACTURER_DATA}' can be read over GAP, not '{resource}'"
            )));
        }

        debug!("Invoke read GAP on {}", device);
        let entries = self
            .radio
            .manufacturer_data(device)
            .await
            .map_err(|source| BindingError::Radio {
                operation: "manufacturer_data",
                context: device.to_string(),
                source,
            })?;
        let entry = select_manufacturer_data(device, entries, locator.extra.get(1).map(String::as_str))?;

        if locator.content_type.as_deref() == Some(JSON_CONTENT_TYPE) {
            return Ok([
                ("companyId", Value::Integer(i64::from(entry.company_id))),
                ("data", Value::String(hex::encode(&entry.data))),
            ]
            .into_iter()
            .collect());
        }

        let schema = schema.ok_or_else(|| {
            BindingError::Description(format!("no schema to decode advertisement of {device}"))
        })?;
        Ok(decode(&entry.data, schema)?)
    }
}

/// Check the locator's operation and return it.
fn require_operation(
    locator: &ResourceLocator,
    allowed: impl Fn(OperationKind) -> bool,
) -> BindingResult<OperationKind> {
    match locator.operation {
        Some(op) if allowed(op) => Ok(op),
        Some(op) => Err(BindingError::Operation(format!(
            "operation '{}' is not supported on {}",
            op.as_str(),
            locator
        ))),
        None => Err(BindingError::Operation(format!(
            "no operation given for {locator}"
        ))),
    }
}

fn parse_company_id(text: &str) -> Option<u16> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex_digits) => u16::from_str_radix(hex_digits, 16).ok(),
        None => text.parse().ok(),
    }
}

/// First entry, or the one for `company_id` when given.
fn select_manufacturer_data(
    device: DeviceAddress,
    entries: Vec<ManufacturerData>,
    company_id: Option<&str>,
) -> BindingResult<ManufacturerData> {
    let Some(id_text) = company_id else {
        let first = entries.into_iter().next().ok_or_else(|| BindingError::Advertisement {
            device,
            reason: "no manufacturer data found".into(),
        })?;
        debug!("Auto-selected manufacturer id {:#06x}", first.company_id);
        return Ok(first);
    };

    let id = parse_company_id(id_text).ok_or_else(|| BindingError::AddressResolution {
        locator: id_text.to_string(),
        reason: "company id must be decimal or 0x-prefixed hex".into(),
    })?;
    entries
        .into_iter()
        .find(|e| e.company_id == id)
        .ok_or_else(|| BindingError::Advertisement {
            device,
            reason: format!("company id {id_text} not found in advertisements"),
        })
}

/// Live notification subscription. Holds its device connected until
/// [`unsubscribe`](Self::unsubscribe) or drop.
pub struct Subscription {
    handle: CharacteristicHandle,
    stream: NotificationStream,
    schema: ResourceSchema,
    lease: Option<ConnectionLease>,
}

impl Subscription {
    /// Next decoded notification, `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<BindingResult<Value>> {
        let bytes = self.stream.recv().await?;
        Some(decode(&bytes, &self.schema).map_err(BindingError::from))
    }

    pub fn device(&self) -> Option<DeviceAddress> {
        self.lease.as_ref().map(ConnectionLease::address)
    }

    /// Stop notifications and release the connection hold.
    pub async fn unsubscribe(mut self) -> BindingResult<()> {
        let lease = self.lease.take();
        let result = self.handle.stop_notifications().await;
        drop(lease);
        result
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = handle.stop_notifications().await {
                        warn!("Failed to stop notifications of dropped subscription: {}", e);
                    }
                    drop(lease);
                });
            }
            Err(_) => drop(lease),
        }
    }
}
