//! WinRT Radio Module
//!
//! [`RadioStack`] on top of the Windows Bluetooth LE APIs. Discovery runs an
//! active advertisement watcher that records every sighting together with its
//! manufacturer data; GATT access goes through `BluetoothLEDevice`.

use crate::domain::locator::DeviceAddress;
use crate::infrastructure::bluetooth::radio::{
    GattCharacteristic, GattService, GattSession, ManufacturerData, NotificationStream,
    Peripheral, RadioStack, WriteMode,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic as WinCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattDeviceService, GattSession as WinGattSession,
    GattValueChangedEventArgs, GattWriteOption,
};
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

type Sightings = Arc<Mutex<HashMap<u64, Vec<ManufacturerData>>>>;

fn guid(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

fn buffer_bytes(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

fn check(status: GattCommunicationStatus, what: &str) -> Result<()> {
    if status != GattCommunicationStatus::Success {
        bail!("{} failed with status {:?}", what, status);
    }
    Ok(())
}

fn manufacturer_entries(
    args: &BluetoothLEAdvertisementReceivedEventArgs,
) -> windows::core::Result<Vec<ManufacturerData>> {
    let sections = args.Advertisement()?.ManufacturerData()?;
    let mut entries = Vec::with_capacity(sections.Size()? as usize);
    for i in 0..sections.Size()? {
        let section = sections.GetAt(i)?;
        entries.push(ManufacturerData {
            company_id: section.CompanyId()?,
            data: buffer_bytes(&section.Data()?)?,
        });
    }
    Ok(entries)
}

/// Host radio backed by the Windows Bluetooth stack.
pub struct WinRtRadio {
    watcher: Mutex<Option<BluetoothLEAdvertisementWatcher>>,
    sightings: Sightings,
    found: broadcast::Sender<u64>,
}

impl Default for WinRtRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl WinRtRadio {
    pub fn new() -> Self {
        let (found, _) = broadcast::channel(64);
        Self {
            watcher: Mutex::new(None),
            sightings: Arc::new(Mutex::new(HashMap::new())),
            found,
        }
    }

    fn seen(&self, address: u64) -> bool {
        self.sightings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&address)
    }
}

#[async_trait]
impl RadioStack for WinRtRadio {
    async fn start_discovery(&self) -> Result<()> {
        let mut slot = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let sightings = Arc::clone(&self.sightings);
        let found = self.found.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let address = args.BluetoothAddress()?;
                    let entries = manufacturer_entries(args)?;
                    let mut sightings = sightings.lock().unwrap_or_else(PoisonError::into_inner);
                    let known = sightings.entry(address).or_default();
                    // Scan responses usually carry no manufacturer data; keep the last non-empty set.
                    if !entries.is_empty() || known.is_empty() {
                        *known = entries;
                    }
                    drop(sightings);
                    let _ = found.send(address);
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        info!("Advertisement watcher started");
        *slot = Some(watcher);
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<()> {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            watcher.Stop()?;
            info!("Advertisement watcher stopped");
        }
        Ok(())
    }

    async fn is_discovering(&self) -> Result<bool> {
        Ok(self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some())
    }

    async fn wait_for_device(&self, address: DeviceAddress) -> Result<Arc<dyn Peripheral>> {
        let raw = address.as_u64();
        let mut found = self.found.subscribe();
        while !self.seen(raw) {
            match found.recv().await {
                Ok(seen) if seen == raw => break,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => bail!("advertisement watcher closed"),
            }
        }

        let device = BluetoothLEDevice::FromBluetoothAddressAsync(raw)?.await?;
        debug!("Opened device {} ({:?})", address, device.Name()?);
        Ok(Arc::new(WinRtPeripheral {
            address,
            device,
            session: Mutex::new(None),
        }))
    }

    async fn manufacturer_data(&self, address: DeviceAddress) -> Result<Vec<ManufacturerData>> {
        Ok(self
            .sightings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address.as_u64())
            .cloned()
            .unwrap_or_default())
    }
}

struct WinRtPeripheral {
    address: DeviceAddress,
    device: BluetoothLEDevice,
    session: Mutex<Option<WinGattSession>>,
}

#[async_trait]
impl Peripheral for WinRtPeripheral {
    fn address(&self) -> DeviceAddress {
        self.address
    }

    async fn connect(&self) -> Result<()> {
        let device_id = self.device.BluetoothDeviceId()?;
        let session = WinGattSession::FromDeviceIdAsync(&device_id)?.await?;
        session.SetMaintainConnection(true)?;
        debug!("GattSession for {} created, MaintainConnection set", self.address);
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.SetMaintainConnection(false)?;
            session.Close()?;
        }
        self.device.Close()?;
        Ok(())
    }

    async fn gatt_session(&self) -> Result<Arc<dyn GattSession>> {
        Ok(Arc::new(WinRtGatt {
            device: self.device.clone(),
        }))
    }
}

struct WinRtGatt {
    device: BluetoothLEDevice,
}

#[async_trait]
impl GattSession for WinRtGatt {
    async fn service(&self, uuid: Uuid) -> Result<Option<Arc<dyn GattService>>> {
        let result = self.device.GetGattServicesForUuidAsync(guid(uuid))?.await?;
        check(result.Status()?, "GetGattServicesForUuidAsync")?;

        let services = result.Services()?;
        if services.Size()? == 0 {
            return Ok(None);
        }
        let service = services.GetAt(0)?;
        let access = service.RequestAccessAsync()?.await?;
        debug!("Service {} access status: {:?}", uuid, access);
        Ok(Some(Arc::new(WinRtService { service })))
    }
}

struct WinRtService {
    service: GattDeviceService,
}

#[async_trait]
impl GattService for WinRtService {
    async fn characteristic(&self, uuid: Uuid) -> Result<Option<Arc<dyn GattCharacteristic>>> {
        let result = self
            .service
            .GetCharacteristicsForUuidAsync(guid(uuid))?
            .await?;
        check(result.Status()?, "GetCharacteristicsForUuidAsync")?;

        let characteristics = result.Characteristics()?;
        if characteristics.Size()? == 0 {
            return Ok(None);
        }
        Ok(Some(Arc::new(WinRtCharacteristic {
            inner: characteristics.GetAt(0)?,
            token: Mutex::new(None),
        })))
    }
}

struct WinRtCharacteristic {
    inner: WinCharacteristic,
    token: Mutex<Option<i64>>,
}

impl WinRtCharacteristic {
    async fn configure(&self, value: GattClientCharacteristicConfigurationDescriptorValue) -> Result<()> {
        let status = self
            .inner
            .WriteClientCharacteristicConfigurationDescriptorAsync(value)?
            .await?;
        check(status, "WriteClientCharacteristicConfigurationDescriptorAsync")
    }
}

#[async_trait]
impl GattCharacteristic for WinRtCharacteristic {
    async fn read_value(&self) -> Result<Vec<u8>> {
        let result = self
            .inner
            .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        check(result.Status()?, "ReadValueAsync")?;
        Ok(buffer_bytes(&result.Value()?)?)
    }

    async fn write_value(&self, value: &[u8], mode: WriteMode) -> Result<()> {
        let writer = DataWriter::new()?;
        writer.WriteBytes(value)?;
        let buffer = writer.DetachBuffer()?;

        let option = match mode {
            WriteMode::WithResponse => GattWriteOption::WriteWithResponse,
            WriteMode::WithoutResponse => GattWriteOption::WriteWithoutResponse,
        };
        let status = self.inner.WriteValueWithOptionAsync(&buffer, option)?.await?;
        check(status, "WriteValueAsync")
    }

    async fn start_notifications(&self) -> Result<NotificationStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<WinCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let _ = tx.send(buffer_bytes(&args.CharacteristicValue()?)?);
                }
                Ok(())
            },
        );
        let token = self.inner.ValueChanged(&handler)?;

        if let Err(e) = self
            .configure(GattClientCharacteristicConfigurationDescriptorValue::Notify)
            .await
        {
            self.inner.RemoveValueChanged(token)?;
            return Err(e);
        }
        if let Some(previous) = self
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token)
        {
            self.inner.RemoveValueChanged(previous)?;
        }
        Ok(rx)
    }

    async fn stop_notifications(&self) -> Result<()> {
        let token = self.token.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(token) = token {
            self.inner.RemoveValueChanged(token)?;
        }
        if let Err(e) = self
            .configure(GattClientCharacteristicConfigurationDescriptorValue::None)
            .await
        {
            warn!("Could not clear notification descriptor: {:#}", e);
        }
        Ok(())
    }
}
