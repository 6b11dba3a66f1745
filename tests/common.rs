#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ble_gatt_binding::infrastructure::bluetooth::connection::ConnectionConfig;
use ble_gatt_binding::infrastructure::bluetooth::radio::{
    GattCharacteristic, GattService, GattSession, ManufacturerData, NotificationStream,
    Peripheral, RadioStack, WriteMode,
};
use ble_gatt_binding::DeviceAddress;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Level;
use uuid::Uuid;

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

pub fn address(text: &str) -> DeviceAddress {
    text.parse().unwrap()
}

pub fn config(idle_ms: u64) -> ConnectionConfig {
    ConnectionConfig {
        idle_timeout: Duration::from_millis(idle_ms),
        discovery_timeout: Duration::from_secs(15),
        auto_disconnect: true,
    }
}

/// Characteristic whose value, writes and notifications the test controls.
#[derive(Default)]
pub struct StubCharacteristic {
    value: Mutex<Vec<u8>>,
    writes: Mutex<Vec<(Vec<u8>, WriteMode)>>,
    notifier: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    pub stop_calls: AtomicUsize,
}

impl StubCharacteristic {
    pub fn set_value(&self, value: &[u8]) {
        *self.value.lock().unwrap() = value.to_vec();
    }

    pub fn writes(&self) -> Vec<(Vec<u8>, WriteMode)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn is_notifying(&self) -> bool {
        self.notifier.lock().unwrap().is_some()
    }

    /// Push a notification; false when notifications are off.
    pub fn notify(&self, value: &[u8]) -> bool {
        match self.notifier.lock().unwrap().as_ref() {
            Some(tx) => tx.send(value.to_vec()).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl GattCharacteristic for StubCharacteristic {
    async fn read_value(&self) -> Result<Vec<u8>> {
        Ok(self.value.lock().unwrap().clone())
    }

    async fn write_value(&self, value: &[u8], mode: WriteMode) -> Result<()> {
        self.writes.lock().unwrap().push((value.to_vec(), mode));
        Ok(())
    }

    async fn start_notifications(&self) -> Result<NotificationStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.notifier.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop_notifications(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.notifier.lock().unwrap().take();
        Ok(())
    }
}

type CharacteristicMap = HashMap<(Uuid, Uuid), Arc<StubCharacteristic>>;

#[derive(Default)]
pub struct Counters {
    pub discovery_starts: AtomicUsize,
    pub discovery_stops: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

#[derive(Default)]
struct StubState {
    counters: Counters,
    discovering: AtomicBool,
    starting: AtomicBool,
    overlapping_starts: AtomicBool,
    fail_connect: AtomicBool,
    fail_disconnect: AtomicBool,
    visible: Mutex<HashSet<DeviceAddress>>,
    characteristics: Mutex<CharacteristicMap>,
    advertisements: Mutex<HashMap<DeviceAddress, Vec<ManufacturerData>>>,
}

/// In-process radio stack. Every visible device exposes the same GATT table.
#[derive(Default)]
pub struct StubRadio {
    state: Arc<StubState>,
}

impl StubRadio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn counters(&self) -> &Counters {
        &self.state.counters
    }

    pub fn connects(&self) -> usize {
        self.state.counters.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.counters.disconnects.load(Ordering::SeqCst)
    }

    pub fn discovery_starts(&self) -> usize {
        self.state.counters.discovery_starts.load(Ordering::SeqCst)
    }

    pub fn discovery_stops(&self) -> usize {
        self.state.counters.discovery_stops.load(Ordering::SeqCst)
    }

    pub fn overlapping_starts(&self) -> bool {
        self.state.overlapping_starts.load(Ordering::SeqCst)
    }

    pub fn is_discovering_now(&self) -> bool {
        self.state.discovering.load(Ordering::SeqCst)
    }

    pub fn make_visible(&self, address: DeviceAddress) {
        self.state.visible.lock().unwrap().insert(address);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_disconnect(&self, fail: bool) {
        self.state.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    pub fn add_characteristic(&self, service: Uuid, characteristic: Uuid) -> Arc<StubCharacteristic> {
        let stub = Arc::new(StubCharacteristic::default());
        self.state
            .characteristics
            .lock()
            .unwrap()
            .insert((service, characteristic), Arc::clone(&stub));
        stub
    }

    pub fn advertise(&self, address: DeviceAddress, entries: Vec<ManufacturerData>) {
        self.state.advertisements.lock().unwrap().insert(address, entries);
    }
}

#[async_trait]
impl RadioStack for StubRadio {
    async fn start_discovery(&self) -> Result<()> {
        if self.state.starting.swap(true, Ordering::SeqCst) {
            self.state.overlapping_starts.store(true, Ordering::SeqCst);
        }
        if self.state.discovering.load(Ordering::SeqCst) {
            self.state.overlapping_starts.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.state.counters.discovery_starts.fetch_add(1, Ordering::SeqCst);
        self.state.discovering.store(true, Ordering::SeqCst);
        self.state.starting.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<()> {
        self.state.counters.discovery_stops.fetch_add(1, Ordering::SeqCst);
        self.state.discovering.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_discovering(&self) -> Result<bool> {
        Ok(self.state.discovering.load(Ordering::SeqCst))
    }

    async fn wait_for_device(&self, address: DeviceAddress) -> Result<Arc<dyn Peripheral>> {
        if !self.state.visible.lock().unwrap().contains(&address) {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(Arc::new(StubPeripheral {
            address,
            state: Arc::clone(&self.state),
        }))
    }

    async fn manufacturer_data(&self, address: DeviceAddress) -> Result<Vec<ManufacturerData>> {
        Ok(self
            .state
            .advertisements
            .lock()
            .unwrap()
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }
}

struct StubPeripheral {
    address: DeviceAddress,
    state: Arc<StubState>,
}

#[async_trait]
impl Peripheral for StubPeripheral {
    fn address(&self) -> DeviceAddress {
        self.address
    }

    async fn connect(&self) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused by {}", self.address));
        }
        self.state.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.state.fail_disconnect.load(Ordering::SeqCst) {
            return Err(anyhow!("adapter busy"));
        }
        self.state.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn gatt_session(&self) -> Result<Arc<dyn GattSession>> {
        Ok(Arc::new(StubSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct StubSession {
    state: Arc<StubState>,
}

#[async_trait]
impl GattSession for StubSession {
    async fn service(&self, uuid: Uuid) -> Result<Option<Arc<dyn GattService>>> {
        let known = self
            .state
            .characteristics
            .lock()
            .unwrap()
            .keys()
            .any(|(service, _)| *service == uuid);
        Ok(known.then(|| {
            Arc::new(StubService {
                uuid,
                state: Arc::clone(&self.state),
            }) as Arc<dyn GattService>
        }))
    }
}

struct StubService {
    uuid: Uuid,
    state: Arc<StubState>,
}

#[async_trait]
impl GattService for StubService {
    async fn characteristic(&self, uuid: Uuid) -> Result<Option<Arc<dyn GattCharacteristic>>> {
        Ok(self
            .state
            .characteristics
            .lock()
            .unwrap()
            .get(&(self.uuid, uuid))
            .map(|c| Arc::clone(c) as Arc<dyn GattCharacteristic>))
    }
}
