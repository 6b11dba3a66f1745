//! BLE Connection Module
//!
//! Registry of live device connections. A device is connected on demand,
//! disconnected after a quiet period, and kept alive while anything holds it.
//!
//! Per device there are two locks:
//! - `lifecycle` (async) serializes connecting and idle expiry, so a device is
//!   never connected twice and never dropped while a connect is in flight;
//! - `state` (sync) guards the entry, hold count and idle timer. It is never
//!   held across an `.await`.
//!
//! Every change to the idle timer bumps a generation number. A timer that fires
//! re-checks its generation and the hold count under the lifecycle lock before
//! disconnecting, so a touch or hold that lands while it waits wins.
//!
//! A slot with no connection, no holds and no timer is dropped from the
//! registry once nothing else references it.

use crate::domain::locator::DeviceAddress;
use crate::domain::settings::BindingSettings;
use crate::error::{BindingError, BindingResult};
use crate::infrastructure::bluetooth::radio::{GattSession, Peripheral, RadioStack};
use crate::infrastructure::bluetooth::scanner::DiscoveryCoordinator;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Quiet period before an unheld connection is dropped
    pub idle_timeout: Duration,
    /// Upper bound on waiting for a device during discovery
    pub discovery_timeout: Duration,
    /// Whether idle connections are dropped at all
    pub auto_disconnect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&BindingSettings::default())
    }
}

impl From<&BindingSettings> for ConnectionConfig {
    fn from(settings: &BindingSettings) -> Self {
        Self {
            idle_timeout: settings.idle_timeout(),
            discovery_timeout: settings.discovery_timeout(),
            auto_disconnect: settings.auto_disconnect,
        }
    }
}

/// A live link: the peripheral handle and its GATT session.
#[derive(Clone)]
pub struct Connection {
    pub address: DeviceAddress,
    pub peripheral: Arc<dyn Peripheral>,
    pub session: Arc<dyn GattSession>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct SlotState {
    connection: Option<Connection>,
    holds: usize,
    generation: u64,
    idle_timer: Option<JoinHandle<()>>,
}

impl SlotState {
    fn cancel_timer(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct DeviceSlot {
    lifecycle: tokio::sync::Mutex<()>,
    state: Mutex<SlotState>,
}

impl DeviceSlot {
    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Option<Connection> {
        self.state().connection.clone()
    }
}

struct ManagerInner {
    discovery: Arc<DiscoveryCoordinator>,
    config: Mutex<ConnectionConfig>,
    devices: Mutex<HashMap<DeviceAddress, Arc<DeviceSlot>>>,
}

impl ManagerInner {
    /// Forget `slot` if it is idle and unreferenced.
    ///
    /// Slots are only handed out under the registry lock, so a strong count of
    /// two (registry plus `slot`) means no other task can be using it.
    fn prune(&self, address: DeviceAddress, slot: Arc<DeviceSlot>) {
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(registered) = devices.get(&address) else {
            return;
        };
        if !Arc::ptr_eq(registered, &slot) || Arc::strong_count(&slot) > 2 {
            return;
        }
        let unused = {
            let state = slot.state();
            state.connection.is_none() && state.holds == 0 && state.idle_timer.is_none()
        };
        if unused {
            devices.remove(&address);
            debug!("Forgot device {}", address);
        }
    }
}

/// Shared connection registry. Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(radio: Arc<dyn RadioStack>, config: ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                discovery: Arc::new(DiscoveryCoordinator::new(radio)),
                config: Mutex::new(config),
                devices: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn discovery(&self) -> &Arc<DiscoveryCoordinator> {
        &self.inner.discovery
    }

    fn config(&self) -> ConnectionConfig {
        self.inner
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn devices(&self) -> MutexGuard<'_, HashMap<DeviceAddress, Arc<DeviceSlot>>> {
        self.inner
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, address: DeviceAddress) -> Arc<DeviceSlot> {
        Arc::clone(self.devices().entry(address).or_default())
    }

    fn existing_slot(&self, address: DeviceAddress) -> Option<Arc<DeviceSlot>> {
        self.devices().get(&address).cloned()
    }

    /// Return the live connection to `address`, establishing it if needed.
    ///
    /// Idempotent: an existing connection is returned and its idle timer reset.
    pub async fn connect(&self, address: DeviceAddress) -> BindingResult<Connection> {
        let slot = self.slot(address);
        let result = self.connect_slot(address, &slot).await;
        if result.is_err() {
            self.inner.prune(address, slot);
        }
        result
    }

    async fn connect_slot(&self, address: DeviceAddress, slot: &Arc<DeviceSlot>) -> BindingResult<Connection> {
        if let Some(connection) = slot.current() {
            self.arm_idle_timer(address, slot);
            return Ok(connection);
        }

        let _lifecycle = slot.lifecycle.lock().await;
        if let Some(connection) = slot.current() {
            self.arm_idle_timer(address, slot);
            return Ok(connection);
        }

        let config = self.config();
        let peripheral = self
            .inner
            .discovery
            .find(address, config.discovery_timeout)
            .await?;

        info!("Connecting to device {}", address);
        peripheral
            .connect()
            .await
            .map_err(|source| BindingError::Connection {
                device: address,
                source,
            })?;

        let session = match peripheral.gatt_session().await {
            Ok(session) => session,
            Err(source) => {
                if let Err(e) = peripheral.disconnect().await {
                    warn!("Failed to drop half-open link to {}: {:#}", address, e);
                }
                return Err(BindingError::Connection {
                    device: address,
                    source,
                });
            }
        };

        let connection = Connection {
            address,
            peripheral,
            session,
        };
        slot.state().connection = Some(connection.clone());
        info!("Device {} connected", address);

        self.arm_idle_timer(address, slot);
        Ok(connection)
    }

    /// Reset the idle timer of `address` unless it is held.
    pub fn touch(&self, address: DeviceAddress) {
        if let Some(slot) = self.existing_slot(address) {
            self.arm_idle_timer(address, &slot);
        }
    }

    /// Keep `address` connected until a matching [`release`](Self::release).
    pub fn hold(&self, address: DeviceAddress) {
        let slot = self.slot(address);
        let mut state = slot.state();
        state.holds += 1;
        state.cancel_timer();
        debug!("Hold on {} (count {})", address, state.holds);
    }

    pub fn release(&self, address: DeviceAddress) {
        let Some(slot) = self.existing_slot(address) else {
            return;
        };
        let remaining = {
            let mut state = slot.state();
            state.holds = state.holds.saturating_sub(1);
            state.holds
        };
        debug!("Release on {} (count {})", address, remaining);
        if remaining == 0 {
            self.arm_idle_timer(address, &slot);
            self.inner.prune(address, slot);
        }
    }

    /// Connect and hold `address` for the lifetime of the returned lease.
    ///
    /// The hold is taken before connecting, so the idle timer cannot fire
    /// between connecting and using the connection. Dropping the lease
    /// releases the hold and re-arms the idle timer.
    pub async fn acquire(&self, address: DeviceAddress) -> BindingResult<(Connection, ConnectionLease)> {
        self.hold(address);
        let lease = ConnectionLease {
            manager: self.clone(),
            address,
        };
        let connection = self.connect(address).await?;
        Ok((connection, lease))
    }

    /// Drop the connection to `address` now. A no-op when not connected.
    ///
    /// Outstanding holds are left alone; each is balanced by its own release,
    /// and a later connect while they are alive stays held.
    pub async fn disconnect(&self, address: DeviceAddress) -> BindingResult<()> {
        let Some(slot) = self.existing_slot(address) else {
            return Ok(());
        };
        let result = Self::disconnect_slot(address, &slot).await;
        self.inner.prune(address, slot);
        result
    }

    async fn disconnect_slot(address: DeviceAddress, slot: &DeviceSlot) -> BindingResult<()> {
        let _lifecycle = slot.lifecycle.lock().await;
        let connection = {
            let mut state = slot.state();
            state.cancel_timer();
            state.connection.take()
        };

        let Some(connection) = connection else {
            return Ok(());
        };
        info!("Disconnecting from device {}", address);
        connection
            .peripheral
            .disconnect()
            .await
            .map_err(|source| BindingError::Radio {
                operation: "disconnect",
                context: address.to_string(),
                source,
            })
    }

    /// Disconnect every device, attempting all of them before reporting the
    /// first failure.
    pub async fn disconnect_all(&self) -> BindingResult<()> {
        let addresses: Vec<DeviceAddress> = self.devices().keys().copied().collect();
        let mut first_error = None;
        for address in addresses {
            if let Err(e) = self.disconnect(address).await {
                warn!("Failed to disconnect {}: {}", address, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_connected(&self, address: DeviceAddress) -> bool {
        self.existing_slot(address)
            .is_some_and(|slot| slot.state().connection.is_some())
    }

    pub fn hold_count(&self, address: DeviceAddress) -> usize {
        self.existing_slot(address)
            .map(|slot| slot.state().holds)
            .unwrap_or(0)
    }

    /// Devices the registry currently tracks, connected or held.
    pub fn tracked_devices(&self) -> usize {
        self.devices().len()
    }

    pub fn connected_devices(&self) -> Vec<DeviceAddress> {
        let mut connected: Vec<DeviceAddress> = self
            .devices()
            .iter()
            .filter(|(_, slot)| slot.state().connection.is_some())
            .map(|(address, _)| *address)
            .collect();
        connected.sort();
        connected
    }

    /// Turn idle disconnects on or off for every device.
    pub fn set_auto_disconnect(&self, enabled: bool) {
        self.inner
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .auto_disconnect = enabled;
        info!(
            "Auto disconnect {}",
            if enabled { "enabled" } else { "disabled" }
        );

        let slots: Vec<(DeviceAddress, Arc<DeviceSlot>)> = self
            .devices()
            .iter()
            .map(|(address, slot)| (*address, Arc::clone(slot)))
            .collect();
        for (address, slot) in slots {
            if enabled {
                self.arm_idle_timer(address, &slot);
            } else {
                slot.state().cancel_timer();
            }
        }
    }

    /// Replace any pending idle timer of `slot` with a fresh one.
    fn arm_idle_timer(&self, address: DeviceAddress, slot: &Arc<DeviceSlot>) {
        let config = self.config();
        let mut state = slot.state();
        state.cancel_timer();
        if state.connection.is_none() || state.holds > 0 || !config.auto_disconnect {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime to schedule idle disconnect of {}", address);
            return;
        };
        let generation = state.generation;
        let manager = Arc::downgrade(&self.inner);
        let idle = config.idle_timeout;
        state.idle_timer = Some(runtime.spawn(async move {
            tokio::time::sleep(idle).await;
            expire(manager, address, generation).await;
        }));
    }
}

/// Idle timer body. Failures are logged and swallowed.
async fn expire(manager: Weak<ManagerInner>, address: DeviceAddress, generation: u64) {
    let Some(inner) = manager.upgrade() else {
        return;
    };
    let Some(slot) = inner
        .devices
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&address)
        .cloned()
    else {
        return;
    };
    drop(inner);

    if !disconnect_idle(address, &slot, generation).await {
        return;
    }
    if let Some(inner) = manager.upgrade() {
        inner.prune(address, slot);
    }
}

/// Disconnect `slot` if its timer is still current; false when superseded.
async fn disconnect_idle(address: DeviceAddress, slot: &DeviceSlot, generation: u64) -> bool {
    let _lifecycle = slot.lifecycle.lock().await;
    let connection = {
        let mut state = slot.state();
        if state.generation != generation || state.holds > 0 {
            debug!("Idle timer of {} superseded", address);
            return false;
        }
        state.idle_timer = None;
        state.connection.take()
    };

    if let Some(connection) = connection {
        info!("Device {} idle, disconnecting", address);
        if let Err(e) = connection.peripheral.disconnect().await {
            warn!("Idle disconnect of {} failed: {:#}", address, e);
        }
    }
    true
}

/// Scoped hold on a device, released on drop.
pub struct ConnectionLease {
    manager: ConnectionManager,
    address: DeviceAddress,
}

impl ConnectionLease {
    pub fn address(&self) -> DeviceAddress {
        self.address
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.manager.release(self.address);
    }
}
