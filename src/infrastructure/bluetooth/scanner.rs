//! BLE Scanner Module
//!
//! One shared discovery session for every pending connect. Discovery starts when
//! the first waiter arrives and stops when the last one leaves; start and stop
//! calls never overlap.

use crate::domain::locator::DeviceAddress;
use crate::error::{BindingError, BindingResult};
use crate::infrastructure::bluetooth::radio::{Peripheral, RadioStack};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct DiscoveryState {
    waiters: usize,
    /// Whether the running discovery was started here and must be stopped here.
    owned: bool,
}

pub struct DiscoveryCoordinator {
    radio: Arc<dyn RadioStack>,
    state: Mutex<DiscoveryState>,
}

impl DiscoveryCoordinator {
    pub fn new(radio: Arc<dyn RadioStack>) -> Self {
        Self {
            radio,
            state: Mutex::new(DiscoveryState::default()),
        }
    }

    /// Wait for `address` to be observed, for at most `timeout`.
    pub async fn find(
        self: &Arc<Self>,
        address: DeviceAddress,
        timeout: Duration,
    ) -> BindingResult<Arc<dyn Peripheral>> {
        let mut waiter = self.join().await?;
        debug!("Waiting up to {:?} for {} to advertise", timeout, address);

        let result = tokio::time::timeout(timeout, self.radio.wait_for_device(address)).await;
        waiter.leave().await;

        match result {
            Ok(Ok(peripheral)) => {
                info!("Found device {}", address);
                Ok(peripheral)
            }
            Ok(Err(source)) => Err(BindingError::Connection {
                device: address,
                source,
            }),
            Err(_) => Err(BindingError::DiscoveryTimeout {
                device: address,
                timeout,
            }),
        }
    }

    async fn join(self: &Arc<Self>) -> BindingResult<Waiter> {
        let mut state = self.state.lock().await;
        if state.waiters == 0 {
            let running = self
                .radio
                .is_discovering()
                .await
                .map_err(|source| radio_error("is_discovering", source))?;
            if running {
                debug!("Scanning already in progress");
            } else {
                self.radio
                    .start_discovery()
                    .await
                    .map_err(|source| radio_error("start_discovery", source))?;
                state.owned = true;
                info!("Scanning started");
            }
        }
        state.waiters += 1;

        Ok(Waiter {
            coordinator: Arc::clone(self),
            active: true,
        })
    }

    async fn leave(&self) {
        let mut state = self.state.lock().await;
        state.waiters = state.waiters.saturating_sub(1);
        if state.waiters > 0 || !state.owned {
            return;
        }
        state.owned = false;
        match self.radio.stop_discovery().await {
            Ok(()) => info!("Scanning stopped"),
            Err(e) => warn!("Failed to stop discovery: {:#}", e),
        }
    }

    /// Stop discovery regardless of pending waiters.
    pub async fn shutdown(&self) -> BindingResult<()> {
        let mut state = self.state.lock().await;
        state.owned = false;
        let running = self
            .radio
            .is_discovering()
            .await
            .map_err(|source| radio_error("is_discovering", source))?;
        if running {
            self.radio
                .stop_discovery()
                .await
                .map_err(|source| radio_error("stop_discovery", source))?;
            info!("Scanning stopped");
        }
        Ok(())
    }

    pub async fn waiters(&self) -> usize {
        self.state.lock().await.waiters
    }
}

fn radio_error(operation: &'static str, source: anyhow::Error) -> BindingError {
    BindingError::Radio {
        operation,
        context: "adapter".to_string(),
        source,
    }
}

/// Registration of one pending connect. Leaving is async, so a waiter dropped
/// mid-wait (cancelled connect) leaves from a spawned task.
struct Waiter {
    coordinator: Arc<DiscoveryCoordinator>,
    active: bool,
}

impl Waiter {
    async fn leave(&mut self) {
        if std::mem::take(&mut self.active) {
            self.coordinator.leave().await;
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let coordinator = Arc::clone(&self.coordinator);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { coordinator.leave().await });
        }
    }
}
