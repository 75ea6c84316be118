use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use uuid::Uuid;

use crate::error::RadioError;
use crate::radio::{CapabilityGate, Radio};
use crate::session::types::{Capability, CapabilityOutcome, EnableOutcome, RadioEvent};

type Listeners = Arc<Mutex<Vec<Sender<RadioEvent>>>>;

/// `Radio` backed by the first btleplug adapter on the system.
///
/// Central events from the adapter are translated into `RadioEvent`s and
/// fanned out to every subscriber; `DiscoveryStarted`/`DiscoveryFinished`
/// are synthesized around the scan commands, since btleplug has no
/// self-terminating discovery window.
pub struct BtleRadio {
    adapter: Adapter,
    filter: ScanFilter,
    discovering: AtomicBool,
    listeners: Listeners,
}

impl BtleRadio {
    /// Connect to the system Bluetooth stack. Fails with
    /// `RadioError::NoAdapter` when no radio hardware is present.
    ///
    /// `service_filter` narrows the scan to peripherals advertising one of
    /// the given service UUIDs; empty means no filter. Some environments
    /// ignore the filter, so callers must not rely on it for correctness.
    pub async fn new(service_filter: &[Uuid]) -> Result<BtleRadio, RadioError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters.into_iter().next().ok_or(RadioError::NoAdapter)?;

        info!(
            "Using Bluetooth adapter {}",
            adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()),
        );

        let listeners: Listeners = Arc::new(Mutex::new(Vec::new()));
        spawn(forward_central_events(adapter.clone(), listeners.clone()));

        Ok(BtleRadio {
            adapter,
            filter: ScanFilter {
                services: service_filter.to_vec(),
            },
            discovering: AtomicBool::new(false),
            listeners,
        })
    }
}

#[async_trait]
impl Radio for BtleRadio {
    fn is_available(&self) -> bool {
        // construction already required an adapter
        true
    }

    async fn is_enabled(&self) -> bool {
        match self.adapter.adapter_state().await {
            Ok(CentralState::PoweredOff) => false,
            Ok(state) => {
                debug!("Adapter state: {:?}", state);
                true
            },
            Err(err) => {
                warn!("Could not query adapter state, assuming powered on: {:?}", err);
                true
            },
        }
    }

    async fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    async fn request_enable(&self) -> EnableOutcome {
        // desktop hosts offer no programmatic way to power the radio on
        warn!("The Bluetooth radio is powered off and can not be enabled from here");
        EnableOutcome::Declined
    }

    async fn start_scan(&self) -> Result<(), RadioError> {
        self.adapter.start_scan(self.filter.clone()).await?;
        self.discovering.store(true, Ordering::SeqCst);
        broadcast(&self.listeners, &RadioEvent::DiscoveryStarted);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.adapter.stop_scan().await?;
        self.discovering.store(false, Ordering::SeqCst);
        broadcast(&self.listeners, &RadioEvent::DiscoveryFinished);
        Ok(())
    }

    fn subscribe(&self) -> Receiver<RadioEvent> {
        let (tx, rx) = channel(64);
        self.listeners
            .lock()
            .expect("Failed to lock radio listeners")
            .push(tx);
        rx
    }
}

async fn forward_central_events(adapter: Adapter, listeners: Listeners) {
    let mut events = match adapter.events().await {
        Ok(events) => events,
        Err(err) => {
            warn!("Failed to subscribe to adapter events: {:?}", err);
            return;
        },
    };

    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) => {
                if let Some(event) = resolve_device(&adapter, &id).await {
                    broadcast(&listeners, &event);
                }
            },
            CentralEvent::StateUpdate(state) => {
                debug!("Adapter state update: {:?}", state);
            },
            _ => {},
        }
    }
}

async fn resolve_device(adapter: &Adapter, id: &PeripheralId) -> Option<RadioEvent> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(peripheral) => peripheral,
        Err(err) => {
            warn!("Could not look up discovered peripheral: {:?}", err);
            return None;
        },
    };

    match peripheral.properties().await {
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            None
        },
        Ok(None) => {
            warn!("Peripheral has no properties");
            None
        },
        Ok(Some(properties)) => Some(RadioEvent::DeviceFound {
            address: properties.address.to_string(),
            name: properties.local_name,
        }),
    }
}

fn broadcast(listeners: &Listeners, event: &RadioEvent) {
    let mut listeners = listeners.lock().expect("Failed to lock radio listeners");
    listeners.retain_mut(|listener| {
        if listener.is_closed() {
            return false;
        }
        if let Err(err) = listener.try_send(event.clone()) {
            warn!("Failed to deliver radio event: {:?}", err);
            return !err.is_disconnected();
        }
        true
    });
}

/// `CapabilityGate` for desktop hosts, where there is no runtime permission
/// prompt to drive: the OS applies its Bluetooth privacy policy when the
/// scan command is issued, and a refusal surfaces as a scan failure
/// (btleplug reports `PermissionDenied`).
pub struct HostCapabilityGate;

#[async_trait]
impl CapabilityGate for HostCapabilityGate {
    async fn request_capabilities(&self, _capabilities: &[Capability]) -> CapabilityOutcome {
        CapabilityOutcome::GrantedAll
    }

    fn is_granted(&self, _capability: Capability) -> bool {
        true
    }
}
