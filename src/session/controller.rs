use std::sync::Arc;
use futures::channel::mpsc::Sender;
use futures::SinkExt;
use indexmap::IndexMap;
use log::{debug, info, warn};
use tokio::spawn;

use crate::error::{FailureReason, SessionError};
use crate::radio::{CapabilityGate, Radio};
use crate::session::types::{
    Capability, CapabilityOutcome, DeviceRecord, EnableOutcome, Phase, RadioEvent, SessionEvent,
    SessionOptions, REQUIRED_CAPABILITIES,
};

// seq ties a reply to the request that produced it; replies from a
// cancelled or superseded request are dropped
#[derive(Debug, Clone, Copy)]
pub enum AsyncReply {
    Capabilities {
        seq: u64,
        outcome: CapabilityOutcome,
    },
    Enable {
        seq: u64,
        outcome: EnableOutcome,
    },
}

// owned by a single event loop (discovery_session_task); every method runs
// to completion before the next input is processed
pub struct DiscoverySession {
    phase: Phase,
    devices: IndexMap<String, DeviceRecord>,
    gate: Arc<dyn CapabilityGate>,
    radio: Arc<dyn Radio>,
    listeners: Vec<Sender<SessionEvent>>,
    reply_tx: Sender<AsyncReply>,
    request_seq: u64,
    pending: Option<u64>,
    options: SessionOptions,
}

impl DiscoverySession {
    pub fn new(
        gate: Arc<dyn CapabilityGate>,
        radio: Arc<dyn Radio>,
        listeners: Vec<Sender<SessionEvent>>,
        reply_tx: Sender<AsyncReply>,
        options: SessionOptions,
    ) -> Self {
        DiscoverySession {
            phase: Phase::Idle,
            devices: IndexMap::new(),
            gate,
            radio,
            listeners,
            reply_tx,
            request_seq: 0,
            pending: None,
            options,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.devices.values().cloned().collect()
    }

    // a no-op unless Idle or Stopped, so repeated calls while a request is
    // in flight produce exactly one capability request
    pub async fn start(&mut self) {
        if !matches!(self.phase, Phase::Idle | Phase::Stopped) {
            debug!("start ignored while {:?}", self.phase);
            return;
        }

        self.set_phase(Phase::AwaitingCapability).await;

        let seq = self.next_request();
        let gate = self.gate.clone();
        let mut reply_tx = self.reply_tx.clone();
        spawn(async move {
            let outcome = gate.request_capabilities(&REQUIRED_CAPABILITIES).await;
            // the receiver is gone after teardown, which is fine
            let _ = reply_tx.send(AsyncReply::Capabilities { seq, outcome }).await;
        });
    }

    pub async fn on_capability_outcome(&mut self, seq: u64, outcome: CapabilityOutcome) {
        if self.phase != Phase::AwaitingCapability || self.pending != Some(seq) {
            debug!("Dropping stale capability reply (seq {})", seq);
            return;
        }
        self.pending = None;

        match outcome {
            CapabilityOutcome::DeniedAny => {
                self.fail(FailureReason::CapabilityDenied).await;
                self.set_phase(Phase::Idle).await;
            },
            CapabilityOutcome::GrantedAll => {
                if !self.radio.is_available() {
                    self.fail(FailureReason::RadioUnavailable).await;
                    self.set_phase(Phase::Idle).await;
                    return;
                }

                if self.radio.is_enabled().await {
                    self.begin_scan().await;
                } else {
                    self.set_phase(Phase::AwaitingRadioEnable).await;

                    let seq = self.next_request();
                    let radio = self.radio.clone();
                    let mut reply_tx = self.reply_tx.clone();
                    spawn(async move {
                        let outcome = radio.request_enable().await;
                        let _ = reply_tx.send(AsyncReply::Enable { seq, outcome }).await;
                    });
                }
            },
        }
    }

    pub async fn on_enable_outcome(&mut self, seq: u64, outcome: EnableOutcome) {
        if self.phase != Phase::AwaitingRadioEnable || self.pending != Some(seq) {
            debug!("Dropping stale radio enable reply (seq {})", seq);
            return;
        }
        self.pending = None;

        match outcome {
            EnableOutcome::Declined => {
                self.fail(FailureReason::RadioEnableDeclined).await;
                self.set_phase(Phase::Idle).await;
            },
            EnableOutcome::Enabled => {
                self.begin_scan().await;
            },
        }
    }

    pub async fn on_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::DiscoveryStarted => {
                debug!("Discovery started");
            },
            RadioEvent::DiscoveryFinished => {
                if self.phase == Phase::Scanning {
                    info!("Discovery finished with {} device(s)", self.devices.len());
                    self.set_phase(Phase::Stopped).await;
                } else {
                    debug!("Discovery finished while {:?}", self.phase);
                }
            },
            RadioEvent::DeviceFound { address, name } => {
                self.on_device_found(address, name).await;
            },
        }
    }

    async fn on_device_found(&mut self, address: String, name: Option<String>) {
        if self.phase != Phase::Scanning {
            debug!("Dropping device event while {:?}", self.phase);
            return;
        }
        if address.is_empty() {
            debug!("Dropping device event with no resolvable identity");
            return;
        }
        if self.devices.contains_key(&address) {
            debug!("Dropping duplicate device event for {}", address);
            return;
        }

        // capability can be revoked mid-session, so check per event
        let display_name = if self.gate.is_granted(Capability::Connect) {
            name
        } else {
            None
        };

        if display_name.is_none() && !self.options.include_unnamed {
            debug!("Dropping unnamed device {}", address);
            return;
        }

        info!(
            "Found device {} {}",
            address,
            display_name.as_deref().unwrap_or("NONE"),
        );
        self.devices.insert(
            address.clone(),
            DeviceRecord {
                address,
                display_name,
            },
        );
        let snapshot = self.devices();
        self.emit(SessionEvent::DeviceListChanged(snapshot)).await;
    }

    pub async fn cancel(&mut self) {
        match self.phase {
            Phase::Idle | Phase::Stopped => {
                debug!("cancel ignored while {:?}", self.phase);
            },
            Phase::Scanning => {
                self.stop_discovery().await;
                self.set_phase(Phase::Stopped).await;
            },
            Phase::AwaitingCapability | Phase::AwaitingRadioEnable => {
                self.pending = None;
                self.set_phase(Phase::Stopped).await;
            },
        }
    }

    // an in-progress scan is stopped first; a connection can not be
    // attempted while still discovering
    pub async fn select(&mut self, address: &str) -> Result<DeviceRecord, SessionError> {
        if !matches!(self.phase, Phase::Scanning | Phase::Stopped) {
            return Err(SessionError::WrongPhase { phase: self.phase });
        }

        let record = match self.devices.get(address) {
            Some(record) => record.clone(),
            None => {
                return Err(SessionError::NotFound {
                    address: address.to_string(),
                });
            },
        };

        if self.phase == Phase::Scanning {
            self.stop_discovery().await;
            self.set_phase(Phase::Stopped).await;
        }

        self.emit(SessionEvent::DeviceSelected(record.clone())).await;
        Ok(record)
    }

    // safe to call from any phase, even if start() was never called
    pub async fn teardown(&mut self) {
        self.pending = None;
        if self.phase == Phase::Scanning {
            self.stop_discovery().await;
        }
        self.set_phase(Phase::Stopped).await;
    }

    async fn begin_scan(&mut self) {
        // stop-before-start: never layer a new scan on top of a running one
        if self.radio.is_discovering().await {
            self.stop_discovery().await;
        }

        self.devices.clear();
        self.emit(SessionEvent::DeviceListChanged(Vec::new())).await;
        self.set_phase(Phase::Scanning).await;

        if let Err(err) = self.radio.start_scan().await {
            warn!("Starting discovery failed: {:?}", err);
            self.fail(FailureReason::ScanFailed {
                reason: err.to_string(),
            })
            .await;
            self.set_phase(Phase::Idle).await;
        }
    }

    async fn stop_discovery(&mut self) {
        if let Err(err) = self.radio.stop_scan().await {
            warn!("Stopping discovery failed: {:?}", err);
        }
    }

    fn next_request(&mut self) -> u64 {
        self.request_seq += 1;
        self.pending = Some(self.request_seq);
        self.request_seq
    }

    async fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            self.phase = phase;
            self.emit(SessionEvent::StateChanged(phase)).await;
        }
    }

    pub(crate) async fn fail(&mut self, reason: FailureReason) {
        warn!("Session failure: {}", reason);
        self.emit(SessionEvent::Failure(reason)).await;
    }

    async fn emit(&mut self, event: SessionEvent) {
        for listener in &mut self.listeners {
            if let Err(err) = listener.send(event.clone()).await {
                warn!("Failed to deliver session event: {:?}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures::channel::mpsc::{channel, Receiver};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::error::RadioError;

    struct StaticGate {
        outcome: CapabilityOutcome,
        connect_granted: AtomicBool,
    }

    impl StaticGate {
        fn granting() -> Self {
            StaticGate {
                outcome: CapabilityOutcome::GrantedAll,
                connect_granted: AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl CapabilityGate for StaticGate {
        async fn request_capabilities(&self, _capabilities: &[Capability]) -> CapabilityOutcome {
            self.outcome
        }

        fn is_granted(&self, _capability: Capability) -> bool {
            self.connect_granted.load(Ordering::SeqCst)
        }
    }

    struct StaticRadio {
        enabled: bool,
        scans_started: AtomicUsize,
        scans_stopped: AtomicUsize,
    }

    impl StaticRadio {
        fn enabled() -> Self {
            StaticRadio {
                enabled: true,
                scans_started: AtomicUsize::new(0),
                scans_stopped: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Radio for StaticRadio {
        fn is_available(&self) -> bool {
            true
        }

        async fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn is_discovering(&self) -> bool {
            false
        }

        async fn request_enable(&self) -> EnableOutcome {
            EnableOutcome::Enabled
        }

        async fn start_scan(&self) -> Result<(), RadioError> {
            self.scans_started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop_scan(&self) -> Result<(), RadioError> {
            self.scans_stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn subscribe(&self) -> Receiver<RadioEvent> {
            channel(8).1
        }
    }

    fn make_session(
        gate: Arc<StaticGate>,
        radio: Arc<StaticRadio>,
    ) -> (DiscoverySession, Receiver<AsyncReply>) {
        let (reply_tx, reply_rx) = channel(16);
        let session = DiscoverySession::new(
            gate,
            radio,
            Vec::new(),
            reply_tx,
            SessionOptions::default(),
        );
        (session, reply_rx)
    }

    async fn pump_reply(session: &mut DiscoverySession, reply_rx: &mut Receiver<AsyncReply>) {
        match reply_rx.next().await.expect("expected an async reply") {
            AsyncReply::Capabilities { seq, outcome } => {
                session.on_capability_outcome(seq, outcome).await;
            },
            AsyncReply::Enable { seq, outcome } => {
                session.on_enable_outcome(seq, outcome).await;
            },
        }
    }

    async fn scanning_session() -> (DiscoverySession, Receiver<AsyncReply>) {
        let (mut session, mut reply_rx) =
            make_session(Arc::new(StaticGate::granting()), Arc::new(StaticRadio::enabled()));
        session.start().await;
        pump_reply(&mut session, &mut reply_rx).await;
        assert_eq!(session.phase(), Phase::Scanning);
        (session, reply_rx)
    }

    #[tokio::test]
    async fn duplicate_addresses_are_dropped_first_seen_wins() {
        let (mut session, _reply_rx) = scanning_session().await;

        session
            .on_device_found("AA:BB".to_string(), Some("Foo".to_string()))
            .await;
        session
            .on_device_found("AA:BB".to_string(), Some("Bar".to_string()))
            .await;
        session
            .on_device_found("CC:DD".to_string(), None)
            .await;

        let devices = session.devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].address, "AA:BB");
        assert_eq!(devices[0].display_name.as_deref(), Some("Foo"));
        assert_eq!(devices[1].address, "CC:DD");
        assert_eq!(devices[1].display_name, None);
    }

    #[tokio::test]
    async fn name_resolution_follows_connect_grant_per_event() {
        let gate = Arc::new(StaticGate::granting());
        let radio = Arc::new(StaticRadio::enabled());
        let (mut session, mut reply_rx) = make_session(gate.clone(), radio);
        session.start().await;
        pump_reply(&mut session, &mut reply_rx).await;

        gate.connect_granted.store(false, Ordering::SeqCst);
        session
            .on_device_found("AA:BB".to_string(), Some("Foo".to_string()))
            .await;

        assert_eq!(session.devices()[0].display_name, None);
    }

    #[tokio::test]
    async fn select_unknown_address_is_not_found_and_keeps_scanning() {
        let (mut session, _reply_rx) = scanning_session().await;
        session
            .on_device_found("AA:BB".to_string(), Some("Foo".to_string()))
            .await;

        let err = session.select("FF:FF").await.unwrap_err();
        assert_eq!(
            err,
            SessionError::NotFound {
                address: "FF:FF".to_string()
            }
        );
        assert_eq!(session.phase(), Phase::Scanning);
    }

    #[tokio::test]
    async fn select_stops_the_scan_and_returns_the_record() {
        let radio = Arc::new(StaticRadio::enabled());
        let (mut session, mut reply_rx) =
            make_session(Arc::new(StaticGate::granting()), radio.clone());
        session.start().await;
        pump_reply(&mut session, &mut reply_rx).await;
        session
            .on_device_found("AA:BB".to_string(), Some("Foo".to_string()))
            .await;

        let record = session.select("AA:BB").await.expect("select failed");
        assert_eq!(record.address, "AA:BB");
        assert_eq!(session.phase(), Phase::Stopped);
        assert_eq!(radio.scans_stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unnamed_devices_can_be_filtered_out() {
        let (reply_tx, mut reply_rx) = channel(16);
        let mut session = DiscoverySession::new(
            Arc::new(StaticGate::granting()),
            Arc::new(StaticRadio::enabled()),
            Vec::new(),
            reply_tx,
            SessionOptions {
                include_unnamed: false,
            },
        );
        session.start().await;
        pump_reply(&mut session, &mut reply_rx).await;

        session.on_device_found("AA:BB".to_string(), None).await;
        session
            .on_device_found("CC:DD".to_string(), Some("Foo".to_string()))
            .await;

        let devices = session.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].address, "CC:DD");
    }
}
