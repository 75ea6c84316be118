use async_trait::async_trait;
use futures::channel::mpsc::Receiver;

use crate::error::RadioError;
use crate::session::types::{Capability, CapabilityOutcome, EnableOutcome, RadioEvent};

pub mod btle;

#[async_trait]
pub trait CapabilityGate: Send + Sync {
    // all-or-nothing: denial of any requested capability is DeniedAny
    async fn request_capabilities(&self, capabilities: &[Capability]) -> CapabilityOutcome;

    // point query, a grant can be revoked mid-session
    fn is_granted(&self, capability: Capability) -> bool;
}

#[async_trait]
pub trait Radio: Send + Sync {
    fn is_available(&self) -> bool;

    async fn is_enabled(&self) -> bool;

    async fn is_discovering(&self) -> bool;

    // the reply may arrive at arbitrary delay, or never
    async fn request_enable(&self) -> EnableOutcome;

    async fn start_scan(&self) -> Result<(), RadioError>;

    async fn stop_scan(&self) -> Result<(), RadioError>;

    // dropping the receiver releases the subscription
    fn subscribe(&self) -> Receiver<RadioEvent>;
}
