use std::sync::Arc;
use futures::channel::mpsc::{channel, Sender};
use futures::StreamExt;
use log::{info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{FailureReason, SessionError};
use crate::radio::{CapabilityGate, Radio};
use crate::session::controller::{AsyncReply, DiscoverySession};
use crate::session::types::{SessionCommand, SessionEvent, SessionOptions};

/// Spawn the single-owner event loop that drives a `DiscoverySession`.
///
/// All inputs converge on this one task: user commands, replies to the
/// asynchronous capability/enable requests, and the radio's discovery
/// events. The session processes one input to completion before the next,
/// so phase transitions and device-list mutations are atomic with respect
/// to each other.
///
/// Cancelling the token tears the session down (effective even if an
/// external reply never arrives) and releases the radio event subscription.
pub fn discovery_session_task(
    cancel: CancellationToken,
    gate: Arc<dyn CapabilityGate>,
    radio: Arc<dyn Radio>,
    listeners: Vec<Sender<SessionEvent>>,
    options: SessionOptions,
) -> (Sender<SessionCommand>, JoinHandle<()>) {
    let (command_tx, mut command_rx) = channel::<SessionCommand>(16);
    let (reply_tx, mut reply_rx) = channel::<AsyncReply>(16);
    let mut radio_events = radio.subscribe();

    let handle = spawn(async move {
        let mut session = DiscoverySession::new(gate, radio, listeners, reply_tx, options);

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    session.teardown().await;
                    break 'mainloop;
                },
                Some(command) = command_rx.next() => match command {
                    SessionCommand::Start => {
                        session.start().await;
                    },
                    SessionCommand::Cancel => {
                        session.cancel().await;
                    },
                    SessionCommand::Select(address) => match session.select(&address).await {
                        Ok(record) => {
                            info!("Selected device {}", record.address);
                        },
                        Err(SessionError::NotFound { address }) => {
                            session.fail(FailureReason::NotFound { address }).await;
                        },
                        Err(err @ SessionError::WrongPhase { .. }) => {
                            warn!("Ignoring selection: {}", err);
                        },
                    },
                },
                Some(reply) = reply_rx.next() => match reply {
                    AsyncReply::Capabilities { seq, outcome } => {
                        session.on_capability_outcome(seq, outcome).await;
                    },
                    AsyncReply::Enable { seq, outcome } => {
                        session.on_enable_outcome(seq, outcome).await;
                    },
                },
                Some(event) = radio_events.next() => {
                    session.on_radio_event(event).await;
                },
            }
        }

        // dropping the radio event receiver releases the subscription
    });

    (command_tx, handle)
}
