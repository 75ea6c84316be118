use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::error::{AppRunError, FailureReason};
use crate::radio::btle::{BtleRadio, HostCapabilityGate};
use crate::session::task::discovery_session_task;
use crate::session::types::{
    DeviceRecord, Phase, SessionCommand, SessionEvent, SessionOptions,
};

#[derive(Parser, Debug)]
#[command(name = "btpicker", version, about = "Scan for nearby Bluetooth devices and pick one")]
pub struct CliOptions {
    /// How long to let the scan run before the list is considered final, in seconds
    #[arg(long, default_value_t = 12)]
    pub timeout: u64,

    /// Select this address as soon as it is discovered, without prompting
    #[arg(long)]
    pub select: Option<String>,

    /// Only scan and print the device list, do not prompt for a selection
    #[arg(long)]
    pub list_only: bool,

    /// List peripherals that advertise no name (overrides the config file)
    #[arg(long)]
    pub include_unnamed: Option<bool>,
}

// the session itself never times out; the scan window is a presentation
// concern imposed here
pub async fn run_picker(options: CliOptions) -> Result<(), AppRunError> {
    let store = ConfigStore::open()?;
    let mut locker = store.locker()?;
    let _lock_guard = locker.lock()?;

    let mut config = store.read().await?;
    let include_unnamed = options.include_unnamed.unwrap_or(config.include_unnamed);

    if let Some(address) = &config.last_selected {
        info!("Previously selected device: {}", address);
    }

    let gate = Arc::new(HostCapabilityGate);
    let radio = Arc::new(BtleRadio::new(&config.service_filter).await?);

    let (event_tx, mut event_rx) = channel::<SessionEvent>(64);
    let cancel = CancellationToken::new();
    let (mut command_tx, handle) = discovery_session_task(
        cancel.clone(),
        gate,
        radio,
        vec![event_tx],
        SessionOptions { include_unnamed },
    );

    command_tx
        .send(SessionCommand::Start)
        .await
        .expect("Failed to send command to discovery session");

    println!("Scanning for {} seconds...", options.timeout);

    let deadline = sleep(Duration::from_secs(options.timeout));
    tokio::pin!(deadline);
    let mut deadline_fired = false;

    let mut devices: Vec<DeviceRecord> = Vec::new();
    let mut listed = 0usize;
    let mut selected: Option<DeviceRecord> = None;
    let mut failure: Option<FailureReason> = None;
    // a sent Select is answered after the Stopped transition, so do not
    // leave the loop before that answer arrives
    let mut select_pending = false;

    'scanning: loop {
        tokio::select! {
            _ = &mut deadline, if !deadline_fired => {
                deadline_fired = true;
                command_tx.send(SessionCommand::Cancel).await
                    .expect("Failed to send command to discovery session");
            },
            Some(event) = event_rx.next() => match event {
                SessionEvent::StateChanged(phase) => {
                    info!("Session is now {:?}", phase);
                    if phase == Phase::Stopped && !select_pending {
                        break 'scanning;
                    }
                },
                SessionEvent::DeviceListChanged(list) => {
                    for (index, record) in list.iter().enumerate().skip(listed) {
                        println!("  [{}] {}  {}", index, record.address, record.label());
                    }
                    listed = list.len();

                    if let Some(wanted) = &options.select {
                        if !select_pending && list.iter().any(|record| &record.address == wanted) {
                            select_pending = true;
                            command_tx.send(SessionCommand::Select(wanted.clone())).await
                                .expect("Failed to send command to discovery session");
                        }
                    }

                    devices = list;
                },
                SessionEvent::DeviceSelected(record) => {
                    selected = Some(record);
                    break 'scanning;
                },
                SessionEvent::Failure(reason) => {
                    failure = Some(reason);
                    break 'scanning;
                },
            },
        }
    }

    if let Some(reason) = failure {
        cancel.cancel();
        let _ = handle.await;
        return Err(AppRunError::Discovery { reason });
    }

    if selected.is_none() && !options.list_only {
        if let Some(wanted) = &options.select {
            cancel.cancel();
            let _ = handle.await;
            return Err(AppRunError::Discovery {
                reason: FailureReason::NotFound {
                    address: wanted.clone(),
                },
            });
        }

        if devices.is_empty() {
            println!("No devices found.");
        } else {
            selected = prompt_selection(&devices, &mut command_tx, &mut event_rx).await?;
        }
    }

    if let Some(record) = &selected {
        println!("{}", record.address);

        config.last_selected = Some(record.address.clone());
        if let Err(err) = store.save(&config).await {
            warn!("Failed to save config: {:?}", err);
        }
    }

    cancel.cancel();
    handle.await.expect("Failed to join discovery session task");
    Ok(())
}

async fn prompt_selection(
    devices: &[DeviceRecord],
    command_tx: &mut Sender<SessionCommand>,
    event_rx: &mut Receiver<SessionEvent>,
) -> Result<Option<DeviceRecord>, AppRunError> {
    println!("Pick a device by number (empty to quit):");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let line = match lines.next_line().await? {
        Some(line) => line,
        None => return Ok(None),
    };
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let index: usize = match line.parse() {
        Ok(index) => index,
        Err(_) => {
            println!("Not a number: {}", line);
            return Ok(None);
        },
    };
    let record = match devices.get(index) {
        Some(record) => record,
        None => {
            println!("No such entry: {}", index);
            return Ok(None);
        },
    };

    command_tx
        .send(SessionCommand::Select(record.address.clone()))
        .await
        .expect("Failed to send command to discovery session");

    while let Some(event) = event_rx.next().await {
        match event {
            SessionEvent::DeviceSelected(record) => return Ok(Some(record)),
            SessionEvent::Failure(reason) => return Err(AppRunError::Discovery { reason }),
            _ => {},
        }
    }

    Ok(None)
}
