//! Two in-process devices over the mock transport.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};
use wist_sync_client::{
    ChannelObserver, MockTransport, MonotonicClock, Notification, SyncConfig, SyncCoordinator,
    SyncHandle, SyncService,
};
use wist_sync_core::SessionState;
use wist_sync_types::PeerId;

const STATE_TIMEOUT: Duration = Duration::from_secs(5);
const STEP: Duration = Duration::from_millis(200);

struct Device {
    name: &'static str,
    handle: SyncHandle,
    transport: MockTransport,
    notifications: UnboundedReceiver<Notification>,
}

impl Device {
    fn spawn(name: &'static str, config: &SyncConfig) -> Self {
        let id = PeerId::random();
        let transport = MockTransport::new(id.clone());
        let (observer, notifications) = ChannelObserver::new();

        // Each device counts from its own origin, so the clocks disagree.
        let coordinator = SyncCoordinator::new(
            config.clone().with_display_name(name),
            id,
            Arc::new(MonotonicClock::new()),
        );
        let handle = SyncService::spawn(coordinator, transport.clone(), Arc::new(observer));
        transport.attach(handle.transport_events());

        Self {
            name,
            handle,
            transport,
            notifications,
        }
    }

    async fn wait_for(&self, state: SessionState) -> Result<()> {
        timeout(STATE_TIMEOUT, self.handle.wait_for_state(state.clone()))
            .await
            .with_context(|| format!("{} did not reach {:?}", self.name, state))??;
        Ok(())
    }

    fn print_notifications(&mut self) {
        while let Ok(notification) = self.notifications.try_recv() {
            println!("[{}] {:?}", self.name, notification);
        }
    }
}

/// Run the demo command.
pub async fn run(tempo: f32, config_path: Option<&Path>, settle_ms: u64) -> Result<()> {
    let config = match config_path {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::default(),
    };
    config.validate()?;
    tracing::debug!(
        "Beacon interval {}ms, minimum lead {}ns",
        config.beacon.interval_ms,
        config.schedule.min_lead_ns
    );

    let mut left = Device::spawn("stage-left", &config);
    let mut right = Device::spawn("stage-right", &config);
    println!("{}: {}", left.name, left.handle.local_id());
    println!("{}: {}", right.name, right.handle.local_id());

    left.handle.enable()?;
    right.handle.enable()?;
    left.wait_for(SessionState::Advertising).await?;
    right.wait_for(SessionState::Advertising).await?;

    // stage-left's invitation is accepted, so it claims master.
    MockTransport::link(&left.transport, &right.transport);
    left.wait_for(SessionState::Connected).await?;
    right.wait_for(SessionState::Connected).await?;

    sleep(Duration::from_millis(settle_ms)).await;
    left.print_notifications();
    right.print_notifications();

    println!("--- start at {} BPM", tempo);
    left.handle.request_start(tempo).await?;
    sleep(STEP).await;
    left.print_notifications();
    right.print_notifications();

    println!("--- stop");
    left.handle.request_stop().await?;
    sleep(STEP).await;
    left.print_notifications();
    right.print_notifications();

    println!("--- disable {}", left.name);
    left.handle.disable()?;
    left.wait_for(SessionState::Cancelled).await?;
    right.wait_for(SessionState::Lost).await?;
    left.print_notifications();
    right.print_notifications();

    left.handle.shutdown().await?;
    right.handle.shutdown().await?;
    Ok(())
}
