//! Service task: the single owner of a [`SyncCoordinator`].
//!
//! All state changes for a session happen on one tokio task. Requests from
//! the application arrive through [`SyncHandle`], transport callbacks
//! through [`TransportEvents`], and the beacon timer ticks in the same
//! `select!` loop, so the coordinator never sees concurrent calls and
//! observer callbacks are never reentrant.
//!
//! ```text
//! SyncHandle ──requests──┐
//! Transport ──events─────┼─► service task ─► SyncCoordinator
//! beacon interval ───────┘        │
//!                                 ├─► Transport (discovery, send_bytes)
//!                                 └─► SyncObserver
//! ```

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use wist_sync_core::SessionState;
use wist_sync_types::PeerId;

use crate::coordinator::{Effect, SyncCoordinator};
use crate::observer::SyncObserver;
use crate::transport::{DiscoveryInfo, Transport, TransportEvent, TransportEvents};
use crate::ClientError;

type Reply = oneshot::Sender<Result<(), ClientError>>;

enum Request {
    Enable,
    Disable,
    Reset,
    Start { tempo: f32, reply: Reply },
    Stop { reply: Reply },
    SetOutputLatency(u64),
    SetExtraDelay(u64),
    Shutdown,
}

/// Runs a coordinator on its own task.
pub struct SyncService<T: Transport> {
    coordinator: SyncCoordinator,
    transport: T,
    observer: Arc<dyn SyncObserver>,
    state_tx: watch::Sender<SessionState>,
}

impl<T: Transport + 'static> SyncService<T> {
    /// Spawn the service task and return a handle to it.
    ///
    /// The transport must report its callbacks to
    /// [`SyncHandle::transport_events`].
    pub fn spawn(
        coordinator: SyncCoordinator,
        transport: T,
        observer: Arc<dyn SyncObserver>,
    ) -> SyncHandle {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = TransportEvents::channel();
        let (state_tx, state) = watch::channel(coordinator.state().clone());
        let local_id = coordinator.local_id().clone();

        let service = Self {
            coordinator,
            transport,
            observer,
            state_tx,
        };
        let task = tokio::spawn(service.run(request_rx, event_rx));

        SyncHandle {
            requests,
            events,
            state,
            local_id,
            task,
        }
    }

    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        if let Err(e) = self.coordinator.config().validate() {
            tracing::warn!("Running with questionable configuration: {}", e);
        }
        let mut beacon = tokio::time::interval(self.coordinator.config().beacon.interval());
        beacon.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Sync service started for {} ({})",
            self.coordinator.local_id(),
            self.coordinator.config().session.display_name
        );

        loop {
            let effects = tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Shutdown) | None => break,
                    Some(request) => self.handle_request(request),
                },
                Some(event) = events.recv() => self.coordinator.handle_transport_event(event),
                _ = beacon.tick() => self.coordinator.on_beacon_tick(),
            };
            self.execute(effects).await;
            self.publish_state();
        }

        let effects = self.coordinator.disable_sync();
        self.execute(effects).await;
        self.publish_state();
        tracing::info!("Sync service stopped for {}", self.coordinator.local_id());
    }

    fn handle_request(&mut self, request: Request) -> Vec<Effect> {
        match request {
            Request::Enable => self.coordinator.enable_sync(),
            Request::Disable => self.coordinator.disable_sync(),
            Request::Reset => self.coordinator.reset(),
            Request::Start { tempo, reply } => {
                Self::answer(self.coordinator.request_start(tempo), reply)
            }
            Request::Stop { reply } => Self::answer(self.coordinator.request_stop(), reply),
            Request::SetOutputLatency(nanos) => self.coordinator.set_output_latency(nanos),
            Request::SetExtraDelay(nanos) => self.coordinator.set_extra_delay(nanos),
            // Handled by the run loop.
            Request::Shutdown => Vec::new(),
        }
    }

    fn answer(result: Result<Vec<Effect>, ClientError>, reply: Reply) -> Vec<Effect> {
        match result {
            Ok(effects) => {
                let _ = reply.send(Ok(()));
                effects
            }
            Err(e) => {
                let _ = reply.send(Err(e));
                Vec::new()
            }
        }
    }

    async fn execute(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartDiscovery => {
                    let info = DiscoveryInfo::from(&self.coordinator.config().session);
                    if let Err(e) = self.transport.advertise(&info).await {
                        tracing::warn!("Advertise failed: {}", e);
                    }
                    if let Err(e) = self.transport.browse(&info.service_type).await {
                        tracing::warn!("Browse failed: {}", e);
                    }
                }
                Effect::StopDiscovery => {
                    if let Err(e) = self.transport.stop_discovery().await {
                        tracing::warn!("Stop discovery failed: {}", e);
                    }
                }
                Effect::DisconnectPeer { peer } => {
                    if let Err(e) = self.transport.disconnect_peer(&peer).await {
                        tracing::warn!("Disconnect from {} failed: {}", peer, e);
                    }
                }
                Effect::Disconnect => {
                    if let Err(e) = self.transport.disconnect().await {
                        tracing::warn!("Disconnect failed: {}", e);
                    }
                }
                Effect::Send { peer, bytes } => {
                    if let Err(e) = self.transport.send_bytes(&peer, &bytes).await {
                        tracing::warn!("Send to {} failed: {}", peer, e);
                    }
                }
                Effect::Notify(notification) => notification.deliver(self.observer.as_ref()),
            }
        }
    }

    fn publish_state(&self) {
        self.state_tx.send_if_modified(|state| {
            if state != self.coordinator.state() {
                *state = self.coordinator.state().clone();
                true
            } else {
                false
            }
        });
    }
}

/// Application handle to a running sync service.
///
/// Lifecycle calls only enqueue a request and return immediately; follow
/// their progress with [`SyncHandle::state_watch`] or the observer.
pub struct SyncHandle {
    requests: mpsc::UnboundedSender<Request>,
    events: TransportEvents,
    state: watch::Receiver<SessionState>,
    local_id: PeerId,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Enable sync: start advertising and browsing.
    pub fn enable(&self) -> Result<(), ClientError> {
        self.send(Request::Enable)
    }

    /// Disable sync: tear the session down and report `ConnectionCancelled`.
    pub fn disable(&self) -> Result<(), ClientError> {
        self.send(Request::Disable)
    }

    /// Return to Idle.
    pub fn reset(&self) -> Result<(), ClientError> {
        self.send(Request::Reset)
    }

    /// Ask the session to start at `tempo` BPM.
    ///
    /// Resolves once the command is accepted or refused; does not wait for
    /// delivery to peers.
    pub async fn request_start(&self, tempo: f32) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Start { tempo, reply })?;
        rx.await.map_err(|_| ClientError::ServiceStopped)?
    }

    /// Ask the session to stop.
    pub async fn request_stop(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Stop { reply })?;
        rx.await.map_err(|_| ClientError::ServiceStopped)?
    }

    /// Update the local audio output latency (ns).
    pub fn set_output_latency(&self, nanos: u64) -> Result<(), ClientError> {
        self.send(Request::SetOutputLatency(nanos))
    }

    /// Update the user extra delay (ns).
    pub fn set_extra_delay(&self, nanos: u64) -> Result<(), ClientError> {
        self.send(Request::SetExtraDelay(nanos))
    }

    /// Last published session state.
    pub fn current_state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver that updates on every state change.
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait until the session reaches `target`.
    pub async fn wait_for_state(&self, target: SessionState) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::ServiceStopped)
    }

    /// Sink the transport pushes its callbacks into.
    pub fn transport_events(&self) -> TransportEvents {
        self.events.clone()
    }

    /// Local identity.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Disable sync and stop the service task.
    pub async fn shutdown(self) -> Result<(), ClientError> {
        // A closed channel means the task is already gone.
        let _ = self.requests.send(Request::Shutdown);
        self.task.await.map_err(|_| ClientError::ServiceStopped)
    }

    fn send(&self, request: Request) -> Result<(), ClientError> {
        self.requests
            .send(request)
            .map_err(|_| ClientError::ServiceStopped)
    }
}
