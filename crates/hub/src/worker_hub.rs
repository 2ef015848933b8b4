// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker Hub: server-side connection manager for local worker processes
//! (spec §4.3).
//!
//! One tokio task per accepted connection drives the
//! `pending_auth -> authenticated -> registered -> {busy|idle} -> disconnected`
//! state machine described in spec §4.3. Connections never hold the
//! `workers` map lock across a socket send (spec §5 "no lock is ever held
//! across an outbound send").

use crate::error::HubError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use memhub_core::{
    Capability, Clock, Destination, TaskEventsSink, TaskId, TaskType, TransportSender, Worker, WorkerId, WorkerMetadata,
};
use memhub_wire::{CloseCode, HubToWorkerMessage, TaskEnvelope, WorkerToHubMessage};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Tunables for the Worker Hub (spec §5 defaults).
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub auth_token: Option<String>,
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub max_missed_heartbeats: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            auth_token: None,
            auth_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            max_missed_heartbeats: 3,
        }
    }
}

struct WorkerEntry {
    worker: Worker,
    outbound: mpsc::UnboundedSender<HubToWorkerMessage>,
    /// Set by the heartbeat sweeper to force a connection closed with a
    /// specific code; the connection task watches this and exits.
    force_close: watch::Sender<Option<CloseCode>>,
}

/// Server-side connection manager for local worker processes (spec §4.3).
pub struct WorkerHub<C: Clock> {
    config: HubConfig,
    clock: C,
    workers: Mutex<HashMap<WorkerId, WorkerEntry>>,
    sink: Arc<dyn TaskEventsSink>,
    round_robin: AtomicUsize,
}

impl<C: Clock> WorkerHub<C> {
    pub fn new(config: HubConfig, clock: C, sink: Arc<dyn TaskEventsSink>) -> Arc<Self> {
        Arc::new(Self { config, clock, workers: Mutex::new(HashMap::new()), sink, round_robin: AtomicUsize::new(0) })
    }

    /// Accept connections on `listener` until the process is asked to shut
    /// down. Each connection is handled on its own task.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), HubError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            let hub = self.clone();
            tokio::spawn(async move {
                tracing::info!(%addr, "worker hub: connection accepted");
                if let Err(err) = hub.handle_connection(stream).await {
                    tracing::warn!(%addr, %err, "worker hub: connection ended with error");
                }
            });
        }
    }

    /// Send `server:shutdown` to every connected worker (spec §5 shutdown).
    pub fn broadcast_shutdown(&self) {
        for entry in self.workers.lock().values() {
            let _ = entry.outbound.send(HubToWorkerMessage::ServerShutdown);
        }
    }

    /// Close connections whose `last_heartbeat` predates
    /// `heartbeat_interval * max_missed_heartbeats` (spec §4.3).
    pub fn sweep_heartbeats(&self) {
        let now = self.clock.now();
        let threshold = self.config.heartbeat_interval * self.config.max_missed_heartbeats;
        let stale: Vec<WorkerId> = self
            .workers
            .lock()
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.worker.last_heartbeat) > threshold)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            tracing::warn!(worker_id = %id, "worker hub: heartbeat timeout, closing connection");
            if let Some(entry) = self.workers.lock().get(&id) {
                let _ = entry.force_close.send(Some(CloseCode::HeartbeatTimeout));
            }
        }
    }

    /// Any worker with a matching capability that is currently idle,
    /// selected round-robin among candidates so no idle worker starves
    /// (spec §4.3 `findAvailableWorker`).
    pub fn find_available_worker(&self, capability: &Capability) -> Option<WorkerId> {
        let workers = self.workers.lock();
        let mut candidates: Vec<WorkerId> = workers.values().filter(|e| e.worker.is_idle() && e.worker.has_capability(capability)).map(|e| e.worker.id).collect();
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by_key(|id| id.as_str().to_string());
        let i = self.round_robin.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[i])
    }

    /// Atomically claim `worker_id` (if still idle) and send `task:assign`
    /// (spec §4.3 `assignTask`).
    pub async fn assign_task(&self, worker_id: WorkerId, task_id: TaskId, task_type: TaskType, payload: serde_json::Value, capability: Capability) -> bool {
        let outbound = {
            let mut workers = self.workers.lock();
            match workers.get_mut(&worker_id) {
                Some(entry) if entry.worker.is_idle() => {
                    entry.worker.current_task_id = Some(task_id);
                    entry.outbound.clone()
                }
                _ => return false,
            }
        };
        let message = HubToWorkerMessage::TaskAssign { task: TaskEnvelope { id: task_id, task_type, payload }, capability };
        outbound.send(message).is_ok()
    }

    /// Relay `task:cancel`; best-effort, does not change any task state
    /// (spec §5 Cancellation).
    pub fn cancel_task(&self, worker_id: WorkerId, task_id: TaskId, reason: Option<String>) {
        if let Some(entry) = self.workers.lock().get(&worker_id) {
            let _ = entry.outbound.send(HubToWorkerMessage::TaskCancel { task_id, reason });
        }
    }

    pub fn connected_worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    fn release_worker_task(&self, worker_id: WorkerId) {
        if let Some(entry) = self.workers.lock().get_mut(&worker_id) {
            entry.worker.current_task_id = None;
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream) -> Result<(), HubError> {
        let mut ws = tokio_tungstenite::accept_async(stream).await?;

        let (worker_id, outbound_rx) = match self.handshake(&mut ws).await? {
            Some(pair) => pair,
            None => return Ok(()),
        };

        let result = self.message_loop(&mut ws, worker_id, outbound_rx).await;

        self.workers.lock().remove(&worker_id);
        self.sink.on_worker_disconnected(worker_id).await;
        tracing::info!(%worker_id, "worker hub: worker disconnected");
        result
    }

    /// Drive `pending_auth -> authenticated -> registered`, returning the
    /// hub-assigned [`WorkerId`] and this connection's outbound receiver
    /// once registration succeeds, or `None` if the connection was closed
    /// during the handshake.
    async fn handshake(&self, ws: &mut WebSocketStream<TcpStream>) -> Result<Option<(WorkerId, mpsc::UnboundedReceiver<HubToWorkerMessage>)>, HubError> {
        let auth_required = self.config.auth_token.is_some();

        if auth_required {
            send(ws, &HubToWorkerMessage::ConnectionPending).await?;

            let frame = tokio::time::timeout(self.config.auth_timeout, ws.next()).await;
            let text = match frame {
                Ok(Some(Ok(Message::Text(text)))) => text,
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return Ok(None),
                Ok(Some(Err(err))) => return Err(err.into()),
                Ok(Some(Ok(_))) => return Ok(None),
                Err(_) => {
                    close(ws, CloseCode::AuthTimeout).await;
                    return Ok(None);
                }
            };

            match memhub_wire::decode::<WorkerToHubMessage>(&text) {
                Ok(WorkerToHubMessage::Auth { token }) => {
                    if Some(&token) != self.config.auth_token.as_ref() {
                        send(ws, &HubToWorkerMessage::AuthFailed { reason: "invalid token".into() }).await.ok();
                        close(ws, CloseCode::InvalidToken).await;
                        return Ok(None);
                    }
                    send(ws, &HubToWorkerMessage::AuthSuccess).await?;
                }
                Ok(WorkerToHubMessage::Register { .. }) => {
                    close(ws, CloseCode::RegisterWithoutAuth).await;
                    return Ok(None);
                }
                _ => {
                    close(ws, CloseCode::UnexpectedAuth).await;
                    return Ok(None);
                }
            }
        }

        let text = match ws.next().await {
            Some(Ok(Message::Text(text))) => text,
            _ => return Ok(None),
        };
        let (capabilities, metadata) = match memhub_wire::decode::<WorkerToHubMessage>(&text) {
            Ok(WorkerToHubMessage::Register { capabilities, metadata }) => (capabilities, metadata),
            Ok(WorkerToHubMessage::Auth { .. }) if auth_required => {
                close(ws, CloseCode::UnexpectedAuth).await;
                return Ok(None);
            }
            _ => return Ok(None),
        };

        let worker_id = WorkerId::new();
        let worker_metadata: WorkerMetadata = serde_json::from_value(metadata).unwrap_or_default();
        let worker = Worker::new(worker_id, HashSet::from_iter(capabilities.clone()), worker_metadata, self.clock.now());

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (force_close_tx, _) = watch::channel(None);
        self.workers.lock().insert(worker_id, WorkerEntry { worker, outbound: outbound_tx, force_close: force_close_tx });

        send(ws, &HubToWorkerMessage::Registered { worker_id }).await?;

        self.sink.on_worker_connected(worker_id, HashSet::from_iter(capabilities)).await;
        tracing::info!(%worker_id, "worker hub: worker registered");
        Ok(Some((worker_id, outbound_rx)))
    }

    async fn message_loop(&self, ws: &mut WebSocketStream<TcpStream>, worker_id: WorkerId, mut rx: mpsc::UnboundedReceiver<HubToWorkerMessage>) -> Result<(), HubError> {
        let mut force_close_rx = match self.workers.lock().get(&worker_id) {
            Some(entry) => entry.force_close.subscribe(),
            None => return Ok(()),
        };

        loop {
            tokio::select! {
                incoming = ws.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(err) = self.handle_worker_message(worker_id, &text).await {
                                tracing::warn!(%worker_id, %err, "worker hub: failed to handle message");
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Err(err.into()),
                    }
                }
                outgoing = rx.recv() => {
                    match outgoing {
                        Some(message) => send(ws, &message).await?,
                        None => return Ok(()),
                    }
                }
                changed = force_close_rx.changed() => {
                    if changed.is_ok() {
                        if let Some(code) = *force_close_rx.borrow() {
                            close(ws, code).await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_worker_message(&self, worker_id: WorkerId, text: &str) -> Result<(), HubError> {
        let message: WorkerToHubMessage = memhub_wire::decode(text)?;
        match message {
            WorkerToHubMessage::Heartbeat { .. } => {
                if let Some(entry) = self.workers.lock().get_mut(&worker_id) {
                    entry.worker.last_heartbeat = self.clock.now();
                    let _ = entry.outbound.send(HubToWorkerMessage::HeartbeatAck);
                }
            }
            WorkerToHubMessage::TaskComplete { task_id, result, processing_time_ms, .. } => {
                self.release_worker_task(worker_id);
                self.sink.on_task_complete(Destination::Worker(worker_id), task_id, result, processing_time_ms).await;
            }
            WorkerToHubMessage::TaskError { task_id, error, retryable, .. } => {
                self.release_worker_task(worker_id);
                self.sink.on_task_error(Destination::Worker(worker_id), task_id, error, retryable).await;
            }
            WorkerToHubMessage::TaskProgress { task_id, progress, message, .. } => {
                self.sink.on_task_progress(Destination::Worker(worker_id), task_id, progress, message).await;
            }
            WorkerToHubMessage::Shutdown { reason, .. } => {
                tracing::info!(%worker_id, ?reason, "worker hub: worker requested shutdown");
            }
            WorkerToHubMessage::Auth { .. } | WorkerToHubMessage::Register { .. } => {
                tracing::warn!(%worker_id, "worker hub: unexpected auth/register after registration");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<C: Clock> TransportSender for WorkerHub<C> {
    fn available_capabilities(&self) -> HashSet<Capability> {
        self.workers.lock().values().filter(|e| e.worker.is_idle()).flat_map(|e| e.worker.capabilities.iter().cloned()).collect()
    }

    fn resolve(&self, capability: &Capability) -> Option<Destination> {
        self.find_available_worker(capability).map(Destination::Worker)
    }

    async fn send_assign(&self, destination: Destination, task_id: TaskId, task_type: TaskType, payload: serde_json::Value, capability: Capability) -> bool {
        let Destination::Worker(worker_id) = destination else { return false };
        self.assign_task(worker_id, task_id, task_type, payload, capability).await
    }

    async fn send_cancel(&self, destination: Destination, task_id: TaskId, reason: Option<String>) {
        if let Destination::Worker(worker_id) = destination {
            self.cancel_task(worker_id, task_id, reason);
        }
    }

    fn has_destination(&self, destination: Destination) -> bool {
        matches!(destination, Destination::Worker(id) if self.workers.lock().contains_key(&id))
    }
}

async fn send(ws: &mut WebSocketStream<TcpStream>, message: &HubToWorkerMessage) -> Result<(), HubError> {
    let text = memhub_wire::encode(message)?;
    ws.send(Message::Text(text.into())).await?;
    Ok(())
}

async fn close(ws: &mut WebSocketStream<TcpStream>, code: CloseCode) {
    let frame = CloseFrame { code: WsCloseCode::Library(code.as_u16()), reason: std::borrow::Cow::Borrowed("") };
    let _ = ws.close(Some(frame)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use memhub_core::test_support::NullTaskEventsSink;
    use memhub_core::FakeClock;

    fn hub() -> Arc<WorkerHub<FakeClock>> {
        WorkerHub::new(HubConfig::default(), FakeClock::new(), Arc::new(NullTaskEventsSink))
    }

    #[test]
    fn find_available_worker_returns_none_when_empty() {
        let hub = hub();
        assert!(hub.find_available_worker(&Capability::new("observation", "mistral")).is_none());
    }

    #[tokio::test]
    async fn assign_task_fails_for_unknown_worker() {
        let hub = hub();
        let ok = hub.assign_task(WorkerId::new(), TaskId::new(), TaskType::Observation, serde_json::Value::Null, Capability::new("observation", "mistral")).await;
        assert!(!ok);
    }
}
