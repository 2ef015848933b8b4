// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Federation Handler: accepts connections from downstream hubs, each
//! exposing a pool of workers rather than a single process (spec §4.4).
//!
//! Wire shape mirrors the Worker Hub with `hub:` prefixes. On register the
//! hub is persisted via [`HubRegistry`]; `hub:health` reports replace
//! per-worker heartbeats and update the durable row's aggregate fields.

use crate::error::HubError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use memhub_core::{Capability, Clock, Destination, HubId, HubKind, HubStatus, TaskEventsSink, TaskId, TaskType, TransportSender};
use memhub_storage::HubRegistry;
use memhub_wire::{BackendToHubMessage, CloseCode, HubToBackendMessage, TaskEnvelope};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

#[derive(Debug, Clone)]
pub struct FederationConfig {
    pub auth_token: Option<String>,
    pub auth_timeout: Duration,
    pub health_interval: Duration,
    pub max_missed_reports: u32,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            auth_token: None,
            auth_timeout: Duration::from_secs(10),
            health_interval: Duration::from_secs(30),
            max_missed_reports: 3,
        }
    }
}

struct HubSession {
    last_report: std::time::Instant,
    outbound: mpsc::UnboundedSender<HubToBackendMessage>,
    force_close: watch::Sender<Option<CloseCode>>,
}

/// Server-side connection manager for downstream (external) hubs (spec §4.4).
pub struct FederationHandler<C: Clock> {
    config: FederationConfig,
    clock: C,
    registry: Arc<dyn HubRegistry>,
    sessions: Mutex<HashMap<HubId, HubSession>>,
    sink: Arc<dyn TaskEventsSink>,
}

impl<C: Clock> FederationHandler<C> {
    pub fn new(config: FederationConfig, clock: C, registry: Arc<dyn HubRegistry>, sink: Arc<dyn TaskEventsSink>) -> Arc<Self> {
        Arc::new(Self { config, clock, registry, sessions: Mutex::new(HashMap::new()), sink })
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), HubError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            let handler = self.clone();
            tokio::spawn(async move {
                tracing::info!(%addr, "federation handler: connection accepted");
                if let Err(err) = handler.handle_connection(stream).await {
                    tracing::warn!(%addr, %err, "federation handler: connection ended with error");
                }
            });
        }
    }

    pub fn broadcast_shutdown(&self) {
        for session in self.sessions.lock().values() {
            let _ = session.outbound.send(HubToBackendMessage::ServerShutdown);
        }
    }

    /// Missed reports x threshold marks a hub unhealthy and closes its
    /// connection (spec §4.4).
    pub fn sweep_health(&self) {
        let now = self.clock.now();
        let threshold = self.config.health_interval * self.config.max_missed_reports;
        let stale: Vec<HubId> = self.sessions.lock().iter().filter(|(_, s)| now.duration_since(s.last_report) > threshold).map(|(id, _)| *id).collect();
        for id in stale {
            tracing::warn!(hub_id = %id, "federation handler: health report timeout, marking unhealthy");
            let _ = self.registry.set_status(id, HubStatus::Unhealthy);
            if let Some(session) = self.sessions.lock().get(&id) {
                let _ = session.force_close.send(Some(CloseCode::HeartbeatTimeout));
            }
        }
    }

    /// Send `hub:task:assign` through the downstream hub's socket; it binds
    /// to one of its own workers (spec §4.4).
    pub fn assign_task(&self, hub_id: HubId, task_id: TaskId, task_type: TaskType, payload: serde_json::Value, capability: Capability) -> bool {
        let sessions = self.sessions.lock();
        match sessions.get(&hub_id) {
            Some(session) => session.outbound.send(HubToBackendMessage::TaskAssign { task: TaskEnvelope { id: task_id, task_type, payload }, capability }).is_ok(),
            None => false,
        }
    }

    pub fn cancel_task(&self, hub_id: HubId, task_id: TaskId, reason: Option<String>) {
        if let Some(session) = self.sessions.lock().get(&hub_id) {
            let _ = session.outbound.send(HubToBackendMessage::TaskCancel { task_id, reason });
        }
    }

    /// Dispatchable (healthy/degraded) hubs, ordered by priority desc then
    /// load asc, used to pick among several federated candidates (spec §4.5
    /// step 4).
    pub fn dispatchable_hubs(&self) -> Vec<memhub_core::Hub> {
        let mut hubs = self.registry.list().unwrap_or_default();
        hubs.retain(|h| h.status.is_dispatchable() && self.sessions.lock().contains_key(&h.id));
        hubs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.load_fraction().partial_cmp(&b.load_fraction()).unwrap_or(std::cmp::Ordering::Equal)));
        hubs
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream) -> Result<(), HubError> {
        let mut ws = tokio_tungstenite::accept_async(stream).await?;

        let (hub_id, outbound_rx) = match self.handshake(&mut ws).await? {
            Some(pair) => pair,
            None => return Ok(()),
        };

        let result = self.message_loop(&mut ws, hub_id, outbound_rx).await;

        self.sessions.lock().remove(&hub_id);
        let _ = self.registry.set_status(hub_id, HubStatus::Offline);
        self.sink.on_hub_disconnected(hub_id).await;
        tracing::info!(%hub_id, "federation handler: hub disconnected");
        result
    }

    async fn handshake(&self, ws: &mut WebSocketStream<TcpStream>) -> Result<Option<(HubId, mpsc::UnboundedReceiver<HubToBackendMessage>)>, HubError> {
        let auth_required = self.config.auth_token.is_some();

        if auth_required {
            send(ws, &HubToBackendMessage::ConnectionPending).await?;

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

            match memhub_wire::decode::<BackendToHubMessage>(&text) {
                Ok(BackendToHubMessage::Auth { token }) => {
                    if Some(&token) != self.config.auth_token.as_ref() {
                        send(ws, &HubToBackendMessage::AuthFailed { reason: "invalid token".into() }).await.ok();
                        close(ws, CloseCode::InvalidToken).await;
                        return Ok(None);
                    }
                    send(ws, &HubToBackendMessage::AuthSuccess).await?;
                }
                Ok(BackendToHubMessage::Register { .. }) => {
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
        let (name, capabilities, _metadata) = match memhub_wire::decode::<BackendToHubMessage>(&text) {
            Ok(BackendToHubMessage::Register { name, capabilities, metadata }) => (name, capabilities, metadata),
            Ok(BackendToHubMessage::Auth { .. }) if auth_required => {
                close(ws, CloseCode::UnexpectedAuth).await;
                return Ok(None);
            }
            _ => return Ok(None),
        };

        let hub = self.registry.register(&name, HubKind::External, 0, 1, None, vec![])?;
        let _ = self.registry.report_health(hub.id, 0, 0, 0.0, HashSet::from_iter(capabilities));
        let _ = self.registry.set_status(hub.id, HubStatus::Healthy);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (force_close_tx, _) = watch::channel(None);
        self.sessions.lock().insert(hub.id, HubSession { last_report: self.clock.now(), outbound: outbound_tx, force_close: force_close_tx });

        send(ws, &HubToBackendMessage::Registered { hub_id: hub.id }).await?;
        tracing::info!(hub_id = %hub.id, name, "federation handler: hub registered");
        Ok(Some((hub.id, outbound_rx)))
    }

    async fn message_loop(&self, ws: &mut WebSocketStream<TcpStream>, hub_id: HubId, mut rx: mpsc::UnboundedReceiver<HubToBackendMessage>) -> Result<(), HubError> {
        let mut force_close_rx = match self.sessions.lock().get(&hub_id) {
            Some(session) => session.force_close.subscribe(),
            None => return Ok(()),
        };

        loop {
            tokio::select! {
                incoming = ws.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(err) = self.handle_hub_message(hub_id, &text).await {
                                tracing::warn!(%hub_id, %err, "federation handler: failed to handle message");
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

    async fn handle_hub_message(&self, hub_id: HubId, text: &str) -> Result<(), HubError> {
        let message: BackendToHubMessage = memhub_wire::decode(text)?;
        match message {
            BackendToHubMessage::Health { connected_workers, active_workers, avg_latency_ms, capabilities } => {
                if let Some(session) = self.sessions.lock().get_mut(&hub_id) {
                    session.last_report = self.clock.now();
                }
                self.registry.report_health(hub_id, connected_workers, active_workers, avg_latency_ms, HashSet::from_iter(capabilities))?;
                self.registry.set_status(hub_id, HubStatus::Healthy)?;
                if let Some(session) = self.sessions.lock().get(&hub_id) {
                    let _ = session.outbound.send(HubToBackendMessage::HealthAck);
                }
            }
            BackendToHubMessage::TaskComplete { task_id, result, processing_time_ms, .. } => {
                self.sink.on_task_complete(Destination::Hub(hub_id), task_id, result, processing_time_ms).await;
            }
            BackendToHubMessage::TaskError { task_id, error, retryable, .. } => {
                self.sink.on_task_error(Destination::Hub(hub_id), task_id, error, retryable).await;
            }
            BackendToHubMessage::TaskProgress { task_id, progress, message, .. } => {
                self.sink.on_task_progress(Destination::Hub(hub_id), task_id, progress, message).await;
            }
            BackendToHubMessage::Shutdown { reason, .. } => {
                tracing::info!(%hub_id, ?reason, "federation handler: downstream hub requested shutdown");
            }
            BackendToHubMessage::Auth { .. } | BackendToHubMessage::Register { .. } => {
                tracing::warn!(%hub_id, "federation handler: unexpected auth/register after registration");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<C: Clock> TransportSender for FederationHandler<C> {
    fn available_capabilities(&self) -> HashSet<Capability> {
        self.dispatchable_hubs().into_iter().flat_map(|h| h.capabilities).collect()
    }

    fn resolve(&self, capability: &Capability) -> Option<Destination> {
        self.dispatchable_hubs().into_iter().find(|h| h.capabilities.contains(capability)).map(|h| Destination::Hub(h.id))
    }

    async fn send_assign(&self, destination: Destination, task_id: TaskId, task_type: TaskType, payload: serde_json::Value, capability: Capability) -> bool {
        let Destination::Hub(hub_id) = destination else { return false };
        self.assign_task(hub_id, task_id, task_type, payload, capability)
    }

    async fn send_cancel(&self, destination: Destination, task_id: TaskId, reason: Option<String>) {
        if let Destination::Hub(hub_id) = destination {
            self.cancel_task(hub_id, task_id, reason);
        }
    }

    fn has_destination(&self, destination: Destination) -> bool {
        matches!(destination, Destination::Hub(id) if self.sessions.lock().contains_key(&id))
    }
}

async fn send(ws: &mut WebSocketStream<TcpStream>, message: &HubToBackendMessage) -> Result<(), HubError> {
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
    use memhub_storage::WalHubRegistry;
    use tempfile::tempdir;

    fn handler(dir: &std::path::Path) -> Arc<FederationHandler<FakeClock>> {
        let registry = Arc::new(WalHubRegistry::open(&dir.join("hubs.wal"), &dir.join("hubs.snapshot.zst"), FakeClock::new()).unwrap());
        FederationHandler::new(FederationConfig::default(), FakeClock::new(), registry, Arc::new(NullTaskEventsSink))
    }

    #[test]
    fn dispatchable_hubs_excludes_disconnected_rows() {
        let dir = tempdir().unwrap();
        let handler = handler(dir.path());
        // A hub row can exist in the registry without an active session
        // (e.g. after a restart); it must not be offered for dispatch.
        handler.registry.register("downstream", HubKind::External, 0, 1, None, vec![]).unwrap();
        assert!(handler.dispatchable_hubs().is_empty());
    }

    #[test]
    fn assign_task_fails_without_a_session() {
        let dir = tempdir().unwrap();
        let handler = handler(dir.path());
        let ok = handler.assign_task(HubId::new(), TaskId::new(), TaskType::Observation, serde_json::Value::Null, Capability::new("observation", "mistral"));
        assert!(!ok);
    }
}
