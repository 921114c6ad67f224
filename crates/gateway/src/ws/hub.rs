// Connection registry and broadcast fan-out.
//
// The hub is an actor: one coordination task owns the active-session
// set and suspends only on its command channel, so registration,
// removal, and fan-out iteration are serialized without a lock. A slow
// consumer (full outbound buffer) is marked during iteration and
// removed after the full pass; fan-out never blocks on it.

use std::collections::HashMap;
use std::sync::Arc;

use palaver_common::protocol::ws::parse_frame;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics;

use super::session::Outbound;

/// Capacity of the hub's command channel.
const COMMAND_BUFFER: usize = 256;

pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HubState {
    Running,
    ShuttingDown,
    Stopped,
}

struct SessionEntry {
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

enum HubCommand {
    Register {
        id: SessionId,
        outbound: mpsc::Sender<Outbound>,
        cancel: CancellationToken,
        reply: oneshot::Sender<bool>,
    },
    Unregister {
        id: SessionId,
    },
    Broadcast {
        raw: String,
    },
    ActiveCount {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the hub's coordination task.
///
/// Once the hub has stopped, `register` returns false and the other
/// operations become no-ops.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

pub struct Hub;

impl Hub {
    /// Spawn the coordination task and return a handle to it.
    pub fn spawn() -> HubHandle {
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(run(receiver));
        HubHandle { commands }
    }
}

impl HubHandle {
    /// Add a session to the active set. Returns false when the hub is
    /// shutting down (the caller must close the connection).
    pub async fn register(
        &self,
        id: SessionId,
        outbound: mpsc::Sender<Outbound>,
        cancel: CancellationToken,
    ) -> bool {
        let (reply, response) = oneshot::channel();
        if self
            .commands
            .send(HubCommand::Register { id, outbound, cancel, reply })
            .await
            .is_err()
        {
            return false;
        }
        response.await.unwrap_or(false)
    }

    /// Remove a session if present. Idempotent: unknown ids are a no-op.
    pub async fn unregister(&self, id: SessionId) {
        let _ = self.commands.send(HubCommand::Unregister { id }).await;
    }

    /// Validate a raw frame and fan it out to every active session.
    /// Invalid frames are dropped (logged) with zero deliveries.
    pub async fn broadcast(&self, raw: String) {
        let _ = self.commands.send(HubCommand::Broadcast { raw }).await;
    }

    pub async fn active_count(&self) -> usize {
        let (reply, response) = oneshot::channel();
        if self.commands.send(HubCommand::ActiveCount { reply }).await.is_err() {
            return 0;
        }
        response.await.unwrap_or(0)
    }

    /// Stop the hub: refuse new registrations, signal every session to
    /// close, clear the set. Terminal; there is no restart path.
    pub async fn shutdown(&self) {
        let (reply, response) = oneshot::channel();
        if self.commands.send(HubCommand::Shutdown { reply }).await.is_err() {
            return;
        }
        let _ = response.await;
    }
}

async fn run(mut commands: mpsc::Receiver<HubCommand>) {
    let mut sessions: HashMap<SessionId, SessionEntry> = HashMap::new();
    let mut state = HubState::Running;

    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register { id, outbound, cancel, reply } => {
                if state != HubState::Running {
                    let _ = reply.send(false);
                    continue;
                }
                sessions.insert(id, SessionEntry { outbound, cancel });
                metrics::record_session_registered();
                metrics::set_active_sessions(sessions.len());
                info!(session_id = %id, active = sessions.len(), "session registered");
                let _ = reply.send(true);
            }
            HubCommand::Unregister { id } => {
                remove_session(&mut sessions, id);
            }
            HubCommand::Broadcast { raw } => {
                let frame = match parse_frame(raw.as_bytes()) {
                    Ok(frame) => frame,
                    Err(error) => {
                        metrics::record_invalid_frame();
                        warn!(%error, "dropping invalid broadcast frame");
                        continue;
                    }
                };

                let encoded: Arc<str> = Arc::from(raw);
                let mut stalled = Vec::new();
                for (id, entry) in &sessions {
                    if entry.outbound.try_send(Outbound::Frame(Arc::clone(&encoded))).is_err() {
                        stalled.push(*id);
                    }
                }

                for id in stalled {
                    metrics::record_backpressure_drop();
                    warn!(session_id = %id, "outbound buffer full, disconnecting slow consumer");
                    remove_session(&mut sessions, id);
                }

                metrics::record_broadcast();
                debug!(
                    frame_type = %frame.kind,
                    frame_id = frame.id.as_deref().unwrap_or(""),
                    recipients = sessions.len(),
                    "frame broadcast"
                );
            }
            HubCommand::ActiveCount { reply } => {
                let _ = reply.send(sessions.len());
            }
            HubCommand::Shutdown { reply } => {
                state = HubState::ShuttingDown;
                info!(active = sessions.len(), ?state, "hub shutting down");
                for (_, entry) in sessions.drain() {
                    entry.cancel.cancel();
                }
                metrics::set_active_sessions(0);
                state = HubState::Stopped;
                let _ = reply.send(());
                break;
            }
        }
    }

    debug!(?state, "hub coordination task exited");
}

fn remove_session(sessions: &mut HashMap<SessionId, SessionEntry>, id: SessionId) {
    // Idempotent: a second unregister finds nothing and does nothing.
    if let Some(entry) = sessions.remove(&id) {
        entry.cancel.cancel();
        drop(entry.outbound);
        metrics::record_session_unregistered();
        metrics::set_active_sessions(sessions.len());
        info!(session_id = %id, active = sessions.len(), "session unregistered");
    }
}
