//! Connection registry
//!
//! The registry owns every live session. It runs as a single task that
//! processes commands one at a time, so the session map has exactly one
//! writer and Register, Unregister and ForceCloseByPrefix never interleave.
//! Everything else talks to it through a cloneable [`RegistryHandle`].
//!
//! While running, the loop never touches a socket: closing a removed session
//! runs in its own task, so a stalled peer cannot hold up other sessions.
//! Shutdown is the exception and closes everything before it replies.

use futures_util::future::join_all;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::{Bridge, BridgeConfig};
use crate::session::{Session, SessionInfo};

const COMMAND_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Session already registered: {0}")]
    DuplicateSession(String),

    #[error("Connection registry is not running")]
    Unavailable,
}

pub(crate) enum Command {
    Register {
        session: Session,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    Unregister {
        id: String,
        /// Only remove the entry created by this registration
        serial: Option<u64>,
        reply: Option<oneshot::Sender<bool>>,
    },
    ForceCloseByPrefix {
        prefix: String,
        reply: oneshot::Sender<Vec<String>>,
    },
    List {
        reply: oneshot::Sender<Vec<SessionInfo>>,
    },
    Shutdown {
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable access to a running [`ConnectionRegistry`]
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<Command>,
}

impl RegistryHandle {
    pub(crate) fn from_sender(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        command: Command,
        reply: oneshot::Receiver<T>,
    ) -> Result<T, RegistryError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| RegistryError::Unavailable)?;
        reply.await.map_err(|_| RegistryError::Unavailable)
    }

    /// Register a session and start its bridge.
    ///
    /// A live session with the same id is never replaced: the new session
    /// is closed and `DuplicateSession` returned.
    pub async fn register(&self, session: Session) -> Result<(), RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Register { session, reply }, rx).await?
    }

    /// Remove a session and close both its streams.
    ///
    /// Returns `false` when no such session was live.
    pub async fn unregister(&self, id: &str) -> Result<bool, RegistryError> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Unregister {
            id: id.to_string(),
            serial: None,
            reply: Some(reply),
        };
        self.request(command, rx).await
    }

    /// Unregister every live session whose id starts with `prefix`
    pub async fn force_close_by_prefix(&self, prefix: &str) -> Result<Vec<String>, RegistryError> {
        let (reply, rx) = oneshot::channel();
        let command = Command::ForceCloseByPrefix {
            prefix: prefix.to_string(),
            reply,
        };
        self.request(command, rx).await
    }

    pub async fn list(&self) -> Result<Vec<SessionInfo>, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::List { reply }, rx).await
    }

    /// Close every live session and stop the registry.
    ///
    /// Resolves after every session's streams have been closed. Returns the
    /// number of sessions that were closed.
    pub async fn shutdown(&self) -> Result<usize, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Shutdown { reply }, rx).await
    }

    /// Fire-and-forget unregister used by bridges
    pub(crate) async fn request_unregister(&self, id: &str, serial: Option<u64>) {
        let command = Command::Unregister {
            id: id.to_string(),
            serial,
            reply: None,
        };
        if self.tx.send(command).await.is_err() {
            debug!(session_id = %id, "Registry gone, skipping unregister");
        }
    }
}

struct LiveSession {
    serial: u64,
    session: Session,
}

/// Owner of all live sessions
pub struct ConnectionRegistry {
    commands: mpsc::Receiver<Command>,
    /// Handed to bridges so they can unregister themselves
    handle: RegistryHandle,
    sessions: HashMap<String, LiveSession>,
    next_serial: u64,
    bridge_config: BridgeConfig,
}

impl ConnectionRegistry {
    pub fn new(bridge_config: BridgeConfig) -> (Self, RegistryHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = RegistryHandle::from_sender(tx);
        let registry = Self {
            commands,
            handle: handle.clone(),
            sessions: HashMap::new(),
            next_serial: 0,
            bridge_config,
        };
        (registry, handle)
    }

    /// Start the registry loop on the current runtime
    pub fn spawn(bridge_config: BridgeConfig) -> (RegistryHandle, JoinHandle<()>) {
        let (registry, handle) = Self::new(bridge_config);
        let task = tokio::spawn(registry.run());
        (handle, task)
    }

    /// Process commands until a shutdown request arrives
    pub async fn run(mut self) {
        debug!("Connection registry started");

        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Register { session, reply } => {
                    let _ = reply.send(self.register(session));
                }
                Command::Unregister { id, serial, reply } => {
                    let removed = self.unregister(&id, serial);
                    if let Some(reply) = reply {
                        let _ = reply.send(removed);
                    }
                }
                Command::ForceCloseByPrefix { prefix, reply } => {
                    let closed = self.force_close_by_prefix(&prefix);
                    let _ = reply.send(closed);
                }
                Command::List { reply } => {
                    let _ = reply.send(self.list());
                }
                Command::Shutdown { reply } => {
                    let count = self.close_all().await;
                    info!("Connection registry stopped, closed {} sessions", count);
                    let _ = reply.send(count);
                    return;
                }
            }
        }
    }

    fn register(&mut self, session: Session) -> Result<(), RegistryError> {
        if self.sessions.contains_key(&session.id) {
            warn!(session_id = %session.id, "Rejecting duplicate session");
            let id = session.id.clone();
            tokio::spawn(async move { session.close().await });
            return Err(RegistryError::DuplicateSession(id));
        }

        self.next_serial += 1;
        let serial = self.next_serial;

        info!(
            session_id = %session.id,
            role = %session.meta.role,
            peer = %session.meta.peer,
            target = %session.meta.target,
            "LINK"
        );

        let bridge = Bridge::new(
            session.id.clone(),
            session.tcp.clone(),
            session.tunnel.clone(),
            self.handle.clone(),
            self.bridge_config.clone(),
        )
        .with_serial(serial);
        tokio::spawn(bridge.run());

        self.sessions
            .insert(session.id.clone(), LiveSession { serial, session });
        Ok(())
    }

    fn unregister(&mut self, id: &str, serial: Option<u64>) -> bool {
        let stale = match (self.sessions.get(id), serial) {
            (None, _) => return false,
            (Some(live), Some(serial)) => live.serial != serial,
            (Some(_), None) => false,
        };
        if stale {
            debug!(session_id = %id, "Ignoring unregister from a previous registration");
            return false;
        }

        let Some(live) = self.sessions.remove(id) else {
            return false;
        };
        info!(session_id = %id, "REMOVE");
        tokio::spawn(async move { live.session.close().await });
        true
    }

    /// Remove every session and wait for all of their closes
    async fn close_all(&mut self) -> usize {
        let closes: Vec<_> = self
            .sessions
            .drain()
            .map(|(id, live)| {
                info!(session_id = %id, "REMOVE");
                async move { live.session.close().await }
            })
            .collect();
        let count = closes.len();
        join_all(closes).await;
        count
    }

    fn force_close_by_prefix(&mut self, prefix: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .sessions
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect();
        for id in &ids {
            self.unregister(id, None);
        }
        if !ids.is_empty() {
            info!("Force closed {} sessions with prefix {}", ids.len(), prefix);
        }
        ids
    }

    fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.values().map(|live| live.session.info()).collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }
}
