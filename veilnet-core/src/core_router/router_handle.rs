/*
   RouterHandle

   Single entry point for the rest of the application and for the transport.
   A tokio task owns the Router; everyone else holds a cloneable RouterHandle
   and talks to that task over an mpsc channel, so all router state has
   exactly one writer.

   E.G: build_path() -> Result<PathId>
        send_on_path(path_id, msg) -> Result<bool>
        link_data(from, bytes)          (transport -> router)
        TransportAction stream          (router -> transport)

   Architecture:

    ┌──────────────────────────────────────────────────────┐
    │        Application / Transport                       │
    └───────┬───────────────────────────────▲──────────────┘
            │ RouterHandle API              │ TransportAction
            │ • session_established(rc)     │ (Dial / Transmit / Close)
            │ • link_data(from, bytes)      │
            │ • build_path()                │
            │ • send_on_path(path, msg)     │
    ┌───────▼───────────────────────────────┴──────────────┐
    │              Router event loop                       │
    │   commands ─► Router ─► drain_transport_actions()    │
    │   interval ─► Router::tick()                         │
    │   interval ─► contacts snapshot ─► spawn_blocking    │
    └──────────────────────────────────────────────────────┘
*/

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::access::{PathAccess, SessionAccess};
use super::dispatcher::{DispatchError, RoutingHandler};
use super::router::Router;
use super::routing_message::{RoutingMessage, RoutingMessageType};
use super::session_manager::TransportAction;
use crate::core_dht::{load_contacts, persist_contacts};
use crate::core_identity::{RouterContact, RouterId, SigningCapability};
use crate::core_path::{PathBuildError, PathBuildHandle, PathId};

const COMMAND_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("router task has stopped")]
    Stopped,

    #[error(transparent)]
    Build(#[from] PathBuildError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Point-in-time view of the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterStatus {
    pub router_id: RouterId,
    pub connected: usize,
    pub own_paths: usize,
    pub transit_hops: usize,
    pub known_contacts: usize,
}

/// Commands sent to the router task
pub enum RouterCommand {
    /// Transport finished a handshake
    SessionEstablished(RouterContact),
    /// Sealed frame received from a peer
    LinkData { from: RouterId, frame: Vec<u8> },
    SessionClosed(RouterId),
    ConnectTimeout(RouterId),
    AddContact(RouterContact),
    /// Build a path; `hops` picks them explicitly, `None` lets discovery choose
    BuildPath {
        hops: Option<Vec<Arc<RouterContact>>>,
        response_tx: oneshot::Sender<Result<PathBuildHandle, PathBuildError>>,
    },
    SendOnPath {
        path_id: PathId,
        msg: RoutingMessage,
        response_tx: oneshot::Sender<bool>,
    },
    ReplyOnTransit {
        rx_id: PathId,
        msg: RoutingMessage,
        response_tx: oneshot::Sender<bool>,
    },
    CancelBuild {
        path_id: PathId,
        response_tx: oneshot::Sender<bool>,
    },
    TeardownPath {
        path_id: PathId,
        response_tx: oneshot::Sender<bool>,
    },
    RegisterHandler {
        kind: RoutingMessageType,
        handler: Box<dyn RoutingHandler + Send + Sync>,
        response_tx: oneshot::Sender<Result<(), DispatchError>>,
    },
    Status(oneshot::Sender<RouterStatus>),
    Shutdown,
}

/// Handle to interact with the router task
#[derive(Clone)]
pub struct RouterHandle {
    command_tx: mpsc::Sender<RouterCommand>,
}

impl RouterHandle {
    /// Move `router` onto its own task.
    ///
    /// Returns the handle, the stream of transport actions and the task.
    pub fn spawn(
        router: Router,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<TransportAction>,
        JoinHandle<()>,
    ) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let task = RouterTask {
            router,
            command_rx,
            action_tx,
        };
        let join = tokio::spawn(task.run());
        (RouterHandle { command_tx }, action_rx, join)
    }

    async fn send(&self, cmd: RouterCommand) -> Result<(), HandleError> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| HandleError::Stopped)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RouterCommand,
    ) -> Result<T, HandleError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(make(response_tx)).await?;
        response_rx.await.map_err(|_| HandleError::Stopped)
    }

    pub async fn session_established(&self, rc: RouterContact) -> Result<(), HandleError> {
        self.send(RouterCommand::SessionEstablished(rc)).await
    }

    pub async fn link_data(&self, from: RouterId, frame: Vec<u8>) -> Result<(), HandleError> {
        self.send(RouterCommand::LinkData { from, frame }).await
    }

    pub async fn session_closed(&self, router: RouterId) -> Result<(), HandleError> {
        self.send(RouterCommand::SessionClosed(router)).await
    }

    pub async fn connect_timeout(&self, router: RouterId) -> Result<(), HandleError> {
        self.send(RouterCommand::ConnectTimeout(router)).await
    }

    pub async fn add_contact(&self, rc: RouterContact) -> Result<(), HandleError> {
        self.send(RouterCommand::AddContact(rc)).await
    }

    /// Build a path through routers discovery picks and wait for it.
    pub async fn build_path(&self) -> Result<PathId, HandleError> {
        let handle = self
            .request(|response_tx| RouterCommand::BuildPath {
                hops: None,
                response_tx,
            })
            .await??;
        Ok(handle.wait().await?)
    }

    /// Build a path through exactly `hops` and wait for it.
    pub async fn build_path_through(
        &self,
        hops: Vec<Arc<RouterContact>>,
    ) -> Result<PathId, HandleError> {
        let handle = self
            .request(|response_tx| RouterCommand::BuildPath {
                hops: Some(hops),
                response_tx,
            })
            .await??;
        Ok(handle.wait().await?)
    }

    /// Start a build without waiting; the handle resolves later.
    pub async fn start_build(&self) -> Result<PathBuildHandle, HandleError> {
        Ok(self
            .request(|response_tx| RouterCommand::BuildPath {
                hops: None,
                response_tx,
            })
            .await??)
    }

    pub async fn send_on_path(&self, path_id: PathId, msg: RoutingMessage) -> Result<bool, HandleError> {
        self.request(|response_tx| RouterCommand::SendOnPath {
            path_id,
            msg,
            response_tx,
        })
        .await
    }

    pub async fn reply_on_transit(&self, rx_id: PathId, msg: RoutingMessage) -> Result<bool, HandleError> {
        self.request(|response_tx| RouterCommand::ReplyOnTransit {
            rx_id,
            msg,
            response_tx,
        })
        .await
    }

    pub async fn cancel_build(&self, path_id: PathId) -> Result<bool, HandleError> {
        self.request(|response_tx| RouterCommand::CancelBuild {
            path_id,
            response_tx,
        })
        .await
    }

    pub async fn teardown_path(&self, path_id: PathId) -> Result<bool, HandleError> {
        self.request(|response_tx| RouterCommand::TeardownPath {
            path_id,
            response_tx,
        })
        .await
    }

    pub async fn register_handler(
        &self,
        kind: RoutingMessageType,
        handler: Box<dyn RoutingHandler + Send + Sync>,
    ) -> Result<(), HandleError> {
        Ok(self
            .request(|response_tx| RouterCommand::RegisterHandler {
                kind,
                handler,
                response_tx,
            })
            .await??)
    }

    pub async fn status(&self) -> Result<RouterStatus, HandleError> {
        self.request(RouterCommand::Status).await
    }

    /// Stop the router task. Contacts are persisted one last time first.
    pub async fn shutdown(&self) -> Result<(), HandleError> {
        self.send(RouterCommand::Shutdown).await
    }
}

struct RouterTask {
    router: Router,
    command_rx: mpsc::Receiver<RouterCommand>,
    action_tx: mpsc::UnboundedSender<TransportAction>,
}

impl RouterTask {
    fn contacts_dir(&self) -> Option<PathBuf> {
        self.router.config().discovery.contacts_dir.clone()
    }

    async fn run(mut self) {
        let router_id = self.router.router_id();
        info!(router = %router_id, "router task started");
        self.load_contacts().await;

        let mut tick = interval(self.router.config().router.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut persist = interval(self.router.config().discovery.persist_interval);
        persist.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // both intervals fire immediately once
        persist.tick().await;

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(RouterCommand::Shutdown) | None => break,
                        Some(cmd) => self.handle_command(cmd),
                    }
                }
                _ = tick.tick() => {
                    self.router.tick();
                }
                _ = persist.tick() => {
                    self.persist_contacts();
                }
            }
            self.flush_actions();
        }

        if let Some(dir) = self.contacts_dir() {
            let contacts = self.router.contacts_snapshot();
            match tokio::task::spawn_blocking(move || persist_contacts(&dir, &contacts)).await {
                Ok(Ok(count)) => debug!(count, "contacts persisted on shutdown"),
                Ok(Err(e)) => warn!(error = %e, "could not persist contacts"),
                Err(e) => warn!(error = %e, "contact persistence task failed"),
            }
        }
        info!(router = %router_id, "router task stopped");
    }

    fn handle_command(&mut self, cmd: RouterCommand) {
        match cmd {
            RouterCommand::SessionEstablished(rc) => {
                self.router.on_session_established(rc);
            }
            RouterCommand::LinkData { from, frame } => {
                self.router.handle_recv_link_message_buffer(&from, &frame);
            }
            RouterCommand::SessionClosed(router) => {
                self.router.session_closed(&router);
            }
            RouterCommand::ConnectTimeout(router) => {
                self.router.on_connect_timeout(&router);
            }
            RouterCommand::AddContact(rc) => {
                let peer = rc.router_id;
                if let Err(e) = self.router.add_contact(rc) {
                    debug!(peer = %peer, error = %e, "contact not added");
                }
            }
            RouterCommand::BuildPath { hops, response_tx } => {
                let result = match hops {
                    Some(hops) => self.router.build_path_through(hops),
                    None => self.router.build_path(),
                };
                let _ = response_tx.send(result);
            }
            RouterCommand::SendOnPath {
                path_id,
                msg,
                response_tx,
            } => {
                let _ = response_tx.send(self.router.send_on_path(&path_id, &msg));
            }
            RouterCommand::ReplyOnTransit {
                rx_id,
                msg,
                response_tx,
            } => {
                let _ = response_tx.send(self.router.reply_on_transit(&rx_id, &msg));
            }
            RouterCommand::CancelBuild {
                path_id,
                response_tx,
            } => {
                let _ = response_tx.send(self.router.cancel_path_build(&path_id));
            }
            RouterCommand::TeardownPath {
                path_id,
                response_tx,
            } => {
                let _ = response_tx.send(self.router.teardown_path(&path_id));
            }
            RouterCommand::RegisterHandler {
                kind,
                handler,
                response_tx,
            } => {
                let _ = response_tx.send(self.router.register_handler(kind, handler));
            }
            RouterCommand::Status(response_tx) => {
                let paths = self.router.path_context();
                let status = RouterStatus {
                    router_id: self.router.router_id(),
                    connected: self.router.number_of_connected(),
                    own_paths: paths.number_of_own_paths(),
                    transit_hops: paths.number_of_transit_hops(),
                    known_contacts: self.router.discovery().node_db().len(),
                };
                let _ = response_tx.send(status);
            }
            RouterCommand::Shutdown => {}
        }
    }

    fn flush_actions(&mut self) {
        for action in self.router.drain_transport_actions() {
            if self.action_tx.send(action).is_err() {
                warn!("transport action receiver dropped");
                return;
            }
        }
    }

    async fn load_contacts(&mut self) {
        let Some(dir) = self.contacts_dir() else {
            return;
        };
        let loaded = match tokio::task::spawn_blocking(move || load_contacts(&dir)).await {
            Ok(Ok(contacts)) => contacts,
            Ok(Err(e)) => {
                warn!(error = %e, "stored contacts unreadable");
                return;
            }
            Err(e) => {
                warn!(error = %e, "contact loading task failed");
                return;
            }
        };
        let total = loaded.len();
        let accepted = loaded
            .into_iter()
            .filter(|rc| self.router.add_contact(rc.clone()).is_ok())
            .count();
        info!(accepted, total, "stored contacts loaded");
    }

    /// Write a snapshot on the blocking pool; the loop does not wait for it.
    fn persist_contacts(&self) {
        let Some(dir) = self.contacts_dir() else {
            return;
        };
        let contacts = self.router.contacts_snapshot();
        tokio::task::spawn_blocking(move || match persist_contacts(&dir, &contacts) {
            Ok(count) => debug!(count, "contacts persisted"),
            Err(e) => warn!(error = %e, "could not persist contacts"),
        });
    }
}
