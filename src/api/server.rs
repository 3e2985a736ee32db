use crate::actor::ActorClient;
use crate::api::configuration::{ConfigError, RaftConfig, ValidatedConfig};
use crate::api::wiring::{ReplicaWiring, RunningReplica};
use crate::api::{LifecycleError, RaftEventListener, Role, ServerStatus, SubmitError, SubmitOutput};
use crate::replica::{ClusterTracker, DormantState, Member, MemberId, SubmitInput};
use crate::serializer::{Command, Serializer};
use bytes::Bytes;
use std::convert::TryFrom;
use std::mem;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

type Outcome = Option<Result<(), LifecycleError>>;

/// RaftServer is one member of a raft cluster.
///
/// `open()`, `close()` and `delete()` are idempotent, and safe to call concurrently from any
/// number of tasks. Concurrent calls of the same operation share a single run of it, and an
/// `open()` issued while a `close()` is running starts once the close has finished (and vice
/// versa).
///
/// ```no_run
/// # use raft_consensus::*;
/// # use std::sync::Arc;
/// # async fn example(transport: Arc<dyn Transport>, storage: Arc<dyn Storage>) -> Result<(), Box<dyn std::error::Error>> {
/// let logger = slog::Logger::root(slog::Discard, slog::o!());
/// let server = RaftServer::new(RaftConfig {
///     member_id: MemberId::new("a"),
///     members: vec![Member::voting(MemberId::new("a"), "127.0.0.1:7001".parse()?)],
///     transport,
///     storage,
///     state_machine: Box::new(NoOpStateMachine::new()),
///     serializer: Serializer::default(),
///     logger,
///     options: RaftOptions::default(),
/// })?;
///
/// server.open().await?;
/// server.subscribe().wait_for(|status| status.role == Role::Leader).await;
/// let _output = server.submit(bytes::Bytes::from_static(b"x=1")).await?;
/// server.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct RaftServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    logger: slog::Logger,
    cluster_tracker: ClusterTracker,
    serializer: Serializer,
    status: Arc<watch::Sender<ServerStatus>>,
    wiring: ReplicaWiring,
    // Guards the open/closed flag and the pending operation slots. Never held across an await.
    lifecycle: Mutex<Lifecycle>,
    // The replica itself. Held for the whole of an open, close or delete, which is what orders
    // them after each other.
    instance: tokio::sync::Mutex<Instance>,
}

#[derive(Default)]
struct Lifecycle {
    open: bool,
    // Set while open, for submissions.
    actor_client: Option<ActorClient>,
    pending_open: Option<watch::Receiver<Outcome>>,
    pending_close: Option<watch::Receiver<Outcome>>,
}

enum Instance {
    Closed(DormantState),
    Running(RunningReplica),
    Deleted,
    // A previous start or stop was torn down half way, and took the state machine with it.
    Lost,
}

#[derive(Copy, Clone)]
enum Operation {
    Open,
    Close,
}

impl RaftServer {
    /// Validate `config` and create a closed server. Does no I/O.
    pub fn new(config: RaftConfig) -> Result<Self, ConfigError> {
        let config = ValidatedConfig::try_from(config)?;

        let me = config
            .members
            .iter()
            .find(|member| member.id == config.member_id)
            .cloned()
            .ok_or_else(|| ConfigError::LocalMemberNotInCluster(config.member_id.clone()))?;
        let logger = config.logger.new(slog::o!("MemberId" => config.member_id.to_string()));
        let cluster_tracker = ClusterTracker::new(config.member_id, config.members);
        let (status, _) = watch::channel(ServerStatus::default());
        let status = Arc::new(status);

        let wiring = ReplicaWiring {
            logger: logger.clone(),
            me,
            cluster_tracker: cluster_tracker.clone(),
            transport: config.transport,
            storage: config.storage,
            status: status.clone(),
            options: config.options,
        };

        let inner = ServerInner {
            logger,
            cluster_tracker,
            serializer: config.serializer,
            status,
            wiring,
            lifecycle: Mutex::new(Lifecycle::default()),
            instance: tokio::sync::Mutex::new(Instance::Closed(DormantState::new(config.state_machine))),
        };

        Ok(RaftServer { inner: Arc::new(inner) })
    }

    /// Start the replica: open storage, recover, and join the cluster. Returns immediately if
    /// already open.
    pub async fn open(&self) -> Result<(), LifecycleError> {
        self.run_coalesced(Operation::Open).await
    }

    /// Leave the cluster and stop the replica. Storage is kept, and so is the state machine, so
    /// a later `open()` carries on where this one left off.
    pub async fn close(&self) -> Result<(), LifecycleError> {
        self.run_coalesced(Operation::Close).await
    }

    /// Close, then purge everything persisted. The server can't be opened again.
    pub async fn delete(&self) -> Result<(), LifecycleError> {
        self.close().await?;

        let inner = &self.inner;
        let mut instance = inner.instance.lock().await;
        if let Instance::Deleted = *instance {
            return Ok(());
        }
        // An open may have slipped in between.
        if let Instance::Running(_) = *instance {
            inner.stop_locked(&mut instance).await?;
        }

        inner.wiring.storage.purge().map_err(|e| {
            slog::error!(inner.logger, "Failed to purge storage: {}", e);
            LifecycleError::StoragePurge(e.into())
        })?;
        *instance = Instance::Deleted;
        slog::info!(inner.logger, "Deleted");

        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock_lifecycle().open && self.inner.status.borrow().role != Role::Inactive
    }

    pub fn state(&self) -> Role {
        self.inner.status.borrow().role
    }

    pub fn term(&self) -> u64 {
        self.inner.status.borrow().term
    }

    /// The leader this member currently follows, or itself if it's the leader.
    pub fn leader(&self) -> Option<Member> {
        let leader_id = self.inner.status.borrow().leader.clone()?;
        self.inner.cluster_tracker.member(&leader_id).cloned()
    }

    pub fn status(&self) -> ServerStatus {
        self.inner.status.borrow().clone()
    }

    pub fn member_id(&self) -> &MemberId {
        self.inner.cluster_tracker.my_member_id()
    }

    pub fn subscribe(&self) -> RaftEventListener {
        RaftEventListener::new(self.inner.status.subscribe())
    }

    pub fn serializer(&self) -> &Serializer {
        &self.inner.serializer
    }

    /// Replicate `data` and apply it to the state machine. Resolves once it's applied on this
    /// member, which must be the leader.
    pub async fn submit(&self, data: Bytes) -> Result<SubmitOutput, SubmitError> {
        let actor_client = self
            .inner
            .lock_lifecycle()
            .actor_client
            .clone()
            .ok_or(SubmitError::NotOpen)?;

        actor_client.submit(SubmitInput { data }).await
    }

    /// Encode `command` with the registered command types, then `submit()` it.
    pub async fn submit_command<C: Command>(&self, command: &C) -> Result<SubmitOutput, SubmitError> {
        let data = self.inner.serializer.encode_command(command)?;
        self.submit(data).await
    }

    async fn run_coalesced(&self, operation: Operation) -> Result<(), LifecycleError> {
        let receiver = {
            let mut lifecycle = self.inner.lock_lifecycle();
            let already_done = match operation {
                Operation::Open => {
                    lifecycle.open
                        && lifecycle.pending_close.is_none()
                        && self.inner.status.borrow().role != Role::Inactive
                }
                Operation::Close => !lifecycle.open && lifecycle.pending_open.is_none(),
            };
            if already_done {
                return Ok(());
            }

            let slot = match operation {
                Operation::Open => &mut lifecycle.pending_open,
                Operation::Close => &mut lifecycle.pending_close,
            };
            match slot {
                Some(pending) => pending.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    slot.replace(rx.clone());

                    let inner = self.inner.clone();
                    tokio::spawn(async move {
                        let result = match operation {
                            Operation::Open => inner.do_open().await,
                            Operation::Close => inner.do_close().await,
                        };

                        {
                            let mut lifecycle = inner.lock_lifecycle();
                            match operation {
                                Operation::Open => lifecycle.pending_open.take(),
                                Operation::Close => lifecycle.pending_close.take(),
                            };
                        }
                        let _ = tx.send(Some(result));
                    });

                    rx
                }
            }
        };

        await_outcome(receiver).await
    }
}

impl ServerInner {
    fn lock_lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().expect("RaftServer lifecycle mutex guard poison")
    }

    async fn do_open(&self) -> Result<(), LifecycleError> {
        let mut instance = self.instance.lock().await;

        // Reap a replica that stopped on its own, so it can be started again.
        if let Instance::Running(_) = *instance {
            if self.status.borrow().role != Role::Inactive {
                return Ok(());
            }
            slog::warn!(self.logger, "Replica had stopped on its own, restarting it");
            self.stop_locked(&mut instance).await?;
        }

        let dormant = match mem::replace(&mut *instance, Instance::Lost) {
            Instance::Closed(dormant) => dormant,
            Instance::Deleted => {
                *instance = Instance::Deleted;
                return Err(LifecycleError::Deleted);
            }
            Instance::Running(_) | Instance::Lost => return Err(LifecycleError::Interrupted),
        };

        slog::info!(self.logger, "Opening");
        match self.wiring.start(dormant).await {
            Ok(running) => {
                {
                    let mut lifecycle = self.lock_lifecycle();
                    lifecycle.open = true;
                    lifecycle.actor_client.replace(running.actor_client.clone());
                }
                *instance = Instance::Running(running);
                slog::info!(self.logger, "Opened");
                Ok(())
            }
            Err((e, dormant)) => {
                *instance = Instance::Closed(dormant);
                Err(e)
            }
        }
    }

    async fn do_close(&self) -> Result<(), LifecycleError> {
        let mut instance = self.instance.lock().await;
        if let Instance::Running(_) = *instance {
            slog::info!(self.logger, "Closing");
            self.stop_locked(&mut instance).await?;
            slog::info!(self.logger, "Closed");
        }

        Ok(())
    }

    async fn stop_locked(&self, instance: &mut Instance) -> Result<(), LifecycleError> {
        {
            let mut lifecycle = self.lock_lifecycle();
            lifecycle.open = false;
            lifecycle.actor_client.take();
        }

        match mem::replace(instance, Instance::Lost) {
            Instance::Running(running) => {
                let dormant = running.stop(&self.logger).await?;
                *instance = Instance::Closed(dormant);
                Ok(())
            }
            other => {
                *instance = other;
                Ok(())
            }
        }
    }
}

async fn await_outcome(mut receiver: watch::Receiver<Outcome>) -> Result<(), LifecycleError> {
    loop {
        let outcome = (*receiver.borrow()).clone();
        if let Some(result) = outcome {
            return result;
        }
        if receiver.changed().await.is_err() {
            // Sender is gone. It may still have sent right before.
            let outcome = (*receiver.borrow()).clone();
            return outcome.unwrap_or(Err(LifecycleError::Interrupted));
        }
    }
}
