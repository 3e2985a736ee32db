use crate::actor::{ActorClient, ReplicaActor};
use crate::api::options::RaftOptionsValidated;
use crate::api::{LifecycleError, ServerStatus};
use crate::replica::{
    ClusterTracker, DormantState, InboundRpcHandler, Member, Replica, ReplicaConfig, ReplicaExit, WriteAheadLog,
};
use crate::storage::Storage;
use crate::transport::{ListenerHandle, Transport};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const ACTOR_QUEUE_SIZE: usize = 64;

/// Everything needed to start a replica, shared by every run of the same server.
pub(crate) struct ReplicaWiring {
    pub(crate) logger: slog::Logger,
    pub(crate) me: Member,
    pub(crate) cluster_tracker: ClusterTracker,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) status: Arc<watch::Sender<ServerStatus>>,
    pub(crate) options: RaftOptionsValidated,
}

/// One run of a replica: its event loop and its inbound listener.
pub(crate) struct RunningReplica {
    pub(crate) actor_client: ActorClient,
    event_loop: JoinHandle<ReplicaExit>,
    listener: ListenerHandle,
}

impl ReplicaWiring {
    /// Open storage, recover the log, and start the event loop and the inbound listener. On
    /// failure the dormant state is handed back, so a later attempt can use it.
    pub(crate) async fn start(&self, dormant: DormantState) -> Result<RunningReplica, (LifecycleError, DormantState)> {
        let handles = match self.storage.open() {
            Ok(handles) => handles,
            Err(e) => {
                slog::error!(self.logger, "Failed to open storage: {}", e);
                return Err((LifecycleError::StorageOpen(e.into()), dormant));
            }
        };

        let wal = WriteAheadLog::recover(self.logger.clone(), handles.log, dormant).map_err(|(e, dormant)| {
            slog::error!(self.logger, "Failed to recover log: {}", e);
            (LifecycleError::Recovery(e.into()), dormant)
        })?;

        let (actor_client, actor_queue_rx) = ActorClient::new(ACTOR_QUEUE_SIZE);

        let mut replica = Replica::new(ReplicaConfig {
            logger: self.logger.clone(),
            cluster_tracker: self.cluster_tracker.clone(),
            local_state: handles.local_state,
            wal,
            actor_client: actor_client.weak(),
            transport: self.transport.clone(),
            status: self.status.clone(),
            leader_heartbeat_duration: self.options.heartbeat_interval,
            election_min_timeout: self.options.election_min_timeout(),
            election_max_timeout: self.options.election_max_timeout(),
            rpc_timeout: self.options.rpc_timeout,
            max_entries_per_append: self.options.max_entries_per_append,
        });
        replica.start();

        // Inbound RPCs queue up behind the timers until the event loop starts.
        let handler = Arc::new(InboundRpcHandler::new(self.logger.clone(), actor_client.weak()));
        let listener = match self.transport.listen(&self.me, handler).await {
            Ok(listener) => listener,
            Err(e) => {
                slog::error!(self.logger, "Failed to listen: {}", e);
                let exit = replica.shutdown();
                return Err((LifecycleError::Listen(e), exit.dormant));
            }
        };

        let event_loop = tokio::spawn(ReplicaActor::new(actor_queue_rx, replica).run_event_loop());

        Ok(RunningReplica {
            actor_client,
            event_loop,
            listener,
        })
    }
}

impl RunningReplica {
    /// Ask the replica to leave, wait for its event loop to exit, then stop listening.
    pub(crate) async fn stop(self, logger: &slog::Logger) -> Result<DormantState, LifecycleError> {
        let RunningReplica {
            actor_client,
            event_loop,
            listener,
        } = self;

        if actor_client.leave().await.is_err() {
            slog::info!(logger, "Replica event loop had already exited");
        }
        drop(actor_client);

        let exit = event_loop.await;
        listener.shutdown().await;

        match exit {
            Ok(exit) => {
                slog::info!(
                    logger,
                    "Replica stopped at term {:?}. Fault: {:?}. {:?}",
                    exit.term,
                    exit.fault,
                    exit.dormant
                );
                Ok(exit.dormant)
            }
            Err(e) => {
                slog::crit!(logger, "Replica event loop did not exit cleanly, state machine is lost: {}", e);
                Err(LifecycleError::Interrupted)
            }
        }
    }
}
