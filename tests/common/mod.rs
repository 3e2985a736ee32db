#![allow(dead_code)]

use chrono::Utc;
use raft_consensus::{
    CommittedEntry, LocalNetwork, Member, MemberId, MemoryStorage, RaftConfig, RaftOptions, RaftServer, Role,
    Serializer, StateMachine, StateMachineOutput, Storage, Transport,
};
use slog::Drain;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(10);

pub fn create_root_logger_for_stdout(member_id: &str) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog::LevelFilter::new(drain, slog::Level::Info).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    let started = Utc::now().format("%H:%M:%S%.3f").to_string();
    slog::Logger::root(drain, slog::o!("Test" => member_id.to_string(), "Started" => started))
}

/// Fast enough for tests, slow enough to not flap on a busy machine.
pub fn test_options() -> RaftOptions {
    RaftOptions {
        election_timeout: Some(Duration::from_millis(150)),
        heartbeat_interval: Some(Duration::from_millis(30)),
        ..RaftOptions::default()
    }
}

pub fn any_addr() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Records every entry it's asked to apply, and echoes the entry's data back.
pub struct RecordingStateMachine {
    applied: AppliedEntries,
}

#[derive(Clone, Default)]
pub struct AppliedEntries(Arc<Mutex<Vec<CommittedEntry>>>);

impl AppliedEntries {
    pub fn snapshot(&self) -> Vec<CommittedEntry> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn data(&self) -> Vec<Vec<u8>> {
        self.snapshot().into_iter().map(|e| e.data.to_vec()).collect()
    }

    /// Applied in strictly increasing index order, each index exactly once, starting at 1.
    pub fn assert_dense_and_ordered(&self) {
        let indexes: Vec<u64> = self.snapshot().iter().map(|e| e.index).collect();
        let expected: Vec<u64> = (1..=indexes.len() as u64).collect();
        assert_eq!(indexes, expected);
    }
}

impl RecordingStateMachine {
    pub fn new() -> (Box<Self>, AppliedEntries) {
        let applied = AppliedEntries::default();
        (
            Box::new(RecordingStateMachine {
                applied: applied.clone(),
            }),
            applied,
        )
    }
}

impl StateMachine for RecordingStateMachine {
    fn apply_committed_entry(&mut self, entry: CommittedEntry) -> StateMachineOutput {
        let output = StateMachineOutput::Data(entry.data.clone());
        self.applied.0.lock().unwrap().push(entry);
        output
    }
}

pub struct TestMember {
    pub server: Arc<RaftServer>,
    pub applied: AppliedEntries,
    pub storage: MemoryStorage,
}

/// A cluster whose members live in this process and talk over a `LocalNetwork`.
pub struct TestCluster {
    pub network: LocalNetwork,
    members: HashMap<String, TestMember>,
}

impl TestCluster {
    pub fn new(voting: &[&str], passive: &[&str]) -> Self {
        let network = LocalNetwork::new(Serializer::default());
        let member_set: Vec<Member> = voting
            .iter()
            .map(|id| Member::voting(MemberId::new(*id), any_addr()))
            .chain(passive.iter().map(|id| Member::passive(MemberId::new(*id), any_addr())))
            .collect();

        let mut members = HashMap::new();
        for member in &member_set {
            let id = member.id.as_str().to_string();
            let storage = MemoryStorage::new();
            let (state_machine, applied) = RecordingStateMachine::new();
            let transport: Arc<dyn Transport> = network.transport(member.id.clone());
            let storage_collaborator: Arc<dyn Storage> = Arc::new(storage.clone());

            let server = RaftServer::new(RaftConfig {
                member_id: member.id.clone(),
                members: member_set.clone(),
                transport,
                storage: storage_collaborator,
                state_machine,
                serializer: Serializer::default(),
                logger: create_root_logger_for_stdout(&id),
                options: test_options(),
            })
            .expect("valid config");

            members.insert(
                id,
                TestMember {
                    server: Arc::new(server),
                    applied,
                    storage,
                },
            );
        }

        TestCluster { network, members }
    }

    pub fn member(&self, id: &str) -> &TestMember {
        self.members.get(id).expect("unknown member")
    }

    pub fn server(&self, id: &str) -> &RaftServer {
        &self.member(id).server
    }

    pub async fn open_all(&self) {
        for member in self.members.values() {
            member.server.open().await.expect("open");
        }
    }

    pub async fn close_all(&self) {
        for member in self.members.values() {
            member.server.close().await.expect("close");
        }
    }

    /// Wait until exactly one of `among` is leader, and every other member of `among` follows it
    /// in the same term.
    pub async fn wait_for_leader(&self, among: &[&str]) -> String {
        let deadline = Instant::now() + WAIT;
        loop {
            if let Some(leader) = self.agreed_leader(among) {
                return leader;
            }
            assert!(Instant::now() < deadline, "Timeout waiting for leader among {:?}", among);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn agreed_leader(&self, among: &[&str]) -> Option<String> {
        let statuses: Vec<_> = among.iter().map(|id| (*id, self.server(id).status())).collect();
        let leaders: Vec<_> = statuses.iter().filter(|(_, s)| s.role == Role::Leader).collect();
        if leaders.len() != 1 {
            return None;
        }
        let (leader_id, leader_status) = leaders[0];

        let agreed = statuses.iter().all(|(_, s)| {
            s.term == leader_status.term && s.leader.as_ref().map(|l| l.as_str()) == Some(*leader_id)
        });
        if agreed {
            Some(leader_id.to_string())
        } else {
            None
        }
    }

    pub async fn wait_for_applied(&self, id: &str, count: usize) {
        let applied = &self.member(id).applied;
        let deadline = Instant::now() + WAIT;
        while applied.len() < count {
            assert!(
                Instant::now() < deadline,
                "Timeout waiting for {} to apply {} entries, has {}",
                id,
                count,
                applied.len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
