mod common;

use bytes::Bytes;
use common::{create_root_logger_for_stdout, RecordingStateMachine, WAIT};
use raft_consensus::{
    DiskStorage, GrpcTransport, Member, MemberId, RaftConfig, RaftOptions, RaftServer, Role, Serializer,
    StateMachineOutput, Storage,
};
use std::error::Error;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::time::{Duration, Instant};

fn member(port_base: u16, i: usize) -> Member {
    Member::voting(
        MemberId::new(format!("replica-{}", i + 1)),
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port_base + i as u16)),
    )
}

/// The directory is removed once the returned `TempDir` drops, so keep it alive for the test.
fn disk_storage(member: &Member) -> (Arc<dyn Storage>, TempDir) {
    let dir = tempfile::Builder::new()
        .prefix(&format!("raft-grpc-{}-", member.id))
        .tempdir()
        .expect("temp dir");
    (Arc::new(DiskStorage::new(dir.path())), dir)
}

#[tokio::test]
async fn grpc_cluster_elects_and_replicates() -> Result<(), Box<dyn Error>> {
    // -- setup --
    let num_members = 3;
    let members: Vec<Member> = (0..num_members).map(|i| member(47310, i)).collect();
    let mut servers = Vec::with_capacity(num_members);
    let mut applied = Vec::with_capacity(num_members);
    let mut dirs = Vec::with_capacity(num_members);
    for me in &members {
        let logger = create_root_logger_for_stdout(me.id.as_str());
        let (state_machine, applied_entries) = RecordingStateMachine::new();
        let (storage, dir) = disk_storage(me);
        dirs.push(dir);
        let server = RaftServer::new(RaftConfig {
            member_id: me.id.clone(),
            members: members.clone(),
            transport: Arc::new(GrpcTransport::new(logger.clone())),
            storage,
            state_machine,
            serializer: Serializer::default(),
            logger,
            options: RaftOptions {
                election_timeout: Some(Duration::from_millis(300)),
                heartbeat_interval: Some(Duration::from_millis(50)),
                ..RaftOptions::default()
            },
        })?;
        servers.push(server);
        applied.push(applied_entries);
    }

    // -- execute --
    for server in &servers {
        server.open().await?;
    }
    let leader = wait_for_leader(&servers).await;
    let output = leader.submit(Bytes::from_static(b"Hello world")).await?;
    let output2 = leader.submit(Bytes::from_static(b"it's me")).await?;

    // -- verify --
    assert_eq!(output.index, 1);
    assert_eq!(output2.index, 2);
    assert_eq!(output2.output, StateMachineOutput::Data(Bytes::from_static(b"it's me")));

    let deadline = Instant::now() + WAIT;
    while applied.iter().any(|a| a.len() < 2) {
        assert!(Instant::now() < deadline, "Timeout waiting for entries to apply everywhere");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    for entries in &applied {
        entries.assert_dense_and_ordered();
        assert_eq!(entries.data(), vec![b"Hello world".to_vec(), b"it's me".to_vec()]);
    }

    for server in &servers {
        server.delete().await?;
    }
    Ok(())
}

async fn wait_for_leader(servers: &[RaftServer]) -> &RaftServer {
    let deadline = Instant::now() + WAIT;
    loop {
        let leaders: Vec<&RaftServer> = servers.iter().filter(|s| s.state() == Role::Leader).collect();
        if leaders.len() == 1 {
            let leader = leaders[0];
            let term = leader.term();
            let all_follow = servers
                .iter()
                .all(|s| s.term() == term && s.leader().map(|m| m.id) == Some(leader.member_id().clone()));
            if all_follow {
                return leader;
            }
        }
        assert!(Instant::now() < deadline, "Timeout waiting for leader election");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
