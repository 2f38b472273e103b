//! End-to-end flows: directory rendezvous handing clients into live
//! overlays, and the directory forgetting rooms whose host disappeared.

use huddle_directory::{Directory, DirectoryClient, DirectoryServer};
use huddle_overlay::{mesh, star, Moderation};
use huddle_wire::Topology;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

async fn start_directory(base_port: u16) -> DirectoryServer {
    let directory = Arc::new(Directory::new(base_port));
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
    DirectoryServer::bind(addr, directory).await.unwrap()
}

async fn wait_until<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition never became true");
}

#[tokio::test]
async fn mesh_meeting_full_flow() {
    let server = start_directory(45300).await;
    let directory_addr = server.local_addr();

    // creator registers the room and starts its overlay on the granted port
    let mut creator_client = DirectoryClient::connect(directory_addr).await.unwrap();
    let grant = creator_client.create(Topology::Mesh).await.unwrap();
    let creator = mesh::create(grant.meeting_id, grant.listen_port).await.unwrap();

    // the room is listed while the creator's control connection lives
    let mut observer = DirectoryClient::connect(directory_addr).await.unwrap();
    assert_eq!(
        observer.list().await.unwrap(),
        vec![(grant.meeting_id, Topology::Mesh)]
    );

    // two sequential joins, each through the directory
    let mut bo_client = DirectoryClient::connect(directory_addr).await.unwrap();
    let bo_grant = bo_client.join(grant.meeting_id, "bo").await.unwrap();
    let bo = mesh::join(
        &bo_grant.username,
        bo_grant.host.clone(),
        bo_grant.listen_port.unwrap(),
    )
    .await
    .unwrap();

    let creator_ref = creator.clone();
    wait_until(|| {
        let creator = creator_ref.clone();
        async move {
            creator
                .roster()
                .await
                .iter()
                .any(|p| p.username == "bo" && p.advertised_port.is_some())
        }
    })
    .await;

    let mut cy_client = DirectoryClient::connect(directory_addr).await.unwrap();
    let cy_grant = cy_client.join(grant.meeting_id, "cy").await.unwrap();
    assert_ne!(cy_grant.listen_port, bo_grant.listen_port);
    let cy = mesh::join(
        &cy_grant.username,
        cy_grant.host.clone(),
        cy_grant.listen_port.unwrap(),
    )
    .await
    .unwrap();

    // full graph for sequential joins
    wait_until(|| async { creator.peer_count().await == 2 }).await;
    wait_until(|| async { bo.peer_count().await == 2 }).await;
    wait_until(|| async { cy.peer_count().await == 2 }).await;

    // the directory was only part of the handshake: tearing it down does
    // not touch the overlay
    server.shutdown().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bo.peer_count().await, 2);
}

#[tokio::test]
async fn star_meeting_full_flow() {
    let server = start_directory(45400).await;
    let directory_addr = server.local_addr();

    let mut creator_client = DirectoryClient::connect(directory_addr).await.unwrap();
    let grant = creator_client.create(Topology::Star).await.unwrap();
    let host = star::spawn_host(grant.meeting_id, grant.listen_port, Moderation::default())
        .await
        .unwrap();

    let mut ada_client = DirectoryClient::connect(directory_addr).await.unwrap();
    let ada_grant = ada_client.join(grant.meeting_id, "ada").await.unwrap();
    assert_eq!(ada_grant.listen_port, None);
    let ada = star::StarAudience::join(&ada_grant.username, ada_grant.host.clone())
        .await
        .unwrap();

    let mut joe_client = DirectoryClient::connect(directory_addr).await.unwrap();
    let joe_grant = joe_client.join(grant.meeting_id, "joe").await.unwrap();
    let joe = star::StarAudience::join(&joe_grant.username, joe_grant.host.clone())
        .await
        .unwrap();

    let host_ref = host.clone();
    wait_until(|| {
        let host = host_ref.clone();
        async move {
            let names: Vec<String> = host.roster().await.into_iter().map(|p| p.username).collect();
            names.contains(&"ada".to_string()) && names.contains(&"joe".to_string())
        }
    })
    .await;

    // a clean question reaches every spoke with the asker's name in front
    ada.ask("can everyone hear me?").await;
    let expected = "Question from ada: 'can everyone hear me?'";
    wait_until(|| async { joe.transcript().await.iter().any(|m| m == expected) }).await;

    host.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn directory_forgets_rooms_with_dead_hosts() {
    let server = start_directory(45500).await;
    let directory_addr = server.local_addr();

    let mut creator_client = DirectoryClient::connect(directory_addr).await.unwrap();
    let star_grant = creator_client.create(Topology::Star).await.unwrap();

    let mut survivor_client = DirectoryClient::connect(directory_addr).await.unwrap();
    let mesh_grant = survivor_client.create(Topology::Mesh).await.unwrap();

    let mut observer = DirectoryClient::connect(directory_addr).await.unwrap();
    assert_eq!(
        observer.list().await.unwrap(),
        vec![
            (star_grant.meeting_id, Topology::Star),
            (mesh_grant.meeting_id, Topology::Mesh),
        ]
    );

    // the star host's control connection dies; only its room is pruned
    drop(creator_client);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        observer.list().await.unwrap(),
        vec![(mesh_grant.meeting_id, Topology::Mesh)]
    );

    // once claimed, the room's usernames stay claimed while it lives
    let mut joiner = DirectoryClient::connect(directory_addr).await.unwrap();
    joiner.join(mesh_grant.meeting_id, "ada").await.unwrap();
    let err = joiner.join(mesh_grant.meeting_id, "ada").await.unwrap_err();
    assert!(err.to_string().contains("already taken"));

    server.shutdown().await;
}
