//! Two real clients against a real relay over loopback sockets.

use std::sync::Arc;
use std::time::Duration;

use steproom_client::{BpmSync, GridSync, Provider, ProviderConfig};
use steproom_core::InstrumentId;
use steproom_relay::{build, RelayConfig, RoomManager};

async fn spawn_relay(data_dir: &std::path::Path) -> (String, Arc<RoomManager>) {
    let config = RelayConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        data_dir: data_dir.to_path_buf(),
        cors_origin: None,
        snapshot_interval: Duration::from_millis(50),
    };
    let (router, manager) = build(&config).await.unwrap();
    let listener = tokio::net::TcpListener::bind(config.bind).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("127.0.0.1:{}", addr.port()), manager)
}

async fn synced_provider(host: &str, room: &str) -> Provider {
    let provider = Provider::connect(ProviderConfig::new(host, room));
    tokio::time::timeout(Duration::from_secs(5), provider.wait_synced())
        .await
        .expect("sync timed out")
        .expect("provider closed before syncing");
    provider
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), deadline)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn two_peers_converge_in_both_directions() {
    let dir = tempfile::tempdir().unwrap();
    let (host, _manager) = spawn_relay(dir.path()).await;

    let a = synced_provider(&host, "echo-park").await;
    let b = synced_provider(&host, "echo-park").await;

    // A's toggle shows up on B.
    let a_grid = GridSync::new(a.handle());
    let b_grid = GridSync::new(b.handle());
    a_grid.toggle_cell(InstrumentId::Drums, 0, 3);
    wait_until("cell to replicate", || {
        b_grid.is_active(InstrumentId::Drums, 0, 3)
    })
    .await;

    // B's tempo change shows up on A.
    let a_bpm = BpmSync::new(a.handle());
    let b_bpm = BpmSync::new(b.handle());
    b_bpm.set(90);
    wait_until("bpm to replicate", || a_bpm.get() == 90).await;

    // Presence counted both peers.
    wait_until("presence to settle", || a.peers() == 2 && b.peers() == 2).await;

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn late_joiner_receives_existing_state_via_the_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let (host, _manager) = spawn_relay(dir.path()).await;

    let a = synced_provider(&host, "echo-park").await;
    let a_grid = GridSync::new(a.handle());
    a_grid.toggle_cell(InstrumentId::Lead1, 4, 7);

    // Give the relay a beat to merge before the second peer's snapshot
    // is cut.
    let status = loop {
        let status = reqwest::get(format!("http://{host}/echo-park"))
            .await
            .unwrap()
            .json::<steproom_relay::RoomStatusResponse>()
            .await
            .unwrap();
        if status.has_data {
            break status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(status.connection_count, 1);

    let b = synced_provider(&host, "echo-park").await;
    let b_grid = GridSync::new(b.handle());
    assert!(b_grid.is_active(InstrumentId::Lead1, 4, 7));

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn room_state_survives_a_relay_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (host, manager) = spawn_relay(dir.path()).await;
        let a = synced_provider(&host, "echo-park").await;
        GridSync::new(a.handle()).toggle_cell(InstrumentId::Bass, 2, 9);
        BpmSync::new(a.handle()).set(133);

        // Let the ops reach the room actor before draining it.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let seen = manager
                    .status("echo-park")
                    .await
                    .map(|status| status.has_data)
                    .unwrap_or(false);
                if seen {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("relay never saw the data");
        a.close().await;
        manager.shutdown_all().await;
    }

    let (host, _manager) = spawn_relay(dir.path()).await;
    let b = synced_provider(&host, "echo-park").await;
    assert!(GridSync::new(b.handle()).is_active(InstrumentId::Bass, 2, 9));
    assert_eq!(BpmSync::new(b.handle()).get(), 133);
    b.close().await;
}
