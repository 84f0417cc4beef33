//! Happy-path chat scenarios: key handoff via the key file, messages in
//! both directions, survival of forged frames mid-session.

use crate::*;

use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use parley_channel::{ChannelState, KeySource, SessionController};
use parley_core::config::ParleyConfig;
use parley_core::keys::KeyMaterial;

fn controller_with_keys_at(path: PathBuf) -> SessionController {
    let mut config = ParleyConfig::default();
    config.keys.path = path;
    SessionController::new(config)
}

#[tokio::test]
async fn hello_hi_back_round_trip() {
    let dir = scratch_dir("hello");
    let key_path = dir.join("shared_keys.txt");

    // Listener generates and persists the shared secret
    let listener_ctl = controller_with_keys_at(key_path.clone());
    let mut listener = listener_ctl
        .act_as_listener("127.0.0.1", 0, KeySource::Generate)
        .await
        .expect("listener should start");
    let mut listener_events = listener.take_events().unwrap();
    let port = listener.local_addr().unwrap().port();

    // Dialer loads the same file, the out-of-band handoff
    let dialer_ctl = controller_with_keys_at(key_path.clone());
    let mut dialer = dialer_ctl
        .act_as_dialer("127.0.0.1", port, KeySource::LoadFrom(key_path))
        .await
        .expect("dialer should connect");
    let mut dialer_events = dialer.take_events().unwrap();

    // Listener must observe its peer before it can speak
    await_status(&mut listener_events, "peer connected").await;

    dialer.send("hello").await.expect("dialer send");
    assert_eq!(next_message(&mut listener_events).await, "hello");

    listener.send("hi back").await.expect("listener send");
    assert_eq!(next_message(&mut dialer_events).await, "hi back");

    dialer.close().await;
    listener.close().await;
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn many_messages_keep_order_and_content() {
    let dir = scratch_dir("burst");
    let key_path = dir.join("shared_keys.txt");

    let ctl = controller_with_keys_at(key_path.clone());
    let mut listener = ctl
        .act_as_listener("127.0.0.1", 0, KeySource::Generate)
        .await
        .unwrap();
    let mut listener_events = listener.take_events().unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut dialer = ctl
        .act_as_dialer("127.0.0.1", port, KeySource::LoadFrom(key_path))
        .await
        .unwrap();
    let _dialer_events = dialer.take_events().unwrap();

    await_status(&mut listener_events, "peer connected").await;

    for i in 0..50 {
        dialer.send(&format!("message {i}")).await.unwrap();
    }
    for i in 0..50 {
        assert_eq!(next_message(&mut listener_events).await, format!("message {i}"));
    }

    dialer.close().await;
    listener.close().await;
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn forged_frame_does_not_kill_the_session() {
    let dir = scratch_dir("forged");
    let key_path = dir.join("shared_keys.txt");

    let ctl = controller_with_keys_at(key_path.clone());
    let mut listener = ctl
        .act_as_listener("127.0.0.1", 0, KeySource::Generate)
        .await
        .unwrap();
    let mut listener_events = listener.take_events().unwrap();
    let port = listener.local_addr().unwrap().port();

    // An attacker-shaped peer: raw TCP, no valid keys for the first frame
    let mut raw = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    await_status(&mut listener_events, "peer connected").await;

    let forged = [0xABu8; 80];
    raw.write_all(&(forged.len() as u32).to_le_bytes())
        .await
        .unwrap();
    raw.write_all(&forged).await.unwrap();

    // Then a frame sealed under the real shared keys
    let keys = KeyMaterial::load_from_path(&key_path).unwrap();
    let genuine = parley_core::frame::seal(b"real one", &keys).encode();
    raw.write_all(&(genuine.len() as u32).to_le_bytes())
        .await
        .unwrap();
    raw.write_all(&genuine).await.unwrap();
    raw.flush().await.unwrap();

    await_status(&mut listener_events, "rejected incoming frame").await;
    assert_eq!(next_message(&mut listener_events).await, "real one");
    assert_eq!(listener.state().await, ChannelState::Established);

    listener.close().await;
    let _ = std::fs::remove_dir_all(&dir);
}
