//! Failure scenarios: disconnects, fail-fast startup, bad key files.

use crate::*;

use std::path::PathBuf;

use parley_channel::{ChannelError, ChannelState, KeySource, SessionController, StartError};
use parley_core::config::ParleyConfig;

fn controller_with_keys_at(path: PathBuf) -> SessionController {
    let mut config = ParleyConfig::default();
    config.keys.path = path;
    SessionController::new(config)
}

#[tokio::test]
async fn peer_disconnect_closes_session_and_send_fails() {
    let dir = scratch_dir("disconnect");
    let key_path = dir.join("shared_keys.txt");

    let ctl = controller_with_keys_at(key_path.clone());
    let mut listener = ctl
        .act_as_listener("127.0.0.1", 0, KeySource::Generate)
        .await
        .unwrap();
    let mut listener_events = listener.take_events().unwrap();
    let port = listener.local_addr().unwrap().port();

    let dialer = ctl
        .act_as_dialer("127.0.0.1", port, KeySource::LoadFrom(key_path))
        .await
        .unwrap();
    await_status(&mut listener_events, "peer connected").await;

    // Dialer hangs up
    dialer.close().await;

    await_status(&mut listener_events, "peer disconnected").await;
    await_state(&listener, ChannelState::Closed).await;

    let err = listener.send("still there?").await.unwrap_err();
    assert!(
        matches!(err, ChannelError::NotConnected),
        "send after disconnect must be NotConnected, got {err:?}"
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn dialer_sees_listener_hang_up() {
    let dir = scratch_dir("hangup");
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
    let mut dialer_events = dialer.take_events().unwrap();
    await_status(&mut listener_events, "peer connected").await;

    listener.close().await;

    await_status(&mut dialer_events, "peer disconnected").await;
    await_state(&dialer, ChannelState::Closed).await;

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn connect_refused_aborts_startup() {
    let dir = scratch_dir("refused");
    let ctl = controller_with_keys_at(dir.join("shared_keys.txt"));

    // A port with nothing behind it
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let err = ctl
        .act_as_dialer("127.0.0.1", port, KeySource::Generate)
        .await
        .unwrap_err();
    assert!(matches!(err, StartError::Net(_)));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn missing_key_file_aborts_startup() {
    let dir = scratch_dir("nokeys");
    let ctl = controller_with_keys_at(dir.join("shared_keys.txt"));

    let err = ctl
        .act_as_listener(
            "127.0.0.1",
            0,
            KeySource::LoadFrom(dir.join("never_written.txt")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StartError::Key(_)));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn truncated_key_file_aborts_startup_with_section_name() {
    let dir = scratch_dir("badkeys");
    let key_path = dir.join("shared_keys.txt");

    // Generate a valid file, then chop off the HMAC section
    let keys = parley_core::keys::KeyMaterial::generate();
    keys.save_to_path(&key_path).unwrap();
    let text = std::fs::read_to_string(&key_path).unwrap();
    let truncated = text.split("[HMAC Key]").next().unwrap().to_string();
    std::fs::write(&key_path, truncated).unwrap();

    let ctl = controller_with_keys_at(key_path.clone());
    let err = ctl
        .act_as_listener("127.0.0.1", 0, KeySource::LoadFrom(key_path))
        .await
        .unwrap_err();
    match err {
        StartError::Key(key_err) => {
            assert!(
                key_err.to_string().contains("HMAC Key"),
                "error should name the missing section: {key_err}"
            );
        }
        other => panic!("expected StartError::Key, got {other:?}"),
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn closing_a_waiting_listener_unblocks_cleanly() {
    let dir = scratch_dir("waitclose");
    let ctl = controller_with_keys_at(dir.join("shared_keys.txt"));

    let session = ctl
        .act_as_listener("127.0.0.1", 0, KeySource::Generate)
        .await
        .unwrap();
    assert_eq!(session.state().await, ChannelState::Idle);

    // No peer ever arrives; close must not hang
    tokio::time::timeout(std::time::Duration::from_secs(5), session.close())
        .await
        .expect("close should not block on the pending accept");
    assert_eq!(session.state().await, ChannelState::Closed);

    let _ = std::fs::remove_dir_all(&dir);
}
