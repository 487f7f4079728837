//! Drives `AudioRoutingController::run` as a real spawned task end to end,
//! rather than calling `RouterState::apply` directly, to exercise the
//! `AudioCommand` dispatch loop itself.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use media_session::audio_routing::{AudioCommand, AudioRoute, AudioRoutingController};
use media_session::sdp::sdp_type::MediaKind;
use media_session::testutil::FakeAudioDevicePlatform;
use tokio::sync::mpsc;

async fn spawn_controller() -> (mpsc::Sender<AudioCommand>, FakeAudioDevicePlatform, tokio::task::JoinHandle<()>) {
    let platform = FakeAudioDevicePlatform::new();
    let controller = AudioRoutingController::new(platform.clone(), None);
    let (tx, rx) = mpsc::channel(16);
    let started = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn(controller.run(rx, started.clone()));

    for _ in 0..100 {
        if started.load(std::sync::atomic::Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(started.load(std::sync::atomic::Ordering::SeqCst), "controller never started");

    (tx, platform, handle)
}

#[tokio::test]
async fn headset_then_call_then_bluetooth_preempts_even_with_headset() {
    let (tx, platform, handle) = spawn_controller().await;

    tx.send(AudioCommand::HeadsetConnected(true)).await.unwrap();
    tx.send(AudioCommand::CallState { active: true, kind: MediaKind::Audio }).await.unwrap();
    tx.send(AudioCommand::BtConnected(true)).await.unwrap();
    tx.send(AudioCommand::CallState { active: false, kind: MediaKind::Audio }).await.unwrap();
    tx.send(AudioCommand::Exit).await.unwrap();
    handle.await.expect("controller task joins cleanly");

    let routes = platform.observed_routes().await;
    assert_eq!(
        routes,
        vec![
            AudioRoute::Headset,
            AudioRoute::Headset,
            AudioRoute::Bluetooth,
            AudioRoute::Earpiece,
        ]
    );
}

#[tokio::test]
async fn speaker_enable_and_disable_round_trip_to_earpiece() {
    let (tx, platform, handle) = spawn_controller().await;

    tx.send(AudioCommand::EnableSpeaker(true)).await.unwrap();
    tx.send(AudioCommand::EnableSpeaker(false)).await.unwrap();
    tx.send(AudioCommand::Exit).await.unwrap();
    handle.await.expect("controller task joins cleanly");

    let routes = platform.observed_routes().await;
    assert_eq!(routes, vec![AudioRoute::Speaker, AudioRoute::Earpiece]);
}

#[tokio::test]
async fn register_and_deregister_media_does_not_touch_routing() {
    let (tx, platform, handle) = spawn_controller().await;

    tx.send(AudioCommand::RegisterMedia {
        name: "ringtone".to_string(),
        handle: 1,
        mixing_allowed: false,
        playable_in_call: true,
        intensity: 0,
        priority: 5,
        is_call_media: false,
    })
    .await
    .unwrap();
    tx.send(AudioCommand::Play("ringtone".to_string())).await.unwrap();
    tx.send(AudioCommand::Stop("ringtone".to_string())).await.unwrap();
    tx.send(AudioCommand::DeregisterMedia("ringtone".to_string())).await.unwrap();
    tx.send(AudioCommand::Exit).await.unwrap();
    handle.await.expect("controller task joins cleanly");

    assert!(platform.observed_routes().await.is_empty());
}
