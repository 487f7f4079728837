//! Exercises `MediaSessionCoordinator::allocate` and the session's public
//! lifecycle surface the way a caller driving offer/answer would.

use std::sync::Arc;

use media_session::api::setting_engine::CryptoMask;
use media_session::dtls_transport::DtlsIdentity;
use media_session::error::Error;
use media_session::ice_transport::NatMode;
use media_session::sdp::CodecEntry;
use media_session::testutil::FakeAudioDevicePlatform;
use media_session::{dtls_transport::dtls_transport_state::DtlsTransportState, MediaSessionCoordinator};

async fn allocate() -> Arc<media_session::MediaSession> {
    let identity = Arc::new(DtlsIdentity::generate().expect("identity"));
    MediaSessionCoordinator::allocate(
        identity,
        vec![CodecEntry::opus(96)],
        "127.0.0.1:0".parse().unwrap(),
        NatMode::None,
        CryptoMask::default(),
        false,
        FakeAudioDevicePlatform::new(),
        Box::new(|_candidate: String| Box::pin(async {})),
        Box::new(|| Box::pin(async {})),
        Box::new(|_result: media_session::Result<()>| Box::pin(async {})),
    )
    .await
    .expect("allocate")
}

#[tokio::test]
async fn allocate_brings_up_ice_gathering_and_resets_dtls() {
    let session = allocate().await;

    assert_eq!(session.dtls_state(), DtlsTransportState::New);
    assert!(!session.is_established());
    assert!(!session.is_started());

    session.close().await.expect("close");
}

#[tokio::test]
async fn generate_offer_embeds_actpass_setup_and_ice_credentials() {
    let session = allocate().await;

    let offer = session.generate_offer().await.expect("generate_offer");
    assert!(offer.contains("a=setup:actpass"));
    assert!(offer.contains("a=ice-ufrag:"));
    assert!(offer.contains("a=fingerprint:sha-256"));

    session.close().await.expect("close");
}

#[tokio::test]
async fn start_media_before_negotiation_fails_not_ready() {
    let session = allocate().await;
    let err = session.start_media().await.unwrap_err();
    assert!(matches!(err, Error::NotReady(_)));
    session.close().await.expect("close");
}

#[tokio::test]
async fn stop_media_is_idempotent_when_already_stopped() {
    let session = allocate().await;
    session.stop_media().await.expect("stop_media first call");
    session.stop_media().await.expect("stop_media second call");
    assert!(!session.is_started());
    session.close().await.expect("close");
}

#[tokio::test]
async fn remote_candidate_after_end_of_candidates_is_ignored() {
    let session = allocate().await;
    session.set_end_of_candidates().await;

    let result = session
        .add_remote_candidate("candidate:1 1 udp 2130706431 127.0.0.1 12345 typ host")
        .await;
    assert!(result.is_ok());

    session.close().await.expect("close");
}

#[tokio::test]
async fn close_is_safe_to_call_once_session_never_reached_media() {
    let session = allocate().await;
    session.close().await.expect("close");
    assert!(!session.is_started());
}
