//! Test-only collaborators: a fake audio device platform and a pair of
//! periodic record/playout tasks standing in for real hardware so the
//! coordinator's integration tests don't need one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::audio_routing::{AudioDevicePlatform, AudioRoute};
use crate::error::Result;

pub const FRAME_LEN_MS: u64 = 20;
const SAMPLE_RATE_HZ: usize = 48_000;

/// Accepts whatever route it is asked to enable and records the sequence,
/// so tests can assert on the order route changes were requested in.
#[derive(Default, Clone)]
pub struct FakeAudioDevicePlatform {
    observed: Arc<Mutex<Vec<AudioRoute>>>,
}

impl FakeAudioDevicePlatform {
    pub fn new() -> Self {
        FakeAudioDevicePlatform::default()
    }

    pub async fn observed_routes(&self) -> Vec<AudioRoute> {
        self.observed.lock().await.clone()
    }
}

#[async_trait]
impl AudioDevicePlatform for FakeAudioDevicePlatform {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        Ok(())
    }

    async fn enable(&self, wanted: AudioRoute) -> Result<AudioRoute> {
        self.observed.lock().await.push(wanted);
        Ok(wanted)
    }
}

/// Two periodic `tokio::time::interval` tasks standing in for a real
/// record/playout device. Each wakes every [`FRAME_LEN_MS`], hands a
/// frame to the caller's callback, and sleeps to the next deadline.
/// `realtime=false` is intended for tests driving the clock with
/// `tokio::time::pause()`/`advance()` rather than waiting on the wall clock.
pub struct FakeAudioFrameSource {
    samples_per_frame: usize,
}

impl FakeAudioFrameSource {
    pub fn new() -> Self {
        FakeAudioFrameSource {
            samples_per_frame: SAMPLE_RATE_HZ * FRAME_LEN_MS as usize / 1000,
        }
    }

    /// Spawns a task invoking `on_frame` with a silent frame every
    /// `FRAME_LEN_MS`, standing in for a microphone.
    pub fn spawn_record<F>(&self, mut on_frame: F) -> JoinHandle<()>
    where
        F: FnMut(&[i16]) + Send + 'static,
    {
        let frame = vec![0i16; self.samples_per_frame];
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(FRAME_LEN_MS));
            loop {
                ticker.tick().await;
                on_frame(&frame);
            }
        })
    }

    /// Spawns a task pulling a frame from `pull_frame` every `FRAME_LEN_MS`,
    /// standing in for a speaker.
    pub fn spawn_playout<F>(&self, mut pull_frame: F) -> JoinHandle<()>
    where
        F: FnMut() -> Vec<i16> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(FRAME_LEN_MS));
            loop {
                ticker.tick().await;
                let _frame = pull_frame();
            }
        })
    }
}

impl Default for FakeAudioFrameSource {
    fn default() -> Self {
        FakeAudioFrameSource::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn record_task_invokes_callback_each_frame() {
        let source = FakeAudioFrameSource::new();
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count_clone = count.clone();
        let handle = source.spawn_record(move |_frame| {
            count_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_millis(FRAME_LEN_MS * 3)).await;
        tokio::task::yield_now().await;
        assert!(count.load(std::sync::atomic::Ordering::SeqCst) >= 2);
        handle.abort();
    }

    #[tokio::test]
    async fn fake_platform_echoes_and_records_requested_route() {
        let platform = FakeAudioDevicePlatform::new();
        let observed = platform.enable(AudioRoute::Speaker).await.unwrap();
        assert_eq!(observed, AudioRoute::Speaker);
        assert_eq!(platform.observed_routes().await, vec![AudioRoute::Speaker]);
    }
}
