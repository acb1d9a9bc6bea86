//! Voice activity detection over the local microphone.
//!
//! The monitor runs as an owned tokio interval task. Each tick it takes
//! the most recent PCM window from the capture's tap, runs a forward FFT,
//! and compares the mean magnitude of the lower half of the spectrum
//! against the configured threshold. Only transitions are emitted: one
//! event when speech starts, one when it stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::VadConfig;
use crate::media::controller::MediaEvent;

/// Edge-triggered speaking detector for the local audio capture.
///
/// Started against a capture's PCM tap and enabled flag; restart-safe, so
/// a microphone switch simply calls [`start`](Self::start) again with the
/// new tap. A disabled (muted) capture reads as zero magnitude, which
/// drives the speaking state to `false` through the normal edge path.
pub struct VoiceActivityMonitor {
    threshold: f32,
    tick: Duration,
    fft_size: usize,
    events: broadcast::Sender<MediaEvent>,
    speaking: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl VoiceActivityMonitor {
    /// Create a monitor that reports transitions on `events`.
    pub fn new(config: &VadConfig, events: broadcast::Sender<MediaEvent>) -> Self {
        Self {
            threshold: config.speaking_threshold,
            tick: Duration::from_millis(config.tick_interval_ms),
            fft_size: config.fft_size,
            events,
            speaking: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Begin sampling `samples` on the configured interval.
    ///
    /// A previous sampling task, if any, is cancelled first. The speaking
    /// state carries across restarts so a source switch emits at most one
    /// transition.
    pub async fn start(&self, samples: watch::Receiver<Arc<Vec<f32>>>, enabled: Arc<AtomicBool>) {
        let mut slot = self.task.lock().await;
        if let Some(task) = slot.take() {
            task.abort();
        }

        let threshold = self.threshold;
        let tick = self.tick;
        let fft = FftPlanner::new().plan_fft_forward(self.fft_size);
        let speaking = Arc::clone(&self.speaking);
        let events = self.events.clone();

        debug!(
            threshold,
            tick_ms = tick.as_millis() as u64,
            "voice activity monitor started"
        );

        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;

                let magnitude = if enabled.load(Ordering::Relaxed) {
                    let window = samples.borrow().clone();
                    mean_magnitude(&window, fft.as_ref())
                } else {
                    0.0
                };

                let now = magnitude > threshold;
                if speaking.swap(now, Ordering::Relaxed) != now {
                    debug!(speaking = now, magnitude, "voice activity changed");
                    let _ = events.send(MediaEvent::SpeakingChanged { speaking: now });
                }
            }
        }));
    }

    /// Cancel the sampling task. Idempotent; emits no trailing event.
    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            debug!("voice activity monitor stopped");
        }
    }

    /// Last observed speaking state.
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Relaxed)
    }
}

/// Mean magnitude of the lower half of the spectrum.
///
/// For a pure tone this approximates the tone's amplitude regardless of
/// window size: the tone's bin holds `amplitude * N / 2` and the mean is
/// taken over `N / 2` bins.
fn mean_magnitude(window: &[f32], fft: &dyn Fft<f32>) -> f32 {
    let size = fft.len();
    let mut buf: Vec<Complex<f32>> = window
        .iter()
        .take(size)
        .map(|s| Complex::new(*s, 0.0))
        .collect();
    buf.resize(size, Complex::new(0.0, 0.0));

    fft.process(&mut buf);

    let half = size / 2;
    let sum: f32 = buf[..half].iter().map(|c| c.norm()).sum();
    sum / half as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn sine_window(len: usize, cycles: f32, amplitude: f32) -> Arc<Vec<f32>> {
        Arc::new(
            (0..len)
                .map(|n| amplitude * (TAU * cycles * n as f32 / len as f32).sin())
                .collect(),
        )
    }

    fn test_config() -> VadConfig {
        VadConfig {
            speaking_threshold: 0.05,
            tick_interval_ms: 10,
            fft_size: 256,
        }
    }

    #[test]
    fn test_tone_magnitude_tracks_amplitude() {
        let fft = FftPlanner::new().plan_fft_forward(512);
        let window = sine_window(512, 8.0, 0.5);
        let magnitude = mean_magnitude(&window, fft.as_ref());
        assert!((magnitude - 0.5).abs() < 0.05, "magnitude was {magnitude}");
    }

    #[test]
    fn test_silence_magnitude_is_zero() {
        let fft = FftPlanner::new().plan_fft_forward(512);
        let magnitude = mean_magnitude(&[0.0; 512], fft.as_ref());
        assert!(magnitude < 1e-3, "magnitude was {magnitude}");
    }

    #[test]
    fn test_short_window_is_zero_padded() {
        let fft = FftPlanner::new().plan_fft_forward(512);
        let magnitude = mean_magnitude(&[0.4, -0.4, 0.4], fft.as_ref());
        assert!(magnitude.is_finite());
    }

    #[tokio::test]
    async fn test_emits_one_event_per_transition() {
        let (events, mut rx) = broadcast::channel(16);
        let monitor = VoiceActivityMonitor::new(&test_config(), events);
        let (samples_tx, samples_rx) = watch::channel(Arc::new(vec![0.0f32; 256]));
        let enabled = Arc::new(AtomicBool::new(true));

        monitor.start(samples_rx, enabled).await;

        // Silence from the start: no transition to report.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
        assert!(!monitor.is_speaking());

        // Speech starts: exactly one event, however long it lasts.
        samples_tx.send(sine_window(256, 4.0, 0.5)).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, MediaEvent::SpeakingChanged { speaking: true }));
        assert!(monitor.is_speaking());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err(), "loud interval must not flood");

        // Speech stops: one falling edge.
        samples_tx.send(Arc::new(vec![0.0f32; 256])).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            MediaEvent::SpeakingChanged { speaking: false }
        ));

        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_disabled_capture_reads_as_silence() {
        let (events, mut rx) = broadcast::channel(16);
        let monitor = VoiceActivityMonitor::new(&test_config(), events);
        let (samples_tx, samples_rx) = watch::channel(sine_window(256, 4.0, 0.5));
        let enabled = Arc::new(AtomicBool::new(false));

        monitor.start(samples_rx, enabled.clone()).await;
        samples_tx.send(sine_window(256, 4.0, 0.5)).unwrap();

        // Muted: loud samples must not register.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
        assert!(!monitor.is_speaking());

        // Unmute: the loud window now counts.
        enabled.store(true, Ordering::Relaxed);
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, MediaEvent::SpeakingChanged { speaking: true }));

        // Mute again: speaking falls through the same edge path.
        enabled.store(false, Ordering::Relaxed);
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            MediaEvent::SpeakingChanged { speaking: false }
        ));

        monitor.stop().await;
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_restart_replaces_sampling_source() {
        let (events, mut rx) = broadcast::channel(16);
        let monitor = VoiceActivityMonitor::new(&test_config(), events);
        let enabled = Arc::new(AtomicBool::new(true));

        let (loud_tx, loud_rx) = watch::channel(sine_window(256, 4.0, 0.5));
        monitor.start(loud_rx, enabled.clone()).await;
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, MediaEvent::SpeakingChanged { speaking: true }));

        // Switch to a silent source; the carried-over state emits exactly
        // one falling edge.
        let (_silent_tx, silent_rx) = watch::channel(Arc::new(vec![0.0f32; 256]));
        monitor.start(silent_rx, enabled).await;
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            MediaEvent::SpeakingChanged { speaking: false }
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());

        monitor.stop().await;
        drop(loud_tx);
    }
}
