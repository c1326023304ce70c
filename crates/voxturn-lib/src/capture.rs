//! Microphone capture for voice turns.
//!
//! [`CaptureDevice`] is the seam the controller acquires a microphone
//! through. Acquisition yields a [`CaptureStream`], the only live holder of
//! the device: releasing it stops capture, and [`MicrophoneDevice`] refuses a
//! second acquisition until the first stream is released.
//!
//! The stream cuts incoming 16 kHz mono i16 audio into fixed-length
//! fragments, regardless of the device's native format, rate, or channel count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use voxturn_core::error::CaptureError;
use voxturn_core::wav::{fragment_samples, SAMPLE_RATE};

/// Source of capture streams.
pub trait CaptureDevice: Send + 'static {
    /// Acquire the device and start capturing into fragments of `interval`.
    fn acquire(&mut self, interval: Duration) -> Result<CaptureStream, CaptureError>;
}

type Release = Box<dyn FnOnce() + Send>;

/// A live capture. Dropping it releases the device.
pub struct CaptureStream {
    rx: mpsc::UnboundedReceiver<Vec<i16>>,
    buf: Vec<i16>,
    fragment_samples: usize,
    closed: bool,
    release: Option<Release>,
}

impl CaptureStream {
    /// Wrap a sample channel. `release` must stop the producer and return
    /// only once no further samples will be sent.
    pub fn new(
        rx: mpsc::UnboundedReceiver<Vec<i16>>,
        interval: Duration,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            rx,
            buf: Vec::new(),
            fragment_samples: fragment_samples(interval),
            closed: false,
            release: Some(Box::new(release)),
        }
    }

    /// Wait for the next full fragment.
    ///
    /// Cancel-safe: partially collected samples stay buffered. Returns `None`
    /// once if the producer ends unexpectedly, then never resolves again.
    pub async fn next_fragment(&mut self) -> Option<Vec<i16>> {
        if self.closed {
            return std::future::pending().await;
        }
        while self.buf.len() < self.fragment_samples {
            match self.rx.recv().await {
                Some(samples) => self.buf.extend_from_slice(&samples),
                None => {
                    self.closed = true;
                    return None;
                }
            }
        }
        Some(self.buf.drain(..self.fragment_samples).collect())
    }

    /// Stop capturing and return every sample not yet handed out, as
    /// fragments. All audio captured for the turn is accounted for once this
    /// returns.
    pub fn finish(mut self) -> Vec<Vec<i16>> {
        if let Some(release) = self.release.take() {
            release();
        }
        while let Ok(samples) = self.rx.try_recv() {
            self.buf.extend_from_slice(&samples);
        }
        let rest = std::mem::take(&mut self.buf);
        rest.chunks(self.fragment_samples)
            .map(<[i16]>::to_vec)
            .collect()
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

// ---------------------------------------------------------------------------
// cpal microphone
// ---------------------------------------------------------------------------

/// The system default input device.
#[derive(Default)]
pub struct MicrophoneDevice {
    in_use: Arc<AtomicBool>,
}

impl MicrophoneDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureDevice for MicrophoneDevice {
    fn acquire(&mut self, interval: Duration) -> Result<CaptureStream, CaptureError> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CaptureError::Busy);
        }

        match open_default_input(interval, self.in_use.clone()) {
            Ok(stream) => Ok(stream),
            Err(e) => {
                self.in_use.store(false, Ordering::Release);
                Err(e)
            }
        }
    }
}

fn open_default_input(
    interval: Duration,
    in_use: Arc<AtomicBool>,
) -> Result<CaptureStream, CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;

    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::Config(e.to_string()))?;

    let native_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    debug!("capture: {native_rate} Hz, {channels} ch, {sample_format:?}");

    let (tx, rx) = mpsc::unbounded_channel::<Vec<i16>>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), CaptureError>>();
    let stop = Arc::new(AtomicBool::new(false));
    let stop_thread = stop.clone();

    // cpal Stream is !Send on macOS; it must live on a dedicated OS thread.
    let thread = std::thread::Builder::new()
        .name("voxturn-capture".into())
        .spawn(move || {
            let stream = match sample_format {
                SampleFormat::I16 => {
                    let tx = tx.clone();
                    let stop = stop_thread.clone();
                    device.build_input_stream(
                        &config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            if stop.load(Ordering::Relaxed) {
                                return;
                            }
                            let mono = mix_to_mono(data, channels);
                            let _ = tx.send(resample_linear(&mono, native_rate, SAMPLE_RATE));
                        },
                        |err| error!("capture: stream error: {err}"),
                        None,
                    )
                }
                SampleFormat::F32 => {
                    let tx = tx.clone();
                    let stop = stop_thread.clone();
                    device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            if stop.load(Ordering::Relaxed) {
                                return;
                            }
                            let i16_data: Vec<i16> = data
                                .iter()
                                .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                                .collect();
                            let mono = mix_to_mono(&i16_data, channels);
                            let _ = tx.send(resample_linear(&mono, native_rate, SAMPLE_RATE));
                        },
                        |err| error!("capture: stream error: {err}"),
                        None,
                    )
                }
                other => {
                    let _ = ready_tx.send(Err(CaptureError::UnsupportedFormat(format!("{other:?}"))));
                    return;
                }
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(CaptureError::StreamBuild(e.to_string())));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(CaptureError::StreamStart(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // Park until stop signal
            loop {
                std::thread::park();
                if stop_thread.load(Ordering::Relaxed) {
                    break;
                }
            }
            // stream and sender dropped here, which stops cpal
        })
        .map_err(|e| CaptureError::StreamStart(e.to_string()))?;

    let ready = ready_rx
        .recv()
        .unwrap_or_else(|_| Err(CaptureError::StreamStart("capture thread exited".into())));
    if let Err(e) = ready {
        let _ = thread.join();
        return Err(e);
    }

    let release = move || {
        stop.store(true, Ordering::Relaxed);
        thread.thread().unpark();
        if thread.join().is_err() {
            warn!("capture: thread panicked during shutdown");
        }
        in_use.store(false, Ordering::Release);
        debug!("capture: device released");
    };

    Ok(CaptureStream::new(rx, interval, release))
}

// ---------------------------------------------------------------------------
// Audio processing helpers
// ---------------------------------------------------------------------------

/// Mix multi-channel audio to mono by averaging channels.
fn mix_to_mono(input: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return input.to_vec();
    }
    let ch = channels as usize;
    input
        .chunks_exact(ch)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Resample using linear interpolation. Good enough for speech.
fn resample_linear(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (input.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(output_len);
    for i in 0..output_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;
        let s0 = input[idx] as f64;
        let s1 = input.get(idx + 1).map_or(s0, |&s| s as f64);
        output.push((s0 + frac * (s1 - s0)) as i16);
    }
    output
}
