//! Microphone capture through cpal.
//!
//! A cpal input stream cannot leave the thread that built it, so each track
//! owns a dedicated capture thread. Samples flow through a ring buffer into
//! the track's analyser; stopping the track (or dropping it, or dropping the
//! capture future before it resolves) disconnects the stop channel, which
//! ends the thread and drops the stream.

use crate::media::{Analyser, AudioSource, AudioTrack, CaptureError};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleFormat, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// Bins exposed by the analyser.
pub const DEFAULT_BIN_COUNT: usize = 128;

// About a quarter second at 48 kHz.
const RING_CAPACITY: usize = 12_000;

pub struct CpalAudioSource {
    bins: usize,
}

impl CpalAudioSource {
    pub fn new() -> Self {
        Self {
            bins: DEFAULT_BIN_COUNT,
        }
    }
}

impl Default for CpalAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSource for CpalAudioSource {
    async fn capture(&self) -> Result<Arc<dyn AudioTrack>, CaptureError> {
        let (producer, consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("mentorcall-mic".to_string())
            .spawn(move || run_capture(producer, ready_tx, stop_rx))
            .map_err(|e| CaptureError::Device(e.to_string()))?;

        let id = ready_rx
            .await
            .map_err(|_| CaptureError::Device("capture thread exited".to_string()))??;
        info!(track = %id, "Microphone stream started");

        Ok(Arc::new(CpalTrack {
            id,
            stop: Mutex::new(Some(stop_tx)),
            stopped: AtomicBool::new(false),
            analyser: Arc::new(RingAnalyser::new(consumer, self.bins)),
        }))
    }
}

fn run_capture(
    producer: HeapProd<f32>,
    ready: oneshot::Sender<Result<String, CaptureError>>,
    stop: mpsc::Receiver<()>,
) {
    let stream = match open_stream(producer) {
        Ok((stream, id)) => {
            if ready.send(Ok(id)).is_err() {
                debug!("Capture abandoned before the stream was handed over");
                return;
            }
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Blocks until the track sends stop or drops its sender.
    let _ = stop.recv();
    drop(stream);
    debug!("Microphone stream released");
}

fn open_stream(mut producer: HeapProd<f32>) -> Result<(cpal::Stream, String), CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;
    let id = device.name().unwrap_or_else(|_| "default-input".to_string());

    let input_config = device
        .default_input_config()
        .map_err(|e| CaptureError::Device(e.to_string()))?;
    let stream_config: StreamConfig = input_config.clone().into();
    let err_fn = |err: cpal::StreamError| error!("Input stream error: {}", err);

    let stream = match input_config.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _| {
                producer.push_slice(data);
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _| {
                let scale = 1.0 / i16::MAX as f32;
                for sample in data {
                    let _ = producer.try_push(*sample as f32 * scale);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _| {
                const MIDPOINT: f32 = 32768.0;
                for sample in data {
                    let _ = producer.try_push((*sample as f32 - MIDPOINT) / MIDPOINT);
                }
            },
            err_fn,
            None,
        ),
        other => {
            return Err(CaptureError::Device(format!(
                "input sample format {:?} is not supported",
                other
            )));
        }
    }
    .map_err(|e| match e {
        BuildStreamError::DeviceNotAvailable => CaptureError::PermissionDenied,
        other => CaptureError::Device(other.to_string()),
    })?;

    stream
        .play()
        .map_err(|e| CaptureError::Device(e.to_string()))?;
    Ok((stream, id))
}

struct CpalTrack {
    id: String,
    stop: Mutex<Option<mpsc::Sender<()>>>,
    stopped: AtomicBool,
    analyser: Arc<RingAnalyser>,
}

impl AudioTrack for CpalTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn analyser(&self) -> Option<Arc<dyn Analyser>> {
        Some(self.analyser.clone())
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let sender = self
            .stop
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for CpalTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

struct AnalyserState {
    consumer: HeapCons<f32>,
    scratch: Vec<f32>,
    last: Vec<u8>,
}

/// Splits the most recent samples into equal slices and reports the mean
/// absolute amplitude of each slice.
struct RingAnalyser {
    bins: usize,
    state: Mutex<AnalyserState>,
}

impl RingAnalyser {
    fn new(consumer: HeapCons<f32>, bins: usize) -> Self {
        Self {
            bins,
            state: Mutex::new(AnalyserState {
                consumer,
                scratch: vec![0.0; RING_CAPACITY],
                last: vec![0; bins],
            }),
        }
    }
}

impl Analyser for RingAnalyser {
    fn bin_count(&self) -> usize {
        self.bins
    }

    fn byte_frequency_data(&self, bins: &mut [u8]) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let AnalyserState {
            consumer,
            scratch,
            last,
        } = &mut *state;

        let read = consumer.pop_slice(scratch);
        if read > 0 {
            magnitudes(&scratch[..read], last);
        }
        let n = bins.len().min(last.len());
        bins[..n].copy_from_slice(&last[..n]);
    }
}

fn magnitudes(samples: &[f32], out: &mut [u8]) {
    if out.is_empty() {
        return;
    }
    let chunk = samples.len().div_ceil(out.len()).max(1);
    out.fill(0);
    for (slot, slice) in out.iter_mut().zip(samples.chunks(chunk)) {
        let mean = slice.iter().map(|s| s.abs()).sum::<f32>() / slice.len() as f32;
        *slot = (mean.clamp(0.0, 1.0) * 255.0) as u8;
    }
}
