//! cpal backed audio host.
//!
//! cpal streams cannot leave the thread that built them, so every stream lives
//! on its own worker thread and is dropped when the worker is told to stop.
//! Playback goes through a small mixer positioned by absolute output frame
//! index, which gives the scheduler a sample-accurate `now()`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;

use super::{
    AudioHost, CaptureContext, DeviceError, DeviceResult, FrameSink, MicrophoneStream,
    PlaybackDevice, SourceEndedSender, SourceId,
};
use crate::core::audio::CaptureFrame;

/// Audio host using the platform default input and output devices.
#[derive(Debug, Default, Clone)]
pub struct CpalAudioHost;

impl CpalAudioHost {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioHost for CpalAudioHost {
    async fn request_microphone(&self, sample_rate: u32) -> DeviceResult<Arc<dyn MicrophoneStream>> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| DeviceError::Unavailable("no input device available".to_string()))?;
        let config = input_config(&device, sample_rate)?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "microphone acquired"
        );

        Ok(Arc::new(CpalMicrophone {
            live: AtomicBool::new(true),
        }))
    }

    async fn open_capture_context(&self, sample_rate: u32) -> DeviceResult<Arc<dyn CaptureContext>> {
        Ok(Arc::new(CpalCaptureContext {
            sample_rate,
            worker: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }

    async fn open_playback_context(
        &self,
        sample_rate: u32,
        on_source_ended: SourceEndedSender,
    ) -> DeviceResult<Box<dyn PlaybackDevice>> {
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let (rate_tx, rate_rx) = std_mpsc::channel::<u32>();

        let worker_mixer = Arc::clone(&mixer);
        let worker = StreamWorker::spawn("keepsake-playback", move || {
            let device = cpal::default_host()
                .default_output_device()
                .ok_or_else(|| DeviceError::Unavailable("no output device available".to_string()))?;
            let config = output_config(&device, sample_rate)?;
            let channels = config.channels.max(1) as usize;
            let _ = rate_tx.send(config.sample_rate.0);

            tracing::debug!(
                device = device.name().unwrap_or_default(),
                sample_rate = config.sample_rate.0,
                channels,
                "playback context opened"
            );

            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let finished = worker_mixer.lock().render(data, channels);
                        for id in finished {
                            on_source_ended(id);
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| DeviceError::Backend(e.to_string()))
        })?;

        let device_rate = rate_rx.recv().unwrap_or(sample_rate);

        Ok(Box::new(CpalPlaybackDevice {
            sample_rate: device_rate,
            mixer,
            worker: Some(worker),
        }))
    }
}

// =============================================================================
// Microphone
// =============================================================================

struct CpalMicrophone {
    live: AtomicBool,
}

impl MicrophoneStream for CpalMicrophone {
    fn stop_tracks(&self) -> DeviceResult<()> {
        if self.live.swap(false, Ordering::SeqCst) {
            tracing::debug!("microphone tracks stopped");
        }
        Ok(())
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Capture
// =============================================================================

struct CpalCaptureContext {
    sample_rate: u32,
    worker: Mutex<Option<StreamWorker>>,
    closed: AtomicBool,
}

impl CaptureContext for CpalCaptureContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start_capture(
        &self,
        microphone: Arc<dyn MicrophoneStream>,
        frame_len: usize,
        sink: FrameSink,
    ) -> DeviceResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeviceError::Closed);
        }
        let mut slot = self.worker.lock();
        if slot.is_some() {
            return Ok(());
        }

        let requested_rate = self.sample_rate;
        let frame_len = frame_len.max(1);
        let worker = StreamWorker::spawn("keepsake-capture", move || {
            let device = cpal::default_host()
                .default_input_device()
                .ok_or_else(|| DeviceError::Unavailable("no input device available".to_string()))?;
            let config = input_config(&device, requested_rate)?;
            let channels = config.channels.max(1) as usize;
            let rate = config.sample_rate.0;
            let mut pending: Vec<f32> = Vec::with_capacity(frame_len);

            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !microphone.is_live() {
                            return;
                        }
                        for frame in data.chunks(channels) {
                            pending.push(frame.iter().sum::<f32>() / frame.len() as f32);
                            if pending.len() == frame_len {
                                let samples =
                                    std::mem::replace(&mut pending, Vec::with_capacity(frame_len));
                                sink(CaptureFrame::new(samples, rate));
                            }
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio capture error");
                    },
                    None,
                )
                .map_err(|e| DeviceError::Backend(e.to_string()))
        })?;

        *slot = Some(worker);
        tracing::debug!(frame_len, "audio capture started");
        Ok(())
    }

    fn close(&self) -> DeviceResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
            tracing::debug!("audio capture stopped");
        }
        Ok(())
    }
}

// =============================================================================
// Playback
// =============================================================================

struct MixSource {
    id: SourceId,
    start_frame: u64,
    samples: Arc<[f32]>,
}

impl MixSource {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

#[derive(Default)]
struct Mixer {
    position: u64,
    sources: Vec<MixSource>,
}

impl Mixer {
    /// Fill one output buffer and return the sources that finished in it.
    fn render(&mut self, out: &mut [f32], channels: usize) -> Vec<SourceId> {
        for frame in out.chunks_mut(channels) {
            let pos = self.position;
            let mut acc = 0.0f32;
            for source in &self.sources {
                if pos >= source.start_frame
                    && let Some(sample) = source.samples.get((pos - source.start_frame) as usize)
                {
                    acc += *sample;
                }
            }
            let value = acc.clamp(-1.0, 1.0);
            for slot in frame.iter_mut() {
                *slot = value;
            }
            self.position += 1;
        }

        let pos = self.position;
        let mut finished = Vec::new();
        self.sources.retain(|s| {
            let done = s.end_frame() <= pos;
            if done {
                finished.push(s.id);
            }
            !done
        });
        finished
    }
}

struct CpalPlaybackDevice {
    sample_rate: u32,
    mixer: Arc<Mutex<Mixer>>,
    worker: Option<StreamWorker>,
}

impl PlaybackDevice for CpalPlaybackDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn now(&self) -> f64 {
        self.mixer.lock().position as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, id: SourceId, samples: Arc<[f32]>, start_at: f64) -> DeviceResult<()> {
        if self.worker.is_none() {
            return Err(DeviceError::Closed);
        }
        let start_frame = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        self.mixer.lock().sources.push(MixSource {
            id,
            start_frame,
            samples,
        });
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) -> DeviceResult<()> {
        self.mixer.lock().sources.retain(|s| s.id != id);
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        if let Some(mut worker) = self.worker.take() {
            self.mixer.lock().sources.clear();
            worker.stop();
            tracing::debug!("playback context closed");
        }
        Ok(())
    }
}

// =============================================================================
// Stream worker thread
// =============================================================================

/// Owns a cpal stream on a dedicated thread until stopped.
struct StreamWorker {
    shutdown: Option<std_mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamWorker {
    fn spawn<F>(name: &str, build: F) -> DeviceResult<Self>
    where
        F: FnOnce() -> DeviceResult<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::channel::<DeviceResult<()>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build().and_then(|stream| {
                    stream
                        .play()
                        .map_err(|e| DeviceError::Backend(e.to_string()))?;
                    Ok(stream)
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Returns once the sender is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shutdown: Some(shutdown_tx),
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(DeviceError::Backend(format!("{name} thread exited early"))),
        }
    }

    fn stop(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("audio stream thread panicked");
        }
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Config selection
// =============================================================================

fn choose_config(ranges: Vec<SupportedStreamConfigRange>, sample_rate: u32) -> Option<StreamConfig> {
    let rate = SampleRate(sample_rate);
    ranges
        .into_iter()
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .min_by_key(|c| c.channels())
        .map(|c| c.with_sample_rate(rate).config())
}

fn input_config(device: &cpal::Device, sample_rate: u32) -> DeviceResult<StreamConfig> {
    let ranges: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| DeviceError::Unavailable(e.to_string()))?
        .collect();
    if let Some(config) = choose_config(ranges, sample_rate) {
        return Ok(config);
    }
    tracing::warn!(sample_rate, "input device does not support requested rate, using default");
    device
        .default_input_config()
        .map(|c| c.config())
        .map_err(|e| DeviceError::Unavailable(e.to_string()))
}

fn output_config(device: &cpal::Device, sample_rate: u32) -> DeviceResult<StreamConfig> {
    let ranges: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| DeviceError::Unavailable(e.to_string()))?
        .collect();
    if let Some(config) = choose_config(ranges, sample_rate) {
        return Ok(config);
    }
    tracing::warn!(sample_rate, "output device does not support requested rate, using default");
    device
        .default_output_config()
        .map(|c| c.config())
        .map_err(|e| DeviceError::Unavailable(e.to_string()))
}
