//! Audio output using cpal
//!
//! The device callback never touches the buffer queue directly: a
//! feeder thread pops decoded buffers, applies volume, and pushes
//! interleaved f32 samples into a lock-free ring. The callback drains
//! the ring and zero-fills on underrun, so a stalled pipeline produces
//! silence rather than a crash.

use crate::audio::types::{OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};
use crate::error::{Error, Result};
use crate::playback::buffer::BufferQueue;
use crate::playback::state::RenderGate;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat};
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Ring capacity in samples: half a second of stereo output
const RING_SAMPLES: usize = OUTPUT_SAMPLE_RATE as usize * OUTPUT_CHANNELS as usize / 2;

/// How long the feeder sleeps when the queue is empty or the ring full
const FEED_IDLE: Duration = Duration::from_millis(10);

/// Consumer side of the playback pipeline.
///
/// Implementations pop `PcmBuffer`s from the shared queue on their own
/// schedule; the rest of the pipeline never blocks on the device. The
/// gate tracks session state: implementations pop only while it is
/// open and idle otherwise, so the sink can be started before the
/// session without draining the pre-roll fill.
pub trait AudioSink: Send {
    /// Begin consuming from `queue` and rendering to the output.
    fn start(&mut self, queue: Arc<BufferQueue>, gate: Arc<RenderGate>) -> Result<()>;

    /// Stop rendering and release the device.
    fn stop(&mut self);

    /// Total frames rendered to the device since `start`.
    fn frames_rendered(&self) -> u64;
}

/// cpal-backed sink.
///
/// `cpal::Stream` is not `Send`, so the stream lives on a dedicated
/// feeder thread for its whole lifetime; the handle only carries shared
/// atomics and the volume cell.
pub struct CpalSink {
    device_name: Option<String>,
    volume: Arc<Mutex<f32>>,
    frames: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CpalSink {
    /// Create a sink for the named device, or the default device.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            volume: Arc::new(Mutex::new(1.0)),
            frames: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// List available audio output devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();
        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Set output volume, clamped to [0.0, 1.0].
    pub fn set_volume(&self, volume: f32) {
        let clamped = volume.clamp(0.0, 1.0);
        *self.volume.lock().unwrap() = clamped;
        debug!("Volume set to {:.2}", clamped);
    }

    /// Current output volume.
    pub fn volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }

    fn open_device(&self) -> Result<Device> {
        let host = cpal::default_host();

        if let Some(name) = self.device_name.as_ref() {
            let mut devices = host
                .output_devices()
                .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
            if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                info!("Using requested audio device: {}", name);
                return Ok(device);
            }
            warn!("Requested device '{}' not found, falling back to default", name);
        }

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;
        info!(
            "Using default audio device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );
        Ok(device)
    }
}

impl AudioSink for CpalSink {
    fn start(&mut self, queue: Arc<BufferQueue>, gate: Arc<RenderGate>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AudioOutput("Sink already started".to_string()));
        }

        let device = self.open_device()?;
        let supported = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device config: {}", e)))?;
        if supported.sample_format() != SampleFormat::F32 {
            self.running.store(false, Ordering::SeqCst);
            return Err(Error::AudioOutput(format!(
                "Unsupported sample format: {:?}",
                supported.sample_format()
            )));
        }

        let config = cpal::StreamConfig {
            channels: OUTPUT_CHANNELS,
            sample_rate: cpal::SampleRate(OUTPUT_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let volume = Arc::clone(&self.volume);
        let frames = Arc::clone(&self.frames);
        let running = Arc::clone(&self.running);

        // The stream must be created and dropped on the same thread
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();
        let thread = std::thread::Builder::new()
            .name("audio-sink".to_string())
            .spawn(move || {
                let rb = HeapRb::<f32>::new(RING_SAMPLES);
                let (mut producer, mut consumer) = rb.split();

                let cb_frames = Arc::clone(&frames);
                let cb_volume = Arc::clone(&volume);
                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let provided = consumer.pop_slice(data);
                        let current_volume = *cb_volume.lock().unwrap();
                        for sample in &mut data[..provided] {
                            *sample = (*sample * current_volume).clamp(-1.0, 1.0);
                        }
                        // Underrun: silence, never a crash
                        data[provided..].fill(0.0);
                        cb_frames.fetch_add(
                            (provided / OUTPUT_CHANNELS as usize) as u64,
                            Ordering::Relaxed,
                        );
                    },
                    move |err| {
                        error!("Audio stream error: {}", err);
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx
                            .send(Err(Error::AudioOutput(format!("Failed to build stream: {}", e))));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx
                        .send(Err(Error::AudioOutput(format!("Failed to start stream: {}", e))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                info!("Audio stream started");

                // Feeder loop: queue -> ring, interleaving as we go.
                // Feeds only while the gate is open; outside Playing the
                // ring drains out (at most half a second) and goes silent.
                let mut pending: Vec<f32> = Vec::new();
                let mut offset = 0;
                while running.load(Ordering::SeqCst) {
                    if !gate.is_open() {
                        std::thread::sleep(FEED_IDLE);
                        continue;
                    }
                    if offset >= pending.len() {
                        match queue.pop() {
                            Some(buf) => {
                                pending = buf.interleaved();
                                offset = 0;
                            }
                            None => {
                                std::thread::sleep(FEED_IDLE);
                                continue;
                            }
                        }
                    }
                    let pushed = producer.push_slice(&pending[offset..]);
                    offset += pushed;
                    if producer.is_full() {
                        std::thread::sleep(FEED_IDLE);
                    }
                }

                // Stream drops here, on its owning thread
                debug!("Audio sink thread exiting");
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn sink thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.thread = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = thread.join();
                Err(Error::AudioOutput("Sink thread died during startup".to_string()))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        info!("Audio sink stopped");
    }

    fn frames_rendered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Headless sink that discards audio at roughly real-time pace.
///
/// Keeps the pipeline honest when no device is available (CI, servers).
pub struct NullSink {
    frames: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for NullSink {
    fn start(&mut self, queue: Arc<BufferQueue>, gate: Arc<RenderGate>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AudioOutput("Sink already started".to_string()));
        }
        let frames = Arc::clone(&self.frames);
        let running = Arc::clone(&self.running);
        let thread = std::thread::Builder::new()
            .name("null-sink".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    if !gate.is_open() {
                        std::thread::sleep(FEED_IDLE);
                        continue;
                    }
                    match queue.pop() {
                        Some(buf) => {
                            let ms = buf.duration_ms();
                            frames.fetch_add(buf.frames() as u64, Ordering::Relaxed);
                            std::thread::sleep(Duration::from_millis(ms as u64));
                        }
                        None => std::thread::sleep(FEED_IDLE),
                    }
                }
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn sink thread: {}", e)))?;
        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn frames_rendered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::PcmBuffer;
    use crate::events::EventBus;
    use crate::playback::state::{PlaybackState, StateMachine};

    #[test]
    fn test_list_devices_does_not_panic() {
        // Requires audio hardware on some platforms; either outcome is fine
        let result = CpalSink::list_devices();
        assert!(result.is_ok() || result.is_err());
    }

    #[test]
    fn test_volume_clamping() {
        let sink = CpalSink::new(None);
        sink.set_volume(1.5);
        assert_eq!(sink.volume(), 1.0);
        sink.set_volume(-0.5);
        assert_eq!(sink.volume(), 0.0);
        sink.set_volume(0.5);
        assert_eq!(sink.volume(), 0.5);
    }

    #[test]
    fn test_null_sink_renders_only_while_playing() {
        let queue = Arc::new(BufferQueue::new(4));
        queue.try_push(PcmBuffer::silent(0, 48)).unwrap();

        let mut machine = StateMachine::new(EventBus::new(16));
        let gate = machine.render_gate();

        let mut sink = NullSink::new();
        sink.start(Arc::clone(&queue), Arc::clone(&gate)).unwrap();

        // Gate closed before Playing: the buffer stays queued
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(sink.frames_rendered(), 0);
        assert_eq!(queue.buffered_count(), 1);

        machine.transition_to(PlaybackState::Connecting).unwrap();
        machine.transition_to(PlaybackState::Buffering).unwrap();
        machine.transition_to(PlaybackState::Playing).unwrap();

        // One 48-frame buffer at 48 kHz is 1 ms of audio
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while sink.frames_rendered() < 48 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sink.frames_rendered(), 48);
        assert_eq!(queue.buffered_count(), 0);

        // Pausing closes the gate again: new buffers are left alone
        machine.request_pause().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        queue.try_push(PcmBuffer::silent(1, 48)).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        sink.stop();
        assert_eq!(sink.frames_rendered(), 48);
        assert_eq!(queue.buffered_count(), 1);
    }
}
