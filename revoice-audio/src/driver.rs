//! Output drivers - the real-time side that pulls the graph
//!
//! A driver owns one callback thread and calls the render callback once per
//! buffer. `ClockedDriver` paces itself with the wall clock (or runs flat out
//! for headless use); `CpalDriver` lets the default output device pull.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Sender};
use tracing::{debug, error, info};

use crate::error::{AudioError, Result};
use crate::format::StreamFormat;

/// Fills one interleaved stereo buffer
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send>;

/// Something that pulls rendered buffers on its own thread
pub trait OutputDriver: Send {
    /// Start calling `callback`. Fails if already running.
    fn start(&mut self, format: &StreamFormat, callback: RenderCallback) -> Result<()>;

    /// Stop the callback thread. No callback runs after this returns.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// How a `ClockedDriver` schedules buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// One buffer per buffer-duration of wall-clock time
    RealTime,
    /// Back to back, as fast as the callback returns
    Unpaced,
}

/// Dedicated-thread driver with a fixed buffer size
pub struct ClockedDriver {
    buffer_frames: usize,
    pacing: Pacing,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ClockedDriver {
    pub fn new(buffer_frames: usize, pacing: Pacing) -> Self {
        Self {
            buffer_frames: buffer_frames.max(1),
            pacing,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn buffer_frames(&self) -> usize {
        self.buffer_frames
    }
}

impl OutputDriver for ClockedDriver {
    fn start(&mut self, format: &StreamFormat, mut callback: RenderCallback) -> Result<()> {
        if self.handle.is_some() {
            return Err(AudioError::Driver("driver already running".into()));
        }

        let samples = format.samples_for(self.buffer_frames);
        let period = format.duration_of(self.buffer_frames as u64);
        let pacing = self.pacing;
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("revoice-render".into())
            .spawn(move || {
                let mut buffer = vec![0.0f32; samples];
                let mut deadline = Instant::now();

                while running.load(Ordering::Acquire) {
                    callback(&mut buffer);

                    match pacing {
                        Pacing::RealTime => {
                            deadline += period;
                            let now = Instant::now();
                            if deadline > now {
                                thread::sleep(deadline - now);
                            } else {
                                // Fell behind: do not try to catch up in a burst
                                deadline = now;
                            }
                        }
                        Pacing::Unpaced => thread::yield_now(),
                    }
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                AudioError::Driver(e.to_string())
            })?;

        debug!(
            buffer_frames = self.buffer_frames,
            pacing = ?self.pacing,
            "clocked driver started"
        );
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!("clocked driver stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::Acquire)
    }
}

impl Drop for ClockedDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Plays through the default output device.
///
/// The cpal stream lives on its own thread because it is not `Send` on
/// every host; the driver only holds the shutdown channel.
#[derive(Default)]
pub struct CpalDriver {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CpalDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Open the default device at the graph rate and wire up the callback
fn build_stream(sample_rate: u32, mut callback: RenderCallback) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::Driver("no audio output device found".into()))?;

    let default_config = device
        .default_output_config()
        .map_err(|e| AudioError::Driver(format!("failed to get audio config: {}", e)))?;

    let channels = default_config.channels() as usize;
    let config = cpal::StreamConfig {
        channels: default_config.channels(),
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    // Pre-allocated stereo scratch for devices that are not stereo
    let mut stereo_buffer = vec![0.0f32; 16384];

    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if channels == 2 {
                    callback(data);
                    return;
                }

                let frames = data.len() / channels.max(1);
                let needed = frames * 2;
                if stereo_buffer.len() < needed {
                    data.fill(0.0);
                    return;
                }
                let stereo = &mut stereo_buffer[..needed];
                callback(stereo);
                for (frame, pair) in data.chunks_exact_mut(channels).zip(stereo.chunks_exact(2)) {
                    if channels == 1 {
                        frame[0] = (pair[0] + pair[1]) * 0.5;
                    } else {
                        frame.fill(0.0);
                        frame[0] = pair[0];
                        frame[1] = pair[1];
                    }
                }
            },
            |err| {
                error!(error = %err, "audio stream error");
            },
            None,
        )
        .map_err(|e| AudioError::Driver(format!("failed to create audio stream: {}", e)))
}

impl OutputDriver for CpalDriver {
    fn start(&mut self, format: &StreamFormat, callback: RenderCallback) -> Result<()> {
        if self.handle.is_some() {
            return Err(AudioError::Driver("driver already running".into()));
        }

        let sample_rate = format.sample_rate;
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("revoice-cpal".into())
            .spawn(move || {
                let stream = match build_stream(sample_rate, callback) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::Driver(format!(
                        "failed to start audio: {}",
                        e
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until stop() or the driver is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::Driver(e.to_string()))?;

        let ready = ready_rx
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| AudioError::Driver("audio device did not start".into()))
            .and_then(|r| r);

        match ready {
            Ok(()) => {
                info!(sample_rate, "audio output started");
                self.shutdown = Some(shutdown_tx);
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                drop(shutdown_tx);
                let _ = handle.join();
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!("audio output stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for CpalDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
