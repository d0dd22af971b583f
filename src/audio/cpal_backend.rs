//! CPAL microphone backend for desktop platforms (Linux, macOS, Windows)
//!
//! cpal streams are not `Send`, so the stream is built, played and dropped on
//! a dedicated capture thread. `start` blocks until that thread reports
//! whether the device opened; `stop` signals it and joins.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::error::AudioError;

use super::backend::{CaptureBackend, CaptureInfo, CaptureStartContext};

/// Default input device capture
#[derive(Default)]
pub struct CpalCaptureBackend {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalCaptureBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureBackend for CpalCaptureBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn start(&mut self, ctx: CaptureStartContext) -> Result<CaptureInfo, AudioError> {
        if self.thread.is_some() {
            return Err(AudioError::AlreadyRunning);
        }

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<CaptureInfo, AudioError>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("cpal-capture".to_string())
            .spawn(move || match open_input_stream(ctx) {
                Ok((stream, info)) => {
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(AudioError::StreamOpenFailed {
                            reason: format!("Failed to start input stream: {:?}", e),
                        }));
                        return;
                    }
                    let _ = ready_tx.send(Ok(info));
                    // Park until stop() signals or the backend is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                    log::info!("[CpalCapture] Input stream closed");
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(info)) => {
                log::info!(
                    "[CpalCapture] Capturing from '{}' at {} Hz",
                    info.device_name,
                    info.sample_rate
                );
                self.stop_tx = Some(stop_tx);
                self.thread = Some(handle);
                Ok(info)
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::HardwareError {
                    details: "capture thread exited before opening the device".to_string(),
                })
            }
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalCaptureBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_input_stream(ctx: CaptureStartContext) -> Result<(cpal::Stream, CaptureInfo), AudioError> {
    let CaptureStartContext {
        mut channels,
        fault,
    } = ctx;

    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AudioError::DeviceUnavailable {
            reason: "No default input device found".to_string(),
        })?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let config = device
        .default_input_config()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Failed to get default input config: {:?}", e),
        })?;

    let stream_config: cpal::StreamConfig = config.clone().into();
    let channel_count = stream_config.channels as usize;
    let sample_rate = stream_config.sample_rate.0;

    let err_fn = move |err: cpal::StreamError| {
        fault.report(AudioError::StreamFailure {
            reason: err.to_string(),
        });
    };

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Dropped when analysis falls behind; the pool refills as it catches up
                let _ = channels.publish_first_channel(data, channel_count);
            },
            err_fn,
            None,
        ),
        _ => {
            return Err(AudioError::StreamOpenFailed {
                reason: "Only F32 sample format is currently supported for input".to_string(),
            })
        }
    }
    .map_err(|e| match e {
        cpal::BuildStreamError::DeviceNotAvailable => AudioError::DeviceUnavailable {
            reason: "Input device disappeared while opening".to_string(),
        },
        other => AudioError::StreamOpenFailed {
            reason: format!("{:?}", other),
        },
    })?;

    Ok((
        stream,
        CaptureInfo {
            sample_rate,
            device_name,
        },
    ))
}
