// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for driving the pipeline
//!
//! This module provides command-line functionality for:
//! - Running a synthetic capture session (single shot or burst)
//! - Printing the exposure plan for a given scene
//! - Watching the closed-loop exposure controller converge

use futures::{StreamExt, pin_mut};
use rawburst::capture::{CAPTURE_EVENT_QUEUE_CAPACITY, CaptureControl, SyntheticCapture};
use rawburst::engine::NullEngine;
use rawburst::exposure::{ExposureController, calculate_exposure};
use rawburst::packer::PlaneDescriptor;
use rawburst::pipelines::orchestrator::{CaptureOutcome, PipelineCommand, PipelineOrchestrator};
use rawburst::storage::{AssetStore, FsAssetStore};
use rawburst::{BufferPool, CaptureConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Plane geometry used by the synthetic capture sessions: a modest
/// RAW16 sensor with 64 bytes of row padding
fn synthetic_descriptor() -> PlaneDescriptor {
    PlaneDescriptor {
        width: 1024,
        height: 768,
        row_stride: 1024 * 2 + 64,
        pixel_stride: 2,
    }
}

fn load_config(config_path: Option<PathBuf>) -> Result<CaptureConfig, Box<dyn std::error::Error>> {
    Ok(match config_path {
        Some(path) => CaptureConfig::load(&path)?,
        None => CaptureConfig::default(),
    })
}

/// Run a synthetic capture session and print each outcome
pub fn run_session(
    burst: bool,
    shots: usize,
    config_path: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let pool = BufferPool::new(config.pool_size);
        let root = output.unwrap_or_else(FsAssetStore::default_root);
        let store: Arc<dyn AssetStore> = Arc::new(FsAssetStore::new(root)?);

        let (events_tx, events_rx) = mpsc::channel(CAPTURE_EVENT_QUEUE_CAPACITY);
        let capture = SyntheticCapture::new(synthetic_descriptor(), events_tx);

        let (orchestrator, mut channels) = PipelineOrchestrator::new(
            config,
            pool,
            Arc::new(NullEngine),
            store,
            Arc::clone(&capture) as Arc<dyn CaptureControl>,
            events_rx,
        );
        let pipeline = tokio::spawn(orchestrator.run());

        let command = if burst {
            PipelineCommand::CaptureBurst
        } else {
            PipelineCommand::CaptureSingle
        };

        for shot in 0..shots {
            channels.commands.send(command).await?;
            match channels.outcomes.recv().await {
                Some(CaptureOutcome::Completed {
                    base_name,
                    status,
                    persisted,
                    burst,
                    fallback_used,
                }) => {
                    println!(
                        "[{}] {} -> {:?} ({} files{}{})",
                        shot + 1,
                        base_name,
                        status,
                        persisted.len(),
                        if burst { ", burst" } else { "" },
                        if fallback_used { ", fallback" } else { "" },
                    );
                }
                Some(CaptureOutcome::Rejected) => {
                    println!("[{}] rejected: processing queue full", shot + 1);
                }
                Some(CaptureOutcome::Failed {
                    error,
                    timestamp_ns,
                }) => {
                    println!("[{}] failed: {} (ts={:?})", shot + 1, error, timestamp_ns);
                }
                None => break,
            }
        }

        drop(channels);
        let _ = pipeline.await;
        println!("Acked {} of {} delivered frames", capture.acked_frames(), capture.delivered_frames());
        Ok(())
    })
}

/// Print the exposure plan for a scene without capturing anything
pub fn print_plan(iso: u32, exposure_time_ns: u64) -> Result<(), Box<dyn std::error::Error>> {
    let iso_range = 50..=1600;
    let time_range = 1_000..=500_000_000;
    let plan = calculate_exposure(iso, exposure_time_ns, &iso_range, &time_range);

    println!("Scene: ISO {}, {} ns", iso, exposure_time_ns);
    println!(
        "Plan:  ISO {}, {} ns, digital gain {:.2}x ({:+.1} EV)",
        plan.iso,
        plan.exposure_time_ns,
        plan.digital_gain,
        -(plan.digital_gain as f64).log2(),
    );
    Ok(())
}

/// Watch the closed-loop controller converge against the synthetic scene
pub fn run_meter(samples: usize) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        // The meter loop never dispatches, so nothing reads the events
        let (events_tx, _events_rx) = mpsc::channel(CAPTURE_EVENT_QUEUE_CAPACITY);
        let capture = SyntheticCapture::new(synthetic_descriptor(), events_tx);

        let mut controller = ExposureController::default();
        let (iso_range, time_range) = capture.exposure_limits();

        let stream = Arc::clone(&capture).luma_stream(Duration::from_millis(33));
        pin_mut!(stream);

        let mut taken = 0usize;
        while let Some(luma) = stream.next().await {
            let (iso, time_ns) = capture.current_exposure();
            let smoothed = controller.update(luma, iso, time_ns, &iso_range, &time_range);
            capture.apply_exposure(&smoothed);
            println!(
                "luma {:6.1} -> ISO {:4}, {:9} ns, gain {:.2}x",
                luma, smoothed.iso, smoothed.exposure_time_ns, smoothed.digital_gain
            );
            taken += 1;
            if taken >= samples {
                break;
            }
        }
        Ok(())
    })
}
