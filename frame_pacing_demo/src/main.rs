//! Frame pacing demo
//!
//! Drives a headless graphics context through a burst of frames while the simulated
//! GPU trails the CPU, then reports how often the frame ring made the host wait and
//! what the resolved GPU timestamps measured.
//!
//! Usage: `frame_pacing_demo [settings.toml | settings.ron]`

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gfx_core::config::ConfigError;
use gfx_core::graphics::TimestampHandle;
use gfx_core::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
enum DemoError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("graphics error: {0}")]
    Graphics(#[from] GraphicsError),
}

/// Demo settings, loadable from `.toml` or `.ron`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct DemoSettings {
    /// Frames to record
    frames: u64,
    /// Frames the simulated GPU runs behind before catching up, 0 keeps it idle
    gpu_lag: u64,
    /// Nanoseconds per simulated timestamp tick
    timestamp_period_ns: f64,
    /// Simulated ticks between two timestamps
    ticks_per_timestamp: u64,
    graphics: GraphicsConfig,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            frames: 240,
            gpu_lag: 3,
            timestamp_period_ns: 1.0,
            ticks_per_timestamp: 16_000,
            graphics: GraphicsConfig {
                application_name: "frame_pacing_demo".to_string(),
                ..GraphicsConfig::default()
            },
        }
    }
}

impl Config for DemoSettings {}

#[derive(Debug, Default)]
struct PacingReport {
    frames: u64,
    stalls: usize,
    cpu_time: Duration,
    gpu_times_ns: Vec<u64>,
    expired_timestamps: usize,
    soft_failures: u64,
}

impl PacingReport {
    fn log(&self) {
        log::info!("Frames recorded: {}", self.frames);
        log::info!("Host stalls on frame fences: {}", self.stalls);

        if self.frames > 0 {
            let average = self.cpu_time.as_secs_f64() * 1000.0 / self.frames as f64;
            log::info!("Average CPU frame time: {:.3} ms", average);
        }

        if self.gpu_times_ns.is_empty() {
            log::warn!("No GPU timestamps were resolved");
        } else {
            let total: u64 = self.gpu_times_ns.iter().sum();
            let min = self.gpu_times_ns.iter().min().copied().unwrap_or_default();
            let max = self.gpu_times_ns.iter().max().copied().unwrap_or_default();
            log::info!(
                "GPU frame time over {} frames: avg {} ns, min {} ns, max {} ns",
                self.gpu_times_ns.len(),
                total / self.gpu_times_ns.len() as u64,
                min,
                max
            );
        }

        if self.expired_timestamps > 0 {
            log::warn!("{} timestamp pairs expired before being read", self.expired_timestamps);
        }
        if self.soft_failures > 0 {
            log::warn!("{} soft failures were reported", self.soft_failures);
        }
    }
}

struct FramePacingApp {
    settings: DemoSettings,
}

impl FramePacingApp {
    fn new(settings: DemoSettings) -> Self {
        Self { settings }
    }

    fn run(&mut self) -> Result<PacingReport, DemoError> {
        let headless = HeadlessConfig {
            completion: CompletionMode::Deferred,
            timestamp_period_ns: self.settings.timestamp_period_ns,
            ticks_per_timestamp: self.settings.ticks_per_timestamp,
            ..HeadlessConfig::from_graphics_config(&self.settings.graphics)
        };
        let backend = Arc::new(HeadlessBackend::new(headless));
        let diagnostics = Arc::new(Diagnostics::new());
        let mut context = GraphicsContext::new(
            backend.clone(),
            self.settings.graphics.clone(),
            diagnostics.clone(),
        )?;

        let frame_count = context.frame_context_count();
        log::info!(
            "Frame ring holds {} contexts, GPU lags {} frames",
            frame_count,
            self.settings.gpu_lag
        );

        let mut report = PacingReport::default();
        let mut pending: VecDeque<(TimestampHandle, TimestampHandle)> = VecDeque::new();

        for frame in 0..self.settings.frames {
            let started = Instant::now();

            let mut commands = context.begin_graphics_command_list()?;
            let begin = commands.put_timestamp();
            let end = commands.put_timestamp();
            commands.end()?;

            if let (Some(begin), Some(end)) = (begin, end) {
                pending.push_back((begin, end));
            }

            context.end_frame()?;

            if self.settings.gpu_lag > 0 && (frame + 1) % self.settings.gpu_lag == 0 {
                backend.complete_pending();
            }

            report.cpu_time += started.elapsed();
            report.frames += 1;

            // Resolved values only live until the slot is reused
            while let Some(&(begin, end)) = pending.front() {
                match (context.resolved_timestamp(begin), context.resolved_timestamp(end)) {
                    (Some(begin_ns), Some(end_ns)) => {
                        report.gpu_times_ns.push(end_ns.saturating_sub(begin_ns));
                        pending.pop_front();
                    }
                    _ if begin.frame_id + u64::from(frame_count) < context.frame_id() => {
                        report.expired_timestamps += 1;
                        pending.pop_front();
                    }
                    _ => break,
                }
            }
        }

        context.wait_for_last_frame()?;

        report.stalls = backend.stall_count();
        report.soft_failures = diagnostics.failure_count();
        Ok(report)
    }
}

fn load_settings() -> Result<DemoSettings, DemoError> {
    match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading settings from {}", path);
            Ok(DemoSettings::load_from_file(path)?)
        }
        None => Ok(DemoSettings::default()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC occurred: {:?}", panic_info);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "Panic location: {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }
    }));

    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Starting frame pacing demo");

    let settings = load_settings()?;
    let mut app = FramePacingApp::new(settings);

    match app.run() {
        Ok(report) => {
            report.log();
            log::info!("Frame pacing demo completed successfully");
            Ok(())
        }
        Err(e) => {
            log::error!("Frame pacing demo failed: {:?}", e);
            Err(e.into())
        }
    }
}
