//! The capture task: owns the audio engine, sliding analyzer, delay
//! controller, and generator for one running capture. Runs as a
//! cooperative tokio task; the cpal streams it holds are the only thing
//! touching the real-time audio-driver context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use probe_audio::{AudioEngine, AudioEngineConfig};
use probe_core::{AgentMessage, CaptureConfig, GeneratorConfig, ProbeError};
use probe_dsp::{DelayController, SignalGenerator};

use crate::analyzer::SlidingAnalyzer;

/// Frame emission rate limit (20 fps, independent of the analysis hop rate).
const TARGET_FPS_INTERVAL: Duration = Duration::from_millis(50);
/// Backoff when the ring has nothing new, so the loop yields instead of
/// spinning the cooperative scheduler hot.
const POLL_IDLE_SLEEP: Duration = Duration::from_millis(1);
/// How often the cooperative context samples the pool's drop/allocation
/// counters for logging. Pool misses and ring drops are never surfaced as
/// `error` messages (they aren't user-actionable); this is the only place
/// they're observed at all.
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Control messages forwarded from the session's message loop into a
/// running capture task. Delay-mode changes affect the next hop only:
/// applied once per loop iteration, before the next `ingest`.
pub enum ControlMsg {
    DelayFreeze { enable: bool, applied_ms: Option<f64> },
    SetManualDelay { delay_ms: Option<f64> },
    UpdateGenerator { config: GeneratorConfig },
}

pub struct CaptureHandle {
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    task: JoinHandle<()>,
}

impl CaptureHandle {
    pub fn send(&self, msg: ControlMsg) {
        let _ = self.control_tx.send(msg);
    }

    /// Cancel the capture task and await its shutdown. Dropping the task's
    /// `AudioEngine` stops both cpal streams and releases the pool.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }

    /// Resolves when the capture task ends on its own (a fatal device error
    /// mid-capture), as opposed to being cancelled via [`stop`](Self::stop).
    /// The session controller selects on this to notice a capture it never
    /// asked to end and fall back to `Idle`.
    pub async fn wait_ended(&mut self) {
        let _ = (&mut self.task).await;
    }
}

/// Validate the device/config and spin up the audio engine, then spawn the
/// hop-driven analysis loop. `out_tx` is the session's single outbound
/// queue: frames and the final implicit cleanup both funnel through it.
pub fn spawn(config: CaptureConfig, out_tx: mpsc::UnboundedSender<AgentMessage>) -> Result<CaptureHandle, ProbeError> {
    let (control_tx, control_rx) = mpsc::unbounded_channel();

    let input_device = probe_audio::get_device_by_id(&config.device_id).map_err(ProbeError::from)?;

    let needed_channels = config.ref_chan.max(config.meas_chan).max(1);

    let generator_enabled = config.generator.as_ref().is_some_and(|g| g.enabled);
    let generator = config
        .generator
        .clone()
        .filter(|_| generator_enabled)
        .map(|g| Arc::new(Mutex::new(SignalGenerator::new(g, config.sample_rate as f64))));

    let output_device = if generator.is_some() {
        Some(probe_audio::get_default_output_device().map_err(ProbeError::from)?)
    } else {
        None
    };

    let (pool_producer, pool_consumer) = probe_audio::buffer_pool(config.block_size, needed_channels as usize);

    let engine_config = AudioEngineConfig {
        sample_rate: config.sample_rate,
        block_size: config.block_size,
        channels: needed_channels,
        ref_chan: config.ref_chan,
        use_loopback: config.use_loopback,
    };

    let fault_flag = Arc::new(AtomicBool::new(false));

    let engine = AudioEngine::start(
        &input_device,
        output_device.as_ref(),
        engine_config,
        generator.clone(),
        pool_producer,
        Arc::clone(&fault_flag),
    )
    .map_err(ProbeError::from)?;
    engine.play().map_err(ProbeError::from)?;

    let buffer_len = config.analysis_buffer_len();
    let hop = config.hop();

    let task = tokio::spawn(run_loop(
        config,
        engine,
        pool_consumer,
        generator,
        control_rx,
        out_tx,
        buffer_len,
        hop,
        fault_flag,
    ));

    Ok(CaptureHandle { control_tx, task })
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    config: CaptureConfig,
    engine: AudioEngine,
    mut pool_consumer: probe_audio::PoolConsumer,
    generator: Option<Arc<Mutex<SignalGenerator>>>,
    mut control_rx: mpsc::UnboundedReceiver<ControlMsg>,
    out_tx: mpsc::UnboundedSender<AgentMessage>,
    buffer_len: usize,
    hop: usize,
    fault_flag: Arc<AtomicBool>,
) {
    // Keeping the engine alive for the task's lifetime is what keeps both
    // cpal streams running; dropping it (task end or abort) stops them.
    let _engine = engine;

    let mut analyzer = SlidingAnalyzer::new(buffer_len, hop);
    let mut delay_ctl = DelayController::default();
    let mut last_emit = Instant::now() - TARGET_FPS_INTERVAL;
    let mut last_stats_log = Instant::now();
    let mut last_dropped = 0usize;
    let ref_idx = config.ref_chan.saturating_sub(1) as usize;
    let meas_idx = config.meas_chan.saturating_sub(1) as usize;

    loop {
        if fault_flag.load(Ordering::Relaxed) {
            log::error!("device error mid-capture, ending capture task");
            let _ = out_tx.send(AgentMessage::error_with_code("audio stream failed", "device"));
            return;
        }

        while let Ok(msg) = control_rx.try_recv() {
            apply_control(msg, &mut delay_ctl, generator.as_ref());
        }

        if last_stats_log.elapsed() >= STATS_LOG_INTERVAL {
            last_stats_log = Instant::now();
            let dropped = pool_consumer.stats().dropped();
            if dropped > last_dropped {
                log::warn!("pool/ring dropped {} buffer(s) since last sample", dropped - last_dropped);
                last_dropped = dropped;
            }
        }

        let Some(block) = pool_consumer.try_recv() else {
            tokio::time::sleep(POLL_IDLE_SLEEP).await;
            continue;
        };

        let ref_col: Vec<f64> = block.channel(ref_idx).iter().map(|&s| s as f64).collect();
        let meas_col: Vec<f64> = block.channel(meas_idx).iter().map(|&s| s as f64).collect();
        pool_consumer.release(block);

        if !analyzer.ingest(&ref_col, &meas_col) {
            continue;
        }

        let (x, y) = analyzer.buffers();
        let out = probe_dsp::compute(
            x,
            y,
            config.sample_rate as f64,
            config.nfft,
            config.window,
            config.max_delay_ms,
            &mut delay_ctl,
        );

        if last_emit.elapsed() < TARGET_FPS_INTERVAL {
            continue;
        }
        last_emit = Instant::now();

        let frame = AgentMessage::Frame {
            tf: out.tf,
            spl: out.spl,
            delay_ms: out.delay_ms,
            applied_delay_ms: out.applied_delay_ms,
            delay_mode: delay_ctl.mode(),
            latency_ms: config.block_size as f64 / config.sample_rate as f64 * 1000.0,
            sample_rate: config.sample_rate,
            ts: now_ms(),
        };
        if out_tx.send(frame).is_err() {
            return;
        }
    }
}

fn apply_control(msg: ControlMsg, delay_ctl: &mut DelayController, generator: Option<&Arc<Mutex<SignalGenerator>>>) {
    match msg {
        ControlMsg::DelayFreeze { enable, applied_ms } => {
            if enable {
                delay_ctl.freeze(applied_ms);
            } else {
                delay_ctl.set_auto();
            }
        }
        ControlMsg::SetManualDelay { delay_ms } => delay_ctl.set_manual(delay_ms),
        ControlMsg::UpdateGenerator { config } => {
            if let Some(gen) = generator {
                gen.lock().update_config(config);
            }
        }
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}
