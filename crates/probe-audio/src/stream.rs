//! Audio Engine (C3): input capture, optional synchronized duplex with the
//! signal generator, and loopback substitution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfig};
use parking_lot::Mutex;

use probe_core::{AudioBlock, Sample};
use probe_dsp::SignalGenerator;

use crate::pool::PoolProducer;
use crate::{AudioError, AudioResult};

pub struct AudioEngineConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub channels: u16,
    /// 1-based reference channel index, substituted with the generator's
    /// signal when `use_loopback` is set.
    pub ref_chan: u16,
    pub use_loopback: bool,
}

/// Owns the live cpal streams; dropping it stops capture.
pub struct AudioEngine {
    _input_stream: Stream,
    _output_stream: Option<Stream>,
}

impl AudioEngine {
    /// Start input capture, and, when `output_device` + `generator` are both
    /// given, a synchronized output stream feeding the test signal.
    ///
    /// `fault_flag` is set by either stream's error callback; the cooperative
    /// context polls it to notice a fatal device failure it cannot otherwise
    /// observe (the callback itself never surfaces errors directly, per the
    /// propagation policy in the error design).
    pub fn start(
        input_device: &Device,
        output_device: Option<&Device>,
        config: AudioEngineConfig,
        generator: Option<Arc<Mutex<SignalGenerator>>>,
        pool: PoolProducer,
        fault_flag: Arc<AtomicBool>,
    ) -> AudioResult<Self> {
        // Shared single-slot handoff for the generator's reference channel;
        // read by the input callback, written by the output callback. Both
        // sides only ever try_lock so the audio-driver threads never wait.
        let loopback_slot: Arc<Mutex<Vec<Sample>>> = Arc::new(Mutex::new(vec![0.0; config.block_size]));

        let output_stream = match (output_device, generator) {
            (Some(out_dev), Some(gen)) => Some(build_output_stream(
                out_dev,
                config.sample_rate,
                config.channels,
                Arc::clone(&loopback_slot),
                gen,
                Arc::clone(&fault_flag),
            )?),
            _ => None,
        };

        let input_stream = build_input_stream(input_device, &config, loopback_slot, pool, fault_flag)?;

        Ok(Self {
            _input_stream: input_stream,
            _output_stream: output_stream,
        })
    }

    pub fn play(&self) -> AudioResult<()> {
        self._input_stream.play().map_err(|e| AudioError::StreamError(e.to_string()))?;
        if let Some(ref s) = self._output_stream {
            s.play().map_err(|e| AudioError::StreamError(e.to_string()))?;
        }
        Ok(())
    }

    pub fn pause(&self) -> AudioResult<()> {
        self._input_stream.pause().map_err(|e| AudioError::StreamError(e.to_string()))?;
        if let Some(ref s) = self._output_stream {
            s.pause().map_err(|e| AudioError::StreamError(e.to_string()))?;
        }
        Ok(())
    }
}

fn stream_config(device: &Device, sample_rate: u32, channels: u16, is_input: bool) -> AudioResult<SupportedStreamConfig> {
    let target_rate = cpal::SampleRate(sample_rate);
    let configs = if is_input {
        device.supported_input_configs()
    } else {
        device.supported_output_configs()
    }
    .map_err(|e| AudioError::ConfigError(e.to_string()))?;

    for supported in configs {
        if supported.channels() >= channels
            && supported.min_sample_rate() <= target_rate
            && supported.max_sample_rate() >= target_rate
            && supported.sample_format() == SampleFormat::F32
        {
            return Ok(supported.with_sample_rate(target_rate));
        }
    }

    Err(AudioError::ConfigError(format!(
        "no matching {} config for {channels} channels @ {sample_rate}Hz",
        if is_input { "input" } else { "output" }
    )))
}

fn build_output_stream(
    device: &Device,
    sample_rate: u32,
    channels: u16,
    loopback_slot: Arc<Mutex<Vec<Sample>>>,
    generator: Arc<Mutex<SignalGenerator>>,
    fault_flag: Arc<AtomicBool>,
) -> AudioResult<Stream> {
    let supported = stream_config(device, sample_rate, channels, false)?;
    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: CpalBufferSize::Default,
    };
    let n_ch = supported.channels() as usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                data.fill(0.0);
                let frames = data.len() / n_ch.max(1);
                // A control message only ever replaces the config the
                // cooperative context holds the lock briefly for; the
                // callback only ever `try_lock`s so it never waits on it.
                let Some(mut gen) = generator.try_lock() else { return };
                let signal = gen.generate(frames);
                let routed = gen.route(&signal, n_ch.max(1));
                for (ch, column) in routed.iter().enumerate() {
                    for (f, &s) in column.iter().enumerate() {
                        let idx = f * n_ch + ch;
                        if idx < data.len() {
                            data[idx] = s as f32;
                        }
                    }
                }
                if let Some(mut slot) = loopback_slot.try_lock() {
                    slot.clear();
                    slot.extend(signal.iter().map(|&v| v as Sample));
                }
            },
            move |err| {
                log::error!("output stream error: {err}");
                fault_flag.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    Ok(stream)
}

fn build_input_stream(
    device: &Device,
    config: &AudioEngineConfig,
    loopback_slot: Arc<Mutex<Vec<Sample>>>,
    mut pool: PoolProducer,
    fault_flag: Arc<AtomicBool>,
) -> AudioResult<Stream> {
    let supported = stream_config(device, config.sample_rate, config.channels, true)?;
    let stream_config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: CpalBufferSize::Default,
    };
    let n_ch = supported.channels() as usize;
    let use_loopback = config.use_loopback;
    let ref_chan = config.ref_chan as usize;

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let frames = data.len() / n_ch.max(1);
                let Some(mut block) = pool.acquire() else {
                    return;
                };
                block.resize(frames, n_ch.max(1));
                block.copy_from_interleaved(data);

                if use_loopback && ref_chan >= 1 && ref_chan <= n_ch {
                    if let Some(slot) = loopback_slot.try_lock() {
                        if slot.len() >= frames {
                            block.set_channel(ref_chan - 1, &slot[..frames]);
                        }
                    }
                }

                pool.publish(block);
            },
            move |err| {
                log::error!("input stream error: {err}");
                fault_flag.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    Ok(stream)
}
