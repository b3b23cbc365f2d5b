//! Audio sink that plays nothing but keeps real time
//!
//! [`NullSampler`] stands in for an audio device: each write blocks for the
//! duration of the PCM it receives, divided by the playback speed, so it
//! acts as the reference clock exactly like a device would.

use super::Sampler;
use crate::decoder::AudioFormat;
use crate::utils::error::{CCPlayerError, Result};
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Reported output latency
const NULL_SAMPLER_LATENCY_US: i64 = 20_000;

/// Observable state of a [`NullSampler`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NullSamplerProbe {
    pub started: bool,

    pub closed: bool,

    pub volume: f32,

    pub muted: bool,

    pub playback_speed: f64,

    /// Total PCM bytes accepted
    pub bytes_written: u64,

    pub flushes: u64,

    pub drains: u64,
}

/// Silent, optionally real-time audio sink
pub struct NullSampler {
    format: AudioFormat,

    /// Sleep for the duration of each write
    realtime: bool,

    state: Arc<Mutex<NullSamplerProbe>>,
}

impl NullSampler {
    /// Create a sampler for the given format
    ///
    /// # Arguments
    ///
    /// * `format` - PCM format of incoming writes
    /// * `realtime` - Whether writes block for the audio duration
    pub fn new(format: AudioFormat, realtime: bool) -> Result<Self> {
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(CCPlayerError::construction_error(format!(
                "Unsupported audio format: {} Hz, {} channels",
                format.sample_rate, format.channels
            )));
        }

        Ok(Self {
            format,
            realtime,
            state: Arc::new(Mutex::new(NullSamplerProbe {
                volume: 1.0,
                playback_speed: 1.0,
                ..Default::default()
            })),
        })
    }

    /// Shared view of the sampler state, valid after the sampler moves
    pub fn probe(&self) -> Arc<Mutex<NullSamplerProbe>> {
        Arc::clone(&self.state)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.lock().closed {
            return Err(CCPlayerError::Closed("Sampler"));
        }
        Ok(())
    }
}

impl Sampler for NullSampler {
    fn start(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state.lock().started = true;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;

        let speed = {
            let mut state = self.state.lock();
            state.bytes_written += bytes.len() as u64;
            state.playback_speed
        };

        if self.realtime {
            let micros = bytes.len() as f64 * 1_000_000.0
                / self.format.bytes_per_second() as f64
                / speed;
            std::thread::sleep(Duration::from_micros(micros as u64));
        }
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.ensure_open()?;
        if !(0.0..=1.0).contains(&volume) {
            return Err(CCPlayerError::InvalidArgument(format!(
                "Volume must be within 0.0..=1.0, got {}",
                volume
            )));
        }
        self.state.lock().volume = volume;
        Ok(())
    }

    fn set_muted(&mut self, muted: bool) -> Result<()> {
        self.ensure_open()?;
        self.state.lock().muted = muted;
        Ok(())
    }

    fn set_playback_speed(&mut self, factor: f64) -> Result<()> {
        self.ensure_open()?;
        if !(factor > 0.0) {
            return Err(CCPlayerError::InvalidArgument(format!(
                "Playback speed must be positive, got {}",
                factor
            )));
        }
        self.state.lock().playback_speed = factor;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state.lock().started = false;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state.lock().flushes += 1;
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state.lock().drains += 1;
        if self.realtime {
            std::thread::sleep(Duration::from_micros(NULL_SAMPLER_LATENCY_US as u64));
        }
        Ok(())
    }

    fn latency_micros(&self) -> i64 {
        NULL_SAMPLER_LATENCY_US
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(CCPlayerError::Closed("Sampler"));
        }
        debug!("Closing null sampler after {} bytes", state.bytes_written);
        state.closed = true;
        state.started = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn format() -> AudioFormat {
        AudioFormat {
            sample_rate: 8_000,
            channels: 1,
        }
    }

    #[test]
    fn test_null_sampler_rejects_empty_format() {
        let result = NullSampler::new(AudioFormat { sample_rate: 0, channels: 2 }, false);
        assert!(matches!(result, Err(CCPlayerError::Construction(_))));
    }

    #[test]
    fn test_null_sampler_tracks_settings() {
        let mut sampler = NullSampler::new(format(), false).unwrap();
        let probe = sampler.probe();

        sampler.start().unwrap();
        sampler.set_volume(0.25).unwrap();
        sampler.set_muted(true).unwrap();
        sampler.set_playback_speed(1.5).unwrap();
        sampler.write(&[0; 16]).unwrap();

        let state = probe.lock().clone();
        assert!(state.started);
        assert_eq!(state.volume, 0.25);
        assert!(state.muted);
        assert_eq!(state.playback_speed, 1.5);
        assert_eq!(state.bytes_written, 16);

        assert!(sampler.set_volume(1.5).is_err());
        assert!(sampler.set_playback_speed(0.0).is_err());
    }

    #[test]
    fn test_null_sampler_realtime_write_blocks() {
        let mut sampler = NullSampler::new(format(), true).unwrap();
        sampler.start().unwrap();

        // 8 kHz mono 16-bit: 1600 bytes is 100 ms, 50 ms at double speed.
        sampler.set_playback_speed(2.0).unwrap();
        let started = Instant::now();
        sampler.write(&[0; 1600]).unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(50), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(100), "elapsed {:?}", elapsed);
    }

    #[test]
    fn test_null_sampler_close_once() {
        let mut sampler = NullSampler::new(format(), false).unwrap();
        sampler.close().unwrap();
        assert!(matches!(sampler.close(), Err(CCPlayerError::Closed("Sampler"))));
        assert!(sampler.write(&[0; 2]).is_err());
    }
}
