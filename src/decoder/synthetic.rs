//! Synthetic test-pattern backend
//!
//! Decodes `synthetic://` locations into deterministic frames: a 440 Hz
//! tone in 20 ms PCM chunks for audio and solid RGBA pictures whose color
//! follows the frame index for video. Stream layout, timing and failures
//! are controlled through query parameters:
//!
//! | key        | meaning                                        | default    |
//! |------------|------------------------------------------------|------------|
//! | `duration` | media duration in microseconds                 | 10000000   |
//! | `fps`      | video frame rate                               | 25         |
//! | `width`    | video width                                    | 64         |
//! | `height`   | video height                                   | 36         |
//! | `rate`     | audio sample rate                              | 48000      |
//! | `channels` | audio channel count                            | 2          |
//! | `audio`    | include an audio stream                        | true       |
//! | `video`    | include a video stream                         | true       |
//! | `keyframe` | keyframe interval in microseconds              | 1000000    |
//! | `fail_at`  | decode error at the first frame at or after it | none       |
//! | `fail`     | construction failure: `probe`, `audio`, `video`| none       |
//! | `hw`       | comma-separated supported acceleration methods | none       |
//!
//! A `rate` of 0 makes sampler construction fail.

use super::{
    select_hardware_acceleration, AudioFormat, AudioFrame, Backend, Decoder, Frame,
    HardwareAcceleration, Media, Timestamp, VideoFormat, VideoFrame,
};
use crate::audio::{NullSampler, NullSamplerProbe, Sampler};
use crate::pipeline::PoolBuffer;
use crate::utils::error::{CCPlayerError, Result};
use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Location prefix handled by [`SyntheticBackend`]
pub const SCHEME: &str = "synthetic://";

/// Length of one audio chunk
const AUDIO_CHUNK_US: i64 = 20_000;

const TONE_HZ: f64 = 440.0;

/// Construction step that should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    Probe,
    AudioDecoder,
    VideoDecoder,
}

/// Parameters decoded from a `synthetic://` location
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSource {
    pub duration: Timestamp,

    pub frame_rate: f64,

    pub width: u32,

    pub height: u32,

    pub sample_rate: u32,

    pub channels: u32,

    pub audio: bool,

    pub video: bool,

    pub keyframe_interval: Timestamp,

    /// Decode failure injected at this timestamp
    pub fail_at: Option<Timestamp>,

    pub fail: Option<FailurePoint>,

    /// Acceleration methods the synthetic video decoder accepts
    pub hardware_acceleration: Vec<HardwareAcceleration>,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self {
            duration: Timestamp::from_micros(10_000_000),
            frame_rate: 25.0,
            width: 64,
            height: 36,
            sample_rate: 48_000,
            channels: 2,
            audio: true,
            video: true,
            keyframe_interval: Timestamp::from_micros(1_000_000),
            fail_at: None,
            fail: None,
            hardware_acceleration: Vec::new(),
        }
    }
}

impl SyntheticSource {
    /// Parse a `synthetic://` location
    pub fn parse(location: &str) -> Result<Self> {
        let rest = location.strip_prefix(SCHEME).ok_or_else(|| {
            CCPlayerError::InvalidArgument(format!("Not a synthetic location: {}", location))
        })?;

        let mut source = SyntheticSource::default();
        let query = match rest.split_once('?') {
            Some((_, query)) => query,
            None => "",
        };

        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "duration" => source.duration = Timestamp::from_micros(parse_number(key, value)?),
                "fps" => source.frame_rate = parse_number(key, value)?,
                "width" => source.width = parse_number(key, value)?,
                "height" => source.height = parse_number(key, value)?,
                "rate" => source.sample_rate = parse_number(key, value)?,
                "channels" => source.channels = parse_number(key, value)?,
                "audio" => source.audio = parse_flag(key, value)?,
                "video" => source.video = parse_flag(key, value)?,
                "keyframe" => {
                    source.keyframe_interval = Timestamp::from_micros(parse_number(key, value)?)
                }
                "fail_at" => {
                    source.fail_at = Some(Timestamp::from_micros(parse_number(key, value)?))
                }
                "fail" => {
                    source.fail = Some(match value {
                        "probe" => FailurePoint::Probe,
                        "audio" => FailurePoint::AudioDecoder,
                        "video" => FailurePoint::VideoDecoder,
                        _ => return Err(invalid(key, value)),
                    })
                }
                "hw" => {
                    source.hardware_acceleration = value
                        .split(',')
                        .filter(|name| !name.is_empty())
                        .map(str::parse)
                        .collect::<Result<Vec<_>>>()?
                }
                _ => {
                    return Err(CCPlayerError::InvalidArgument(format!(
                        "Unknown synthetic parameter: {}",
                        key
                    )))
                }
            }
        }

        if !source.audio && !source.video {
            return Err(CCPlayerError::decoder_error("Synthetic source has no streams"));
        }
        if source.video && !(source.frame_rate > 0.0) {
            return Err(invalid("fps", &source.frame_rate.to_string()));
        }
        if source.duration < Timestamp::ZERO {
            return Err(invalid("duration", &source.duration.micros().to_string()));
        }

        Ok(source)
    }

    fn should_fail(&self, timestamp: Timestamp) -> bool {
        self.fail_at.map(|at| timestamp >= at).unwrap_or(false)
    }
}

fn invalid(key: &str, value: &str) -> CCPlayerError {
    CCPlayerError::InvalidArgument(format!("Invalid synthetic parameter {}={}", key, value))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| invalid(key, value))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

/// Audio decoder producing a continuous tone
struct SyntheticAudioDecoder {
    media: Media,
    source: SyntheticSource,
    next_chunk: i64,
    closed: bool,
}

impl SyntheticAudioDecoder {
    fn chunk(&self, timestamp: Timestamp) -> Vec<u8> {
        let length = AUDIO_CHUNK_US.min(self.source.duration.micros() - timestamp.micros());
        let rate = self.source.sample_rate as i64;
        let first_sample = timestamp.micros() * rate / 1_000_000;
        let samples = length * rate / 1_000_000;
        let channels = self.source.channels as usize;

        let mut bytes = Vec::with_capacity(samples as usize * channels * 2);
        for n in 0..samples {
            let t = (first_sample + n) as f64 / rate as f64;
            let value =
                ((t * TONE_HZ * std::f64::consts::TAU).sin() * 0.1 * i16::MAX as f64) as i16;
            for _ in 0..channels {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        bytes
    }
}

impl Decoder for SyntheticAudioDecoder {
    fn media(&self) -> &Media {
        &self.media
    }

    fn next_frame(&mut self, _buffer: Option<PoolBuffer>) -> Result<Frame> {
        if self.closed {
            return Err(CCPlayerError::Closed("Decoder"));
        }

        let timestamp = Timestamp::from_micros(self.next_chunk * AUDIO_CHUNK_US);
        if timestamp >= self.source.duration {
            return Ok(Frame::EndOfStream);
        }
        if self.source.should_fail(timestamp) {
            return Err(CCPlayerError::decoder_error(format!(
                "Synthetic audio failure at {}",
                timestamp
            )));
        }

        self.next_chunk += 1;
        Ok(Frame::Audio(AudioFrame {
            bytes: self.chunk(timestamp),
            timestamp,
        }))
    }

    fn seek_to(&mut self, timestamp: Timestamp, _keyframes_only: bool) -> Result<Timestamp> {
        if self.closed {
            return Err(CCPlayerError::Closed("Decoder"));
        }

        let target = timestamp.micros().clamp(0, self.source.duration.micros());
        self.next_chunk = target / AUDIO_CHUNK_US;
        Ok(Timestamp::from_micros(self.next_chunk * AUDIO_CHUNK_US))
    }

    fn reset(&mut self) -> Result<()> {
        if self.closed {
            return Err(CCPlayerError::Closed("Decoder"));
        }
        self.next_chunk = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(CCPlayerError::Closed("Decoder"));
        }
        self.closed = true;
        Ok(())
    }
}

/// Video decoder painting one solid color per frame
struct SyntheticVideoDecoder {
    media: Media,
    source: SyntheticSource,
    format: VideoFormat,
    next_index: i64,
    closed: bool,
}

impl SyntheticVideoDecoder {
    fn frame_timestamp(&self, index: i64) -> Timestamp {
        Timestamp::from_micros((index as f64 * 1_000_000.0 / self.source.frame_rate).round() as i64)
    }

    /// Index of the first frame at or after `micros`
    fn index_at_or_after(&self, micros: i64) -> i64 {
        (micros as f64 * self.source.frame_rate / 1_000_000.0 - 1e-9).ceil().max(0.0) as i64
    }
}

impl Decoder for SyntheticVideoDecoder {
    fn media(&self) -> &Media {
        &self.media
    }

    fn next_frame(&mut self, buffer: Option<PoolBuffer>) -> Result<Frame> {
        if self.closed {
            return Err(CCPlayerError::Closed("Decoder"));
        }

        let timestamp = self.frame_timestamp(self.next_index);
        if timestamp >= self.source.duration {
            return Ok(Frame::EndOfStream);
        }
        if self.source.should_fail(timestamp) {
            return Err(CCPlayerError::decoder_error(format!(
                "Synthetic video failure at {}",
                timestamp
            )));
        }

        let mut buffer = buffer
            .ok_or_else(|| CCPlayerError::decoder_error("Video decoding requires a pool buffer"))?;
        let frame_size = self.format.frame_size();
        if buffer.len() < frame_size {
            return Err(CCPlayerError::decoder_error(format!(
                "Pool buffer of {} bytes cannot hold a {} byte frame",
                buffer.len(),
                frame_size
            )));
        }

        let shade = (self.next_index % 256) as u8;
        for pixel in buffer.as_mut_slice()[..frame_size].chunks_exact_mut(4) {
            pixel.copy_from_slice(&[shade, 255 - shade, shade / 2, 255]);
        }

        self.next_index += 1;
        Ok(Frame::Video(VideoFrame {
            buffer,
            timestamp,
            width: self.format.width,
            height: self.format.height,
        }))
    }

    fn seek_to(&mut self, timestamp: Timestamp, keyframes_only: bool) -> Result<Timestamp> {
        if self.closed {
            return Err(CCPlayerError::Closed("Decoder"));
        }

        let mut target = timestamp.micros().clamp(0, self.source.duration.micros());
        let interval = self.source.keyframe_interval.micros();
        if keyframes_only && interval > 0 {
            target -= target % interval;
        }

        self.next_index = self.index_at_or_after(target);
        Ok(self.frame_timestamp(self.next_index).min(self.source.duration))
    }

    fn reset(&mut self) -> Result<()> {
        if self.closed {
            return Err(CCPlayerError::Closed("Decoder"));
        }
        self.next_index = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(CCPlayerError::Closed("Decoder"));
        }
        self.closed = true;
        Ok(())
    }
}

/// Backend serving `synthetic://` locations
pub struct SyntheticBackend {
    /// Whether samplers block for the duration of the audio they receive
    realtime: bool,

    next_id: AtomicU64,

    samplers: Mutex<Vec<Arc<Mutex<NullSamplerProbe>>>>,
}

impl SyntheticBackend {
    /// Create a backend whose samplers play in real time
    pub fn new() -> Self {
        Self::with_realtime(true)
    }

    /// Create a backend, choosing whether samplers pace playback
    pub fn with_realtime(realtime: bool) -> Self {
        Self {
            realtime,
            next_id: AtomicU64::new(1),
            samplers: Mutex::new(Vec::new()),
        }
    }

    /// State of the most recently created sampler
    pub fn last_sampler(&self) -> Option<NullSamplerProbe> {
        self.samplers.lock().last().map(|probe| probe.lock().clone())
    }

    fn source_for(media: &Media) -> Result<SyntheticSource> {
        SyntheticSource::parse(&media.location)
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for SyntheticBackend {
    fn probe(
        &self,
        location: &str,
        hardware_acceleration: &[HardwareAcceleration],
    ) -> Result<Media> {
        let source = SyntheticSource::parse(location)?;
        if source.fail == Some(FailurePoint::Probe) {
            return Err(CCPlayerError::decoder_error(format!(
                "Unable to probe {}",
                location
            )));
        }

        let media = Media {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            location: location.to_string(),
            duration: source.duration,
            audio_format: source.audio.then(|| AudioFormat {
                sample_rate: source.sample_rate,
                channels: source.channels,
            }),
            video_format: source.video.then(|| VideoFormat {
                width: source.width,
                height: source.height,
                frame_rate: source.frame_rate,
                hardware_acceleration: select_hardware_acceleration(
                    hardware_acceleration,
                    &source.hardware_acceleration,
                ),
            }),
        };

        debug!("Probed synthetic media {:?}", media);
        Ok(media)
    }

    fn create_audio_decoder(&self, media: &Media) -> Result<Box<dyn Decoder>> {
        let source = Self::source_for(media)?;
        if source.fail == Some(FailurePoint::AudioDecoder) || media.audio_format.is_none() {
            return Err(CCPlayerError::construction_error(format!(
                "Unable to open audio decoder for {}",
                media.location
            )));
        }

        Ok(Box::new(SyntheticAudioDecoder {
            media: media.clone(),
            source,
            next_chunk: 0,
            closed: false,
        }))
    }

    fn create_video_decoder(&self, media: &Media) -> Result<Box<dyn Decoder>> {
        let source = Self::source_for(media)?;
        let format = match media.video_format {
            Some(format) if source.fail != Some(FailurePoint::VideoDecoder) => format,
            _ => {
                return Err(CCPlayerError::construction_error(format!(
                    "Unable to open video decoder for {}",
                    media.location
                )))
            }
        };

        Ok(Box::new(SyntheticVideoDecoder {
            media: media.clone(),
            source,
            format,
            next_index: 0,
            closed: false,
        }))
    }

    fn create_sampler(&self, format: &AudioFormat) -> Result<Box<dyn Sampler>> {
        let sampler = NullSampler::new(*format, self.realtime)?;
        self.samplers.lock().push(sampler.probe());
        Ok(Box::new(sampler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pool;

    fn probe(location: &str) -> Media {
        SyntheticBackend::with_realtime(false)
            .probe(location, &[])
            .unwrap()
    }

    #[test]
    fn test_parse_defaults_and_overrides() {
        let source = SyntheticSource::parse("synthetic://clip").unwrap();
        assert_eq!(source, SyntheticSource::default());

        let source = SyntheticSource::parse(
            "synthetic://clip?duration=2000000&fps=30&audio=0&hw=vaapi,cuda&fail_at=500000",
        )
        .unwrap();
        assert_eq!(source.duration, Timestamp::from_micros(2_000_000));
        assert_eq!(source.frame_rate, 30.0);
        assert!(!source.audio);
        assert_eq!(
            source.hardware_acceleration,
            vec![HardwareAcceleration::Vaapi, HardwareAcceleration::Cuda]
        );
        assert_eq!(source.fail_at, Some(Timestamp::from_micros(500_000)));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(SyntheticSource::parse("file:///clip.mp4").is_err());
        assert!(SyntheticSource::parse("synthetic://clip?bogus=1").is_err());
        assert!(SyntheticSource::parse("synthetic://clip?fps=abc").is_err());
        assert!(SyntheticSource::parse("synthetic://clip?audio=0&video=0").is_err());
        assert!(SyntheticSource::parse("synthetic://clip?fps=0").is_err());
    }

    #[test]
    fn test_probe_selects_hardware_acceleration() {
        let backend = SyntheticBackend::with_realtime(false);
        let media = backend
            .probe(
                "synthetic://clip?hw=vaapi",
                &[HardwareAcceleration::Cuda, HardwareAcceleration::Vaapi],
            )
            .unwrap();
        assert_eq!(
            media.video_format.map(|f| f.hardware_acceleration),
            Some(HardwareAcceleration::Vaapi)
        );
        assert!(media.is_continuous());

        assert!(backend.probe("synthetic://clip?fail=probe", &[]).is_err());
    }

    #[test]
    fn test_audio_decoder_covers_duration() {
        let media = probe("synthetic://clip?duration=100000&video=0&rate=8000&channels=1");
        let backend = SyntheticBackend::with_realtime(false);
        let mut decoder = backend.create_audio_decoder(&media).unwrap();

        let mut timestamps = Vec::new();
        loop {
            match decoder.next_frame(None).unwrap() {
                Frame::Audio(frame) => {
                    // 20 ms of 8 kHz mono 16-bit PCM
                    assert_eq!(frame.bytes.len(), 320);
                    timestamps.push(frame.timestamp.micros());
                }
                Frame::EndOfStream => break,
                Frame::Video(_) => panic!("audio decoder produced video"),
            }
        }
        assert_eq!(timestamps, vec![0, 20_000, 40_000, 60_000, 80_000]);
        assert!(decoder.next_frame(None).unwrap().is_end_of_stream());
    }

    #[test]
    fn test_video_decoder_writes_into_pool_buffer() {
        let media = probe("synthetic://clip?duration=100000&audio=0&width=4&height=2&fps=25");
        let format = media.video_format.unwrap();
        let backend = SyntheticBackend::with_realtime(false);
        let mut decoder = backend.create_video_decoder(&media).unwrap();
        let pool = Pool::new(2, format.frame_size()).unwrap();

        assert!(decoder.next_frame(None).is_err());

        let mut timestamps = Vec::new();
        loop {
            let buffer = pool.try_acquire().unwrap().unwrap();
            match decoder.next_frame(Some(buffer)).unwrap() {
                Frame::Video(frame) => {
                    assert_eq!((frame.width, frame.height), (4, 2));
                    assert_eq!(frame.buffer.as_slice()[3], 255);
                    timestamps.push(frame.timestamp.micros());
                }
                Frame::EndOfStream => break,
                Frame::Audio(_) => panic!("video decoder produced audio"),
            }
        }
        assert_eq!(timestamps, vec![0, 40_000, 80_000]);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_video_seek_respects_keyframes() {
        let media = probe("synthetic://clip?audio=0&fps=25&keyframe=1000000");
        let backend = SyntheticBackend::with_realtime(false);
        let mut decoder = backend.create_video_decoder(&media).unwrap();

        let reached = decoder.seek_to(Timestamp::from_micros(5_500_000), true).unwrap();
        assert_eq!(reached, Timestamp::from_micros(5_000_000));

        let reached = decoder.seek_to(Timestamp::from_micros(5_510_000), false).unwrap();
        assert_eq!(reached, Timestamp::from_micros(5_520_000));

        let reached = decoder.seek_to(Timestamp::from_micros(99_000_000), false).unwrap();
        assert_eq!(reached, Timestamp::from_micros(10_000_000));

        decoder.reset().unwrap();
        decoder.close().unwrap();
        assert!(matches!(decoder.close(), Err(CCPlayerError::Closed("Decoder"))));
    }

    #[test]
    fn test_injected_failures() {
        let backend = SyntheticBackend::with_realtime(false);

        let media = probe("synthetic://clip?fail=video");
        assert!(backend.create_audio_decoder(&media).is_ok());
        assert!(matches!(
            backend.create_video_decoder(&media),
            Err(CCPlayerError::Construction(_))
        ));

        let media = probe("synthetic://clip?video=0&fail_at=40000");
        let mut decoder = backend.create_audio_decoder(&media).unwrap();
        assert!(decoder.next_frame(None).is_ok());
        assert!(decoder.next_frame(None).is_ok());
        assert!(matches!(decoder.next_frame(None), Err(CCPlayerError::Decoder(_))));

        assert!(backend
            .create_sampler(&AudioFormat { sample_rate: 0, channels: 2 })
            .is_err());
        assert!(backend.last_sampler().is_none());
    }
}
