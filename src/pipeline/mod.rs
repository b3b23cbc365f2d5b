//! Pipeline module for CCPlayer
//!
//! A [`Pipeline`] owns every resource that lives for one prepared media:
//! decoders, per-stream frame buffers, the video buffer pool and the audio
//! sampler. It is assembled all-or-nothing and closed exactly once.

mod buffer;
mod pool;

pub use buffer::Buffer;
pub use pool::{Pool, PoolBuffer};

use crate::audio::Sampler;
use crate::decoder::{Backend, Decoder, Media, VideoFormat};
use crate::player::PlayerSettings;
use crate::utils::error::{CCPlayerError, Result};
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Decoder shared between the buffer loop and the executor
pub type SharedDecoder = Arc<Mutex<Box<dyn Decoder>>>;

/// Sampler shared between the playback loop and the executor
pub type SharedSampler = Arc<Mutex<Box<dyn Sampler>>>;

/// Buffer sizes requested by `prepare`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Capacity of the audio frame buffer
    pub audio_buffer_size: usize,

    /// Capacity of the video frame buffer
    pub video_buffer_size: usize,
}

/// Audio half of a pipeline
pub struct AudioStream {
    pub decoder: SharedDecoder,

    pub buffer: Buffer,

    pub sampler: SharedSampler,
}

/// Video half of a pipeline
pub struct VideoStream {
    pub decoder: SharedDecoder,

    pub pool: Pool,

    pub buffer: Buffer,

    pub format: VideoFormat,
}

/// Stream layout of a pipeline
pub enum Streams {
    Audio(AudioStream),
    Video(VideoStream),
    AudioVideo { audio: AudioStream, video: VideoStream },
}

/// Live resources for one prepared media
pub struct Pipeline {
    media: Media,
    streams: Streams,
    closed: AtomicBool,
}

/// Already constructed member, kept for rollback
enum Part {
    Decoder(SharedDecoder),
    Buffer(Buffer),
    Pool(Pool),
    Sampler(SharedSampler),
}

impl Part {
    fn close(self) -> Result<()> {
        match self {
            Part::Decoder(decoder) => decoder.lock().close(),
            Part::Buffer(buffer) => {
                buffer.close();
                Ok(())
            }
            Part::Pool(pool) => pool.close(),
            Part::Sampler(sampler) => sampler.lock().close(),
        }
    }
}

/// Members built so far, closed in reverse order on failure
#[derive(Default)]
struct Assembly {
    parts: Vec<Part>,
}

impl Assembly {
    fn decoder(&mut self, decoder: Box<dyn Decoder>) -> SharedDecoder {
        let decoder = Arc::new(Mutex::new(decoder));
        self.parts.push(Part::Decoder(Arc::clone(&decoder)));
        decoder
    }

    fn buffer(&mut self, buffer: Buffer) -> Buffer {
        self.parts.push(Part::Buffer(buffer.clone()));
        buffer
    }

    fn pool(&mut self, pool: Pool) -> Pool {
        self.parts.push(Part::Pool(pool.clone()));
        pool
    }

    fn sampler(&mut self, sampler: Box<dyn Sampler>) -> SharedSampler {
        let sampler = Arc::new(Mutex::new(sampler));
        self.parts.push(Part::Sampler(Arc::clone(&sampler)));
        sampler
    }

    fn rollback(self) {
        for part in self.parts.into_iter().rev() {
            if let Err(e) = part.close() {
                warn!("Failed to close pipeline member during rollback: {}", e);
            }
        }
    }
}

impl Pipeline {
    /// Build the pipeline for a probed media
    ///
    /// Blocking: decoders and samplers are opened synchronously.
    ///
    /// # Arguments
    ///
    /// * `backend` - Factory for decoders and samplers
    /// * `media` - Probed media
    /// * `options` - Buffer capacities, both must be positive
    /// * `settings` - Initial sampler volume, mute and speed
    ///
    /// # Returns
    ///
    /// The pipeline, or the first failure after every member built so far
    /// has been closed in reverse order
    pub fn assemble(
        backend: &dyn Backend,
        media: Media,
        options: PipelineOptions,
        settings: &PlayerSettings,
    ) -> Result<Self> {
        let mut assembly = Assembly::default();

        match Self::build(&mut assembly, backend, &media, options, settings) {
            Ok(streams) => {
                debug!("Assembled pipeline for {}", media.location);
                Ok(Self {
                    media,
                    streams,
                    closed: AtomicBool::new(false),
                })
            }
            Err(e) => {
                warn!("Pipeline assembly for {} failed: {}", media.location, e);
                assembly.rollback();
                Err(e)
            }
        }
    }

    fn build(
        assembly: &mut Assembly,
        backend: &dyn Backend,
        media: &Media,
        options: PipelineOptions,
        settings: &PlayerSettings,
    ) -> Result<Streams> {
        let audio = match media.audio_format {
            Some(format) => {
                let decoder = assembly.decoder(backend.create_audio_decoder(media)?);
                let buffer = assembly.buffer(Buffer::new(options.audio_buffer_size)?);
                let sampler = assembly.sampler(backend.create_sampler(&format)?);
                {
                    let mut sampler = sampler.lock();
                    sampler.set_volume(settings.volume)?;
                    sampler.set_muted(settings.is_muted)?;
                    sampler.set_playback_speed(settings.playback_speed_factor)?;
                }
                Some(AudioStream {
                    decoder,
                    buffer,
                    sampler,
                })
            }
            None => None,
        };

        let video = match media.video_format {
            Some(format) => {
                if options.video_buffer_size == 0 {
                    return Err(CCPlayerError::InvalidArgument(
                        "Buffer capacity must be positive".to_string(),
                    ));
                }
                // One extra slot covers the frame being presented.
                let pool = assembly.pool(
                    Pool::new(options.video_buffer_size + 1, format.frame_size())
                        .map_err(|e| CCPlayerError::construction_error(e.to_string()))?,
                );
                let decoder = assembly.decoder(backend.create_video_decoder(media)?);
                let buffer = assembly.buffer(Buffer::new(options.video_buffer_size)?);
                Some(VideoStream {
                    decoder,
                    pool,
                    buffer,
                    format,
                })
            }
            None => None,
        };

        match (audio, video) {
            (Some(audio), Some(video)) => Ok(Streams::AudioVideo { audio, video }),
            (Some(audio), None) => Ok(Streams::Audio(audio)),
            (None, Some(video)) => Ok(Streams::Video(video)),
            (None, None) => Err(CCPlayerError::construction_error(format!(
                "{} has no playable stream",
                media.location
            ))),
        }
    }

    pub fn media(&self) -> &Media {
        &self.media
    }

    pub fn streams(&self) -> &Streams {
        &self.streams
    }

    pub fn audio(&self) -> Option<&AudioStream> {
        match &self.streams {
            Streams::Audio(audio) | Streams::AudioVideo { audio, .. } => Some(audio),
            Streams::Video(_) => None,
        }
    }

    pub fn video(&self) -> Option<&VideoStream> {
        match &self.streams {
            Streams::Video(video) | Streams::AudioVideo { video, .. } => Some(video),
            Streams::Audio(_) => None,
        }
    }

    /// Frame buffers of all active streams
    pub fn buffers(&self) -> Vec<Buffer> {
        self.audio()
            .map(|audio| audio.buffer.clone())
            .into_iter()
            .chain(self.video().map(|video| video.buffer.clone()))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close every member exactly once
    ///
    /// Blocking. Members are closed even if an earlier one fails; the first
    /// failure is returned. A second call fails with `Closed`.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(CCPlayerError::Closed("Pipeline"));
        }

        debug!("Closing pipeline for {}", self.media.location);

        let mut parts = Vec::new();
        if let Some(audio) = self.audio() {
            parts.push(Part::Sampler(Arc::clone(&audio.sampler)));
            parts.push(Part::Buffer(audio.buffer.clone()));
            parts.push(Part::Decoder(Arc::clone(&audio.decoder)));
        }
        if let Some(video) = self.video() {
            parts.push(Part::Buffer(video.buffer.clone()));
            parts.push(Part::Decoder(Arc::clone(&video.decoder)));
            parts.push(Part::Pool(video.pool.clone()));
        }

        let mut first_error = None;
        for part in parts {
            if let Err(e) = part.close() {
                warn!("Failed to close pipeline member: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.is_closed() {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MockSampler;
    use crate::decoder::{
        AudioFormat, HardwareAcceleration, MockBackend, MockDecoder, SyntheticBackend, Timestamp,
    };
    use mockall::Sequence;

    fn options() -> PipelineOptions {
        PipelineOptions {
            audio_buffer_size: 4,
            video_buffer_size: 2,
        }
    }

    fn media() -> Media {
        Media {
            id: 1,
            location: "mock://clip".to_string(),
            duration: Timestamp::from_micros(1_000_000),
            audio_format: Some(AudioFormat {
                sample_rate: 48_000,
                channels: 2,
            }),
            video_format: Some(VideoFormat {
                width: 4,
                height: 4,
                frame_rate: 25.0,
                hardware_acceleration: HardwareAcceleration::None,
            }),
        }
    }

    fn closing_decoder(seq: &mut Sequence) -> Box<dyn Decoder> {
        let mut decoder = MockDecoder::new();
        decoder
            .expect_close()
            .times(1)
            .in_sequence(seq)
            .returning(|| Ok(()));
        Box::new(decoder)
    }

    #[test]
    fn test_assemble_synthetic_audio_video() {
        let backend = SyntheticBackend::with_realtime(false);
        let media = backend.probe("synthetic://clip", &[]).unwrap();

        let pipeline =
            Pipeline::assemble(&backend, media, options(), &PlayerSettings::default()).unwrap();

        assert!(matches!(pipeline.streams(), Streams::AudioVideo { .. }));
        assert_eq!(pipeline.audio().unwrap().buffer.capacity(), 4);
        assert_eq!(pipeline.video().unwrap().buffer.capacity(), 2);
        assert_eq!(pipeline.video().unwrap().pool.capacity(), 3);
        assert_eq!(pipeline.buffers().len(), 2);

        let sampler = backend.last_sampler().unwrap();
        assert_eq!(sampler.volume, PlayerSettings::default().volume);

        pipeline.close().unwrap();
        assert!(matches!(pipeline.close(), Err(CCPlayerError::Closed("Pipeline"))));
        assert!(pipeline.video().unwrap().pool.is_closed());
        assert!(pipeline.audio().unwrap().buffer.is_closed());
        assert!(backend.last_sampler().unwrap().closed);
    }

    #[test]
    fn test_sampler_failure_rolls_back_audio_decoder() {
        let mut seq = Sequence::new();
        let decoder = closing_decoder(&mut seq);

        let mut backend = MockBackend::new();
        backend
            .expect_create_audio_decoder()
            .times(1)
            .return_once(move |_| Ok(decoder));
        backend
            .expect_create_sampler()
            .times(1)
            .returning(|_| Err(CCPlayerError::construction_error("no audio device")));
        backend.expect_create_video_decoder().never();

        let result = Pipeline::assemble(&backend, media(), options(), &PlayerSettings::default());
        assert!(matches!(result, Err(CCPlayerError::Construction(_))));
    }

    #[test]
    fn test_video_failure_rolls_back_everything_in_reverse() {
        let mut seq = Sequence::new();

        let mut sampler = MockSampler::new();
        sampler.expect_set_volume().returning(|_| Ok(()));
        sampler.expect_set_muted().returning(|_| Ok(()));
        sampler.expect_set_playback_speed().returning(|_| Ok(()));
        sampler
            .expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        let decoder = closing_decoder(&mut seq);

        let mut backend = MockBackend::new();
        backend
            .expect_create_audio_decoder()
            .return_once(move |_| Ok(decoder));
        backend
            .expect_create_sampler()
            .return_once(move |_| Ok(Box::new(sampler) as Box<dyn Sampler>));
        backend
            .expect_create_video_decoder()
            .times(1)
            .returning(|_| Err(CCPlayerError::construction_error("codec missing")));

        let result = Pipeline::assemble(&backend, media(), options(), &PlayerSettings::default());
        assert!(matches!(result, Err(CCPlayerError::Construction(_))));
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let backend = SyntheticBackend::with_realtime(false);
        let media = backend.probe("synthetic://clip?video=0", &[]).unwrap();

        let result = Pipeline::assemble(
            &backend,
            media,
            PipelineOptions {
                audio_buffer_size: 0,
                video_buffer_size: 2,
            },
            &PlayerSettings::default(),
        );
        assert!(matches!(result, Err(CCPlayerError::InvalidArgument(_))));
        assert!(backend.last_sampler().is_none());
    }
}
