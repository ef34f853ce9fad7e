//! Transcoding pipeline driver
//!
//! Runs decoder → resampler → FIFO → encoder as a small state machine:
//!
//! ```text
//! FILLING ⇄ DRAINING → FLUSHING → DONE
//!        \______________________/
//!                 ABORTED (any error)
//! ```
//!
//! Resources are acquired in a fixed order (input, output, resampler, FIFO,
//! then the container header) and held as locals of [`Pipeline::run`], so
//! they are released in reverse order on every exit path.

use std::path::Path;
use std::time::Instant;

use ffmpeg_next as ffmpeg;
use uuid::Uuid;

use crate::config::TranscodeConfig;
use crate::error::{Result, TranscodeError};
use crate::ffmpeg_utils::helpers::audio_plane_data_mut;
use crate::types::{DecodeOutcome, EncodeOutcome, StreamDescriptor, TranscodeReport};

use super::fifo::SampleFifo;
use super::{AudioDecode, AudioEncode, FfmpegBackend, SampleConvert, TranscodeBackend};

/// Per-run state shared between the driver and the encoder session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineState {
    /// The decoder has returned every frame it will ever produce.
    pub finished: bool,
    /// Timestamp of the next frame, in samples since the start of output.
    pub pts: i64,
}

impl PipelineState {
    /// Stamp `frame` with the current pts and advance past its samples.
    pub fn stamp(&mut self, frame: &mut ffmpeg::util::frame::Audio) {
        frame.set_pts(Some(self.pts));
        self.pts += frame.samples() as i64;
    }
}

/// Driver state, exposed for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Filling,
    Draining,
    Flushing,
    Done,
    Aborted,
}

/// Drives one input file through to one output file.
pub struct Pipeline<B: TranscodeBackend> {
    backend: B,
    output_opened: bool,
}

impl<B: TranscodeBackend> Pipeline<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            output_opened: false,
        }
    }

    /// Whether the last run got as far as opening the output session.
    pub fn output_opened(&self) -> bool {
        self.output_opened
    }

    /// Transcode `input` into `output`.
    ///
    /// On error the trailer is not written, every resource acquired so far is
    /// released exactly once, and the first error is returned.
    pub fn run(&mut self, input: &Path, output: &Path) -> Result<TranscodeReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "transcode",
            %run_id,
            input = %input.display(),
            output = %output.display()
        );
        let _enter = span.enter();

        let started = Instant::now();
        self.output_opened = false;

        let result = self.run_inner(input, output);
        match result {
            Ok(mut report) => {
                report.elapsed_ms = started.elapsed().as_millis() as u64;
                tracing::info!(
                    samples = report.encoded_samples,
                    packets = report.packets_written,
                    elapsed_ms = report.elapsed_ms,
                    "transcode finished"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(stage = ?Stage::Aborted, kind = ?e.kind(), "transcode failed: {}", e);
                Err(e)
            }
        }
    }

    fn run_inner(&mut self, input: &Path, output: &Path) -> Result<TranscodeReport> {
        let mut report = TranscodeReport::default();

        // Locals drop in reverse declaration order: FIFO, resampler, encoder
        // (codec, then output container), decoder (codec, then input).
        let mut decoder = self.backend.open_input(input)?;
        let in_desc = *decoder.descriptor();
        report.input = Some(in_desc.summary());

        let mut encoder = self.backend.open_output(output, &in_desc)?;
        self.output_opened = true;
        let out_desc = *encoder.descriptor();
        report.output = Some(out_desc.summary());

        let mut resampler = self.backend.init_resampler(&in_desc, &out_desc)?;
        let mut fifo = self.backend.init_fifo(&out_desc)?;

        encoder.write_header()?;

        tracing::info!(
            input_codec = in_desc.codec_id.name(),
            input_channels = in_desc.channels,
            sample_rate = in_desc.sample_rate,
            frame_size = encoder.frame_size(),
            "transcode started"
        );

        let mut state = PipelineState::default();
        drive(
            &mut decoder,
            &mut resampler,
            &mut fifo,
            &mut encoder,
            &out_desc,
            &mut state,
            &mut report,
        )?;

        report.encoded_samples = state.pts as u64;
        Ok(report)
    }
}

/// Transcode with the FFmpeg backend, removing a partial output file on
/// failure unless the configuration asks to keep it.
pub fn transcode_file(
    input: &Path,
    output: &Path,
    config: &TranscodeConfig,
) -> Result<TranscodeReport> {
    let existed = output.exists();
    let mut pipeline = Pipeline::new(FfmpegBackend::new(config.clone()));

    match pipeline.run(input, output) {
        Ok(report) => Ok(report),
        Err(e) => {
            // A pre-existing file is only ours to delete once we truncated it.
            let ours = !existed || pipeline.output_opened();
            if ours && !config.output.keep_partial_output && output.exists() {
                match std::fs::remove_file(output) {
                    Ok(()) => tracing::debug!(path = %output.display(), "partial output removed"),
                    Err(rm) => tracing::warn!(
                        path = %output.display(),
                        "could not remove partial output: {}",
                        rm
                    ),
                }
            }
            Err(e)
        }
    }
}

/// FILLING/DRAINING until input and FIFO are exhausted, then FLUSHING and the
/// trailer.
fn drive<D, R, E>(
    decoder: &mut D,
    resampler: &mut R,
    fifo: &mut SampleFifo,
    encoder: &mut E,
    out_desc: &StreamDescriptor,
    state: &mut PipelineState,
    report: &mut TranscodeReport,
) -> Result<()>
where
    D: AudioDecode,
    R: SampleConvert,
    E: AudioEncode,
{
    let frame_size = encoder.frame_size();
    if frame_size == 0 {
        return Err(TranscodeError::Config("encoder frame size is zero".into()));
    }

    loop {
        tracing::trace!(stage = ?Stage::Filling, fifo = fifo.size());
        while fifo.size() < frame_size && !state.finished {
            fill_step(decoder, resampler, fifo, state, report)?;
        }

        tracing::trace!(stage = ?Stage::Draining, fifo = fifo.size());
        while fifo.size() >= frame_size || (state.finished && !fifo.is_empty()) {
            let n = fifo.size().min(frame_size);
            let frame = build_frame(fifo, n, out_desc)?;
            if n < frame_size {
                report.partial_frames += 1;
            }
            report.frames_encoded += 1;
            if let EncodeOutcome::Data { packets } = encoder.encode(Some(frame), state)? {
                report.packets_written += packets as u64;
            }
        }

        if state.finished && fifo.is_empty() {
            break;
        }
    }

    tracing::debug!(stage = ?Stage::Flushing, pts = state.pts, "flushing encoder");
    loop {
        report.flush_calls += 1;
        match encoder.encode(None, state)? {
            EncodeOutcome::Data { packets } => report.packets_written += packets as u64,
            EncodeOutcome::NoData => break,
        }
    }

    encoder.write_trailer()?;
    tracing::debug!(stage = ?Stage::Done, "trailer written");
    Ok(())
}

/// Pull one decoder result through the resampler into the FIFO.
fn fill_step<D, R>(
    decoder: &mut D,
    resampler: &mut R,
    fifo: &mut SampleFifo,
    state: &mut PipelineState,
    report: &mut TranscodeReport,
) -> Result<()>
where
    D: AudioDecode,
    R: SampleConvert,
{
    match decoder.decode_next()? {
        DecodeOutcome::NoData => Ok(()),
        DecodeOutcome::Frame(frame) => {
            report.decoded_samples += frame.samples() as u64;
            let block = resampler.convert(frame)?;
            fifo.write(&block, block.samples())?;
            report.fifo_samples_written += block.samples() as u64;
            Ok(())
        }
        DecodeOutcome::EndOfStream => {
            tracing::debug!(queued = fifo.size(), "input finished");
            state.finished = true;
            Ok(())
        }
    }
}

/// Read `n` samples from the FIFO into a fresh frame in the output format.
fn build_frame(
    fifo: &mut SampleFifo,
    n: usize,
    out_desc: &StreamDescriptor,
) -> Result<ffmpeg::util::frame::Audio> {
    let planes = fifo.read(n)?;

    let mut frame =
        ffmpeg::util::frame::Audio::new(out_desc.sample_format, n, out_desc.channel_layout);
    frame.set_rate(out_desc.sample_rate);

    for (index, src) in planes.iter().enumerate() {
        let dst = audio_plane_data_mut(&mut frame, index);
        if dst.len() < src.len() {
            return Err(TranscodeError::Allocation(format!(
                "Could not allocate output frame: plane {} holds {} bytes, need {}",
                index,
                dst.len(),
                src.len()
            )));
        }
        dst[..src.len()].copy_from_slice(src);
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::resampler::ConvertedSampleBlock;
    use crate::ffmpeg_utils::helpers::audio_plane_data;
    use ffmpeg_next::util::channel_layout::ChannelLayout;
    use ffmpeg_next::util::format::sample::{Sample, Type};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    fn push(log: &Log, event: &str) {
        log.borrow_mut().push(event.to_string());
    }

    fn stereo_fltp() -> StreamDescriptor {
        StreamDescriptor {
            codec_id: ffmpeg::codec::Id::AAC,
            sample_format: Sample::F32(Type::Planar),
            sample_rate: 48000,
            channels: 2,
            channel_layout: ChannelLayout::STEREO,
        }
    }

    fn floats(plane: &[u8], n: usize) -> Vec<f32> {
        plane[..n * 4]
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// Where a [`MockBackend`] should fail.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum FailAt {
        Nowhere,
        OpenInput,
        OpenOutput,
        InitResampler,
        InitFifo,
        WriteHeader,
        Decode,
        Convert,
        Encode,
        WriteTrailer,
    }

    fn injected(stage: FailAt) -> TranscodeError {
        TranscodeError::Config(format!("injected failure at {:?}", stage))
    }

    /// Decoder emitting frames of the given sizes, carrying a running sample
    /// index as the left channel value, with a `NoData` before every frame.
    struct MockDecoder {
        descriptor: StreamDescriptor,
        frames: VecDeque<usize>,
        next_value: usize,
        starved: bool,
        fail: bool,
        log: Log,
    }

    impl AudioDecode for MockDecoder {
        fn descriptor(&self) -> &StreamDescriptor {
            &self.descriptor
        }

        fn decode_next(&mut self) -> Result<DecodeOutcome> {
            if self.fail && self.next_value > 0 {
                return Err(injected(FailAt::Decode));
            }
            if !self.starved {
                self.starved = true;
                return Ok(DecodeOutcome::NoData);
            }
            self.starved = false;

            let Some(n) = self.frames.pop_front() else {
                return Ok(DecodeOutcome::EndOfStream);
            };
            let mut frame =
                ffmpeg::util::frame::Audio::new(Sample::F32(Type::Planar), n, ChannelLayout::STEREO);
            frame.set_rate(self.descriptor.sample_rate);
            for ch in 0..2 {
                let plane = audio_plane_data_mut(&mut frame, ch);
                for i in 0..n {
                    let v = (self.next_value + i) as f32 * if ch == 0 { 1.0 } else { -1.0 };
                    plane[i * 4..i * 4 + 4].copy_from_slice(&v.to_ne_bytes());
                }
            }
            self.next_value += n;
            Ok(DecodeOutcome::Frame(frame))
        }
    }

    impl Drop for MockDecoder {
        fn drop(&mut self) {
            push(&self.log, "release input");
        }
    }

    struct MockResampler {
        output: StreamDescriptor,
        fail: bool,
        log: Log,
    }

    impl SampleConvert for MockResampler {
        fn convert(&mut self, frame: ffmpeg::util::frame::Audio) -> Result<ConvertedSampleBlock> {
            if self.fail {
                return Err(injected(FailAt::Convert));
            }
            let n = frame.samples();
            let mut block = ConvertedSampleBlock::alloc(&self.output, n)?;
            for ch in 0..2 {
                block
                    .plane_mut(ch)
                    .copy_from_slice(&audio_plane_data(&frame, ch)[..n * 4]);
            }
            Ok(block)
        }
    }

    impl Drop for MockResampler {
        fn drop(&mut self) {
            push(&self.log, "release resampler");
        }
    }

    /// Encoder holding back `delay` frames, one packet per frame.
    struct MockEncoder {
        descriptor: StreamDescriptor,
        frame_size: usize,
        delay: usize,
        buffered: usize,
        flushing: bool,
        /// (pts, samples, left channel values) of every frame received.
        frames: Rc<RefCell<Vec<(i64, usize, Vec<f32>)>>>,
        fail: Option<FailAt>,
        log: Log,
    }

    impl AudioEncode for MockEncoder {
        fn descriptor(&self) -> &StreamDescriptor {
            &self.descriptor
        }

        fn frame_size(&self) -> usize {
            self.frame_size
        }

        fn write_header(&mut self) -> Result<()> {
            if self.fail == Some(FailAt::WriteHeader) {
                return Err(injected(FailAt::WriteHeader));
            }
            push(&self.log, "header");
            Ok(())
        }

        fn encode(
            &mut self,
            frame: Option<ffmpeg::util::frame::Audio>,
            state: &mut PipelineState,
        ) -> Result<EncodeOutcome> {
            match frame {
                Some(mut frame) => {
                    if self.fail == Some(FailAt::Encode) {
                        return Err(injected(FailAt::Encode));
                    }
                    assert!(!self.flushing, "frame sent after flush started");
                    state.stamp(&mut frame);
                    let n = frame.samples();
                    self.frames.borrow_mut().push((
                        frame.pts().unwrap_or(-1),
                        n,
                        floats(audio_plane_data(&frame, 0), n),
                    ));
                    self.buffered += 1;
                    if self.buffered > self.delay {
                        self.buffered -= 1;
                        Ok(EncodeOutcome::Data { packets: 1 })
                    } else {
                        Ok(EncodeOutcome::NoData)
                    }
                }
                None => {
                    self.flushing = true;
                    push(&self.log, "flush");
                    if self.buffered > 0 {
                        self.buffered -= 1;
                        Ok(EncodeOutcome::Data { packets: 1 })
                    } else {
                        Ok(EncodeOutcome::NoData)
                    }
                }
            }
        }

        fn write_trailer(&mut self) -> Result<()> {
            if self.fail == Some(FailAt::WriteTrailer) {
                return Err(injected(FailAt::WriteTrailer));
            }
            push(&self.log, "trailer");
            Ok(())
        }
    }

    impl Drop for MockEncoder {
        fn drop(&mut self) {
            push(&self.log, "release output");
        }
    }

    struct MockBackend {
        frames: Vec<usize>,
        frame_size: usize,
        delay: usize,
        fail: FailAt,
        log: Log,
        encoded: Rc<RefCell<Vec<(i64, usize, Vec<f32>)>>>,
    }

    impl MockBackend {
        fn new(frames: Vec<usize>, frame_size: usize) -> Self {
            Self {
                frames,
                frame_size,
                delay: 2,
                fail: FailAt::Nowhere,
                log: Rc::new(RefCell::new(Vec::new())),
                encoded: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn failing(mut self, fail: FailAt) -> Self {
            self.fail = fail;
            self
        }
    }

    impl TranscodeBackend for MockBackend {
        type Decoder = MockDecoder;
        type Encoder = MockEncoder;
        type Resampler = MockResampler;

        fn open_input(&mut self, _path: &Path) -> Result<MockDecoder> {
            if self.fail == FailAt::OpenInput {
                return Err(injected(self.fail));
            }
            push(&self.log, "acquire input");
            Ok(MockDecoder {
                descriptor: stereo_fltp(),
                frames: self.frames.iter().copied().collect(),
                next_value: 0,
                starved: false,
                fail: self.fail == FailAt::Decode,
                log: self.log.clone(),
            })
        }

        fn open_output(&mut self, _path: &Path, input: &StreamDescriptor) -> Result<MockEncoder> {
            if self.fail == FailAt::OpenOutput {
                return Err(injected(self.fail));
            }
            push(&self.log, "acquire output");
            Ok(MockEncoder {
                descriptor: StreamDescriptor {
                    sample_rate: input.sample_rate,
                    ..stereo_fltp()
                },
                frame_size: self.frame_size,
                delay: self.delay,
                buffered: 0,
                flushing: false,
                frames: self.encoded.clone(),
                fail: Some(self.fail),
                log: self.log.clone(),
            })
        }

        fn init_resampler(
            &mut self,
            _input: &StreamDescriptor,
            output: &StreamDescriptor,
        ) -> Result<MockResampler> {
            if self.fail == FailAt::InitResampler {
                return Err(injected(self.fail));
            }
            push(&self.log, "acquire resampler");
            Ok(MockResampler {
                output: *output,
                fail: self.fail == FailAt::Convert,
                log: self.log.clone(),
            })
        }

        fn init_fifo(&mut self, output: &StreamDescriptor) -> Result<SampleFifo> {
            if self.fail == FailAt::InitFifo {
                return Err(injected(self.fail));
            }
            push(&self.log, "acquire fifo");
            SampleFifo::new(output, 1)
        }
    }

    fn run(backend: MockBackend) -> (Result<TranscodeReport>, MockBackend) {
        let mut pipeline = Pipeline::new(backend);
        let result = pipeline.run(&PathBuf::from("in.wav"), &PathBuf::from("out.mp4"));
        (result, pipeline.backend)
    }

    #[test]
    fn test_every_sample_encoded_once_in_order() {
        // 960-sample decoder frames into a 1024-sample encoder.
        let (result, backend) = run(MockBackend::new(vec![960; 7], 1024));
        let report = result.unwrap();

        let frames = backend.encoded.borrow();
        let left: Vec<f32> = frames.iter().flat_map(|(_, _, v)| v.iter().copied()).collect();
        let expected: Vec<f32> = (0..960 * 7).map(|i| i as f32).collect();
        assert_eq!(left, expected);

        assert_eq!(report.decoded_samples, 960 * 7);
        assert_eq!(report.fifo_samples_written, 960 * 7);
        assert_eq!(report.encoded_samples, 960 * 7);
    }

    #[test]
    fn test_pts_contiguous_from_zero() {
        let (result, backend) = run(MockBackend::new(vec![500, 1500, 37, 2048, 1], 1024));
        let report = result.unwrap();

        let frames = backend.encoded.borrow();
        let mut expected_pts = 0i64;
        for (pts, samples, _) in frames.iter() {
            assert_eq!(*pts, expected_pts);
            expected_pts += *samples as i64;
        }
        assert_eq!(expected_pts as u64, report.encoded_samples);
    }

    #[test]
    fn test_only_last_frame_is_partial() {
        let (result, backend) = run(MockBackend::new(vec![960; 5], 1024));
        let report = result.unwrap();

        let frames = backend.encoded.borrow();
        let sizes: Vec<usize> = frames.iter().map(|(_, n, _)| *n).collect();
        assert_eq!(sizes, vec![1024, 1024, 1024, 1024, 704]);
        assert_eq!(report.frames_encoded, 5);
        assert_eq!(report.partial_frames, 1);
    }

    #[test]
    fn test_exactly_divisible_input_has_no_partial_frame() {
        let (result, backend) = run(MockBackend::new(vec![512; 8], 1024));
        let report = result.unwrap();

        let frames = backend.encoded.borrow();
        assert!(frames.iter().all(|(_, n, _)| *n == 1024));
        assert_eq!(frames.len(), 4);
        assert_eq!(report.partial_frames, 0);
    }

    #[test]
    fn test_empty_input_still_finalizes() {
        let (result, backend) = run(MockBackend::new(vec![], 1024));
        let report = result.unwrap();

        assert_eq!(report.encoded_samples, 0);
        assert_eq!(report.frames_encoded, 0);
        assert!(backend.encoded.borrow().is_empty());
        assert!(backend.log.borrow().contains(&"trailer".to_string()));
    }

    #[test]
    fn test_flush_drains_delayed_packets() {
        let (result, _backend) = run(MockBackend::new(vec![1024; 3], 1024));
        let report = result.unwrap();

        // One packet per frame; two held back until the flush.
        assert_eq!(report.packets_written, 3);
        // Two flush calls with data, one reporting no data.
        assert_eq!(report.flush_calls, 3);
    }

    #[test]
    fn test_success_releases_in_reverse_order() {
        let (result, backend) = run(MockBackend::new(vec![100; 3], 64));
        result.unwrap();

        let log = backend.log.borrow();
        let tail: Vec<&str> = log.iter().rev().take(4).map(String::as_str).collect();
        assert_eq!(
            tail,
            vec!["release input", "release output", "release resampler", "trailer"]
        );
    }

    fn assert_released_once_in_reverse(log: &[String]) {
        let acquired: Vec<&str> = log
            .iter()
            .filter_map(|e| e.strip_prefix("acquire "))
            .filter(|r| *r != "fifo")
            .collect();
        let released: Vec<&str> = log
            .iter()
            .filter_map(|e| e.strip_prefix("release "))
            .collect();
        let mut expected = acquired.clone();
        expected.reverse();
        assert_eq!(released, expected, "log: {:?}", log);
    }

    #[test]
    fn test_injected_failures_release_everything_once() {
        let stages = [
            FailAt::OpenInput,
            FailAt::OpenOutput,
            FailAt::InitResampler,
            FailAt::InitFifo,
            FailAt::WriteHeader,
            FailAt::Decode,
            FailAt::Convert,
            FailAt::Encode,
            FailAt::WriteTrailer,
        ];

        for stage in stages {
            let (result, backend) = run(MockBackend::new(vec![960; 4], 1024).failing(stage));
            let err = result.unwrap_err();
            assert_eq!(
                err.to_string(),
                format!("Configuration error: injected failure at {:?}", stage)
            );

            let log = backend.log.borrow();
            assert_released_once_in_reverse(&log);
            assert!(
                !log.contains(&"trailer".to_string()),
                "trailer written after failure at {:?}",
                stage
            );
        }
    }

    #[test]
    fn test_output_opened_tracks_progress() {
        let mut pipeline = Pipeline::new(MockBackend::new(vec![10], 4).failing(FailAt::OpenOutput));
        assert!(pipeline.run(Path::new("a"), Path::new("b")).is_err());
        assert!(!pipeline.output_opened());

        let mut pipeline =
            Pipeline::new(MockBackend::new(vec![10], 4).failing(FailAt::WriteHeader));
        assert!(pipeline.run(Path::new("a"), Path::new("b")).is_err());
        assert!(pipeline.output_opened());
    }

    #[test]
    fn test_stamp_advances_by_sample_count() {
        let mut state = PipelineState::default();
        let mut frame =
            ffmpeg::util::frame::Audio::new(Sample::F32(Type::Planar), 1024, ChannelLayout::STEREO);
        state.stamp(&mut frame);
        assert_eq!(frame.pts(), Some(0));
        assert_eq!(state.pts, 1024);

        let mut frame =
            ffmpeg::util::frame::Audio::new(Sample::F32(Type::Planar), 10, ChannelLayout::STEREO);
        state.stamp(&mut frame);
        assert_eq!(frame.pts(), Some(1024));
        assert_eq!(state.pts, 1034);
    }
}
