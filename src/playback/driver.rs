//! Playback orchestration: runs the demux loop as a pool job, drives a
//! periodic tick that drains decoded frames against the stream clock,
//! and emits the player events in order.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::state::DriverState;
use super::ticker::Ticker;
use crate::audio::{AudioBackend, AudioStream};
use crate::container::{Demuxer, StreamMetadata};
use crate::core::time::{tick_interval, tick_step, Time, FALLBACK_FRAME_RATE};
use crate::core::{EventSink, PlayerEvent};
use crate::decode::{AudioDecoder, CodecProvider, VideoDecoder};
use crate::source::ByteSource;
use crate::worker::{AbortToken, Job, JobHandle, WorkerPool};

/// Streams one byte source through demux, decode and timed drain.
///
/// The caller owns the driver; the demux loop runs as a worker-pool job
/// and the tick runs on a dedicated timer thread. Read accessors are
/// safe from any thread.
pub struct PlaybackDriver {
    inner: Arc<DriverInner>,
    pool: Arc<WorkerPool>,
}

struct DriverInner {
    state: Mutex<DriverState>,
    stream_time: AtomicU64,
    /// Metadata-declared frame rate; overrides the codec-inferred one
    /// for future ticks without rescaling the elapsed clock.
    meta_frame_rate: Mutex<Option<f64>>,
    source: Mutex<Option<Arc<ByteSource>>>,
    job: Mutex<Option<JobHandle>>,
    audio: Mutex<Option<Arc<AudioDecoder>>>,
    video: Mutex<Option<Arc<VideoDecoder>>>,
    audio_stream: Mutex<Option<Box<dyn AudioStream>>>,
    ticker: Mutex<Option<Ticker>>,
    backend: Arc<dyn AudioBackend>,
    codecs: Arc<dyn CodecProvider>,
    sink: Arc<dyn EventSink>,
    started: AtomicBool,
    metadata_sent: AtomicBool,
    error_sent: AtomicBool,
    stopped_sent: AtomicBool,
}

impl PlaybackDriver {
    pub fn new(
        pool: Arc<WorkerPool>,
        backend: Arc<dyn AudioBackend>,
        codecs: Arc<dyn CodecProvider>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(DriverInner {
                state: Mutex::new(DriverState::Closed),
                stream_time: AtomicU64::new(0),
                meta_frame_rate: Mutex::new(None),
                source: Mutex::new(None),
                job: Mutex::new(None),
                audio: Mutex::new(None),
                video: Mutex::new(None),
                audio_stream: Mutex::new(None),
                ticker: Mutex::new(None),
                backend,
                codecs,
                sink,
                started: AtomicBool::new(false),
                metadata_sent: AtomicBool::new(false),
                error_sent: AtomicBool::new(false),
                stopped_sent: AtomicBool::new(false),
            }),
            pool,
        }
    }

    /// Start streaming from `source`. No-op unless the driver is
    /// closed; call [`PlaybackDriver::close`] first to restart.
    pub fn play(&self, source: Arc<ByteSource>) {
        {
            let mut state = self.inner.state.lock();
            if !state.is_closed() {
                return;
            }
            *state = DriverState::Opening;
        }
        self.inner.stream_time.store(0, Ordering::Release);
        *self.inner.meta_frame_rate.lock() = None;
        self.inner.started.store(false, Ordering::Release);
        self.inner.metadata_sent.store(false, Ordering::Release);
        self.inner.error_sent.store(false, Ordering::Release);
        self.inner.stopped_sent.store(false, Ordering::Release);
        *self.inner.audio.lock() = None;
        *self.inner.video.lock() = None;
        *self.inner.source.lock() = Some(Arc::clone(&source));

        let job = Arc::new(StreamJob {
            inner: Arc::clone(&self.inner),
            source,
        });
        *self.inner.job.lock() = Some(self.pool.submit(job));
    }

    pub fn pause(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state != DriverState::Playing {
                return;
            }
            *state = DriverState::Paused;
        }
        if let Some(stream) = &mut *self.inner.audio_stream.lock() {
            stream.pause();
        }
    }

    pub fn resume(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state != DriverState::Paused {
                return;
            }
            *state = DriverState::Playing;
        }
        // The device clock resumes from where it froze rather than
        // jumping; the stream clock follows it.
        if let Some(stream) = &mut *self.inner.audio_stream.lock() {
            stream.resume();
        }
    }

    pub fn toggle_pause(&self) {
        let state = *self.inner.state.lock();
        match state {
            DriverState::Playing => self.pause(),
            DriverState::Paused => self.resume(),
            _ => {}
        }
    }

    /// Ordered teardown: abort the stream job, flush and drain both
    /// decoders, wait for the job fence, stop the tick, free the audio
    /// stream, release the source.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.is_closed() {
                return;
            }
            *state = DriverState::Closed;
        }
        debug!("closing playback");
        let job = self.inner.job.lock().take();
        if let Some(job) = &job {
            job.abort();
        }
        if let Some(audio) = &*self.inner.audio.lock() {
            audio.set_flushing();
            audio.skip_all();
        }
        if let Some(video) = &*self.inner.video.lock() {
            video.set_flushing();
            video.skip_all();
        }
        // The job waits on both flushes itself before it is fenced.
        if let Some(job) = job {
            job.wait_finished();
        }
        if let Some(ticker) = self.inner.ticker.lock().take() {
            ticker.stop();
        }
        self.inner.audio_stream.lock().take();
        self.inner.source.lock().take();
        self.inner.audio.lock().take();
        self.inner.video.lock().take();
    }

    /// Current stream clock position in milliseconds.
    pub fn stream_time(&self) -> Time {
        self.inner.stream_time.load(Ordering::Acquire)
    }

    pub fn bytes_loaded(&self) -> u64 {
        self.inner
            .source
            .lock()
            .as_ref()
            .map(|s| s.received_len())
            .unwrap_or(0)
    }

    pub fn bytes_total(&self) -> u64 {
        self.inner
            .source
            .lock()
            .as_ref()
            .and_then(|s| s.total_len())
            .unwrap_or(0)
    }

    pub fn video_dimensions(&self) -> Option<(u32, u32)> {
        let video = self.inner.video.lock();
        video.as_ref().map(|v| (v.width(), v.height()))
    }

    /// Handle for the render collaborator; valid until the next tick.
    pub fn current_video_frame(&self) -> Option<Arc<crate::decode::VideoFrame>> {
        let video = self.inner.video.lock();
        video.as_ref().and_then(|v| v.current_frame())
    }

    pub fn frame_rate(&self) -> f64 {
        self.inner.effective_frame_rate()
    }

    pub fn state(&self) -> DriverState {
        *self.inner.state.lock()
    }

    pub fn is_paused(&self) -> bool {
        self.state().is_paused()
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }
}

impl Drop for PlaybackDriver {
    fn drop(&mut self) {
        self.close();
    }
}

impl DriverInner {
    fn effective_frame_rate(&self) -> f64 {
        if let Some(rate) = *self.meta_frame_rate.lock() {
            if rate > 0.0 {
                return rate;
            }
        }
        if let Some(video) = &*self.video.lock() {
            if let Some(rate) = video.frame_rate() {
                if rate > 0.0 {
                    return rate;
                }
            }
        }
        FALLBACK_FRAME_RATE
    }

    /// One clock step: advance the stream time and drain frames it has
    /// passed. Runs on the tick thread.
    fn tick(&self) {
        match *self.state.lock() {
            DriverState::Playing => {}
            DriverState::Paused => {
                // Keep the device clock frozen with us.
                if let Some(stream) = &mut *self.audio_stream.lock() {
                    if !stream.is_paused() {
                        stream.pause();
                    }
                }
                return;
            }
            _ => return,
        }

        let mut device_time = None;
        {
            let mut stream = self.audio_stream.lock();
            if let Some(stream) = &mut *stream {
                if stream.is_paused() {
                    stream.resume();
                }
                stream.fill();
                if stream.is_timing_available() {
                    device_time = Some(stream.played_time());
                }
            }
        }

        let now = match device_time {
            Some(t) => {
                self.stream_time.store(t, Ordering::Release);
                t
            }
            None => {
                // Frame-rate fallback; discard audio up to the clock so
                // it does not silently pile up behind a timing-less
                // device.
                let step = tick_step(self.effective_frame_rate());
                let t = self.stream_time.fetch_add(step, Ordering::AcqRel) + step;
                if let Some(audio) = &*self.audio.lock() {
                    audio.skip_all();
                }
                t
            }
        };

        if let Some(video) = &*self.video.lock() {
            video.skip_until(now);
        }
    }

    /// Pull newly available decoders/metadata out of the demuxer after
    /// each tag; fires the readiness events once everything declared
    /// and still available is valid.
    fn absorb_progress(self: &Arc<Self>, demuxer: &mut Demuxer) {
        if self.audio.lock().is_none() {
            if let Some(audio) = demuxer.audio_decoder() {
                *self.audio.lock() = Some(audio);
            }
        }
        if self.video.lock().is_none() {
            if let Some(video) = demuxer.video_decoder() {
                *self.video.lock() = Some(video);
            }
        }
        if let Some(metadata) = demuxer.take_metadata() {
            self.apply_metadata(metadata);
        }
        if !self.started.load(Ordering::Acquire) && self.is_ready(demuxer) {
            self.start_playback();
        }
    }

    /// Ready once every declared track that has not failed is valid,
    /// and at least one track is.
    fn is_ready(&self, demuxer: &Demuxer) -> bool {
        let Some(header) = demuxer.header() else {
            return false;
        };
        let audio_valid = self.audio.lock().as_ref().map(|a| a.is_valid());
        let video_valid = self.video.lock().as_ref().map(|v| v.is_valid());
        let needs_audio = header.has_audio && !demuxer.audio_failed();
        let needs_video = header.has_video && !demuxer.video_failed();
        if needs_audio && audio_valid != Some(true) {
            return false;
        }
        if needs_video && video_valid != Some(true) {
            return false;
        }
        audio_valid == Some(true) || video_valid == Some(true)
    }

    fn start_playback(self: &Arc<Self>) {
        let audio = {
            let mut audio = self.audio.lock();
            if audio.is_none() {
                // Video-only stream: a silent decoder keeps the audio
                // clock slot populated.
                *audio = Some(Arc::new(AudioDecoder::null()));
            }
            audio.as_ref().map(Arc::clone)
        };
        if let Some(audio) = audio {
            match self.backend.create_stream(audio) {
                Ok(stream) => *self.audio_stream.lock() = Some(stream),
                Err(err) => warn!(%err, "no audio output; using frame-rate clock"),
            }
        }
        {
            let mut state = self.state.lock();
            if *state != DriverState::Opening {
                return;
            }
            *state = DriverState::Playing;
        }
        let rate = self.effective_frame_rate();
        let ticker = {
            let inner = Arc::clone(self);
            Ticker::start(tick_interval(rate), move || inner.tick())
        };
        *self.ticker.lock() = Some(ticker);
        self.started.store(true, Ordering::Release);
        debug!(rate, "playback started");
        self.sink.dispatch(PlayerEvent::PlayStart);
        self.sink.dispatch(PlayerEvent::BufferFull);
    }

    fn apply_metadata(&self, mut metadata: StreamMetadata) {
        if let Some(rate) = metadata.frame_rate {
            if rate > 0.0 {
                *self.meta_frame_rate.lock() = Some(rate);
                // Future cadence only; the elapsed clock keeps its
                // value.
                if let Some(ticker) = &*self.ticker.lock() {
                    ticker.set_interval(tick_interval(rate));
                }
            }
        }
        // Fall back to decoder-reported geometry when the script tag
        // omits it.
        if metadata.width.is_none() || metadata.height.is_none() {
            if let Some(video) = &*self.video.lock() {
                if video.width() > 0 {
                    metadata.width.get_or_insert(video.width());
                    metadata.height.get_or_insert(video.height());
                }
            }
        }
        if !self.metadata_sent.swap(true, Ordering::AcqRel) {
            self.sink.dispatch(PlayerEvent::Metadata(metadata));
        }
    }

    fn dispatch_io_error(&self, message: String) {
        if !self.error_sent.swap(true, Ordering::AcqRel) {
            self.sink.dispatch(PlayerEvent::IoError(message));
        }
    }

    /// End of the demux loop: flush both decoders, wait for the drain,
    /// then emit the stop events (and `Complete` on a natural end).
    fn finish_stream(&self, natural_end: bool) {
        let audio = self.audio.lock().as_ref().map(Arc::clone);
        let video = self.video.lock().as_ref().map(Arc::clone);
        let started = self.started.load(Ordering::Acquire);
        if let Some(audio) = &audio {
            audio.set_flushing();
            if !started {
                audio.skip_all();
            }
        }
        if let Some(video) = &video {
            video.set_flushing();
            if !started {
                video.skip_all();
            }
        }
        if let Some(audio) = &audio {
            audio.wait_flushed();
        }
        if let Some(video) = &video {
            video.wait_flushed();
        }
        if started && !self.stopped_sent.swap(true, Ordering::AcqRel) {
            self.sink.dispatch(PlayerEvent::PlayStop);
            self.sink.dispatch(PlayerEvent::BufferFlush);
            if natural_end && !self.error_sent.load(Ordering::Acquire) {
                self.sink.dispatch(PlayerEvent::Complete);
            }
        }
    }

    /// Runs exactly once per stream job, even when the pool never ran
    /// it. Final resource release lives here.
    fn on_job_fenced(&self) {
        {
            let mut state = self.state.lock();
            *state = DriverState::Closed;
        }
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.stop();
        }
        self.audio_stream.lock().take();
        self.source.lock().take();
    }
}

/// The long-running demux/decode loop submitted to the worker pool.
struct StreamJob {
    inner: Arc<DriverInner>,
    source: Arc<ByteSource>,
}

impl Job for StreamJob {
    fn execute(&self, token: &AbortToken) {
        self.inner.sink.dispatch(PlayerEvent::Open);
        let reader = self.source.reader();
        let mut demuxer = Demuxer::new(reader, Arc::clone(&self.inner.codecs));

        let mut failed = false;
        loop {
            if token.is_aborted() {
                break;
            }
            match demuxer.next_tag() {
                Ok(true) => self.inner.absorb_progress(&mut demuxer),
                Ok(false) => break,
                Err(err) => {
                    if !token.is_aborted() {
                        warn!(%err, "stream terminated");
                        self.inner.dispatch_io_error(err.to_string());
                    }
                    failed = true;
                    break;
                }
            }
        }
        // A transport failure at a record boundary looks like a clean
        // EOF to the demuxer; the source's failed flag tells them
        // apart.
        if !failed && !token.is_aborted() && demuxer.reader_failed() {
            self.inner
                .dispatch_io_error("stream transport failed".into());
            failed = true;
        }
        let natural_end = !failed && !token.is_aborted();
        self.inner.finish_stream(natural_end);
    }

    fn abort(&self) {
        // Unblocks a read stuck waiting for bytes.
        self.source.stop();
    }

    fn fence(&self) {
        self.inner.on_job_fenced();
    }
}
