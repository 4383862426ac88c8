//! VQA Player
//!
//! Drives one stream per tick: each [`VqaPlayer::update`] either holds,
//! wraps the active loop, reports exhaustion, or decodes and presents one
//! frame (video first, then the matching audio lookahead).

use std::sync::Arc;

use crossbeam_channel::Receiver;

use br_audio::{AudioOutput, QueuingAudioStream, SoundHandle};
use br_core::{AudioFormat, Clock, PcmChunk, Surface};

use crate::audio::AudioDecoder;
use crate::config::PlayerConfig;
use crate::container::{ChannelMask, FrameChunks, VqaReader};
use crate::decoder::VideoDecoder;
use crate::loops::{LoopOverride, LoopRange, LoopTable};
use crate::resource::{ReadSeek, ResourceProvider};
use crate::scheduler::{LoopChange, LoopSetMode, PlaybackState, RepeatCount, Step, Tick};
use crate::side_channel::{Lights, ScreenEffects, View, ZBuffer};
use crate::timing::{FrameRate, FrameTimer};
use crate::{VqaError, VqaInfo, VqaResult};

// ============ Public Types ============

/// Notification that a pending loop change took over at a wrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopEnded {
    /// Loop that was playing, `None` for a plain frame range
    pub ended_loop: Option<u32>,
    /// Loop that starts now
    pub started_loop: Option<u32>,
}

/// Called synchronously from inside [`VqaPlayer::update`]
pub type LoopEndedCallback = Box<dyn FnMut(LoopEnded) + Send>;

/// Callback forwarding every notification into a channel
pub fn loop_ended_channel() -> (LoopEndedCallback, Receiver<LoopEnded>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let callback: LoopEndedCallback = Box::new(move |event| {
        // Receiver gone means nobody is listening any more
        let _ = tx.send(event);
    });
    (callback, rx)
}

/// Result of one update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Frame newly decoded and presented
    Presented(u32),
    /// Nothing new; the last frame was drawn again on request
    Redrawn(u32),
    /// Nothing new (holding or wrapped)
    Idle,
    /// Active range finished with no repeats left
    Exhausted,
}

impl UpdateOutcome {
    /// Engine sentinel: frame index, `-1` for nothing new, `-3` for exhausted
    pub fn code(&self) -> i32 {
        match self {
            Self::Presented(frame) => *frame as i32,
            Self::Redrawn(_) | Self::Idle => -1,
            Self::Exhausted => -3,
        }
    }

    /// Frame newly presented by this update
    pub fn presented(&self) -> Option<u32> {
        match self {
            Self::Presented(frame) => Some(*frame),
            _ => None,
        }
    }
}

/// Flags of one update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Draw the last frame again when no new frame is presented
    pub force_draw: bool,
    /// Allow moving to the next frame
    pub advance_frame: bool,
    /// Wait for the frame's due time
    pub use_time: bool,
}

impl Default for UpdateRequest {
    fn default() -> Self {
        Self {
            force_draw: false,
            advance_frame: true,
            use_time: true,
        }
    }
}

impl UpdateRequest {
    /// Redraw only, never advance
    pub fn redraw() -> Self {
        Self {
            force_draw: true,
            advance_frame: false,
            use_time: true,
        }
    }

    /// Advance whenever asked, ignoring the clock
    pub fn untimed() -> Self {
        Self {
            use_time: false,
            ..Self::default()
        }
    }
}

// ============ Audio Channel ============

struct AudioChannel {
    decoder: AudioDecoder,
    stream: QueuingAudioStream,
    handle: Option<SoundHandle>,
    /// Frame whose audio was decoded last
    last_frame: Option<u32>,
    /// Samples standing in for a frame without `SND2`
    silent_frame_len: usize,
}

impl AudioChannel {
    fn new(format: AudioFormat, frame_rate: FrameRate) -> Self {
        let silent_frame_len = frame_rate
            .samples_per_frame(format.sample_rate.as_u32())
            .round() as usize;
        Self {
            decoder: AudioDecoder::new(format),
            stream: QueuingAudioStream::new(format),
            handle: None,
            last_frame: None,
            silent_frame_len,
        }
    }

    fn queue_frame<R: std::io::Read + std::io::Seek>(
        &mut self,
        reader: &mut VqaReader<R>,
        frame: u32,
    ) -> VqaResult<()> {
        // ADPCM state is only valid for the directly following frame
        if self.last_frame.is_some() && self.last_frame != frame.checked_sub(1) {
            self.decoder.reset();
        }
        let chunks = reader.read_frame(frame, ChannelMask::AUDIO)?;
        // A frame without audio still owns its slot on the timeline
        let pcm = match chunks.audio.as_deref() {
            Some(data) if !data.is_empty() => self.decoder.decode(frame, data),
            _ => PcmChunk::new(frame, vec![0; self.silent_frame_len]),
        };
        self.stream.queue_chunk(pcm)?;
        self.last_frame = Some(frame);
        Ok(())
    }

    /// Queue audio for the presented `frame`, starting output on first use
    fn advance<R: std::io::Read + std::io::Seek>(
        &mut self,
        reader: &mut VqaReader<R>,
        frame: u32,
        range: LoopRange,
        preload: u32,
        output: &dyn AudioOutput,
    ) -> VqaResult<()> {
        if self.handle.is_none() {
            let end = frame.saturating_add(preload).min(range.end + 1);
            for f in frame..end {
                self.queue_frame(reader, f)?;
            }
            let handle = output.play_stream(self.stream.clone())?;
            log::debug!(
                "[VqaPlayer] Audio started at frame {} with {} chunks queued",
                frame,
                self.stream.pending_chunks()
            );
            self.handle = Some(handle);
        }

        let ahead = frame.saturating_add(preload);
        if ahead <= range.end {
            self.queue_frame(reader, ahead)?;
        }
        Ok(())
    }

    fn stop(&mut self, output: &dyn AudioOutput) {
        if let Some(handle) = self.handle.take() {
            output.stop(handle);
        }
        self.stream.finish();
    }

    /// Drop queued audio; the next presented frame preloads again
    fn restart(&mut self, output: &dyn AudioOutput) {
        self.stop(output);
        self.stream = QueuingAudioStream::new(self.decoder.format());
        self.decoder.reset();
        self.last_frame = None;
    }
}

// ============ Session ============

/// State of one opened stream
struct Session {
    reader: VqaReader<Box<dyn ReadSeek>>,
    video: VideoDecoder,
    audio: Option<AudioChannel>,
    state: PlaybackState,
    /// Chunks of the last presented frame, source of side-channel updates
    current: Option<FrameChunks>,
    /// Set by the first data error; the session is dead until reopened
    fault: Option<String>,
}

impl Session {
    fn step(
        &mut self,
        tick: Tick,
        force_draw: bool,
        surface: Option<&mut Surface>,
        preload: u32,
        output: &dyn AudioOutput,
    ) -> VqaResult<(UpdateOutcome, Option<LoopEnded>)> {
        let (next, step) = self.state.step(tick);

        match step {
            Step::Advance { frame } => {
                let chunks = self
                    .reader
                    .read_frame(frame, ChannelMask::VIDEO | ChannelMask::SIDE_CHANNELS)?;
                self.video.decode_frame(&mut self.reader, &chunks, surface)?;
                self.current = Some(chunks);

                if let Some(audio) = &mut self.audio {
                    audio.advance(&mut self.reader, frame, next.range, preload, output)?;
                }
                self.state = next;
                Ok((UpdateOutcome::Presented(frame), None))
            }
            Step::Wrapped {
                pending_applied,
                ended_loop,
                started_loop,
            } => {
                self.state = next;
                log::debug!(
                    "[VqaPlayer] Wrapped to frame {} ({:?} -> {:?}, pending applied: {})",
                    next.range.begin,
                    ended_loop,
                    started_loop,
                    pending_applied
                );
                let event = pending_applied.then_some(LoopEnded {
                    ended_loop,
                    started_loop,
                });
                Ok((self.idle_or_redraw(force_draw, surface), event))
            }
            Step::Exhausted => {
                self.state = next;
                if force_draw {
                    if let Some(surface) = surface {
                        self.video.redraw(surface);
                    }
                }
                Ok((UpdateOutcome::Exhausted, None))
            }
            Step::Hold => {
                self.state = next;
                Ok((self.idle_or_redraw(force_draw, surface), None))
            }
        }
    }

    fn idle_or_redraw(&self, force_draw: bool, surface: Option<&mut Surface>) -> UpdateOutcome {
        match surface {
            Some(surface) if force_draw => self
                .video
                .redraw(surface)
                .map_or(UpdateOutcome::Idle, UpdateOutcome::Redrawn),
            _ => UpdateOutcome::Idle,
        }
    }

    fn restart_audio(&mut self, output: &dyn AudioOutput) {
        if let Some(audio) = &mut self.audio {
            audio.restart(output);
        }
    }

    fn shutdown(&mut self, output: &dyn AudioOutput) {
        if let Some(audio) = &mut self.audio {
            audio.stop(output);
        }
    }
}

// ============ Player ============

/// Player for one named VQA stream
pub struct VqaPlayer {
    name: String,
    resources: Arc<dyn ResourceProvider>,
    audio_output: Arc<dyn AudioOutput>,
    clock: Arc<dyn Clock>,
    config: PlayerConfig,
    session: Option<Session>,
    callback: Option<LoopEndedCallback>,
}

impl VqaPlayer {
    pub fn new(
        name: impl Into<String>,
        resources: Arc<dyn ResourceProvider>,
        audio_output: Arc<dyn AudioOutput>,
        clock: Arc<dyn Clock>,
        config: PlayerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            resources,
            audio_output,
            clock,
            config,
            session: None,
            callback: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    // ============ Lifecycle ============

    /// Open the stream, replacing any open session
    ///
    /// On failure the player stays closed.
    pub fn open(&mut self) -> VqaResult<()> {
        self.close();
        self.config.validate()?;

        let overrides: Vec<LoopOverride> =
            self.config.overrides_for(&self.name).cloned().collect();
        let stream = self.resources.open_stream(&self.name)?;
        let reader = VqaReader::open(stream, &self.name, &overrides)?;
        let info = reader.info().clone();

        let audio = match info.audio {
            Some(format) if self.audio_output.is_ready() => {
                Some(AudioChannel::new(format, info.frame_rate))
            }
            Some(_) => {
                log::warn!(
                    "[VqaPlayer] {}: audio output not ready, playing silently",
                    self.name
                );
                None
            }
            None => None,
        };

        let timer = FrameTimer::new(
            info.frame_rate,
            self.config.frame_time_slack_ms,
            self.config.max_drift_frames,
        );

        self.session = Some(Session {
            video: VideoDecoder::new(&info, self.config.codebook_cache_size),
            reader,
            audio,
            state: PlaybackState::new(info.frame_count, timer),
            current: None,
            fault: None,
        });
        log::info!("[VqaPlayer] Opened {}", self.name);
        Ok(())
    }

    /// Stop audio and release the stream; safe in any state
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.shutdown(self.audio_output.as_ref());
            log::info!("[VqaPlayer] Closed {}", self.name);
        }
        self.callback = None;
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Whether a data error stopped the open session
    pub fn is_faulted(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.fault.is_some())
    }

    fn session(&self) -> VqaResult<&Session> {
        self.session.as_ref().ok_or(VqaError::NotOpen)
    }

    fn live_session_mut(&mut self) -> VqaResult<&mut Session> {
        let session = self.session.as_mut().ok_or(VqaError::NotOpen)?;
        match &session.fault {
            Some(reason) => Err(VqaError::Faulted(reason.clone())),
            None => Ok(session),
        }
    }

    /// Latch a data error; every later call reports it until reopened
    fn fault(&mut self, error: &VqaError) {
        if let Some(session) = self.session.as_mut() {
            log::error!("[VqaPlayer] {}: playback aborted: {}", self.name, error);
            session.shutdown(self.audio_output.as_ref());
            session.fault = Some(error.to_string());
        }
    }

    // ============ Playback ============

    /// Run one scheduling step
    ///
    /// Decoded video goes to `surface` when given. Data errors are returned
    /// once and then latched as [`VqaError::Faulted`].
    pub fn update(
        &mut self,
        request: UpdateRequest,
        surface: Option<&mut Surface>,
    ) -> VqaResult<UpdateOutcome> {
        let tick = Tick {
            now_ms: self.clock.now_ms(),
            advance_frame: request.advance_frame,
            use_time: request.use_time && self.config.time_gated,
        };
        let preload = self.config.audio_preload_chunks;
        let output = Arc::clone(&self.audio_output);

        let session = self.live_session_mut()?;
        let result = session.step(tick, request.force_draw, surface, preload, output.as_ref());

        match result {
            Ok((outcome, event)) => {
                if let (Some(event), Some(callback)) = (event, self.callback.as_mut()) {
                    callback(event);
                }
                Ok(outcome)
            }
            Err(e) => {
                self.fault(&e);
                Err(e)
            }
        }
    }

    /// Play a loop from the loop table
    ///
    /// `callback` replaces any earlier one, even when `None`.
    pub fn set_loop(
        &mut self,
        loop_id: u32,
        repeats: impl Into<RepeatCount>,
        mode: LoopSetMode,
        callback: Option<LoopEndedCallback>,
    ) -> VqaResult<()> {
        let range = self.live_session_mut()?.reader.loops().get(loop_id)?;
        self.change_loop(
            LoopChange {
                range,
                repeats: repeats.into(),
                loop_id: Some(loop_id),
            },
            mode,
            callback,
        )
    }

    /// Play an arbitrary inclusive frame range
    pub fn set_begin_and_end_frame(
        &mut self,
        begin: u32,
        end: u32,
        repeats: impl Into<RepeatCount>,
        mode: LoopSetMode,
        callback: Option<LoopEndedCallback>,
    ) -> VqaResult<()> {
        self.change_loop(
            LoopChange {
                range: LoopRange::new(begin, end),
                repeats: repeats.into(),
                loop_id: None,
            },
            mode,
            callback,
        )
    }

    fn change_loop(
        &mut self,
        change: LoopChange,
        mode: LoopSetMode,
        callback: Option<LoopEndedCallback>,
    ) -> VqaResult<()> {
        let output = Arc::clone(&self.audio_output);
        let session = self.live_session_mut()?;
        let (state, effective) = session.state.apply_loop_change(change, mode)?;
        session.state = state;
        if effective == LoopSetMode::Immediate {
            session.restart_audio(output.as_ref());
        }

        log::debug!(
            "[VqaPlayer] {}: {:?} {}..={} x{} ({:?}{})",
            self.name,
            change.loop_id,
            change.range.begin,
            change.range.end,
            change.repeats.legacy(),
            effective,
            if effective != mode { ", promoted" } else { "" }
        );
        self.callback = callback;
        Ok(())
    }

    /// Make `frame` the next frame to present, keeping the active range
    pub fn seek_to(&mut self, frame: u32) -> VqaResult<()> {
        let output = Arc::clone(&self.audio_output);
        let session = self.live_session_mut()?;
        session.state = session.state.seek(frame)?;
        session.restart_audio(output.as_ref());
        log::debug!("[VqaPlayer] {}: seek to {}", self.name, frame);
        Ok(())
    }

    // ============ Queries ============

    pub fn loop_begin_frame(&self, loop_id: u32) -> VqaResult<u32> {
        Ok(self.session()?.reader.loop_begin_and_end(loop_id)?.0)
    }

    pub fn loop_end_frame(&self, loop_id: u32) -> VqaResult<u32> {
        Ok(self.session()?.reader.loop_begin_and_end(loop_id)?.1)
    }

    pub fn loops(&self) -> Option<&LoopTable> {
        self.session.as_ref().map(|s| s.reader.loops())
    }

    pub fn frame_count(&self) -> VqaResult<u32> {
        Ok(self.session()?.reader.frame_count())
    }

    pub fn frame_rate(&self) -> VqaResult<FrameRate> {
        Ok(self.session()?.reader.info().frame_rate)
    }

    /// Last presented frame
    pub fn current_frame(&self) -> Option<u32> {
        self.session.as_ref().and_then(|s| s.state.current_frame)
    }

    pub fn info(&self) -> Option<&VqaInfo> {
        self.session.as_ref().map(|s| s.reader.info())
    }

    /// Snapshot of the scheduler state
    pub fn state(&self) -> Option<PlaybackState> {
        self.session.as_ref().map(|s| s.state)
    }

    /// Whether audio output has been started for the current session
    pub fn audio_started(&self) -> bool {
        self.session
            .as_ref()
            .and_then(|s| s.audio.as_ref())
            .is_some_and(|a| a.handle.is_some())
    }

    // ============ Side Channels ============

    /// Apply the current frame's `ZBUF`; `Ok(false)` if it has none
    pub fn update_zbuffer(&mut self, target: &mut ZBuffer) -> VqaResult<bool> {
        self.apply_side_channel(|chunks| chunks.zbuffer.as_deref(), |data| target.update(data))
    }

    /// Apply the current frame's `VIEW`; `Ok(false)` if it has none
    pub fn update_view(&mut self, target: &mut View) -> VqaResult<bool> {
        self.apply_side_channel(|chunks| chunks.view.as_deref(), |data| target.update(data))
    }

    /// Apply the current frame's `LITE`; `Ok(false)` if it has none
    pub fn update_lights(&mut self, target: &mut Lights) -> VqaResult<bool> {
        self.apply_side_channel(|chunks| chunks.lights.as_deref(), |data| target.update(data))
    }

    /// Apply the current frame's `AESC`; `Ok(false)` if it has none
    pub fn update_screen_effects(&mut self, target: &mut ScreenEffects) -> VqaResult<bool> {
        self.apply_side_channel(
            |chunks| chunks.screen_effects.as_deref(),
            |data| target.update(data),
        )
    }

    fn apply_side_channel(
        &mut self,
        select: impl Fn(&FrameChunks) -> Option<&[u8]>,
        apply: impl FnOnce(&[u8]) -> VqaResult<()>,
    ) -> VqaResult<bool> {
        let session = self.live_session_mut()?;
        let Some(data) = session.current.as_ref().and_then(select) else {
            return Ok(false);
        };

        match apply(data) {
            Ok(()) => Ok(true),
            Err(e) => {
                self.fault(&e);
                Err(e)
            }
        }
    }
}

impl Drop for VqaPlayer {
    fn drop(&mut self) {
        self.close();
    }
}
