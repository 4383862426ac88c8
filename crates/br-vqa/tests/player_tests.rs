//! VqaPlayer Integration Tests
//!
//! Tests for:
//! - Open/close lifecycle and stream metadata
//! - Loop scheduling (repeats, enqueue, immediate, just-start)
//! - Time gating, drift resync and forced redraw
//! - Audio preload and restart on seek
//! - Side-channel updates
//! - Fault latching after corrupt data

use std::sync::Arc;

use nalgebra::{Matrix3x4, Vector3};
use parking_lot::Mutex;

use br_audio::{AudioOutput, AudioResult, QueuingAudioStream, SoftwareMixer, SoundHandle};
use br_core::{ManualClock, SampleRate, Surface};
use br_vqa::{
    BlockCommand, Codebook, DirectoryResources, FrameSpec, Light, LightKind, Lights, LoopEnded,
    LoopSetMode, MemoryResources, PlayerConfig, RepeatCount, ResourceProvider, ScreenEffect,
    ScreenEffects, UpdateOutcome, UpdateRequest, View, VqaBuilder, VqaError, VqaPlayer, ZBuffer,
    loop_ended_channel,
};

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

const NAME: &str = "TEST.VQA";
const WIDTH: u16 = 8;
const HEIGHT: u16 = 4;

/// 256 entries, entry `i` is solid pixel value `i + base`
fn codebook(base: u16) -> Codebook {
    Codebook::new(4, 2, (0..256u16).flat_map(|i| [i + base; 8]).collect())
}

/// Frame filled with entry `frame % 255 + 1`, so its pixels read `frame + 1`
fn solid(frame: u16) -> FrameSpec {
    FrameSpec::new().commands(
        vec![BlockCommand::Fill {
            entry: frame % 255 + 1,
            count: 4,
        }],
        false,
    )
}

fn expected_pixel(frame: u32) -> u16 {
    (frame % 255 + 1) as u16
}

fn stream(frame_count: u16, loops: &[(u16, u16)], audio: bool) -> Vec<u8> {
    let mut builder = VqaBuilder::new(WIDTH, HEIGHT);
    for &(begin, end) in loops {
        builder = builder.add_loop(begin, end);
    }
    if audio {
        builder = builder.audio(SampleRate::Hz22050);
    }
    for f in 0..frame_count {
        let mut spec = solid(f);
        if f == 0 {
            spec = spec.codebook(codebook(0), true);
        }
        if audio {
            spec = spec.audio(&[500; 1470]);
        }
        builder = builder.frame(spec);
    }
    builder.build().unwrap()
}

/// Audio output that records how many chunks each stream held when started
struct RecordingOutput {
    mixer: SoftwareMixer,
    starts: Mutex<Vec<usize>>,
    streams: Mutex<Vec<QueuingAudioStream>>,
}

impl RecordingOutput {
    fn new(ready: bool) -> Self {
        Self {
            mixer: if ready {
                SoftwareMixer::new()
            } else {
                SoftwareMixer::unavailable()
            },
            starts: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
        }
    }

    fn starts(&self) -> Vec<usize> {
        self.starts.lock().clone()
    }
}

impl AudioOutput for RecordingOutput {
    fn is_ready(&self) -> bool {
        self.mixer.is_ready()
    }

    fn play_stream(&self, stream: QueuingAudioStream) -> AudioResult<SoundHandle> {
        self.starts.lock().push(stream.pending_chunks());
        self.streams.lock().push(stream.clone());
        self.mixer.play_stream(stream)
    }

    fn stop(&self, handle: SoundHandle) {
        self.mixer.stop(handle);
    }

    fn is_playing(&self, handle: SoundHandle) -> bool {
        self.mixer.is_playing(handle)
    }
}

struct Harness {
    player: VqaPlayer,
    clock: ManualClock,
    output: Arc<RecordingOutput>,
    surface: Surface,
}

impl Harness {
    fn new(data: Vec<u8>) -> Self {
        Self::with(data, PlayerConfig::default(), true)
    }

    fn with(data: Vec<u8>, config: PlayerConfig, audio_ready: bool) -> Self {
        let resources = Arc::new(MemoryResources::new());
        resources.insert(NAME, data);
        Self::with_resources(resources, config, audio_ready)
    }

    fn with_resources(
        resources: Arc<dyn ResourceProvider>,
        config: PlayerConfig,
        audio_ready: bool,
    ) -> Self {
        let clock = ManualClock::new(0);
        let output = Arc::new(RecordingOutput::new(audio_ready));
        let mut player = VqaPlayer::new(
            NAME,
            resources,
            output.clone(),
            Arc::new(clock.clone()),
            config,
        );
        player.open().unwrap();
        Self {
            player,
            clock,
            output,
            surface: Surface::new(WIDTH as u32, HEIGHT as u32),
        }
    }

    /// Untimed update, returning the engine sentinel
    fn tick(&mut self) -> i32 {
        self.update(UpdateRequest::untimed()).unwrap().code()
    }

    fn timed(&mut self) -> UpdateOutcome {
        self.update(UpdateRequest::default()).unwrap()
    }

    fn update(&mut self, request: UpdateRequest) -> Result<UpdateOutcome, VqaError> {
        self.player.update(request, Some(&mut self.surface))
    }

    fn pixel(&self) -> u16 {
        self.surface.pixel(0, 0).unwrap()
    }

    /// Tick until something other than a frame comes back
    fn run(&mut self) -> (Vec<u32>, i32) {
        let mut frames = Vec::new();
        loop {
            match self.tick() {
                code if code >= 0 => {
                    assert_eq!(self.pixel(), expected_pixel(code as u32));
                    frames.push(code as u32);
                }
                code => return (frames, code),
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_open_reports_stream_info() {
    let h = Harness::new(stream(100, &[(0, 9), (10, 19)], false));

    assert!(h.player.is_open());
    assert_eq!(h.player.frame_count().unwrap(), 100);
    assert_eq!(h.player.frame_rate().unwrap().fps(), 15);
    assert_eq!(h.player.loop_begin_frame(1).unwrap(), 10);
    assert_eq!(h.player.loop_end_frame(1).unwrap(), 19);
    assert!(matches!(
        h.player.loop_begin_frame(5),
        Err(VqaError::LoopNotFound(5))
    ));
    assert_eq!(h.player.current_frame(), None);

    let info = h.player.info().unwrap();
    assert_eq!((info.width, info.height), (8, 4));
    assert!(!info.has_audio());
}

#[test]
fn test_open_failures_leave_player_closed() {
    let resources = Arc::new(MemoryResources::new());
    resources.insert("JUNK.VQA", vec![0u8; 64]);
    let output = Arc::new(SoftwareMixer::new());
    let clock = Arc::new(ManualClock::new(0));

    let mut player = VqaPlayer::new(
        "MISSING.VQA",
        resources.clone(),
        output.clone(),
        clock.clone(),
        PlayerConfig::default(),
    );
    assert!(matches!(player.open(), Err(VqaError::ResourceNotFound(_))));
    assert!(!player.is_open());
    assert!(matches!(
        player.update(UpdateRequest::default(), None),
        Err(VqaError::NotOpen)
    ));

    let mut player = VqaPlayer::new("junk.vqa", resources, output, clock, PlayerConfig::default());
    assert!(matches!(player.open(), Err(VqaError::Format(_))));
    assert!(!player.is_open());
    assert!(matches!(player.frame_count(), Err(VqaError::NotOpen)));
}

#[test]
fn test_close_is_idempotent_and_stops_audio() {
    let mut h = Harness::new(stream(30, &[], true));
    h.tick();
    assert!(h.player.audio_started());
    assert_eq!(h.output.mixer.active_streams(), 1);

    h.player.close();
    assert_eq!(h.output.mixer.active_streams(), 0);
    assert!(h.output.streams.lock()[0].is_finished());
    assert!(!h.player.is_open());
    assert!(!h.player.audio_started());

    h.player.close();
    assert!(matches!(
        h.update(UpdateRequest::default()),
        Err(VqaError::NotOpen)
    ));

    // Reopening starts from scratch
    h.player.open().unwrap();
    assert_eq!(h.tick(), 0);
}

#[test]
fn test_directory_resources_playback() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("test.vqa"), stream(3, &[], false)).unwrap();

    let resources = Arc::new(DirectoryResources::new(dir.path()));
    let mut h = Harness::with_resources(resources, PlayerConfig::default(), true);
    let (frames, code) = h.run();
    assert_eq!(frames, vec![0, 1, 2]);
    assert_eq!(code, -3);
}

#[test]
fn test_shared_player() {
    let h = Harness::new(stream(5, &[], false));
    let shared = br_vqa::shared(h.player);
    let mut surface = Surface::new(8, 4);

    let handle = {
        let shared = shared.clone();
        std::thread::spawn(move || {
            shared
                .lock()
                .update(UpdateRequest::untimed(), Some(&mut surface))
                .unwrap()
        })
    };
    assert_eq!(handle.join().unwrap(), UpdateOutcome::Presented(0));
    assert_eq!(shared.lock().current_frame(), Some(0));
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOOP SCHEDULING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_fresh_stream_plays_once_then_exhausts() {
    let mut h = Harness::new(stream(6, &[], false));
    let (frames, code) = h.run();
    assert_eq!(frames, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(code, -3);
    assert_eq!(h.tick(), -3);
    assert_eq!(h.player.current_frame(), Some(5));
}

#[test]
fn test_enqueued_loop_scenario() {
    let mut h = Harness::new(stream(100, &[(0, 9), (10, 19)], false));

    h.player
        .set_loop(0, -1, LoopSetMode::Immediate, None)
        .unwrap();
    assert_eq!(h.tick(), 0);

    let (callback, events) = loop_ended_channel();
    h.player
        .set_loop(1, 0, LoopSetMode::Enqueue, Some(callback))
        .unwrap();

    for frame in 1..=9 {
        assert_eq!(h.tick(), frame);
    }
    assert!(events.try_recv().is_err());

    // Crossing frame 9 wraps into the queued loop
    assert_eq!(h.tick(), -1);
    assert_eq!(
        events.try_recv().unwrap(),
        LoopEnded {
            ended_loop: Some(0),
            started_loop: Some(1),
        }
    );

    let (frames, code) = h.run();
    assert_eq!(frames, (10..=19).collect::<Vec<_>>());
    assert_eq!(code, -3);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_repeat_count_counts_extra_passes() {
    let mut h = Harness::new(stream(100, &[(0, 9), (10, 19)], false));
    h.player
        .set_loop(1, 1, LoopSetMode::Immediate, None)
        .unwrap();

    let (first, code) = h.run();
    assert_eq!(code, -1);
    let (second, code) = h.run();
    assert_eq!(code, -3);
    assert_eq!(first, (10..=19).collect::<Vec<_>>());
    assert_eq!(second, first);
}

#[test]
fn test_wrap_stays_in_range_until_exhausted() {
    let mut h = Harness::new(stream(40, &[], false));
    h.player
        .set_begin_and_end_frame(10, 20, 2, LoopSetMode::Immediate, None)
        .unwrap();

    let mut presented = Vec::new();
    let mut wraps = 0;
    loop {
        match h.tick() {
            -1 => wraps += 1,
            -3 => break,
            frame => presented.push(frame),
        }
    }
    assert_eq!(wraps, 2);
    assert_eq!(presented.len(), 33);
    assert!(presented.iter().all(|f| (10..=20).contains(f)));
    // Cursor never moves backwards within a pass
    for pass in presented.chunks(11) {
        assert!(pass.windows(2).all(|w| w[1] == w[0] + 1));
    }
}

#[test]
fn test_enqueue_defers_until_wrap() {
    let mut h = Harness::new(stream(40, &[(0, 10), (20, 30)], false));
    h.player
        .set_loop(0, RepeatCount::Forever, LoopSetMode::Immediate, None)
        .unwrap();
    assert_eq!(h.tick(), 0);
    assert_eq!(h.tick(), 1);

    let (callback, events) = loop_ended_channel();
    h.player
        .set_loop(1, 1, LoopSetMode::Enqueue, Some(callback))
        .unwrap();

    let (frames, code) = h.run();
    assert_eq!(frames, (2..=10).collect::<Vec<_>>());
    assert_eq!(code, -1);
    assert_eq!(events.try_iter().count(), 1);

    let (frames, code) = h.run();
    assert_eq!(frames, (20..=30).collect::<Vec<_>>());
    assert_eq!(code, -1);
    let (frames, code) = h.run();
    assert_eq!(frames, (20..=30).collect::<Vec<_>>());
    assert_eq!(code, -3);

    // The plain repeat wrap does not notify
    assert_eq!(events.try_iter().count(), 0);
}

#[test]
fn test_callback_replaced_by_later_change() {
    let mut h = Harness::new(stream(40, &[(0, 4), (10, 14), (20, 24)], false));
    h.player
        .set_loop(0, -1, LoopSetMode::Immediate, None)
        .unwrap();

    let (first, first_events) = loop_ended_channel();
    let (second, second_events) = loop_ended_channel();
    h.player
        .set_loop(1, 0, LoopSetMode::Enqueue, Some(first))
        .unwrap();
    h.player
        .set_loop(2, 0, LoopSetMode::Enqueue, Some(second))
        .unwrap();

    let (frames, _) = h.run();
    assert_eq!(frames, (0..=4).collect::<Vec<_>>());
    let (frames, _) = h.run();
    assert_eq!(frames, (20..=24).collect::<Vec<_>>());

    assert!(first_events.try_recv().is_err());
    assert_eq!(second_events.try_recv().unwrap().started_loop, Some(2));
}

#[test]
fn test_immediate_mode_seeks_now() {
    let mut h = Harness::new(stream(100, &[(0, 9), (10, 19)], false));
    h.player
        .set_loop(0, -1, LoopSetMode::Immediate, None)
        .unwrap();
    for frame in 0..5 {
        assert_eq!(h.tick(), frame);
    }

    h.player
        .set_loop(1, -1, LoopSetMode::Immediate, None)
        .unwrap();
    assert_eq!(h.tick(), 10);
    assert_eq!(h.pixel(), expected_pixel(10));
}

#[test]
fn test_enqueue_promoted_when_nothing_repeats() {
    let mut h = Harness::new(stream(100, &[(0, 9), (10, 19)], false));
    assert_eq!(h.tick(), 0);

    // Fresh streams play once (no repeats), so there is no wrap to wait for
    h.player
        .set_loop(1, 0, LoopSetMode::Enqueue, None)
        .unwrap();
    assert_eq!(h.tick(), 10);
}

#[test]
fn test_just_start_before_first_frame() {
    let mut h = Harness::new(stream(100, &[(0, 9), (10, 19)], false));
    h.player
        .set_loop(1, 0, LoopSetMode::JustStart, None)
        .unwrap();
    let (frames, code) = h.run();
    assert_eq!(frames, (10..=19).collect::<Vec<_>>());
    assert_eq!(code, -3);
}

#[test]
fn test_rejected_changes_leave_state_unchanged() {
    let mut h = Harness::new(stream(100, &[(0, 9), (10, 19)], false));
    h.player
        .set_loop(0, -1, LoopSetMode::Immediate, None)
        .unwrap();
    h.tick();
    let before = h.player.state().unwrap();

    assert!(matches!(
        h.player
            .set_begin_and_end_frame(5, 5, 0, LoopSetMode::Immediate, None),
        Err(VqaError::InvalidRange { .. })
    ));
    assert!(matches!(
        h.player
            .set_begin_and_end_frame(50, 100, 0, LoopSetMode::Enqueue, None),
        Err(VqaError::InvalidRange { .. })
    ));
    assert!(matches!(
        h.player.set_loop(7, 0, LoopSetMode::Immediate, None),
        Err(VqaError::LoopNotFound(7))
    ));
    assert!(matches!(
        h.player.seek_to(100),
        Err(VqaError::FrameOutOfRange { .. })
    ));

    assert_eq!(h.player.state().unwrap(), before);
    assert!(!h.player.is_faulted());
    assert_eq!(h.tick(), 1);
}

#[test]
fn test_seek_to() {
    let mut h = Harness::new(stream(100, &[], false));
    assert_eq!(h.tick(), 0);
    h.player.seek_to(50).unwrap();
    assert_eq!(h.tick(), 50);
    assert_eq!(h.tick(), 51);
    assert_eq!(h.pixel(), expected_pixel(51));
}

#[test]
fn test_loop_override_from_config() {
    let config = PlayerConfig::default()
        .with_loop_override("test.vqa", 1, 15)
        .with_loop_override("OTHER.VQA", 0, 5);
    let h = Harness::with(stream(100, &[(0, 9), (10, 19)], false), config, true);
    assert_eq!(h.player.loop_end_frame(1).unwrap(), 15);
    assert_eq!(h.player.loop_end_frame(0).unwrap(), 9);

    let loops: Vec<_> = h.player.loops().unwrap().iter().collect();
    assert_eq!(loops, vec![(0, 0, 9), (1, 10, 15)]);
}

// ═══════════════════════════════════════════════════════════════════════════════
// TIMING AND REDRAW
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_time_gating() {
    let mut h = Harness::new(stream(100, &[], false));

    assert_eq!(h.timed(), UpdateOutcome::Presented(0));
    assert_eq!(h.timed(), UpdateOutcome::Idle);

    // 15 fps with 4 ms slack: frame 1 is due from 63 ms
    h.clock.set(62);
    assert_eq!(h.timed(), UpdateOutcome::Idle);
    h.clock.set(63);
    assert_eq!(h.timed(), UpdateOutcome::Presented(1));

    // Far behind: one frame, then the schedule restarts from now
    h.clock.set(10_000);
    assert_eq!(h.timed(), UpdateOutcome::Presented(2));
    assert_eq!(h.timed(), UpdateOutcome::Idle);
    h.clock.advance(67);
    assert_eq!(h.timed(), UpdateOutcome::Presented(3));
}

#[test]
fn test_untimed_config_ignores_clock() {
    let mut h = Harness::with(stream(10, &[], false), PlayerConfig::untimed(), true);
    assert_eq!(h.timed(), UpdateOutcome::Presented(0));
    assert_eq!(h.timed(), UpdateOutcome::Presented(1));
}

#[test]
fn test_forced_redraw_is_idempotent() {
    let mut h = Harness::new(stream(100, &[], false));

    // Nothing decoded yet
    assert_eq!(h.update(UpdateRequest::redraw()).unwrap(), UpdateOutcome::Idle);

    assert_eq!(h.timed(), UpdateOutcome::Presented(0));
    assert_eq!(h.timed(), UpdateOutcome::Idle);
    let state = h.player.state().unwrap();

    for _ in 0..5 {
        h.surface.fill(0x7FFF);
        let outcome = h.update(UpdateRequest::redraw()).unwrap();
        assert_eq!(outcome, UpdateOutcome::Redrawn(0));
        assert_eq!(outcome.code(), -1);
        assert_eq!(h.pixel(), expected_pixel(0));
        assert_eq!(h.player.state().unwrap().next_frame, state.next_frame);
    }

    // Redraw never advances, even when the next frame is due
    h.clock.set(1_000);
    assert_eq!(
        h.update(UpdateRequest::redraw()).unwrap(),
        UpdateOutcome::Redrawn(0)
    );
    assert_eq!(h.timed(), UpdateOutcome::Presented(1));
}

#[test]
fn test_update_without_surface_keeps_decoding() {
    let mut h = Harness::new(stream(10, &[], false));
    assert_eq!(
        h.player.update(UpdateRequest::untimed(), None).unwrap(),
        UpdateOutcome::Presented(0)
    );
    assert_eq!(h.pixel(), 0);
    assert_eq!(
        h.update(UpdateRequest::redraw()).unwrap(),
        UpdateOutcome::Redrawn(0)
    );
    assert_eq!(h.pixel(), expected_pixel(0));
}

#[test]
fn test_frame_offset_positions_video() {
    let data = VqaBuilder::new(WIDTH, HEIGHT)
        .offset(2, 1)
        .frame(solid(0).codebook(codebook(0), false))
        .build()
        .unwrap();
    let mut h = Harness::new(data);
    h.surface = Surface::new(12, 6);

    assert_eq!(h.tick(), 0);
    assert_eq!(h.surface.pixel(0, 0), Some(0));
    assert_eq!(h.surface.pixel(2, 1), Some(1));
    assert_eq!(h.surface.pixel(9, 4), Some(1));
    assert_eq!(h.surface.pixel(10, 5), Some(0));
}

// ═══════════════════════════════════════════════════════════════════════════════
// CODEBOOKS
// ═══════════════════════════════════════════════════════════════════════════════

fn two_codebook_stream(indexed: bool) -> Vec<u8> {
    let mut builder = VqaBuilder::new(WIDTH, HEIGHT);
    if !indexed {
        builder = builder.without_codebook_index();
    }
    builder
        .frames((0..60).map(|f| match f {
            0 => solid(f).codebook(codebook(0), true),
            30 => solid(f).codebook(codebook(1000), false),
            _ => solid(f),
        }))
        .build()
        .unwrap()
}

#[test]
fn test_codebook_located_after_seek() {
    let mut h = Harness::new(two_codebook_stream(true));

    h.player.seek_to(40).unwrap();
    assert_eq!(h.tick(), 40);
    assert_eq!(h.pixel(), expected_pixel(40) + 1000);

    h.player.seek_to(5).unwrap();
    assert_eq!(h.tick(), 5);
    assert_eq!(h.pixel(), expected_pixel(5));

    h.player.seek_to(29).unwrap();
    assert_eq!(h.tick(), 29);
    assert_eq!(h.tick(), 30);
    assert_eq!(h.pixel(), expected_pixel(30) + 1000);
}

#[test]
fn test_unindexed_stream_cannot_start_mid_codebook() {
    let mut h = Harness::new(two_codebook_stream(false));
    h.player.seek_to(40).unwrap();
    assert!(matches!(
        h.update(UpdateRequest::untimed()),
        Err(VqaError::Decode(_))
    ));
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIO
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_audio_preload_before_start() {
    let mut h = Harness::new(stream(100, &[], true));
    assert!(!h.player.audio_started());

    assert_eq!(h.timed(), UpdateOutcome::Presented(0));
    assert!(h.player.audio_started());
    assert_eq!(h.output.starts(), vec![14]);

    // Burst plus the steady-state chunk for frame 14
    let stream = h.output.streams.lock()[0].clone();
    assert_eq!(stream.queued_total(), 15);

    assert_eq!(h.tick(), 1);
    assert_eq!(stream.queued_total(), 16);
    assert_eq!(h.output.starts().len(), 1);
}

#[test]
fn test_audio_not_started_while_holding() {
    let mut h = Harness::new(stream(100, &[], true));
    h.player.seek_to(3).unwrap();
    assert_eq!(
        h.update(UpdateRequest {
            advance_frame: false,
            ..UpdateRequest::default()
        })
        .unwrap(),
        UpdateOutcome::Idle
    );
    assert!(!h.player.audio_started());
    assert!(h.output.starts().is_empty());
}

#[test]
fn test_audio_lookahead_stays_in_range() {
    let mut h = Harness::new(stream(100, &[], true));
    h.player
        .set_begin_and_end_frame(0, 5, 0, LoopSetMode::Immediate, None)
        .unwrap();
    assert_eq!(h.tick(), 0);
    assert_eq!(h.output.starts(), vec![6]);

    let (frames, _) = h.run();
    assert_eq!(frames, vec![1, 2, 3, 4, 5]);
    assert_eq!(h.output.streams.lock()[0].queued_total(), 6);
}

#[test]
fn test_seek_restarts_audio() {
    let config = PlayerConfig {
        audio_preload_chunks: 4,
        ..PlayerConfig::default()
    };
    let mut h = Harness::with(stream(100, &[], true), config, true);
    assert_eq!(h.tick(), 0);
    h.player.seek_to(50).unwrap();
    assert!(!h.player.audio_started());
    assert!(h.output.streams.lock()[0].is_finished());

    assert_eq!(h.tick(), 50);
    assert_eq!(h.output.starts(), vec![4, 4]);
    assert_eq!(h.output.mixer.active_streams(), 1);
}

#[test]
fn test_frame_without_audio_keeps_its_slot() {
    let data = VqaBuilder::new(WIDTH, HEIGHT)
        .audio(SampleRate::Hz22050)
        .frames((0..40).map(|f| {
            let mut spec = solid(f);
            if f == 0 {
                spec = spec.codebook(codebook(0), true);
            }
            if f != 3 {
                spec = spec.audio(&[500; 1470]);
            }
            spec
        }))
        .build()
        .unwrap();
    let mut h = Harness::new(data);

    assert_eq!(h.tick(), 0);
    assert_eq!(h.output.starts(), vec![14]);

    // Burst of 14 plus frame 14, each one frame long
    let stream = h.output.streams.lock()[0].clone();
    let mut samples = vec![1i16; 16 * 1470];
    assert_eq!(stream.read(&mut samples), 15 * 1470);
    assert!(samples[3 * 1470..4 * 1470].iter().all(|&s| s == 0));
    assert!(samples[4 * 1470..5 * 1470].iter().any(|&s| s != 0));
}

#[test]
fn test_silent_playback_without_audio_device() {
    let mut h = Harness::with(stream(20, &[], true), PlayerConfig::default(), false);
    assert_eq!(h.tick(), 0);
    assert_eq!(h.tick(), 1);
    assert!(!h.player.audio_started());
    assert!(h.output.starts().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════════
// SIDE CHANNELS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_side_channels_follow_current_frame() {
    let view = View::new(
        0.9,
        Matrix3x4::new(1.0, 0.0, 0.0, 5.0, 0.0, 1.0, 0.0, 6.0, 0.0, 0.0, 1.0, 7.0),
    );
    let lights = Lights {
        lights: vec![Light {
            kind: LightKind::Spot,
            color: Vector3::new(1.0, 1.0, 1.0),
            position: Vector3::new(0.0, 10.0, 0.0),
            falloff_start: 1.0,
            falloff_end: 2.0,
        }],
    };
    let effects = ScreenEffects {
        effects: vec![ScreenEffect {
            x: 1,
            y: 1,
            width: 1,
            height: 1,
            z: 9,
            mask: vec![4],
        }],
    };

    let data = VqaBuilder::new(WIDTH, HEIGHT)
        .frame(
            solid(0)
                .codebook(codebook(0), true)
                .zbuffer(ZBuffer::encode_full(8, 4, &[700; 32]))
                .view(&view)
                .lights(&lights)
                .screen_effects(&effects),
        )
        .frame(solid(1).zbuffer(ZBuffer::encode_runs(8, 4, &[(3, vec![1, 2])])))
        .frame(solid(2))
        .build()
        .unwrap();
    let mut h = Harness::new(data);

    let mut zbuf = ZBuffer::new(8, 4);
    let mut target_view = View::default();
    let mut target_lights = Lights::default();
    let mut target_effects = ScreenEffects::default();

    // Nothing presented yet
    assert!(!h.player.update_zbuffer(&mut zbuf).unwrap());

    assert_eq!(h.tick(), 0);
    for _ in 0..2 {
        assert!(h.player.update_zbuffer(&mut zbuf).unwrap());
    }
    assert!(zbuf.data().iter().all(|&d| d == 700));
    assert!(h.player.update_view(&mut target_view).unwrap());
    assert_eq!(target_view.camera_position, Vector3::new(-5.0, -6.0, -7.0));
    assert!(h.player.update_lights(&mut target_lights).unwrap());
    assert_eq!(target_lights, lights);
    assert!(h.player.update_screen_effects(&mut target_effects).unwrap());
    assert_eq!(target_effects, effects);

    assert_eq!(h.tick(), 1);
    assert!(h.player.update_zbuffer(&mut zbuf).unwrap());
    assert_eq!(&zbuf.data()[..6], &[700, 700, 700, 1, 2, 700]);
    // Absent chunks leave targets alone
    assert!(!h.player.update_view(&mut target_view).unwrap());
    assert_eq!(target_view.fov_x, 0.9);

    assert_eq!(h.tick(), 2);
    assert!(!h.player.update_zbuffer(&mut zbuf).unwrap());
    assert!(!h.player.update_lights(&mut target_lights).unwrap());
    assert_eq!(target_lights.len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAULTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_decode_error_faults_session() {
    let data = VqaBuilder::new(WIDTH, HEIGHT)
        .frame(solid(0).codebook(codebook(0), false))
        .frame(solid(1))
        .frame(FrameSpec::new().commands(vec![BlockCommand::Single(300)], false))
        .frame(solid(3))
        .build()
        .unwrap();
    let mut h = Harness::new(data);

    assert_eq!(h.tick(), 0);
    assert_eq!(h.tick(), 1);
    assert!(matches!(
        h.update(UpdateRequest::untimed()),
        Err(VqaError::Decode(_))
    ));
    assert!(h.player.is_faulted());
    assert!(matches!(
        h.update(UpdateRequest::untimed()),
        Err(VqaError::Faulted(_))
    ));
    assert!(matches!(
        h.player.seek_to(0),
        Err(VqaError::Faulted(_))
    ));

    // Reopening clears the fault
    h.player.close();
    h.player.open().unwrap();
    assert!(!h.player.is_faulted());
    assert_eq!(h.tick(), 0);
}

#[test]
fn test_corrupt_side_channel_faults_session() {
    let data = VqaBuilder::new(WIDTH, HEIGHT)
        .frame(
            solid(0)
                .codebook(codebook(0), false)
                .zbuffer(ZBuffer::encode_full(4, 4, &[1; 16])),
        )
        .frame(solid(1))
        .build()
        .unwrap();
    let mut h = Harness::new(data);
    assert_eq!(h.tick(), 0);

    let mut zbuf = ZBuffer::new(8, 4);
    assert!(matches!(
        h.player.update_zbuffer(&mut zbuf),
        Err(VqaError::Decode(_))
    ));
    assert!(matches!(
        h.update(UpdateRequest::untimed()),
        Err(VqaError::Faulted(_))
    ));
}

#[test]
fn test_audio_device_rejecting_stream_faults_session() {
    struct RejectingOutput;

    impl AudioOutput for RejectingOutput {
        fn is_ready(&self) -> bool {
            true
        }
        fn play_stream(&self, _stream: QueuingAudioStream) -> AudioResult<SoundHandle> {
            Err(br_audio::AudioError::NotReady)
        }
        fn stop(&self, _handle: SoundHandle) {}
        fn is_playing(&self, _handle: SoundHandle) -> bool {
            false
        }
    }

    let resources = Arc::new(MemoryResources::new());
    resources.insert(NAME, stream(10, &[], true));
    let mut player = VqaPlayer::new(
        NAME,
        resources,
        Arc::new(RejectingOutput),
        Arc::new(ManualClock::new(0)),
        PlayerConfig::default(),
    );
    player.open().unwrap();
    assert!(matches!(
        player.update(UpdateRequest::untimed(), None),
        Err(VqaError::Audio(_))
    ));
    assert!(player.is_faulted());
}
