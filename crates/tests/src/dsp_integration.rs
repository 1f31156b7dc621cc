//! Integration tests for DSP units driven by the engine and mixer
//!
//! These tests run the control side and the audio side together, both in
//! lockstep on one thread and with the mixer on its own audio thread.

use minstrel_core::domain::units::{self, GainMeterControl};
use minstrel_core::domain::{
    AttachTarget, Attachment, AudioBuffer, AudioSide, ControlSide, DspState, DspUnitBuilder,
    EngineConfig, EventHandle, SignalSource,
};
use minstrel_infra::audio::{AudioThread, Engine, EngineError, Mixer, ToneBank};
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

const BANK: &str = r#"
[[events]]
id = "beep"
frequency_hz = 440.0
amplitude = 0.5

[[events]]
id = "boop"
frequency_hz = 660.0
amplitude = 0.5
"#;

/// Plays one event as a constant signal
struct ConstantSource {
    event: EventHandle,
    value: f32,
}

impl SignalSource for ConstantSource {
    fn render_events(
        &mut self,
        scratch: &mut AudioBuffer<'_>,
        sink: &mut dyn FnMut(EventHandle, &mut AudioBuffer<'_>),
    ) {
        scratch.fill(self.value);
        sink(self.event, scratch);
    }

    fn capture_input(&mut self, _buffer: &mut AudioBuffer<'_>) -> bool {
        false
    }
}

fn engine_with_bank() -> (Engine, Mixer, EventHandle, EventHandle) {
    let (mut bank, _source) = ToneBank::new(44_100);
    bank.load_bank_str(BANK).unwrap();
    let (engine, mixer) = Engine::new(EngineConfig::default(), Box::new(bank)).unwrap();
    let beep = engine.event_handle("beep").unwrap();
    let boop = engine.event_handle("boop").unwrap();
    (engine, mixer, beep, boop)
}

fn render(mixer: &mut Mixer, source: &mut dyn SignalSource) -> Vec<f32> {
    let mut out = vec![0.0; mixer.samples_per_buffer()];
    mixer.render(source, &mut out);
    out
}

// ============================================================================
// PARAMETER EXCHANGE
// ============================================================================

#[test]
fn test_gain_scenario_end_to_end() {
    let (mut engine, mut mixer, beep, _) = engine_with_bank();
    let mut source = ConstantSource {
        event: beep,
        value: 1.0,
    };

    let unit = engine.create_dsp_unit(units::gain_meter(1.0)).unwrap();
    engine.control_mut::<GainMeterControl>(unit).unwrap().set_gain(0.5);
    engine.attach_to_event(Some(unit), beep).unwrap();

    // Tick: gain reaches the shared fields
    engine.update();

    // Buffer: gain reaches the audio side before process runs
    let out = render(&mut mixer, &mut source);
    assert!(out.iter().all(|s| (s - 0.5).abs() < 1e-6));

    // Next buffer publishes the RMS measured above; next tick reads it
    render(&mut mixer, &mut source);
    engine.update();

    let control = engine.control::<GainMeterControl>(unit).unwrap();
    assert!((control.rms - 0.5).abs() < 1e-6);
}

#[test]
fn test_gain_change_lags_one_tick() {
    let (mut engine, mut mixer, beep, _) = engine_with_bank();
    let mut source = ConstantSource {
        event: beep,
        value: 1.0,
    };

    let unit = engine.create_dsp_unit(units::gain_meter(1.0)).unwrap();
    engine.attach_to_event(Some(unit), beep).unwrap();
    engine.update();

    // Written on the control side but not yet exchanged
    engine.control_mut::<GainMeterControl>(unit).unwrap().set_gain(0.25);
    let out = render(&mut mixer, &mut source);
    assert!(out.iter().all(|s| (s - 1.0).abs() < 1e-6));

    engine.update();
    let out = render(&mut mixer, &mut source);
    assert!(out.iter().all(|s| (s - 0.25).abs() < 1e-6));
}

// ============================================================================
// ATTACHMENT
// ============================================================================

#[test]
fn test_event_then_input_leaves_only_input() {
    let (mut engine, mut mixer, beep, _) = engine_with_bank();
    let mut source = ConstantSource {
        event: beep,
        value: 1.0,
    };

    let first = engine.create_dsp_unit(units::gain_meter(0.0)).unwrap();
    engine.attach_to_event(Some(first), beep).unwrap();
    engine.attach_to_input(Some(first)).unwrap();

    // The event slot is free again: a second unit takes it without displacing
    let second = engine.create_dsp_unit(units::gain_meter(1.0)).unwrap();
    engine.attach_to_event(Some(second), beep).unwrap();

    assert_eq!(
        engine.attachment(first).unwrap(),
        Attachment::Attached(AttachTarget::Input)
    );
    assert_eq!(
        engine.attachment(second).unwrap(),
        Attachment::Attached(AttachTarget::Event(beep))
    );

    // The muting unit no longer touches the event's audio
    let out = render(&mut mixer, &mut source);
    assert!(out.iter().all(|s| (s - 1.0).abs() < 1e-6));
    assert_eq!(mixer.target_of(first), Some(AttachTarget::Input));
}

#[test]
fn test_attach_displaces_previous_occupant() {
    let (mut engine, mut mixer, beep, boop) = engine_with_bank();

    let a = engine.create_dsp_unit(units::gain_meter(1.0)).unwrap();
    let b = engine.create_dsp_unit(units::gain_meter(1.0)).unwrap();
    engine.attach_to_event(Some(a), beep).unwrap();
    engine.attach_to_event(Some(b), boop).unwrap();
    engine.attach_to_event(Some(b), beep).unwrap();

    assert_eq!(engine.attachment(a).unwrap(), Attachment::Unattached);
    render(&mut mixer, &mut minstrel_core::domain::Silence);
    assert_eq!(mixer.target_of(a), None);
    assert_eq!(mixer.target_of(b), Some(AttachTarget::Event(beep)));
}

#[test]
fn test_released_handle_is_rejected() {
    let (mut engine, _mixer, beep, _) = engine_with_bank();
    let unit = engine.create_dsp_unit(units::gain_meter(1.0)).unwrap();
    engine.release(unit).unwrap();

    assert!(matches!(
        engine.attach_to_event(Some(unit), beep),
        Err(EngineError::InvalidHandle(_))
    ));
    assert!(matches!(
        engine.control::<GainMeterControl>(unit),
        Err(EngineError::InvalidHandle(_))
    ));
}

// ============================================================================
// DETACH WHILE THE AUDIO THREAD IS INSIDE PROCESS
// ============================================================================

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct BlockingAudio {
    entered: Option<mpsc::Sender<()>>,
    go: mpsc::Receiver<()>,
    _flag: DropFlag,
}

#[test]
fn test_release_waits_for_running_callback() {
    let (mut bank, source) = ToneBank::new(44_100);
    bank.load_bank_str(BANK).unwrap();
    let (mut engine, mixer) = Engine::new(EngineConfig::default(), Box::new(bank)).unwrap();
    let beep = engine.event_handle("beep").unwrap();
    engine.start_event(beep).unwrap();

    let (entered_tx, entered_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel();
    let dropped = Arc::new(AtomicBool::new(false));

    let audio = BlockingAudio {
        entered: Some(entered_tx),
        go: go_rx,
        _flag: DropFlag(Arc::clone(&dropped)),
    };
    let builder = DspUnitBuilder::new(DspState::new((), audio, ())).process(
        |_, audio: &mut BlockingAudio| {
            if let Some(entered) = audio.entered.take() {
                entered.send(()).unwrap();
                audio.go.recv().unwrap();
            }
        },
    );

    let unit = engine.create_dsp_unit(builder).unwrap();
    engine.attach_to_event(Some(unit), beep).unwrap();

    let thread = AudioThread::spawn(mixer, source, Duration::from_millis(1)).unwrap();
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // The mixer is inside process; releasing must not free the state yet
    engine.release(unit).unwrap();
    engine.update();
    assert!(!dropped.load(Ordering::SeqCst));

    go_tx.send(()).unwrap();

    let started = Instant::now();
    while !dropped.load(Ordering::SeqCst) && started.elapsed() < Duration::from_secs(5) {
        engine.update();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(dropped.load(Ordering::SeqCst));

    let (mixer, _source) = thread.stop().unwrap();
    assert_eq!(mixer.unit_count(), 0);
}

// ============================================================================
// EDGE CASES
// ============================================================================

#[test]
fn test_zero_frame_buffer_keeps_metrics() {
    let unit = units::gain_meter(1.0).build().unwrap();
    let (_, mut control, mut audio) = unit.into_parts();

    let mut data = vec![0.5_f32; 8];
    audio.update();
    audio.process(&mut AudioBuffer::new(&mut data, 2));

    let mut empty: Vec<f32> = Vec::new();
    audio.update();
    audio.process(&mut AudioBuffer::new(&mut empty, 2));
    audio.update();
    control.update();

    let rms = control.downcast_state::<GainMeterControl>().unwrap().rms;
    assert!((rms - 0.5).abs() < 1e-6);
}

#[tokio::test]
async fn test_engine_from_config_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("engine.toml");

    let config = EngineConfig {
        sample_rate: 48_000,
        channels: 1,
        frames_per_buffer: 64,
        ..EngineConfig::default()
    };
    config.save_to_file(&path).await.unwrap();

    let loaded = EngineConfig::load_from_file(&path).await.unwrap();
    let (bank, _source) = ToneBank::new(loaded.sample_rate);
    let (engine, mixer) = Engine::new(loaded, Box::new(bank)).unwrap();

    assert_eq!(engine.config().sample_rate, 48_000);
    assert_eq!(mixer.samples_per_buffer(), 64);
    assert_eq!(mixer.output_channels(), 1);
}

proptest! {
    #[test]
    fn prop_published_rms_matches_gain(value in -1.0f32..1.0, gain in 0.0f32..4.0) {
        let (mut engine, mut mixer, beep, _) = engine_with_bank();
        let mut source = ConstantSource { event: beep, value };

        let unit = engine.create_dsp_unit(units::gain_meter(gain)).unwrap();
        engine.attach_to_event(Some(unit), beep).unwrap();
        engine.update();
        render(&mut mixer, &mut source);
        render(&mut mixer, &mut source);
        engine.update();

        let rms = engine.control::<GainMeterControl>(unit).unwrap().rms;
        let expected = (value * gain).abs();
        prop_assert!((rms - expected).abs() < 1e-4 * (1.0 + expected));
    }

    #[test]
    fn prop_exchange_follows_tick_and_buffer_order(
        steps in proptest::collection::vec(step(), 1..60)
    ) {
        let (mut engine, mut mixer, beep, _) = engine_with_bank();
        let mut source = ConstantSource { event: beep, value: 1.0 };

        let unit = engine.create_dsp_unit(units::gain_meter(1.0)).unwrap();
        engine.attach_to_event(Some(unit), beep).unwrap();

        let mut model = ExchangeModel::new(1.0);

        for step in steps {
            match step {
                Step::SetGain(gain) => {
                    engine.control_mut::<GainMeterControl>(unit).unwrap().set_gain(gain);
                    model.written = gain;
                }
                Step::Tick => {
                    engine.update();
                    model.tick();

                    let rms = engine.control::<GainMeterControl>(unit).unwrap().rms;
                    prop_assert!(close(rms, model.control_rms), "rms {} != {}", rms, model.control_rms);
                    // Only levels of buffers that were actually rendered
                    prop_assert!(
                        rms == 0.0 || model.rendered.iter().any(|&r| close(rms, r)),
                        "rms {} matches no rendered buffer", rms
                    );
                }
                Step::Render => {
                    let out = render(&mut mixer, &mut source);
                    model.render();

                    // The gain published by the latest tick, never a later write
                    let applied = model.published;
                    prop_assert!(out.iter().all(|&s| s == applied), "expected gain {}", applied);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Step {
    SetGain(f32),
    Tick,
    Render,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0.0f32..4.0).prop_map(Step::SetGain),
        Just(Step::Tick),
        Just(Step::Render),
    ]
}

/// Expected values on both sides of one gain meter fed a constant 1.0
struct ExchangeModel {
    /// Latest control-side write
    written: f32,
    /// Shared gain: the last write before the latest tick
    published: f32,
    /// Level measured by the latest buffer, published with the next one
    measured: f32,
    shared_rms: f32,
    control_rms: f32,
    rendered: Vec<f32>,
}

impl ExchangeModel {
    fn new(gain: f32) -> Self {
        Self {
            written: gain,
            published: gain,
            measured: 0.0,
            shared_rms: 0.0,
            control_rms: 0.0,
            rendered: Vec::new(),
        }
    }

    fn tick(&mut self) {
        self.control_rms = self.shared_rms;
        self.published = self.written;
    }

    fn render(&mut self) {
        self.shared_rms = self.measured;
        self.measured = self.published;
        self.rendered.push(self.measured);
    }
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() <= 1e-4 * (1.0 + b.abs())
}
