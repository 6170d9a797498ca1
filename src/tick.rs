//! The per-tick call-and-response state machine.
//!
//! [`TickLoop`] runs on the `interaction` thread and is the only writer of
//! the listen counter, the response and its schedule. The signal flags are
//! the only state shared with capture callbacks.

use crate::generation::{
    generator_index, qpm_from_control, temperature_from_control, GenerationRequest,
    GenerationWorker,
};
use crate::notify::StateNotifier;
use antiphon_core::{
    CaptureSession, ControlMap, ControlSignal, GeneratorError, InteractionState, MidiHub,
    NoteSequence, PlaybackSession, SignalFlag, TickSource, TimeWindow, WallClock,
};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Control value that switches looping on.
pub const LOOP_ON: u8 = 127;

/// Static parameters of one interaction.
#[derive(Debug, Clone)]
pub struct InteractionSettings {
    pub tick_source: TickSource,
    pub qpm: f64,
    pub allow_overlap: bool,
    /// Metronome channel; only used with a fixed tick period.
    pub metronome_channel: Option<u8>,
    pub generation_timeout: Option<Duration>,
    pub controls: ControlMap,
}

impl InteractionSettings {
    /// Channel of the metronome the engine drives, if any.
    pub fn driven_metronome(&self) -> Option<u8> {
        match self.tick_source {
            TickSource::Period(_) => self.metronome_channel,
            TickSource::Signal(_) => None,
        }
    }
}

/// One-shot operator signals, raised by capture callbacks and consumed by the loop.
#[derive(Debug, Default)]
pub struct Signals {
    pub end_call: SignalFlag,
    pub panic: SignalFlag,
    pub mutate: SignalFlag,
}

impl Signals {
    pub fn flag(&self, signal: ControlSignal) -> Option<&SignalFlag> {
        match signal {
            ControlSignal::EndCall => Some(&self.end_call),
            ControlSignal::Panic => Some(&self.panic),
            ControlSignal::Mutate => Some(&self.mutate),
            _ => None,
        }
    }

    pub fn clear_all(&self) {
        self.end_call.clear();
        self.panic.clear();
        self.mutate.clear();
    }
}

/// Stops the capture session when dropped.
pub struct CaptureGuard(pub Box<dyn CaptureSession>);

impl Deref for CaptureGuard {
    type Target = dyn CaptureSession;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl DerefMut for CaptureGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.0.stop();
    }
}

/// Stops the playback session when dropped.
pub struct PlaybackGuard(pub Box<dyn PlaybackSession>);

impl Deref for PlaybackGuard {
    type Target = dyn PlaybackSession;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl DerefMut for PlaybackGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}

impl Drop for PlaybackGuard {
    fn drop(&mut self) {
        self.0.stop();
    }
}

/// Stops the hub metronome when dropped.
pub struct MetronomeGuard(pub Arc<dyn MidiHub>);

impl Drop for MetronomeGuard {
    fn drop(&mut self) {
        self.0.stop_metronome();
    }
}

/// Tick-driven interaction state machine.
///
/// Field order is release order: playback, then capture, then the metronome.
pub struct TickLoop {
    playback: PlaybackGuard,
    capture: CaptureGuard,
    _metronome: Option<MetronomeGuard>,
    worker: GenerationWorker,
    hub: Arc<dyn MidiHub>,
    clock: Arc<dyn WallClock>,
    settings: InteractionSettings,
    signals: Arc<Signals>,
    notifier: Arc<StateNotifier>,
    stop: Arc<SignalFlag>,

    state: InteractionState,
    last_tick_time: f64,
    listen_ticks: u32,
    response: NoteSequence,
    response_start_time: f64,
    response_duration: f64,
}

impl TickLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hub: Arc<dyn MidiHub>,
        clock: Arc<dyn WallClock>,
        settings: InteractionSettings,
        capture: CaptureGuard,
        playback: PlaybackGuard,
        worker: GenerationWorker,
        signals: Arc<Signals>,
        notifier: Arc<StateNotifier>,
        stop: Arc<SignalFlag>,
    ) -> Self {
        let metronome = settings
            .driven_metronome()
            .map(|_| MetronomeGuard(Arc::clone(&hub)));
        let last_tick_time = capture.start_time();
        let qpm = settings.qpm;
        Self {
            playback,
            capture,
            _metronome: metronome,
            worker,
            hub,
            clock,
            settings,
            signals,
            notifier,
            stop,
            state: InteractionState::Idle,
            last_tick_time,
            listen_ticks: 0,
            response: NoteSequence::new(qpm),
            response_start_time: last_tick_time,
            response_duration: 0.0,
        }
    }

    /// Process ticks until stopped or the capture ends.
    pub fn run(&mut self) {
        self.update_state(InteractionState::Idle);
        if let Some(channel) = self.settings.driven_metronome() {
            self.hub
                .start_metronome(self.current_qpm(), self.last_tick_time, channel);
        }

        loop {
            if self.stop.is_raised() {
                break;
            }
            let Some(captured) = self.capture.next_tick() else {
                debug!("Capture ended");
                break;
            };
            if self.stop.is_raised() {
                break;
            }
            self.tick(captured);
        }

        debug!("Interaction loop exiting in state {}", self.state);
    }

    /// Consume the loop, releasing playback, capture and the metronome, and
    /// hand back the generator worker.
    pub fn into_worker(self) -> GenerationWorker {
        let TickLoop { worker, .. } = self;
        worker
    }

    fn tick(&mut self, mut captured: NoteSequence) {
        let tick_time = captured.total_time;

        if self.signals.panic.take() {
            info!("Panic: clearing response.");
            self.response = NoteSequence::new(self.current_qpm());
            self.playback.update_sequence(&self.response, None);
        }

        let qpm = self.current_qpm();
        if let Some(channel) = self.settings.driven_metronome() {
            self.hub.start_metronome(qpm, tick_time, channel);
        }
        captured.qpm = qpm;

        let tick_duration = tick_time - self.last_tick_time;
        let silent = captured.is_empty() || captured.last_end_time() <= self.last_tick_time;
        if !silent {
            self.listen_ticks += 1;
        }
        debug!(
            "Tick at {:.3}s ({:.3}s): {} note(s), silent={}, listen_ticks={}",
            tick_time,
            tick_duration,
            captured.len(),
            silent,
            self.listen_ticks
        );

        if captured.is_empty() {
            if self.response.total_time <= tick_time {
                self.update_state(InteractionState::Idle);
            }
            if self.capture.start_time() < tick_time {
                self.capture.set_start_time(tick_time);
            }
            self.signals.end_call.clear();
            self.listen_ticks = 0;
        } else if self.signals.end_call.is_raised() || silent || self.max_listen_reached() {
            let min_listen_ticks = self.control(ControlSignal::MinListenTicks).unwrap_or(0) as u32;
            if self.listen_ticks < min_listen_ticks {
                info!(
                    "Input too short ({} < {} ticks). Skipping response.",
                    self.listen_ticks, min_listen_ticks
                );
                self.capture.set_start_time(tick_time);
            } else {
                self.respond(captured, tick_time, tick_duration, silent);
            }
            self.signals.end_call.clear();
            self.listen_ticks = 0;
        } else {
            self.update_state(InteractionState::Listening);
        }

        self.mutate_or_loop(tick_time);

        self.last_tick_time = tick_time;
    }

    fn respond(&mut self, captured: NoteSequence, tick_time: f64, tick_duration: f64, silent: bool) {
        self.update_state(InteractionState::Responding);

        let mut capture_start = self.capture.start_time();
        let mut input = captured;
        if silent {
            // The final tick added nothing; line the phrase up with its end.
            input = input.shifted(tick_duration);
            input.total_time = tick_time;
            capture_start += tick_duration;
        }

        let duration = match self.control(ControlSignal::ResponseTicks) {
            Some(ticks) if ticks > 0 => ticks as f64 * tick_duration,
            _ => tick_time - capture_start,
        };
        let mut start = tick_time;

        let generated = self.generate(input, capture_start, TimeWindow::new(start, start + duration));
        let mut response = match generated {
            Ok(response) => response,
            Err(e) => {
                error!("Response generation failed, keeping previous response: {}", e);
                self.capture.set_start_time(tick_time);
                return;
            }
        };

        let elapsed = self.clock.now() - start;
        if tick_duration > 0.0 && elapsed >= tick_duration / 4.0 {
            let push_ticks = (elapsed / tick_duration).floor() + 1.0;
            let push = push_ticks * tick_duration;
            warn!(
                "Generation took {:.3}s; pushing response {} tick(s) to {:.3}s.",
                elapsed, push_ticks, start + push
            );
            response = response.shifted(push);
            start += push;
        }

        self.playback.update_sequence(&response, Some(start));
        self.response = response;
        self.response_start_time = start;
        self.response_duration = duration;

        let next_capture_start = if self.settings.allow_overlap {
            start
        } else {
            start + duration
        };
        self.capture.set_start_time(next_capture_start);
    }

    fn mutate_or_loop(&mut self, tick_time: f64) {
        let mutate = self.signals.mutate.is_raised();
        if mutate && self.response.is_empty() {
            warn!("Mutate requested with no response to mutate.");
            self.signals.mutate.clear();
            return;
        }
        if self.response.is_empty() || self.response.total_time > tick_time {
            return;
        }
        let looping = self.control(ControlSignal::Loop) == Some(LOOP_ON);
        if !(looping || mutate) {
            return;
        }

        if mutate {
            self.signals.mutate.clear();
            let new_start = self.response_start_time + self.response_duration;
            let window = TimeWindow::new(new_start, new_start + self.response_duration);
            match self.generate(self.response.clone(), self.response_start_time, window) {
                Ok(mutated) => {
                    info!("Mutated response.");
                    self.response = mutated;
                    self.response_start_time = new_start;
                }
                Err(e) => {
                    error!("Mutation failed, keeping previous response: {}", e);
                    return;
                }
            }
        }

        self.response = self.response.shifted(tick_time - self.response_start_time);
        self.response_start_time = tick_time;
        self.playback.update_sequence(&self.response, Some(tick_time));
    }

    fn generate(
        &mut self,
        input: NoteSequence,
        zero_time: f64,
        window: TimeWindow,
    ) -> Result<NoteSequence, GeneratorError> {
        let request = GenerationRequest {
            generator: generator_index(
                self.control(ControlSignal::GeneratorSelect),
                self.worker.generator_count(),
            ),
            input,
            zero_time,
            window,
            temperature: temperature_from_control(self.control(ControlSignal::Temperature)),
        };
        self.worker
            .generate(request, self.settings.generation_timeout, &self.stop)
    }

    fn update_state(&mut self, state: InteractionState) {
        if let Some(control) = self.settings.controls.get(ControlSignal::State) {
            self.hub.send_control_change(control, state.as_u8());
        }
        if state != self.state {
            info!("State: {}", state);
        } else {
            debug!("State: {}", state);
        }
        self.state = state;
        self.notifier.publish(state);
    }

    fn max_listen_reached(&self) -> bool {
        match self.control(ControlSignal::MaxListenTicks) {
            Some(max) if max > 0 => self.listen_ticks >= max as u32,
            _ => false,
        }
    }

    fn current_qpm(&self) -> f64 {
        qpm_from_control(self.control(ControlSignal::Tempo), self.settings.qpm)
    }

    /// Current value of the control bound to `signal`.
    fn control(&self, signal: ControlSignal) -> Option<u8> {
        self.settings
            .controls
            .get(signal)
            .and_then(|control| self.hub.control_value(control))
    }
}
