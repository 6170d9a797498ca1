//! Interaction that coordinates capture, generation and playback.

use crate::builder::InteractionBuilder;
use crate::generation::GenerationWorker;
use crate::notify::StateNotifier;
use crate::tick::{CaptureGuard, InteractionSettings, PlaybackGuard, Signals, TickLoop};
use crate::{Error, Result};
use antiphon_core::{
    ControlSignal, InteractionState, MidiHub, MidiSignal, NoteSequence, SignalCallback,
    SignalFlag, TickSource, WallClock,
};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info};

/// Real-time call-and-response interaction.
///
/// Listens on the hub's capture session one tick at a time, answers finished
/// call phrases with generated responses and keeps the response schedule ahead
/// of the wall clock. The tick loop runs on its own `interaction` thread
/// between [`start`](Self::start) and [`stop`](Self::stop).
///
/// # Example
///
/// ```ignore
/// use antiphon::prelude::*;
///
/// let mut interaction = Interaction::builder()
///     .hub(hub)
///     .generator(EchoGenerator::new())
///     .tick_duration(2.0)
///     .build()?;
///
/// let states = interaction.subscribe_states();
/// interaction.start()?;
/// // ...
/// interaction.stop();
/// ```
pub struct Interaction {
    hub: Arc<dyn MidiHub>,
    clock: Arc<dyn WallClock>,
    settings: InteractionSettings,
    generator_ids: Vec<String>,
    worker: Option<GenerationWorker>,
    signals: Arc<Signals>,
    notifier: Arc<StateNotifier>,
    running: Option<RunningLoop>,
}

struct RunningLoop {
    stop: Arc<SignalFlag>,
    capture_stop: Arc<SignalFlag>,
    thread: JoinHandle<GenerationWorker>,
}

impl Interaction {
    pub fn builder() -> InteractionBuilder {
        InteractionBuilder::default()
    }

    pub(crate) fn new(
        hub: Arc<dyn MidiHub>,
        clock: Arc<dyn WallClock>,
        settings: InteractionSettings,
        worker: GenerationWorker,
    ) -> Self {
        Self {
            hub,
            clock,
            settings,
            generator_ids: worker.generator_ids().to_vec(),
            worker: Some(worker),
            signals: Arc::new(Signals::default()),
            notifier: Arc::new(StateNotifier::new()),
            running: None,
        }
    }

    /// Open capture and playback on the hub and start the tick loop.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(Error::Engine("interaction already running".to_string()));
        }
        let worker = self
            .worker
            .take()
            .ok_or_else(|| Error::Engine("generator worker is gone".to_string()))?;

        self.signals.clear_all();
        let (capture, playback) = match self.open_sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                self.worker = Some(worker);
                return Err(e);
            }
        };

        let stop = Arc::new(SignalFlag::new());
        let capture_stop = capture.stop_handle();
        let mut tick_loop = TickLoop::new(
            Arc::clone(&self.hub),
            Arc::clone(&self.clock),
            self.settings.clone(),
            capture,
            playback,
            worker,
            Arc::clone(&self.signals),
            Arc::clone(&self.notifier),
            Arc::clone(&stop),
        );

        let thread = std::thread::Builder::new()
            .name("interaction".into())
            .spawn(move || {
                tick_loop.run();
                tick_loop.into_worker()
            })?;

        info!("Interaction started ({:?})", self.settings.tick_source);
        self.running = Some(RunningLoop {
            stop,
            capture_stop,
            thread,
        });
        Ok(())
    }

    fn open_sessions(&self) -> Result<(CaptureGuard, PlaybackGuard)> {
        let qpm = self.settings.qpm;
        let mut capture = CaptureGuard(self.hub.start_capture(
            qpm,
            self.clock.now(),
            self.settings.tick_source,
        )?);

        for signal in [ControlSignal::EndCall, ControlSignal::Panic, ControlSignal::Mutate] {
            if let Some(control) = self.settings.controls.get(signal) {
                capture.register_callback(MidiSignal::control(control), self.callback(signal));
            }
        }

        let playback = PlaybackGuard(self.hub.start_playback(&NoteSequence::new(qpm))?);
        Ok((capture, playback))
    }

    fn callback(&self, signal: ControlSignal) -> SignalCallback {
        let signals = Arc::clone(&self.signals);
        Arc::new(move || {
            info!("Signal received: {}", signal);
            if let Some(flag) = signals.flag(signal) {
                flag.raise();
            }
        })
    }

    /// Stop the tick loop and wait for it to release its sessions.
    ///
    /// A generation call in progress is waited for unless a generation
    /// timeout is configured.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.stop.raise();
        running.capture_stop.raise();
        match running.thread.join() {
            Ok(worker) => self.worker = Some(worker),
            Err(_) => error!("Interaction thread panicked"),
        }
        self.notifier.publish(InteractionState::Idle);
        info!("Interaction stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.thread.is_finished())
    }

    /// Most recently published state.
    pub fn state(&self) -> InteractionState {
        self.notifier.current()
    }

    /// Every state update from now on, including repeats of the same state.
    pub fn subscribe_states(&self) -> Receiver<InteractionState> {
        self.notifier.subscribe()
    }

    /// Raise the end-of-call signal as if its control had been sent.
    pub fn end_call(&self) {
        self.signals.end_call.raise();
    }

    /// Clear the response on the next tick.
    pub fn panic(&self) {
        self.signals.panic.raise();
    }

    /// Regenerate from the current response once it has finished playing.
    pub fn mutate(&self) {
        self.signals.mutate.raise();
    }

    pub fn tick_source(&self) -> TickSource {
        self.settings.tick_source
    }

    pub fn generator_ids(&self) -> &[String] {
        &self.generator_ids
    }

    pub fn hub(&self) -> &Arc<dyn MidiHub> {
        &self.hub
    }
}

impl Drop for Interaction {
    fn drop(&mut self) {
        self.stop();
    }
}
