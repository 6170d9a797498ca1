//! Thread-safe control mapper with MIDI learn support.

use super::mapping::{ControlBinding, LearnOutcome};
use crate::event::MidiChannel;
use antiphon_core::{ControlMap, ControlNumber, ControlSignal};
use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, Receiver, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// What an incoming control change meant to the mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// The message completed a pending learn request.
    Learned(LearnOutcome),
    Bound(ControlSignal),
    Unbound,
}

#[derive(Debug)]
struct LearnState {
    signal: ControlSignal,
    reply: Sender<LearnOutcome>,
}

/// Maps control numbers to logical signals.
///
/// A control number is never bound to two signals at once, and each signal
/// holds at most one control number.
pub struct ControlMapper {
    bindings: DashMap<ControlNumber, ControlSignal>,
    learn_state: ArcSwap<Option<LearnState>>,
}

impl ControlMapper {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
            learn_state: ArcSwap::new(Arc::new(None)),
        }
    }

    /// Seed from a static map. Later duplicates are skipped.
    pub fn from_control_map(map: &ControlMap) -> Self {
        let mapper = Self::new();
        for (signal, control) in map.entries() {
            if let Some(control) = control {
                if let Err(bound_to) = mapper.assign(signal, control) {
                    debug!(
                        "Skipping `{}`: control {} already bound to `{}`",
                        signal, control, bound_to
                    );
                }
            }
        }
        mapper
    }

    /// Bind `signal` to `control`, replacing the signal's previous control.
    ///
    /// Fails with the current owner if `control` belongs to another signal.
    pub fn assign(
        &self,
        signal: ControlSignal,
        control: ControlNumber,
    ) -> std::result::Result<(), ControlSignal> {
        match self.bindings.entry(control) {
            Entry::Occupied(entry) if *entry.get() != signal => return Err(*entry.get()),
            Entry::Occupied(_) => return Ok(()),
            Entry::Vacant(entry) => {
                entry.insert(signal);
            }
        }
        self.bindings
            .retain(|bound, bound_signal| *bound_signal != signal || *bound == control);
        Ok(())
    }

    pub fn unbind(&self, signal: ControlSignal) -> Option<ControlNumber> {
        let control = self.control_for(signal)?;
        self.bindings.remove(&control).map(|(control, _)| control)
    }

    pub fn signal_for(&self, control: ControlNumber) -> Option<ControlSignal> {
        self.bindings.get(&control).map(|entry| *entry.value())
    }

    pub fn control_for(&self, signal: ControlSignal) -> Option<ControlNumber> {
        self.bindings
            .iter()
            .find(|entry| *entry.value() == signal)
            .map(|entry| *entry.key())
    }

    /// All bindings ordered by control number.
    pub fn bindings(&self) -> Vec<ControlBinding> {
        let mut bindings: Vec<_> = self
            .bindings
            .iter()
            .map(|entry| ControlBinding::new(*entry.key(), *entry.value()))
            .collect();
        bindings.sort_by_key(|b| b.control);
        bindings
    }

    pub fn to_control_map(&self) -> ControlMap {
        let mut map = ControlMap::default();
        for binding in self.bindings() {
            map.set(binding.signal, Some(binding.control));
        }
        map
    }

    /// Arm learning for `signal`. The next control change completes it and
    /// the outcome arrives on the returned receiver.
    pub fn start_learn(&self, signal: ControlSignal) -> Receiver<LearnOutcome> {
        let (reply, outcome) = bounded(1);
        let previous = self
            .learn_state
            .swap(Arc::new(Some(LearnState { signal, reply })));
        if let Some(previous) = previous.as_ref() {
            let _ = previous.reply.try_send(LearnOutcome::Cancelled);
        }
        debug!("Learning control for `{}`", signal);
        outcome
    }

    /// Arm learning and block until a control change arrives or `timeout` elapses.
    pub fn learn(&self, signal: ControlSignal, timeout: Option<Duration>) -> LearnOutcome {
        let outcome = self.start_learn(signal);
        let result = match timeout {
            Some(timeout) => outcome.recv_timeout(timeout).ok(),
            None => outcome.recv().ok(),
        };
        result.unwrap_or_else(|| {
            self.cancel_learn();
            LearnOutcome::Cancelled
        })
    }

    pub fn cancel_learn(&self) {
        let previous = self.learn_state.swap(Arc::new(None));
        if let Some(previous) = previous.as_ref() {
            let _ = previous.reply.try_send(LearnOutcome::Cancelled);
        }
    }

    pub fn is_learning(&self) -> bool {
        self.learn_state.load().is_some()
    }

    pub fn learning_signal(&self) -> Option<ControlSignal> {
        let guard = self.learn_state.load();
        guard.as_ref().as_ref().map(|state| state.signal)
    }

    /// Process a control change: completes a pending learn request, otherwise
    /// reports the bound signal.
    pub fn process_cc(
        &self,
        channel: MidiChannel,
        control: ControlNumber,
        value: u8,
    ) -> ProcessResult {
        if self.is_learning() {
            let taken = self.learn_state.swap(Arc::new(None));
            if let Some(state) = taken.as_ref() {
                let outcome = match self.assign(state.signal, control) {
                    Ok(()) => LearnOutcome::Assigned(ControlBinding::new(control, state.signal)),
                    Err(bound_to) => LearnOutcome::AlreadyAssigned { control, bound_to },
                };
                info!("{} (channel {}, value {})", outcome, channel, value);
                let _ = state.reply.try_send(outcome);
                return ProcessResult::Learned(outcome);
            }
        }

        match self.signal_for(control) {
            Some(signal) => ProcessResult::Bound(signal),
            None => ProcessResult::Unbound,
        }
    }
}

impl Default for ControlMapper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_and_lookup() {
        let mapper = ControlMapper::new();
        assert!(mapper.assign(ControlSignal::Panic, 4).is_ok());
        assert_eq!(mapper.signal_for(4), Some(ControlSignal::Panic));
        assert_eq!(mapper.control_for(ControlSignal::Panic), Some(4));
        assert_eq!(mapper.process_cc(0, 4, 127), ProcessResult::Bound(ControlSignal::Panic));
        assert_eq!(mapper.process_cc(0, 5, 127), ProcessResult::Unbound);
    }

    #[test]
    fn test_reassign_moves_signal() {
        let mapper = ControlMapper::new();
        mapper.assign(ControlSignal::Tempo, 10).unwrap();
        mapper.assign(ControlSignal::Tempo, 11).unwrap();
        assert_eq!(mapper.signal_for(10), None);
        assert_eq!(mapper.control_for(ControlSignal::Tempo), Some(11));
        assert_eq!(mapper.bindings().len(), 1);
    }

    #[test]
    fn test_assign_rejects_taken_control() {
        let mapper = ControlMapper::new();
        mapper.assign(ControlSignal::Panic, 4).unwrap();
        assert_eq!(mapper.assign(ControlSignal::Mutate, 4), Err(ControlSignal::Panic));
        assert_eq!(mapper.control_for(ControlSignal::Mutate), None);
    }

    #[test]
    fn test_learn_mode() {
        let mapper = ControlMapper::new();
        let outcome = mapper.start_learn(ControlSignal::EndCall);
        assert!(mapper.is_learning());
        assert_eq!(mapper.learning_signal(), Some(ControlSignal::EndCall));

        let result = mapper.process_cc(0, 3, 64);
        let expected = LearnOutcome::Assigned(ControlBinding::new(3, ControlSignal::EndCall));
        assert_eq!(result, ProcessResult::Learned(expected));
        assert_eq!(outcome.try_recv(), Ok(expected));
        assert!(!mapper.is_learning());

        assert_eq!(mapper.process_cc(0, 3, 127), ProcessResult::Bound(ControlSignal::EndCall));
    }

    #[test]
    fn test_learn_rejects_duplicate() {
        let mapper = ControlMapper::new();
        mapper.assign(ControlSignal::Panic, 4).unwrap();

        let outcome = mapper.start_learn(ControlSignal::Mutate);
        mapper.process_cc(0, 4, 127);
        assert_eq!(
            outcome.try_recv(),
            Ok(LearnOutcome::AlreadyAssigned {
                control: 4,
                bound_to: ControlSignal::Panic
            })
        );
        assert_eq!(mapper.signal_for(4), Some(ControlSignal::Panic));
        assert!(!mapper.is_learning());
    }

    #[test]
    fn test_new_learn_cancels_previous() {
        let mapper = ControlMapper::new();
        let first = mapper.start_learn(ControlSignal::Panic);
        let _second = mapper.start_learn(ControlSignal::Mutate);
        assert_eq!(first.try_recv(), Ok(LearnOutcome::Cancelled));
        assert_eq!(mapper.learning_signal(), Some(ControlSignal::Mutate));
    }

    #[test]
    fn test_learn_blocks_until_control_change() {
        let mapper = Arc::new(ControlMapper::new());
        let learner = Arc::clone(&mapper);
        let handle =
            std::thread::spawn(move || learner.learn(ControlSignal::Loop, Some(Duration::from_secs(5))));

        while !mapper.is_learning() {
            std::thread::sleep(Duration::from_millis(1));
        }
        mapper.process_cc(2, 20, 127);

        let outcome = handle.join().unwrap();
        assert_eq!(
            outcome,
            LearnOutcome::Assigned(ControlBinding::new(20, ControlSignal::Loop))
        );
    }

    #[test]
    fn test_learn_timeout_cancels() {
        let mapper = ControlMapper::new();
        let outcome = mapper.learn(ControlSignal::Loop, Some(Duration::from_millis(10)));
        assert_eq!(outcome, LearnOutcome::Cancelled);
        assert!(!mapper.is_learning());
    }

    #[test]
    fn test_control_map_roundtrip() {
        let map = ControlMap {
            clock: Some(1),
            panic: Some(4),
            loop_: Some(10),
            ..Default::default()
        };
        let mapper = ControlMapper::from_control_map(&map);
        assert_eq!(mapper.to_control_map(), map);
    }

    #[test]
    fn test_unbind() {
        let mapper = ControlMapper::new();
        mapper.assign(ControlSignal::State, 30).unwrap();
        assert_eq!(mapper.unbind(ControlSignal::State), Some(30));
        assert_eq!(mapper.signal_for(30), None);
        assert_eq!(mapper.unbind(ControlSignal::State), None);
    }
}
