//! Response generation: window normalization around a generator call, control
//! value mappings, and the worker thread that bounds generation latency.

use antiphon_core::{
    GeneratorError, GeneratorOptions, NoteSequence, SequenceGenerator, SignalFlag, TimeWindow,
};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

pub const MIN_TEMPERATURE: f64 = 0.1;
pub const MAX_TEMPERATURE: f64 = 2.0;
pub const DEFAULT_TEMPERATURE: f64 = 1.0;

/// Softmax temperature for a control value, `1.0` when unset.
pub fn temperature_from_control(value: Option<u8>) -> f64 {
    match value {
        Some(v) => MIN_TEMPERATURE + (v as f64 / 127.0) * (MAX_TEMPERATURE - MIN_TEMPERATURE),
        None => DEFAULT_TEMPERATURE,
    }
}

/// Tempo for a control value: `60 + value`, or `default_qpm` when unset.
pub fn qpm_from_control(value: Option<u8>, default_qpm: f64) -> f64 {
    value.map_or(default_qpm, |v| 60.0 + v as f64)
}

/// Generator index for a select control value spread evenly over `count`.
pub fn generator_index(value: Option<u8>, count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    let index = value.unwrap_or(0) as usize * count / 128;
    index.min(count - 1)
}

/// Generate a response filling `[response_start, response_end)`.
///
/// All times are absolute. The generator sees a timeline starting at
/// `zero_time`: the input section is `[0, response_start - zero_time)` and the
/// generate section the requested window. The result is trimmed to the window
/// and moved back onto the absolute timeline.
pub fn generate_response(
    generator: &mut dyn SequenceGenerator,
    input: &NoteSequence,
    zero_time: f64,
    response_start: f64,
    response_end: f64,
    temperature: f64,
) -> Result<NoteSequence, GeneratorError> {
    let start = response_start - zero_time;
    let end = response_end - zero_time;

    let options = GeneratorOptions {
        input: TimeWindow::new(0.0, start),
        generate: TimeWindow::new(start, end),
        temperature,
    };

    info!("Generating sequence using '{}' generator.", generator.id());
    debug!("Generator options: {:?}", options);

    let generated = generator.generate(&input.shifted(-zero_time), &options)?;
    Ok(generated.trimmed(start, end).shifted(zero_time))
}

/// One generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub generator: usize,
    pub input: NoteSequence,
    pub zero_time: f64,
    pub window: TimeWindow,
    pub temperature: f64,
}

enum WorkerReply {
    Started(u64),
    Finished(u64, Result<NoteSequence, GeneratorError>),
}

enum WorkerCommand {
    Generate(u64, GenerationRequest),
    Shutdown,
}

/// How often a waiting request checks its cancel flag.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs generators on a dedicated `generator-worker` thread.
///
/// Requests are strictly sequential. A request that times out is abandoned;
/// its late result is discarded when it arrives. The timeout of a request
/// counts from the moment the worker begins it, so a request queued behind an
/// abandoned one is not charged for the stale work.
pub struct GenerationWorker {
    commands: Sender<WorkerCommand>,
    replies: Receiver<WorkerReply>,
    next_id: u64,
    generator_ids: Vec<String>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl GenerationWorker {
    pub fn spawn(generators: Vec<Box<dyn SequenceGenerator>>) -> std::io::Result<Self> {
        let generator_ids = generators.iter().map(|g| g.id().to_string()).collect();
        let (commands, command_rx) = unbounded::<WorkerCommand>();
        let (reply_tx, replies) = unbounded::<WorkerReply>();

        let thread = std::thread::Builder::new()
            .name("generator-worker".into())
            .spawn(move || worker_loop(generators, command_rx, reply_tx))?;

        Ok(Self {
            commands,
            replies,
            next_id: 0,
            generator_ids,
            thread: Some(thread),
        })
    }

    pub fn generator_ids(&self) -> &[String] {
        &self.generator_ids
    }

    pub fn generator_count(&self) -> usize {
        self.generator_ids.len()
    }

    /// Submit a request and block until its result, the timeout, worker loss,
    /// or `cancel` being raised.
    pub fn generate(
        &mut self,
        request: GenerationRequest,
        timeout: Option<Duration>,
        cancel: &SignalFlag,
    ) -> Result<NoteSequence, GeneratorError> {
        if request.generator >= self.generator_ids.len() {
            return Err(GeneratorError::NoGenerator);
        }

        self.next_id += 1;
        let id = self.next_id;
        self.commands
            .send(WorkerCommand::Generate(id, request))
            .map_err(|_| GeneratorError::Disconnected)?;

        let mut deadline = None;
        loop {
            let reply = match self.next_reply(deadline, cancel)? {
                Some(reply) => reply,
                None => {
                    return Err(GeneratorError::TimedOut {
                        timeout: timeout.unwrap_or_default(),
                    })
                }
            };

            match reply {
                WorkerReply::Started(started) if started == id => {
                    deadline = timeout.map(|t| Instant::now() + t);
                }
                WorkerReply::Finished(finished, result) if finished == id => return result,
                WorkerReply::Started(stale) => {
                    debug!("Generation #{} waiting behind abandoned #{}", id, stale)
                }
                WorkerReply::Finished(stale, _) => {
                    debug!("Discarding late generation result #{}", stale)
                }
            }
        }
    }

    /// Next worker reply, or `None` once `deadline` has passed.
    fn next_reply(
        &self,
        deadline: Option<Instant>,
        cancel: &SignalFlag,
    ) -> Result<Option<WorkerReply>, GeneratorError> {
        loop {
            if cancel.is_raised() {
                return Err(GeneratorError::Cancelled);
            }
            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    remaining.min(POLL_INTERVAL)
                }
                None => POLL_INTERVAL,
            };
            match self.replies.recv_timeout(wait) {
                Ok(reply) => return Ok(Some(reply)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(GeneratorError::Disconnected),
            }
        }
    }

    /// Stop accepting requests. A generator call in progress is not waited for.
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for GenerationWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    mut generators: Vec<Box<dyn SequenceGenerator>>,
    commands: Receiver<WorkerCommand>,
    replies: Sender<WorkerReply>,
) {
    debug!("Generator worker started with {} generator(s)", generators.len());

    while let Ok(command) = commands.recv() {
        match command {
            WorkerCommand::Generate(id, request) => {
                // The requester may have given up; a closed channel is fine.
                let _ = replies.send(WorkerReply::Started(id));
                let result = match generators.get_mut(request.generator) {
                    Some(generator) => generate_response(
                        generator.as_mut(),
                        &request.input,
                        request.zero_time,
                        request.window.start,
                        request.window.end,
                        request.temperature,
                    ),
                    None => Err(GeneratorError::NoGenerator),
                };
                if let Err(e) = &result {
                    error!("Generation #{} failed: {}", id, e);
                }
                let _ = replies.send(WorkerReply::Finished(id, result));
            }
            WorkerCommand::Shutdown => break,
        }
    }

    debug!("Generator worker exiting");
}
