//! Bundled sequence generators.
//!
//! [`EchoGenerator`] answers a call with the call itself and needs nothing
//! external. [`CommandGenerator`] shells out to a model script, exchanging
//! Standard MIDI Files through a scratch directory.

use crate::error::Result;
use antiphon_core::{
    GeneratorError, GeneratorOptions, GeneratorSpec, NoteSequence, SequenceGenerator,
};
use antiphon_midi_io::{read_sequence, write_sequence};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Replays the input section, looped as needed, across the generate window.
#[derive(Debug, Clone, Default)]
pub struct EchoGenerator {
    transpose: i16,
}

impl EchoGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transposed(semitones: i16) -> Self {
        Self {
            transpose: semitones,
        }
    }
}

impl SequenceGenerator for EchoGenerator {
    fn id(&self) -> &str {
        "echo"
    }

    fn generate(
        &mut self,
        input: &NoteSequence,
        options: &GeneratorOptions,
    ) -> std::result::Result<NoteSequence, GeneratorError> {
        let window = options.generate;
        let phrase_length = options.input.duration();
        let phrase = input
            .extract_window(options.input.start, options.input.end)
            .transposed(self.transpose);

        let mut response = NoteSequence::new(input.qpm);
        if phrase.is_empty() || phrase_length <= 0.0 {
            response.total_time = window.end;
            return Ok(response);
        }

        let mut offset = window.start;
        while offset < window.end {
            for note in phrase.notes() {
                response.push(note.shifted(offset));
            }
            offset += phrase_length;
        }
        response.total_time = window.end;
        Ok(response)
    }
}

/// Runs an external program to produce the response.
///
/// Argument placeholders: `{input}` (seed MIDI file), `{output}` (expected
/// response file), `{output_dir}`, `{start}` / `{end}` (generate window in
/// seconds), `{temperature}` and `{qpm}`. If `{output}` is not written, the
/// first `.mid` file in the output directory is used instead.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    id: String,
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        let id = Path::new(&program)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.clone());
        Self { id, program, args }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    fn expand_args(
        &self,
        input: &Path,
        output: &Path,
        output_dir: &Path,
        options: &GeneratorOptions,
        qpm: f64,
    ) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input.to_string_lossy())
                    .replace("{output_dir}", &output_dir.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy())
                    .replace("{start}", &options.generate.start.to_string())
                    .replace("{end}", &options.generate.end.to_string())
                    .replace("{temperature}", &options.temperature.to_string())
                    .replace("{qpm}", &qpm.to_string())
            })
            .collect()
    }

    fn find_output(output: &Path, output_dir: &Path) -> Option<PathBuf> {
        if output.is_file() {
            return Some(output.to_path_buf());
        }
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(output_dir)
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .map_or(false, |ext| ext.eq_ignore_ascii_case("mid"))
            })
            .collect();
        candidates.sort();
        candidates.into_iter().next()
    }
}

fn failed(context: &str, error: impl std::fmt::Display) -> GeneratorError {
    GeneratorError::Failed(format!("{}: {}", context, error))
}

impl SequenceGenerator for CommandGenerator {
    fn id(&self) -> &str {
        &self.id
    }

    fn generate(
        &mut self,
        input: &NoteSequence,
        options: &GeneratorOptions,
    ) -> std::result::Result<NoteSequence, GeneratorError> {
        let scratch = tempfile::tempdir().map_err(|e| failed("scratch directory", e))?;
        let input_path = scratch.path().join("input.mid");
        let output_dir = scratch.path().join("output");
        let output_path = output_dir.join("output.mid");
        std::fs::create_dir(&output_dir).map_err(|e| failed("scratch directory", e))?;

        write_sequence(input, &input_path).map_err(|e| failed("writing seed", e))?;

        let args = self.expand_args(&input_path, &output_path, &output_dir, options, input.qpm);
        debug!("Running {} {:?}", self.program, args);

        let result = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| failed(&self.program, e))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(GeneratorError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                stderr.trim()
            )));
        }

        let produced = Self::find_output(&output_path, &output_dir).ok_or_else(|| {
            GeneratorError::Failed(format!("{} produced no MIDI output", self.program))
        })?;
        read_sequence(&produced).map_err(|e| failed("reading response", e))
    }
}

/// Instantiate the generators described by configuration.
pub fn from_specs(specs: &[GeneratorSpec]) -> Result<Vec<Box<dyn SequenceGenerator>>> {
    specs
        .iter()
        .map(|spec| -> Result<Box<dyn SequenceGenerator>> {
            match spec {
                GeneratorSpec::Echo { transpose } => {
                    Ok(Box::new(EchoGenerator::transposed(*transpose)))
                }
                GeneratorSpec::Command { program, args, id } => {
                    if program.trim().is_empty() {
                        return Err(antiphon_core::Error::InvalidConfig(
                            "command generator needs a program".to_string(),
                        )
                        .into());
                    }
                    let generator = CommandGenerator::new(program.clone(), args.clone());
                    Ok(Box::new(match id {
                        Some(id) => generator.with_id(id.clone()),
                        None => generator,
                    }))
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use antiphon_core::{NoteEvent, TimeWindow};
    use approx::assert_relative_eq;

    fn options(input: (f64, f64), generate: (f64, f64)) -> GeneratorOptions {
        GeneratorOptions {
            input: TimeWindow::new(input.0, input.1),
            generate: TimeWindow::new(generate.0, generate.1),
            temperature: 1.0,
        }
    }

    #[test]
    fn test_echo_replays_call() {
        let call = NoteSequence::from_notes(
            vec![
                NoteEvent::new(60, 100, 0.0, 1.0),
                NoteEvent::new(64, 100, 1.0, 2.0),
            ],
            120.0,
        );
        let response = EchoGenerator::new()
            .generate(&call, &options((0.0, 2.0), (2.0, 4.0)))
            .unwrap();

        assert_eq!(response.len(), 2);
        assert_relative_eq!(response.notes()[0].start_time, 2.0);
        assert_relative_eq!(response.notes()[1].start_time, 3.0);
        assert_relative_eq!(response.total_time, 4.0);
    }

    #[test]
    fn test_echo_loops_short_call_and_transposes() {
        let call = NoteSequence::from_notes(vec![NoteEvent::new(60, 100, 0.0, 0.5)], 120.0);
        let response = EchoGenerator::transposed(12)
            .generate(&call, &options((0.0, 1.0), (1.0, 4.0)))
            .unwrap();

        assert_eq!(response.len(), 3);
        assert!(response.notes().iter().all(|n| n.pitch == 72));
    }

    #[test]
    fn test_echo_empty_call() {
        let response = EchoGenerator::new()
            .generate(&NoteSequence::default(), &options((0.0, 2.0), (2.0, 4.0)))
            .unwrap();
        assert!(response.is_empty());
    }

    #[test]
    fn test_command_args_expansion() {
        let generator = CommandGenerator::new(
            "/opt/models/melody_rnn.sh",
            vec![
                "--primer={input}".into(),
                "--out={output}".into(),
                "--dir={output_dir}".into(),
                "{start}-{end}@{temperature}/{qpm}".into(),
            ],
        );
        assert_eq!(generator.id(), "melody_rnn");

        let args = generator.expand_args(
            Path::new("/tmp/in.mid"),
            Path::new("/tmp/out/output.mid"),
            Path::new("/tmp/out"),
            &GeneratorOptions {
                input: TimeWindow::new(0.0, 4.0),
                generate: TimeWindow::new(4.0, 8.5),
                temperature: 0.5,
            },
            120.0,
        );
        assert_eq!(
            args,
            vec![
                "--primer=/tmp/in.mid",
                "--out=/tmp/out/output.mid",
                "--dir=/tmp/out",
                "4-8.5@0.5/120",
            ]
        );
    }

    #[test]
    fn test_command_missing_program_fails() {
        let mut generator = CommandGenerator::new("/nonexistent/antiphon-model", Vec::new());
        let result = generator.generate(&NoteSequence::default(), &options((0.0, 1.0), (1.0, 2.0)));
        assert!(matches!(result, Err(GeneratorError::Failed(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_roundtrip_through_copy() {
        // `cp` echoes the seed back as the response.
        let mut generator =
            CommandGenerator::new("cp", vec!["{input}".into(), "{output}".into()]);
        let call = NoteSequence::from_notes(vec![NoteEvent::new(60, 100, 0.0, 1.0)], 120.0);
        let response = generator
            .generate(&call, &options((0.0, 1.0), (1.0, 2.0)))
            .unwrap();
        assert_eq!(response.len(), 1);
        assert_eq!(response.notes()[0].pitch, 60);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_non_zero_exit_fails() {
        let mut generator = CommandGenerator::new("false", Vec::new());
        let result = generator.generate(&NoteSequence::default(), &options((0.0, 1.0), (1.0, 2.0)));
        assert!(matches!(result, Err(GeneratorError::Failed(_))));
    }

    #[test]
    fn test_from_specs() {
        let generators = from_specs(&[
            GeneratorSpec::Echo { transpose: 0 },
            GeneratorSpec::Command {
                program: "./model.sh".into(),
                args: vec![],
                id: Some("rnn".into()),
            },
        ])
        .unwrap();
        let ids: Vec<&str> = generators.iter().map(|g| g.id()).collect();
        assert_eq!(ids, vec!["echo", "rnn"]);

        assert!(from_specs(&[GeneratorSpec::Command {
            program: " ".into(),
            args: vec![],
            id: None,
        }])
        .is_err());
    }
}
