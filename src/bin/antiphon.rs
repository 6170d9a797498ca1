//! Call-and-response over hardware MIDI ports.
//!
//! Loads an `InteractionConfig`, optionally maps controls interactively,
//! then runs the interaction until Ctrl-C or end of input.

use antiphon::midi::{list_input_ports, list_output_ports};
use antiphon::prelude::*;
use antiphon::SignalFlag;
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to config TOML (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the available MIDI ports and exit
    #[arg(long, default_value_t = false)]
    list_ports: bool,

    /// Map controls interactively before starting (overrides config)
    #[arg(long, default_value_t = false)]
    learn: bool,

    /// Log level: error, warn, info, debug or trace (overrides config)
    #[arg(long)]
    log: Option<String>,

    /// Fixed tick period in seconds (overrides config)
    #[arg(long)]
    tick_duration: Option<f64>,
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> antiphon::Result<()> {
    if args.list_ports {
        println!("Input ports: '{}'", list_input_ports().join("', '"));
        println!("Output ports: '{}'", list_output_ports().join("', '"));
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => InteractionConfig::load(path)?,
        None => InteractionConfig::default(),
    };
    if let Some(level) = args.log {
        config.log = level;
    }
    if let Some(duration) = args.tick_duration {
        config.tick_duration = Some(duration);
    }
    config.learn_controls |= args.learn;
    config.validate()?;

    let level = config
        .log
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let clock: Arc<dyn WallClock> = Arc::new(SystemClock::new());
    let mapper = Arc::new(ControlMapper::from_control_map(&config.controls));
    let hub = Arc::new(HardwareHub::connect(
        &config,
        Arc::clone(&clock),
        Arc::clone(&mapper),
    )?);

    if config.learn_controls {
        learn_controls(&mapper)?;
        config.controls = mapper.to_control_map();
    }

    let mut interaction = InteractionBuilder::from_config(&config)?
        .hub(hub)
        .clock(clock)
        .build()?;

    let stop = Arc::new(SignalFlag::new());
    let stop_for_ctrlc = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || stop_for_ctrlc.raise()) {
        tracing::warn!("Failed to install Ctrl-C handler: {}", e);
    }
    let stop_for_stdin = Arc::clone(&stop);
    std::thread::Builder::new()
        .name("stdin-watch".into())
        .spawn(move || {
            // Drain input; end of input stops the interaction.
            for _ in io::stdin().lock().lines() {}
            stop_for_stdin.raise();
        })?;

    print_instructions(&config);
    interaction.start()?;

    while !stop.is_raised() && interaction.is_running() {
        std::thread::sleep(Duration::from_millis(100));
    }
    interaction.stop();

    println!("Interaction stopped.");
    Ok(())
}

fn print_control_table(mapper: &ControlMapper) {
    println!("Enter the index of a signal to set the control change for, or `q` when done.");
    println!("{:>6}\t{:<20}\t{:>6}", "Index", "Control", "Current");
    for (i, signal) in ControlSignal::ALL.iter().enumerate() {
        let current = mapper
            .control_for(*signal)
            .map_or_else(|| "None".to_string(), |control| control.to_string());
        println!("{:>6}\t{:<20}\t{:>6}", i + 1, signal.name(), current);
    }
    println!();
}

fn learn_controls(mapper: &ControlMapper) -> io::Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        println!();
        print_control_table(mapper);
        print!("Selection: ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            return Ok(());
        };
        let line = line?;
        let response = line.trim();
        if response == "q" {
            return Ok(());
        }

        let selected = response
            .parse::<usize>()
            .ok()
            .and_then(|index| index.checked_sub(1))
            .and_then(|index| ControlSignal::ALL.get(index));
        let Some(&signal) = selected else {
            println!("Invalid response: {}", response);
            continue;
        };

        println!(
            "Send a control signal using the control number you wish to associate with `{}`.",
            signal
        );
        println!("{}.", mapper.learn(signal, None));
    }
}

fn print_instructions(config: &InteractionConfig) {
    println!();
    println!("Instructions:");
    println!("Start playing when you want to begin the call phrase.");
    match config.controls.end_call {
        Some(control) => println!(
            "When you want to end the call phrase, signal control number {} \
             with value 127, or stop playing and wait one clock tick.",
            control
        ),
        None => println!(
            "When you want to end the call phrase, stop playing and wait one clock tick."
        ),
    }
    println!(
        "Once the response completes, the interface will wait for you to \
         begin playing again to start a new call phrase."
    );
    println!();
    println!("To end the interaction, press CTRL-C.");
}
