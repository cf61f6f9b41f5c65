use std::{
    fs,
    future::Future,
    io,
    path::PathBuf,
    thread::{self, JoinHandle},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use simcomp16::{
    emu::{
        cpu::CpuStatus,
        emulator::{EmuConfig, Emulator, Machine, RunOutcome},
        microcode::UndefinedOpcodePolicy,
    },
    io::{
        event::{self, Shutdown},
        keyboard::KeyboardAdapter,
        DecodeConfig,
    },
    plat::Word,
};
use tokio::runtime::Builder;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Undefined {
    Halt,
    Nop,
}

impl From<Undefined> for UndefinedOpcodePolicy {
    fn from(value: Undefined) -> Self {
        match value {
            Undefined::Halt => UndefinedOpcodePolicy::Halt,
            Undefined::Nop => UndefinedOpcodePolicy::NoOp,
        }
    }
}

/// Runs a raw program image on the simulated 16-bit computer
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// Program image: little-endian 16-bit words, loaded at address 0
    program: PathBuf,

    /// Clock rate in ticks per second
    #[clap(long, default_value_t = 1000.0)]
    clock_hz: f64,

    /// Stop after this many ticks
    #[clap(long)]
    max_ticks: Option<u64>,

    /// What to do when an opcode has no micro-program
    #[clap(long, value_enum, default_value_t = Undefined::Halt)]
    undefined: Undefined,

    /// Key codes to queue for the keyboard before starting, as text
    #[clap(long)]
    keys: Option<String>,

    /// Size of the keyboard event queue
    #[clap(long, default_value_t = event::DEFAULT_QUEUE_CAPACITY)]
    queue: usize,

    /// More output (-v debug, -vv trace)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn read_image(path: &PathBuf) -> Result<Vec<Word>> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.len() % 2 != 0 {
        bail!("{}: image length must be a whole number of words", path.display());
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| Word::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Raises `shutdown` on the first Ctrl-C. The emulator and the keyboard both stop at their next
/// tick boundary.
fn stop_on_ctrl_c(shutdown: Shutdown) {
    if let Err(e) = trigger_on(shutdown, tokio::signal::ctrl_c) {
        log::warn!("Ctrl-C handling unavailable: {}", e);
    }
}

/// Raises `shutdown` from a helper thread once the future built by `event` resolves.
fn trigger_on<F, Fut>(shutdown: Shutdown, event: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = io::Result<()>>,
{
    thread::Builder::new()
        .name("shutdown".into())
        .spawn(move || {
            let rt = match Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    log::warn!("shutdown watcher: {}", e);
                    return;
                }
            };
            match rt.block_on(event()) {
                Ok(()) => {
                    log::info!("interrupted, stopping at the next tick");
                    shutdown.trigger();
                }
                Err(e) => log::warn!("shutdown watcher: {}", e),
            }
        })
}

/// Key codes for `keys`, skipping characters that do not fit in a word.
fn key_codes(keys: &str) -> Vec<Word> {
    keys.chars()
        .filter_map(|c| match Word::try_from(u32::from(c)) {
            Ok(code) => Some(code),
            Err(_) => {
                log::warn!("skipping {:?}: key code does not fit in a word", c);
                None
            }
        })
        .collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let config = EmuConfig {
        clock_rate_hz: cli.clock_hz,
        undefined_opcode: cli.undefined.into(),
        event_queue_capacity: cli.queue,
        max_ticks: cli.max_ticks,
    };
    if config.event_queue_capacity == 0 {
        bail!("event queue needs room for at least one event");
    }

    let image = read_image(&cli.program)?;
    let (events, rx) = event::channel(config.event_queue_capacity);
    let (shutdown, signal) = Shutdown::new();
    let keyboard = KeyboardAdapter::new(DecodeConfig::keyboard(), rx, shutdown.signal())?;
    let mut machine = Machine::builder(config).peripheral(keyboard).build()?;
    machine.load(0, &image);
    log::info!("loaded {} words from {}", image.len(), cli.program.display());

    if let Some(keys) = &cli.keys {
        for code in key_codes(keys) {
            if let Err(e) = events.press(code) {
                log::warn!("{}", e);
            }
        }
    }
    stop_on_ctrl_c(shutdown);

    let mut emu = Emulator::new(machine, &config)?.with_shutdown(signal);
    let outcome = emu.run()?;

    let machine = emu.machine();
    log::info!("{:?} after {} ticks", outcome, machine.ticks());
    for reg in machine.registers().iter() {
        println!("{:>5} = {:#06x}", reg.name(), reg.value());
    }
    if let RunOutcome::Stopped(CpuStatus::UndefinedOpcode(op)) = outcome {
        let iar = machine.registers().iar.value();
        bail!("undefined opcode {:#04x} at {:#06x}", op, iar);
    }
    Ok(())
}
