#![allow(clippy::collapsible_if)]

mod cli;
mod config;
mod error;
mod fluid;
mod graph;
mod jack;
mod matcher;
mod metronome;
mod midi;
mod pathkey;
mod rangeset;
mod tree;
mod tui;

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command, JackCommand, MetronomeArgs, TuiArgs};
use crossbeam_channel::Receiver;

use config::Config;
use fluid::FluidSynth;
use graph::{Connection, PortGraph};
use jack::JackServer;
use metronome::{Metronome, Track};
use tree::InstrumentTree;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::resolve(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.synth.host = host;
    }
    if let Some(port) = cli.port {
        config.synth.port = port;
    }

    let command = cli.command.unwrap_or(Command::Tui(TuiArgs::default()));
    if !matches!(command, Command::Tui(_)) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match command {
        Command::Tui(args) => run_tui(&args, config),
        Command::Ping => {
            let mut synth = connect(&config)?;
            let reply = synth.echo("fluidterm")?;
            println!("{} answered: {}", synth.addr(), reply.join(" "));
            Ok(())
        }
        Command::Fonts => {
            let mut synth = connect(&config)?;
            for f in synth.list_fonts()? {
                println!("{:>3}  {:<24} {}", f.id, f.name, f.path);
            }
            Ok(())
        }
        Command::Instruments => {
            let mut synth = connect(&config)?;
            for i in synth.list_instruments()? {
                println!("{:>3}/{:03}-{:03} {}", i.font_id, i.bank, i.program, i.name);
            }
            Ok(())
        }
        Command::Channels => {
            let mut synth = connect(&config)?;
            for c in synth.list_channels()? {
                println!(
                    "chan {:>2}: {:>3}/{:03}-{:03} {}",
                    c.channel, c.font_id, c.bank, c.program, c.name
                );
            }
            Ok(())
        }
        Command::Tree => {
            let mut synth = connect(&config)?;
            let tree = InstrumentTree::from_snapshot(&synth.snapshot()?);
            print_tree(&tree);
            Ok(())
        }
        Command::Select {
            channel,
            font,
            bank,
            program,
        } => {
            anyhow::ensure!(channel < 16, "channel must be 0-15, got {channel}");
            let mut synth = connect(&config)?;
            synth.select_instrument(font, bank, program, channel)?;
            let now = synth
                .list_channels()?
                .into_iter()
                .find(|c| c.channel == channel)
                .with_context(|| format!("synth does not list channel {channel}"))?;
            println!(
                "chan {:>2}: {:>3}/{:03}-{:03} {}",
                now.channel, now.font_id, now.bank, now.program, now.name
            );
            Ok(())
        }
        Command::Metronome(args) => run_metronome(&args, &config),
        Command::Jack(JackCommand::Command) => {
            println!("{}", config.jack.command().join(" "));
            Ok(())
        }
        Command::Jack(JackCommand::Start) => run_jack(&config),
        Command::Connect { out_glob, in_glob } => {
            let graph = PortGraph::query()?;
            match graph.connect(&out_glob, &in_glob)? {
                Connection::Already => println!("already connected"),
                Connection::Made => println!("connected"),
            }
            Ok(())
        }
        Command::Ports => {
            match PortGraph::query() {
                Ok(graph) => {
                    for item in graph.items() {
                        println!("{item}");
                    }
                }
                Err(e) => log::warn!("No audio server ports: {e:#}"),
            }
            for name in midi::output_names()? {
                println!("midi: {name}");
            }
            Ok(())
        }
    }
}

fn connect(config: &Config) -> anyhow::Result<FluidSynth> {
    let mut synth = FluidSynth::new(&config.synth)?;
    synth.connect()?;
    log::debug!("Connected to {}", synth.addr());
    Ok(synth)
}

fn print_tree(tree: &InstrumentTree) {
    let everything: HashSet<_> = tree.keys().cloned().collect();
    for (id, depth) in tree.visible(&everything) {
        let node = tree.node(id);
        let chans = tree.channels(id);
        if chans.is_empty() {
            println!("{:indent$}{}", "", node.name, indent = depth * 2);
        } else {
            println!("{:indent$}{}  [{chans}]", "", node.name, indent = depth * 2);
        }
    }
    for err in tree.lookup_errors() {
        log::warn!("{err}");
    }
}

/// Fires once when a line (or EOF) arrives on stdin.
fn enter_pressed() -> Receiver<()> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = tx.send(());
    });
    rx
}

fn run_metronome(args: &MetronomeArgs, config: &Config) -> anyhow::Result<()> {
    let cfg = &config.metronome;
    let bpm = args.bpm.unwrap_or(cfg.bpm);
    let channel = args.channel.unwrap_or(cfg.channel);
    let text = args.track.as_deref().unwrap_or(&cfg.track);
    let track = Track::parse(text, channel).context("bad track")?;

    let port = midi::VirtualPort::open(&cfg.client_name, &cfg.port_name)?;
    println!("Playing '{track}' at {bpm} bpm on {}", port.name());

    let mut m = Metronome::new(track, bpm, Box::new(port))?;
    if let Some(n) = args.beats {
        m = m.with_limit(n);
    }
    m.start()?;

    let stop = enter_pressed();
    if args.beats.is_none() {
        println!("Press Enter to stop.");
    }
    while m.is_running() {
        if stop.recv_timeout(Duration::from_millis(50)).is_ok() {
            break;
        }
    }
    m.stop();
    anyhow::ensure!(!m.sink_failed(), "MIDI output failed while playing");
    Ok(())
}

fn run_jack(config: &Config) -> anyhow::Result<()> {
    let mut server = JackServer::start(&config.jack)?;
    println!("jackd running as pid {}. Press Enter to stop.", server.id());
    let stop = enter_pressed();
    loop {
        server.drain_log(Duration::from_millis(200));
        if stop.try_recv().is_ok() {
            break;
        }
        if !server.is_running() {
            server.drain_log(Duration::from_millis(200));
            anyhow::bail!("jackd exited on its own");
        }
    }
    server.stop(Duration::from_secs(3))
}

fn run_tui(args: &TuiArgs, config: Config) -> anyhow::Result<()> {
    install_file_logger(&args.log_file)?;

    let mut synth = FluidSynth::new(&config.synth)?;
    synth
        .connect()
        .with_context(|| format!("is fluidsynth running with its shell on {}?", synth.addr()))?;
    let snapshot = synth.snapshot()?;
    log::info!(
        "Loaded {} fonts, {} instruments from {}",
        snapshot.fonts.len(),
        snapshot.instruments.len(),
        synth.addr()
    );
    tui::run(synth, snapshot, config.metronome)
}

/// Log sink for the full-screen UI: appends to a file so nothing is written
/// over the alternate screen.
struct FileLogger {
    file: Mutex<File>,
}

impl log::Log for FileLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default();
        let secs = now.as_secs() % 86400; // time of day
        let h = secs / 3600;
        let m = (secs % 3600) / 60;
        let s = secs % 60;
        let ms = now.subsec_millis();
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(
                f,
                "[{h:02}:{m:02}:{s:02}.{ms:03} {} {}] {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        if let Ok(mut f) = self.file.lock() {
            let _ = f.flush();
        }
    }
}

static FILE_LOGGER: OnceLock<FileLogger> = OnceLock::new();

fn install_file_logger(path: &Path) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))?;
    let logger = FILE_LOGGER.get_or_init(|| FileLogger {
        file: Mutex::new(file),
    });
    log::set_logger(logger).ok();
    log::set_max_level(
        std::env::var("RUST_LOG")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
    );
    Ok(())
}
