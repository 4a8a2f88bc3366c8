use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fluidterm", about = "Terminal front-end for a FluidSynth server")]
pub struct Cli {
    /// Config file (default: <config dir>/fluidterm/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Synth host, overrides the config file
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Synth shell port, overrides the config file
    #[arg(long, global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Browse fonts and instruments interactively (default)
    Tui(TuiArgs),
    /// Check the synth answers
    Ping,
    /// List loaded soundfonts
    Fonts,
    /// List every instrument of every loaded soundfont
    Instruments,
    /// Show what each MIDI channel is playing
    Channels,
    /// Print the font / bank / instrument tree with channel annotations
    Tree,
    /// Put an instrument on a channel
    Select {
        channel: u8,
        font: u32,
        bank: u32,
        program: u32,
    },
    /// Play a click track through a virtual MIDI port
    Metronome(MetronomeArgs),
    /// Manage the jackd audio server
    #[command(subcommand)]
    Jack(JackCommand),
    /// Connect a physical output port to an input port on the same layer
    Connect {
        /// Glob for the output port (bare names match anywhere)
        out_glob: String,
        /// Glob for the input port
        in_glob: String,
    },
    /// List audio server ports and MIDI outputs
    Ports,
}

#[derive(Args)]
pub struct TuiArgs {
    /// Where log output goes while the screen is taken over
    #[arg(long, default_value = "fluidterm.log")]
    pub log_file: PathBuf,
}

impl Default for TuiArgs {
    fn default() -> Self {
        Self {
            log_file: "fluidterm.log".into(),
        }
    }
}

#[derive(Args)]
pub struct MetronomeArgs {
    #[arg(long)]
    pub bpm: Option<f64>,

    /// Beats separated by spaces, notes by commas, optional :velocity
    #[arg(long)]
    pub track: Option<String>,

    /// MIDI channel (0-15)
    #[arg(long)]
    pub channel: Option<u8>,

    /// Stop after this many beats (default: run until Enter is pressed)
    #[arg(long)]
    pub beats: Option<usize>,
}

#[derive(Subcommand)]
pub enum JackCommand {
    /// Start jackd and stream its log until Enter is pressed
    Start,
    /// Print the jackd command line that `start` would run
    Command,
}
