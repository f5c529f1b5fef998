//! `dsp`: read audio inputs, run them through an effects chain, write the
//! result to a sink.

mod process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dsp")]
#[command(version, about = "An audio processing program with an interactive mode", long_about = None)]
#[command(after_help = "Effect tokens follow the inputs after `--`; see `dsp --effects-help`.")]
pub struct Cli {
    /// Input files (`null`, or `-t sgen` generator specs)
    #[arg(required_unless_present_any = ["effects_help", "plot", "plot_phase"])]
    pub inputs: Vec<String>,

    /// Output path (defaults to the null sink)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Block size in frames
    #[arg(short = 'b', long, default_value_t = 2048)]
    pub block_frames: usize,

    /// Input codec type (wav, null, sgen)
    #[arg(short = 't', long)]
    pub input_type: Option<String>,

    /// Output codec type
    #[arg(short = 'T', long)]
    pub output_type: Option<String>,

    /// Output encoding (s16, s24, s32, f32)
    #[arg(short = 'e', long)]
    pub encoding: Option<String>,

    /// Sample rate for inputs without an intrinsic one (e.g. `44.1k`)
    #[arg(short = 'r', long)]
    pub rate: Option<String>,

    /// Channel count for inputs without an intrinsic one
    #[arg(short = 'c', long)]
    pub channels: Option<usize>,

    /// Codec buffer depth as a multiple of the block size
    #[arg(short = 'R', long, default_value_t = 8)]
    pub buf_ratio: usize,

    /// Disable the progress display
    #[arg(short, long)]
    pub quiet: bool,

    /// Silent mode
    #[arg(short, long)]
    pub silent: bool,

    /// Verbose mode
    #[arg(short, long)]
    pub verbose: bool,

    /// Force dithering
    #[arg(short = 'd', long, conflicts_with = "no_dither")]
    pub dither: bool,

    /// Disable dithering
    #[arg(short = 'D', long)]
    pub no_dither: bool,

    /// Don't drain the effects chain before rebuilding
    #[arg(short = 'E', long)]
    pub no_drain: bool,

    /// Plot the chain magnitude response instead of processing audio
    #[arg(short = 'p', long)]
    pub plot: bool,

    /// Like --plot, but also plot phase
    #[arg(short = 'P', long)]
    pub plot_phase: bool,

    /// Sequence input mode: each input is independent and the chain is
    /// rebuilt between rate or channel changes
    #[arg(short = 'S', long)]
    pub sequence: bool,

    /// Shorthand for a null output
    #[arg(short = 'n', long)]
    pub null_output: bool,

    /// List all effects and exit
    #[arg(long)]
    pub effects_help: bool,

    /// Effect script tokens
    #[arg(last = true, allow_hyphen_values = true)]
    pub effects: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.silent {
        "off"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.effects_help {
        println!("Effects:");
        for info in dsp_fx::effect_catalogue() {
            println!("  {}", info.usage);
        }
        return Ok(());
    }

    process::run(&cli)
}
