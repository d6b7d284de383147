//! mrbridge command-line tool
//!
//! Runs scripts and images through the shim, compiles source to images and
//! disassembles either form.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use mrbridge::{Context, ContextOptions};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "mrbridge")]
#[command(about = "Embed, run and inspect scripts through the mrbridge shim", long_about = None)]
#[command(version)]
struct Cli {
    /// Context options file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Colored output: auto, always, never
    #[arg(long, global = true)]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a source file or compiled image
    Run {
        /// Input file
        file: PathBuf,
    },

    /// Evaluate inline code and print the result
    Eval {
        /// Source code
        code: String,
    },

    /// Compile source to a binary image
    Compile {
        /// Input file
        file: PathBuf,
        /// Output path (defaults to the input with an `.mrb` extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write a little-endian image
        #[arg(long)]
        little_endian: bool,
        /// Omit local variable names
        #[arg(long)]
        strip: bool,
    },

    /// Disassemble a source file or compiled image
    Disasm {
        /// Input file
        file: PathBuf,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

/// Initialize logging.
///
/// `RUST_LOG` overrides the filter picked from the verbosity flag.
fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info,mrbridge=debug",
            _ => "debug,mrbridge=trace,mrbridge_vm=trace",
        })
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_context(config: Option<&PathBuf>) -> anyhow::Result<Context> {
    match config {
        Some(path) => {
            let opts = ContextOptions::from_file(path)
                .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
            Ok(Context::with_options(&opts))
        }
        None => Ok(Context::open()),
    }
}

fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let mut ctx = open_context(cli.config.as_ref())?;

    match cli.command {
        Commands::Run { file } => commands::run::execute(&mut ctx, &file),
        Commands::Eval { code } => commands::eval::execute(&mut ctx, &code),
        Commands::Compile {
            file,
            output,
            little_endian,
            strip,
        } => commands::compile::execute(
            &mut ctx,
            commands::compile::CompileArgs {
                file,
                output,
                little_endian,
                strip,
            },
        ),
        Commands::Disasm { file, json } => commands::disasm::execute(&mut ctx, &file, json),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let choice = output::resolve_color_choice(cli.color.as_deref());

    if let Err(e) = dispatch(cli) {
        output::error(choice, &format!("{:#}", e));
        std::process::exit(1);
    }
}
