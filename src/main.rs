use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use flowdis::{
    decoder::CapstoneDecoder,
    format::{self, OutputFormat},
    parser::{BinaryParser, GoblinParser},
    strategy::{Strategy, StrategyOptions},
};

/// Control-flow-aware x86 disassembler for ELF and PE executables
#[derive(Parser, Debug)]
#[command(name = "flowdis", version, about)]
struct Args {
    /// Executable to disassemble
    path: PathBuf,

    /// Disassembly strategy
    #[arg(short, long, value_enum, default_value_t = Strategy::Recursive)]
    strategy: Strategy,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Sweep only the named code section (linear strategy)
    #[arg(long, value_name = "NAME")]
    section: Option<String>,

    /// Stop after decoding this many instructions (0 disables the limit)
    #[arg(long, value_name = "N", default_value_t = 1_000_000)]
    max_instructions: usize,

    /// Seed recursive descent from the entry point only
    #[arg(long)]
    no_symbols: bool,

    /// Do not continue past direct calls
    #[arg(long)]
    no_call_return: bool,

    /// Print the loaded sections and symbols before the listing
    #[arg(long)]
    info: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn strategy_options(&self) -> StrategyOptions {
        StrategyOptions {
            max_instructions: (self.max_instructions > 0).then_some(self.max_instructions),
            seed_symbols: !self.no_symbols,
            calls_return: !self.no_call_return,
            section: self.section.clone(),
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let binary = GoblinParser::new()
        .load(&args.path)
        .with_context(|| format!("failed to load binary '{}'", args.path.display()))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if args.info {
        write!(out, "{}", format::summary(&binary))?;
    }

    if binary.text_section().is_none() {
        eprintln!("Nothing to disassemble: no code section in '{}'", args.path.display());
        return Ok(());
    }

    let decoder = CapstoneDecoder::for_architecture(binary.architecture)
        .context("failed to initialise the disassembler")?;

    let disassembly = args
        .strategy
        .run(&binary, &decoder, &args.strategy_options())
        .with_context(|| format!("{} of '{}' failed", args.strategy, args.path.display()))?;

    log::debug!(
        "{}: {} instructions, {} decode failures, {} targets outside code",
        args.strategy,
        disassembly.instruction_count(),
        disassembly.failures.len(),
        disassembly.dropped_targets
    );
    if disassembly.truncated {
        log::warn!("Instruction limit reached; the listing is incomplete");
    }

    let text = args.format.get_formatter().format(&disassembly, &binary)?;
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    // warn by default, --verbose enables debug; RUST_LOG overrides
    let level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_module("flowdis", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
