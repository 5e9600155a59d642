use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::{info, warn};

use cachesim_msi::msi::{ConsistencyModel, ModelKind, SystemSpec};
use cachesim_msi::report::Report;
use cachesim_msi::trace::TraceReader;
use cachesim_msi::Simulation;

#[derive(Parser, Debug)]
#[command(name = "cachesim", version, about = "MSI cache coherence simulator", long_about = None)]
struct Args {
    /// Number of processors, each with its own cache
    #[arg(short = 'p', long, default_value_t = 4)]
    number_processors: usize,

    /// Cache lines per cache (power of 2)
    #[arg(short = 'l', long, default_value_t = 128)]
    number_lines: usize,

    /// Words per cache line (power of 2)
    #[arg(short = 's', long, default_value_t = 4)]
    line_size: usize,

    /// Write buffer capacity (TSO only)
    #[arg(short = 'w', long)]
    write_buffer_size: Option<usize>,

    /// Buffered writes that trigger a retirement (TSO only)
    #[arg(short = 'r', long)]
    retire_at_count: Option<usize>,

    /// Check cache consistency after every access and log each one
    #[arg(short, long)]
    debug: bool,

    /// Consistency model: SC or TSO
    model: String,

    /// Trace file, one `P<id> <R|W> <address>` per line
    trace_file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // logging
    let env = Env::default()
        .filter_or("CACHESIM_LOG", if args.debug { "debug" } else { "warn" })
        .write_style_or("CACHESIM_LOG_STYLE", "auto");
    env_logger::init_from_env(env);

    let consistency = ConsistencyModel::from_name(&args.model, args.write_buffer_size, args.retire_at_count)?;
    if consistency.kind() == ModelKind::Sc
        && (args.write_buffer_size.is_some() || args.retire_at_count.is_some())
    {
        warn!("write buffer options have no effect under SC");
    }

    let spec = SystemSpec {
        number_processors: args.number_processors,
        number_lines: args.number_lines,
        line_size: args.line_size,
        consistency,
        debug: args.debug,
    };
    let mut sim = Simulation::new(spec)?;

    let trace = TraceReader::open(&args.trace_file)
        .with_context(|| format!("could not open trace '{}'", args.trace_file.display()))?;
    let count = sim
        .replay(trace)
        .with_context(|| format!("simulation of '{}' aborted", args.trace_file.display()))?;
    info!("simulated {} accesses from {}", count, args.trace_file.display());

    let caches = sim.cache_reports();
    let general = sim.general_report();
    print!("{}", Report { caches: &caches, general: &general });
    Ok(())
}
