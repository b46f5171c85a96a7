//! cn-index - Binary Entry Point
//!
//! Inspects a change-number index on disk: prints its statistics, then dumps
//! records from an optional starting change number as JSON lines.
//!
//! Usage: `cn-index [FROM]` with the data directory taken from
//! `CN_INDEX_DATA_DIR`. The trimmer is never started here.

use std::io::{self, BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cn_index::{ChangeNumberIndex, IndexConfig, StaticTopology};
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let from = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<u64>()
            .map_err(|e| format!("invalid change number {:?}: {}", arg, e))?,
        None => 0,
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })?;
    }

    let config = IndexConfig::from_env();
    let index = ChangeNumberIndex::open_file(config, Arc::new(StaticTopology::new()))?;

    let stats = index.snapshot_stats();
    eprintln!("{}", stats);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut dumped = 0u64;
    for record in index.open_cursor_from(from)? {
        if interrupted.load(Ordering::SeqCst) {
            tracing::info!(dumped, "interrupted; stopping dump");
            break;
        }
        writeln!(out, "{}", record?.to_json_line()?)?;
        dumped += 1;
    }
    out.flush()?;

    index.close()?;
    Ok(())
}
