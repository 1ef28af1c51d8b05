#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

mod csv_source;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use csv_source::CsvKeySource;
use dht_chord::ChordOverlay;
use dht_core::Value;
use dht_metrics::{build_result_record, GridSummaryRow, ResultRecord};
use dht_pastry::PastryOverlay;
use dht_workload::{SyntheticKeySource, WorkloadDescriptor, WorkloadOutcome};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "dht-cli",
    about = "Chord/Pastry overlay experiment runner",
    long_about = "Runs a fixed workload against one Chord overlay and one Pastry overlay of the same size, measuring routing hop counts per operation class.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the baseline workload (or, with --grid, a sweep over N and join_leave).
    Run {
        /// CSV path supplying (key, value) pairs; omit to use the synthetic source.
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Number of initial nodes.
        #[arg(long = "N", default_value_t = 20)]
        n: usize,

        /// Number of insert operations.
        #[arg(long, default_value_t = 0)]
        inserts: usize,

        /// Number of lookup operations.
        #[arg(long, default_value_t = 0)]
        lookups: usize,

        /// Number of update operations.
        #[arg(long, default_value_t = 0)]
        updates: usize,

        /// Number of delete operations.
        #[arg(long, default_value_t = 0)]
        deletes: usize,

        /// Number of join+leave churn events.
        #[arg(long = "join_leave", default_value_t = 0)]
        join_leave: usize,

        /// K-query fan-out.
        #[arg(long = "K", default_value_t = 0)]
        k: usize,

        /// RNG seed.
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Output path for the result record (or grid rows).
        #[arg(long, default_value = "results.json")]
        out: PathBuf,

        /// Sweep N and join_leave over a 3x3 grid (1x, 2x, 4x the given
        /// values) instead of running the single baseline descriptor.
        #[arg(long, default_value_t = false)]
        grid: bool,
    },

    /// Read a result record (or grid) and write a flat CSV summary.
    Plot {
        /// Path to a `results.json`-shaped file.
        #[arg(long)]
        results: PathBuf,

        /// Directory to write `summary.csv` into.
        #[arg(long)]
        outdir: PathBuf,
    },
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Run {
            csv,
            n,
            inserts,
            lookups,
            updates,
            deletes,
            join_leave,
            k,
            seed,
            out,
            grid,
        } => run(csv, n, inserts, lookups, updates, deletes, join_leave, k, seed, out, grid),
        Cmd::Plot { results, outdir } => plot(results, outdir),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).with_level(true).compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating parent directory {}", dir.display()))?;
        }
    }
    Ok(())
}

/// Either CSV-backed or synthetic key/value source, kept as a concrete enum
/// (rather than `Box<dyn KeySource>`) so a CSV schema error can still be
/// recovered from the source after the workload has consumed it.
enum Source {
    Csv(CsvKeySource),
    Synthetic(SyntheticKeySource),
}

impl Iterator for Source {
    type Item = (Vec<u8>, Value);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Csv(inner) => inner.next(),
            Self::Synthetic(inner) => inner.next(),
        }
    }
}

impl Source {
    /// Surface a CSV schema/read error, if one occurred during iteration.
    /// A no-op for the synthetic source, which never fails.
    fn check(&mut self) -> Result<()> {
        if let Self::Csv(inner) = self {
            if let Some(err) = inner.take_error() {
                return Err(err.into());
            }
        }
        Ok(())
    }
}

fn open_source(csv: &Option<PathBuf>) -> Result<Source> {
    match csv {
        Some(path) => Ok(Source::Csv(CsvKeySource::open(path)?)),
        None => Ok(Source::Synthetic(SyntheticKeySource::new())),
    }
}

fn run_one_cell(descriptor: &WorkloadDescriptor, csv: &Option<PathBuf>) -> Result<(WorkloadOutcome, WorkloadOutcome)> {
    let mut chord = ChordOverlay::new(dht_idspace::ID_BITS);
    let mut chord_source = open_source(csv)?;
    let chord_outcome = dht_workload::run(&mut chord, &mut chord_source, descriptor)
        .with_context(|| "chord workload run failed")?;
    chord_source.check().context("CSV source failed during chord run")?;

    let mut pastry = PastryOverlay::new(dht_pastry::DEFAULT_B_BITS, dht_pastry::DEFAULT_LEAF_SIZE);
    let mut pastry_source = open_source(csv)?;
    let pastry_outcome = dht_workload::run(&mut pastry, &mut pastry_source, descriptor)
        .with_context(|| "pastry workload run failed")?;
    pastry_source.check().context("CSV source failed during pastry run")?;

    Ok((chord_outcome, pastry_outcome))
}

#[allow(clippy::too_many_arguments)]
fn run(
    csv: Option<PathBuf>,
    n: usize,
    inserts: usize,
    lookups: usize,
    updates: usize,
    deletes: usize,
    join_leave: usize,
    k: usize,
    seed: u64,
    out: PathBuf,
    grid: bool,
) -> Result<()> {
    ensure_parent_dir(&out)?;

    if !grid {
        let descriptor = WorkloadDescriptor { n, inserts, lookups, updates, deletes, join_leave, k, seed };
        info!(n, inserts, lookups, updates, deletes, join_leave, k, seed, "running baseline workload");
        let (chord_outcome, pastry_outcome) = run_one_cell(&descriptor, &csv)?;
        let record = build_result_record(&chord_outcome, &pastry_outcome, &descriptor);
        write_json(&out, &record)?;
        println!("Wrote baseline result record to {}", out.display());
        return Ok(());
    }

    let n_values = [n, n * 2, n * 4];
    let join_leave_values = [join_leave, join_leave * 2, join_leave * 4];
    let mut rows = Vec::with_capacity(n_values.len() * join_leave_values.len());

    for &cell_n in &n_values {
        for &cell_jl in &join_leave_values {
            let descriptor = WorkloadDescriptor {
                n: cell_n,
                inserts,
                lookups,
                updates,
                deletes,
                join_leave: cell_jl,
                k,
                seed,
            };
            info!(n = cell_n, join_leave = cell_jl, "running grid cell");
            let (chord_outcome, pastry_outcome) = run_one_cell(&descriptor, &csv)?;
            let chord_kquery = dht_metrics::aggregate(&chord_outcome.records);
            let pastry_kquery = dht_metrics::aggregate(&pastry_outcome.records);
            rows.push(GridSummaryRow::new("chord", cell_n, cell_jl, k, seed, &chord_kquery["kquery"]));
            rows.push(GridSummaryRow::new("pastry", cell_n, cell_jl, k, seed, &pastry_kquery["kquery"]));
        }
    }

    write_json(&out, &rows)?;
    println!("Wrote {} grid rows to {}", rows.len(), out.display());
    Ok(())
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serializing result to JSON")?;
    let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

/// The minimal, honest thing for a subcommand specified only for CLI
/// compatibility: read whatever JSON shape `results.json` holds and flatten
/// it into a CSV of per-(protocol, op_class) stats, with no charting
/// dependency the core has no other use for.
fn plot(results: PathBuf, outdir: PathBuf) -> Result<()> {
    std::fs::create_dir_all(&outdir)
        .with_context(|| format!("creating output directory {}", outdir.display()))?;
    let raw = std::fs::read_to_string(&results)
        .with_context(|| format!("reading {}", results.display()))?;

    let out_path = outdir.join("summary.csv");
    let file = File::create(&out_path).with_context(|| format!("creating {}", out_path.display()))?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    writer
        .write_record(["protocol", "op_class", "count", "mean", "median", "p95"])
        .context("writing CSV header")?;

    if let Ok(record) = serde_json::from_str::<ResultRecord>(&raw) {
        write_protocol_section(&mut writer, "chord", &record.chord)?;
        write_protocol_section(&mut writer, "pastry", &record.pastry)?;
    } else {
        let rows: Vec<GridSummaryRow> =
            serde_json::from_str(&raw).context("results file matches neither ResultRecord nor grid row shape")?;
        for row in rows {
            writer
                .write_record([
                    row.protocol.as_str(),
                    "kquery",
                    "",
                    &row.kquery_mean_hops.map_or_else(String::new, |v| v.to_string()),
                    "",
                    &row.kquery_p95_hops.map_or_else(String::new, |v| v.to_string()),
                ])
                .context("writing grid CSV row")?;
        }
    }

    writer.flush().context("flushing summary.csv")?;
    println!("Wrote summary to {}", out_path.display());
    Ok(())
}

fn write_protocol_section(
    writer: &mut csv::Writer<BufWriter<File>>,
    protocol: &str,
    section: &dht_metrics::ProtocolSection,
) -> Result<()> {
    for (op_class, stats) in section {
        writer
            .write_record([
                protocol,
                op_class.as_str(),
                &stats.count.to_string(),
                &stats.mean.map_or_else(String::new, |v| v.to_string()),
                &stats.median.map_or_else(String::new, |v| v.to_string()),
                &stats.p95.map_or_else(String::new, |v| v.to_string()),
            ])
            .with_context(|| format!("writing CSV row for {protocol}/{op_class}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario 6: grid `N in {20,40,80} x join_leave in {10,20,40}, K=20,
    /// seed=1`: the sweep covers 9 (N, join_leave) cells (2 protocol rows
    /// each), and mean K-query hops is monotonically non-decreasing in N for
    /// a fixed join_leave, allowing +/-1 statistical wiggle.
    #[test]
    fn scenario_6_grid_sweep_covers_nine_cells_with_monotonic_mean_hops() {
        let out = std::env::temp_dir().join(format!("dht-cli-grid-scenario-{}.json", std::process::id()));
        run(None, 20, 30, 0, 0, 0, 10, 20, 1, out.clone(), true).expect("grid run should succeed");

        let raw = std::fs::read_to_string(&out).expect("grid output should be written");
        std::fs::remove_file(&out).ok();
        let rows: Vec<GridSummaryRow> = serde_json::from_str(&raw).expect("grid output should be valid JSON");

        let cells: std::collections::HashSet<(usize, usize)> =
            rows.iter().map(|r| (r.n, r.join_leave)).collect();
        assert_eq!(cells.len(), 9, "grid should cover 3x3 = 9 (N, join_leave) cells");
        assert_eq!(rows.len(), 18, "each cell should have one row per protocol");

        for protocol in ["chord", "pastry"] {
            let mut by_n: Vec<(usize, f64)> = rows
                .iter()
                .filter(|r| r.protocol == protocol && r.join_leave == 10)
                .filter_map(|r| r.kquery_mean_hops.map(|mean| (r.n, mean)))
                .collect();
            by_n.sort_by_key(|(n, _)| *n);
            for pair in by_n.windows(2) {
                let (n_lo, mean_lo) = pair[0];
                let (n_hi, mean_hi) = pair[1];
                assert!(
                    mean_hi >= mean_lo - 1.0,
                    "{protocol}: mean hops dropped from {mean_lo} at N={n_lo} to {mean_hi} at N={n_hi}"
                );
            }
        }
    }
}
