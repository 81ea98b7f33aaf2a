use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ndarray::{Array2, Axis};
use tracing::info;

use seisrisk::config::CalculationConfig;
use seisrisk::hazard_maps::{compute_hazard_maps, make_uhs};
use seisrisk::pmap::ProbabilityMap;
use seisrisk::reinsurance::{EventTable, by_policy_event};
use seisrisk::treaty::{ReinsuranceModel, default_index};

#[derive(Parser, Debug)]
#[clap(name = "seisrisk", about = "Hazard maps and reinsurance cessions")]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the treaty cascade over a loss table
    Reinsurance {
        /// YAML or JSON job; the built-in job when omitted
        #[clap(short, long)]
        config: Option<PathBuf>,
        #[clap(short, long, default_value = "cessions.ndjson")]
        output: PathBuf,
        #[clap(short, long)]
        quiet: bool,
    },
    /// Interpolate hazard maps from the curves of a job
    HazardMap {
        #[clap(short, long)]
        config: Option<PathBuf>,
    },
}

fn load(path: Option<&PathBuf>) -> Result<CalculationConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            CalculationConfig::from_path(path).with_context(|| format!("loading {}", path.display()))
        }
        None => Ok(CalculationConfig::canonical()),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Command::Reinsurance { config, output, quiet } => run_reinsurance(load(config.as_ref())?, &output, quiet),
        Command::HazardMap { config } => run_hazard_map(&load(config.as_ref())?),
    }
}

fn run_reinsurance(config: CalculationConfig, output: &Path, quiet: bool) -> Result<()> {
    let job = config.reinsurance.context("the job has no reinsurance section")?;
    let index = job.policy_index.clone().unwrap_or_else(|| default_index(&job.model));
    let model = ReinsuranceModel::parse(job.model, &index)?;
    let (claims, table) = by_policy_event(&job.losses, &model.policies, &model.treaties)?;

    let file = File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    for record in table.records() {
        serde_json::to_writer(&mut writer, &record)?;
        writeln!(writer)?;
    }
    writer.flush()?;
    info!(claims = claims.len(), events = table.rows.len(), path = %output.display(), "wrote event cessions");

    if !quiet {
        println!("Policy claims: {}", claims.len());
        print_totals(&table);
    }
    Ok(())
}

fn print_totals(table: &EventTable) {
    println!("\n=== Totals over {} events ===", table.rows.len());
    for (column, total) in table.totals() {
        println!("  {:<20} {:>16.4}", column, total);
    }
    let claim: f64 = table.rows.iter().map(|r| r.claim).sum();
    if claim > 0.0 {
        let retained: f64 = table.rows.iter().map(|r| r.retention).sum();
        println!("  {:<20} {:>15.2}%", "retained share", retained / claim * 100.0);
    }
}

fn run_hazard_map(config: &CalculationConfig) -> Result<()> {
    if config.curves.is_empty() || config.poes.is_empty() {
        anyhow::bail!("hazard maps need curves and poes");
    }
    let num_levels = config.imtls.num_levels();
    let flat: Vec<f64> = config.curves.iter().flat_map(|c| c.poes.iter().copied()).collect();
    let curves = Array2::from_shape_vec((config.curves.len(), num_levels), flat)?;

    println!("\n=== Hazard maps (investigation time {} years) ===", config.investigation_time);
    print!("{:>6} | {:>10}", "Site", "IMT");
    for poe in &config.poes {
        print!(" | {:>10}", format!("poe={poe}"));
    }
    println!();
    println!("{}", "-".repeat(6 + 3 + 10 + 13 * config.poes.len()));

    for (imt, levels, slice) in config.imtls.iter() {
        let hmap = compute_hazard_maps(curves.slice(ndarray::s![.., slice]), levels, &config.poes)?;
        for (curve, row) in config.curves.iter().zip(hmap.rows()) {
            print!("{:>6} | {:>10}", curve.sid.0, imt);
            for value in row {
                print!(" | {:>10.5}", value);
            }
            println!();
        }
    }

    let sids = config.curves.iter().map(|c| c.sid).collect();
    let pmap = ProbabilityMap::from_array(sids, curves.insert_axis(Axis(2)))?;
    let uhs = make_uhs(&pmap, &config.imtls, &config.poes)?;
    if uhs.imts.is_empty() {
        return Ok(());
    }
    println!("\n=== Uniform hazard spectra ===");
    print!("{:>6} | {:>10}", "Site", "PoE");
    for imt in &uhs.imts {
        print!(" | {:>10}", imt);
    }
    println!();
    println!("{}", "-".repeat(6 + 3 + 10 + 13 * uhs.imts.len()));
    for &sid in &uhs.sids {
        for (p, poe) in uhs.poes.iter().enumerate() {
            print!("{:>6} | {:>10}", sid.0, poe);
            for value in uhs.spectrum(sid, p).into_iter().flatten() {
                print!(" | {:>10.5}", value);
            }
            println!();
        }
    }
    Ok(())
}
