//! Top-level application orchestration.
//!
//! `src/main.rs` only maps the error to an exit code; this module is the real
//! main:
//! - loads `.env` and parses CLI arguments
//! - sets up logging on stderr
//! - runs the requested pattern (loop, pool, or one array element)
//! - prints reports and writes optional exports

use std::path::Path;

use chrono::Utc;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, CollectArgs, Command, RunArgs, SimulateArgs, SlurmCommand, UnitArgs, UnitsArgs};
use crate::domain::{RunConfig, UnitConfig, UnitId, UnitSelector};
use crate::error::{AppError, EXIT_INCOMPLETE};
use crate::io::collect::{expand_result_paths, read_result_files};
use crate::io::export::{RESULTS_HEADER, RunSummary, format_result_row, write_results_csv, write_results_json};
use crate::io::ingest::load_units;
use crate::slurm::{ArrayJob, JobResources, ParallelJob, format_array_ranges};

pub mod pipeline;

/// Entry point for the `yearfit` binary.
pub fn run() -> Result<(), AppError> {
    // A missing .env is the normal case.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log.as_deref());

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Unit(args) => handle_unit(args),
        Command::Collect(args) => handle_collect(args),
        Command::Slurm(cmd) => handle_slurm(cmd),
        Command::Units(args) => handle_units(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

fn init_logging(verbose: u8, filter: Option<&str>) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = filter
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new(default));

    // Tests and embedders may have installed a subscriber already.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let config = run_config_from_args(&args);
    let run = pipeline::run_pipeline(&config)?;

    if !args.quiet {
        print!(
            "{}",
            crate::report::format_run_summary(&run.dataset, &config.spec, config.mode, run.workers, run.elapsed)
        );
    }
    print!("{}", crate::report::format_results_table(&run.results));

    if let Some(path) = &config.export_csv {
        write_results_csv(path, &run.results)?;
        info!(path = %path.display(), rows = run.results.len(), "wrote results table");
    }
    if let Some(path) = &config.export_json {
        let summary = RunSummary {
            tool: "yearfit",
            generated_at: Utc::now(),
            data: config.data_path.display().to_string(),
            mode: config.mode,
            threads: run.workers,
            spec: &config.spec,
            rows_read: run.dataset.rows_read,
            rows_used: run.dataset.rows_used(),
            rows_skipped: run.dataset.row_errors.len(),
            elapsed_secs: run.elapsed.as_secs_f64(),
            results: &run.results,
        };
        write_results_json(path, &summary)?;
        info!(path = %path.display(), "wrote run summary");
    }

    Ok(())
}

pub fn run_config_from_args(args: &RunArgs) -> RunConfig {
    RunConfig {
        data_path: args.model.data.clone(),
        delimiter: args.model.delimiter,
        spec: args.model.regression_spec(),
        mode: args.mode,
        threads: args.threads,
        only_units: args.only.clone(),
        export_csv: args.export.clone(),
        export_json: args.export_json.clone(),
    }
}

fn handle_unit(args: UnitArgs) -> Result<(), AppError> {
    let config = unit_config_from_args(&args)?;
    let host = hostname();
    debug!(host = %host, selector = ?config.selector, "array element starting");

    let out = pipeline::run_unit(&config)?;
    debug!(
        host = %host,
        unit = out.result.unit,
        elapsed_ms = out.elapsed.as_secs_f64() * 1e3,
        "array element finished"
    );

    println!("{}", format_result_row(&out.result));
    Ok(())
}

pub fn unit_config_from_args(args: &UnitArgs) -> Result<UnitConfig, AppError> {
    let selector = match (args.year, args.index) {
        (Some(unit), _) => UnitSelector::Unit(unit),
        (None, Some(index)) => UnitSelector::Index {
            index,
            base: args.index_base,
        },
        (None, None) => {
            return Err(AppError::usage("Pass --index, --year, or set SLURM_ARRAY_TASK_ID."));
        }
    };

    Ok(UnitConfig {
        data_path: args.model.data.clone(),
        delimiter: args.model.delimiter,
        spec: args.model.regression_spec(),
        selector,
        output: args.output.clone(),
    })
}

fn hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(error) => {
            warn!(error = %error, "failed to read hostname");
            "unknown".to_string()
        }
    }
}

fn handle_collect(args: CollectArgs) -> Result<(), AppError> {
    let paths = expand_result_paths(&args.inputs)?;
    let collected = read_result_files(&paths)?;

    // (array index, unit) for every unit a complete run produces.
    let expected: Option<Vec<(i64, UnitId)>> = match (&args.expect, &args.data) {
        (Some((first, last)), _) => Some(
            (*first..=*last)
                .map(|unit| (args.index_base + (unit - first), unit))
                .collect(),
        ),
        (None, Some(data)) => {
            let units = load_units(data, &args.unit_col, args.delimiter)?;
            Some(crate::fit::unit_indices(&units, args.index_base))
        }
        (None, None) => None,
    };

    let missing: Vec<(i64, UnitId)> = match &expected {
        Some(expected) => {
            let units: Vec<UnitId> = expected.iter().map(|(_, u)| *u).collect();
            let missing = collected.missing_units(&units);
            expected
                .iter()
                .filter(|(_, u)| missing.binary_search(u).is_ok())
                .copied()
                .collect()
        }
        None => Vec::new(),
    };

    match &args.output {
        Some(path) => write_results_csv(path, &collected.results)?,
        None => {
            println!("{RESULTS_HEADER}");
            for r in &collected.results {
                println!("{}", format_result_row(r));
            }
        }
    }

    let labelled: Vec<(Option<i64>, UnitId)> = missing.iter().map(|&(i, u)| (Some(i), u)).collect();
    eprint!("{}", crate::report::format_collect_summary(&collected, &labelled));

    if !missing.is_empty() {
        let indices: Vec<i64> = missing.iter().map(|(i, _)| *i).collect();
        let spec = format_array_ranges(&indices);
        return Err(AppError::new(
            EXIT_INCOMPLETE,
            format!(
                "{} expected unit(s) missing; resubmit with --array={spec}",
                missing.len()
            ),
        ));
    }
    if collected.results.is_empty() {
        return Err(AppError::no_data("No result rows found."));
    }
    Ok(())
}

fn handle_slurm(cmd: SlurmCommand) -> Result<(), AppError> {
    let (script, target, log_dir) = match cmd {
        SlurmCommand::Array(args) => {
            let units = load_units(&args.model.data, &args.model.unit_col, args.model.delimiter)?;
            let first = args.index_base;
            let last = args.index_base + units.len() as i64 - 1;

            let mut command = vec![args.job.program.clone(), "unit".to_string()];
            command.extend(args.model.to_args());
            if args.index_base != 1 {
                command.extend(["--index-base".to_string(), args.index_base.to_string()]);
            }
            command.extend(["--output".to_string(), args.output.display().to_string()]);

            let job = ArrayJob {
                resources: job_resources(&args.job),
                first,
                last,
                max_concurrent: args.max_concurrent,
                only_indices: args.indices.map(|list| list.0),
                command,
            };
            info!(units = units.len(), first, last, "rendering array script");
            (crate::slurm::render_array_script(&job)?, args.job.script, args.job.log_dir)
        }
        SlurmCommand::Parallel(args) => {
            let mut command = vec![args.job.program.clone(), "run".to_string()];
            command.extend(args.model.to_args());
            command.extend(["--mode".to_string(), "parallel".to_string()]);
            if let Some(path) = &args.export {
                command.extend(["--export".to_string(), path.display().to_string()]);
            }

            let job = ParallelJob {
                resources: job_resources(&args.job),
                nodes: args.nodes,
                ntasks: args.ntasks,
                command,
            };
            (crate::slurm::render_parallel_script(&job)?, args.job.script, args.job.log_dir)
        }
    };

    // sbatch opens the --output file before the script's own `mkdir` runs.
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| AppError::usage(format!("Failed to create log directory '{}': {e}", log_dir.display())))?;

    match target {
        Some(path) => write_script(&path, &script),
        None => {
            print!("{script}");
            Ok(())
        }
    }
}

fn job_resources(job: &crate::cli::JobArgs) -> JobResources {
    JobResources {
        job_name: job.job_name.clone(),
        partition: job.partition.clone(),
        account: job.account.clone(),
        time: job.time.clone(),
        mem: job.mem.clone(),
        cpus_per_task: job.cpus_per_task,
        log_dir: job.log_dir.clone(),
    }
}

fn write_script(path: &Path, script: &str) -> Result<(), AppError> {
    std::fs::write(path, script)
        .map_err(|e| AppError::usage(format!("Failed to write script '{}': {e}", path.display())))?;
    info!(path = %path.display(), "wrote sbatch script");
    Ok(())
}

fn handle_units(args: UnitsArgs) -> Result<(), AppError> {
    let units = load_units(&args.data, &args.unit_col, args.delimiter)?;
    if args.count {
        println!("{}", units.len());
    } else {
        let indices = crate::fit::unit_indices(&units, args.index_base);
        print!("{}", crate::report::format_unit_indices(&indices));
    }
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let config = crate::data::SampleConfig {
        first_year: args.first_year,
        last_year: args.last_year,
        rows_per_year: args.rows_per_year,
        slope: args.slope,
        drift: args.drift,
        noise_sd: args.noise_sd,
        groups: args.groups,
        missing_rate: args.missing_rate,
        seed: args.seed,
    };
    let rows = crate::data::write_sample(&args.output, &config, args.delimiter)?;
    eprintln!(
        "wrote {rows} rows ({}..={}) to {}",
        config.first_year,
        config.last_year,
        args.output.display()
    );
    Ok(())
}
