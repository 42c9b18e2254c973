//! Command-line parsing for `yearfit`.
//!
//! Argument parsing stays here; `app` turns parsed arguments into configs and
//! dispatches. Values the scheduler provides (`SLURM_ARRAY_TASK_ID`) and
//! per-site defaults (`YEARFIT_THREADS`, `YEARFIT_LOG`) can come from the
//! environment or a `.env` file.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::domain::{ColumnSpec, ExecMode, RegressionSpec, UnitId};
use crate::error::AppError;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "yearfit",
    version,
    about = "Per-unit regression intervals: sequential, job-array and parallel patterns"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug). Ignored when YEARFIT_LOG is set.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log filter in tracing EnvFilter syntax.
    #[arg(long, global = true, env = "YEARFIT_LOG", value_name = "FILTER")]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every unit in one process, sequentially or on a worker pool.
    Run(RunArgs),
    /// Fit the single unit selected by an array index and append its row.
    Unit(UnitArgs),
    /// Merge appended result files and report missing units.
    Collect(CollectArgs),
    /// Render sbatch scripts for the array or parallel pattern.
    #[command(subcommand)]
    Slurm(SlurmCommand),
    /// List the array index of each unit in a dataset.
    Units(UnitsArgs),
    /// Write a synthetic dataset with known per-year slopes.
    Simulate(SimulateArgs),
}

/// Data source and regression model, shared by every fitting command.
#[derive(Debug, Args, Clone)]
pub struct ModelArgs {
    /// Delimited input table with a header row.
    #[arg(short, long, value_name = "PATH")]
    pub data: PathBuf,

    /// Field delimiter (single byte; `\t` for tab).
    #[arg(long, default_value = ",", value_parser = parse_delimiter)]
    pub delimiter: u8,

    /// Column identifying the unit of work.
    #[arg(long, default_value = "year")]
    pub unit_col: String,

    /// Response column.
    #[arg(short = 'y', long)]
    pub response: String,

    /// Predictor whose coefficient and interval are reported.
    #[arg(short = 'x', long)]
    pub predictor: String,

    /// Additional numeric regressor (repeatable).
    #[arg(long = "control", value_name = "COLUMN")]
    pub controls: Vec<String>,

    /// Categorical regressor, dummy-coded per unit (repeatable).
    #[arg(long = "factor", value_name = "COLUMN")]
    pub factors: Vec<String>,

    /// Two-sided confidence level.
    #[arg(long, default_value_t = 0.95)]
    pub level: f64,
}

impl ModelArgs {
    pub fn regression_spec(&self) -> RegressionSpec {
        RegressionSpec {
            columns: ColumnSpec {
                unit: self.unit_col.clone(),
                response: self.response.clone(),
                predictor: self.predictor.clone(),
                controls: self.controls.clone(),
                factors: self.factors.clone(),
            },
            level: self.level,
        }
    }

    /// Rebuild the argv that reproduces these options, for generated scripts.
    pub fn to_args(&self) -> Vec<String> {
        let mut argv = vec!["--data".to_string(), self.data.display().to_string()];
        if self.delimiter != b',' {
            let delim = if self.delimiter == b'\t' {
                "\\t".to_string()
            } else {
                char::from(self.delimiter).to_string()
            };
            argv.extend(["--delimiter".to_string(), delim]);
        }
        if self.unit_col != "year" {
            argv.extend(["--unit-col".to_string(), self.unit_col.clone()]);
        }
        argv.extend(["--response".to_string(), self.response.clone()]);
        argv.extend(["--predictor".to_string(), self.predictor.clone()]);
        for c in &self.controls {
            argv.extend(["--control".to_string(), c.clone()]);
        }
        for f in &self.factors {
            argv.extend(["--factor".to_string(), f.clone()]);
        }
        argv.extend(["--level".to_string(), self.level.to_string()]);
        argv
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Execution pattern.
    #[arg(long, value_enum, default_value_t = ExecMode::Sequential)]
    pub mode: ExecMode,

    /// Worker threads for parallel mode (0 = one per core).
    #[arg(short = 'j', long, env = "YEARFIT_THREADS", default_value_t = 0)]
    pub threads: usize,

    /// Restrict the run to these units (comma-separated).
    #[arg(long, value_delimiter = ',', value_name = "UNIT")]
    pub only: Vec<UnitId>,

    /// Write the results table to CSV.
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,

    /// Write a JSON run summary with diagnostics.
    #[arg(long = "export-json", value_name = "PATH")]
    pub export_json: Option<PathBuf>,

    /// Print only the results table.
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Args)]
pub struct UnitArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Array index selecting the unit.
    #[arg(long, env = "SLURM_ARRAY_TASK_ID", required_unless_present = "year")]
    pub index: Option<i64>,

    /// Index of the first unit.
    #[arg(long, default_value_t = 1)]
    pub index_base: i64,

    /// Select the unit by value; takes precedence over the index.
    #[arg(long, value_name = "UNIT")]
    pub year: Option<UnitId>,

    /// Shared results file to append the row to (stdout when absent).
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct CollectArgs {
    /// Result files, or directories holding `.csv`/`.txt` result files.
    #[arg(required = true, value_name = "PATH")]
    pub inputs: Vec<PathBuf>,

    /// Write the merged table here (stdout when absent).
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Expected unit range, e.g. `1987-2008`.
    ///
    /// Every unit in the range is expected and indexed consecutively from
    /// `--index-base`. Use `--data` when the dataset skips units.
    #[arg(long, value_name = "FIRST-LAST", value_parser = parse_unit_range, conflicts_with = "data")]
    pub expect: Option<(UnitId, UnitId)>,

    /// Take the expected units (and their array indices) from a dataset.
    #[arg(long, value_name = "PATH")]
    pub data: Option<PathBuf>,

    /// Unit column of `--data`.
    #[arg(long, default_value = "year")]
    pub unit_col: String,

    /// Field delimiter of `--data`.
    #[arg(long, default_value = ",", value_parser = parse_delimiter)]
    pub delimiter: u8,

    /// Index of the first unit, for the re-submission array spec.
    #[arg(long, default_value_t = 1)]
    pub index_base: i64,
}

#[derive(Debug, Subcommand)]
pub enum SlurmCommand {
    /// One array element per unit, each appending to a shared file.
    Array(SlurmArrayArgs),
    /// One allocation running the parallel loop on its cores.
    Parallel(SlurmParallelArgs),
}

/// Scheduler directives common to both script kinds.
#[derive(Debug, Args, Clone)]
pub struct JobArgs {
    #[arg(long, default_value = "yearfit")]
    pub job_name: String,

    #[arg(long)]
    pub partition: Option<String>,

    #[arg(long)]
    pub account: Option<String>,

    /// Wall-clock limit.
    #[arg(long, default_value = "01:00:00")]
    pub time: String,

    #[arg(long, default_value = "4G")]
    pub mem: String,

    #[arg(long, default_value_t = 1)]
    pub cpus_per_task: usize,

    /// Directory for scheduler log files.
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,

    /// Write the script here (stdout when absent).
    #[arg(long = "script", value_name = "PATH")]
    pub script: Option<PathBuf>,

    /// Program path used in the generated command line.
    #[arg(long, default_value = "yearfit")]
    pub program: String,
}

#[derive(Debug, Args)]
pub struct SlurmArrayArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub job: JobArgs,

    /// Shared results file each element appends to.
    #[arg(short, long, value_name = "PATH")]
    pub output: PathBuf,

    /// Index of the first unit.
    #[arg(long, default_value_t = 1)]
    pub index_base: i64,

    /// Maximum elements running at once.
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Only these array indices (e.g. from `yearfit collect`), as `1-3,7`.
    #[arg(long, value_name = "LIST", value_parser = parse_index_list)]
    pub indices: Option<IndexList>,
}

#[derive(Debug, Args)]
pub struct SlurmParallelArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub job: JobArgs,

    #[arg(long, default_value_t = 1)]
    pub nodes: usize,

    #[arg(long, default_value_t = 1)]
    pub ntasks: usize,

    /// Results CSV written by the run.
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct UnitsArgs {
    #[arg(short, long, value_name = "PATH")]
    pub data: PathBuf,

    #[arg(long, default_value = "year")]
    pub unit_col: String,

    #[arg(long, default_value = ",", value_parser = parse_delimiter)]
    pub delimiter: u8,

    #[arg(long, default_value_t = 1)]
    pub index_base: i64,

    /// Print only the number of units (for `--array=1-N`).
    #[arg(long)]
    pub count: bool,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Output path.
    #[arg(short, long, value_name = "PATH")]
    pub output: PathBuf,

    #[arg(long, default_value_t = 1987)]
    pub first_year: UnitId,

    #[arg(long, default_value_t = 2008)]
    pub last_year: UnitId,

    #[arg(long, default_value_t = 1000)]
    pub rows_per_year: usize,

    /// Slope of `x` in the first year.
    #[arg(long, default_value_t = 0.8, allow_negative_numbers = true)]
    pub slope: f64,

    /// Change of the slope per year.
    #[arg(long, default_value_t = 0.01, allow_negative_numbers = true)]
    pub drift: f64,

    #[arg(long, default_value_t = 1.0)]
    pub noise_sd: f64,

    #[arg(long, default_value_t = 4)]
    pub groups: usize,

    /// Share of rows whose response is written as `NA`.
    #[arg(long, default_value_t = 0.0)]
    pub missing_rate: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, default_value = ",", value_parser = parse_delimiter)]
    pub delimiter: u8,
}

/// Parse a single-byte delimiter; `\t` and `tab` mean a tab.
pub fn parse_delimiter(s: &str) -> Result<u8, AppError> {
    match s {
        "\\t" | "tab" | "\t" => Ok(b'\t'),
        _ if s.len() == 1 && s.is_ascii() => Ok(s.as_bytes()[0]),
        _ => Err(AppError::usage(format!("Delimiter must be a single ASCII character, got '{s}'."))),
    }
}

/// Largest number of units or indices a range may expand to.
///
/// Generous against SLURM's `MaxArraySize` ceiling.
pub const MAX_RANGE_LEN: i64 = 1_000_000;

/// Parse `FIRST-LAST` (or a single unit).
pub fn parse_unit_range(s: &str) -> Result<(UnitId, UnitId), AppError> {
    let s = s.trim();
    let parse = |v: &str| {
        v.trim()
            .parse::<UnitId>()
            .map_err(|_| AppError::usage(format!("Invalid unit range '{s}'.")))
    };
    // Skip a leading sign so negative starts are not split.
    let (first, last) = match s.get(1..).and_then(|rest| rest.find('-')) {
        Some(pos) => (parse(&s[..=pos])?, parse(&s[pos + 2..])?),
        None => {
            let v = parse(s)?;
            (v, v)
        }
    };
    if first > last {
        return Err(AppError::usage(format!("Unit range '{s}' is empty.")));
    }
    if last.checked_sub(first).is_none_or(|span| span >= MAX_RANGE_LEN) {
        return Err(AppError::usage(format!(
            "Range '{s}' spans more than {MAX_RANGE_LEN} values."
        )));
    }
    Ok((first, last))
}

/// Sorted, de-duplicated array indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexList(pub Vec<i64>);

/// Parse a SLURM-style index list such as `1-3,7,9-10`.
pub fn parse_index_list(s: &str) -> Result<IndexList, AppError> {
    let mut out = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (first, last) = parse_unit_range(part)?;
        out.extend(first..=last);
        if out.len() as i64 > MAX_RANGE_LEN {
            return Err(AppError::usage(format!("Index list expands to more than {MAX_RANGE_LEN} entries.")));
        }
    }
    if out.is_empty() {
        return Err(AppError::usage("Index list is empty."));
    }
    out.sort_unstable();
    out.dedup();
    Ok(IndexList(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_args_parse() {
        let cli = Cli::try_parse_from([
            "yearfit", "run", "-d", "flights.csv", "-y", "arrdelay", "-x", "depdelay", "--control", "distance",
            "--factor", "carrier", "--mode", "parallel", "-j", "4", "--only", "1990,1991",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.mode, ExecMode::Parallel);
        assert_eq!(args.threads, 4);
        assert_eq!(args.only, vec![1990, 1991]);

        let spec = args.model.regression_spec();
        assert_eq!(spec.columns.unit, "year");
        assert_eq!(spec.columns.controls, vec!["distance"]);
        assert_eq!(spec.level, 0.95);
    }

    #[test]
    fn unit_needs_an_index_or_a_year() {
        let base = ["yearfit", "unit", "-d", "a.csv", "-y", "y", "-x", "x"];
        // Only valid when the scheduler variable is absent from the test environment.
        if std::env::var_os("SLURM_ARRAY_TASK_ID").is_none() {
            assert!(Cli::try_parse_from(base).is_err());
        }

        let cli = Cli::try_parse_from(base.iter().copied().chain(["--year", "1999"])).unwrap();
        let Command::Unit(args) = cli.command else {
            panic!("expected unit");
        };
        assert_eq!(args.year, Some(1999));
        assert_eq!(args.index_base, 1);
    }

    #[test]
    fn model_args_round_trip_through_argv() {
        let mut argv = vec!["yearfit".to_string(), "run".to_string()];
        let cli = Cli::try_parse_from([
            "yearfit", "run", "-d", "in.tsv", "--delimiter", "\\t", "-y", "y", "-x", "x", "--factor", "g", "--level",
            "0.9",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        argv.extend(args.model.to_args());

        let again = Cli::try_parse_from(argv).unwrap();
        let Command::Run(again) = again.command else {
            panic!("expected run");
        };
        assert_eq!(again.model.regression_spec(), args.model.regression_spec());
        assert_eq!(again.model.delimiter, b'\t');
    }

    #[test]
    fn ranges_and_lists() {
        assert_eq!(parse_unit_range("1987-2008").unwrap(), (1987, 2008));
        assert_eq!(parse_unit_range("2000").unwrap(), (2000, 2000));
        assert_eq!(parse_unit_range("-3-2").unwrap(), (-3, 2));
        assert!(parse_unit_range("2008-1987").is_err());
        assert_eq!(parse_index_list("1-3,7,2").unwrap().0, vec![1, 2, 3, 7]);
        assert!(parse_index_list(",").is_err());
        assert_eq!(parse_unit_range("1-1000000").unwrap(), (1, 1_000_000));
        assert!(parse_unit_range("1-9999999999").is_err());
        assert!(parse_unit_range("-9223372036854775807-9223372036854775807").is_err());
        assert!(parse_index_list("1-9999999999").is_err());
        assert!(parse_index_list("1-600000,700001-1300000").is_err());
        assert_eq!(parse_delimiter("tab").unwrap(), b'\t');
        assert!(parse_delimiter(";;").is_err());
    }
}
