//! SLURM submission descriptors.
//!
//! `yearfit` never submits anything itself. These renderers produce `sbatch`
//! scripts for the two cluster patterns:
//!
//! - a job array where element `i` runs `yearfit unit --index i` and appends
//!   one row to a shared file
//! - a single allocation whose cores run `yearfit run --mode parallel`
//!
//! The workload manager interprets the `#SBATCH` directives; `yearfit` only
//! writes them.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::Local;

use crate::error::AppError;

/// Directives shared by both script kinds.
#[derive(Debug, Clone)]
pub struct JobResources {
    pub job_name: String,
    pub partition: Option<String>,
    pub account: Option<String>,
    /// Wall-clock limit in any format `sbatch --time` accepts.
    pub time: String,
    pub mem: String,
    pub cpus_per_task: usize,
    /// Directory for scheduler stdout/stderr files.
    pub log_dir: PathBuf,
}

/// One element per unit, indices `first..=last`.
#[derive(Debug, Clone)]
pub struct ArrayJob {
    pub resources: JobResources,
    pub first: i64,
    pub last: i64,
    /// Maximum number of elements running at once (`%N` suffix).
    pub max_concurrent: Option<usize>,
    /// Explicit index list overriding `first..=last` (re-submission of failed elements).
    pub only_indices: Option<Vec<i64>>,
    /// `yearfit unit ...` argv, without the index argument.
    pub command: Vec<String>,
}

/// A single allocation running the in-process parallel loop.
#[derive(Debug, Clone)]
pub struct ParallelJob {
    pub resources: JobResources,
    pub nodes: usize,
    pub ntasks: usize,
    /// `yearfit run ...` argv, without the thread argument.
    pub command: Vec<String>,
}

pub fn render_array_script(job: &ArrayJob) -> Result<String, AppError> {
    validate_resources(&job.resources)?;
    let range = match &job.only_indices {
        Some(indices) if indices.is_empty() => {
            return Err(AppError::usage("Array index list is empty."));
        }
        Some(indices) => format_array_ranges(indices),
        None => {
            if job.first > job.last {
                return Err(AppError::usage(format!(
                    "Array range {}-{} is empty.",
                    job.first, job.last
                )));
            }
            format!("{}-{}", job.first, job.last)
        }
    };
    let throttle = job.max_concurrent.map(|n| format!("%{n}")).unwrap_or_default();

    let mut out = header(&job.resources);
    let _ = writeln!(out, "#SBATCH --array={range}{throttle}");
    let _ = writeln!(
        out,
        "#SBATCH --output={}",
        job.resources.log_dir.join(format!("{}_%A_%a.out", job.resources.job_name)).display()
    );
    out.push('\n');
    out.push_str(&preamble(&job.resources));

    let mut argv = job.command.clone();
    argv.push("--index".to_string());
    let _ = writeln!(out, "{} \"$SLURM_ARRAY_TASK_ID\"", shell_join(&argv));
    Ok(out)
}

pub fn render_parallel_script(job: &ParallelJob) -> Result<String, AppError> {
    validate_resources(&job.resources)?;
    if job.nodes == 0 || job.ntasks == 0 {
        return Err(AppError::usage("Nodes and tasks must be at least 1."));
    }

    let mut out = header(&job.resources);
    let _ = writeln!(out, "#SBATCH --nodes={}", job.nodes);
    let _ = writeln!(out, "#SBATCH --ntasks={}", job.ntasks);
    let _ = writeln!(
        out,
        "#SBATCH --output={}",
        job.resources.log_dir.join(format!("{}_%j.out", job.resources.job_name)).display()
    );
    out.push('\n');
    out.push_str(&preamble(&job.resources));

    let mut argv = job.command.clone();
    argv.push("--threads".to_string());
    let _ = writeln!(out, "{} \"$SLURM_CPUS_PER_TASK\"", shell_join(&argv));
    Ok(out)
}

fn validate_resources(res: &JobResources) -> Result<(), AppError> {
    if res.cpus_per_task == 0 {
        return Err(AppError::usage("cpus-per-task must be at least 1."));
    }
    if res.job_name.trim().is_empty() || res.job_name.contains(char::is_whitespace) {
        return Err(AppError::usage("Job name must be non-empty and contain no whitespace."));
    }
    Ok(())
}

fn header(res: &JobResources) -> String {
    let mut out = String::from("#!/bin/bash\n");
    let _ = writeln!(out, "#SBATCH --job-name={}", res.job_name);
    if let Some(p) = &res.partition {
        let _ = writeln!(out, "#SBATCH --partition={p}");
    }
    if let Some(a) = &res.account {
        let _ = writeln!(out, "#SBATCH --account={a}");
    }
    let _ = writeln!(out, "#SBATCH --time={}", res.time);
    let _ = writeln!(out, "#SBATCH --mem={}", res.mem);
    let _ = writeln!(out, "#SBATCH --cpus-per-task={}", res.cpus_per_task);
    out
}

fn preamble(res: &JobResources) -> String {
    format!(
        "# generated by yearfit {} on {}\nset -euo pipefail\nmkdir -p {}\n\n",
        env!("CARGO_PKG_VERSION"),
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        shell_quote(&res.log_dir.display().to_string()),
    )
}

/// Compress indices into SLURM's `--array` list syntax, e.g. `1-3,7,9-10`.
pub fn format_array_ranges(indices: &[i64]) -> String {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(mut start) = iter.next() else {
        return String::new();
    };
    let mut end = start;
    for i in iter {
        if i == end + 1 {
            end = i;
            continue;
        }
        parts.push(range_part(start, end));
        start = i;
        end = i;
    }
    parts.push(range_part(start, end));
    parts.join(",")
}

fn range_part(start: i64, end: i64) -> String {
    if start == end { start.to_string() } else { format!("{start}-{end}") }
}

/// Quote one word for POSIX `sh`.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_./:=,@%+-".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn shell_join(argv: &[String]) -> String {
    argv.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources() -> JobResources {
        JobResources {
            job_name: "yearfit".to_string(),
            partition: Some("short".to_string()),
            account: None,
            time: "00:30:00".to_string(),
            mem: "2G".to_string(),
            cpus_per_task: 1,
            log_dir: PathBuf::from("logs"),
        }
    }

    #[test]
    fn array_script_has_range_and_unit_command() {
        let job = ArrayJob {
            resources: resources(),
            first: 1,
            last: 22,
            max_concurrent: Some(5),
            only_indices: None,
            command: vec!["yearfit".into(), "unit".into(), "--data".into(), "my data.csv".into()],
        };
        let script = render_array_script(&job).unwrap();

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --array=1-22%5\n"));
        assert!(script.contains("#SBATCH --partition=short\n"));
        assert!(!script.contains("--account"));
        assert!(script.contains("#SBATCH --output=logs/yearfit_%A_%a.out\n"));
        assert!(script.contains("yearfit unit --data 'my data.csv' --index \"$SLURM_ARRAY_TASK_ID\"\n"));
    }

    #[test]
    fn array_script_can_resubmit_selected_indices() {
        let job = ArrayJob {
            resources: resources(),
            first: 1,
            last: 22,
            max_concurrent: None,
            only_indices: Some(vec![9, 3, 4, 5, 12]),
            command: vec!["yearfit".into(), "unit".into()],
        };
        let script = render_array_script(&job).unwrap();
        assert!(script.contains("#SBATCH --array=3-5,9,12\n"));
    }

    #[test]
    fn parallel_script_uses_allocated_cpus() {
        let mut res = resources();
        res.cpus_per_task = 16;
        let job = ParallelJob {
            resources: res,
            nodes: 1,
            ntasks: 1,
            command: vec!["yearfit".into(), "run".into(), "--mode".into(), "parallel".into()],
        };
        let script = render_parallel_script(&job).unwrap();
        assert!(script.contains("#SBATCH --cpus-per-task=16\n"));
        assert!(script.contains("#SBATCH --nodes=1\n"));
        assert!(script.contains("yearfit run --mode parallel --threads \"$SLURM_CPUS_PER_TASK\"\n"));
    }

    #[test]
    fn invalid_jobs_are_rejected() {
        let mut res = resources();
        res.cpus_per_task = 0;
        let job = ParallelJob {
            resources: res,
            nodes: 1,
            ntasks: 1,
            command: vec![],
        };
        assert_eq!(render_parallel_script(&job).unwrap_err().exit_code(), 2);

        let job = ArrayJob {
            resources: resources(),
            first: 5,
            last: 4,
            max_concurrent: None,
            only_indices: None,
            command: vec![],
        };
        assert!(render_array_script(&job).is_err());
    }

    #[test]
    fn ranges_compress_runs() {
        assert_eq!(format_array_ranges(&[1, 2, 3, 7, 9, 10]), "1-3,7,9-10");
        assert_eq!(format_array_ranges(&[4]), "4");
        assert_eq!(format_array_ranges(&[]), "");
    }

    #[test]
    fn quoting() {
        assert_eq!(shell_quote("plain-word_1.csv"), "plain-word_1.csv");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
