//! Check that everything an experiment references exists before it is run or bundled.

use std::fmt;
use std::fs;

use clap::clap_app;

use failure::ResultExt;

use log::{info, warn};

use crate::{
    cli,
    experiment::{Experiment, FileEntry},
    store::load_json,
    topology::Topology,
    Workspace,
};

/// Something wrong with an experiment.
#[derive(Clone, Debug, PartialEq)]
pub enum Problem {
    /// The experiment file itself could not be read.
    Unreadable { reason: String },
    /// The `index`th entry of `key` has no `pathToFile`.
    MissingPath { key: &'static str, index: usize },
    /// A referenced file does not exist.
    MissingFile { key: &'static str, path: String },
    /// A carbon trace referenced by one of the experiment's topologies does not exist.
    MissingCarbonTrace { topology: String, path: String },
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::Unreadable { reason } => write!(f, "unreadable: {}", reason),
            Problem::MissingPath { key, index } => {
                write!(f, "missing 'pathToFile' in {} entry {}", key, index)
            }
            Problem::MissingFile { key, path } => {
                write!(f, "file not found for {}: {}", key, path)
            }
            Problem::MissingCarbonTrace { topology, path } => {
                write!(f, "carbon trace of {} not found: {}", topology, path)
            }
        }
    }
}

/// The result of validating one experiment.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationReport {
    /// The file name under `experiments/`.
    pub experiment: String,
    pub problems: Vec<Problem>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }
}

/// The `.json` files under `experiments/`, sorted by name.
pub fn list_experiments(workspace: &Workspace) -> Result<Vec<String>, failure::Error> {
    let dir = workspace.experiments();
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut names = vec![];
    for entry in fs::read_dir(&dir).with_context(|_| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "json") {
            if let Some(name) = path.file_name() {
                names.push(name.to_string_lossy().into_owned());
            }
        }
    }
    names.sort();

    Ok(names)
}

/// Validate a single experiment, given its file name under `experiments/`.
pub fn validate_experiment(workspace: &Workspace, name: &str) -> ValidationReport {
    let path = workspace.experiments().join(name);
    let mut problems = vec![];

    match load_json::<Experiment>(&path) {
        Ok(experiment) => {
            check_entries(workspace, "topologies", &experiment.topologies, &mut problems);
            check_entries(workspace, "workloads", &experiment.workloads, &mut problems);
            check_entries(workspace, "failureModels", &experiment.failure_models, &mut problems);
            check_carbon_traces(workspace, &experiment, &mut problems);
        }
        Err(err) => problems.push(Problem::Unreadable {
            reason: err.to_string(),
        }),
    }

    ValidationReport {
        experiment: name.to_owned(),
        problems,
    }
}

fn check_entries(
    workspace: &Workspace,
    key: &'static str,
    entries: &Option<Vec<FileEntry>>,
    problems: &mut Vec<Problem>,
) {
    for (index, entry) in entries.iter().flatten().enumerate() {
        match entry.path_to_file.as_deref().filter(|p| !p.is_empty()) {
            None => problems.push(Problem::MissingPath { key, index }),
            Some(path) if !workspace.resolve(path).exists() => problems.push(Problem::MissingFile {
                key,
                path: path.to_owned(),
            }),
            Some(_) => {}
        }
    }
}

fn check_carbon_traces(workspace: &Workspace, experiment: &Experiment, problems: &mut Vec<Problem>) {
    let topologies = experiment
        .topologies
        .iter()
        .flatten()
        .filter_map(|entry| entry.path_to_file.as_deref());

    for topology_path in topologies {
        let full = workspace.resolve(topology_path);
        if !full.is_file() {
            // Already reported as a missing file.
            continue;
        }

        let topology = match load_json::<Topology>(&full) {
            Ok(topology) => topology,
            Err(err) => {
                warn!("Cannot check the carbon traces of {}: {}", topology_path, err);
                continue;
            }
        };

        for trace in topology.carbon_traces() {
            if !workspace.resolve(trace).exists() {
                problems.push(Problem::MissingCarbonTrace {
                    topology: topology_path.to_owned(),
                    path: trace.to_owned(),
                });
            }
        }
    }
}

/// Validate each of `names`, or every experiment of the workspace if `names` is empty.
pub fn validate(workspace: &Workspace, names: &[String]) -> Result<Vec<ValidationReport>, failure::Error> {
    let names = if names.is_empty() {
        list_experiments(workspace)?
    } else {
        names.to_vec()
    };

    Ok(names
        .iter()
        .map(|name| validate_experiment(workspace, name))
        .collect())
}

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { validate =>
        (about: "Check that the files referenced by experiments exist.")
        (@setting DisableVersion)
        (@arg EXPERIMENTS: +takes_value +multiple
         "Experiment files under experiments/ (default: all of them).")
    };

    cli::workspace::add_cli_options(app)
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let workspace = cli::workspace::parse_cli_options(sub_m);
    let names: Vec<String> = sub_m
        .values_of("EXPERIMENTS")
        .map(|values| values.map(str::to_owned).collect())
        .unwrap_or_default();

    let reports = validate(&workspace, &names)?;
    if reports.is_empty() {
        warn!("No experiments to validate");
        return Ok(());
    }

    let mut failed = 0;
    for report in reports.iter() {
        if report.is_valid() {
            info!("{}: ok", report.experiment);
        } else {
            failed += 1;
            for problem in report.problems.iter() {
                warn!("{}: {}", report.experiment, problem);
            }
        }
    }

    if failed > 0 {
        failure::bail!("Validation failed for {} of {} experiment(s)", failed, reports.len());
    }

    info!("Validation passed");
    Ok(())
}
