//! A library of routines for building reproducibility capsules around an external datacenter
//! simulator.
//!
//! The simulator does all of the actual work. This crate generates the topology and experiment
//! descriptors it consumes (usually as parameter sweeps), runs it, checks that everything a
//! descriptor references exists, and packs the lot into a single archive that someone else can
//! rerun.

pub mod capsule;
pub mod cli;
pub mod error;
pub mod experiment;
pub mod gen_experiment;
pub mod gen_topology;
pub mod naming;
pub mod param;
pub mod parse;
pub mod settings;
pub mod simulator;
pub mod store;
pub mod sweep;
pub mod topology;
pub mod validate;

use std::path::{Path, PathBuf};

use paths::*;

/// Common paths, relative to the workspace root.
pub mod paths {
    /// Generated (and hand-written) topology descriptors.
    pub const TOPOLOGIES_DIR: &str = "topologies";

    /// Generated (and hand-written) experiment descriptors.
    pub const EXPERIMENTS_DIR: &str = "experiments";

    /// Templates that sweeps start from. Topology templates live in `templates/topologies`,
    /// experiment templates in `templates/experiments`.
    pub const TEMPLATES_DIR: &str = "templates";

    /// Carbon-intensity traces referenced by topologies.
    pub const CARBON_TRACES_DIR: &str = "carbon_traces";

    /// Workload traces referenced by experiments.
    pub const WORKLOAD_TRACES_DIR: &str = "workload_traces";

    /// Failure traces referenced by experiments.
    pub const FAILURE_TRACES_DIR: &str = "failure_traces";

    /// Where the simulator writes its results.
    pub const OUTPUT_DIR: &str = "output";

    /// The compiled simulator distribution.
    pub const RUNNER_DIR: &str = "OpenDCExperimentRunner";

    /// The launcher script of the simulator on unix-likes, relative to `RUNNER_DIR`.
    pub const RUNNER_BIN: &str = "bin/OpenDCExperimentRunner";

    /// The simulator jars, relative to `RUNNER_DIR`. Used to build a classpath on Windows.
    pub const RUNNER_LIB: &str = "lib";

    /// The per-workspace settings file.
    pub const SETTINGS_FILE: &str = "capsule-settings.json";

    /// Run statistics collected by `run`, relative to `OUTPUT_DIR`.
    pub const RUN_STATS_FILE: &str = "run-stats.json";

    /// The generated README of a capsule.
    pub const README_FILE: &str = "README.md";
}

/// The root directory all of the capsule's files live under.
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Workspace { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path relative to the workspace root.
    pub fn resolve<P: AsRef<Path>>(&self, rel: P) -> PathBuf {
        self.root.join(rel)
    }

    pub fn topologies(&self) -> PathBuf {
        self.resolve(TOPOLOGIES_DIR)
    }

    pub fn experiments(&self) -> PathBuf {
        self.resolve(EXPERIMENTS_DIR)
    }

    pub fn output(&self) -> PathBuf {
        self.resolve(OUTPUT_DIR)
    }

    pub fn runner(&self) -> PathBuf {
        self.resolve(RUNNER_DIR)
    }

    /// The template with the given file name, e.g. `template("topologies", "base.json")`.
    pub fn template(&self, kind: &str, name: &str) -> PathBuf {
        self.root.join(TEMPLATES_DIR).join(kind).join(name)
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Workspace::new(".")
    }
}

/// Given an array of timings, generate a human-readable string.
pub fn timings_str(timings: &[(&str, std::time::Duration)]) -> String {
    let mut s = String::new();
    for (label, d) in timings.iter() {
        s.push_str(&format!("{}: {:?}\n", label, d));
    }
    s
}
