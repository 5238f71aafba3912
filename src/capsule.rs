//! Pack experiments and everything they need into a single archive.
//!
//! A capsule holds the experiment files, the topologies, workloads and failure traces they
//! reference, the carbon traces those topologies reference, the simulator distribution, and a
//! generated README that explains what is inside and how long each experiment took to run.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use clap::clap_app;

use failure::ResultExt;

use log::{debug, info, warn};

use crate::{
    cli,
    experiment::Experiment,
    paths::*,
    settings::{self, SIMULATOR_VERSION},
    simulator::{read_stats, RunStats},
    store::load_json,
    topology::Topology,
    validate::list_experiments,
    Workspace,
};

/// The simulator version recorded when the workspace settings do not name one.
pub const DEFAULT_SIMULATOR_VERSION: &str = "2.4e";

/// The default name of the archive.
pub const DEFAULT_ARCHIVE: &str = "reproducibility_capsule.tar.gz";

/// Every file (relative to the workspace root) needed to rerun the experiments `names`.
/// Experiments that cannot be read are logged and contribute only their own path.
pub fn required_files(workspace: &Workspace, names: &[String]) -> BTreeSet<PathBuf> {
    let mut files = BTreeSet::new();

    for name in names.iter() {
        let rel = Path::new(EXPERIMENTS_DIR).join(name);
        files.insert(rel.clone());

        let experiment: Experiment = match load_json(&workspace.resolve(&rel)) {
            Ok(experiment) => experiment,
            Err(err) => {
                warn!("{}", err);
                continue;
            }
        };

        for file in experiment.referenced_files() {
            files.insert(PathBuf::from(file));
        }

        for topology in experiment
            .topologies
            .iter()
            .flatten()
            .filter_map(|entry| entry.path_to_file.as_deref())
        {
            if let Ok(topology) = load_json::<Topology>(&workspace.resolve(topology)) {
                files.extend(topology.carbon_traces().into_iter().map(PathBuf::from));
            }
        }
    }

    files
}

/// The README of a capsule.
pub fn render_readme(
    workspace: &Workspace,
    names: &[String],
    stats: &RunStats,
    simulator_version: &str,
    created: &str,
) -> String {
    let mut lines: Vec<String> = vec![
        "# Reproducibility Capsule".into(),
        "".into(),
        "This capsule contains all artifacts needed to reproduce the experiments listed below \
         using OpenDC."
            .into(),
        "".into(),
        "## Capsule Metadata".into(),
        format!("- **Created on**: {}", created),
        format!("- **OpenDC Version**: {}", simulator_version),
        format!("- **Capsule Tool Version**: {}", env!("CARGO_PKG_VERSION")),
        "".into(),
        "## Experiments Overview".into(),
        "".into(),
    ];

    for (i, name) in names.iter().enumerate() {
        lines.push(format!("### Experiment {}: `{}`", i + 1, name));

        let path = workspace.experiments().join(name);
        if let Ok(experiment) = load_json::<Experiment>(&path) {
            let sections = [
                ("Topologies", &experiment.topologies),
                ("Workloads", &experiment.workloads),
                ("Failures", &experiment.failure_models),
            ];
            for (label, entries) in sections.iter() {
                let files: Vec<&str> = entries
                    .iter()
                    .flatten()
                    .filter_map(|e| e.path_to_file.as_deref())
                    .collect();
                if !files.is_empty() {
                    lines.push(format!("- **{}**: {}", label, files.join(", ")));
                }
            }
        }
        lines.push("".into());
    }

    lines.push("## Execution Time per Experiment".into());
    lines.push("".into());
    if stats.experiments.is_empty() {
        lines.push("The experiments have not been run yet.".into());
    } else {
        lines.push("| Experiment | Duration (seconds) |".into());
        lines.push("|------------|--------------------|".into());
        for stat in stats.experiments.iter() {
            lines.push(format!("| {} | {} |", stat.name, stat.duration_sec));
        }
    }
    lines.push("".into());

    if let Some(info) = &stats.system_info {
        let na = || "N/A".to_owned();
        lines.extend(vec![
            "## System Information".into(),
            "".into(),
            "The experiments were executed on the following system. We recommend at least \
             these specifications when rerunning them."
                .into(),
            "".into(),
            format!("- **Machine**: {}", info.machine),
            format!("- **Processor**: {}", info.processor.clone().unwrap_or_else(na)),
            format!(
                "- **Cores**: {}",
                info.cores.map(|c| c.to_string()).unwrap_or_else(na)
            ),
            format!(
                "- **Memory**: {} GB",
                info.memory_gb.map(|m| m.to_string()).unwrap_or_else(na)
            ),
            format!("- **Platform**: {}", info.platform),
            "".into(),
        ]);
    }

    lines.extend(
        vec![
            "## How to Run",
            "",
            "1. Install Java 21.",
            "2. Run `capsule run` from the root of the capsule to execute every experiment.",
            "3. Outputs will appear in the `output/` directory.",
            "",
            "## Folder Structure",
            "",
            "- `experiments/`: the experiment descriptors.",
            "- `topologies/`: topology descriptors.",
            "- `workload_traces/`: workload traces.",
            "- `failure_traces/`: failure traces.",
            "- `carbon_traces/`: carbon-intensity traces.",
            "- `output/`: simulation outputs (created when running).",
            "- `OpenDCExperimentRunner/`: the compiled simulator.",
            "",
        ]
        .into_iter()
        .map(str::to_owned),
    );

    lines.join("\n")
}

/// Write the README of a capsule for `names` to the workspace root.
pub fn write_readme(workspace: &Workspace, names: &[String]) -> Result<PathBuf, failure::Error> {
    let settings = settings::get_settings(workspace)?;
    let version = settings::get_setting::<String>(&settings, SIMULATOR_VERSION)?
        .unwrap_or_else(|| DEFAULT_SIMULATOR_VERSION.to_owned());
    let stats = read_stats(workspace)?;
    let created = chrono::Local::now().format("%Y-%m-%d").to_string();

    let readme = render_readme(workspace, names, &stats, &version, &created);
    let path = workspace.resolve(README_FILE);
    fs::write(&path, readme).with_context(|_| format!("writing {}", path.display()))?;

    info!("README generated at {}", path.display());
    Ok(path)
}

/// Pack the experiments `names` into `archive` (relative to the workspace root, unless
/// absolute). Referenced files that do not exist are left out with a warning.
pub fn bundle(
    workspace: &Workspace,
    names: &[String],
    archive: &Path,
) -> Result<PathBuf, failure::Error> {
    write_readme(workspace, names)?;

    let mut members: Vec<PathBuf> = vec![];
    for file in required_files(workspace, names) {
        if workspace.resolve(&file).exists() {
            members.push(file);
        } else {
            warn!("Leaving out {}: not found", file.display());
        }
    }

    for extra in [README_FILE, RUNNER_DIR].iter().copied() {
        if workspace.resolve(extra).exists() {
            members.push(PathBuf::from(extra));
        }
    }
    if !workspace.runner().exists() {
        warn!("{} not found; the capsule will not contain the simulator", RUNNER_DIR);
    }

    let archive = workspace.resolve(archive);

    let mut cmd = Command::new("tar");
    cmd.arg("-czf")
        .arg(archive.as_os_str())
        .arg("-C")
        .arg(workspace.root().as_os_str())
        .args(members.iter().map(|m| m.as_os_str()));

    debug!("{:?}", cmd);

    let status = cmd.status().context("starting tar")?;

    // If failure, exit with an Err(..).
    if !status.success() {
        failure::bail!("tar failed. Exit code: {:?}", status.code());
    }

    info!("Capsule written to {}", archive.display());
    Ok(archive)
}

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { bundle =>
        (about: "Pack experiments, everything they reference, the simulator and a README into a \
                 single gzipped tarball.")
        (@setting DisableVersion)
        (@arg OUTPUT: -o --output +takes_value
         "The archive to write (default: reproducibility_capsule.tar.gz).")
        (@arg README_ONLY: --("readme-only") "Only (re)generate README.md.")
        (@arg EXPERIMENTS: +takes_value +multiple
         "Experiment files under experiments/ (default: all of them).")
    };

    cli::workspace::add_cli_options(app)
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let workspace = cli::workspace::parse_cli_options(sub_m);

    let names: Vec<String> = match sub_m.values_of("EXPERIMENTS") {
        Some(values) => values.map(str::to_owned).collect(),
        None => list_experiments(&workspace)?,
    };
    if names.is_empty() {
        failure::bail!("No experiments to bundle");
    }

    if sub_m.is_present("README_ONLY") {
        write_readme(&workspace, &names)?;
    } else {
        let archive = sub_m.value_of("OUTPUT").unwrap_or(DEFAULT_ARCHIVE);
        bundle(&workspace, &names, Path::new(archive))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tempdir::TempDir;

    use crate::simulator::{RunStat, SystemInfo};

    fn write(ws: &Workspace, rel: &str, contents: &str) {
        let path = ws.resolve(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn workspace() -> (TempDir, Workspace) {
        let dir = TempDir::new("capsule").unwrap();
        let ws = Workspace::new(dir.path());

        write(
            &ws,
            "topologies/t.json",
            &json!({"clusters": [{"hosts": [], "powerSource": {"carbonTracePath": "carbon_traces/nl.parquet"}}]})
                .to_string(),
        );
        write(
            &ws,
            "experiments/e.json",
            &json!({
                "name": "e",
                "topologies": [{"pathToFile": "topologies/t.json"}],
                "workloads": [{"pathToFile": "workload_traces/w"}],
                "failureModels": [{"pathToFile": "failure_traces/f.parquet"}]
            })
            .to_string(),
        );

        (dir, ws)
    }

    #[test]
    fn required_files_follow_references() {
        let (_dir, ws) = workspace();
        let files = required_files(&ws, &["e.json".to_owned(), "missing.json".to_owned()]);

        let expected: BTreeSet<PathBuf> = vec![
            "carbon_traces/nl.parquet",
            "experiments/e.json",
            "experiments/missing.json",
            "failure_traces/f.parquet",
            "topologies/t.json",
            "workload_traces/w",
        ]
        .into_iter()
        .map(PathBuf::from)
        .collect();
        assert_eq!(files, expected);
    }

    #[test]
    fn readme_sections() {
        let (_dir, ws) = workspace();
        let stats = RunStats {
            experiments: vec![RunStat {
                name: "e.json".into(),
                duration_sec: 12.5,
            }],
            system_info: Some(SystemInfo {
                machine: "x86_64".into(),
                platform: "linux".into(),
                processor: None,
                cores: Some(8),
                memory_gb: None,
            }),
        };

        let readme = render_readme(&ws, &["e.json".to_owned()], &stats, "2.4e", "2024-01-31");

        assert!(readme.starts_with("# Reproducibility Capsule\n"));
        assert!(readme.contains("- **Created on**: 2024-01-31"));
        assert!(readme.contains("- **OpenDC Version**: 2.4e"));
        assert!(readme.contains("### Experiment 1: `e.json`"));
        assert!(readme.contains("- **Topologies**: topologies/t.json"));
        assert!(readme.contains("- **Failures**: failure_traces/f.parquet"));
        assert!(readme.contains("| e.json | 12.5 |"));
        assert!(readme.contains("- **Cores**: 8"));
        assert!(readme.contains("- **Processor**: N/A"));
    }

    #[test]
    fn readme_without_stats() {
        let (_dir, ws) = workspace();
        let readme = render_readme(&ws, &[], &RunStats::default(), "2.4e", "2024-01-31");

        assert!(readme.contains("The experiments have not been run yet."));
        assert!(!readme.contains("## System Information"));
    }
}
