//! Run experiments through the external simulator.
//!
//! The simulator is a compiled distribution under `OpenDCExperimentRunner/`. On unix-likes it is
//! started through its launcher script; on Windows we build the classpath ourselves and start the
//! JVM directly. Either way it gets the absolute path of one experiment file, and its output is
//! not interpreted beyond the exit code.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use clap::clap_app;

use failure::ResultExt;

use log::{debug, error, info, warn};

use serde::{Deserialize, Serialize};

use crate::{
    cli,
    error::CapsuleError,
    paths::*,
    store::{load_json, save_json},
    validate::list_experiments,
    Workspace,
};

/// The entry point of the simulator when started without the launcher script.
pub const MAIN_CLASS: &str = "org.opendc.experiments.base.runner.ExperimentCli";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }

    fn classpath_separator(self) -> &'static str {
        match self {
            Platform::Unix => ":",
            Platform::Windows => ";",
        }
    }
}

/// A fully resolved simulator invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct Launch {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Launch {
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// Build the invocation that runs the experiment at `experiment` (an absolute path).
pub fn launch(
    workspace: &Workspace,
    experiment: &Path,
    platform: Platform,
) -> Result<Launch, failure::Error> {
    let runner = workspace.runner();

    match platform {
        Platform::Unix => {
            let program = runner.join(RUNNER_BIN);
            if !program.exists() {
                return Err(CapsuleError::MissingRunner {
                    path: program.display().to_string(),
                }
                .into());
            }

            Ok(Launch {
                program,
                args: vec!["--experiment-path".into(), experiment.into()],
            })
        }

        Platform::Windows => {
            let lib = runner.join(RUNNER_LIB);
            if !lib.is_dir() {
                return Err(CapsuleError::MissingRunner {
                    path: lib.display().to_string(),
                }
                .into());
            }

            let mut jars = vec![];
            for entry in fs::read_dir(&lib).with_context(|_| format!("listing {}", lib.display()))? {
                let path = entry?.path();
                if path.extension().map_or(false, |ext| ext == "jar") {
                    jars.push(path);
                }
            }
            jars.sort();

            let classpath = jars
                .iter()
                .map(|jar| jar.display().to_string())
                .collect::<Vec<_>>()
                .join(platform.classpath_separator());

            Ok(Launch {
                program: "java".into(),
                args: vec![
                    "-classpath".into(),
                    classpath.into(),
                    MAIN_CLASS.into(),
                    "--experiment-path".into(),
                    experiment.into(),
                ],
            })
        }
    }
}

/// How long one experiment took.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunStat {
    pub name: String,
    pub duration_sec: f64,
}

/// The machine the experiments ran on. Anything that cannot be determined is left out.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub machine: String,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_gb: Option<f64>,
}

impl SystemInfo {
    pub fn collect() -> Self {
        SystemInfo {
            machine: std::env::consts::ARCH.into(),
            platform: std::env::consts::OS.into(),
            processor: fs::read_to_string("/proc/cpuinfo")
                .ok()
                .and_then(|info| cpu_model_name(&info)),
            cores: Some(num_cpus::get()),
            memory_gb: fs::read_to_string("/proc/meminfo")
                .ok()
                .and_then(|info| mem_total_gb(&info)),
        }
    }
}

fn cpu_model_name(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .find(|line| line.starts_with("model name"))
        .and_then(|line| line.splitn(2, ':').nth(1))
        .map(|name| name.trim().to_owned())
}

fn mem_total_gb(meminfo: &str) -> Option<f64> {
    let kb = meminfo
        .lines()
        .find(|line| line.starts_with("MemTotal:"))?
        .split_whitespace()
        .nth(1)?
        .parse::<f64>()
        .ok()?;
    Some((kb / (1024.0 * 1024.0) * 100.0).round() / 100.0)
}

/// Everything `run` has measured in this workspace, kept in `output/run-stats.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    #[serde(default)]
    pub experiments: Vec<RunStat>,
    #[serde(default)]
    pub system_info: Option<SystemInfo>,
}

impl RunStats {
    /// Record a run, replacing any earlier run of the same experiment.
    pub fn record(&mut self, stat: RunStat) {
        match self.experiments.iter_mut().find(|s| s.name == stat.name) {
            Some(existing) => *existing = stat,
            None => self.experiments.push(stat),
        }
    }
}

/// Read the run statistics of the workspace. Missing statistics are empty.
pub fn read_stats(workspace: &Workspace) -> Result<RunStats, failure::Error> {
    let path = workspace.output().join(RUN_STATS_FILE);
    if path.exists() {
        load_json(&path)
    } else {
        Ok(RunStats::default())
    }
}

/// Add `stats` to the statistics of the workspace.
pub fn append_stats(workspace: &Workspace, stats: &[RunStat]) -> Result<PathBuf, failure::Error> {
    let mut all = read_stats(workspace)?;
    for stat in stats.iter() {
        all.record(stat.clone());
    }
    all.system_info = Some(SystemInfo::collect());

    Ok(save_json(&workspace.output(), Path::new(RUN_STATS_FILE), &all)?)
}

/// Run the experiment `name` (a file under `experiments/`) to completion.
pub fn run_experiment(
    workspace: &Workspace,
    name: &str,
    platform: Platform,
) -> Result<RunStat, failure::Error> {
    let path = workspace.experiments().join(name);
    if !path.is_file() {
        return Err(CapsuleError::MissingExperiment {
            path: path.display().to_string(),
        }
        .into());
    }
    let path = path
        .canonicalize()
        .with_context(|_| format!("resolving {}", path.display()))?;

    let launch = launch(workspace, &path, platform)?;
    let mut cmd = launch.command();
    cmd.current_dir(workspace.root());

    debug!("{:?}", cmd);

    let start = Instant::now();
    let output = cmd
        .output()
        .with_context(|_| format!("starting {}", launch.program.display()))?;
    let duration = start.elapsed();

    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
        warn!("[{}] {}", name, line);
    }

    if !output.status.success() {
        failure::bail!(
            "Simulator failed on {}. Exit code: {:?}",
            name,
            output.status.code()
        );
    }

    Ok(RunStat {
        name: name.to_owned(),
        duration_sec: round2(duration),
    })
}

fn round2(d: Duration) -> f64 {
    (d.as_secs_f64() * 100.0).round() / 100.0
}

/// Run the experiments one after the other. An experiment that fails is logged and does not stop
/// the others. Returns the statistics of those that succeeded.
pub fn run_all(workspace: &Workspace, names: &[String], platform: Platform) -> Vec<RunStat> {
    let mut stats = vec![];

    for name in names.iter() {
        info!("Running {}", name);
        match run_experiment(workspace, name, platform) {
            Ok(stat) => {
                info!("Finished {} in {}s", name, stat.duration_sec);
                stats.push(stat);
            }
            Err(err) => error!("{}", err),
        }
    }

    stats
}

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { run =>
        (about: "Run experiments through the simulator, one after the other, and record how long \
                 each took in output/run-stats.json.")
        (@setting DisableVersion)
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
        warn!("No experiments to run");
        return Ok(());
    }

    let stats = run_all(&workspace, &names, Platform::current());

    let timers: Vec<(&str, Duration)> = stats
        .iter()
        .map(|s| (s.name.as_str(), Duration::from_secs_f64(s.duration_sec)))
        .collect();
    debug!("Timings:\n{}", crate::timings_str(timers.as_slice()));

    if !stats.is_empty() {
        let path = append_stats(&workspace, &stats)?;
        info!("Run statistics written to {}", path.display());
    }

    if stats.len() < names.len() {
        failure::bail!(
            "{} of {} experiment(s) failed",
            names.len() - stats.len(),
            names.len()
        );
    }

    info!("All experiments completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempdir::TempDir;

    #[test]
    fn unix_launch_uses_the_launcher_script() {
        let dir = TempDir::new("simulator").unwrap();
        let ws = Workspace::new(dir.path());

        let exp = Path::new("/abs/experiments/e.json");
        assert!(launch(&ws, exp, Platform::Unix).is_err());

        let bin = ws.runner().join(RUNNER_BIN);
        fs::create_dir_all(bin.parent().unwrap()).unwrap();
        fs::write(&bin, "").unwrap();

        let l = launch(&ws, exp, Platform::Unix).unwrap();
        assert_eq!(l.program, bin);
        assert_eq!(
            l.args,
            vec![OsString::from("--experiment-path"), OsString::from("/abs/experiments/e.json")]
        );
    }

    #[test]
    fn windows_launch_builds_a_classpath() {
        let dir = TempDir::new("simulator").unwrap();
        let ws = Workspace::new(dir.path());

        let lib = ws.runner().join(RUNNER_LIB);
        fs::create_dir_all(&lib).unwrap();
        for file in &["b.jar", "a.jar", "README"] {
            fs::write(lib.join(file), "").unwrap();
        }

        let l = launch(&ws, Path::new("e.json"), Platform::Windows).unwrap();
        assert_eq!(l.program, PathBuf::from("java"));

        let classpath = format!("{};{}", lib.join("a.jar").display(), lib.join("b.jar").display());
        assert_eq!(l.args[1], OsString::from(classpath));
        assert_eq!(l.args[2], OsString::from(MAIN_CLASS));
        assert_eq!(l.args[4], OsString::from("e.json"));
    }

    #[test]
    fn missing_experiment_is_reported() {
        let dir = TempDir::new("simulator").unwrap();
        let ws = Workspace::new(dir.path());

        let err = run_experiment(&ws, "nope.json", Platform::Unix).unwrap_err();
        assert!(err.to_string().contains("nope.json"));
        assert!(run_all(&ws, &["nope.json".to_owned()], Platform::Unix).is_empty());
    }

    #[test]
    fn stats_are_merged_by_name() {
        let dir = TempDir::new("simulator").unwrap();
        let ws = Workspace::new(dir.path());

        let stat = |name: &str, d: f64| RunStat {
            name: name.into(),
            duration_sec: d,
        };

        append_stats(&ws, &[stat("a", 1.0), stat("b", 2.0)]).unwrap();
        append_stats(&ws, &[stat("a", 3.0)]).unwrap();

        let stats = read_stats(&ws).unwrap();
        assert_eq!(stats.experiments, vec![stat("a", 3.0), stat("b", 2.0)]);
        assert!(stats.system_info.is_some());
    }

    #[test]
    fn proc_parsing() {
        let cpuinfo = "processor\t: 0\nvendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Xeon(R) CPU\n";
        assert_eq!(cpu_model_name(cpuinfo).as_deref(), Some("Intel(R) Xeon(R) CPU"));

        let meminfo = "MemTotal:       16777216 kB\nMemFree:         1000 kB\n";
        assert_eq!(mem_total_gb(meminfo), Some(16.0));
        assert_eq!(mem_total_gb(""), None);
    }

    #[test]
    fn system_info_counts_cores() {
        let info = SystemInfo::collect();
        assert!(info.cores.unwrap_or(0) >= 1);
        assert_eq!(info.platform, std::env::consts::OS);
    }
}
