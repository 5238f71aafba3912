//! Experiment descriptors and the (index-aligned) sweep over their values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::{
    error::CapsuleError,
    paths::*,
    parse::{cast_number, cast_scalar, json_number},
    sweep::{aligned, Assignment, ValueLists},
};

/// Name of an experiment without template or explicit name.
pub const DEFAULT_EXPERIMENT_NAME: &str = "custom_experiment";

/// Default `type` of workload entries.
pub const DEFAULT_WORKLOAD_TYPE: &str = "ComputeWorkload";

/// Default `type` of failure model entries.
pub const DEFAULT_FAILURE_TYPE: &str = "trace-based";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topologies: Option<Vec<FileEntry>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workloads: Option<Vec<FileEntry>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_models: Option<Vec<FileEntry>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_policies: Option<Vec<AllocationPolicy>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_models: Option<Vec<CheckpointModel>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_models: Option<Vec<ExportModel>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_seed: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_num_failures: Option<Vec<Number>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_folder: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A reference to a topology, workload or failure trace.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Relative to the workspace root. Entries without a path are invalid, but we still want to
    /// be able to read (and report) them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_to_file: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationPolicy {
    #[serde(rename = "type")]
    pub policy_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Map<String, Value>>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weighers: Option<Vec<Map<String, Value>>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_interval: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_duration: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_interval_scaling: Option<Number>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_interval: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print_frequency: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_to_export: Option<Vec<String>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Experiment {
    /// Every file the experiment references, in the order topologies, workloads, failure models.
    /// Entries without a path are skipped.
    pub fn referenced_files(&self) -> Vec<&str> {
        vec![&self.topologies, &self.workloads, &self.failure_models]
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|entry| entry.path_to_file.as_deref())
            .collect()
    }
}

/// The experiment values that are swept over, index-aligned.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExperimentParam {
    Seed,
    Runs,
    ExportInterval,
    PrintFrequency,
}

impl fmt::Display for ExperimentParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExperimentParam::Seed => "seed",
            ExperimentParam::Runs => "runs",
            ExperimentParam::ExportInterval => "export_interval",
            ExperimentParam::PrintFrequency => "print_frequency",
        })
    }
}

/// A filter or weigher of a prefab policy: a `type` plus numeric or string arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyComponent {
    pub component_type: String,
    pub args: Vec<(String, String)>,
}

impl PolicyComponent {
    fn to_json(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("type".into(), Value::from(self.component_type.as_str()));
        for (key, value) in self.args.iter() {
            map.insert(key.clone(), cast_scalar(value));
        }
        map
    }
}

impl FromStr for PolicyComponent {
    type Err = failure::Error;

    /// `Type` or `Type:key=value:key=value`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':').map(str::trim);
        let component_type = match parts.next() {
            Some(t) if !t.is_empty() => t.to_owned(),
            _ => failure::bail!("Empty filter/weigher in \"{}\"", s),
        };

        let args = parts
            .map(|arg| {
                let mut kv = arg.splitn(2, '=');
                match (kv.next(), kv.next()) {
                    (Some(k), Some(v)) if !k.trim().is_empty() => {
                        Ok((k.trim().to_owned(), v.trim().to_owned()))
                    }
                    _ => Err(failure::format_err!(
                        "Expected key=value, got \"{}\" in \"{}\"",
                        arg,
                        s
                    )),
                }
            })
            .collect::<Result<_, _>>()?;

        Ok(PolicyComponent {
            component_type,
            args,
        })
    }
}

/// A prefab allocation policy, optionally with filters and weighers.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicySpec {
    pub policy_name: String,
    pub filters: Option<Vec<PolicyComponent>>,
    pub weighers: Option<Vec<PolicyComponent>>,
}

impl PolicySpec {
    pub fn to_policy(&self) -> AllocationPolicy {
        AllocationPolicy {
            policy_type: "prefab".into(),
            policy_name: Some(self.policy_name.clone()),
            filters: self
                .filters
                .as_ref()
                .map(|fs| fs.iter().map(PolicyComponent::to_json).collect()),
            weighers: self
                .weighers
                .as_ref()
                .map(|ws| ws.iter().map(PolicyComponent::to_json).collect()),
            extra: Map::new(),
        }
    }
}

impl FromStr for PolicySpec {
    type Err = failure::Error;

    /// `Name[;filters=F,F...][;weighers=W,W...]`, where each `F`/`W` is a `PolicyComponent`.
    /// For example, `Mem;filters=ComputeFilter,VCpuFilter:allocationRatio=16;weighers=RamWeigher:multiplier=1.0`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(';').map(str::trim);
        let policy_name = match parts.next() {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => failure::bail!("Policy without a name: \"{}\"", s),
        };

        let mut spec = PolicySpec {
            policy_name,
            filters: None,
            weighers: None,
        };

        for part in parts {
            let (slot, list) = if let Some(list) = part.strip_prefix("filters=") {
                (&mut spec.filters, list)
            } else if let Some(list) = part.strip_prefix("weighers=") {
                (&mut spec.weighers, list)
            } else {
                failure::bail!("Unknown policy attribute \"{}\" in \"{}\"", part, s);
            };

            *slot = Some(
                list.split(',')
                    .filter(|c| !c.trim().is_empty())
                    .map(str::parse::<PolicyComponent>)
                    .collect::<Result<_, _>>()?,
            );
        }

        Ok(spec)
    }
}

/// Everything an experiment sweep can set. `None` (or an empty list) leaves the template alone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExperimentValues {
    pub name: Option<String>,

    /// File names under `topologies/`.
    pub topologies: Option<Vec<String>>,
    /// File names under `workload_traces/`.
    pub workloads: Option<Vec<String>>,
    /// File names under `failure_traces/`.
    pub failures: Option<Vec<String>>,

    pub policies: Vec<PolicySpec>,

    pub checkpoint_interval: Option<String>,
    pub checkpoint_duration: Option<String>,
    pub checkpoint_scaling: Option<String>,

    pub seeds: Vec<String>,
    pub runs: Vec<String>,
    pub export_intervals: Vec<String>,
    pub print_frequencies: Vec<String>,

    pub files_to_export: Vec<String>,
    pub max_failures: Vec<String>,
    pub output_folder: Option<String>,
}

impl ExperimentValues {
    fn value_lists(&self) -> ValueLists<ExperimentParam> {
        let mut lists = ValueLists::new();
        lists
            .insert(ExperimentParam::Seed, self.seeds.clone())
            .insert(ExperimentParam::Runs, self.runs.clone())
            .insert(ExperimentParam::ExportInterval, self.export_intervals.clone())
            .insert(ExperimentParam::PrintFrequency, self.print_frequencies.clone());
        lists
    }
}

/// Build a file entry, keeping the `type` of the template's entry at the same position.
fn build_entry(
    folder: &str,
    file: &str,
    original: Option<&FileEntry>,
    default_type: Option<&str>,
) -> FileEntry {
    FileEntry {
        path_to_file: Some(format!("{}/{}", folder, file)),
        entry_type: original
            .and_then(|e| e.entry_type.clone())
            .or_else(|| default_type.map(str::to_owned)),
        extra: Map::new(),
    }
}

fn build_entries(
    folder: &str,
    files: &[String],
    original: &Option<Vec<FileEntry>>,
    default_type: Option<&str>,
) -> Vec<FileEntry> {
    files
        .iter()
        .enumerate()
        .map(|(i, file)| {
            let original = original.as_ref().and_then(|entries| entries.get(i));
            build_entry(folder, file, original, default_type)
        })
        .collect()
}

fn int(what: &str, token: &str) -> Result<Number, failure::Error> {
    let value = cast_number(what, token)?;
    if value.fract() != 0.0 {
        return Err(CapsuleError::BadToken {
            param: what.to_owned(),
            token: token.to_owned(),
        }
        .into());
    }
    Ok(json_number(value))
}

fn num(what: &str, token: &str) -> Result<Number, failure::Error> {
    Ok(json_number(cast_number(what, token)?))
}

/// One index of an experiment sweep and what came of it.
pub type ExpandedExperiment = (Assignment<ExperimentParam>, Result<Experiment, failure::Error>);

/// Expand `values` over `base`. Returns each index of the sweep with its generated experiment
/// (under its final name), in sweep order. A token shared by every experiment that cannot be
/// cast fails the whole sweep; a bad indexed token only fails its own index.
pub fn expand_experiments(
    base: &Experiment,
    values: &ExperimentValues,
) -> Result<Vec<ExpandedExperiment>, failure::Error> {
    // Things that are the same for every experiment of the sweep go into the base first.
    let mut base = base.clone();

    let base_name = values
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .or_else(|| base.name.clone())
        .unwrap_or_else(|| DEFAULT_EXPERIMENT_NAME.to_owned());

    if let Some(files) = &values.topologies {
        base.topologies = Some(build_entries(TOPOLOGIES_DIR, files, &base.topologies, None));
    }
    if let Some(files) = &values.workloads {
        base.workloads = Some(build_entries(
            WORKLOAD_TRACES_DIR,
            files,
            &base.workloads,
            Some(DEFAULT_WORKLOAD_TYPE),
        ));
    }
    if let Some(files) = &values.failures {
        base.failure_models = Some(build_entries(
            FAILURE_TRACES_DIR,
            files,
            &base.failure_models,
            Some(DEFAULT_FAILURE_TYPE),
        ));
    }

    if !values.policies.is_empty() {
        base.allocation_policies = Some(values.policies.iter().map(PolicySpec::to_policy).collect());
    }

    apply_checkpoint(&mut base, values)?;

    if !values.max_failures.is_empty() {
        base.max_num_failures = Some(
            values
                .max_failures
                .iter()
                .map(|mf| int("max_failures", mf))
                .collect::<Result<_, _>>()?,
        );
    }
    if let Some(folder) = &values.output_folder {
        base.output_folder = Some(folder.clone());
    }

    Ok(aligned(&values.value_lists())
        .into_iter()
        .map(|assignment| {
            let experiment = expand_one(&base, &base_name, &assignment, values);
            (assignment, experiment)
        })
        .collect())
}

fn apply_checkpoint(experiment: &mut Experiment, values: &ExperimentValues) -> Result<(), failure::Error> {
    let interval = values
        .checkpoint_interval
        .as_deref()
        .map(|t| int("checkpoint_interval", t))
        .transpose()?;
    let duration = values
        .checkpoint_duration
        .as_deref()
        .map(|t| int("checkpoint_duration", t))
        .transpose()?;
    let scaling = values
        .checkpoint_scaling
        .as_deref()
        .map(|t| num("checkpoint_scaling", t))
        .transpose()?;

    match experiment.checkpoint_models.as_mut().and_then(|m| m.first_mut()) {
        Some(model) => {
            if interval.is_some() {
                model.checkpoint_interval = interval;
            }
            if duration.is_some() {
                model.checkpoint_duration = duration;
            }
            if scaling.is_some() {
                model.checkpoint_interval_scaling = scaling;
            }
        }

        // A new checkpoint model is only useful with all three values.
        None => {
            if let (Some(interval), Some(duration), Some(scaling)) = (interval, duration, scaling) {
                experiment.checkpoint_models = Some(vec![CheckpointModel {
                    checkpoint_interval: Some(interval),
                    checkpoint_duration: Some(duration),
                    checkpoint_interval_scaling: Some(scaling),
                    extra: Map::new(),
                }]);
            }
        }
    }

    Ok(())
}

fn expand_one(
    base: &Experiment,
    base_name: &str,
    assignment: &Assignment<ExperimentParam>,
    values: &ExperimentValues,
) -> Result<Experiment, failure::Error> {
    let mut experiment = base.clone();
    let mut name = base_name.to_owned();

    if let Some(seed) = assignment.get(ExperimentParam::Seed) {
        name.push_str(&format!("_s{}", seed));
        experiment.initial_seed = Some(int("seed", seed)?);
    }
    if let Some(runs) = assignment.get(ExperimentParam::Runs) {
        name.push_str(&format!("_r{}", runs));
        experiment.runs = Some(int("runs", runs)?);
    }
    experiment.name = Some(name);

    let interval = assignment
        .get(ExperimentParam::ExportInterval)
        .map(|t| int("export_interval", t))
        .transpose()?;
    let frequency = assignment
        .get(ExperimentParam::PrintFrequency)
        .map(|t| int("print_frequency", t))
        .transpose()?;
    let files = if values.files_to_export.is_empty() {
        None
    } else {
        Some(values.files_to_export.clone())
    };

    match experiment.export_models.as_mut().and_then(|m| m.first_mut()) {
        Some(model) => {
            if interval.is_some() {
                model.export_interval = interval;
            }
            if frequency.is_some() {
                model.print_frequency = frequency;
            }
            if files.is_some() {
                model.files_to_export = files;
            }
        }

        None => {
            if interval.is_some() || frequency.is_some() || files.is_some() {
                experiment.export_models = Some(vec![ExportModel {
                    export_interval: interval,
                    print_frequency: frequency,
                    files_to_export: files,
                    extra: Map::new(),
                }]);
            }
        }
    }

    Ok(experiment)
}

/// The file name an experiment is saved under, relative to `experiments/`.
pub fn experiment_file_name(experiment: &Experiment) -> String {
    let name = experiment
        .name
        .as_deref()
        .unwrap_or(DEFAULT_EXPERIMENT_NAME);
    if name.ends_with(".json") {
        name.to_owned()
    } else {
        format!("{}.json", name)
    }
}
