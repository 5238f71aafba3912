//! Generate experiment descriptors under `experiments/`.

use std::collections::BTreeSet;
use std::path::Path;

use clap::clap_app;

use log::{error, info, warn};

use crate::{
    cli::{self, validator},
    experiment::{expand_experiments, experiment_file_name, Experiment, ExperimentValues, PolicySpec},
    parse::parse_input,
    paths::*,
    store::{load_template, save_json},
    sweep::SweepReport,
    Workspace,
};

/// Load the experiment template `name` from `templates/experiments/`, or start from an empty
/// experiment.
pub fn load_base(workspace: &Workspace, template: Option<&str>) -> Result<Experiment, failure::Error> {
    match template {
        Some(name) => {
            let path = workspace.template(EXPERIMENTS_DIR, name);
            load_template(&path).map_err(|err| {
                error!("{}", err);
                err.into()
            })
        }
        None => Ok(Experiment::default()),
    }
}

/// Generate and save the experiments of one sweep. Fails if the template cannot be loaded or a
/// value shared by every experiment is not a number. An index whose own values are bad is
/// logged and recorded in the report.
pub fn generate(
    workspace: &Workspace,
    template: Option<&str>,
    values: &ExperimentValues,
) -> Result<SweepReport, failure::Error> {
    let base = load_base(workspace, template)?;
    let experiments = expand_experiments(&base, values)?;

    let root = workspace.experiments();
    let mut report = SweepReport::default();
    let mut names = BTreeSet::new();

    for (assignment, experiment) in experiments {
        let experiment = match experiment {
            Ok(experiment) => experiment,
            Err(err) => {
                warn!("Skipping {}: {}", assignment, err);
                report.failed.push((assignment.to_string(), err.to_string()));
                continue;
            }
        };

        let file = experiment_file_name(&experiment);
        if !names.insert(file.clone()) {
            warn!("{} is generated more than once; the last one wins", file);
        }

        match save_json(&root, Path::new(&file), &experiment) {
            Ok(path) => {
                info!("Generated {}", path.display());
                report.written.push(path);
            }
            Err(err) => {
                error!("{}", err);
                report.failed.push((file, err.to_string()));
            }
        }
    }

    Ok(report)
}

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { experiments =>
        (about: "Generate experiment descriptors under experiments/. Seeds, runs, export intervals \
                 and print frequencies are swept by index; everything else is the same for each \
                 generated experiment.")
        (@setting DisableVersion)
        (@arg TEMPLATE: --template +takes_value
         "An experiment template under templates/experiments/ (e.g. base.json).")
        (@arg NAME: --name +takes_value
         "The base name of the generated experiments.")
        (@arg TOPOLOGIES: --topologies +takes_value
         "Topology files under topologies/, comma separated.")
        (@arg WORKLOADS: --workloads +takes_value
         "Workload traces under workload_traces/, comma separated.")
        (@arg FAILURES: --failures +takes_value
         "Failure traces under failure_traces/, comma separated.")
        (@arg POLICY: --policy +takes_value +multiple number_of_values(1) {validator::policy}
         "A prefab allocation policy, optionally with filters and weighers \
          (e.g. 'Mem;filters=ComputeFilter,VCpuFilter:allocationRatio=16;weighers=RamWeigher'). \
          May be given more than once.")
        (@arg CHECKPOINT_INTERVAL: --("checkpoint-interval") +takes_value {validator::is::<f64>}
         "Checkpoint interval in milliseconds.")
        (@arg CHECKPOINT_DURATION: --("checkpoint-duration") +takes_value {validator::is::<f64>}
         "Checkpoint duration in milliseconds.")
        (@arg CHECKPOINT_SCALING: --("checkpoint-scaling") +takes_value {validator::is::<f64>}
         "Scaling factor of the checkpoint interval.")
        (@arg SEEDS: --seeds +takes_value +allow_hyphen_values {validator::value_list}
         "Initial seeds (e.g. 0-4:1).")
        (@arg RUNS: --runs +takes_value +allow_hyphen_values {validator::value_list}
         "Number of runs.")
        (@arg EXPORT_INTERVALS: --("export-intervals") +takes_value +allow_hyphen_values
         {validator::value_list}
         "Export intervals in seconds.")
        (@arg PRINT_FREQUENCIES: --("print-frequencies") +takes_value +allow_hyphen_values
         {validator::value_list}
         "Print frequencies.")
        (@arg FILES_TO_EXPORT: --("files-to-export") +takes_value
         "Result files to export, comma separated (e.g. host,task,powerSource).")
        (@arg MAX_FAILURES: --("max-failures") +takes_value
         "Maximum numbers of failures, comma separated.")
        (@arg OUTPUT_FOLDER: --("output-folder") +takes_value
         "Where the simulator writes the results.")
    };

    cli::workspace::add_cli_options(app)
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let workspace = cli::workspace::parse_cli_options(sub_m);

    let list = |arg: &str| sub_m.value_of(arg).map(parse_input).unwrap_or_default();
    let owned = |arg: &str| sub_m.value_of(arg).map(str::to_owned);

    let values = ExperimentValues {
        name: owned("NAME"),
        topologies: sub_m.value_of("TOPOLOGIES").map(parse_input),
        workloads: sub_m.value_of("WORKLOADS").map(parse_input),
        failures: sub_m.value_of("FAILURES").map(parse_input),
        policies: sub_m
            .values_of("POLICY")
            .map(|policies| policies.map(str::parse::<PolicySpec>).collect::<Result<Vec<_>, _>>())
            .transpose()?
            .unwrap_or_default(),
        checkpoint_interval: owned("CHECKPOINT_INTERVAL"),
        checkpoint_duration: owned("CHECKPOINT_DURATION"),
        checkpoint_scaling: owned("CHECKPOINT_SCALING"),
        seeds: list("SEEDS"),
        runs: list("RUNS"),
        export_intervals: list("EXPORT_INTERVALS"),
        print_frequencies: list("PRINT_FREQUENCIES"),
        files_to_export: list("FILES_TO_EXPORT"),
        max_failures: list("MAX_FAILURES"),
        output_folder: owned("OUTPUT_FOLDER"),
    };

    let report = generate(&workspace, sub_m.value_of("TEMPLATE"), &values)?;
    info!("{}", report.summary());

    Ok(())
}
