//! Generate topology descriptors from a template and a parameter sweep.
//!
//! Each assignment of the sweep is applied to a fresh copy of the template and written to
//! `topologies/<path>`, where `<path>` encodes the assignment (see `naming`). With
//! `--per-cluster`, the aligned sweep instead configures one cluster per index and a single
//! topology is written.

use std::path::PathBuf;

use clap::clap_app;

use log::{error, info, warn};

use crate::{
    cli::{self, validator},
    naming::{multi_cluster_path, topology_path},
    param::{parse_pair, Param},
    paths::*,
    settings,
    store::{load_template, save_json},
    sweep::{aligned, expand, SweepMode, SweepReport, ValueLists},
    topology::{
        mutate, mutate_per_cluster, Cluster, Defaults, PowerModelPatch, Topology, TopologyFlags,
        TopologyOptions, TopologyPatch,
    },
    Workspace,
};

/// Everything that describes one topology sweep.
#[derive(Clone, Debug)]
pub struct TopologySweep {
    /// A file name under `templates/topologies/`. Without one, a single-host topology is made
    /// up from the defaults.
    pub template: Option<String>,
    pub lists: ValueLists,
    pub mode: SweepMode,
    pub options: TopologyOptions,
}

impl TopologySweep {
    pub fn new(lists: ValueLists, mode: SweepMode) -> Self {
        TopologySweep {
            template: None,
            lists,
            mode,
            options: TopologyOptions::default(),
        }
    }
}

/// Load the base topology of a sweep.
pub fn load_base(
    workspace: &Workspace,
    template: Option<&str>,
    defaults: &Defaults,
) -> Result<Topology, failure::Error> {
    let mut base = match template {
        Some(name) => {
            let path = workspace.template(TOPOLOGIES_DIR, name);
            match load_template::<Topology>(&path) {
                Ok(topology) => topology,
                Err(err) => {
                    error!("{}", err);
                    return Err(err.into());
                }
            }
        }
        None => Topology::single_host(defaults),
    };

    // A template without clusters still gets something to apply the sweep to.
    if base.clusters.is_empty() {
        base.clusters.push(Cluster::single_host("C1", defaults));
    }

    Ok(base)
}

/// Run a sweep, writing one file per assignment. Only a template that cannot be loaded is an
/// error; variants that fail are logged and recorded in the report.
pub fn generate(
    workspace: &Workspace,
    sweep: &TopologySweep,
    defaults: &Defaults,
) -> Result<SweepReport, failure::Error> {
    let base = load_base(workspace, sweep.template.as_deref(), defaults)?;
    let root = workspace.topologies();

    let mut report = SweepReport::default();

    for assignment in expand(&sweep.lists, &sweep.mode) {
        let patch = match TopologyPatch::from_assignment(&assignment, &sweep.options, defaults) {
            Ok(patch) => patch,
            Err(err) => {
                warn!("Skipping {}: {}", assignment, err);
                report.failed.push((assignment.to_string(), err.to_string()));
                continue;
            }
        };

        let topology = mutate(&base, &patch);
        let rel = topology_path(&assignment, &sweep.options);

        match save_json(&root, &rel, &topology) {
            Ok(path) => {
                info!("Generated {}", path.display());
                report.written.push(path);
            }
            Err(err) => {
                error!("{}", err);
                report.failed.push((assignment.to_string(), err.to_string()));
            }
        }
    }

    Ok(report)
}

/// Apply index `i` of the aligned sweep to the first host of cluster `i`, and write the result
/// as a single topology.
pub fn generate_per_cluster(
    workspace: &Workspace,
    sweep: &TopologySweep,
    defaults: &Defaults,
) -> Result<SweepReport, failure::Error> {
    let base = load_base(workspace, sweep.template.as_deref(), defaults)?;

    let mut report = SweepReport::default();
    let mut patches = vec![];

    for assignment in aligned(&sweep.lists) {
        match TopologyPatch::from_assignment(&assignment, &sweep.options, defaults) {
            Ok(patch) => patches.push(Some(patch.host)),
            Err(err) => {
                warn!("Leaving cluster {} as is: {}", patches.len() + 1, err);
                report.failed.push((assignment.to_string(), err.to_string()));
                patches.push(None);
            }
        }
    }

    let topology = mutate_per_cluster(&base, &patches, defaults);
    let rel = multi_cluster_path(sweep.template.as_deref());

    match save_json(&workspace.topologies(), &rel, &topology) {
        Ok(path) => {
            info!("Generated {}", path.display());
            report.written.push(path);
        }
        Err(err) => {
            error!("{}", err);
            report.failed.push((rel.display().to_string(), err.to_string()));
        }
    }

    Ok(report)
}

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { topologies =>
        (about: "Generate topology descriptors under topologies/ from a parameter sweep.")
        (@setting DisableVersion)
        (@arg TEMPLATE: --template +takes_value
         "A topology template under templates/topologies/ (e.g. datacenter.json). Without one, a \
          single-host topology is made up from the defaults.")
        (@arg MODE: --mode +takes_value possible_values(&["aligned", "product", "paired"])
         default_value("aligned")
         "How to combine the value lists: zip them by index, take their product, or zip the \
          --pair'ed lists and take the product with the rest.")
        (@arg PAIR: --pair +takes_value +multiple number_of_values(1) {validator::param_pair}
         "Two parameters to zip in paired mode (e.g. battery_capacity,charging_speed). May be \
          given more than once.")
        (@arg PER_CLUSTER: --("per-cluster")
         "Write a single topology in which value i configures cluster i.")
        (@arg BATTERY: --battery "Add or update the battery of every cluster.")
        (@arg POWER_MODEL: --("power-model") +takes_value
         "Attach a power model of this type to every host (e.g. linear).")
        (@arg POWER: --power +takes_value requires[POWER_MODEL] {validator::is::<f64>}
         "The power coefficient of the power model.")
        (@arg IDLE_POWER: --("idle-power") +takes_value requires[POWER_MODEL]
         {validator::is::<f64>}
         "The idle power of the power model.")
        (@arg MAX_POWER: --("max-power") +takes_value requires[POWER_MODEL]
         {validator::is::<f64>}
         "The maximum power of the power model.")
        (@arg NAME: --name +takes_value
         "A name for the generated topologies, used as their file stem.")
        (@arg PREPEND: --prepend requires[NAME]
         "Also use the name as the leading directory.")
    };

    let app = cli::workspace::add_cli_options(app);
    cli::sweep_values::add_cli_options(app)
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let workspace = cli::workspace::parse_cli_options(sub_m);
    let defaults = settings::defaults(&settings::get_settings(&workspace)?)?;

    let lists = cli::sweep_values::parse_cli_options(sub_m);
    let mode = match sub_m.value_of("MODE") {
        Some("product") => SweepMode::Product,
        Some("paired") => SweepMode::PairedProduct(
            sub_m
                .values_of("PAIR")
                .map(|pairs| pairs.map(parse_pair).collect::<Result<Vec<_>, _>>())
                .transpose()?
                .unwrap_or_default(),
        ),
        _ => SweepMode::Aligned,
    };

    let mut flags = TopologyFlags::empty();
    if sub_m.is_present("BATTERY") {
        flags |= TopologyFlags::INCLUDE_BATTERY;
    }
    if sub_m.is_present("PREPEND") {
        flags |= TopologyFlags::PREPEND_NAME;
    }

    let power_model = if let Some(model_type) = sub_m.value_of("POWER_MODEL") {
        flags |= TopologyFlags::ADD_POWER_MODEL;
        Some(PowerModelPatch {
            model_type: model_type.into(),
            power: sub_m.value_of("POWER").map(str::parse::<f64>).transpose()?,
            idle_power: sub_m.value_of("IDLE_POWER").map(str::parse::<f64>).transpose()?,
            max_power: sub_m.value_of("MAX_POWER").map(str::parse::<f64>).transpose()?,
        })
    } else {
        None
    };

    if flags.contains(TopologyFlags::INCLUDE_BATTERY)
        && lists.get(Param::BatteryCapacity).is_empty()
    {
        warn!("--battery without --battery_capacity only updates existing batteries");
    }

    let sweep = TopologySweep {
        template: sub_m.value_of("TEMPLATE").map(str::to_owned),
        lists,
        mode,
        options: TopologyOptions {
            flags,
            power_model,
            name: sub_m.value_of("NAME").map(str::to_owned),
        },
    };

    let report = if sub_m.is_present("PER_CLUSTER") {
        generate_per_cluster(&workspace, &sweep, &defaults)?
    } else {
        generate(&workspace, &sweep, &defaults)?
    };

    info!("{}", report.summary());
    for (variant, reason) in report.failed.iter() {
        warn!("Failed {}: {}", variant, reason);
    }

    Ok(())
}

/// The files a sweep would write, without writing them. Used to preview a sweep.
pub fn planned_paths(sweep: &TopologySweep) -> Vec<PathBuf> {
    expand(&sweep.lists, &sweep.mode)
        .iter()
        .map(|assignment| topology_path(assignment, &sweep.options))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use serde_json::{json, Value};
    use tempdir::TempDir;

    use crate::store::load_json;

    fn lists(entries: Vec<(Param, Vec<&str>)>) -> ValueLists {
        let mut lists = ValueLists::new();
        for (p, values) in entries {
            lists.insert(p, values.iter().map(|s| s.to_string()).collect());
        }
        lists
    }

    #[test]
    fn without_template_a_default_topology_is_used() {
        let dir = TempDir::new("gen_topology").unwrap();
        let ws = Workspace::new(dir.path());

        let sweep = TopologySweep::new(lists(vec![(Param::CoreCount, vec!["8"])]), SweepMode::Aligned);
        let report = generate(&ws, &sweep, &Defaults::default()).unwrap();

        assert!(report.is_clean());
        assert_eq!(report.written, vec![ws.topologies().join("core8_topology.json")]);

        let doc: Value = load_json(&report.written[0]).unwrap();
        assert_eq!(doc["clusters"][0]["hosts"][0]["cpu"]["coreCount"], json!(8));
        assert_eq!(doc["clusters"][0]["hosts"][0]["cpu"]["coreSpeed"], json!(2100));
    }

    #[test]
    fn a_missing_template_aborts_the_sweep() {
        let dir = TempDir::new("gen_topology").unwrap();
        let ws = Workspace::new(dir.path());

        let mut sweep =
            TopologySweep::new(lists(vec![(Param::CoreCount, vec!["8", "16"])]), SweepMode::Product);
        sweep.template = Some("nope.json".into());

        assert!(generate(&ws, &sweep, &Defaults::default()).is_err());
        assert!(!ws.topologies().exists());
    }

    #[test]
    fn a_bad_token_skips_only_its_variant() {
        let dir = TempDir::new("gen_topology").unwrap();
        let ws = Workspace::new(dir.path());

        let sweep = TopologySweep::new(
            lists(vec![(Param::CoreCount, vec!["8", "many", "32"])]),
            SweepMode::Aligned,
        );
        let report = generate(&ws, &sweep, &Defaults::default()).unwrap();

        assert_eq!(report.written.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "core_count=many");
    }

    #[test]
    fn per_cluster_sweep_writes_one_file() {
        let dir = TempDir::new("gen_topology").unwrap();
        let ws = Workspace::new(dir.path());

        let template = ws.template(TOPOLOGIES_DIR, "dc.json");
        fs::create_dir_all(template.parent().unwrap()).unwrap();
        fs::write(
            &template,
            json!({"clusters": [{"name": "A", "hosts": [{"count": 1}]}]}).to_string(),
        )
        .unwrap();

        let mut sweep = TopologySweep::new(
            lists(vec![(Param::CoreCount, vec!["4", "8"]), (Param::HostCount, vec!["2"])]),
            SweepMode::Aligned,
        );
        sweep.template = Some("dc.json".into());

        let report = generate_per_cluster(&ws, &sweep, &Defaults::default()).unwrap();
        assert_eq!(
            report.written,
            vec![ws.topologies().join("dc_multiple_clusters.json")]
        );

        let doc: Value = load_json(&report.written[0]).unwrap();
        let clusters = doc["clusters"].as_array().unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0]["name"], json!("A"));
        assert_eq!(clusters[0]["hosts"][0]["count"], json!(2));
        assert_eq!(clusters[0]["hosts"][0]["cpu"]["coreCount"], json!(4));
        assert_eq!(clusters[1]["name"], json!("C2"));
        assert_eq!(clusters[1]["hosts"][0]["cpu"]["coreCount"], json!(8));
    }

    #[test]
    fn per_cluster_bad_token_keeps_later_clusters_in_place() {
        let dir = TempDir::new("gen_topology").unwrap();
        let ws = Workspace::new(dir.path());

        let template = ws.template(TOPOLOGIES_DIR, "dc.json");
        fs::create_dir_all(template.parent().unwrap()).unwrap();
        fs::write(
            &template,
            json!({"clusters": [
                {"name": "A", "hosts": [{"cpu": {"coreCount": 1}}]},
                {"name": "B", "hosts": [{"cpu": {"coreCount": 1}}]},
                {"name": "C", "hosts": [{"cpu": {"coreCount": 1}}]}
            ]})
            .to_string(),
        )
        .unwrap();

        let mut sweep = TopologySweep::new(
            lists(vec![(Param::CoreCount, vec!["8", "bad", "32"])]),
            SweepMode::Aligned,
        );
        sweep.template = Some("dc.json".into());

        let report = generate_per_cluster(&ws, &sweep, &Defaults::default()).unwrap();
        assert_eq!(report.written.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "core_count=bad");

        let doc: Value = load_json(&report.written[0]).unwrap();
        let cores: Vec<&Value> = doc["clusters"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| &c["hosts"][0]["cpu"]["coreCount"])
            .collect();
        assert_eq!(cores, vec![&json!(8), &json!(1), &json!(32)]);
    }

    #[test]
    fn planned_paths_match_the_sweep() {
        let sweep = TopologySweep::new(
            lists(vec![(Param::CoreCount, vec!["8", "16"]), (Param::HostCount, vec!["1", "2"])]),
            SweepMode::Product,
        );
        assert_eq!(
            planned_paths(&sweep),
            vec![
                PathBuf::from("hosts1/core8_topology.json"),
                PathBuf::from("hosts2/core8_topology.json"),
                PathBuf::from("hosts1/core16_topology.json"),
                PathBuf::from("hosts2/core16_topology.json"),
            ]
        );
    }
}
