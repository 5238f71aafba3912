//! Whole topology and experiment sweeps against temporary workspaces.

use std::fs;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempdir::TempDir;

use capsule::{
    gen_experiment,
    gen_topology::{generate, generate_per_cluster, TopologySweep},
    experiment::ExperimentValues,
    param::Param,
    paths::*,
    store::load_json,
    sweep::{SweepMode, ValueLists},
    topology::{Defaults, TopologyFlags},
    validate::validate,
    Workspace,
};

const BASE: &str = r#"{"clusters":[{"hosts":[{"cpu":{"coreCount":4,"coreSpeed":1000},"memory":{"memorySize":1000},"count":1}]}]}"#;

fn workspace_with_template(template: &str) -> (TempDir, Workspace) {
    let dir = TempDir::new("sweeps").unwrap();
    let ws = Workspace::new(dir.path());

    let path = ws.template(TOPOLOGIES_DIR, "base.json");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, template).unwrap();

    (dir, ws)
}

fn lists(entries: Vec<(Param, Vec<&str>)>) -> ValueLists {
    let mut lists = ValueLists::new();
    for (p, values) in entries {
        lists.insert(p, values.iter().map(|s| s.to_string()).collect());
    }
    lists
}

fn sweep(lists: ValueLists, mode: SweepMode) -> TopologySweep {
    let mut sweep = TopologySweep::new(lists, mode);
    sweep.template = Some("base.json".into());
    sweep
}

fn read(path: &Path) -> Value {
    load_json(path).unwrap()
}

#[test]
fn end_to_end_single_assignment() {
    let (_dir, ws) = workspace_with_template(BASE);

    let s = sweep(
        lists(vec![(Param::CoreCount, vec!["8"]), (Param::HostCount, vec!["3"])]),
        SweepMode::Aligned,
    );
    let report = generate(&ws, &s, &Defaults::default()).unwrap();

    assert_eq!(
        report.written,
        vec![ws.topologies().join("hosts3/core8_topology.json")]
    );
    assert_eq!(
        read(&report.written[0]),
        json!({"clusters":[{"hosts":[{"cpu":{"coreCount":8,"coreSpeed":1000},"memory":{"memorySize":1000},"count":3}]}]})
    );
}

#[test]
fn aligned_core_counts_change_nothing_else() {
    let (_dir, ws) = workspace_with_template(BASE);

    let s = sweep(lists(vec![(Param::CoreCount, vec!["8", "16"])]), SweepMode::Aligned);
    let report = generate(&ws, &s, &Defaults::default()).unwrap();

    assert_eq!(
        report.written,
        vec![
            ws.topologies().join("core8_topology.json"),
            ws.topologies().join("core16_topology.json"),
        ]
    );

    let base: Value = serde_json::from_str(BASE).unwrap();
    for (path, cores) in report.written.iter().zip(&[8, 16]) {
        let mut expected = base.clone();
        expected["clusters"][0]["hosts"][0]["cpu"]["coreCount"] = json!(cores);
        assert_eq!(read(path), expected);
    }
}

#[test]
fn documents_are_independent() {
    let (_dir, ws) = workspace_with_template(BASE);

    let s = sweep(
        lists(vec![(Param::CoreCount, vec!["8", "16"]), (Param::Carbon, vec!["nl.parquet"])]),
        SweepMode::Aligned,
    );
    let report = generate(&ws, &s, &Defaults::default()).unwrap();

    // The second document must not see the carbon trace of the first.
    let second = read(&report.written[1]);
    assert_eq!(second["clusters"][0].get("powerSource"), None);

    let first = read(&report.written[0]);
    assert_eq!(
        first["clusters"][0]["powerSource"],
        json!({"carbonTracePath": "carbon_traces/nl.parquet"})
    );
}

#[test]
fn output_is_deterministic() {
    let (_dir, ws) = workspace_with_template(BASE);

    let s = sweep(
        lists(vec![
            (Param::CoreCount, vec!["8", "16"]),
            (Param::BatteryCapacity, vec!["10"]),
            (Param::StartingCi, vec!["120"]),
        ]),
        SweepMode::Product,
    );
    let mut s = s;
    s.options.flags = TopologyFlags::INCLUDE_BATTERY;

    let first = generate(&ws, &s, &Defaults::default()).unwrap();
    let bytes: Vec<String> = first
        .written
        .iter()
        .map(|p| fs::read_to_string(p).unwrap())
        .collect();

    let second = generate(&ws, &s, &Defaults::default()).unwrap();
    assert_eq!(first.written, second.written);
    for (path, before) in second.written.iter().zip(bytes) {
        assert_eq!(fs::read_to_string(path).unwrap(), before);
    }
}

#[test]
fn template_failure_writes_nothing() {
    let (_dir, ws) = workspace_with_template("{ this is not json");

    let s = sweep(lists(vec![(Param::CoreCount, vec!["8", "16"])]), SweepMode::Product);
    assert!(generate(&ws, &s, &Defaults::default()).is_err());
    assert!(!ws.topologies().exists());
}

#[test]
fn save_failure_does_not_stop_siblings() {
    let (_dir, ws) = workspace_with_template(BASE);

    // A plain file where the `hosts2` directory would go.
    fs::create_dir_all(ws.topologies()).unwrap();
    fs::write(ws.topologies().join("hosts2"), "").unwrap();

    let s = sweep(lists(vec![(Param::HostCount, vec!["1", "2", "3"])]), SweepMode::Aligned);
    let report = generate(&ws, &s, &Defaults::default()).unwrap();

    assert_eq!(
        report.written,
        vec![
            ws.topologies().join("hosts1/topology.json"),
            ws.topologies().join("hosts3/topology.json"),
        ]
    );
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "NoH=2");
}

#[test]
fn per_cluster_failure_keeps_cluster_positions() {
    let (_dir, ws) = workspace_with_template(
        r#"{"clusters":[
            {"name":"A","hosts":[{"cpu":{"coreCount":1}}]},
            {"name":"B","hosts":[{"cpu":{"coreCount":1}}]},
            {"name":"C","hosts":[{"cpu":{"coreCount":1}}]}
        ]}"#,
    );

    let s = sweep(lists(vec![(Param::CoreCount, vec!["8", "bad", "32"])]), SweepMode::Aligned);
    let report = generate_per_cluster(&ws, &s, &Defaults::default()).unwrap();

    assert_eq!(
        report.written,
        vec![ws.topologies().join("base_multiple_clusters.json")]
    );
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "core_count=bad");

    assert_eq!(
        read(&report.written[0]),
        json!({"clusters":[
            {"name":"A","hosts":[{"cpu":{"coreCount":8}}]},
            {"name":"B","hosts":[{"cpu":{"coreCount":1}}]},
            {"name":"C","hosts":[{"cpu":{"coreCount":32}}]}
        ]})
    );
}

#[test]
fn bad_seed_does_not_stop_other_experiments() {
    let (_dir, ws) = workspace_with_template(BASE);

    let values = ExperimentValues {
        name: Some("e".into()),
        seeds: vec!["1".into(), "two".into(), "3".into()],
        ..ExperimentValues::default()
    };
    let report = gen_experiment::generate(&ws, None, &values).unwrap();

    assert_eq!(
        report.written,
        vec![ws.experiments().join("e_s1.json"), ws.experiments().join("e_s3.json")]
    );
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "seed=two");
    assert!(!ws.experiments().join("e_stwo.json").exists());
}

#[test]
fn paired_battery_sweep() {
    let (_dir, ws) = workspace_with_template(BASE);

    let mut s = sweep(
        lists(vec![
            (Param::BatteryCapacity, vec!["10", "20"]),
            (Param::ChargingSpeed, vec!["0.5", "1"]),
            (Param::StartingCi, vec!["100"]),
            (Param::HostCount, vec!["1", "2"]),
        ]),
        SweepMode::PairedProduct(vec![(Param::BatteryCapacity, Param::ChargingSpeed)]),
    );
    s.options.flags = TopologyFlags::INCLUDE_BATTERY;

    let report = generate(&ws, &s, &Defaults::default()).unwrap();
    let rel: Vec<PathBuf> = report
        .written
        .iter()
        .map(|p| p.strip_prefix(ws.topologies()).unwrap().to_owned())
        .collect();

    assert_eq!(
        rel,
        vec![
            PathBuf::from("hosts1/bat10_0.5/topology.json"),
            PathBuf::from("hosts2/bat10_0.5/topology.json"),
            PathBuf::from("hosts1/bat20_1/topology.json"),
            PathBuf::from("hosts2/bat20_1/topology.json"),
        ]
    );

    assert_eq!(
        read(&report.written[2])["clusters"][0]["battery"],
        json!({
            "capacity": 20,
            "chargingSpeed": 20,
            "embodiedCarbon": 2000,
            "expectedLifetime": 10,
            "batteryPolicy": {"type": "runningMeanPlus", "startingThreshold": 100, "windowSize": 168}
        })
    );
}

#[test]
fn generated_experiments_validate() {
    let (_dir, ws) = workspace_with_template(BASE);

    let s = sweep(lists(vec![(Param::CoreCount, vec!["8"])]), SweepMode::Aligned);
    generate(&ws, &s, &Defaults::default()).unwrap();

    let trace = ws.resolve(WORKLOAD_TRACES_DIR).join("bitbrains");
    fs::create_dir_all(&trace).unwrap();

    let values = ExperimentValues {
        name: Some("e".into()),
        topologies: Some(vec!["core8_topology.json".into()]),
        workloads: Some(vec!["bitbrains".into()]),
        seeds: vec!["0".into()],
        ..ExperimentValues::default()
    };
    let report = gen_experiment::generate(&ws, None, &values).unwrap();
    assert_eq!(report.written, vec![ws.experiments().join("e_s0.json")]);

    let reports = validate(&ws, &[]).unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_valid(), "{:?}", reports[0]);
}
