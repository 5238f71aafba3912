//! Deterministic names for generated topologies.
//!
//! The path of a generated file encodes the parameters that were set for it, so that siblings of
//! a sweep do not collide and a human can tell which run is which:
//!
//! ```text
//! [<name>/][hosts<NoH>/][bat<capacity>_<charging_speed>/][carbon-<trace stem>/]<file>
//! ```
//!
//! where `<file>` is `core<n>_speed<n>_mem<n>_<name or "topology">.json`, leaving out tags whose
//! parameter is unset. Values appear exactly as their sweep tokens.
//!
//! Nothing is deduplicated on disk: two assignments that produce the same path overwrite each
//! other, last one wins.

use std::path::{Path, PathBuf};

use crate::{
    param::Param,
    sweep::Assignment,
    topology::{TopologyFlags, TopologyOptions},
};

/// The file stem used when a sweep has no name.
pub const DEFAULT_STEM: &str = "topology";

/// The path of the topology generated for `assignment`, relative to the topologies directory.
pub fn topology_path(assignment: &Assignment, options: &TopologyOptions) -> PathBuf {
    let name = options.name.as_deref().filter(|n| !n.is_empty());
    let prepend = options.flags.contains(TopologyFlags::PREPEND_NAME);

    let mut path = PathBuf::new();

    if prepend {
        if let Some(name) = name {
            path.push(name);
        }
    }
    if let Some(hosts) = assignment.get(Param::HostCount) {
        path.push(format!("hosts{}", hosts));
    }
    if options.flags.contains(TopologyFlags::INCLUDE_BATTERY) {
        if let (Some(capacity), Some(speed)) = (
            assignment.get(Param::BatteryCapacity),
            assignment.get(Param::ChargingSpeed),
        ) {
            path.push(format!("bat{}_{}", capacity, speed));
        }
    }
    if let Some(carbon) = assignment.get(Param::Carbon).filter(|c| !c.is_empty()) {
        path.push(format!("carbon-{}", trace_stem(carbon)));
    }

    let tags = [
        ("core", Param::CoreCount),
        ("speed", Param::CoreSpeed),
        ("mem", Param::MemorySize),
    ]
    .iter()
    .filter_map(|(tag, param)| assignment.get(*param).map(|v| format!("{}{}", tag, v)))
    .collect::<Vec<_>>();

    let stem = name.unwrap_or(DEFAULT_STEM);

    if tags.is_empty() {
        path.push(format!("{}.json", stem));
    } else {
        path.push(format!("{}_{}.json", tags.join("_"), stem));
    }

    path
}

/// The file name of a trace without its directory or extension.
fn trace_stem(trace: &str) -> String {
    Path::new(trace)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| trace.to_owned())
}

/// The file name of the single topology produced by a per-cluster sweep over `template`.
pub fn multi_cluster_path(template: Option<&str>) -> PathBuf {
    let stem = template
        .map(Path::new)
        .and_then(Path::file_stem)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_STEM.to_owned());
    PathBuf::from(format!("{}_multiple_clusters.json", stem))
}

#[cfg(test)]
mod tests {
    use super::*;

    use Param::*;

    fn options(flags: TopologyFlags, name: Option<&str>) -> TopologyOptions {
        TopologyOptions {
            flags,
            power_model: None,
            name: name.map(str::to_owned),
        }
    }

    #[test]
    fn hosts_and_cores() {
        let a = Assignment::new().with(CoreCount, "8").with(HostCount, "3");
        assert_eq!(
            topology_path(&a, &TopologyOptions::default()),
            Path::new("hosts3/core8_topology.json")
        );
    }

    #[test]
    fn nothing_set() {
        assert_eq!(
            topology_path(&Assignment::new(), &TopologyOptions::default()),
            Path::new("topology.json")
        );
        assert_eq!(
            topology_path(&Assignment::new(), &options(TopologyFlags::empty(), Some("base"))),
            Path::new("base.json")
        );
    }

    #[test]
    fn every_segment() {
        let a = Assignment::new()
            .with(CoreCount, "8")
            .with(CoreSpeed, "2.5")
            .with(MemorySize, "1024")
            .with(HostCount, "4")
            .with(Carbon, "traces/NL_2021.parquet")
            .with(BatteryCapacity, "10")
            .with(ChargingSpeed, "0.5")
            .with(StartingCi, "100");

        assert_eq!(
            topology_path(&a, &options(TopologyFlags::INCLUDE_BATTERY, Some("exp"))),
            Path::new("hosts4/bat10_0.5/carbon-NL_2021/core8_speed2.5_mem1024_exp.json")
        );
        assert_eq!(
            topology_path(
                &a,
                &options(
                    TopologyFlags::INCLUDE_BATTERY | TopologyFlags::PREPEND_NAME,
                    Some("exp")
                )
            ),
            Path::new("exp/hosts4/bat10_0.5/carbon-NL_2021/core8_speed2.5_mem1024_exp.json")
        );
    }

    #[test]
    fn prepended_name_also_names_the_file() {
        let opts = options(TopologyFlags::PREPEND_NAME, Some("exp"));
        assert_eq!(
            topology_path(&Assignment::new().with(CoreCount, "8"), &opts),
            Path::new("exp/core8_exp.json")
        );
        assert_eq!(
            topology_path(&Assignment::new(), &opts),
            Path::new("exp/exp.json")
        );
    }

    #[test]
    fn battery_segment_needs_both_values_and_the_flag() {
        let a = Assignment::new().with(BatteryCapacity, "10");
        assert_eq!(
            topology_path(&a, &options(TopologyFlags::INCLUDE_BATTERY, None)),
            Path::new("topology.json")
        );

        let a = a.with(ChargingSpeed, "1");
        assert_eq!(
            topology_path(&a, &TopologyOptions::default()),
            Path::new("topology.json")
        );
    }

    #[test]
    fn siblings_do_not_collide() {
        let opts = options(TopologyFlags::INCLUDE_BATTERY, None);
        let variants = vec![
            Assignment::new().with(CoreCount, "8"),
            Assignment::new().with(CoreCount, "16"),
            Assignment::new().with(CoreSpeed, "8"),
            Assignment::new().with(MemorySize, "8"),
            Assignment::new().with(HostCount, "8"),
            Assignment::new().with(Carbon, "8.csv"),
            Assignment::new().with(CoreCount, "8").with(HostCount, "2"),
            Assignment::new()
                .with(BatteryCapacity, "8")
                .with(ChargingSpeed, "1"),
        ];

        let paths: std::collections::HashSet<_> =
            variants.iter().map(|a| topology_path(a, &opts)).collect();
        assert_eq!(paths.len(), variants.len());
    }

    #[test]
    fn is_deterministic() {
        let a = Assignment::new().with(CoreCount, "8").with(Carbon, "x.parquet");
        let opts = options(TopologyFlags::empty(), Some("n"));
        assert_eq!(topology_path(&a, &opts), topology_path(&a.clone(), &opts));
    }

    #[test]
    fn multi_cluster_names() {
        assert_eq!(
            multi_cluster_path(Some("datacenter.json")),
            Path::new("datacenter_multiple_clusters.json")
        );
        assert_eq!(
            multi_cluster_path(None),
            Path::new("topology_multiple_clusters.json")
        );
    }
}
