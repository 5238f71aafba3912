//! Topology descriptors and the mutations a sweep applies to them.
//!
//! A sweep never edits its template. Each assignment is turned into a [`TopologyPatch`], which is
//! applied to a fresh clone of the template by [`mutate`]. Patches only ever touch the fields
//! they carry a value for; everything else (including fields this crate knows nothing about) is
//! carried over from the template as is.

use bitflags::bitflags;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::{
    param::Param,
    parse::{cast_number, json_number},
    paths::CARBON_TRACES_DIR,
    sweep::Assignment,
};

/// The battery policy created for new battery blocks.
pub const BATTERY_POLICY_TYPE: &str = "runningMeanPlus";

/// Hardware and battery values used whenever something has to be created from scratch.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub core_count: u32,
    /// In MHz.
    pub core_speed: f64,
    /// In MB.
    pub memory_size: u64,
    pub host_count: u32,
    /// Expected battery lifetime in years.
    pub expected_lifetime: f64,
    /// Embodied carbon per unit of battery capacity.
    pub embodied_carbon_per_capacity: f64,
    /// Window of the running-mean battery policy, in hours.
    pub window_size: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            core_count: 16,
            core_speed: 2100.0,
            memory_size: 100_000,
            host_count: 1,
            expected_lifetime: 10.0,
            embodied_carbon_per_capacity: 100.0,
            window_size: 168,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub clusters: Vec<Cluster>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub hosts: Vec<Host>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_source: Option<PowerSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<Battery>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Cpu>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Memory>,

    /// How many identical hosts this entry stands for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_model: Option<PowerModel>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_count: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_speed: Option<Number>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_size: Option<Number>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbon_trace_path: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Battery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charging_speed: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embodied_carbon: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_lifetime: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_policy: Option<BatteryPolicy>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryPolicy {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub policy_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_threshold: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_size: Option<Number>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_power: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_power: Option<Number>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Topology {
    /// A topology with one cluster holding one host, built from `defaults`. Used when a sweep has
    /// no template.
    pub fn single_host(defaults: &Defaults) -> Self {
        Topology {
            clusters: vec![Cluster::single_host("C1", defaults)],
            extra: Map::new(),
        }
    }

    /// The carbon traces the clusters draw power from, in cluster order.
    pub fn carbon_traces(&self) -> Vec<&str> {
        self.clusters
            .iter()
            .filter_map(|cluster| cluster.power_source.as_ref())
            .filter_map(|source| source.carbon_trace_path.as_deref())
            .collect()
    }
}

impl Cluster {
    pub fn single_host(name: &str, defaults: &Defaults) -> Self {
        Cluster {
            name: Some(name.into()),
            hosts: vec![Host::from_defaults("H1", defaults)],
            power_source: None,
            battery: None,
            extra: Map::new(),
        }
    }
}

impl Host {
    pub fn from_defaults(name: &str, defaults: &Defaults) -> Self {
        Host {
            name: Some(name.into()),
            cpu: Some(Cpu {
                core_count: Some(defaults.core_count.into()),
                core_speed: Some(json_number(defaults.core_speed)),
                extra: Map::new(),
            }),
            memory: Some(Memory {
                memory_size: Some(defaults.memory_size.into()),
                extra: Map::new(),
            }),
            count: Some(defaults.host_count.into()),
            power_model: None,
            extra: Map::new(),
        }
    }
}

bitflags! {
    /// Sweep-independent switches of a topology sweep.
    pub struct TopologyFlags: u32 {
        /// Create or update battery blocks from the battery parameters.
        const INCLUDE_BATTERY = 1;

        /// Attach the configured power model to every host.
        const ADD_POWER_MODEL = 1 << 1;

        /// Also use the sweep name as the leading directory of generated paths.
        const PREPEND_NAME = 1 << 2;
    }
}

impl Default for TopologyFlags {
    fn default() -> Self {
        TopologyFlags::empty()
    }
}

/// Everything about a topology sweep that is the same for each generated file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TopologyOptions {
    pub flags: TopologyFlags,

    /// Only used with `ADD_POWER_MODEL`.
    pub power_model: Option<PowerModelPatch>,

    /// Names the generated files (and their directory, with `PREPEND_NAME`).
    pub name: Option<String>,
}

/// Applies a sparse set of changes to a part of a document. Fields the patch has no value for
/// are left untouched.
pub trait Patch<T> {
    fn apply(&self, target: &mut T);
}

fn set(slot: &mut Option<Number>, value: Option<f64>) {
    if let Some(value) = value {
        *slot = Some(json_number(value));
    }
}

/// The power model to attach to hosts.
#[derive(Clone, Debug, PartialEq)]
pub struct PowerModelPatch {
    pub model_type: String,
    pub power: Option<f64>,
    pub idle_power: Option<f64>,
    pub max_power: Option<f64>,
}

impl Patch<Option<PowerModel>> for PowerModelPatch {
    fn apply(&self, target: &mut Option<PowerModel>) {
        let model = target.get_or_insert_with(PowerModel::default);
        model.model_type = Some(self.model_type.clone());
        set(&mut model.power, self.power);
        set(&mut model.idle_power, self.idle_power);
        set(&mut model.max_power, self.max_power);
    }
}

/// Changes to every host entry of a cluster.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HostPatch {
    pub core_count: Option<f64>,
    pub core_speed: Option<f64>,
    pub memory_size: Option<f64>,
    pub count: Option<f64>,
    pub power_model: Option<PowerModelPatch>,
}

impl Patch<Host> for HostPatch {
    fn apply(&self, host: &mut Host) {
        if self.core_count.is_some() || self.core_speed.is_some() {
            let cpu = host.cpu.get_or_insert_with(Cpu::default);
            set(&mut cpu.core_count, self.core_count);
            set(&mut cpu.core_speed, self.core_speed);
        }
        if self.memory_size.is_some() {
            let memory = host.memory.get_or_insert_with(Memory::default);
            set(&mut memory.memory_size, self.memory_size);
        }
        set(&mut host.count, self.count);

        if let Some(power_model) = &self.power_model {
            power_model.apply(&mut host.power_model);
        }
    }
}

/// Changes to (or the creation of) a cluster's battery.
#[derive(Clone, Debug, PartialEq)]
pub struct BatteryPatch {
    pub capacity: Option<f64>,
    /// Charging speed as a multiple of the capacity.
    pub charging_speed: Option<f64>,
    pub expected_lifetime: Option<f64>,
    pub starting_threshold: Option<f64>,
    pub defaults: Defaults,
}

impl BatteryPatch {
    fn new_policy(&self, threshold: f64) -> BatteryPolicy {
        BatteryPolicy {
            policy_type: Some(BATTERY_POLICY_TYPE.into()),
            starting_threshold: Some(json_number(threshold)),
            window_size: Some(self.defaults.window_size.into()),
            extra: Map::new(),
        }
    }
}

impl Patch<Option<Battery>> for BatteryPatch {
    fn apply(&self, target: &mut Option<Battery>) {
        match target {
            Some(battery) => {
                set(&mut battery.capacity, self.capacity);

                // The speed is relative to the new capacity if there is one.
                let capacity = self
                    .capacity
                    .or_else(|| battery.capacity.as_ref().and_then(Number::as_f64));
                if let (Some(speed), Some(capacity)) = (self.charging_speed, capacity) {
                    battery.charging_speed = Some(json_number(speed * capacity));
                }

                set(&mut battery.expected_lifetime, self.expected_lifetime);

                if let Some(threshold) = self.starting_threshold {
                    match &mut battery.battery_policy {
                        Some(policy) => policy.starting_threshold = Some(json_number(threshold)),
                        None => battery.battery_policy = Some(self.new_policy(threshold)),
                    }
                }
            }

            None => match (self.capacity, self.starting_threshold) {
                (Some(capacity), Some(threshold)) if threshold > 0.0 => {
                    *target = Some(Battery {
                        capacity: Some(json_number(capacity)),
                        charging_speed: Some(json_number(
                            self.charging_speed.map(|s| s * capacity).unwrap_or(0.0),
                        )),
                        embodied_carbon: Some(json_number(
                            self.defaults.embodied_carbon_per_capacity * capacity,
                        )),
                        expected_lifetime: Some(json_number(
                            self.expected_lifetime
                                .unwrap_or(self.defaults.expected_lifetime),
                        )),
                        battery_policy: Some(self.new_policy(threshold)),
                        extra: Map::new(),
                    });
                }
                _ => {}
            },
        }
    }
}

/// One sweep assignment in typed form, applied to every cluster of a topology.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TopologyPatch {
    /// A trace file name under `carbon_traces/`.
    pub carbon: Option<String>,
    pub battery: Option<BatteryPatch>,
    pub host: HostPatch,
}

impl TopologyPatch {
    /// Cast the tokens of `assignment` and combine them with the sweep-wide `options`. Fails if
    /// a numeric parameter has a non-numeric token.
    pub fn from_assignment(
        assignment: &Assignment,
        options: &TopologyOptions,
        defaults: &Defaults,
    ) -> Result<Self, failure::Error> {
        let num = |param: Param| -> Result<Option<f64>, failure::Error> {
            match assignment.get(param) {
                Some(token) => Ok(Some(cast_number(param, token)?)),
                None => Ok(None),
            }
        };

        let host = HostPatch {
            core_count: num(Param::CoreCount)?,
            core_speed: num(Param::CoreSpeed)?,
            memory_size: num(Param::MemorySize)?,
            count: num(Param::HostCount)?,
            power_model: if options.flags.contains(TopologyFlags::ADD_POWER_MODEL) {
                options.power_model.clone()
            } else {
                None
            },
        };

        let battery = if options.flags.contains(TopologyFlags::INCLUDE_BATTERY) {
            Some(BatteryPatch {
                capacity: num(Param::BatteryCapacity)?,
                charging_speed: num(Param::ChargingSpeed)?,
                expected_lifetime: num(Param::ExpectedLifetime)?,
                starting_threshold: num(Param::StartingCi)?,
                defaults: *defaults,
            })
        } else {
            None
        };

        Ok(TopologyPatch {
            carbon: assignment
                .get(Param::Carbon)
                .filter(|c| !c.is_empty())
                .map(str::to_owned),
            battery,
            host,
        })
    }
}

impl Patch<Cluster> for TopologyPatch {
    fn apply(&self, cluster: &mut Cluster) {
        if let Some(carbon) = &self.carbon {
            let source = cluster.power_source.get_or_insert_with(PowerSource::default);
            source.carbon_trace_path = Some(format!("{}/{}", CARBON_TRACES_DIR, carbon));
        }

        if let Some(battery) = &self.battery {
            battery.apply(&mut cluster.battery);
        }

        for host in cluster.hosts.iter_mut() {
            self.host.apply(host);
        }
    }
}

impl Patch<Topology> for TopologyPatch {
    fn apply(&self, topology: &mut Topology) {
        for cluster in topology.clusters.iter_mut() {
            self.apply(cluster);
        }
    }
}

/// Apply `patch` to a deep copy of `base`. `base` itself is never modified.
pub fn mutate(base: &Topology, patch: &TopologyPatch) -> Topology {
    let mut topology = base.clone();
    patch.apply(&mut topology);
    topology
}

/// Build a single topology in which the `i`th patch configures the first host of the `i`th
/// cluster. Clusters beyond those of `base` are created from `defaults`. A `None` patch leaves
/// its cluster as it is, but still holds its position.
pub fn mutate_per_cluster(
    base: &Topology,
    patches: &[Option<HostPatch>],
    defaults: &Defaults,
) -> Topology {
    let mut topology = base.clone();

    for (i, patch) in patches.iter().enumerate() {
        if i >= topology.clusters.len() {
            let name = format!("C{}", i + 1);
            topology.clusters.push(Cluster::single_host(&name, defaults));
        }

        let patch = match patch {
            Some(patch) => patch,
            None => continue,
        };

        let cluster = &mut topology.clusters[i];
        if cluster.hosts.is_empty() {
            cluster.hosts.push(Host::from_defaults("H1", defaults));
        }
        patch.apply(&mut cluster.hosts[0]);
    }

    topology
}
