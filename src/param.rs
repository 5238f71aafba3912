//! The vocabulary of sweepable topology parameters.

use std::fmt;
use std::str::FromStr;

/// A topology parameter that can be swept over. The declaration order is the order parameters
/// are combined in, which keeps every sweep deterministic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Param {
    CoreCount,
    CoreSpeed,
    MemorySize,
    /// Number of hosts (the `count` of each host entry).
    HostCount,
    /// A carbon trace file name under `carbon_traces/`.
    Carbon,
    BatteryCapacity,
    /// The carbon-intensity threshold a new battery policy starts from.
    StartingCi,
    /// Charging speed as a multiple of the battery capacity.
    ChargingSpeed,
    ExpectedLifetime,
}

impl Param {
    pub const ALL: [Param; 9] = [
        Param::CoreCount,
        Param::CoreSpeed,
        Param::MemorySize,
        Param::HostCount,
        Param::Carbon,
        Param::BatteryCapacity,
        Param::StartingCi,
        Param::ChargingSpeed,
        Param::ExpectedLifetime,
    ];

    /// The name used on the command line and in logs.
    pub fn name(self) -> &'static str {
        match self {
            Param::CoreCount => "core_count",
            Param::CoreSpeed => "core_speed",
            Param::MemorySize => "memory_size",
            Param::HostCount => "NoH",
            Param::Carbon => "carbon",
            Param::BatteryCapacity => "battery_capacity",
            Param::StartingCi => "starting_CI",
            Param::ChargingSpeed => "charging_speed",
            Param::ExpectedLifetime => "expected_lifetime",
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Param {
    type Err = failure::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Param::ALL
            .iter()
            .copied()
            .find(|p| p.name() == s)
            .ok_or_else(|| failure::format_err!("Unknown parameter \"{}\"", s))
    }
}

/// Parse a pair of parameters written as `a,b` (e.g. `battery_capacity,charging_speed`).
pub fn parse_pair(s: &str) -> Result<(Param, Param), failure::Error> {
    let mut parts = s.split(',');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) => Ok((a.parse()?, b.parse()?)),
        _ => Err(failure::format_err!(
            "A pair must name exactly two parameters, got \"{}\"",
            s
        )),
    }
}
