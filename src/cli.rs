//! Some routines for adding common CLI options in a consistent, less boilerplatey way.

/// The `--root` option shared by every subcommand.
pub mod workspace {
    use clap::{App, Arg, ArgMatches};

    use crate::Workspace;

    pub fn add_cli_options<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
        app.arg(
            Arg::with_name("ROOT")
                .long("root")
                .takes_value(true)
                .help("The workspace root (defaults to the current directory)."),
        )
    }

    pub fn parse_cli_options(sub_m: &ArgMatches<'_>) -> Workspace {
        Workspace::new(sub_m.value_of("ROOT").unwrap_or("."))
    }
}

/// One `--<param>` option per sweep parameter, each taking a value list such as `8,16`,
/// `1000-3000:500` or `4+8-16:4`.
pub mod sweep_values {
    use clap::{App, Arg, ArgMatches};

    use crate::{
        param::Param,
        parse::parse_input,
        sweep::ValueLists,
    };

    use super::validator;

    pub fn add_cli_options<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
        Param::ALL.iter().fold(app, |app, param| {
            app.arg(
                Arg::with_name(param.name())
                    .long(param.name())
                    .takes_value(true)
                    .allow_hyphen_values(true)
                    .validator(validator::value_list)
                    .help(help(*param)),
            )
        })
    }

    /// Parse the value lists of every parameter given on the command line.
    pub fn parse_cli_options(sub_m: &ArgMatches<'_>) -> ValueLists {
        let mut lists = ValueLists::new();
        for param in Param::ALL.iter() {
            if let Some(input) = sub_m.value_of(param.name()) {
                lists.insert(*param, parse_input(input));
            }
        }
        lists
    }

    fn help(param: Param) -> &'static str {
        match param {
            Param::CoreCount => "Cores per host (e.g. 8,16 or 8-32:8).",
            Param::CoreSpeed => "Core speed in MHz.",
            Param::MemorySize => "Memory per host in MiB.",
            Param::HostCount => "Number of hosts of each kind.",
            Param::Carbon => "Carbon traces, as file names under carbon_traces/.",
            Param::BatteryCapacity => "Battery capacity in kWh. Requires --battery.",
            Param::StartingCi => "Carbon intensity above which the battery discharges.",
            Param::ChargingSpeed => "Charging speed as a fraction of the capacity per hour.",
            Param::ExpectedLifetime => "Expected battery lifetime in years.",
        }
    }
}

/// Validators for `clap` arguments. They only check the shape of a value; the value is parsed
/// again when the arguments are read.
pub mod validator {
    use std::str::FromStr;

    use crate::{experiment::PolicySpec, param::parse_pair, parse::parse_input};

    /// The value parses as a `T`.
    pub fn is<T: FromStr>(s: String) -> Result<(), String>
    where
        T::Err: std::fmt::Debug,
    {
        s.as_str()
            .parse::<T>()
            .map(|_| ())
            .map_err(|e| format!("{:?}", e))
    }

    /// The value is a value list that yields at least one token.
    pub fn value_list(s: String) -> Result<(), String> {
        if parse_input(&s).is_empty() {
            Err(format!("\"{}\" does not contain any values", s))
        } else {
            Ok(())
        }
    }

    /// The value is a pair of parameter names, e.g. `battery_capacity,charging_speed`.
    pub fn param_pair(s: String) -> Result<(), String> {
        parse_pair(&s).map(|_| ()).map_err(|e| e.to_string())
    }

    /// The value is a prefab allocation policy.
    pub fn policy(s: String) -> Result<(), String> {
        s.parse::<PolicySpec>()
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

}
