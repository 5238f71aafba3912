//! There are some settings that are per-workspace, rather than per-invocation (e.g. the hardware
//! defaults used when a topology has to be made up from nothing). We keep these settings in a
//! per-workspace file called `capsule-settings.json`.
//!
//! The file is a flat map from setting name to the JSON serialization of its value, so each
//! setting can have its own type.

use std::collections::BTreeMap;
use std::fs;

use clap::clap_app;

use failure::ResultExt;

use log::info;

use serde::{Deserialize, Serialize};

use crate::{cli, paths::SETTINGS_FILE, topology::Defaults, Workspace};

/// Hardware defaults (a `Defaults` object).
pub const DEFAULTS: &str = "defaults";

/// The simulator version recorded in generated READMEs.
pub const SIMULATOR_VERSION: &str = "simulator_version";

pub type Settings = BTreeMap<String, String>;

/// Return all settings of the workspace. A missing or empty file means no settings.
pub fn get_settings(workspace: &Workspace) -> Result<Settings, failure::Error> {
    let path = workspace.resolve(SETTINGS_FILE);

    if !path.exists() {
        return Ok(Settings::new());
    }

    let contents =
        fs::read_to_string(&path).with_context(|_| format!("reading {}", path.display()))?;
    let contents = contents.trim();

    if contents.is_empty() {
        Ok(Settings::new())
    } else {
        Ok(serde_json::from_str(contents)
            .with_context(|_| format!("deserializing {}", path.display()))?)
    }
}

/// Returns the value of the given setting if it is set.
pub fn get_setting<'s, 'd, V: Deserialize<'d>>(
    settings: &'s Settings,
    setting: &str,
) -> Result<Option<V>, failure::Error>
where
    's: 'd,
{
    if let Some(setting) = settings.get(setting) {
        Ok(Some(
            serde_json::from_str(setting).context("deserializing workspace settings")?,
        ))
    } else {
        Ok(None)
    }
}

/// Sets the given setting or overwrites its current value.
pub fn set_setting<V: Serialize>(
    workspace: &Workspace,
    setting: &str,
    value: V,
) -> Result<(), failure::Error> {
    // We don't care too much about efficiency, so whenever we update, we will just read,
    // deserialize, update, and reserialize.
    let mut settings = get_settings(workspace)?;

    let serialized = serde_json::to_string(&value)?;
    settings.insert(setting.into(), serialized);

    let path = workspace.resolve(SETTINGS_FILE);
    fs::write(&path, serde_json::to_string_pretty(&settings)?)
        .with_context(|_| format!("writing {}", path.display()))?;

    Ok(())
}

/// The hardware defaults of the workspace, falling back to the built-in ones.
pub fn defaults(settings: &Settings) -> Result<Defaults, failure::Error> {
    Ok(get_setting(settings, DEFAULTS)?.unwrap_or_default())
}

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { settings =>
        (about: "List the workspace settings, or set one. Values are JSON; a value that is not \
                 valid JSON is stored as a string.")
        (@setting DisableVersion)
        (@arg KEY: +takes_value "The setting to set (e.g. defaults).")
        (@arg VALUE: +takes_value requires[KEY]
         "The new value (e.g. '{\"core_count\": 32}').")
    };

    cli::workspace::add_cli_options(app)
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let workspace = cli::workspace::parse_cli_options(sub_m);

    match (sub_m.value_of("KEY"), sub_m.value_of("VALUE")) {
        (Some(key), Some(value)) => {
            let value: serde_json::Value = serde_json::from_str(value)
                .unwrap_or_else(|_| serde_json::Value::String(value.into()));

            // Refuse values that would make every later sweep fail.
            if key == DEFAULTS {
                serde_json::from_value::<Defaults>(value.clone())
                    .context("the defaults setting must be a Defaults object")?;
            }

            set_setting(&workspace, key, &value)?;
            info!("Set {} = {}", key, value);
        }

        (Some(key), None) => {
            let settings = get_settings(&workspace)?;
            match settings.get(key) {
                Some(value) => println!("{}", value),
                None => println!("{} is not set", key),
            }
        }

        _ => {
            let settings = get_settings(&workspace)?;
            for (key, value) in settings.iter() {
                println!("{} = {}", key, value);
            }
            println!(
                "effective defaults = {}",
                serde_json::to_string(&defaults(&settings)?)?
            );
        }
    }

    Ok(())
}
