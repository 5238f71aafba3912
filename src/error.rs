//! The errors that get a name of their own. Everything else is a plain `failure::Error` with some
//! context attached.

use std::path::Path;

use failure_derive::Fail;

#[derive(Debug, Fail)]
pub enum CapsuleError {
    /// The base document of a sweep could not be read or parsed. Fatal to the whole sweep.
    #[fail(display = "Failed to load template {}: {}", path, reason)]
    TemplateLoad { path: String, reason: String },

    /// A sweep token could not be cast to the type its parameter needs.
    #[fail(display = "Invalid value {:?} for {}", token, param)]
    BadToken { param: String, token: String },

    /// A generated document could not be written.
    #[fail(display = "Error saving {}: {}", path, reason)]
    Save { path: String, reason: String },

    /// The simulator launcher does not exist where the workspace says it should.
    #[fail(display = "Runner not found at {}", path)]
    MissingRunner { path: String },

    /// An experiment passed to `run`/`validate`/`bundle` does not exist.
    #[fail(display = "Experiment file not found at {}", path)]
    MissingExperiment { path: String },
}

impl CapsuleError {
    pub fn template_load<E: std::fmt::Display>(path: &Path, err: E) -> Self {
        CapsuleError::TemplateLoad {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    pub fn save<E: std::fmt::Display>(path: &Path, err: E) -> Self {
        CapsuleError::Save {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}
