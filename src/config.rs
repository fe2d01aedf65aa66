//! The YAML config file.
//!
//! One file drives the whole pipeline: where the data store lives, which
//! runs exist, and the `create` and `merge` sections for the two pipeline
//! stages. [`Config::default`] is a working starting point that the `new`
//! subcommand writes out for editing.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::create::CreateConfig;
use crate::error::ConfigError;
use crate::handle::{current_user, ImasHandle};
use crate::merge::{MergeConfig, MergeStep};
use crate::ops::{OperationDim, Operator};
use crate::samplers::Sampler;
use crate::storage::{open_store, IdsStore, StoreKind};

fn default_runs_file() -> PathBuf {
    PathBuf::from("runs.yaml")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root directory of the data store.
    pub imasdb: PathBuf,
    #[serde(default)]
    pub store: StoreKind,
    /// Manifest written by `create` and read by `merge`.
    #[serde(default = "default_runs_file")]
    pub runs_file: PathBuf,
    /// Variables listing for the `variables` subcommand.
    #[serde(default)]
    pub variables: Option<PathBuf>,
    #[serde(default)]
    pub create: Option<CreateConfig>,
    #[serde(default)]
    pub merge: Option<MergeConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_yaml::to_string(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(create) = &self.create {
            create.validate()?;
        }
        if let Some(merge) = &self.merge {
            merge.validate()?;
        }
        Ok(())
    }

    pub fn open_store(&self) -> Box<dyn IdsStore> {
        open_store(self.store, &self.imasdb)
    }
}

impl Default for Config {
    fn default() -> Self {
        let template = ImasHandle {
            user: current_user(),
            db: "jet".to_string(),
            shot: 92436,
            run: 1,
        };
        Config {
            imasdb: PathBuf::from("./imasdb"),
            store: StoreKind::Hdf5,
            runs_file: default_runs_file(),
            variables: None,
            create: Some(CreateConfig {
                template: template.clone(),
                dimensions: vec![
                    OperationDim {
                        ids: "core_profiles".to_string(),
                        variable: "profiles_1d/0/t_i_average".to_string(),
                        operator: Operator::Multiply,
                        values: vec![1.1, 1.2, 1.3],
                    },
                    OperationDim {
                        ids: "core_profiles".to_string(),
                        variable: "profiles_1d/0/zeff".to_string(),
                        operator: Operator::Add,
                        values: vec![0.01, 0.02, 0.03],
                    },
                ],
                sampler: Sampler::CartesianProduct,
                run_start: 100,
                db: None,
            }),
            merge: Some(MergeConfig {
                template: template.clone(),
                output: template.with_run(2),
                extrapolate: Default::default(),
                plan: vec![MergeStep {
                    ids: "core_profiles".to_string(),
                    time: "time".to_string(),
                    grid: "profiles_1d/*/grid/rho_tor_norm".to_string(),
                    variables: vec!["profiles_1d/*/t_i_average".to_string()],
                }],
                summary: None,
            }),
        }
    }
}
