// ⚙️ Pipeline configuration
//
// Input/output locations, loaded from an optional JSON file. Every key has a
// default, so a config file only needs to list what it changes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputPaths {
    pub dim_branch: PathBuf,
    pub dim_user: PathBuf,
    pub fct_credit_pack_purchases: PathBuf,
    pub fct_membership_purchases: PathBuf,

    /// Part-2 fallback file; `null` disables the merge
    pub fct_client_conversion_events_part_2: Option<PathBuf>,
}

impl Default for InputPaths {
    fn default() -> Self {
        InputPaths {
            dim_branch: PathBuf::from("data/dim_branch.csv"),
            dim_user: PathBuf::from("data/dim_user.csv"),
            fct_credit_pack_purchases: PathBuf::from("data/fct_credit_pack_purchases.csv"),
            fct_membership_purchases: PathBuf::from("data/fct_membership_purchases.csv"),
            fct_client_conversion_events_part_2: Some(PathBuf::from(
                "data/fct_client_conversion_events_part_2.csv",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputPaths {
    pub fct_client_conversion_events: PathBuf,
    pub fct_lead_conversions: PathBuf,
}

impl Default for OutputPaths {
    fn default() -> Self {
        OutputPaths {
            fct_client_conversion_events: PathBuf::from("outputs/fct_client_conversion_events.csv"),
            fct_lead_conversions: PathBuf::from("outputs/fct_lead_conversions.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input_paths: InputPaths,
    pub output_paths: OutputPaths,

    /// Log file written alongside stdout (truncated each run)
    pub log_file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            input_paths: InputPaths::default(),
            output_paths: OutputPaths::default(),
            log_file: Some(PathBuf::from("data_processing.log")),
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Config from `path` when given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}
