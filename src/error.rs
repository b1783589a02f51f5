// 🚨 Error taxonomy for file-level failures
// Field-level problems (bad timestamps, bad JSON) never reach these types:
// the normalizer absorbs them and logs a warning instead.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to load one input table. Always fatal for the table it names.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{table}: input file not found at {}", path.display())]
    Missing { table: &'static str, path: PathBuf },

    #[error("{table}: failed to read {}: {source}", path.display())]
    Csv {
        table: &'static str,
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{table}: required column `{column}` is missing from the header")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },

    #[error("{table}: line {line}: invalid value `{value}` for column `{column}`")]
    InvalidValue {
        table: &'static str,
        line: u64,
        column: &'static str,
        value: String,
    },
}

impl LoadError {
    /// Name of the table the error refers to
    pub fn table(&self) -> &'static str {
        match self {
            LoadError::Missing { table, .. }
            | LoadError::Csv { table, .. }
            | LoadError::MissingColumn { table, .. }
            | LoadError::InvalidValue { table, .. } => table,
        }
    }
}

/// Failure to write one output table.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to prepare output location {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}
