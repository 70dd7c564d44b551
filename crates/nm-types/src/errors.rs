use thiserror::Error;

/// Main error type for the architecture search core
#[derive(Error, Debug)]
pub enum NmError {
    #[error("Architecture error: {0}")]
    Architecture(#[from] ArchitectureError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Experiment error: {0}")]
    Experiment(#[from] ExperimentError),

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NmError {
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}

/// Encoding, decoding and layout contract violations of architecture vectors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArchitectureError {
    #[error("{parameter} value {value} is outside bounds [{low}, {high}]")]
    OutOfBounds {
        parameter: String,
        value: f64,
        low: f64,
        high: f64,
    },

    #[error("Invalid {parameter} value: {value}, must be one of {choices:?}")]
    InvalidChoice {
        parameter: String,
        value: String,
        choices: Vec<String>,
    },

    #[error("Invalid value for {parameter}: {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Malformed architecture vector: {message}")]
    Malformed { message: String },

    #[error("Mutation rate must lie in [0, 1], got {rate}")]
    InvalidRate { rate: f64 },

    #[error("Invalid search space: {message}")]
    InvalidSpace { message: String },
}

/// Search strategy errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("Search space exhausted: {message}")]
    SpaceExhausted { message: String },

    #[error("Acquisition optimization failed: {message}")]
    Optimization { message: String },

    #[error("Unsupported {setting}: {value}")]
    UnsupportedConfiguration { setting: String, value: String },
}

/// Code generation collaborator errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Code generation failed after {attempts} attempt(s): {message}")]
    Failed { attempts: u32, message: String },
}

/// Execution sandbox collaborator errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    #[error("Sandbox creation failed: {message}")]
    CreateFailed { message: String },

    #[error("Sandbox run failed: {diagnostics}")]
    RunFailed { diagnostics: String },

    #[error("Sandbox cleanup failed for {handle}: {message}")]
    CleanupFailed { handle: String, message: String },
}

/// Persistence and snapshot collaborator errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Failed to save run {architecture_id}: {message}")]
    SaveFailed {
        architecture_id: String,
        message: String,
    },

    #[error("Failed to snapshot code: {message}")]
    SnapshotFailed { message: String },
}

/// Named experiment lifecycle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExperimentError {
    #[error("Experiment already scheduled: {experiment_id}")]
    AlreadyScheduled { experiment_id: String },

    #[error("Experiment not found: {experiment_id}")]
    NotFound { experiment_id: String },

    #[error("Experiment {experiment_id} stopped by request")]
    Cancelled { experiment_id: String },
}

/// Result type alias for architecture search operations
pub type NmResult<T> = Result<T, NmError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::NmError::Config(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::NmError::Internal(format!($($arg)*))
    };
}
