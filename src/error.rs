use thiserror::Error;

/// Erreurs de configuration : seule catégorie d'erreur « dure » du moteur.
/// L'échappement, le non-échappement et l'annulation ne sont pas des erreurs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("limb count must be between 1 and {max}, got {got}")]
    InvalidLimbCount { got: usize, max: usize },

    #[error("bits before the binary point must be between 2 and 31, got {0}")]
    InvalidBitsBeforeBinaryPoint(u8),

    #[error("block width {0} is not a multiple of 8 lanes")]
    BlockWidthNotLaneAligned(usize),

    #[error("block size {width}x{height} is empty")]
    EmptyBlock { width: usize, height: usize },

    #[error("value needs {bits} integer bits but the format holds {available}")]
    ValueOutOfRange { bits: i64, available: u32 },

    #[error("threshold {threshold} does not fit below 2^{max_exponent}")]
    ThresholdOutOfRange { threshold: u32, max_exponent: u32 },

    #[error("target iterations {0} exceeds {max}", max = crate::generator::request::MAX_TARGET_ITERATIONS)]
    TargetIterationsOutOfRange(u32),

    #[error("increasing iterations requested without previous {0}")]
    MissingResumeData(&'static str),

    #[error("{what}: expected {expected}, got {got}")]
    Mismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("cannot parse coordinate {input:?}: {reason}")]
    InvalidCoordinate { input: String, reason: String },
}

/// Erreurs de l'application (fichiers de configuration, sorties JSON).
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid json in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T, E = ConfigurationError> = std::result::Result<T, E>;
