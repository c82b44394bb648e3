pub mod config;
pub mod graph;
pub mod grouping;
pub mod histogram;
pub mod maps;
pub mod pipeline;
pub mod thresholds;
pub mod validate;

#[derive(Debug)]
pub enum Error {
    /// A spectrum reported more than one assumption set for the same search
    /// engine - the importer has broken the identification graph contract.
    DuplicateEngineMatch { spectrum: String, engine: u32 },
    /// A probability/validation record that must exist at this stage of the
    /// pipeline is missing. This is a logic error, not a data problem.
    MissingRecord { level: MatchLevel, index: usize },
    /// A calibrated probability was requested for a score that was never
    /// inserted into the input map.
    MissingCalibration { engine: u32 },
    /// Structural inconsistency encountered while resolving protein groups.
    GroupResolution(String),
    Json(serde_json::Error),
    Io(std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchLevel {
    Spectrum,
    Peptide,
    Protein,
}

impl std::fmt::Display for MatchLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spectrum => f.write_str("spectrum"),
            Self::Peptide => f.write_str("peptide"),
            Self::Protein => f.write_str("protein"),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateEngineMatch { spectrum, engine } => write!(
                f,
                "spectrum `{}` has multiple matches for search engine {}",
                spectrum, engine
            ),
            Self::MissingRecord { level, index } => {
                write!(f, "missing {} record at index {}", level, index)
            }
            Self::MissingCalibration { engine } => {
                write!(f, "no calibrated probability for search engine {}", engine)
            }
            Self::GroupResolution(msg) => write!(f, "protein group resolution: {}", msg),
            Self::Json(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl Error {
    /// Data-consistency violations are recoverable: the pipeline logs them and
    /// continues with the previously computed state. Everything else is fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DuplicateEngineMatch { .. } | Self::GroupResolution(_)
        )
    }
}

/// Read validation settings (or any other JSON-encoded value) from disk.
pub fn read_json<P, T>(path: P) -> Result<T, Error>
where
    P: AsRef<std::path::Path>,
    T: for<'de> serde::Deserialize<'de>,
{
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
