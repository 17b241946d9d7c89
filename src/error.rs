use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RefprepError {
    #[error("invalid release: {0}")]
    InvalidRelease(String),

    #[error("invalid species name: {0}")]
    InvalidSpecies(String),

    #[error("invalid assembly accession: {0}")]
    InvalidAccession(String),

    #[error("file type {file_type} is not available from {source_name}")]
    UnsupportedFileType {
        source_name: String,
        file_type: String,
    },

    #[error("Ensembl request failed: {0}")]
    EnsemblHttp(String),

    #[error("Ensembl returned status {status}: {message}")]
    EnsemblStatus { status: u16, message: String },

    #[error("no species matched search term: {0}")]
    NoSpeciesMatched(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("datasets command failed: {0}")]
    DatasetsTool(String),

    #[error("failed to parse datasets summary output: {0}")]
    SummaryParse(String),

    #[error("failed to read manifest at {}", .0.display())]
    ManifestRead(PathBuf),

    #[error("failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("pipeline exited with status {status}")]
    PipelineFailed { status: i32 },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
