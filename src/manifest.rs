use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::AssemblyAccession;
use crate::error::RefprepError;
use crate::fs_util;

const FASTA_SUFFIXES: &[&str] = &[".fa", ".fasta", ".fna", ".fa.gz", ".fasta.gz", ".fna.gz"];
const GTF_SUFFIXES: &[&str] = &[".gtf", ".gtf.gz"];

/// One assets row consumed by nf-core/references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub genome: String,
    pub species: String,
    pub source: String,
    pub fasta: Utf8PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtf: Option<Utf8PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// Emit entries without a GTF instead of omitting the species.
    pub allow_missing_gtf: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedSpecies {
    pub species: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub entries: Vec<ManifestEntry>,
    pub skipped: Vec<SkippedSpecies>,
}

/// Scan download trees and build manifest entries.
///
/// The Ensembl tree is `<root>/<division>/<species>/`, the NCBI tree is
/// `<root>/<species>/`. Species without a FASTA are always skipped; species
/// without a GTF are skipped unless `allow_missing_gtf` is set.
pub fn scan(
    ensembl_dir: Option<&Path>,
    ncbi_dir: Option<&Path>,
    options: ScanOptions,
) -> Result<ScanOutcome, RefprepError> {
    let mut outcome = ScanOutcome::default();

    if let Some(root) = ensembl_dir {
        for division_dir in subdirectories(root)? {
            let division = dir_name(&division_dir);
            for species_dir in subdirectories(&division_dir)? {
                let source = format!("ensembl_{division}");
                scan_species_dir(&species_dir, &source, options, &mut outcome)?;
            }
        }
    }

    if let Some(root) = ncbi_dir {
        for species_dir in subdirectories(root)? {
            let source = ncbi_source(&species_dir);
            scan_species_dir(&species_dir, &source, options, &mut outcome)?;
        }
    }

    outcome.entries.sort_by(|a, b| a.genome.cmp(&b.genome));
    outcome.skipped.sort_by(|a, b| a.species.cmp(&b.species));
    Ok(outcome)
}

fn scan_species_dir(
    species_dir: &Path,
    source: &str,
    options: ScanOptions,
    outcome: &mut ScanOutcome,
) -> Result<(), RefprepError> {
    let species = dir_name(species_dir);

    let Some(fasta) = fs_util::find_first_with_suffixes(species_dir, FASTA_SUFFIXES) else {
        tracing::warn!(species = %species, dir = %species_dir.display(), "no FASTA found; skipping");
        outcome.skipped.push(SkippedSpecies {
            species,
            reason: "missing fasta".to_string(),
        });
        return Ok(());
    };

    let gtf = fs_util::find_first_with_suffixes(species_dir, GTF_SUFFIXES);
    if gtf.is_none() && !options.allow_missing_gtf {
        tracing::warn!(species = %species, dir = %species_dir.display(), "no GTF found; skipping");
        outcome.skipped.push(SkippedSpecies {
            species,
            reason: "missing gtf".to_string(),
        });
        return Ok(());
    }

    let readmes = fs_util::find_with_suffixes(species_dir, &["readme", "readme.md", "readme.txt"]);
    let readme = if readmes.is_empty() {
        None
    } else {
        Some(
            readmes
                .iter()
                .map(|path| absolute(path).into_string())
                .collect::<Vec<_>>()
                .join(","),
        )
    };

    outcome.entries.push(ManifestEntry {
        genome: species.clone(),
        species,
        source: source.to_string(),
        fasta: absolute(&fasta),
        gtf: gtf.as_deref().map(absolute),
        readme,
    });
    Ok(())
}

fn ncbi_source(species_dir: &Path) -> String {
    // The accession directory sits under ncbi_dataset/data/ in extracted
    // packages; fall back to plain "ncbi" for hand-placed trees.
    let data_dir = species_dir.join("ncbi_dataset").join("data");
    let accession = subdirectories(&data_dir)
        .ok()
        .and_then(|dirs| dirs.into_iter().next())
        .and_then(|dir| dir_name(&dir).parse::<AssemblyAccession>().ok());
    match accession {
        Some(accession) => format!("ncbi_{accession}"),
        None => "ncbi".to_string(),
    }
}

pub fn write_manifest(entries: &[ManifestEntry], path: &Path) -> Result<(), RefprepError> {
    let yaml = serde_yaml::to_string(entries)
        .map_err(|err| RefprepError::ManifestParse(err.to_string()))?;
    let stamped = format!(
        "# generated by refprep {} on {}\n{yaml}",
        env!("CARGO_PKG_VERSION"),
        chrono::Utc::now().to_rfc3339(),
    );
    fs_util::write_bytes_atomic(path, stamped.as_bytes())
}

pub fn read_manifest(path: &Path) -> Result<Vec<ManifestEntry>, RefprepError> {
    let content =
        fs::read_to_string(path).map_err(|_| RefprepError::ManifestRead(path.to_path_buf()))?;
    serde_yaml::from_str(&content).map_err(|err| RefprepError::ManifestParse(err.to_string()))
}

fn subdirectories(root: &Path) -> Result<Vec<PathBuf>, RefprepError> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    let entries = fs::read_dir(root).map_err(|err| RefprepError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| RefprepError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn absolute(path: &Path) -> Utf8PathBuf {
    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    Utf8PathBuf::from_path_buf(resolved)
        .unwrap_or_else(|fallback| Utf8PathBuf::from(fallback.to_string_lossy().into_owned()))
}
