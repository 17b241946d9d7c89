use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use clap::ValueEnum;
use serde::Deserialize;

use crate::domain::FileType;
use crate::error::RefprepError;
use crate::fs_util;

/// Location of the download catalog inside an extracted `datasets` package.
pub const CATALOG_RELATIVE: &str = "ncbi_dataset/data/dataset_catalog.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum AssemblySource {
    RefSeq,
    GenBank,
    All,
}

impl AssemblySource {
    pub fn as_arg(&self) -> &'static str {
        match self {
            AssemblySource::RefSeq => "RefSeq",
            AssemblySource::GenBank => "GenBank",
            AssemblySource::All => "all",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummaryOptions {
    pub limit: usize,
    pub assembly_source: AssemblySource,
    pub reference_only: bool,
}

/// One assembly row from `datasets summary genome`.
#[derive(Debug, Clone)]
pub struct AssemblySummary {
    pub accession: Option<String>,
    pub organism_name: String,
}

pub trait NcbiDatasets: Send + Sync {
    fn summarize(
        &self,
        taxon: &str,
        options: &SummaryOptions,
    ) -> Result<Vec<AssemblySummary>, RefprepError>;

    /// Run `datasets download genome taxon <name>` inside `species_dir` and
    /// extract the resulting package in place.
    fn download_genome(
        &self,
        taxon: &str,
        include: &[FileType],
        species_dir: &Path,
    ) -> Result<(), RefprepError>;
}

#[derive(Clone)]
pub struct SystemDatasetsClient {
    datasets: Option<PathBuf>,
}

impl SystemDatasetsClient {
    pub fn new() -> Self {
        Self {
            datasets: fs_util::find_in_path("datasets"),
        }
    }

    pub fn tool_version(&self) -> Option<String> {
        let path = self.datasets.as_ref()?;
        let output = Command::new(path).arg("--version").output().ok()?;
        if !output.status.success() {
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() {
            None
        } else {
            Some(stdout)
        }
    }

    fn require_datasets(&self) -> Result<&PathBuf, RefprepError> {
        self.datasets
            .as_ref()
            .ok_or_else(|| RefprepError::MissingTool("datasets".to_string()))
    }

    fn run_capture(&self, args: &[String]) -> Result<String, RefprepError> {
        let datasets = self.require_datasets()?;
        let output = Command::new(datasets)
            .args(args)
            .output()
            .map_err(|err| RefprepError::DatasetsTool(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("datasets exited with {}", output.status)
            } else {
                stderr
            };
            return Err(RefprepError::DatasetsTool(message));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_in_dir(&self, args: &[String], cwd: &Path) -> Result<(), RefprepError> {
        let datasets = self.require_datasets()?;
        let output = Command::new(datasets)
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|err| RefprepError::DatasetsTool(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("datasets exited with {}", output.status)
            } else {
                stderr
            };
            return Err(RefprepError::DatasetsTool(message));
        }
        Ok(())
    }
}

impl Default for SystemDatasetsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl NcbiDatasets for SystemDatasetsClient {
    fn summarize(
        &self,
        taxon: &str,
        options: &SummaryOptions,
    ) -> Result<Vec<AssemblySummary>, RefprepError> {
        let mut args = vec![
            "summary".to_string(),
            "genome".to_string(),
            "taxon".to_string(),
            taxon.to_string(),
            "--assembly-source".to_string(),
            options.assembly_source.as_arg().to_string(),
            "--limit".to_string(),
            options.limit.to_string(),
            "--as-json-lines".to_string(),
        ];
        if options.reference_only {
            args.push("--reference".to_string());
        }
        let stdout = self.run_capture(&args)?;
        parse_summary_lines(&stdout)
    }

    fn download_genome(
        &self,
        taxon: &str,
        include: &[FileType],
        species_dir: &Path,
    ) -> Result<(), RefprepError> {
        fs::create_dir_all(species_dir)
            .map_err(|err| RefprepError::Filesystem(err.to_string()))?;

        let include_arg = include
            .iter()
            .map(|file_type| file_type.include_token())
            .collect::<Vec<_>>()
            .join(",");
        let args = vec![
            "download".to_string(),
            "genome".to_string(),
            "taxon".to_string(),
            taxon.to_string(),
            "--include".to_string(),
            include_arg,
            "--reference".to_string(),
        ];
        self.run_in_dir(&args, species_dir)?;

        let zip_path = species_dir.join("ncbi_dataset.zip");
        if !zip_path.exists() {
            return Err(RefprepError::DatasetsTool(format!(
                "datasets produced no package for {taxon}"
            )));
        }
        fs_util::extract_zip(&zip_path, species_dir)?;
        fs::remove_file(&zip_path).map_err(|err| RefprepError::Filesystem(err.to_string()))?;

        if !species_dir.join(CATALOG_RELATIVE).exists() {
            return Err(RefprepError::DatasetsTool(format!(
                "package for {taxon} is missing its dataset catalog"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SummaryRecord {
    #[serde(default)]
    accession: Option<String>,
    #[serde(default)]
    organism: Option<OrganismRecord>,
}

#[derive(Debug, Deserialize)]
struct OrganismRecord {
    #[serde(default)]
    organism_name: Option<String>,
}

pub fn parse_summary_lines(stdout: &str) -> Result<Vec<AssemblySummary>, RefprepError> {
    let mut summaries = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: SummaryRecord =
            serde_json::from_str(line).map_err(|err| RefprepError::SummaryParse(err.to_string()))?;
        let Some(name) = record.organism.and_then(|organism| organism.organism_name) else {
            continue;
        };
        let name = name.replace(['\'', '[', ']'], "");
        summaries.push(AssemblySummary {
            accession: record.accession,
            organism_name: name,
        });
    }
    Ok(summaries)
}

#[derive(Debug, Deserialize)]
pub struct DatasetCatalog {
    #[serde(default)]
    pub assemblies: Vec<CatalogAssembly>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogAssembly {
    #[serde(default)]
    pub accession: Option<String>,
    #[serde(default)]
    pub files: Vec<CatalogFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogFile {
    pub file_path: String,
    pub file_type: String,
}

fn catalog_file_type(value: &str) -> Option<FileType> {
    match value {
        "GENOMIC_NUCLEOTIDE_FASTA" => Some(FileType::Genome),
        "GTF" => Some(FileType::Gtf),
        "GFF3" => Some(FileType::Gff3),
        "RNA_NUCLEOTIDE_FASTA" => Some(FileType::Rna),
        "PROTEIN_FASTA" => Some(FileType::Protein),
        "CDS_NUCLEOTIDE_FASTA" => Some(FileType::Cds),
        "SEQUENCE_REPORT" => Some(FileType::SeqReport),
        _ => None,
    }
}

/// Check a previously extracted package against the requested file types.
///
/// Returns `Some(paths)` when every requested type is satisfied: either its
/// file is on disk, or the catalog does not list it at all (no annotation
/// exists for the assembly, so there is nothing left to download). Returns
/// `None` when a listed file is missing or no catalog has been written yet.
pub fn existing_download(
    species_dir: &Path,
    include: &[FileType],
) -> Result<Option<Vec<PathBuf>>, RefprepError> {
    let catalog_path = species_dir.join(CATALOG_RELATIVE);
    if !catalog_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&catalog_path)
        .map_err(|err| RefprepError::Filesystem(err.to_string()))?;
    let catalog: DatasetCatalog = serde_json::from_str(&content)
        .map_err(|err| RefprepError::Filesystem(format!("bad dataset catalog: {err}")))?;

    let Some(assembly) = catalog
        .assemblies
        .iter()
        .find(|assembly| assembly.accession.is_some())
    else {
        return Ok(None);
    };

    let data_root = species_dir.join("ncbi_dataset").join("data");
    let mut by_type: HashMap<FileType, PathBuf> = HashMap::new();
    for file in &assembly.files {
        if let Some(file_type) = catalog_file_type(&file.file_type) {
            by_type.insert(file_type, data_root.join(&file.file_path));
        }
    }

    let mut present = Vec::new();
    for file_type in include {
        match by_type.get(file_type) {
            Some(path) if path.exists() => present.push(path.clone()),
            Some(_) => return Ok(None),
            None => {
                tracing::info!(
                    species_dir = %species_dir.display(),
                    file_type = %file_type,
                    "file type not listed in dataset catalog; assembly has no such annotation"
                );
            }
        }
    }
    Ok(Some(present))
}
