use std::fs;
use std::path::PathBuf;

use rayon::prelude::*;
use serde::Serialize;

use crate::domain::{Division, FileType, Release, SearchTerm};
use crate::ensembl::{self, EnsemblClient, EnsemblSpecies};
use crate::error::RefprepError;
use crate::fs_util;
use crate::genomes_config;
use crate::manifest::{self, ScanOptions, SkippedSpecies};
use crate::ncbi::{self, AssemblySource, NcbiDatasets, SummaryOptions};
use crate::pipeline::{PipelineInvocation, PipelineRunner};

#[derive(Debug, Clone)]
pub struct EnsemblFetchOptions {
    pub search: SearchTerm,
    pub division: Division,
    pub release: Release,
    pub file_types: Vec<FileType>,
    pub dna_file_ext: String,
    pub processes: usize,
    pub list_only: bool,
    pub force: bool,
    pub outdir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct NcbiFetchOptions {
    /// Explicit organism names; discovery is skipped when non-empty.
    pub species: Vec<String>,
    pub search: String,
    /// Accepted taxonomic divisions; each is queried as its own taxon and
    /// the search term then filters the merged organism list.
    pub divisions: Vec<String>,
    pub limit: usize,
    pub assembly_source: AssemblySource,
    pub reference_only: bool,
    pub file_types: Vec<FileType>,
    pub processes: usize,
    pub max_attempts: usize,
    pub force: bool,
    pub outdir: PathBuf,
    pub species_list_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ManifestOptions {
    pub ensembl_dir: Option<PathBuf>,
    pub ncbi_dir: Option<PathBuf>,
    pub output: PathBuf,
    pub allow_missing_gtf: bool,
}

#[derive(Debug, Clone)]
pub struct GenomesConfigOptions {
    pub manifest: PathBuf,
    pub results_dir: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub source: String,
    pub items: Vec<DownloadItem>,
}

impl DownloadReport {
    pub fn failed(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.error.is_some())
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadItem {
    pub species: String,
    pub action: String,
    pub paths: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestReport {
    pub path: String,
    pub entries: usize,
    pub skipped: Vec<SkippedSpecies>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub outdir: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigReport {
    pub path: String,
    pub genomes: Vec<String>,
    pub excluded: Vec<String>,
}

#[derive(Clone)]
pub struct App<E: EnsemblClient, N: NcbiDatasets, P: PipelineRunner> {
    ensembl: E,
    ncbi: N,
    pipeline: P,
}

impl<E: EnsemblClient, N: NcbiDatasets, P: PipelineRunner> App<E, N, P> {
    pub fn new(ensembl: E, ncbi: N, pipeline: P) -> Self {
        Self {
            ensembl,
            ncbi,
            pipeline,
        }
    }

    pub fn fetch_ensembl(
        &self,
        options: EnsemblFetchOptions,
    ) -> Result<DownloadReport, RefprepError> {
        for file_type in &options.file_types {
            if !matches!(file_type, FileType::Genome | FileType::Gtf) {
                return Err(RefprepError::UnsupportedFileType {
                    source_name: "ensembl".to_string(),
                    file_type: file_type.to_string(),
                });
            }
        }

        let release = self
            .ensembl
            .resolve_release(options.division, options.release)?;
        tracing::info!(division = %options.division, release, "resolved Ensembl release");

        let species = self.ensembl.list_species(options.division)?;
        let selected: Vec<EnsemblSpecies> = species
            .into_iter()
            .filter(|record| matches_species(&options.search, record.name.as_str()))
            .collect();
        if selected.is_empty() {
            return Err(RefprepError::NoSpeciesMatched(options.search.to_string()));
        }
        tracing::info!(matched = selected.len(), "selected species");

        if options.list_only {
            let items = selected
                .iter()
                .map(|record| DownloadItem {
                    species: record.name.to_string(),
                    action: "listed".to_string(),
                    paths: Vec::new(),
                    error: None,
                })
                .collect();
            return Ok(DownloadReport {
                source: "ensembl".to_string(),
                items,
            });
        }

        let pool = worker_pool(options.processes)?;
        let items = pool.install(|| {
            selected
                .par_iter()
                .map(|record| self.fetch_one_ensembl(record, release, &options))
                .collect::<Vec<_>>()
        });

        Ok(DownloadReport {
            source: "ensembl".to_string(),
            items,
        })
    }

    fn fetch_one_ensembl(
        &self,
        record: &EnsemblSpecies,
        release: u32,
        options: &EnsemblFetchOptions,
    ) -> DownloadItem {
        let species_dir = options
            .outdir
            .join(options.division.to_string())
            .join(record.name.as_str());

        let mut paths = Vec::new();
        let mut downloaded_any = false;
        for file_type in &options.file_types {
            let (file_name, url) = match file_type {
                FileType::Genome => {
                    let label = ensembl::assembly_file_label(&record.assembly);
                    let name = format!(
                        "{}.{}.{}",
                        record.name.file_stem(),
                        label,
                        options.dna_file_ext
                    );
                    let url = ensembl::fasta_url(
                        options.division,
                        release,
                        &record.name,
                        &record.assembly,
                        &options.dna_file_ext,
                    );
                    (name, url)
                }
                FileType::Gtf => {
                    let label = ensembl::assembly_file_label(&record.assembly);
                    let name = format!("{}.{}.{}.gtf.gz", record.name.file_stem(), label, release);
                    let url = ensembl::gtf_url(
                        options.division,
                        release,
                        &record.name,
                        &record.assembly,
                    );
                    (name, url)
                }
                // Rejected upfront in fetch_ensembl.
                _ => continue,
            };

            let target = species_dir.join(&file_name);
            if target.exists() && !options.force {
                tracing::info!(species = %record.name, file = %file_name, "already downloaded; skipping");
                paths.push(target.to_string_lossy().into_owned());
                continue;
            }

            tracing::info!(species = %record.name, url = %url, "downloading");
            match self.ensembl.download_file(&url, &target) {
                Ok(()) => {
                    downloaded_any = true;
                    paths.push(target.to_string_lossy().into_owned());
                }
                Err(err) => {
                    tracing::warn!(species = %record.name, error = %err, "download failed");
                    fs_util::remove_dir_if_empty(&species_dir);
                    return DownloadItem {
                        species: record.name.to_string(),
                        action: "failed".to_string(),
                        paths,
                        error: Some(err.to_string()),
                    };
                }
            }
        }

        DownloadItem {
            species: record.name.to_string(),
            action: if downloaded_any {
                "downloaded".to_string()
            } else {
                "skipped".to_string()
            },
            paths,
            error: None,
        }
    }

    pub fn fetch_ncbi(&self, options: NcbiFetchOptions) -> Result<DownloadReport, RefprepError> {
        let species = self.resolve_ncbi_species(&options)?;
        if species.is_empty() {
            return Err(RefprepError::NoSpeciesMatched(options.search.clone()));
        }

        if let Some(list_file) = &options.species_list_file {
            fs_util::write_bytes_atomic(list_file, (species.join("\n") + "\n").as_bytes())?;
            tracing::info!(path = %list_file.display(), count = species.len(), "wrote species list");
        }

        fs::create_dir_all(&options.outdir)
            .map_err(|err| RefprepError::Filesystem(err.to_string()))?;

        let pool = worker_pool(options.processes)?;
        let items = pool.install(|| {
            species
                .par_iter()
                .map(|name| self.fetch_one_ncbi(name, &options))
                .collect::<Vec<_>>()
        });

        Ok(DownloadReport {
            source: "ncbi".to_string(),
            items,
        })
    }

    fn resolve_ncbi_species(
        &self,
        options: &NcbiFetchOptions,
    ) -> Result<Vec<String>, RefprepError> {
        if !options.species.is_empty() {
            return Ok(dedup_preserving_order(options.species.clone()));
        }

        let (taxa, filter): (Vec<String>, Option<SearchTerm>) = if options.divisions.is_empty() {
            (vec![options.search.clone()], None)
        } else {
            (options.divisions.clone(), Some(options.search.parse()?))
        };

        let summary_options = SummaryOptions {
            limit: options.limit,
            assembly_source: options.assembly_source,
            reference_only: options.reference_only,
        };

        let mut names = Vec::new();
        for taxon in &taxa {
            let summaries = self.ncbi.summarize(taxon, &summary_options)?;
            for summary in summaries {
                if let Some(filter) = &filter {
                    if !matches_species(filter, &summary.organism_name) {
                        continue;
                    }
                }
                names.push(summary.organism_name);
            }
        }

        let mut names = dedup_preserving_order(names);
        names.truncate(options.limit);
        Ok(names)
    }

    fn fetch_one_ncbi(&self, name: &str, options: &NcbiFetchOptions) -> DownloadItem {
        let species_dir = options.outdir.join(name.replace(' ', "_"));

        if !options.force {
            match ncbi::existing_download(&species_dir, &options.file_types) {
                Ok(Some(paths)) => {
                    tracing::info!(species = name, "already downloaded; skipping");
                    return DownloadItem {
                        species: name.to_string(),
                        action: "skipped".to_string(),
                        paths: paths
                            .iter()
                            .map(|path| path.to_string_lossy().into_owned())
                            .collect(),
                        error: None,
                    };
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(species = name, error = %err, "unreadable dataset catalog; re-downloading");
                }
            }
        }

        let mut last_error = None;
        for attempt in 1..=options.max_attempts.max(1) {
            tracing::info!(species = name, attempt, "downloading via datasets");
            match self
                .ncbi
                .download_genome(name, &options.file_types, &species_dir)
            {
                Ok(()) => {
                    let paths = ncbi::existing_download(&species_dir, &options.file_types)
                        .ok()
                        .flatten()
                        .unwrap_or_default();
                    return DownloadItem {
                        species: name.to_string(),
                        action: "downloaded".to_string(),
                        paths: paths
                            .iter()
                            .map(|path| path.to_string_lossy().into_owned())
                            .collect(),
                        error: None,
                    };
                }
                Err(err) => {
                    tracing::warn!(species = name, attempt, error = %err, "download attempt failed");
                    last_error = Some(err);
                }
            }
        }

        fs_util::remove_dir_if_empty(&species_dir);
        DownloadItem {
            species: name.to_string(),
            action: "failed".to_string(),
            paths: Vec::new(),
            error: last_error.map(|err| err.to_string()),
        }
    }

    pub fn write_manifest(&self, options: ManifestOptions) -> Result<ManifestReport, RefprepError> {
        let outcome = manifest::scan(
            options.ensembl_dir.as_deref(),
            options.ncbi_dir.as_deref(),
            ScanOptions {
                allow_missing_gtf: options.allow_missing_gtf,
            },
        )?;
        manifest::write_manifest(&outcome.entries, &options.output)?;
        tracing::info!(
            path = %options.output.display(),
            entries = outcome.entries.len(),
            skipped = outcome.skipped.len(),
            "wrote manifest"
        );
        Ok(ManifestReport {
            path: options.output.to_string_lossy().into_owned(),
            entries: outcome.entries.len(),
            skipped: outcome.skipped,
        })
    }

    pub fn build_references(
        &self,
        invocation: PipelineInvocation,
    ) -> Result<PipelineReport, RefprepError> {
        self.pipeline.run(&invocation)?;
        Ok(PipelineReport {
            outdir: invocation.outdir.to_string_lossy().into_owned(),
        })
    }

    pub fn write_genomes_config(
        &self,
        options: GenomesConfigOptions,
    ) -> Result<ConfigReport, RefprepError> {
        let entries = manifest::read_manifest(&options.manifest)?;
        let artifacts = genomes_config::collect(&entries, &options.results_dir)?;
        genomes_config::write_config(&artifacts, &options.output)?;

        let genomes: Vec<String> = artifacts
            .iter()
            .map(|artifact| artifact.genome.clone())
            .collect();
        let excluded = entries
            .iter()
            .map(|entry| entry.genome.clone())
            .filter(|genome| !genomes.contains(genome))
            .collect();
        tracing::info!(path = %options.output.display(), genomes = genomes.len(), "wrote genomes config");
        Ok(ConfigReport {
            path: options.output.to_string_lossy().into_owned(),
            genomes,
            excluded,
        })
    }
}

/// Species names circulate both underscored and with spaces; match either
/// spelling against the search term.
fn matches_species(term: &SearchTerm, name: &str) -> bool {
    term.matches(name) || term.matches(&name.replace('_', " "))
}

fn worker_pool(processes: usize) -> Result<rayon::ThreadPool, RefprepError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(processes.max(1))
        .build()
        .map_err(|err| RefprepError::Filesystem(err.to_string()))
}

fn dedup_preserving_order(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn species_matching_ignores_separator() {
        let term: SearchTerm = "homo sapiens".parse().unwrap();
        assert!(matches_species(&term, "homo_sapiens"));
        let term: SearchTerm = "homo_sapiens".parse().unwrap();
        assert!(matches_species(&term, "homo_sapiens"));
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let values = vec![
            "Homo sapiens".to_string(),
            "Mus musculus".to_string(),
            "Homo sapiens".to_string(),
        ];
        assert_eq!(
            dedup_preserving_order(values),
            vec!["Homo sapiens".to_string(), "Mus musculus".to_string()]
        );
    }
}
