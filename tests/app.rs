use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use refprep::app::{App, EnsemblFetchOptions, GenomesConfigOptions, NcbiFetchOptions};
use refprep::domain::{Division, FileType, Release, SearchTerm, Species};
use refprep::ensembl::{EnsemblClient, EnsemblSpecies};
use refprep::error::RefprepError;
use refprep::ncbi::{AssemblySource, AssemblySummary, NcbiDatasets, SummaryOptions};
use refprep::pipeline::{PipelineInvocation, PipelineRunner};

struct MockEnsembl {
    species: Vec<EnsemblSpecies>,
    downloads: Arc<Mutex<usize>>,
    fail_for: Option<String>,
}

impl MockEnsembl {
    fn new(names: &[(&str, &str)]) -> Self {
        let species = names
            .iter()
            .map(|(name, assembly)| EnsemblSpecies {
                name: Species::from_str(name).unwrap(),
                assembly: assembly.to_string(),
                release: 113,
            })
            .collect();
        Self {
            species,
            downloads: Arc::new(Mutex::new(0)),
            fail_for: None,
        }
    }

    fn failing_for(mut self, species: &str) -> Self {
        self.fail_for = Some(species.to_string());
        self
    }

    fn download_counter(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.downloads)
    }
}

impl EnsemblClient for MockEnsembl {
    fn resolve_release(&self, _division: Division, release: Release) -> Result<u32, RefprepError> {
        match release {
            Release::Numbered(release) => Ok(release),
            Release::Current => Ok(113),
        }
    }

    fn list_species(&self, _division: Division) -> Result<Vec<EnsemblSpecies>, RefprepError> {
        Ok(self.species.clone())
    }

    fn download_file(&self, url: &str, destination: &Path) -> Result<(), RefprepError> {
        if let Some(fail_for) = &self.fail_for {
            if url.contains(fail_for.as_str()) {
                return Err(RefprepError::EnsemblStatus {
                    status: 404,
                    message: "not found".to_string(),
                });
            }
        }
        *self.downloads.lock().unwrap() += 1;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(destination, b"data").unwrap();
        Ok(())
    }
}

struct MockNcbi {
    summaries: Vec<AssemblySummary>,
    downloads: Arc<Mutex<usize>>,
    fail: bool,
}

impl MockNcbi {
    fn new(names: &[&str]) -> Self {
        let summaries = names
            .iter()
            .map(|name| AssemblySummary {
                accession: Some("GCF_000000000.1".to_string()),
                organism_name: name.to_string(),
            })
            .collect();
        Self {
            summaries,
            downloads: Arc::new(Mutex::new(0)),
            fail: false,
        }
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn download_counter(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.downloads)
    }
}

impl NcbiDatasets for MockNcbi {
    fn summarize(
        &self,
        _taxon: &str,
        _options: &SummaryOptions,
    ) -> Result<Vec<AssemblySummary>, RefprepError> {
        Ok(self.summaries.clone())
    }

    fn download_genome(
        &self,
        taxon: &str,
        _include: &[FileType],
        species_dir: &Path,
    ) -> Result<(), RefprepError> {
        *self.downloads.lock().unwrap() += 1;
        if self.fail {
            return Err(RefprepError::DatasetsTool(format!(
                "download failed for {taxon}"
            )));
        }
        write_ncbi_package(species_dir);
        Ok(())
    }
}

struct NopNcbi;

impl NcbiDatasets for NopNcbi {
    fn summarize(
        &self,
        _taxon: &str,
        _options: &SummaryOptions,
    ) -> Result<Vec<AssemblySummary>, RefprepError> {
        Ok(Vec::new())
    }

    fn download_genome(
        &self,
        _taxon: &str,
        _include: &[FileType],
        _species_dir: &Path,
    ) -> Result<(), RefprepError> {
        Err(RefprepError::MissingTool("datasets".to_string()))
    }
}

struct NopEnsembl;

impl EnsemblClient for NopEnsembl {
    fn resolve_release(&self, _division: Division, _release: Release) -> Result<u32, RefprepError> {
        Err(RefprepError::EnsemblHttp("not configured".to_string()))
    }

    fn list_species(&self, _division: Division) -> Result<Vec<EnsemblSpecies>, RefprepError> {
        Err(RefprepError::EnsemblHttp("not configured".to_string()))
    }

    fn download_file(&self, _url: &str, _destination: &Path) -> Result<(), RefprepError> {
        Err(RefprepError::EnsemblHttp("not configured".to_string()))
    }
}

struct NopPipeline;

impl PipelineRunner for NopPipeline {
    fn run(&self, _invocation: &PipelineInvocation) -> Result<(), RefprepError> {
        Ok(())
    }
}

fn write_ncbi_package(species_dir: &Path) {
    let data_dir = species_dir.join("ncbi_dataset/data/GCF_000000000.1");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(data_dir.join("genome.fna"), b">chr1\nACGT\n").unwrap();
    fs::write(data_dir.join("genomic.gtf"), b"# gtf\n").unwrap();
    let catalog = r#"{
        "assemblies": [
            {"accession": "GCF_000000000.1", "files": [
                {"filePath": "GCF_000000000.1/genome.fna", "fileType": "GENOMIC_NUCLEOTIDE_FASTA"},
                {"filePath": "GCF_000000000.1/genomic.gtf", "fileType": "GTF"}
            ]}
        ]
    }"#;
    fs::write(
        species_dir.join("ncbi_dataset/data/dataset_catalog.json"),
        catalog,
    )
    .unwrap();
}

fn ensembl_options(outdir: PathBuf) -> EnsemblFetchOptions {
    EnsemblFetchOptions {
        search: SearchTerm::from_str("all").unwrap(),
        division: Division::Vertebrates,
        release: Release::Numbered(113),
        file_types: vec![FileType::Genome, FileType::Gtf],
        dna_file_ext: "dna_sm.toplevel.fa.gz".to_string(),
        processes: 2,
        list_only: false,
        force: false,
        outdir,
    }
}

fn ncbi_options(outdir: PathBuf) -> NcbiFetchOptions {
    NcbiFetchOptions {
        species: Vec::new(),
        search: "all".to_string(),
        divisions: Vec::new(),
        limit: 10,
        assembly_source: AssemblySource::All,
        reference_only: true,
        file_types: vec![FileType::Genome, FileType::Gtf],
        processes: 2,
        max_attempts: 1,
        force: false,
        outdir,
        species_list_file: None,
    }
}

#[test]
fn ensembl_fetch_downloads_both_file_types() {
    let dir = tempfile::tempdir().unwrap();
    let ensembl = MockEnsembl::new(&[("homo_sapiens", "GRCh38.p14")]);
    let app = App::new(ensembl, NopNcbi, NopPipeline);

    let report = app
        .fetch_ensembl(ensembl_options(dir.path().to_path_buf()))
        .unwrap();
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.items[0].action, "downloaded");
    assert_eq!(report.items[0].paths.len(), 2);

    let species_dir = dir.path().join("vertebrates/homo_sapiens");
    assert!(species_dir
        .join("Homo_sapiens.GRCh38.dna_sm.toplevel.fa.gz")
        .exists());
    assert!(species_dir.join("Homo_sapiens.GRCh38.113.gtf.gz").exists());
}

#[test]
fn ensembl_fetch_skips_existing_without_force() {
    let dir = tempfile::tempdir().unwrap();
    let species_dir = dir.path().join("vertebrates/homo_sapiens");
    fs::create_dir_all(&species_dir).unwrap();
    fs::write(
        species_dir.join("Homo_sapiens.GRCh38.dna_sm.toplevel.fa.gz"),
        b"data",
    )
    .unwrap();
    fs::write(species_dir.join("Homo_sapiens.GRCh38.113.gtf.gz"), b"data").unwrap();

    let app = App::new(
        MockEnsembl::new(&[("homo_sapiens", "GRCh38.p14")]),
        NopNcbi,
        NopPipeline,
    );
    let report = app
        .fetch_ensembl(ensembl_options(dir.path().to_path_buf()))
        .unwrap();
    assert_eq!(report.items[0].action, "skipped");

    // force re-downloads
    let ensembl = MockEnsembl::new(&[("homo_sapiens", "GRCh38.p14")]);
    let mut options = ensembl_options(dir.path().to_path_buf());
    options.force = true;
    let app = App::new(ensembl, NopNcbi, NopPipeline);
    let report = app.fetch_ensembl(options).unwrap();
    assert_eq!(report.items[0].action, "downloaded");
}

#[test]
fn ensembl_fetch_makes_no_calls_when_everything_is_local() {
    let dir = tempfile::tempdir().unwrap();
    let species_dir = dir.path().join("vertebrates/homo_sapiens");
    fs::create_dir_all(&species_dir).unwrap();
    fs::write(
        species_dir.join("Homo_sapiens.GRCh38.dna_sm.toplevel.fa.gz"),
        b"data",
    )
    .unwrap();
    fs::write(species_dir.join("Homo_sapiens.GRCh38.113.gtf.gz"), b"data").unwrap();

    let ensembl = MockEnsembl::new(&[("homo_sapiens", "GRCh38.p14")]);
    let downloads = ensembl.download_counter();
    let app = App::new(ensembl, NopNcbi, NopPipeline);
    app.fetch_ensembl(ensembl_options(dir.path().to_path_buf()))
        .unwrap();
    assert_eq!(*downloads.lock().unwrap(), 0);
}

#[test]
fn ensembl_failure_does_not_abort_batch() {
    let dir = tempfile::tempdir().unwrap();
    let ensembl = MockEnsembl::new(&[
        ("homo_sapiens", "GRCh38.p14"),
        ("mus_musculus", "GRCm39"),
    ])
    .failing_for("mus_musculus");
    let app = App::new(ensembl, NopNcbi, NopPipeline);

    let report = app
        .fetch_ensembl(ensembl_options(dir.path().to_path_buf()))
        .unwrap();
    assert_eq!(report.items.len(), 2);
    assert_eq!(report.failed(), 1);
    let failed = report
        .items
        .iter()
        .find(|item| item.species == "mus_musculus")
        .unwrap();
    assert_eq!(failed.action, "failed");
    assert!(failed.error.is_some());
}

#[test]
fn ensembl_report_flags_fully_failed_batch() {
    let dir = tempfile::tempdir().unwrap();
    let ensembl = MockEnsembl::new(&[("mus_musculus", "GRCm39")]).failing_for("mus_musculus");
    let app = App::new(ensembl, NopNcbi, NopPipeline);

    let report = app
        .fetch_ensembl(ensembl_options(dir.path().to_path_buf()))
        .unwrap();
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.failed(), report.items.len());
}

#[test]
fn ensembl_search_filters_species() {
    let dir = tempfile::tempdir().unwrap();
    let ensembl = MockEnsembl::new(&[
        ("homo_sapiens", "GRCh38.p14"),
        ("mus_musculus", "GRCm39"),
    ]);
    let app = App::new(ensembl, NopNcbi, NopPipeline);

    let mut options = ensembl_options(dir.path().to_path_buf());
    options.search = SearchTerm::from_str("sapiens").unwrap();
    options.list_only = true;
    let report = app.fetch_ensembl(options).unwrap();
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.items[0].species, "homo_sapiens");
    assert_eq!(report.items[0].action, "listed");
}

#[test]
fn ensembl_rejects_unsupported_file_types() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::new(
        MockEnsembl::new(&[("homo_sapiens", "GRCh38.p14")]),
        NopNcbi,
        NopPipeline,
    );
    let mut options = ensembl_options(dir.path().to_path_buf());
    options.file_types = vec![FileType::Protein];
    let err = app.fetch_ensembl(options).unwrap_err();
    assert!(matches!(err, RefprepError::UnsupportedFileType { .. }));
}

#[test]
fn ncbi_fetch_skips_fully_downloaded_species() {
    let dir = tempfile::tempdir().unwrap();
    write_ncbi_package(&dir.path().join("Homo_sapiens"));

    let ncbi = MockNcbi::new(&["Homo sapiens"]);
    let downloads = ncbi.download_counter();
    let app = App::new(NopEnsembl, ncbi, NopPipeline);
    let report = app.fetch_ncbi(ncbi_options(dir.path().to_path_buf())).unwrap();

    assert_eq!(report.items.len(), 1);
    assert_eq!(report.items[0].action, "skipped");
    assert_eq!(*downloads.lock().unwrap(), 0);
}

#[test]
fn ncbi_fetch_downloads_missing_species() {
    let dir = tempfile::tempdir().unwrap();
    let ncbi = MockNcbi::new(&["Homo sapiens", "Mus musculus"]);
    let app = App::new(NopEnsembl, ncbi, NopPipeline);

    let report = app.fetch_ncbi(ncbi_options(dir.path().to_path_buf())).unwrap();
    assert_eq!(report.items.len(), 2);
    assert!(report.items.iter().all(|item| item.action == "downloaded"));
    assert!(dir
        .path()
        .join("Homo_sapiens/ncbi_dataset/data/dataset_catalog.json")
        .exists());
    assert!(dir
        .path()
        .join("Mus_musculus/ncbi_dataset/data/GCF_000000000.1/genome.fna")
        .exists());
}

#[test]
fn ncbi_failures_are_per_species() {
    let dir = tempfile::tempdir().unwrap();
    let ncbi = MockNcbi::new(&["Homo sapiens"]).failing();
    let app = App::new(NopEnsembl, ncbi, NopPipeline);

    let report = app.fetch_ncbi(ncbi_options(dir.path().to_path_buf())).unwrap();
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.items[0].action, "failed");
    assert!(report.items[0].error.is_some());
}

#[test]
fn ncbi_explicit_species_bypass_discovery() {
    let dir = tempfile::tempdir().unwrap();
    let ncbi = MockNcbi::new(&["should not appear"]);
    let app = App::new(NopEnsembl, ncbi, NopPipeline);

    let mut options = ncbi_options(dir.path().to_path_buf());
    options.species = vec!["Danio rerio".to_string(), "Danio rerio".to_string()];
    let report = app.fetch_ncbi(options).unwrap();
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.items[0].species, "Danio rerio");
}

#[test]
fn ncbi_species_list_file_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let list_file = dir.path().join("ncbi_species_list.txt");
    let ncbi = MockNcbi::new(&["Homo sapiens", "Mus musculus"]);
    let app = App::new(NopEnsembl, ncbi, NopPipeline);

    let mut options = ncbi_options(dir.path().join("genomes"));
    options.species_list_file = Some(list_file.clone());
    app.fetch_ncbi(options).unwrap();

    let content = fs::read_to_string(&list_file).unwrap();
    assert_eq!(content, "Homo sapiens\nMus musculus\n");
}

#[test]
fn genomes_config_includes_only_genomes_with_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("references.yml");
    let manifest = "\
- genome: homo_sapiens
  species: homo_sapiens
  source: ensembl_vertebrates
  fasta: /data/homo_sapiens.fa
  gtf: /data/homo_sapiens.gtf
- genome: mus_musculus
  species: mus_musculus
  source: ensembl_vertebrates
  fasta: /data/mus_musculus.fa
  gtf: /data/mus_musculus.gtf
";
    fs::write(&manifest_path, manifest).unwrap();

    let results = dir.path().join("results");
    let human = results.join("homo_sapiens/sequence");
    fs::create_dir_all(&human).unwrap();
    fs::write(human.join("genome.fa"), b">chr1\n").unwrap();
    fs::write(human.join("genome.fa.fai"), b"chr1\t4\n").unwrap();

    let output = dir.path().join("configs/genomes.config");
    let app = App::new(NopEnsembl, NopNcbi, NopPipeline);
    let report = app
        .write_genomes_config(GenomesConfigOptions {
            manifest: manifest_path,
            results_dir: results,
            output: output.clone(),
        })
        .unwrap();

    assert_eq!(report.genomes, vec!["homo_sapiens".to_string()]);
    assert_eq!(report.excluded, vec!["mus_musculus".to_string()]);

    let rendered = fs::read_to_string(&output).unwrap();
    assert!(rendered.contains("'homo_sapiens' {"));
    assert!(!rendered.contains("mus_musculus"));
    assert!(rendered.contains("genome.fa.fai"));
}
