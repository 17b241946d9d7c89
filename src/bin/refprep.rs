use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use refprep::app::{
    App, EnsemblFetchOptions, GenomesConfigOptions, ManifestOptions, NcbiFetchOptions,
};
use refprep::domain::{Division, FileType, Release, SearchTerm};
use refprep::ensembl::EnsemblHttpClient;
use refprep::error::RefprepError;
use refprep::ncbi::{AssemblySource, SystemDatasetsClient};
use refprep::output::{self, JsonOutput, OutputMode};
use refprep::pipeline::{PipelineInvocation, SystemNextflowRunner};

#[derive(Parser)]
#[command(name = "refprep")]
#[command(about = "Prepare genome reference inputs for nf-core/references")]
#[command(version, author)]
struct Cli {
    /// Print machine-readable JSON reports instead of summaries
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download FASTA/GTF files from Ensembl")]
    Ensembl(EnsemblArgs),
    #[command(about = "Download assemblies from NCBI via the datasets tool")]
    Ncbi(NcbiArgs),
    #[command(about = "Scan download directories and write the assets manifest")]
    Manifest(ManifestArgs),
    #[command(about = "Run nf-core/references on a manifest")]
    Pipeline(PipelineArgs),
    #[command(about = "Generate the final genomes config from pipeline outputs")]
    GenomesConfig(GenomesConfigArgs),
}

#[derive(Args)]
struct EnsemblArgs {
    /// Species selector: "all" or a case-insensitive pattern
    #[arg(short, long, default_value = "all")]
    search: SearchTerm,

    #[arg(short, long, value_enum, default_value_t = Division::Vertebrates)]
    division: Division,

    /// Ensembl release number, or "current"
    #[arg(short, long, default_value = "current")]
    release: Release,

    #[arg(long = "file-types", value_enum, value_delimiter = ',', default_values_t = [FileType::Genome, FileType::Gtf])]
    file_types: Vec<FileType>,

    /// Suffix of the DNA FASTA file to fetch
    #[arg(long, default_value = "dna_sm.toplevel.fa.gz")]
    dna_file_ext: String,

    /// Number of parallel downloads
    #[arg(short, long, default_value_t = 1)]
    processes: usize,

    /// List matching species without downloading anything
    #[arg(long)]
    list: bool,

    /// Re-download files that already exist locally
    #[arg(long)]
    force: bool,

    #[arg(short, long, default_value = "ensembl_genomes")]
    outdir: PathBuf,
}

#[derive(Args)]
struct NcbiArgs {
    /// Explicit organism names or taxon ids
    #[arg(short = 's', long = "species", num_args = 1..)]
    species: Vec<String>,

    /// File with one organism name per line
    #[arg(short = 'f', long)]
    species_file: Option<PathBuf>,

    /// Taxon or search term used for discovery
    #[arg(long, default_value = "all")]
    search: String,

    /// Accepted taxonomic divisions; each is queried as its own taxon
    #[arg(long = "divisions", num_args = 1..)]
    divisions: Vec<String>,

    /// Maximum number of species to download
    #[arg(short = 'm', long, default_value_t = 1)]
    limit: usize,

    #[arg(long, value_enum, default_value_t = AssemblySource::All)]
    assembly_source: AssemblySource,

    /// Consider non-reference assemblies too
    #[arg(long)]
    all_assemblies: bool,

    #[arg(long = "file-types", value_enum, value_delimiter = ',', default_values_t = [FileType::Genome, FileType::Gtf])]
    file_types: Vec<FileType>,

    /// Number of parallel downloads
    #[arg(short, long, default_value_t = 1)]
    processes: usize,

    /// Download attempts per species
    #[arg(short = 'a', long, default_value_t = 3)]
    max_attempts: usize,

    /// Re-download assemblies that already exist locally
    #[arg(long)]
    force: bool,

    #[arg(short, long, default_value = "ncbi_genomes")]
    outdir: PathBuf,

    /// Write the discovered species names to this file
    #[arg(long)]
    species_list_file: Option<PathBuf>,
}

#[derive(Args)]
struct ManifestArgs {
    #[arg(long, default_value = "ensembl_genomes")]
    ensembl_dir: PathBuf,

    #[arg(long, default_value = "ncbi_genomes")]
    ncbi_dir: PathBuf,

    #[arg(short, long, default_value = "references.yml")]
    output: PathBuf,

    /// Emit entries without a GTF instead of omitting the species
    #[arg(long)]
    allow_missing_gtf: bool,
}

#[derive(Args)]
struct PipelineArgs {
    #[arg(short, long, default_value = "references.yml")]
    input: PathBuf,

    #[arg(short, long, default_value = "results")]
    outdir: PathBuf,

    #[arg(long, default_value = "singularity")]
    profile: String,

    /// Tools the pipeline should build indices for
    #[arg(long, value_delimiter = ',', default_values_t = ["bowtie2".to_string(), "star".to_string(), "createsequencedictionary".to_string(), "faidx".to_string(), "intervals".to_string()])]
    tools: Vec<String>,

    /// Extra arguments passed through to nextflow
    #[arg(last = true)]
    extra_args: Vec<String>,
}

#[derive(Args)]
struct GenomesConfigArgs {
    #[arg(short, long, default_value = "references.yml")]
    manifest: PathBuf,

    #[arg(short, long, default_value = "results")]
    results_dir: PathBuf,

    #[arg(short, long, default_value = "configs/genomes.config")]
    output: PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<RefprepError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &RefprepError) -> u8 {
    match error {
        RefprepError::InvalidRelease(_)
        | RefprepError::InvalidSpecies(_)
        | RefprepError::InvalidAccession(_)
        | RefprepError::UnsupportedFileType { .. }
        | RefprepError::NoSpeciesMatched(_)
        | RefprepError::ManifestRead(_)
        | RefprepError::ManifestParse(_) => 2,
        RefprepError::EnsemblHttp(_)
        | RefprepError::EnsemblStatus { .. }
        | RefprepError::MissingTool(_)
        | RefprepError::DatasetsTool(_)
        | RefprepError::SummaryParse(_)
        | RefprepError::PipelineFailed { .. } => 3,
        RefprepError::Filesystem(_) => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    match cli.command {
        Commands::Ensembl(args) => run_ensembl(args, mode),
        Commands::Ncbi(args) => run_ncbi(args, mode),
        Commands::Manifest(args) => run_manifest(args, mode),
        Commands::Pipeline(args) => run_pipeline(args, mode),
        Commands::GenomesConfig(args) => run_genomes_config(args, mode),
    }
}

fn build_app() -> miette::Result<App<EnsemblHttpClient, SystemDatasetsClient, SystemNextflowRunner>>
{
    let ensembl = EnsemblHttpClient::new()?;
    Ok(App::new(
        ensembl,
        SystemDatasetsClient::new(),
        SystemNextflowRunner::new(),
    ))
}

fn run_ensembl(args: EnsemblArgs, mode: OutputMode) -> miette::Result<()> {
    let app = build_app()?;
    let report = app
        .fetch_ensembl(EnsemblFetchOptions {
            search: args.search,
            division: args.division,
            release: args.release,
            file_types: args.file_types,
            dna_file_ext: args.dna_file_ext,
            processes: args.processes,
            list_only: args.list,
            force: args.force,
            outdir: args.outdir,
        })?;

    match mode {
        OutputMode::Json => JsonOutput::print_download(&report).into_diagnostic()?,
        OutputMode::Human => output::print_download_summary(&report),
    }

    if !report.items.is_empty() && report.failed() == report.items.len() {
        return Err(miette::Report::msg("every requested download failed"));
    }
    Ok(())
}

fn run_ncbi(args: NcbiArgs, mode: OutputMode) -> miette::Result<()> {
    let mut species = args.species;
    if let Some(file) = &args.species_file {
        let content = fs::read_to_string(file).into_diagnostic()?;
        species.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
    }

    let app = build_app()?;
    let report = app
        .fetch_ncbi(NcbiFetchOptions {
            species,
            search: args.search,
            divisions: args.divisions,
            limit: args.limit,
            assembly_source: args.assembly_source,
            reference_only: !args.all_assemblies,
            file_types: args.file_types,
            processes: args.processes,
            max_attempts: args.max_attempts,
            force: args.force,
            outdir: args.outdir,
            species_list_file: args.species_list_file,
        })?;

    match mode {
        OutputMode::Json => JsonOutput::print_download(&report).into_diagnostic()?,
        OutputMode::Human => output::print_download_summary(&report),
    }

    if !report.items.is_empty() && report.failed() == report.items.len() {
        return Err(miette::Report::msg("every requested download failed"));
    }
    Ok(())
}

fn run_manifest(args: ManifestArgs, mode: OutputMode) -> miette::Result<()> {
    let app = build_app()?;
    let report = app
        .write_manifest(ManifestOptions {
            ensembl_dir: Some(args.ensembl_dir),
            ncbi_dir: Some(args.ncbi_dir),
            output: args.output,
            allow_missing_gtf: args.allow_missing_gtf,
        })?;

    match mode {
        OutputMode::Json => JsonOutput::print_manifest(&report).into_diagnostic()?,
        OutputMode::Human => output::print_manifest_summary(&report),
    }
    Ok(())
}

fn run_pipeline(args: PipelineArgs, mode: OutputMode) -> miette::Result<()> {
    let app = build_app()?;
    let report = app
        .build_references(PipelineInvocation {
            input: args.input,
            outdir: args.outdir,
            profile: args.profile,
            tools: args.tools,
            extra_args: args.extra_args,
        })?;

    match mode {
        OutputMode::Json => JsonOutput::print_pipeline(&report).into_diagnostic()?,
        OutputMode::Human => output::print_pipeline_summary(&report),
    }
    Ok(())
}

fn run_genomes_config(args: GenomesConfigArgs, mode: OutputMode) -> miette::Result<()> {
    let app = build_app()?;
    let report = app
        .write_genomes_config(GenomesConfigOptions {
            manifest: args.manifest,
            results_dir: args.results_dir,
            output: args.output,
        })?;

    match mode {
        OutputMode::Json => JsonOutput::print_config(&report).into_diagnostic()?,
        OutputMode::Human => output::print_config_summary(&report),
    }
    Ok(())
}
