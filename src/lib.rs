//! Glue around the external tooling that builds genome reference bundles:
//! downloads reference files from Ensembl and NCBI, writes the assets
//! manifest consumed by nf-core/references, and turns pipeline outputs into
//! a genomes config for downstream analysis pipelines.

pub mod app;
pub mod domain;
pub mod ensembl;
pub mod error;
pub mod fs_util;
pub mod genomes_config;
pub mod manifest;
pub mod ncbi;
pub mod output;
pub mod pipeline;
