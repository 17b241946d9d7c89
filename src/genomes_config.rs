use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::RefprepError;
use crate::fs_util;
use crate::manifest::ManifestEntry;

/// Reference artifacts discovered under one genome's pipeline output
/// directory.
#[derive(Debug, Clone, Serialize)]
pub struct GenomeArtifacts {
    pub genome: String,
    pub fasta: String,
    pub fai: Option<String>,
    pub gtf: Option<String>,
    pub bed: Option<String>,
    pub star: Option<String>,
}

/// Cross-reference manifest entries against pipeline outputs. A genome is
/// included only when its output directory holds a FASTA.
pub fn collect(
    manifest: &[ManifestEntry],
    results_dir: &Path,
) -> Result<Vec<GenomeArtifacts>, RefprepError> {
    let mut artifacts = Vec::new();
    for entry in manifest {
        let genome_dir = results_dir.join(&entry.genome);
        if !genome_dir.is_dir() {
            tracing::info!(genome = %entry.genome, "no pipeline outputs; excluded from config");
            continue;
        }

        let Some(fasta) = find_genome_fasta(&genome_dir) else {
            tracing::warn!(genome = %entry.genome, "output directory has no genome FASTA; excluded");
            continue;
        };

        let fai = find_file_matching(&genome_dir, |name| {
            name.starts_with("genome.fa") && name.ends_with(".fai")
        });
        let gtf = find_file_matching(&genome_dir, |name| name == "genes.gtf");
        let bed = find_file_matching(&genome_dir, |name| name == "genes.bed");
        let star = fs_util::find_dirs_named(&genome_dir, "star").into_iter().next();

        artifacts.push(GenomeArtifacts {
            genome: entry.genome.clone(),
            fasta: display(&fasta),
            fai: fai.as_deref().map(display),
            gtf: gtf.as_deref().map(display),
            bed: bed.as_deref().map(display),
            star: star.as_deref().map(display),
        });
    }
    artifacts.sort_by(|a, b| a.genome.cmp(&b.genome));
    Ok(artifacts)
}

/// Render the Nextflow `params.genomes` block consumed by downstream
/// analysis pipelines.
pub fn render(artifacts: &[GenomeArtifacts]) -> String {
    let mut lines = vec!["params {".to_string(), "    genomes {".to_string()];
    for genome in artifacts {
        lines.push(format!("        '{}' {{", genome.genome));
        lines.push(format!("            fasta   = '{}'", genome.fasta));
        lines.push(format!(
            "            fai     = '{}'",
            genome.fai.as_deref().unwrap_or("")
        ));
        lines.push(format!(
            "            gtf     = '{}'",
            genome.gtf.as_deref().unwrap_or("")
        ));
        lines.push(format!(
            "            bed     = '{}'",
            genome.bed.as_deref().unwrap_or("")
        ));
        lines.push(format!(
            "            star    = '{}'",
            genome.star.as_deref().unwrap_or("")
        ));
        lines.push("        }".to_string());
    }
    lines.push("    }".to_string());
    lines.push("}".to_string());
    lines.join("\n") + "\n"
}

pub fn write_config(artifacts: &[GenomeArtifacts], path: &Path) -> Result<(), RefprepError> {
    let stamped = format!(
        "// generated by refprep {} on {}\n{}",
        env!("CARGO_PKG_VERSION"),
        chrono::Utc::now().to_rfc3339(),
        render(artifacts),
    );
    fs_util::write_bytes_atomic(path, stamped.as_bytes())
}

fn find_genome_fasta(genome_dir: &Path) -> Option<PathBuf> {
    find_file_matching(genome_dir, |name| {
        name.starts_with("genome.fa") && !name.ends_with(".fai")
    })
}

fn find_file_matching(root: &Path, predicate: impl Fn(&str) -> bool) -> Option<PathBuf> {
    let mut matches = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        if let Ok(entries) = fs::read_dir(&path) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(&predicate)
                    .unwrap_or(false)
                {
                    matches.push(path);
                }
            }
        }
    }
    matches.sort();
    matches.into_iter().next()
}

fn display(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_empty_block() {
        let rendered = render(&[]);
        assert_eq!(rendered, "params {\n    genomes {\n    }\n}\n");
    }
}
