use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::error::RefprepError;

/// Ensembl production name for a species (`homo_sapiens`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Species(String);

impl Species {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stem used in Ensembl file names: `homo_sapiens` -> `Homo_sapiens`.
    pub fn file_stem(&self) -> String {
        let mut chars = self.0.chars();
        match chars.next() {
            Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
            None => String::new(),
        }
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Species {
    type Err = RefprepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase().replace(' ', "_");
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' || ch == '-');
        if !is_valid {
            return Err(RefprepError::InvalidSpecies(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Ensembl release selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Current,
    Numbered(u32),
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Release::Current => write!(f, "current"),
            Release::Numbered(release) => write!(f, "{release}"),
        }
    }
}

impl FromStr for Release {
    type Err = RefprepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("current") {
            return Ok(Release::Current);
        }
        trimmed
            .parse::<u32>()
            .map(Release::Numbered)
            .map_err(|_| RefprepError::InvalidRelease(value.to_string()))
    }
}

/// Taxonomic grouping used by Ensembl to partition its release data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Division {
    Vertebrates,
    Plants,
    Fungi,
    Bacteria,
    Protists,
    Metazoa,
}

impl Division {
    /// Division label used by the Ensembl REST API.
    pub fn rest_label(&self) -> &'static str {
        match self {
            Division::Vertebrates => "EnsemblVertebrates",
            Division::Plants => "EnsemblPlants",
            Division::Fungi => "EnsemblFungi",
            Division::Bacteria => "EnsemblBacteria",
            Division::Protists => "EnsemblProtists",
            Division::Metazoa => "EnsemblMetazoa",
        }
    }

    /// HTTPS base of the release tree. Vertebrates live on ftp.ensembl.org,
    /// every other division on the Ensembl Genomes mirror.
    pub fn download_base(&self, release: u32) -> String {
        match self.path_segment() {
            None => format!("https://ftp.ensembl.org/pub/release-{release}"),
            Some(segment) => {
                format!("https://ftp.ensemblgenomes.ebi.ac.uk/pub/{segment}/release-{release}")
            }
        }
    }

    fn path_segment(&self) -> Option<&'static str> {
        match self {
            Division::Vertebrates => None,
            Division::Plants => Some("plants"),
            Division::Fungi => Some("fungi"),
            Division::Bacteria => Some("bacteria"),
            Division::Protists => Some("protists"),
            Division::Metazoa => Some("metazoa"),
        }
    }
}

impl fmt::Display for Division {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Division::Vertebrates => "vertebrates",
            Division::Plants => "plants",
            Division::Fungi => "fungi",
            Division::Bacteria => "bacteria",
            Division::Protists => "protists",
            Division::Metazoa => "metazoa",
        };
        write!(f, "{name}")
    }
}

/// NCBI assembly accession (`GCF_000005845.2`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssemblyAccession(String);

impl AssemblyAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssemblyAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AssemblyAccession {
    type Err = RefprepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let is_valid = match normalized.split_once('.') {
            Some((base, version)) => {
                accession_base_valid(base)
                    && !version.is_empty()
                    && version.chars().all(|ch| ch.is_ascii_digit())
            }
            None => accession_base_valid(&normalized),
        };
        if !is_valid {
            return Err(RefprepError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

fn accession_base_valid(base: &str) -> bool {
    let digits = base
        .strip_prefix("GCF_")
        .or_else(|| base.strip_prefix("GCA_"));
    matches!(digits, Some(rest) if !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit()))
}

/// Reference file kinds requested from the downloaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FileType {
    Genome,
    Gtf,
    Gff3,
    Rna,
    Protein,
    Cds,
    SeqReport,
}

impl FileType {
    /// Token accepted by `datasets download genome --include`.
    pub fn include_token(&self) -> &'static str {
        match self {
            FileType::Genome => "genome",
            FileType::Gtf => "gtf",
            FileType::Gff3 => "gff3",
            FileType::Rna => "rna",
            FileType::Protein => "protein",
            FileType::Cds => "cds",
            FileType::SeqReport => "seq-report",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.include_token())
    }
}

/// Species selector: `all`, or a case-insensitive regex matched against
/// organism names.
#[derive(Debug, Clone)]
pub enum SearchTerm {
    All,
    Pattern(regex::Regex),
}

impl SearchTerm {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            SearchTerm::All => true,
            SearchTerm::Pattern(pattern) => pattern.is_match(name),
        }
    }
}

impl fmt::Display for SearchTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchTerm::All => write!(f, "all"),
            SearchTerm::Pattern(pattern) => write!(f, "{}", pattern.as_str()),
        }
    }
}

impl FromStr for SearchTerm {
    type Err = RefprepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            return Ok(SearchTerm::All);
        }
        let pattern = RegexBuilder::new(trimmed)
            .case_insensitive(true)
            .build()
            .map_err(|err| RefprepError::InvalidSpecies(err.to_string()))?;
        Ok(SearchTerm::Pattern(pattern))
    }
}
