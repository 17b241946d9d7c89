use std::fs;
use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::Deserialize;

use crate::domain::{Division, Release, Species};
use crate::error::RefprepError;
use crate::fs_util;

/// One species row from the division's release metadata.
#[derive(Debug, Clone)]
pub struct EnsemblSpecies {
    pub name: Species,
    pub assembly: String,
    pub release: u32,
}

pub trait EnsemblClient: Send + Sync {
    fn resolve_release(&self, division: Division, release: Release) -> Result<u32, RefprepError>;
    fn list_species(&self, division: Division) -> Result<Vec<EnsemblSpecies>, RefprepError>;
    fn download_file(&self, url: &str, destination: &Path) -> Result<(), RefprepError>;
}

#[derive(Clone)]
pub struct EnsemblHttpClient {
    client: Client,
    rest_base: String,
    max_retries: usize,
    retry_delay: Duration,
}

impl EnsemblHttpClient {
    pub fn new() -> Result<Self, RefprepError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("refprep/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RefprepError::EnsemblHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| RefprepError::EnsemblHttp(err.to_string()))?;

        Ok(Self {
            client,
            rest_base: "https://rest.ensembl.org".to_string(),
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
        })
    }

    pub fn with_rest_base(mut self, base: impl Into<String>) -> Self {
        self.rest_base = base.into();
        self
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, RefprepError> {
        let response = self.send_with_retries(|| self.client.get(url))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "Ensembl request failed".to_string());
            return Err(RefprepError::EnsemblStatus { status, message });
        }
        response
            .json::<T>()
            .map_err(|err| RefprepError::EnsemblHttp(err.to_string()))
    }

    /// Retries 429/5xx responses and transport failures with a linearly
    /// growing delay; anything else is returned as-is.
    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, RefprepError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            let can_retry = attempt < self.max_retries;
            match make_req().send() {
                Ok(resp) if can_retry && retryable_status(resp.status().as_u16()) => {}
                Ok(resp) => return Ok(resp),
                Err(err)
                    if can_retry && (err.is_timeout() || err.is_connect() || err.is_request()) => {}
                Err(err) => return Err(RefprepError::EnsemblHttp(err.to_string())),
            }
            thread::sleep(self.retry_delay * (attempt as u32 + 1));
            attempt += 1;
        }
    }

    fn write_response_to_file(
        &self,
        mut response: reqwest::blocking::Response,
        destination: &Path,
    ) -> Result<(), RefprepError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "Ensembl download failed".to_string());
            return Err(RefprepError::EnsemblStatus { status, message });
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|err| RefprepError::Filesystem(err.to_string()))?;
        }
        // Download to a .part sibling so an interrupted transfer is never
        // mistaken for a complete file by a later skip-if-exists check.
        let partial = destination.with_extension("part");
        let mut file =
            File::create(&partial).map_err(|err| RefprepError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| RefprepError::Filesystem(err.to_string()))?;
        drop(file);
        if destination.extension().is_some_and(|ext| ext == "gz") {
            if let Err(err) = fs_util::validate_gzip(&partial) {
                let _ = fs::remove_file(&partial);
                return Err(err);
            }
        }
        fs::rename(&partial, destination)
            .map_err(|err| RefprepError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ReleasesResponse {
    releases: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct EgVersionResponse {
    version: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SpeciesResponse {
    species: Vec<SpeciesRecord>,
}

#[derive(Debug, Deserialize)]
struct SpeciesRecord {
    name: String,
    #[serde(default)]
    assembly: Option<String>,
    #[serde(default)]
    release: Option<u32>,
}

impl EnsemblClient for EnsemblHttpClient {
    fn resolve_release(&self, division: Division, release: Release) -> Result<u32, RefprepError> {
        let requested = match release {
            Release::Numbered(release) => return Ok(release),
            Release::Current => release,
        };

        match division {
            Division::Vertebrates => {
                let url = format!("{}/info/data", self.rest_base);
                let data: ReleasesResponse = self.get_json(&url)?;
                data.releases
                    .into_iter()
                    .max()
                    .ok_or_else(|| RefprepError::InvalidRelease(requested.to_string()))
            }
            _ => {
                let url = format!("{}/info/eg_version", self.rest_base);
                let data: EgVersionResponse = self.get_json(&url)?;
                parse_eg_version(&data.version)
                    .ok_or_else(|| RefprepError::InvalidRelease(requested.to_string()))
            }
        }
    }

    fn list_species(&self, division: Division) -> Result<Vec<EnsemblSpecies>, RefprepError> {
        let url = format!(
            "{}/info/species?division={}",
            self.rest_base,
            division.rest_label()
        );
        let data: SpeciesResponse = self.get_json(&url)?;

        let mut species = Vec::new();
        for record in data.species {
            let Some(assembly) = record.assembly else {
                tracing::warn!(species = %record.name, "skipping species without assembly metadata");
                continue;
            };
            let name: Species = match record.name.parse() {
                Ok(name) => name,
                Err(_) => {
                    tracing::warn!(species = %record.name, "skipping species with unusable name");
                    continue;
                }
            };
            species.push(EnsemblSpecies {
                name,
                assembly,
                release: record.release.unwrap_or(0),
            });
        }
        species.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(species)
    }

    fn download_file(&self, url: &str, destination: &Path) -> Result<(), RefprepError> {
        let response = self.send_with_retries(|| self.client.get(url))?;
        self.write_response_to_file(response, destination)
    }
}

/// `/info/eg_version` has returned both string and numeric payloads across
/// REST server versions.
fn parse_eg_version(value: &serde_json::Value) -> Option<u32> {
    match value {
        serde_json::Value::Number(number) => number.as_u64().map(|v| v as u32),
        serde_json::Value::String(text) => text.trim().parse::<u32>().ok(),
        _ => None,
    }
}

/// Ensembl writes file names with the assembly's base name: patch suffixes
/// (`GRCh38.p14`) and spaces do not appear in them.
pub fn assembly_file_label(assembly: &str) -> String {
    let trimmed = assembly.trim().replace(' ', "_");
    if let Some(idx) = trimmed.rfind(".p") {
        let (head, tail) = trimmed.split_at(idx);
        let digits = &tail[2..];
        if !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit()) {
            return head.to_string();
        }
    }
    trimmed
}

pub fn fasta_url(
    division: Division,
    release: u32,
    species: &Species,
    assembly: &str,
    dna_file_ext: &str,
) -> String {
    format!(
        "{}/fasta/{}/dna/{}.{}.{}",
        division.download_base(release),
        species.as_str(),
        species.file_stem(),
        assembly_file_label(assembly),
        dna_file_ext
    )
}

pub fn gtf_url(division: Division, release: u32, species: &Species, assembly: &str) -> String {
    format!(
        "{}/gtf/{}/{}.{}.{}.gtf.gz",
        division.download_base(release),
        species.as_str(),
        species.file_stem(),
        assembly_file_label(assembly),
        release
    )
}

fn retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}
