use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ConfigReport, DownloadReport, ManifestReport, PipelineReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_download(report: &DownloadReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_manifest(report: &ManifestReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_pipeline(report: &PipelineReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_config(report: &ConfigReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub fn print_download_summary(report: &DownloadReport) {
    let failed = report.failed();
    let done = report.items.len() - failed;
    println!("{CYAN}{} summary{RESET}", report.source);
    println!("{GREEN}  ok: {done}{RESET}");
    if failed > 0 {
        println!("{RED}  failed: {failed}{RESET}");
    }

    for item in &report.items {
        let color = match item.action.as_str() {
            "downloaded" => CYAN,
            "failed" => RED,
            "skipped" => GREEN,
            _ => YELLOW,
        };
        match &item.error {
            Some(error) => println!("{color}  {} {} ({error}){RESET}", item.action, item.species),
            None => println!("{color}  {} {}{RESET}", item.action, item.species),
        }
        for path in &item.paths {
            println!("    {path}");
        }
    }
}

pub fn print_manifest_summary(report: &ManifestReport) {
    println!("{GREEN}wrote {} ({} entries){RESET}", report.path, report.entries);
    for skipped in &report.skipped {
        println!("{YELLOW}  skipped {}: {}{RESET}", skipped.species, skipped.reason);
    }
}

pub fn print_pipeline_summary(report: &PipelineReport) {
    println!("{GREEN}pipeline finished; outputs in {}{RESET}", report.outdir);
}

pub fn print_config_summary(report: &ConfigReport) {
    println!(
        "{GREEN}wrote {} ({} genomes){RESET}",
        report.path,
        report.genomes.len()
    );
    for genome in &report.excluded {
        println!("{YELLOW}  excluded {genome}: no pipeline outputs{RESET}");
    }
}
