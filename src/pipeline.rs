use std::path::PathBuf;
use std::process::Command;

use crate::error::RefprepError;
use crate::fs_util;

/// Arguments for one nf-core/references run.
#[derive(Debug, Clone)]
pub struct PipelineInvocation {
    pub input: PathBuf,
    pub outdir: PathBuf,
    pub profile: String,
    pub tools: Vec<String>,
    pub extra_args: Vec<String>,
}

pub trait PipelineRunner: Send + Sync {
    fn run(&self, invocation: &PipelineInvocation) -> Result<(), RefprepError>;
}

pub struct SystemNextflowRunner {
    nextflow: Option<PathBuf>,
    pipeline: String,
}

impl SystemNextflowRunner {
    pub fn new() -> Self {
        Self {
            nextflow: fs_util::find_in_path("nextflow"),
            pipeline: "nf-core/references".to_string(),
        }
    }

    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = pipeline.into();
        self
    }
}

impl Default for SystemNextflowRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRunner for SystemNextflowRunner {
    fn run(&self, invocation: &PipelineInvocation) -> Result<(), RefprepError> {
        let nextflow = self
            .nextflow
            .as_ref()
            .ok_or_else(|| RefprepError::MissingTool("nextflow".to_string()))?;

        let args = build_args(&self.pipeline, invocation);
        tracing::info!(command = %format!("nextflow {}", args.join(" ")), "launching pipeline");

        // The pipeline runs for hours and reports its own progress, so its
        // stdio is inherited rather than captured.
        let status = Command::new(nextflow)
            .args(&args)
            .status()
            .map_err(|err| RefprepError::Filesystem(err.to_string()))?;
        if !status.success() {
            return Err(RefprepError::PipelineFailed {
                status: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}

pub fn build_args(pipeline: &str, invocation: &PipelineInvocation) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        pipeline.to_string(),
        "-profile".to_string(),
        invocation.profile.clone(),
        "--input".to_string(),
        invocation.input.to_string_lossy().into_owned(),
        "--outdir".to_string(),
        invocation.outdir.to_string_lossy().into_owned(),
    ];
    if !invocation.tools.is_empty() {
        args.push("--tools".to_string());
        args.push(invocation.tools.join(","));
    }
    args.extend(invocation.extra_args.iter().cloned());
    args
}
