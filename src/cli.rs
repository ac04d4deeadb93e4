//! # qiita-batch CLI Interface (Module)
//!
//! This module implements the full CLI surface for qiita-batch: flag parsing,
//! input/output path resolution, and the `run` entrypoint that wires the
//! document loader, the operation dispatchers and the writer together.
//!
//! ## Features
//! - Entry struct [`Cli`] defines all user-facing flags (see below).
//! - [`run`] is callable programmatically for integration testing.
//! - The only deliberate usage check lives here: a missing input path prints
//!   the usage text to stderr and exits with status 1.
//!
//! All dispatch logic lives in [`crate::publish`]; this module is strictly
//! CLI glue and orchestration.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{CommandFactory, Parser};

use crate::command::SystemRunner;
use crate::document::{load_documents, write_documents};
use crate::publish::{run_operations, Options};

/// CLI for qiita-batch: batch-post, patch and upload Qiita content described
/// by a YAML document stream.
#[derive(Parser, Debug)]
#[clap(
    name = "qiita-batch",
    version,
    about = "Post, patch and upload Qiita articles and images from a YAML document stream"
)]
pub struct Cli {
    /// Echo each assembled collaborator command line
    #[clap(short, long)]
    pub verbose: bool,

    /// Enable debug output (also echoes command lines)
    #[clap(short, long)]
    pub debug: bool,

    /// Assemble and echo command lines without executing anything
    #[clap(short = 'n', long)]
    pub dry_run: bool,

    /// Post items that have no platform id yet
    #[clap(long)]
    pub item_post: bool,

    /// Patch items that already have a platform id
    #[clap(long)]
    pub item_patch: bool,

    /// Upload images that have no url yet
    #[clap(long)]
    pub image_upload: bool,

    /// Input YAML file name
    #[clap(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Output YAML file name (stdout when omitted)
    #[clap(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Config YAML file name, used as both input and output
    #[clap(short = 'f', long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    fn options(&self) -> Options {
        Options {
            verbose: self.verbose,
            debug: self.debug,
            dry_run: self.dry_run,
            item_post: self.item_post,
            item_patch: self.item_patch,
            image_upload: self.image_upload,
        }
    }

    /// Resolves the effective input and output paths; `--config` wins over
    /// `--input`/`--output` and sets both to the same file.
    fn paths(&self) -> (Option<PathBuf>, Option<PathBuf>) {
        match &self.config {
            Some(path) => (Some(path.clone()), Some(path.clone())),
            None => (self.input.clone(), self.output.clone()),
        }
    }
}

/// Extracted CLI logic entrypoint for integration tests and main().
pub fn run(cli: Cli) -> Result<()> {
    let options = cli.options();
    let (input, output) = cli.paths();

    let Some(input) = input else {
        eprintln!("Error: no input YAML file name given");
        eprintln!("{}", Cli::command().render_help());
        bail!("input file is required");
    };

    tracing::info!(input = ?input, output = ?output, options = ?options, "Starting batch run");

    let mut documents = load_documents(&input)?;
    let runner = SystemRunner;
    run_operations(&options, &runner, &mut documents)?;
    write_documents(&documents, output.as_deref())?;

    tracing::info!("Batch run complete");
    Ok(())
}
