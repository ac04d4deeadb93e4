#![doc = "qiita-batch: batch driver for posting, patching and uploading Qiita content."]

//! This crate reads a YAML document stream describing articles and images,
//! shells out to the external `qiita-item` / `qiita-image-upload` collaborator
//! commands for every entity that still needs work, merges each command's JSON
//! response back into the entity, and writes the enriched stream back out.
//!
//! # Usage
//! The `qiita-batch` binary is the intended entrypoint; the library surface
//! exists so integration tests can drive [`cli::run`] and the dispatchers
//! directly with a mocked [`command::CommandRunner`].

pub mod cli;
pub mod command;
pub mod document;
pub mod publish;

pub use cli::{run, Cli};
