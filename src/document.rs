//! Document loader/writer: the YAML boundary of the batch driver.
//!
//! This module is the only place where the declarative document stream is
//! parsed and serialized. A stream holds any number of `---`-separated YAML
//! documents; each is kept as a generic [`serde_yaml::Value`] so unknown keys
//! survive a load/store round trip untouched and in their original order.
//!
//! # Responsibilities
//! - Read an input file into an ordered `Vec<Value>`, one entry per document.
//! - Write the (possibly mutated) documents back, each as its own
//!   `---`-prefixed block, either to an output file (truncating overwrite) or
//!   to stdout.
//! - Provide the dynamic-mapping field helpers the dispatchers use: the
//!   idempotency guards are key-presence checks, so "key absent" must stay
//!   distinguishable from "key present with a null value".
//!
//! # Errors
//! Read and parse failures carry `anyhow` context and are surfaced at the CLI
//! boundary as fatal errors; nothing is caught locally.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::info;

/// Loads a YAML document stream from `path` into an ordered sequence of
/// documents, preserving source order.
pub fn load_documents<P: AsRef<Path>>(path: P) -> Result<Vec<Value>> {
    let path = path.as_ref();
    info!(input = ?path, "Loading YAML document stream");

    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read input file {}", path.display()))?;

    let mut documents = Vec::new();
    for deserializer in serde_yaml::Deserializer::from_str(&text) {
        let document = Value::deserialize(deserializer)
            .with_context(|| format!("failed to parse YAML document in {}", path.display()))?;
        documents.push(document);
    }
    info!(count = documents.len(), "Loaded documents");
    Ok(documents)
}

/// Serializes `documents` in order, each as one YAML document. Writes the
/// concatenated stream to `output` when given, otherwise prints each
/// document's block to stdout.
pub fn write_documents(documents: &[Value], output: Option<&Path>) -> Result<()> {
    let mut stream = String::new();
    for document in documents {
        stream.push_str("---\n");
        stream.push_str(&serde_yaml::to_string(document).context("failed to serialize document")?);
    }

    match output {
        Some(path) => {
            info!(output = ?path, count = documents.len(), "Writing document stream to file");
            fs::write(path, stream)
                .with_context(|| format!("failed to write output file {}", path.display()))?;
        }
        None => {
            info!(count = documents.len(), "Writing document stream to stdout");
            print!("{stream}");
        }
    }
    Ok(())
}

fn yaml_key(name: &str) -> Value {
    Value::String(name.to_string())
}

/// Looks up a field by string key.
pub fn field<'a>(map: &'a Mapping, name: &str) -> Option<&'a Value> {
    map.get(&yaml_key(name))
}

/// True when the key is present, regardless of its value (null included).
pub fn has_field(map: &Mapping, name: &str) -> bool {
    map.contains_key(&yaml_key(name))
}

/// Looks up a field and returns it only if it is a string.
pub fn str_field<'a>(map: &'a Mapping, name: &str) -> Option<&'a str> {
    field(map, name).and_then(Value::as_str)
}

/// Looks up a field and renders it as command-line text. Strings pass through;
/// numbers and booleans are rendered; anything else yields `None`.
pub fn scalar_field(map: &Mapping, name: &str) -> Option<String> {
    field(map, name).and_then(scalar_to_string)
}

/// Renders a scalar YAML value as command-line text.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Inserts or replaces a field, keeping the position of an existing key.
pub fn set_field(map: &mut Mapping, name: &str, value: Value) {
    map.insert(yaml_key(name), value);
}

/// Mutable access to a sequence-valued field, if present and a sequence.
pub fn sequence_field_mut<'a>(map: &'a mut Mapping, name: &str) -> Option<&'a mut Vec<Value>> {
    map.get_mut(&yaml_key(name)).and_then(|v| v.as_sequence_mut())
}
