//! Structural edits on multi-document YAML manifest streams.
//!
//! The stream is split on `---` separator lines into documents. Each
//! document is parsed and offered to a patch function; documents the
//! function leaves alone are emitted exactly as they were read, patched
//! ones are re-serialized. Document order is preserved.

use serde_yaml::{Mapping, Value};

use crate::error::Result;

/// Identity of a Kubernetes resource for matching purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceMatch<'a> {
    pub kind: &'a str,
    pub name: &'a str,
    pub namespace: &'a str,
}

impl ResourceMatch<'_> {
    /// Whether `doc` has this kind, name and namespace.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        let metadata = &doc["metadata"];
        doc["kind"].as_str() == Some(self.kind)
            && metadata["name"].as_str() == Some(self.name)
            && metadata["namespace"].as_str() == Some(self.namespace)
    }
}

struct Document<'a> {
    separator: &'a str,
    body: &'a str,
}

fn split_documents(stream: &str) -> Vec<Document<'_>> {
    let mut docs = Vec::new();
    let mut separator = "";
    let mut start = 0;
    let mut offset = 0;

    for line in stream.split_inclusive('\n') {
        if line.trim_end() == "---" {
            if offset > start || !separator.is_empty() {
                docs.push(Document {
                    separator,
                    body: &stream[start..offset],
                });
            }
            separator = line;
            start = offset + line.len();
        }
        offset += line.len();
    }
    if offset > start || !separator.is_empty() {
        docs.push(Document {
            separator,
            body: &stream[start..offset],
        });
    }
    docs
}

/// Apply `patch` to every resource document in `stream`.
///
/// `patch` returns `true` when it modified the document.
///
/// # Errors
///
/// Returns an error if a document is not valid YAML or `patch` fails.
pub fn patch_documents<F>(stream: &str, mut patch: F) -> Result<String>
where
    F: FnMut(&mut Value) -> Result<bool>,
{
    let mut out = String::with_capacity(stream.len());
    for doc in split_documents(stream) {
        out.push_str(doc.separator);

        let mut value: Value = serde_yaml::from_str(doc.body)?;
        if value.is_mapping() && patch(&mut value)? {
            out.push_str(&serde_yaml::to_string(&value)?);
        } else {
            out.push_str(doc.body);
        }
    }
    Ok(out)
}

/// Append `entry` to the `env` list of the container named `container` in a
/// workload's pod template, creating the list when needed.
///
/// Returns whether a matching container was found.
pub fn append_container_env(doc: &mut Value, container: &str, entry: &Value) -> bool {
    let Some(containers) = doc
        .get_mut("spec")
        .and_then(|s| s.get_mut("template"))
        .and_then(|t| t.get_mut("spec"))
        .and_then(|s| s.get_mut("containers"))
        .and_then(Value::as_sequence_mut)
    else {
        return false;
    };

    let mut found = false;
    for c in containers.iter_mut() {
        if c["name"].as_str() != Some(container) {
            continue;
        }
        let Some(map) = c.as_mapping_mut() else {
            continue;
        };
        let env = map
            .entry(Value::from("env"))
            .or_insert_with(|| Value::Sequence(Vec::new()));
        if !env.is_sequence() {
            *env = Value::Sequence(Vec::new());
        }
        if let Some(list) = env.as_sequence_mut() {
            list.push(entry.clone());
            found = true;
        }
    }
    found
}

/// An env entry reading `key` from the secret `secret`.
#[must_use]
pub fn secret_env_var(name: &str, secret: &str, key: &str) -> Value {
    let mut selector = Mapping::new();
    selector.insert("name".into(), secret.into());
    selector.insert("key".into(), key.into());
    let mut value_from = Mapping::new();
    value_from.insert("secretKeyRef".into(), Value::Mapping(selector));
    let mut entry = Mapping::new();
    entry.insert("name".into(), name.into());
    entry.insert("valueFrom".into(), Value::Mapping(value_from));
    Value::Mapping(entry)
}
