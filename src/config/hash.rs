//! Deterministic hashing for change detection.
//!
//! Every hash here is a hex-encoded SHA-256 over a canonical byte form, so
//! equal inputs hash equal across runs and machines.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;

use crate::state::PropertyMap;

use super::spec::StackConfig;

/// Hasher for stacks, property maps and file content.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hashes a property map.
    ///
    /// `PropertyMap` is ordered and `serde_json` objects are sorted, so the
    /// JSON encoding is canonical.
    #[must_use]
    pub fn hash_properties(&self, properties: &PropertyMap) -> String {
        let bytes = serde_json::to_vec(properties).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Hashes a whole stack file. Changes when any declared value changes.
    #[must_use]
    pub fn hash_stack(&self, config: &StackConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update(config.project.stack.as_bytes());
        hasher.update(config.prefix().as_bytes());

        for (key, value) in &config.defaults.tags {
            hasher.update(key.as_bytes());
            hasher.update(value.as_bytes());
        }

        hasher.update([u8::from(config.policy.allow_replace)]);

        for resource in &config.resources {
            hasher.update(resource.type_name.as_bytes());
            hasher.update(resource.name.as_bytes());
            hasher.update(self.hash_properties(&resource.inputs).as_bytes());
            for dependency in &resource.depends_on {
                hasher.update(dependency.as_bytes());
            }
            hasher.update([u8::from(resource.protect)]);
        }

        hex::encode(hasher.finalize())
    }

    /// Hashes a set of named blobs, independent of the order they are given in.
    ///
    /// Names and lengths are framed so that moving bytes between adjacent
    /// entries changes the hash.
    #[must_use]
    pub fn hash_content<'a, I>(&self, entries: I) -> String
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let mut entries: Vec<_> = entries.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut hasher = Sha256::new();
        for (name, content) in entries {
            hasher.update((name.len() as u64).to_be_bytes());
            hasher.update(name.as_bytes());
            hasher.update((content.len() as u64).to_be_bytes());
            hasher.update(content);
        }

        hex::encode(hasher.finalize())
    }

    /// Hashes a set of named files the way [`hash_content`](Self::hash_content)
    /// hashes the same bytes held in memory.
    ///
    /// Each file is streamed into the digest. This blocks on file I/O.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or changes size while it is
    /// being hashed.
    pub fn hash_files<'a, I>(&self, entries: I) -> io::Result<String>
    where
        I: IntoIterator<Item = (&'a str, &'a Path)>,
    {
        let mut entries: Vec<_> = entries.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut hasher = Sha256::new();
        for (name, path) in entries {
            let mut file = File::open(path)?;
            let expected = file.metadata()?.len();

            hasher.update((name.len() as u64).to_be_bytes());
            hasher.update(name.as_bytes());
            hasher.update(expected.to_be_bytes());
            let copied = io::copy(&mut file, &mut hasher)?;

            if copied != expected {
                return Err(io::Error::other(format!(
                    "{} changed while hashing ({expected} bytes expected, {copied} read)",
                    path.display()
                )));
            }
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_hash_ignores_insertion_order() {
        let hasher = ConfigHasher::new();

        let mut a = PropertyMap::new();
        a.insert(String::from("accountName"), json!("demo02sa"));
        a.insert(String::from("indexDocument"), json!("index.html"));

        let mut b = PropertyMap::new();
        b.insert(String::from("indexDocument"), json!("index.html"));
        b.insert(String::from("accountName"), json!("demo02sa"));

        assert_eq!(hasher.hash_properties(&a), hasher.hash_properties(&b));
    }

    #[test]
    fn test_property_hash_detects_changes() {
        let hasher = ConfigHasher::new();

        let mut a = PropertyMap::new();
        a.insert(String::from("accountName"), json!("a1"));
        let mut b = a.clone();
        b.insert(String::from("accountName"), json!("a2"));

        assert_ne!(hasher.hash_properties(&a), hasher.hash_properties(&b));
    }

    #[test]
    fn test_content_hash_is_order_independent_and_framed() {
        let hasher = ConfigHasher::new();

        let forward = hasher.hash_content([("a.html", &b"x"[..]), ("b.html", &b"y"[..])]);
        let backward = hasher.hash_content([("b.html", &b"y"[..]), ("a.html", &b"x"[..])]);
        assert_eq!(forward, backward);

        let shifted = hasher.hash_content([("a.html", &b"xy"[..]), ("b.html", &b""[..])]);
        assert_ne!(forward, shifted);
    }

    #[test]
    fn test_file_hash_matches_content_hash() {
        let dir = tempfile::TempDir::new().unwrap();
        let index = dir.path().join("index.html");
        let style = dir.path().join("site.css");
        std::fs::write(&index, "<h1>hi</h1>").unwrap();
        std::fs::write(&style, "body{}").unwrap();

        let hasher = ConfigHasher::new();
        let streamed = hasher
            .hash_files([("site.css", style.as_path()), ("index.html", index.as_path())])
            .unwrap();
        let buffered = hasher.hash_content([("index.html", &b"<h1>hi</h1>"[..]), ("site.css", &b"body{}"[..])]);

        assert_eq!(streamed, buffered);
        assert!(hasher.hash_files([("gone.html", dir.path().join("gone.html").as_path())]).is_err());
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");

        assert_eq!(short, "abcdef12");
    }
}
