//! Per-phase, content-addressed artifact cache.
//!
//! One subdirectory per phase under `<dataDir>/cache/<phase>/`, one
//! `<fingerprint>.json` file per cached artifact. Writes go to a sibling
//! `.tmp` file and are renamed into place, the same crash-safety shape the
//! teacher uses for session journals (write, flush, only then treat it as
//! committed) — a rename is atomic on the same filesystem, so a reader never
//! observes a half-written artifact.
//!
//! Fingerprints are computed over the canonical JSON serialization of a
//! phase's declared inputs. `serde_json::Value` without the `preserve_order`
//! feature is backed by a `BTreeMap`, so struct field order never leaks into
//! the digest — two logically-identical inputs serialize identically
//! regardless of the order their fields were constructed in.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::error::Error;

/// Compute the cache key for a phase's declared inputs. Two calls with
/// structurally-equal `inputs` (field order irrelevant) always return the
/// same digest.
pub fn fingerprint(inputs: &impl Serialize) -> Result<String, Error> {
    let canonical = serde_json::to_value(inputs)
        .map_err(|e| Error::Internal(format!("failed to serialize cache inputs: {e}")))?;
    let bytes = serde_json::to_vec(&canonical)
        .map_err(|e| Error::Internal(format!("failed to serialize cache inputs: {e}")))?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{digest:x}"))
}

#[derive(Clone)]
pub struct PhaseCache {
    dir: PathBuf,
}

impl PhaseCache {
    pub fn new(data_dir: &Path, phase: &str) -> Self {
        Self {
            dir: data_dir.join("cache").join(phase),
        }
    }

    fn artifact_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.json"))
    }

    /// Cache probe. A missing or corrupt file is a miss, never an error —
    /// the phase simply recomputes.
    pub async fn load(&self, fingerprint: &str) -> Option<serde_json::Value> {
        let bytes = fs::read(self.artifact_path(fingerprint)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Durable, additive write. Never invalidates another entry.
    pub async fn store(&self, fingerprint: &str, artifact: &serde_json::Value) -> Result<(), Error> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Internal(format!("failed to create cache dir: {e}")))?;

        let final_path = self.artifact_path(fingerprint);
        let tmp_path = self.dir.join(format!("{fingerprint}.json.tmp"));
        let bytes = serde_json::to_vec_pretty(artifact)
            .map_err(|e| Error::Internal(format!("failed to serialize artifact: {e}")))?;

        fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| Error::Internal(format!("failed to write cache artifact: {e}")))?;
        fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| Error::Internal(format!("failed to commit cache artifact: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Inputs {
        model: String,
        digest: String,
    }

    #[test]
    fn fingerprint_is_stable_regardless_of_field_construction_order() {
        let a = fingerprint(&Inputs {
            model: "m1".to_string(),
            digest: "abc".to_string(),
        })
        .unwrap();
        let b = fingerprint(&serde_json::json!({ "digest": "abc", "model": "m1" })).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_changes_when_inputs_change() {
        let a = fingerprint(&serde_json::json!({ "model": "m1" })).unwrap();
        let b = fingerprint(&serde_json::json!({ "model": "m2" })).unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PhaseCache::new(dir.path(), "analyze");
        let artifact = serde_json::json!({ "overview": "does a thing" });

        cache.store("deadbeef", &artifact).await.unwrap();
        let loaded = cache.load("deadbeef").await.unwrap();
        assert_eq!(loaded, artifact);
    }

    #[tokio::test]
    async fn load_of_unknown_key_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PhaseCache::new(dir.path(), "analyze");
        assert!(cache.load("never-written").await.is_none());
    }
}
