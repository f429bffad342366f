//! On-disk persistence for trained quantization models
//!
//! A model is saved as a directory of co-located artifacts plus a manifest:
//!
//! ```text
//! model_dir/
//! ├── projection.bin    # PCA mean and components
//! ├── mean.bin          # mean of the PCA-reduced corpus
//! ├── permutation.bin   # balanced permutation and rotation matrix
//! ├── quantizer.bin     # LOPQ coarse/fine quantizer
//! ├── codes.bin         # codes of the training corpus
//! └── manifest.json     # sizes and CRC32 of every artifact
//! ```
//!
//! Every file is written to a temporary path, synced and renamed. The manifest
//! is removed first and written last, so a directory whose manifest lists all
//! five artifacts with matching checksums always holds one complete model.

use crate::quantize::{BalancedRotation, LopqCode, LopqQuantizer, PcaReduction, QuantizationModel};
use crate::storage::compression::{self, Codec};
use crate::{Result, RetrievalError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

const FORMAT_VERSION: u32 = 1;
const MANIFEST_FILE: &str = "manifest.json";
const ARTIFACT_EXTENSION: &str = "bin";
const TMP_EXTENSION: &str = "tmp";

/// Artifacts that make up one model, in write order
pub const ARTIFACTS: [&str; 5] = ["projection", "mean", "permutation", "quantizer", "codes"];

/// Size and checksum of one stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub name: String,
    pub original_size: usize,
    pub stored_size: usize,
    pub crc32: u32,
}

/// Description of a saved model, written after all artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub version: u32,
    pub created_at: u64,
    pub codec: Codec,
    pub input_dim: usize,
    pub reduced_dim: usize,
    pub corpus_size: usize,
    pub artifacts: Vec<ArtifactEntry>,
}

impl ModelManifest {
    fn entry(&self, name: &str) -> Option<&ArtifactEntry> {
        self.artifacts.iter().find(|a| a.name == name)
    }
}

#[derive(Serialize, Deserialize)]
struct PermutationArtifact {
    permutation: Vec<usize>,
    matrix: Vec<f32>,
}

/// Reads and writes a [`QuantizationModel`] in one directory
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
    codec: Codec,
}

impl ModelStore {
    /// Open (creating if needed) a model directory with gzip compression
    ///
    /// # Errors
    ///
    /// `StorageError` if the directory cannot be created or the path is not a
    /// directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_codec(dir, Codec::Gzip)
    }

    pub fn with_codec(dir: impl AsRef<Path>, codec: Codec) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| {
                RetrievalError::StorageError(format!("Failed to create model directory: {}", e))
            })?;
        }
        if !dir.is_dir() {
            return Err(RetrievalError::StorageError(format!(
                "Model path is not a directory: {}",
                dir.display()
            )));
        }
        Ok(Self { dir, codec })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a manifest is present (the set may still fail verification)
    pub fn exists(&self) -> bool {
        self.manifest_path().exists()
    }

    /// Persist every artifact, then the manifest
    pub fn save(&self, model: &QuantizationModel) -> Result<ModelManifest> {
        // An interrupted save must not leave an old manifest vouching for new files
        let manifest_path = self.manifest_path();
        if manifest_path.exists() {
            fs::remove_file(&manifest_path)?;
        }

        let rotation = model.rotation();
        let permutation = PermutationArtifact {
            permutation: rotation.permutation().to_vec(),
            matrix: rotation.matrix().to_vec(),
        };

        let artifacts = vec![
            self.write_artifact("projection", model.pca())?,
            self.write_artifact("mean", &rotation.mean().to_vec())?,
            self.write_artifact("permutation", &permutation)?,
            self.write_artifact("quantizer", model.quantizer())?,
            self.write_artifact("codes", &model.corpus_codes().to_vec())?,
        ];

        let manifest = ModelManifest {
            version: FORMAT_VERSION,
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            codec: self.codec,
            input_dim: model.input_dim(),
            reduced_dim: model.reduced_dim(),
            corpus_size: model.corpus_codes().len(),
            artifacts,
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| RetrievalError::StorageError(format!("Manifest serialization failed: {}", e)))?;
        write_atomic(&manifest_path, &manifest_bytes)?;

        info!(
            dir = %self.dir.display(),
            input_dim = manifest.input_dim,
            reduced_dim = manifest.reduced_dim,
            corpus_size = manifest.corpus_size,
            "saved quantization model"
        );
        Ok(manifest)
    }

    /// Read the manifest without loading artifacts
    pub fn manifest(&self) -> Result<ModelManifest> {
        let path = self.manifest_path();
        if !path.exists() {
            return Err(RetrievalError::ModelArtifactIncomplete {
                missing: self.missing_files(),
            });
        }
        let bytes = fs::read(&path)?;
        let manifest: ModelManifest = serde_json::from_slice(&bytes)
            .map_err(|e| RetrievalError::StorageError(format!("Invalid manifest: {}", e)))?;
        if manifest.version != FORMAT_VERSION {
            return Err(RetrievalError::StorageError(format!(
                "Incompatible model format: expected {}, got {}",
                FORMAT_VERSION, manifest.version
            )));
        }
        Ok(manifest)
    }

    /// Load and verify the full artifact set
    ///
    /// # Errors
    ///
    /// `ModelArtifactIncomplete` if the manifest or any artifact is missing or
    /// not listed, `StorageError` on a size or checksum mismatch.
    pub fn load(&self) -> Result<QuantizationModel> {
        let missing = self.missing_files();
        if !missing.is_empty() {
            return Err(RetrievalError::ModelArtifactIncomplete { missing });
        }
        let manifest = self.manifest()?;
        let unlisted: Vec<String> = ARTIFACTS
            .iter()
            .filter(|name| manifest.entry(name).is_none())
            .map(|name| name.to_string())
            .collect();
        if !unlisted.is_empty() {
            return Err(RetrievalError::ModelArtifactIncomplete { missing: unlisted });
        }

        let pca: PcaReduction = self.read_artifact(&manifest, "projection")?;
        let mean: Vec<f32> = self.read_artifact(&manifest, "mean")?;
        let permutation: PermutationArtifact = self.read_artifact(&manifest, "permutation")?;
        let quantizer: LopqQuantizer = self.read_artifact(&manifest, "quantizer")?;
        let codes: Vec<LopqCode> = self.read_artifact(&manifest, "codes")?;

        let rotation = BalancedRotation::from_parts(mean, permutation.permutation, permutation.matrix)?;
        let model = QuantizationModel::from_parts(pca, rotation, quantizer, codes)?;

        info!(
            dir = %self.dir.display(),
            input_dim = model.input_dim(),
            corpus_size = model.corpus_codes().len(),
            "loaded quantization model"
        );
        Ok(model)
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    fn artifact_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, ARTIFACT_EXTENSION))
    }

    fn missing_files(&self) -> Vec<String> {
        let mut missing: Vec<String> = ARTIFACTS
            .iter()
            .filter(|name| !self.artifact_path(name).exists())
            .map(|name| name.to_string())
            .collect();
        if !self.manifest_path().exists() {
            missing.push("manifest".to_string());
        }
        missing
    }

    fn write_artifact<T: Serialize + ?Sized>(&self, name: &str, item: &T) -> Result<ArtifactEntry> {
        let serialized = bincode::serialize(item)?;
        let stored = compression::compress(&serialized, self.codec)?;
        write_atomic(&self.artifact_path(name), &stored)?;
        debug!(artifact = name, original = serialized.len(), stored = stored.len(), "wrote artifact");

        Ok(ArtifactEntry {
            name: name.to_string(),
            original_size: serialized.len(),
            stored_size: stored.len(),
            crc32: crc32fast::hash(&stored),
        })
    }

    fn read_artifact<T: DeserializeOwned>(&self, manifest: &ModelManifest, name: &str) -> Result<T> {
        let entry = manifest
            .entry(name)
            .ok_or_else(|| RetrievalError::ModelArtifactIncomplete {
                missing: vec![name.to_string()],
            })?;
        let stored = fs::read(self.artifact_path(name))?;

        if stored.len() != entry.stored_size {
            return Err(RetrievalError::StorageError(format!(
                "Artifact {} size mismatch: manifest {}, file {}",
                name,
                entry.stored_size,
                stored.len()
            )));
        }
        let crc = crc32fast::hash(&stored);
        if crc != entry.crc32 {
            return Err(RetrievalError::StorageError(format!(
                "Artifact {} checksum mismatch: manifest {:08x}, file {:08x}",
                name, entry.crc32, crc
            )));
        }

        let serialized = compression::decompress(&stored)?;
        Ok(bincode::deserialize(&serialized)?)
    }
}

/// Write to a temporary sibling, sync, then rename over `path`
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension(TMP_EXTENSION);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        RetrievalError::IoError(e)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainerConfig;
    use crate::quantize::ModelTrainer;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    fn trained_model() -> QuantizationModel {
        let mut rng = StdRng::seed_from_u64(21);
        let data: Vec<Vec<f32>> = (0..60)
            .map(|i| {
                let center = if i % 2 == 0 { -3.0 } else { 3.0 };
                (0..8).map(|_| center + rng.gen_range(-1.0..1.0)).collect()
            })
            .collect();
        let config = TrainerConfig::default()
            .with_components(4)
            .with_coarse_clusters(2)
            .with_subquantizers(2)
            .with_sub_clusters(8)
            .without_recall();
        ModelTrainer::new(config).fit(&data).unwrap()
    }

    #[test]
    fn test_save_load_preserves_model() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();
        let model = trained_model();

        let manifest = store.save(&model).unwrap();
        assert_eq!(manifest.artifacts.len(), ARTIFACTS.len());
        assert_eq!(manifest.corpus_size, 60);
        assert!(store.exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.corpus_codes(), model.corpus_codes());
        assert_eq!(loaded.rotation(), model.rotation());

        let probe = vec![0.5f32; 8];
        assert_eq!(loaded.encode(&probe).unwrap(), model.encode(&probe).unwrap());
    }

    #[test]
    fn test_uncompressed_store() {
        let dir = tempdir().unwrap();
        let store = ModelStore::with_codec(dir.path(), Codec::None).unwrap();
        let model = trained_model();
        let manifest = store.save(&model).unwrap();
        assert_eq!(manifest.codec, Codec::None);
        assert_eq!(store.load().unwrap().corpus_codes(), model.corpus_codes());
    }

    #[test]
    fn test_no_temp_files_left() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();
        store.save(&trained_model()).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == TMP_EXTENSION).unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_missing_artifact_is_incomplete() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();
        store.save(&trained_model()).unwrap();
        fs::remove_file(dir.path().join("codes.bin")).unwrap();

        match store.load() {
            Err(RetrievalError::ModelArtifactIncomplete { missing }) => {
                assert_eq!(missing, vec!["codes".to_string()]);
            }
            other => panic!("expected ModelArtifactIncomplete, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_manifest_is_incomplete() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();
        store.save(&trained_model()).unwrap();
        fs::remove_file(dir.path().join(MANIFEST_FILE)).unwrap();

        assert!(!store.exists());
        assert!(matches!(
            store.load(),
            Err(RetrievalError::ModelArtifactIncomplete { missing }) if missing == vec!["manifest".to_string()]
        ));
    }

    #[test]
    fn test_empty_directory_lists_everything() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();
        match store.load() {
            Err(RetrievalError::ModelArtifactIncomplete { missing }) => assert_eq!(missing.len(), 6),
            other => panic!("expected ModelArtifactIncomplete, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_corrupted_artifact_detected() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();
        store.save(&trained_model()).unwrap();

        let path = dir.path().join("quantizer.bin");
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(store.load(), Err(RetrievalError::StorageError(_))));
    }

    #[test]
    fn test_artifact_from_other_save_detected() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();
        store.save(&trained_model()).unwrap();

        // Replace one artifact with a differently sized payload
        fs::write(dir.path().join("mean.bin"), compression::compress(b"x", Codec::None).unwrap()).unwrap();
        assert!(matches!(store.load(), Err(RetrievalError::StorageError(_))));
    }

    #[test]
    fn test_path_is_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("not_a_dir");
        fs::write(&file_path, b"x").unwrap();
        assert!(ModelStore::new(&file_path).is_err());
    }
}
