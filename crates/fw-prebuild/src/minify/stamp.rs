use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const STAMP_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub version: u32,
    pub inputs: String,
    pub outputs: String,
}

/// Sibling of the output root so the stamp never shows up inside the image.
pub fn stamp_path(out_root: &Path) -> PathBuf {
    let name = out_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".into());
    out_root.with_file_name(format!(".{name}.fwprep-stamp.json"))
}

fn hash_file(hasher: &mut Sha256, rel: &Path, path: &Path) -> Result<()> {
    let bytes =
        fs::read(path).map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
    hasher.update(rel.to_string_lossy().as_bytes());
    hasher.update([0u8]);
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(&bytes);
    Ok(())
}

/// Digest of the pipeline inputs: each source (relative path and content) plus `salt`.
pub fn input_digest(src_root: &Path, sources: &[PathBuf], salt: &str) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    for path in sources {
        let rel = path.strip_prefix(src_root).unwrap_or(path);
        hash_file(&mut hasher, rel, path)?;
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Digest of every file and directory currently under `root`.
pub fn tree_digest(root: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    for entry in walkdir::WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if entry.file_type().is_dir() {
            hasher.update(b"d:");
            hasher.update(rel.to_string_lossy().as_bytes());
            hasher.update([0u8]);
        } else {
            hasher.update(b"f:");
            hash_file(&mut hasher, rel, entry.path())?;
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn read(out_root: &Path) -> Option<Stamp> {
    let raw = fs::read_to_string(stamp_path(out_root)).ok()?;
    serde_json::from_str(&raw).ok()
}

/// True when the output tree still matches what the last run produced for `inputs`.
pub fn is_current(out_root: &Path, inputs: &str) -> Result<bool> {
    let Some(stamp) = read(out_root) else {
        return Ok(false);
    };
    if stamp.version != STAMP_VERSION || stamp.inputs != inputs || !out_root.is_dir() {
        return Ok(false);
    }
    Ok(tree_digest(out_root)? == stamp.outputs)
}

pub fn write(out_root: &Path, inputs: &str) -> Result<()> {
    let stamp = Stamp {
        version: STAMP_VERSION,
        inputs: inputs.to_string(),
        outputs: tree_digest(out_root)?,
    };
    let path = stamp_path(out_root);
    let s = serde_json::to_string_pretty(&stamp)
        .map_err(|e| Error::msg(format!("json encode error: {e}")))?;
    fs::write(&path, s).map_err(|e| Error::msg(format!("failed to write {}: {e}", path.display())))
}

pub fn remove(out_root: &Path) -> Result<()> {
    let path = stamp_path(out_root);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::msg(format!("failed to remove {}: {e}", path.display()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_sits_next_to_output_root() {
        assert_eq!(
            stamp_path(Path::new("/b/env/data")),
            PathBuf::from("/b/env/.data.fwprep-stamp.json")
        );
    }

    #[test]
    fn tree_digest_tracks_stray_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("out");
        fs::create_dir_all(root.join("css")).expect("mkdir");
        fs::write(root.join("css/a.css"), "a{}").expect("write");

        let before = tree_digest(&root).unwrap();
        assert_eq!(before, tree_digest(&root).unwrap());

        write(&root, "inputs").unwrap();
        assert!(is_current(&root, "inputs").unwrap());
        assert!(!is_current(&root, "other-inputs").unwrap());

        fs::write(root.join("stray.txt"), "x").expect("write stray");
        assert_ne!(before, tree_digest(&root).unwrap());
        assert!(!is_current(&root, "inputs").unwrap());
    }
}
