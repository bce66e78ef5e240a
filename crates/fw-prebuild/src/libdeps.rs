use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::{Error, Result};

/// Manifest files that let the orchestrator consider a library installed.
pub const DEFAULT_KEEP: &[&str] = &[".piopm", "library.json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneOutcome {
    Missing,
    AlreadyPruned,
    Pruned { removed: usize },
}

/// Empties an installed library directory except for its manifest files.
///
/// The library stays "installed" from the orchestrator's point of view, but
/// none of its sources take part in the build.
pub fn prune_library(dir: &Path, keep: &[String]) -> Result<PruneOutcome> {
    let entries = match fs::read_dir(dir) {
        Ok(rd) => rd.collect::<std::io::Result<Vec<_>>>().map_err(|e| {
            Error::msg(format!("failed to list {}: {e}", dir.display()))
        })?,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PruneOutcome::Missing),
        Err(e) => return Err(Error::msg(format!("failed to list {}: {e}", dir.display()))),
    };
    if entries.len() <= keep.len() {
        return Ok(PruneOutcome::AlreadyPruned);
    }

    let mut kept = Vec::with_capacity(keep.len());
    for name in keep {
        crate::project::validate_rel_like_path(name)?;
        let path = dir.join(name);
        let bytes = fs::read(&path)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
        kept.push((path, bytes));
    }

    fs::remove_dir_all(dir)
        .map_err(|e| Error::msg(format!("failed to remove dir {}: {e}", dir.display())))?;
    fs::create_dir_all(dir)
        .map_err(|e| Error::msg(format!("failed to create dir {}: {e}", dir.display())))?;
    for (path, bytes) in kept {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::msg(format!("failed to create dir {}: {e}", parent.display()))
            })?;
        }
        fs::write(&path, bytes)
            .map_err(|e| Error::msg(format!("failed to write {}: {e}", path.display())))?;
    }

    Ok(PruneOutcome::Pruned {
        removed: entries.len().saturating_sub(keep.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keep() -> Vec<String> {
        DEFAULT_KEEP.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keeps_manifests_and_drops_sources() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let lib = tmp.path().join("Ethernet_Generic");
        fs::create_dir_all(lib.join("src")).expect("mkdir");
        fs::write(lib.join(".piopm"), "{\"name\":\"Ethernet_Generic\"}").expect("write piopm");
        fs::write(lib.join("library.json"), "{\"version\":\"2.8.1\"}").expect("write manifest");
        fs::write(lib.join("src/Ethernet.h"), "#define MAX_SOCK_NUM 8\n").expect("write header");
        fs::write(lib.join("README.md"), "docs").expect("write readme");

        let outcome = prune_library(&lib, &keep()).unwrap();
        assert_eq!(outcome, PruneOutcome::Pruned { removed: 2 });

        let mut names: Vec<String> = fs::read_dir(&lib)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![".piopm", "library.json"]);
        assert_eq!(
            fs::read_to_string(lib.join("library.json")).unwrap(),
            "{\"version\":\"2.8.1\"}"
        );

        assert_eq!(prune_library(&lib, &keep()).unwrap(), PruneOutcome::AlreadyPruned);
    }

    #[test]
    fn missing_library_is_skipped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        assert_eq!(
            prune_library(&tmp.path().join("nope"), &keep()).unwrap(),
            PruneOutcome::Missing
        );
    }

    #[test]
    fn missing_manifest_is_an_error_and_leaves_sources() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let lib = tmp.path().join("lib");
        fs::create_dir_all(&lib).expect("mkdir");
        fs::write(lib.join("library.json"), "{}").expect("write");
        fs::write(lib.join("a.cpp"), "").expect("write");
        fs::write(lib.join("b.cpp"), "").expect("write");

        let err = prune_library(&lib, &keep()).unwrap_err().to_string();
        assert!(err.contains(".piopm"), "unexpected err: {err}");
        assert!(lib.join("a.cpp").exists());
    }
}
