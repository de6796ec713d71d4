//! File helpers shared by the model and label-map writers.

use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};

/// Write `bytes` to a sibling temporary file, then rename it over `path`.
///
/// Readers never observe a half-written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    replace_with(path, |tmp| std::fs::write(tmp, bytes)).map(drop)
}

/// Let `write` produce a sibling temporary file, then rename it over `path`.
///
/// The temporary name keeps `path`'s extension, since OpenCV picks the
/// storage format from it. Returns the bytes that were written.
pub(crate) fn replace_with<E>(
    path: &Path,
    write: impl FnOnce(&Path) -> Result<(), E>,
) -> Result<Vec<u8>, E>
where
    E: From<io::Error>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    let staged = write(&tmp).and_then(|()| Ok(std::fs::read(&tmp)?));
    let bytes = match staged {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
    };
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(bytes)
}

/// `dir/name.ext` -> `dir/name.tmp.ext`.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_stem().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

/// Lowercase hex SHA-256 of `bytes`.
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
