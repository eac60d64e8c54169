//! Archive extraction and executable placement.
//!
//! Everything here is blocking; callers run it on `spawn_blocking`.

use std::fs;
use std::path::{Path, PathBuf};

use super::InstallError;

/// Extract a `.zip`, `.tar.gz` or `.tgz` archive into `dest`.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<(), InstallError> {
    fs::create_dir_all(dest)?;

    let name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if name.ends_with(".zip") {
        extract_zip(archive_path, dest)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tarball(archive_path, dest)
    } else {
        Err(InstallError::extract(format!(
            "unsupported archive type: {}",
            archive_path.display()
        )))
    }
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<(), InstallError> {
    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(InstallError::extract)?;
    archive.extract(dest).map_err(InstallError::extract)?;
    Ok(())
}

fn extract_tarball(archive_path: &Path, dest: &Path) -> Result<(), InstallError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let file = fs::File::open(archive_path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);

    archive.unpack(dest).map_err(InstallError::extract)?;

    Ok(())
}

/// Recursively search `root` for a regular file named `executable`.
pub fn find_executable(root: &Path, executable: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    let mut subdirs = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            subdirs.push(path);
        } else if file_type.is_file() && entry.file_name() == executable {
            return Some(path);
        }
    }

    subdirs.sort();
    subdirs
        .iter()
        .find_map(|dir| find_executable(dir, executable))
}

/// Move `source` over `dest` and mark it executable.
///
/// On unix the rename replaces `dest` atomically.
pub fn swap_in(source: &Path, dest: &Path) -> Result<(), InstallError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(source, fs::Permissions::from_mode(0o755))?;
    }

    #[cfg(not(unix))]
    {
        if dest.exists() {
            fs::remove_file(dest)?;
        }
    }

    fs::rename(source, dest)?;
    Ok(())
}
