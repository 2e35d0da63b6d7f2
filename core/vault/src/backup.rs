//! Rotation backups and portable backup archives.

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::info;

use haven_common::{Capabilities, Error, Result};
use haven_storage::paths::{
    CONFIG_FILENAME, PRIVATE_KEY_FILENAME, PUBLIC_KEY_FILENAME, SECRETS_FILENAME,
};
use haven_storage::{write_atomic, StorePaths, MODE_DIR, MODE_PRIVATE, MODE_PUBLIC};

/// Files a backup archive may carry; anything else is rejected on import.
const ARCHIVE_FILES: [&str; 4] = [
    PUBLIC_KEY_FILENAME,
    PRIVATE_KEY_FILENAME,
    SECRETS_FILENAME,
    CONFIG_FILENAME,
];

/// Write a timestamped backup of the previous key pair before rotation
/// replaces it.
///
/// Key files present on disk are copied byte-for-byte, keeping their
/// protection form. In custodian mode no private key file exists, so
/// `private_pem` (the recovered key) is escrowed instead, owner-read-write
/// only.
pub(crate) fn write_rotation_backup(
    paths: &StorePaths,
    caps: &Capabilities,
    private_pem: &[u8],
) -> Result<PathBuf> {
    let backup_dir = paths
        .backups_dir()
        .join(format!("rotation_{}", Utc::now().format("%Y%m%d_%H%M%S")));
    std::fs::create_dir_all(&backup_dir)?;
    haven_storage::atomic::harden_permissions(paths.backups_dir().as_path(), MODE_DIR, caps)?;
    haven_storage::atomic::harden_permissions(&backup_dir, MODE_DIR, caps)?;

    let public = std::fs::read(paths.public_key_file())?;
    write_atomic(
        &backup_dir.join(PUBLIC_KEY_FILENAME),
        &public,
        MODE_PUBLIC,
        caps,
    )?;

    let live_private = paths.private_key_file();
    let private = if live_private.exists() {
        std::fs::read(&live_private)?
    } else {
        private_pem.to_vec()
    };
    write_atomic(
        &backup_dir.join(PRIVATE_KEY_FILENAME),
        &private,
        MODE_PRIVATE,
        caps,
    )?;

    info!(dir = %backup_dir.display(), "wrote rotation backup");
    Ok(backup_dir)
}

/// Export the vault files into a gzipped tar archive at `dest`.
pub fn export_archive(paths: &StorePaths, dest: &Path) -> Result<()> {
    if !paths.public_key_file().exists() {
        return Err(Error::NotFound(
            "Nothing to export; initialize the vault first".to_string(),
        ));
    }

    let file = std::fs::File::create(dest)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for name in ARCHIVE_FILES {
        let path = paths.base().join(name);
        if path.is_file() {
            builder.append_path_with_name(&path, name)?;
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| Error::Storage(format!("archive finalization failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::Storage(format!("archive finalization failed: {}", e)))?;

    info!(dest = %dest.display(), "exported backup archive");
    Ok(())
}

/// Import vault files from a gzipped tar archive.
///
/// Every entry name is validated before anything is extracted: one plain
/// path component, drawn from the known file set. Absolute paths, parent
/// components, and unknown names are all rejected. Entries are read into
/// memory first; files are only written once the whole archive has
/// validated, so a bad archive leaves the store untouched.
pub fn import_archive(
    paths: &StorePaths,
    caps: &Capabilities,
    src: &Path,
    overwrite: bool,
) -> Result<Vec<String>> {
    if !src.exists() {
        return Err(Error::NotFound(format!(
            "Archive not found: {}",
            src.display()
        )));
    }

    let file = std::fs::File::open(src)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let mut staged: Vec<(String, Vec<u8>)> = Vec::new();
    for entry in archive
        .entries()
        .map_err(|e| Error::Storage(format!("archive is unreadable: {}", e)))?
    {
        let mut entry = entry.map_err(|e| Error::Storage(format!("archive is unreadable: {}", e)))?;
        let entry_path = entry
            .path()
            .map_err(|e| Error::Storage(format!("archive is unreadable: {}", e)))?
            .into_owned();
        let name = validate_entry_name(&entry_path)?;

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        staged.push((name, data));
    }

    if staged.is_empty() {
        return Err(Error::Validation(
            "Archive contains no recognized entries".to_string(),
        ));
    }

    if !overwrite {
        for (name, _) in &staged {
            if paths.base().join(name).exists() {
                return Err(Error::Validation(format!(
                    "'{}' already exists; pass overwrite to replace it",
                    name
                )));
            }
        }
    }

    paths.ensure_base(caps)?;
    let mut imported = Vec::with_capacity(staged.len());
    for (name, data) in &staged {
        let mode = if name == PUBLIC_KEY_FILENAME {
            MODE_PUBLIC
        } else {
            MODE_PRIVATE
        };
        write_atomic(&paths.base().join(name), data, mode, caps)?;
        imported.push(name.clone());
    }

    info!(src = %src.display(), count = imported.len(), "imported backup archive");
    Ok(imported)
}

/// Accept exactly one normal component matching a known vault file.
fn validate_entry_name(path: &Path) -> Result<String> {
    let mut components = path.components();
    let name = match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => name.to_str().ok_or_else(|| {
            Error::Validation(format!(
                "Archive entry '{}' has a non-UTF-8 name",
                path.display()
            ))
        })?,
        _ => {
            return Err(Error::Validation(format!(
                "Archive entry '{}' has an unsafe path",
                path.display()
            )))
        }
    };

    if !ARCHIVE_FILES.contains(&name) {
        return Err(Error::Validation(format!(
            "Archive entry '{}' is not a recognized vault file",
            name
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn caps() -> Capabilities {
        Capabilities::detect()
    }

    fn seed_vault_files(base: &Path) -> StorePaths {
        let paths = StorePaths::new(base);
        std::fs::write(paths.public_key_file(), b"PUBLIC PEM").unwrap();
        std::fs::write(paths.private_key_file(), b"PRIVATE PEM").unwrap();
        std::fs::write(paths.secrets_file(), b"{}").unwrap();
        std::fs::write(paths.config_file(), b"{\"custody\":\"plaintext\"}").unwrap();
        paths
    }

    #[test]
    fn test_export_import_roundtrip() {
        let src_dir = TempDir::new().unwrap();
        let paths = seed_vault_files(src_dir.path());

        let archive_dir = TempDir::new().unwrap();
        let archive = archive_dir.path().join("haven-backup.tar.gz");
        export_archive(&paths, &archive).unwrap();

        let dest_dir = TempDir::new().unwrap();
        let dest_paths = StorePaths::new(dest_dir.path());
        let imported = import_archive(&dest_paths, &caps(), &archive, false).unwrap();

        assert_eq!(imported.len(), 4);
        assert_eq!(
            std::fs::read(dest_paths.private_key_file()).unwrap(),
            b"PRIVATE PEM"
        );
        assert_eq!(std::fs::read(dest_paths.secrets_file()).unwrap(), b"{}");
    }

    #[test]
    fn test_export_without_vault_fails() {
        let empty = TempDir::new().unwrap();
        let paths = StorePaths::new(empty.path());
        let dest = empty.path().join("out.tar.gz");
        assert!(matches!(
            export_archive(&paths, &dest),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_import_rejects_unsafe_entry_paths() {
        // Hand-build an archive whose entry name nests below a directory.
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("evil.tar.gz");
        {
            let file = std::fs::File::create(&archive_path).unwrap();
            let encoder = GzEncoder::new(file, Compression::default());
            let mut builder = tar::Builder::new(encoder);

            let data = b"owned";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_cksum();
            builder
                .append_data(&mut header, "nested/secrets.json", &data[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let dest = TempDir::new().unwrap();
        let dest_paths = StorePaths::new(dest.path());
        assert!(matches!(
            import_archive(&dest_paths, &caps(), &archive_path, false),
            Err(Error::Validation(_))
        ));
        assert!(!dest.path().join("nested").exists());
    }

    #[test]
    fn test_import_rejects_unknown_entries() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("extra.tar.gz");
        {
            let file = std::fs::File::create(&archive_path).unwrap();
            let encoder = GzEncoder::new(file, Compression::default());
            let mut builder = tar::Builder::new(encoder);

            let data = b"stray";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_cksum();
            builder
                .append_data(&mut header, "stray.txt", &data[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let dest = TempDir::new().unwrap();
        let dest_paths = StorePaths::new(dest.path());
        assert!(matches!(
            import_archive(&dest_paths, &caps(), &archive_path, false),
            Err(Error::Validation(_))
        ));
        assert!(!dest.path().join("stray.txt").exists());
    }

    #[test]
    fn test_import_conflict_without_overwrite() {
        let src_dir = TempDir::new().unwrap();
        let paths = seed_vault_files(src_dir.path());
        let archive = src_dir.path().join("backup.tar.gz");
        export_archive(&paths, &archive).unwrap();

        let dest_dir = TempDir::new().unwrap();
        let dest_paths = StorePaths::new(dest_dir.path());
        std::fs::write(dest_paths.secrets_file(), b"existing").unwrap();

        assert!(matches!(
            import_archive(&dest_paths, &caps(), &archive, false),
            Err(Error::Validation(_))
        ));
        // Nothing was written, including the non-conflicting entries.
        assert_eq!(std::fs::read(dest_paths.secrets_file()).unwrap(), b"existing");
        assert!(!dest_paths.public_key_file().exists());

        let imported = import_archive(&dest_paths, &caps(), &archive, true).unwrap();
        assert_eq!(imported.len(), 4);
        assert_eq!(std::fs::read(dest_paths.secrets_file()).unwrap(), b"{}");
    }

    #[test]
    fn test_import_missing_archive_not_found() {
        let dir = TempDir::new().unwrap();
        let paths = StorePaths::new(dir.path());
        assert!(matches!(
            import_archive(&paths, &caps(), &dir.path().join("absent.tar.gz"), false),
            Err(Error::NotFound(_))
        ));
    }
}
