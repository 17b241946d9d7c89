use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use zip::ZipArchive;

use crate::error::RefprepError;

/// Extract a zip archive into `target_dir`. Every entry is decoded once up
/// front, so a corrupt or traversal-carrying archive never leaves a partial
/// tree behind.
pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), RefprepError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        RefprepError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| RefprepError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| RefprepError::Filesystem(err.to_string()))?;
        if entry.enclosed_name().is_none() {
            return Err(RefprepError::Filesystem(
                "zip entry path traversal detected".to_string(),
            ));
        }
        if !entry.is_dir() {
            io::copy(&mut entry, &mut io::sink())
                .map_err(|err| RefprepError::Filesystem(err.to_string()))?;
        }
    }

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| RefprepError::Filesystem(err.to_string()))?;
        // enclosed_name was checked in the validation pass
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let entry_path = target_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| RefprepError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| RefprepError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| RefprepError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| RefprepError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

/// Recursively collect files whose name ends with one of `suffixes`.
/// Suffix matching is case-insensitive and covers multi-part extensions
/// like `.fa.gz`, which `Path::extension` cannot express.
pub fn find_with_suffixes(root: &Path, suffixes: &[&str]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        if let Ok(entries) = fs::read_dir(&path) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if matches_suffix(&path, suffixes) {
                    out.push(path);
                }
            }
        }
    }
    out.sort();
    out
}

pub fn find_first_with_suffixes(root: &Path, suffixes: &[&str]) -> Option<PathBuf> {
    find_with_suffixes(root, suffixes).into_iter().next()
}

fn matches_suffix(path: &Path, suffixes: &[&str]) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    let lowered = name.to_lowercase();
    suffixes
        .iter()
        .any(|suffix| lowered.ends_with(&suffix.to_lowercase()))
}

/// Recursively collect directories whose name matches `name` exactly.
pub fn find_dirs_named(root: &Path, name: &str) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        if let Ok(entries) = fs::read_dir(&path) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    if path.file_name().and_then(|value| value.to_str()) == Some(name) {
                        out.push(path.clone());
                    }
                    stack.push(path);
                }
            }
        }
    }
    out.sort();
    out
}

/// Decode the whole gzip stream so truncated downloads are caught before a
/// later run's skip-if-exists check trusts the file.
pub fn validate_gzip(path: &Path) -> Result<(), RefprepError> {
    let file = fs::File::open(path)
        .map_err(|err| RefprepError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut decoder = GzDecoder::new(file);
    io::copy(&mut decoder, &mut io::sink()).map_err(|err| {
        RefprepError::Filesystem(format!("corrupt gzip {}: {err}", path.display()))
    })?;
    Ok(())
}

/// Write via a sibling temp file and rename so readers never observe a
/// partially written file.
pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), RefprepError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| RefprepError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".refprep")
        .tempfile_in(parent)
        .map_err(|err| RefprepError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| RefprepError::Filesystem(err.to_string()))?;
    temp.persist(path)
        .map_err(|err| RefprepError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn remove_dir_if_empty(path: &Path) {
    let _ = fs::remove_dir(path);
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_matching_covers_gzipped_fasta() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("species/dna");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("Homo_sapiens.GRCh38.dna_sm.toplevel.fa.gz"), b"").unwrap();
        fs::write(nested.join("README"), b"").unwrap();

        let found = find_with_suffixes(dir.path(), &[".fa.gz", ".fa", ".fna"]);
        assert_eq!(found.len(), 1);
        assert!(found[0].to_string_lossy().ends_with(".fa.gz"));

        assert!(find_first_with_suffixes(dir.path(), &[".gtf"]).is_none());
    }

    #[test]
    fn gzip_validation_flags_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genome.fa.gz");
        let file = fs::File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(b">chr1\nACGTACGTACGT\n").unwrap();
        encoder.finish().unwrap();
        validate_gzip(&path).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(validate_gzip(&path).is_err());
    }

    #[test]
    fn extract_zip_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("ncbi_dataset.zip");
        let file = fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("data/genome.fna", options).unwrap();
        writer.write_all(b">chr1\nACGT\n").unwrap();
        writer.finish().unwrap();

        let out = dir.path().join("out");
        extract_zip(&zip_path, &out).unwrap();
        assert_eq!(
            fs::read_to_string(out.join("data/genome.fna")).unwrap(),
            ">chr1\nACGT\n"
        );
    }

    #[test]
    fn extract_zip_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("broken.zip");
        fs::write(&zip_path, b"not a zip").unwrap();
        assert!(extract_zip(&zip_path, dir.path()).is_err());
        assert!(fs::read_dir(dir.path()).unwrap().count() == 1);
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("configs/genomes.config");
        write_bytes_atomic(&target, b"params {}\n").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "params {}\n");
    }
}
