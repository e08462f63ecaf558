use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::CometxError;

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<usize, CometxError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        CometxError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| CometxError::Filesystem(err.to_string()))?;

    let mut extracted = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| CometxError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(CometxError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| CometxError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| CometxError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| CometxError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| CometxError::Filesystem(err.to_string()))?;
        extracted += 1;
    }
    Ok(extracted)
}

// Contents of the first file in an in-memory archive; git patches are
// stored zipped with a single entry.
pub fn unzip_first_entry(bytes: &[u8]) -> Result<Vec<u8>, CometxError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| CometxError::Filesystem(err.to_string()))?;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| CometxError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(|err| CometxError::Filesystem(err.to_string()))?;
        return Ok(content);
    }
    Err(CometxError::Filesystem("zip archive is empty".to_string()))
}

pub fn zip_single(entry_name: &str, content: &[u8]) -> Result<Vec<u8>, CometxError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(entry_name, SimpleFileOptions::default())
        .map_err(|err| CometxError::Filesystem(err.to_string()))?;
    writer
        .write_all(content)
        .map_err(|err| CometxError::Filesystem(err.to_string()))?;
    let cursor = writer
        .finish()
        .map_err(|err| CometxError::Filesystem(err.to_string()))?;
    Ok(cursor.into_inner())
}
