//! Atomic gzip output.
//!
//! Files are written to a sibling temporary file and renamed into place,
//! so a reader never sees a half-written crime file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::RefreshError;
use crate::normalize::{NormalizedRow, OUTPUT_COLUMNS, format_number};

/// Delimiter of every file this crate writes.
pub const OUTPUT_DELIMITER: u8 = b';';

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "output".into(), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!(".{name}.tmp"))
}

/// Writes gzip-compressed content produced by `write` to `path`
/// atomically. The temporary file is removed on failure.
///
/// # Errors
///
/// Returns [`RefreshError`] if writing or renaming fails, or whatever
/// `write` returns.
pub fn write_gzip_atomically<F>(path: &Path, write: F) -> Result<(), RefreshError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), RefreshError>,
{
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let temp = temp_path(path);
    let result = (|| -> Result<(), RefreshError> {
        let mut encoder =
            GzEncoder::new(BufWriter::new(File::create(&temp)?), Compression::default());
        write(&mut encoder)?;
        let file = encoder
            .finish()?
            .into_inner()
            .map_err(std::io::IntoInnerError::into_error)?;
        file.sync_all()?;
        std::fs::rename(&temp, path)?;
        Ok(())
    })();

    if result.is_err() {
        std::fs::remove_file(&temp).ok();
    }
    result
}

/// Writes normalized rows as the dashboard's crime file.
///
/// # Errors
///
/// Returns [`RefreshError`] if the file cannot be written.
pub fn write_crime_file(path: &Path, rows: &[NormalizedRow]) -> Result<(), RefreshError> {
    write_gzip_atomically(path, |out| {
        let mut csv = csv::WriterBuilder::new()
            .delimiter(OUTPUT_DELIMITER)
            .from_writer(out);
        csv.write_record(OUTPUT_COLUMNS)?;
        for row in rows {
            let year = row.year.to_string();
            let count = format_number(row.count);
            csv.write_record([
                row.commune_code.as_str(),
                year.as_str(),
                row.indicator.as_str(),
                count.as_str(),
            ])?;
        }
        csv.flush()?;
        Ok(())
    })?;

    log::info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}
