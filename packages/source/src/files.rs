//! File opening helpers shared by the loaders.

use std::fs::File;
use std::io::{BufRead as _, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;

use crate::SourceError;

/// Leading bytes of every gzip stream.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Returns `true` if `bytes` start with the gzip magic number.
#[must_use]
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Opens `path` for reading, transparently decompressing gzip content.
///
/// Compression is detected from the content, not the file extension.
///
/// # Errors
///
/// Returns [`SourceError::MissingSource`] if the file does not exist, or
/// [`SourceError::Io`] if it cannot be read.
pub fn open_table(path: &Path) -> Result<Box<dyn Read>, SourceError> {
    let file = File::open(path).map_err(|e| missing_or_io(path, e))?;
    let mut reader = BufReader::new(file);
    let gzipped = is_gzip(reader.fill_buf()?);

    log::debug!(
        "Opening {} ({})",
        path.display(),
        if gzipped { "gzip" } else { "plain" }
    );

    if gzipped {
        Ok(Box::new(MultiGzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Returns the first candidate that exists on disk.
///
/// # Errors
///
/// Returns [`SourceError::MissingSource`] naming every candidate when none
/// exists.
pub fn first_existing(candidates: &[PathBuf]) -> Result<PathBuf, SourceError> {
    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| SourceError::MissingSource {
            candidates: candidates.to_vec(),
        })
}

/// Maps a `NotFound` I/O error to [`SourceError::MissingSource`].
pub(crate) fn missing_or_io(path: &Path, e: std::io::Error) -> SourceError {
    if e.kind() == std::io::ErrorKind::NotFound {
        SourceError::MissingSource {
            candidates: vec![path.to_path_buf()],
        }
    } else {
        SourceError::Io(e)
    }
}

/// Short label for log and error messages.
#[must_use]
pub fn label(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |n| n.to_string_lossy().into_owned(),
    )
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("crime_fr_files_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn reads_gzip_and_plain_alike() {
        let dir = temp_dir();
        let plain = dir.join("plain.csv");
        let gz = dir.join("packed.csv.gz");
        std::fs::write(&plain, "a;b\n1;2\n").unwrap();
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"a;b\n1;2\n").unwrap();
        std::fs::write(&gz, enc.finish().unwrap()).unwrap();

        for path in [&plain, &gz] {
            let mut text = String::new();
            open_table(path).unwrap().read_to_string(&mut text).unwrap();
            assert_eq!(text, "a;b\n1;2\n");
        }

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_file_is_missing_source() {
        let path = temp_dir().join("nope.csv");
        assert!(matches!(
            open_table(&path),
            Err(SourceError::MissingSource { .. })
        ));
    }

    #[test]
    fn first_existing_names_all_candidates() {
        let dir = temp_dir();
        let candidates = vec![dir.join("a.csv.gz"), dir.join("b.csv.gz")];
        match first_existing(&candidates) {
            Err(SourceError::MissingSource { candidates: tried }) => {
                assert_eq!(tried, candidates);
            }
            other => panic!("unexpected: {other:?}"),
        }

        std::fs::write(&candidates[1], "x").unwrap();
        assert_eq!(first_existing(&candidates).unwrap(), candidates[1]);
        std::fs::remove_dir_all(dir).ok();
    }
}
