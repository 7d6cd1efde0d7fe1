//! Result archive decoding.
//!
//! The load generator cannot share a volume with the runner, so it prints
//! its result files to standard output as `tar czf - ... | base64`. This
//! module turns that log text back into files.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::read::GzDecoder;
use tracing::debug;

/// Where decoding stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// The log text itself (empty or not base64).
    Payload,
    Gzip,
    Tar,
    /// Writing entries into the destination directory.
    Extract,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecodeStage::Payload => "payload",
            DecodeStage::Gzip => "gzip",
            DecodeStage::Tar => "tar",
            DecodeStage::Extract => "extract",
        };
        f.write_str(s)
    }
}

/// Failure to turn log text into result files.
///
/// Empty and non-base64 payloads mean the workload itself did not run to
/// the point of printing its archive; the other variants mean the archive
/// was printed but is damaged.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeFailure {
    #[error("empty payload: the workload printed nothing and likely failed to run")]
    EmptyPayload,

    #[error("invalid payload: output is not base64 ({0}); the workload likely failed to run")]
    InvalidPayload(String),

    #[error("corrupt archive at {stage} stage: {detail}")]
    CorruptArchive { stage: DecodeStage, detail: String },

    /// The archive was fine but the results could not be written locally.
    #[error("failed to write results into {}: {detail}", path.display())]
    Write { path: PathBuf, detail: String },
}

impl DecodeFailure {
    pub fn stage(&self) -> DecodeStage {
        match self {
            DecodeFailure::EmptyPayload | DecodeFailure::InvalidPayload(_) => DecodeStage::Payload,
            DecodeFailure::CorruptArchive { stage, .. } => *stage,
            DecodeFailure::Write { .. } => DecodeStage::Extract,
        }
    }

    /// True when the payload was missing or unreadable rather than corrupt.
    pub fn is_payload_fault(&self) -> bool {
        self.stage() == DecodeStage::Payload
    }

    fn corrupt(stage: DecodeStage, err: impl fmt::Display) -> Self {
        DecodeFailure::CorruptArchive {
            stage,
            detail: err.to_string(),
        }
    }

    fn write(path: &Path, err: impl fmt::Display) -> Self {
        DecodeFailure::Write {
            path: path.to_path_buf(),
            detail: err.to_string(),
        }
    }

    /// Unpack errors carry the kind of the underlying failure: a short or
    /// malformed entry is the archive's fault, anything else is local.
    fn unpack(destination: &Path, err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::UnexpectedEof | ErrorKind::InvalidData | ErrorKind::InvalidInput => {
                DecodeFailure::corrupt(DecodeStage::Tar, err)
            }
            _ => DecodeFailure::write(destination, err),
        }
    }
}

/// A decoded result archive and where it was extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultArchive {
    pub destination: PathBuf,
    /// Length of the base64 text, whitespace excluded.
    pub encoded_len: usize,
    /// Length of the decompressed tar stream.
    pub decoded_len: usize,
    /// Regular files written, relative to `destination`.
    pub files: Vec<PathBuf>,
}

/// Decode base64 → gunzip → untar `log_text` into `destination`.
///
/// Partially extracted files are left in place on failure.
pub fn decode(log_text: &str, destination: &Path) -> Result<ResultArchive, DecodeFailure> {
    let encoded: String = log_text
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if encoded.is_empty() {
        return Err(DecodeFailure::EmptyPayload);
    }

    let compressed = STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| DecodeFailure::InvalidPayload(e.to_string()))?;

    let mut tar_bytes = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut tar_bytes)
        .map_err(|e| DecodeFailure::corrupt(DecodeStage::Gzip, e))?;

    std::fs::create_dir_all(destination).map_err(|e| DecodeFailure::write(destination, e))?;

    let mut archive = tar::Archive::new(tar_bytes.as_slice());
    let entries = archive
        .entries()
        .map_err(|e| DecodeFailure::corrupt(DecodeStage::Tar, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(|e| DecodeFailure::corrupt(DecodeStage::Tar, e))?;
        let path = entry
            .path()
            .map_err(|e| DecodeFailure::corrupt(DecodeStage::Tar, e))?
            .into_owned();
        let is_file = entry.header().entry_type().is_file();
        let unpacked = entry
            .unpack_in(destination)
            .map_err(|e| DecodeFailure::unpack(destination, e))?;
        if unpacked && is_file {
            files.push(path);
        }
    }

    debug!(
        destination = %destination.display(),
        files = files.len(),
        bytes = tar_bytes.len(),
        "result archive extracted"
    );

    Ok(ResultArchive {
        destination: destination.to_path_buf(),
        encoded_len: encoded.len(),
        decoded_len: tar_bytes.len(),
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(bytes).unwrap();
        enc.finish().unwrap()
    }

    /// Build `tar czf - <files> | base64` from (relative path, contents) pairs.
    fn encoded_archive(files: &[(&str, &str)]) -> String {
        let src = tempfile::tempdir().unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (name, contents) in files {
            let path = src.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, contents).unwrap();
            builder.append_path_with_name(&path, name).unwrap();
        }
        let gz = builder.into_inner().unwrap().finish().unwrap();
        STANDARD.encode(gz)
    }

    #[test]
    fn round_trip_reproduces_files() {
        let files = [
            ("results_stats.csv", "Type,Name,Requests\nGET,/,120\n"),
            ("results_failures.csv", "Method,Name,Error,Occurrences\n"),
            ("logs/errors.log", "warning: slow response\n"),
        ];
        let text = encoded_archive(&files);

        let dest = tempfile::tempdir().unwrap();
        let archive = decode(&text, dest.path()).unwrap();

        assert_eq!(archive.files.len(), 3);
        for (name, contents) in files {
            let got = std::fs::read_to_string(dest.path().join(name)).unwrap();
            assert_eq!(got, contents, "{name}");
        }
        assert_eq!(archive.destination, dest.path());
        assert_eq!(archive.encoded_len, text.len());
    }

    #[test]
    fn tolerates_surrounding_whitespace_and_wrapping() {
        let text = encoded_archive(&[("a.csv", "1,2,3\n")]);
        let (head, tail) = text.split_at(text.len() / 2);
        let wrapped = format!("\n{head}\n{tail}\n");

        let dest = tempfile::tempdir().unwrap();
        let archive = decode(&wrapped, dest.path()).unwrap();
        assert_eq!(archive.files, vec![PathBuf::from("a.csv")]);
    }

    #[test]
    fn empty_log_is_empty_payload() {
        let dest = tempfile::tempdir().unwrap();
        let err = decode("", dest.path()).unwrap_err();
        assert_eq!(err, DecodeFailure::EmptyPayload);
        assert!(err.is_payload_fault());
        assert_eq!(err.stage(), DecodeStage::Payload);

        let err = decode("  \n\t", dest.path()).unwrap_err();
        assert_eq!(err, DecodeFailure::EmptyPayload);
    }

    #[test]
    fn plain_text_log_is_invalid_payload() {
        let dest = tempfile::tempdir().unwrap();
        let err = decode("Traceback (most recent call last): locust not found", dest.path())
            .unwrap_err();
        assert!(matches!(err, DecodeFailure::InvalidPayload(_)));
        assert!(err.is_payload_fault());
        assert!(err.to_string().contains("invalid payload"));
    }

    #[test]
    fn base64_of_non_gzip_is_corrupt_at_gzip() {
        let dest = tempfile::tempdir().unwrap();
        let text = STANDARD.encode(b"definitely not gzip data");
        let err = decode(&text, dest.path()).unwrap_err();
        assert_eq!(err.stage(), DecodeStage::Gzip);
        assert!(!err.is_payload_fault());
        assert!(err.to_string().contains("corrupt archive"));
    }

    #[test]
    fn gzip_of_non_tar_is_corrupt_at_tar() {
        let dest = tempfile::tempdir().unwrap();
        let text = STANDARD.encode(gzip(b"this is not a tar archive"));
        let err = decode(&text, dest.path()).unwrap_err();
        assert_eq!(err.stage(), DecodeStage::Tar);
    }

    #[test]
    fn creates_missing_destination() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("exp").join("0");
        let text = encoded_archive(&[("a.csv", "x")]);
        decode(&text, &dest).unwrap();
        assert!(dest.join("a.csv").is_file());
    }

    #[test]
    fn unwritable_destination_is_not_blamed_on_the_archive() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("blocker");
        std::fs::write(&blocker, "a file, not a directory").unwrap();
        let dest = blocker.join("0");

        let err = decode(&encoded_archive(&[("a.csv", "x")]), &dest).unwrap_err();
        assert!(matches!(err, DecodeFailure::Write { .. }), "{err:?}");
        assert!(!err.is_payload_fault());
        let message = err.to_string();
        assert!(message.contains("failed to write results"), "{message}");
        assert!(!message.contains("corrupt"), "{message}");
    }
}
