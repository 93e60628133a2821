//! Multipart submission payload assembly.
//!
//! Files are read into memory up front so that a [`SubmissionPayload`] is
//! an immutable snapshot: once built, nothing the user does to the
//! selection or the form can change what gets sent.

use std::path::{Path, PathBuf};

use reqwest::multipart::{Form, Part};
use xlproc_core::types::FormFields;

use crate::error::ClientError;

/// Repeated part name carrying the input files.
pub const FILES_FIELD: &str = "files";

/// A file selected for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFile {
    /// Name sent as the part's filename (last path component).
    pub name: String,
    pub bytes: Vec<u8>,
}

impl BinaryFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Read a file from disk.
    pub async fn read(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ClientError::InputUnreadable {
                path: path.to_path_buf(),
                source,
            })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        tracing::debug!(file = %name, size = bytes.len(), "Read input file");
        Ok(Self { name, bytes })
    }
}

/// Read every path in order. The first unreadable file aborts the batch.
pub async fn read_files(paths: &[PathBuf]) -> Result<Vec<BinaryFile>, ClientError> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(BinaryFile::read(path).await?);
    }
    Ok(files)
}

/// Files plus scalar fields, ready to be encoded as `multipart/form-data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionPayload {
    pub files: Vec<BinaryFile>,
    pub fields: FormFields,
}

/// Assemble a payload. Pure; an empty file list is allowed here and
/// rejected by the orchestrator.
pub fn build(files: Vec<BinaryFile>, fields: FormFields) -> SubmissionPayload {
    SubmissionPayload { files, fields }
}

impl SubmissionPayload {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|f| f.bytes.len()).sum()
    }

    /// Encode as a multipart form: one `files` part per file, then the
    /// `text1`, `text2`, `text3` and `selected_date` text parts.
    pub fn to_form(&self) -> Form {
        let form = self.files.iter().fold(Form::new(), |form, file| {
            form.part(
                FILES_FIELD,
                Part::bytes(file.bytes.clone()).file_name(file.name.clone()),
            )
        });

        form.text("text1", self.fields.text1.clone())
            .text("text2", self.fields.text2.clone())
            .text("text3", self.fields.text3.clone())
            .text("selected_date", self.fields.date_string())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::NaiveDate;

    use super::*;

    fn fields() -> FormFields {
        FormFields {
            text1: "Sheet1".into(),
            text2: "A".into(),
            text3: String::new(),
            selected_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        }
    }

    #[test]
    fn build_keeps_files_in_order() {
        let payload = build(
            vec![
                BinaryFile::new("a.xlsx", vec![1, 2, 3]),
                BinaryFile::new("b.xlsx", vec![4]),
            ],
            fields(),
        );
        assert_eq!(payload.file_count(), 2);
        assert_eq!(payload.total_bytes(), 4);
        assert_eq!(payload.files[0].name, "a.xlsx");
        assert_eq!(payload.files[1].name, "b.xlsx");
        assert!(!payload.is_empty());
    }

    #[test]
    fn empty_selection_builds_an_empty_payload() {
        let payload = build(Vec::new(), fields());
        assert!(payload.is_empty());
        assert_eq!(payload.total_bytes(), 0);
    }

    #[test]
    fn form_uses_multipart_boundary() {
        let payload = build(vec![BinaryFile::new("a.xlsx", vec![0u8; 8])], fields());
        assert!(!payload.to_form().boundary().is_empty());
    }

    #[tokio::test]
    async fn read_takes_name_from_last_component() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q1 report.xlsx");
        tokio::fs::write(&path, b"PK\x03\x04").await.unwrap();

        let file = BinaryFile::read(&path).await.unwrap();
        assert_eq!(file.name, "q1 report.xlsx");
        assert_eq!(file.bytes, b"PK\x03\x04");
    }

    #[tokio::test]
    async fn unreadable_file_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.xlsx");
        let missing = dir.path().join("missing.xlsx");
        tokio::fs::write(&good, b"data").await.unwrap();

        let result = read_files(&[good, missing.clone()]).await;
        assert_matches!(result, Err(ClientError::InputUnreadable { path, .. }) if path == missing);
    }
}
