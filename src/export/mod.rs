//! Report exporter: renders a finished classification as a PDF document, a
//! CSV table, or a JSON archive.
//!
//! Each renderer is a pure function over a borrowed [`Report`]; none of them
//! mutate the inputs, so they can run side by side. Writing to disk goes
//! through [`write_report`], which never leaves a partial file behind and
//! reports failure as a flag plus cause instead of an error.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::{error, info, instrument};

use crate::domain::{ClassificationResult, Response, SubjectDetails};
use crate::util::slugify;

pub mod archive;
pub mod document;
pub mod table;

/// Name printed on reports without subject details.
pub const FALLBACK_SUBJECT_NAME: &str = "User";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("rendering failed: {0}")]
    Render(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("unsupported export format '{0}'")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Paginated PDF.
    Document,
    /// Quoted CSV.
    Table,
    /// Detailed JSON archive.
    Archive,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Document => "application/pdf",
            ExportFormat::Table => "text/csv; charset=utf-8",
            ExportFormat::Archive => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Document => "pdf",
            ExportFormat::Table => "csv",
            ExportFormat::Archive => "json",
        }
    }

    /// `prakruti-assessment[-detailed]-<slug>-<YYYY-MM-DD>.<ext>`
    ///
    /// A name with nothing left after slugging is filed under the fallback name.
    pub fn file_name(&self, subject_name: &str, generated_at: DateTime<Utc>) -> String {
        let detailed = if *self == ExportFormat::Archive { "-detailed" } else { "" };
        let mut slug = slugify(subject_name);
        if slug.is_empty() {
            slug = slugify(FALLBACK_SUBJECT_NAME);
        }
        format!(
            "prakruti-assessment{}-{}-{}.{}",
            detailed,
            slug,
            generated_at.format("%Y-%m-%d"),
            self.extension()
        )
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pdf" | "document" => Ok(ExportFormat::Document),
            "csv" | "table" => Ok(ExportFormat::Table),
            "json" | "archive" => Ok(ExportFormat::Archive),
            _ => Err(ExportError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Everything a renderer needs, fixed at the moment of generation.
#[derive(Debug, Clone, Copy)]
pub struct Report<'a> {
    pub result: &'a ClassificationResult,
    pub subject: Option<&'a SubjectDetails>,
    /// Raw answers; only the archive embeds them.
    pub responses: &'a [Response],
    pub total_questions: usize,
    pub generated_at: DateTime<Utc>,
}

impl<'a> Report<'a> {
    pub fn subject_name(&self) -> &'a str {
        self.subject
            .map(|s| s.name.as_str())
            .unwrap_or(FALLBACK_SUBJECT_NAME)
    }

    pub fn file_name(&self, format: ExportFormat) -> String {
        format.file_name(self.subject_name(), self.generated_at)
    }
}

/// Render a report into the bytes of the requested format.
#[instrument(level = "info", skip_all, fields(%format))]
pub fn render(format: ExportFormat, report: &Report<'_>) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Document => document::render_document(report),
        ExportFormat::Table => Ok(table::render_table(report).into_bytes()),
        ExportFormat::Archive => archive::render_archive(report).map(String::into_bytes),
    }
}

/// Boolean-equivalent outcome of writing an export to disk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOutcome {
    pub ok: bool,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// Render and write a report under `dir`. The file appears under its final
/// name only once fully written.
#[instrument(level = "info", skip_all, fields(%format))]
pub async fn write_report(format: ExportFormat, report: &Report<'_>, dir: &Path) -> ExportOutcome {
    let file_name = report.file_name(format);
    match try_write(format, report, dir, &file_name).await {
        Ok(path) => {
            info!(target: "export", %file_name, "Report written");
            ExportOutcome { ok: true, file_name, path: Some(path), cause: None }
        }
        Err(e) => {
            error!(target: "export", %file_name, error = %e, "Report export failed");
            ExportOutcome { ok: false, file_name, path: None, cause: Some(e.to_string()) }
        }
    }
}

async fn try_write(
    format: ExportFormat,
    report: &Report<'_>,
    dir: &Path,
    file_name: &str,
) -> Result<PathBuf, ExportError> {
    let bytes = render(format, report)?;
    fs::create_dir_all(dir)
        .await
        .map_err(|e| ExportError::Io(e.to_string()))?;

    let final_path = dir.join(file_name);
    let tmp_path = dir.join(format!(".{file_name}.partial"));
    if let Err(e) = fs::write(&tmp_path, &bytes).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(ExportError::Io(e.to_string()));
    }
    if let Err(e) = fs::rename(&tmp_path, &final_path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(ExportError::Io(e.to_string()));
    }
    Ok(final_path)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_names_follow_pattern() {
        let at = generated_at();
        assert_eq!(
            ExportFormat::Document.file_name("Asha  Rao", at),
            "prakruti-assessment-asha-rao-2026-10-18.pdf"
        );
        assert_eq!(
            ExportFormat::Table.file_name("User", at),
            "prakruti-assessment-user-2026-10-18.csv"
        );
        assert_eq!(
            ExportFormat::Archive.file_name("Asha Rao", at),
            "prakruti-assessment-detailed-asha-rao-2026-10-18.json"
        );
    }

    #[test]
    fn file_names_stay_in_one_directory() {
        let at = generated_at();
        assert_eq!(
            ExportFormat::Table.file_name("Asha/Rao", at),
            "prakruti-assessment-asharao-2026-10-18.csv"
        );
        assert_eq!(
            ExportFormat::Document.file_name("../..", at),
            "prakruti-assessment-user-2026-10-18.pdf"
        );
    }

    #[test]
    fn formats_parse_from_names_and_extensions() {
        assert_eq!("PDF".parse::<ExportFormat>().unwrap(), ExportFormat::Document);
        assert_eq!("table".parse::<ExportFormat>().unwrap(), ExportFormat::Table);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Archive);
        assert!(matches!(
            "docx".parse::<ExportFormat>(),
            Err(ExportError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn missing_subject_falls_back_to_user() {
        let result = result();
        let report = Report {
            result: &result,
            subject: None,
            responses: &[],
            total_questions: 18,
            generated_at: generated_at(),
        };
        assert_eq!(report.subject_name(), FALLBACK_SUBJECT_NAME);
    }

    #[test]
    fn renderers_do_not_interfere() {
        let (result, subject, responses) = (result(), subject(), responses());
        let report = Report {
            result: &result,
            subject: Some(&subject),
            responses: &responses,
            total_questions: 18,
            generated_at: generated_at(),
        };
        let csv_a = render(ExportFormat::Table, &report).unwrap();
        let json_a = render(ExportFormat::Archive, &report).unwrap();
        let pdf = render(ExportFormat::Document, &report).unwrap();
        assert!(pdf.starts_with(b"%PDF"));
        assert_eq!(render(ExportFormat::Table, &report).unwrap(), csv_a);
        assert_eq!(render(ExportFormat::Archive, &report).unwrap(), json_a);
        assert_eq!(result, super::fixtures::result());
    }

    #[tokio::test]
    async fn write_report_creates_final_file_only() {
        let temp_dir = TempDir::new().unwrap();
        let (result, subject, responses) = (result(), subject(), responses());
        let report = Report {
            result: &result,
            subject: Some(&subject),
            responses: &responses,
            total_questions: 18,
            generated_at: generated_at(),
        };
        let outcome = write_report(ExportFormat::Archive, &report, temp_dir.path()).await;
        assert!(outcome.ok, "{:?}", outcome.cause);
        let path = outcome.path.unwrap();
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("prakruti-assessment-detailed-asha-rao-2026-10-18.json")
        );
        let entries: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn write_failure_is_reported_not_raised() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let result = result();
        let report = Report {
            result: &result,
            subject: None,
            responses: &[],
            total_questions: 18,
            generated_at: generated_at(),
        };
        let outcome = write_report(ExportFormat::Table, &report, &blocker).await;
        assert!(!outcome.ok);
        assert!(outcome.path.is_none());
        assert!(outcome.cause.is_some());
        assert_eq!(outcome.file_name, "prakruti-assessment-user-2026-10-18.csv");
    }
}
