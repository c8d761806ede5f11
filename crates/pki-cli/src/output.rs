//! Rendering of command results.
//!
//! `--format table` prints a short summary per result, `--format json`
//! prints the serialized result for scripts.

use std::io::Write;
use std::path::PathBuf;

use pki_certfix::CertFixReport;
use serde::Serialize;

use crate::cli::Format;
use crate::error::CliError;

/// A command result with a human-readable rendering.
pub trait Summary: Serialize {
    /// Write the summary shown for `--format table`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_summary(&self, writer: &mut dyn Write) -> Result<(), CliError>;
}

impl Format {
    /// Render a command result in this format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn render<T: Summary>(self, writer: &mut dyn Write, value: &T) -> Result<(), CliError> {
        match self {
            Self::Table => value.write_summary(writer),
            Self::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)?;
                writeln!(writer)?;
                Ok(())
            }
        }
    }
}

impl Summary for CertFixReport {
    fn write_summary(&self, writer: &mut dyn Write) -> Result<(), CliError> {
        writeln!(writer, "Certificate Repair")?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Instance:         {}", self.instance)?;
        writeln!(writer, "Subsystems:       {}", join_or_none(&self.subsystems))?;
        writeln!(writer, "Renewed:          {}", join_or_none(&self.fixed))?;
        let elapsed = self.finished_at - self.started_at;
        writeln!(writer, "Duration:         {}s", elapsed.num_seconds())?;

        if self.extra.is_empty() {
            return Ok(());
        }

        writeln!(writer)?;
        writeln!(writer, "{:<20}  {:<8}  DETAIL", "SERIAL", "STATUS")?;
        writeln!(writer, "{}", "─".repeat(72))?;
        for outcome in &self.extra {
            let (status, detail) = match (&outcome.path, &outcome.error) {
                (_, Some(error)) => ("failed", error.clone()),
                (Some(path), None) => ("renewed", path.display().to_string()),
                (None, None) => ("renewed", String::new()),
            };
            writeln!(writer, "{:<20}  {:<8}  {}", outcome.serial, status, detail)?;
        }
        Ok(())
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

/// Profile documents written by `profile create`.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileCreated {
    /// Profile id.
    pub profile_id: String,
    /// Archetype the documents were built from.
    pub archetype: String,
    /// Written documents.
    pub files: Vec<PathBuf>,
}

impl Summary for ProfileCreated {
    fn write_summary(&self, writer: &mut dyn Write) -> Result<(), CliError> {
        writeln!(
            writer,
            "Created profile {} ({})",
            self.profile_id, self.archetype
        )?;
        for file in &self.files {
            writeln!(writer, "  {}", file.display())?;
        }
        Ok(())
    }
}

/// Profile document rewritten by `profile edit`.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileModified {
    /// Profile id read from the document.
    pub profile_id: String,
    /// Rewritten document.
    pub path: PathBuf,
}

impl Summary for ProfileModified {
    fn write_summary(&self, writer: &mut dyn Write) -> Result<(), CliError> {
        writeln!(
            writer,
            "Modified profile {} ({})",
            self.profile_id,
            self.path.display()
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pki_certfix::SerialOutcome;

    fn report() -> CertFixReport {
        let now = Utc::now();
        CertFixReport {
            instance: "pki-tomcat".into(),
            subsystems: vec!["ca".into(), "kra".into()],
            fixed: vec!["sslserver".into()],
            extra: vec![
                SerialOutcome {
                    serial: "0x1f".into(),
                    path: Some(PathBuf::from("/tmp/0x1f.crt")),
                    error: None,
                },
                SerialOutcome {
                    serial: "42".into(),
                    path: None,
                    error: Some("request rejected".into()),
                },
            ],
            started_at: now,
            finished_at: now,
        }
    }

    fn render<T: Summary>(format: Format, value: &T) -> String {
        let mut buf = Vec::new();
        format.render(&mut buf, value).expect("render");
        String::from_utf8(buf).expect("utf-8")
    }

    #[test]
    fn cert_fix_report_table() {
        let out = render(Format::Table, &report());
        assert!(out.contains("Instance:         pki-tomcat"));
        assert!(out.contains("Subsystems:       ca, kra"));
        assert!(out.contains("Renewed:          sslserver"));
        assert!(out.contains("/tmp/0x1f.crt"));
        assert!(out.contains("failed"));
        assert!(out.contains("request rejected"));
    }

    #[test]
    fn cert_fix_report_json() {
        let out = render(Format::Json, &report());
        let value: serde_json::Value = serde_json::from_str(&out).expect("json");
        assert_eq!(value["instance"], "pki-tomcat");
        assert_eq!(value["fixed"][0], "sslserver");
        assert_eq!(value["extra"][1]["error"], "request rejected");
    }

    #[test]
    fn empty_lists_render_as_dash() {
        let mut report = report();
        report.fixed.clear();
        report.extra.clear();
        let out = render(Format::Table, &report);
        assert!(out.contains("Renewed:          -"));
        assert!(!out.contains("SERIAL"));
    }

    #[test]
    fn profile_created_table() {
        let created = ProfileCreated {
            profile_id: "caUserCert".into(),
            archetype: "dualcert".into(),
            files: vec![
                PathBuf::from("out/caUserCert_enc.xml"),
                PathBuf::from("out/caUserCert_sig.xml"),
            ],
        };
        let out = render(Format::Table, &created);
        assert!(out.starts_with("Created profile caUserCert (dualcert)"));
        assert!(out.contains("  out/caUserCert_sig.xml"));
    }
}
