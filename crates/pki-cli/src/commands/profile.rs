//! Profile document commands.
//!
//! Provides subcommands for:
//! - Creating profile documents from an archetype
//! - Editing an existing document in place

use std::fs;
use std::io::Write;

use pki_profile::{ProfileOverrides, create_profile_files, edit_profile};
use tracing::{debug, info};

use crate::cli::{Format, OverrideArgs, ProfileCommands};
use crate::error::CliError;
use crate::output::{ProfileCreated, ProfileModified};

/// Profile command executor.
#[derive(Debug, Default)]
pub struct ProfileCommand;

impl ProfileCommand {
    /// Create a new profile command.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Execute a profile subcommand.
    ///
    /// # Errors
    ///
    /// Returns an error if the overrides are invalid or a document cannot be
    /// read or written.
    pub fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: Format,
        command: &ProfileCommands,
    ) -> Result<(), CliError> {
        match command {
            ProfileCommands::Create(args) => {
                let overrides = load_overrides(&args.overrides)?;
                if let Some(dir) = &args.output_dir {
                    fs::create_dir_all(dir)?;
                }
                let files = create_profile_files(
                    &args.id,
                    args.archetype,
                    &overrides,
                    args.output_dir.as_deref(),
                )?;
                info!(profile = %args.id, count = files.len(), "profile documents written");
                let created = ProfileCreated {
                    profile_id: args.id.clone(),
                    archetype: args.archetype.to_string(),
                    files,
                };
                format.render(writer, &created)?;
            }
            ProfileCommands::Edit(args) => {
                let overrides = load_overrides(&args.overrides)?;
                let profile = edit_profile(&args.path, args.archetype, &overrides)?;
                info!(profile = %profile.id, path = %args.path.display(), "profile document modified");
                let modified = ProfileModified {
                    profile_id: profile.id,
                    path: args.path.clone(),
                };
                format.render(writer, &modified)?;
            }
        }
        Ok(())
    }
}

/// Merges the JSON override file with `--set` pairs.
fn load_overrides(args: &OverrideArgs) -> Result<ProfileOverrides, CliError> {
    let json = args
        .overrides
        .as_ref()
        .map(fs::read_to_string)
        .transpose()?;
    let pairs = args
        .set
        .iter()
        .map(|pair| parse_pair(pair))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(pairs = pairs.len(), from_file = json.is_some(), "loading overrides");
    Ok(ProfileOverrides::from_sources(json.as_deref(), &pairs)?)
}

fn parse_pair(pair: &str) -> Result<(String, String), CliError> {
    pair.split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .ok_or_else(|| CliError::invalid_argument(format!("expected KEY=VALUE, got '{pair}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pair_splits_on_first_equals() {
        let (key, value) = parse_pair("subjectNameDefault=CN=$request.req_subject_name.cn$")
            .expect("pair");
        assert_eq!(key, "subjectNameDefault");
        assert_eq!(value, "CN=$request.req_subject_name.cn$");
    }

    #[test]
    fn parse_pair_rejects_missing_key() {
        assert!(matches!(
            parse_pair("ValidFor"),
            Err(CliError::InvalidArgument(_))
        ));
        assert!(matches!(parse_pair("=15"), Err(CliError::InvalidArgument(_))));
    }

    #[test]
    fn create_writes_into_output_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out_dir = dir.path().join("profiles");
        let command = ProfileCommands::Create(crate::cli::ProfileCreateArgs {
            id: "caUserCert".into(),
            archetype: pki_profile::Archetype::User,
            output_dir: Some(out_dir.clone()),
            overrides: OverrideArgs {
                overrides: None,
                set: vec!["ValidFor=30".into()],
            },
        });

        let mut buf = Vec::new();
        ProfileCommand::new()
            .execute(&mut buf, Format::Json, &command)
            .expect("create");

        let value: serde_json::Value = serde_json::from_slice(&buf).expect("json");
        assert_eq!(value["profile_id"], "caUserCert");
        assert_eq!(value["archetype"], "user");
        let files = value["files"].as_array().expect("files");
        assert_eq!(files.len(), 1);
        assert!(out_dir.join("caUserCert.xml").is_file());
    }
}
