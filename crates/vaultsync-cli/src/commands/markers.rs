//! Markers command - inspect and resolve conflict markers left in a file
//!
//! `analyze` never modifies anything. `resolve` prints the resolved text,
//! or replaces the file in place with `--write`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use tracing::info;

use vaultsync_conflict::markers::{analyze, resolve};
use vaultsync_conflict::ResolvePreference;

use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum MarkersCommand {
    /// Count conflict blocks and report malformed markers
    Analyze {
        /// File to scan
        file: PathBuf,
    },
    /// Keep one side of every conflict block
    Resolve {
        /// File to resolve
        file: PathBuf,

        /// Which side of each block to keep
        #[arg(long, value_enum)]
        prefer: Side,

        /// Replace the file instead of printing the result
        #[arg(long)]
        write: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Side {
    Local,
    Remote,
}

impl From<Side> for ResolvePreference {
    fn from(side: Side) -> Self {
        match side {
            Side::Local => ResolvePreference::LocalFirst,
            Side::Remote => ResolvePreference::RemoteFirst,
        }
    }
}

impl MarkersCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        match self {
            MarkersCommand::Analyze { file } => self.execute_analyze(file, format).await,
            MarkersCommand::Resolve {
                file,
                prefer,
                write,
            } => self.execute_resolve(file, *prefer, *write, format).await,
        }
    }

    async fn execute_analyze(&self, file: &Path, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let text = read_text(file).await?;
        let analysis = analyze(&text);
        info!(
            file = %file.display(),
            conflicts = analysis.conflict_count,
            "Analyzed conflict markers"
        );

        if format.is_json() {
            let mut json = serde_json::to_value(&analysis)?;
            json["file"] = serde_json::json!(file.display().to_string());
            formatter.print_json(&json);
            return Ok(());
        }

        if !analysis.has_conflict_markers {
            formatter.success(&format!("{} has no conflict markers", file.display()));
            return Ok(());
        }
        formatter.warn(&format!(
            "{} has {} conflict block{}",
            file.display(),
            analysis.conflict_count,
            if analysis.conflict_count == 1 { "" } else { "s" }
        ));
        if let Some(line) = analysis.first_marker_line {
            formatter.info(&format!("First marker at line {}", line));
        }
        if analysis.has_unbalanced_markers {
            formatter.warn("Markers are unbalanced; fix them by hand before resolving");
        }
        Ok(())
    }

    async fn execute_resolve(
        &self,
        file: &Path,
        prefer: Side,
        write: bool,
        format: OutputFormat,
    ) -> Result<()> {
        let formatter = get_formatter(format);
        let text = read_text(file).await?;
        let resolved = resolve(&text, prefer.into())
            .with_context(|| format!("Cannot resolve {}", file.display()))?;

        if write && resolved.resolved_count > 0 {
            tokio::fs::write(file, resolved.text.as_bytes())
                .await
                .with_context(|| format!("Failed to write {}", file.display()))?;
            info!(file = %file.display(), blocks = resolved.resolved_count, "Resolved markers in place");
        }

        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "file": file.display().to_string(),
                "resolved": resolved.resolved_count,
                "written": write && resolved.resolved_count > 0,
                "text": if write { None } else { Some(&resolved.text) },
            }));
        } else if write {
            formatter.success(&format!(
                "Resolved {} block{} in {}",
                resolved.resolved_count,
                if resolved.resolved_count == 1 { "" } else { "s" },
                file.display()
            ));
        } else {
            print!("{}", resolved.text);
        }
        Ok(())
    }
}

async fn read_text(file: &Path) -> Result<String> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    String::from_utf8(bytes).with_context(|| format!("{} is not a text file", file.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFLICTED: &str = "intro\n<<<<<<< local\nmine\n=======\ntheirs\n>>>>>>> remote\noutro\n";

    #[tokio::test]
    async fn test_resolve_write_keeps_preferred_side() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.md");
        std::fs::write(&file, CONFLICTED).unwrap();

        let cmd = MarkersCommand::Resolve {
            file: file.clone(),
            prefer: Side::Remote,
            write: true,
        };
        cmd.execute(OutputFormat::Json).await.unwrap();

        assert_eq!(std::fs::read_to_string(&file).unwrap(), "intro\ntheirs\noutro\n");
    }

    #[tokio::test]
    async fn test_resolve_without_write_leaves_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.md");
        std::fs::write(&file, CONFLICTED).unwrap();

        let cmd = MarkersCommand::Resolve {
            file: file.clone(),
            prefer: Side::Local,
            write: false,
        };
        cmd.execute(OutputFormat::Json).await.unwrap();

        assert_eq!(std::fs::read_to_string(&file).unwrap(), CONFLICTED);
    }

    #[tokio::test]
    async fn test_malformed_markers_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.md");
        std::fs::write(&file, "<<<<<<< local\nmine\n").unwrap();

        let cmd = MarkersCommand::Resolve {
            file: file.clone(),
            prefer: Side::Local,
            write: true,
        };
        assert!(cmd.execute(OutputFormat::Json).await.is_err());
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "<<<<<<< local\nmine\n");
    }

    #[tokio::test]
    async fn test_binary_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blob.bin");
        std::fs::write(&file, [0xff, 0xfe, 0x00]).unwrap();
        assert!(read_text(&file).await.is_err());
    }
}
