use std::fmt;
use std::path::Path;

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::executor::{ConsoleEvent, ConsoleSink, OutputMode, ToolCommand, ToolRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSource {
    Override,
    Packaging,
    Git,
}

impl fmt::Display for VersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VersionSource::Override => "override",
            VersionSource::Packaging => "rpmbuild",
            VersionSource::Git => "git",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub value: String,
    pub source: VersionSource,
}

pub fn git_describe_command(core_dir: &Path) -> ToolCommand {
    ToolCommand::new("git")
        .args(["describe", "--tags", "--abbrev=8", "--match=edk2-stable*"])
        .current_dir(core_dir)
}

/// Pick the firmware version: override, then rpmbuild identity, then
/// `git describe` in the core tree. `None` when none of them applies.
pub fn resolve_version(
    ctx: &RunContext,
    core_dir: &Path,
    runner: &dyn ToolRunner,
    sink: &dyn ConsoleSink,
) -> Result<Option<ResolvedVersion>> {
    let resolved = if let Some(v) = ctx.version.override_version.as_ref() {
        ResolvedVersion {
            value: v.clone(),
            source: VersionSource::Override,
        }
    } else if let Some(id) = ctx.packaging.as_ref() {
        ResolvedVersion {
            value: id.version_string(),
            source: VersionSource::Packaging,
        }
    } else if core_dir.join(".git").exists() {
        let cmd = git_describe_command(core_dir);
        let outcome = runner.execute(&cmd, OutputMode::Stdout)?;
        if !outcome.success() {
            return Err(Error::exit(
                outcome.code,
                format!(
                    "git describe failed in {} (exit code {})",
                    core_dir.display(),
                    outcome.code
                ),
            ));
        }
        ResolvedVersion {
            value: outcome.output_lossy().trim().to_string(),
            source: VersionSource::Git,
        }
    } else {
        tracing::debug!(core = %core_dir.display(), "no version source available");
        return Ok(None);
    };

    sink.emit(ConsoleEvent::Note {
        line: String::new(),
    });
    sink.emit(ConsoleEvent::Note {
        line: format!("### version [{}]: {}", resolved.source, resolved.value),
    });
    Ok(Some(resolved))
}
