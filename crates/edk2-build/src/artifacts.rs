use std::fs::{self, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::{BuildSpec, Publish};
use crate::error::{Error, Result};
use crate::executor::{ConsoleEvent, ConsoleSink};

/// `<source> [<dest name>]`, source relative to the platform build output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyAction {
    pub source: String,
    pub dest_name: Option<String>,
}

impl CopyAction {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut words = raw.split_whitespace();
        let Some(source) = words.next() else {
            return Err(Error::msg("missing source file for copy"));
        };
        Ok(Self {
            source: source.to_string(),
            dest_name: words.next().map(ToOwned::to_owned),
        })
    }

    pub fn dest_file_name(&self) -> &str {
        match self.dest_name.as_deref() {
            Some(name) => name,
            None => self.source.rsplit('/').next().unwrap_or(&self.source),
        }
    }
}

/// `<dest file> <size>`; the file is truncated or extended to exactly `size_bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadAction {
    pub file: String,
    pub size: String,
    pub size_bytes: u64,
}

impl PadAction {
    pub fn parse(raw: &str) -> Result<Self> {
        let words: Vec<&str> = raw.split_whitespace().collect();
        if words.len() < 2 {
            return Err(Error::msg(format!("missing arg for pad ({raw:?})")));
        }
        Ok(Self {
            file: words[0].to_string(),
            size: words[1].to_string(),
            size_bytes: parse_size(words[1])?,
        })
    }
}

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+)(?:([kKmMgGtTpPeE])(iB|B)?)?$").expect("size regex is valid")
});

/// Parse a size the way `truncate --size` does for absolute sizes:
/// `K`/`KiB` are powers of 1024, `KB` powers of 1000, bare numbers are bytes.
pub fn parse_size(raw: &str) -> Result<u64> {
    let invalid = || Error::msg(format!("invalid pad size '{raw}'"));
    let caps = SIZE_RE.captures(raw.trim()).ok_or_else(invalid)?;
    let number: u64 = caps[1].parse().map_err(|_| invalid())?;
    let Some(unit) = caps.get(2) else {
        return Ok(number);
    };
    let exponent = match unit.as_str().to_ascii_uppercase().as_str() {
        "K" => 1,
        "M" => 2,
        "G" => 3,
        "T" => 4,
        "P" => 5,
        _ => 6,
    };
    let base: u64 = match caps.get(3).map(|m| m.as_str()) {
        Some("B") => 1000,
        _ => 1024,
    };
    base.checked_pow(exponent)
        .and_then(|m| number.checked_mul(m))
        .ok_or_else(invalid)
}

/// Output directory the build tool writes a platform's artifacts to.
pub fn platform_output_dir(workspace: &Path, platform: &str, build_type: &str) -> PathBuf {
    workspace
        .join("Build")
        .join(platform)
        .join(format!("{build_type}_GCC5"))
}

/// Run the copy and pad actions of `spec` for one finished build type.
/// Copies run first, in declaration order, then pads.
pub fn post_process(
    workspace: &Path,
    spec: &BuildSpec,
    build_type: &str,
    sink: &dyn ConsoleSink,
) -> Result<()> {
    let Some(publish) = spec.publish.as_ref() else {
        return Ok(());
    };
    for copy in &spec.copies {
        copy_artifact(workspace, publish, build_type, copy, sink)?;
    }
    for pad in &spec.pads {
        pad_artifact(workspace, publish, pad, sink)?;
    }
    Ok(())
}

fn copy_artifact(
    workspace: &Path,
    publish: &Publish,
    build_type: &str,
    copy: &CopyAction,
    sink: &dyn ConsoleSink,
) -> Result<()> {
    let src_dir = platform_output_dir(workspace, &publish.platform, build_type);
    let dst_dir = workspace.join(&publish.dest);
    let dst_name = copy.dest_file_name();
    sink.emit(ConsoleEvent::Note {
        line: format!(
            "# copy: Build/{}/{}_GCC5 / {}  =>  {} / {}",
            publish.platform, build_type, copy.source, publish.dest, dst_name
        ),
    });

    let src = src_dir.join(&copy.source);
    let dst = dst_dir.join(dst_name);
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::msg(format!("failed to create dir {}: {e}", parent.display())))?;
    }
    fs::copy(&src, &dst).map_err(|e| {
        Error::msg(format!(
            "failed to copy {} -> {}: {e}",
            src.display(),
            dst.display()
        ))
    })?;
    let digest = sha256_file_hex(&dst)?;
    sink.emit(ConsoleEvent::Note {
        line: format!("# sha256: {digest}  {dst_name}"),
    });
    Ok(())
}

fn pad_artifact(
    workspace: &Path,
    publish: &Publish,
    pad: &PadAction,
    sink: &dyn ConsoleSink,
) -> Result<()> {
    sink.emit(ConsoleEvent::Note {
        line: format!(
            "# padding: {} / {}  =>  {}",
            publish.dest, pad.file, pad.size
        ),
    });
    let path = workspace.join(&publish.dest).join(&pad.file);
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| Error::msg(format!("failed to open {}: {e}", path.display())))?;
    file.set_len(pad.size_bytes).map_err(|e| {
        Error::msg(format!(
            "failed to resize {} to {} bytes: {e}",
            path.display(),
            pad.size_bytes
        ))
    })?;
    Ok(())
}

fn sha256_file_hex(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};

    let mut file = fs::File::open(path)
        .map_err(|e| Error::msg(format!("failed to open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_follow_truncate_suffixes() {
        assert_eq!(parse_size("100").unwrap(), 100);
        assert_eq!(parse_size("256k").unwrap(), 262_144);
        assert_eq!(parse_size("256K").unwrap(), 262_144);
        assert_eq!(parse_size("2M").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("2MiB").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("2MB").unwrap(), 2_000_000);
        assert_eq!(parse_size("1G").unwrap(), 1 << 30);
    }

    #[test]
    fn rejects_relative_and_garbage_sizes() {
        for raw in ["", "+4k", "4x", "k", "-1", "99999999999E"] {
            assert!(parse_size(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn copy_defaults_to_source_base_name() {
        let c = CopyAction::parse("FV/OVMF.fd").unwrap();
        assert_eq!(c.dest_file_name(), "OVMF.fd");
        let c = CopyAction::parse("FV/OVMF.fd bios.bin").unwrap();
        assert_eq!(c.dest_file_name(), "bios.bin");
        assert!(CopyAction::parse("   ").is_err());
    }

    #[test]
    fn pad_requires_name_and_size() {
        let p = PadAction::parse("bios.bin 256k").unwrap();
        assert_eq!(p.file, "bios.bin");
        assert_eq!(p.size_bytes, 262_144);
        assert!(PadAction::parse("bios.bin").is_err());
    }

    #[test]
    fn output_dir_layout() {
        assert_eq!(
            platform_output_dir(Path::new("/ws"), "OvmfX64", "RELEASE"),
            PathBuf::from("/ws/Build/OvmfX64/RELEASE_GCC5")
        );
    }
}
