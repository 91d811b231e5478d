use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::executor::{ConsoleEvent, ConsoleSink, OutputMode, ToolCommand, ToolRunner};
use crate::workspace::WorkspacePaths;

/// BaseTools directories put in front of PATH when present.
pub const TOOL_DIRS: [&str; 2] = ["BaseTools/Bin/Linux-x86_64", "BaseTools/BinWrappers/PosixLike"];

struct CrossToolchain {
    gcc: &'static str,
    prefix: &'static str,
    vars: &'static [&'static str],
    /// Only used when the host is not this architecture already.
    native_arch: Option<&'static str>,
}

const CROSS_TOOLCHAINS: &[CrossToolchain] = &[
    CrossToolchain {
        gcc: "arm-linux-gnu-gcc",
        prefix: "arm-linux-gnu-",
        vars: &["GCC5_ARM_PREFIX"],
        native_arch: None,
    },
    CrossToolchain {
        gcc: "loongarch64-linux-gnu-gcc",
        prefix: "loongarch64-linux-gnu-",
        vars: &["GCC5_LOONGARCH64_PREFIX"],
        native_arch: None,
    },
    CrossToolchain {
        gcc: "aarch64-linux-gnu-gcc",
        prefix: "aarch64-linux-gnu-",
        vars: &["GCC5_AARCH64_PREFIX"],
        native_arch: Some("aarch64"),
    },
    CrossToolchain {
        gcc: "riscv64-linux-gnu-gcc",
        prefix: "riscv64-linux-gnu-",
        vars: &["GCC5_RISCV64_PREFIX"],
        native_arch: Some("riscv64"),
    },
    CrossToolchain {
        gcc: "x86_64-linux-gnu-gcc",
        prefix: "x86_64-linux-gnu-",
        vars: &["GCC5_IA32_PREFIX", "GCC5_X64_PREFIX", "GCC5_BIN"],
        native_arch: Some("x86_64"),
    },
];

/// Variables exported for the build tool, in export order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnv {
    pub vars: Vec<(String, String)>,
}

impl BuildEnv {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.vars.push((key.to_string(), value)),
        }
    }
}

/// PATH with the existing BaseTools directories of the core tree in front.
/// Entries already on PATH are left where they are.
pub fn search_path(paths: &WorkspacePaths, current: &str) -> Result<String> {
    let mut entries: Vec<PathBuf> = env::split_paths(current).collect();
    for dir in TOOL_DIRS {
        let p = paths.core_dir.join(dir);
        if !p.exists() || entries.contains(&p) {
            continue;
        }
        entries.insert(0, p);
    }
    join_paths(entries)
}

/// Compute everything `prepare` exports, given the current PATH and host
/// architecture. Cross compilers are looked up on the new PATH.
pub fn plan_environment(
    paths: &WorkspacePaths,
    current_path: &str,
    host_arch: &str,
) -> Result<BuildEnv> {
    let path = search_path(paths, current_path)?;
    let mut out = BuildEnv::default();
    out.set("PATH", path.clone());
    out.set("PACKAGES_PATH", join_paths(paths.packages.iter())?);
    out.set("WORKSPACE", paths.root.display().to_string());
    out.set("EDK_TOOLS_PATH", paths.tools_path().display().to_string());
    out.set("CONF_PATH", paths.conf_path().display().to_string());
    out.set("PYTHON_COMMAND", "/usr/bin/python3");
    out.set("PYTHONHASHSEED", "1");

    for tc in CROSS_TOOLCHAINS {
        if tc.native_arch == Some(host_arch) || !binary_exists(&path, tc.gcc) {
            continue;
        }
        for var in tc.vars {
            out.set(var, tc.prefix);
        }
    }
    Ok(out)
}

/// Mirror what `Conf/BuildEnv.sh` sets up, in this process. Safe to call
/// more than once.
pub fn prepare(
    ctx: &RunContext,
    paths: &WorkspacePaths,
    runner: &dyn ToolRunner,
    sink: &dyn ConsoleSink,
) -> Result<BuildEnv> {
    let tools_def = paths.conf_path().join("tools_def.txt");
    if !tools_def.exists() {
        bootstrap(ctx, paths, runner, sink)?;
    }

    let current_path = env::var("PATH").unwrap_or_default();
    let planned = plan_environment(paths, &current_path, env::consts::ARCH)?;
    for (k, v) in &planned.vars {
        tracing::debug!(key = %k, value = %v, "export");
        // SAFETY: single-threaded at this point; no build has been spawned yet.
        unsafe { env::set_var(k, v) };
    }
    Ok(planned)
}

fn bootstrap(
    ctx: &RunContext,
    paths: &WorkspacePaths,
    runner: &dyn ToolRunner,
    sink: &dyn ConsoleSink,
) -> Result<()> {
    let conf = paths.conf_path();
    fs::create_dir_all(&conf)
        .map_err(|e| Error::msg(format!("failed to create dir {}: {e}", conf.display())))?;

    sink.emit(ConsoleEvent::Banner {
        title: ctx.title("running BaseTools/BuildEnv"),
        detail: None,
    });
    let cmd = ToolCommand::new("bash")
        .arg("BaseTools/BuildEnv")
        .current_dir(&paths.core_dir);
    let outcome = runner.execute(&cmd, OutputMode::Inherit)?;
    if !outcome.success() {
        return Err(Error::exit(
            outcome.code,
            format!(
                "BaseTools/BuildEnv failed in {} (exit code {})",
                paths.core_dir.display(),
                outcome.code
            ),
        ));
    }
    Ok(())
}

fn binary_exists(path: &str, name: &str) -> bool {
    env::split_paths(path).any(|dir| dir.join(name).exists())
}

fn join_paths<I, P>(entries: I) -> Result<String>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let joined = env::join_paths(entries.into_iter().map(|p| p.as_ref().to_path_buf()))
        .map_err(|e| Error::msg(format!("invalid search path entry: {e}")))?;
    Ok(joined.to_string_lossy().into_owned())
}
