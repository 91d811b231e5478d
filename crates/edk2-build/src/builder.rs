use std::fs;

use crate::artifacts;
use crate::config::BuildSpec;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::executor::{ConsoleEvent, ConsoleSink, OutputMode, ToolCommand, ToolRunner};
use crate::version::resolve_version;
use crate::workspace::WorkspacePaths;

pub const BUILD_TOOL: &str = "build";
pub const TOOL_CHAIN_TAG: &str = "GCC5";

/// `--pcd` argument for a UCS-2 string PCD.
pub fn pcd_string(name: &str, value: &str) -> String {
    format!("{name}=L{value}\\0")
}

/// Arguments shared by every build type of `spec`; `-b <type>` is appended per run.
pub fn build_args(spec: &BuildSpec, firmware_pcds: &[String], jobs: Option<usize>) -> Vec<String> {
    let mut args = vec![
        "-t".to_string(),
        TOOL_CHAIN_TAG.to_string(),
        "-p".to_string(),
        spec.conf.clone(),
    ];
    args.extend(firmware_pcds.iter().cloned());
    if let Some(n) = jobs {
        args.push("-n".into());
        args.push(n.to_string());
    }
    for arch in &spec.arch {
        args.push("-a".into());
        args.push(arch.clone());
    }
    for (k, v) in &spec.defines {
        args.push("-D".into());
        args.push(format!("{k}={v}"));
    }
    for (k, v) in &spec.pcds {
        args.push("--pcd".into());
        args.push(format!("{k}={v}"));
    }
    args
}

/// Version and release date PCDs; empty for anything that isn't a firmware image.
pub fn firmware_pcd_args(
    ctx: &RunContext,
    paths: &WorkspacePaths,
    spec: &BuildSpec,
    runner: &dyn ToolRunner,
    sink: &dyn ConsoleSink,
) -> Result<Vec<String>> {
    if !spec.is_firmware_image() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    if let Some(v) = resolve_version(ctx, &paths.core_dir, runner, sink)? {
        out.push("--pcd".into());
        out.push(pcd_string("PcdFirmwareVersionString", &v.value));
    }
    if let Some(date) = ctx.version.release_date.as_deref() {
        out.push("--pcd".into());
        out.push(pcd_string("PcdFirmwareReleaseDateString", date));
    }
    Ok(out)
}

/// Build every build type of `spec`, post-processing each one before the next.
pub fn run_build(
    ctx: &RunContext,
    paths: &WorkspacePaths,
    spec: &BuildSpec,
    runner: &dyn ToolRunner,
    sink: &dyn ConsoleSink,
) -> Result<()> {
    let firmware_pcds = firmware_pcd_args(ctx, paths, spec, runner, sink)?;
    let base = build_args(spec, &firmware_pcds, ctx.jobs);
    tracing::debug!(build = %spec.name, args = ?base, "constructed build arguments");

    for build_type in &spec.build_types {
        sink.emit(ConsoleEvent::Banner {
            title: ctx.title(&format!(
                "building: {} ({}, {})",
                spec.conf,
                spec.arch.join(" "),
                build_type
            )),
            detail: spec.desc.as_ref().map(|d| format!("description: {d}")),
        });
        let cmd = ToolCommand::new(BUILD_TOOL)
            .args(base.iter().cloned())
            .args(["-b", build_type.as_str()])
            .current_dir(&ctx.workspace);
        run_tool(
            ctx,
            &cmd,
            &format!("{} ({build_type})", spec.name),
            &format!("build.{}.{}", spec.name, build_type),
            runner,
            sink,
        )?;

        artifacts::post_process(&ctx.workspace, spec, build_type, sink)?;
    }
    Ok(())
}

/// `make -C $EDK_TOOLS_PATH`, run once before the matrix.
pub fn build_basetools(
    ctx: &RunContext,
    paths: &WorkspacePaths,
    runner: &dyn ToolRunner,
    sink: &dyn ConsoleSink,
) -> Result<()> {
    sink.emit(ConsoleEvent::Banner {
        title: ctx.title("building: BaseTools"),
        detail: None,
    });
    let cmd = ToolCommand::new("make")
        .arg("-C")
        .arg(paths.tools_path().display().to_string())
        .current_dir(&ctx.workspace);
    run_tool(ctx, &cmd, "BaseTools", "build.basetools", runner, sink)
}

/// Run one tool invocation in the context's output mode. In silent mode the
/// combined output goes to `<log_section>.log` and is only shown on failure.
fn run_tool(
    ctx: &RunContext,
    cmd: &ToolCommand,
    what: &str,
    log_section: &str,
    runner: &dyn ToolRunner,
    sink: &dyn ConsoleSink,
) -> Result<()> {
    sink.emit(ConsoleEvent::Command { argv: cmd.argv() });

    let outcome = if ctx.silent {
        sink.emit(ConsoleEvent::Note {
            line: "### building in silent mode ...".into(),
        });
        let outcome = runner.execute(cmd, OutputMode::Combined)?;

        let log_name = format!("{log_section}.log");
        let log_path = ctx.workspace.join(&log_name);
        sink.emit(ConsoleEvent::Note {
            line: format!("### writing log to {log_name} ..."),
        });
        fs::write(&log_path, outcome.output.as_deref().unwrap_or_default()).map_err(|e| {
            Error::msg(format!("failed to write log {}: {e}", log_path.display()))
        })?;

        if outcome.success() {
            sink.emit(ConsoleEvent::Note {
                line: "### OK".into(),
            });
        } else {
            sink.emit(ConsoleEvent::Note {
                line: "### BUILD FAILURE".into(),
            });
            sink.emit(ConsoleEvent::Note {
                line: "### output".into(),
            });
            sink.emit(ConsoleEvent::Output {
                text: outcome.output_lossy(),
            });
            sink.emit(ConsoleEvent::Note {
                line: format!("### exit code: {}", outcome.code),
            });
        }
        outcome
    } else {
        runner.execute(cmd, OutputMode::Inherit)?
    };

    if !outcome.success() {
        return Err(Error::exit(
            outcome.code,
            format!(
                "{} exited with {} while building {what}",
                cmd.program, outcome.code
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuildMatrix, ConfigDoc};
    use crate::executor::{ExitOutcome, RecordingSink};
    use std::path::Path;

    struct NeverRun;

    impl ToolRunner for NeverRun {
        fn execute(&self, cmd: &ToolCommand, _: OutputMode) -> Result<ExitOutcome> {
            Err(Error::msg(format!("unexpected call: {:?}", cmd.argv())))
        }
    }

    fn spec(ini: &str, name: &str) -> BuildSpec {
        let doc = ConfigDoc::parse(Path::new("<mem>"), ini).expect("parse");
        BuildMatrix::from_doc(&doc)
            .expect("matrix")
            .get(name)
            .cloned()
            .expect("build")
    }

    #[test]
    fn one_arch_flag_per_architecture_in_order() {
        let s = spec("[build.a]\nconf = X.dsc\narch = IA32 X64 AARCH64\n", "a");
        let args = build_args(&s, &[], None);
        let archs: Vec<&str> = args
            .windows(2)
            .filter(|w| w[0] == "-a")
            .map(|w| w[1].as_str())
            .collect();
        assert_eq!(archs, vec!["IA32", "X64", "AARCH64"]);
        assert_eq!(args.iter().filter(|a| *a == "-a").count(), 3);
    }

    #[test]
    fn argument_order_matches_build_tool_expectations() {
        let s = spec(
            "[opts.o]\nFD_SIZE_4MB = TRUE\n\n[pcds.p]\nPcdFoo = 1\n\n\
             [build.a]\nconf = OvmfPkg/OvmfPkgX64.dsc\narch = X64\nopts = o\npcds = p\n",
            "a",
        );
        let fw = vec!["--pcd".to_string(), pcd_string("PcdFirmwareVersionString", "v1")];
        let args = build_args(&s, &fw, Some(8));
        assert_eq!(
            args,
            vec![
                "-t",
                "GCC5",
                "-p",
                "OvmfPkg/OvmfPkgX64.dsc",
                "--pcd",
                "PcdFirmwareVersionString=Lv1\\0",
                "-n",
                "8",
                "-a",
                "X64",
                "-D",
                "FD_SIZE_4MB=TRUE",
                "--pcd",
                "PcdFoo=1",
            ]
        );
    }

    #[test]
    fn non_firmware_platforms_get_no_version_pcds() {
        let s = spec("[build.a]\nconf = ShellPkg/ShellPkg.dsc\narch = X64\n", "a");
        let mut ctx = RunContext::default();
        ctx.version.override_version = Some("v1".into());
        ctx.version.release_date = Some("01/02/2024".into());
        let paths = WorkspacePaths::resolve(Path::new("/ws"), &Default::default());
        let sink = RecordingSink::default();

        let args = firmware_pcd_args(&ctx, &paths, &s, &NeverRun, &sink).expect("args");
        assert!(args.is_empty());
    }

    #[test]
    fn firmware_platforms_get_version_and_date() {
        let s = spec("[build.a]\nconf = ArmVirtPkg/ArmVirtQemu.dsc\narch = AARCH64\n", "a");
        let mut ctx = RunContext::default();
        ctx.version.override_version = Some("v1".into());
        ctx.version.release_date = Some("01/02/2024".into());
        let paths = WorkspacePaths::resolve(Path::new("/ws"), &Default::default());
        let sink = RecordingSink::default();

        let args = firmware_pcd_args(&ctx, &paths, &s, &NeverRun, &sink).expect("args");
        assert_eq!(
            args,
            vec![
                "--pcd",
                "PcdFirmwareVersionString=Lv1\\0",
                "--pcd",
                "PcdFirmwareReleaseDateString=L01/02/2024\\0",
            ]
        );
    }
}
