use std::time::Instant;

use crate::builder;
use crate::config::{BUILD_PREFIX, BuildMatrix, BuildSpec, ConfigDoc, NO_DESCRIPTION};
use crate::context::RunContext;
use crate::error::Result;
use crate::executor::{ConsoleEvent, ConsoleSink, ToolRunner};
use crate::workspace::WorkspacePaths;

/// Substring filters over build section names (`build.<name>`).
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub include: Option<String>,
    pub exclude: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<'a> {
    Run(&'a BuildSpec),
    Skip { spec: &'a BuildSpec, reason: String },
}

pub fn select<'a>(matrix: &'a BuildMatrix, filters: &Filters) -> Vec<Selection<'a>> {
    matrix
        .builds()
        .map(|spec| {
            let section = spec.section_name();
            if let Some(m) = filters.include.as_deref()
                && !section.contains(m)
            {
                return Selection::Skip {
                    spec,
                    reason: format!("not matching \"{m}\""),
                };
            }
            if let Some(x) = filters.exclude.as_deref()
                && section.contains(x)
            {
                return Selection::Skip {
                    spec,
                    reason: format!("matching \"{x}\""),
                };
            }
            Selection::Run(spec)
        })
        .collect()
}

/// Print every `build.*` section with its description. Works on the raw
/// document so one broken build does not hide the others.
pub fn list_builds(doc: &ConfigDoc, sink: &dyn ConsoleSink) {
    for (section, props) in doc.sections() {
        let Some(name) = section.strip_prefix(BUILD_PREFIX) else {
            continue;
        };
        let desc = props.get("desc").map_or(NO_DESCRIPTION, String::as_str);
        sink.emit(ConsoleEvent::Note {
            line: format!("# {name:<20} - {desc}"),
        });
    }
}

/// Run every selected build in declaration order. The first failure stops
/// the run; returns the number of builds that ran.
pub fn run_matrix(
    ctx: &RunContext,
    paths: &WorkspacePaths,
    matrix: &BuildMatrix,
    filters: &Filters,
    runner: &dyn ToolRunner,
    sink: &dyn ConsoleSink,
) -> Result<usize> {
    let started = Instant::now();
    let mut built = 0usize;
    for selection in select(matrix, filters) {
        match selection {
            Selection::Skip { spec, reason } => {
                sink.emit(ConsoleEvent::Note {
                    line: format!("# skipping \"{}\" ({reason})", spec.section_name()),
                });
            }
            Selection::Run(spec) => {
                builder::run_build(ctx, paths, spec, runner, sink)?;
                built += 1;
            }
        }
    }
    tracing::info!(
        built,
        total = matrix.len(),
        elapsed_s = started.elapsed().as_secs(),
        "build matrix finished"
    );
    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RecordingSink;
    use std::path::Path;

    fn doc() -> ConfigDoc {
        ConfigDoc::parse(
            Path::new("<mem>"),
            "[build.ovmf-ia32]\nconf = OvmfPkg/OvmfPkgIa32.dsc\narch = IA32\ndesc = OVMF 32-bit\n\n\
             [build.ovmf-x64]\nconf = OvmfPkg/OvmfPkgX64.dsc\narch = X64\n\n\
             [build.armvirt-aarch64]\nconf = ArmVirtPkg/ArmVirtQemu.dsc\narch = AARCH64\n",
        )
        .expect("parse")
    }

    fn matrix() -> BuildMatrix {
        BuildMatrix::from_doc(&doc()).expect("matrix")
    }

    fn selected(m: &BuildMatrix, f: &Filters) -> Vec<String> {
        select(m, f)
            .into_iter()
            .filter_map(|s| match s {
                Selection::Run(spec) => Some(spec.name.clone()),
                Selection::Skip { .. } => None,
            })
            .collect()
    }

    #[test]
    fn no_filters_select_everything() {
        let m = matrix();
        assert_eq!(
            selected(&m, &Filters::default()),
            vec!["ovmf-ia32", "ovmf-x64", "armvirt-aarch64"]
        );
    }

    #[test]
    fn include_and_exclude_combine() {
        let m = matrix();
        let f = Filters {
            include: Some("ovmf".into()),
            exclude: Some("x64".into()),
        };
        assert_eq!(selected(&m, &f), vec!["ovmf-ia32"]);

        let reasons: Vec<String> = select(&m, &f)
            .into_iter()
            .filter_map(|s| match s {
                Selection::Skip { spec, reason } => Some(format!("{}: {reason}", spec.name)),
                Selection::Run(_) => None,
            })
            .collect();
        assert_eq!(
            reasons,
            vec![
                "ovmf-x64: matching \"x64\"",
                "armvirt-aarch64: not matching \"ovmf\"",
            ]
        );
    }

    #[test]
    fn filters_see_the_section_prefix() {
        let m = matrix();
        let exclude_all = Filters {
            include: None,
            exclude: Some("build.".into()),
        };
        assert!(selected(&m, &exclude_all).is_empty());

        let anchored = Filters {
            include: Some("build.ovmf".into()),
            exclude: None,
        };
        assert_eq!(selected(&m, &anchored), vec!["ovmf-ia32", "ovmf-x64"]);
    }

    #[test]
    fn listing_prints_padded_names() {
        let sink = RecordingSink::default();
        list_builds(&doc(), &sink);
        assert_eq!(
            sink.notes(),
            vec![
                "# ovmf-ia32            - OVMF 32-bit",
                "# ovmf-x64             - no description",
                "# armvirt-aarch64      - no description",
            ]
        );
    }

    #[test]
    fn listing_ignores_broken_builds() {
        let doc = ConfigDoc::parse(
            Path::new("<mem>"),
            "[build.good]\nconf = OvmfPkg/OvmfPkgX64.dsc\narch = X64\ndesc = fine\n\n\
             [build.bad]\nconf = OvmfPkg/OvmfPkgX64.dsc\narch = X64\nopts = missing\n\n\
             [opts.x]\nA = 1\n",
        )
        .expect("parse");
        assert!(BuildMatrix::from_doc(&doc).is_err());

        let sink = RecordingSink::default();
        list_builds(&doc, &sink);
        assert_eq!(
            sink.notes(),
            vec![
                "# good                 - fine",
                "# bad                  - no description",
            ]
        );
    }
}
