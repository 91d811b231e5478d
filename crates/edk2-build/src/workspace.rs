use std::path::{Component, Path, PathBuf};

use crate::config::GlobalConfig;

/// Absolute locations the build tool is pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    /// Directory the tool runs in; relative config paths resolve here.
    pub root: PathBuf,
    /// Core edk2 tree providing BaseTools and Conf.
    pub core_dir: PathBuf,
    /// PACKAGES_PATH entries, in search order.
    pub packages: Vec<PathBuf>,
}

impl WorkspacePaths {
    pub fn resolve(root: &Path, global: &GlobalConfig) -> Self {
        let root = normalize(root);
        let core_dir = global
            .core
            .as_deref()
            .map(|c| resolve_user_path(&root, c))
            .unwrap_or_else(|| root.clone());

        let mut packages = vec![root.clone()];
        packages.extend(global.pkgs.iter().map(|p| resolve_user_path(&root, p)));
        if core_dir != root {
            packages.push(core_dir.clone());
        }

        Self {
            root,
            core_dir,
            packages,
        }
    }

    pub fn tools_path(&self) -> PathBuf {
        self.core_dir.join("BaseTools")
    }

    pub fn conf_path(&self) -> PathBuf {
        self.core_dir.join("Conf")
    }
}

fn resolve_user_path(base: &Path, p: &str) -> PathBuf {
    let pb = PathBuf::from(p.trim());
    normalize(&if pb.is_absolute() { pb } else { base.join(pb) })
}

// Lexical only: symlinks are not resolved, like `os.path.abspath`.
fn normalize(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(c);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_workspace_as_core() {
        let ws = WorkspacePaths::resolve(Path::new("/src/fw"), &GlobalConfig::default());
        assert_eq!(ws.core_dir, PathBuf::from("/src/fw"));
        assert_eq!(ws.packages, vec![PathBuf::from("/src/fw")]);
        assert_eq!(ws.tools_path(), PathBuf::from("/src/fw/BaseTools"));
    }

    #[test]
    fn resolves_core_and_packages_against_root() {
        let global = GlobalConfig {
            core: Some("../edk2".into()),
            pkgs: vec!["platforms".into(), "/opt/non-osi".into()],
        };
        let ws = WorkspacePaths::resolve(Path::new("/src/fw"), &global);
        assert_eq!(ws.core_dir, PathBuf::from("/src/edk2"));
        assert_eq!(
            ws.packages,
            vec![
                PathBuf::from("/src/fw"),
                PathBuf::from("/src/fw/platforms"),
                PathBuf::from("/opt/non-osi"),
                PathBuf::from("/src/edk2"),
            ]
        );
        assert_eq!(ws.conf_path(), PathBuf::from("/src/edk2/Conf"));
    }

    #[test]
    fn core_equal_to_root_is_not_listed_twice() {
        let global = GlobalConfig {
            core: Some("./".into()),
            pkgs: vec![],
        };
        let ws = WorkspacePaths::resolve(Path::new("/src/fw"), &global);
        assert_eq!(ws.packages, vec![PathBuf::from("/src/fw")]);
    }
}
