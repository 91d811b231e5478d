use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use ini::{Ini, ParseOption};

use crate::artifacts::{CopyAction, PadAction};
use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = ".edk2.builds";
pub const DEFAULT_BUILD_TYPE: &str = "DEBUG";
pub const NO_DESCRIPTION: &str = "no description";

const GLOBAL_SECTION: &str = "global";
pub const BUILD_PREFIX: &str = "build.";
const OPTS_PREFIX: &str = "opts.";
const PCDS_PREFIX: &str = "pcds.";
const COPY_KEY_PREFIX: &str = "cpy";
const PAD_KEY_PREFIX: &str = "pad";

pub type Section = IndexMap<String, String>;

/// Raw INI document. Sections and keys keep file order.
#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    sections: IndexMap<String, Section>,
}

impl ConfigDoc {
    pub fn parse(path: &Path, data: &str) -> Result<Self> {
        let opt = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..ParseOption::default()
        };
        let ini = Ini::load_from_str_opt(data, opt)
            .map_err(|e| Error::msg(format!("INI parse error in {}: {e}", path.display())))?;

        let mut sections = IndexMap::<String, Section>::new();
        for (name, props) in ini.iter() {
            // Keys outside any section have no meaning here.
            let Some(name) = name else {
                continue;
            };
            let name = name.trim();
            if sections.contains_key(name) {
                return Err(Error::msg(format!(
                    "duplicate section [{}] in {}",
                    name,
                    path.display()
                )));
            }
            let mut section = Section::new();
            for (k, v) in props.iter() {
                section.insert(k.trim().to_string(), v.trim().to_string());
            }
            sections.insert(name.to_string(), section);
        }

        Ok(Self {
            path: path.to_path_buf(),
            sections,
        })
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?.get(key).map(String::as_str)
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &Section)> {
        self.sections.iter().map(|(k, v)| (k.as_str(), v))
    }
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    if !path.exists() {
        return Err(Error::exit(
            1,
            format!("config file \"{}\" not found", path.display()),
        ));
    }
    let data = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    ConfigDoc::parse(path, &data)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfig {
    /// Location of the core edk2 tree (where BaseTools live).
    pub core: Option<String>,
    /// Additional package directories.
    pub pkgs: Vec<String>,
}

impl GlobalConfig {
    fn from_doc(doc: &ConfigDoc) -> Self {
        let core = doc
            .get(GLOBAL_SECTION, "core")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned);
        let pkgs = doc
            .get(GLOBAL_SECTION, "pkgs")
            .map(split_words)
            .unwrap_or_default();
        Self { core, pkgs }
    }
}

/// Where post-build actions read from and write to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    /// Platform name, used to locate `Build/<platform>/<type>_GCC5`.
    pub platform: String,
    pub dest: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    pub name: String,
    /// Platform description file (`.dsc`), relative to the workspace.
    pub conf: String,
    pub arch: Vec<String>,
    pub build_types: Vec<String>,
    pub desc: Option<String>,
    /// `-D` overlays, resolved from the referenced `opts.*` sections.
    pub defines: Vec<(String, String)>,
    /// `--pcd` overlays, resolved from the referenced `pcds.*` sections.
    pub pcds: Vec<(String, String)>,
    pub publish: Option<Publish>,
    pub copies: Vec<CopyAction>,
    pub pads: Vec<PadAction>,
}

impl BuildSpec {
    /// Firmware images get version and release date PCDs, other platforms don't.
    pub fn is_firmware_image(&self) -> bool {
        self.conf.starts_with("OvmfPkg/") || self.conf.starts_with("ArmVirtPkg/")
    }

    pub fn description(&self) -> &str {
        self.desc.as_deref().unwrap_or(NO_DESCRIPTION)
    }

    /// `build.<name>`, as written in the config file.
    pub fn section_name(&self) -> String {
        format!("{BUILD_PREFIX}{}", self.name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildMatrix {
    pub global: GlobalConfig,
    builds: IndexMap<String, BuildSpec>,
}

impl BuildMatrix {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        let global = GlobalConfig::from_doc(doc);
        let mut builds = IndexMap::new();
        for (section, props) in doc.sections() {
            let Some(name) = section.strip_prefix(BUILD_PREFIX) else {
                continue;
            };
            let spec = parse_build(doc, name, props)
                .map_err(|e| Error::msg(format!("[{section}]: {e}")))?;
            builds.insert(name.to_string(), spec);
        }
        Ok(Self { global, builds })
    }

    pub fn builds(&self) -> impl Iterator<Item = &BuildSpec> {
        self.builds.values()
    }

    pub fn get(&self, name: &str) -> Option<&BuildSpec> {
        self.builds.get(name)
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }
}

fn parse_build(doc: &ConfigDoc, name: &str, props: &Section) -> Result<BuildSpec> {
    let conf = props
        .get("conf")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::msg("missing required key 'conf'"))?;

    let arch = props.get("arch").map(|s| split_words(s)).unwrap_or_default();
    if arch.is_empty() {
        return Err(Error::msg("missing required key 'arch'"));
    }

    let mut build_types = props.get("tgts").map(|s| split_words(s)).unwrap_or_default();
    if build_types.is_empty() {
        build_types.push(DEFAULT_BUILD_TYPE.to_string());
    }

    let desc = props
        .get("desc")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let defines = resolve_overlays(doc, OPTS_PREFIX, props.get("opts"))?;
    let pcds = resolve_overlays(doc, PCDS_PREFIX, props.get("pcds"))?;

    let mut copies = Vec::new();
    let mut pads = Vec::new();
    for (key, value) in props {
        if key.starts_with(COPY_KEY_PREFIX) {
            copies.push(CopyAction::parse(value).map_err(|e| Error::msg(format!("{key}: {e}")))?);
        } else if key.starts_with(PAD_KEY_PREFIX) {
            pads.push(PadAction::parse(value).map_err(|e| Error::msg(format!("{key}: {e}")))?);
        }
    }

    let platform = props.get("plat").filter(|s| !s.trim().is_empty());
    let dest = props.get("dest").filter(|s| !s.trim().is_empty());
    let publish = match (platform, dest) {
        (Some(platform), Some(dest)) => Some(Publish {
            platform: platform.trim().to_string(),
            dest: dest.trim().to_string(),
        }),
        (None, None) => None,
        (Some(_), None) => return Err(Error::msg("'plat' is set but 'dest' is missing")),
        (None, Some(_)) => return Err(Error::msg("'dest' is set but 'plat' is missing")),
    };
    if publish.is_none() && (!copies.is_empty() || !pads.is_empty()) {
        tracing::warn!(
            build = name,
            "copy/pad entries are ignored without 'plat' and 'dest'"
        );
    }

    Ok(BuildSpec {
        name: name.to_string(),
        conf,
        arch,
        build_types,
        desc,
        defines,
        pcds,
        publish,
        copies,
        pads,
    })
}

fn resolve_overlays(
    doc: &ConfigDoc,
    prefix: &str,
    refs: Option<&String>,
) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for overlay in refs.map(|s| split_words(s)).unwrap_or_default() {
        let section = format!("{prefix}{overlay}");
        let Some(props) = doc.section(&section) else {
            return Err(Error::msg(format!(
                "referenced section [{section}] does not exist"
            )));
        };
        out.extend(props.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    Ok(out)
}

fn split_words(s: &str) -> Vec<String> {
    s.split_whitespace().map(ToOwned::to_owned).collect()
}
