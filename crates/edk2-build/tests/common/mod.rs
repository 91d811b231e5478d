#![allow(dead_code)]

use std::cell::RefCell;
use std::path::Path;

use edk2_build::Result;
use edk2_build::config::{BuildMatrix, ConfigDoc};
use edk2_build::executor::{ExitOutcome, OutputMode, ToolCommand, ToolRunner};

type Hook = Box<dyn Fn(&ToolCommand)>;

/// Records every invocation. Commands whose argv contains `fail_on` exit with
/// `fail_code` and print `fail_output`; everything else succeeds.
#[derive(Default)]
pub struct FakeRunner {
    pub calls: RefCell<Vec<(ToolCommand, OutputMode)>>,
    pub fail_on: Option<String>,
    pub fail_code: i32,
    pub fail_output: String,
    pub ok_output: String,
    pub on_run: Option<Hook>,
}

impl FakeRunner {
    pub fn failing(on: &str, code: i32, output: &str) -> Self {
        Self {
            fail_on: Some(on.to_string()),
            fail_code: code,
            fail_output: output.to_string(),
            ..Self::default()
        }
    }

    pub fn argvs(&self) -> Vec<Vec<String>> {
        self.calls.borrow().iter().map(|(c, _)| c.argv()).collect()
    }

    pub fn modes(&self) -> Vec<OutputMode> {
        self.calls.borrow().iter().map(|(_, m)| *m).collect()
    }

    /// `-p` value of each `build` invocation, with its `-b` build type.
    pub fn builds(&self) -> Vec<(String, String)> {
        self.argvs()
            .into_iter()
            .filter(|argv| argv[0] == "build")
            .map(|argv| (flag_value(&argv, "-p"), flag_value(&argv, "-b")))
            .collect()
    }
}

impl ToolRunner for FakeRunner {
    fn execute(&self, cmd: &ToolCommand, mode: OutputMode) -> Result<ExitOutcome> {
        self.calls.borrow_mut().push((cmd.clone(), mode));
        if let Some(hook) = self.on_run.as_ref() {
            hook(cmd);
        }
        let failed = self
            .fail_on
            .as_deref()
            .is_some_and(|f| cmd.argv().iter().any(|a| a == f));
        let (code, text) = if failed {
            (self.fail_code, self.fail_output.as_str())
        } else {
            (0, self.ok_output.as_str())
        };
        let output = match mode {
            OutputMode::Inherit => None,
            OutputMode::Combined | OutputMode::Stdout => Some(text.as_bytes().to_vec()),
        };
        Ok(ExitOutcome { code, output })
    }
}

pub fn flag_value(argv: &[String], flag: &str) -> String {
    argv.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].clone())
        .unwrap_or_default()
}

pub fn matrix(ini: &str) -> BuildMatrix {
    let doc = ConfigDoc::parse(Path::new("<mem>"), ini).expect("parse config");
    BuildMatrix::from_doc(&doc).expect("build matrix")
}
