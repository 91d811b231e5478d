use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Mutex, mpsc};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// `###` framed status block. `title` already carries the rebase label.
    Banner {
        title: String,
        detail: Option<String>,
    },
    /// Command line about to be executed.
    Command {
        argv: Vec<String>,
    },
    Note {
        line: String,
    },
    /// Captured tool output dumped after a silent-mode failure.
    Output {
        text: String,
    },
}

pub trait ConsoleSink {
    fn emit(&self, ev: ConsoleEvent);
}

/// Prints events to stdout. Flushes after each event so status lines stay
/// ordered with the output of inheriting child processes.
#[derive(Debug, Default)]
pub struct StdoutSink {
    xterm_title: bool,
}

impl StdoutSink {
    pub fn new(xterm_title: bool) -> Self {
        Self { xterm_title }
    }

    pub fn from_env() -> Self {
        Self::for_term(std::env::var("TERM").ok().as_deref())
    }

    /// Title updates only for terminals known to understand OSC 2.
    pub fn for_term(term: Option<&str>) -> Self {
        Self::new(matches!(term, Some("xterm" | "xterm-256color")))
    }

    /// Exact console text for one event.
    pub fn render(&self, ev: &ConsoleEvent) -> String {
        match ev {
            ConsoleEvent::Banner { title, detail } => {
                let mut text = String::new();
                if self.xterm_title {
                    text.push_str(&format!("\x1b]2;{title}\x07"));
                }
                text.push_str(&format!("\n###\n### {title}\n"));
                if let Some(d) = detail {
                    text.push_str(&format!("### {d}\n"));
                }
                text.push_str("###\n");
                text
            }
            ConsoleEvent::Command { argv } => format!("{}\n", argv.join(" ")),
            ConsoleEvent::Note { line } => format!("{line}\n"),
            ConsoleEvent::Output { text } if text.ends_with('\n') => text.clone(),
            ConsoleEvent::Output { text } => format!("{text}\n"),
        }
    }
}

impl ConsoleSink for StdoutSink {
    fn emit(&self, ev: ConsoleEvent) {
        let text = self.render(&ev);
        let mut out = std::io::stdout().lock();
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
            tracing::debug!(error = %e, "console write failed");
        }
    }
}

/// Keeps every event; used to assert on console output.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ConsoleEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ConsoleEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Text of all `Note` events, in order.
    pub fn notes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|ev| match ev {
                ConsoleEvent::Note { line } => Some(line),
                _ => None,
            })
            .collect()
    }

    pub fn banners(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|ev| match ev {
                ConsoleEvent::Banner { title, .. } => Some(title),
                _ => None,
            })
            .collect()
    }
}

impl ConsoleSink for RecordingSink {
    fn emit(&self, ev: ConsoleEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(ev);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// stdout and stderr go straight to the console.
    Inherit,
    /// stdout and stderr are merged into one captured stream.
    Combined,
    /// stdout is captured, stderr goes to the console.
    Stdout,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: i32,
    pub output: Option<Vec<u8>>,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn output_lossy(&self) -> String {
        self.output
            .as_deref()
            .map(|o| String::from_utf8_lossy(o).into_owned())
            .unwrap_or_default()
    }
}

/// Blocking execution of external tools. Exit codes are returned, not
/// interpreted; a spawn failure is an error.
pub trait ToolRunner {
    fn execute(&self, cmd: &ToolCommand, mode: OutputMode) -> Result<ExitOutcome>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn execute(&self, cmd: &ToolCommand, mode: OutputMode) -> Result<ExitOutcome> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        if let Some(dir) = cmd.cwd.as_ref() {
            command.current_dir(dir);
        }
        tracing::debug!(argv = ?cmd.argv(), ?mode, "spawning");

        let spawn_err = |e: std::io::Error| Error::msg(format!("failed to run {}: {e}", cmd.program));
        match mode {
            OutputMode::Inherit => {
                let status = command.status().map_err(spawn_err)?;
                Ok(ExitOutcome {
                    code: exit_code(status),
                    output: None,
                })
            }
            OutputMode::Stdout => {
                let out = command
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .output()
                    .map_err(spawn_err)?;
                Ok(ExitOutcome {
                    code: exit_code(out.status),
                    output: Some(out.stdout),
                })
            }
            OutputMode::Combined => run_combined(command).map_err(spawn_err),
        }
    }
}

fn run_combined(mut command: Command) -> std::io::Result<ExitOutcome> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let mut readers = Vec::new();
    if let Some(out) = child.stdout.take() {
        let tx = tx.clone();
        readers.push(std::thread::spawn(move || forward_lines(out, tx)));
    }
    if let Some(err) = child.stderr.take() {
        let tx = tx.clone();
        readers.push(std::thread::spawn(move || forward_lines(err, tx)));
    }
    drop(tx);

    let mut captured = Vec::new();
    for chunk in rx {
        captured.extend_from_slice(&chunk);
    }
    for r in readers {
        let _ = r.join();
    }

    let status = child.wait()?;
    Ok(ExitOutcome {
        code: exit_code(status),
        output: Some(captured),
    })
}

// Line-granular so stdout and stderr interleave roughly as a terminal shows them.
fn forward_lines<R: Read>(reader: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut r = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        match r.read_until(b'\n', &mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    1
}
