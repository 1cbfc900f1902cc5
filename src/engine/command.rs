//! Engine adapter driving an external bridge executable.
//!
//! Each request runs one child process:
//!
//! ```text
//! bridge check <model>                                  exit 0 if the model loads
//! bridge formulas <model>                               one formula per line
//! bridge features <model> <formula>                     comma-separated floats
//! bridge decide <model> <selector> <K=V,...> <formula>  VALID | INVALID | UNKNOWN
//! ```
//!
//! Exit code 2 means the model could not be loaded, exit code 3 means the
//! formula could not be translated. Cancelling a context kills its running
//! `decide` children.

use crate::backend::Preference;
use crate::engine::{Engine, EngineResult, FeatureGenerator, FormulaGenerator};
use crate::models::{EngineConfig, EngineError};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

const EXIT_MACHINE_ACCESS: i32 = 2;
const EXIT_TRANSLATION: i32 = 3;
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Engine backed by an external bridge executable.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    command: String,
    args: Vec<String>,
}

/// Context of one loaded model: its path plus the `decide` children in flight.
#[derive(Debug)]
pub struct CommandContext {
    model: PathBuf,
    running: Mutex<HashMap<u64, Child>>,
    next_request: AtomicU64,
}

impl CommandContext {
    pub fn model(&self) -> &Path {
        &self.model
    }

    fn kill_all(&self) {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (id, child) in running.iter_mut() {
            // The child may already have exited; nothing to do then.
            if let Err(e) = child.kill() {
                debug!(request = id, error = %e, "Kill on finished child");
            }
        }
    }
}

impl CommandEngine {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.resolved_command(), config.resolved_args())
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args).arg(subcommand);
        cmd
    }

    fn run(&self, mut cmd: Command) -> Result<Output, EngineError> {
        cmd.stdin(Stdio::null());
        cmd.output().map_err(|e| self.spawn_error(e))
    }

    fn spawn_error(&self, e: std::io::Error) -> EngineError {
        EngineError::Unavailable(format!("cannot run '{}': {e}", self.command))
    }

    /// Map a non-zero exit to the matching engine error.
    fn exit_error(code: Option<i32>, stderr: &[u8]) -> EngineError {
        let message = String::from_utf8_lossy(stderr).trim().to_string();
        match code {
            Some(EXIT_MACHINE_ACCESS) => EngineError::MachineAccess(message),
            Some(EXIT_TRANSLATION) => EngineError::Translation(message),
            Some(code) => EngineError::Evaluation(format!("exit code {code}: {message}")),
            None => EngineError::Evaluation("terminated by signal".to_string()),
        }
    }

    fn checked(output: Output) -> Result<String, EngineError> {
        if !output.status.success() {
            return Err(Self::exit_error(output.status.code(), &output.stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_verdict(stdout: &str) -> Result<EngineResult, EngineError> {
        let token = stdout.split_whitespace().next().unwrap_or("");
        match token.to_ascii_uppercase().as_str() {
            "VALID" | "TRUE" | "SAT" => Ok(EngineResult::Solved),
            "INVALID" | "FALSE" | "UNSAT" => Ok(EngineResult::Disproved),
            "UNKNOWN" => Ok(EngineResult::Inconclusive),
            other => Err(EngineError::Evaluation(format!(
                "unexpected bridge answer '{other}'"
            ))),
        }
    }

    fn join_preferences(preferences: &[Preference]) -> String {
        preferences
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Wait for request `id` to exit, polling so that `cancel` can kill it.
    fn wait_for(context: &CommandContext, id: u64) -> Result<ExitStatus, EngineError> {
        loop {
            {
                let mut running = context
                    .running
                    .lock()
                    .map_err(|_| EngineError::Evaluation("context lock poisoned".into()))?;
                let child = running
                    .get_mut(&id)
                    .ok_or_else(|| EngineError::Evaluation("request vanished".into()))?;
                let status = child
                    .try_wait()
                    .map_err(|e| EngineError::Evaluation(format!("waiting for bridge: {e}")))?;
                if let Some(status) = status {
                    running.remove(&id);
                    return Ok(status);
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Read `pipe` to the end on its own thread, so a chatty child never
/// blocks on a full pipe buffer while it is being polled.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf) {
                debug!(error = %e, "Bridge pipe closed early");
            }
        }
        buf
    })
}

fn collect(reader: JoinHandle<Vec<u8>>) -> Result<Vec<u8>, EngineError> {
    reader
        .join()
        .map_err(|_| EngineError::Evaluation("pipe reader panicked".into()))
}

impl Engine for CommandEngine {
    type Context = CommandContext;

    fn open_context(&self, model: &Path) -> Result<CommandContext, EngineError> {
        let mut cmd = self.command("check");
        cmd.arg(model);
        let output = self.run(cmd)?;
        if !output.status.success() {
            return Err(match Self::exit_error(output.status.code(), &output.stderr) {
                EngineError::Evaluation(msg) => EngineError::MachineAccess(msg),
                other => other,
            });
        }
        Ok(CommandContext {
            model: model.to_path_buf(),
            running: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(0),
        })
    }

    fn close_context(&self, context: &CommandContext) {
        context.kill_all();
        let mut running = match context.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (_, mut child) in running.drain() {
            if let Err(e) = child.wait() {
                warn!(
                    model = %context.model.display(),
                    error = %e,
                    "Could not reap bridge process"
                );
            }
        }
    }

    fn evaluate(
        &self,
        formula: &str,
        context: &CommandContext,
        selector: &str,
        preferences: &[Preference],
    ) -> Result<EngineResult, EngineError> {
        let mut cmd = self.command("decide");
        cmd.arg(&context.model)
            .arg(selector)
            .arg(Self::join_preferences(preferences))
            .arg(formula)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let id = context.next_request.fetch_add(1, Ordering::Relaxed);
        context
            .running
            .lock()
            .map_err(|_| EngineError::Evaluation("context lock poisoned".into()))?
            .insert(id, child);

        let status = Self::wait_for(context, id)?;
        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;
        if !status.success() {
            return Err(Self::exit_error(status.code(), &stderr));
        }
        Self::parse_verdict(&String::from_utf8_lossy(&stdout))
    }

    fn cancel(&self, context: &CommandContext) {
        context.kill_all();
    }
}

impl FormulaGenerator<CommandContext> for CommandEngine {
    fn generate(&self, context: &CommandContext) -> Result<Vec<String>, EngineError> {
        let mut cmd = self.command("formulas");
        cmd.arg(&context.model);
        let stdout = Self::checked(self.run(cmd)?)?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

impl FeatureGenerator<CommandContext> for CommandEngine {
    fn generate(&self, formula: &str, context: &CommandContext) -> Result<Vec<f64>, EngineError> {
        let mut cmd = self.command("features");
        cmd.arg(&context.model).arg(formula);
        let stdout = Self::checked(self.run(cmd)?)?;
        stdout
            .trim()
            .split(',')
            .filter(|v| !v.trim().is_empty())
            .map(|v| {
                v.trim()
                    .parse::<f64>()
                    .map_err(|e| EngineError::Evaluation(format!("bad feature value '{v}': {e}")))
            })
            .collect()
    }
}
