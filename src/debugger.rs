use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::mi::commands::{BreakPointNumber, MiCommand};
use crate::mi::output::ResultClass;
use crate::mi::{GDB, GDBBuilder, LogStream, TargetStream};
use crate::models::{ChildVar, Frame, LocalVar, TraversalReport, VarInfo};
use crate::traverse::{self, Inspector};

/// Name of the single variable-object lease used by `variable_info`. Only
/// one lease exists at a time; it is released on every exit path.
const VAR_LEASE: &str = "vx";

/// High-level front-end over one MI session: typed wrappers for the MI
/// command subset plus the memory-graph traversal.
pub struct Debugger {
    session: GDB,
    /// Compiled binary owned by this session, removed on close.
    artifact: Option<PathBuf>,
}

impl Debugger {
    /// Attach a fresh GDB session to an existing binary.
    pub async fn launch(binary: impl Into<PathBuf>, args: &[String]) -> AppResult<Self> {
        Self::launch_inner(Config::default(), binary.into(), args, false)
    }

    /// Compile `source` with debug info and zero-initialised locals, then
    /// launch a session on the produced binary. The binary is owned by the
    /// session and deleted again on `close`.
    pub async fn compile_and_launch(source: &Path, args: &[String]) -> AppResult<Self> {
        let config = Config::default();
        let binary = compile(&config, source).await?;
        Self::launch_inner(config, binary, args, true)
    }

    fn launch_inner(
        config: Config,
        binary: PathBuf,
        args: &[String],
        owned: bool,
    ) -> AppResult<Self> {
        let mut builder = GDBBuilder::new(config.gdb_path.into());
        builder.opt_quiet = true;
        builder.opt_nx = true;
        builder.opt_nh = true;
        builder.opt_program = Some(binary.clone());
        builder.opt_args = args.iter().map(Into::into).collect();
        builder.exit_timeout = Duration::from_secs(config.exit_timeout);
        let session = builder.try_spawn()?;
        Ok(Debugger {
            session,
            artifact: owned.then_some(binary),
        })
    }

    /// Close the session and remove the owned binary, if any.
    pub async fn close(self) -> AppResult<()> {
        let Debugger { session, artifact } = self;
        let closed = session.close().await;
        if let Some(path) = artifact {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!("failed to remove target binary {}: {}", path.display(), e);
            }
        }
        closed
    }

    /// Raw MI passthrough, see [`GDB::run_command`].
    pub async fn run_command(&mut self, command: &str) -> AppResult<(ResultClass, Value)> {
        self.session.run_command(command).await
    }

    pub fn out_of_band_messages(&mut self) -> AppResult<LogStream> {
        self.session.out_of_band_messages()
    }

    pub fn target_output(&mut self) -> AppResult<TargetStream> {
        self.session.target_output()
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    async fn expect(&mut self, command: MiCommand, expected: ResultClass) -> AppResult<Value> {
        let record = self.session.execute(command).await?;
        if record.class != expected {
            return Err(AppError::UnexpectedResult {
                class: record.class,
                results: record.results,
            });
        }
        Ok(record.results)
    }

    /// Names of all functions with debug info in the target.
    pub async fn functions(&mut self) -> AppResult<Vec<String>> {
        let results = self
            .expect(MiCommand::symbol_info_functions(), ResultClass::Done)
            .await?;
        let symbols = results["symbols"]["debug"][0]["symbols"]
            .as_array()
            .ok_or_else(|| AppError::GDBError(format!("malformed symbol listing: {}", results)))?;
        Ok(symbols
            .iter()
            .filter_map(|symbol| symbol["name"].as_str().map(str::to_owned))
            .collect())
    }

    /// Insert a breakpoint on a function and return its number.
    pub async fn breakpoint(&mut self, function: &str) -> AppResult<BreakPointNumber> {
        let results = self
            .expect(MiCommand::break_insert(function), ResultClass::Done)
            .await?;
        results["bkpt"]["number"]
            .as_str()
            .ok_or_else(|| AppError::GDBError(format!("malformed breakpoint reply: {}", results)))?
            .parse()
            .map_err(AppError::GDBError)
    }

    /// `-exec-run`: starts the target. Returns once GDB acknowledges with
    /// `running`; the stop lands on the out-of-band stream.
    pub async fn run(&mut self) -> AppResult<()> {
        self.expect(MiCommand::exec_run(), ResultClass::Running)
            .await?;
        Ok(())
    }

    /// `-exec-next`: step over one source line.
    pub async fn next(&mut self) -> AppResult<()> {
        self.expect(MiCommand::exec_next(), ResultClass::Running)
            .await?;
        Ok(())
    }

    /// Current stack, innermost frame (level 0) first.
    pub async fn frames(&mut self) -> AppResult<Vec<Frame>> {
        let results = self
            .expect(MiCommand::stack_list_frames(), ResultClass::Done)
            .await?;
        Ok(serde_json::from_value(results["stack"].clone())?)
    }

    /// Locals of the given frame (or the selected one), with their textual
    /// values, in the order GDB lists them.
    pub async fn variables(&mut self, frame: Option<usize>) -> AppResult<Vec<LocalVar>> {
        let command = MiCommand::stack_list_variables(frame.map(|_| 1), frame);
        let results = self.expect(command, ResultClass::Done).await?;
        Ok(serde_json::from_value(results["variables"].clone())?)
    }

    /// Inspect one expression in one frame: type, textual value, address
    /// and children, via a short-lived variable object.
    ///
    /// Value and address are best-effort: an expression may fail to
    /// evaluate (empty value) or not be addressable (no address); neither
    /// is an error. The selected frame is restored to 0 afterwards.
    pub async fn variable_info(
        &mut self,
        expression: &str,
        frame: Option<usize>,
    ) -> AppResult<VarInfo> {
        self.expect(
            MiCommand::stack_select_frame(frame.unwrap_or(0) as u64),
            ResultClass::Done,
        )
        .await?;

        self.expect(MiCommand::var_create(VAR_LEASE, expression), ResultClass::Done)
            .await?;
        let leased = self.leased_info().await;
        let deleted = self
            .expect(MiCommand::var_delete(VAR_LEASE), ResultClass::Done)
            .await;
        let (ty, children) = leased?;
        deleted?;

        let record = self
            .session
            .execute(MiCommand::data_evaluate_expression(expression))
            .await?;
        let value = if record.class == ResultClass::Done {
            let value = record.results["value"].as_str().unwrap_or("");
            if value.starts_with("0x") {
                // drop `<symbol+N>` style annotations
                head_token(value).to_string()
            } else {
                value.to_string()
            }
        } else {
            String::new()
        };

        let record = self
            .session
            .execute(MiCommand::data_evaluate_expression(&format!(
                "&{}",
                expression
            )))
            .await?;
        let address = if record.class == ResultClass::Done {
            record.results["value"]
                .as_str()
                .map(|value| head_token(value).to_string())
        } else {
            None
        };

        self.expect(MiCommand::stack_select_frame(0), ResultClass::Done)
            .await?;

        Ok(VarInfo {
            ty,
            value,
            address,
            children,
        })
    }

    /// The part of `variable_info` that runs while the lease is held.
    async fn leased_info(&mut self) -> AppResult<(String, Vec<ChildVar>)> {
        let results = self
            .expect(MiCommand::var_info_type(VAR_LEASE), ResultClass::Done)
            .await?;
        let ty = results["type"]
            .as_str()
            .ok_or_else(|| AppError::GDBError(format!("malformed type reply: {}", results)))?
            .to_string();

        let results = self
            .expect(MiCommand::var_list_children(VAR_LEASE), ResultClass::Done)
            .await?;
        let children = if results["numchild"].as_str() == Some("0") {
            Vec::new()
        } else {
            match results.get("children") {
                Some(children @ Value::Array(_)) => serde_json::from_value(children.clone())?,
                _ => Vec::new(),
            }
        };
        Ok((ty, children))
    }

    /// Breadth-first crawl of everything reachable from the locals of every
    /// live frame; see [`traverse::traverse`].
    pub async fn traverse(&mut self) -> AppResult<TraversalReport> {
        traverse::traverse(self).await
    }
}

impl Inspector for Debugger {
    async fn frames(&mut self) -> AppResult<Vec<Frame>> {
        Debugger::frames(self).await
    }

    async fn variables(&mut self, frame: Option<usize>) -> AppResult<Vec<LocalVar>> {
        Debugger::variables(self, frame).await
    }

    async fn variable_info(&mut self, expression: &str, frame: Option<usize>) -> AppResult<VarInfo> {
        Debugger::variable_info(self, expression, frame).await
    }
}

/// GDB suffixes evaluated pointers with the pointed-to symbol
/// (`0x55… <main>`); only the leading token is the value.
fn head_token(value: &str) -> &str {
    value.split(' ').next().unwrap_or(value)
}

async fn compile(config: &Config, source: &Path) -> AppResult<PathBuf> {
    let binary = std::env::temp_dir().join(format!("target-{}", Uuid::new_v4()));
    info!("compiling {} -> {}", source.display(), binary.display());
    let output = Command::new(&config.cc_path)
        .arg(source)
        .arg("-o")
        .arg(&binary)
        .args([
            "-g",
            "-O0",
            "-Wall",
            "-Wextra",
            "-Werror",
            "-ftrivial-auto-var-init=zero",
        ])
        .output()
        .await?;
    if !output.status.success() {
        return Err(AppError::CompilationFailed(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(binary)
}
