pub mod commands;
pub mod output;

use std::ffi::OsString;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::pty::Pty;
use commands::MiCommand;
use output::{ResultClass, ResultRecord, process_output};

/// A live MI session: the debugger subprocess, the pty its target is wired
/// to, and the reader task demultiplexing its output.
///
/// Every command entry point takes `&mut self`, so at most one command can
/// await its reply at a time; MI couples replies to submission order and a
/// second in-flight command would desynchronize the stream. Cancelling a
/// pending command has the same effect, which is why no timeout wraps the
/// reply await: callers cancel by closing the session.
#[allow(clippy::upper_case_acronyms)]
pub struct GDB {
    process: Child,
    stdin: ChildStdin,
    result_output: mpsc::Receiver<AppResult<ResultRecord>>,
    log_output: Option<mpsc::UnboundedReceiver<String>>,
    target_output: Option<mpsc::Receiver<Vec<u8>>>,
    #[allow(dead_code)] // held for the descriptors; closed on drop
    pty: Pty,
    is_running: Arc<AtomicBool>,
    current_command_token: AtomicU64,
    exit_timeout: Duration,
}

/// A builder struct for configuring and launching GDB with various command
/// line options before spawning the debugger process.
pub struct GDBBuilder {
    /// Path to the GDB executable
    pub gdb_path: PathBuf,
    /// Do not read ~/.gdbinit file (--nh)
    pub opt_nh: bool,
    /// Do not read any .gdbinit files in any directory (--nx)
    pub opt_nx: bool,
    /// Do not print version number on startup (--quiet)
    pub opt_quiet: bool,
    /// Arguments to be passed to the inferior program (--args)
    pub opt_args: Vec<OsString>,
    /// The executable file to debug
    pub opt_program: Option<PathBuf>,
    /// How long `close` waits for GDB to exit before killing it
    pub exit_timeout: Duration,
}

impl GDBBuilder {
    pub fn new(gdb: PathBuf) -> Self {
        GDBBuilder {
            gdb_path: gdb,
            opt_nh: false,
            opt_nx: false,
            opt_quiet: false,
            opt_args: Vec::new(),
            opt_program: None,
            exit_timeout: Duration::from_secs(10),
        }
    }

    /// Allocate the pty, spawn `gdb --interpreter=mi4 … --tty=<slave>` and
    /// start the reader tasks.
    pub fn try_spawn(self) -> AppResult<GDB> {
        let pty = Pty::open()?;

        let mut gdb_args = Vec::<OsString>::new();
        if self.opt_nh {
            gdb_args.push("--nh".into());
        }
        if self.opt_nx {
            gdb_args.push("--nx".into());
        }
        if self.opt_quiet {
            gdb_args.push("--quiet".into());
        }
        gdb_args.push("--tty=".into());
        gdb_args.last_mut().unwrap().push(pty.slave_name());
        if !self.opt_args.is_empty() {
            gdb_args.push("--args".into());
            gdb_args.push(
                self.opt_program
                    .ok_or(AppError::InvalidArgument(
                        "Program path is required if --args is provided".to_string(),
                    ))?
                    .into_os_string(),
            );
            for arg in self.opt_args {
                gdb_args.push(arg);
            }
        } else if let Some(program) = self.opt_program {
            gdb_args.push(program.into());
        }

        let mut command = Command::new(self.gdb_path.clone());
        command.arg("--interpreter=mi4").args(gdb_args);

        debug!("Starting GDB process with command: {:?}", command);

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AppError::GDBError(format!("Failed to start GDB process: {}", e)))?;

        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();
        let is_running = Arc::new(AtomicBool::new(false));
        let (result_input, result_output) = mpsc::channel(100);
        let (log_input, log_output) = mpsc::unbounded_channel();
        tokio::spawn(process_output(
            stdout,
            result_input,
            log_input,
            is_running.clone(),
        ));
        let target_output = pty.spawn_reader()?;

        Ok(GDB {
            process: child,
            stdin,
            result_output,
            log_output: Some(log_output),
            target_output: Some(target_output),
            pty,
            is_running,
            current_command_token: AtomicU64::new(0),
            exit_timeout: self.exit_timeout,
        })
    }
}

impl GDB {
    /// Whether the target is currently executing (between a `^running`
    /// result and the matching `*stopped` notification).
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    fn new_token(&mut self) -> u64 {
        self.current_command_token.fetch_add(1, Ordering::SeqCst)
    }

    /// Submit one MI command and await its result record.
    pub async fn execute<C: std::borrow::Borrow<MiCommand>>(
        &mut self,
        command: C,
    ) -> AppResult<ResultRecord> {
        let command_token = self.new_token();
        command
            .borrow()
            .write_interpreter_string(&mut self.stdin, command_token)
            .await?;
        self.wait_result(Some(command_token)).await
    }

    /// Raw passthrough: write `command\n` and await the next result record.
    ///
    /// MI commands (leading `-`) are token-prefixed and checked like
    /// `execute`; anything else is written verbatim and matched against the
    /// next token-less result.
    pub async fn run_command(&mut self, command: &str) -> AppResult<(ResultClass, Value)> {
        let command = command.trim_end();
        let token = command.starts_with('-').then(|| self.new_token());
        let mut line = String::new();
        if let Some(token) = token {
            line.push_str(&token.to_string());
        }
        line.push_str(command);
        line.push('\n');
        info!("Writing GDB command: {}", line.trim_end());
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let record = self.wait_result(token).await?;
        Ok((record.class, record.results))
    }

    async fn wait_result(&mut self, token: Option<u64>) -> AppResult<ResultRecord> {
        match self.result_output.recv().await {
            Some(record) => {
                let record = record?;
                match (record.token, token) {
                    (Some(got), Some(expected)) if got == expected => Ok(record),
                    (Some(got), _) => Err(AppError::GDBError(format!(
                        "Unexpected command token: {}",
                        got
                    ))),
                    (None, Some(expected)) => Err(AppError::GDBError(format!(
                        "No command token, expecting {}",
                        expected
                    ))),
                    (None, None) => Ok(record),
                }
            }
            None => Err(AppError::GDBQuit),
        }
    }

    /// Claim the out-of-band record stream. Each record is a
    /// `"(<sigil>) <rest>"` line; the stream ends when GDB closes its MI
    /// output. Can be claimed once.
    pub fn out_of_band_messages(&mut self) -> AppResult<LogStream> {
        self.log_output
            .take()
            .map(LogStream)
            .ok_or(AppError::StreamClaimed("out-of-band"))
    }

    /// Claim the target's terminal output: raw byte chunks from the pty
    /// master, no decoding or line splitting imposed. Can be claimed once.
    pub fn target_output(&mut self) -> AppResult<TargetStream> {
        self.target_output
            .take()
            .map(TargetStream)
            .ok_or(AppError::StreamClaimed("target-output"))
    }

    /// Shut the session down: EOF on stdin (GDB treats it like
    /// `-gdb-exit`), await the process within the exit timeout (kill on
    /// expiry), then release queues and pty descriptors.
    pub async fn close(mut self) -> AppResult<()> {
        self.stdin.shutdown().await.ok();
        drop(self.stdin);
        match tokio::time::timeout(self.exit_timeout, self.process.wait()).await {
            Ok(status) => {
                debug!("GDB exited with {}", status?);
                Ok(())
            }
            Err(_) => {
                warn!("GDB exit timed out, killing the process");
                self.process.kill().await.ok();
                Err(AppError::GDBTimeout)
            }
        }
        // remaining queues and the pty pair drop with self, in that order
    }
}

/// Stream of out-of-band MI records.
pub struct LogStream(mpsc::UnboundedReceiver<String>);

impl Stream for LogStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.0.poll_recv(cx)
    }
}

/// Stream of raw byte chunks written by the target program.
pub struct TargetStream(mpsc::Receiver<Vec<u8>>);

impl Stream for TargetStream {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Vec<u8>>> {
        self.0.poll_recv(cx)
    }
}
