//! External transcoder bridge.
//!
//! The container stream is fed to the child's stdin and the child's stdout
//! is forwarded to the frame stream. Cancellation kills the child; its exit
//! is never awaited past that point.

use crossbeam_channel::select;
use std::io;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;
use crate::config::{FrameSettings, TranscoderSettings};
use crate::error::PipelineError;
use crate::stream::{StreamReader, StreamWriter};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const FEEDER_GRACE: Duration = Duration::from_millis(250);

/// Program and arguments for the transcoder process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscoderCommand {
    program: String,
    args: Vec<String>,
}

impl TranscoderCommand {
    /// ffmpeg reading IVF on stdin, writing packed rgb24 frames of the given
    /// size on stdout.
    pub fn ffmpeg(frame: FrameSettings) -> Self {
        Self::with_program("ffmpeg", frame)
    }

    pub fn custom<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_settings(settings: &TranscoderSettings, frame: FrameSettings) -> Self {
        match &settings.args {
            Some(args) => Self::custom(settings.program.clone(), args.clone()),
            None => Self::with_program(settings.program.clone(), frame),
        }
    }

    fn with_program(program: impl Into<String>, frame: FrameSettings) -> Self {
        let size = format!("{}x{}", frame.width, frame.height);
        Self::custom(
            program,
            [
                "-hide_banner",
                "-loglevel",
                "error",
                "-f",
                "ivf",
                "-i",
                "pipe:0",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-s",
                size.as_str(),
                "pipe:1",
            ],
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn spawn(&self) -> io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TranscodeStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

pub struct TranscodeBridge {
    command: TranscoderCommand,
    cancel: CancellationToken,
}

impl TranscodeBridge {
    pub fn new(command: TranscoderCommand, cancel: CancellationToken) -> Self {
        Self { command, cancel }
    }

    /// Run the child until it exits or the pipeline is cancelled.
    pub fn run(
        self,
        input: StreamReader,
        mut output: StreamWriter,
    ) -> Result<TranscodeStats, PipelineError> {
        let program = self.command.program().to_string();
        // Every fatal exit raises cancellation while `input` is still held,
        // so ingestion unwinds as cancelled instead of failing its write.
        let mut child = self.command.spawn().map_err(|e| {
            self.cancel.cancel();
            output.close();
            PipelineError::Transcoder(format!("failed to start {}: {}", program, e))
        })?;
        log::info!(
            "transcoder started: {} {} (pid {})",
            program,
            self.command.args().join(" "),
            child.id()
        );

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            self.cancel.cancel();
            kill(&mut child);
            return Err(PipelineError::Transcoder(
                "child stdio was not captured".to_string(),
            ));
        };

        let feeder = spawn_feeder(input, stdin)?;
        let pump = spawn_pump(stdout, output).map_err(|e| {
            self.cancel.cancel();
            kill(&mut child);
            e
        })?;

        let (outcome, output) = self.supervise(&mut child, &program, pump);
        let outcome = outcome.and_then(|bytes_out| {
            // A feeder still blocked on input means the child quit early.
            let deadline = Instant::now() + FEEDER_GRACE;
            while !feeder.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if feeder.is_finished() {
                Ok(bytes_out)
            } else {
                Err(PipelineError::Transcoder(format!(
                    "{} exited before the end of its input",
                    program
                )))
            }
        });
        if matches!(&outcome, Err(e) if e.is_fatal()) {
            // The feeder still holds the container reader and the frame
            // writer is still open here.
            self.cancel.cancel();
        }
        drop(output);
        let bytes_out = outcome?;

        let bytes_in = match feeder.join() {
            Ok((copied, _input)) => copied?,
            Err(_) => return Err(PipelineError::Transcoder("feeder panicked".to_string())),
        };
        log::info!(
            "transcoder finished: {} bytes in, {} bytes out",
            bytes_in,
            bytes_out
        );
        Ok(TranscodeStats {
            bytes_in,
            bytes_out,
        })
    }

    /// Wait for the child and the stdout pump; returns the bytes forwarded
    /// along with the frame writer, which the caller closes.
    fn supervise(
        &self,
        child: &mut Child,
        program: &str,
        pump: JoinHandle<(io::Result<u64>, StreamWriter)>,
    ) -> (Result<u64, PipelineError>, Option<StreamWriter>) {
        let status = match self.wait(child) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let (_, output) = join_pump(pump);
                return (Err(PipelineError::Cancelled), output);
            }
            Err(e) => {
                kill(child);
                let (_, output) = join_pump(pump);
                return (Err(e), output);
            }
        };
        let (pumped, output) = join_pump(pump);
        if !status.success() {
            let error = if status_was_signal(&status) && self.cancel.is_cancelled() {
                PipelineError::Cancelled
            } else {
                PipelineError::Transcoder(format!("{} exited with {}", program, status))
            };
            return (Err(error), output);
        }
        (pumped, output)
    }

    /// `None` when the child was killed on cancellation.
    fn wait(&self, child: &mut Child) -> Result<Option<ExitStatus>, PipelineError> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            select! {
                recv(self.cancel.signal()) -> _ => {
                    log::debug!("transcoder cancelled, killing pid {}", child.id());
                    kill(child);
                    return Ok(None);
                }
                default(EXIT_POLL_INTERVAL) => {}
            }
        }
    }
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::debug!("transcoder kill: {}", e);
    }
    let _ = child.wait();
}

/// Copies the container stream into the child's stdin, then hands the
/// reader back so it outlives the copy.
fn spawn_feeder(
    mut input: StreamReader,
    mut stdin: ChildStdin,
) -> Result<JoinHandle<(io::Result<u64>, StreamReader)>, PipelineError> {
    let handle = std::thread::Builder::new()
        .name("transcode-feed".to_string())
        .spawn(move || {
            let copied = io::copy(&mut input, &mut stdin);
            drop(stdin);
            (copied, input)
        })?;
    Ok(handle)
}

/// Forwards the child's stdout into the frame stream. The writer is handed
/// back open; closing it is the caller's decision.
fn spawn_pump(
    mut stdout: ChildStdout,
    mut output: StreamWriter,
) -> Result<JoinHandle<(io::Result<u64>, StreamWriter)>, PipelineError> {
    let handle = std::thread::Builder::new()
        .name("transcode-pump".to_string())
        .spawn(move || {
            let copied = io::copy(&mut stdout, &mut output);
            (copied, output)
        })?;
    Ok(handle)
}

fn join_pump(
    handle: JoinHandle<(io::Result<u64>, StreamWriter)>,
) -> (Result<u64, PipelineError>, Option<StreamWriter>) {
    match handle.join() {
        Ok((copied, output)) => (copied.map_err(PipelineError::from), Some(output)),
        Err(_) => (
            Err(PipelineError::Transcoder("pump thread panicked".to_string())),
            None,
        ),
    }
}

#[cfg(unix)]
fn status_was_signal(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal().is_some()
}

#[cfg(not(unix))]
fn status_was_signal(_status: &ExitStatus) -> bool {
    false
}
