//! Spawns a test command, captures its merged output and waits for it under
//! a [`Deadline`].

use crate::error::SpawnCause;
use crate::timeout::{self, Deadline, WaitOutcome};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Everything needed to start one test command.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub program: &'a Path,
    pub args: &'a [OsString],
    /// Overlay applied on top of the inherited environment.
    pub env: &'a BTreeMap<String, String>,
    pub working_dir: &'a Path,
}

/// What happened to the process, before any classification.
#[derive(Debug)]
pub enum RawOutcome {
    Exited { status: ExitStatus, output: Vec<u8> },
    TimedOut { timeout_seconds: u64 },
    SpawnFailed(SpawnCause),
}

/// Run `invocation` to completion or until `deadline` expires.
///
/// stdout and stderr share one anonymous temp file rather than a pipe. The
/// call returns as soon as the direct child exits, even when a detached
/// descendant still holds the output descriptor open.
pub fn run(invocation: &Invocation<'_>, deadline: &Deadline) -> RawOutcome {
    let program_name = invocation.program.display().to_string();

    let mut capture = match open_capture() {
        Ok(capture) => capture,
        Err(source) => return RawOutcome::SpawnFailed(SpawnCause::Capture { source }),
    };
    let (stdout, stderr) = match (capture.try_clone(), capture.try_clone()) {
        (Ok(stdout), Ok(stderr)) => (stdout, stderr),
        (Err(source), _) | (_, Err(source)) => {
            return RawOutcome::SpawnFailed(SpawnCause::Capture { source })
        }
    };

    let mut command = Command::new(invocation.program);
    command
        .args(invocation.args)
        .envs(invocation.env)
        .current_dir(invocation.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    new_process_group(&mut command);

    debug!(
        command = %truncate(&command_line_string(&command), 1024),
        working_dir = %invocation.working_dir.display(),
        "spawning test command"
    );

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            return RawOutcome::SpawnFailed(SpawnCause::from_spawn(invocation.program, err))
        }
    };
    // Release the parent's copies of the capture descriptors.
    drop(command);

    let started = Instant::now();
    match timeout::wait_with_deadline(&mut child, deadline) {
        Ok(WaitOutcome::Exited(status)) => {
            debug!(
                pid = child.id(),
                %status,
                elapsed = %humantime::format_duration(round_to_millis(started.elapsed())),
                "test command exited"
            );
            match read_capture(&mut capture) {
                Ok(output) => RawOutcome::Exited { status, output },
                Err(source) => RawOutcome::SpawnFailed(SpawnCause::Capture { source }),
            }
        }
        Ok(WaitOutcome::Expired) => {
            warn!(
                pid = child.id(),
                timeout_secs = deadline.timeout_seconds(),
                "test command exceeded its deadline, terminating process group"
            );
            if let Err(err) = timeout::terminate_group(&mut child, deadline.grace()) {
                warn!(pid = child.id(), error = %err, "failed to reap timed out test command");
            }
            RawOutcome::TimedOut {
                timeout_seconds: deadline.timeout_seconds(),
            }
        }
        Err(source) => {
            if let Err(err) = timeout::terminate_group(&mut child, deadline.grace()) {
                warn!(pid = child.id(), error = %err, "failed to reap test command");
            }
            RawOutcome::SpawnFailed(SpawnCause::Wait {
                program: program_name,
                source,
            })
        }
    }
}

fn open_capture() -> io::Result<File> {
    tempfile::tempfile()
}

fn read_capture(capture: &mut File) -> io::Result<Vec<u8>> {
    let mut output = Vec::new();
    capture.seek(SeekFrom::Start(0))?;
    capture.read_to_end(&mut output)?;
    Ok(output)
}

#[cfg(unix)]
fn new_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn new_process_group(_command: &mut Command) {}

fn round_to_millis(elapsed: Duration) -> Duration {
    Duration::from_millis(elapsed.as_millis() as u64)
}

/// Cut `text` to at most `limit` bytes on a char boundary, marking the cut.
fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let end = (0..=limit)
        .rev()
        .find(|idx| text.is_char_boundary(*idx))
        .unwrap_or(0);
    format!("{}… (truncated)", &text[..end])
}

/// Single-quote `word` when a POSIX shell would otherwise split or expand it.
fn quote_word(word: &str) -> Cow<'_, str> {
    let plain = !word.is_empty()
        && word
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./=:,@%+".contains(&b));
    if plain {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
    }
}

/// Render the program and its arguments as one copy-pasteable shell line.
fn shell_join<'a>(words: impl IntoIterator<Item = Cow<'a, str>>) -> String {
    words
        .into_iter()
        .map(|word| quote_word(&word).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn command_line_string(cmd: &Command) -> String {
    let words = std::iter::once(cmd.get_program()).chain(cmd.get_args());
    shell_join(words.map(|word| word.to_string_lossy()))
}
