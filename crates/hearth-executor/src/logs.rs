//! Log retrieval and streaming.
//!
//! `getLogs` reads journald first, falling back to a tail of configured log
//! files capped at 5 MiB by seeking from the end. `startLogStream` follows a
//! `journalctl -f`/`tail -F`-equivalent child process, delivering each line
//! to a callback until `stopLogStream` sends it SIGTERM.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use async_process::{Command, Stdio};
use futures_lite::io::{AsyncBufReadExt, BufReader};
use futures_lite::StreamExt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Cap on bytes read from a fallback log file.2.
pub const MAX_TAIL_BYTES: u64 = 5 * 1024 * 1024;

/// Where `getLogs` should look, derived from a manifest's `LoggingSpec`.
#[derive(Debug, Clone, Default)]
pub struct LogSources {
    /// journald unit to query first, if any.
    pub journal_unit: Option<String>,
    /// Fallback file paths to tail when journald has nothing.
    pub file_paths: Vec<String>,
}

/// Reads the most recent log lines for an app, journald first.
pub struct LogTail;

impl LogTail {
    /// Fetch up to `lines` lines, journald first then file fallback.
    pub async fn fetch(sources: &LogSources, lines: usize) -> Result<Vec<String>> {
        if let Some(unit) = &sources.journal_unit {
            if let Ok(out) = Self::from_journald(unit, lines).await {
                if !out.is_empty() {
                    return Ok(out);
                }
            }
        }
        for path in &sources.file_paths {
            match Self::from_file(Path::new(path), lines) {
                Ok(out) if !out.is_empty() => return Ok(out),
                _ => continue,
            }
        }
        Ok(Vec::new())
    }

    async fn from_journald(unit: &str, lines: usize) -> Result<Vec<String>> {
        let output = Command::new("journalctl")
            .arg("-u")
            .arg(unit)
            .arg("-n")
            .arg(lines.to_string())
            .arg("--no-pager")
            .arg("-o")
            .arg("cat")
            .output()
            .await
            .map_err(Error::Io)?;
        if !output.status.success() {
            return Err(Error::CommandFailed(format!("journalctl exited with {:?}", output.status.code())));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().map(str::to_string).collect())
    }

    /// Read up to `lines` lines from the tail of `path`, never reading more
    /// than [`MAX_TAIL_BYTES`] from the end of the file.
    fn from_file(path: &Path, lines: usize) -> Result<Vec<String>> {
        let mut file = File::open(path).map_err(Error::Io)?;
        let len = file.metadata().map_err(Error::Io)?.len();
        let start = len.saturating_sub(MAX_TAIL_BYTES);
        file.seek(SeekFrom::Start(start)).map_err(Error::Io)?;
        let mut buf = String::new();
        file.read_to_string(&mut buf).map_err(Error::Io)?;
        let all: Vec<&str> = buf.lines().collect();
        let tail = if all.len() > lines { &all[all.len() - lines..] } else { &all[..] };
        Ok(tail.iter().map(|s| s.to_string()).collect())
    }
}

/// A single streamed log line, or the stream's terminal state.
#[derive(Debug, Clone)]
pub enum FollowEvent {
    /// One line of output.
    Line(String),
    /// The underlying process exited; the stream is done.
    Ended,
}

/// Handle to a running log-follow process, keyed by `streamId`.
pub struct LogFollowHandle {
    child: async_process::Child,
}

impl LogFollowHandle {
    /// Send SIGTERM to the follower process.2's stop contract.
    pub async fn stop(mut self) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;
            let pid = Pid::from_raw(self.child.id() as i32);
            let _ = signal::kill(pid, Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }
        let _ = self.child.status().await;
        Ok(())
    }
}

/// Tracks the at-most-one-active-stream-per-id invariant.
/// The actual child process lives in the [`LogFollowHandle`] returned to the
/// caller; this registry only guards against starting a second stream under
/// an id that is already in flight.
#[derive(Default)]
pub struct LogFollower {
    active: HashSet<Uuid>,
}

impl LogFollower {
    /// Create an empty follower registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start following a unit's journal (or a file, via `tail -F`), invoking
    /// `on_line` for each line read. Returns a handle the caller stores under
    /// `stream_id` and later passes to `stop`.
    pub async fn start(
        &mut self,
        stream_id: Uuid,
        sources: &LogSources,
        mut on_line: impl FnMut(String) + Send + 'static,
    ) -> Result<LogFollowHandle> {
        if self.active.contains(&stream_id) {
            return Err(Error::CommandFailed(format!("stream {stream_id} already active")));
        }

        let mut command = if let Some(unit) = &sources.journal_unit {
            let mut cmd = Command::new("journalctl");
            cmd.arg("-u").arg(unit).arg("-f").arg("-n").arg("0").arg("-o").arg("cat");
            cmd
        } else if let Some(path) = sources.file_paths.first() {
            let mut cmd = Command::new("tail");
            cmd.arg("-F").arg("-n").arg("0").arg(path);
            cmd
        } else {
            return Err(Error::CommandFailed("no log source configured".into()));
        };
        command.stdout(Stdio::piped());
        command.stderr(Stdio::null());

        let mut child = command.spawn().map_err(Error::Io)?;
        let stdout = child.stdout.take().ok_or_else(|| Error::CommandFailed("no stdout on follower".into()))?;

        smol::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(Ok(line)) = lines.next().await {
                on_line(line);
            }
        })
        .detach();

        self.active.insert(stream_id);
        Ok(LogFollowHandle { child })
    }

    /// Forget a stream id, allowing a new stream with the same id to start.
    /// Call this once the handle returned by `start` has been stopped.
    pub fn forget(&mut self, stream_id: Uuid) {
        self.active.remove(&stream_id);
    }

    /// Whether a stream id currently has an active follower.
    pub fn is_active(&self, stream_id: Uuid) -> bool {
        self.active.contains(&stream_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn tails_a_file_respecting_line_count() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 0..10 {
            writeln!(file, "line {i}").unwrap();
        }
        let lines = LogTail::from_file(file.path(), 3).unwrap();
        assert_eq!(lines, vec!["line 7", "line 8", "line 9"]);
    }

    #[test]
    fn caps_read_at_five_mebibytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let chunk = "x".repeat(1024);
        for _ in 0..(6 * 1024) {
            writeln!(file, "{chunk}").unwrap();
        }
        let lines = LogTail::from_file(file.path(), 5).unwrap();
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn follower_registry_tracks_active_stream_ids() {
        let mut follower = LogFollower::new();
        let id = Uuid::new_v4();
        assert!(!follower.is_active(id));
        follower.active.insert(id);
        assert!(follower.is_active(id));
        follower.forget(id);
        assert!(!follower.is_active(id));
    }
}
