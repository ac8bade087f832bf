//! Per-stage descriptor table
//!
//! Redirections apply left to right to a table of three descriptors, so
//! `> f 2>&1` sends both streams to `f` while `2>&1 > f` leaves stderr on the
//! original stdout. A file target becomes a pipe whose reading end is drained
//! into the filesystem while the stage runs.

use std::sync::Arc;

use crate::ast::{RedirectMode, RedirectSource, RedirectTarget, Redirection};
use crate::process::{pipe, InputStream, OutputStream};
use crate::vfs::{resolve_path, FileSystem, WriteMode};

use super::{ExecContext, Interpreter};

const DEV_NULL: &str = "/dev/null";

/// Appends everything read from a stage stream to one file.
pub(crate) struct FileSink {
    path: String,
    input: InputStream,
}

impl FileSink {
    pub(crate) async fn drain(mut self, fs: Arc<dyn FileSystem>) {
        while let Some(chunk) = self.input.read_chunk().await {
            if let Err(err) = fs.write_file(&self.path, &chunk, WriteMode::Append).await {
                tracing::warn!(path = %self.path, error = %err, "redirect write failed");
                self.input.close();
                break;
            }
        }
    }
}

pub(crate) struct Descriptors {
    pub stdin: InputStream,
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    pub sinks: Vec<FileSink>,
}

impl Descriptors {
    pub(crate) fn new(stdin: InputStream, stdout: OutputStream, stderr: OutputStream) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
            sinks: Vec::new(),
        }
    }

    fn output(&self, fd: u8) -> Option<OutputStream> {
        match fd {
            1 => Some(self.stdout.clone()),
            2 => Some(self.stderr.clone()),
            _ => None,
        }
    }

    fn set_output(&mut self, source: RedirectSource, stream: OutputStream) {
        match source {
            RedirectSource::Stdout | RedirectSource::Stdin => self.stdout = stream,
            RedirectSource::Stderr => self.stderr = stream,
            RedirectSource::Both => {
                self.stdout = stream.clone();
                self.stderr = stream;
            }
        }
    }

    /// Run every file drain to completion.
    pub(crate) async fn drain_sinks(sinks: Vec<FileSink>, fs: &Arc<dyn FileSystem>) {
        futures::future::join_all(sinks.into_iter().map(|sink| sink.drain(fs.clone()))).await;
    }
}

impl Interpreter {
    /// Apply `redirections` for a stage whose working directory is `cwd`.
    /// The error is the diagnostic line for stderr.
    pub(crate) async fn apply_redirections(
        &self,
        redirections: &[Redirection],
        cwd: &str,
        mut fds: Descriptors,
        ctx: &ExecContext,
    ) -> Result<Descriptors, String> {
        for redirection in redirections {
            let word = match &redirection.target {
                RedirectTarget::Fd(fd) => {
                    let stream = fds
                        .output(*fd)
                        .ok_or_else(|| format!("vsh: {fd}: bad file descriptor"))?;
                    tracing::debug!(source = ?redirection.source, fd, "duplicating descriptor");
                    fds.set_output(redirection.source, stream);
                    continue;
                }
                RedirectTarget::Path(word) => word,
            };

            let targets = self
                .expand_words(std::slice::from_ref(word), ctx)
                .await
                .map_err(|err| format!("vsh: {err}"))?;
            let target = match targets.as_slice() {
                [target] if !target.is_empty() => target.clone(),
                _ => return Err(format!("vsh: {word}: ambiguous redirect")),
            };
            let path = resolve_path(cwd, &target);
            tracing::debug!(source = ?redirection.source, mode = ?redirection.mode, %path, "redirect");

            match redirection.mode {
                RedirectMode::Read => {
                    fds.stdin = if path == DEV_NULL {
                        InputStream::empty()
                    } else {
                        let data = self
                            .fs
                            .read_file(&path)
                            .await
                            .map_err(|err| format!("vsh: {target}: {err}"))?;
                        InputStream::from_bytes(data)
                    };
                }
                RedirectMode::Write | RedirectMode::Append | RedirectMode::Dup => {
                    if path == DEV_NULL {
                        fds.set_output(redirection.source, OutputStream::null());
                        continue;
                    }
                    let mode = if redirection.mode == RedirectMode::Append {
                        WriteMode::Append
                    } else {
                        WriteMode::Truncate
                    };
                    // Create or truncate now; the drain appends afterwards
                    self.fs
                        .write_file(&path, b"", mode)
                        .await
                        .map_err(|err| format!("vsh: {target}: {err}"))?;
                    let (stream, input) = pipe();
                    fds.sinks.push(FileSink { path, input });
                    fds.set_output(redirection.source, stream);
                }
            }
        }
        Ok(fds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dup_copies_current_target() {
        let (out, mut out_rx) = pipe();
        let (err, mut err_rx) = pipe();
        let mut fds = Descriptors::new(InputStream::empty(), out, err);

        let stream = fds.output(1).unwrap();
        fds.set_output(RedirectSource::Stderr, stream);
        fds.stderr.write_str("to stdout").await.unwrap();
        drop(fds);

        assert_eq!(out_rx.read_to_string().await, "to stdout");
        assert_eq!(err_rx.read_to_string().await, "");
    }

    #[test]
    fn test_unknown_descriptor() {
        let fds = Descriptors::new(InputStream::empty(), OutputStream::null(), OutputStream::null());
        assert!(fds.output(5).is_none());
    }
}
