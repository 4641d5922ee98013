//! Subprocess spawning and the streaming bridge between HTTP bodies and the
//! child's stdio.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use axum::body::{Body, BodyDataStream};
use bytes::Bytes;
use futures::{stream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::io::ReaderStream;

use super::service::GitService;
use crate::events::Registry;

/// Per-chunk observer of the request body on its way into the child.
pub(crate) type InputTap = Box<dyn FnMut(&[u8]) + Send>;

/// Spawn `git <service> --stateless-rpc [--advertise-refs] <repo>`.
pub(crate) fn spawn_git(service: GitService, repo_path: &Path, advertise: bool) -> Result<Child> {
    let mut cmd = Command::new("git");
    cmd.arg(service.name());
    cmd.arg("--stateless-rpc");
    if advertise {
        cmd.arg("--advertise-refs");
    }
    cmd.arg(repo_path);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    cmd.spawn()
        .with_context(|| format!("failed to spawn git {}", service.name()))
}

/// Wire a spawned child into the HTTP exchange.
///
/// The optional request stream is copied into the child's stdin chunk by
/// chunk (each chunk passing through `tap` first) and stdin is closed at
/// EOF; stderr drains into the error event. The child's stdout becomes the
/// returned response body, preceded by `prefix` when given.
///
/// The first stdout read happens here, before the response is committed: a
/// child that dies without producing output surfaces as an `Err` (a plain
/// 500) instead of a broken 200 stream. Exits after that point end the body
/// and are reported through the error event.
pub(crate) async fn bridge(
    mut child: Child,
    input: Option<BodyDataStream>,
    tap: Option<InputTap>,
    registry: Arc<Registry>,
    prefix: Option<Bytes>,
) -> Result<Body> {
    let mut stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .context("git child has no stdout pipe")?;

    match input {
        Some(mut body) => {
            let mut stdin = stdin.take().context("git child has no stdin pipe")?;
            let mut tap = tap;
            let registry = registry.clone();
            tokio::spawn(async move {
                while let Some(next) = body.next().await {
                    let chunk = match next {
                        Ok(chunk) => chunk,
                        Err(err) => {
                            registry.emit_error(&anyhow!("request body failed: {err}"));
                            return;
                        }
                    };
                    if let Some(tap) = tap.as_mut() {
                        tap(&chunk);
                    }
                    if let Err(err) = stdin.write_all(&chunk).await {
                        registry.emit_error(&anyhow!("git stdin write failed: {err}"));
                        return;
                    }
                }
                let _ = stdin.shutdown().await;
            });
        }
        // No request body to forward; close stdin so git sees EOF.
        None => drop(stdin),
    }

    if let Some(stderr) = child.stderr.take() {
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(line = %line, "git stderr");
                registry.emit_error(&anyhow!("git: {line}"));
            }
        });
    }

    let mut stdout = ReaderStream::new(stdout);
    let first = match stdout.next().await {
        Some(Ok(chunk)) => Some(chunk),
        Some(Err(err)) => bail!("failed to read git stdout: {err}"),
        None => None,
    };

    let Some(first) = first else {
        // No output at all: the exit status decides between an empty
        // success body and a pre-header failure.
        let status = child.wait().await.context("failed to wait for git")?;
        if !status.success() {
            bail!("git exited with {status} before producing output");
        }
        return Ok(match prefix {
            Some(prefix) => Body::from(prefix),
            None => Body::empty(),
        });
    };

    // Headers are about to be committed; from here on the child is reaped in
    // the background and late failures go to the error event.
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => {}
            Ok(status) => registry.emit_error(&anyhow!("git exited with {status}")),
            Err(err) => registry.emit_error(&anyhow!("failed to reap git: {err}")),
        }
    });

    let head = prefix
        .into_iter()
        .chain(std::iter::once(first))
        .map(Ok::<Bytes, std::io::Error>);
    Ok(Body::from_stream(stream::iter(head).chain(stdout)))
}
