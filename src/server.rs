//! Server construction and listener lifecycle.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;
use crate::events::{GitOp, OpKind, Registry, TagOp};
use crate::git_http::routes::{build_router, AppState};
use crate::repos::RepoStore;

/// Behavior knobs for a [`GitServer`].
#[derive(Clone, Default)]
pub struct ServerOptions {
    /// Create missing repositories (`git init --bare`) on first access.
    pub auto_create: bool,
    /// Credential check invoked for every advertisement and RPC; `None`
    /// accepts everything without reading credentials.
    pub authenticator: Option<Authenticator>,
}

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

/// A smart-HTTP Git server rooted at a directory of bare repositories.
///
/// Listeners registered through the `on_*` methods persist across requests
/// and gate operations via [`GitOp::accept`] / [`GitOp::reject`].
pub struct GitServer {
    repos: RepoStore,
    options: ServerOptions,
    registry: Arc<Registry>,
    running: Mutex<Option<Running>>,
}

impl GitServer {
    pub fn new(root: impl Into<PathBuf>, options: ServerOptions) -> Self {
        GitServer {
            repos: RepoStore::new(root.into()),
            options,
            registry: Arc::new(Registry::default()),
            running: Mutex::new(None),
        }
    }

    /// Fired on every advertisement, before the fetch/push event.
    pub fn on_info(&self, listener: impl Fn(GitOp) + Send + Sync + 'static) {
        self.registry.subscribe_info(Arc::new(listener));
    }

    pub fn on_fetch(&self, listener: impl Fn(GitOp) + Send + Sync + 'static) {
        self.registry.subscribe_op(OpKind::Fetch, Arc::new(listener));
    }

    pub fn on_push(&self, listener: impl Fn(GitOp) + Send + Sync + 'static) {
        self.registry.subscribe_op(OpKind::Push, Arc::new(listener));
    }

    pub fn on_head(&self, listener: impl Fn(GitOp) + Send + Sync + 'static) {
        self.registry.subscribe_op(OpKind::Head, Arc::new(listener));
    }

    /// Fired when a tag creation is observed mid-push; advisory only.
    pub fn on_tag(&self, listener: impl Fn(TagOp) + Send + Sync + 'static) {
        self.registry.subscribe_tag(Arc::new(listener));
    }

    /// Fired for asynchronous operational errors (git stderr output,
    /// post-header subprocess failures). Without a listener these are only
    /// logged.
    pub fn on_error(&self, listener: impl Fn(&anyhow::Error) + Send + Sync + 'static) {
        self.registry.subscribe_error(Arc::new(listener));
    }

    /// Bind and start serving. Port `0` requests an OS-assigned port;
    /// resolves once the listener is accepting connections.
    pub async fn listen(&self, port: u16) -> Result<()> {
        if self
            .running
            .lock()
            .expect("server lock poisoned")
            .is_some()
        {
            bail!("server is already listening");
        }

        let state = AppState {
            repos: self.repos.clone(),
            registry: self.registry.clone(),
            auto_create: self.options.auto_create,
            authenticator: self.options.authenticator.clone(),
        };
        let app = build_router(state);

        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("failed to bind port {port}"))?;
        let addr = listener.local_addr().context("failed to read bound address")?;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.clone().cancelled_owned())
                .into_future(),
        );

        let mut running = self.running.lock().expect("server lock poisoned");
        if running.is_some() {
            shutdown.cancel();
            bail!("server is already listening");
        }
        tracing::info!(%addr, root = %self.repos.root().display(), "git server listening");
        *running = Some(Running {
            addr,
            shutdown,
            handle,
        });
        Ok(())
    }

    /// The bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .expect("server lock poisoned")
            .as_ref()
            .map(|running| running.addr)
    }

    /// Stop accepting connections and drain in-flight requests.
    pub async fn close(&self) -> Result<()> {
        let running = self.running.lock().expect("server lock poisoned").take();
        let Some(running) = running else {
            let err = anyhow!("close called on a server that is not listening");
            self.registry.emit_error(&err);
            return Err(err);
        };

        running.shutdown.cancel();
        running
            .handle
            .await
            .context("server task panicked")?
            .context("server shutdown failed")?;
        tracing::info!("git server closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn listen_twice_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let server = GitServer::new(dir.path(), ServerOptions::default());
        server.listen(0).await.unwrap();
        assert!(server.listen(0).await.is_err());
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_without_listen_reports_through_error_event() {
        let dir = tempfile::tempdir().unwrap();
        let server = GitServer::new(dir.path(), ServerOptions::default());
        let seen = Arc::new(AtomicBool::new(false));
        let flag = seen.clone();
        server.on_error(move |_err| flag.store(true, Ordering::SeqCst));

        assert!(server.close().await.is_err());
        assert!(seen.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn listen_assigns_an_ephemeral_port() {
        let dir = tempfile::tempdir().unwrap();
        let server = GitServer::new(dir.path(), ServerOptions::default());
        assert!(server.local_addr().is_none());
        server.listen(0).await.unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        server.close().await.unwrap();
    }
}
