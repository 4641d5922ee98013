//! Acceptance gate and listener registry.
//!
//! Every Git operation is announced to registered listeners as a [`GitOp`]
//! before the subprocess is spawned. A listener may `accept()` or
//! `reject(msg)` the operation; with no listener registered the operation is
//! accepted immediately, and a listener that never decides is overridden
//! after [`ACCEPT_WAIT`].

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::oneshot;

/// How long a handler waits for a registered listener to decide before the
/// operation is accepted automatically.
pub const ACCEPT_WAIT: Duration = Duration::from_secs(1);

/// The kind of Git operation a request maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Fetch,
    Push,
    Head,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Fetch => "fetch",
            OpKind::Push => "push",
            OpKind::Head => "head",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    Accept,
    Reject(String),
}

/// Handle given to operation listeners.
///
/// Cloned freely; all clones share one underlying gate, and only the first
/// `accept`/`reject` across all of them has any effect.
#[derive(Clone)]
pub struct GitOp {
    repo: String,
    kind: OpKind,
    gate: Arc<Mutex<Option<oneshot::Sender<Decision>>>>,
}

impl GitOp {
    fn new(repo: &str, kind: OpKind) -> (Self, oneshot::Receiver<Decision>) {
        let (tx, rx) = oneshot::channel();
        let op = GitOp {
            repo: repo.to_string(),
            kind,
            gate: Arc::new(Mutex::new(Some(tx))),
        };
        (op, rx)
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// Approve the operation. A no-op after the gate has settled.
    pub fn accept(&self) {
        self.settle(Decision::Accept);
    }

    /// Deny the operation with a message the client will see. A no-op after
    /// the gate has settled.
    pub fn reject(&self, message: impl Into<String>) {
        self.settle(Decision::Reject(message.into()));
    }

    fn settle(&self, decision: Decision) {
        let tx = self.gate.lock().expect("gate lock poisoned").take();
        if let Some(tx) = tx {
            // The handler may already have timed out and moved on; in that
            // case the decision is simply dropped.
            let _ = tx.send(decision);
        }
    }
}

impl std::fmt::Debug for GitOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitOp")
            .field("repo", &self.repo)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Notification of a tag create/update observed in a push.
///
/// Advisory only: the push carrying the tag is already streaming, so
/// `accept`/`reject` here do not gate anything.
#[derive(Debug, Clone)]
pub struct TagOp {
    repo: String,
    commit: String,
    version: String,
}

impl TagOp {
    pub(crate) fn new(repo: String, commit: String, version: String) -> Self {
        TagOp {
            repo,
            commit,
            version,
        }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Object id the tag ref now points at.
    pub fn commit(&self) -> &str {
        &self.commit
    }

    /// Tag name without the `refs/tags/` prefix.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn accept(&self) {}

    pub fn reject(&self, _message: &str) {}
}

type OpListener = Arc<dyn Fn(GitOp) + Send + Sync>;
type TagListener = Arc<dyn Fn(TagOp) + Send + Sync>;
type ErrorListener = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// Listener registry shared by all requests. Registration is allowed at any
/// time, including while the server is listening.
#[derive(Default)]
pub(crate) struct Registry {
    info: RwLock<Vec<OpListener>>,
    fetch: RwLock<Vec<OpListener>>,
    push: RwLock<Vec<OpListener>>,
    head: RwLock<Vec<OpListener>>,
    tag: RwLock<Vec<TagListener>>,
    error: RwLock<Vec<ErrorListener>>,
}

impl Registry {
    pub(crate) fn subscribe_info(&self, listener: OpListener) {
        self.info.write().expect("registry lock poisoned").push(listener);
    }

    pub(crate) fn subscribe_op(&self, kind: OpKind, listener: OpListener) {
        self.op_bucket(kind)
            .write()
            .expect("registry lock poisoned")
            .push(listener);
    }

    pub(crate) fn subscribe_tag(&self, listener: TagListener) {
        self.tag.write().expect("registry lock poisoned").push(listener);
    }

    pub(crate) fn subscribe_error(&self, listener: ErrorListener) {
        self.error.write().expect("registry lock poisoned").push(listener);
    }

    fn op_bucket(&self, kind: OpKind) -> &RwLock<Vec<OpListener>> {
        match kind {
            OpKind::Fetch => &self.fetch,
            OpKind::Push => &self.push,
            OpKind::Head => &self.head,
        }
    }

    /// Run the acceptance gate for one operation.
    ///
    /// `announce` additionally fires the `info` event first (advertisement
    /// phase). Listeners are invoked inline; with none registered the
    /// operation is accepted synchronously, otherwise the first terminal
    /// transition wins, bounded by [`ACCEPT_WAIT`].
    pub(crate) async fn gate(&self, repo: &str, kind: OpKind, announce: bool) -> Decision {
        let (op, rx) = GitOp::new(repo, kind);

        // Snapshot the lists so a listener may register further listeners
        // without deadlocking the registry.
        let mut notified = false;
        if announce {
            for listener in self.snapshot(&self.info) {
                notified = true;
                listener(op.clone());
            }
        }
        for listener in self.snapshot(self.op_bucket(kind)) {
            notified = true;
            listener(op.clone());
        }

        if !notified {
            return Decision::Accept;
        }

        match tokio::time::timeout(ACCEPT_WAIT, rx).await {
            Ok(Ok(decision)) => decision,
            // Listener dropped every handle without deciding, or never
            // decided in time: the transport must not stall.
            _ => Decision::Accept,
        }
    }

    pub(crate) fn emit_tag(&self, tag: TagOp) {
        for listener in self.snapshot(&self.tag) {
            listener(tag.clone());
        }
    }

    /// Deliver an operational error to error listeners, or log it when none
    /// are registered.
    pub(crate) fn emit_error(&self, err: &anyhow::Error) {
        let listeners = self.snapshot(&self.error);
        if listeners.is_empty() {
            tracing::warn!("{err:#}");
            return;
        }
        for listener in listeners {
            listener(err);
        }
    }

    fn snapshot<T: Clone>(&self, bucket: &RwLock<Vec<T>>) -> Vec<T> {
        bucket.read().expect("registry lock poisoned").clone()
    }
}
