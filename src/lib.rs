//! Smart HTTP Git server.
//!
//! Serves bare repositories to stock `git` clients by bridging each request
//! to a `git upload-pack` / `git receive-pack` subprocess, with an
//! application-facing acceptance gate in front of every operation.

pub mod auth;
pub mod events;
pub mod git_http;
pub mod repos;
pub mod server;

pub use auth::{AuthRequest, Authenticator};
pub use events::{GitOp, OpKind, TagOp};
pub use server::{GitServer, ServerOptions};
