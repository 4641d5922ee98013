//! HTTP Basic authentication delegation.
//!
//! The server never judges credentials itself: it decodes the
//! `Authorization` header and hands the result to a caller-supplied
//! authenticator. Without one configured, every request passes and the
//! header is not consulted at all.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::Engine;
use futures::future::BoxFuture;

use crate::events::OpKind;

/// Credentials offered by the client, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// What a configured authenticator is asked to judge.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub kind: OpKind,
    pub repo: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Caller-supplied credential check; an `Err` fails the request with 401.
pub type Authenticator = Arc<dyn Fn(AuthRequest) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Decode an `Authorization` header into [`Credentials`].
///
/// An absent header yields empty credentials (the authenticator still runs);
/// a present header must be exactly `Basic <base64(user:pass)>`.
pub(crate) fn parse_basic(header: Option<&str>) -> Result<Credentials> {
    let Some(value) = header else {
        return Ok(Credentials::default());
    };

    let Some((scheme, encoded)) = value.split_once(' ') else {
        bail!("malformed Authorization header");
    };
    if scheme != "Basic" {
        bail!("unsupported Authorization scheme {scheme:?}");
    }
    if encoded.is_empty() || encoded.contains(' ') {
        bail!("malformed Authorization header");
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .context("invalid base64 in Authorization header")?;
    let text = String::from_utf8(decoded).context("credentials are not valid UTF-8")?;

    Ok(match text.split_once(':') {
        Some((user, pass)) => Credentials {
            username: Some(user.to_string()),
            password: Some(pass.to_string()),
        },
        None => Credentials {
            username: Some(text),
            password: None,
        },
    })
}
