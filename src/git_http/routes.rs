//! Request routing and the advertisement / RPC / HEAD handlers.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use metrics::{counter, histogram};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use super::pkt::service_banner;
use super::service::GitService;
use super::stream::{bridge, spawn_git, InputTap};
use super::tags::TagScanner;
use crate::auth::{parse_basic, AuthRequest, Authenticator};
use crate::events::{Decision, OpKind, Registry, TagOp};
use crate::repos::RepoStore;

#[derive(Clone)]
pub(crate) struct AppState {
    pub repos: RepoStore,
    pub registry: Arc<Registry>,
    pub auto_create: bool,
    pub authenticator: Option<Authenticator>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServiceQuery {
    pub service: Option<String>,
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/{*path}", any(dispatch))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    InfoRefs,
    Rpc(GitService),
    Head,
}

/// Split a request path into repository name and action. The repository name
/// may itself contain `/`.
fn split_route(path: &str) -> Option<(&str, Action)> {
    let candidates = [
        ("/info/refs", Action::InfoRefs),
        ("/git-upload-pack", Action::Rpc(GitService::UploadPack)),
        ("/git-receive-pack", Action::Rpc(GitService::ReceivePack)),
        ("/HEAD", Action::Head),
    ];
    for (suffix, action) in candidates {
        if let Some(repo) = path.strip_suffix(suffix) {
            if !repo.is_empty() {
                return Some((repo, action));
            }
        }
    }
    None
}

async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    Query(query): Query<ServiceQuery>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let Some((repo, action)) = split_route(&path) else {
        return not_found().await;
    };
    let repo = repo.to_string();

    let read_method = method == Method::GET || method == Method::HEAD;
    match action {
        Action::InfoRefs if read_method => advertise(state, repo, query, headers).await,
        Action::Head if read_method => head_ref(state, repo).await,
        Action::Rpc(service) if method == Method::POST => {
            rpc(state, repo, service, headers, body).await
        }
        _ => not_found().await,
    }
}

/// `GET /<repo>/info/refs?service=git-<svc>`: authenticate, ensure the
/// repository, run the gate, then stream the banner plus
/// `git <svc> --stateless-rpc --advertise-refs`.
async fn advertise(
    state: AppState,
    repo: String,
    query: ServiceQuery,
    headers: HeaderMap,
) -> Response {
    let start = Instant::now();

    let service = match query.service.as_deref() {
        None => return text(StatusCode::BAD_REQUEST, "service parameter required"),
        Some(value) => match GitService::from_query(value) {
            Some(service) => service,
            None => return text(StatusCode::BAD_REQUEST, "Invalid service"),
        },
    };
    let kind = service.op_kind();

    if let Err(response) = authenticate(&state, kind, &repo, &headers).await {
        return response;
    }

    let repo_path = match state.repos.resolve(&repo) {
        Ok(path) => path,
        Err(err) => {
            tracing::debug!(repo = %repo, "rejected repository name: {err}");
            return not_found().await;
        }
    };
    if !state.repos.exists(&repo_path).await {
        if !state.auto_create {
            return text(StatusCode::NOT_FOUND, "Repository not found");
        }
        if let Err(err) = state.repos.create(&repo_path).await {
            return text(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"));
        }
    }

    if let Decision::Reject(message) = state.registry.gate(&repo, kind, true).await {
        return text(StatusCode::FORBIDDEN, message);
    }

    let child = match spawn_git(service, &repo_path, true) {
        Ok(child) => child,
        Err(err) => return text(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")),
    };
    let banner = Bytes::from(service_banner(service));
    let response = match bridge(child, None, None, state.registry.clone(), Some(banner)).await {
        Ok(body) => git_response(service.advertisement_content_type(), body),
        Err(err) => text(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")),
    };

    counter!("git_http.info_refs", "service" => service.name()).increment(1);
    histogram!("git_http.info_refs_ms").record(start.elapsed().as_millis() as f64);
    response
}

/// `POST /<repo>/git-<svc>-pack`: the stateless RPC half. The request body
/// stays unpolled until the gate accepts, so no protocol bytes are consumed
/// early; on accept it streams into the subprocess with a tag scanner tapped
/// onto pushes.
async fn rpc(
    state: AppState,
    repo: String,
    service: GitService,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let start = Instant::now();
    let kind = service.op_kind();

    if let Err(response) = authenticate(&state, kind, &repo, &headers).await {
        return response;
    }

    let repo_path = match state.repos.resolve(&repo) {
        Ok(path) => path,
        Err(err) => {
            tracing::debug!(repo = %repo, "rejected repository name: {err}");
            return not_found().await;
        }
    };
    // The advertisement already had its chance to auto-create.
    if !state.repos.exists(&repo_path).await {
        return text(StatusCode::NOT_FOUND, "Repository not found");
    }

    let input = body.into_data_stream();

    if let Decision::Reject(message) = state.registry.gate(&repo, kind, false).await {
        // Deliberately 500, not 403: the client surfaces the body as a
        // post-handshake error message.
        return text(StatusCode::INTERNAL_SERVER_ERROR, message);
    }

    let child = match spawn_git(service, &repo_path, false) {
        Ok(child) => child,
        Err(err) => return text(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")),
    };

    let tap: Option<InputTap> = match kind {
        OpKind::Push => {
            let mut scanner = TagScanner::new();
            let registry = state.registry.clone();
            let repo = repo.clone();
            Some(Box::new(move |chunk: &[u8]| {
                for tag in scanner.scan(chunk) {
                    registry.emit_tag(TagOp::new(repo.clone(), tag.new, tag.name));
                }
            }))
        }
        _ => None,
    };

    let response = match bridge(child, Some(input), tap, state.registry.clone(), None).await {
        Ok(body) => git_response(service.result_content_type(), body),
        Err(err) => text(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")),
    };

    counter!("git_http.rpc", "service" => service.name()).increment(1);
    histogram!("git_http.rpc_ms", "service" => service.name())
        .record(start.elapsed().as_millis() as f64);
    response
}

/// `GET /<repo>/HEAD`: existence check and the `head` gate; the body is
/// intentionally empty.
async fn head_ref(state: AppState, repo: String) -> Response {
    let start = Instant::now();

    let repo_path = match state.repos.resolve(&repo) {
        Ok(path) => path,
        Err(err) => {
            tracing::debug!(repo = %repo, "rejected repository name: {err}");
            return not_found().await;
        }
    };
    if !state.repos.exists(&repo_path).await {
        if !state.auto_create {
            return text(StatusCode::NOT_FOUND, "Repository not found");
        }
        if let Err(err) = state.repos.create(&repo_path).await {
            return text(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"));
        }
    }

    let response = match state.registry.gate(&repo, OpKind::Head, false).await {
        Decision::Reject(message) => text(StatusCode::FORBIDDEN, message),
        Decision::Accept => text(StatusCode::OK, ""),
    };

    counter!("git_http.head").increment(1);
    histogram!("git_http.head_ms").record(start.elapsed().as_millis() as f64);
    response
}

/// Run the configured authenticator; `Err` carries the finished 401.
async fn authenticate(
    state: &AppState,
    kind: OpKind,
    repo: &str,
    headers: &HeaderMap,
) -> Result<(), Response> {
    let Some(authenticator) = &state.authenticator else {
        return Ok(());
    };

    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let credentials = match parse_basic(header) {
        Ok(credentials) => credentials,
        Err(err) => {
            tracing::debug!(repo = %repo, "authorization header rejected: {err}");
            return Err(unauthorized());
        }
    };

    let request = AuthRequest {
        kind,
        repo: repo.to_string(),
        username: credentials.username,
        password: credentials.password,
    };
    match authenticator(request).await {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::debug!(repo = %repo, kind = kind.as_str(), "authentication failed: {err}");
            Err(unauthorized())
        }
    }
}

async fn not_found() -> Response {
    text(StatusCode::NOT_FOUND, "Not Found")
}

fn unauthorized() -> Response {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::WWW_AUTHENTICATE, "Basic realm=\"Git Server\"")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("Authentication failed"))
        .expect("response build")
}

fn text(status: StatusCode, body: impl Into<String>) -> Response {
    with_no_cache(
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/plain"),
    )
    .body(Body::from(body.into()))
    .expect("response build")
}

fn git_response(content_type: &'static str, body: Body) -> Response {
    with_no_cache(
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type),
    )
    .body(body)
    .expect("response build")
}

fn with_no_cache(builder: axum::http::response::Builder) -> axum::http::response::Builder {
    builder
        .header(header::CACHE_CONTROL, "no-cache, max-age=0, must-revalidate")
        .header(header::EXPIRES, "Fri, 01 Jan 1980 00:00:00 GMT")
        .header(header::PRAGMA, "no-cache")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_the_four_actions() {
        assert_eq!(
            split_route("r1/info/refs"),
            Some(("r1", Action::InfoRefs))
        );
        assert_eq!(
            split_route("r1/git-upload-pack"),
            Some(("r1", Action::Rpc(GitService::UploadPack)))
        );
        assert_eq!(
            split_route("r1/git-receive-pack"),
            Some(("r1", Action::Rpc(GitService::ReceivePack)))
        );
        assert_eq!(split_route("r1/HEAD"), Some(("r1", Action::Head)));
    }

    #[test]
    fn repository_names_may_contain_slashes() {
        assert_eq!(
            split_route("team/project.git/info/refs"),
            Some(("team/project.git", Action::InfoRefs))
        );
    }

    #[test]
    fn unknown_paths_do_not_route() {
        assert_eq!(split_route("info/refs"), None);
        assert_eq!(split_route("r1"), None);
        assert_eq!(split_route("r1/objects/info/packs"), None);
        assert_eq!(split_route("r1/head"), None);
    }
}
