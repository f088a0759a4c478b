// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! HTTP surface of a repository.

Generated files are served from the repository's current snapshot, so a
response is always internally consistent even while a rebuild is running.
Archives are served straight from the directory they were indexed from, at the
location their `Filename` field advertises.

Every request is logged once its response is known. When credentials are
configured, every route requires HTTP basic authentication.
*/

use {
    axum::{
        extract::{Path, Request, State},
        http::{header, StatusCode},
        middleware::{self, Next},
        response::{IntoResponse, Response},
        routing::{get, post},
        Json, Router,
    },
    debian_repo_index::{
        repository::{release::DATE_FORMAT, RebuildReport, Repository},
        signing::ManifestSigner,
    },
    log::{info, warn},
    serde_json::{json, Value},
    std::{sync::Arc, time::Duration},
    tower_http::services::ServeDir,
};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const PGP_SIGNATURE: &str = "application/pgp-signature";
const PGP_KEYS: &str = "application/pgp-keys";
const AUTH_CHALLENGE: &str = "Basic realm=\"repository\", charset=\"UTF-8\"";

/// A username and password accepted via HTTP basic authentication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl BasicCredentials {
    pub fn new(username: impl ToString, password: impl ToString) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Whether an `Authorization` header value presents these credentials.
    pub fn accepts(&self, authorization: &str) -> bool {
        let encoded = match authorization.trim().split_once(' ') {
            Some((scheme, encoded)) if scheme.eq_ignore_ascii_case("basic") => encoded.trim(),
            _ => return false,
        };

        let decoded = match base64::decode(encoded) {
            Ok(decoded) => decoded,
            Err(_) => return false,
        };

        decoded == format!("{}:{}", self.username, self.password).as_bytes()
    }
}

/// State shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<Repository>,
    pub signer: Option<Arc<dyn ManifestSigner>>,
    pub credentials: Option<BasicCredentials>,
}

/// Construct the router serving a repository.
///
/// `pool_root` is the directory archives were indexed from. It is mounted at the
/// repository's pool prefix. Authentication, when configured, covers the pool too.
pub fn router(state: AppState, pool_root: &std::path::Path) -> Router {
    let pool_prefix = state
        .repository
        .config()
        .pool_prefix
        .trim_matches('/')
        .to_string();
    let pool = ServeDir::new(pool_root);

    let router = Router::new()
        .route("/", get(status))
        .route("/rebuild", post(rebuild))
        .route("/pubkey.gpg", get(public_key))
        .route("/dists/:suite/*path", get(distribution_file));

    // Nesting at the root is not allowed.
    let router = if pool_prefix.is_empty() {
        router.fallback_service(pool)
    } else {
        router.nest_service(&format!("/{}", pool_prefix), pool)
    };

    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_credentials,
        ))
        .layer(middleware::from_fn(access_log))
        .with_state(state)
}

async fn require_credentials(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let credentials = match &state.credentials {
        Some(credentials) => credentials,
        None => return next.run(request).await,
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| credentials.accepts(value))
        .unwrap_or(false);

    if authorized {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, AUTH_CHALLENGE)],
            "unauthorized\n",
        )
            .into_response()
    }
}

async fn access_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;
    info!("{} {} {}", method, path, response.status().as_u16());

    response
}

/// Rebuild the repository every `period`.
///
/// A failed rebuild is logged and the previous snapshot keeps being served.
pub async fn refresh_loop(repository: Arc<Repository>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;

        match repository.rebuild().await {
            Ok(report) => info!(
                "periodic rebuild indexed {} of {} archives",
                report.populate.indexed, report.populate.archives
            ),
            Err(e) => warn!("periodic rebuild failed: {}", e),
        }
    }
}

/// Describe a rebuild as JSON.
pub fn report_json(report: &RebuildReport) -> Value {
    json!({
        "archives": report.populate.archives,
        "indexed": report.populate.indexed,
        "skipped": report
            .populate
            .skipped
            .iter()
            .map(|s| json!({ "path": s.path, "error": s.error }))
            .collect::<Vec<_>>(),
        "duplicates": report
            .populate
            .duplicates
            .iter()
            .map(|d| {
                json!({
                    "package": d.package,
                    "architecture": d.architecture,
                    "version": d.version.to_string(),
                    "kept": d.kept,
                    "dropped": d.dropped,
                })
            })
            .collect::<Vec<_>>(),
        "date": report.generate.date.format(DATE_FORMAT).to_string(),
        "architectures": report.generate.architectures,
        "failed": report
            .generate
            .failed
            .iter()
            .map(|f| json!({ "architecture": f.architecture, "error": f.error }))
            .collect::<Vec<_>>(),
    })
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found\n").into_response()
}

fn with_content_type(content_type: &'static str, body: impl IntoResponse) -> Response {
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let repo = &state.repository;
    let snapshot = repo.snapshot();

    Json(json!({
        "state": repo.state().as_str(),
        "suite": repo.config().release.suite,
        "date": snapshot.map(|s| s.date.format(DATE_FORMAT).to_string()),
        "architectures": repo.architectures(),
        "packages": repo.package_set().map(|p| p.len()).unwrap_or(0),
        "signed": state.signer.is_some(),
    }))
}

async fn rebuild(State(state): State<AppState>) -> Response {
    match state.repository.rebuild().await {
        Ok(report) => Json(report_json(&report)).into_response(),
        Err(e) => {
            warn!("rebuild failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn public_key(State(state): State<AppState>) -> Response {
    let signer = match &state.signer {
        Some(signer) => signer,
        None => return not_found(),
    };

    match signer.public_key_armored() {
        Ok(key) => with_content_type(PGP_KEYS, key),
        Err(e) => {
            warn!("error exporting public key: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn distribution_file(
    State(state): State<AppState>,
    Path((suite, path)): Path<(String, String)>,
) -> Response {
    let snapshot = match state.repository.snapshot() {
        Some(snapshot) if snapshot.suite == suite => snapshot,
        _ => return not_found(),
    };

    let path = path.trim_start_matches('/');

    match path {
        "Release" => with_content_type(TEXT_PLAIN, snapshot.manifest.clone()),
        "Release.gpg" | "InRelease" => {
            let signer = match &state.signer {
                Some(signer) => signer.clone(),
                None => return not_found(),
            };

            let detached = path == "Release.gpg";
            let manifest = snapshot.manifest.clone();

            // RSA signing is CPU bound.
            let signed = tokio::task::spawn_blocking(move || {
                if detached {
                    signer.sign_detached(&manifest)
                } else {
                    signer.sign_cleartext(&manifest)
                }
            })
            .await;

            match signed {
                Ok(Ok(signed)) if detached => with_content_type(PGP_SIGNATURE, signed),
                Ok(Ok(signed)) => with_content_type(TEXT_PLAIN, signed),
                Ok(Err(e)) => {
                    warn!("error signing {}: {}", path, e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "signing failed\n").into_response()
                }
                Err(e) => {
                    warn!("signing task for {} failed: {}", path, e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "signing failed\n").into_response()
                }
            }
        }
        _ => match snapshot.document(path) {
            Some(doc) => with_content_type(TEXT_PLAIN, doc.data.clone()),
            None => not_found(),
        },
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        axum::{body::Body, http::Request},
        debian_repo_index::{
            control::ControlParagraph,
            deb::builder::DebBuilder,
            error::{RepositoryError, Result},
            repository::{filesystem::FilesystemBackend, RepositoryConfig},
        },
        tower::ServiceExt,
    };

    struct FixedSigner;

    impl ManifestSigner for FixedSigner {
        fn sign_detached(&self, data: &[u8]) -> Result<String> {
            Ok(format!("detached {}", data.len()))
        }

        fn sign_cleartext(&self, data: &[u8]) -> Result<String> {
            Ok(format!("cleartext {}", data.len()))
        }

        fn public_key_armored(&self) -> Result<String> {
            Ok("public key".to_string())
        }
    }

    struct FailingSigner;

    impl ManifestSigner for FailingSigner {
        fn sign_detached(&self, _: &[u8]) -> Result<String> {
            Err(RepositoryError::Signing("no key".into()))
        }

        fn sign_cleartext(&self, _: &[u8]) -> Result<String> {
            Err(RepositoryError::Signing("no key".into()))
        }

        fn public_key_armored(&self) -> Result<String> {
            Err(RepositoryError::Signing("no key".into()))
        }
    }

    fn write_deb(dir: &std::path::Path, package: &str, version: &str, arch: &str) -> Vec<u8> {
        let mut para = ControlParagraph::default();
        para.set_field_from_string("Package".into(), package.to_string().into());
        para.set_field_from_string("Version".into(), version.to_string().into());
        para.set_field_from_string("Architecture".into(), arch.to_string().into());

        let mut data = vec![];
        DebBuilder::new(para)
            .set_mtime(Some(std::time::SystemTime::UNIX_EPOCH))
            .write(&mut data)
            .unwrap();

        std::fs::write(
            dir.join(format!("{}_{}_{}.deb", package, version, arch)),
            &data,
        )
        .unwrap();

        data
    }

    async fn app(dir: &std::path::Path, signer: Option<Arc<dyn ManifestSigner>>) -> Router {
        app_with_credentials(dir, signer, None).await
    }

    async fn app_with_credentials(
        dir: &std::path::Path,
        signer: Option<Arc<dyn ManifestSigner>>,
        credentials: Option<BasicCredentials>,
    ) -> Router {
        let repository = Arc::new(Repository::new(
            Arc::new(FilesystemBackend::new(dir)),
            RepositoryConfig::default(),
        ));
        repository.rebuild().await.unwrap();

        router(
            AppState {
                repository,
                signer,
                credentials,
            },
            dir,
        )
    }

    fn get_with_authorization(uri: &str, authorization: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, authorization)
            .body(Body::empty())
            .unwrap()
    }

    async fn fetch(app: &Router, uri: &str) -> (StatusCode, String) {
        request(app, Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn request(app: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        (status, String::from_utf8_lossy(&body).to_string())
    }

    #[tokio::test]
    async fn serves_generated_files() {
        let td = tempfile::tempdir().unwrap();
        write_deb(td.path(), "foo", "1.0", "amd64");
        write_deb(td.path(), "foo", "2.0", "amd64");
        let app = app(td.path(), None).await;

        let (status, release) = fetch(&app, "/dists/stable/Release").await;
        assert_eq!(status, StatusCode::OK);
        assert!(release.starts_with("Suite: stable\n"));
        assert!(release.contains("main/binary-amd64/Packages"));

        let (status, packages) = fetch(&app, "/dists/stable/main/binary-amd64/Packages").await;
        assert_eq!(status, StatusCode::OK);
        assert!(packages.contains("Version: 2.0\n"));
        assert!(!packages.contains("Version: 1.0\n"));
    }

    #[tokio::test]
    async fn unknown_paths_not_found() {
        let td = tempfile::tempdir().unwrap();
        write_deb(td.path(), "foo", "1.0", "amd64");
        let app = app(td.path(), None).await;

        for uri in [
            "/dists/unstable/Release",
            "/dists/stable/main/binary-arm64/Packages",
            "/dists/stable/Release.gpg",
            "/dists/stable/InRelease",
            "/pubkey.gpg",
        ] {
            assert_eq!(fetch(&app, uri).await.0, StatusCode::NOT_FOUND, "{}", uri);
        }
    }

    #[tokio::test]
    async fn signed_endpoints() {
        let td = tempfile::tempdir().unwrap();
        write_deb(td.path(), "foo", "1.0", "amd64");
        let app = app(td.path(), Some(Arc::new(FixedSigner))).await;

        let (_, release) = fetch(&app, "/dists/stable/Release").await;

        assert_eq!(
            fetch(&app, "/dists/stable/Release.gpg").await,
            (StatusCode::OK, format!("detached {}", release.len()))
        );
        assert_eq!(
            fetch(&app, "/dists/stable/InRelease").await,
            (StatusCode::OK, format!("cleartext {}", release.len()))
        );
        assert_eq!(
            fetch(&app, "/pubkey.gpg").await,
            (StatusCode::OK, "public key".to_string())
        );
    }

    #[tokio::test]
    async fn signing_failure_isolated() {
        let td = tempfile::tempdir().unwrap();
        write_deb(td.path(), "foo", "1.0", "amd64");
        let app = app(td.path(), Some(Arc::new(FailingSigner))).await;

        assert_eq!(
            fetch(&app, "/dists/stable/Release.gpg").await.0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            fetch(&app, "/dists/stable/InRelease").await.0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(fetch(&app, "/dists/stable/Release").await.0, StatusCode::OK);
        assert_eq!(
            fetch(&app, "/dists/stable/main/binary-amd64/Packages").await.0,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn serves_pool_archives() {
        let td = tempfile::tempdir().unwrap();
        let data = write_deb(td.path(), "foo", "1.0", "amd64");
        let app = app(td.path(), None).await;

        let response = app
            .clone()
            .oneshot(
                Request::get("/pool/main/foo_1.0_amd64.deb")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn rebuild_picks_up_new_archives() {
        let td = tempfile::tempdir().unwrap();
        write_deb(td.path(), "foo", "1.0", "amd64");
        let app = app(td.path(), None).await;

        write_deb(td.path(), "bar", "1.0", "arm64");
        std::fs::write(td.path().join("broken.deb"), b"garbage").unwrap();

        let (status, body) = request(
            &app,
            Request::post("/rebuild").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let report: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(report["archives"], 3);
        assert_eq!(report["indexed"], 2);
        assert_eq!(report["skipped"][0]["path"], "broken.deb");
        assert_eq!(report["architectures"], json!(["amd64", "arm64"]));

        let (status, body) = fetch(&app, "/").await;
        assert_eq!(status, StatusCode::OK);
        let status: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(status["state"], "ready");
        assert_eq!(status["packages"], 2);
        assert_eq!(status["architectures"], json!(["amd64", "arm64"]));

        assert_eq!(
            fetch(&app, "/dists/stable/main/binary-arm64/Packages").await.0,
            StatusCode::OK
        );
    }

    #[test]
    fn authorization_header_parsing() {
        let credentials = BasicCredentials::new("apt", "s3cret");

        // base64("apt:s3cret")
        assert!(credentials.accepts("Basic YXB0OnMzY3JldA=="));
        assert!(credentials.accepts("basic YXB0OnMzY3JldA=="));
        // base64("apt:wrong")
        assert!(!credentials.accepts("Basic YXB0Ondyb25n"));
        assert!(!credentials.accepts("Bearer YXB0OnMzY3JldA=="));
        assert!(!credentials.accepts("Basic not-base64!"));
        assert!(!credentials.accepts("YXB0OnMzY3JldA=="));
        assert!(!credentials.accepts(""));
    }

    #[tokio::test]
    async fn credentials_required_everywhere() {
        let td = tempfile::tempdir().unwrap();
        write_deb(td.path(), "foo", "1.0", "amd64");
        let app = app_with_credentials(
            td.path(),
            Some(Arc::new(FixedSigner)),
            Some(BasicCredentials::new("apt", "s3cret")),
        )
        .await;

        for uri in [
            "/",
            "/dists/stable/Release",
            "/dists/stable/InRelease",
            "/pubkey.gpg",
            "/pool/main/foo_1.0_amd64.deb",
            "/no/such/path",
        ] {
            let response = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
            assert_eq!(
                response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
                AUTH_CHALLENGE
            );

            let (status, _) =
                request(&app, get_with_authorization(uri, "Basic YXB0Ondyb25n")).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
        }

        let (status, _) = request(
            &app,
            Request::post("/rebuild").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_credentials_admitted() {
        let td = tempfile::tempdir().unwrap();
        let data = write_deb(td.path(), "foo", "1.0", "amd64");
        let app = app_with_credentials(
            td.path(),
            None,
            Some(BasicCredentials::new("apt", "s3cret")),
        )
        .await;

        let (status, release) = request(
            &app,
            get_with_authorization("/dists/stable/Release", "Basic YXB0OnMzY3JldA=="),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(release.starts_with("Suite: stable\n"));

        let response = app
            .clone()
            .oneshot(get_with_authorization(
                "/pool/main/foo_1.0_amd64.deb",
                "Basic YXB0OnMzY3JldA==",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.as_ref(), data.as_slice());

        // Handlers still decide the status of authenticated requests.
        let (status, _) = request(
            &app,
            get_with_authorization("/pubkey.gpg", "Basic YXB0OnMzY3JldA=="),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn access_log_preserves_responses() {
        let td = tempfile::tempdir().unwrap();
        write_deb(td.path(), "foo", "1.0", "amd64");
        let app = app(td.path(), None).await;

        let response = app
            .clone()
            .oneshot(
                Request::get("/dists/stable/main/binary-amd64/Packages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            TEXT_PLAIN
        );
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());

        assert_eq!(
            fetch(&app, "/dists/stable/main/binary-s390x/Packages").await,
            (StatusCode::NOT_FOUND, "not found\n".to_string())
        );
    }
}
