mod config;
mod interceptors;
mod services;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::middleware::from_fn;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use config::ServerArgs;
use joblib::{JobCoordinator, Runner, Workspace};
use services::dumpservice::{self, DumpService};
use std::path::Path;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Transport-level cap on request bodies; the `code` field has its own, smaller limit.
const BODY_LIMIT: usize = 50 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=warn")),
        )
        .init();

    let args = ServerArgs::parse();
    args.validate()?;
    serve(args).await
}

async fn serve(args: ServerArgs) -> anyhow::Result<()> {
    let workspace = Workspace::create(&args.staging_dir)
        .await
        .with_context(|| format!("creating staging dir {}", args.staging_dir.display()))?;
    let mut coordinator = JobCoordinator::new(workspace, Runner::new(args.tool(), args.limits()));
    if let Some(max) = args.max_concurrent_jobs {
        coordinator = coordinator.with_max_concurrent_jobs(max);
    }
    let service = DumpService::new(coordinator, args.max_code_bytes);

    let addr = args.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Lua dumper listening on {}", addr);
    info!("Staging directory: {}", args.staging_dir.display());
    info!("Environment: {}", args.environment);
    match args.max_concurrent_jobs {
        Some(max) => info!("At most {} concurrent dumper processes", max),
        None => info!("Concurrent dumper processes are not capped"),
    }

    axum::serve(listener, app(service, &args.static_dir))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

fn app(service: DumpService, static_dir: &Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/health", get(dumpservice::health))
        .route("/api/dump", post(dumpservice::dump))
        .with_state(service)
        .fallback_service(ServeDir::new(static_dir))
        .layer(
            ServiceBuilder::new()
                .layer(from_fn(interceptors::request_log::log_request))
                .layer(cors)
                .layer(CatchPanicLayer::custom(interceptors::panic::handle_panic))
                .layer(DefaultBodyLimit::max(BODY_LIMIT)),
        )
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal, draining in-flight jobs");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use joblib::{Limits, ToolCommand};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::util::ServiceExt;

    const MAX_CODE: usize = 10 * 1024 * 1024;

    struct TestServer {
        router: Router,
        staging: tempfile::TempDir,
    }

    impl TestServer {
        /// A server whose dumper is `sh -c <script>`, so `$1`/`$2` are the staged input/output.
        async fn with_script(script: &str) -> Self {
            Self::with_runner(Runner::new(
                ToolCommand::new("sh").arg("-c").arg(script).arg("dumper"),
                Limits {
                    timeout: Duration::from_secs(5),
                    max_output_bytes: 64 * 1024,
                },
            ))
            .await
        }

        async fn with_runner(runner: Runner) -> Self {
            let staging = tempfile::tempdir().unwrap();
            let workspace = Workspace::create(staging.path()).await.unwrap();
            let service = DumpService::new(JobCoordinator::new(workspace, runner), MAX_CODE);
            let router = app(service, &staging.path().join("public"));
            Self { router, staging }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            call(self.router.clone(), request).await
        }

        async fn dump(&self, body: Value) -> (StatusCode, Value) {
            self.send(dump_request(body.to_string())).await
        }

        fn staged_files(&self) -> usize {
            std::fs::read_dir(self.staging.path())
                .unwrap()
                .filter(|entry| entry.as_ref().unwrap().file_name() != "public")
                .count()
        }
    }

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn dump_request(body: String) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/api/dump")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    const ROUND_TRIP: &str =
        r#"printf "print('hi')" > "$2"; printf 'Lines: 1 | Remotes: 0 | Strings: 0'"#;

    #[tokio::test]
    async fn health_reports_ok() {
        let server = TestServer::with_script("true").await;
        let request = Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap();
        let (status, body) = server.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        let timestamp = body["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
        assert!(body["uptime"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn round_trip_matches_contract() {
        let server = TestServer::with_script(ROUND_TRIP).await;
        let (status, body) = server.dump(json!({"code": "print('hello')"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "success": true,
                "dumpedCode": "print('hi')",
                "stats": {"totalLines": 1, "remoteCalls": 0, "suspiciousStrings": 0},
                "consoleOutput": "Lines: 1 | Remotes: 0 | Strings: 0",
                "warnings": null
            })
        );
        assert_eq!(server.staged_files(), 0);
    }

    #[tokio::test]
    async fn stats_null_and_warnings_passed_through() {
        let server =
            TestServer::with_script(r#"cat "$1" > "$2"; echo plain; echo 'deprecated call' >&2"#)
                .await;
        let (status, body) = server.dump(json!({"code": "x = 1"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dumpedCode"], "x = 1");
        assert_eq!(body["stats"], Value::Null);
        assert_eq!(body["consoleOutput"], "plain\n");
        assert_eq!(body["warnings"], "deprecated call\n");
    }

    #[tokio::test]
    async fn options_reach_the_dumper_as_literal_arguments() {
        let server = TestServer::with_script(r#"printf '%s|%s|%s' "$3" "$4" "$#" > "$2""#).await;
        let (status, body) = server
            .dump(json!({
                "code": "x",
                "options": {"key": "k\" && echo pwned \"", "placeId": 606849621}
            }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dumpedCode"], "k\" && echo pwned \"|606849621|4");
    }

    #[tokio::test]
    async fn missing_code_is_rejected() {
        let server = TestServer::with_script(ROUND_TRIP).await;
        for body in [json!({}), json!({"code": 12}), json!({"options": {"key": "k"}})] {
            let (status, body) = server.dump(body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body, json!({"success": false, "error": "No code provided"}));
        }
    }

    #[tokio::test]
    async fn oversized_code_never_reaches_the_dumper() {
        let marker = tempfile::tempdir().unwrap();
        let touched = marker.path().join("invoked");
        let server = TestServer::with_script(&format!(r#"touch "{}""#, touched.display())).await;

        let code = "a".repeat(MAX_CODE + 1);
        let (status, body) = server.dump(json!({ "code": code })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({"success": false, "error": "Code too large (max 10MB)"})
        );
        assert!(!touched.exists());
        assert_eq!(server.staged_files(), 0);
    }

    #[tokio::test]
    async fn body_over_transport_limit_is_too_large() {
        let server = TestServer::with_script(ROUND_TRIP).await;
        let code = "a".repeat(BODY_LIMIT + 1);
        let (status, body) = server.dump(json!({ "code": code })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Code too large (max 10MB)");
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let server = TestServer::with_script(ROUND_TRIP).await;
        let (status, body) = server.send(dump_request("{\"code\": ".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"success": false, "error": "Invalid JSON body"}));
    }

    #[tokio::test]
    async fn no_output_is_a_failure_with_details() {
        let server = TestServer::with_script("echo 'bad bytecode' >&2").await;
        let (status, body) = server.dump(json!({"code": "x"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({
                "success": false,
                "error": "Dumper produced no output",
                "details": "bad bytecode\n"
            })
        );
        assert_eq!(server.staged_files(), 0);

        let server = TestServer::with_script("exit 4").await;
        let (status, body) = server.dump(json!({"code": "x"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["details"], "dumper exited with code 4");

        let server = TestServer::with_script("true").await;
        let (_, body) = server.dump(json!({"code": "x"})).await;
        assert_eq!(body, json!({"success": false, "error": "Dumper produced no output"}));
    }

    #[tokio::test]
    async fn timeout_with_output_still_succeeds() {
        let staging_script = r#"cat "$1" > "$2"; echo 'still going'; exec sleep 30"#;
        let server = TestServer::with_runner(Runner::new(
            ToolCommand::new("sh").arg("-c").arg(staging_script).arg("dumper"),
            Limits {
                timeout: Duration::from_millis(300),
                max_output_bytes: 1024,
            },
        ))
        .await;
        let (status, body) = server.dump(json!({"code": "partial"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dumpedCode"], "partial");
        assert_eq!(body["consoleOutput"], "still going\n");
        assert_eq!(server.staged_files(), 0);
    }

    #[tokio::test]
    async fn runner_errors_become_500s() {
        let server = TestServer::with_script(r#"cat "$1" > "$2"; head -c 100000 /dev/zero"#).await;
        let (status, body) = server.dump(json!({"code": "x"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("exceeded"));
        assert_eq!(server.staged_files(), 0);

        let server = TestServer::with_runner(Runner::new(
            ToolCommand::new("no-such-dumper-binary"),
            Limits::default(),
        ))
        .await;
        let (status, body) = server.dump(json!({"code": "x"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("failed to start dumper"));
        assert_eq!(server.staged_files(), 0);
    }

    #[tokio::test]
    async fn concurrent_requests_get_their_own_output() {
        let server = TestServer::with_script(r#"sleep 0.05; cat "$1" > "$2""#).await;
        let requests = (0..12).map(|n| {
            let router = server.router.clone();
            async move {
                let body = json!({ "code": format!("return {}", n) }).to_string();
                let response = router.oneshot(dump_request(body)).await.unwrap();
                let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                    .await
                    .unwrap();
                let body: Value = serde_json::from_slice(&bytes).unwrap();
                (n, body)
            }
        });
        for (n, body) in futures::future::join_all(requests).await {
            assert_eq!(body["dumpedCode"], format!("return {}", n));
        }
        assert_eq!(server.staged_files(), 0);
    }

    #[tokio::test]
    async fn staging_failure_is_a_500_with_the_cause() {
        let tmp = tempfile::tempdir().unwrap();
        let gone = tmp.path().join("gone");
        let workspace = Workspace::create(&gone).await.unwrap();
        std::fs::remove_dir(&gone).unwrap();
        let marker = tmp.path().join("invoked");
        let runner = Runner::new(
            ToolCommand::new("touch").arg(marker.display().to_string()),
            Limits::default(),
        );
        let service = DumpService::new(JobCoordinator::new(workspace, runner), MAX_CODE);
        let router = app(service, tmp.path());

        let (status, body) = call(router, dump_request(json!({"code": "x"}).to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        let error = body["error"].as_str().unwrap();
        assert!(error.starts_with("failed to stage input at "), "{}", error);
        assert!(error.contains("gone"), "{}", error);
        assert_eq!(body.get("details"), None);
        assert!(!marker.exists());
        assert!(!gone.exists());
    }

    #[tokio::test]
    #[allow(dependency_on_unit_never_type_fallback)]
    async fn panicking_handler_is_a_generic_500_and_leaves_no_files() {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(tmp.path()).await.unwrap();
        let router = Router::new()
            .route(
                "/api/dump",
                post(move || {
                    let workspace = workspace.clone();
                    async move {
                        let _staged = workspace.stage("x").await.unwrap();
                        panic!("handler blew up mid-job");
                    }
                }),
            )
            .layer(CatchPanicLayer::custom(interceptors::panic::handle_panic));

        let (status, body) = call(router, dump_request(json!({"code": "x"}).to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({"success": false, "error": "Internal server error"})
        );
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let server = TestServer::with_script(ROUND_TRIP).await;
        let request = Request::builder()
            .uri("/api/health")
            .header("origin", "https://example.com")
            .body(Body::empty())
            .unwrap();
        let response = server.router.clone().oneshot(request).await.unwrap();
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "*"
        );
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn static_files_are_served_for_other_paths() {
        let server = TestServer::with_script(ROUND_TRIP).await;
        let public = server.staging.path().join("public");
        std::fs::create_dir(&public).unwrap();
        std::fs::write(public.join("index.html"), "<h1>dumper</h1>").unwrap();

        let request = Request::builder()
            .uri("/index.html")
            .body(Body::empty())
            .unwrap();
        let response = server.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"<h1>dumper</h1>");
    }
}
