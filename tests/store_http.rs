//! HTTP-level tests for the REST store and the auth client against a fake
//! backend served by axum.

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::watch;
use uuid::Uuid;

use taskboard::board::{BoardService, NewTask};
use taskboard::errors::{AuthError, BoardError, StoreError};
use taskboard::store::auth::pkce_challenge;
use taskboard::store::{AuthClient, Query, RestStore, Session, Store, Table};

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    query: String,
    headers: HeaderMap,
    body: String,
}

type Log = Arc<Mutex<Vec<Recorded>>>;

const USER_ID: &str = "4f1c1f9e-3d5b-4b43-9a31-2b8f0f6f1d11";

async fn handle(
    State(log): State<Log>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let path = uri.path().to_string();
    log.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        query: uri.query().unwrap_or_default().to_string(),
        headers,
        body: body.clone(),
    });

    match (method, path.as_str()) {
        (Method::GET, "/rest/v1/tasks") => axum::Json(json!([{
            "id": Uuid::nil(),
            "project_id": Uuid::nil(),
            "column_id": Uuid::nil(),
            "title": "Existing",
            "position": 4
        }]))
        .into_response(),
        (Method::POST, "/rest/v1/tasks") => {
            let rows: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
            (StatusCode::CREATED, axum::Json(rows)).into_response()
        }
        (Method::PATCH, "/rest/v1/columns") => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint",
                "details": null,
                "hint": null
            })),
        )
            .into_response(),
        (Method::POST, "/auth/v1/otp") => axum::Json(json!({})).into_response(),
        (Method::GET, "/auth/v1/user") => {
            axum::Json(json!({ "id": USER_ID, "email": "ada@example.com" })).into_response()
        }
        (Method::POST, "/auth/v1/token") => axum::Json(json!({
            "access_token": "fresh-access",
            "refresh_token": "fresh-refresh",
            "token_type": "bearer",
            "expires_in": 3600,
            "user": { "id": USER_ID, "email": "ada@example.com" }
        }))
        .into_response(),
        (Method::POST, "/auth/v1/logout") => StatusCode::NO_CONTENT.into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn fake_backend() -> (String, Log) {
    let log: Log = Arc::default();
    let app = Router::new().fallback(handle).with_state(log.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), log)
}

fn requests(log: &Log) -> Vec<Recorded> {
    log.lock().unwrap().clone()
}

fn signed_in(token: &str) -> Session {
    Session {
        access_token: token.to_string(),
        refresh_token: "refresh".to_string(),
        token_type: "bearer".to_string(),
        expires_at: None,
        expires_in: None,
        user: None,
    }
}

mod rest_store {
    use super::*;

    #[tokio::test]
    async fn test_select_sends_keys_and_postgrest_params() {
        let (url, log) = fake_backend().await;
        let (_tx, rx) = watch::channel(None);
        let store = RestStore::new(&url, "anon-key", rx).unwrap();
        let project = Uuid::new_v4();

        let rows = store
            .select(
                Table::Tasks,
                &Query::new().eq("project_id", project).order("position"),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], "Existing");

        let sent = requests(&log);
        assert_eq!(sent.len(), 1);
        let request = &sent[0];
        assert_eq!(request.headers["apikey"], "anon-key");
        assert_eq!(request.headers["authorization"], "Bearer anon-key");
        assert!(request.headers.get("prefer").is_none());
        assert!(request.query.contains(&format!("project_id=eq.{}", project)));
        assert!(request.query.contains("order=position.asc"));
    }

    #[tokio::test]
    async fn test_writes_use_session_token_and_ask_for_rows_back() {
        let (url, log) = fake_backend().await;
        let (_tx, rx) = watch::channel(Some(signed_in("user-token")));
        let store = RestStore::new(&url, "anon-key", rx).unwrap();

        let inserted = store
            .insert(Table::Tasks, vec![json!({ "title": "New" })])
            .await
            .unwrap();
        assert_eq!(inserted, vec![json!({ "title": "New" })]);

        let sent = requests(&log);
        let request = &sent[0];
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.headers["authorization"], "Bearer user-token");
        assert_eq!(request.headers["prefer"], "return=representation");
        assert_eq!(request.body, r#"[{"title":"New"}]"#);
    }

    #[tokio::test]
    async fn test_rejection_carries_status_and_code() {
        let (url, _log) = fake_backend().await;
        let (_tx, rx) = watch::channel(None);
        let store = RestStore::new(&url, "anon-key", rx).unwrap();

        let err = store
            .update(
                Table::Columns,
                json!({ "title": "Done" }),
                &Query::new().eq("id", Uuid::nil()),
            )
            .await
            .unwrap_err();
        match err {
            StoreError::Rejected {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 409);
                assert_eq!(code.as_deref(), Some("23505"));
                assert!(message.contains("duplicate key"));
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_task_appends_after_highest_position() {
        let (url, log) = fake_backend().await;
        let (_tx, rx) = watch::channel(None);
        let service = BoardService::new(Arc::new(RestStore::new(&url, "anon-key", rx).unwrap()));
        let project = Uuid::new_v4();
        let column = Uuid::new_v4();

        let task = service
            .create_task(project, column, NewTask::titled("  Write docs "))
            .await
            .unwrap();
        assert_eq!(task.title, "Write docs");
        assert_eq!(task.position, 5);
        assert_eq!(task.column_id, column);

        let sent = requests(&log);
        assert_eq!(sent.len(), 2);
        assert!(sent[0].query.contains("order=position.desc"));
        assert!(sent[0].query.contains("limit=1"));
        assert_eq!(sent[1].method, Method::POST);
    }

    #[tokio::test]
    async fn test_blank_title_never_reaches_the_server() {
        let (url, log) = fake_backend().await;
        let (_tx, rx) = watch::channel(None);
        let service = BoardService::new(Arc::new(RestStore::new(&url, "anon-key", rx).unwrap()));

        let err = service
            .create_task(Uuid::new_v4(), Uuid::new_v4(), NewTask::titled("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::InvalidInput(_)));
        assert!(requests(&log).is_empty());
    }
}

mod auth_client {
    use super::*;

    #[tokio::test]
    async fn test_magic_link_request() {
        let (url, log) = fake_backend().await;
        let auth = AuthClient::new(&url, "anon-key", None).unwrap();

        auth.sign_in_with_otp("ada@example.com", Some("http://localhost:3000"))
            .await
            .unwrap();

        let sent = requests(&log);
        assert_eq!(sent[0].path, "/auth/v1/otp");
        assert_eq!(sent[0].headers["apikey"], "anon-key");
        assert!(sent[0].query.contains("redirect_to="));
        let body: Value = serde_json::from_str(&sent[0].body).unwrap();
        assert_eq!(body["email"], "ada@example.com");
        assert!(auth.session().is_none());
    }

    #[tokio::test]
    async fn test_implicit_callback_persists_session_and_refresh_replaces_it() {
        let (url, _log) = fake_backend().await;
        let dir = TempDir::new().unwrap();
        let session_path = dir.path().join("session.json");
        let auth = AuthClient::new(&url, "anon-key", Some(session_path.clone())).unwrap();
        let mut changes = auth.watch();

        let session = auth
            .complete_callback(
                "http://localhost:3000/#access_token=tok&refresh_token=ref&expires_in=3600",
            )
            .await
            .unwrap();
        assert_eq!(session.access_token, "tok");
        assert!(session.expires_at.is_some());
        assert_eq!(
            session.user.as_ref().and_then(|u| u.email.as_deref()),
            Some("ada@example.com")
        );
        assert!(changes.has_changed().unwrap());
        changes.mark_unchanged();

        // A new client restores the persisted session.
        let restored = AuthClient::new(&url, "anon-key", Some(session_path.clone())).unwrap();
        assert_eq!(restored.session().map(|s| s.access_token), Some("tok".into()));

        let refreshed = auth.refresh().await.unwrap();
        assert_eq!(refreshed.access_token, "fresh-access");
        assert_eq!(auth.user().map(|u| u.id.to_string()), Some(USER_ID.to_string()));
        assert!(changes.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_sign_out_clears_local_session() {
        let (url, log) = fake_backend().await;
        let dir = TempDir::new().unwrap();
        let session_path = dir.path().join("session.json");
        let auth = AuthClient::new(&url, "anon-key", Some(session_path.clone())).unwrap();
        auth.complete_callback("http://localhost/#access_token=tok&refresh_token=ref")
            .await
            .unwrap();

        auth.sign_out().await.unwrap();
        assert!(auth.session().is_none());

        let logout = requests(&log)
            .into_iter()
            .find(|r| r.path == "/auth/v1/logout")
            .expect("logout request");
        assert_eq!(logout.headers["authorization"], "Bearer tok");

        let restored = AuthClient::new(&url, "anon-key", Some(session_path)).unwrap();
        assert!(restored.session().is_none());
    }

    fn session_file(path: &std::path::Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_oauth_code_is_exchanged_with_stored_verifier() {
        let (url, log) = fake_backend().await;
        let dir = TempDir::new().unwrap();
        let session_path = dir.path().join("session.json");
        let auth = AuthClient::new(&url, "anon-key", Some(session_path.clone())).unwrap();

        let authorize = auth.oauth_url("github", Some("http://localhost:3000")).unwrap();
        let challenge = authorize
            .query_pairs()
            .find(|(k, _)| k == "code_challenge")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let verifier = session_file(&session_path)["pkce_verifier"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(pkce_challenge(&verifier), challenge);

        let session = auth
            .complete_callback("http://localhost:3000/?code=abc")
            .await
            .unwrap();
        assert_eq!(session.access_token, "fresh-access");
        assert!(session.expires_at.is_some());

        let exchange = requests(&log)
            .into_iter()
            .find(|r| r.path == "/auth/v1/token")
            .expect("token request");
        assert!(exchange.query.contains("grant_type=pkce"));
        let body: Value = serde_json::from_str(&exchange.body).unwrap();
        assert_eq!(body["auth_code"], "abc");
        assert_eq!(body["code_verifier"], verifier.as_str());

        let stored = session_file(&session_path);
        assert!(stored["pkce_verifier"].is_null());
        assert_eq!(stored["session"]["access_token"], "fresh-access");

        // The verifier is single use.
        let again = auth.complete_callback("http://localhost:3000/?code=abc").await;
        assert!(matches!(again, Err(AuthError::MissingVerifier)));
    }

    #[tokio::test]
    async fn test_callback_without_credentials() {
        let (url, _log) = fake_backend().await;
        let auth = AuthClient::new(&url, "anon-key", None).unwrap();
        let err = auth
            .complete_callback("http://localhost:3000/?state=abc")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingCallbackCredentials));
    }

    #[tokio::test]
    async fn test_callback_error_is_reported() {
        let (url, _log) = fake_backend().await;
        let auth = AuthClient::new(&url, "anon-key", None).unwrap();
        let err = auth
            .complete_callback("http://localhost:3000/?error=access_denied&error_description=Denied")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Rejected { ref message, .. } if message == "Denied"));
    }
}
