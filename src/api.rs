//! HTTP control API.
//!
//! Local-only JSON endpoints for driving the assistant from other processes
//! (`assistant-ctl`, editor hooks, scripts). Runs on port 8768 by default.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::connection::{ConnectionMonitor, ConnectionState};
use crate::conversation::{Conversation, Message, SubmitError};
use crate::ollama::ModelInfo;
use crate::settings::{SettingChange, Settings, SettingsStore};
use crate::speech::{SpeechController, SpeechState};
use crate::voice::{self, VoiceDescriptor};

#[derive(Clone)]
pub struct ApiState {
    pub conversation: Arc<Conversation>,
    pub speech: Arc<SpeechController>,
    pub settings: Arc<SettingsStore>,
    pub connection: Arc<ConnectionMonitor>,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct SubmitRequest {
    text: String,
    #[serde(default)]
    speak: bool,
}

#[derive(Deserialize)]
struct SpeakRequest {
    text: String,
    /// Respond only once playback has ended.
    #[serde(default)]
    wait: bool,
}

#[derive(Deserialize)]
struct SelectModelRequest {
    name: String,
}

#[derive(Serialize)]
struct StatusResponse {
    connected: bool,
    checking: bool,
    host: String,
    model: String,
    processing: bool,
    speech: SpeechState,
    messages: usize,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            error: Some(message.into()),
        }
    }
}

type Rejection = (StatusCode, Json<SimpleResponse>);

fn reject(code: StatusCode, message: impl ToString) -> Rejection {
    (code, Json(SimpleResponse::err(message.to_string())))
}

/// Build the axum router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/submit", post(handle_submit))
        .route("/messages", get(handle_messages))
        .route("/speak", post(handle_speak))
        .route("/stop", post(handle_stop))
        .route("/settings", get(handle_get_settings).post(handle_update_setting))
        .route("/voices", get(handle_voices))
        .route("/models", get(handle_models))
        .route("/models/select", post(handle_select_model))
        .route("/refresh", post(handle_refresh))
        .with_state(state)
}

/// Start the control API as a background tokio task.
pub async fn start_api(state: ApiState, port: u16) {
    let app = router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind control API on {addr}: {e}");
            return;
        }
    };
    info!("Control API listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Control API server error: {e}");
        }
    });
}

// --- Handlers ---

async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let conn = state.connection.snapshot();
    Json(StatusResponse {
        connected: conn.connected,
        checking: conn.checking,
        host: state.connection.host().to_string(),
        model: conn.selected_model,
        processing: state.conversation.is_processing(),
        speech: state.speech.state(),
        messages: state.conversation.messages().len(),
    })
}

async fn handle_submit(
    State(state): State<ApiState>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<Message>, Rejection> {
    let preview: String = req.text.chars().take(80).collect();
    info!("HTTP /submit: \"{}\" (speak={})", preview.replace('\n', " "), req.speak);

    match state.conversation.submit(&req.text, req.speak).await {
        Ok(reply) => Ok(Json(reply)),
        Err(e @ SubmitError::EmptyInput) => Err(reject(StatusCode::BAD_REQUEST, e)),
        Err(e @ SubmitError::Busy) => Err(reject(StatusCode::CONFLICT, e)),
    }
}

async fn handle_messages(State(state): State<ApiState>) -> Json<Vec<Message>> {
    Json(state.conversation.messages())
}

async fn handle_speak(
    State(state): State<ApiState>,
    Json(req): Json<SpeakRequest>,
) -> Result<Json<SimpleResponse>, Rejection> {
    if req.text.trim().is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "empty text"));
    }
    let mut playback = state.speech.subscribe();
    state.speech.speak(&req.text, None);
    if !req.wait {
        return Ok(Json(SimpleResponse::ok("speaking")));
    }

    let ended = playback
        .wait_for(|s| *s == SpeechState::Idle)
        .await
        .is_ok();
    if !ended {
        warn!("Speech controller dropped while waiting for playback");
    }
    Ok(Json(SimpleResponse::ok("spoken")))
}

async fn handle_stop(State(state): State<ApiState>) -> Json<SimpleResponse> {
    state.speech.stop();
    Json(SimpleResponse::ok("stopped"))
}

async fn handle_get_settings(State(state): State<ApiState>) -> Json<Settings> {
    Json(state.settings.snapshot())
}

async fn handle_update_setting(
    State(state): State<ApiState>,
    Json(change): Json<SettingChange>,
) -> Result<Json<Settings>, Rejection> {
    let field = change.field_name();
    state.settings.update(change).map(Json).map_err(|e| {
        warn!("Rejected update to {field}: {e}");
        reject(StatusCode::UNPROCESSABLE_ENTITY, e)
    })
}

async fn handle_voices(State(state): State<ApiState>) -> Json<Vec<VoiceDescriptor>> {
    Json(voice::english_voices(&state.speech.voices()))
}

async fn handle_models(State(state): State<ApiState>) -> Json<Vec<ModelInfo>> {
    Json(state.connection.snapshot().models)
}

async fn handle_select_model(
    State(state): State<ApiState>,
    Json(req): Json<SelectModelRequest>,
) -> Result<Json<ConnectionState>, Rejection> {
    state
        .connection
        .select_model(&req.name)
        .map_err(|e| reject(StatusCode::UNPROCESSABLE_ENTITY, e))?;
    Ok(Json(state.connection.snapshot()))
}

async fn handle_refresh(State(state): State<ApiState>) -> Json<ConnectionState> {
    state.connection.refresh().await;
    Json(state.connection.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::Responder;
    use crate::ollama::{GenerateOptions, OllamaClient};
    use crate::settings::MemoryStore;
    use crate::speech::testing::FakePlatform;
    use crate::speech::VoiceConfig;
    use serde_json::{json, Value};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct TestApi {
        base: String,
        http: reqwest::Client,
        platform: Arc<FakePlatform>,
    }

    async fn serve(ollama: &MockServer) -> TestApi {
        let client = Arc::new(OllamaClient::new(&ollama.uri(), Duration::from_secs(2)));
        let connection = Arc::new(ConnectionMonitor::new(client.clone(), "llama3"));
        let responder = Arc::new(Responder::new(
            client,
            connection.clone(),
            GenerateOptions {
                temperature: 0.2,
                top_p: 0.9,
            },
        ));
        let platform = Arc::new(FakePlatform {
            voices: vec![
                VoiceDescriptor::new("Alex", "en-US"),
                VoiceDescriptor::new("Amelie", "fr-CA"),
            ],
            auto_start: true,
            ..Default::default()
        });
        let speech = Arc::new(SpeechController::new(platform.clone(), VoiceConfig::default()));
        let settings = Arc::new(SettingsStore::open(MemoryStore::default()));
        let conversation = Arc::new(Conversation::new(responder, speech.clone(), settings.clone()));

        let app = router(ApiState {
            conversation,
            speech,
            settings,
            connection,
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestApi {
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
            platform,
        }
    }

    async fn mount_ollama(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "llama3"}, {"name": "phi3"}]
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "So, four."})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn submit_then_status_round_trip() {
        let ollama = MockServer::start().await;
        mount_ollama(&ollama).await;
        let api = serve(&ollama).await;

        let refreshed: Value = api
            .http
            .post(format!("{}/refresh", api.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(refreshed["connected"], true);

        let reply: Value = api
            .http
            .post(format!("{}/submit", api.base))
            .json(&json!({"text": "What is 2+2?", "speak": true}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reply["role"], "assistant");
        assert_eq!(reply["content"], "four.");
        assert_eq!(api.platform.spoken_texts(), vec!["four."]);

        let status: Value = api
            .http
            .get(format!("{}/status", api.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["connected"], true);
        assert_eq!(status["model"], "llama3");
        assert_eq!(status["processing"], false);
        assert_eq!(status["messages"], 2);

        let messages: Vec<Value> = api
            .http
            .get(format!("{}/messages", api.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["content"], "four.");
    }

    #[tokio::test]
    async fn empty_submit_is_a_bad_request() {
        let ollama = MockServer::start().await;
        let api = serve(&ollama).await;

        let resp = api
            .http
            .post(format!("{}/submit", api.base))
            .json(&json!({"text": "  "}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn settings_update_validates_range() {
        let ollama = MockServer::start().await;
        let api = serve(&ollama).await;
        let url = format!("{}/settings", api.base);

        let bad = api
            .http
            .post(&url)
            .json(&json!({"field": "voiceSpeed", "value": 5.0}))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);

        let updated: Value = api
            .http
            .post(&url)
            .json(&json!({"field": "themeColor", "value": "teal"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(updated["themeColor"], "teal");
        assert_eq!(updated["voiceSpeed"], 0.85);
    }

    #[tokio::test]
    async fn voices_are_filtered_to_english() {
        let ollama = MockServer::start().await;
        let api = serve(&ollama).await;

        let voices: Vec<Value> = api
            .http
            .get(format!("{}/voices", api.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0]["name"], "Alex");
    }

    #[tokio::test]
    async fn selecting_unknown_model_is_rejected() {
        let ollama = MockServer::start().await;
        mount_ollama(&ollama).await;
        let api = serve(&ollama).await;
        api.http
            .post(format!("{}/refresh", api.base))
            .send()
            .await
            .unwrap();

        let url = format!("{}/models/select", api.base);
        let bad = api
            .http
            .post(&url)
            .json(&json!({"name": "mistral"}))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);

        let ok: Value = api
            .http
            .post(&url)
            .json(&json!({"name": "phi3"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(ok["selected_model"], "phi3");
    }

    #[tokio::test]
    async fn speak_and_stop() {
        let ollama = MockServer::start().await;
        let api = serve(&ollama).await;

        let resp = api
            .http
            .post(format!("{}/speak", api.base))
            .json(&json!({"text": "hello there"}))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());

        api.http
            .post(format!("{}/stop", api.base))
            .send()
            .await
            .unwrap();
        assert_eq!(
            api.platform.log(),
            vec!["cancel", "speak:hello there", "cancel"]
        );
    }

    #[tokio::test]
    async fn speak_with_wait_returns_after_playback_ends() {
        let ollama = MockServer::start().await;
        let api = serve(&ollama).await;

        let request = {
            let http = api.http.clone();
            let url = format!("{}/speak", api.base);
            tokio::spawn(async move {
                http.post(url)
                    .json(&json!({"text": "take your time", "wait": true}))
                    .send()
                    .await
                    .unwrap()
                    .json::<Value>()
                    .await
                    .unwrap()
            })
        };

        while api.platform.spoken_texts().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!request.is_finished());

        api.platform.observer(0).finished();
        let body = tokio::time::timeout(Duration::from_secs(5), request)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body["status"], "spoken");
    }
}
