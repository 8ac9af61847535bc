use crate::constants::DONE_MARKER;
use crate::engine::TurnEvent;
use crate::registry::SnippetView;
use crate::session::{SessionSettings, SettingsPatch};
use crate::types::*;
use crate::AppState;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    middleware,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::Instrument;
use uuid::Uuid;

const TURN_EVENT_BUFFER: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub prompt: String,
    #[serde(default)]
    pub mode: Option<ChatMode>,
}

#[derive(Debug, Deserialize)]
pub struct SnippetBody {
    pub code: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    let max_body_size = state.args.max_body_size;
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/messages", get(list_messages))
        .route("/api/snippets", get(list_snippets))
        .route(
            "/api/snippets/:id",
            get(get_snippet).put(update_snippet).delete(delete_snippet),
        )
        .route("/api/snippets/:id/download", get(download_snippet))
        .route("/api/export/snippets", get(export_snippets))
        .route("/api/settings", get(get_settings).put(update_settings))
        .route("/api/audio", get(latest_audio))
        .route("/health", get(crate::health::liveness))
        .route("/readyz", get(crate::health::readiness))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(crate::logging::request_span_middleware))
        .with_state(state)
}

/// Starts a turn and streams its progress back as server-sent events.
async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Result<Response> {
    let prompt = body.prompt.trim().to_string();
    if prompt.is_empty() {
        return Err(ChatError::InvalidRequest("prompt must not be empty".into()).into());
    }

    tracing::info!(
        "[🖥️  -> ⚙️ ] Prompt received ({} chars): {}",
        prompt.chars().count(),
        crate::str_utils::log_preview(&prompt, 80)
    );

    let (tx, rx) = mpsc::channel::<TurnEvent>(TURN_EVENT_BUFFER);
    let turn_state = state.clone();
    tokio::spawn(
        async move {
            turn_state
                .chat
                .get_response(&turn_state.session, &turn_state.speech, &prompt, body.mode, &tx)
                .await;
        }
        .in_current_span(),
    );

    let events = ReceiverStream::new(rx)
        .map(|event| Event::default().event(event.name()).json_data(&event))
        .chain(futures_util::stream::once(async {
            Ok::<Event, axum::Error>(Event::default().data(DONE_MARKER))
        }));

    Ok(Sse::new(events)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keepalive"),
        )
        .into_response())
}

async fn list_messages(State(state): State<Arc<AppState>>) -> Json<Vec<ChatMessage>> {
    Json(state.session.messages().await)
}

async fn list_snippets(State(state): State<Arc<AppState>>) -> Json<Vec<SnippetView>> {
    Json(state.session.snippet_views().await)
}

async fn get_snippet(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SnippetView>> {
    let id = SnippetId::from(id);
    match state.session.snippet_view(id).await {
        Some(view) => Ok(Json(view)),
        None => Err(ChatError::UnknownSnippet(id).into()),
    }
}

async fn update_snippet(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<SnippetBody>,
) -> Result<Json<SnippetView>> {
    let view = state.session.update_snippet(id.into(), body.code).await?;
    tracing::info!("Snippet {} updated ({} lines)", view.filename, view.line_count);
    Ok(Json(view))
}

async fn delete_snippet(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    let removed = state.session.delete_snippet(id.into()).await?;
    tracing::info!("Snippet {} deleted", removed.filename);
    Ok(StatusCode::NO_CONTENT)
}

async fn download_snippet(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let id = SnippetId::from(id);
    let snippet = match state.session.snippet(id).await {
        Some(s) => s,
        None => return Err(ChatError::UnknownSnippet(id).into()),
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", snippet.filename),
            ),
        ],
        snippet.raw_code,
    )
        .into_response())
}

async fn export_snippets(State(state): State<Arc<AppState>>) -> Result<Response> {
    let snippets = state.session.all_snippets().await;
    let archive = build_snippet_archive(&snippets)?;
    tracing::info!(
        "Exported {} snippets ({} bytes)",
        snippets.len(),
        archive.len()
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"snippets.zip\"",
            ),
        ],
        archive,
    )
        .into_response())
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Json<SessionSettings> {
    Json(state.session.settings().await)
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<SettingsPatch>,
) -> Json<SessionSettings> {
    Json(state.session.update_settings(patch).await)
}

async fn latest_audio(State(state): State<Arc<AppState>>) -> Result<Response> {
    match state.session.latest_audio().await {
        Some(audio) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "audio/mpeg")],
            audio?,
        )
            .into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "No audio available", "code": "NO_AUDIO" })),
        )
            .into_response()),
    }
}

/// Entry names for an archive; repeats get a numeric prefix (`2_main.py`).
pub fn unique_archive_names(snippets: &[CodeSnippet]) -> Vec<String> {
    let mut used = HashSet::new();
    snippets
        .iter()
        .map(|snippet| {
            let mut name = snippet.filename.clone();
            let mut n = 1;
            while !used.insert(name.clone()) {
                n += 1;
                name = format!("{}_{}", n, snippet.filename);
            }
            name
        })
        .collect()
}

pub fn build_snippet_archive(snippets: &[CodeSnippet]) -> Result<Vec<u8>> {
    let mut zip_buffer = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut zip_buffer));
        let options = zip::write::FileOptions::default();

        for (snippet, name) in snippets.iter().zip(unique_archive_names(snippets)) {
            zip.start_file(name, options).map_err(archive_error)?;
            zip.write_all(snippet.raw_code.as_bytes())?;
        }
        zip.finish().map_err(archive_error)?;
    }
    Ok(zip_buffer)
}

fn archive_error(e: zip::result::ZipError) -> ChatError {
    ChatError::Io(std::io::Error::other(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snippet(filename: &str, code: &str) -> CodeSnippet {
        CodeSnippet {
            id: SnippetId::new(),
            raw_code: code.to_string(),
            language: Language::Python,
            filename: filename.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_duplicate_names_get_prefix() {
        let snippets = vec![
            snippet("main.py", "a"),
            snippet("main.py", "b"),
            snippet("util.py", "c"),
            snippet("main.py", "d"),
        ];
        assert_eq!(
            unique_archive_names(&snippets),
            vec!["main.py", "2_main.py", "util.py", "3_main.py"]
        );
    }

    #[test]
    fn test_archive_contains_every_snippet() {
        use std::io::Read;

        let snippets = vec![snippet("main.py", "print(1)"), snippet("main.py", "print(2)")];
        let bytes = match build_snippet_archive(&snippets) {
            Ok(b) => b,
            Err(e) => panic!("archive failed: {}", e),
        };
        let mut archive = match zip::ZipArchive::new(std::io::Cursor::new(bytes)) {
            Ok(a) => a,
            Err(e) => panic!("archive unreadable: {}", e),
        };
        assert_eq!(archive.len(), 2);

        let mut second = String::new();
        match archive.by_name("2_main.py") {
            Ok(mut file) => {
                assert!(file.read_to_string(&mut second).is_ok());
            }
            Err(e) => panic!("missing entry: {}", e),
        }
        assert_eq!(second, "print(2)");
    }
}
