use crate::app::{CardControl, CardEvent, Dispatch};
use crate::cards::{CardView, LEVEL_LABEL};
use crate::filter::{FilterState, KnownFilter, LevelFilter};
use crate::speech::PlaybackRate;
use crate::store::{PersistenceError, UserId};
use crate::{AppConfig, DataLoadError, LocalApp, WordId};
use askama::Template;
use axum::{
    Form, Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use parking_lot::Mutex;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info};

type SharedState = Arc<AppState>;
const FAILURE_HEADING: &str = "אופס! קרתה שגיאה";

pub struct AppState {
    pub theme: WebTheme,
    pub base_url: String,
    config: AppConfig,
    session: Session,
    alert: Mutex<Option<String>>,
}

enum Session {
    Ready(Mutex<LocalApp>),
    Failed(String),
}

impl AppState {
    /// Wraps a loaded application, or remembers why loading failed so every
    /// page can show the failure state.
    pub fn new(app: Result<LocalApp, DataLoadError>, config: AppConfig, web: &WebConfig) -> Self {
        let session = match app {
            Ok(app) => Session::Ready(Mutex::new(app)),
            Err(err) => {
                error!(error = %err, "word data unavailable, serving failure page");
                Session::Failed(err.to_string())
            }
        };
        Self {
            theme: web.theme,
            base_url: web.base_url.clone(),
            config,
            session,
            alert: Mutex::new(None),
        }
    }

    fn app(&self) -> Result<&Mutex<LocalApp>, ApiError> {
        match &self.session {
            Session::Ready(app) => Ok(app),
            Session::Failed(_) => Err(ApiError::unavailable(
                "Word data failed to load; reload once the data files are fixed.",
            )),
        }
    }

    fn raise_alert(&self, err: &PersistenceError) {
        *self.alert.lock() = Some(format!(
            "Your progress could not be saved. Storage may be full. ({err})"
        ));
    }

    fn take_alert(&self) -> Option<String> {
        self.alert.lock().take()
    }

    fn user_options(&self, active: &UserId) -> Vec<SelectOption> {
        self.config
            .user_options(active)
            .into_iter()
            .map(|user| SelectOption {
                selected: &user == active,
                value: user.as_str().to_string(),
                label: user.as_str().to_string(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum WebTheme {
    #[default]
    Tailwind,
    Bootstrap,
}

impl fmt::Display for WebTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebTheme::Tailwind => write!(f, "tailwind"),
            WebTheme::Bootstrap => write!(f, "bootstrap"),
        }
    }
}

impl std::str::FromStr for WebTheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tailwind" => Ok(WebTheme::Tailwind),
            "bootstrap" => Ok(WebTheme::Bootstrap),
            other => Err(format!("unknown theme {other:?} (expected tailwind or bootstrap)")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Chrome {
    use_tailwind: bool,
    use_bootstrap: bool,
    body_class: &'static str,
    main_class: &'static str,
    container_class: &'static str,
    eyebrow_class: &'static str,
    headline_class: &'static str,
    lede_class: &'static str,
    toolbar_class: &'static str,
    select_class: &'static str,
    button_class: &'static str,
    grid_class: &'static str,
    card_class: &'static str,
    known_card_class: &'static str,
    badge_class: &'static str,
    alert_class: &'static str,
}

impl Chrome {
    fn new(theme: WebTheme) -> Self {
        match theme {
            WebTheme::Tailwind => Self {
                use_tailwind: true,
                use_bootstrap: false,
                body_class: "bg-slate-50 text-slate-900",
                main_class: "min-h-screen flex flex-col items-center justify-start py-10 px-4",
                container_class: "max-w-6xl w-full space-y-6",
                eyebrow_class: "uppercase tracking-wide text-sm text-slate-500",
                headline_class: "text-4xl font-extrabold tracking-tight",
                lede_class: "text-lg text-slate-600",
                toolbar_class: "flex flex-wrap items-end gap-4",
                select_class: "rounded-md border border-slate-300 bg-white px-3 py-2",
                button_class: "inline-flex items-center rounded-md bg-slate-900 px-3 py-1 text-white font-semibold shadow hover:bg-slate-800 transition-colors",
                grid_class: "grid gap-4 sm:grid-cols-2 lg:grid-cols-3",
                card_class: "bg-white shadow rounded p-4 space-y-2",
                known_card_class: "bg-emerald-50 shadow rounded p-4 space-y-2 ring-2 ring-emerald-400",
                badge_class: "px-2 py-1 rounded-full bg-slate-200 text-xs font-semibold",
                alert_class: "rounded-md bg-amber-100 border border-amber-300 px-4 py-3 text-amber-900",
            },
            WebTheme::Bootstrap => Self {
                use_tailwind: false,
                use_bootstrap: true,
                body_class: "bg-light text-dark",
                main_class: "container py-5",
                container_class: "mx-auto col-lg-11",
                eyebrow_class: "text-uppercase text-muted mb-2",
                headline_class: "display-5 fw-bold",
                lede_class: "lead mb-4",
                toolbar_class: "d-flex flex-wrap align-items-end gap-3 mb-4",
                select_class: "form-select",
                button_class: "btn btn-outline-primary btn-sm",
                grid_class: "row row-cols-1 row-cols-md-2 row-cols-lg-3 g-3",
                card_class: "col card card-body",
                known_card_class: "col card card-body border-success",
                badge_class: "badge bg-secondary",
                alert_class: "alert alert-warning",
            },
        }
    }
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub theme: WebTheme,
    pub base_url: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            theme: WebTheme::default(),
            base_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WebError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn serve(config: WebConfig, state: AppState) -> Result<(), WebError> {
    let router = build_router(Arc::new(state));
    info!(
        %config.addr,
        theme = ?config.theme,
        base = %config.base_url,
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/cards", post(card_action))
        .route("/user", post(change_user))
        .route("/rate", post(change_rate))
        .route("/api/cards", get(api_cards).post(api_card_action))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    let status = match state.session {
        Session::Ready(_) => "ok",
        Session::Failed(_) => "degraded",
    };
    Json(json!({ "status": status, "service": "wordcards-web" }))
}

#[derive(Debug, Default, Deserialize)]
struct ViewParams {
    level: Option<String>,
    known: Option<String>,
}

impl ViewParams {
    fn filter(&self) -> Result<FilterState, ApiError> {
        let level = self
            .level
            .as_deref()
            .unwrap_or_default()
            .parse::<LevelFilter>()
            .unwrap_or_default();
        let known = self
            .known
            .as_deref()
            .unwrap_or_default()
            .parse::<KnownFilter>()
            .map_err(|err| ApiError::bad_request(err.to_string()))?;
        Ok(FilterState::new(level, known))
    }
}

#[derive(Debug, Deserialize)]
struct CardForm {
    event: Option<String>,
    #[serde(flatten)]
    view: ViewParams,
}

#[derive(Debug, Deserialize)]
struct UserForm {
    user: String,
    #[serde(flatten)]
    view: ViewParams,
}

#[derive(Debug, Deserialize)]
struct RateForm {
    rate: String,
    #[serde(flatten)]
    view: ViewParams,
}

#[derive(Debug, Clone)]
struct SelectOption {
    value: String,
    label: String,
    selected: bool,
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>{{ title }}</title>
    {% if chrome.use_tailwind %}
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
    {% endif %}
    {% if chrome.use_bootstrap %}
    <link href="https://cdn.jsdelivr.net/npm/bootstrap@5.3.8/dist/css/bootstrap.min.css" rel="stylesheet" integrity="sha384-sRIl4kxILFvY47J16cr9ZwB07vP4J8+LH7qKQnuqkuIAvNWLzeN8tE5YBujZqJLB" crossorigin="anonymous">
    {% endif %}
    <link rel="canonical" href="{{ base_url }}/">
  </head>
  <body class="{{ chrome.body_class }}">
    <main class="{{ chrome.main_class }}">
      <div class="{{ chrome.container_class }}">
        <div>
          <p class="{{ chrome.eyebrow_class }}">{{ known_count }} of {{ total }} words known · {{ user }}</p>
          <h1 id="main-title" class="{{ chrome.headline_class }}">{{ title }}</h1>
          <p id="main-description" class="{{ chrome.lede_class }}">{{ description }}</p>
        </div>

        {% if !alert.is_empty() %}
        <div role="alert" class="{{ chrome.alert_class }}">{{ alert }}</div>
        {% endif %}

        <div class="{{ chrome.toolbar_class }}">
          <form method="post" action="/user" class="{{ chrome.toolbar_class }}">
            <input type="hidden" name="level" value="{{ level }}">
            <input type="hidden" name="known" value="{{ known }}">
            <label>User
              <select id="user-select" name="user" class="{{ chrome.select_class }}">
                {% for option in users %}
                <option value="{{ option.value }}"{% if option.selected %} selected{% endif %}>{{ option.label }}</option>
                {% endfor %}
              </select>
            </label>
            <button type="submit" class="{{ chrome.button_class }}">Switch</button>
          </form>

          <form method="get" action="/" class="{{ chrome.toolbar_class }}">
            <label>רמה
              <select id="level-filter" name="level" class="{{ chrome.select_class }}">
                {% for option in levels %}
                <option value="{{ option.value }}"{% if option.selected %} selected{% endif %}>{{ option.label }}</option>
                {% endfor %}
              </select>
            </label>
            <label>Status
              <select id="known-filter" name="known" class="{{ chrome.select_class }}">
                {% for option in statuses %}
                <option value="{{ option.value }}"{% if option.selected %} selected{% endif %}>{{ option.label }}</option>
                {% endfor %}
              </select>
            </label>
            <button type="submit" class="{{ chrome.button_class }}">Filter</button>
          </form>

          <form method="post" action="/rate" class="{{ chrome.toolbar_class }}">
            <input type="hidden" name="level" value="{{ level }}">
            <input type="hidden" name="known" value="{{ known }}">
            <label>Speed
              <input id="rate-control" type="range" name="rate" min="0.5" max="1.5" step="0.1" value="{{ rate }}">
            </label>
            <button type="submit" class="{{ chrome.button_class }}">Set</button>
          </form>
        </div>

        <form id="word-grid" method="post" action="/cards" class="{{ chrome.grid_class }}">
          <input type="hidden" name="level" value="{{ level }}">
          <input type="hidden" name="known" value="{{ known }}">
          {% for card in cards %}
          <div id="card-{{ card.word_id }}" data-word-id="{{ card.word_id }}" class="word-card{% if card.known %} known {{ chrome.known_card_class }}{% else %} {{ chrome.card_class }}{% endif %}">
            <h2 class="text-2xl font-bold flex items-center gap-2">
              <span class="word-text">{{ card.word }}</span>
              <button type="submit" name="event" value="{{ card.word_id }}:speak" class="speak-button" title="Play the word">🔊</button>
              <span class="word-level {{ chrome.badge_class }}">{{ card.level_badge }}</span>
            </h2>
            <p class="meaning">{{ card.meaning }}</p>
            <p class="example text-slate-500 italic">"{{ card.example }}"</p>
            <div class="card-actions flex gap-2 d-flex">
              <button type="submit" name="event" value="{{ card.word_id }}:toggle_known" class="known-button {{ chrome.button_class }}">{{ card.toggle_label }}</button>
              <button type="submit" name="event" value="{{ card.word_id }}:lookup" formtarget="_blank" class="youglish-button {{ chrome.button_class }}">▶️ YouGlish</button>
            </div>
          </div>
          {% endfor %}
          {% if cards.len() == 0 %}
          <p class="{{ chrome.lede_class }}">No words match these filters.</p>
          {% endif %}
        </form>
      </div>
    </main>
  </body>
</html>"#,
    ext = "html"
)]
struct HomeTemplate {
    chrome: Chrome,
    base_url: String,
    title: String,
    description: String,
    user: String,
    known_count: usize,
    total: usize,
    alert: String,
    users: Vec<SelectOption>,
    levels: Vec<SelectOption>,
    statuses: Vec<SelectOption>,
    level: String,
    known: String,
    rate: String,
    cards: Vec<CardView>,
}

async fn home(State(state): State<SharedState>, Query(params): Query<ViewParams>) -> Html<String> {
    let app = match &state.session {
        Session::Ready(app) => app,
        Session::Failed(reason) => {
            return Html(render_error_page(state.theme, FAILURE_HEADING, reason));
        }
    };
    let filter = match params.filter() {
        Ok(filter) => filter,
        Err(err) => return Html(render_error_page(state.theme, "Invalid filter", &err.message)),
    };
    let alert = state.take_alert().unwrap_or_default();
    let app = app.lock();
    let level_value = filter.level.to_string();
    let mut levels = vec![SelectOption {
        value: "all".to_string(),
        label: "All levels".to_string(),
        selected: filter.level == LevelFilter::All,
    }];
    levels.extend(app.words().levels().into_iter().map(|label| SelectOption {
        selected: label == level_value,
        label: format!("{LEVEL_LABEL} {label}"),
        value: label,
    }));
    let statuses = [
        (KnownFilter::All, "All words"),
        (KnownFilter::New, "New words"),
        (KnownFilter::Known, "Known words"),
    ]
    .into_iter()
    .map(|(status, label)| SelectOption {
        value: status.as_str().to_string(),
        label: label.to_string(),
        selected: status == filter.known,
    })
    .collect();
    let template = HomeTemplate {
        chrome: Chrome::new(state.theme),
        base_url: state.base_url.clone(),
        title: app.header().external_name.clone(),
        description: app.header().description_header_content.clone(),
        user: app.user().to_string(),
        known_count: app.known_count(),
        total: app.words().len(),
        alert,
        users: state.user_options(app.user()),
        levels,
        statuses,
        level: level_value,
        known: filter.known.to_string(),
        rate: format!("{:.1}", app.rate().get()),
        cards: app.cards(&filter),
    };
    Html(
        template
            .render()
            .unwrap_or_else(|err| render_error_page(state.theme, FAILURE_HEADING, &err.to_string())),
    )
}

/// Every card button posts here; its `event` value names the card and the
/// control as `<word id>:<control>`.
async fn card_action(
    State(state): State<SharedState>,
    Form(form): Form<CardForm>,
) -> Result<Response, ApiError> {
    let event = parse_card_event(form.event.as_deref());
    let back = view_path(&form.view);
    let dispatch = state.app()?.lock().dispatch(event);
    let response = match dispatch {
        Dispatch::Toggled(outcome) => {
            if let Some(err) = &outcome.warning {
                state.raise_alert(err);
            }
            Redirect::to(&format!("{back}#card-{}", outcome.word_id)).into_response()
        }
        Dispatch::OpenLookup { url, .. } => Redirect::to(&url).into_response(),
        Dispatch::Spoke { .. } | Dispatch::Ignored => Redirect::to(&back).into_response(),
    };
    Ok(response)
}

async fn change_user(
    State(state): State<SharedState>,
    Form(form): Form<UserForm>,
) -> Result<Redirect, ApiError> {
    let user = UserId::new(&form.user).ok_or_else(|| ApiError::bad_request("User name is required"))?;
    if let Some(err) = state.app()?.lock().switch_user(user) {
        state.raise_alert(&err);
    }
    Ok(Redirect::to(&view_path(&form.view)))
}

async fn change_rate(
    State(state): State<SharedState>,
    Form(form): Form<RateForm>,
) -> Result<Redirect, ApiError> {
    let rate: f32 = form
        .rate
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid rate {:?}", form.rate)))?;
    state.app()?.lock().set_rate(PlaybackRate::new(rate));
    Ok(Redirect::to(&view_path(&form.view)))
}

#[derive(Debug, Serialize, Deserialize)]
struct CardsPayload {
    user: String,
    level: String,
    known: String,
    total: usize,
    known_count: usize,
    cards: Vec<CardPayload>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CardPayload {
    word_id: WordId,
    word: String,
    level: String,
    meaning: String,
    example: String,
    known: bool,
    lookup_url: String,
}

impl From<CardView> for CardPayload {
    fn from(card: CardView) -> Self {
        Self {
            word_id: card.word_id,
            word: card.word,
            level: card.level,
            meaning: card.meaning,
            example: card.example,
            known: card.known,
            lookup_url: card.lookup_url,
        }
    }
}

async fn api_cards(
    State(state): State<SharedState>,
    Query(params): Query<ViewParams>,
) -> Result<Json<CardsPayload>, ApiError> {
    let filter = params.filter()?;
    let app = state.app()?.lock();
    Ok(Json(CardsPayload {
        user: app.user().to_string(),
        level: filter.level.to_string(),
        known: filter.known.to_string(),
        total: app.words().len(),
        known_count: app.known_count(),
        cards: app.cards(&filter).into_iter().map(CardPayload::from).collect(),
    }))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DispatchPayload {
    action: String,
    word_id: Option<WordId>,
    word: Option<String>,
    known: Option<bool>,
    toggle_label: Option<String>,
    started: Option<bool>,
    url: Option<String>,
    warning: Option<String>,
}

impl From<Dispatch> for DispatchPayload {
    fn from(dispatch: Dispatch) -> Self {
        match dispatch {
            Dispatch::Toggled(outcome) => Self {
                action: "toggled".to_string(),
                word_id: Some(outcome.word_id),
                known: Some(outcome.known),
                toggle_label: Some(outcome.toggle_label.to_string()),
                warning: outcome.warning.map(|err| err.to_string()),
                ..Self::default()
            },
            Dispatch::Spoke { word, started } => Self {
                action: "spoke".to_string(),
                word: Some(word),
                started: Some(started),
                ..Self::default()
            },
            Dispatch::OpenLookup { word, url } => Self {
                action: "open_lookup".to_string(),
                word: Some(word),
                url: Some(url),
                ..Self::default()
            },
            Dispatch::Ignored => Self {
                action: "ignored".to_string(),
                ..Self::default()
            },
        }
    }
}

async fn api_card_action(
    State(state): State<SharedState>,
    Json(event): Json<CardEvent>,
) -> Result<Json<DispatchPayload>, ApiError> {
    let dispatch = state.app()?.lock().dispatch(event);
    Ok(Json(DispatchPayload::from(dispatch)))
}

fn parse_card_event(raw: Option<&str>) -> CardEvent {
    let Some(raw) = raw else {
        return CardEvent::default();
    };
    let (card, control) = raw.split_once(':').unwrap_or((raw, ""));
    CardEvent {
        card: card.trim().parse().ok(),
        control: control.parse::<CardControl>().ok(),
    }
}

fn view_path(view: &ViewParams) -> String {
    let level = view.level.as_deref().unwrap_or("all");
    let known = view.known.as_deref().unwrap_or("all");
    format!(
        "/?level={}&known={}",
        encode_component(level),
        encode_component(known)
    )
}

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Word cards • Error</title>
    {% if chrome.use_tailwind %}
    <script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4"></script>
    {% endif %}
    {% if chrome.use_bootstrap %}
    <link href="https://cdn.jsdelivr.net/npm/bootstrap@5.3.8/dist/css/bootstrap.min.css" rel="stylesheet" integrity="sha384-sRIl4kxILFvY47J16cr9ZwB07vP4J8+LH7qKQnuqkuIAvNWLzeN8tE5YBujZqJLB" crossorigin="anonymous">
    {% endif %}
  </head>
  <body class="{{ chrome.body_class }}">
    <main class="{{ chrome.main_class }}">
      <div class="{{ chrome.container_class }}">
        <h1 id="main-title" class="{{ chrome.headline_class }}">{{ heading }}</h1>
        <p class="{{ chrome.lede_class }}">{{ message }}</p>
      </div>
    </main>
  </body>
</html>"#,
    ext = "html"
)]
struct ErrorTemplate<'a> {
    chrome: Chrome,
    heading: &'a str,
    message: &'a str,
}

fn render_error_page(theme: WebTheme, heading: &str, message: &str) -> String {
    let template = ErrorTemplate {
        chrome: Chrome::new(theme),
        heading,
        message,
    };
    template.render().unwrap_or_else(|err| {
        error!(error = %err, "error page failed to render");
        FAILURE_HEADING.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::MARK_NEW_LABEL;
    use crate::loader::testing::catalog;
    use crate::speech::testing::RecordingSpeaker;
    use crate::speech::{SpeechController, VoicePreferences};
    use crate::store::{MemoryStore, UserStateStore};
    use crate::{DynSpeaker, DynStore, FlashcardApp};
    use axum::{body, body::Body, http::Request};
    use tower::ServiceExt;

    fn test_app(store: MemoryStore, speaker: RecordingSpeaker) -> LocalApp {
        let store: DynStore = Box::new(store);
        let speaker: DynSpeaker = Box::new(speaker);
        FlashcardApp::new(
            catalog(),
            UserStateStore::new(store),
            SpeechController::new(speaker, VoicePreferences::default()),
        )
    }


    fn test_state(store: MemoryStore, speaker: RecordingSpeaker) -> SharedState {
        Arc::new(AppState::new(
            Ok(test_app(store, speaker)),
            AppConfig::default(),
            &WebConfig::default(),
        ))
    }

    fn test_router() -> Router {
        build_router(test_state(MemoryStore::new(), RecordingSpeaker::default()))
    }

    async fn body_text(response: Response) -> String {
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn form_post(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn location(response: &Response) -> String {
        response.headers()["location"].to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn home_renders_header_and_cards() {
        let response = test_router()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success());
        let html = body_text(response).await;
        assert!(html.contains("Word Trainer"));
        assert!(html.contains("Practice every day."));
        assert!(html.contains("data-word-id=\"1\""));
        assert!(html.contains("data-word-id=\"3\""));
        assert!(html.contains("1:toggle_known"));
        assert!(html.contains("אני יודע"));
        assert!(!html.contains(MARK_NEW_LABEL));
        assert!(html.contains("רמה 1"));
    }

    #[tokio::test]
    async fn home_applies_level_filter() {
        let response = test_router()
            .oneshot(Request::get("/?level=1&known=all").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let html = body_text(response).await;
        assert!(html.contains("data-word-id=\"1\""));
        assert!(!html.contains("data-word-id=\"2\""));
    }

    #[tokio::test]
    async fn invalid_status_filter_renders_error() {
        let response = test_router()
            .oneshot(Request::get("/?known=maybe").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let html = body_text(response).await;
        assert!(html.contains("Invalid filter"));
        assert!(html.contains("&quot;maybe&quot;"));
    }

    #[tokio::test]
    async fn toggle_action_marks_card_known() {
        let state = test_state(MemoryStore::new(), RecordingSpeaker::default());
        let router = build_router(state.clone());
        let response = router
            .clone()
            .oneshot(form_post("/cards", "event=2%3Atoggle_known&level=all&known=all"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/?level=all&known=all#card-2");

        let response = router
            .oneshot(Request::get("/?known=known").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let html = body_text(response).await;
        assert!(html.contains("data-word-id=\"2\""));
        assert!(!html.contains("data-word-id=\"1\""));
        assert!(html.contains(MARK_NEW_LABEL));
    }

    #[tokio::test]
    async fn failed_save_shows_alert_once() {
        let state = test_state(MemoryStore::with_quota(4), RecordingSpeaker::default());
        let router = build_router(state);
        let response = router
            .clone()
            .oneshot(form_post("/cards", "event=1%3Atoggle_known"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let first = body_text(
            router
                .clone()
                .oneshot(Request::get("/").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert!(first.contains("role=\"alert\""));
        assert!(first.contains(MARK_NEW_LABEL), "toggle stays applied");

        let second = body_text(
            router
                .oneshot(Request::get("/").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert!(!second.contains("role=\"alert\""));
    }

    #[tokio::test]
    async fn lookup_action_redirects_to_youglish() {
        let response = test_router()
            .oneshot(form_post("/cards", "event=3%3Alookup"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            location(&response),
            "https://youglish.com/pronounce/castle/english"
        );
    }

    #[tokio::test]
    async fn speak_action_uses_current_rate() {
        let speaker = RecordingSpeaker::default();
        let log = speaker.log.clone();
        let router = build_router(test_state(MemoryStore::new(), speaker));
        router
            .clone()
            .oneshot(form_post("/rate", "rate=1.3"))
            .await
            .unwrap();
        let response = router
            .oneshot(form_post("/cards", "event=1%3Aspeak"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let log = log.lock();
        assert_eq!(log.spoken.len(), 1);
        assert_eq!(log.spoken[0].text, "apple");
        assert!((log.spoken[0].rate - 1.3).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn activation_outside_control_is_ignored() {
        let state = test_state(MemoryStore::new(), RecordingSpeaker::default());
        let router = build_router(state.clone());
        let response = router
            .oneshot(form_post("/cards", "event=1%3Awiggle&level=2"))
            .await
            .unwrap();
        assert_eq!(location(&response), "/?level=2&known=all");
        let app = state.app().unwrap().lock();
        assert!(app.known().is_empty());
    }

    #[tokio::test]
    async fn switching_user_isolates_known_words() {
        let state = test_state(MemoryStore::new(), RecordingSpeaker::default());
        let router = build_router(state.clone());
        router
            .clone()
            .oneshot(form_post("/cards", "event=1%3Atoggle_known"))
            .await
            .unwrap();
        let response = router
            .clone()
            .oneshot(form_post("/user", "user=user2&level=all&known=known"))
            .await
            .unwrap();
        assert_eq!(location(&response), "/?level=all&known=known");
        {
            let app = state.app().unwrap().lock();
            assert_eq!(app.user().as_str(), "user2");
            assert!(app.known().is_empty());
        }
        router
            .oneshot(form_post("/user", "user=user1"))
            .await
            .unwrap();
        assert!(state.app().unwrap().lock().known().contains(1));
    }

    #[tokio::test]
    async fn api_cards_filters_by_status() {
        let router = test_router();
        let response = router
            .clone()
            .oneshot(
                Request::post("/api/cards")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"card": 3, "control": "toggle_known"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let payload: DispatchPayload = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(payload.action, "toggled");
        assert_eq!(payload.known, Some(true));

        let response = router
            .oneshot(Request::get("/api/cards?known=new").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success());
        let payload: CardsPayload = serde_json::from_str(&body_text(response).await).unwrap();
        let ids: Vec<_> = payload.cards.iter().map(|card| card.word_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(payload.known_count, 1);
    }

    #[tokio::test]
    async fn api_ignores_event_without_card() {
        let response = test_router()
            .oneshot(
                Request::post("/api/cards")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"card": null, "control": "speak"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let payload: DispatchPayload = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(payload.action, "ignored");
    }

    #[tokio::test]
    async fn load_failure_degrades_to_error_page() {
        let err = DataLoadError::Fetch {
            resource: "gameWords.json".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        let state = Arc::new(AppState::new(Err(err), AppConfig::default(), &WebConfig::default()));
        let router = build_router(state);
        let html = body_text(
            router
                .clone()
                .oneshot(Request::get("/").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert!(html.contains(FAILURE_HEADING));
        assert!(!html.contains("word-grid"));

        let response = router
            .oneshot(form_post("/cards", "event=1%3Atoggle_known"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn error_page_escapes_message_markup() {
        let html = render_error_page(WebTheme::Bootstrap, FAILURE_HEADING, "bad <b>\"input\"</b> & more");
        assert!(html.contains(FAILURE_HEADING));
        assert!(html.contains("bootstrap.min.css"));
        assert!(!html.contains("<b>"));
        assert!(html.contains("&lt;b&gt;"));
        assert!(html.contains("&amp; more"));
    }

    #[test]
    fn card_event_parsing_tolerates_garbage() {
        assert_eq!(
            parse_card_event(Some("7:speak")),
            CardEvent::new(7, CardControl::Speak)
        );
        assert_eq!(
            parse_card_event(Some("x:speak")),
            CardEvent {
                card: None,
                control: Some(CardControl::Speak)
            }
        );
        assert_eq!(parse_card_event(Some("7")).control, None);
        assert_eq!(parse_card_event(None), CardEvent::default());
    }
}
