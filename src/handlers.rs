use actix_web::http::StatusCode;
use actix_web::{HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

use crate::app_config::{AppConfigManager, AppSettings};
use crate::errors::ClientError;
use crate::models::{PricingTier, RegistrationForm};
use crate::prompt_store::PromptStore;
use crate::session::Session;
use crate::workflow::{FormBundle, WorkflowStep};

// AppState shared by every API handler
pub struct AppState {
    pub session: Arc<Session>,
    pub config_manager: Arc<AppConfigManager>,
    pub prompt_store: Arc<PromptStore>,
}

// Request body for sending a prompt
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
}

// Query string of `GET /models`, e.g. `?tier=free`
#[derive(Debug, Deserialize)]
pub struct ModelsQuery {
    #[serde(default)]
    pub tier: Option<PricingTier>,
}

// Request body naming a single model
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRequest {
    pub model_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteResponse {
    pub model_id: String,
    pub is_favorite: bool,
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct EffectivenessRequest {
    pub score: f64,
}

pub fn status_for(error: &ClientError) -> StatusCode {
    match error {
        ClientError::Validation { .. } | ClientError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ClientError::Forbidden(_) => StatusCode::FORBIDDEN,
        ClientError::NotFound(_) => StatusCode::NOT_FOUND,
        ClientError::InvalidState(_) | ClientError::PrerequisiteMissing { .. } => StatusCode::CONFLICT,
        ClientError::Transport(_) | ClientError::Http { .. } | ClientError::MalformedResponse(_) => {
            StatusCode::BAD_GATEWAY
        }
        ClientError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        ClientError::Storage(_) | ClientError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// Render an error as inline feedback for the UI
pub fn error_response(e: ClientError) -> HttpResponse {
    let status = status_for(&e);
    if status.is_server_error() {
        error!("Request failed: {}", e);
    }

    let mut body = json!({ "error": e.user_message() });
    match &e {
        ClientError::Validation { missing } => body["missing"] = json!(missing),
        ClientError::Forbidden(details) => body["forbidden"] = json!(details),
        ClientError::PrerequisiteMissing { step } => body["step"] = json!(step),
        _ => {}
    }
    HttpResponse::build(status).json(body)
}

fn respond<T: Serialize>(result: Result<T, ClientError>) -> HttpResponse {
    match result {
        Ok(value) => HttpResponse::Ok().json(value),
        Err(e) => error_response(e),
    }
}

// ---- Models ----

pub async fn get_models_handler(data: web::Data<AppState>, query: web::Query<ModelsQuery>) -> impl Responder {
    HttpResponse::Ok().json(data.session.catalog_view(query.tier))
}

pub async fn refresh_models_handler(data: web::Data<AppState>) -> impl Responder {
    data.session.refresh_models().await;
    HttpResponse::Ok().json(data.session.catalog_view(None))
}

pub async fn toggle_favorite_handler(data: web::Data<AppState>, request: web::Json<ModelRequest>) -> impl Responder {
    let model_id = request.into_inner().model_id;
    respond(data.session.toggle_favorite(&model_id).map(|is_favorite| FavoriteResponse {
        model_id,
        is_favorite,
    }))
}

pub async fn select_model_handler(data: web::Data<AppState>, request: web::Json<ModelRequest>) -> impl Responder {
    respond(data.session.select_model(&request.model_id))
}

// ---- Chat ----

pub async fn chat_handler(data: web::Data<AppState>, request: web::Json<ChatRequest>) -> impl Responder {
    let request = request.into_inner();
    respond(data.session.send_prompt(&request.prompt, request.model.as_deref()).await)
}

pub async fn history_handler(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.session.history())
}

// ---- Access ----

pub async fn get_access_handler(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.session.access_view())
}

pub async fn register_handler(data: web::Data<AppState>, form: web::Json<RegistrationForm>) -> impl Responder {
    respond(data.session.register(form.into_inner()).await)
}

pub async fn password_handler(data: web::Data<AppState>, request: web::Json<PasswordRequest>) -> impl Responder {
    respond(data.session.submit_password(&request.password).await)
}

pub async fn sign_out_handler(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.session.sign_out())
}

// ---- Workflow ----

pub async fn get_workflow_handler(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.session.workflow_view())
}

pub async fn submit_step_handler(
    data: web::Data<AppState>,
    path: web::Path<String>,
    form: web::Json<FormBundle>,
) -> impl Responder {
    let result = path
        .parse::<WorkflowStep>()
        .and_then(|step| data.session.submit_step(step, form.into_inner()));
    respond(result)
}

pub async fn navigate_handler(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    respond(path.parse::<WorkflowStep>().and_then(|step| data.session.navigate(step)))
}

pub async fn reset_workflow_handler(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.session.reset_workflow())
}

pub async fn report_handler(data: web::Data<AppState>) -> impl Responder {
    respond(data.session.generate_report().await)
}

pub async fn preview_handler(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.session.preview())
}

// ---- Prompt store ----

pub async fn get_prompts_handler(data: web::Data<AppState>) -> impl Responder {
    respond(data.prompt_store.fetch_prompts().await)
}

pub async fn get_prompt_handler(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    let result = data
        .prompt_store
        .fetch_prompt_by_id(&id)
        .await
        .and_then(|prompt| prompt.ok_or_else(|| ClientError::NotFound(format!("prompt {}", id))));
    respond(result)
}

pub async fn prompt_usage_handler(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    respond(data.prompt_store.increment_prompt_usage(&path).await)
}

pub async fn prompt_effectiveness_handler(
    data: web::Data<AppState>,
    path: web::Path<String>,
    request: web::Json<EffectivenessRequest>,
) -> impl Responder {
    respond(data.prompt_store.update_prompt_effectiveness(&path, request.score).await)
}

// ---- Settings ----

pub async fn get_settings_handler(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.session.settings())
}

pub async fn update_settings_handler(data: web::Data<AppState>, settings: web::Json<AppSettings>) -> impl Responder {
    let settings = settings.into_inner();
    match data.config_manager.save_config(&settings) {
        Ok(_) => {
            info!("Settings updated");
            data.session.apply_settings(settings.clone());
            HttpResponse::Ok().json(settings)
        }
        Err(e) => error_response(ClientError::Storage(e)),
    }
}

// Routes mounted under `/api`
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/models", web::get().to(get_models_handler))
        .route("/models/refresh", web::post().to(refresh_models_handler))
        .route("/models/favorite", web::post().to(toggle_favorite_handler))
        .route("/models/select", web::post().to(select_model_handler))
        .route("/chat", web::post().to(chat_handler))
        .route("/history", web::get().to(history_handler))
        .route("/access", web::get().to(get_access_handler))
        .route("/access/register", web::post().to(register_handler))
        .route("/access/password", web::post().to(password_handler))
        .route("/access/sign-out", web::post().to(sign_out_handler))
        .route("/workflow", web::get().to(get_workflow_handler))
        .route("/workflow/reset", web::post().to(reset_workflow_handler))
        .route("/workflow/report", web::post().to(report_handler))
        .route("/workflow/steps/{step}", web::post().to(submit_step_handler))
        .route("/workflow/current/{step}", web::post().to(navigate_handler))
        .route("/preview", web::get().to(preview_handler))
        .route("/prompts", web::get().to(get_prompts_handler))
        .route("/prompts/{id}", web::get().to(get_prompt_handler))
        .route("/prompts/{id}/usage", web::post().to(prompt_usage_handler))
        .route("/prompts/{id}/effectiveness", web::put().to(prompt_effectiveness_handler))
        .route("/settings", web::get().to(get_settings_handler))
        .route("/settings", web::put().to(update_settings_handler));
}
