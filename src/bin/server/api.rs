use std::sync::Arc;

use actix_cors::Cors;
use actix_multipart::Multipart;
use actix_web::{
    http::{header, StatusCode},
    web::{self, ServiceConfig},
    HttpRequest, HttpResponse, Responder, ResponseError,
};
use chrono::Utc;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use chartagent::{
    agent::DataPlottingAgent,
    csv_table::{parse_csv, sanitize_for_csv_injection, Table},
    llama::TextCompletion,
    settings::Settings,
    token::{TokenIssuer, TokenStore},
};

use derive_more::derive::{Display, Error};

/// Everything the request handlers share.
pub struct ServerState {
    pub settings: Settings,
    pub issuer: TokenIssuer,
    pub tables: TokenStore<Table>,
    pub agent: Arc<DataPlottingAgent>,
}

impl ServerState {
    pub fn new(settings: Settings, llm: Box<dyn TextCompletion>) -> Self {
        ServerState {
            issuer: TokenIssuer::new(&settings.token),
            tables: TokenStore::new(),
            agent: Arc::new(DataPlottingAgent::new(llm, &settings.agent)),
            settings,
        }
    }
}

/// Configuration for the API services.
pub fn config(cfg: &mut ServiceConfig, settings: &Settings) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(settings.server.max_json_payload)
            .error_handler(|err, req| {
                log::warn!("Rejected JSON body: {err}");
                ErrorResponse::bad_request(req, &err.to_string()).into()
            }),
    );
    cfg.route("/", web::get().to(root));
    cfg.route("/upload-csv/", web::post().to(upload_csv));
    cfg.route("/upload-csv", web::post().to(upload_csv));
    cfg.route("/send-prompt", web::post().to(send_prompt));
}

/// CORS policy for browsers calling from the configured frontends.
pub fn cors(settings: &Settings) -> Cors {
    settings
        .server
        .allowed_origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
        .supports_credentials()
}

#[derive(Serialize, Debug, Display, Error)]
#[display("error response: {status} on {path}")]
struct ErrorResponse {
    status: u16,
    error: String,
    detail: String,
    path: String,
}

impl actix_web::error::ResponseError for ErrorResponse {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self)
    }
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl ErrorResponse {
    fn new(req: &HttpRequest, status: StatusCode, detail: &str) -> ErrorResponse {
        ErrorResponse {
            status: status.as_u16(),
            error: status
                .canonical_reason()
                .unwrap_or("error")
                .to_lowercase(),
            detail: detail.to_string(),
            path: req.path().to_string(),
        }
    }
    fn bad_request(req: &HttpRequest, msg: &str) -> ErrorResponse {
        Self::new(req, StatusCode::BAD_REQUEST, msg)
    }
    fn forbidden(req: &HttpRequest, msg: &str) -> ErrorResponse {
        Self::new(req, StatusCode::FORBIDDEN, msg)
    }
    fn not_found(req: &HttpRequest, msg: &str) -> ErrorResponse {
        Self::new(req, StatusCode::NOT_FOUND, msg)
    }
    fn unprocessable(req: &HttpRequest, msg: &str) -> ErrorResponse {
        Self::new(req, StatusCode::UNPROCESSABLE_ENTITY, msg)
    }
    fn processing_failed(req: &HttpRequest, msg: &str) -> ErrorResponse {
        Self::new(req, StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
    fn internal_server_error(req: &HttpRequest) -> ErrorResponse {
        Self::new(
            req,
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal error, see server log",
        )
    }
}

/// "404: Not found" response for unknown routes.
/// This function is configured in main.rs
pub async fn not_found(req: HttpRequest) -> Result<HttpResponse, actix_web::Error> {
    Ok(ErrorResponse::not_found(&req, "Not Found").error_response())
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

async fn root() -> impl Responder {
    HttpResponse::Ok().json(MessageResponse {
        message: "Hello from the chart agent server!".to_string(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
}

fn size_limit_message(limit: usize) -> String {
    format!(
        "File size exceeds the limit of {} MB.",
        limit.div_ceil(1024 * 1024)
    )
}

/// Upload of a CSV file as the multipart field `file`. The file is parsed,
/// sanitized against formula injection and stored under a freshly issued
/// bearer token.
async fn upload_csv(
    state: web::Data<ServerState>,
    req: HttpRequest,
    mut payload: Multipart,
) -> Result<HttpResponse, actix_web::Error> {
    let limit = state.settings.server.max_upload_bytes;
    let mut contents: Option<Vec<u8>> = None;

    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        log::warn!("Error reading multipart payload: {e}");
        ErrorResponse::bad_request(&req, "bad multipart payload")
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let is_csv = field
            .content_type()
            .map_or(false, |mime| mime.essence_str() == "text/csv");
        if !is_csv {
            log::info!(
                "Rejected upload with content type {:?}",
                field.content_type()
            );
            return Err(ErrorResponse::bad_request(
                &req,
                "Invalid file type. Please upload a CSV file.",
            )
            .into());
        }

        // Checked while streaming so that oversized files are never held in
        // memory completely.
        let mut buf: Vec<u8> = vec![];
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            log::warn!("Error reading uploaded file: {e}");
            ErrorResponse::bad_request(&req, "bad multipart payload")
        })? {
            if buf.len() + chunk.len() > limit {
                log::info!("Rejected upload larger than {limit} bytes");
                return Err(ErrorResponse::bad_request(&req, &size_limit_message(limit)).into());
            }
            buf.extend_from_slice(&chunk);
        }
        contents = Some(buf);
        break;
    }

    let contents = contents.ok_or_else(|| {
        ErrorResponse::unprocessable(&req, "missing multipart field \"file\"")
    })?;

    let table = parse_csv(&contents).map(sanitize_for_csv_injection).map_err(|e| {
        let errmsg = format!("An error occurred during CSV processing: {e}");
        log::error!("{errmsg}");
        ErrorResponse::processing_failed(&req, &errmsg)
    })?;

    let issued = state.issuer.issue().map_err(|e| {
        log::error!("Could not issue token: {e}");
        ErrorResponse::internal_server_error(&req)
    })?;

    log::info!(
        "Stored table with {} columns and {} rows (expires at {})",
        table.columns.len(),
        table.rows.len(),
        issued.claims.exp
    );
    state
        .tables
        .insert(issued.token.clone(), issued.claims.exp, table, Utc::now());

    Ok(HttpResponse::Ok().json(TokenResponse {
        access_token: issued.token,
        token_type: "bearer".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
struct PromptRequest {
    prompt: String,
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
fn bearer_token(req: &HttpRequest) -> Option<&str> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// Runs the plotting agent on the table stored under the bearer token.
async fn send_prompt(
    state: web::Data<ServerState>,
    req: HttpRequest,
    body: web::Json<PromptRequest>,
) -> Result<HttpResponse, actix_web::Error> {
    let token = bearer_token(&req).ok_or_else(|| ErrorResponse::forbidden(&req, "Not authenticated"))?;

    let now = Utc::now();
    let table = state
        .issuer
        .verify(token, now)
        .inspect_err(|e| log::info!("Rejected token: {e}"))
        .ok()
        .and_then(|_| state.tables.get(token, now))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ErrorResponse::not_found(&req, "Token not found or expired"))?;

    let agent = Arc::clone(&state.agent);
    let prompt = body.into_inner().prompt;
    log::info!("Running agent for prompt \"{prompt}\"");

    let response = web::block(move || agent.process_data_and_plot(&table, &prompt))
        .await
        .map_err(|e| {
            log::error!("Agent task failed: {e}");
            ErrorResponse::internal_server_error(&req)
        })?;

    Ok(HttpResponse::Ok().json(response))
}
