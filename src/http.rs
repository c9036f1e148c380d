use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::CONTENT_TYPE;
use actix_web::http::StatusCode;
use actix_web::{web, Error, HttpRequest, HttpResponse, Result};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::admission::{ConcurrencyGate, RateLimiter};
use crate::catalog::Catalog;
use crate::config::Settings;
use crate::error::{classification_message, classify, ErrorType};
use crate::executor::{ExecutionBackend, ExecutionRequest};
use crate::screen::Screener;

/// Shared state for the HTTP surface.
pub struct AppState {
    pub settings: Settings,
    pub catalog: Catalog,
    pub screener: Screener,
    pub limiter: Arc<RateLimiter>,
    pub gate: Arc<ConcurrencyGate>,
    pub backend: Arc<dyn ExecutionBackend>,
}

impl AppState {
    pub fn new(settings: Settings, backend: Arc<dyn ExecutionBackend>) -> Self {
        let screener = Screener::new(settings.max_code_len);
        let limiter = Arc::new(RateLimiter::new(
            settings.rate_limit_per_min,
            settings.rate_limit_burst,
        ));
        let gate = Arc::new(ConcurrencyGate::new(settings.concurrent_limit));
        Self {
            settings,
            catalog: Catalog::new(),
            screener,
            limiter,
            gate,
            backend,
        }
    }
}

/// The response envelope. `error` and `error_type` are absent on success;
/// `fallback` is present only in degraded mode.
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<bool>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/execute")
            .route(web::post().to(execute))
            .route(web::route().to(method_not_allowed)),
    )
    .route("/api/languages", web::get().to(languages))
    .route("/health", web::get().to(health));
}

async fn health() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })))
}

async fn languages(state: web::Data<AppState>) -> Result<HttpResponse> {
    let mut listing: Vec<_> = state.catalog.iter().collect();
    listing.sort_by_key(|spec| spec.tag);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "languages": listing })))
}

async fn method_not_allowed() -> Result<HttpResponse> {
    Ok(refuse(
        StatusCode::METHOD_NOT_ALLOWED,
        ErrorType::BadRequest,
        "only POST is accepted on this endpoint",
    ))
}

/// The execution pipeline: decode and validate, screen, admit, execute,
/// classify, encode. Every refusal short-circuits without touching a
/// sandbox slot.
async fn execute(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse> {
    if !is_json(&req) {
        return Ok(refuse(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorType::BadRequest,
            "Content-Type must be application/json",
        ));
    }

    let request: ExecutionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return Ok(refuse(
                StatusCode::BAD_REQUEST,
                ErrorType::BadRequest,
                format!("invalid request body: {}", e),
            ))
        }
    };

    if request.code.is_empty() || request.language.is_empty() {
        return Ok(refuse(
            StatusCode::BAD_REQUEST,
            ErrorType::BadRequest,
            "both 'code' and 'language' are required",
        ));
    }
    if request.timeout == Some(0) {
        return Ok(refuse(
            StatusCode::BAD_REQUEST,
            ErrorType::BadRequest,
            "'timeout' must be a positive integer",
        ));
    }

    // Unknown tags fail fast, before screening and admission.
    let spec = match state.catalog.lookup(&request.language) {
        Some(spec) => spec,
        None => {
            return Ok(refuse(
                StatusCode::BAD_REQUEST,
                ErrorType::UnsupportedLanguage,
                format!("unsupported language: {}", request.language),
            ))
        }
    };

    if let Err(reason) = state.screener.screen(&request.language, &request.code) {
        log::info!("submission rejected by screener: {}", reason);
        return Ok(refuse(
            StatusCode::BAD_REQUEST,
            ErrorType::BadRequest,
            reason,
        ));
    }

    // Rate limit first (cheap), then the semaphore (a scarce resource).
    let client = client_key(&req);
    if !state.limiter.check(&client).await {
        return Ok(refuse(
            StatusCode::TOO_MANY_REQUESTS,
            ErrorType::LimitExceeded,
            "rate limit exceeded, slow down",
        ));
    }

    let permit = match state.gate.try_acquire() {
        Some(permit) => permit,
        None => {
            return Ok(refuse(
                StatusCode::TOO_MANY_REQUESTS,
                ErrorType::LimitExceeded,
                "too many concurrent executions, try again shortly",
            ))
        }
    };

    let result = match state.backend.execute(&request, spec, permit).await {
        Ok(result) => result,
        Err(e) => {
            log::error!("execution failed for language {}: {}", request.language, e);
            return Ok(refuse(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorType::Internal,
                "internal execution error",
            ));
        }
    };

    let error_type = classify(&result, spec.compiled);
    let status = error_type.map_or(StatusCode::OK, ErrorType::status);
    let envelope = ExecuteResponse {
        stdout: result.stdout.clone(),
        stderr: result.stderr.clone(),
        error: error_type.map(|et| classification_message(et, &result)),
        error_type,
        execution_time_ms: result.elapsed_ms,
        fallback: state.backend.degraded().then_some(true),
    };

    let mut response = HttpResponse::build(status).json(envelope);
    if let Some(et) = error_type {
        response.extensions_mut().insert(et);
    }
    Ok(response)
}

fn is_json(req: &HttpRequest) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start().starts_with("application/json"))
        .unwrap_or(false)
}

/// Rate-limit key: the client host without the ephemeral port.
fn client_key(req: &HttpRequest) -> String {
    let info = req.connection_info();
    let addr = info.realip_remote_addr().unwrap_or("unknown");
    strip_port(addr)
}

fn strip_port(addr: &str) -> String {
    if let Some(stripped) = addr.strip_prefix('[') {
        // Bracketed IPv6, e.g. [::1]:4242
        return stripped.split(']').next().unwrap_or(addr).to_string();
    }
    match addr.rsplit_once(':') {
        // A second ':' means a bare IPv6 address, not host:port.
        Some((host, _)) if !host.contains(':') => host.to_string(),
        _ => addr.to_string(),
    }
}

fn refuse(status: StatusCode, error_type: ErrorType, message: impl Into<String>) -> HttpResponse {
    let envelope = ExecuteResponse {
        stdout: String::new(),
        stderr: String::new(),
        error: Some(message.into()),
        error_type: Some(error_type),
        execution_time_ms: 0,
        fallback: None,
    };
    let mut response = HttpResponse::build(status).json(envelope);
    response.extensions_mut().insert(error_type);
    response
}

/// Request logging: method, path, remote address, status, latency, and the
/// classified error type when there is one.
pub struct RequestLog;

impl<S, B> Transform<S, ServiceRequest> for RequestLog
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestLogService<S>;
    type InitError = ();
    type Future = Ready<std::result::Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLogService { service }))
    }
}

pub struct RequestLogService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLogService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start = Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let peer = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("-")
            .to_string();

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            let status = res.status().as_u16();
            let latency_ms = start.elapsed().as_millis();
            match res.response().extensions().get::<ErrorType>().copied() {
                Some(error_type) => log::info!(
                    "{} {} from {} -> {} ({}) in {} ms",
                    method,
                    path,
                    peer,
                    status,
                    error_type.as_str(),
                    latency_ms
                ),
                None => log::info!(
                    "{} {} from {} -> {} in {} ms",
                    method,
                    path,
                    peer,
                    status,
                    latency_ms
                ),
            }
            Ok(res)
        })
    }
}
