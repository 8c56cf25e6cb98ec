use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{HttpRequest, HttpResponse, Responder, get, post, web};
use serde::{Deserialize, Serialize};

use crate::pipeline::Pipeline;
use crate::response::ExecutionResponse;

#[derive(Serialize, Deserialize, Debug)]
pub struct CodeRequest {
    pub code: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Registers every route under `/api`
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .service(
            web::scope("/api")
                .service(execute_handler)
                .service(health_handler),
        );
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ExecutionResponse::error(&err));
    InternalError::from_response(err, response).into()
}

#[post("/execute")]
pub async fn execute_handler(
    pipeline: web::Data<Pipeline>,
    body: web::Json<CodeRequest>,
) -> impl Responder {
    if body.code.trim().is_empty() {
        return HttpResponse::BadRequest().json(ExecutionResponse::error("No code provided"));
    }

    let response = pipeline.execute(&body.code).await;
    if response.is_success() {
        HttpResponse::Ok().json(response)
    } else {
        log::debug!("Request finished with status {}", response.status);
        HttpResponse::BadRequest().json(response)
    }
}

#[get("/health")]
pub async fn health_handler() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse { status: "ok" })
}
