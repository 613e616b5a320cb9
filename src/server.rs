use std::net::TcpListener;

use actix_web::dev::Server;
use actix_web::http::StatusCode;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use spin_sdk::http::{Method, Request, Response};
use tracing::error;
use tracing_actix_web::TracingLogger;

use crate::config::Config;
use crate::core::db::LocalDb;
use crate::handlers::{route, Context};
use crate::mailer::Mailer;

/// Process-wide state of the native server.
pub struct AppState {
    pub db: LocalDb,
    pub mailer: Box<dyn Mailer + Send + Sync>,
    pub config: Config,
}

impl AppState {
    fn ctx(&self) -> Context<'_> {
        Context {
            db: &self.db,
            mailer: self.mailer.as_ref(),
            config: &self.config,
        }
    }
}

mod adapter {
    use super::*;

    pub fn actix_to_spin_request(req: &HttpRequest, body: web::Bytes) -> Request {
        let method = match req.method().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            other => Method::Other(other.to_string()),
        };

        let mut builder = Request::builder();
        builder.method(method).uri(req.uri().to_string());
        for (name, value) in req.headers() {
            if let Ok(val_str) = value.to_str() {
                builder.header(name.as_str(), val_str);
            }
        }
        builder.body(body.to_vec()).build()
    }

    pub fn spin_to_actix_response(spin_resp: Response) -> HttpResponse {
        let status = StatusCode::from_u16(*spin_resp.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut response = HttpResponse::build(status);
        for (name, value) in spin_resp.headers() {
            if let Some(val_str) = value.as_str() {
                response.insert_header((name, val_str));
            }
        }
        response.body(spin_resp.body().to_vec())
    }
}

async fn handle_all(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let spin_req = adapter::actix_to_spin_request(&req, body);
    // Handlers hash passwords, write the snapshot and talk to the SMTP relay.
    match web::block(move || route(&state.ctx(), &spin_req)).await {
        Ok(spin_resp) => adapter::spin_to_actix_response(spin_resp),
        Err(err) => {
            error!(error = %err, "request handler did not complete");
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "message": "Server error" }))
        }
    }
}

/// Builds the HTTP server on an already bound listener. The caller drives the returned future.
pub fn run(listener: TcpListener, state: AppState) -> std::io::Result<Server> {
    let workers = state.config.workers;
    let state = web::Data::new(state);
    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(state.clone())
            .default_service(web::route().to(handle_all))
    });
    if let Some(n) = workers {
        server = server.workers(n);
    }
    Ok(server.listen(listener)?.run())
}
