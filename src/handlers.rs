use spin_sdk::http::{Method, Request, Response};

use crate::config::Config;
use crate::core::db::Db;
use crate::core::errors::ApiError;
use crate::core::helpers::json_response;
use crate::core::query_params::decode;
use crate::mailer::Mailer;
use crate::{auth, follow, posts, static_server, templates, users};

/// Everything a request handler may touch. Built once per host and passed down explicitly.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub db: &'a dyn Db,
    pub mailer: &'a dyn Mailer,
    pub config: &'a Config,
}

/// Dispatches a request to its handler and turns failures into JSON error responses.
pub fn route(ctx: &Context, req: &Request) -> Response {
    match dispatch(ctx, req) {
        Ok(resp) => resp,
        Err(err) => err.into(),
    }
}

fn dispatch(ctx: &Context, req: &Request) -> Result<Response, ApiError> {
    let path = req.path();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (req.method(), segments.as_slice()) {
        (Method::Post, ["api", "register"]) => auth::handle_register(ctx, req),
        (Method::Post, ["api", "login"]) => auth::handle_login(ctx, req),
        (Method::Post, ["api", "forgot-password"]) => auth::handle_forgot_password(ctx, req),
        (Method::Post, ["api", "reset-password"]) => auth::handle_reset_password(ctx, req),
        (Method::Get, ["api", "config"]) => client_config(ctx),
        (Method::Get, ["api", "users", username]) => {
            users::get_user_details(ctx, &decode(username))
        }
        (Method::Get, ["api", "posts"]) => posts::handle_list_posts(ctx, req),
        (Method::Post, ["api", "posts"]) => posts::handle_create_post(ctx, req),
        (Method::Get, ["api", "posts", "user", username]) => {
            posts::handle_list_user_posts(ctx, &decode(username))
        }
        (Method::Post, ["api", "posts", id, "like"]) => posts::handle_like(ctx, req, &decode(id)),
        (Method::Post, ["api", "follow"]) => follow::handle_follow(ctx, req),
        (_, ["api", ..]) => Err(ApiError::not_found("No route found.")),
        (Method::Get, ["u", username]) => {
            templates::render_user_profile(ctx, req, &decode(username))
        }
        (Method::Get, ["reset-password"]) => static_server::serve_static("/reset-password.html"),
        (Method::Get, _) => static_server::serve_static(path),
        _ => Err(ApiError::not_found("No route found.")),
    }
}

/// Tells the browser whether the text-rewrite helper can be offered.
fn client_config(ctx: &Context) -> Result<Response, ApiError> {
    json_response(
        200,
        &serde_json::json!({
            "apiKey": ctx.config.gemini_api_key,
            "rewriteEnabled": ctx.config.gemini_api_key.is_some(),
        }),
    )
}
