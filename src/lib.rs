//! A small social board: accounts with password auth and email password reset,
//! text/image posts, follow and like toggles, and global/followed feeds.
//!
//! The same router serves two hosts: a Spin HTTP component backed by the Spin
//! key-value store, and a native actix-web server backed by [`core::db::LocalDb`].

pub mod auth;
pub mod config;
pub mod core;
pub mod follow;
pub mod handlers;
pub mod mailer;
pub mod models;
pub mod posts;
#[cfg(not(target_arch = "wasm32"))]
pub mod server;
pub mod static_server;
pub mod templates;
pub mod users;

#[cfg(target_arch = "wasm32")]
mod component {
    use spin_sdk::http::{IntoResponse, Request};
    use spin_sdk::http_component;

    use crate::config::Config;
    use crate::core::kv::KvDb;
    use crate::handlers::{route, Context};
    use crate::mailer::DisabledMailer;

    #[http_component]
    fn handle(req: Request) -> anyhow::Result<impl IntoResponse> {
        let config = Config::from_env()?;
        let db = KvDb::open_default()?;
        let ctx = Context {
            db: &db,
            mailer: &DisabledMailer,
            config: &config,
        };
        Ok(route(&ctx, &req))
    }
}
