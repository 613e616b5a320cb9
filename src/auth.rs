use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use tracing::{info, warn};

use crate::config::*;
use crate::core::db::StoreError;
use crate::core::errors::ApiError;
use crate::core::helpers::{
    generate_reset_token, hash_password, json_response, message_response, parse_json, required,
    verify_against_dummy, verify_password,
};
use crate::handlers::Context;
use crate::models::models::{email_key, PublicUser, User};

pub const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been sent.";
pub const RESET_SUCCESS_MESSAGE: &str = "Password has been reset. You can now log in.";

fn email_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("Regex should compile"))
}

fn check_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters long."
        )));
    }
    Ok(())
}

/// Creates an account and returns the stored username.
pub fn register(
    ctx: &Context,
    username: Option<&str>,
    password: Option<&str>,
    email: Option<&str>,
) -> Result<String, ApiError> {
    let username = required(username)
        .ok_or_else(|| ApiError::validation("Username and password are required."))?;
    let password = password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::validation("Username and password are required."))?;

    let len = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len) {
        return Err(ApiError::validation(format!(
            "Username must be {MIN_USERNAME_LENGTH}-{MAX_USERNAME_LENGTH} characters long."
        )));
    }
    if username.contains('/') {
        return Err(ApiError::validation("Username may not contain '/'."));
    }
    check_password(password)?;

    let email = match required(email) {
        Some(raw) if !email_regex().is_match(raw) => {
            return Err(ApiError::validation("Please enter a valid email address."));
        }
        Some(raw) => Some(email_key(raw)),
        None => None,
    };

    let user = User::new(username.to_string(), email, hash_password(password)?);
    ctx.db.insert_user(&user).map_err(|e| match e {
        StoreError::UsernameTaken => ApiError::Conflict("Username is already taken.".into()),
        StoreError::EmailTaken => ApiError::Conflict("Email is already registered.".into()),
        StoreError::Backend(err) => ApiError::Server(err),
    })?;

    info!(username = %user.username, "user registered");
    Ok(user.username)
}

/// Checks credentials. Unknown user and wrong password fail identically.
pub fn login(ctx: &Context, username: &str, password: &str) -> Result<User, ApiError> {
    let user = match ctx.db.find_user(username)? {
        Some(user) => user,
        None => {
            verify_against_dummy(password);
            warn!(%username, "login failed");
            return Err(ApiError::Auth);
        }
    };

    if !verify_password(password, &user.password_hash) {
        warn!(%username, "login failed");
        return Err(ApiError::Auth);
    }

    Ok(user)
}

/// Issues a reset token when the email belongs to an account. The outcome is the same
/// for unknown emails. Without a working mailer every request is a server error.
pub fn forgot_password(ctx: &Context, email: &str, now: DateTime<Utc>) -> Result<(), ApiError> {
    if !ctx.mailer.available() {
        return Err(anyhow::anyhow!("password reset requested but no mailer is configured").into());
    }

    let Some(user) = ctx.db.find_user_by_email(email)? else {
        info!("password reset requested for unknown email");
        return Ok(());
    };

    let token = generate_reset_token();
    let expires_at = now + Duration::minutes(RESET_TOKEN_TTL_MINUTES);
    if !ctx.db.set_reset_token(&user.username, &token, expires_at)? {
        return Ok(());
    }
    info!(username = %user.username, %expires_at, "password reset token issued");

    let to = user.email.as_deref().unwrap_or(email);
    ctx.mailer
        .send_password_reset(to, &user.username, &ctx.config.reset_link(&token))?;
    Ok(())
}

pub fn reset_password(
    ctx: &Context,
    token: &str,
    password: &str,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    check_password(password)?;
    let hash = hash_password(password)?;

    match ctx.db.consume_reset_token(token, now, &hash)? {
        Some(user) => {
            info!(username = %user.username, "password reset");
            Ok(())
        }
        None => {
            warn!("invalid or expired password reset token");
            Err(ApiError::Token)
        }
    }
}

// === HTTP Handlers ===

#[derive(Deserialize)]
struct RegisterBody {
    username: Option<String>,
    password: Option<String>,
    email: Option<String>,
}

#[derive(Deserialize)]
struct LoginBody {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct ForgotBody {
    email: Option<String>,
}

#[derive(Deserialize)]
struct ResetBody {
    token: Option<String>,
    password: Option<String>,
}

pub fn handle_register(ctx: &Context, req: &Request) -> Result<Response, ApiError> {
    let body: RegisterBody = parse_json(req)?;
    let username = register(
        ctx,
        body.username.as_deref(),
        body.password.as_deref(),
        body.email.as_deref(),
    )?;
    json_response(201, &serde_json::json!({ "username": username }))
}

pub fn handle_login(ctx: &Context, req: &Request) -> Result<Response, ApiError> {
    let body: LoginBody = parse_json(req)?;
    let username = required(body.username.as_deref());
    let password = body.password.as_deref().filter(|p| !p.is_empty());
    let (Some(username), Some(password)) = (username, password) else {
        return Err(ApiError::validation("Username and password are required."));
    };

    let user = login(ctx, username, password)?;
    json_response(200, &PublicUser::from(&user))
}

pub fn handle_forgot_password(ctx: &Context, req: &Request) -> Result<Response, ApiError> {
    let body: ForgotBody = parse_json(req)?;
    let email =
        required(body.email.as_deref()).ok_or_else(|| ApiError::validation("Email is required."))?;

    forgot_password(ctx, email, Utc::now())?;
    message_response(200, FORGOT_PASSWORD_MESSAGE)
}

pub fn handle_reset_password(ctx: &Context, req: &Request) -> Result<Response, ApiError> {
    let body: ResetBody = parse_json(req)?;
    let password = body.password.unwrap_or_default();
    check_password(&password)?;
    let token = required(body.token.as_deref()).ok_or(ApiError::Token)?;

    reset_password(ctx, token, &password, Utc::now())?;
    message_response(200, RESET_SUCCESS_MESSAGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::Db;
    use crate::handlers::testing::{RecordingMailer, TestEnv};
    use crate::mailer::DisabledMailer;

    fn register_alice(env: &TestEnv) {
        let ctx = env.ctx();
        register(&ctx, Some("alice"), Some("secret1"), Some("Alice@Example.com")).unwrap();
    }

    #[test]
    fn register_then_login() {
        let env = TestEnv::new();
        register_alice(&env);
        let ctx = env.ctx();

        let user = login(&ctx, "alice", "secret1").unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.email.as_deref(), Some("alice@example.com"));
        assert!(user.following.is_empty());
        assert!(matches!(login(&ctx, "alice", "wrong"), Err(ApiError::Auth)));
    }

    #[test]
    fn login_is_case_insensitive_on_username() {
        let env = TestEnv::new();
        register_alice(&env);
        assert!(login(&env.ctx(), "ALICE", "secret1").is_ok());
    }

    #[test]
    fn unknown_user_and_wrong_password_look_the_same() {
        let env = TestEnv::new();
        register_alice(&env);
        let ctx = env.ctx();
        let a = login(&ctx, "nobody", "secret1").unwrap_err();
        let b = login(&ctx, "alice", "nope123").unwrap_err();
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(a.status(), b.status());
    }

    #[test]
    fn register_validates_input() {
        let env = TestEnv::new();
        let ctx = env.ctx();
        let cases = [
            (None, Some("secret1"), None),
            (Some("al"), Some("secret1"), None),
            (Some("alice"), Some("12345"), None),
            (Some("alice"), None, None),
            (Some("alice"), Some("secret1"), Some("not-an-email")),
            (Some("a/b"), Some("secret1"), None),
        ];
        for (username, password, email) in cases {
            assert!(
                matches!(register(&ctx, username, password, email), Err(ApiError::Validation(_))),
                "expected validation error for {username:?}/{password:?}/{email:?}"
            );
        }
    }

    #[test]
    fn register_conflicts_ignore_case() {
        let env = TestEnv::new();
        let ctx = env.ctx();
        register(&ctx, Some("bob"), Some("secret1"), Some("bob@example.com")).unwrap();

        let dup_name = register(&ctx, Some("Bob"), Some("secret1"), None);
        assert!(matches!(dup_name, Err(ApiError::Conflict(_))));

        let dup_email = register(&ctx, Some("bobby"), Some("secret1"), Some("BOB@example.com"));
        assert!(matches!(dup_email, Err(ApiError::Conflict(_))));
    }

    #[test]
    fn password_is_stored_hashed() {
        let env = TestEnv::new();
        register_alice(&env);
        let stored = env.db.find_user("alice").unwrap().unwrap();
        assert_ne!(stored.password_hash, "secret1");
        assert!(stored.password_hash.starts_with("$argon2"));
    }

    #[test]
    fn forgot_password_sends_link_for_known_email() {
        let env = TestEnv::new();
        register_alice(&env);
        let now = Utc::now();
        forgot_password(&env.ctx(), "ALICE@example.com", now).unwrap();

        let sent = env.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "alice@example.com");
        assert!(sent[0].link.contains("/reset-password?token="));

        let stored = env.db.find_user("alice").unwrap().unwrap();
        assert_eq!(
            stored.reset_token_expiry,
            Some(now + Duration::minutes(RESET_TOKEN_TTL_MINUTES))
        );
    }

    #[test]
    fn forgot_password_for_unknown_email_is_silent() {
        let env = TestEnv::new();
        register_alice(&env);
        forgot_password(&env.ctx(), "ghost@example.com", Utc::now()).unwrap();
        assert!(env.mailer.sent().is_empty());
    }

    #[test]
    fn mail_failure_is_a_server_error_but_token_is_kept() {
        let env = TestEnv::with_mailer(RecordingMailer::failing());
        register_alice(&env);
        let err = forgot_password(&env.ctx(), "alice@example.com", Utc::now()).unwrap_err();
        assert!(matches!(err, ApiError::Server(_)));
        assert!(env.db.find_user("alice").unwrap().unwrap().reset_token.is_some());
    }

    #[test]
    fn forgot_password_without_mailer_is_refused_for_every_email() {
        let env = TestEnv::new();
        register_alice(&env);
        let ctx = Context {
            mailer: &DisabledMailer,
            ..env.ctx()
        };

        for email in ["alice@example.com", "ghost@example.com"] {
            let err = forgot_password(&ctx, email, Utc::now()).unwrap_err();
            assert!(matches!(err, ApiError::Server(_)));
        }
        assert!(env.db.find_user("alice").unwrap().unwrap().reset_token.is_none());
    }

    #[test]
    fn reset_password_flow() {
        let env = TestEnv::new();
        register_alice(&env);
        let ctx = env.ctx();
        let now = Utc::now();
        forgot_password(&ctx, "alice@example.com", now).unwrap();
        let token = env.mailer.last_token().unwrap();

        reset_password(&ctx, &token, "newpass1", now).unwrap();
        assert!(login(&ctx, "alice", "newpass1").is_ok());
        assert!(matches!(login(&ctx, "alice", "secret1"), Err(ApiError::Auth)));

        // single use
        let again = reset_password(&ctx, &token, "another1", now);
        assert!(matches!(again, Err(ApiError::Token)));
    }

    #[test]
    fn reset_password_rejects_expired_token() {
        let env = TestEnv::new();
        register_alice(&env);
        let ctx = env.ctx();
        let issued = Utc::now();
        forgot_password(&ctx, "alice@example.com", issued).unwrap();
        let token = env.mailer.last_token().unwrap();

        let later = issued + Duration::minutes(RESET_TOKEN_TTL_MINUTES + 1);
        assert!(matches!(
            reset_password(&ctx, &token, "newpass1", later),
            Err(ApiError::Token)
        ));
        assert!(login(&ctx, "alice", "secret1").is_ok());
    }

    #[test]
    fn reset_password_checks_length_before_token() {
        let env = TestEnv::new();
        let result = reset_password(&env.ctx(), "whatever", "123", Utc::now());
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[test]
    fn newer_request_replaces_older_token() {
        let env = TestEnv::new();
        register_alice(&env);
        let ctx = env.ctx();
        let now = Utc::now();
        forgot_password(&ctx, "alice@example.com", now).unwrap();
        let first = env.mailer.last_token().unwrap();
        forgot_password(&ctx, "alice@example.com", now).unwrap();

        assert!(matches!(
            reset_password(&ctx, &first, "newpass1", now),
            Err(ApiError::Token)
        ));
    }
}
