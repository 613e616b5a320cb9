use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use tracing::info;

use crate::core::errors::ApiError;
use crate::core::helpers::{json_response, parse_json, required};
use crate::handlers::Context;
use crate::models::models::{PublicUser, User};

/// Follows `target` if the follower does not follow them yet, unfollows otherwise.
///
/// Self-follow is allowed. When `target` names an existing account its canonical
/// username is stored, otherwise the name is stored as given.
pub fn toggle_follow(ctx: &Context, follower: &str, target: &str) -> Result<User, ApiError> {
    let target = match ctx.db.find_user(target)? {
        Some(user) => user.username,
        None => target.to_string(),
    };

    let updated = ctx
        .db
        .toggle_following(follower, &target)?
        .ok_or_else(|| ApiError::not_found("Follower not found."))?;

    info!(
        follower = %updated.username,
        %target,
        following = updated.follows(&target),
        "follow toggled"
    );
    Ok(updated)
}

// === HTTP Handlers ===

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FollowBody {
    follower: Option<String>,
    user_to_follow: Option<String>,
}

pub fn handle_follow(ctx: &Context, req: &Request) -> Result<Response, ApiError> {
    let body: FollowBody = parse_json(req)?;
    let (Some(follower), Some(target)) = (
        required(body.follower.as_deref()),
        required(body.user_to_follow.as_deref()),
    ) else {
        return Err(ApiError::validation("Required fields missing."));
    };

    let user = toggle_follow(ctx, follower, target)?;
    json_response(200, &PublicUser::from(&user))
}
