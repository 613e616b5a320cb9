use spin_sdk::http::Response;

use crate::core::errors::ApiError;
use crate::core::helpers::json_response;
use crate::handlers::Context;
use crate::models::models::{PublicUser, User};

pub fn get_user(ctx: &Context, username: &str) -> Result<User, ApiError> {
    ctx.db
        .find_user(username)?
        .ok_or_else(|| ApiError::not_found("User not found."))
}

pub fn get_user_details(ctx: &Context, username: &str) -> Result<Response, ApiError> {
    let user = get_user(ctx, username)?;
    json_response(200, &PublicUser::from(&user))
}
