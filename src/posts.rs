use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use tracing::info;

use crate::config::MAX_POST_LENGTH;
use crate::core::errors::ApiError;
use crate::core::helpers::{json_response, parse_json, parse_post_id, required};
use crate::core::query_params::{get_string, parse_query_params};
use crate::handlers::Context;
use crate::models::models::{same_username, username_key, Post};
use crate::users::get_user;

fn image_url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^https?://\S+$").expect("Regex should compile"))
}

pub fn create_post(
    ctx: &Context,
    username: Option<&str>,
    text: Option<&str>,
    image: Option<&str>,
) -> Result<Post, ApiError> {
    let (Some(username), Some(text)) = (required(username), required(text)) else {
        return Err(ApiError::validation("Username and text are required."));
    };
    if text.chars().count() > MAX_POST_LENGTH {
        return Err(ApiError::validation(format!(
            "Post text must be at most {MAX_POST_LENGTH} characters."
        )));
    }

    let image = match required(image) {
        Some(url) if !image_url_regex().is_match(url) => {
            return Err(ApiError::validation("Image must be an http(s) URL."));
        }
        other => other.map(str::to_string),
    };

    let author = match ctx.db.find_user(username)? {
        Some(user) => user.username,
        None => username.to_string(),
    };
    let post = Post::new(author, text.to_string(), image);
    ctx.db.insert_post(&post)?;
    info!(id = %post.id, username = %post.username, "post created");
    Ok(post)
}

fn newest_first(mut posts: Vec<Post>) -> Vec<Post> {
    posts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    posts
}

pub fn list_global(ctx: &Context) -> Result<Vec<Post>, ApiError> {
    Ok(newest_first(ctx.db.list_posts()?))
}

pub fn list_by_user(ctx: &Context, username: &str) -> Result<Vec<Post>, ApiError> {
    Ok(newest_first(ctx.db.list_posts_by(username)?))
}

/// Keeps posts written by `viewer` or by someone in `following`, ignoring letter case.
/// Order is preserved.
pub fn filter_followed(posts: Vec<Post>, viewer: &str, following: &[String]) -> Vec<Post> {
    let viewer = username_key(viewer);
    posts
        .into_iter()
        .filter(|p| username_key(&p.username) == viewer || same_username(following, &p.username))
        .collect()
}

pub fn list_followed(ctx: &Context, viewer: &str) -> Result<Vec<Post>, ApiError> {
    let user = get_user(ctx, viewer)?;
    Ok(filter_followed(
        list_global(ctx)?,
        &user.username,
        &user.following,
    ))
}

/// Likes the post for `username`, or takes the like back if it is already there.
pub fn toggle_like(ctx: &Context, post_id: &str, username: &str) -> Result<Post, ApiError> {
    let id = parse_post_id(post_id)?;
    let post = ctx
        .db
        .toggle_like(id, username)?
        .ok_or_else(|| ApiError::not_found("Post not found."))?;
    info!(%id, %username, liked = post.liked_by(username), "like toggled");
    Ok(post)
}

// === HTTP Handlers ===

#[derive(Deserialize)]
struct CreatePostBody {
    username: Option<String>,
    text: Option<String>,
    image: Option<String>,
}

#[derive(Deserialize)]
struct LikeBody {
    username: Option<String>,
}

pub fn handle_create_post(ctx: &Context, req: &Request) -> Result<Response, ApiError> {
    let body: CreatePostBody = parse_json(req)?;
    let post = create_post(
        ctx,
        body.username.as_deref(),
        body.text.as_deref(),
        body.image.as_deref(),
    )?;
    json_response(201, &post)
}

/// `GET /api/posts`, or the followed feed with `?feed=followed&user=<name>`.
pub fn handle_list_posts(ctx: &Context, req: &Request) -> Result<Response, ApiError> {
    let params = parse_query_params(req.uri());
    let posts = match get_string(&params, "feed").as_deref() {
        None | Some("global") => list_global(ctx)?,
        Some("followed") => {
            let viewer = get_string(&params, "user")
                .ok_or_else(|| ApiError::validation("The followed feed needs a user."))?;
            list_followed(ctx, &viewer)?
        }
        Some(other) => return Err(ApiError::validation(format!("Unknown feed {other:?}."))),
    };
    json_response(200, &posts)
}

pub fn handle_list_user_posts(ctx: &Context, username: &str) -> Result<Response, ApiError> {
    json_response(200, &list_by_user(ctx, username)?)
}

pub fn handle_like(ctx: &Context, req: &Request, post_id: &str) -> Result<Response, ApiError> {
    let body: LikeBody = parse_json(req)?;
    let username =
        required(body.username.as_deref()).ok_or_else(|| ApiError::validation("Username is required."))?;
    json_response(200, &toggle_like(ctx, post_id, username)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::Db;
    use crate::follow::toggle_follow;
    use crate::handlers::testing::TestEnv;
    use chrono::{Duration, Utc};

    fn post_at(env: &TestEnv, username: &str, text: &str, minutes_ago: i64) -> Post {
        let mut post = Post::new(username.into(), text.into(), None);
        post.timestamp = Utc::now() - Duration::minutes(minutes_ago);
        env.db.insert_post(&post).unwrap();
        post
    }

    #[test]
    fn create_post_validates_input() {
        let env = TestEnv::new();
        let ctx = env.ctx();
        assert!(matches!(
            create_post(&ctx, Some("alice"), Some("   "), None),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            create_post(&ctx, None, Some("hi"), None),
            Err(ApiError::Validation(_))
        ));
        let long = "a".repeat(MAX_POST_LENGTH + 1);
        assert!(matches!(
            create_post(&ctx, Some("alice"), Some(&long), None),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            create_post(&ctx, Some("alice"), Some("hi"), Some("javascript:alert(1)")),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn blank_image_means_no_image() {
        let env = TestEnv::new();
        let post = create_post(&env.ctx(), Some("alice"), Some("hello"), Some("")).unwrap();
        assert_eq!(post.image, None);
        assert!(post.likes.is_empty());

        let with_image = create_post(
            &env.ctx(),
            Some("alice"),
            Some("look"),
            Some("https://example.com/cat.png"),
        )
        .unwrap();
        assert_eq!(with_image.image.as_deref(), Some("https://example.com/cat.png"));
    }

    #[test]
    fn global_feed_is_newest_first() {
        let env = TestEnv::new();
        let old = post_at(&env, "alice", "old", 30);
        let new = post_at(&env, "bob", "new", 1);
        let mid = post_at(&env, "carol", "mid", 10);

        let ids: Vec<_> = list_global(&env.ctx()).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![new.id, mid.id, old.id]);
    }

    #[test]
    fn user_feed_only_has_that_author() {
        let env = TestEnv::new();
        let a1 = post_at(&env, "alice", "one", 5);
        post_at(&env, "bob", "two", 4);
        let a2 = post_at(&env, "alice", "three", 3);

        let ids: Vec<_> = list_by_user(&env.ctx(), "alice")
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![a2.id, a1.id]);
    }

    #[test]
    fn followed_feed_includes_followed_and_self() {
        let env = TestEnv::new();
        env.user("alice");
        env.user("bob");
        env.user("carol");
        let ctx = env.ctx();
        toggle_follow(&ctx, "alice", "bob").unwrap();

        let own = post_at(&env, "alice", "mine", 3);
        let bobs = post_at(&env, "bob", "bob's", 2);
        post_at(&env, "carol", "carol's", 1);

        let ids: Vec<_> = list_followed(&ctx, "alice").unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![bobs.id, own.id]);

        // Server-side filtering matches filtering the global feed on the client.
        let client_side = filter_followed(list_global(&ctx).unwrap(), "alice", &["bob".to_string()]);
        let client_ids: Vec<_> = client_side.into_iter().map(|p| p.id).collect();
        assert_eq!(client_ids, ids);
    }

    #[test]
    fn author_name_is_canonicalised() {
        let env = TestEnv::new();
        env.user("alice");
        let post = create_post(&env.ctx(), Some("ALICE"), Some("shouting"), None).unwrap();
        assert_eq!(post.username, "alice");

        let ghost = create_post(&env.ctx(), Some("Ghost"), Some("boo"), None).unwrap();
        assert_eq!(ghost.username, "Ghost");
    }

    #[test]
    fn followed_filter_ignores_case() {
        let env = TestEnv::new();
        let bobs = post_at(&env, "BOB", "loud", 2);
        let own = post_at(&env, "Alice", "mine", 1);
        post_at(&env, "carol", "other", 3);

        let following = vec!["bob".to_string()];
        let ids: Vec<_> = filter_followed(list_global(&env.ctx()).unwrap(), "alice", &following)
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![own.id, bobs.id]);
    }

    #[test]
    fn followed_feed_for_unknown_user() {
        let env = TestEnv::new();
        assert!(matches!(list_followed(&env.ctx(), "ghost"), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn like_toggle_scenario() {
        let env = TestEnv::new();
        let ctx = env.ctx();
        let post = create_post(&ctx, Some("alice"), Some("hello"), None).unwrap();
        let id = post.id.to_string();

        let liked = toggle_like(&ctx, &id, "bob").unwrap();
        assert_eq!(liked.likes, vec!["bob"]);
        assert_eq!(liked.id, post.id);

        let unliked = toggle_like(&ctx, &id, "bob").unwrap();
        assert!(unliked.likes.is_empty());
    }

    #[test]
    fn author_may_like_own_post() {
        let env = TestEnv::new();
        let ctx = env.ctx();
        let post = create_post(&ctx, Some("alice"), Some("me me me"), None).unwrap();
        let liked = toggle_like(&ctx, &post.id.to_string(), "alice").unwrap();
        assert_eq!(liked.likes, vec!["alice"]);
    }

    #[test]
    fn like_errors() {
        let env = TestEnv::new();
        let ctx = env.ctx();
        assert!(matches!(toggle_like(&ctx, "not-an-id", "bob"), Err(ApiError::Validation(_))));
        let missing = uuid::Uuid::new_v4().to_string();
        assert!(matches!(toggle_like(&ctx, &missing, "bob"), Err(ApiError::NotFound(_))));
    }
}
