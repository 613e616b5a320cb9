use html_escape::{encode_double_quoted_attribute, encode_text};
use spin_sdk::http::{Request, Response};

use crate::core::errors::ApiError;
use crate::core::query_params::{get_string, parse_query_params};
use crate::handlers::Context;
use crate::models::models::{same_username, username_key, Post};
use crate::posts::list_by_user;
use crate::static_server::asset;
use crate::users::get_user;

/// Who is looking at a rendered post list.
pub struct Viewer<'a> {
    pub username: &'a str,
    pub following: &'a [String],
}

fn render_text(text: &str) -> String {
    encode_text(text).replace('\n', "<br>")
}

pub fn render_post_card(post: &Post, viewer: Option<&Viewer>) -> String {
    let author_attr = encode_double_quoted_attribute(&post.username);
    let id_attr = post.id.to_string();

    let follow_button = match viewer {
        Some(v) if username_key(v.username) == username_key(&post.username) => String::new(),
        Some(v) => {
            let following = same_username(v.following, &post.username);
            format!(
                r#"<button class="btn-follow{}" data-username="{}">{}</button>"#,
                if following { " following" } else { "" },
                author_attr,
                if following { "Following" } else { "Follow" },
            )
        }
        None => String::new(),
    };

    let liked = viewer.map(|v| post.liked_by(v.username)).unwrap_or(false);
    let like_button = format!(
        r#"<button class="btn-like{}" data-post-id="{}">&#9829; {}</button>"#,
        if liked { " liked" } else { "" },
        id_attr,
        post.likes.len(),
    );

    let image = post
        .image
        .as_deref()
        .map(|url| {
            format!(
                r#"<img src="{}" alt="User post image" class="post-image">"#,
                encode_double_quoted_attribute(url)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<div class="post-card" data-author="{author}" data-post-id="{id}">
    <div class="post-header">
        <div class="post-user-info">
            <a class="post-username" href="/u/{href}">{name}</a>
            {follow_button}
        </div>
        <span class="post-timestamp">{timestamp}</span>
    </div>
    <div class="post-content">
        <p>{text}</p>
        {image}
    </div>
    <div class="post-actions">{like_button}</div>
</div>"#,
        author = author_attr,
        id = id_attr,
        href = urlencoding::encode(&post.username),
        name = encode_text(&post.username),
        timestamp = post.timestamp.format("%b %-d, %-I:%M %p"),
        text = render_text(&post.text),
    )
}

pub fn render_posts(posts: &[Post], viewer: Option<&Viewer>) -> String {
    if posts.is_empty() {
        return "<p>Nothing to see here!</p>".to_string();
    }
    posts
        .iter()
        .map(|p| render_post_card(p, viewer))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `GET /u/:username[?viewer=<name>]`: profile page with the user's posts.
pub fn render_user_profile(
    ctx: &Context,
    req: &Request,
    username: &str,
) -> Result<Response, ApiError> {
    let user = get_user(ctx, username)?;
    let posts = list_by_user(ctx, &user.username)?;

    let viewer_user = match get_string(&parse_query_params(req.uri()), "viewer") {
        Some(name) => ctx.db.find_user(&name)?,
        None => None,
    };
    let viewer = viewer_user.as_ref().map(|u| Viewer {
        username: &u.username,
        following: &u.following,
    });

    let template = asset("profile.html")
        .ok_or_else(|| anyhow::anyhow!("Profile template not found"))?;
    let template = String::from_utf8(template).map_err(anyhow::Error::from)?;

    let html = template
        .replace("PROFILE_USERNAME", &encode_text(&user.username))
        .replace("PROFILE_FOLLOWING_COUNT", &user.following.len().to_string())
        .replace("PROFILE_POST_COUNT", &posts.len().to_string())
        .replace("PROFILE_POSTS", &render_posts(&posts, viewer.as_ref()));

    Ok(Response::builder()
        .status(200)
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.into_bytes())
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::Db;
    use crate::handlers::testing::TestEnv;
    use spin_sdk::http::Method;

    fn post(author: &str, text: &str) -> Post {
        Post::new(author.into(), text.into(), None)
    }

    #[test]
    fn text_is_escaped() {
        let html = render_post_card(&post("mallory", "<script>alert(1)</script>"), None);
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn own_posts_have_no_follow_button() {
        let following: Vec<String> = vec![];
        let viewer = Viewer { username: "alice", following: &following };
        let html = render_post_card(&post("alice", "hi"), Some(&viewer));
        assert!(!html.contains("btn-follow"));
    }

    #[test]
    fn follow_button_reflects_following_list() {
        let following = vec!["bob".to_string()];
        let viewer = Viewer { username: "alice", following: &following };

        let bob = render_post_card(&post("bob", "hi"), Some(&viewer));
        assert!(bob.contains(r#"class="btn-follow following""#));
        assert!(bob.contains(">Following<"));

        let carol = render_post_card(&post("carol", "hi"), Some(&viewer));
        assert!(carol.contains(r#"class="btn-follow""#));
        assert!(carol.contains(">Follow<"));
    }

    #[test]
    fn follow_state_ignores_case() {
        let following = vec!["bob".to_string()];
        let viewer = Viewer { username: "Alice", following: &following };
        let html = render_post_card(&post("Bob", "hi"), Some(&viewer));
        assert!(html.contains(">Following<"));
        assert!(!render_post_card(&post("alice", "hi"), Some(&viewer)).contains("btn-follow"));
    }

    #[test]
    fn like_button_shows_count_and_state() {
        let mut p = post("bob", "hi");
        p.likes = vec!["alice".into(), "carol".into()];
        let following: Vec<String> = vec![];
        let viewer = Viewer { username: "alice", following: &following };
        let html = render_post_card(&p, Some(&viewer));
        assert!(html.contains(r#"class="btn-like liked""#));
        assert!(html.contains("&#9829; 2"));
    }

    #[test]
    fn empty_feed_message() {
        assert_eq!(render_posts(&[], None), "<p>Nothing to see here!</p>");
    }

    #[test]
    fn profile_page_lists_user_posts() {
        let env = TestEnv::new();
        env.user("bob");
        env.user("alice");
        env.db.insert_post(&post("bob", "bob was here")).unwrap();
        env.db.insert_post(&post("carol", "not bob")).unwrap();

        let req = Request::builder()
            .method(Method::Get)
            .uri("/u/bob?viewer=alice")
            .build();
        let resp = render_user_profile(&env.ctx(), &req, "bob").unwrap();
        assert_eq!(*resp.status(), 200);
        let html = String::from_utf8(resp.body().to_vec()).unwrap();
        assert!(html.contains("bob was here"));
        assert!(!html.contains("not bob"));
        assert!(html.contains(">Follow<"));
    }

    #[test]
    fn profile_of_unknown_user_is_not_found() {
        let env = TestEnv::new();
        let req = Request::builder().method(Method::Get).uri("/u/ghost").build();
        assert!(matches!(
            render_user_profile(&env.ctx(), &req, "ghost"),
            Err(ApiError::NotFound(_))
        ));
    }
}
