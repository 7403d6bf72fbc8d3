use chrono::Utc;
use diesel::prelude::*;
use rocket::http::{ContentType, Status};
use rocket::local::blocking::{Client, LocalResponse};
use std::path::PathBuf;
use tempfile::TempDir;

use crate::build_rocket;
use crate::db::Pool;
use crate::group::{Group, NewGroup};
use crate::post::{NewPost, Post};
use crate::users::models::{NewUser, User};

mod posts;

pub const PASSWORD: &str = "correct-horse-battery";

/// A running application on a throwaway database and media directory.
pub struct TestApp {
    pub client: Client,
    dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_pool(4)
    }

    pub fn with_pool(pool_size: u32) -> Self {
        let dir = tempfile::tempdir().expect("temporary directory");
        let database_url = dir.path().join("yatube.sqlite3").to_string_lossy().into_owned();
        let figment = rocket::Config::figment()
            .merge(("database_url", database_url))
            .merge(("media_dir", dir.path().join("media")))
            .merge(("session_secret", "test-session-secret"))
            .merge(("page_size", 10))
            .merge(("pool_size", pool_size))
            .merge(("pool_timeout", 2))
            .merge(("log_level", "off"))
            .merge(("template_dir", concat!(env!("CARGO_MANIFEST_DIR"), "/templates")));
        let client = Client::tracked(build_rocket(figment)).expect("valid rocket instance");
        TestApp { client, dir }
    }

    pub fn media_dir(&self) -> PathBuf {
        self.dir.path().join("media")
    }

    /// Runs `f` on a pooled connection that is released before returning,
    /// so requests dispatched afterwards never wait for it.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut SqliteConnection) -> T) -> T {
        let pool = self.client.rocket().state::<Pool>().expect("managed pool");
        let mut conn = pool.get().expect("pooled connection");
        f(&mut *conn)
    }

    pub fn create_user(&self, username: &str) -> User {
        let new_user = NewUser {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            full_name: String::new(),
            password_hash: User::make_password(PASSWORD).expect("hashable password"),
        };
        self.with_conn(|conn| User::create(&new_user, conn)).expect("user row")
    }

    pub fn create_group(&self, title: &str, slug: &str) -> Group {
        let new_group = NewGroup {
            title: title.to_string(),
            slug: slug.to_string(),
            description: format!("All about {}", title),
        };
        self.with_conn(|conn| Group::create(&new_group, conn)).expect("group row")
    }

    pub fn create_post(&self, author: &User, text: &str, group: Option<&Group>) -> Post {
        let new_post = NewPost {
            text: text.to_string(),
            pub_date: Utc::now().naive_utc(),
            author_id: author.id,
            group_id: group.map(|g| g.id),
            image: None,
        };
        self.with_conn(|conn| Post::create(&new_post, conn)).expect("post row")
    }

    pub fn login(&self, username: &str) {
        let response = self
            .client
            .post("/auth/login/")
            .header(ContentType::Form)
            .body(format!("username={}&password={}", username, PASSWORD))
            .dispatch();
        assert_eq!(response.status(), Status::Found, "login of {} failed", username);
    }

    pub fn logout(&self) {
        let response = self.client.get("/auth/logout/").dispatch();
        assert_eq!(response.status(), Status::Ok);
    }

    pub fn post_form(&self, uri: &str, body: &str) -> LocalResponse<'_> {
        self.client
            .post(uri.to_string())
            .header(ContentType::Form)
            .body(body.to_string())
            .dispatch()
    }

    pub fn count_rows<F>(&self, count: F) -> i64
    where
        F: FnOnce(&mut SqliteConnection) -> QueryResult<i64>,
    {
        self.with_conn(count).expect("count query")
    }
}

pub fn location(response: &LocalResponse<'_>) -> Option<String> {
    response.headers().get_one("Location").map(|l| l.to_string())
}

/// Number of post cards rendered in a page body.
pub fn post_cards(body: &str) -> usize {
    body.matches("class=\"post\"").count()
}

#[test]
fn static_pages_are_public() {
    let app = TestApp::new();
    for uri in ["/", "/about/author/", "/about/tech/", "/auth/login/", "/auth/signup/"] {
        let response = app.client.get(uri).dispatch();
        assert_eq!(response.status(), Status::Ok, "{}", uri);
    }
}

#[test]
fn unknown_pages_render_the_custom_404() {
    let app = TestApp::new();
    let response = app.client.get("/not-exists/not_exists/").dispatch();
    assert_eq!(response.status(), Status::NotFound);
    let body = response.into_string().unwrap_or_default();
    assert!(body.contains("Page not found"));
    assert!(body.contains("not-exists"));
}

#[test]
fn malformed_post_ids_are_not_found() {
    let app = TestApp::new();
    app.create_user("leo");
    app.login("leo");
    for uri in ["/leo/abc/", "/leo/abc/edit/", "/leo/12abc/"] {
        let response = app.client.get(uri).dispatch();
        assert_eq!(response.status(), Status::NotFound, "{}", uri);
        assert!(response.into_string().unwrap_or_default().contains("Page not found"));
    }
    let response = app.post_form("/leo/abc/comment/", "text=hello");
    assert_eq!(response.status(), Status::NotFound);
}

#[test]
fn one_connection_serves_logged_in_pages() {
    let app = TestApp::with_pool(1);
    let leo = app.create_user("leo");
    app.create_user("anna");
    let post = app.create_post(&leo, "War and Peace", None);
    app.login("anna");

    let pages = [
        "/follow/".to_string(),
        "/new/".to_string(),
        format!("/leo/{}/", post.id),
        "/leo/".to_string(),
    ];
    for uri in pages {
        let response = app.client.get(uri.clone()).dispatch();
        assert_eq!(response.status(), Status::Ok, "{}", uri);
    }
    let response = app.client.get("/leo/follow/").dispatch();
    assert_eq!(location(&response).as_deref(), Some("/leo/"));
    let response = app.post_form(&format!("/leo/{}/comment/", post.id), "text=hello");
    assert_eq!(location(&response), Some(format!("/leo/{}/", post.id)));
}
