use diesel::prelude::*;
use rocket::http::{ContentType, Status};

use super::{location, post_cards, TestApp};
use crate::db::schema::posts;
use crate::post::Post;

fn post_count(app: &TestApp) -> i64 {
    app.count_rows(|conn| posts::table.count().get_result(conn))
}

fn reload(app: &TestApp, post: &Post) -> Post {
    app.with_conn(|conn| Post::load(post.id, conn)).expect("post still exists")
}

#[test]
fn anonymous_visitor_is_sent_to_login() {
    let app = TestApp::new();
    let response = app.client.get("/new/").dispatch();
    assert_eq!(response.status(), Status::Found);
    assert_eq!(location(&response).as_deref(), Some("/auth/login/?next=%2Fnew%2F"));

    let response = app.post_form("/new/", "text=hello");
    assert_eq!(location(&response).as_deref(), Some("/auth/login/?next=%2Fnew%2F"));
    assert_eq!(post_count(&app), 0);
}

#[test]
fn new_post_is_published() {
    let app = TestApp::new();
    let leo = app.create_user("leo");
    let group = app.create_group("Readers", "readers");
    app.login("leo");

    let response = app.post_form("/new/", &format!("text=Hello%2C+world&group={}", group.id));
    assert_eq!(response.status(), Status::Found);
    assert_eq!(location(&response).as_deref(), Some("/"));
    assert_eq!(post_count(&app), 1);

    let post = app
        .with_conn(|conn| posts::table.select(Post::as_select()).first(conn))
        .expect("new post");
    assert_eq!(post.text, "Hello, world");
    assert_eq!(post.author_id, leo.id);
    assert_eq!(post.group_id, Some(group.id));

    let body = app.client.get("/").dispatch().into_string().unwrap_or_default();
    assert!(body.contains("Hello, world"));
    let body = app.client.get("/group/readers/").dispatch().into_string().unwrap_or_default();
    assert!(body.contains("Hello, world"));
    let body = app.client.get("/leo/").dispatch().into_string().unwrap_or_default();
    assert!(body.contains("Hello, world"));
}

#[test]
fn blank_post_is_rejected() {
    let app = TestApp::new();
    app.create_user("leo");
    app.login("leo");

    let response = app.post_form("/new/", "text=+++");
    assert_eq!(response.status(), Status::Ok);
    assert!(response.into_string().unwrap_or_default().contains("This field is required."));
    assert_eq!(post_count(&app), 0);
}

#[test]
fn unknown_group_is_rejected() {
    let app = TestApp::new();
    app.create_user("leo");
    app.login("leo");

    let response = app.post_form("/new/", "text=hello&group=42");
    assert_eq!(response.status(), Status::Ok);
    assert!(response.into_string().unwrap_or_default().contains("Select a valid choice."));
    assert_eq!(post_count(&app), 0);
}

#[test]
fn post_detail_shows_the_post() {
    let app = TestApp::new();
    let leo = app.create_user("leo");
    let post = app.create_post(&leo, "War and Peace", None);

    let response = app.client.get(format!("/leo/{}/", post.id)).dispatch();
    assert_eq!(response.status(), Status::Ok);
    let body = response.into_string().unwrap_or_default();
    assert!(body.contains("War and Peace"));
    assert!(body.contains("Posts: 1"));
}

#[test]
fn post_detail_requires_the_right_author() {
    let app = TestApp::new();
    let leo = app.create_user("leo");
    app.create_user("anna");
    let post = app.create_post(&leo, "War and Peace", None);

    let response = app.client.get(format!("/anna/{}/", post.id)).dispatch();
    assert_eq!(response.status(), Status::NotFound);
    let response = app.client.get(format!("/leo/{}/", post.id + 1)).dispatch();
    assert_eq!(response.status(), Status::NotFound);
}

#[test]
fn author_edits_own_post() {
    let app = TestApp::new();
    let leo = app.create_user("leo");
    let group = app.create_group("Readers", "readers");
    let post = app.create_post(&leo, "first draft", Some(&group));
    app.login("leo");

    let edit_url = format!("/leo/{}/edit/", post.id);
    let response = app.client.get(edit_url.clone()).dispatch();
    assert_eq!(response.status(), Status::Ok);
    assert!(response.into_string().unwrap_or_default().contains("first draft"));

    let response = app.post_form(&edit_url, "text=final+text&group=");
    assert_eq!(response.status(), Status::Found);
    assert_eq!(location(&response), Some(format!("/leo/{}/", post.id)));

    let edited = reload(&app, &post);
    assert_eq!(edited.text, "final text");
    assert_eq!(edited.group_id, None);
    assert_eq!(edited.pub_date, post.pub_date);
    assert_eq!(post_count(&app), 1);
}

#[test]
fn stranger_cannot_edit() {
    let app = TestApp::new();
    let leo = app.create_user("leo");
    app.create_user("anna");
    let post = app.create_post(&leo, "first draft", None);
    let edit_url = format!("/leo/{}/edit/", post.id);

    app.login("anna");
    let response = app.client.get(edit_url.clone()).dispatch();
    assert_eq!(location(&response).as_deref(), Some("/leo/"));
    let response = app.post_form(&edit_url, "text=vandalised");
    assert_eq!(response.status(), Status::Found);
    assert_eq!(location(&response).as_deref(), Some("/leo/"));
    assert_eq!(reload(&app, &post).text, "first draft");

    app.logout();
    let response = app.post_form(&edit_url, "text=vandalised");
    assert_eq!(location(&response).as_deref(), Some("/leo/"));
    assert_eq!(reload(&app, &post).text, "first draft");
}

#[test]
fn editing_a_missing_post_is_not_found() {
    let app = TestApp::new();
    app.create_user("leo");
    app.login("leo");
    let response = app.client.get("/leo/999/edit/").dispatch();
    assert_eq!(response.status(), Status::NotFound);
}

#[test]
fn listings_are_paginated() {
    let app = TestApp::new();
    let leo = app.create_user("leo");
    let group = app.create_group("Readers", "readers");
    for i in 0..13 {
        app.create_post(&leo, &format!("post number {}", i), Some(&group));
    }

    for base in ["/", "/group/readers/", "/leo/"] {
        let first = app.client.get(base).dispatch().into_string().unwrap_or_default();
        assert_eq!(post_cards(&first), 10, "{}", base);
        assert!(first.contains("post number 12"));
        assert!(!first.contains("post number 2<"));

        let second = app
            .client
            .get(format!("{}?page=2", base))
            .dispatch()
            .into_string()
            .unwrap_or_default();
        assert_eq!(post_cards(&second), 3, "{}", base);
        assert!(second.contains("post number 0"));
    }

    let beyond = app.client.get("/?page=99").dispatch().into_string().unwrap_or_default();
    assert_eq!(post_cards(&beyond), 3);
    for junk in ["0", "-4", "abc"] {
        let body = app
            .client
            .get(format!("/?page={}", junk))
            .dispatch()
            .into_string()
            .unwrap_or_default();
        assert_eq!(post_cards(&body), 10, "page={}", junk);
    }
}

#[test]
fn empty_listing_renders() {
    let app = TestApp::new();
    let response = app.client.get("/?page=3").dispatch();
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(post_cards(&response.into_string().unwrap_or_default()), 0);
}

const BOUNDARY: &str = "yatube-test-boundary";

// A 1x1 transparent GIF.
const SMALL_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x01, 0x44, 0x00, 0x3b,
];

fn multipart_post(text: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"text\"\r\n\r\n{text}\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\n\
             Content-Type: {content_type}\r\n\r\n",
            b = BOUNDARY,
            text = text,
            filename = filename,
            content_type = content_type,
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn multipart_type() -> ContentType {
    ContentType::new("multipart", "form-data").with_params(("boundary", BOUNDARY))
}

#[test]
fn post_with_image_is_served_from_media() {
    let app = TestApp::new();
    let leo = app.create_user("leo");
    app.login("leo");

    let response = app
        .client
        .post("/new/")
        .header(multipart_type())
        .body(multipart_post("with a picture", "small.gif", "image/gif", SMALL_GIF))
        .dispatch();
    assert_eq!(response.status(), Status::Found);

    let post = app
        .with_conn(|conn| posts::table.select(Post::as_select()).first(conn))
        .expect("new post");
    assert_eq!(post.author_id, leo.id);
    let image = post.image.clone().expect("stored image");
    assert!(image.starts_with("posts/"));
    assert!(app.media_dir().join(&image).is_file());

    let image_url = post.image_url().expect("image url");
    let file_name = image.trim_start_matches("posts/");
    let body = app.client.get("/").dispatch().into_string().unwrap_or_default();
    assert!(body.contains(file_name));

    let response = app.client.get(image_url).dispatch();
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.into_bytes().unwrap_or_default(), SMALL_GIF);
}

#[test]
fn non_image_upload_is_rejected() {
    let app = TestApp::new();
    app.create_user("leo");
    app.login("leo");

    let response = app
        .client
        .post("/new/")
        .header(multipart_type())
        .body(multipart_post("with a script", "evil.sh", "text/x-sh", b"rm -rf /"))
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(post_count(&app), 0);
}

#[test]
fn declared_image_type_is_not_trusted() {
    let app = TestApp::new();
    app.create_user("leo");
    app.login("leo");

    let response = app
        .client
        .post("/new/")
        .header(multipart_type())
        .body(multipart_post("disguised", "cat.gif", "image/gif", b"<script>alert(1)</script>"))
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
    assert!(response.into_string().unwrap_or_default().contains("Upload a valid image."));
    assert_eq!(post_count(&app), 0);
    assert!(!app.media_dir().join("posts").exists());
}

fn publish_with_image(app: &TestApp) -> (Post, String) {
    let response = app
        .client
        .post("/new/")
        .header(multipart_type())
        .body(multipart_post("with a picture", "small.gif", "image/gif", SMALL_GIF))
        .dispatch();
    assert_eq!(response.status(), Status::Found);
    let post = app
        .with_conn(|conn| posts::table.select(Post::as_select()).first(conn))
        .expect("new post");
    let image = post.image.clone().expect("stored image");
    assert!(image.ends_with(".gif"));
    (post, image)
}

#[test]
fn clearing_an_image_removes_the_file() {
    let app = TestApp::new();
    app.create_user("leo");
    app.login("leo");
    let (post, image) = publish_with_image(&app);
    assert!(app.media_dir().join(&image).is_file());

    let response = app.post_form(&format!("/leo/{}/edit/", post.id), "text=no+picture&clear_image=on");
    assert_eq!(location(&response), Some(format!("/leo/{}/", post.id)));
    assert_eq!(reload(&app, &post).image, None);
    assert!(!app.media_dir().join(&image).exists());
}

#[test]
fn replacing_an_image_removes_the_old_file() {
    let app = TestApp::new();
    app.create_user("leo");
    app.login("leo");
    let (post, old_image) = publish_with_image(&app);

    let response = app
        .client
        .post(format!("/leo/{}/edit/", post.id))
        .header(multipart_type())
        .body(multipart_post("new picture", "other.gif", "image/gif", SMALL_GIF))
        .dispatch();
    assert_eq!(response.status(), Status::Found);

    let new_image = reload(&app, &post).image.expect("replacement image");
    assert_ne!(new_image, old_image);
    assert!(app.media_dir().join(&new_image).is_file());
    assert!(!app.media_dir().join(&old_image).exists());
}

#[test]
fn editing_text_keeps_the_image() {
    let app = TestApp::new();
    app.create_user("leo");
    app.login("leo");
    let (post, image) = publish_with_image(&app);

    app.post_form(&format!("/leo/{}/edit/", post.id), "text=new+words");
    assert_eq!(reload(&app, &post).image, Some(image.clone()));
    assert!(app.media_dir().join(&image).is_file());
}
