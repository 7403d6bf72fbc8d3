use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::BelongingToDsl;
use rocket::form::Form;
use rocket::response::Redirect;
use serde::Serialize;

use crate::db::schema::{comments, users};
use crate::db::DbConnection;
use crate::post::Post;
use crate::types::AppResult;
use crate::users::models::Author;
use crate::users::CurrentUser;
use crate::utils::serialize_date;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = comments, belongs_to(Post))]
pub struct Comment {
    pub id: i32,
    pub post_id: i32,
    pub author_id: i32,
    pub text: String,
    pub created: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment {
    pub post_id: i32,
    pub author_id: i32,
    pub text: String,
    pub created: NaiveDateTime,
}

#[derive(Serialize, Debug)]
pub struct CommentView {
    id: i32,
    text: String,
    #[serde(serialize_with = "serialize_date")]
    created: NaiveDateTime,
    author: Author,
}

impl From<(Comment, Author)> for CommentView {
    fn from(comment_and_author: (Comment, Author)) -> Self {
        let (comment, author) = comment_and_author;
        CommentView {
            id: comment.id,
            text: comment.text,
            created: comment.created,
            author,
        }
    }
}

impl Comment {
    /// Comments under a post, newest first, each with its author.
    pub fn for_post(post: &Post, connection: &mut SqliteConnection) -> QueryResult<Vec<CommentView>> {
        let rows = Comment::belonging_to(post)
            .inner_join(users::table)
            .order((comments::created.desc(), comments::id.desc()))
            .select((Comment::as_select(), Author::as_select()))
            .load::<(Comment, Author)>(connection)?;
        Ok(rows.into_iter().map(CommentView::from).collect())
    }
}

#[derive(Debug, FromForm)]
pub struct CommentForm {
    #[field(default = String::new())]
    text: String,
}

/// Invalid comments are dropped; the reader always lands back on the post.
#[post("/<username>/<post_id>/comment", data = "<form>")]
pub fn add(
    user: CurrentUser,
    mut conn: DbConnection,
    username: &str,
    post_id: i32,
    form: Form<CommentForm>,
) -> AppResult<Redirect> {
    let user = user?;
    let post = Post::load_for_author(post_id, username, &mut conn)?;
    let redirect = Redirect::found(post.detail_url(username));

    let text = form.text.trim();
    if text.is_empty() {
        tracing::warn!("{} sent an empty comment to post {}", user.username, post.id);
        return Ok(redirect);
    }

    let new_comment = NewComment {
        post_id: post.id,
        author_id: user.id,
        text: text.to_string(),
        created: Utc::now().naive_utc(),
    };
    diesel::insert_into(comments::table)
        .values(&new_comment)
        .execute(&mut *conn)?;
    tracing::info!("{} commented on post {}", user.username, post.id);

    Ok(redirect)
}
