use diesel::prelude::*;
use diesel::{delete, insert_into};
use rocket::response::Redirect;
use rocket::State;
use rocket_dyn_templates::{context, Template};
use serde::Serialize;

use crate::config::Settings;
use crate::db::schema::follows;
use crate::db::DbConnection;
use crate::post::PostFilter;
use crate::types::AppResult;
use crate::users::models::User;
use crate::users::CurrentUser;

pub fn profile_url(username: &str) -> String {
    format!("/{}/", username)
}

/// "`user_id` follows `author_id`".
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable)]
#[diesel(table_name = follows)]
pub struct Follow {
    pub id: i32,
    pub user_id: i32,
    pub author_id: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = follows)]
pub struct NewFollow {
    pub user_id: i32,
    pub author_id: i32,
}

impl Follow {
    pub fn find(user_id: i32, author_id: i32, connection: &mut SqliteConnection) -> QueryResult<Option<Follow>> {
        follows::table
            .filter(follows::user_id.eq(user_id))
            .filter(follows::author_id.eq(author_id))
            .select(Follow::as_select())
            .first(connection)
            .optional()
    }

    /// Creates the pair unless it is already there; returns the number of
    /// rows inserted.
    pub fn follow(user_id: i32, author_id: i32, connection: &mut SqliteConnection) -> QueryResult<usize> {
        insert_into(follows::table)
            .values(&NewFollow { user_id, author_id })
            .on_conflict((follows::user_id, follows::author_id))
            .do_nothing()
            .execute(connection)
    }

    pub fn unfollow(user_id: i32, author_id: i32, connection: &mut SqliteConnection) -> QueryResult<usize> {
        delete(
            follows::table
                .filter(follows::user_id.eq(user_id))
                .filter(follows::author_id.eq(author_id)),
        )
        .execute(connection)
    }

    pub fn followers_count(author_id: i32, connection: &mut SqliteConnection) -> QueryResult<i64> {
        follows::table
            .filter(follows::author_id.eq(author_id))
            .count()
            .get_result(connection)
    }

    pub fn following_count(user_id: i32, connection: &mut SqliteConnection) -> QueryResult<i64> {
        follows::table
            .filter(follows::user_id.eq(user_id))
            .count()
            .get_result(connection)
    }
}

#[derive(Debug, Serialize)]
pub struct Profile {
    pub username: String,
    pub full_name: String,
    pub posts_count: i64,
    pub followers_count: i64,
    pub following_count: i64,
    pub following: bool,
    pub is_self: bool,
}

#[get("/<username>?<page>")]
pub fn profile(
    current_user: Option<User>,
    mut connection: DbConnection,
    settings: &State<Settings>,
    username: &str,
    page: Option<&str>,
) -> AppResult<Template> {
    let author = User::load_by_name(username, &mut connection)?;
    let following = match &current_user {
        Some(current) => Follow::find(current.id, author.id, &mut connection)?.is_some(),
        None => false,
    };

    let page = PostFilter::Author(author.id).page(page, settings.page_size, &mut connection)?;
    let profile = Profile {
        posts_count: page.count,
        followers_count: Follow::followers_count(author.id, &mut connection)?,
        following_count: Follow::following_count(author.id, &mut connection)?,
        following,
        is_self: current_user.as_ref().map(|u| u.id) == Some(author.id),
        username: author.username,
        full_name: author.full_name,
    };

    Ok(Template::render(
        "posts/profile",
        context! {
            viewer: current_user,
            count: profile.posts_count,
            author: profile,
            page,
        },
    ))
}

#[get("/<name>/follow", rank = 4)]
pub fn follow(current_user: CurrentUser, mut connection: DbConnection, name: &str) -> AppResult<Redirect> {
    let current = current_user?;
    let author = User::load_by_name(name, &mut connection)?;
    if current.id == author.id {
        tracing::debug!("{} tried to follow themselves", current.username);
        return Ok(Redirect::found(profile_url(&author.username)));
    }

    if Follow::follow(current.id, author.id, &mut connection)? > 0 {
        tracing::info!("{} now follows {}", current.username, author.username);
    }
    Ok(Redirect::found(profile_url(&author.username)))
}

#[get("/<name>/unfollow", rank = 4)]
pub fn unfollow(current_user: CurrentUser, mut connection: DbConnection, name: &str) -> AppResult<Redirect> {
    let current = current_user?;
    let author = User::load_by_name(name, &mut connection)?;
    if Follow::unfollow(current.id, author.id, &mut connection)? > 0 {
        tracing::info!("{} unfollowed {}", current.username, author.username);
    }
    Ok(Redirect::found(profile_url(&author.username)))
}
