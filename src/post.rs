use chrono::{NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::sqlite::Sqlite;
use file_format::FileFormat;
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::response::Redirect;
use rocket::State;
use rocket_dyn_templates::{context, Template};
use serde::Serialize;
use std::collections::HashMap;

use crate::comment::Comment;
use crate::config::Settings;
use crate::db::schema::{comments, follows, post_groups, posts, users};
use crate::db::DbConnection;
use crate::group::Group;
use crate::pagination::{Page, Paginator};
use crate::profile::{profile_url, Follow};
use crate::types::{AppError, AppResult, Reply, Validate, ValidationError};
use crate::users::models::{Author, User};
use crate::users::CurrentUser;
use crate::utils::{
    image_format, remove_image, serialize_date, store_image, submitted_image, INVALID_IMAGE,
};

const INVALID_CHOICE: &str = "Select a valid choice. That choice is not one of the available choices.";

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable)]
#[diesel(table_name = posts)]
pub struct Post {
    pub id: i32,
    pub text: String,
    pub pub_date: NaiveDateTime,
    pub author_id: i32,
    pub group_id: Option<i32>,
    pub image: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = posts)]
pub struct NewPost {
    pub text: String,
    pub pub_date: NaiveDateTime,
    pub author_id: i32,
    pub group_id: Option<i32>,
    pub image: Option<String>,
}

/// The editable part of a post; author and publication date never change.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = posts, treat_none_as_null = true)]
struct PostChanges {
    text: String,
    group_id: Option<i32>,
    image: Option<String>,
}

/// A post as it is shown in listings: with its author, group and the number
/// of comments it has collected.
#[derive(Debug, Clone, Serialize)]
pub struct PostCard {
    pub id: i32,
    pub text: String,
    #[serde(serialize_with = "serialize_date")]
    pub pub_date: NaiveDateTime,
    pub image: Option<String>,
    pub author: Author,
    pub group: Option<Group>,
    pub comments_count: i64,
}

/// Which posts a listing shows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostFilter {
    All,
    Group(i32),
    Author(i32),
    /// Posts by everyone the given user follows.
    FollowedBy(i32),
}

impl PostFilter {
    fn query(self) -> posts::BoxedQuery<'static, Sqlite> {
        let query = posts::table.into_boxed();
        match self {
            PostFilter::All => query,
            PostFilter::Group(group_id) => query.filter(posts::group_id.eq(group_id)),
            PostFilter::Author(author_id) => query.filter(posts::author_id.eq(author_id)),
            PostFilter::FollowedBy(user_id) => query.filter(
                posts::author_id.eq_any(
                    follows::table
                        .filter(follows::user_id.eq(user_id))
                        .select(follows::author_id),
                ),
            ),
        }
    }

    pub fn count(self, connection: &mut SqliteConnection) -> QueryResult<i64> {
        self.query().count().get_result(connection)
    }

    /// One page of matching posts, newest first.
    pub fn page(
        self,
        requested: Option<&str>,
        per_page: i64,
        connection: &mut SqliteConnection,
    ) -> QueryResult<Page<PostCard>> {
        let window = Paginator::new(self.count(connection)?, per_page).page(requested);
        let posts = self
            .query()
            .order((posts::pub_date.desc(), posts::id.desc()))
            .limit(window.limit)
            .offset(window.offset)
            .select(Post::as_select())
            .load(connection)?;
        Ok(Page::new(PostCard::decorate(posts, connection)?, window))
    }
}

impl Post {
    pub fn load(post_id: i32, connection: &mut SqliteConnection) -> QueryResult<Post> {
        posts::table
            .find(post_id)
            .select(Post::as_select())
            .first(connection)
    }

    /// Loads a post only when it was written by `username`.
    pub fn load_for_author(
        post_id: i32,
        username: &str,
        connection: &mut SqliteConnection,
    ) -> QueryResult<Post> {
        posts::table
            .inner_join(users::table)
            .filter(posts::id.eq(post_id))
            .filter(users::username.eq(username))
            .select(Post::as_select())
            .first(connection)
    }

    pub fn create(new_post: &NewPost, connection: &mut SqliteConnection) -> QueryResult<Post> {
        diesel::insert_into(posts::table)
            .values(new_post)
            .returning(Post::as_returning())
            .get_result(connection)
    }

    pub fn image_url(&self) -> Option<String> {
        self.image.as_ref().map(|path| format!("/media/{}", path))
    }

    pub fn detail_url(&self, username: &str) -> String {
        format!("/{}/{}/", username, self.id)
    }
}

impl PostCard {
    /// Attaches authors, groups and comment counts to a list of posts,
    /// keeping the order of `posts`.
    pub fn decorate(posts: Vec<Post>, connection: &mut SqliteConnection) -> QueryResult<Vec<PostCard>> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }

        let post_ids: Vec<i32> = posts.iter().map(|p| p.id).collect();
        let author_ids: Vec<i32> = posts.iter().map(|p| p.author_id).collect();
        let group_ids: Vec<i32> = posts.iter().filter_map(|p| p.group_id).collect();

        let authors = users::table
            .filter(users::id.eq_any(author_ids))
            .select(Author::as_select())
            .load(connection)?
            .into_iter()
            .map(|author| (author.id, author))
            .collect::<HashMap<_, _>>();

        let groups = post_groups::table
            .filter(post_groups::id.eq_any(group_ids))
            .select(Group::as_select())
            .load(connection)?
            .into_iter()
            .map(|group| (group.id, group))
            .collect::<HashMap<_, _>>();

        let comment_counts = comments::table
            .filter(comments::post_id.eq_any(post_ids))
            .group_by(comments::post_id)
            .select((comments::post_id, count_star()))
            .load::<(i32, i64)>(connection)?
            .into_iter()
            .collect::<HashMap<_, _>>();

        let cards = posts
            .into_iter()
            .filter_map(|post| {
                let author = authors.get(&post.author_id)?.clone();
                Some(PostCard {
                    id: post.id,
                    image: post.image_url(),
                    group: post.group_id.and_then(|id| groups.get(&id).cloned()),
                    comments_count: comment_counts.get(&post.id).copied().unwrap_or(0),
                    text: post.text,
                    pub_date: post.pub_date,
                    author,
                })
            })
            .collect();
        Ok(cards)
    }
}

#[derive(Debug, FromForm)]
pub struct PostForm<'r> {
    #[field(default = String::new())]
    text: String,
    group: Option<String>,
    image: Option<TempFile<'r>>,
    clear_image: bool,
}

impl<'r> PostForm<'r> {
    fn group_id(&self) -> Result<Option<i32>, ValidationError> {
        match self.group.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse::<i32>()
                .map(Some)
                .map_err(|_| ValidationError::from("group", INVALID_CHOICE)),
        }
    }

    fn values(&self, current_image: Option<String>) -> FormValues {
        FormValues {
            text: self.text.clone(),
            group: self.group_id().ok().flatten(),
            image: current_image,
        }
    }
}

impl<'r> Validate for PostForm<'r> {
    type Error = AppError;

    fn validate(&self, connection: &mut SqliteConnection) -> Result<(), Self::Error> {
        let mut errors = ValidationError::default();

        if self.text.trim().is_empty() {
            errors.add_error("text", "This field is required.");
        }

        match self.group_id() {
            Ok(Some(group_id)) => {
                if !Group::exists(group_id, connection)? {
                    errors.add_error("group", INVALID_CHOICE);
                }
            }
            Ok(None) => {}
            Err(e) => errors.merge(e),
        }

        errors.into_result().map_err(|e| e.into())
    }
}

impl<'r> PostForm<'r> {
    /// Field checks plus a look inside the uploaded file. Yields the detected
    /// image format when there is an upload.
    async fn check(
        &self,
        connection: &mut SqliteConnection,
    ) -> AppResult<Result<Option<FileFormat>, ValidationError>> {
        let mut errors = match self.validate(connection) {
            Ok(()) => ValidationError::default(),
            Err(AppError::Validation(errors)) => errors,
            Err(other) => return Err(other),
        };

        let mut format = None;
        if let Some(file) = self.image.as_ref().filter(|f| f.len() > 0) {
            match image_format(file).await? {
                Some(detected) => format = Some(detected),
                None => errors.add_error("image", INVALID_IMAGE),
            }
        }

        Ok(errors.into_result().map(|_| format))
    }
}

/// What the post form shows in its fields.
#[derive(Debug, Default, Serialize)]
struct FormValues {
    text: String,
    group: Option<i32>,
    image: Option<String>,
}

impl From<&Post> for FormValues {
    fn from(post: &Post) -> Self {
        FormValues {
            text: post.text.clone(),
            group: post.group_id,
            image: post.image_url(),
        }
    }
}

fn post_form_template(
    viewer: &User,
    values: &FormValues,
    errors: &ValidationError,
    editing: Option<&Post>,
    connection: &mut SqliteConnection,
) -> AppResult<Template> {
    let groups = Group::all(connection)?;
    Ok(Template::render(
        "posts/new_post",
        context! {
            viewer,
            form: values,
            groups,
            errors,
            is_edit: editing.is_some(),
            action: editing
                .map(|post| format!("{}edit/", post.detail_url(&viewer.username)))
                .unwrap_or_else(|| "/new/".to_string()),
        },
    ))
}

#[get("/?<page>")]
pub fn index(
    user: Option<User>,
    mut connection: DbConnection,
    settings: &State<Settings>,
    page: Option<&str>,
) -> AppResult<Template> {
    let page = PostFilter::All.page(page, settings.page_size, &mut connection)?;
    Ok(Template::render("posts/index", context! { viewer: user, page }))
}

#[get("/follow?<page>")]
pub fn follow_index(
    user: CurrentUser,
    mut connection: DbConnection,
    settings: &State<Settings>,
    page: Option<&str>,
) -> AppResult<Template> {
    let user = user?;
    let page = PostFilter::FollowedBy(user.id).page(page, settings.page_size, &mut connection)?;
    Ok(Template::render("posts/follow", context! { viewer: user, page }))
}

#[get("/new")]
pub fn new_post_page(user: CurrentUser, mut connection: DbConnection) -> AppResult<Template> {
    let user = user?;
    post_form_template(
        &user,
        &FormValues::default(),
        &ValidationError::default(),
        None,
        &mut connection,
    )
}

#[post("/new", data = "<form>")]
pub async fn new_post(
    user: CurrentUser,
    mut connection: DbConnection,
    settings: &State<Settings>,
    mut form: Form<PostForm<'_>>,
) -> AppResult<Reply> {
    let user = user?;
    let format = match form.check(&mut connection).await? {
        Ok(format) => format,
        Err(errors) => {
            tracing::warn!("rejected new post by {}: {:?}", user.username, errors);
            let values = form.values(None);
            return post_form_template(&user, &values, &errors, None, &mut connection).map(Reply::Page);
        }
    };

    let group_id = form.group_id()?;
    let image = match (submitted_image(&mut form.image), format) {
        (Some(file), Some(format)) => Some(store_image(file, format, &settings.media_dir).await?),
        _ => None,
    };

    let new_post = NewPost {
        text: form.text.trim().to_string(),
        pub_date: Utc::now().naive_utc(),
        author_id: user.id,
        group_id,
        image,
    };
    let post = match Post::create(&new_post, &mut connection) {
        Ok(post) => post,
        Err(e) => {
            if let Some(path) = &new_post.image {
                remove_image(&settings.media_dir, path).await;
            }
            return Err(e.into());
        }
    };
    tracing::info!("{} published post {}", user.username, post.id);

    Ok(Reply::Redirect(Redirect::found("/")))
}

#[get("/<username>/<post_id>", rank = 3)]
pub fn post_view(
    user: Option<User>,
    mut connection: DbConnection,
    username: &str,
    post_id: i32,
) -> AppResult<Template> {
    let post = Post::load_for_author(post_id, username, &mut connection)?;
    let count = PostFilter::Author(post.author_id).count(&mut connection)?;
    let following = match &user {
        Some(viewer) => Follow::find(viewer.id, post.author_id, &mut connection)?.is_some(),
        None => false,
    };
    let comments = Comment::for_post(&post, &mut connection)?;
    let card = PostCard::decorate(vec![post], &mut connection)?
        .pop()
        .ok_or(AppError::NotFound)?;

    Ok(Template::render(
        "posts/post",
        context! {
            viewer: user,
            author: &card.author,
            count,
            following,
            post: &card,
            comments,
            errors: ValidationError::default(),
        },
    ))
}

/// Non-authors, anonymous visitors included, are sent to the author's
/// profile instead of the form.
fn forbidden_edit(post: &Post, connection: &mut SqliteConnection) -> AppResult<Redirect> {
    let author = users::table
        .find(post.author_id)
        .select(users::username)
        .first::<String>(connection)?;
    Ok(Redirect::found(profile_url(&author)))
}

#[get("/<_username>/<post_id>/edit")]
pub fn post_edit_page(
    user: Option<User>,
    mut connection: DbConnection,
    _username: &str,
    post_id: i32,
) -> AppResult<Reply> {
    let post = Post::load(post_id, &mut connection)?;
    let user = match user {
        Some(user) if user.id == post.author_id => user,
        _ => return forbidden_edit(&post, &mut connection).map(Reply::Redirect),
    };

    post_form_template(
        &user,
        &FormValues::from(&post),
        &ValidationError::default(),
        Some(&post),
        &mut connection,
    )
    .map(Reply::Page)
}

#[post("/<_username>/<post_id>/edit", data = "<form>")]
pub async fn post_edit(
    user: Option<User>,
    mut connection: DbConnection,
    settings: &State<Settings>,
    _username: &str,
    post_id: i32,
    mut form: Form<PostForm<'_>>,
) -> AppResult<Reply> {
    let post = Post::load(post_id, &mut connection)?;
    let user = match user {
        Some(user) if user.id == post.author_id => user,
        _ => {
            tracing::warn!("refused edit of post {} by a non-author", post.id);
            return forbidden_edit(&post, &mut connection).map(Reply::Redirect);
        }
    };

    let format = match form.check(&mut connection).await? {
        Ok(format) => format,
        Err(errors) => {
            let values = form.values(post.image_url());
            return post_form_template(&user, &values, &errors, Some(&post), &mut connection)
                .map(Reply::Page);
        }
    };

    let group_id = form.group_id()?;
    let clear_image = form.clear_image;
    let uploaded = match (submitted_image(&mut form.image), format) {
        (Some(file), Some(format)) => Some(store_image(file, format, &settings.media_dir).await?),
        _ => None,
    };
    let image = match &uploaded {
        Some(path) => Some(path.clone()),
        None if clear_image => None,
        None => post.image.clone(),
    };

    let changes = PostChanges {
        text: form.text.trim().to_string(),
        group_id,
        image,
    };
    let updated = diesel::update(posts::table.find(post.id))
        .set(&changes)
        .execute(&mut *connection);
    if let Err(e) = updated {
        if let Some(path) = &uploaded {
            remove_image(&settings.media_dir, path).await;
        }
        return Err(e.into());
    }

    // The previous file is only dropped once the row no longer points at it.
    if let Some(old) = post.image.as_deref() {
        if changes.image.as_deref() != Some(old) {
            remove_image(&settings.media_dir, old).await;
        }
    }
    tracing::info!("{} edited post {}", user.username, post.id);

    Ok(Reply::Redirect(Redirect::found(post.detail_url(&user.username))))
}
