use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::select;
use lazy_static::lazy_static;
use regex::Regex;
use rocket::form::Form;
use rocket::response::Redirect;
use rocket::State;
use rocket_dyn_templates::{context, Template};
use serde::Serialize;
use slug::slugify;

use crate::config::Settings;
use crate::db::schema::post_groups;
use crate::db::DbConnection;
use crate::post::PostFilter;
use crate::types::{AppError, AppResult, Reply, Validate, ValidationError};
use crate::users::models::User;
use crate::users::CurrentUser;

lazy_static! {
    static ref SLUG_RE: Regex = Regex::new(r"\A[-a-zA-Z0-9_]+\z").unwrap();
}

/// Slugs that would shadow fixed routes under `/group/`.
const RESERVED_SLUGS: &[&str] = &["new"];

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = post_groups)]
pub struct Group {
    pub id: i32,
    pub title: String,
    pub slug: String,
    pub description: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = post_groups)]
pub struct NewGroup {
    pub title: String,
    pub slug: String,
    pub description: String,
}

impl NewGroup {
    /// Builds a group whose slug is derived from its title.
    pub fn from_title(title: &str, description: &str) -> Self {
        NewGroup {
            title: title.trim().to_string(),
            slug: slugify(title),
            description: description.trim().to_string(),
        }
    }
}

impl Group {
    pub fn load_by_slug(slug: &str, connection: &mut SqliteConnection) -> QueryResult<Group> {
        post_groups::table
            .filter(post_groups::slug.eq(slug))
            .select(Group::as_select())
            .first(connection)
    }

    pub fn exists(group_id: i32, connection: &mut SqliteConnection) -> QueryResult<bool> {
        select(exists(post_groups::table.find(group_id))).get_result(connection)
    }

    pub fn all(connection: &mut SqliteConnection) -> QueryResult<Vec<Group>> {
        post_groups::table
            .order(post_groups::title.asc())
            .select(Group::as_select())
            .load(connection)
    }

    pub fn create(new_group: &NewGroup, connection: &mut SqliteConnection) -> QueryResult<Group> {
        diesel::insert_into(post_groups::table)
            .values(new_group)
            .returning(Group::as_returning())
            .get_result(connection)
    }

    pub fn url(&self) -> String {
        format!("/group/{}/", self.slug)
    }
}

#[derive(Debug, FromForm, Serialize)]
pub struct GroupForm {
    #[field(default = String::new())]
    title: String,
    #[field(default = String::new())]
    slug: String,
    #[field(default = String::new())]
    description: String,
}

impl GroupForm {
    fn new_group(&self) -> NewGroup {
        let mut group = NewGroup::from_title(&self.title, &self.description);
        if !self.slug.trim().is_empty() {
            group.slug = self.slug.trim().to_string();
        }
        group
    }
}

impl Validate for GroupForm {
    type Error = AppError;

    fn validate(&self, connection: &mut SqliteConnection) -> Result<(), Self::Error> {
        let mut errors = ValidationError::default();

        if self.title.trim().is_empty() {
            errors.add_error("title", "This field is required.");
        }
        if self.title.chars().count() > 200 {
            errors.add_error("title", "Ensure this value has at most 200 characters.");
        }
        if self.description.trim().is_empty() {
            errors.add_error("description", "This field is required.");
        }

        let slug = self.new_group().slug;
        if slug.is_empty() || !SLUG_RE.is_match(&slug) {
            errors.add_error(
                "slug",
                "Enter a valid slug consisting of letters, numbers, underscores or hyphens.",
            );
        } else if RESERVED_SLUGS.contains(&slug.as_str()) {
            errors.add_error("slug", format!("\"{}\" is reserved.", slug));
        } else {
            let taken = select(exists(post_groups::table.filter(post_groups::slug.eq(&slug))))
                .get_result::<bool>(connection)?;
            if taken {
                errors.add_error("slug", "Group with this slug already exists.");
            }
        }

        errors.into_result().map_err(|e| e.into())
    }
}

fn group_form_template(viewer: &User, form: Option<&GroupForm>, errors: &ValidationError) -> Template {
    Template::render("posts/new_group", context! { viewer, form, errors })
}

#[get("/<slug>?<page>")]
pub fn group_posts(
    user: Option<User>,
    mut connection: DbConnection,
    settings: &State<Settings>,
    slug: &str,
    page: Option<&str>,
) -> AppResult<Template> {
    let group = Group::load_by_slug(slug, &mut connection)?;
    let page = PostFilter::Group(group.id).page(page, settings.page_size, &mut connection)?;
    Ok(Template::render("posts/group", context! { viewer: user, group, page }))
}

#[get("/new")]
pub fn new_group_page(user: CurrentUser) -> AppResult<Template> {
    let user = user?;
    Ok(group_form_template(&user, None, &ValidationError::default()))
}

#[post("/new", data = "<form>")]
pub fn new_group(
    user: CurrentUser,
    mut connection: DbConnection,
    form: Form<GroupForm>,
) -> AppResult<Reply> {
    let user = user?;
    match form.validate(&mut connection) {
        Ok(_) => {}
        Err(AppError::Validation(errors)) => {
            return Ok(Reply::Page(group_form_template(&user, Some(&*form), &errors)));
        }
        Err(other) => return Err(other),
    }

    let group = Group::create(&form.new_group(), &mut connection)?;
    tracing::info!("{} created group {}", user.username, group.slug);
    Ok(Reply::Redirect(Redirect::found(group.url())))
}
