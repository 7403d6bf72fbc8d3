#[macro_use]
extern crate rocket;

mod about;
mod comment;
mod config;
mod db;
mod group;
mod pagination;
mod post;
mod profile;
mod types;
mod users;
mod utils;

#[cfg(test)]
mod tests;

use rocket::fairing::AdHoc;
use rocket::figment::Figment;
use rocket::fs::FileServer;
use rocket::http::uri::fmt::Path;
use rocket::http::uri::Segments;
use rocket::http::Status;
use rocket::request::Request;
use rocket::{Build, Rocket};
use rocket_dyn_templates::{context, Template};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use config::Settings;

#[catch(404)]
fn not_found(req: &Request) -> Template {
    Template::render(
        "misc/404",
        context! { viewer: Option::<()>::None, path: req.uri().path().as_str() },
    )
}

/// Paths whose dynamic segments failed to parse (`/leo/abc/`) are forwarded
/// with a 422 by every route; they end here as plain not-found pages.
#[get("/<_path..>", rank = 100)]
fn unmatched_get(_path: Segments<'_, Path>) -> Status {
    Status::NotFound
}

#[post("/<_path..>", rank = 100)]
fn unmatched_post(_path: Segments<'_, Path>) -> Status {
    Status::NotFound
}

#[catch(500)]
fn server_error() -> Template {
    Template::render("misc/500", context! { viewer: Option::<()>::None })
}

fn init_database(rocket: Rocket<Build>) -> Result<Rocket<Build>, Rocket<Build>> {
    let settings = match rocket.state::<Settings>() {
        Some(settings) => settings.clone(),
        None => return Err(rocket),
    };

    let timeout = Duration::from_secs(settings.pool_timeout);
    let pool = match db::init_pool(&settings.database_url, settings.pool_size, timeout) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("failed to open {}: {}", settings.database_url, e);
            return Err(rocket);
        }
    };
    if let Err(e) = db::run_migrations(&pool) {
        tracing::error!("{}", e);
        return Err(rocket);
    }

    Ok(rocket.manage(pool))
}

fn mount_media(rocket: Rocket<Build>) -> Result<Rocket<Build>, Rocket<Build>> {
    let media_dir = match rocket.state::<Settings>() {
        Some(settings) => settings.media_dir.clone(),
        None => return Err(rocket),
    };
    if let Err(e) = std::fs::create_dir_all(&media_dir) {
        tracing::error!("cannot create media directory {}: {}", media_dir.display(), e);
        return Err(rocket);
    }
    Ok(rocket.mount("/media", FileServer::from(media_dir)))
}

pub fn build_rocket(figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .attach(AdHoc::config::<Settings>())
        .attach(AdHoc::try_on_ignite("Database", |rocket| async move { init_database(rocket) }))
        .attach(AdHoc::try_on_ignite("Media", |rocket| async move { mount_media(rocket) }))
        .attach(Template::fairing())
        .mount(
            "/",
            routes![
                post::index,
                post::follow_index,
                post::new_post_page,
                post::new_post,
                post::post_view,
                post::post_edit_page,
                post::post_edit,
                comment::add,
                profile::profile,
                profile::follow,
                profile::unfollow,
                unmatched_get,
                unmatched_post,
            ],
        )
        .mount(
            "/group",
            routes![group::group_posts, group::new_group_page, group::new_group],
        )
        .mount(
            "/auth",
            routes![
                users::signup_page,
                users::signup,
                users::login_page,
                users::login,
                users::logout,
            ],
        )
        .mount("/about", routes![about::author, about::tech])
        .register("/", catchers![not_found, server_error])
}

#[launch]
fn rocket() -> _ {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();

    build_rocket(config::figment())
}
