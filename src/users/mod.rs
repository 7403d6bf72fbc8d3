use diesel::SqliteConnection;
use rocket::form::Form;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::outcome::Outcome;
use rocket::request::{self, FromRequest};
use rocket::response::Redirect;
use rocket::{Request, State};
use rocket_dyn_templates::{context, Template};

use crate::config::Settings;
use crate::db::DbConnection;
use crate::types::{AppError, AppResult, Reply, ValidationError, Validate, NON_FIELD_ERRORS};
use crate::utils::is_local_path;

pub mod models;
mod utils;

use self::models::{NewUser, User};
use self::utils::*;

pub const SESSION_COOKIE: &str = "session";

/// A login-required guard: handlers use `user?` so anonymous requests are
/// redirected to the login page.
///
/// Handlers list user guards before their `DbConnection`: the session lookup
/// returns its connection to the pool before the handler checks one out.
pub type CurrentUser = Result<User, AppError>;

/// Resolves the session cookie once per request, however many user guards
/// the handler asks for.
async fn session_user(request: &Request<'_>) -> Result<User, Status> {
    let token = match request.cookies().get(SESSION_COOKIE) {
        Some(cookie) => cookie.value().to_string(),
        None => return Err(Status::Unauthorized),
    };

    let settings = request
        .rocket()
        .state::<Settings>()
        .ok_or(Status::InternalServerError)?;

    let mut connection = match DbConnection::from_request(request).await {
        Outcome::Success(connection) => connection,
        _ => return Err(Status::ServiceUnavailable),
    };

    match User::load_from_token(&token, &settings.session_secret, &mut connection) {
        Ok(user) => Ok(user),
        Err(AppError::Unauthenticated) => {
            tracing::debug!("ignoring invalid session cookie");
            Err(Status::Unauthorized)
        }
        Err(e) => {
            tracing::error!("failed to load session user: {:?}", e);
            Err(Status::InternalServerError)
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = AppError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        match request.local_cache_async(session_user(request)).await {
            Ok(user) => Outcome::Success(user.clone()),
            Err(status) if *status == Status::Unauthorized => Outcome::Error((Status::Unauthorized, AppError::Unauthenticated)),
            Err(status) => Outcome::Error((*status, AppError::Internal)),
        }
    }
}

fn start_session(user: &User, settings: &Settings, cookies: &CookieJar<'_>) -> Result<(), AppError> {
    let token = user.session_token(&settings.session_secret)?;
    let cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);
    cookies.add(cookie);
    Ok(())
}

fn after_login(next: Option<String>) -> Redirect {
    match next {
        Some(next) if is_local_path(&next) => Redirect::found(next),
        _ => Redirect::found("/"),
    }
}

#[derive(Debug, FromForm)]
pub struct SignupForm {
    #[field(default = String::new())]
    username: String,
    #[field(default = String::new())]
    email: String,
    #[field(default = String::new())]
    full_name: String,
    #[field(default = String::new())]
    password1: String,
    #[field(default = String::new())]
    password2: String,
}

impl Validate for SignupForm {
    type Error = AppError;

    fn validate(&self, connection: &mut SqliteConnection) -> Result<(), Self::Error> {
        let mut errors = ValidationError::default();

        match validate_username(self.username.trim(), connection) {
            Ok(_) => {}
            Err(AppError::Validation(e)) => errors.merge(e),
            Err(other) => return Err(other),
        }

        let email = self.email.trim();
        if !email.is_empty() {
            if let Err(e) = validate_email_re(email) {
                errors.merge(e);
            }
        }

        if let Err(e) = validate_password(&self.password1, &self.password2) {
            errors.merge(e);
        }

        errors.into_result().map_err(|e| e.into())
    }
}

fn signup_template(viewer: Option<&User>, form: Option<&SignupForm>, errors: &ValidationError) -> Template {
    Template::render(
        "auth/signup",
        context! {
            viewer,
            username: form.map(|f| f.username.as_str()).unwrap_or_default(),
            email: form.map(|f| f.email.as_str()).unwrap_or_default(),
            full_name: form.map(|f| f.full_name.as_str()).unwrap_or_default(),
            errors,
        },
    )
}

#[get("/signup")]
pub fn signup_page(user: Option<User>) -> Template {
    signup_template(user.as_ref(), None, &ValidationError::default())
}

#[post("/signup", data = "<signup>")]
pub fn signup(
    mut connection: DbConnection,
    settings: &State<Settings>,
    cookies: &CookieJar<'_>,
    signup: Form<SignupForm>,
) -> AppResult<Reply> {
    let signup = signup.into_inner();
    match signup.validate(&mut connection) {
        Ok(_) => {}
        Err(AppError::Validation(errors)) => {
            tracing::warn!("rejected signup for {:?}: {:?}", signup.username, errors);
            return Ok(Reply::Page(signup_template(None, Some(&signup), &errors)));
        }
        Err(other) => return Err(other),
    }

    let new_user = NewUser {
        username: signup.username.trim().to_string(),
        email: signup.email.trim().to_string(),
        full_name: signup.full_name.trim().to_string(),
        password_hash: User::make_password(&signup.password1)?,
    };
    let user = User::create(&new_user, &mut connection)?;
    tracing::info!("registered user {}", user.username);

    start_session(&user, settings, cookies)?;
    Ok(Reply::Redirect(Redirect::found("/")))
}

#[derive(Debug, FromForm)]
pub struct LoginForm {
    #[field(default = String::new())]
    username: String,
    #[field(default = String::new())]
    password: String,
}

fn login_template(
    viewer: Option<&User>,
    username: &str,
    next: Option<&str>,
    errors: &ValidationError,
) -> Template {
    Template::render(
        "auth/login",
        context! { viewer, username, next, errors },
    )
}

#[get("/login?<next>")]
pub fn login_page(user: Option<User>, next: Option<String>) -> Template {
    login_template(user.as_ref(), "", next.as_deref(), &ValidationError::default())
}

#[post("/login?<next>", data = "<login>")]
pub fn login(
    mut connection: DbConnection,
    settings: &State<Settings>,
    cookies: &CookieJar<'_>,
    next: Option<String>,
    login: Form<LoginForm>,
) -> AppResult<Reply> {
    let username = login.username.trim();
    let user = match User::load_by_name(username, &mut connection) {
        Ok(user) => Some(user),
        Err(AppError::Diesel(diesel::result::Error::NotFound)) => None,
        Err(other) => return Err(other),
    };

    match user {
        Some(user) if user.verify_password(&login.password) => {
            start_session(&user, settings, cookies)?;
            tracing::info!("{} logged in", user.username);
            Ok(Reply::Redirect(after_login(next)))
        }
        _ => {
            tracing::warn!("failed login attempt for {:?}", username);
            let errors = ValidationError::from(
                NON_FIELD_ERRORS,
                "Please enter a correct username and password. Note that both fields may be case-sensitive.",
            );
            Ok(Reply::Page(login_template(None, username, next.as_deref(), &errors)))
        }
    }
}

#[get("/logout")]
pub fn logout(cookies: &CookieJar<'_>) -> Template {
    cookies.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Template::render("auth/logged_out", context! { viewer: Option::<User>::None })
}
