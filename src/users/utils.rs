use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::select;
use lazy_static::lazy_static;
use regex::Regex;

use crate::db::schema::users;
use crate::types::{AppError, ValidationError};

pub const USERNAME_MAX_LEN: usize = 150;
pub const PASSWORD_MIN_LEN: usize = 8;

/// First path segments taken by fixed routes; profiles under these names
/// could never be reached.
const RESERVED_USERNAMES: &[&str] = &["about", "auth", "follow", "group", "media", "new"];

lazy_static! {
    static ref EMAIL_RE: Regex = {
        let pattern = r"\A[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\z";
        Regex::new(pattern).unwrap()
    };
    static ref USERNAME_RE: Regex = Regex::new(r"\A[\w.@+-]+\z").unwrap();
}

pub fn validate_email_re(email: &str) -> Result<(), ValidationError> {
    if !EMAIL_RE.is_match(&email.to_lowercase()) {
        Err(ValidationError::from("email", "Enter a valid email address."))
    } else {
        Ok(())
    }
}

pub fn validate_username_re(username: &str) -> Result<(), ValidationError> {
    let mut errors = ValidationError::default();
    if username.is_empty() {
        errors.add_error("username", "This field is required.");
    } else if !USERNAME_RE.is_match(username) {
        errors.add_error(
            "username",
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
        );
    } else if RESERVED_USERNAMES.contains(&username) {
        errors.add_error("username", format!("\"{}\" is reserved.", username));
    }
    if username.chars().count() > USERNAME_MAX_LEN {
        errors.add_error(
            "username",
            format!("Ensure this value has at most {} characters.", USERNAME_MAX_LEN),
        );
    }
    errors.into_result()
}

pub fn validate_password(password: &str, confirmation: &str) -> Result<(), ValidationError> {
    let mut errors = ValidationError::default();
    if password.chars().count() < PASSWORD_MIN_LEN {
        errors.add_error(
            "password1",
            format!(
                "This password is too short. It must contain at least {} characters.",
                PASSWORD_MIN_LEN
            ),
        );
    }
    if password != confirmation {
        errors.add_error("password2", "The two password fields didn't match.");
    }
    errors.into_result()
}

pub fn validate_username(
    username_to_validate: &str,
    connection: &mut SqliteConnection,
) -> Result<(), AppError> {
    let mut errors = ValidationError::default();
    if let Err(e) = validate_username_re(username_to_validate) {
        errors.merge(e);
    }

    let username_exists = select(exists(
        users::table.filter(users::username.eq(username_to_validate)),
    ))
    .get_result::<bool>(connection)?;
    if username_exists {
        errors.add_error("username", "A user with that username already exists.");
    }

    errors.into_result().map_err(|e| e.into())
}
