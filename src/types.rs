use diesel::result::Error as DieselError;
use diesel::SqliteConnection;
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Redirect, Responder};
use rocket_dyn_templates::Template;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Error as IoError;

use crate::utils::login_url;

/// Form-level errors that are not tied to a single field.
pub const NON_FIELD_ERRORS: &str = "__all__";

pub trait Validate {
    type Error;
    fn validate(&self, connection: &mut SqliteConnection) -> Result<(), Self::Error>;
}

#[derive(Debug)]
pub enum AppError {
    Diesel(DieselError),
    Validation(ValidationError),
    NotFound,
    Unauthenticated,
    Internal,
}

impl From<DieselError> for AppError {
    fn from(err: DieselError) -> AppError {
        AppError::Diesel(err)
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> AppError {
        AppError::Validation(err)
    }
}

impl From<IoError> for AppError {
    fn from(err: IoError) -> AppError {
        tracing::error!("i/o error: {}", err);
        AppError::Internal
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Form handlers either re-render the page (with errors) or redirect.
#[derive(Responder)]
pub enum Reply {
    Page(Template),
    Redirect(Redirect),
}

#[derive(Debug, Serialize, Default, Clone, PartialEq)]
pub struct ValidationError(BTreeMap<String, Vec<String>>);

impl ValidationError {
    pub fn add_error<K: Into<String>, V: Into<String>>(&mut self, key: K, val: V) {
        self.0.entry(key.into()).or_default().push(val.into());
    }

    pub fn from<K: Into<String>, V: Into<String>>(key: K, val: V) -> Self {
        let mut error = ValidationError::default();
        error.add_error(key, val);
        error
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn merge(&mut self, other: ValidationError) {
        for (key, errors) in other.0.into_iter() {
            self.0.entry(key).or_default().extend(errors);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    /// `Ok(())` when nothing was collected, the collected errors otherwise.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for AppError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        match self {
            AppError::Diesel(error) => match error {
                DieselError::NotFound => Err(Status::NotFound),
                other => {
                    tracing::error!("database error on {}: {}", req.uri(), other);
                    Err(Status::InternalServerError)
                }
            },

            AppError::NotFound => Err(Status::NotFound),

            AppError::Validation(errors) => {
                tracing::warn!("unhandled validation errors on {}: {:?}", req.uri(), errors);
                Err(Status::UnprocessableEntity)
            }

            AppError::Unauthenticated => Redirect::found(login_url(req.uri().path().as_str()))
                .respond_to(req),

            AppError::Internal => Err(Status::InternalServerError),
        }
    }
}
