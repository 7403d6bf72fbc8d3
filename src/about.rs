use rocket_dyn_templates::{context, Template};

use crate::users::models::User;

#[get("/author")]
pub fn author(user: Option<User>) -> Template {
    Template::render("about/author", context! { viewer: user })
}

#[get("/tech")]
pub fn tech(user: Option<User>) -> Template {
    Template::render("about/tech", context! { viewer: user })
}
