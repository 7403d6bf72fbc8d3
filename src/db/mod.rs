use diesel::connection::SimpleConnection;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use error_chain::error_chain;
use rocket::http::Status;
use rocket::outcome::try_outcome;
use rocket::request::{self, FromRequest};
use rocket::tokio::task::spawn_blocking;
use rocket::{Request, State};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

pub mod schema;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

// An alias to the type for a pool of Diesel SQLite connections.
pub type Pool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

pub struct DbConnection(pub r2d2::PooledConnection<ConnectionManager<SqliteConnection>>);

error_chain! {
    foreign_links {
        R2D2(r2d2::PoolError);
    }

    errors {
        Migration(reason: String) {
            description("failed to run migrations")
            display("failed to run migrations: {}", reason)
        }
    }
}

/// Applied to every new connection: SQLite only enforces the cascades and
/// `SET NULL` rules of the schema with foreign keys switched on.
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> ::std::result::Result<(), r2d2::Error> {
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .map_err(r2d2::Error::QueryError)
    }
}

/// Attempts to retrieve a single connection from the managed database pool. If
/// no pool is currently managed, fails with an `InternalServerError` status. If
/// no connections are available, fails with a `ServiceUnavailable` status.
///
/// Checking out may block for the pool's connection timeout, so it runs on
/// the blocking thread pool instead of an async worker.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for DbConnection {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<DbConnection, ()> {
        let pool = try_outcome!(request.guard::<&State<Pool>>().await).inner().clone();
        match spawn_blocking(move || pool.get()).await {
            Ok(Ok(conn)) => request::Outcome::Success(DbConnection(conn)),
            Ok(Err(e)) => {
                tracing::error!("database pool exhausted: {}", e);
                request::Outcome::Error((Status::ServiceUnavailable, ()))
            }
            Err(e) => {
                tracing::error!("connection checkout task failed: {}", e);
                request::Outcome::Error((Status::InternalServerError, ()))
            }
        }
    }
}

// For the convenience of using an &DbConnection as an &SqliteConnection.
impl Deref for DbConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DbConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

pub fn init_pool(database_url: &str, max_size: u32, timeout: Duration) -> Result<Pool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .max_size(max_size)
        .connection_timeout(timeout)
        .connection_customizer(Box::new(ConnectionOptions))
        .build(manager)?;
    Ok(pool)
}

pub fn run_migrations(pool: &Pool) -> Result<()> {
    let mut pooled = pool.get()?;
    let conn: &mut SqliteConnection = &mut pooled;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| ErrorKind::Migration(e.to_string()))?;
    for version in applied {
        tracing::info!("applied migration {}", version);
    }
    Ok(())
}
