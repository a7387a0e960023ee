use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};

use crate::error::Result;

pub mod event;
pub mod group;
pub mod inhibit;
pub mod lock;
pub mod queue;
pub mod recovery;
pub mod robot;
pub mod rule;
pub mod template;
pub mod user;

/// Unified access layer over the management database.
///
/// All methods are `async fn` on SeaORM + SQLite. One instance is shared by
/// the HTTP API, the gRPC relay, the scheduler jobs and the queue workers.
pub struct Store {
    pub(crate) db: DatabaseConnection,
}

impl Store {
    /// Connect and bring the schema up to date.
    pub async fn connect(url: &str) -> Result<Self> {
        let db = Database::connect(url).await?;

        db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        Migrator::up(&db, None).await?;

        tracing::info!(url = %redact_url(url), "store initialized");
        Ok(Self { db })
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn redact_url(url: &str) -> String {
    // Strip any userinfo before logging.
    match url.split_once('@') {
        Some((scheme_and_auth, rest)) => match scheme_and_auth.split_once("://") {
            Some((scheme, _)) => format!("{scheme}://***@{rest}"),
            None => format!("***@{rest}"),
        },
        None => url.to_string(),
    }
}
