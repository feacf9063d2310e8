use crate::config::AppConfig;
use crate::entities;
use crate::errors::ServiceError;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use std::time::Duration;
use tracing::{debug, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool using the pool/timeout knobs from config.
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let mut opt = ConnectOptions::new(cfg.database_url.clone());

    opt.max_connections(cfg.db_max_connections)
        .min_connections(cfg.db_min_connections)
        .connect_timeout(Duration::from_secs(cfg.db_connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(cfg.db_acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(cfg.db_idle_timeout_secs))
        .sqlx_logging(false);

    debug!(
        max_connections = cfg.db_max_connections,
        "connecting to database"
    );

    let pool = Database::connect(opt).await?;
    info!("database connection established");
    Ok(pool)
}

/// Creates any missing tables from the entity definitions.
///
/// The schema is small enough that deriving DDL from the entities replaces a
/// separate migrations crate; production deployments run this behind the
/// `auto_migrate` config flag, tests run it unconditionally.
pub async fn ensure_schema(db: &DbPool) -> Result<(), DbErr> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut statements = vec![
        schema.create_table_from_entity(entities::product::Entity),
        schema.create_table_from_entity(entities::promo_code::Entity),
        schema.create_table_from_entity(entities::order::Entity),
        schema.create_table_from_entity(entities::order_item::Entity),
    ];

    for stmt in statements.iter_mut() {
        db.execute(builder.build(stmt.if_not_exists())).await?;
    }

    info!("database schema ensured");
    Ok(())
}
