use sqlx::{Pool, Postgres};

use crate::Result;

/// Apply the core DDL from `sql/0001_init.sql`. Test-support only; real
/// deployments go through `SchemaManager::sync`.
pub async fn migrate_core_schema(pool: &Pool<Postgres>) -> Result<()> {
    let ddl = include_str!("../sql/0001_init.sql");
    for stmt in ddl.split(';') {
        let stmt = stmt.trim();
        if stmt.is_empty() {
            continue;
        }
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}
