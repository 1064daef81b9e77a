use std::collections::HashSet;

use crate::Result;
use indoc::formatdoc;
use sqlx::PgPool;

#[derive(Clone, Debug)]
pub struct SchemaConfig {
    pub base_schema: String,
}

impl SchemaConfig {
    pub fn with_base_schema(schema: impl Into<String>) -> Self {
        Self {
            base_schema: schema.into(),
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            base_schema: "public".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SchemaManager {
    pool: PgPool,
}

impl SchemaManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn plan(&self, config: &SchemaConfig) -> Result<SchemaPlan> {
        let mut plan = SchemaPlan::default();
        let schema = config.base_schema.trim();

        if schema.is_empty() {
            plan.push_warning("schema name is empty; skipping".to_string());
            return Ok(plan);
        }

        let existing_schemas = self.existing_schemas().await?;
        let schema_exists = existing_schemas.contains(schema);

        if !schema_exists {
            plan.push_action(
                format!("create schema {}", quote_ident(schema)),
                formatdoc!(
                    "create schema if not exists {schema}",
                    schema = quote_ident(schema),
                ),
            );
        }

        let existing_tables = if schema_exists {
            self.existing_tables(schema).await?
        } else {
            HashSet::new()
        };

        ensure_table(
            &mut plan,
            schema,
            &existing_tables,
            "event_configs",
            build_event_configs_table_sql,
        );
        ensure_table(
            &mut plan,
            schema,
            &existing_tables,
            "guest_sessions",
            build_guest_sessions_table_sql,
        );
        if existing_tables.contains("guest_sessions") {
            self.ensure_column(
                &mut plan,
                schema,
                "guest_sessions",
                "main_session_id",
                "uuid",
            )
            .await?;
        }
        ensure_table(
            &mut plan,
            schema,
            &existing_tables,
            "guest_progress",
            build_guest_progress_table_sql,
        );
        ensure_table(
            &mut plan,
            schema,
            &existing_tables,
            "experiences",
            build_experiences_table_sql,
        );

        let existing_indexes = if schema_exists {
            self.existing_indexes(schema).await?
        } else {
            HashSet::new()
        };

        ensure_index(
            &mut plan,
            schema,
            &existing_indexes,
            "guest_sessions_event_idx",
            build_guest_sessions_event_index_sql,
        );
        ensure_index(
            &mut plan,
            schema,
            &existing_indexes,
            "guest_sessions_main_idx",
            build_guest_sessions_main_index_sql,
        );
        ensure_index(
            &mut plan,
            schema,
            &existing_indexes,
            "experiences_workspace_idx",
            build_experiences_workspace_index_sql,
        );

        Ok(plan)
    }

    pub async fn apply(&self, plan: &SchemaPlan) -> Result<()> {
        if plan.actions.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for action in &plan.actions {
            sqlx::query(action.sql()).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn sync(&self, config: &SchemaConfig) -> Result<SchemaPlan> {
        let plan = self.plan(config).await?;
        if !plan.is_empty() {
            self.apply(&plan).await?;
        }
        Ok(plan)
    }

    async fn existing_schemas(&self) -> Result<HashSet<String>> {
        let rows =
            sqlx::query_scalar::<_, String>("select schema_name from information_schema.schemata")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    async fn existing_tables(&self, schema: &str) -> Result<HashSet<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "select table_name from information_schema.tables where table_schema = $1",
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn existing_indexes(&self, schema: &str) -> Result<HashSet<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "select indexname from pg_indexes where schemaname = $1",
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn existing_columns(&self, schema: &str, table: &str) -> Result<HashSet<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "select column_name from information_schema.columns where table_schema = $1 and table_name = $2",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Upgrade path for tables created before a column existed.
    async fn ensure_column(
        &self,
        plan: &mut SchemaPlan,
        schema: &str,
        table: &str,
        column: &str,
        data_type: &str,
    ) -> Result<()> {
        let columns = self.existing_columns(schema, table).await?;
        if columns.contains(column) {
            return Ok(());
        }

        let table_name = qualified_name(schema, table);
        plan.push_warning(format!(
            "table {} is missing column {}; adding it",
            table_name, column
        ));
        plan.push_action(
            format!("add {} column to {}", quote_ident(column), table_name),
            format!(
                "alter table {} add column if not exists {} {}",
                table_name,
                quote_ident(column),
                data_type
            ),
        );
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct SchemaPlan {
    actions: Vec<SchemaAction>,
    warnings: Vec<String>,
}

impl SchemaPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[SchemaAction] {
        &self.actions
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn push_action(&mut self, description: String, sql: String) {
        self.actions.push(SchemaAction { description, sql });
    }

    fn push_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }
}

#[derive(Clone, Debug)]
pub struct SchemaAction {
    description: String,
    sql: String,
}

impl SchemaAction {
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

fn ensure_table<F>(
    plan: &mut SchemaPlan,
    schema: &str,
    existing_tables: &HashSet<String>,
    table: &str,
    build_sql: F,
) where
    F: Fn(&str) -> String,
{
    if !existing_tables.contains(table) {
        plan.push_action(
            format!("create table {}", qualified_name(schema, table)),
            build_sql(schema),
        );
    }
}

fn ensure_index<F>(
    plan: &mut SchemaPlan,
    schema: &str,
    existing_indexes: &HashSet<String>,
    index: &str,
    build_sql: F,
) where
    F: Fn(&str) -> String,
{
    if !existing_indexes.contains(index) {
        plan.push_action(
            format!("create index {}", qualified_name(schema, index)),
            build_sql(schema),
        );
    }
}

fn build_event_configs_table_sql(schema: &str) -> String {
    formatdoc!(
        r#"
        create table if not exists {schema}.event_configs (
            id uuid primary key,
            draft jsonb,
            published jsonb,
            draft_version int,
            published_version int,
            published_at timestamptz,
            created_at timestamptz not null default now(),
            updated_at timestamptz not null default now()
        )
        "#,
        schema = quote_ident(schema),
    )
}

fn build_guest_sessions_table_sql(schema: &str) -> String {
    formatdoc!(
        r#"
        create table if not exists {schema}.guest_sessions (
            id uuid primary key,
            project_id uuid not null,
            workspace_id uuid not null,
            event_id uuid not null,
            experience_id uuid not null,
            main_session_id uuid,
            created_at timestamptz not null default now(),
            updated_at timestamptz not null default now()
        )
        "#,
        schema = quote_ident(schema),
    )
}

fn build_guest_progress_table_sql(schema: &str) -> String {
    formatdoc!(
        r#"
        create table if not exists {schema}.guest_progress (
            event_id uuid not null,
            guest_id uuid not null,
            completed jsonb not null default '[]',
            created_at timestamptz not null default now(),
            updated_at timestamptz not null default now(),
            primary key (event_id, guest_id)
        )
        "#,
        schema = quote_ident(schema),
    )
}

fn build_experiences_table_sql(schema: &str) -> String {
    formatdoc!(
        r#"
        create table if not exists {schema}.experiences (
            id uuid primary key,
            workspace_id uuid not null,
            name text not null,
            steps jsonb not null default '[]',
            created_at timestamptz not null default now(),
            updated_at timestamptz not null default now()
        )
        "#,
        schema = quote_ident(schema),
    )
}

fn build_guest_sessions_event_index_sql(schema: &str) -> String {
    formatdoc!(
        r#"
        create index if not exists guest_sessions_event_idx
            on {schema}.guest_sessions (event_id, experience_id)
        "#,
        schema = quote_ident(schema),
    )
}

fn build_guest_sessions_main_index_sql(schema: &str) -> String {
    formatdoc!(
        r#"
        create index if not exists guest_sessions_main_idx
            on {schema}.guest_sessions (main_session_id)
            where main_session_id is not null
        "#,
        schema = quote_ident(schema),
    )
}

fn build_experiences_workspace_index_sql(schema: &str) -> String {
    formatdoc!(
        r#"
        create index if not exists experiences_workspace_idx
            on {schema}.experiences (workspace_id)
        "#,
        schema = quote_ident(schema),
    )
}

pub fn qualified_name(schema: &str, ident: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(ident))
}

pub fn quote_ident(value: &str) -> String {
    let escaped = value.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}
