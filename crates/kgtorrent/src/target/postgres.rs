//! PostgreSQL destination.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use futures::SinkExt;
use tokio_postgres::config::SslMode;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{debug, info, warn};

use super::{encode_copy_row, ForeignKeyDef, KeyKind, TargetStore, WriteOptions};
use crate::config::TargetConfig;
use crate::core::identifier::{qualify_pg, quote_pg};
use crate::core::schema::Column;
use crate::core::value::Row;
use crate::download::{NotebookFilter, NotebookId};
use crate::error::{LoadError, Result};
use crate::typemap::column_type_to_postgres;

/// PostgreSQL destination backed by a connection pool.
pub struct PgTarget {
    pool: Pool,
}

impl PgTarget {
    /// Connect and verify the connection with a test query.
    pub async fn new(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("kgtorrent");
        pg_config.ssl_mode(match config.ssl_mode.as_str() {
            "prefer" => SslMode::Prefer,
            _ => SslMode::Disable,
        });

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(max_conns.max(1))
            .build()
            .map_err(|e| LoadError::pool(e.to_string(), "creating PostgreSQL pool"))?;

        let client = pool.get().await.map_err(|e| {
            LoadError::pool(
                e.to_string(),
                format!(
                    "connecting to {}:{}/{}",
                    config.host, config.port, config.database
                ),
            )
        })?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self { pool })
    }

    /// Server version string.
    pub async fn server_version(&self) -> Result<String> {
        let client = self.client("server_version").await?;
        let row = client.query_one("SELECT version()", &[]).await?;
        Ok(row.get(0))
    }

    async fn client(&self, context: &str) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| LoadError::pool(e.to_string(), context.to_string()))
    }

    /// Generate DDL for table creation.
    fn generate_ddl(schema: &str, table: &str, columns: &[Column]) -> Result<String> {
        let mut defs = Vec::with_capacity(columns.len());
        for col in columns {
            defs.push(format!(
                "    {} {}",
                quote_pg(&col.name)?,
                column_type_to_postgres(col.column_type)
            ));
        }
        Ok(format!(
            "CREATE TABLE {} (\n{}\n)",
            qualify_pg(schema, table)?,
            defs.join(",\n")
        ))
    }

    async fn truncate_table(&self, schema: &str, table: &str) -> Result<()> {
        let client = self.client("truncate_table").await?;
        let sql = format!("TRUNCATE TABLE {}", qualify_pg(schema, table)?);
        client.execute(&sql, &[]).await?;
        debug!("Truncated table {}.{}", schema, table);
        Ok(())
    }
}

/// Stream pre-encoded COPY chunks over one pooled connection.
async fn copy_shard(pool: Pool, statement: String, table: String, chunks: Vec<Bytes>) -> Result<u64> {
    let client = pool
        .get()
        .await
        .map_err(|e| LoadError::pool(e.to_string(), format!("COPY into {}", table)))?;

    let sink = client.copy_in(statement.as_str()).await?;
    futures::pin_mut!(sink);

    for chunk in chunks {
        sink.send(chunk)
            .await
            .map_err(|e| LoadError::transfer(&table, format!("COPY send failed: {}", e)))?;
    }

    let copied = sink.finish().await?;
    Ok(copied)
}

#[async_trait]
impl TargetStore for PgTarget {
    async fn create_schema(&self, schema: &str) -> Result<()> {
        let client = self.client("create_schema").await?;
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_pg(schema)?);
        client.execute(&sql, &[]).await?;
        debug!("Created schema '{}'", schema);
        Ok(())
    }

    async fn existing_tables(&self, schema: &str) -> Result<Vec<String>> {
        let client = self.client("existing_tables").await?;
        let rows = client
            .query(
                "SELECT table_name FROM information_schema.tables
                 WHERE table_schema = $1 AND table_type = 'BASE TABLE'
                 ORDER BY table_name",
                &[&schema],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn drop_table(&self, schema: &str, table: &str) -> Result<()> {
        let client = self.client("drop_table").await?;
        let sql = format!("DROP TABLE IF EXISTS {} CASCADE", qualify_pg(schema, table)?);
        client.execute(&sql, &[]).await?;
        debug!("Dropped table {}.{}", schema, table);
        Ok(())
    }

    async fn create_table(&self, schema: &str, table: &str, columns: &[Column]) -> Result<()> {
        let client = self.client("create_table").await?;
        let ddl = Self::generate_ddl(schema, table, columns)?;
        client.execute(&ddl, &[]).await?;
        debug!("Created table {}.{}", schema, table);
        Ok(())
    }

    async fn write_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[Column],
        rows: &[Row],
        options: &WriteOptions,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let col_list = columns
            .iter()
            .map(|c| quote_pg(&c.name))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let copy_stmt = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
            qualify_pg(schema, table)?,
            col_list
        );

        let workers = options.workers.clamp(1, rows.len());
        let shard_len = rows.len().div_ceil(workers);
        let batch_size = options.batch_size.max(1);

        let mut handles = Vec::with_capacity(workers);
        for shard in rows.chunks(shard_len) {
            let chunks: Vec<Bytes> = shard
                .chunks(batch_size)
                .map(|batch| {
                    let mut buf = BytesMut::with_capacity(1024 * 1024);
                    for row in batch {
                        encode_copy_row(&mut buf, row);
                    }
                    buf.freeze()
                })
                .collect();
            handles.push(tokio::spawn(copy_shard(
                self.pool.clone(),
                copy_stmt.clone(),
                table.to_string(),
                chunks,
            )));
        }

        let mut copied = 0;
        let mut failure = None;
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(Ok(n)) => copied += n,
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    failure.get_or_insert(LoadError::transfer(
                        table,
                        format!("COPY task panicked: {}", e),
                    ));
                }
            }
        }

        if let Some(err) = failure {
            warn!("Write to {}.{} failed, truncating partial data", schema, table);
            if let Err(e) = self.truncate_table(schema, table).await {
                warn!("Failed to truncate {}.{}: {}", schema, table, e);
            }
            return Err(err);
        }

        debug!(
            "Copied {} rows into {}.{} over {} connections",
            copied, schema, table, workers
        );
        Ok(copied)
    }

    async fn add_key(
        &self,
        schema: &str,
        table: &str,
        kind: KeyKind,
        column: &str,
        name: &str,
    ) -> Result<()> {
        let client = self.client("add_key").await?;
        let sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {} ({})",
            qualify_pg(schema, table)?,
            quote_pg(name)?,
            kind.sql(),
            quote_pg(column)?
        );
        client.execute(&sql, &[]).await?;
        debug!("Created {} {} on {}.{}", kind.sql(), name, schema, table);
        Ok(())
    }

    async fn add_foreign_key(&self, schema: &str, fk: &ForeignKeyDef) -> Result<()> {
        let client = self.client("add_foreign_key").await?;
        let sql = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            qualify_pg(schema, &fk.table)?,
            quote_pg(&fk.name)?,
            quote_pg(&fk.column)?,
            qualify_pg(schema, &fk.referenced_table)?,
            quote_pg(&fk.referenced_column)?
        );
        client.execute(&sql, &[]).await?;
        debug!("Created foreign key {} on {}.{}", fk.name, schema, fk.table);
        Ok(())
    }

    async fn notebook_identifiers(
        &self,
        schema: &str,
        filter: &NotebookFilter,
    ) -> Result<Vec<NotebookId>> {
        let client = self.client("notebook_identifiers").await?;
        let sql = format!(
            "SELECT u.\"UserName\", k.\"CurrentUrlSlug\", CAST(k.\"CurrentKernelVersionId\" AS bigint)
             FROM {kernels} k
             JOIN {users} u ON k.\"AuthorUserId\" = u.\"Id\"
             JOIN {versions} kv ON k.\"CurrentKernelVersionId\" = kv.\"Id\"
             JOIN {languages} kl ON kv.\"ScriptLanguageId\" = kl.\"Id\"
             WHERE kl.\"Name\" = ANY($1) AND kv.\"TotalLines\" >= $2
             ORDER BY 1, 2",
            kernels = qualify_pg(schema, "kernels")?,
            users = qualify_pg(schema, "users")?,
            versions = qualify_pg(schema, "kernelversions")?,
            languages = qualify_pg(schema, "kernellanguages")?,
        );
        let rows = client
            .query(&sql, &[&filter.languages, &filter.min_lines])
            .await?;

        Ok(rows
            .iter()
            .filter_map(|r| {
                let owner: Option<String> = r.get(0);
                let slug: Option<String> = r.get(1);
                let version: Option<i64> = r.get(2);
                Some(NotebookId::new(owner?, slug?, version?))
            })
            .collect())
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close();
    }
}
