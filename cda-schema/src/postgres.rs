use log::*;
use sqlx::PgPool;
use std::collections::HashMap;

use crate::catalog::{
  Catalog, ColumnMetadataRow, ColumnSnapshot, ForeignKeySnapshot, TableSnapshot,
};
use crate::error::SchemaError;

const COLUMN_METADATA_TABLE: &str = "column_metadata";

#[derive(sqlx::FromRow)]
struct ColumnRow {
  table_name: String,
  column_name: String,
  data_type: String,
  is_nullable: String,
  description: Option<String>,
}

#[derive(sqlx::FromRow)]
struct PrimaryKeyRow {
  table_name: String,
  column_name: String,
}

#[derive(sqlx::FromRow)]
struct ForeignKeyRow {
  table_name: String,
  column_name: String,
  foreign_table_name: String,
  foreign_column_name: String,
}

#[derive(sqlx::FromRow)]
struct MetadataRow {
  cda_table: String,
  cda_column: String,
  column_type: Option<String>,
  summary_returns: Option<bool>,
  data_returns: Option<bool>,
  process_before_display: Option<String>,
  virtual_table: Option<String>,
}

/// Reflects all tables of the public schema: columns with type, nullability
/// and comment, primary keys, and foreign keys.
pub async fn introspect_schema(pool: &PgPool) -> Result<Vec<TableSnapshot>, SchemaError> {
  let columns = sqlx::query_as::<_, ColumnRow>(
    r#"
    SELECT
        c.table_name,
        c.column_name,
        c.data_type,
        c.is_nullable,
        pgd.description
    FROM information_schema.columns c
    JOIN pg_catalog.pg_class pgc ON pgc.relname = c.table_name
    JOIN pg_catalog.pg_namespace n
        ON n.oid = pgc.relnamespace AND n.nspname = c.table_schema
    LEFT JOIN pg_catalog.pg_description pgd
        ON pgd.objoid = pgc.oid AND pgd.objsubid = c.ordinal_position
    WHERE c.table_schema = 'public' AND pgc.relkind = 'r'
    ORDER BY c.table_name, c.ordinal_position
    "#,
  )
  .fetch_all(pool)
  .await?;

  let primary_keys = sqlx::query_as::<_, PrimaryKeyRow>(
    r#"
    SELECT tc.table_name, kcu.column_name
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
        ON tc.constraint_name = kcu.constraint_name
        AND tc.table_schema = kcu.table_schema
    WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = 'public'
    ORDER BY tc.table_name, kcu.ordinal_position
    "#,
  )
  .fetch_all(pool)
  .await?;

  let foreign_keys = sqlx::query_as::<_, ForeignKeyRow>(
    r#"
    SELECT
        tc.table_name,
        kcu.column_name,
        ccu.table_name AS foreign_table_name,
        ccu.column_name AS foreign_column_name
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
        ON tc.constraint_name = kcu.constraint_name
        AND tc.table_schema = kcu.table_schema
    JOIN information_schema.constraint_column_usage ccu
        ON tc.constraint_name = ccu.constraint_name
        AND tc.table_schema = ccu.table_schema
    WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = 'public'
    ORDER BY tc.table_name, kcu.ordinal_position
    "#,
  )
  .fetch_all(pool)
  .await?;

  let mut tables: Vec<TableSnapshot> = vec![];
  let mut index = HashMap::<String, usize>::new();
  for row in columns {
    let idx = *index.entry(row.table_name.clone()).or_insert_with(|| {
      tables.push(TableSnapshot {
        name: row.table_name.clone(),
        columns: vec![],
        primary_key: vec![],
        foreign_keys: vec![],
      });
      tables.len() - 1
    });
    tables[idx].columns.push(ColumnSnapshot {
      name: row.column_name,
      data_type: row.data_type,
      nullable: row.is_nullable == "YES",
      comment: row.description,
    });
  }

  for row in primary_keys {
    if let Some(&idx) = index.get(&row.table_name) {
      tables[idx].primary_key.push(row.column_name);
    }
  }

  for row in foreign_keys {
    if let Some(&idx) = index.get(&row.table_name) {
      tables[idx].foreign_keys.push(ForeignKeySnapshot {
        column: row.column_name,
        foreign_table: row.foreign_table_name,
        foreign_column: row.foreign_column_name,
      });
    }
  }

  info!("Reflected {} tables from the database", tables.len());
  return Ok(tables);
}

/// One round trip for the per-column semantic metadata.
pub async fn fetch_column_metadata(pool: &PgPool) -> Result<Vec<ColumnMetadataRow>, SchemaError> {
  let rows = sqlx::query_as::<_, MetadataRow>(&format!(
    r#"
    SELECT cda_table, cda_column, column_type, summary_returns, data_returns,
           process_before_display, virtual_table
    FROM {COLUMN_METADATA_TABLE}
    "#
  ))
  .fetch_all(pool)
  .await?;

  return Ok(
    rows
      .into_iter()
      .map(|row| ColumnMetadataRow {
        cda_table: row.cda_table,
        cda_column: row.cda_column,
        column_type: row.column_type,
        summary_returns: row.summary_returns,
        data_returns: row.data_returns,
        process_before_display: row.process_before_display,
        virtual_table: row.virtual_table,
      })
      .collect(),
  );
}

/// Builds the frozen catalog from a live connection. Called once at startup;
/// a failure here aborts the server.
pub async fn build_catalog(pool: &PgPool) -> Result<Catalog, SchemaError> {
  info!("Building schema catalog");
  let snapshots = introspect_schema(pool).await?;
  let metadata = fetch_column_metadata(pool).await?;
  let catalog = Catalog::build(snapshots, metadata)?;
  info!("Schema catalog ready");
  return Ok(catalog);
}
