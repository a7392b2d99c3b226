use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::error::SchemaError;

/// Index of a table within the catalog. Stable for the catalog's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub usize);

/// Index of a column within the catalog. Stable for the catalog's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId(pub usize);

/// Raw table shape as read from the database, input to [`Catalog::build`].
#[derive(Clone, Debug, PartialEq)]
pub struct TableSnapshot {
  pub name: String,
  pub columns: Vec<ColumnSnapshot>,
  pub primary_key: Vec<String>,
  pub foreign_keys: Vec<ForeignKeySnapshot>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSnapshot {
  pub name: String,
  pub data_type: String,
  pub nullable: bool,
  pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForeignKeySnapshot {
  pub column: String,
  pub foreign_table: String,
  pub foreign_column: String,
}

/// One row of the `column_metadata` table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnMetadataRow {
  pub cda_table: String,
  pub cda_column: String,
  pub column_type: Option<String>,
  pub summary_returns: Option<bool>,
  pub data_returns: Option<bool>,
  pub process_before_display: Option<String>,
  pub virtual_table: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableRole {
  /// `subject` or `file`; denominates a row of data output.
  Endpoint,
  /// Two or more foreign keys; joins entity tables.
  Mapping,
  /// Plain entity/side table.
  Data,
  /// `release_metadata` and `column_metadata`.
  Metadata,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColumnType {
  Categorical,
  Numeric,
  #[default]
  Unspecified,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessBeforeDisplay {
  DataSource,
  ExternalReferenceMetadata,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForeignKey {
  pub parent_column: ColumnId,
  pub target_table: TableId,
  pub target_column: ColumnId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableInfo {
  pub id: TableId,
  pub name: String,
  pub columns: Vec<ColumnId>,
  /// First primary-key column when the key is composite.
  pub primary_key: Option<ColumnId>,
  pub foreign_keys: Vec<ForeignKey>,
  pub role: TableRole,
  /// The entity table this side table hangs off: the single FK target for
  /// one-FK tables, the table itself when it has no FKs, none for mapping
  /// tables.
  pub primary_table: Option<TableId>,
  /// Columns physically living elsewhere but exposed under this table.
  pub virtual_columns: Vec<ColumnId>,
}

impl TableInfo {
  pub fn foreign_key_to(&self, table: TableId) -> Option<&ForeignKey> {
    return self.foreign_keys.iter().find(|fk| fk.target_table == table);
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnInfo {
  pub id: ColumnId,
  /// Globally unique, client-facing name.
  pub unique_name: String,
  pub table: TableId,
  /// Physical column name in the parent table.
  pub column_name: String,
  pub data_type: String,
  pub nullable: bool,
  pub comment: Option<String>,

  pub column_type: ColumnType,
  pub summary_returns: bool,
  pub data_returns: bool,
  pub process_before_display: Option<ProcessBeforeDisplay>,
  /// Table under which this column is exposed to clients, when different
  /// from the physical parent.
  pub virtual_table: Option<TableId>,
  /// FK parent -> target, cached for single-FK columns.
  pub foreign_key_target: Option<ColumnId>,
  /// Boolean companion in the parallel `*_nulls` table.
  pub null_twin: Option<ColumnId>,
}

lazy_static! {
  /// Canonical short names for a handful of prefixed unique names.
  static ref UNIQUE_NAME_OVERRIDES: HashMap<&'static str, &'static str> = HashMap::from([
    ("file_description", "description"),
    ("file_drs_uri", "drs_uri"),
    ("file_access", "access"),
    ("file_checksum_type", "checksum_type"),
    ("file_checksum_value", "checksum_value"),
    ("file_size", "size"),
    ("file_format", "format"),
    ("file_category", "category"),
    ("file_tumor_vs_normal_tumor_vs_normal", "tumor_vs_normal"),
    ("file_anatomic_site_anatomic_site", "anatomic_site"),
  ]);
}

const ENDPOINT_TABLES: [&str; 2] = ["subject", "file"];
const METADATA_TABLES: [&str; 2] = ["release_metadata", "column_metadata"];

/// Frozen, queryable model of the database schema. Built once at startup and
/// immutable afterwards.
#[derive(Debug, PartialEq)]
pub struct Catalog {
  tables: Vec<TableInfo>,
  columns: Vec<ColumnInfo>,
  table_index: HashMap<String, TableId>,
  column_index: HashMap<String, ColumnId>,
}

impl Catalog {
  pub fn build(
    snapshots: Vec<TableSnapshot>,
    metadata: Vec<ColumnMetadataRow>,
  ) -> Result<Catalog, SchemaError> {
    let metadata_map: HashMap<(String, String), ColumnMetadataRow> = metadata
      .into_iter()
      .map(|row| ((row.cda_table.clone(), row.cda_column.clone()), row))
      .collect();

    // Column names appearing in more than one table get table-prefixed
    // unique names.
    let mut name_counts = HashMap::<&str, usize>::new();
    for snapshot in &snapshots {
      for column in &snapshot.columns {
        *name_counts.entry(column.name.as_str()).or_default() += 1;
      }
    }

    let mut tables: Vec<TableInfo> = Vec::with_capacity(snapshots.len());
    let mut columns: Vec<ColumnInfo> = vec![];
    let mut table_index = HashMap::<String, TableId>::new();
    let mut column_index = HashMap::<String, ColumnId>::new();

    for (table_idx, snapshot) in snapshots.iter().enumerate() {
      let table_id = TableId(table_idx);
      if table_index.insert(snapshot.name.clone(), table_id).is_some() {
        return Err(SchemaError::TableNotFound(format!(
          "Unexpectedly found more than one table named: {}",
          snapshot.name
        )));
      }

      let mut column_ids: Vec<ColumnId> = vec![];
      for column in &snapshot.columns {
        let column_id = ColumnId(columns.len());

        let mut unique_name = if name_counts.get(column.name.as_str()).copied().unwrap_or(0) > 1 {
          format!("{}_{}", snapshot.name, column.name)
        } else {
          column.name.clone()
        };
        if let Some(replacement) = UNIQUE_NAME_OVERRIDES.get(unique_name.as_str()) {
          unique_name = (*replacement).to_string();
        }

        if column_index.insert(unique_name.clone(), column_id).is_some() {
          return Err(SchemaError::ColumnNotFound(format!(
            "Unexpectedly found more than one column named: {unique_name}"
          )));
        }

        let row = metadata_map.get(&(snapshot.name.clone(), column.name.clone()));

        columns.push(ColumnInfo {
          id: column_id,
          unique_name,
          table: table_id,
          column_name: column.name.clone(),
          data_type: column.data_type.clone(),
          nullable: column.nullable,
          comment: column.comment.clone(),
          column_type: row
            .map(|r| parse_column_type(r.column_type.as_deref()))
            .unwrap_or_default(),
          summary_returns: row.and_then(|r| r.summary_returns).unwrap_or(false),
          data_returns: row.and_then(|r| r.data_returns).unwrap_or(false),
          process_before_display: row
            .and_then(|r| parse_process_before_display(r.process_before_display.as_deref())),
          virtual_table: None,
          foreign_key_target: None,
          null_twin: None,
        });
        column_ids.push(column_id);
      }

      let role = if ENDPOINT_TABLES.contains(&snapshot.name.as_str()) {
        TableRole::Endpoint
      } else if METADATA_TABLES.contains(&snapshot.name.as_str()) {
        TableRole::Metadata
      } else if snapshot.foreign_keys.len() >= 2 {
        TableRole::Mapping
      } else {
        TableRole::Data
      };

      let primary_key = snapshot.primary_key.first().and_then(|pk_name| {
        column_ids
          .iter()
          .find(|id| columns[id.0].column_name == *pk_name)
          .copied()
      });

      tables.push(TableInfo {
        id: table_id,
        name: snapshot.name.clone(),
        columns: column_ids,
        primary_key,
        foreign_keys: vec![],
        role,
        primary_table: None,
        virtual_columns: vec![],
      });
    }

    let mut catalog = Catalog {
      tables,
      columns,
      table_index,
      column_index,
    };

    catalog.link_foreign_keys(&snapshots)?;
    catalog.assign_primary_tables();
    catalog.assign_virtual_columns(&metadata_map)?;
    catalog.assign_null_twins()?;

    return Ok(catalog);
  }

  fn link_foreign_keys(&mut self, snapshots: &[TableSnapshot]) -> Result<(), SchemaError> {
    for snapshot in snapshots {
      let table_id = self.table_index[&snapshot.name];

      let mut foreign_keys: Vec<ForeignKey> = vec![];
      for fk in &snapshot.foreign_keys {
        let parent_column = self.table_column_id(table_id, &fk.column)?;
        let target_table = *self.table_index.get(&fk.foreign_table).ok_or_else(|| {
          SchemaError::TableNotFound(format!("Table not found: {}", fk.foreign_table))
        })?;
        let target_column = self.table_column_id(target_table, &fk.foreign_column)?;

        foreign_keys.push(ForeignKey {
          parent_column,
          target_table,
          target_column,
        });
      }

      // Cache the FK target on columns carrying exactly one foreign key.
      for column_id in self.tables[table_id.0].columns.clone() {
        let targets: Vec<ColumnId> = foreign_keys
          .iter()
          .filter(|fk| fk.parent_column == column_id)
          .map(|fk| fk.target_column)
          .collect();
        if targets.len() == 1 {
          self.columns[column_id.0].foreign_key_target = Some(targets[0]);
        }
      }

      self.tables[table_id.0].foreign_keys = foreign_keys;
    }
    return Ok(());
  }

  fn assign_primary_tables(&mut self) {
    for table_idx in 0..self.tables.len() {
      let primary = match self.tables[table_idx].foreign_keys.as_slice() {
        [] => Some(TableId(table_idx)),
        [only] => Some(only.target_table),
        _ => None,
      };
      self.tables[table_idx].primary_table = primary;
    }
  }

  fn assign_virtual_columns(
    &mut self,
    metadata_map: &HashMap<(String, String), ColumnMetadataRow>,
  ) -> Result<(), SchemaError> {
    for column_idx in 0..self.columns.len() {
      let key = {
        let column = &self.columns[column_idx];
        (
          self.tables[column.table.0].name.clone(),
          column.column_name.clone(),
        )
      };
      let Some(virtual_name) = metadata_map.get(&key).and_then(|r| r.virtual_table.clone()) else {
        continue;
      };

      let virtual_id = *self.table_index.get(&virtual_name).ok_or_else(|| {
        SchemaError::TableNotFound(format!("Table not found: {virtual_name}"))
      })?;
      self.columns[column_idx].virtual_table = Some(virtual_id);
      self.tables[virtual_id.0]
        .virtual_columns
        .push(ColumnId(column_idx));
    }
    return Ok(());
  }

  fn assign_null_twins(&mut self) -> Result<(), SchemaError> {
    for column_idx in 0..self.columns.len() {
      let (partner_table, partner_column) = {
        let column = &self.columns[column_idx];
        let table_name = &self.tables[column.table.0].name;
        let (Some(partner_table), Some(partner_column)) = (
          table_name.strip_suffix("_nulls"),
          column.column_name.strip_suffix("_null"),
        ) else {
          continue;
        };
        (partner_table.to_string(), partner_column.to_string())
      };

      // A `*_nulls` table may exist without its partner; skip quietly.
      let Some(&partner_table_id) = self.table_index.get(&partner_table) else {
        continue;
      };
      let Ok(partner_id) = self.table_column_id(partner_table_id, &partner_column) else {
        continue;
      };
      self.columns[partner_id.0].null_twin = Some(ColumnId(column_idx));
    }
    return Ok(());
  }

  fn table_column_id(&self, table: TableId, column_name: &str) -> Result<ColumnId, SchemaError> {
    let table_info = &self.tables[table.0];
    return table_info
      .columns
      .iter()
      .find(|id| self.columns[id.0].column_name == column_name)
      .copied()
      .ok_or_else(|| {
        SchemaError::ColumnNotFound(format!(
          "Could not find column \"{column_name}\" in table \"{}\"",
          table_info.name
        ))
      });
  }

  #[inline]
  pub fn table_info(&self, id: TableId) -> &TableInfo {
    return &self.tables[id.0];
  }

  #[inline]
  pub fn column_info(&self, id: ColumnId) -> &ColumnInfo {
    return &self.columns[id.0];
  }

  pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
    return self.tables.iter();
  }

  pub fn table_by_name(&self, name: &str) -> Result<&TableInfo, SchemaError> {
    let Some(id) = self.table_index.get(name) else {
      return Err(SchemaError::TableNotFound(format!("Table not found: {name}")));
    };
    return Ok(&self.tables[id.0]);
  }

  pub fn column_by_unique_name(&self, unique_name: &str) -> Result<&ColumnInfo, SchemaError> {
    let Some(id) = self.column_index.get(unique_name) else {
      return Err(SchemaError::ColumnNotFound(self.column_not_found_message(unique_name)));
    };
    return Ok(&self.columns[id.0]);
  }

  pub fn table_column(&self, table_name: &str, column_name: &str) -> Result<&ColumnInfo, SchemaError> {
    let table = self.table_by_name(table_name)?;
    let id = self.table_column_id(table.id, column_name)?;
    return Ok(&self.columns[id.0]);
  }

  /// Near matches by prefix/suffix, for `ColumnNotFound` messages.
  pub fn column_suggestions(&self, name: &str) -> Vec<String> {
    let mut suggestions: Vec<String> = self
      .column_index
      .keys()
      .filter(|k| k.ends_with(name) || k.starts_with(name))
      .cloned()
      .collect();
    suggestions.sort();
    return suggestions;
  }

  fn column_not_found_message(&self, name: &str) -> String {
    let suggestions = self.column_suggestions(name);
    if suggestions.is_empty() {
      return format!("Column Not Found: {name}");
    }
    return format!(
      "Column Not Found: {name}, did you mean: [{}]",
      suggestions.join(", ")
    );
  }

  /// The table a column is addressed under: its virtual parent when set,
  /// otherwise its physical parent.
  pub fn selectable_table(&self, column: &ColumnInfo) -> TableId {
    return column.virtual_table.unwrap_or(column.table);
  }

  /// Default row-output columns of a table, virtual columns included.
  pub fn data_columns(&self, table: TableId) -> Vec<ColumnId> {
    return self.mode_columns(table, |c| c.data_returns);
  }

  /// Default summary-output columns of a table, virtual columns included.
  pub fn summary_columns(&self, table: TableId) -> Vec<ColumnId> {
    return self.mode_columns(table, |c| c.summary_returns);
  }

  fn mode_columns(&self, table: TableId, include: fn(&ColumnInfo) -> bool) -> Vec<ColumnId> {
    let info = &self.tables[table.0];
    let mut ids: Vec<ColumnId> = info
      .columns
      .iter()
      .filter(|id| include(&self.columns[id.0]) && self.columns[id.0].virtual_table.is_none())
      .copied()
      .collect();
    ids.extend(
      info
        .virtual_columns
        .iter()
        .filter(|id| include(&self.columns[id.0]))
        .copied(),
    );
    return ids;
  }

  /// The other endpoint table (subject <-> file).
  pub fn other_endpoint(&self, endpoint: TableId) -> Option<TableId> {
    return self
      .tables
      .iter()
      .find(|t| t.role == TableRole::Endpoint && t.id != endpoint)
      .map(|t| t.id);
  }

  /// Tables participating in row/summary output: everything that is neither
  /// a mapping nor a metadata table.
  pub fn data_tables(&self) -> impl Iterator<Item = &TableInfo> {
    return self
      .tables
      .iter()
      .filter(|t| matches!(t.role, TableRole::Endpoint | TableRole::Data));
  }
}

fn parse_column_type(value: Option<&str>) -> ColumnType {
  return match value {
    Some("categorical") => ColumnType::Categorical,
    Some("numeric") => ColumnType::Numeric,
    _ => ColumnType::Unspecified,
  };
}

fn parse_process_before_display(value: Option<&str>) -> Option<ProcessBeforeDisplay> {
  return match value {
    Some("data_source") => Some(ProcessBeforeDisplay::DataSource),
    Some("external_reference_metadata") => Some(ProcessBeforeDisplay::ExternalReferenceMetadata),
    _ => None,
  };
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::test_catalog;

  #[test]
  fn test_unique_names() {
    let catalog = test_catalog();

    // Globally unique physical names stay bare.
    assert_eq!(catalog.column_by_unique_name("sex").unwrap().column_name, "sex");

    // Duplicated names get table-prefixed.
    let subject_alias = catalog.column_by_unique_name("subject_id_alias").unwrap();
    assert_eq!(subject_alias.column_name, "id_alias");
    assert_eq!(catalog.table_info(subject_alias.table).name, "subject");
    assert!(catalog.column_by_unique_name("id_alias").is_err());

    // Overridden short names.
    let description = catalog.column_by_unique_name("description").unwrap();
    assert_eq!(catalog.table_info(description.table).name, "file");
    assert!(catalog.column_by_unique_name("project_description").is_ok());
  }

  #[test]
  fn test_roles() {
    let catalog = test_catalog();
    assert_eq!(catalog.table_by_name("subject").unwrap().role, TableRole::Endpoint);
    assert_eq!(catalog.table_by_name("file").unwrap().role, TableRole::Endpoint);
    assert_eq!(
      catalog.table_by_name("file_describes_subject").unwrap().role,
      TableRole::Mapping
    );
    assert_eq!(catalog.table_by_name("observation").unwrap().role, TableRole::Data);
    assert_eq!(
      catalog.table_by_name("upstream_identifiers").unwrap().role,
      TableRole::Data
    );
    assert_eq!(
      catalog.table_by_name("release_metadata").unwrap().role,
      TableRole::Metadata
    );
    assert_eq!(
      catalog.table_by_name("column_metadata").unwrap().role,
      TableRole::Metadata
    );
  }

  #[test]
  fn test_primary_tables() {
    let catalog = test_catalog();

    let subject = catalog.table_by_name("subject").unwrap();
    assert_eq!(subject.primary_table, Some(subject.id));

    let observation = catalog.table_by_name("observation").unwrap();
    assert_eq!(observation.primary_table, Some(subject.id));

    let mapping = catalog.table_by_name("file_describes_subject").unwrap();
    assert_eq!(mapping.primary_table, None);
  }

  #[test]
  fn test_null_twins() {
    let catalog = test_catalog();

    let sex = catalog.column_by_unique_name("sex").unwrap();
    let twin = catalog.column_info(sex.null_twin.expect("twin"));
    assert_eq!(twin.column_name, "sex_null");
    assert_eq!(catalog.table_info(twin.table).name, "observation_nulls");

    let tumor = catalog.column_by_unique_name("tumor_vs_normal").unwrap();
    let twin = catalog.column_info(tumor.null_twin.expect("twin"));
    assert_eq!(catalog.table_info(twin.table).name, "file_tumor_vs_normal_nulls");

    // Columns without a companion table stay twinless.
    assert!(catalog.column_by_unique_name("species").unwrap().null_twin.is_none());
  }

  #[test]
  fn test_virtual_columns() {
    let catalog = test_catalog();

    let tumor = catalog.column_by_unique_name("tumor_vs_normal").unwrap();
    let file = catalog.table_by_name("file").unwrap();
    assert_eq!(tumor.virtual_table, Some(file.id));
    assert_eq!(catalog.selectable_table(tumor), file.id);
    assert!(file.virtual_columns.contains(&tumor.id));

    // Physically parented in the side table.
    assert_eq!(catalog.table_info(tumor.table).name, "file_tumor_vs_normal");
  }

  #[test]
  fn test_foreign_key_targets() {
    let catalog = test_catalog();

    let observation_subject = catalog
      .column_by_unique_name("observation_subject_alias")
      .unwrap();
    let target = catalog.column_info(observation_subject.foreign_key_target.expect("fk"));
    assert_eq!(target.unique_name, "subject_id_alias");
  }

  #[test]
  fn test_mode_columns() {
    let catalog = test_catalog();
    let subject = catalog.table_by_name("subject").unwrap();

    let data: Vec<&str> = catalog
      .data_columns(subject.id)
      .iter()
      .map(|id| catalog.column_info(*id).unique_name.as_str())
      .collect();
    assert!(data.contains(&"species"));
    assert!(!data.contains(&"subject_id_alias"));

    let file = catalog.table_by_name("file").unwrap();
    let file_data: Vec<&str> = catalog
      .data_columns(file.id)
      .iter()
      .map(|id| catalog.column_info(*id).unique_name.as_str())
      .collect();
    // Virtual columns ride along with their client-visible parent.
    assert!(file_data.contains(&"tumor_vs_normal"));
  }

  #[test]
  fn test_suggestions() {
    let catalog = test_catalog();
    let suggestions = catalog.column_suggestions("sex");
    assert!(suggestions.contains(&"sex".to_string()));

    let err = catalog.column_by_unique_name("sexy_column").err().expect("err");
    assert!(err.to_string().contains("Column Not Found: sexy_column"));

    let err = catalog.column_by_unique_name("alias").err().expect("err");
    assert!(err.to_string().contains("did you mean"));
    assert!(err.to_string().contains("subject_id_alias"));
  }

  #[test]
  fn test_build_is_deterministic() {
    let (snapshots, metadata) = crate::testing::cda_snapshot();
    let first = Catalog::build(snapshots.clone(), metadata.clone()).unwrap();
    let second = Catalog::build(snapshots, metadata).unwrap();
    assert_eq!(first, second);
  }
}
