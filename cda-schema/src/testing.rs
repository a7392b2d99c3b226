//! Catalog fixtures shared by the unit tests of this crate and its
//! dependents. Shapes a miniature data-commons schema without a database.

use crate::catalog::{
  Catalog, ColumnMetadataRow, ColumnSnapshot, ForeignKeySnapshot, TableSnapshot,
};

fn col(name: &str, data_type: &str) -> ColumnSnapshot {
  return ColumnSnapshot {
    name: name.to_string(),
    data_type: data_type.to_string(),
    nullable: true,
    comment: None,
  };
}

fn fk(column: &str, foreign_table: &str, foreign_column: &str) -> ForeignKeySnapshot {
  return ForeignKeySnapshot {
    column: column.to_string(),
    foreign_table: foreign_table.to_string(),
    foreign_column: foreign_column.to_string(),
  };
}

fn table(
  name: &str,
  columns: Vec<ColumnSnapshot>,
  primary_key: &[&str],
  foreign_keys: Vec<ForeignKeySnapshot>,
) -> TableSnapshot {
  return TableSnapshot {
    name: name.to_string(),
    columns,
    primary_key: primary_key.iter().map(|s| s.to_string()).collect(),
    foreign_keys,
  };
}

#[allow(clippy::too_many_arguments)]
fn meta(
  cda_table: &str,
  cda_column: &str,
  column_type: Option<&str>,
  summary_returns: bool,
  data_returns: bool,
  process_before_display: Option<&str>,
  virtual_table: Option<&str>,
) -> ColumnMetadataRow {
  return ColumnMetadataRow {
    cda_table: cda_table.to_string(),
    cda_column: cda_column.to_string(),
    column_type: column_type.map(|s| s.to_string()),
    summary_returns: Some(summary_returns),
    data_returns: Some(data_returns),
    process_before_display: process_before_display.map(|s| s.to_string()),
    virtual_table: virtual_table.map(|s| s.to_string()),
  };
}

/// A miniature commons schema: two endpoints, a handful of side tables,
/// mapping tables, null companions and the polymorphic identifiers table.
pub fn cda_snapshot() -> (Vec<TableSnapshot>, Vec<ColumnMetadataRow>) {
  let tables = vec![
    table(
      "subject",
      vec![
        col("id_alias", "bigint"),
        col("subject_id", "text"),
        col("species", "text"),
        col("year_of_birth", "integer"),
        col("cause_of_death", "text"),
        col("race", "text"),
        col("subject_data_at_gdc", "boolean"),
        col("subject_data_at_pdc", "boolean"),
        col("subject_data_at_idc", "boolean"),
      ],
      &["id_alias"],
      vec![],
    ),
    table(
      "file",
      vec![
        col("id_alias", "bigint"),
        col("file_id", "text"),
        col("drs_uri", "text"),
        col("description", "text"),
        col("size", "bigint"),
        col("format", "text"),
        col("file_type", "text"),
        col("category", "text"),
        col("file_data_at_gdc", "boolean"),
        col("file_data_at_pdc", "boolean"),
      ],
      &["id_alias"],
      vec![],
    ),
    table(
      "observation",
      vec![
        col("id_alias", "bigint"),
        col("subject_alias", "bigint"),
        col("vital_status", "text"),
        col("sex", "text"),
        col("diagnosis", "text"),
        col("days_to_birth", "numeric"),
      ],
      &["id_alias"],
      vec![fk("subject_alias", "subject", "id_alias")],
    ),
    table(
      "observation_nulls",
      vec![
        col("subject_alias", "bigint"),
        col("sex_null", "boolean"),
        col("diagnosis_null", "boolean"),
        col("days_to_birth_null", "boolean"),
      ],
      &[],
      vec![fk("subject_alias", "subject", "id_alias")],
    ),
    table(
      "project",
      vec![
        col("id_alias", "bigint"),
        col("project_id", "text"),
        col("description", "text"),
      ],
      &["id_alias"],
      vec![],
    ),
    table(
      "file_describes_subject",
      vec![col("subject_alias", "bigint"), col("file_alias", "bigint")],
      &[],
      vec![
        fk("subject_alias", "subject", "id_alias"),
        fk("file_alias", "file", "id_alias"),
      ],
    ),
    table(
      "subject_in_project",
      vec![col("subject_alias", "bigint"), col("project_alias", "bigint")],
      &[],
      vec![
        fk("subject_alias", "subject", "id_alias"),
        fk("project_alias", "project", "id_alias"),
      ],
    ),
    table(
      "subject_linked_external_reference",
      vec![
        col("subject_alias", "bigint"),
        col("external_reference_alias", "bigint"),
      ],
      &[],
      vec![
        fk("subject_alias", "subject", "id_alias"),
        fk("external_reference_alias", "external_reference", "id_alias"),
      ],
    ),
    table(
      "external_reference",
      vec![
        col("id_alias", "bigint"),
        col("reference_name", "text"),
        col("reference_url", "text"),
      ],
      &["id_alias"],
      vec![],
    ),
    table(
      "file_tumor_vs_normal",
      vec![col("file_alias", "bigint"), col("tumor_vs_normal", "text")],
      &[],
      vec![fk("file_alias", "file", "id_alias")],
    ),
    table(
      "file_tumor_vs_normal_nulls",
      vec![col("file_alias", "bigint"), col("tumor_vs_normal_null", "boolean")],
      &[],
      vec![fk("file_alias", "file", "id_alias")],
    ),
    table(
      "file_anatomic_site",
      vec![col("file_alias", "bigint"), col("anatomic_site", "text")],
      &[],
      vec![fk("file_alias", "file", "id_alias")],
    ),
    table(
      "file_anatomic_site_nulls",
      vec![col("file_alias", "bigint"), col("anatomic_site_null", "boolean")],
      &[],
      vec![fk("file_alias", "file", "id_alias")],
    ),
    table(
      "upstream_identifiers",
      vec![
        col("cda_table", "text"),
        col("id_alias", "bigint"),
        col("data_source", "text"),
        col("data_source_id_field_name", "text"),
        col("data_source_id_value", "text"),
      ],
      &[],
      vec![],
    ),
    table(
      "release_metadata",
      vec![
        col("cda_table", "text"),
        col("data_source", "text"),
        col("total_rows", "bigint"),
      ],
      &[],
      vec![],
    ),
    table(
      "column_metadata",
      vec![
        col("cda_table", "text"),
        col("cda_column", "text"),
        col("column_type", "text"),
        col("summary_returns", "boolean"),
        col("data_returns", "boolean"),
        col("process_before_display", "text"),
        col("virtual_table", "text"),
      ],
      &[],
      vec![],
    ),
  ];

  let metadata = vec![
    meta("subject", "subject_id", Some("categorical"), false, true, None, None),
    meta("subject", "species", Some("categorical"), true, true, None, None),
    meta("subject", "year_of_birth", Some("numeric"), true, true, None, None),
    meta("subject", "cause_of_death", Some("categorical"), true, false, None, None),
    meta("subject", "race", Some("categorical"), true, true, None, None),
    meta("subject", "subject_data_at_gdc", None, true, true, Some("data_source"), None),
    meta("subject", "subject_data_at_pdc", None, true, true, Some("data_source"), None),
    meta("subject", "subject_data_at_idc", None, true, true, Some("data_source"), None),
    meta("file", "file_id", Some("categorical"), false, true, None, None),
    meta("file", "drs_uri", None, false, true, None, None),
    meta("file", "description", None, false, true, None, None),
    meta("file", "size", Some("numeric"), true, true, None, None),
    meta("file", "format", Some("categorical"), true, true, None, None),
    meta("file", "file_type", Some("categorical"), true, true, None, None),
    meta("file", "category", Some("categorical"), true, true, None, None),
    meta("file", "file_data_at_gdc", None, true, true, Some("data_source"), None),
    meta("file", "file_data_at_pdc", None, true, true, Some("data_source"), None),
    meta("observation", "vital_status", Some("categorical"), true, true, None, None),
    meta("observation", "sex", Some("categorical"), true, true, None, None),
    meta("observation", "diagnosis", Some("categorical"), true, true, None, None),
    meta("observation", "days_to_birth", Some("numeric"), true, false, None, None),
    meta("project", "project_id", Some("categorical"), true, true, None, None),
    meta("project", "description", Some("categorical"), false, true, None, None),
    meta(
      "file_tumor_vs_normal",
      "tumor_vs_normal",
      Some("categorical"),
      true,
      true,
      None,
      Some("file"),
    ),
    meta(
      "file_anatomic_site",
      "anatomic_site",
      Some("categorical"),
      true,
      true,
      None,
      Some("file"),
    ),
    meta("upstream_identifiers", "data_source", None, false, true, None, None),
    meta(
      "upstream_identifiers",
      "data_source_id_field_name",
      None,
      false,
      true,
      None,
      None,
    ),
    meta(
      "upstream_identifiers",
      "data_source_id_value",
      None,
      false,
      true,
      None,
      None,
    ),
    meta(
      "external_reference",
      "reference_name",
      None,
      false,
      false,
      Some("external_reference_metadata"),
      None,
    ),
    meta(
      "external_reference",
      "reference_url",
      None,
      false,
      false,
      Some("external_reference_metadata"),
      None,
    ),
  ];

  return (tables, metadata);
}

/// Builds the fixture catalog; panics are fine in test context.
pub fn test_catalog() -> Catalog {
  let (tables, metadata) = cda_snapshot();
  return Catalog::build(tables, metadata).expect("fixture catalog");
}
