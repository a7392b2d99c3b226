use std::collections::HashSet;

use cda_schema::Catalog;

use crate::models::ColumnListing;

/// The static column catalog: one row per (client-visible parent table,
/// unique name) across all row-returning tables.
pub fn build_columns_listing(catalog: &Catalog) -> Vec<ColumnListing> {
  let mut seen: HashSet<(String, String)> = HashSet::new();
  let mut listings: Vec<ColumnListing> = vec![];

  for table in catalog.data_tables() {
    for column_id in catalog.data_columns(table.id) {
      let column = catalog.column_info(column_id);
      let parent = catalog.table_info(catalog.selectable_table(column));

      if !seen.insert((parent.name.clone(), column.unique_name.clone())) {
        continue;
      }
      listings.push(ColumnListing {
        table: parent.name.clone(),
        column: column.unique_name.clone(),
        data_type: column.data_type.to_lowercase(),
        nullable: column.nullable,
        description: column.comment.clone(),
      });
    }
  }

  return listings;
}

#[cfg(test)]
mod tests {
  use super::*;
  use cda_schema::testing::test_catalog;

  #[test]
  fn test_listing_fields() {
    let catalog = test_catalog();
    let listings = build_columns_listing(&catalog);

    let species = listings
      .iter()
      .find(|l| l.column == "species")
      .expect("species listed");
    assert_eq!(species.table, "subject");
    assert_eq!(species.data_type, "text");
    assert!(species.nullable);
  }

  #[test]
  fn test_virtual_columns_listed_under_virtual_parent() {
    let catalog = test_catalog();
    let listings = build_columns_listing(&catalog);

    let tumor: Vec<&ColumnListing> = listings
      .iter()
      .filter(|l| l.column == "tumor_vs_normal")
      .collect();
    assert_eq!(tumor.len(), 1);
    assert_eq!(tumor[0].table, "file");
  }

  #[test]
  fn test_one_row_per_parent_and_name() {
    let catalog = test_catalog();
    let listings = build_columns_listing(&catalog);

    let mut keys: Vec<(String, String)> = listings
      .iter()
      .map(|l| (l.table.clone(), l.column.clone()))
      .collect();
    let total = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(total, keys.len());
  }

  #[test]
  fn test_non_returning_columns_absent() {
    let catalog = test_catalog();
    let listings = build_columns_listing(&catalog);
    assert!(!listings.iter().any(|l| l.column == "subject_id_alias"));
    // Mapping and metadata tables stay out entirely.
    assert!(!listings.iter().any(|l| l.table == "file_describes_subject"));
    assert!(!listings.iter().any(|l| l.table == "column_metadata"));
  }
}
