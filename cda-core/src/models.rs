use serde::{Deserialize, Serialize};

/// Normalized request input shared by the data and summary pipelines.
#[derive(Clone, Debug, Default)]
pub struct RequestSpec {
  pub match_all: Vec<String>,
  pub match_some: Vec<String>,
  pub add_columns: Vec<String>,
  pub exclude_columns: Vec<String>,
  pub collate_results: bool,
  pub external_reference: bool,
}

impl RequestSpec {
  pub fn has_filters(&self) -> bool {
    return !self.match_all.is_empty() || !self.match_some.is_empty();
  }
}

fn unwrap(list: &Option<Vec<String>>) -> Vec<String> {
  return list.clone().unwrap_or_default();
}

/// JSON body of the `/data/{endpoint}` endpoints. All fields are optional
/// and null-tolerant; an entirely empty body selects the default columns.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DataRequestBody {
  #[serde(rename = "MATCH_ALL", default)]
  pub match_all: Option<Vec<String>>,
  #[serde(rename = "MATCH_SOME", default)]
  pub match_some: Option<Vec<String>>,
  #[serde(rename = "ADD_COLUMNS", default)]
  pub add_columns: Option<Vec<String>>,
  #[serde(rename = "EXCLUDE_COLUMNS", default)]
  pub exclude_columns: Option<Vec<String>>,
  #[serde(rename = "COLLATE_RESULTS", default)]
  pub collate_results: Option<bool>,
  #[serde(rename = "EXTERNAL_REFERENCE", default)]
  pub external_reference: Option<bool>,
}

impl DataRequestBody {
  pub fn to_spec(&self) -> RequestSpec {
    return RequestSpec {
      match_all: unwrap(&self.match_all),
      match_some: unwrap(&self.match_some),
      add_columns: unwrap(&self.add_columns),
      exclude_columns: unwrap(&self.exclude_columns),
      collate_results: self.collate_results.unwrap_or(false),
      external_reference: self.external_reference.unwrap_or(false),
    };
  }
}

/// JSON body of the `/summary/{endpoint}` endpoints.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SummaryRequestBody {
  #[serde(rename = "MATCH_ALL", default)]
  pub match_all: Option<Vec<String>>,
  #[serde(rename = "MATCH_SOME", default)]
  pub match_some: Option<Vec<String>>,
  #[serde(rename = "ADD_COLUMNS", default)]
  pub add_columns: Option<Vec<String>>,
  #[serde(rename = "EXCLUDE_COLUMNS", default)]
  pub exclude_columns: Option<Vec<String>>,
}

impl SummaryRequestBody {
  pub fn to_spec(&self) -> RequestSpec {
    return RequestSpec {
      match_all: unwrap(&self.match_all),
      match_some: unwrap(&self.match_some),
      add_columns: unwrap(&self.add_columns),
      exclude_columns: unwrap(&self.exclude_columns),
      collate_results: false,
      external_reference: false,
    };
  }
}

#[derive(Debug, Serialize)]
pub struct PagedResponse {
  pub result: Vec<serde_json::Value>,
  pub query_sql: String,
  pub total_row_count: i64,
  pub next_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
  pub result: Vec<serde_json::Value>,
  pub query_sql: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnListing {
  pub table: String,
  pub column: String,
  pub data_type: String,
  pub nullable: bool,
  pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ColumnsResponse {
  pub result: Vec<ColumnListing>,
}

#[derive(Debug, Serialize)]
pub struct ReleaseMetadataResponse {
  pub result: Vec<serde_json::Value>,
}
