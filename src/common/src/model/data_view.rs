use serde::{Deserialize, Serialize};
use serde_json::Value;

use uniquery_api::view::{ViewFieldInfo, ViewInfo};

pub const DEFAULT_DATE_FIELD: &str = "@timestamp";
pub const KEYWORD_SUFFIX: &str = "keyword";

/// How the rows of a data view are produced by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum QueryType {
    #[default]
    IndexBase,
    #[serde(rename = "DSL")]
    Dsl,
    #[serde(rename = "SQL")]
    Sql,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::IndexBase => "IndexBase",
            QueryType::Dsl => "DSL",
            QueryType::Sql => "SQL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IndexBase" => Some(QueryType::IndexBase),
            "DSL" => Some(QueryType::Dsl),
            "SQL" => Some(QueryType::Sql),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Text,
    Integer,
    Long,
    Float,
    Double,
    Datetime,
    Boolean,
    Point,
    #[serde(other)]
    Other,
}

impl FieldType {
    pub fn is_number(&self) -> bool {
        matches!(
            self,
            FieldType::Integer | FieldType::Long | FieldType::Float | FieldType::Double
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Text)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Long => "long",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Datetime => "datetime",
            FieldType::Boolean => "boolean",
            FieldType::Point => "point",
            FieldType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "string" | "keyword" => FieldType::String,
            "text" => FieldType::Text,
            "integer" | "short" | "byte" => FieldType::Integer,
            "long" | "unsigned_long" => FieldType::Long,
            "float" | "half_float" | "scaled_float" => FieldType::Float,
            "double" => FieldType::Double,
            "datetime" | "date" => FieldType::Datetime,
            "boolean" => FieldType::Boolean,
            "point" | "geo_point" => FieldType::Point,
            _ => FieldType::Other,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub display_name: String,
}

impl ViewField {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            display_name: name.to_string(),
        }
    }

    /// Name to aggregate or sort on; analysed text fields use their keyword sub-field.
    pub fn aggregatable_name(&self) -> String {
        if self.field_type == FieldType::Text {
            format!("{}.{KEYWORD_SUFFIX}", self.name)
        } else {
            self.name.clone()
        }
    }
}

/// Logical table over one log group.
///
/// Owned by the configuration service; the engine only reads it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataView {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub technical_name: String,
    #[serde(default)]
    pub query_type: QueryType,
    /// Log group that supplies indices and baseline filters; defaults to the view id
    #[serde(default)]
    pub log_group_id: String,
    #[serde(default = "default_date_field")]
    pub date_field: String,
    #[serde(default)]
    pub fields: Vec<ViewField>,
}

fn default_date_field() -> String {
    DEFAULT_DATE_FIELD.to_string()
}

impl DataView {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            technical_name: id.to_string(),
            query_type: QueryType::IndexBase,
            log_group_id: String::new(),
            date_field: default_date_field(),
            fields: Vec::new(),
        }
    }

    pub fn with_fields(mut self, fields: Vec<ViewField>) -> Self {
        self.fields = fields;
        self
    }

    pub fn field(&self, name: &str) -> Option<&ViewField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn log_group(&self) -> &str {
        if self.log_group_id.is_empty() {
            &self.id
        } else {
            &self.log_group_id
        }
    }

    pub fn to_view_info(&self) -> ViewInfo {
        ViewInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            technical_name: self.technical_name.clone(),
            query_type: self.query_type.as_str().to_string(),
            fields: self
                .fields
                .iter()
                .map(|f| ViewFieldInfo {
                    name: f.name.clone(),
                    field_type: f.field_type.as_str().to_string(),
                    display_name: f.display_name.clone(),
                })
                .collect(),
        }
    }
}

/// Physical index set and baseline filter of a log group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogGroup {
    #[serde(default)]
    pub index_pattern: Vec<String>,
    #[serde(default)]
    pub must_filters: Vec<Value>,
}
