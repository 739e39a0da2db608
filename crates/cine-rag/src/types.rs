use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::{RagError, RagResult};
use crate::search::list_literal;

/// Index field names a filter may target and the order fields are rendered in.
pub const DATA_COLUMNS: [&str; 13] = [
    "tmdb_id",
    "original_language",
    "original_title",
    "description",
    "genres",
    "year",
    "keywords",
    "director",
    "actors",
    "popularity",
    "popularity_bins",
    "vote_average",
    "vote_average_bins",
];

/// Identifier as stored in the index; numeric in practice, text tolerated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MovieId {
    Number(i64),
    Text(String),
}

impl fmt::Display for MovieId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// A movie document as read from the index.
///
/// Unknown source fields (the embedding vector in particular) are dropped on
/// deserialization, so a `Movie` never carries internal index data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmdb_id: Option<MovieId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    #[serde(default, deserialize_with = "number_or_numeric_text", skip_serializing_if = "Option::is_none")]
    pub year: Option<f64>,
    #[serde(default, deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    #[serde(default, deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub actors: Vec<String>,
    #[serde(default, deserialize_with = "number_or_numeric_text", skip_serializing_if = "Option::is_none")]
    pub popularity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popularity_bins: Option<String>,
    #[serde(default, deserialize_with = "number_or_numeric_text", skip_serializing_if = "Option::is_none")]
    pub vote_average: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_average_bins: Option<String>,
}

impl Movie {
    pub fn title(&self) -> &str {
        self.original_title.as_deref().unwrap_or("")
    }

    /// Numeric value of a sortable field.
    pub fn sort_value(&self, field: SortField) -> Option<f64> {
        match field {
            SortField::Year => self.year,
            SortField::Popularity => self.popularity,
            SortField::VoteAverage => self.vote_average,
        }
    }

    /// `(field, rendered value)` pairs in column order, absent fields skipped.
    pub fn field_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(DATA_COLUMNS.len());
        let mut push_text = |name: &'static str, value: &Option<String>| {
            if let Some(v) = value {
                pairs.push((name, v.clone()));
            }
        };
        push_text("tmdb_id", &self.tmdb_id.as_ref().map(|id| id.to_string()));
        push_text("original_language", &self.original_language);
        push_text("original_title", &self.original_title);
        push_text("description", &self.description);
        if !self.genres.is_empty() {
            pairs.push(("genres", self.genres.join(",")));
        }
        if let Some(year) = self.year {
            pairs.push(("year", format_number(year)));
        }
        if !self.keywords.is_empty() {
            pairs.push(("keywords", self.keywords.join(",")));
        }
        if let Some(director) = &self.director {
            pairs.push(("director", director.clone()));
        }
        if !self.actors.is_empty() {
            pairs.push(("actors", self.actors.join(",")));
        }
        if let Some(p) = self.popularity {
            pairs.push(("popularity", format_number(p)));
        }
        if let Some(bins) = &self.popularity_bins {
            pairs.push(("popularity_bins", bins.clone()));
        }
        if let Some(v) = self.vote_average {
            pairs.push(("vote_average", format_number(v)));
        }
        if let Some(bins) = &self.vote_average_bins {
            pairs.push(("vote_average_bins", bins.clone()));
        }
        pairs
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::String(s)) => s
            .split(',')
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(other) => vec![other.to_string()],
    })
}

fn number_or_numeric_text<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

/// Numeric fields a result list can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Year,
    Popularity,
    VoteAverage,
}

impl SortField {
    pub fn parse(name: &str) -> RagResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "year" => Ok(Self::Year),
            "popularity" => Ok(Self::Popularity),
            "vote_average" => Ok(Self::VoteAverage),
            other => Err(RagError::Validation(format!(
                "cannot sort by '{}': expected one of year, popularity, vote_average",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Popularity => "popularity",
            Self::VoteAverage => "vote_average",
        }
    }
}

impl Default for SortField {
    fn default() -> Self {
        Self::Popularity
    }
}

/// Value side of a filter criterion. Every element is a required match.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    One(String),
    Many(Vec<String>),
}

impl FilterValue {
    /// Build from a JSON value proposed by the model or the caller.
    ///
    /// Strings holding a bracketed list literal go through the list adapter;
    /// real JSON arrays are taken as-is. Objects and nulls are rejected.
    pub fn from_json(value: &serde_json::Value) -> RagResult<Self> {
        match value {
            serde_json::Value::String(s) if s.contains('[') => {
                list_literal::parse(s).map(Self::Many)
            }
            serde_json::Value::String(s) => Ok(Self::One(s.clone())),
            serde_json::Value::Number(n) => Ok(Self::One(n.to_string())),
            serde_json::Value::Bool(b) => Ok(Self::One(b.to_string())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => Ok(s.clone()),
                    serde_json::Value::Number(n) => Ok(n.to_string()),
                    serde_json::Value::Bool(b) => Ok(b.to_string()),
                    other => Err(RagError::Validation(format!(
                        "unsupported filter list element: {}",
                        other
                    ))),
                })
                .collect::<RagResult<Vec<_>>>()
                .map(Self::Many),
            other => Err(RagError::Validation(format!(
                "unsupported filter value: {}",
                other
            ))),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::One(v) => vec![v.as_str()],
            Self::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

/// One `field -> value(s)` entry of a conjunctive filter.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCriterion {
    pub field: String,
    pub value: FilterValue,
}

impl FilterCriterion {
    pub fn new(field: impl Into<String>, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }

    /// Flatten a tool input (one object, or a list of objects) into criteria.
    ///
    /// Fields outside `allowed_fields` are dropped before their values are
    /// looked at, so a stray field never fails the search.
    pub fn from_tool_input(input: &serde_json::Value, allowed_fields: &[String]) -> RagResult<Vec<Self>> {
        let objects: Vec<&serde_json::Map<String, serde_json::Value>> = match input {
            serde_json::Value::Object(map) => vec![map],
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_object().ok_or_else(|| {
                        RagError::Validation(format!(
                            "filter list must contain objects, got {}",
                            item
                        ))
                    })
                })
                .collect::<RagResult<Vec<_>>>()?,
            other => {
                return Err(RagError::Validation(format!(
                    "filter criteria must be an object or a list of objects, got {}",
                    other
                )))
            }
        };

        let mut criteria = Vec::new();
        for map in objects {
            for (field, value) in map {
                if !allowed_fields.iter().any(|f| f == field) {
                    tracing::debug!(field = %field, "Dropping filter on unknown field");
                    continue;
                }
                criteria.push(Self::new(field.clone(), FilterValue::from_json(value)?));
            }
        }
        Ok(criteria)
    }
}
