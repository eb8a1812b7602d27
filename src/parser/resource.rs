//! Resource model produced by the parser.
//!
//! A [`Resource`] is identified by a [`ResourceName`] (kind + name). Names
//! compare case-insensitively through [`ResourceName::normalized`]; kinds
//! are never case-folded. Each resource carries exactly one spec variant
//! matching its kind.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource types supported by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Kind not known yet. Only valid on raw refs.
    #[default]
    Unspecified,
    /// Data ingested from a connector.
    Source,
    /// SQL transformation.
    Model,
    /// Dashboard definition over a model or source.
    MetricsView,
    /// Versioned SQL applied to an OLAP connector.
    Migration,
}

impl ResourceKind {
    /// Parses a kind from user input.
    ///
    /// The empty string is a valid (unspecified) kind.
    ///
    /// # Errors
    ///
    /// Returns a message if the kind is not recognised.
    pub fn parse(kind: &str) -> std::result::Result<Self, String> {
        match kind.trim().to_lowercase().as_str() {
            "" => Ok(Self::Unspecified),
            "source" => Ok(Self::Source),
            "model" => Ok(Self::Model),
            "metricsview" | "metrics_view" | "dashboard" => Ok(Self::MetricsView),
            "migration" => Ok(Self::Migration),
            _ => Err(format!("invalid resource kind {kind:?}")),
        }
    }

    /// Returns the display name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "",
            Self::Source => "Source",
            Self::Model => "Model",
            Self::MetricsView => "MetricsView",
            Self::Migration => "Migration",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceName {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource name, in the casing the user wrote it.
    pub name: String,
}

impl ResourceName {
    /// Creates a resource name.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Creates a name with unspecified kind.
    #[must_use]
    pub fn unspecified(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Unspecified, name)
    }

    /// Returns the lookup key: same kind, lower-cased name.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            kind: self.kind,
            name: self.name.to_lowercase(),
        }
    }

    /// Parses `"name"` or `"Kind/name"`.
    ///
    /// # Errors
    ///
    /// Returns a message if the kind prefix is not recognised.
    pub fn parse(value: &str) -> std::result::Result<Self, String> {
        match value.split_once('/') {
            Some((kind, name)) => Ok(Self::new(ResourceKind::parse(kind)?, name.trim())),
            None => Ok(Self::unspecified(value.trim())),
        }
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A resource parsed from one or more project files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource identity.
    pub name: ResourceName,
    /// Files that contributed to the resource, in contribution order.
    pub paths: Vec<String>,
    /// Resolved dependencies. Never contains an unspecified kind.
    pub refs: Vec<ResourceName>,
    /// Refs as written, possibly with unspecified kind.
    pub(crate) raw_refs: Vec<ResourceName>,
    /// Kind-specific payload.
    pub spec: ResourceSpec,
}

impl Resource {
    /// Returns the refs as written in the project files.
    #[must_use]
    pub fn raw_refs(&self) -> &[ResourceName] {
        &self.raw_refs
    }
}

/// Kind-specific resource payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    /// Source payload.
    Source(SourceSpec),
    /// Model payload.
    Model(ModelSpec),
    /// Metrics view payload.
    MetricsView(MetricsViewSpec),
    /// Migration payload.
    Migration(MigrationSpec),
}

impl ResourceSpec {
    /// Returns the kind this spec belongs to.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Source(_) => ResourceKind::Source,
            Self::Model(_) => ResourceKind::Model,
            Self::MetricsView(_) => ResourceKind::MetricsView,
            Self::Migration(_) => ResourceKind::Migration,
        }
    }

    /// Returns the OLAP connector the resource executes against.
    #[must_use]
    pub fn connector(&self) -> &str {
        match self {
            Self::Source(s) => &s.sink_connector,
            Self::Model(m) => &m.connector,
            Self::MetricsView(m) => &m.connector,
            Self::Migration(m) => &m.connector,
        }
    }
}

/// Source ingestion settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Connector data is read from (`local_file`, `s3`, `sql`, ...).
    pub source_connector: String,
    /// OLAP connector data is written to.
    pub sink_connector: String,
    /// Connector-specific properties.
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Automatic refresh schedule.
    pub refresh_schedule: Option<Schedule>,
    /// Ingestion timeout.
    pub timeout_seconds: Option<u32>,
}

/// Refresh schedule for a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Cron expression.
    pub cron: Option<String>,
    /// Fixed interval in seconds.
    pub ticker_seconds: Option<u32>,
}

/// Model settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// OLAP connector the model runs on.
    pub connector: String,
    /// Defining query, possibly templated.
    pub sql: String,
    /// Whether the query contains template syntax.
    pub uses_templating: bool,
    /// Materialize as a table instead of a view.
    pub materialize: Option<bool>,
    /// Execution timeout.
    pub timeout_seconds: Option<u32>,
}

/// Metrics view settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsViewSpec {
    /// OLAP connector holding the table.
    pub connector: String,
    /// Underlying model or source table.
    pub table: String,
    /// Display title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Timestamp column.
    pub time_dimension: String,
    /// Smallest time grain exposed.
    pub smallest_time_grain: String,
    /// Default time range (ISO 8601 duration).
    pub default_time_range: String,
    /// First day of the week, 1 = Monday.
    pub first_day_of_week: Option<u32>,
    /// First month of the year, 1 = January.
    pub first_month_of_year: Option<u32>,
    /// Dimensions.
    pub dimensions: Vec<Dimension>,
    /// Measures.
    pub measures: Vec<Measure>,
}

/// Metrics view dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    /// Dimension name.
    pub name: String,
    /// Display label.
    pub label: String,
    /// Source column.
    pub column: String,
    /// Description.
    pub description: String,
}

/// Metrics view measure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measure {
    /// Measure name.
    pub name: String,
    /// Display label.
    pub label: String,
    /// Aggregate SQL expression.
    pub expression: String,
    /// Description.
    pub description: String,
    /// Formatting hint.
    pub format_preset: String,
    /// Whether percent-of-total is meaningful.
    pub valid_percent_of_total: bool,
}

/// Migration settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationSpec {
    /// OLAP connector the migration runs on.
    pub connector: String,
    /// Templated SQL executed once per version.
    pub sql: String,
    /// Target version.
    pub version: u32,
}

/// Character location inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharLocation {
    /// One-based line number.
    pub line: u32,
}

/// Recoverable error scoped to one project file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    /// Human-readable message.
    pub message: String,
    /// Repo path of the offending file.
    pub file_path: String,
    /// Where in the file the error starts, when known.
    pub start_location: Option<CharLocation>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start_location {
            Some(loc) => write!(f, "{}:{}: {}", self.file_path, loc.line, self.message),
            None => write!(f, "{}: {}", self.file_path, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!(ResourceKind::parse(""), Ok(ResourceKind::Unspecified));
        assert_eq!(ResourceKind::parse(" Source "), Ok(ResourceKind::Source));
        assert_eq!(ResourceKind::parse("metrics_view"), Ok(ResourceKind::MetricsView));
        assert_eq!(ResourceKind::parse("dashboard"), Ok(ResourceKind::MetricsView));
        assert_eq!(ResourceKind::parse("MIGRATION"), Ok(ResourceKind::Migration));
        assert!(ResourceKind::parse("table").is_err());
    }

    #[test]
    fn test_name_display_and_normalization() {
        let name = ResourceName::new(ResourceKind::Model, "AdBids_Model");
        assert_eq!(name.to_string(), "Model/AdBids_Model");
        assert_eq!(name.normalized().name, "adbids_model");
        assert_eq!(name.normalized().kind, ResourceKind::Model);
        assert_ne!(
            ResourceName::new(ResourceKind::Source, "x").normalized(),
            ResourceName::new(ResourceKind::Model, "x").normalized()
        );
    }

    #[test]
    fn test_parse_resource_name() {
        assert_eq!(
            ResourceName::parse("Source/AdBids"),
            Ok(ResourceName::new(ResourceKind::Source, "AdBids"))
        );
        assert_eq!(ResourceName::parse("foo"), Ok(ResourceName::unspecified("foo")));
        assert!(ResourceName::parse("bogus/foo").is_err());
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError {
            message: String::from("bad"),
            file_path: String::from("/a.yaml"),
            start_location: Some(CharLocation { line: 3 }),
        };
        assert_eq!(err.to_string(), "/a.yaml:3: bad");
    }
}
