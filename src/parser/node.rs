//! Decoding of a stem (a `.sql` and/or `.yaml` file pair) into a resource.
//!
//! Field mapping is written out by hand for every kind. YAML keys take
//! precedence; keys set through `configure(...)` in the SQL file fill in
//! whatever the YAML leaves unset.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::config::ParserOptions;
use crate::error::RillError;

use super::resource::{
    Dimension, Measure, MetricsViewSpec, MigrationSpec, ModelSpec, ResourceKind, ResourceName,
    ResourceSpec, Schedule, SourceSpec,
};
use super::sql::extract_table_refs;
use super::template::{analyze_template, uses_templating};

/// Keys consumed by the parser itself; everything else on a source is a property.
const SOURCE_RESERVED_KEYS: &[&str] = &[
    "kind", "name", "type", "connector", "sink", "refs", "refresh", "timeout",
];

/// Sink used by sources that do not name one.
const DEFAULT_SINK: &str = "duckdb";

/// A loaded project file.
#[derive(Debug, Clone)]
pub struct StemFile {
    /// Repo path.
    pub path: String,
    /// File content.
    pub content: String,
}

/// Result of decoding a stem.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNode {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource name.
    pub name: String,
    /// Raw refs, possibly with unspecified kind.
    pub refs: Vec<ResourceName>,
    /// Decoded spec.
    pub spec: ResourceSpec,
}

/// Failure to decode a stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeError {
    /// File responsible for the error. `None` blames every file of the stem.
    pub path: Option<String>,
    /// Error message.
    pub message: String,
    /// One-based line, when known.
    pub line: Option<u32>,
}

impl NodeError {
    fn new(path: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            path: path.map(str::to_string),
            message: message.into(),
            line: None,
        }
    }

    const fn at_line(mut self, line: Option<u32>) -> Self {
        self.line = line;
        self
    }
}

/// Decodes the files of one stem into a resource.
///
/// `stem` is the shared path without extension, e.g. `/models/orders`.
///
/// # Errors
///
/// Returns a [`NodeError`] naming the responsible file if decoding fails.
pub fn parse_stem(
    stem: &str,
    yaml: Option<&StemFile>,
    sql: Option<&StemFile>,
    options: &ParserOptions,
) -> Result<ParsedNode, NodeError> {
    let mut config = match yaml {
        Some(file) => decode_yaml(file)?,
        None => Map::new(),
    };

    let mut refs = Vec::new();
    if let Some(file) = sql {
        let meta = analyze_template(&file.content).map_err(|e| template_error(&file.path, e))?;
        for (key, value) in meta.config {
            config.entry(key).or_insert(value);
        }
        refs.extend(meta.refs);
    }

    // Spec-level problems are blamed on the YAML file when there is one.
    let blame = yaml.or(sql).map(|f| f.path.as_str());
    let fields = Fields::new(&config);
    let err = |message: String| NodeError::new(blame, message);

    let kind = resolve_kind(&fields, stem, sql.is_some()).map_err(err)?;
    let name = match fields.string("name").map_err(err)? {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        Some(_) => return Err(err(String::from("resource name must not be empty"))),
        None => stem.rsplit('/').next().unwrap_or(stem).to_string(),
    };

    for entry in fields.list("refs").map_err(err)? {
        let text = entry
            .as_str()
            .ok_or_else(|| err(String::from("entries in 'refs' must be strings")))?;
        refs.push(ResourceName::parse(text).map_err(err)?);
    }

    let spec = match kind {
        ResourceKind::Source => ResourceSpec::Source(source_spec(&fields, sql).map_err(err)?),
        ResourceKind::Model => {
            let spec = model_spec(&fields, sql).map_err(err)?;
            let source = SqlSource::locate(yaml, sql);
            add_sql_refs(&mut refs, &spec.connector, &spec.sql, spec.uses_templating, source, options)?;
            ResourceSpec::Model(spec)
        }
        ResourceKind::MetricsView => {
            let spec = metrics_view_spec(&fields).map_err(err)?;
            refs.push(ResourceName::unspecified(spec.table.clone()));
            ResourceSpec::MetricsView(spec)
        }
        ResourceKind::Migration => {
            let spec = migration_spec(&fields, sql).map_err(err)?;
            let templated = uses_templating(&spec.sql);
            let source = SqlSource::locate(yaml, sql);
            add_sql_refs(&mut refs, &spec.connector, &spec.sql, templated, source, options)?;
            ResourceSpec::Migration(spec)
        }
        ResourceKind::Unspecified => {
            return Err(err(String::from("resource kind not specified")));
        }
    };

    Ok(ParsedNode {
        kind,
        name,
        refs,
        spec,
    })
}

/// Where the SQL of a resource came from, for error attribution.
#[derive(Clone, Copy)]
struct SqlSource<'a> {
    path: Option<&'a str>,
    from_sql_file: bool,
}

impl<'a> SqlSource<'a> {
    fn locate(yaml: Option<&'a StemFile>, sql: Option<&'a StemFile>) -> Self {
        match (sql, yaml) {
            (Some(file), _) => Self {
                path: Some(&file.path),
                from_sql_file: true,
            },
            (None, file) => Self {
                path: file.map(|f| f.path.as_str()),
                from_sql_file: false,
            },
        }
    }
}

/// Adds refs found in SQL: template refs for inline SQL, relation names for
/// untemplated DuckDB SQL.
fn add_sql_refs(
    refs: &mut Vec<ResourceName>,
    connector: &str,
    sql: &str,
    templated: bool,
    source: SqlSource<'_>,
    options: &ParserOptions,
) -> Result<(), NodeError> {
    if templated {
        // SQL from a SQL file was already analysed with the rest of the file.
        if !source.from_sql_file {
            // Lines inside an inline `sql:` value do not map to file lines.
            let meta = analyze_template(sql).map_err(|e| {
                let err = template_error(source.path.unwrap_or_default(), e);
                NodeError::new(source.path, err.message)
            })?;
            refs.extend(meta.refs);
        }
        return Ok(());
    }

    if !options.is_duckdb_connector(connector) {
        return Ok(());
    }

    let tables = extract_table_refs(sql).map_err(|e| {
        let line = if source.from_sql_file { e.line } else { None };
        NodeError::new(source.path, e.message).at_line(line)
    })?;
    refs.extend(tables.into_iter().map(ResourceName::unspecified));
    Ok(())
}

fn decode_yaml(file: &StemFile) -> Result<Map<String, Value>, NodeError> {
    if file.content.trim().is_empty() {
        return Ok(Map::new());
    }

    let value: Value = serde_yaml::from_str(&file.content).map_err(|e| {
        let line = e
            .location()
            .and_then(|l| u32::try_from(l.line()).ok());
        NodeError::new(Some(&file.path), e.to_string()).at_line(line)
    })?;

    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(NodeError::new(
            Some(&file.path),
            "expected the YAML file to contain a mapping",
        )),
    }
}

fn template_error(path: &str, err: RillError) -> NodeError {
    match err {
        RillError::Template(t) => {
            let line = t.line();
            NodeError::new(Some(path), t.to_string()).at_line(line)
        }
        other => NodeError::new(Some(path), other.to_string()),
    }
}

fn resolve_kind(fields: &Fields<'_>, stem: &str, has_sql: bool) -> Result<ResourceKind, String> {
    if let Some(kind) = fields.string("kind")? {
        let kind = ResourceKind::parse(&kind)?;
        if kind != ResourceKind::Unspecified {
            return Ok(kind);
        }
    }

    let mut segments = stem.trim_start_matches('/').split('/');
    let first = segments.next().unwrap_or_default();
    if segments.next().is_some() {
        match first {
            "sources" => return Ok(ResourceKind::Source),
            "models" => return Ok(ResourceKind::Model),
            "dashboards" | "metrics" => return Ok(ResourceKind::MetricsView),
            "migrations" => return Ok(ResourceKind::Migration),
            _ => {}
        }
    }

    if has_sql {
        return Ok(ResourceKind::Model);
    }

    Err(String::from("resource kind not specified"))
}

fn source_spec(fields: &Fields<'_>, sql: Option<&StemFile>) -> Result<SourceSpec, String> {
    let connector = match (fields.string("connector")?, fields.string("type")?) {
        (Some(c), _) | (None, Some(c)) if !c.is_empty() => c,
        _ if sql.is_some() => String::from(DEFAULT_SINK),
        _ => return Err(String::from("source connector is required (set 'connector')")),
    };

    let mut properties: std::collections::BTreeMap<String, Value> = fields
        .map
        .iter()
        .filter(|(k, _)| !SOURCE_RESERVED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(file) = sql {
        properties.insert(String::from("sql"), Value::String(file.content.clone()));
    }

    let refresh_schedule = match fields.get("refresh") {
        None => None,
        Some(Value::Object(map)) => {
            let refresh = Fields::new(map);
            let cron = refresh.string("cron")?;
            let ticker_seconds = refresh.seconds("every")?;
            if cron.is_none() && ticker_seconds.is_none() {
                None
            } else {
                Some(Schedule {
                    cron,
                    ticker_seconds,
                })
            }
        }
        Some(_) => return Err(String::from("'refresh' must be a mapping with 'cron' or 'every'")),
    };

    Ok(SourceSpec {
        source_connector: connector,
        sink_connector: fields
            .string("sink")?
            .unwrap_or_else(|| String::from(DEFAULT_SINK)),
        properties,
        refresh_schedule,
        timeout_seconds: fields.seconds("timeout")?,
    })
}

fn model_spec(fields: &Fields<'_>, sql: Option<&StemFile>) -> Result<ModelSpec, String> {
    let sql = match sql {
        Some(file) => file.content.clone(),
        None => fields.string("sql")?.unwrap_or_default(),
    };
    if sql.trim().is_empty() {
        return Err(String::from("model does not define any SQL"));
    }

    Ok(ModelSpec {
        connector: fields.string("connector")?.unwrap_or_default(),
        uses_templating: uses_templating(&sql),
        sql,
        materialize: fields.bool("materialize")?,
        timeout_seconds: fields.seconds("timeout")?,
    })
}

fn migration_spec(fields: &Fields<'_>, sql: Option<&StemFile>) -> Result<MigrationSpec, String> {
    let sql = match sql {
        Some(file) => file.content.clone(),
        None => fields.string("sql")?.unwrap_or_default(),
    };
    if sql.trim().is_empty() {
        return Err(String::from("migration does not define any SQL"));
    }

    Ok(MigrationSpec {
        connector: fields.string("connector")?.unwrap_or_default(),
        sql,
        version: fields.u32("version")?.unwrap_or(0),
    })
}

fn metrics_view_spec(fields: &Fields<'_>) -> Result<MetricsViewSpec, String> {
    let table = match (fields.string("model")?, fields.string("table")?) {
        (Some(t), _) | (None, Some(t)) if !t.trim().is_empty() => t.trim().to_string(),
        _ => return Err(String::from("metrics view must reference a 'model' or 'table'")),
    };

    let first_day_of_week = fields.u32("first_day_of_week")?;
    if first_day_of_week.is_some_and(|d| !(1..=7).contains(&d)) {
        return Err(String::from("first_day_of_week must be between 1 and 7"));
    }
    let first_month_of_year = fields.u32("first_month_of_year")?;
    if first_month_of_year.is_some_and(|m| !(1..=12).contains(&m)) {
        return Err(String::from("first_month_of_year must be between 1 and 12"));
    }

    let mut dimensions = Vec::new();
    for (i, entry) in fields.list("dimensions")?.into_iter().enumerate() {
        let Value::Object(map) = entry else {
            return Err(format!("dimension {i} must be a mapping"));
        };
        let dim = Fields::new(map);
        let column = dim.string("column")?;
        let name = match (dim.string("name")?, &column) {
            (Some(n), _) => n,
            (None, Some(c)) => c.clone(),
            (None, None) => return Err(format!("dimension {i} must have a 'name' or 'column'")),
        };
        dimensions.push(Dimension {
            label: dim.string("label")?.unwrap_or_default(),
            column: column.unwrap_or_else(|| name.clone()),
            description: dim.string("description")?.unwrap_or_default(),
            name,
        });
    }

    let mut measures = Vec::new();
    for (i, entry) in fields.list("measures")?.into_iter().enumerate() {
        let Value::Object(map) = entry else {
            return Err(format!("measure {i} must be a mapping"));
        };
        let m = Fields::new(map);
        let expression = m
            .string("expression")?
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| format!("measure {i} must have an 'expression'"))?;
        measures.push(Measure {
            name: m.string("name")?.unwrap_or_else(|| format!("measure_{i}")),
            label: m.string("label")?.unwrap_or_default(),
            expression,
            description: m.string("description")?.unwrap_or_default(),
            format_preset: m.string("format_preset")?.unwrap_or_default(),
            valid_percent_of_total: m.bool("valid_percent_of_total")?.unwrap_or(false),
        });
    }

    if measures.is_empty() {
        return Err(String::from("metrics view must define at least one measure"));
    }

    let mut names = HashSet::new();
    for name in dimensions.iter().map(|d| &d.name).chain(measures.iter().map(|m| &m.name)) {
        if !names.insert(name.to_lowercase()) {
            return Err(format!("found duplicate dimension or measure name {name:?}"));
        }
    }

    let time_dimension = match fields.string("time_dimension")? {
        Some(t) => t,
        None => fields.string("timeseries")?.unwrap_or_default(),
    };

    Ok(MetricsViewSpec {
        connector: fields.string("connector")?.unwrap_or_default(),
        table,
        title: fields.string("title")?.unwrap_or_default(),
        description: fields.string("description")?.unwrap_or_default(),
        time_dimension,
        smallest_time_grain: fields.string("smallest_time_grain")?.unwrap_or_default(),
        default_time_range: fields.string("default_time_range")?.unwrap_or_default(),
        first_day_of_week,
        first_month_of_year,
        dimensions,
        measures,
    })
}

/// Typed accessors over a decoded mapping.
struct Fields<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    const fn new(map: &'a Map<String, Value>) -> Self {
        Self { map }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    fn string(&self, key: &str) -> Result<Option<String>, String> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(_) => Err(format!("field {key:?} must be a string")),
        }
    }

    fn bool(&self, key: &str) -> Result<Option<bool>, String> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.to_lowercase().as_str() {
                "true" | "yes" => Ok(Some(true)),
                "false" | "no" => Ok(Some(false)),
                _ => Err(format!("field {key:?} must be a boolean")),
            },
            Some(_) => Err(format!("field {key:?} must be a boolean")),
        }
    }

    fn u32(&self, key: &str) -> Result<Option<u32>, String> {
        let invalid = || format!("field {key:?} must be a non-negative integer");
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(Some)
                .ok_or_else(invalid),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid()),
            Some(_) => Err(invalid()),
        }
    }

    /// Reads seconds from an integer or a duration such as `90s`, `5m` or `1h30m`.
    fn seconds(&self, key: &str) -> Result<Option<u32>, String> {
        match self.get(key) {
            Some(Value::String(s)) => parse_duration_seconds(s)
                .map(Some)
                .ok_or_else(|| format!("field {key:?} is not a valid duration")),
            _ => self.u32(key),
        }
    }

    fn list(&self, key: &str) -> Result<Vec<&'a Value>, String> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.iter().collect()),
            Some(_) => Err(format!("field {key:?} must be a list")),
        }
    }
}

/// Parses `90` as seconds, or a duration such as `90s`, `5m` or `1h30m`.
fn parse_duration_seconds(text: &str) -> Option<u32> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<u32>() {
        return Some(secs);
    }
    let duration = humantime::parse_duration(text).ok()?;
    u32::try_from(duration.as_secs()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, content: &str) -> StemFile {
        StemFile {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    fn parse(stem: &str, yaml: Option<&str>, sql: Option<&str>) -> Result<ParsedNode, NodeError> {
        let yaml = yaml.map(|c| file(&format!("{stem}.yaml"), c));
        let sql = sql.map(|c| file(&format!("{stem}.sql"), c));
        parse_stem(stem, yaml.as_ref(), sql.as_ref(), &ParserOptions::default())
    }

    #[test]
    fn test_source_from_yaml() {
        let node = parse(
            "/sources/AdBids",
            Some("connector: local_file\npath: data/AdBids.csv\nrefresh:\n  every: 1h\ntimeout: 90s\n"),
            None,
        )
        .expect("valid source");

        assert_eq!(node.kind, ResourceKind::Source);
        assert_eq!(node.name, "AdBids");
        let ResourceSpec::Source(spec) = node.spec else {
            panic!("expected source spec");
        };
        assert_eq!(spec.source_connector, "local_file");
        assert_eq!(spec.sink_connector, "duckdb");
        assert_eq!(spec.properties.get("path"), Some(&Value::from("data/AdBids.csv")));
        assert!(!spec.properties.contains_key("refresh"));
        assert_eq!(spec.refresh_schedule.and_then(|s| s.ticker_seconds), Some(3_600));
        assert_eq!(spec.timeout_seconds, Some(90));
    }

    #[test]
    fn test_source_requires_connector() {
        let err = parse("/sources/x", Some("path: a.csv"), None).expect_err("no connector");
        assert_eq!(err.path.as_deref(), Some("/sources/x.yaml"));
        assert!(err.message.contains("connector"));
    }

    #[test]
    fn test_model_sql_refs() {
        let node = parse("/models/AdBids_model", None, Some("SELECT * FROM AdBids")).expect("valid model");
        assert_eq!(node.kind, ResourceKind::Model);
        assert_eq!(node.refs, vec![ResourceName::unspecified("AdBids")]);
    }

    #[test]
    fn test_model_yaml_overrides_configure() {
        let node = parse(
            "/models/m",
            Some("materialize: false\nname: renamed"),
            Some("{{ configure('materialize', true) }}{{ configure('timeout', '5m') }}SELECT * FROM {{ ref('x') }}"),
        )
        .expect("valid model");

        assert_eq!(node.name, "renamed");
        assert_eq!(node.refs, vec![ResourceName::unspecified("x")]);
        let ResourceSpec::Model(spec) = node.spec else {
            panic!("expected model spec");
        };
        assert_eq!(spec.materialize, Some(false));
        assert_eq!(spec.timeout_seconds, Some(300));
        assert!(spec.uses_templating);
    }

    #[test]
    fn test_model_sql_not_analysed_for_other_connectors() {
        let node = parse("/models/m", Some("connector: clickhouse"), Some("SELECT * FROM t")).expect("valid");
        assert!(node.refs.is_empty());
    }

    #[test]
    fn test_sql_syntax_error_blames_sql_file() {
        let err = parse("/models/m", Some("materialize: true"), Some("SELECT *\nFROM\nWHERE")).expect_err("bad sql");
        assert_eq!(err.path.as_deref(), Some("/models/m.sql"));
        assert!(err.line.is_some());
    }

    #[test]
    fn test_yaml_error_has_line() {
        let err = parse("/sources/s", Some("connector: a\npath: [unclosed\n"), None).expect_err("bad yaml");
        assert_eq!(err.path.as_deref(), Some("/sources/s.yaml"));
        assert!(err.line.is_some());
    }

    #[test]
    fn test_kind_inference() {
        let node = parse("/random/q", None, Some("SELECT 1")).expect("sql defaults to model");
        assert_eq!(node.kind, ResourceKind::Model);

        let node = parse("/random/q", Some("kind: source\nconnector: s3"), None).expect("explicit kind");
        assert_eq!(node.kind, ResourceKind::Source);

        let err = parse("/random/q", Some("a: 1"), None).expect_err("unknown kind");
        assert_eq!(err.message, "resource kind not specified");

        assert!(parse("/q", Some("kind: widget"), None).is_err());
    }

    #[test]
    fn test_metrics_view() {
        let yaml = r"
model: AdBids_model
title: Ads
time_dimension: timestamp
first_day_of_week: 1
dimensions:
  - column: publisher
  - name: dom
    column: domain
measures:
  - expression: count(*)
  - name: bids
    expression: sum(bid)
";
        let node = parse("/dashboards/ads", Some(yaml), None).expect("valid metrics view");
        assert_eq!(node.kind, ResourceKind::MetricsView);
        assert_eq!(node.refs, vec![ResourceName::unspecified("AdBids_model")]);

        let ResourceSpec::MetricsView(spec) = node.spec else {
            panic!("expected metrics view spec");
        };
        assert_eq!(spec.table, "AdBids_model");
        assert_eq!(spec.dimensions[0].name, "publisher");
        assert_eq!(spec.dimensions[1].column, "domain");
        assert_eq!(spec.measures[0].name, "measure_0");
        assert_eq!(spec.measures[1].name, "bids");
    }

    #[test]
    fn test_metrics_view_validation() {
        assert!(parse("/dashboards/d", Some("model: m\nmeasures: []"), None).is_err());
        assert!(parse(
            "/dashboards/d",
            Some("model: m\ndimensions:\n  - name: x\nmeasures:\n  - name: X\n    expression: count(*)"),
            None
        )
        .is_err());
        assert!(parse("/dashboards/d", Some("measures:\n  - expression: count(*)"), None).is_err());
    }

    #[test]
    fn test_migration() {
        let node = parse(
            "/migrations/m",
            Some("version: 5"),
            Some("CREATE TABLE IF NOT EXISTS t{{ version }} AS SELECT 1"),
        )
        .expect("valid migration");
        let ResourceSpec::Migration(spec) = node.spec else {
            panic!("expected migration spec");
        };
        assert_eq!(spec.version, 5);
        assert!(node.refs.is_empty());
    }

    #[test]
    fn test_explicit_refs_list() {
        let node = parse(
            "/models/m",
            Some("refs:\n  - Source/raw\n  - other"),
            Some("SELECT 1"),
        )
        .expect("valid model");
        assert_eq!(
            node.refs,
            vec![
                ResourceName::new(ResourceKind::Source, "raw"),
                ResourceName::unspecified("other"),
            ]
        );
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration_seconds("90"), Some(90));
        assert_eq!(parse_duration_seconds("1h30m"), Some(5_400));
        assert_eq!(parse_duration_seconds("2d"), Some(172_800));
        assert_eq!(parse_duration_seconds("5x"), None);
        assert_eq!(parse_duration_seconds("10m5"), None);
        assert_eq!(parse_duration_seconds("1h 15m"), Some(4_500));
        assert_eq!(parse_duration_seconds(""), None);
        assert_eq!(parse_duration_seconds("200000d"), None);
    }
}
