//! Template engine for SQL and YAML project files.
//!
//! The same template text is evaluated twice in a resource's life:
//!
//! - **Analysis** at parse time, with no external data. Calls to
//!   `configure`, `dependency`, `ref` and `lookup` are recorded so the parser
//!   learns config keys and dependencies. Missing variables render empty.
//! - **Resolution** at reconcile or query time, with real data. `ref` and
//!   `lookup` go through caller-supplied callbacks, and any missing variable
//!   is an error.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use minijinja::value::Rest;
use minijinja::{Environment, Error, ErrorKind, UndefinedBehavior, Value};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RillError, TemplateError};

use super::resource::{ResourceKind, ResourceName};

/// Metadata extracted from a template at parse time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateMetadata {
    /// Refs registered through `ref`, `dependency` and `lookup`, deduplicated.
    pub refs: Vec<ResourceName>,
    /// Keys registered through `configure`.
    pub config: serde_json::Map<String, serde_json::Value>,
    /// Whether the source contains any template syntax.
    pub uses_templating: bool,
    /// The template rendered against empty placeholder data.
    pub resolved_with_placeholders: String,
}

/// Self-describing view of a resource exposed to templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateResource {
    /// Catalog metadata.
    pub meta: serde_json::Value,
    /// Declared spec.
    pub spec: serde_json::Value,
    /// Last observed state.
    pub state: serde_json::Value,
}

/// Callback resolving `ref(...)` to an addressable identifier.
pub type ResolveFn = Arc<dyn Fn(&ResourceName) -> Result<String> + Send + Sync>;

/// Callback resolving `lookup(...)` to another resource.
pub type LookupFn = Arc<dyn Fn(&ResourceName) -> Result<TemplateResource> + Send + Sync>;

/// Data available when resolving a template.
#[derive(Clone, Default)]
pub struct TemplateData {
    /// Project variables, exposed as `env`.
    pub variables: BTreeMap<String, String>,
    /// Auth claims of the caller, exposed as `claims`.
    pub claims: serde_json::Map<String, serde_json::Value>,
    /// The resource being resolved, exposed as `meta`, `spec` and `state`.
    pub self_resource: TemplateResource,
    /// Additional top-level variables, for example `version`.
    pub extra_props: BTreeMap<String, serde_json::Value>,
    /// Resolves `ref`. Without it, `ref` returns the plain name.
    pub resolve: Option<ResolveFn>,
    /// Resolves `lookup`. Without it, `lookup` is an error.
    pub lookup: Option<LookupFn>,
}

impl fmt::Debug for TemplateData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateData")
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("claims", &self.claims)
            .field("self_resource", &self.self_resource)
            .field("extra_props", &self.extra_props)
            .field("resolve", &self.resolve.is_some())
            .field("lookup", &self.lookup.is_some())
            .finish()
    }
}

impl TemplateData {
    /// Adds a top-level variable.
    #[must_use]
    pub fn with_extra_prop(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra_props.insert(key.into(), value.into());
        self
    }

    /// Builds the render context.
    fn context(&self) -> serde_json::Value {
        let mut ctx = serde_json::Map::new();
        for (key, value) in &self.extra_props {
            ctx.insert(key.clone(), value.clone());
        }
        ctx.insert(String::from("env"), serde_json::json!(self.variables));
        ctx.insert(String::from("claims"), serde_json::Value::Object(self.claims.clone()));
        ctx.insert(String::from("meta"), self.self_resource.meta.clone());
        ctx.insert(String::from("spec"), self.self_resource.spec.clone());
        ctx.insert(String::from("state"), self.self_resource.state.clone());
        serde_json::Value::Object(ctx)
    }
}

/// Returns true if the source contains template delimiters.
#[must_use]
pub fn uses_templating(source: &str) -> bool {
    source.contains("{{") || source.contains("{%") || source.contains("{#")
}

#[derive(Debug, Default)]
struct Analysis {
    refs: Vec<ResourceName>,
    config: serde_json::Map<String, serde_json::Value>,
}

impl Analysis {
    fn add_ref(&mut self, name: ResourceName) {
        let key = name.normalized();
        if !self.refs.iter().any(|r| r.normalized() == key) {
            self.refs.push(name);
        }
    }
}

/// Analyzes a template without external data.
///
/// # Errors
///
/// Returns a [`TemplateError`] if the template is syntactically invalid or a
/// template function is called with invalid arguments.
pub fn analyze_template(source: &str) -> Result<TemplateMetadata> {
    if !uses_templating(source) {
        return Ok(TemplateMetadata {
            resolved_with_placeholders: source.to_string(),
            ..TemplateMetadata::default()
        });
    }

    let acc = Arc::new(Mutex::new(Analysis::default()));
    let mut env = base_environment(UndefinedBehavior::Chainable);

    let state = Arc::clone(&acc);
    env.add_function("configure", move |args: Rest<Value>| -> std::result::Result<Value, Error> {
        let entries = configure_entries(&args)?;
        let mut acc = state.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in entries {
            acc.config.insert(key, value);
        }
        Ok(Value::from(""))
    });

    let state = Arc::clone(&acc);
    env.add_function("dependency", move |args: Rest<Value>| -> std::result::Result<Value, Error> {
        let name = resource_name_from_args(&args)?;
        state.lock().unwrap_or_else(PoisonError::into_inner).add_ref(name);
        Ok(Value::from(""))
    });

    let state = Arc::clone(&acc);
    env.add_function("ref", move |args: Rest<Value>| -> std::result::Result<Value, Error> {
        let name = resource_name_from_args(&args)?;
        let placeholder = name.name.clone();
        state.lock().unwrap_or_else(PoisonError::into_inner).add_ref(name);
        Ok(Value::from(placeholder))
    });

    let state = Arc::clone(&acc);
    env.add_function("lookup", move |args: Rest<Value>| -> std::result::Result<Value, Error> {
        let name = resource_name_from_args(&args)?;
        state.lock().unwrap_or_else(PoisonError::into_inner).add_ref(name);
        Ok(Value::from_serialize(serde_json::json!({ "meta": {}, "spec": {}, "state": {} })))
    });

    let placeholder_ctx = TemplateData::default().context();
    let rendered = env
        .render_str(source, placeholder_ctx)
        .map_err(template_error)?;
    drop(env);

    let analysis = std::mem::take(&mut *acc.lock().unwrap_or_else(PoisonError::into_inner));
    Ok(TemplateMetadata {
        refs: analysis.refs,
        config: analysis.config,
        uses_templating: true,
        resolved_with_placeholders: rendered,
    })
}

/// Resolves a template against real data.
///
/// # Errors
///
/// Returns a [`TemplateError`] if the template is invalid, references a
/// missing variable, or a `ref`/`lookup` callback fails.
pub fn resolve_template(source: &str, data: &TemplateData) -> Result<String> {
    if !uses_templating(source) {
        return Ok(source.to_string());
    }

    let mut env = base_environment(UndefinedBehavior::Strict);

    env.add_function("configure", |_args: Rest<Value>| Value::from(""));
    env.add_function("dependency", |_args: Rest<Value>| Value::from(""));

    let resolve = data.resolve.clone();
    env.add_function("ref", move |args: Rest<Value>| -> std::result::Result<Value, Error> {
        let name = resource_name_from_args(&args)?;
        match &resolve {
            Some(resolve) => resolve(&name)
                .map(Value::from)
                .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string())),
            None => Ok(Value::from(name.name)),
        }
    });

    let lookup = data.lookup.clone();
    env.add_function("lookup", move |args: Rest<Value>| -> std::result::Result<Value, Error> {
        let name = resource_name_from_args(&args)?;
        let Some(lookup) = &lookup else {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                "lookup is not available in this context",
            ));
        };
        lookup(&name)
            .map(Value::from_serialize)
            .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
    });

    env.render_str(source, data.context()).map_err(template_error)
}

fn base_environment(undefined: UndefinedBehavior) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(undefined);
    env.set_keep_trailing_newline(true);
    env
}

/// Reads `[kind,] name` arguments.
fn resource_name_from_args(args: &[Value]) -> std::result::Result<ResourceName, Error> {
    let as_string = |v: &Value| {
        v.as_str().map(str::to_string).ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, format!("expected a string argument, got {v}"))
        })
    };

    match args {
        [name] => Ok(ResourceName::unspecified(as_string(name)?)),
        [kind, name] => {
            let kind = ResourceKind::parse(&as_string(kind)?)
                .map_err(|e| Error::new(ErrorKind::InvalidOperation, e))?;
            Ok(ResourceName::new(kind, as_string(name)?))
        }
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("expected 1 or 2 arguments, got {}", args.len()),
        )),
    }
}

/// Reads `configure(yaml)` or `configure(key, value)` arguments.
fn configure_entries(args: &[Value]) -> std::result::Result<Vec<(String, serde_json::Value)>, Error> {
    match args {
        [blob] => {
            let text = blob.as_str().ok_or_else(|| {
                Error::new(ErrorKind::InvalidOperation, "configure expects a YAML string")
            })?;
            let parsed: serde_json::Value = serde_yaml::from_str(text)
                .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("configure: {e}")))?;
            match parsed {
                serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
                serde_json::Value::Null => Ok(Vec::new()),
                _ => Err(Error::new(
                    ErrorKind::InvalidOperation,
                    "configure expects a YAML mapping",
                )),
            }
        }
        [key, value] => {
            let key = key.as_str().ok_or_else(|| {
                Error::new(ErrorKind::InvalidOperation, "configure key must be a string")
            })?;
            let value = serde_json::to_value(value)
                .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
            Ok(vec![(key.to_string(), value)])
        }
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("configure expects 1 or 2 arguments, got {}", args.len()),
        )),
    }
}

fn template_error(err: Error) -> RillError {
    let line = err.line().and_then(|l| u32::try_from(l).ok());
    let message = err.to_string();
    let err = if err.kind() == ErrorKind::SyntaxError {
        TemplateError::Syntax { message, line }
    } else {
        TemplateError::Render { message, line }
    };
    RillError::Template(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_has_no_templating() {
        let meta = analyze_template("SELECT * FROM foo").expect("analyze");
        assert!(!meta.uses_templating);
        assert!(meta.refs.is_empty());
        assert_eq!(meta.resolved_with_placeholders, "SELECT * FROM foo");
    }

    #[test]
    fn test_analyze_collects_refs_and_config() {
        let src = r#"{{ configure("materialize", true) }}{{ configure("timeout: 30\nconnector: duckdb") }}
{{ dependency("source", "raw") }}
SELECT * FROM {{ ref("Model", "base") }} JOIN {{ ref("other") }} USING (id)
WHERE region = '{{ env.region }}' AND x = {{ lookup("model", "base").state.table }}"#;
        let meta = analyze_template(src).expect("analyze");

        assert!(meta.uses_templating);
        assert_eq!(
            meta.refs,
            vec![
                ResourceName::new(ResourceKind::Source, "raw"),
                ResourceName::new(ResourceKind::Model, "base"),
                ResourceName::unspecified("other"),
            ]
        );
        assert_eq!(meta.config.get("materialize"), Some(&serde_json::json!(true)));
        assert_eq!(meta.config.get("timeout"), Some(&serde_json::json!(30)));
        assert_eq!(meta.config.get("connector"), Some(&serde_json::json!("duckdb")));
        assert!(meta.resolved_with_placeholders.contains("FROM base JOIN other"));
    }

    #[test]
    fn test_analyze_syntax_error_has_line() {
        let err = analyze_template("SELECT 1\nFROM {{ ref(\"x\" }}").expect_err("must fail");
        match err {
            RillError::Template(t) => assert_eq!(t.line(), Some(2)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_analyze_rejects_bad_arity() {
        assert!(analyze_template("{{ ref('a', 'b', 'c') }}").is_err());
        assert!(analyze_template("{{ ref('table', 'b') }}").is_err());
    }

    #[test]
    fn test_resolve_uses_callbacks_and_extra_props() {
        let data = TemplateData {
            variables: BTreeMap::from([(String::from("region"), String::from("eu"))]),
            resolve: Some(Arc::new(|name: &ResourceName| Ok(format!("\"{}\"", name.name)))),
            lookup: Some(Arc::new(|_: &ResourceName| {
                Ok(TemplateResource {
                    state: serde_json::json!({ "table": "base_tbl" }),
                    ..TemplateResource::default()
                })
            })),
            ..TemplateData::default()
        }
        .with_extra_prop("version", 4);

        let out = resolve_template(
            "{{ configure('a', 1) }}SELECT {{ version }} FROM {{ ref('base') }} -- {{ env.region }} {{ lookup('model', 'base').state.table }}",
            &data,
        )
        .expect("resolve");

        assert_eq!(out, "SELECT 4 FROM \"base\" -- eu base_tbl");
    }

    #[test]
    fn test_resolve_missing_key_is_error() {
        let err = resolve_template("SELECT {{ env.missing }}", &TemplateData::default());
        assert!(err.is_err());

        let ok = analyze_template("SELECT {{ env.missing }}").expect("parse time tolerates");
        assert_eq!(ok.resolved_with_placeholders, "SELECT ");
    }

    #[test]
    fn test_resolve_without_lookup_fails() {
        assert!(resolve_template("{{ lookup('x').spec }}", &TemplateData::default()).is_err());
    }
}
