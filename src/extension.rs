//! Component E: the extension loader. Preprocesses run ahead of the main
//! DAG and their side effect is usually a call to the standalone
//! `tuttle-extend-workflow` helper (see `src/bin/tuttle_extend_workflow.rs`),
//! which renders a template into a workflow fragment dropped under
//! `.tuttle/extensions/`. This module holds the logic shared by that
//! helper and the engine: fragment naming, argument parsing, template
//! rendering, and the final concatenate-and-reparse step.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use minijinja::{Environment, UndefinedBehavior, Value};
use snafu::prelude::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Can't find template file \"{path}\""))]
    TemplateNotFound { path: String },

    #[snafu(display("Can't extract variable from parameter \"{token}\""))]
    MissingEquals { token: String },

    #[snafu(display("Missing value for a template variable. {detail}"))]
    UndefinedVariable { detail: String },

    #[snafu(display("Can't find workspace…"))]
    NoWorkspace,

    #[snafu(display("Failed to read template {path}: {source}"))]
    Io { path: String, source: std::io::Error },

    #[snafu(display("Template render error: {source}"))]
    Render { source: minijinja::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A parsed `KEY=VAL` or `KEY[]=V0 V1 …` argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
    Single(String),
    Array(Vec<String>),
}

impl From<&TemplateValue> for Value {
    fn from(v: &TemplateValue) -> Self {
        match v {
            TemplateValue::Single(s) => Value::from(s.as_str()),
            TemplateValue::Array(items) => Value::from(items.clone()),
        }
    }
}

/// `extract_variables`: `KEY=V` maps `KEY -> V`; `KEY[]=V0 T1 T2 …` collects
/// tokens until the next token containing `=`, mapping `KEY -> [V0, T1, T2, …]`.
/// A token lacking `=` outside an array context is an error.
pub fn parse_arguments(args: &[String]) -> Result<HashMap<String, TemplateValue>> {
    let mut vars = HashMap::new();
    let mut i = 0;
    while i < args.len() {
        let token = &args[i];
        let Some(eq_pos) = token.find('=') else {
            return MissingEqualsSnafu { token: token.clone() }.fail();
        };
        let (key_part, first_value) = token.split_at(eq_pos);
        let first_value = &first_value[1..];

        if let Some(key) = key_part.strip_suffix("[]") {
            let mut values = vec![first_value.to_string()];
            i += 1;
            while i < args.len() && !args[i].contains('=') {
                values.push(args[i].clone());
                i += 1;
            }
            vars.insert(key.to_string(), TemplateValue::Array(values));
        } else {
            vars.insert(key_part.to_string(), TemplateValue::Single(first_value.to_string()));
            i += 1;
        }
    }
    Ok(vars)
}

/// Renders `template_path` with `vars` under a strict-undefined policy: any
/// variable referenced but not supplied is an error, not an empty string.
pub fn render_template(template_path: &Path, vars: &HashMap<String, TemplateValue>) -> Result<String> {
    let source = std::fs::read_to_string(template_path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::TemplateNotFound {
                path: template_path.display().to_string(),
            }
        } else {
            Error::Io {
                path: template_path.display().to_string(),
                source,
            }
        }
    })?;

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_template("fragment", &source).context(RenderSnafu)?;
    let template = env.get_template("fragment").context(RenderSnafu)?;

    let mut context = HashMap::new();
    for (key, value) in vars {
        context.insert(key.clone(), Value::from(value));
    }

    template.render(context).map_err(|source| Error::UndefinedVariable {
        detail: source.to_string(),
    })
}

/// Appends the smallest integer suffix `>= 2` that yields a free file name
/// under `extensions_dir`; the bare `base_name` is used if free (no
/// `base1`).
pub fn next_available_path(extensions_dir: &Path, base_name: &str) -> PathBuf {
    let candidate = extensions_dir.join(base_name);
    if !candidate.exists() {
        return candidate;
    }
    let mut n = 2;
    loop {
        let candidate = extensions_dir.join(format!("{base_name}{n}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Writes `fragment` to `extensions_dir`, returning the path written.
pub fn write_fragment(extensions_dir: &Path, base_name: &str, fragment: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(extensions_dir).map_err(|source| Error::Io {
        path: extensions_dir.display().to_string(),
        source,
    })?;
    let path = next_available_path(extensions_dir, base_name);
    std::fs::write(&path, fragment).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(path)
}

/// Reads `TUTTLE_ENV`, the absolute path to the `.tuttle` directory set by
/// the engine for every spawned preprocess.
pub fn tuttle_env() -> Result<PathBuf> {
    std::env::var("TUTTLE_ENV")
        .map(PathBuf::from)
        .map_err(|_| Error::NoWorkspace)
}

/// Concatenates the main workflow text with every fragment under
/// `extensions/`, sorted by write order (file modification time), so the
/// engine can re-parse the whole thing as one text.
pub fn concatenate_with_extensions(main_text: &str, extensions_dir: &Path) -> std::io::Result<String> {
    if !extensions_dir.is_dir() {
        return Ok(main_text.to_string());
    }
    let mut entries: Vec<(std::time::SystemTime, PathBuf)> = std::fs::read_dir(extensions_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.metadata().ok().and_then(|m| m.modified().ok()).map(|t| (t, e.path())))
        .collect();
    entries.sort_by_key(|(t, _)| *t);

    let mut combined = main_text.to_string();
    for (_, path) in entries {
        combined.push('\n');
        combined.push_str(&std::fs::read_to_string(path)?);
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_arguments_handles_scalars_and_arrays() {
        let args = vec![
            "inputs[]=A".to_string(),
            "B".to_string(),
            "C".to_string(),
            "foo=bar".to_string(),
        ];
        let vars = parse_arguments(&args).unwrap();
        assert_eq!(
            vars.get("inputs"),
            Some(&TemplateValue::Array(vec!["A".into(), "B".into(), "C".into()]))
        );
        assert_eq!(vars.get("foo"), Some(&TemplateValue::Single("bar".into())));
    }

    #[test]
    fn parse_arguments_rejects_token_without_equals_outside_array() {
        let args = vec!["notkeyvalue".to_string()];
        let err = parse_arguments(&args).unwrap_err();
        assert!(matches!(err, Error::MissingEquals { .. }));
    }

    #[test]
    fn next_available_path_starts_at_base_then_base2() {
        let dir = tempfile::tempdir().unwrap();
        let first = next_available_path(dir.path(), "extension");
        assert_eq!(first.file_name().unwrap(), "extension");
        std::fs::write(&first, "x").unwrap();
        let second = next_available_path(dir.path(), "extension");
        assert_eq!(second.file_name().unwrap(), "extension2");
        std::fs::write(&second, "x").unwrap();
        let third = next_available_path(dir.path(), "extension");
        assert_eq!(third.file_name().unwrap(), "extension3");
    }

    #[test]
    fn render_template_errors_on_missing_variable() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("t.tmpl");
        std::fs::write(&template, "file://{{x}} <-\n").unwrap();
        let err = render_template(&template, &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::UndefinedVariable { .. }));
    }

    #[test]
    fn render_template_errors_on_missing_file() {
        let err = render_template(Path::new("/no/such/template"), &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound { .. }));
    }

    #[test]
    fn render_template_substitutes_array_and_scalar() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("everything.tmpl");
        std::fs::write(
            &template,
            "file://RESULT <- {% for i in inputs %}file://{{i}} {% endfor %}\n    **{{foo}}**\n",
        )
        .unwrap();
        let mut vars = HashMap::new();
        vars.insert(
            "inputs".to_string(),
            TemplateValue::Array(vec!["A".into(), "B".into(), "C".into()]),
        );
        vars.insert("foo".to_string(), TemplateValue::Single("bar".into()));
        let rendered = render_template(&template, &vars).unwrap();
        assert!(rendered.contains("file://RESULT <- file://A file://B file://C"));
        assert!(rendered.contains("**bar**"));
    }
}
