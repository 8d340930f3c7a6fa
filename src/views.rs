//! # Views Module
//!
//! Template rendering for handler replies.
//!
//! A [`ViewEngine`] is constructed from a template directory and an
//! extension (e.g., `("templates", ".html")`). Handlers return
//! `Reply::view(name, ctx)`; the dispatcher resolves `name` against the
//! engine and renders it with the JSON context inside the handler
//! coroutine, so render failures are mapped by the app error handler.
//!
//! Rendering goes through `minijinja` with a throwaway environment per
//! render. Template sets in this crate are a handful of files, and reading
//! on each render keeps edits visible without a reload mechanism.

use std::path::{Component, Path, PathBuf};

use minijinja::Environment;
use serde_json::Value;
use tracing::debug;

use crate::error::HandlerError;

#[derive(Debug, Clone)]
pub struct ViewEngine {
    dir: PathBuf,
    ext: String,
}

impl ViewEngine {
    /// `dir` holds the templates, `ext` is appended to view names
    /// (including the dot): `ViewEngine::new("templates", ".html")` resolves
    /// `index` to `templates/index.html`.
    pub fn new<P: Into<PathBuf>>(dir: P, ext: &str) -> Self {
        Self {
            dir: dir.into(),
            ext: ext.to_string(),
        }
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, HandlerError> {
        let file = format!("{name}{}", self.ext);
        let mut path = self.dir.clone();
        for comp in Path::new(&file).components() {
            match comp {
                Component::Normal(s) => path.push(s),
                Component::CurDir => {}
                _ => {
                    return Err(HandlerError::Message(format!("invalid view name: {name}")));
                }
            }
        }
        Ok(path)
    }

    /// Render a view by name with a JSON context.
    pub fn render(&self, name: &str, ctx: &Value) -> Result<String, HandlerError> {
        let path = self.resolve(name)?;
        let source = std::fs::read_to_string(&path)?;
        let mut env = Environment::new();
        env.add_template("tpl", &source)?;
        let rendered = env.get_template("tpl")?.render(ctx)?;
        debug!(view = name, path = %path.display(), "view rendered");
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> (tempfile::TempDir, ViewEngine) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.html"),
            "<h1>{{ header }}</h1><p>{{ content }}</p>",
        )
        .unwrap();
        let engine = ViewEngine::new(dir.path(), ".html");
        (dir, engine)
    }

    #[test]
    fn test_render_binds_context() {
        let (_dir, engine) = engine();
        let html = engine
            .render("index", &json!({ "header": "Hello", "content": "World" }))
            .unwrap();
        assert_eq!(html, "<h1>Hello</h1><p>World</p>");
    }

    #[test]
    fn test_missing_template_is_io_error() {
        let (_dir, engine) = engine();
        let err = engine.render("nope", &json!({})).unwrap_err();
        assert!(matches!(err, HandlerError::Io(_)));
    }

    #[test]
    fn test_traversal_in_view_name_rejected() {
        let (_dir, engine) = engine();
        let err = engine.render("../secret", &json!({})).unwrap_err();
        assert!(matches!(err, HandlerError::Message(_)));
    }
}
