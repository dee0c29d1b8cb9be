//! Prompt template store.
//!
//! Templates live in a YAML mapping of `name -> template text` and use
//! `{placeholder}` markers. `{{` and `}}` render as literal braces; values
//! are substituted verbatim, so braces inside a binding survive untouched.

use crate::error::PromptError;
use std::collections::HashMap;
use std::path::Path;

/// Loaded prompt templates with placeholder substitution.
#[derive(Debug, Clone)]
pub struct PromptStore {
    prompts: HashMap<String, String>,
}

impl PromptStore {
    /// Load templates from a YAML file.
    pub fn load(path: &Path) -> Result<Self, PromptError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PromptError::FileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                PromptError::Parse {
                    message: e.to_string(),
                }
            }
        })?;

        let prompts: HashMap<String, String> =
            serde_yaml::from_str(&raw).map_err(|e| PromptError::Parse {
                message: e.to_string(),
            })?;

        Ok(Self { prompts })
    }

    /// Build a store from an in-memory mapping.
    pub fn from_map(prompts: HashMap<String, String>) -> Self {
        Self { prompts }
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Render the named template with the given bindings.
    ///
    /// Fails with [`PromptError::Missing`] for an unknown name and
    /// [`PromptError::PlaceholderMissing`] when the template references a
    /// placeholder with no binding.
    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String, PromptError> {
        let template = self.prompts.get(name).ok_or_else(|| PromptError::Missing {
            name: name.to_string(),
        })?;
        render_template(name, template, vars)
    }
}

fn render_template(
    name: &str,
    template: &str,
    vars: &[(&str, &str)],
) -> Result<String, PromptError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut placeholder = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    placeholder.push(inner);
                }
                if !closed {
                    return Err(PromptError::PlaceholderMissing {
                        name: name.to_string(),
                        placeholder,
                    });
                }
                match vars.iter().find(|(k, _)| *k == placeholder) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        return Err(PromptError::PlaceholderMissing {
                            name: name.to_string(),
                            placeholder,
                        })
                    }
                }
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(entries: &[(&str, &str)]) -> PromptStore {
        PromptStore::from_map(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let s = store(&[("greet", "Hello {name}, searching for {query}.")]);
        let out = s
            .render("greet", &[("name", "dev"), ("query", "rust async")])
            .unwrap();
        assert_eq!(out, "Hello dev, searching for rust async.");
    }

    #[test]
    fn test_render_is_deterministic() {
        let s = store(&[("t", "{a} and {a} again")]);
        let once = s.render("t", &[("a", "x")]).unwrap();
        let twice = s.render("t", &[("a", "x")]).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, "x and x again");
    }

    #[test]
    fn test_escaped_braces_are_literal() {
        let s = store(&[("t", "a JSON object: {{\"k\": {v}}}")]);
        let out = s.render("t", &[("v", "1")]).unwrap();
        assert_eq!(out, "a JSON object: {\"k\": 1}");
    }

    #[test]
    fn test_braces_in_values_survive() {
        let s = store(&[("t", "content: {content}")]);
        let out = s.render("t", &[("content", "code { nested { } }")]).unwrap();
        assert_eq!(out, "content: code { nested { } }");
    }

    #[test]
    fn test_missing_prompt() {
        let s = store(&[]);
        let err = s.render("nope", &[]).unwrap_err();
        assert!(matches!(err, PromptError::Missing { name } if name == "nope"));
    }

    #[test]
    fn test_missing_placeholder_binding() {
        let s = store(&[("t", "needs {thing}")]);
        let err = s.render("t", &[("other", "x")]).unwrap_err();
        assert!(
            matches!(err, PromptError::PlaceholderMissing { placeholder, .. } if placeholder == "thing")
        );
    }

    #[test]
    fn test_unterminated_placeholder() {
        let s = store(&[("t", "broken {thing")]);
        assert!(s.render("t", &[("thing", "x")]).is_err());
    }

    #[test]
    fn test_load_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.yaml");
        std::fs::write(
            &path,
            "expand_queries: |\n  Rewrite {query} into {count} queries.\nmerge: 'Merge: {summaries}'\n",
        )
        .unwrap();

        let s = PromptStore::load(&path).unwrap();
        assert_eq!(s.len(), 2);
        let out = s
            .render("expand_queries", &[("query", "q"), ("count", "3")])
            .unwrap();
        assert!(out.contains("Rewrite q into 3 queries."));
    }

    #[test]
    fn test_load_missing_file() {
        let err = PromptStore::load(Path::new("/nonexistent/prompts.yaml")).unwrap_err();
        assert!(matches!(err, PromptError::FileNotFound { .. }));
    }

    #[test]
    fn test_load_malformed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.yaml");
        std::fs::write(&path, "- just\n- a\n- list\n").unwrap();
        let err = PromptStore::load(&path).unwrap_err();
        assert!(matches!(err, PromptError::Parse { .. }));
    }
}
