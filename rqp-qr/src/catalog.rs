//! Post-processor catalog
//!
//! An immutable mapping from post-processor type to its descriptor: what
//! record types it accepts, the extension of the file it writes, and the
//! options a user may set. Built once at startup, from a TOML file or the
//! built-in defaults, and shared read-only through the query context.
//!
//! ```toml
//! [[processor]]
//! type = "count-posts"
//! name = "Count posts"
//! category = "Post metrics"
//! accepts = ["search"]
//!
//! [processor.options.timeframe]
//! type = "choice"
//! default = "month"
//! choices = { all = "Overall", month = "Per month" }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

use crate::{Error, Parameters, Result};

/// How an option is entered and interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    /// Checkbox; set when submitted at all
    Toggle,
    /// One of a fixed set of values
    Choice,
    /// Free text
    Text,
}

/// Schema of one post-processor option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSpec {
    #[serde(rename = "type")]
    pub kind: OptionKind,
    #[serde(default)]
    pub default: Option<Value>,
    /// Allowed values mapped to their labels (choice options only)
    #[serde(default)]
    pub choices: BTreeMap<String, String>,
    #[serde(default)]
    pub help: String,
}

impl OptionSpec {
    /// Interpret a submitted value, falling back to the default
    ///
    /// `submitted` is `None` when the option was not part of the request.
    pub fn resolve(&self, submitted: Option<&str>) -> Value {
        let default = || self.default.clone().unwrap_or(Value::Null);

        match self.kind {
            OptionKind::Toggle => Value::Bool(submitted.is_some()),
            OptionKind::Choice => match submitted {
                Some(choice) if self.choices.contains_key(choice) => {
                    Value::String(choice.to_string())
                }
                _ => default(),
            },
            OptionKind::Text => match submitted {
                Some(text) => Value::String(text.to_string()),
                None => default(),
            },
        }
    }
}

fn default_extension() -> String {
    "csv".to_string()
}

/// Catalog entry for one post-processor type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorDescriptor {
    #[serde(rename = "type")]
    pub type_id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    /// Extension of the result file this processor writes
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Record types this processor can run on
    #[serde(default)]
    pub accepts: Vec<String>,
    #[serde(default)]
    pub options: BTreeMap<String, OptionSpec>,
}

impl ProcessorDescriptor {
    /// Whether this processor can run on records of `record_type`
    pub fn accepts(&self, record_type: &str) -> bool {
        self.accepts.iter().any(|kind| kind == record_type)
    }

    /// Whether users can configure this processor
    ///
    /// Configurable processors may run several times on the same record.
    pub fn has_options(&self) -> bool {
        !self.options.is_empty()
    }

    /// Build the parameter document for a run from submitted form values
    pub fn resolve_options(&self, submitted: &HashMap<String, String>) -> Parameters {
        self.options
            .iter()
            .map(|(name, option)| {
                let value = option.resolve(submitted.get(name).map(String::as_str));
                (name.clone(), value)
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "processor")]
    processors: Vec<ProcessorDescriptor>,
}

/// Immutable set of post-processor descriptors keyed by type
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    processors: BTreeMap<String, ProcessorDescriptor>,
}

impl Catalog {
    /// Build a catalog, rejecting empty or duplicate type ids
    pub fn new(processors: impl IntoIterator<Item = ProcessorDescriptor>) -> Result<Self> {
        let mut map = BTreeMap::new();

        for processor in processors {
            if processor.type_id.trim().is_empty() {
                return Err(Error::Catalog("processor with empty type".to_string()));
            }
            if map.contains_key(&processor.type_id) {
                return Err(Error::Catalog(format!(
                    "duplicate processor type '{}'",
                    processor.type_id
                )));
            }
            map.insert(processor.type_id.clone(), processor);
        }

        Ok(Self { processors: map })
    }

    /// Parse a catalog from TOML (`[[processor]]` tables)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: CatalogFile =
            toml::from_str(content).map_err(|e| Error::Catalog(e.to_string()))?;
        Self::new(file.processors)
    }

    /// Load a catalog file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_toml_str(&content)?;
        info!(
            "Loaded {} post-processors from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Catalog file at `path` if it exists, otherwise the built-in one
    pub fn load_or_builtin(path: &Path) -> Result<Self> {
        if path.is_file() {
            Self::load(path)
        } else {
            info!("No catalog at {}, using built-in post-processors", path.display());
            Ok(Self::builtin())
        }
    }

    /// Post-processors available without a catalog file
    pub fn builtin() -> Self {
        let timeframe = OptionSpec {
            kind: OptionKind::Choice,
            default: Some(Value::String("month".to_string())),
            choices: [
                ("all", "Overall"),
                ("year", "Per year"),
                ("month", "Per month"),
                ("week", "Per week"),
                ("day", "Per day"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            help: "Produce results per".to_string(),
        };

        let processors = vec![
            ProcessorDescriptor {
                type_id: "count-posts".to_string(),
                name: "Count posts".to_string(),
                category: "Post metrics".to_string(),
                description: "Counts how many posts matched the search.".to_string(),
                extension: "csv".to_string(),
                accepts: vec!["search".to_string()],
                options: BTreeMap::new(),
            },
            ProcessorDescriptor {
                type_id: "tokenise-posts".to_string(),
                name: "Tokenise".to_string(),
                category: "Text analysis".to_string(),
                description: "Splits post bodies into tokens, grouped per time interval."
                    .to_string(),
                extension: "zip".to_string(),
                accepts: vec!["search".to_string()],
                options: BTreeMap::from([
                    ("timeframe".to_string(), timeframe.clone()),
                    (
                        "stem".to_string(),
                        OptionSpec {
                            kind: OptionKind::Toggle,
                            default: Some(Value::Bool(false)),
                            choices: BTreeMap::new(),
                            help: "Stem tokens".to_string(),
                        },
                    ),
                ]),
            },
            ProcessorDescriptor {
                type_id: "attribute-frequencies".to_string(),
                name: "Value frequencies".to_string(),
                category: "Post metrics".to_string(),
                description: "Counts how often each value of a post attribute occurs."
                    .to_string(),
                extension: "csv".to_string(),
                accepts: vec!["search".to_string()],
                options: BTreeMap::from([
                    ("timeframe".to_string(), timeframe),
                    (
                        "attribute".to_string(),
                        OptionSpec {
                            kind: OptionKind::Text,
                            default: Some(Value::String("author".to_string())),
                            choices: BTreeMap::new(),
                            help: "Attribute to count".to_string(),
                        },
                    ),
                ]),
            },
        ];

        let processors = processors
            .into_iter()
            .map(|p| (p.type_id.clone(), p))
            .collect();

        Self { processors }
    }

    pub fn get(&self, type_id: &str) -> Option<&ProcessorDescriptor> {
        self.processors.get(type_id)
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.processors.contains_key(type_id)
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Descriptors in type order
    pub fn iter(&self) -> impl Iterator<Item = &ProcessorDescriptor> {
        self.processors.values()
    }

    /// Descriptors that accept records of `record_type`
    pub fn compatible_with(&self, record_type: &str) -> BTreeMap<String, ProcessorDescriptor> {
        self.processors
            .values()
            .filter(|p| p.accepts(record_type))
            .map(|p| (p.type_id.clone(), p.clone()))
            .collect()
    }

    /// Validate submitted options against the schema of `type_id`
    pub fn resolve_options(
        &self,
        type_id: &str,
        submitted: &HashMap<String, String>,
    ) -> Result<Parameters> {
        let processor = self.get(type_id).ok_or_else(|| {
            Error::InvalidArgument(format!("unknown post-processor '{}'", type_id))
        })?;

        Ok(processor.resolve_options(submitted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CATALOG: &str = r#"
        [[processor]]
        type = "count-posts"
        name = "Count posts"
        category = "Post metrics"
        accepts = ["search"]

        [[processor]]
        type = "vector-ranker"
        name = "Top vectors"
        category = "Post metrics"
        accepts = ["vectorise-tokens"]

        [processor.options.top]
        type = "text"
        default = 25
        help = "Cut-off for top list"

        [processor.options.top-style]
        type = "choice"
        default = "per-item"
        choices = { per-item = "per interval", overall = "overall" }

        [processor.options.include-dates]
        type = "toggle"
    "#;

    fn submitted(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_catalog() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        assert_eq!(catalog.len(), 2);

        let ranker = catalog.get("vector-ranker").unwrap();
        assert_eq!(ranker.extension, "csv");
        assert!(ranker.has_options());
        assert_eq!(ranker.options["top"].default, Some(json!(25)));
        assert!(!catalog.get("count-posts").unwrap().has_options());
    }

    #[test]
    fn test_duplicate_types_rejected() {
        let duplicated = r#"
            [[processor]]
            type = "count-posts"
            name = "A"

            [[processor]]
            type = "count-posts"
            name = "B"
        "#;
        assert!(matches!(
            Catalog::from_toml_str(duplicated),
            Err(Error::Catalog(_))
        ));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(matches!(
            Catalog::from_toml_str("[[processor]]\ntype = 3"),
            Err(Error::Catalog(_))
        ));
    }

    #[test]
    fn test_compatible_with_matches_type_tags() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();

        let for_search = catalog.compatible_with("search");
        assert_eq!(for_search.keys().collect::<Vec<_>>(), vec!["count-posts"]);

        let for_vectors = catalog.compatible_with("vectorise-tokens");
        assert_eq!(for_vectors.keys().collect::<Vec<_>>(), vec!["vector-ranker"]);

        assert!(catalog.compatible_with("unknown").is_empty());
    }

    #[test]
    fn test_resolve_options_defaults() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        let options = catalog
            .resolve_options("vector-ranker", &HashMap::new())
            .unwrap();

        assert_eq!(options["top"], json!(25));
        assert_eq!(options["top-style"], json!("per-item"));
        assert_eq!(options["include-dates"], json!(false));
    }

    #[test]
    fn test_resolve_options_submitted_values() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        let options = catalog
            .resolve_options(
                "vector-ranker",
                &submitted(&[
                    ("top", "10"),
                    ("top-style", "overall"),
                    ("include-dates", ""),
                    ("not-an-option", "ignored"),
                ]),
            )
            .unwrap();

        assert_eq!(options["top"], json!("10"));
        assert_eq!(options["top-style"], json!("overall"));
        assert_eq!(options["include-dates"], json!(true));
        assert!(!options.contains_key("not-an-option"));
    }

    #[test]
    fn test_resolve_options_unknown_choice_uses_default() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        let options = catalog
            .resolve_options("vector-ranker", &submitted(&[("top-style", "sideways")]))
            .unwrap();

        assert_eq!(options["top-style"], json!("per-item"));
    }

    #[test]
    fn test_resolve_options_unknown_type() {
        let catalog = Catalog::builtin();
        let result = catalog.resolve_options("does-not-exist", &HashMap::new());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_builtin_catalog() {
        let catalog = Catalog::builtin();
        assert!(!catalog.is_empty());
        assert!(catalog.contains("count-posts"));
        assert_eq!(catalog.get("tokenise-posts").unwrap().extension, "zip");
        assert!(catalog.iter().all(|p| p.accepts("search")));
    }
}
