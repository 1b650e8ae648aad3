use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use super::{ContentRecord, ContentStore};
use crate::error::StoreError;

/// Static dictionary of records loaded once from a TOML file:
///
/// ```toml
/// [[records]]
/// id = "story1"
/// title = "The Little Red Hen"
/// body = "..."
/// attributes = { level = "1" }
/// ```
pub struct TomlStore {
    records: HashMap<String, Arc<ContentRecord>>,
}

#[derive(Deserialize)]
struct TomlFile {
    #[serde(default)]
    records: Vec<ContentRecord>,
}

impl TomlStore {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, StoreError> {
        let file: TomlFile = toml::from_str(content).map_err(|e| StoreError::Parse(e.to_string()))?;
        let mut records = HashMap::with_capacity(file.records.len());
        for record in file.records {
            if record.id.is_empty() {
                return Err(StoreError::Record {
                    id: record.title,
                    reason: "empty id".into(),
                });
            }
            if records.contains_key(&record.id) {
                return Err(StoreError::Record {
                    id: record.id,
                    reason: "duplicate id".into(),
                });
            }
            records.insert(record.id.clone(), Arc::new(record));
        }
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ContentStore for TomlStore {
    fn lookup(&self, id: &str) -> Result<Option<Arc<ContentRecord>>, StoreError> {
        Ok(self.records.get(id).cloned())
    }

    fn name(&self) -> &str {
        "toml"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORIES: &str = r#"
[[records]]
id = "story1"
title = "The Little Red Hen"
body = "Who will help me plant this wheat?"
attributes = { level = "1" }

[[records]]
id = "A"
title = "Letter A"
"#;

    #[test]
    fn loads_records() {
        let store = TomlStore::parse(STORIES).unwrap();
        assert_eq!(store.len(), 2);
        let hen = store.lookup("story1").unwrap().unwrap();
        assert_eq!(hen.title, "The Little Red Hen");
        assert_eq!(hen.attributes["level"], "1");
        assert_eq!(store.lookup("A").unwrap().unwrap().body, "");
        assert!(store.lookup("story2").unwrap().is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let content = "[[records]]\nid = \"x\"\ntitle = \"one\"\n[[records]]\nid = \"x\"\ntitle = \"two\"\n";
        assert!(matches!(
            TomlStore::parse(content),
            Err(StoreError::Record { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let result = TomlStore::load(Path::new("/nonexistent/content.toml"));
        assert!(matches!(result, Err(StoreError::ReadFile(..))));
    }

    #[test]
    fn example_library_loads() {
        let store = TomlStore::parse(include_str!("../../../content.example.toml")).unwrap();
        assert_eq!(
            store.lookup("story1").unwrap().unwrap().title,
            "The Little Red Hen"
        );
    }
}
