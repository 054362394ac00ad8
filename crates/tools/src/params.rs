//! Parameter mapping.
//!
//! Planner actions arrive as positional invocations (`move file1 root
//! backup`); skills take named arguments. The mapper carries one
//! index-to-name rule per known skill and falls back to a generic
//! `arg0, arg1, …` mapping for unknown names.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Positional-to-named argument mapper.
#[derive(Debug, Clone)]
pub struct ParameterMapper {
    rules: BTreeMap<String, Vec<&'static str>>,
}

impl Default for ParameterMapper {
    fn default() -> Self {
        let mut rules: BTreeMap<String, Vec<&'static str>> = BTreeMap::new();
        rules.insert("scan".into(), vec!["folder"]);
        rules.insert("move".into(), vec!["file_name", "from_folder", "to_folder"]);
        rules.insert("copy".into(), vec!["file_name", "from_folder", "to_folder"]);
        rules.insert("remove_file".into(), vec!["file_name", "folder_name"]);
        rules.insert("rename".into(), vec!["old_name", "new_name", "folder"]);
        rules.insert("create_file".into(), vec!["file_name", "folder"]);
        rules.insert("create_folder".into(), vec!["folder_name", "parent_folder"]);
        rules.insert("compress".into(), vec!["file_name", "folder", "archive_name"]);
        rules.insert("uncompress".into(), vec!["archive_name", "folder", "file_name"]);
        rules.insert("get_admin".into(), vec![]);
        rules.insert("connect_folders".into(), vec!["folder_a", "folder_b"]);
        Self { rules }
    }
}

impl ParameterMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a mapping rule.
    pub fn register(&mut self, name: impl Into<String>, params: Vec<&'static str>) {
        self.rules.insert(name.into(), params);
    }

    pub fn has_mapping(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Map positional args into the skill's named dictionary.
    ///
    /// Extra positional args beyond the rule are dropped; unknown skills get
    /// the generic `arg0…` mapping.
    pub fn map(&self, name: &str, args: &[&str]) -> Map<String, Value> {
        let mut out = Map::new();
        match self.rules.get(name) {
            Some(params) => {
                for (param, value) in params.iter().zip(args.iter()) {
                    out.insert(param.to_string(), Value::String(value.to_string()));
                }
            }
            None => {
                for (idx, value) in args.iter().enumerate() {
                    out.insert(format!("arg{}", idx), Value::String(value.to_string()));
                }
            }
        }
        out
    }

    /// Validate mapped arguments against a skill's JSON-Schema required list.
    pub fn validate(
        &self,
        schema: &Value,
        arguments: &Map<String, Value>,
    ) -> std::result::Result<(), String> {
        let Some(required) = schema.get("required").and_then(Value::as_array) else {
            return Ok(());
        };
        for key in required.iter().filter_map(Value::as_str) {
            if !arguments.contains_key(key) {
                return Err(format!("missing required argument '{}'", key));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_mapping() {
        let mapper = ParameterMapper::new();
        let args = mapper.map("move", &["file1", "root", "backup"]);
        assert_eq!(args["file_name"], "file1");
        assert_eq!(args["from_folder"], "root");
        assert_eq!(args["to_folder"], "backup");
    }

    #[test]
    fn test_generic_fallback() {
        let mapper = ParameterMapper::new();
        let args = mapper.map("frobnicate", &["a", "b"]);
        assert_eq!(args["arg0"], "a");
        assert_eq!(args["arg1"], "b");
    }

    #[test]
    fn test_nullary_mapping() {
        let mapper = ParameterMapper::new();
        assert!(mapper.map("get_admin", &[]).is_empty());
    }

    #[test]
    fn test_validate_required() {
        let mapper = ParameterMapper::new();
        let schema = json!({"type": "object", "required": ["folder"]});

        let ok = mapper.map("scan", &["root"]);
        assert!(mapper.validate(&schema, &ok).is_ok());

        let missing = mapper.map("scan", &[]);
        let err = mapper.validate(&schema, &missing).unwrap_err();
        assert!(err.contains("folder"));
    }

    #[test]
    fn test_custom_registration() {
        let mut mapper = ParameterMapper::new();
        mapper.register("chmod", vec!["file_name", "mode"]);
        let args = mapper.map("chmod", &["a_dot_txt", "readonly"]);
        assert_eq!(args["mode"], "readonly");
    }
}
