//! Inputs File Population
//!
//! Converts the literal values extracted from `!ii` bindings into the
//! shapes expected in a workflow inputs file: `File` and `Directory`
//! values become objects with a `class`, strings stay strings, arrays are
//! converted element-wise.

use indexmap::IndexMap;
use log::warn;
use serde_json::{json, Value};

use super::types::InputsFileEntry;
use crate::registry::tool::ParamType;

/// Converts one scalar value according to its declared type.
pub fn populate_scalar_value(key: &str, param_type: &ParamType, format: &[String], value: &Value) -> Value {
    match param_type.scalar_name().as_deref() {
        Some("File") => {
            let mut file = json!({"class": "File", "path": plain_string(value)});
            if let Some(first) = format.first() {
                if format.len() > 1 {
                    warn!(
                        "More than one input file format for {}: {:?}; choosing {}",
                        key, format, first
                    );
                }
                file["format"] = Value::String(first.clone());
            }
            file
        }
        Some("Directory") => json!({"class": "Directory", "location": plain_string(value)}),
        Some("string") => Value::String(plain_string(value)),
        _ => value.clone(),
    }
}

fn plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Converts one extracted literal, expanding arrays.
pub fn populate_value(key: &str, entry: &InputsFileEntry) -> Value {
    match (entry.param_type.array_items(), &entry.value) {
        (Some(items), Value::Array(values)) => Value::Array(
            values
                .iter()
                .map(|v| populate_scalar_value(key, &items, &entry.format, v))
                .collect(),
        ),
        _ => populate_scalar_value(key, &entry.param_type, &entry.format, &entry.value),
    }
}

/// Builds the inputs file of a workflow from its extracted literals.
pub fn build_inputs_file(entries: &IndexMap<String, InputsFileEntry>) -> IndexMap<String, Value> {
    entries
        .iter()
        .map(|(key, entry)| (key.clone(), populate_value(key, entry)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(param_type: ParamType, value: Value) -> InputsFileEntry {
        InputsFileEntry {
            param_type,
            format: Vec::new(),
            value,
        }
    }

    #[test]
    fn test_file_value() {
        let mut e = entry(ParamType::named("File"), json!("data/reads.fq"));
        e.format = vec!["edam:format_1930".to_string(), "edam:format_1931".to_string()];
        let v = populate_value("x", &e);
        assert_eq!(
            v,
            json!({"class": "File", "path": "data/reads.fq", "format": "edam:format_1930"})
        );
    }

    #[test]
    fn test_directory_value() {
        let v = populate_value("x", &entry(ParamType::named("Directory?"), json!("out")));
        assert_eq!(v, json!({"class": "Directory", "location": "out"}));
    }

    #[test]
    fn test_string_value_is_stringified() {
        let v = populate_value("x", &entry(ParamType::named("string"), json!(42)));
        assert_eq!(v, json!("42"));
    }

    #[test]
    fn test_array_of_files() {
        let v = populate_value("x", &entry(ParamType::named("File[]"), json!(["a.txt", "b.txt"])));
        assert_eq!(v[1], json!({"class": "File", "path": "b.txt"}));
    }

    #[test]
    fn test_other_types_pass_through() {
        let v = populate_value("x", &entry(ParamType::named("int"), json!(3)));
        assert_eq!(v, json!(3));
    }

    #[test]
    fn test_build_inputs_file_preserves_order() {
        let mut entries = IndexMap::new();
        entries.insert("b___n".to_string(), entry(ParamType::named("int"), json!(1)));
        entries.insert("a___n".to_string(), entry(ParamType::named("int"), json!(2)));
        let file = build_inputs_file(&entries);
        let keys: Vec<&String> = file.keys().collect();
        assert_eq!(keys, vec!["b___n", "a___n"]);
    }
}
