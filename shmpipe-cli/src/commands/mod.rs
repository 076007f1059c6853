// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod inspect;
pub mod publish;
pub mod remove;
pub mod subscribe;
pub mod validate;

use shmpipe_core::{ConfigLoader, PipeConfig, PipeResult};

/// Load the configuration file, or fall back to defaults.
pub fn load_config(path: Option<&str>) -> PipeResult<PipeConfig> {
    match path {
        Some(path) => ConfigLoader::load_file(path),
        None => Ok(PipeConfig::default()),
    }
}

/// Parse a command-line value as JSON, treating anything else as a string.
pub fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), serde_json::json!(42));
        assert_eq!(parse_value(r#"{"id":1}"#), serde_json::json!({"id": 1}));
        assert_eq!(parse_value("Foo"), serde_json::json!("Foo"));
    }
}
