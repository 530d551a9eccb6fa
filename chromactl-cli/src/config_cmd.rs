//! `chromactl config ...`: inspect and edit the config file.

use std::path::Path;

use chromactl_core::config::Config;

const VALID_SECTIONS: &[&str] = &["chroma", "embedding", "embed_server"];

fn read_config_file(config_path: &Path) -> Result<String, String> {
    if !config_path.exists() {
        return Err(format!(
            "Config file not found: {}. Use --config to specify the path.",
            config_path.display()
        ));
    }
    std::fs::read_to_string(config_path).map_err(|e| format!("Config error: {e}"))
}

/// The config with defaults filled in, as a TOML tree.
fn effective_config(config_path: &Path) -> Result<toml::Value, String> {
    let contents = read_config_file(config_path)?;
    let config = Config::parse(&contents).map_err(|e| format!("Config error: {e}"))?;
    toml::Value::try_from(&config).map_err(|e| format!("Config error: {e}"))
}

pub fn show_config(config_path: &Path, section: Option<&str>) -> Result<String, String> {
    let root = effective_config(config_path)?;
    let Some(name) = section else {
        return toml::to_string_pretty(&root).map_err(|e| format!("Config error: {e}"));
    };
    if !VALID_SECTIONS.contains(&name) {
        return Err(format!(
            "Unknown section '{name}'. Valid sections: {}",
            VALID_SECTIONS.join(", ")
        ));
    }
    let section_value = root
        .get(name)
        .cloned()
        .unwrap_or_else(|| toml::Value::Table(toml::map::Map::new()));
    let mut wrapper = toml::map::Map::new();
    wrapper.insert(name.to_string(), section_value);
    toml::to_string_pretty(&wrapper).map_err(|e| format!("Config error: {e}"))
}

/// Print one value. Keys the file leaves out report their default.
pub fn get_value(config_path: &Path, key: &str) -> Result<String, String> {
    let root = effective_config(config_path)?;
    let value = navigate_value(&root, key).ok_or_else(|| format!("Key '{key}' not found"))?;

    match value {
        toml::Value::String(s) => Ok(format!("{s}\n")),
        toml::Value::Integer(n) => Ok(format!("{n}\n")),
        toml::Value::Float(f) => Ok(format!("{f}\n")),
        toml::Value::Boolean(b) => Ok(format!("{b}\n")),
        toml::Value::Datetime(d) => Ok(format!("{d}\n")),
        toml::Value::Array(_) | toml::Value::Table(_) => {
            toml::to_string_pretty(value).map_err(|e| format!("Config error: {e}"))
        }
    }
}

/// Set one scalar in the file. The file is only rewritten when the result
/// still validates.
pub fn set_value(config_path: &Path, key: &str, value: &str) -> Result<String, String> {
    let contents = read_config_file(config_path)?;
    let mut root: toml::Value =
        toml::de::from_str(&contents).map_err(|e| format!("Config error: {e}"))?;

    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err("Key must not be empty".to_string());
    }
    if !VALID_SECTIONS.contains(&parts[0]) {
        return Err(format!(
            "Unknown section '{}'. Valid sections: {}",
            parts[0],
            VALID_SECTIONS.join(", ")
        ));
    }

    set_nested_value(&mut root, &parts, parse_scalar(value))?;

    let new_contents = toml::to_string_pretty(&root).map_err(|e| format!("Config error: {e}"))?;
    Config::parse(&new_contents)
        .map_err(|e| format!("Validation failed: {e}. Config was not modified."))?;
    std::fs::write(config_path, &new_contents)
        .map_err(|e| format!("Failed to write config: {e}"))?;

    Ok(format!("Updated {key} = {value}\n"))
}

pub fn validate_config(config_path: &Path) -> Result<String, String> {
    let contents = read_config_file(config_path)?;
    Config::parse(&contents).map_err(|e| format!("Config error: {e}"))?;
    Ok("Configuration is valid.\n".to_string())
}

fn navigate_value<'a>(root: &'a toml::Value, key: &str) -> Option<&'a toml::Value> {
    key.split('.').try_fold(root, |current, part| current.get(part))
}

/// Parse a string into the most appropriate TOML scalar type.
fn parse_scalar(s: &str) -> toml::Value {
    match s {
        "true" => return toml::Value::Boolean(true),
        "false" => return toml::Value::Boolean(false),
        _ => {}
    }
    if let Ok(n) = s.parse::<i64>() {
        return toml::Value::Integer(n);
    }
    // Only dotted numbers become floats; plain digits were handled above.
    if s.contains('.') {
        if let Ok(f) = s.parse::<f64>() {
            return toml::Value::Float(f);
        }
    }
    toml::Value::String(s.to_string())
}

fn set_nested_value(
    root: &mut toml::Value,
    parts: &[&str],
    value: toml::Value,
) -> Result<(), String> {
    let toml::Value::Table(table) = root else {
        return Err(format!("Cannot set '{}': parent is not a table", parts[0]));
    };
    match parts {
        [last] => {
            table.insert(last.to_string(), value);
            Ok(())
        }
        [head, rest @ ..] => {
            let entry = table
                .entry(head.to_string())
                .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
            set_nested_value(entry, rest, value)
        }
        [] => Err("Key must not be empty".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    const SAMPLE: &str = r#"[chroma]
port = 8100
collection = "test_docs"

[embedding]
provider = "remote"
model = "bge-small"
endpoint = "http://gpu-box:8001"
"#;

    fn write_temp_config(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("chromactl-cli-test-{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("chromactl.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn cleanup_temp(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::remove_dir_all(parent).ok();
        }
    }

    #[test]
    fn show_config_round_trips_with_defaults_filled_in() {
        let path = write_temp_config("show-full", SAMPLE);
        let output = show_config(&path, None).unwrap();
        let config = Config::parse(&output).expect("show output should parse");
        assert_eq!(config.chroma.port, 8100);
        assert_eq!(config.chroma.host, "localhost");
        assert!(output.contains("[embed_server]"), "{output}");
        cleanup_temp(&path);
    }

    #[test]
    fn show_config_single_section() {
        let path = write_temp_config("show-section", SAMPLE);
        let output = show_config(&path, Some("embedding")).unwrap();
        assert!(output.contains("[embedding]"), "{output}");
        assert!(output.contains("bge-small"), "{output}");
        assert!(!output.contains("[chroma]"), "{output}");
        cleanup_temp(&path);
    }

    #[test]
    fn show_config_unknown_section_lists_valid_ones() {
        let path = write_temp_config("show-unknown", SAMPLE);
        let err = show_config(&path, Some("server")).unwrap_err();
        assert!(err.contains("Unknown section 'server'"), "{err}");
        assert!(err.contains("chroma, embedding, embed_server"), "{err}");
        cleanup_temp(&path);
    }

    #[test]
    fn get_value_reads_explicit_and_default_keys() {
        let path = write_temp_config("get", SAMPLE);
        assert_eq!(get_value(&path, "chroma.port").unwrap().trim(), "8100");
        assert_eq!(get_value(&path, "chroma.path").unwrap().trim(), "./chroma_db");
        assert_eq!(get_value(&path, "embedding.normalize").unwrap().trim(), "true");
        assert!(get_value(&path, "chroma.nope").unwrap_err().contains("not found"));
        cleanup_temp(&path);
    }

    #[test]
    fn set_value_updates_file() {
        let path = write_temp_config("set", SAMPLE);
        let result = set_value(&path, "embedding.model", "bge-large").unwrap();
        assert_eq!(result, "Updated embedding.model = bge-large\n");
        assert_eq!(get_value(&path, "embedding.model").unwrap().trim(), "bge-large");
        cleanup_temp(&path);
    }

    #[test]
    fn set_value_creates_missing_section() {
        let path = write_temp_config("set-new-section", SAMPLE);
        set_value(&path, "embed_server.port", "9001").unwrap();
        assert_eq!(get_value(&path, "embed_server.port").unwrap().trim(), "9001");
        cleanup_temp(&path);
    }

    #[test]
    fn set_value_invalid_type_does_not_modify_file() {
        let path = write_temp_config("set-invalid", SAMPLE);
        let original = std::fs::read_to_string(&path).unwrap();
        let err = set_value(&path, "chroma.port", "abc").unwrap_err();
        assert!(err.contains("Validation failed"), "{err}");
        assert!(err.contains("Config was not modified"), "{err}");
        assert_eq!(original, std::fs::read_to_string(&path).unwrap());
        cleanup_temp(&path);
    }

    #[test]
    fn set_value_rejects_unknown_section() {
        let path = write_temp_config("set-unknown", SAMPLE);
        assert!(set_value(&path, "server.port", "1").unwrap_err().contains("Unknown section"));
        cleanup_temp(&path);
    }

    #[test]
    fn validate_config_accepts_sample() {
        let path = write_temp_config("validate-ok", SAMPLE);
        assert_eq!(validate_config(&path).unwrap().trim(), "Configuration is valid.");
        cleanup_temp(&path);
    }

    #[test]
    fn validate_config_rejects_bad_endpoint() {
        let path = write_temp_config(
            "validate-bad",
            "[embedding]\nprovider = \"remote\"\nendpoint = \"gpu-box\"\n",
        );
        let err = validate_config(&path).unwrap_err();
        assert!(err.starts_with("Config error:"), "{err}");
        cleanup_temp(&path);
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let err = show_config(Path::new("/nonexistent/chromactl.toml"), None).unwrap_err();
        assert!(err.contains("Config file not found"), "{err}");
        assert!(err.contains("/nonexistent/chromactl.toml"), "{err}");
    }

    #[test]
    fn parse_scalar_picks_types() {
        assert_eq!(parse_scalar("true"), toml::Value::Boolean(true));
        assert_eq!(parse_scalar("42"), toml::Value::Integer(42));
        assert_eq!(parse_scalar("0.5"), toml::Value::Float(0.5));
        assert_eq!(parse_scalar("bge-large"), toml::Value::String("bge-large".into()));
    }
}
