//! Environment loading helpers.
//!
//! Keeps the primary → alias fallback chain in one place so callers never
//! repeat `or_else` chains.

use std::env;
use std::path::Path;
use std::str::FromStr;

/// Load `.env` from the current directory into the process environment.
/// Existing variables are never overwritten. Runs once per process.
pub fn load_dotenv() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let dir = env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
        load_dotenv_from_dir(&dir);
    });
}

/// Load `<dir>/.env` without overwriting variables that are already set.
pub fn load_dotenv_from_dir(dir: &Path) {
    let Ok(content) = std::fs::read_to_string(dir.join(".env")) else {
        return;
    };
    for (key, value) in parse_dotenv(&content) {
        if env::var(&key).is_err() {
            env::set_var(key, value);
        }
    }
}

/// Parse `KEY=value` lines. Blank lines and `#` comments are skipped;
/// surrounding quotes are stripped and unquoted inline comments removed.
fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(eq_pos) = line.find('=') else {
            continue;
        };
        let key = line[..eq_pos].trim();
        let mut value = line[eq_pos + 1..].trim();
        if let Some(hash_pos) = value.find('#') {
            let before_hash = value[..hash_pos].trim_end();
            if !before_hash.contains('"') && !before_hash.contains('\'') {
                value = before_hash;
            }
        }
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = &value[1..value.len() - 1];
        }
        if !key.is_empty() {
            pairs.push((key.to_string(), value.to_string()));
        }
    }
    pairs
}

/// Read the primary key or the first alias that is set; empty values fall
/// back to `default`.
pub fn env_or<F>(primary: &str, aliases: &[&str], default: F) -> String
where
    F: FnOnce() -> String,
{
    env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(default)
}

/// Like [`env_or`] but returns `None` when unset or blank.
pub fn env_optional(primary: &str, aliases: &[&str]) -> Option<String> {
    env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()))
        .and_then(|s| {
            let s = s.trim().to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        })
}

/// Boolean flag: 0/false/no/off are false, anything else that is set is true.
pub fn env_bool(primary: &str, aliases: &[&str], default: bool) -> bool {
    let v = env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()));
    match v.as_deref() {
        Some(s) => !matches!(
            s.trim().to_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ),
        None => default,
    }
}

/// Parse a typed value; unparsable input logs a warning and uses `default`.
pub fn env_parse<T: FromStr>(primary: &str, aliases: &[&str], default: T) -> T {
    match env_optional(primary, aliases) {
        Some(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            tracing::warn!(key = primary, value = %raw, "Invalid value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotenv_quotes_and_comments() {
        let pairs = parse_dotenv(
            "# comment\nRUNBOX_A=1\nRUNBOX_B=\"quoted value\"\nRUNBOX_C=plain # trailing\n\nbroken\n",
        );
        assert_eq!(
            pairs,
            vec![
                ("RUNBOX_A".to_string(), "1".to_string()),
                ("RUNBOX_B".to_string(), "quoted value".to_string()),
                ("RUNBOX_C".to_string(), "plain".to_string()),
            ]
        );
    }

    #[test]
    fn test_env_bool_and_aliases() {
        env::set_var("RUNBOX_TEST_LOADER_FLAG", "off");
        assert!(!env_bool("RUNBOX_TEST_LOADER_FLAG", &[], true));
        env::set_var("RUNBOX_TEST_LOADER_FLAG", "yes");
        assert!(env_bool("RUNBOX_TEST_LOADER_FLAG", &[], false));
        env::remove_var("RUNBOX_TEST_LOADER_FLAG");
        assert!(env_bool("RUNBOX_TEST_LOADER_FLAG", &[], true));

        env::set_var("RUNBOX_TEST_LOADER_ALIAS", "from-alias");
        assert_eq!(
            env_optional("RUNBOX_TEST_LOADER_MISSING", &["RUNBOX_TEST_LOADER_ALIAS"]),
            Some("from-alias".to_string())
        );
        env::remove_var("RUNBOX_TEST_LOADER_ALIAS");
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        env::set_var("RUNBOX_TEST_LOADER_NUM", "not-a-number");
        assert_eq!(env_parse("RUNBOX_TEST_LOADER_NUM", &[], 42u64), 42);
        env::set_var("RUNBOX_TEST_LOADER_NUM", "7");
        assert_eq!(env_parse("RUNBOX_TEST_LOADER_NUM", &[], 42u64), 7);
        env::remove_var("RUNBOX_TEST_LOADER_NUM");
    }
}
