//! Fns to read variables from the environment more conveniently. Secrets are obfuscated before
//! they hit the debug log.

use std::{env, fmt::Debug, str::FromStr};

use anyhow::{Context, Result};
use tracing::debug;

const SECRET_LOG_BLACKLIST: [&str; 3] = ["DATABASE_URL", "DATABASE_READER_URL", "INDEXER_URL"];

fn obfuscate_if_secret(blacklist: &[&str], key: &str, value: &str) -> String {
    if blacklist.contains(&key) {
        let mut last_four = value.to_string();
        last_four.drain(0..value.len().saturating_sub(4));
        format!("****{last_four}")
    } else {
        value.to_string()
    }
}

/// Get an environment variable, encoding found or missing as Option, and panic otherwise.
pub fn get_env_var(key: &str) -> Option<String> {
    let var = match env::var(key) {
        Err(env::VarError::NotPresent) => None,
        Err(e) => panic!("{e}"),
        Ok(var) => Some(var),
    };

    if let Some(ref existing_var) = var {
        let output = obfuscate_if_secret(&SECRET_LOG_BLACKLIST, key, existing_var);
        debug!("env var {key}: {output}");
    } else {
        debug!("env var {key} requested but not found")
    };

    var
}

pub fn get_env_bool(key: &str) -> Option<bool> {
    get_env_var(key).map(|var| match var.to_lowercase().as_str() {
        "true" => true,
        "false" => false,
        "t" => true,
        "f" => false,
        "1" => true,
        "0" => false,
        str => panic!("invalid bool value {str} for {key}"),
    })
}

/// Parses an optional environment variable. A present but malformed value is an error rather
/// than silently falling back to a default.
pub fn get_env_parsed<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Debug,
{
    get_env_var(key)
        .map(|var| {
            var.parse::<T>()
                .map_err(|e| anyhow::anyhow!("{e:?}"))
                .with_context(|| format!("invalid value {var} for {key}"))
        })
        .transpose()
}

#[derive(Debug)]
pub struct EnvConfig {
    pub db_url: String,
    // Falls back to the writer when no replica is configured.
    pub db_reader_url: String,
    pub indexer_url: String,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self> {
        let db_url = get_env_var("DATABASE_URL").context("DATABASE_URL is required")?;
        let db_reader_url = get_env_var("DATABASE_READER_URL").unwrap_or_else(|| db_url.clone());

        Ok(Self {
            db_reader_url,
            db_url,
            indexer_url: get_env_var("INDEXER_URL").context("INDEXER_URL is required")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_var_safe_some() {
        let test_key = "TEST_KEY_SAFE_SOME";
        let test_value = "my-env-value";
        std::env::set_var(test_key, test_value);
        assert_eq!(get_env_var(test_key), Some(test_value.to_string()));
    }

    #[test]
    fn test_get_env_var_safe_none() {
        let key = get_env_var("DOESNT_EXIST");
        assert!(key.is_none());
    }

    #[test]
    fn test_get_env_bool_not_there() {
        let flag = get_env_bool("DOESNT_EXIST");
        assert_eq!(flag, None);
    }

    #[test]
    fn test_get_env_bool_true_upper() {
        let test_key = "TEST_KEY_BOOL_TRUE2";
        std::env::set_var(test_key, "TRUE");
        assert_eq!(get_env_bool(test_key), Some(true));
    }

    #[test]
    fn test_get_env_bool_false() {
        let test_key = "TEST_KEY_BOOL_FALSE";
        std::env::set_var(test_key, "0");
        assert_eq!(get_env_bool(test_key), Some(false));
    }

    #[test]
    fn test_get_env_parsed() {
        let test_key = "TEST_KEY_PARSED";
        std::env::set_var(test_key, "360");
        assert_eq!(get_env_parsed::<usize>(test_key).unwrap(), Some(360));
        assert_eq!(get_env_parsed::<usize>("DOESNT_EXIST").unwrap(), None);
    }

    #[test]
    fn test_get_env_parsed_invalid() {
        let test_key = "TEST_KEY_PARSED_INVALID";
        std::env::set_var(test_key, "lots");
        assert!(get_env_parsed::<usize>(test_key).is_err());
    }

    #[test]
    fn test_obfuscate_if_secret() {
        let secret_key = "SECRET_KEY";
        let blacklist = vec![secret_key];
        assert_eq!(
            obfuscate_if_secret(&blacklist, secret_key, "my_secret_value"),
            "****alue"
        );

        let normal_key = "NORMAL_KEY";
        assert_eq!(
            obfuscate_if_secret(&blacklist, normal_key, "my_normal_value"),
            "my_normal_value"
        );
    }
}
