use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

use crate::models::harvest::{Credentials, CredentialsFile};

/// Name of the credentials dotfile in the user's home directory.
pub const CREDENTIALS_FILE: &str = ".harvest";

const EXPECTED_FORMAT: &str =
    r#"{"app": "<account subdomain>", "email": "<login email>", "password": "<password>"}"#;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine the home directory to locate ~/{}", CREDENTIALS_FILE)]
    NoHomeDir,

    #[error("Missing credentials: {} does not exist. Create it containing {}", .path.display(), EXPECTED_FORMAT)]
    Missing { path: PathBuf },

    #[error("Invalid credentials format in {}: {}. Expected {}", .path.display(), .reason, EXPECTED_FORMAT)]
    InvalidFormat { path: PathBuf, reason: String },

    #[error("Incomplete credentials in {}: \"{}\" is missing or empty. Expected {}", .path.display(), .field, EXPECTED_FORMAT)]
    Incomplete { path: PathBuf, field: &'static str },
}

/// `~/.harvest`, resolved against the current user's home directory.
pub fn credentials_path() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(CREDENTIALS_FILE))
        .ok_or(ConfigError::NoHomeDir)
}

pub fn load_credentials() -> Result<Credentials, ConfigError> {
    let path = credentials_path()?;
    load_credentials_from(&path)
}

pub fn load_credentials_from(path: &Path) -> Result<Credentials, ConfigError> {
    info!("Reading Harvest credentials from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error!("Credentials file not found: {}", path.display());
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            });
        }
        Err(e) => {
            error!("Failed to read credentials file {}: {}", path.display(), e);
            return Err(ConfigError::InvalidFormat {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    };

    let file: CredentialsFile =
        serde_json::from_str(&content).map_err(|e| ConfigError::InvalidFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let require = |value: Option<String>, field: &'static str| match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Incomplete {
            path: path.to_path_buf(),
            field,
        }),
    };

    let credentials = Credentials {
        app: require(file.app, "app")?,
        email: require(file.email, "email")?,
        password: require(file.password, "password")?,
    };

    info!(
        "Loaded credentials for {} on account {}",
        credentials.email, credentials.app
    );
    Ok(credentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_credentials() {
        let file = write_file(r#"{"app":"t","email":"a@b.com","password":"p"}"#);
        let credentials = load_credentials_from(file.path()).unwrap();
        assert_eq!(credentials.app, "t");
        assert_eq!(credentials.email, "a@b.com");
        assert_eq!(credentials.password, "p");
    }

    #[test]
    fn test_password_is_not_altered() {
        let file = write_file(r#"{"app":"t","email":"a@b.com","password":"  s3cr\"et  "}"#);
        let credentials = load_credentials_from(file.path()).unwrap();
        assert_eq!(credentials.password, "  s3cr\"et  ");
    }

    #[test]
    fn test_extra_keys_are_ignored() {
        let file = write_file(r#"{"app":"t","email":"a@b.com","password":"p","team":"x"}"#);
        assert!(load_credentials_from(file.path()).is_ok());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CREDENTIALS_FILE);
        let err = load_credentials_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));
        assert!(err.to_string().contains(".harvest"));
    }

    #[test]
    fn test_malformed_file() {
        let file = write_file("app = t");
        let err = load_credentials_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFormat { .. }));
    }

    #[test]
    fn test_wrong_field_type_is_invalid_format() {
        let file = write_file(r#"{"app":"t","email":"a@b.com","password":1234}"#);
        let err = load_credentials_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFormat { .. }));
    }

    #[test]
    fn test_each_missing_field_is_reported() {
        let cases = [
            (r#"{"email":"a@b.com","password":"p"}"#, "app"),
            (r#"{"app":"t","password":"p"}"#, "email"),
            (r#"{"app":"t","email":"a@b.com"}"#, "password"),
            (r#"{"app":"  ","email":"a@b.com","password":"p"}"#, "app"),
            (r#"{"app":"t","email":"a@b.com","password":""}"#, "password"),
        ];

        for (content, expected) in cases {
            let file = write_file(content);
            match load_credentials_from(file.path()) {
                Err(ConfigError::Incomplete { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected incomplete {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_error_message_does_not_leak_password() {
        let file = write_file(r#"{"app":"","email":"a@b.com","password":"hunter2"}"#);
        let err = load_credentials_from(file.path()).unwrap_err();
        assert!(!err.to_string().contains("hunter2"));
    }
}
