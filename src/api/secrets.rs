//! API users and their tokens
//!
//! The secrets file holds one `user token` pair per line. Blank lines and
//! lines starting with `#` are skipped.

use std::collections::HashMap;
use std::path::Path;

use crate::config::ConfigError;

#[derive(Debug, Clone, Default)]
pub struct Secrets {
    /// token -> user
    users: HashMap<String, String>,
}

impl Secrets {
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut users = HashMap::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(user), Some(token), None) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(ConfigError::InvalidValue {
                    field: format!("secrets line {}", index + 1),
                    reason: "expected \"user token\"".to_string(),
                });
            };
            users.insert(token.to_string(), user.to_string());
        }
        Ok(Self { users })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn user_for(&self, token: &str) -> Option<&str> {
        self.users.get(token).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
