//! User lookup by access key.

use std::collections::HashMap;

use crate::arn::Arn;
use crate::config::AuthConfig;

/// A principal that can sign requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub access_key: String,
    pub secret_key: String,
    pub arn: Arn,
    pub is_root: bool,
}

/// Source of users for the credential resolver.
pub trait UserDirectory: Send + Sync {
    fn lookup(&self, access_key: &str) -> Option<User>;
}

/// Users taken from the `auth` section of the configuration file.
#[derive(Debug, Default)]
pub struct ConfigUserDirectory {
    users: HashMap<String, User>,
}

impl ConfigUserDirectory {
    /// Build the directory. The root user replaces any regular user
    /// registered under the same access key; a root user with an empty
    /// access key is ignored.
    pub fn from_config(config: &AuthConfig) -> Self {
        let mut users: HashMap<String, User> = config
            .users
            .iter()
            .filter(|(access_key, _)| !access_key.is_empty())
            .map(|(access_key, u)| {
                (
                    access_key.clone(),
                    User {
                        access_key: access_key.clone(),
                        secret_key: u.secret_key.clone(),
                        arn: u.arn.clone(),
                        is_root: false,
                    },
                )
            })
            .collect();

        let root = &config.root_user;
        if !root.access_key.is_empty() {
            users.insert(
                root.access_key.clone(),
                User {
                    access_key: root.access_key.clone(),
                    secret_key: root.secret_key.clone(),
                    arn: root.arn.clone(),
                    is_root: true,
                },
            );
        }

        Self { users }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserDirectory for ConfigUserDirectory {
    fn lookup(&self, access_key: &str) -> Option<User> {
        self.users.get(access_key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;

    fn user(secret: &str) -> UserConfig {
        UserConfig {
            access_key: String::new(),
            secret_key: secret.to_string(),
            arn: Arn::default(),
        }
    }

    #[test]
    fn test_lookup_regular_and_root() {
        let mut config = AuthConfig::default();
        config.users.insert("alice".into(), user("alice-secret"));

        let dir = ConfigUserDirectory::from_config(&config);
        assert_eq!(dir.len(), 2);

        let alice = dir.lookup("alice").unwrap();
        assert_eq!(alice.secret_key, "alice-secret");
        assert!(!alice.is_root);

        let root = dir.lookup("objectstore").unwrap();
        assert!(root.is_root);
        assert!(dir.lookup("mallory").is_none());
    }

    #[test]
    fn test_root_overrides_same_access_key() {
        let mut config = AuthConfig::default();
        config.users.insert("objectstore".into(), user("shadowed"));

        let dir = ConfigUserDirectory::from_config(&config);
        assert_eq!(dir.len(), 1);
        let found = dir.lookup("objectstore").unwrap();
        assert!(found.is_root);
        assert_eq!(found.secret_key, "objectstore-secret");
    }

    #[test]
    fn test_empty_root_key_skipped() {
        let mut config = AuthConfig::default();
        config.root_user.access_key.clear();
        let dir = ConfigUserDirectory::from_config(&config);
        assert!(dir.is_empty());
        assert!(dir.lookup("").is_none());
    }
}
