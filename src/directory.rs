//! Identity and organization lookup used by the dispatcher.
//!
//! Resolution of the creating user and organization is an external concern;
//! the registry only consumes this contract. The bundled
//! [`StaticDirectory`] serves fixed entries for single-node setups and
//! tests.

use std::collections::HashMap;

use async_trait::async_trait;

pub const DEFAULT_ORGANIZATION: &str = "default_org";
pub const SYSTEM_USER: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub organization: String,
}

#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolve an organization by id, `None` if unknown.
    async fn organization(&self, id: &str) -> Option<Organization>;

    /// Resolve a user by username, `None` if unknown.
    async fn user(&self, username: &str) -> Option<User>;
}

/// Directory backed by a fixed set of entries. Always contains the default
/// organization and the system user.
pub struct StaticDirectory {
    organizations: HashMap<String, Organization>,
    users: HashMap<String, User>,
}

impl Default for StaticDirectory {
    fn default() -> Self {
        let mut directory = Self {
            organizations: HashMap::new(),
            users: HashMap::new(),
        };
        directory.add_organization(Organization {
            id: DEFAULT_ORGANIZATION.to_string(),
            name: "Default organization".to_string(),
        });
        directory.add_user(User {
            username: SYSTEM_USER.to_string(),
            organization: DEFAULT_ORGANIZATION.to_string(),
        });
        directory
    }
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_organization(&mut self, organization: Organization) {
        self.organizations
            .insert(organization.id.clone(), organization);
    }

    pub fn add_user(&mut self, user: User) {
        self.users.insert(user.username.clone(), user);
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn organization(&self, id: &str) -> Option<Organization> {
        self.organizations.get(id).cloned()
    }

    async fn user(&self, username: &str) -> Option<User> {
        self.users.get(username).cloned()
    }
}
