use std::{collections::HashMap, sync::Arc};

use crate::api::{User, UserId};

/// Avatar to display for authors that have none
pub const DEFAULT_AVATAR: &str = "/images/default-avatar.png";

/// Display name of authors missing from the directory
pub const ANONYMOUS_NAME: &str = "Anonymous";

#[derive(Clone, Debug, Default)]
pub struct UserDirectory {
    users: Arc<HashMap<UserId, User>>,
    revision: u64,
}

impl UserDirectory {
    pub fn new() -> UserDirectory {
        UserDirectory::default()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn add_users(&mut self, users: Vec<User>) {
        Arc::make_mut(&mut self.users).extend(users.into_iter().map(|u| (u.id, u)));
        self.revision += 1;
    }

    /// Replaces the whole directory with a freshly fetched listing
    pub fn replace(&mut self, users: Vec<User>) {
        self.users = Arc::new(users.into_iter().map(|u| (u.id, u)).collect());
        self.revision += 1;
    }

    pub fn get(&self, id: &UserId) -> Option<&User> {
        self.users.get(id)
    }

    pub fn display_name(&self, id: &UserId) -> &str {
        self.users
            .get(id)
            .map(|u| &u.full_name as &str)
            .unwrap_or(ANONYMOUS_NAME)
    }

    pub fn avatar(&self, id: &UserId) -> Option<&str> {
        self.users.get(id).and_then(|u| u.avatar_url.as_deref())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Upper-cased first letter of every word, for avatar placeholders
pub fn initials(name: &str) -> String {
    let res = name
        .split_whitespace()
        .filter_map(|w| w.chars().next())
        .flat_map(|c| c.to_uppercase())
        .collect::<String>();
    if res.is_empty() {
        String::from("?")
    } else {
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Uuid;

    #[test]
    fn unknown_users_are_anonymous() {
        let mut dir = UserDirectory::new();
        let alice = UserId(Uuid::from_u128(1));
        dir.add_users(vec![User {
            id: alice,
            full_name: String::from("Alice Liddell"),
            avatar_url: Some(String::from("https://example.org/alice.png")),
        }]);
        assert_eq!(dir.display_name(&alice), "Alice Liddell");
        assert_eq!(dir.avatar(&alice), Some("https://example.org/alice.png"));
        assert_eq!(dir.display_name(&UserId::stub()), ANONYMOUS_NAME);
        assert_eq!(dir.avatar(&UserId::stub()), None);
    }

    #[test]
    fn replace_drops_old_entries() {
        let mut dir = UserDirectory::new();
        dir.add_users(vec![User {
            id: UserId(Uuid::from_u128(1)),
            full_name: String::from("Old"),
            avatar_url: None,
        }]);
        let rev = dir.revision();
        dir.replace(vec![User {
            id: UserId(Uuid::from_u128(2)),
            full_name: String::from("New"),
            avatar_url: None,
        }]);
        assert!(dir.revision() > rev);
        assert_eq!(dir.len(), 1);
        assert!(dir.get(&UserId(Uuid::from_u128(1))).is_none());
    }

    #[test]
    fn initials_of_names() {
        assert_eq!(initials("Jane van Doe"), "JVD");
        assert_eq!(initials("  élodie  "), "É");
        assert_eq!(initials(""), "?");
        assert_eq!(initials("   "), "?");
    }
}
