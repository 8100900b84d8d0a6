use uuid::Uuid;

use crate::{Error, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

/// Directory entry, only what is needed to display a comment author
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub full_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewUser {
    pub id: UserId,
    pub name: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub initial_password_hash: String,
}

impl NewUser {
    pub fn new(id: UserId, name: String, full_name: String, initial_password: &str) -> NewUser {
        NewUser {
            id,
            name,
            full_name,
            avatar_url: None,
            initial_password_hash: bcrypt::hash(initial_password, bcrypt::DEFAULT_COST)
                .expect("failed hashing password"),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_name(&self.name)?;
        crate::validate_string(&self.full_name)?;
        if let Some(url) = &self.avatar_url {
            crate::validate_string(url)?;
        }
        crate::validate_string(&self.initial_password_hash)?;
        Ok(())
    }
}
