use chrono::Utc;

mod auth;
pub use auth::{AuthToken, NewSession};

mod comment;
pub use comment::{ArticleId, CommentId, CommentRecord, NewComment};

mod error;
pub use error::Error;

mod feed;
pub use feed::{ClientMessage, FeedMessage};

mod user;
pub use user::{NewUser, User, UserId};

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

// The functions below are used to validate input from the user. Postgres
// refuses null bytes in TEXT columns, so they are rejected here rather than
// as an opaque database error.
pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}

/// Comment bodies must contain something other than whitespace
pub fn validate_content(s: &str) -> Result<(), Error> {
    validate_string(s)?;
    if s.trim().is_empty() {
        return Err(Error::EmptyContent);
    }
    Ok(())
}

pub fn validate_name(s: &str) -> Result<(), Error> {
    validate_string(s)?;
    if s.is_empty() || s.chars().any(|c| c.is_whitespace() || c == ':') {
        return Err(Error::InvalidName(String::from(s)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_validation() {
        assert_eq!(validate_content("hello"), Ok(()));
        assert_eq!(validate_content("  \n\t "), Err(Error::EmptyContent));
        assert_eq!(validate_content(""), Err(Error::EmptyContent));
        assert_eq!(
            validate_content("a\0b"),
            Err(Error::NullByteInString(String::from("a\0b")))
        );
    }

    #[test]
    fn name_validation() {
        assert_eq!(validate_name("alice"), Ok(()));
        assert!(validate_name("").is_err());
        assert!(validate_name("ali ce").is_err());
        assert!(validate_name("ali:ce").is_err());
    }
}
