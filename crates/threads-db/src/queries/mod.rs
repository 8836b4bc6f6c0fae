mod comments;
mod conversations;
mod notifications;
mod posts;
mod reposts;
mod users;

use anyhow::Result;

/// Ids bound per `IN (...)` list. SQLite rejects statements with more than
/// 32766 parameters, so long id lists are queried in batches of this size.
const ID_BATCH: usize = 500;

/// `?{start}, ?{start+1}, ...` for an `IN (...)` list of `count` values.
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::Database;
    use crate::models::NewUser;

    pub fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    pub fn user(db: &Database, username: &str) -> i64 {
        db.create_user(&NewUser {
            username,
            email: &format!("{username}@example.com"),
            password_hash: "hash",
            bio: "",
            profile_picture: "",
        })
        .unwrap()
    }
}
