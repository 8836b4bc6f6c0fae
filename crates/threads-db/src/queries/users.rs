use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;

use super::OptionalExt;
use crate::Database;
use crate::models::{NewUser, ProfileChanges, USER_COLUMNS, UserRow, user_from_row};

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>) -> Result<i64> {
        self.with_conn(|conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO users (username, email, password, bio, profile_picture, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![
                    user.username,
                    user.email,
                    user.password_hash,
                    user.bio,
                    user.profile_picture,
                    now
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", rusqlite::params![id]))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", rusqlite::params![email]))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", rusqlite::params![username]))
    }

    /// Registration conflict check: either identifier already in use.
    pub fn find_user_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(
                conn,
                "email = ?1 OR username = ?2",
                rusqlite::params![email, username],
            )
        })
    }

    /// Apply a partial profile update and return the fresh row.
    pub fn update_user(&self, id: i64, changes: &ProfileChanges) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET
                    username        = COALESCE(?2, username),
                    bio             = COALESCE(?3, bio),
                    profile_picture = COALESCE(?4, profile_picture),
                    password        = COALESCE(?5, password),
                    updated_at      = ?6
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    changes.username,
                    changes.bio,
                    changes.profile_picture,
                    changes.password_hash,
                    Utc::now()
                ],
            )?;
            query_user(conn, "id = ?1", rusqlite::params![id])
        })
    }

    // -- Follow graph --

    /// Returns true when a new edge was created.
    pub fn follow(&self, follower_id: i64, following_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO follows (follower_id, following_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![follower_id, following_id, Utc::now()],
            )?;
            Ok(inserted > 0)
        })
    }

    /// Returns true when an edge was removed.
    pub fn unfollow(&self, follower_id: i64, following_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
                rusqlite::params![follower_id, following_id],
            )?;
            Ok(removed > 0)
        })
    }

    pub fn get_following(&self, user_id: i64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            query_users(
                conn,
                "SELECT u.id, u.username, u.email, u.password, u.bio, u.profile_picture, u.created_at, u.updated_at
                 FROM follows f JOIN users u ON u.id = f.following_id
                 WHERE f.follower_id = ?1
                 ORDER BY f.created_at DESC",
                user_id,
            )
        })
    }

    pub fn get_followers(&self, user_id: i64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            query_users(
                conn,
                "SELECT u.id, u.username, u.email, u.password, u.bio, u.profile_picture, u.created_at, u.updated_at
                 FROM follows f JOIN users u ON u.id = f.follower_id
                 WHERE f.following_id = ?1
                 ORDER BY f.created_at DESC",
                user_id,
            )
        })
    }

    /// (followers, following)
    pub fn follow_counts(&self, user_id: i64) -> Result<(i64, i64)> {
        self.with_conn(|conn| {
            let counts = conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM follows WHERE following_id = ?1),
                    (SELECT COUNT(*) FROM follows WHERE follower_id = ?1)",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(counts)
        })
    }
}

fn query_user(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {} LIMIT 1", USER_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row(params, user_from_row).optional()
}

fn query_users(conn: &Connection, sql: &str, user_id: i64) -> Result<Vec<UserRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([user_id], user_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use crate::models::ProfileChanges;
    use crate::queries::testing;

    #[test]
    fn lookup_by_either_identifier() {
        let db = testing::db();
        let id = testing::user(&db, "curry");

        let by_email = db.find_user_by_email_or_username("curry@example.com", "other").unwrap();
        assert_eq!(by_email.map(|u| u.id), Some(id));

        let by_name = db.find_user_by_email_or_username("nobody@example.com", "curry").unwrap();
        assert_eq!(by_name.map(|u| u.id), Some(id));

        assert!(db.find_user_by_email_or_username("x@example.com", "x").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_is_rejected_by_the_schema() {
        let db = testing::db();
        testing::user(&db, "gigi");
        let dup = db.create_user(&crate::models::NewUser {
            username: "gigi",
            email: "other@example.com",
            password_hash: "hash",
            bio: "",
            profile_picture: "",
        });
        assert!(crate::is_constraint_violation(&dup.unwrap_err()));
    }

    #[test]
    fn renaming_onto_a_taken_username_is_a_constraint_violation() {
        let db = testing::db();
        testing::user(&db, "taken");
        let id = testing::user(&db, "mover");

        let err = db
            .update_user(
                id,
                &ProfileChanges {
                    username: Some("taken".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(crate::is_constraint_violation(&err));
        assert_eq!(db.get_user_by_id(id).unwrap().unwrap().username, "mover");
    }

    #[test]
    fn other_errors_are_not_constraint_violations() {
        let db = testing::db();
        let err = db
            .with_conn(|conn| Ok(conn.execute("SELECT * FROM no_such_table", [])?))
            .unwrap_err();
        assert!(!crate::is_constraint_violation(&err));
        assert!(!crate::is_constraint_violation(&anyhow::anyhow!("lock poisoned")));
    }

    #[test]
    fn update_only_touches_given_fields() {
        let db = testing::db();
        let id = testing::user(&db, "sara");

        let updated = db
            .update_user(
                id,
                &ProfileChanges {
                    bio: Some("painter".into()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();

        assert_eq!(updated.username, "sara");
        assert_eq!(updated.bio, "painter");
        assert_eq!(updated.password, "hash");
    }

    #[test]
    fn follow_is_idempotent_and_counted() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");

        assert!(db.follow(a, b).unwrap());
        assert!(!db.follow(a, b).unwrap());
        assert_eq!(db.follow_counts(b).unwrap(), (1, 0));
        assert_eq!(db.follow_counts(a).unwrap(), (0, 1));

        let following: Vec<i64> = db.get_following(a).unwrap().iter().map(|u| u.id).collect();
        assert_eq!(following, vec![b]);
        let followers: Vec<i64> = db.get_followers(b).unwrap().iter().map(|u| u.id).collect();
        assert_eq!(followers, vec![a]);

        assert!(db.unfollow(a, b).unwrap());
        assert!(!db.unfollow(a, b).unwrap());
        assert!(db.get_following(a).unwrap().is_empty());
    }
}
