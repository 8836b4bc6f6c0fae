use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, Row};
use threads_types::models::Comment;

use super::OptionalExt;
use crate::Database;
use crate::models::summary_at;

const COMMENT_SELECT: &str = "
    SELECT c.id, c.post_id, c.user_id, c.content, c.created_at, c.updated_at,
           u.id, u.username, u.profile_picture, u.bio
    FROM comments c
    JOIN users u ON u.id = c.user_id";

impl Database {
    // -- Comments --

    pub fn create_comment(&self, post_id: i64, user_id: i64, content: &str) -> Result<Comment> {
        self.with_conn(|conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO comments (user_id, post_id, content, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![user_id, post_id, content, now],
            )?;
            let id = conn.last_insert_rowid();
            query_comment(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("Comment {} vanished after insert", id))
        })
    }

    pub fn get_comment(&self, id: i64) -> Result<Option<Comment>> {
        self.with_conn(|conn| query_comment(conn, id))
    }

    /// Oldest first.
    pub fn list_comments(&self, post_id: i64) -> Result<Vec<Comment>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE c.post_id = ?1 ORDER BY c.created_at ASC, c.id ASC",
                COMMENT_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([post_id], comment_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_comment(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM comments WHERE id = ?1", [id])?;
            Ok(removed > 0)
        })
    }
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        post_id: row.get(1)?,
        user_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        author: summary_at(row, 6)?,
    })
}

fn query_comment(conn: &Connection, id: i64) -> Result<Option<Comment>> {
    let sql = format!("{} WHERE c.id = ?1", COMMENT_SELECT);
    conn.query_row(&sql, [id], comment_from_row).optional()
}

#[cfg(test)]
mod tests {
    use crate::queries::testing;

    #[test]
    fn comments_list_oldest_first_and_count_on_post() {
        let db = testing::db();
        let author = testing::user(&db, "author");
        let reader = testing::user(&db, "reader");
        let post = db.create_post(author, "thoughts?").unwrap();

        let first = db.create_comment(post.id, reader, "first!").unwrap();
        let second = db.create_comment(post.id, author, "thanks").unwrap();
        assert_eq!(first.author.username, "reader");

        let ids: Vec<i64> = db.list_comments(post.id).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(db.get_post(post.id).unwrap().unwrap().comment_count, 2);

        assert!(db.delete_comment(first.id).unwrap());
        assert!(db.get_comment(first.id).unwrap().is_none());
        assert_eq!(db.list_comments(post.id).unwrap().len(), 1);
    }
}
