use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, Row};
use threads_types::models::Post;

use super::{ID_BATCH, OptionalExt, placeholders};
use crate::Database;
use crate::models::summary_at;

/// Post columns plus author and counts; see [`post_from_row`].
pub(crate) const POST_SELECT: &str = "
    SELECT p.id, p.user_id, p.content, p.created_at, p.updated_at,
           u.id, u.username, u.profile_picture, u.bio,
           (SELECT COUNT(*) FROM reposts r WHERE r.original_post_id = p.id),
           (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id)
    FROM posts p
    JOIN users u ON u.id = p.user_id";

impl Database {
    // -- Posts --

    pub fn create_post(&self, user_id: i64, content: &str) -> Result<Post> {
        self.with_conn(|conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO posts (user_id, content, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                rusqlite::params![user_id, content, now],
            )?;
            let id = conn.last_insert_rowid();
            query_post(conn, id)?.ok_or_else(|| anyhow::anyhow!("Post {} vanished after insert", id))
        })
    }

    pub fn get_post(&self, id: i64) -> Result<Option<Post>> {
        self.with_conn(|conn| query_post(conn, id))
    }

    /// Newest first. `None` lists every post, `Some(user)` only posts by
    /// the accounts that user follows.
    pub fn list_posts(&self, followed_by: Option<i64>) -> Result<Vec<Post>> {
        self.with_conn(|conn| match followed_by {
            None => query_posts(conn, "", &[]),
            Some(follower_id) => query_posts(
                conn,
                "WHERE p.user_id IN (SELECT following_id FROM follows WHERE follower_id = ?1)",
                &[follower_id],
            ),
        })
    }

    /// Returns true when a row was removed. Likes, reposts, comments and
    /// notifications referencing the post go with it.
    pub fn delete_post(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM posts WHERE id = ?1", [id])?;
            Ok(removed > 0)
        })
    }

    // -- Likes --

    /// Toggle a like: removes if present, inserts if not.
    /// Returns true when the post is now liked by `user_id`.
    pub fn toggle_like(&self, post_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
                rusqlite::params![post_id, user_id],
            )?;
            let liked = if removed == 0 {
                tx.execute(
                    "INSERT INTO post_likes (post_id, user_id, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![post_id, user_id, Utc::now()],
                )?;
                true
            } else {
                false
            };
            tx.commit()?;
            Ok(liked)
        })
    }
}

pub(crate) fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        author: summary_at(row, 5)?,
        repost_count: row.get(9)?,
        comment_count: row.get(10)?,
        likes: Vec::new(),
    })
}

fn query_post(conn: &Connection, id: i64) -> Result<Option<Post>> {
    let sql = format!("{} WHERE p.id = ?1", POST_SELECT);
    let post = conn.query_row(&sql, [id], post_from_row).optional()?;
    match post {
        Some(post) => {
            let mut posts = vec![post];
            attach_likes(conn, &mut posts)?;
            Ok(posts.pop())
        }
        None => Ok(None),
    }
}

fn query_posts(conn: &Connection, filter: &str, params: &[i64]) -> Result<Vec<Post>> {
    let sql = format!("{} {} ORDER BY p.created_at DESC, p.id DESC", POST_SELECT, filter);
    let mut stmt = conn.prepare(&sql)?;
    let mut posts = stmt
        .query_map(rusqlite::params_from_iter(params), post_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    attach_likes(conn, &mut posts)?;
    Ok(posts)
}

/// Batch-fetch likers for a set of posts (one query per [`ID_BATCH`] posts).
pub(crate) fn attach_likes(conn: &Connection, posts: &mut [Post]) -> Result<()> {
    let ids: Vec<i64> = posts.iter().map(|p| p.id).collect();
    let mut likes: HashMap<i64, Vec<i64>> = HashMap::new();

    for chunk in ids.chunks(ID_BATCH) {
        let sql = format!(
            "SELECT post_id, user_id FROM post_likes WHERE post_id IN ({}) ORDER BY created_at",
            placeholders(1, chunk.len())
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(chunk), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (post_id, user_id) = row?;
            likes.entry(post_id).or_default().push(user_id);
        }
    }
    for post in posts.iter_mut() {
        post.likes = likes.remove(&post.id).unwrap_or_default();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::queries::testing;

    #[test]
    fn create_and_fetch_with_author() {
        let db = testing::db();
        let author = testing::user(&db, "morgan");

        let post = db.create_post(author, "Hiking today").unwrap();
        assert_eq!(post.author.username, "morgan");
        assert!(post.likes.is_empty());

        let fetched = db.get_post(post.id).unwrap().unwrap();
        assert_eq!(fetched.content, "Hiking today");
        assert!(db.get_post(post.id + 100).unwrap().is_none());
    }

    #[test]
    fn liking_twice_returns_to_unliked() {
        let db = testing::db();
        let author = testing::user(&db, "author");
        let fan = testing::user(&db, "fan");
        let post = db.create_post(author, "like me").unwrap();

        assert!(db.toggle_like(post.id, fan).unwrap());
        assert_eq!(db.get_post(post.id).unwrap().unwrap().likes, vec![fan]);

        assert!(!db.toggle_like(post.id, fan).unwrap());
        assert!(db.get_post(post.id).unwrap().unwrap().likes.is_empty());
    }

    #[test]
    fn list_filters_by_author_and_orders_newest_first() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");
        let first = db.create_post(a, "first").unwrap();
        let second = db.create_post(b, "second").unwrap();
        let third = db.create_post(a, "third").unwrap();

        let all: Vec<i64> = db.list_posts(None).unwrap().iter().map(|p| p.id).collect();
        assert_eq!(all, vec![third.id, second.id, first.id]);

        let c = testing::user(&db, "c");
        assert!(db.list_posts(Some(c)).unwrap().is_empty());

        db.follow(c, a).unwrap();
        let followed: Vec<i64> = db.list_posts(Some(c)).unwrap().iter().map(|p| p.id).collect();
        assert_eq!(followed, vec![third.id, first.id]);
    }

    #[test]
    fn delete_cascades_to_likes_and_reposts() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");
        let post = db.create_post(a, "gone soon").unwrap();
        db.toggle_like(post.id, b).unwrap();
        db.toggle_repost(post.id, b).unwrap();

        assert!(db.delete_post(post.id).unwrap());
        assert!(db.get_post(post.id).unwrap().is_none());
        assert_eq!(db.repost_count(post.id).unwrap(), 0);
        assert!(db.list_reposts(None).unwrap().is_empty());
        assert!(!db.delete_post(post.id).unwrap());
    }

    #[test]
    fn feed_reads_survive_more_posts_than_sqlite_parameters() {
        let db = testing::db();
        let author = testing::user(&db, "prolific");
        let fan = testing::user(&db, "fan");
        let total: i64 = 33_000;

        db.with_conn(|conn| {
            conn.execute(
                "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < ?2)
                 INSERT INTO posts (user_id, content, created_at, updated_at)
                 SELECT ?1, 'bulk ' || i, ?3, ?3 FROM n",
                rusqlite::params![author, total, chrono::Utc::now()],
            )?;
            Ok(())
        })
        .unwrap();
        let first = db.list_posts(None).unwrap().last().unwrap().id;
        db.toggle_like(first, fan).unwrap();

        let all = db.list_posts(None).unwrap();
        assert_eq!(all.len() as i64, total);
        let liked = all.iter().find(|p| p.id == first).unwrap();
        assert_eq!(liked.likes, vec![fan]);

        db.follow(fan, author).unwrap();
        assert_eq!(db.list_posts(Some(fan)).unwrap().len() as i64, total);
    }
}
