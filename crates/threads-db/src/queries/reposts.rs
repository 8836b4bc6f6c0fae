use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use threads_types::models::{Post, Repost, UserSummary};

use super::{ID_BATCH, placeholders};
use super::posts::{POST_SELECT, attach_likes, post_from_row};
use crate::Database;
use crate::models::summary_at;

impl Database {
    // -- Reposts --

    /// Toggle a repost: removes if present, inserts if not.
    /// Returns true when the post is now reposted by `reposter_id`.
    pub fn toggle_repost(&self, post_id: i64, reposter_id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM reposts WHERE original_post_id = ?1 AND reposter_id = ?2",
                rusqlite::params![post_id, reposter_id],
            )?;
            let reposted = if removed == 0 {
                tx.execute(
                    "INSERT INTO reposts (reposter_id, original_post_id, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![reposter_id, post_id, Utc::now()],
                )?;
                true
            } else {
                false
            };
            tx.commit()?;
            Ok(reposted)
        })
    }

    pub fn has_reposted(&self, post_id: i64, reposter_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM reposts WHERE original_post_id = ?1 AND reposter_id = ?2)",
                rusqlite::params![post_id, reposter_id],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    pub fn repost_count(&self, post_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM reposts WHERE original_post_id = ?1",
                [post_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Newest first, each with its reposter and hydrated original post.
    /// `None` lists every repost, `Some(user)` only reposts made by the
    /// accounts that user follows.
    pub fn list_reposts(&self, followed_by: Option<i64>) -> Result<Vec<Repost>> {
        self.with_conn(|conn| match followed_by {
            None => query_reposts(conn, "", &[]),
            Some(follower_id) => query_reposts(
                conn,
                "WHERE r.reposter_id IN (SELECT following_id FROM follows WHERE follower_id = ?1)",
                &[follower_id],
            ),
        })
    }
}

struct RepostHead {
    id: i64,
    reposter_id: i64,
    original_post_id: i64,
    created_at: DateTime<Utc>,
    reposter: UserSummary,
}

fn query_reposts(conn: &Connection, filter: &str, params: &[i64]) -> Result<Vec<Repost>> {
    let sql = format!(
        "SELECT r.id, r.reposter_id, r.original_post_id, r.created_at,
                u.id, u.username, u.profile_picture, u.bio
         FROM reposts r
         JOIN users u ON u.id = r.reposter_id
         {}
         ORDER BY r.created_at DESC, r.id DESC",
        filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let heads = stmt
        .query_map(rusqlite::params_from_iter(params), |row| {
            Ok(RepostHead {
                id: row.get(0)?,
                reposter_id: row.get(1)?,
                original_post_id: row.get(2)?,
                created_at: row.get(3)?,
                reposter: summary_at(row, 4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut post_ids: Vec<i64> = heads.iter().map(|h| h.original_post_id).collect();
    post_ids.sort_unstable();
    post_ids.dedup();
    let posts = query_posts_by_id(conn, &post_ids)?;

    // Inner-join semantics: a repost whose post is gone is skipped.
    Ok(heads
        .into_iter()
        .filter_map(|head| {
            let original_post = posts.get(&head.original_post_id)?.clone();
            Some(Repost {
                id: head.id,
                reposter_id: head.reposter_id,
                original_post_id: head.original_post_id,
                created_at: head.created_at,
                reposter: head.reposter,
                original_post,
            })
        })
        .collect())
}

fn query_posts_by_id(conn: &Connection, ids: &[i64]) -> Result<HashMap<i64, Post>> {
    let mut posts = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(ID_BATCH) {
        let sql = format!("{} WHERE p.id IN ({})", POST_SELECT, placeholders(1, chunk.len()));
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(chunk), post_from_row)?;
        for row in rows {
            posts.push(row?);
        }
    }
    attach_likes(conn, &mut posts)?;
    Ok(posts.into_iter().map(|p| (p.id, p)).collect())
}
