use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, Row};
use threads_types::models::{Notification, NotificationKind, PostPreview, SenderPreview};

use super::OptionalExt;
use crate::Database;
use crate::models::NewNotification;

const NOTIFICATION_SELECT: &str = "
    SELECT n.id, n.recipient_id, n.sender_id, n.kind, n.post_id, n.content, n.read, n.created_at,
           s.id, s.username, s.profile_picture,
           p.id, p.content
    FROM notifications n
    LEFT JOIN users s ON s.id = n.sender_id
    LEFT JOIN posts p ON p.id = n.post_id";

impl Database {
    // -- Notifications --

    /// Insert and return the hydrated notification.
    pub fn create_notification(&self, new: &NewNotification) -> Result<Notification> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (recipient_id, sender_id, kind, post_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    new.recipient_id,
                    new.sender_id,
                    new.kind.as_str(),
                    new.post_id,
                    new.content,
                    Utc::now()
                ],
            )?;
            let id = conn.last_insert_rowid();
            query_notification(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("Notification {} vanished after insert", id))
        })
    }

    /// Newest first, at most `limit`.
    pub fn list_notifications(&self, recipient_id: i64, limit: u32) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE n.recipient_id = ?1 ORDER BY n.created_at DESC, n.id DESC LIMIT ?2",
                NOTIFICATION_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![recipient_id, limit], notification_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Marks one notification read, scoped to its recipient.
    /// Returns `None` when it does not exist or belongs to someone else.
    pub fn mark_notification_read(&self, id: i64, recipient_id: i64) -> Result<Option<Notification>> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND recipient_id = ?2",
                rusqlite::params![id, recipient_id],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            query_notification(conn, id)
        })
    }

    pub fn mark_all_notifications_read(&self, recipient_id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE notifications SET read = 1 WHERE recipient_id = ?1 AND read = 0",
                [recipient_id],
            )?;
            Ok(updated)
        })
    }

    /// Marks the unread chat notifications `sender_id` sent to `recipient_id`.
    pub fn mark_messages_read(&self, recipient_id: i64, sender_id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE notifications SET read = 1
                 WHERE recipient_id = ?1 AND sender_id = ?2 AND kind = ?3 AND read = 0",
                rusqlite::params![recipient_id, sender_id, NotificationKind::Message.as_str()],
            )?;
            Ok(updated)
        })
    }
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let kind: String = row.get(3)?;
    let kind = kind.parse::<NotificationKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;

    let sender_id: Option<i64> = row.get(8)?;
    let sender = match sender_id {
        Some(id) => Some(SenderPreview {
            id,
            username: row.get(9)?,
            profile_picture: row.get(10)?,
        }),
        None => None,
    };

    let post_id: Option<i64> = row.get(11)?;
    let post = match post_id {
        Some(id) => Some(PostPreview {
            id,
            content: row.get(12)?,
        }),
        None => None,
    };

    Ok(Notification {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        sender_id: row.get(2)?,
        kind,
        post_id: row.get(4)?,
        content: row.get(5)?,
        read: row.get(6)?,
        created_at: row.get(7)?,
        sender,
        post,
    })
}

fn query_notification(conn: &Connection, id: i64) -> Result<Option<Notification>> {
    let sql = format!("{} WHERE n.id = ?1", NOTIFICATION_SELECT);
    conn.query_row(&sql, [id], notification_from_row).optional()
}

#[cfg(test)]
mod tests {
    use threads_types::models::NotificationKind;

    use crate::models::NewNotification;
    use crate::queries::testing;

    fn notify(kind: NotificationKind, recipient: i64, sender: i64, post: Option<i64>) -> NewNotification {
        NewNotification {
            recipient_id: recipient,
            sender_id: sender,
            kind,
            post_id: post,
            content: None,
        }
    }

    #[test]
    fn created_notification_is_hydrated() {
        let db = testing::db();
        let author = testing::user(&db, "author");
        let fan = testing::user(&db, "fan");
        let post = db.create_post(author, "nice post").unwrap();

        let n = db
            .create_notification(&notify(NotificationKind::Like, author, fan, Some(post.id)))
            .unwrap();
        assert_eq!(n.kind, NotificationKind::Like);
        assert!(!n.read);
        assert_eq!(n.sender.as_ref().map(|s| s.username.as_str()), Some("fan"));
        assert_eq!(n.post.as_ref().map(|p| p.content.as_str()), Some("nice post"));

        let follow = db
            .create_notification(&notify(NotificationKind::Follow, author, fan, None))
            .unwrap();
        assert!(follow.post.is_none());
    }

    #[test]
    fn mark_read_is_scoped_to_recipient() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");
        let n = db.create_notification(&notify(NotificationKind::Follow, a, b, None)).unwrap();

        assert!(db.mark_notification_read(n.id, b).unwrap().is_none());
        let read = db.mark_notification_read(n.id, a).unwrap().unwrap();
        assert!(read.read);
    }

    #[test]
    fn list_is_newest_first_and_limited() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");
        let ids: Vec<i64> = (0..3)
            .map(|_| db.create_notification(&notify(NotificationKind::Follow, a, b, None)).unwrap().id)
            .collect();

        let listed: Vec<i64> = db.list_notifications(a, 2).unwrap().iter().map(|n| n.id).collect();
        assert_eq!(listed, vec![ids[2], ids[1]]);
        assert!(db.list_notifications(b, 50).unwrap().is_empty());

        assert_eq!(db.mark_all_notifications_read(a).unwrap(), 3);
        assert_eq!(db.mark_all_notifications_read(a).unwrap(), 0);
    }

    #[test]
    fn message_read_marker_only_touches_chat_from_that_sender() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");
        let c = testing::user(&db, "c");
        db.create_notification(&notify(NotificationKind::Message, a, b, None)).unwrap();
        db.create_notification(&notify(NotificationKind::Message, a, c, None)).unwrap();
        db.create_notification(&notify(NotificationKind::Follow, a, b, None)).unwrap();

        assert_eq!(db.mark_messages_read(a, b).unwrap(), 1);
        let unread = db.list_notifications(a, 50).unwrap().into_iter().filter(|n| !n.read).count();
        assert_eq!(unread, 2);
    }

    #[test]
    fn deleting_a_post_removes_its_notifications() {
        let db = testing::db();
        let author = testing::user(&db, "author");
        let fan = testing::user(&db, "fan");
        let post = db.create_post(author, "short lived").unwrap();
        db.create_notification(&notify(NotificationKind::Repost, author, fan, Some(post.id)))
            .unwrap();

        db.delete_post(post.id).unwrap();
        assert!(db.list_notifications(author, 50).unwrap().is_empty());
    }
}
