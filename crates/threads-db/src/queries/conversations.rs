use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, Row};
use threads_types::models::{Conversation, Message, NotificationKind};

use super::OptionalExt;
use crate::Database;
use crate::models::summary_at;

const CONVERSATION_SELECT: &str = "
    SELECT c.id, c.user1_id, c.user2_id, c.created_at, c.updated_at,
           u1.id, u1.username, u1.profile_picture, u1.bio,
           u2.id, u2.username, u2.profile_picture, u2.bio
    FROM conversations c
    JOIN users u1 ON u1.id = c.user1_id
    JOIN users u2 ON u2.id = c.user2_id";

const MESSAGE_SELECT: &str = "
    SELECT m.id, m.conversation_id, m.sender_id, m.content, m.created_at,
           u.id, u.username, u.profile_picture, u.bio
    FROM messages m
    JOIN users u ON u.id = m.sender_id";

impl Database {
    // -- Conversations --

    /// Reuse the two-party conversation in either direction, or open one with
    /// `initiator` as `user1`. Returned as seen by `initiator`.
    pub fn find_or_create_conversation(&self, initiator: i64, other: i64) -> Result<Conversation> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM conversations
                     WHERE (user1_id = ?1 AND user2_id = ?2) OR (user1_id = ?2 AND user2_id = ?1)
                     ORDER BY id LIMIT 1",
                    rusqlite::params![initiator, other],
                    |row| row.get(0),
                )
                .optional()?;

            let id = match existing {
                Some(id) => id,
                None => {
                    let now = Utc::now();
                    tx.execute(
                        "INSERT INTO conversations (user1_id, user2_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                        rusqlite::params![initiator, other, now],
                    )?;
                    tx.last_insert_rowid()
                }
            };
            tx.commit()?;

            query_conversation(conn, id, initiator)?
                .ok_or_else(|| anyhow::anyhow!("Conversation {} vanished after insert", id))
        })
    }

    pub fn get_conversation(&self, id: i64, viewer_id: i64) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation(conn, id, viewer_id))
    }

    /// Conversations `user_id` takes part in, most recently active first.
    pub fn list_conversations(&self, user_id: i64) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE c.user1_id = ?1 OR c.user2_id = ?1 ORDER BY c.updated_at DESC, c.id DESC",
                CONVERSATION_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map([user_id], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for conversation in rows.iter_mut() {
                hydrate(conn, conversation, user_id)?;
            }
            Ok(rows)
        })
    }

    // -- Messages --

    /// Store a message and bump the conversation's activity time.
    pub fn insert_message(&self, conversation_id: i64, sender_id: i64, content: &str) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            tx.execute(
                "INSERT INTO messages (conversation_id, sender_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![conversation_id, sender_id, content, now],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                rusqlite::params![conversation_id, now],
            )?;
            tx.commit()?;

            let sql = format!("{} WHERE m.id = ?1", MESSAGE_SELECT);
            conn.query_row(&sql, [id], message_from_row)
                .optional()?
                .ok_or_else(|| anyhow::anyhow!("Message {} vanished after insert", id))
        })
    }

    /// Oldest first.
    pub fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE m.conversation_id = ?1 ORDER BY m.created_at ASC, m.id ASC",
                MESSAGE_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([conversation_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        user1_id: row.get(1)?,
        user2_id: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        user1: summary_at(row, 5)?,
        user2: summary_at(row, 9)?,
        last_message: None,
        unread_count: 0,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        sender: summary_at(row, 5)?,
    })
}

fn query_conversation(conn: &Connection, id: i64, viewer_id: i64) -> Result<Option<Conversation>> {
    let sql = format!("{} WHERE c.id = ?1", CONVERSATION_SELECT);
    let conversation = conn.query_row(&sql, [id], conversation_from_row).optional()?;
    match conversation {
        Some(mut conversation) => {
            hydrate(conn, &mut conversation, viewer_id)?;
            Ok(Some(conversation))
        }
        None => Ok(None),
    }
}

/// Fill in the last message and the viewer's unread chat notifications.
fn hydrate(conn: &Connection, conversation: &mut Conversation, viewer_id: i64) -> Result<()> {
    let sql = format!(
        "{} WHERE m.conversation_id = ?1 ORDER BY m.created_at DESC, m.id DESC LIMIT 1",
        MESSAGE_SELECT
    );
    conversation.last_message = conn
        .prepare_cached(&sql)?
        .query_row([conversation.id], message_from_row)
        .optional()?;

    if conversation.has_participant(viewer_id) {
        let other = conversation.other_participant(viewer_id);
        conversation.unread_count = conn.prepare_cached(
            "SELECT COUNT(*) FROM notifications
             WHERE recipient_id = ?1 AND sender_id = ?2 AND kind = ?3 AND read = 0",
        )?
        .query_row(
            rusqlite::params![viewer_id, other, NotificationKind::Message.as_str()],
            |row| row.get(0),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use threads_types::models::NotificationKind;

    use crate::models::NewNotification;
    use crate::queries::testing;

    #[test]
    fn conversation_is_reused_in_either_direction() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");

        let first = db.find_or_create_conversation(a, b).unwrap();
        assert_eq!((first.user1_id, first.user2_id), (a, b));
        assert_eq!(first.user2.username, "b");

        let again = db.find_or_create_conversation(b, a).unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(db.list_conversations(a).unwrap().len(), 1);
    }

    #[test]
    fn messages_bump_activity_and_show_as_last_message() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");
        let c = testing::user(&db, "c");
        let ab = db.find_or_create_conversation(a, b).unwrap();
        let ac = db.find_or_create_conversation(a, c).unwrap();

        db.insert_message(ab.id, b, "hi a").unwrap();
        let reply = db.insert_message(ab.id, a, "hi b").unwrap();
        assert_eq!(reply.sender.username, "a");

        let listed = db.list_conversations(a).unwrap();
        assert_eq!(listed.iter().map(|c| c.id).collect::<Vec<_>>(), vec![ab.id, ac.id]);
        assert_eq!(listed[0].last_message.as_ref().map(|m| m.id), Some(reply.id));
        assert!(listed[1].last_message.is_none());

        let contents: Vec<String> =
            db.list_messages(ab.id).unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["hi a", "hi b"]);
    }

    #[test]
    fn unread_count_follows_chat_notifications() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");
        let conversation = db.find_or_create_conversation(a, b).unwrap();
        db.create_notification(&NewNotification {
            recipient_id: a,
            sender_id: b,
            kind: NotificationKind::Message,
            post_id: None,
            content: Some("ping".into()),
        })
        .unwrap();

        assert_eq!(db.get_conversation(conversation.id, a).unwrap().unwrap().unread_count, 1);
        assert_eq!(db.get_conversation(conversation.id, b).unwrap().unwrap().unread_count, 0);

        db.mark_messages_read(a, b).unwrap();
        assert_eq!(db.get_conversation(conversation.id, a).unwrap().unwrap().unread_count, 0);
    }
}
