//! SQLite-backed [`HistoryStore`].

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::MutexGuard;

use super::{ChatPartner, HistoryError, HistoryStore, Message, MessageStatus, NewMessage, UserProfile};
use crate::db::DbPool;

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, text, attachment, status, created_at";
const USER_COLUMNS: &str = "id, full_name, email, profile_pic, created_at";

#[derive(Clone)]
pub struct SqliteHistory {
    db: DbPool,
}

impl SqliteHistory {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, HistoryError> {
        self.db.lock().map_err(|_| HistoryError::Lock)
    }
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let status: String = row.get(5)?;
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        text: row.get(3)?,
        attachment: row.get(4)?,
        status: MessageStatus::parse(&status).unwrap_or(MessageStatus::Sent),
        created_at: millis_to_utc(row.get(6)?),
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: row.get(0)?,
        full_name: row.get(1)?,
        email: row.get(2)?,
        profile_pic: row.get(3)?,
        created_at: millis_to_utc(row.get(4)?),
    })
}

fn user_exists(conn: &Connection, user_id: &str) -> Result<bool, HistoryError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

impl HistoryStore for SqliteHistory {
    fn upsert_user(&self, user: &UserProfile) -> Result<(), HistoryError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, full_name, email, profile_pic, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                full_name = excluded.full_name,
                email = excluded.email,
                profile_pic = excluded.profile_pic",
            params![
                user.id,
                user.full_name,
                user.email,
                user.profile_pic,
                user.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn user(&self, user_id: &str) -> Result<Option<UserProfile>, HistoryError> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![user_id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn contacts(&self, excluding: &str) -> Result<Vec<UserProfile>, HistoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id != ?1 ORDER BY full_name COLLATE NOCASE, id"
        ))?;
        let users = stmt
            .query_map(params![excluding], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn chat_partners(&self, user_id: &str) -> Result<Vec<ChatPartner>, HistoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT u.id, u.full_name, u.email, u.profile_pic, u.created_at,
                    MAX(m.created_at),
                    SUM(CASE WHEN m.receiver_id = ?1 AND m.status != 'read' THEN 1 ELSE 0 END),
                    MAX(m.seq) AS last_seq
             FROM messages m
             JOIN users u
               ON u.id = CASE WHEN m.sender_id = ?1 THEN m.receiver_id ELSE m.sender_id END
             WHERE m.sender_id = ?1 OR m.receiver_id = ?1
             GROUP BY u.id
             ORDER BY last_seq DESC",
        )?;
        let partners = stmt
            .query_map(params![user_id], |row| {
                let unread: i64 = row.get(6)?;
                Ok(ChatPartner {
                    user: user_from_row(row)?,
                    last_message_at: millis_to_utc(row.get(5)?),
                    unread_count: unread.max(0) as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(partners)
    }

    fn conversation(
        &self,
        user_a: &str,
        user_b: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Message>, HistoryError> {
        let conn = self.conn()?;

        let before_seq = match before {
            Some(message_id) => {
                let seq: Option<i64> = conn
                    .query_row(
                        "SELECT seq FROM messages WHERE id = ?1",
                        params![message_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                match seq {
                    Some(seq) => seq,
                    // Unknown cursor: nothing is older than it
                    None => return Ok(Vec::new()),
                }
            }
            None => i64::MAX,
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE ((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))
               AND seq < ?3
             ORDER BY seq DESC
             LIMIT ?4"
        ))?;
        let mut messages = stmt
            .query_map(
                params![user_a, user_b, before_seq, limit as i64],
                message_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    fn insert_message(&self, message: NewMessage) -> Result<Message, HistoryError> {
        let conn = self.conn()?;

        if !user_exists(&conn, &message.sender_id)? {
            return Err(HistoryError::UnknownUser(message.sender_id));
        }
        if !user_exists(&conn, &message.receiver_id)? {
            return Err(HistoryError::UnknownUser(message.receiver_id));
        }

        let id = uuid::Uuid::now_v7().to_string();
        let created_at = Utc::now().timestamp_millis();

        conn.execute(
            "INSERT INTO messages (id, sender_id, receiver_id, text, attachment, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'sent', ?6)",
            params![
                id,
                message.sender_id,
                message.receiver_id,
                message.text,
                message.attachment,
                created_at,
            ],
        )?;

        Ok(Message {
            id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            text: message.text,
            attachment: message.attachment,
            created_at: millis_to_utc(created_at),
            status: MessageStatus::Sent,
        })
    }

    fn mark_delivered(&self, message_id: &str, receiver_id: &str) -> Result<bool, HistoryError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE messages SET status = 'delivered'
             WHERE id = ?1 AND receiver_id = ?2 AND status = 'sent'",
            params![message_id, receiver_id],
        )?;
        Ok(changed > 0)
    }

    fn mark_read(
        &self,
        receiver_id: &str,
        sender_id: &str,
        message_ids: Option<&[String]>,
    ) -> Result<Vec<String>, HistoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let changed = match message_ids {
            Some(ids) => {
                let mut stmt = tx.prepare(
                    "UPDATE messages SET status = 'read'
                     WHERE id = ?1 AND receiver_id = ?2 AND sender_id = ?3 AND status != 'read'",
                )?;
                let mut changed = Vec::new();
                for id in ids {
                    if stmt.execute(params![id, receiver_id, sender_id])? > 0 {
                        changed.push(id.clone());
                    }
                }
                changed
            }
            None => {
                let ids = {
                    let mut stmt = tx.prepare(
                        "SELECT id FROM messages
                         WHERE receiver_id = ?1 AND sender_id = ?2 AND status != 'read'
                         ORDER BY seq",
                    )?;
                    let ids = stmt
                        .query_map(params![receiver_id, sender_id], |row| row.get::<_, String>(0))?
                        .collect::<Result<Vec<_>, _>>()?;
                    ids
                };
                tx.execute(
                    "UPDATE messages SET status = 'read'
                     WHERE receiver_id = ?1 AND sender_id = ?2 AND status != 'read'",
                    params![receiver_id, sender_id],
                )?;
                ids
            }
        };

        tx.commit()?;
        Ok(changed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::init_memory_db;

    pub(crate) fn profile(id: &str, name: &str) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            full_name: name.to_string(),
            email: format!("{}@example.com", id),
            profile_pic: None,
            created_at: Utc::now(),
        }
    }

    /// Store seeded with alice, bob and carol.
    pub(crate) fn seeded_store() -> SqliteHistory {
        let store = SqliteHistory::new(init_memory_db().expect("memory db"));
        for (id, name) in [("alice", "Alice"), ("bob", "Bob"), ("carol", "Carol")] {
            store.upsert_user(&profile(id, name)).unwrap();
        }
        store
    }

    fn text(sender: &str, receiver: &str, body: &str) -> NewMessage {
        NewMessage {
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            text: Some(body.to_string()),
            attachment: None,
        }
    }

    #[test]
    fn test_insert_assigns_id_and_sent_status() {
        let store = seeded_store();
        let msg = store.insert_message(text("alice", "bob", "hi")).unwrap();
        assert!(!msg.id.is_empty());
        assert_eq!(msg.status, MessageStatus::Sent);

        let history = store.conversation("bob", "alice", None, 50).unwrap();
        assert_eq!(history, vec![msg]);
    }

    #[test]
    fn test_insert_unknown_receiver_fails() {
        let store = seeded_store();
        let err = store.insert_message(text("alice", "mallory", "hi")).unwrap_err();
        assert!(matches!(err, HistoryError::UnknownUser(id) if id == "mallory"));
    }

    #[test]
    fn test_conversation_pagination_oldest_first() {
        let store = seeded_store();
        let ids: Vec<String> = (0..5)
            .map(|i| store.insert_message(text("alice", "bob", &format!("m{}", i))).unwrap().id)
            .collect();
        store.insert_message(text("alice", "carol", "elsewhere")).unwrap();

        let page = store.conversation("alice", "bob", None, 2).unwrap();
        assert_eq!(page.iter().map(|m| m.id.clone()).collect::<Vec<_>>(), ids[3..].to_vec());

        let older = store.conversation("alice", "bob", Some(&ids[3]), 10).unwrap();
        assert_eq!(older.iter().map(|m| m.id.clone()).collect::<Vec<_>>(), ids[..3].to_vec());

        assert!(store.conversation("alice", "bob", Some("nope"), 10).unwrap().is_empty());
    }

    #[test]
    fn test_mark_delivered_is_forward_only() {
        let store = seeded_store();
        let msg = store.insert_message(text("alice", "bob", "hi")).unwrap();

        // Only the recipient can acknowledge
        assert!(!store.mark_delivered(&msg.id, "alice").unwrap());
        assert!(store.mark_delivered(&msg.id, "bob").unwrap());
        assert!(!store.mark_delivered(&msg.id, "bob").unwrap());

        store.mark_read("bob", "alice", None).unwrap();
        assert!(!store.mark_delivered(&msg.id, "bob").unwrap());
        let history = store.conversation("alice", "bob", None, 10).unwrap();
        assert_eq!(history[0].status, MessageStatus::Read);
    }

    #[test]
    fn test_mark_read_is_idempotent_and_scoped() {
        let store = seeded_store();
        let a1 = store.insert_message(text("alice", "bob", "1")).unwrap();
        let a2 = store.insert_message(text("alice", "bob", "2")).unwrap();
        let b1 = store.insert_message(text("bob", "alice", "reply")).unwrap();

        // bob cannot mark his own outgoing message read on alice's behalf
        let ids = vec![a1.id.clone(), b1.id.clone()];
        let changed = store.mark_read("bob", "alice", Some(&ids)).unwrap();
        assert_eq!(changed, vec![a1.id.clone()]);

        let changed = store.mark_read("bob", "alice", None).unwrap();
        assert_eq!(changed, vec![a2.id.clone()]);

        assert!(store.mark_read("bob", "alice", None).unwrap().is_empty());
        assert!(store.mark_read("bob", "alice", Some(&ids)).unwrap().is_empty());

        let history = store.conversation("alice", "bob", None, 10).unwrap();
        let status_of = |id: &str| history.iter().find(|m| m.id == id).unwrap().status;
        assert_eq!(status_of(&a1.id), MessageStatus::Read);
        assert_eq!(status_of(&a2.id), MessageStatus::Read);
        assert_eq!(status_of(&b1.id), MessageStatus::Sent);
    }

    #[test]
    fn test_chat_partners_most_recent_first() {
        let store = seeded_store();
        store.insert_message(text("alice", "bob", "first")).unwrap();
        store.insert_message(text("carol", "alice", "second")).unwrap();
        store.insert_message(text("carol", "alice", "third")).unwrap();

        let partners = store.chat_partners("alice").unwrap();
        let ids: Vec<&str> = partners.iter().map(|p| p.user.id.as_str()).collect();
        assert_eq!(ids, vec!["carol", "bob"]);
        assert_eq!(partners[0].unread_count, 2);
        assert_eq!(partners[1].unread_count, 0);

        store.insert_message(text("bob", "alice", "latest")).unwrap();
        let partners = store.chat_partners("alice").unwrap();
        assert_eq!(partners[0].user.id, "bob");
    }

    #[test]
    fn test_contacts_exclude_caller() {
        let store = seeded_store();
        let contacts = store.contacts("bob").unwrap();
        let ids: Vec<&str> = contacts.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "carol"]);
        assert!(store.user("bob").unwrap().is_some());
        assert!(store.user("mallory").unwrap().is_none());
    }
}
