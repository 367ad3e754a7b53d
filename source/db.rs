// Per-user embedded database (spec.md §4.5, schema pinned down in SPEC_FULL.md §3). One
// `rusqlite::Connection` per `UserServer`, opened once and wrapped behind a `Mutex` so the
// background resync thread and client-serving threads can share it -- the same "one FFI handle,
// serialize access" shape the teacher uses for its `notmuch` database handle, minus the
// hand-rolled bindgen bindings.

use anyhow::Context as _;
use rusqlite::{params, Connection};
use std::path::Path;

pub struct Database {
  conn: Connection,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS mailboxes (
  id            INTEGER PRIMARY KEY,
  path          TEXT NOT NULL UNIQUE,
  uidvalidity   INTEGER NOT NULL,
  next_uid      INTEGER NOT NULL,
  attrs         TEXT NOT NULL,
  last_resync   INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS uids (
  mailbox_id    INTEGER NOT NULL REFERENCES mailboxes(id),
  uid           INTEGER NOT NULL,
  msg_key       INTEGER NOT NULL,
  size          INTEGER NOT NULL,
  internal_date INTEGER NOT NULL,
  PRIMARY KEY (mailbox_id, uid)
);
CREATE TABLE IF NOT EXISTS subscriptions (
  path          TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS sequences (
  mailbox_id    INTEGER NOT NULL REFERENCES mailboxes(id),
  flag          TEXT NOT NULL,
  uid_set_blob  TEXT NOT NULL,
  PRIMARY KEY (mailbox_id, flag)
);
";

#[derive(Debug, Clone)]
pub struct MailboxRow {
  pub id: i64,
  pub path: String,
  pub uidvalidity: u32,
  pub next_uid: u32,
  pub attrs: Vec<String>,
  pub last_resync: i64,
}

impl Database {
  pub fn open(path: &Path) -> anyhow::Result<Self> {
    let conn = Connection::open(path).with_context(|| format!("opening database {path:?}"))?;
    conn.execute_batch(SCHEMA)?;
    Ok(Self { conn })
  }

  pub fn open_in_memory() -> anyhow::Result<Self> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(Self { conn })
  }

  pub fn upsert_mailbox(&self, path: &str, uidvalidity: u32, next_uid: u32, attrs: &[String], last_resync: i64) -> anyhow::Result<i64> {
    self.conn.execute(
      "INSERT INTO mailboxes (path, uidvalidity, next_uid, attrs, last_resync) VALUES (?1, ?2, ?3, ?4, ?5)
       ON CONFLICT(path) DO UPDATE SET uidvalidity = excluded.uidvalidity, next_uid = excluded.next_uid,
         attrs = excluded.attrs, last_resync = excluded.last_resync",
      params![path, uidvalidity, next_uid, attrs.join(","), last_resync],
    )?;
    let id = self.conn.query_row("SELECT id FROM mailboxes WHERE path = ?1", params![path], |row| row.get(0))?;
    Ok(id)
  }

  pub fn get_mailbox(&self, path: &str) -> anyhow::Result<Option<MailboxRow>> {
    let result = self.conn.query_row(
      "SELECT id, path, uidvalidity, next_uid, attrs, last_resync FROM mailboxes WHERE path = ?1",
      params![path],
      |row| {
        let attrs: String = row.get(4)?;
        Ok(MailboxRow {
          id: row.get(0)?,
          path: row.get(1)?,
          uidvalidity: row.get(2)?,
          next_uid: row.get(3)?,
          attrs: attrs.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect(),
          last_resync: row.get(5)?,
        })
      },
    );
    match result {
      Ok(row) => Ok(Some(row)),
      Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  pub fn replace_uids(&mut self, mailbox_id: i64, records: &[(u32, u32, u32, i64)]) -> anyhow::Result<()> {
    let tx = self.conn.transaction()?;
    tx.execute("DELETE FROM uids WHERE mailbox_id = ?1", params![mailbox_id])?;
    for (uid, msg_key, size, internal_date) in records {
      tx.execute(
        "INSERT INTO uids (mailbox_id, uid, msg_key, size, internal_date) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![mailbox_id, uid, msg_key, size, internal_date],
      )?;
    }
    tx.commit()?;
    Ok(())
  }

  pub fn set_sequence(&self, mailbox_id: i64, flag: &str, uid_set_blob: &str) -> anyhow::Result<()> {
    self.conn.execute(
      "INSERT INTO sequences (mailbox_id, flag, uid_set_blob) VALUES (?1, ?2, ?3)
       ON CONFLICT(mailbox_id, flag) DO UPDATE SET uid_set_blob = excluded.uid_set_blob",
      params![mailbox_id, flag, uid_set_blob],
    )?;
    Ok(())
  }

  pub fn subscribe(&self, path: &str) -> anyhow::Result<()> {
    self.conn.execute("INSERT OR IGNORE INTO subscriptions (path) VALUES (?1)", params![path])?;
    Ok(())
  }

  pub fn unsubscribe(&self, path: &str) -> anyhow::Result<()> {
    self.conn.execute("DELETE FROM subscriptions WHERE path = ?1", params![path])?;
    Ok(())
  }

  pub fn subscriptions(&self) -> anyhow::Result<Vec<String>> {
    let mut stmt = self.conn.prepare("SELECT path FROM subscriptions ORDER BY path")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    Ok(rows.collect::<Result<_, _>>()?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn upsert_then_get_round_trips() {
    let db = Database::open_in_memory().unwrap();
    let id = db.upsert_mailbox("INBOX", 1700000000, 1, &["\\HasNoChildren".into()], 0).unwrap();
    let row = db.get_mailbox("INBOX").unwrap().unwrap();
    assert_eq!(row.id, id);
    assert_eq!(row.uidvalidity, 1700000000);
    assert_eq!(row.attrs, vec!["\\HasNoChildren".to_string()]);
  }

  #[test]
  fn upsert_is_idempotent_on_path() {
    let db = Database::open_in_memory().unwrap();
    let id1 = db.upsert_mailbox("INBOX", 1, 1, &[], 0).unwrap();
    let id2 = db.upsert_mailbox("INBOX", 2, 5, &[], 0).unwrap();
    assert_eq!(id1, id2);
    let row = db.get_mailbox("INBOX").unwrap().unwrap();
    assert_eq!(row.uidvalidity, 2);
    assert_eq!(row.next_uid, 5);
  }

  #[test]
  fn subscriptions_are_ordered_and_deduplicated() {
    let db = Database::open_in_memory().unwrap();
    db.subscribe("b").unwrap();
    db.subscribe("a").unwrap();
    db.subscribe("a").unwrap();
    assert_eq!(db.subscriptions().unwrap(), vec!["a".to_string(), "b".to_string()]);
  }

  #[test]
  fn unsubscribe_removes_entry() {
    let db = Database::open_in_memory().unwrap();
    db.subscribe("a").unwrap();
    db.unsubscribe("a").unwrap();
    assert!(db.subscriptions().unwrap().is_empty());
  }
}
