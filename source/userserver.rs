// Per-user long-lived worker (spec.md §4.5): owns all `Mailbox` objects for one user, the user's
// `rusqlite` database, and the background scanner threads. Modeled as a Rust-level object rather
// than an OS process -- see SPEC_FULL.md §9's "process-per-user vs thread-per-user" note.

use crate::db::Database;
use crate::mailbox::Mailbox;
use crate::mailstore::Builder as MailstoreBuilder;
use anyhow::Context as _;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct UserServer {
  pub username: String,
  pub maildir_root: PathBuf,
  mailstore: MailstoreBuilder,
  db: Arc<Mutex<Database>>,
  mailboxes: Mutex<HashMap<String, Arc<Mailbox>>>,
  connections: AtomicI64,
  last_activity: AtomicI64,
}

/// Worker registry shared across every connection (spec.md §2 item 4, §4.6 point 3): a second
/// connection from a user already running a `UserServer` reuses it instead of racing an
/// independent `Mailbox` cache and notification set against the same on-disk mailbox.
pub type UserRegistry = Arc<Mutex<HashMap<String, Arc<UserServer>>>>;

pub fn new_registry() -> UserRegistry {
  Arc::new(Mutex::new(HashMap::new()))
}

fn unix_now() -> i64 {
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

impl UserServer {
  pub fn open(username: String, maildir_root: PathBuf, db_path: &std::path::Path) -> anyhow::Result<Self> {
    let mailstore = MailstoreBuilder::new(&maildir_root).with_context(|| format!("opening mailstore at {maildir_root:?}"))?;
    let db = Database::open(db_path)?;
    Ok(Self {
      username,
      maildir_root,
      mailstore,
      db: Arc::new(Mutex::new(db)),
      mailboxes: Mutex::new(HashMap::new()),
      connections: AtomicI64::new(0),
      last_activity: AtomicI64::new(unix_now()),
    })
  }

  /// Looks up the already-running worker for `username`, opening and registering one if this is
  /// its first connection.
  pub fn get_or_open(registry: &UserRegistry, username: String, maildir_root: PathBuf, db_path: &std::path::Path) -> anyhow::Result<Arc<Self>> {
    let mut servers = registry.lock().unwrap();
    if let Some(existing) = servers.get(&username) {
      existing.connection_opened();
      return Ok(existing.clone());
    }
    let server = Arc::new(Self::open(username.clone(), maildir_root, db_path)?);
    server.connection_opened();
    servers.insert(username, server.clone());
    Ok(server)
  }

  #[cfg(test)]
  pub fn open_in_memory(username: String, maildir_root: PathBuf) -> anyhow::Result<Self> {
    let mailstore = MailstoreBuilder::new(&maildir_root)?;
    let db = Database::open_in_memory()?;
    Ok(Self {
      username,
      maildir_root,
      mailstore,
      db: Arc::new(Mutex::new(db)),
      mailboxes: Mutex::new(HashMap::new()),
      connections: AtomicI64::new(0),
      last_activity: AtomicI64::new(unix_now()),
    })
  }

  pub fn touch(&self) {
    self.last_activity.store(unix_now(), Ordering::Relaxed);
  }

  pub fn connection_opened(&self) {
    self.connections.fetch_add(1, Ordering::SeqCst);
    self.touch();
  }

  pub fn connection_closed(&self) {
    self.connections.fetch_sub(1, Ordering::SeqCst);
    self.touch();
  }

  /// Worker self-termination rule (spec.md §4.6): 30 minutes with zero connections.
  pub fn idle_past(&self, seconds: i64) -> bool {
    self.connections.load(Ordering::SeqCst) <= 0 && unix_now() - self.last_activity.load(Ordering::Relaxed) > seconds
  }

  pub fn mailbox(self: &Arc<Self>, name: &str) -> anyhow::Result<Arc<Mailbox>> {
    let mut mailboxes = self.mailboxes.lock().unwrap();
    if let Some(existing) = mailboxes.get(name) {
      existing.resync(false)?;
      return Ok(existing.clone());
    }
    let folder = self.mailstore.folder(name, false)?;
    let (uidvalidity, next_uid, mailbox_id) = {
      let mut db = self.db.lock().unwrap();
      match db.get_mailbox(name)? {
        Some(row) => (row.uidvalidity, row.next_uid, row.id),
        None => {
          let uidvalidity = unix_now() as u32;
          let next_uid = 1;
          let id = db.upsert_mailbox(name, uidvalidity, next_uid, &[], unix_now())?;
          (uidvalidity, next_uid, id)
        }
      }
    };
    let mailbox = Arc::new(Mailbox::open(name.to_string(), folder, uidvalidity, next_uid, self.db.clone(), mailbox_id)?);
    mailboxes.insert(name.to_string(), mailbox.clone());
    Ok(mailbox)
  }

  pub fn create_mailbox(&self, name: &str) -> anyhow::Result<()> {
    self.mailstore.folder(name, true)?;
    Ok(())
  }

  pub fn delete_mailbox(self: &Arc<Self>, name: &str) -> anyhow::Result<()> {
    let folder = self.mailstore.folder(name, false)?;
    folder.remove()?;
    self.mailboxes.lock().unwrap().remove(name);
    Ok(())
  }

  pub fn rename_mailbox(self: &Arc<Self>, from: &str, to: &str) -> anyhow::Result<()> {
    let source = self.mailstore.folder(from, false)?;
    let destination = self.mailstore.folder(to, false)?;
    source.rename_to(&destination)?;
    self.mailboxes.lock().unwrap().remove(from);
    Ok(())
  }

  pub fn list_folders(&self) -> anyhow::Result<Vec<String>> {
    self.mailstore.list_folders().context("enumerating mailbox folders")
  }

  pub fn subscribe(&self, name: &str) -> anyhow::Result<()> {
    self.db.lock().unwrap().subscribe(name)
  }

  pub fn unsubscribe(&self, name: &str) -> anyhow::Result<()> {
    self.db.lock().unwrap().unsubscribe(name)
  }

  pub fn subscriptions(&self) -> anyhow::Result<Vec<String>> {
    self.db.lock().unwrap().subscriptions()
  }

  /// "Find new folders" background sweep (spec.md §4.3): register any on-disk folder not yet
  /// known. Returns the newly discovered folder names so the caller can fire LIST notifications.
  pub fn scan_for_new_folders(self: &Arc<Self>) -> anyhow::Result<Vec<String>> {
    let known: Vec<String> = self.mailboxes.lock().unwrap().keys().cloned().collect();
    let mut discovered = Vec::new();
    for name in self.list_folders()? {
      if !known.contains(&name) {
        self.mailbox(&name)?;
        discovered.push(name);
      }
    }
    Ok(discovered)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mailbox_is_created_on_demand_and_cached() {
    let dir = tempfile::tempdir().unwrap();
    let server = Arc::new(UserServer::open_in_memory("fred".into(), dir.path().to_path_buf()).unwrap());
    server.create_mailbox("Archive").unwrap();
    let first = server.mailbox("Archive").unwrap();
    let second = server.mailbox("Archive").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
  }

  #[test]
  fn idle_past_is_false_with_open_connections() {
    let dir = tempfile::tempdir().unwrap();
    let server = UserServer::open_in_memory("fred".into(), dir.path().to_path_buf()).unwrap();
    server.connection_opened();
    assert!(!server.idle_past(0));
  }

  #[test]
  fn subscriptions_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let server = UserServer::open_in_memory("fred".into(), dir.path().to_path_buf()).unwrap();
    server.subscribe("INBOX").unwrap();
    assert_eq!(server.subscriptions().unwrap(), vec!["INBOX".to_string()]);
    server.unsubscribe("INBOX").unwrap();
    assert!(server.subscriptions().unwrap().is_empty());
  }
}
