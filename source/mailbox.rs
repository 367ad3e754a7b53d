// The Mailbox object: UID bookkeeping, resync protocol, and notification fan-out.
//
// Grounded on the resync model the teacher's `sync::pull`/`sync::push` implement for the client
// side of reconciling a local Maildir against a remote IMAP mailbox (search-not-uidvalidity,
// search-uids, remove_message, add-new/update-existing) -- here inverted to reconcile an
// in-memory model against the on-disk MH folder it's the server for (spec.md §4.3).

use crate::db::Database;
use crate::error::MailboxInconsistency;
use crate::mailstore::{Folder, Sequences};
use crate::wire::response::collapse_set;
use crate::wire::types::{Flag, StandardFlag};
use anyhow::Context as _;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct MessageRecord {
  pub uid: u32,
  pub key: u32,
  pub size: u32,
  pub internal_date: i64,
  pub flags: Vec<Flag>,
}

#[derive(Debug, Clone)]
pub enum Notification {
  Expunge { sequence_number: u32 },
  Exists { count: u32 },
  Recent { count: u32 },
  FetchFlags { sequence_number: u32, uid: u32, flags: Vec<Flag> },
}

#[derive(Debug)]
pub struct MailboxState {
  pub uidvalidity: u32,
  pub next_uid: u32,
  /// Ascending by UID -- sequence numbers are simply 1-based positions into this vector.
  pub messages: Vec<MessageRecord>,
  pub last_resync: Option<Instant>,
  last_dir_mtime: Option<SystemTime>,
  last_seq_mtime: Option<SystemTime>,
  last_seq_len: Option<u64>,
  subscribers: Vec<crossbeam_channel::Sender<Notification>>,
}

pub struct Mailbox {
  pub path: String,
  folder: Folder,
  state: Mutex<MailboxState>,
  db: Arc<Mutex<Database>>,
  mailbox_id: i64,
}

fn unix_now() -> u32 {
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as u32
}

impl Mailbox {
  pub fn open(path: String, folder: Folder, uidvalidity: u32, next_uid: u32, db: Arc<Mutex<Database>>, mailbox_id: i64) -> anyhow::Result<Self> {
    let state = MailboxState {
      uidvalidity,
      next_uid,
      messages: Vec::new(),
      last_resync: None,
      last_dir_mtime: None,
      last_seq_mtime: None,
      last_seq_len: None,
      subscribers: Vec::new(),
    };
    let mailbox = Self { path, folder, state: Mutex::new(state), db, mailbox_id };
    mailbox.resync(true)?;
    Ok(mailbox)
  }

  pub fn register(&self, sender: crossbeam_channel::Sender<Notification>) {
    self.state.lock().unwrap().subscribers.push(sender);
  }

  pub fn exists(&self) -> u32 {
    self.state.lock().unwrap().messages.len() as u32
  }

  pub fn uidvalidity(&self) -> u32 {
    self.state.lock().unwrap().uidvalidity
  }

  pub fn next_uid(&self) -> u32 {
    self.state.lock().unwrap().next_uid
  }

  pub fn snapshot(&self) -> Vec<MessageRecord> {
    self.state.lock().unwrap().messages.clone()
  }

  pub fn sequence_number_of(&self, uid: u32) -> Option<u32> {
    let state = self.state.lock().unwrap();
    state.messages.iter().position(|m| m.uid == uid).map(|i| i as u32 + 1)
  }

  /// Per-mailbox resync (spec.md §4.3): compares directory + `.mh_sequences` mtime/size against
  /// last-observed values; a no-op if nothing changed unless `force`.
  pub fn resync(&self, force: bool) -> anyhow::Result<()> {
    let dir_meta = self.folder.metadata().context("stat mailbox directory")?;
    let dir_mtime = dir_meta.modified().ok();
    let seq_meta = self.folder.sequences_metadata()?;
    let seq_mtime = seq_meta.as_ref().and_then(|m| m.modified().ok());
    let seq_len = seq_meta.as_ref().map(|m| m.len());

    let mut state = self.state.lock().unwrap();
    if !force && state.last_dir_mtime == dir_mtime && state.last_seq_mtime == seq_mtime && state.last_seq_len == seq_len {
      return Ok(());
    }

    let keys = self.folder.message_keys().context("listing mailbox directory")?;
    let sequences = self.folder.read_sequences().context("reading .mh_sequences")?;

    let mut by_key: BTreeMap<u32, &MessageRecord> = BTreeMap::new();
    for record in &state.messages {
      by_key.insert(record.key, record);
    }

    let mut vanished = Vec::new();
    for record in &state.messages {
      if !keys.contains(&record.key) {
        vanished.push(record.uid);
      }
    }

    let mut rebuilt = Vec::new();
    let mut next_uid = state.next_uid;
    for &key in &keys {
      if let Some(existing) = by_key.get(&key) {
        rebuilt.push((*existing).clone());
      } else {
        let uid = next_uid;
        next_uid += 1;
        let size = self.folder.read_message(key).map(|b| b.len() as u32).unwrap_or(0);
        rebuilt.push(MessageRecord { uid, key, size, internal_date: unix_now() as i64, flags: vec![Flag::Standard(StandardFlag::Recent)] });
      }
    }
    rebuilt.sort_by_key(|r| r.uid);

    for record in &mut rebuilt {
      record.flags = flags_from_sequences(&sequences, record.key, &record.flags);
    }

    let expunged_sequence_numbers: Vec<u32> = vanished
      .iter()
      .filter_map(|uid| state.messages.iter().position(|r| r.uid == *uid).map(|i| i as u32 + 1))
      .collect();
    let mut descending = expunged_sequence_numbers.clone();
    descending.sort_unstable_by(|a, b| b.cmp(a));

    state.messages = rebuilt;
    state.next_uid = next_uid;
    state.last_dir_mtime = dir_mtime;
    state.last_seq_mtime = seq_mtime;
    state.last_seq_len = seq_len;
    state.last_resync = Some(Instant::now());
    self.persist(&state).context("persisting resync to the per-user database")?;

    for sequence_number in descending {
      notify(&state.subscribers, Notification::Expunge { sequence_number });
    }
    let exists = state.messages.len() as u32;
    notify(&state.subscribers, Notification::Exists { count: exists });
    let recent = state.messages.iter().filter(|m| m.flags.contains(&Flag::Standard(StandardFlag::Recent))).count() as u32;
    notify(&state.subscribers, Notification::Recent { count: recent });

    Ok(())
  }

  /// `\Recent` is reported at most once (Data Model invariant 4): after a `SELECT`/`EXAMINE` has
  /// told its client how many messages are recent, the flag is cleared so a later select -- by
  /// this session or another -- doesn't report the same messages again.
  pub fn clear_recent(&self) -> anyhow::Result<()> {
    let mut state = self.state.lock().unwrap();
    let mut changed = false;
    for record in &mut state.messages {
      if let Some(pos) = record.flags.iter().position(|f| *f == Flag::Standard(StandardFlag::Recent)) {
        record.flags.remove(pos);
        changed = true;
      }
    }
    if changed {
      self.persist(&state)?;
    }
    Ok(())
  }

  /// Persists (UIDVALIDITY, NEXT-UID, UID<->key map, flags) to the per-user database in the same
  /// logical step as the in-memory mutation (spec.md §4.5), alongside the `.mh_sequences`
  /// sidecar `persist_flags` already writes. Callers that drive a single IMAP command roll the
  /// in-memory state back if this fails, so the tagged response stays honest.
  fn persist(&self, state: &MailboxState) -> anyhow::Result<()> {
    self.persist_flags(state)?;
    let mut db = self.db.lock().unwrap();
    db.upsert_mailbox(&self.path, state.uidvalidity, state.next_uid, &[], unix_now() as i64)?;
    let records: Vec<(u32, u32, u32, i64)> = state.messages.iter().map(|r| (r.uid, r.key, r.size, r.internal_date)).collect();
    db.replace_uids(self.mailbox_id, &records)?;
    let reserved: [(&str, fn(&MessageRecord) -> bool); 4] = [
      ("unseen", |r| !r.flags.contains(&Flag::Standard(StandardFlag::Seen))),
      ("replied", |r| r.flags.contains(&Flag::Standard(StandardFlag::Answered))),
      ("flagged", |r| r.flags.contains(&Flag::Standard(StandardFlag::Flagged))),
      ("deleted", |r| r.flags.contains(&Flag::Standard(StandardFlag::Deleted))),
    ];
    for (name, matches) in reserved {
      let uids: Vec<u32> = state.messages.iter().filter(|r| matches(r)).map(|r| r.uid).collect();
      db.set_sequence(self.mailbox_id, name, &collapse_set(uids))?;
    }
    Ok(())
  }

  /// UIDVALIDITY change rule (spec.md §4.3): on-disk state lost or unreconcilable -> reset.
  pub fn invalidate(&self) {
    let mut state = self.state.lock().unwrap();
    state.uidvalidity = unix_now();
    state.next_uid = 1;
    state.messages.clear();
  }

  pub fn store_flags(
    &self,
    uid: u32,
    op: crate::wire::types::StoreOp,
    flags: &[Flag],
  ) -> Result<Vec<Flag>, MailboxInconsistency> {
    let mut state = self.state.lock().unwrap();
    let Some(index) = state.messages.iter().position(|m| m.uid == uid) else {
      return Err(MailboxInconsistency::TryAgain(format!("uid {uid} no longer present")));
    };
    let previous_flags = state.messages[index].flags.clone();
    let record = &mut state.messages[index];
    match op {
      crate::wire::types::StoreOp::Set => record.flags = flags.to_vec(),
      crate::wire::types::StoreOp::Add => {
        for f in flags {
          if !record.flags.contains(f) {
            record.flags.push(f.clone());
          }
        }
      }
      crate::wire::types::StoreOp::Remove => record.flags.retain(|f| !flags.contains(f)),
    }
    let result = record.flags.clone();
    let sequence_number = index as u32 + 1;
    // spec.md §4.5: a persistence failure rolls the in-memory flags back so the tagged response
    // (which reports this as NO) doesn't lie about what's durable.
    if let Err(e) = self.persist(&state) {
      state.messages[index].flags = previous_flags;
      return Err(MailboxInconsistency::TellClientBad(e.to_string()));
    }
    notify(&state.subscribers, Notification::FetchFlags { sequence_number, uid, flags: result.clone() });
    Ok(result)
  }

  fn persist_flags(&self, state: &MailboxState) -> anyhow::Result<()> {
    let mut sequences = Sequences::default();
    for record in &state.messages {
      for flag in &record.flags {
        if let Some(name) = sequence_name_for(flag) {
          sequences.add(name, record.key);
        }
      }
    }
    self.folder.write_sequences(&sequences)
  }

  pub fn append(&self, data: &[u8], flags: &[Flag]) -> anyhow::Result<u32> {
    let key = self.folder.append_message(data)?;
    let mut state = self.state.lock().unwrap();
    let previous_next_uid = state.next_uid;
    let uid = state.next_uid;
    state.next_uid += 1;
    state.messages.push(MessageRecord {
      uid,
      key,
      size: data.len() as u32,
      internal_date: unix_now() as i64,
      flags: flags.to_vec(),
    });
    // spec.md §4.5: a DB write failure must not leave a message counted in memory with nothing
    // durable backing it, so both the in-memory record and the freshly written file are undone.
    if let Err(e) = self.persist(&state) {
      state.messages.pop();
      state.next_uid = previous_next_uid;
      let _ = self.folder.remove_message(key);
      return Err(e);
    }
    let exists = state.messages.len() as u32;
    notify(&state.subscribers, Notification::Exists { count: exists });
    Ok(uid)
  }

  pub fn folder_read(&self, key: u32) -> anyhow::Result<Vec<u8>> {
    Ok(self.folder.read_message(key)?)
  }

  pub fn expunge_deleted(&self) -> anyhow::Result<Vec<u32>> {
    self.remove_where(|r| r.flags.contains(&Flag::Standard(StandardFlag::Deleted)))
  }

  /// UID EXPUNGE (RFC 4315 §2.1): only messages that are both `\Deleted` AND named by the given
  /// UID set are removed, unlike plain EXPUNGE which takes every `\Deleted` message.
  pub fn expunge_uids(&self, set: &crate::wire::types::SequenceSet) -> anyhow::Result<Vec<u32>> {
    self.remove_where(|record| {
      record.flags.contains(&Flag::Standard(StandardFlag::Deleted)) && set.iter().any(|range| range.contains(record.uid))
    })
  }

  /// Removes messages by UID regardless of `\Deleted`, used to roll back a COPY/MOVE whose
  /// destination APPEND failed partway through (spec.md §4.3's atomicity rule).
  pub fn remove_uids(&self, uids: &[u32]) -> anyhow::Result<Vec<u32>> {
    self.remove_where(|r| uids.contains(&r.uid))
  }

  fn remove_where(&self, mut selector: impl FnMut(&MessageRecord) -> bool) -> anyhow::Result<Vec<u32>> {
    let mut state = self.state.lock().unwrap();
    let previous_messages = state.messages.clone();
    let mut removed_uids = Vec::new();
    let mut remaining = Vec::new();
    for record in &state.messages {
      if selector(record) {
        removed_uids.push(record.uid);
      } else {
        remaining.push(record.clone());
      }
    }
    let expunged_sequence_numbers: Vec<u32> =
      removed_uids.iter().filter_map(|uid| state.messages.iter().position(|r| r.uid == *uid).map(|i| i as u32 + 1)).collect();
    let mut descending = expunged_sequence_numbers;
    descending.sort_unstable_by(|a, b| b.cmp(a));
    state.messages = remaining;
    // Persist before touching disk: if the database write fails, nothing has been deleted yet and
    // the in-memory list is restored below.
    if let Err(e) = self.persist(&state) {
      state.messages = previous_messages;
      return Err(e);
    }
    for uid in &removed_uids {
      if let Some(record) = previous_messages.iter().find(|r| r.uid == *uid) {
        self.folder.remove_message(record.key)?;
      }
    }
    for sequence_number in descending {
      notify(&state.subscribers, Notification::Expunge { sequence_number });
    }
    Ok(removed_uids)
  }
}

fn sequence_name_for(flag: &Flag) -> Option<&'static str> {
  match flag {
    Flag::Standard(StandardFlag::Answered) => Some("replied"),
    Flag::Standard(StandardFlag::Flagged) => Some("flagged"),
    Flag::Standard(StandardFlag::Deleted) => Some("deleted"),
    Flag::Standard(StandardFlag::Seen) => None, // stored inverted, as "unseen"
    _ => None,
  }
}

fn flags_from_sequences(sequences: &Sequences, key: u32, previous: &[Flag]) -> Vec<Flag> {
  let mut flags = Vec::new();
  if !sequences.contains("unseen", key) {
    flags.push(Flag::Standard(StandardFlag::Seen));
  }
  if sequences.contains("replied", key) {
    flags.push(Flag::Standard(StandardFlag::Answered));
  }
  if sequences.contains("flagged", key) {
    flags.push(Flag::Standard(StandardFlag::Flagged));
  }
  if sequences.contains("deleted", key) {
    flags.push(Flag::Standard(StandardFlag::Deleted));
  }
  if previous.contains(&Flag::Standard(StandardFlag::Recent)) {
    flags.push(Flag::Standard(StandardFlag::Recent));
  }
  flags
}

fn notify(subscribers: &[crossbeam_channel::Sender<Notification>], notification: Notification) {
  for sender in subscribers {
    let _ = sender.send(notification.clone());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mailstore::Builder;

  fn test_db() -> Arc<Mutex<Database>> {
    Arc::new(Mutex::new(Database::open_in_memory().unwrap()))
  }

  fn open(dir: &std::path::Path) -> Mailbox {
    let folder = Builder::new(dir).unwrap().folder("INBOX", true).unwrap();
    Mailbox::open("INBOX".into(), folder, 1700000000, 1, test_db(), 1).unwrap()
  }

  #[test]
  fn empty_mailbox_resyncs_to_zero_exists() {
    let dir = tempfile::tempdir().unwrap();
    let mailbox = open(dir.path());
    assert_eq!(mailbox.exists(), 0);
  }

  #[test]
  fn append_assigns_ascending_uids() {
    let dir = tempfile::tempdir().unwrap();
    let mailbox = open(dir.path());
    let uid1 = mailbox.append(b"one", &[]).unwrap();
    let uid2 = mailbox.append(b"two", &[]).unwrap();
    assert!(uid2 > uid1);
    assert_eq!(mailbox.exists(), 2);
  }

  #[test]
  fn externally_added_message_is_picked_up_by_resync() {
    let dir = tempfile::tempdir().unwrap();
    let folder = Builder::new(dir.path()).unwrap().folder("INBOX", true).unwrap();
    folder.append_message(b"external").unwrap();
    let mailbox = Mailbox::open("INBOX".into(), folder, 1700000000, 1, test_db(), 1).unwrap();
    assert_eq!(mailbox.exists(), 1);
  }

  #[test]
  fn store_add_flag_then_expunge_removes_message() {
    let dir = tempfile::tempdir().unwrap();
    let mailbox = open(dir.path());
    let uid = mailbox.append(b"one", &[]).unwrap();
    mailbox.store_flags(uid, crate::wire::types::StoreOp::Add, &[Flag::Standard(StandardFlag::Deleted)]).unwrap();
    let removed = mailbox.expunge_deleted().unwrap();
    assert_eq!(removed, vec![uid]);
    assert_eq!(mailbox.exists(), 0);
  }

  #[test]
  fn uid_expunge_only_removes_deleted_messages_in_the_given_set() {
    let dir = tempfile::tempdir().unwrap();
    let mailbox = open(dir.path());
    let uid1 = mailbox.append(b"one", &[]).unwrap();
    let uid2 = mailbox.append(b"two", &[]).unwrap();
    mailbox.store_flags(uid1, crate::wire::types::StoreOp::Add, &[Flag::Standard(StandardFlag::Deleted)]).unwrap();
    mailbox.store_flags(uid2, crate::wire::types::StoreOp::Add, &[Flag::Standard(StandardFlag::Deleted)]).unwrap();
    let set = vec![crate::wire::types::Range(uid1, uid1)];
    let removed = mailbox.expunge_uids(&set).unwrap();
    assert_eq!(removed, vec![uid1]);
    assert_eq!(mailbox.exists(), 1);
  }
}
