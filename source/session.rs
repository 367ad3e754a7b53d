// Per-connection command engine (spec.md §4.2): state machine (Non-Authenticated / Authenticated
// / Selected / Logout), tag-reuse rejection, IDLE, and command dispatch. Generic over
// `io::Read + io::Write`, exactly like the teacher's `imap::Stream<RW>` -- same reasoning: let
// the tests drive it over an in-memory pipe instead of a real socket.

use crate::auth;
use crate::context::{ContextTable, LiveContext};
use crate::error::{CommandError, MailboxInconsistency, RefusalCode};
use crate::fetch;
use crate::mailbox::Mailbox;
use crate::message::ParsedMessage;
use crate::search;
use crate::sort;
use crate::userserver::{UserRegistry, UserServer};
use crate::wire::response::{collapse_set, flag_list, quote_or_literal};
use crate::wire::types::*;
use crate::wire::{self, reader::Outcome, reader::Reader};
use std::io::{self, Read, Write};
use std::sync::Arc;

pub const CAPABILITIES: &[&str] = &[
  "IMAP4rev1",
  "STARTTLS",
  "AUTH=PLAIN",
  "ESEARCH",
  "SORT",
  "ESORT",
  "CONTEXT=SEARCH",
  "UIDPLUS",
  "MULTIAPPEND",
  "LITERAL+",
  "UNSELECT",
  "CHILDREN",
  "LIST-EXTENDED",
  "LIST-STATUS",
  "IDLE",
  "NAMESPACE",
  "MOVE",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  NotAuthenticated,
  Authenticated,
  Selected,
  Logout,
}

pub struct Session<RW> {
  stream: RW,
  reader: Reader,
  pub state: State,
  pub user: Option<Arc<UserServer>>,
  pub mailbox: Option<Arc<Mailbox>>,
  pub mailbox_name: Option<String>,
  pub readonly: bool,
  contexts: ContextTable,
  notifications: crossbeam_channel::Receiver<crate::mailbox::Notification>,
  notification_sender: crossbeam_channel::Sender<crate::mailbox::Notification>,
  pub pwfile: std::path::PathBuf,
  pub auth_failures: u32,
  users: UserRegistry,
}

impl<RW: Read + Write> Session<RW> {
  pub fn new(stream: RW, literal_cap: usize, pwfile: std::path::PathBuf, users: UserRegistry) -> Self {
    let (sender, receiver) = crossbeam_channel::unbounded();
    Self {
      stream,
      reader: Reader::new(literal_cap),
      state: State::NotAuthenticated,
      user: None,
      mailbox: None,
      mailbox_name: None,
      readonly: false,
      contexts: ContextTable::new(),
      notifications: receiver,
      notification_sender: sender,
      pwfile,
      auth_failures: 0,
      users,
    }
  }

  fn write_line(&mut self, line: &str) -> io::Result<()> {
    self.stream.write_all(line.as_bytes())?;
    self.stream.write_all(b"\r\n")?;
    self.stream.flush()
  }

  pub fn greet(&mut self) -> io::Result<()> {
    self.write_line(&format!("* OK [CAPABILITY {}] asimapd ready", CAPABILITIES.join(" ")))
  }

  /// Reads and dispatches exactly one command. Returns `Ok(false)` once the session has moved to
  /// `Logout` and the caller should close the connection.
  pub fn step(&mut self) -> anyhow::Result<bool> {
    loop {
      match self.reader.poll() {
        Outcome::NeedMoreData => {
          let mut buf = [0u8; 4096];
          let n = self.stream.read(&mut buf)?;
          if n == 0 {
            return Ok(false);
          }
          self.reader.feed(&buf[..n]);
        }
        Outcome::NeedContinuation(_) => {
          self.write_line("+ go ahead")?;
        }
        Outcome::Command { scan_to } => {
          let bytes = self.reader.buffer()[..scan_to].to_vec();
          self.reader.consume(scan_to);
          return self.dispatch(&bytes);
        }
        Outcome::Error(e) => {
          self.write_line(&format!("* BAD {e}"))?;
          return Ok(false);
        }
      }
    }
  }

  fn dispatch(&mut self, bytes: &[u8]) -> anyhow::Result<bool> {
    let command = match wire::parse_command(bytes) {
      Ok(c) => c,
      Err(e) => {
        self.write_line(&format!("* BAD {e}"))?;
        return Ok(true);
      }
    };
    let tag = String::from_utf8_lossy(&command.tag).into_owned();
    if self.contexts.get_mut(&tag).is_some() && !matches!(command.kind, CommandKind::CancelUpdate { .. }) {
      self.write_line(&format!("{tag} BAD Tag reuse"))?;
      return Ok(true);
    }
    self.drain_pending_notifications_if_allowed(&command.kind)?;

    if matches!(command.kind, CommandKind::Idle) {
      return self.idle(&tag);
    }

    // FETCH is special-cased ahead of `execute()`: BODY[...] must return the exact octets a
    // client APPENDed (spec.md §8), which rules out building the response as a `String`.
    if let CommandKind::Fetch { uid, set, items } = command.kind {
      match self.fetch_bytes(&tag, uid, set, items) {
        Ok(bytes) => {
          self.stream.write_all(&bytes)?;
          self.stream.flush()?;
        }
        Err(e) => self.write_error(&tag, e)?,
      }
      self.refresh_contexts()?;
      return Ok(self.state != State::Logout);
    }

    let result = self.execute(&tag, command.kind);
    match result {
      Ok(Some(response_line)) => self.write_line(&response_line)?,
      Ok(None) => {}
      Err(e) => self.write_error(&tag, e)?,
    }
    self.refresh_contexts()?;
    Ok(self.state != State::Logout)
  }

  fn write_error(&mut self, tag: &str, e: CommandError) -> anyhow::Result<()> {
    match e {
      CommandError::Refused { code, message } => self.write_line(&format!("{tag} NO {code} {message}"))?,
      CommandError::Inconsistency(MailboxInconsistency::TryAgain(msg)) => self.write_line(&format!("{tag} NO [TRYCREATE] {msg}"))?,
      CommandError::Inconsistency(MailboxInconsistency::TellClientBad(msg)) => self.write_line(&format!("{tag} BAD {msg}"))?,
      CommandError::Inconsistency(MailboxInconsistency::Disconnect(msg)) => {
        self.write_line(&format!("* BYE {msg}"))?;
        self.state = State::Logout;
      }
      CommandError::AuthFailure => {
        self.auth_failures += 1;
        self.write_line(&format!("{tag} NO [AUTHENTICATIONFAILED] authentication failed"))?;
      }
      CommandError::ProtocolParse(msg) => self.write_line(&format!("{tag} BAD {msg}"))?,
      e => self.write_line(&format!("{tag} NO {e}"))?,
    }
    Ok(())
  }

  /// RFC 5267 CONTEXT/UPDATE: re-evaluates every live context's search key against the selected
  /// mailbox's current membership and streams the ADDTO/REMOVEFROM deltas.
  fn refresh_contexts(&mut self) -> anyhow::Result<()> {
    let Some(mailbox) = self.mailbox.clone() else { return Ok(()) };
    let records = mailbox.snapshot();
    let mut updates_by_tag = Vec::new();
    for context in self.contexts.iter_mut() {
      let mut matched = Vec::new();
      for (i, record) in records.iter().enumerate() {
        let Ok(raw) = mailbox.folder_read(record.key) else { continue };
        let Ok(parsed) = ParsedMessage::parse(&raw) else { continue };
        let ctx = search::Context { record, sequence_number: i as u32 + 1, parsed: &parsed };
        if search::eval(&context.key, &ctx) {
          matched.push(record.uid);
        }
      }
      let updates = context.diff_and_update(matched);
      if !updates.is_empty() {
        updates_by_tag.push((context.tag.clone(), updates));
      }
    }
    for (tag, updates) in updates_by_tag {
      for update in updates {
        // RFC 5267 has no explicit UID token in ADDTO/REMOVEFROM, matching this server's own
        // non-UPDATE ESEARCH rendering, which likewise never emits one.
        match update {
          crate::context::Update::AddTo { position, uid } => {
            self.write_line(&format!("* ESEARCH (TAG \"{tag}\") ADDTO ({} {uid})", position.unwrap_or(0)))?
          }
          crate::context::Update::RemoveFrom { position, uid } => {
            self.write_line(&format!("* ESEARCH (TAG \"{tag}\") REMOVEFROM ({} {uid})", position.unwrap_or(0)))?
          }
        }
      }
    }
    Ok(())
  }

  fn drain_pending_notifications_if_allowed(&mut self, kind: &CommandKind) -> anyhow::Result<()> {
    // RFC 3501 §7.4.1: EXPUNGE must not be sent during FETCH/SEARCH/SORT/STORE; everything else
    // is a safe command boundary.
    if matches!(kind, CommandKind::Fetch { .. } | CommandKind::Search { .. } | CommandKind::Sort { .. } | CommandKind::Store { .. }) {
      return Ok(());
    }
    while let Ok(n) = self.notifications.try_recv() {
      self.emit_notification(n)?;
    }
    Ok(())
  }

  /// Drains this session's own notification channel, rendering only the `EXPUNGE` entries it
  /// contains. Used right after a command that expunges the currently selected mailbox itself,
  /// so the untagged responses land inside that command's own reply instead of a later one.
  fn drain_expunge_lines(&mut self) -> String {
    let mut lines = String::new();
    while let Ok(n) = self.notifications.try_recv() {
      if let crate::mailbox::Notification::Expunge { sequence_number } = n {
        lines.push_str(&format!("* {sequence_number} EXPUNGE\r\n"));
      }
    }
    lines
  }

  /// IDLE (spec.md §4.2, RFC 2177): blocks the connection, streaming mailbox notifications as
  /// they arrive, until the client sends a bare `DONE` line. A real self-terminating 29-minute
  /// timer needs a socket read timeout this generic `RW` can't express -- see DESIGN.md.
  fn idle(&mut self, tag: &str) -> anyhow::Result<bool> {
    self.write_line("+ idling")?;
    loop {
      while let Ok(n) = self.notifications.try_recv() {
        self.emit_notification(n)?;
      }
      let mut buf = [0u8; 4096];
      let n = self.stream.read(&mut buf)?;
      if n == 0 {
        self.state = State::Logout;
        return Ok(false);
      }
      self.reader.feed(&buf[..n]);
      loop {
        match self.reader.poll() {
          Outcome::Command { scan_to } => {
            let bytes = self.reader.buffer()[..scan_to].to_vec();
            self.reader.consume(scan_to);
            if String::from_utf8_lossy(&bytes).trim().eq_ignore_ascii_case("DONE") {
              self.write_line(&format!("{tag} OK IDLE terminated"))?;
              return Ok(self.state != State::Logout);
            }
          }
          Outcome::NeedContinuation(_) => self.write_line("+ go ahead")?,
          Outcome::NeedMoreData => break,
          Outcome::Error(e) => {
            self.write_line(&format!("* BAD {e}"))?;
            return Ok(false);
          }
        }
      }
    }
  }

  fn emit_notification(&mut self, notification: crate::mailbox::Notification) -> anyhow::Result<()> {
    use crate::mailbox::Notification::*;
    match notification {
      Expunge { sequence_number } => self.write_line(&format!("* {sequence_number} EXPUNGE"))?,
      Exists { count } => self.write_line(&format!("* {count} EXISTS"))?,
      Recent { count } => self.write_line(&format!("* {count} RECENT"))?,
      FetchFlags { sequence_number, flags, .. } => {
        self.write_line(&format!("* {sequence_number} FETCH (FLAGS {})", flag_list(&flags)))?
      }
    }
    Ok(())
  }

  fn require_authenticated(&self) -> Result<Arc<UserServer>, CommandError> {
    self.user.clone().ok_or(CommandError::refused(RefusalCode::Cannot, "not authenticated"))
  }

  fn require_selected(&self) -> Result<Arc<Mailbox>, CommandError> {
    self.mailbox.clone().ok_or(CommandError::refused(RefusalCode::Cannot, "no mailbox selected"))
  }

  fn execute(&mut self, tag: &str, kind: CommandKind) -> Result<Option<String>, CommandError> {
    match kind {
      CommandKind::Capability => Ok(Some(format!("* CAPABILITY {}\r\n{tag} OK CAPABILITY completed", CAPABILITIES.join(" ")))),
      CommandKind::Noop => Ok(Some(format!("{tag} OK NOOP completed"))),
      CommandKind::Logout => {
        self.state = State::Logout;
        Ok(Some(format!("* BYE logging out\r\n{tag} OK LOGOUT completed")))
      }
      CommandKind::StartTls => Ok(Some(format!("{tag} NO [CANNOT] STARTTLS not supported on this transport"))),
      CommandKind::Authenticate { mechanism: AuthMechanism::Plain, initial } => {
        let Some(initial) = initial else {
          return Ok(Some(format!("{tag} BAD AUTHENTICATE PLAIN requires an initial response")));
        };
        let Some((user, password)) = auth::parse_plain(&initial) else {
          return Err(CommandError::AuthFailure);
        };
        self.login(&user, password, tag)
      }
      CommandKind::Login { user, password } => {
        let user = String::from_utf8_lossy(&user).into_owned();
        self.login(&user, password, tag)
      }
      CommandKind::Select { mailbox, readonly } => self.select(&mailbox, readonly, tag),
      CommandKind::Create { mailbox } => {
        let server = self.require_authenticated()?;
        server.create_mailbox(&mailbox_path(&mailbox)).map_err(|e| CommandError::refused(RefusalCode::Cannot, e.to_string()))?;
        Ok(Some(format!("{tag} OK CREATE completed")))
      }
      CommandKind::Delete { mailbox } => {
        let server = self.require_authenticated()?;
        server
          .delete_mailbox(&mailbox_path(&mailbox))
          .map_err(|e| CommandError::refused(RefusalCode::NonExistent, e.to_string()))?;
        Ok(Some(format!("{tag} OK DELETE completed")))
      }
      CommandKind::Rename { from, to } => {
        let server = self.require_authenticated()?;
        server
          .rename_mailbox(&mailbox_path(&from), &mailbox_path(&to))
          .map_err(|e| CommandError::refused(RefusalCode::Cannot, e.to_string()))?;
        Ok(Some(format!("{tag} OK RENAME completed")))
      }
      CommandKind::Subscribe { mailbox } => {
        let server = self.require_authenticated()?;
        server.subscribe(&mailbox_path(&mailbox)).map_err(|e| CommandError::refused(RefusalCode::Cannot, e.to_string()))?;
        Ok(Some(format!("{tag} OK SUBSCRIBE completed")))
      }
      CommandKind::Unsubscribe { mailbox } => {
        let server = self.require_authenticated()?;
        server.unsubscribe(&mailbox_path(&mailbox)).map_err(|e| CommandError::refused(RefusalCode::Cannot, e.to_string()))?;
        Ok(Some(format!("{tag} OK UNSUBSCRIBE completed")))
      }
      CommandKind::List(list) => self.list(tag, list, false),
      CommandKind::Lsub { reference, pattern } => {
        self.list(tag, ListCommand { reference, pattern, selection: vec![ListSelection::Subscribed], status: vec![] }, true)
      }
      CommandKind::Status { mailbox, items } => self.status(tag, &mailbox, &items),
      CommandKind::Append { mailbox, messages } => self.append(tag, &mailbox, messages),
      CommandKind::Namespace => Ok(Some(format!("* NAMESPACE ((\"\" \"/\")) NIL NIL\r\n{tag} OK NAMESPACE completed"))),
      CommandKind::Unselect => {
        self.mailbox = None;
        self.mailbox_name = None;
        self.state = State::Authenticated;
        Ok(Some(format!("{tag} OK UNSELECT completed")))
      }
      CommandKind::Check => {
        let mailbox = self.require_selected()?;
        mailbox.resync(true).map_err(|e| CommandError::refused(RefusalCode::Cannot, e.to_string()))?;
        Ok(Some(format!("{tag} OK CHECK completed")))
      }
      CommandKind::Close => {
        let mailbox = self.require_selected()?;
        if !self.readonly {
          mailbox.expunge_deleted().map_err(|e| CommandError::refused(RefusalCode::Cannot, e.to_string()))?;
          // CLOSE never reports the removed UIDs to the closing session (spec.md §4.3); drop them.
          while self.notifications.try_recv().is_ok() {}
        }
        self.mailbox = None;
        self.mailbox_name = None;
        self.state = State::Authenticated;
        Ok(Some(format!("{tag} OK CLOSE completed")))
      }
      CommandKind::Expunge => {
        let mailbox = self.require_selected()?;
        mailbox.expunge_deleted().map_err(|e| CommandError::refused(RefusalCode::Cannot, e.to_string()))?;
        let lines = self.drain_expunge_lines();
        Ok(Some(format!("{lines}{tag} OK EXPUNGE completed")))
      }
      CommandKind::UidExpunge { set } => {
        let mailbox = self.require_selected()?;
        let removed = mailbox.expunge_uids(&set).map_err(|e| CommandError::refused(RefusalCode::Cannot, e.to_string()))?;
        let lines = self.drain_expunge_lines();
        Ok(Some(format!("{lines}{tag} OK UID EXPUNGE completed ({} messages)", removed.len())))
      }
      CommandKind::Search { uid, command } => self.search(tag, uid, command),
      CommandKind::Sort { uid, criteria, search } => self.sort(tag, uid, criteria, search),
      CommandKind::Fetch { .. } => unreachable!("FETCH is intercepted in dispatch() before execute() runs"),
      CommandKind::Idle => unreachable!("IDLE is intercepted in dispatch() before execute() runs"),
      CommandKind::Store { uid, set, command } => self.store(tag, uid, set, command),
      CommandKind::Copy { uid, set, mailbox } => self.copy(tag, uid, set, mailbox, false),
      CommandKind::Move { uid, set, mailbox } => self.copy(tag, uid, set, mailbox, true),
      CommandKind::CancelUpdate { context_tag } => {
        if self.contexts.cancel(&context_tag) {
          Ok(Some(format!("{tag} OK CANCELUPDATE completed")))
        } else {
          Ok(Some(format!("{tag} NO [NOUPDATE] no such context")))
        }
      }
    }
  }

  fn login(&mut self, user: &str, password: Vec<u8>, tag: &str) -> Result<Option<String>, CommandError> {
    let account = auth::authenticate(&self.pwfile, user, password)
      .map_err(|e| CommandError::refused(RefusalCode::ContactAdmin, e.to_string()))?
      .ok_or(CommandError::AuthFailure)?;
    let db_path = std::path::Path::new(&account.maildir_root).join(".asimapd.db");
    // spec.md §2 item 4 / §4.6 point 3: a second connection from the same user joins the worker
    // already running for them instead of opening an independent `Mailbox` cache.
    let server = UserServer::get_or_open(&self.users, account.username, account.maildir_root.into(), &db_path)
      .map_err(|e| CommandError::refused(RefusalCode::ContactAdmin, e.to_string()))?;
    self.user = Some(server);
    self.state = State::Authenticated;
    Ok(Some(format!("{tag} OK [CAPABILITY {}] LOGIN completed", CAPABILITIES.join(" "))))
  }

  fn select(&mut self, mailbox: &MailboxName, readonly: bool, tag: &str) -> Result<Option<String>, CommandError> {
    let server = self.require_authenticated()?;
    let name = mailbox_path(mailbox);
    let mbox = server.mailbox(&name).map_err(|e| CommandError::refused(RefusalCode::NonExistent, e.to_string()))?;
    mbox.register(self.notification_sender.clone());
    let exists = mbox.exists();
    let recent = mbox.snapshot().iter().filter(|m| m.flags.contains(&Flag::Standard(StandardFlag::Recent))).count();
    let uidvalidity = mbox.uidvalidity();
    let uidnext = mbox.next_uid();
    // Data Model invariant 4: \Recent is reported once to the session that first observes it, then
    // cleared so a later SELECT/EXAMINE of this mailbox (by this or any other session) doesn't see
    // it again.
    mbox.clear_recent().map_err(|e| CommandError::refused(RefusalCode::Cannot, e.to_string()))?;
    self.mailbox = Some(mbox);
    self.mailbox_name = Some(name);
    self.readonly = readonly;
    self.state = State::Selected;
    let verb = if readonly { "EXAMINE" } else { "SELECT" };
    let access = if readonly { "READ-ONLY" } else { "READ-WRITE" };
    Ok(Some(format!(
      "* {exists} EXISTS\r\n* {recent} RECENT\r\n* OK [UIDVALIDITY {uidvalidity}]\r\n* OK [UIDNEXT {uidnext}]\r\n\
       * FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n{tag} OK [{access}] {verb} completed"
    )))
  }

  fn list(&mut self, tag: &str, list: ListCommand, lsub_style: bool) -> Result<Option<String>, CommandError> {
    let server = self.require_authenticated()?;
    let reference = String::from_utf8_lossy(&list.reference).into_owned();
    let pattern = String::from_utf8_lossy(&list.pattern).into_owned();
    if pattern.is_empty() {
      return Ok(Some(format!("* LIST (\\Noselect) \"/\" \"{reference}\"\r\n{tag} OK LIST completed")));
    }
    let subscribed_only = list.selection.contains(&ListSelection::Subscribed);
    let subscriptions = server.subscriptions().map_err(|e| CommandError::refused(RefusalCode::Cannot, e.to_string()))?;
    let mut folders = server.list_folders().map_err(|e| CommandError::refused(RefusalCode::Cannot, e.to_string()))?;
    folders.push("INBOX".to_string());
    folders.sort();
    folders.dedup();
    let mut lines = String::new();
    let verb = if lsub_style { "LSUB" } else { "LIST" };
    for folder in folders {
      if subscribed_only && !subscriptions.iter().any(|s| s == &folder) {
        continue;
      }
      if !glob_match(&pattern, &folder) {
        continue;
      }
      let mut rendered_name = Vec::new();
      quote_or_literal(&mut rendered_name, folder.as_bytes());
      lines.push_str(&format!("* {verb} () \"/\" {}\r\n", String::from_utf8_lossy(&rendered_name)));
    }
    Ok(Some(format!("{lines}{tag} OK {verb} completed")))
  }

  fn status(&mut self, tag: &str, mailbox: &MailboxName, items: &[StatusItem]) -> Result<Option<String>, CommandError> {
    let server = self.require_authenticated()?;
    let name = mailbox_path(mailbox);
    let mbox = server.mailbox(&name).map_err(|e| CommandError::refused(RefusalCode::NonExistent, e.to_string()))?;
    let records = mbox.snapshot();
    let rendered: Vec<String> = items
      .iter()
      .map(|item| match item {
        StatusItem::Messages => format!("MESSAGES {}", records.len()),
        StatusItem::Recent => format!("RECENT {}", records.iter().filter(|m| m.flags.contains(&Flag::Standard(StandardFlag::Recent))).count()),
        StatusItem::UidNext => format!("UIDNEXT {}", mbox.next_uid()),
        StatusItem::UidValidity => format!("UIDVALIDITY {}", mbox.uidvalidity()),
        StatusItem::Unseen => format!("UNSEEN {}", records.iter().filter(|m| !m.flags.contains(&Flag::Standard(StandardFlag::Seen))).count()),
      })
      .collect();
    let mut quoted = Vec::new();
    quote_or_literal(&mut quoted, name.as_bytes());
    Ok(Some(format!(
      "* STATUS {} ({})\r\n{tag} OK STATUS completed",
      String::from_utf8_lossy(&quoted),
      rendered.join(" ")
    )))
  }

  fn append(&mut self, tag: &str, mailbox: &MailboxName, messages: Vec<AppendMessage>) -> Result<Option<String>, CommandError> {
    let server = self.require_authenticated()?;
    let name = mailbox_path(mailbox);
    let mbox = server.mailbox(&name).map_err(|e| CommandError::Inconsistency(MailboxInconsistency::TryAgain(e.to_string())))?;
    let uidvalidity = mbox.uidvalidity();
    let mut uids = Vec::new();
    for message in messages {
      let uid = mbox.append(&message.data, &message.flags).map_err(|e| CommandError::refused(RefusalCode::Cannot, e.to_string()))?;
      uids.push(uid);
    }
    let set = collapse_set(uids.clone());
    Ok(Some(format!(
      "{tag} OK [APPENDUID {uidvalidity} {set}] APPEND completed",
    )))
  }

  fn resolve_set(&self, mailbox: &Mailbox, uid: bool, set: &SequenceSet) -> Vec<(u32, u32)> {
    // -> Vec<(sequence_number, uid)>
    let records = mailbox.snapshot();
    records
      .iter()
      .enumerate()
      .filter_map(|(i, r)| {
        let matches = if uid { set.iter().any(|range| range.contains(r.uid)) } else { set.iter().any(|range| range.contains(i as u32 + 1)) };
        matches.then_some((i as u32 + 1, r.uid))
      })
      .collect()
  }

  fn search(&mut self, tag: &str, uid: bool, command: SearchCommand) -> Result<Option<String>, CommandError> {
    let mailbox = self.require_selected()?;
    let records = mailbox.snapshot();
    let mut matched = Vec::new();
    for (i, record) in records.iter().enumerate() {
      let raw = mailbox.folder_read(record.key);
      let Ok(raw) = raw else { continue };
      let Ok(parsed) = ParsedMessage::parse(&raw) else { continue };
      let ctx = search::Context { record, sequence_number: i as u32 + 1, parsed: &parsed };
      if search::eval(&command.key, &ctx) {
        matched.push(if uid { record.uid } else { i as u32 + 1 });
      }
    }
    if command.ret.contains(&SearchReturn::Update) {
      let members: Vec<u32> = if uid { matched.clone() } else { matched.iter().filter_map(|sn| records.get(*sn as usize - 1).map(|r| r.uid)).collect() };
      let live = LiveContext::new(tag.to_string(), uid, None, members, command.key.clone());
      if self.contexts.try_register(live).is_err() {
        return Ok(Some(format!("{tag} OK [NOUPDATE ({tag})] SEARCH completed")));
      }
    }
    if command.ret.is_empty() || command.ret == vec![SearchReturn::All] {
      Ok(Some(format!("* SEARCH {}\r\n{tag} OK SEARCH completed", matched.iter().map(u32::to_string).collect::<Vec<_>>().join(" "))))
    } else {
      let mut parts = Vec::new();
      if command.ret.contains(&SearchReturn::Min) {
        if let Some(min) = matched.iter().min() {
          parts.push(format!("MIN {min}"));
        }
      }
      if command.ret.contains(&SearchReturn::Max) {
        if let Some(max) = matched.iter().max() {
          parts.push(format!("MAX {max}"));
        }
      }
      if command.ret.contains(&SearchReturn::Count) {
        parts.push(format!("COUNT {}", matched.len()));
      }
      if command.ret.contains(&SearchReturn::All) {
        parts.push(format!("ALL {}", collapse_set(matched.clone())));
      }
      Ok(Some(format!("* ESEARCH (TAG \"{tag}\") {}\r\n{tag} OK SEARCH completed", parts.join(" "))))
    }
  }

  fn sort(&mut self, tag: &str, uid: bool, criteria: Vec<SortCriterion>, search_cmd: SearchCommand) -> Result<Option<String>, CommandError> {
    let mailbox = self.require_selected()?;
    let records = mailbox.snapshot();
    let mut parsed_messages = Vec::new();
    for record in &records {
      if let Ok(raw) = mailbox.folder_read(record.key) {
        if let Ok(parsed) = ParsedMessage::parse(&raw) {
          parsed_messages.push((record.clone(), parsed));
        }
      }
    }
    let mut items = Vec::new();
    for (i, (record, parsed)) in parsed_messages.iter().enumerate() {
      let ctx = search::Context { record, sequence_number: i as u32 + 1, parsed };
      if search::eval(&search_cmd.key, &ctx) {
        items.push(sort::Item { record, parsed });
      }
    }
    let sorted = sort::sort(items, &criteria);
    let output: Vec<u32> = sorted.iter().map(|item| if uid { item.record.uid } else { mailbox.sequence_number_of(item.record.uid).unwrap_or(0) }).collect();
    Ok(Some(format!("* SORT {}\r\n{tag} OK SORT completed", output.iter().map(u32::to_string).collect::<Vec<_>>().join(" "))))
  }

  /// Builds the full raw `FETCH` response (untagged lines plus the tagged completion) as bytes,
  /// so `BODY[...]` literals carry the message's exact octets instead of a lossily-decoded
  /// `String` (spec.md §8).
  fn fetch_bytes(&mut self, tag: &str, uid: bool, set: SequenceSet, items: Vec<FetchItem>) -> Result<Vec<u8>, CommandError> {
    let mailbox = self.require_selected()?;
    let pairs = self.resolve_set(&mailbox, uid, &set);
    let mut out = Vec::new();
    let sets_seen = items.iter().any(fetch::sets_seen);
    for (sequence_number, message_uid) in pairs {
      let records = mailbox.snapshot();
      let Some(record) = records.iter().find(|r| r.uid == message_uid) else { continue };
      let Ok(raw) = mailbox.folder_read(record.key) else { continue };
      let Ok(parsed) = ParsedMessage::parse(&raw) else { continue };
      out.extend_from_slice(format!("* {sequence_number} FETCH (").as_bytes());
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(b' ');
        }
        fetch::render_item(&mut out, item, record, &parsed);
      }
      out.extend_from_slice(b")\r\n");
      if sets_seen {
        let _ = mailbox.store_flags(message_uid, StoreOp::Add, &[Flag::Standard(StandardFlag::Seen)]);
      }
    }
    out.extend_from_slice(format!("{tag} OK FETCH completed\r\n").as_bytes());
    Ok(out)
  }

  fn store(&mut self, tag: &str, uid: bool, set: SequenceSet, command: StoreCommand) -> Result<Option<String>, CommandError> {
    let mailbox = self.require_selected()?;
    let pairs = self.resolve_set(&mailbox, uid, &set);
    let mut lines = String::new();
    for (sequence_number, message_uid) in pairs {
      let result = mailbox.store_flags(message_uid, command.op, &command.flags)?;
      if !command.silent {
        lines.push_str(&format!("* {sequence_number} FETCH (FLAGS {})\r\n", flag_list(&result)));
      }
    }
    Ok(Some(format!("{lines}{tag} OK STORE completed")))
  }

  fn copy(&mut self, tag: &str, uid: bool, set: SequenceSet, mailbox_name: MailboxName, move_: bool) -> Result<Option<String>, CommandError> {
    let server = self.require_authenticated()?;
    let source = self.require_selected()?;
    let destination_name = mailbox_path(&mailbox_name);
    let destination = server
      .mailbox(&destination_name)
      .map_err(|e| CommandError::Inconsistency(MailboxInconsistency::TryAgain(e.to_string())))?;
    let uidvalidity = destination.uidvalidity();
    let pairs = self.resolve_set(&source, uid, &set);
    let mut source_uids = Vec::new();
    let mut dest_uids = Vec::new();
    for (_, message_uid) in &pairs {
      let records = source.snapshot();
      let Some(record) = records.iter().find(|r| r.uid == *message_uid) else { continue };
      let Ok(raw) = source.folder_read(record.key) else { continue };
      match destination.append(&raw, &record.flags) {
        Ok(new_uid) => {
          source_uids.push(*message_uid);
          dest_uids.push(new_uid);
        }
        Err(e) => {
          // spec.md §4.3: a mid-copy append failure must not leave a partial copy sitting in the
          // destination mailbox while the tagged response reports the whole command as failed.
          if !dest_uids.is_empty() {
            let _ = destination.remove_uids(&dest_uids);
          }
          return Err(CommandError::refused(RefusalCode::Cannot, e.to_string()));
        }
      }
    }
    let source_set = collapse_set(source_uids.clone());
    let dest_set = collapse_set(dest_uids);
    let mut expunge_lines = String::new();
    if move_ {
      for message_uid in &source_uids {
        // Surface a failure here rather than swallowing it: if the source copy can't be marked
        // \Deleted, the client must not be told MOVE completed while the original still exists.
        source.store_flags(*message_uid, StoreOp::Add, &[Flag::Standard(StandardFlag::Deleted)])?;
      }
      source.expunge_deleted().map_err(|e| CommandError::refused(RefusalCode::Cannot, e.to_string()))?;
      expunge_lines = self.drain_expunge_lines();
    }
    let verb = if move_ { "MOVE" } else { "COPY" };
    Ok(Some(format!(
      "{expunge_lines}{tag} OK [COPYUID {uidvalidity} {source_set} {dest_set}] {verb} completed"
    )))
  }
}

impl<RW> Drop for Session<RW> {
  fn drop(&mut self) {
    // spec.md §4.6 point 3: the worker's connection count must fall back to zero when this
    // connection ends so its 30-minute idle eviction timer can start.
    if let Some(user) = &self.user {
      user.connection_closed();
    }
  }
}

fn mailbox_path(mailbox: &MailboxName) -> String {
  match mailbox {
    MailboxName::Inbox => "INBOX".to_string(),
    MailboxName::Other(bytes) => String::from_utf8_lossy(bytes).into_owned(),
  }
}

/// Minimal IMAP `LIST` glob matcher: `*` matches any run (including `/`), `%` matches any run
/// except `/`.
fn glob_match(pattern: &str, candidate: &str) -> bool {
  fn inner(p: &[u8], c: &[u8]) -> bool {
    match p.first() {
      None => c.is_empty(),
      Some(b'*') => (0..=c.len()).any(|i| inner(&p[1..], &c[i..])),
      Some(b'%') => (0..=c.len()).filter(|&i| !c[..i].contains(&b'/')).any(|i| inner(&p[1..], &c[i..])),
      Some(&b0) => c.first() == Some(&b0) && inner(&p[1..], &c[1..]),
    }
  }
  inner(pattern.as_bytes(), candidate.as_bytes())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn glob_star_matches_everything() {
    assert!(glob_match("*", "Archive/2024"));
  }

  #[test]
  fn glob_percent_stops_at_hierarchy_separator() {
    assert!(glob_match("%", "Archive"));
    assert!(!glob_match("%", "Archive/2024"));
  }

  #[test]
  fn glob_matches_literal_prefix() {
    assert!(glob_match("Archive/*", "Archive/2024"));
    assert!(!glob_match("Archive/*", "Other/2024"));
  }

  #[test]
  fn mailbox_path_renders_inbox_and_other() {
    assert_eq!(mailbox_path(&MailboxName::Inbox), "INBOX");
    assert_eq!(mailbox_path(&MailboxName::Other(b"Archive".to_vec())), "Archive");
  }

  struct TestStream {
    input: io::Cursor<Vec<u8>>,
    output: Vec<u8>,
  }

  impl Read for TestStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
      self.input.read(buf)
    }
  }

  impl Write for TestStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      self.output.extend_from_slice(buf);
      Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  #[test]
  fn idle_blocks_until_done_then_completes() {
    let stream = TestStream { input: io::Cursor::new(b"DONE\r\n".to_vec()), output: Vec::new() };
    let mut session = Session::new(stream, 4096, std::path::PathBuf::from("/nonexistent"), crate::userserver::new_registry());
    let more = session.dispatch(b"a IDLE\r\n").unwrap();
    assert!(more);
    let rendered = String::from_utf8_lossy(&session.stream.output);
    assert!(rendered.contains("+ idling"));
    assert!(rendered.contains("a OK IDLE terminated"));
  }
}
