// Abstract syntax produced by `grammar.rs` and consumed by `session.rs`.
//
// Mirrors the split the teacher uses in `imap.rs` between "what the grammar matches" and
// "what the rest of the program needs"; this module is the command-side counterpart of the
// teacher's response-side `Mailbox`/`Select`/`Append`/`Store`/`Move` structs.

use std::borrow::Cow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Range(pub u32, pub u32);

impl Range {
  pub fn contains(&self, n: u32) -> bool {
    self.0 <= n && n <= self.1
  }
}

pub type SequenceSet = Vec<Range>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxName {
  Inbox,
  Other(Vec<u8>),
}

impl MailboxName {
  pub fn as_bytes(&self) -> &[u8] {
    match self {
      MailboxName::Inbox => b"INBOX",
      MailboxName::Other(bytes) => bytes,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardFlag {
  Answered,
  Flagged,
  Deleted,
  Seen,
  Draft,
  Recent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flag {
  Standard(StandardFlag),
  Keyword(String),
  Star, // "\*", permanent-flags wildcard only
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Date {
  Ymd(i32, u32, u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKey {
  All,
  Answered,
  Bcc(String),
  Before(Date),
  Body(String),
  Cc(String),
  Deleted,
  Draft,
  Flagged,
  From(String),
  Header(String, String),
  Keyword(String),
  Larger(u32),
  New,
  Not(Box<SearchKey>),
  Old,
  On(Date),
  Or(Box<SearchKey>, Box<SearchKey>),
  Recent,
  Seen,
  SentBefore(Date),
  SentOn(Date),
  SentSince(Date),
  Since(Date),
  Smaller(u32),
  Subject(String),
  Text(String),
  To(String),
  Uid(SequenceSet),
  Unanswered,
  Undeleted,
  Undraft,
  Unflagged,
  Unkeyword(String),
  Unseen,
  SequenceNumbers(SequenceSet),
  And(Vec<SearchKey>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
  Arrival,
  Cc,
  Date,
  From,
  Size,
  Subject,
  To,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortCriterion {
  pub key: SortKey,
  pub reverse: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchReturn {
  Min,
  Max,
  All,
  Count,
  Update,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCommand {
  pub charset: Option<String>,
  pub key: SearchKey,
  pub ret: Vec<SearchReturn>,
  pub partial: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
  // Empty parts + the two "whole message" selectors; textual spec is kept raw (e.g.
  // "1.2.HEADER.FIELDS (SUBJECT)") since the evaluator re-walks the MIME tree per part.
  pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
  Flags,
  InternalDate,
  Rfc822Size,
  Uid,
  Envelope,
  Body,
  BodyStructure,
  BodySection { peek: bool, section: Section, partial: Option<(u32, u32)> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
  Set,
  Add,
  Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCommand {
  pub op: StoreOp,
  pub silent: bool,
  pub flags: Vec<Flag>,
  pub unchangedsince: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListSelection {
  Subscribed,
  Children,
  RemoteAny,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListCommand {
  pub reference: Vec<u8>,
  pub pattern: Vec<u8>,
  pub selection: Vec<ListSelection>,
  pub status: Vec<StatusItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusItem {
  Messages,
  Recent,
  UidNext,
  UidValidity,
  Unseen,
}

#[derive(Debug, Clone)]
pub struct AppendMessage {
  pub flags: Vec<Flag>,
  pub date: Option<Date>,
  pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMechanism {
  Plain,
}

#[derive(Debug, Clone)]
pub enum CommandKind {
  Capability,
  Noop,
  Logout,
  StartTls,
  Authenticate { mechanism: AuthMechanism, initial: Option<Vec<u8>> },
  Login { user: Vec<u8>, password: Vec<u8> },
  Select { mailbox: MailboxName, readonly: bool },
  Create { mailbox: MailboxName },
  Delete { mailbox: MailboxName },
  Rename { from: MailboxName, to: MailboxName },
  Subscribe { mailbox: MailboxName },
  Unsubscribe { mailbox: MailboxName },
  List(ListCommand),
  Lsub { reference: Vec<u8>, pattern: Vec<u8> },
  Status { mailbox: MailboxName, items: Vec<StatusItem> },
  Append { mailbox: MailboxName, messages: Vec<AppendMessage> },
  Namespace,
  Idle,
  Unselect,
  Check,
  Close,
  Expunge,
  UidExpunge { set: SequenceSet },
  Search { uid: bool, command: SearchCommand },
  Sort { uid: bool, criteria: Vec<SortCriterion>, search: SearchCommand },
  Fetch { uid: bool, set: SequenceSet, items: Vec<FetchItem> },
  Store { uid: bool, set: SequenceSet, command: StoreCommand },
  Copy { uid: bool, set: SequenceSet, mailbox: MailboxName },
  Move { uid: bool, set: SequenceSet, mailbox: MailboxName },
  CancelUpdate { context_tag: String },
}

#[derive(Debug, Clone)]
pub struct Command<'input> {
  pub tag: Cow<'input, [u8]>,
  pub kind: CommandKind,
}
