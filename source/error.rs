// Error taxonomy. Mirrors the three-way split the teacher keeps between "this is a bug in the
// wire format" (parse errors -> anyhow::Error in the teacher's client, BAD here), "retry is
// reasonable" and "the connection is no longer trustworthy" -- the teacher doesn't need this
// distinction since it only ever talks to one side of the protocol it already trusts, but a
// server facing arbitrary clients does.

use thiserror::Error;

/// Failures in the pre-grammar framing layer (`wire::reader::Reader`).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
  #[error("command line exceeds the configured literal cap without a CRLF")]
  LineTooLong,
  #[error("literal of {0} octets exceeds the configured cap")]
  LiteralTooLarge(usize),
  #[error("could not parse command: {0}")]
  ParseFailed(String),
}

/// What a command handler returns; `session.rs` turns this into the tagged/untagged response.
#[derive(Debug, Error)]
pub enum CommandError {
  #[error("malformed command: {0}")]
  ProtocolParse(String),
  #[error("authentication failed")]
  AuthFailure,
  #[error(transparent)]
  Inconsistency(#[from] MailboxInconsistency),
  #[error("{code}")]
  Refused { code: RefusalCode, message: String },
  #[error(transparent)]
  Io(#[from] std::io::Error),
  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

/// Raised by the mailbox/mailstore layer when the on-disk state and the in-memory model
/// disagree. `TryAgain` and `TellClientBad` are recoverable by a resync; `Disconnect` means the
/// store moved out from under us in a way a resync can't repair (e.g. UIDVALIDITY rolled over
/// while we held messages open).
#[derive(Debug, Error)]
pub enum MailboxInconsistency {
  #[error("mailbox state changed underneath us, retry after resync: {0}")]
  TryAgain(String),
  #[error("command cannot be satisfied against current mailbox state: {0}")]
  TellClientBad(String),
  #[error("mailbox state is unrecoverable, disconnecting: {0}")]
  Disconnect(String),
}

/// Maps to an IMAP response code inside a tagged NO, e.g. `NO [CANNOT] ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalCode {
  Cannot,
  Overquota,
  AlreadyExists,
  NonExistent,
  ContactAdmin,
  NoPerm,
  InUse,
  ExpungeIssued,
  Corruption,
  ServerBug,
  ClientBug,
  CannotUseUtf8,
}

impl std::fmt::Display for RefusalCode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let code = match self {
      RefusalCode::Cannot => "CANNOT",
      RefusalCode::Overquota => "OVERQUOTA",
      RefusalCode::AlreadyExists => "ALREADYEXISTS",
      RefusalCode::NonExistent => "NONEXISTENT",
      RefusalCode::ContactAdmin => "CONTACTADMIN",
      RefusalCode::NoPerm => "NOPERM",
      RefusalCode::InUse => "INUSE",
      RefusalCode::ExpungeIssued => "EXPUNGEISSUED",
      RefusalCode::Corruption => "CORRUPTION",
      RefusalCode::ServerBug => "SERVERBUG",
      RefusalCode::ClientBug => "CLIENTBUG",
      RefusalCode::CannotUseUtf8 => "CANNOT-USE-UTF8",
    };
    write!(f, "[{code}]")
  }
}

impl CommandError {
  pub fn refused(code: RefusalCode, message: impl Into<String>) -> Self {
    CommandError::Refused { code, message: message.into() }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn refusal_code_renders_bracketed() {
    assert_eq!(RefusalCode::NonExistent.to_string(), "[NONEXISTENT]");
  }

  #[test]
  fn inconsistency_converts_into_command_error() {
    let err: CommandError = MailboxInconsistency::TryAgain("uidvalidity changed".into()).into();
    assert!(matches!(err, CommandError::Inconsistency(MailboxInconsistency::TryAgain(_))));
  }
}
