pub mod grammar;
pub mod reader;
pub mod response;
pub mod types;

pub use reader::{Outcome, Reader};
pub use types::{Command, CommandKind};

/// Parses one complete command out of `bytes` (as delimited by a prior `Reader::poll` ==
/// `Outcome::Command`). Wraps the `peg`-generated parser's error into the same `ProtocolError`
/// framing `reader.rs` uses, so `session.rs` has a single error type to match on for "this
/// command was malformed" versus "the mailbox disagrees with us".
pub fn parse_command(bytes: &[u8]) -> Result<Command<'_>, crate::error::ProtocolError> {
  grammar::parser::command(bytes).map_err(|e| crate::error::ProtocolError::ParseFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_command_roundtrips_noop() {
    let cmd = parse_command(b"a1 NOOP\r\n").unwrap();
    assert_eq!(cmd.tag.as_ref(), b"a1");
    assert!(matches!(cmd.kind, CommandKind::Noop));
  }
}
