// Streaming command boundary scanner.
//
// Per the design notes: IMAP literals make the command stream non-regular (a length-prefixed
// span of arbitrary octets, including bare CR/LF, sits in the middle of an otherwise
// line-oriented grammar). `peg` (like the teacher's own grammar in the original `imap.rs`) has
// no notion of "not enough input yet" versus "syntax error" -- it just fails. So, like the
// teacher does for responses (see `Stream::chunk`), command framing is resolved by a dedicated
// state machine *before* the bytes are handed to the grammar: this type's only job is to find
// where one complete command ends, counting literal payloads as opaque spans rather than trying
// to lex them.

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Literal {
  Synchronizing(usize),
  NonSynchronizing(usize),
}

#[derive(Debug)]
pub enum Outcome {
  /// Not enough bytes buffered yet to decide anything.
  NeedMoreData,
  /// A synchronizing literal was just recognized; the caller must write `+ <text>\r\n` before
  /// any more bytes will arrive for it on a real socket. Emitted once per literal.
  NeedContinuation(u32),
  /// `scan_to` bytes (from the start of the buffer) make up one complete command line.
  Command { scan_to: usize },
  Error(ProtocolError),
}

#[derive(Debug, Default)]
pub struct Reader {
  buffer: Vec<u8>,
  /// Offset already scanned past (to the end of the last literal, or 0).
  scanned: usize,
  continuation_sent_for: Option<usize>,
  literal_cap: usize,
}

impl Reader {
  pub fn new(literal_cap: usize) -> Self {
    Self {
      buffer: Vec::new(),
      scanned: 0,
      continuation_sent_for: None,
      literal_cap,
    }
  }

  pub fn feed(&mut self, bytes: &[u8]) {
    self.buffer.extend_from_slice(bytes);
  }

  pub fn buffer(&self) -> &[u8] {
    &self.buffer
  }

  /// Drop the first `n` bytes (a fully consumed command) and rewind scan state.
  pub fn consume(&mut self, n: usize) {
    self.buffer.copy_within(n.., 0);
    self.buffer.truncate(self.buffer.len() - n);
    self.scanned = 0;
    self.continuation_sent_for = None;
  }

  // Find the trailing "{<digits>[+]}" on a candidate command line, if any.
  fn trailing_literal(line: &[u8]) -> Option<Literal> {
    if line.last() != Some(&b'}') {
      return None;
    }
    let open = line.iter().rposition(|&b| b == b'{')?;
    let mut spec = &line[open + 1..line.len() - 1];
    let non_sync = spec.last() == Some(&b'+');
    if non_sync {
      spec = &spec[..spec.len() - 1];
    }
    if spec.is_empty() || !spec.iter().all(u8::is_ascii_digit) {
      return None;
    }
    let n: usize = std::str::from_utf8(spec).ok()?.parse().ok()?;
    Some(if non_sync {
      Literal::NonSynchronizing(n)
    } else {
      Literal::Synchronizing(n)
    })
  }

  pub fn poll(&mut self) -> Outcome {
    loop {
      let rest = &self.buffer[self.scanned..];
      let crlf = match memchr::memmem::find(rest, b"\r\n") {
        Some(p) => p,
        None => {
          if rest.len() > self.literal_cap {
            return Outcome::Error(ProtocolError::LineTooLong);
          }
          return Outcome::NeedMoreData;
        }
      };
      let line = &rest[..crlf];
      match Self::trailing_literal(line) {
        None => {
          let scan_to = self.scanned + crlf + 2;
          return Outcome::Command { scan_to };
        }
        Some(literal) => {
          let n = match literal {
            Literal::Synchronizing(n) | Literal::NonSynchronizing(n) => n,
          };
          if n > self.literal_cap {
            return Outcome::Error(ProtocolError::LiteralTooLarge(n));
          }
          let literal_start = self.scanned + crlf + 2;
          let need = literal_start + n;
          if self.buffer.len() < need {
            if let Literal::Synchronizing(_) = literal {
              if self.continuation_sent_for != Some(literal_start) {
                self.continuation_sent_for = Some(literal_start);
                return Outcome::NeedContinuation(n as u32);
              }
            }
            return Outcome::NeedMoreData;
          }
          self.scanned = need;
          continue;
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn simple_command() {
    let mut reader = Reader::new(1024);
    reader.feed(b"a NOOP\r\n");
    match reader.poll() {
      Outcome::Command { scan_to } => assert_eq!(scan_to, 8),
      other => panic!("{other:?}"),
    }
  }

  #[test]
  fn needs_more_data() {
    let mut reader = Reader::new(1024);
    reader.feed(b"a NOOP");
    assert!(matches!(reader.poll(), Outcome::NeedMoreData));
  }

  #[test]
  fn synchronizing_literal_asks_for_continuation_once() {
    let mut reader = Reader::new(1024);
    reader.feed(b"a LOGIN {4}\r\n");
    assert!(matches!(reader.poll(), Outcome::NeedContinuation(4)));
    // Same state, no bytes yet: must not ask again.
    assert!(matches!(reader.poll(), Outcome::NeedMoreData));
    reader.feed(b"fred {6}\r\n");
    assert!(matches!(reader.poll(), Outcome::NeedContinuation(6)));
    reader.feed(b"sekret\r\n");
    match reader.poll() {
      Outcome::Command { scan_to } => {
        assert_eq!(&reader.buffer()[..scan_to], b"a LOGIN {4}\r\nfred {6}\r\nsekret\r\n");
      }
      other => panic!("{other:?}"),
    }
  }

  #[test]
  fn non_synchronizing_literal_with_embedded_crlf() {
    let mut reader = Reader::new(1024);
    reader.feed(b"a APPEND INBOX {7+}\r\nhi\r\nbye\r\n");
    match reader.poll() {
      Outcome::Command { scan_to } => assert_eq!(scan_to, "a APPEND INBOX {7+}\r\nhi\r\nbye\r\n".len()),
      other => panic!("{other:?}"),
    }
  }

  #[test]
  fn literal_exceeding_cap_is_rejected() {
    let mut reader = Reader::new(8);
    reader.feed(b"a APPEND INBOX {9}\r\n");
    assert!(matches!(reader.poll(), Outcome::Error(ProtocolError::LiteralTooLarge(9))));
  }
}
