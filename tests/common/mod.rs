// Shared test fixture: drives an in-process `Session` over an in-memory duplex pipe against a
// temporary MH store, the same black-box scenario style the teacher's own `tests/` use, minus
// the external dovecot/notmuch processes (there's nothing external to compare against here).

use asimapd::session::Session;
use asimapd::userserver::UserServer;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

#[derive(Clone, Default)]
pub struct Pipe {
  input: Rc<RefCell<VecDeque<u8>>>,
  output: Rc<RefCell<Vec<u8>>>,
}

impl Pipe {
  pub fn push_input(&self, bytes: &[u8]) {
    self.input.borrow_mut().extend(bytes.iter().copied());
  }

  pub fn take_output(&self) -> String {
    let mut output = self.output.borrow_mut();
    let text = String::from_utf8_lossy(&output).into_owned();
    output.clear();
    text
  }
}

impl Read for Pipe {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    let mut input = self.input.borrow_mut();
    let n = input.len().min(buf.len());
    for slot in buf.iter_mut().take(n) {
      *slot = input.pop_front().unwrap();
    }
    Ok(n)
  }
}

impl Write for Pipe {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.output.borrow_mut().extend_from_slice(buf);
    Ok(buf.len())
  }
  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

/// A running session already authenticated against a scratch MH store, bypassing the password
/// file entirely (the wire-level LOGIN/AUTHENTICATE path is covered by `source/auth.rs`'s own
/// unit tests; what these scenarios exercise is mailbox behavior once a user is logged in).
pub struct Fixture {
  pub root: tempfile::TempDir,
  pub pipe: Pipe,
  pub session: Session<Pipe>,
}

pub fn fixture() -> Fixture {
  let root = tempfile::tempdir().unwrap();
  let db_path = root.path().join(".asimapd.db");
  let registry = asimapd::userserver::new_registry();
  let server = UserServer::get_or_open(&registry, "fred".to_string(), root.path().to_path_buf(), &db_path).unwrap();
  let pipe = Pipe::default();
  let mut session = Session::new(pipe.clone(), 20 * 1024 * 1024, root.path().join("passwd"), registry);
  session.user = Some(server);
  session.state = asimapd::session::State::Authenticated;
  Fixture { root, pipe, session }
}

impl Fixture {
  /// Sends one command line and returns everything the session wrote in response.
  pub fn command(&mut self, line: &str) -> String {
    self.pipe.push_input(format!("{line}\r\n").as_bytes());
    self.session.step().unwrap();
    self.pipe.take_output()
  }

  /// Appends a literal (non-synchronizing, since nothing here drives the `+` continuation) RFC
  /// 822 message directly into a mailbox via `APPEND`.
  pub fn append(&mut self, mailbox: &str, message: &[u8]) -> String {
    let line = format!("a APPEND {mailbox} {{{}+}}\r\n", message.len());
    self.pipe.push_input(line.as_bytes());
    self.pipe.push_input(message);
    self.pipe.push_input(b"\r\n");
    self.session.step().unwrap();
    self.pipe.take_output()
  }
}

pub fn email(subject: &str, body: &str) -> Vec<u8> {
  format!("From: sender@example.com\r\nTo: fred@example.com\r\nSubject: {subject}\r\nDate: Mon, 1 Jan 2024 10:00:00 +0000\r\n\r\n{body}\r\n").into_bytes()
}
