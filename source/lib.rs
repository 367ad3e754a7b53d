// https://www.rfc-editor.org/rfc/rfc3501 - IMAP4rev1
// https://www.rfc-editor.org/rfc/rfc4315 - UIDPLUS
// https://www.rfc-editor.org/rfc/rfc5256 - SORT / THREAD
// https://www.rfc-editor.org/rfc/rfc5258 - LIST-EXTENDED
// https://www.rfc-editor.org/rfc/rfc5267 - CONTEXT/SEARCH and CONTEXT/SORT
// https://www.rfc-editor.org/rfc/rfc5819 - LIST-STATUS
// https://www.rfc-editor.org/rfc/rfc6851 - MOVE

pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod fetch;
pub mod mailbox;
pub mod mailstore;
pub mod message;
pub mod search;
pub mod session;
pub mod sort;
pub mod tls;
pub mod trace;
pub mod userserver;
pub mod wire;

use anyhow::Context as _;

pub fn run(arguments: config::Arguments) -> anyhow::Result<()> {
  let dispatcher = dispatcher::Dispatcher::new(arguments).context("initializing dispatcher")?;
  dispatcher.run()
}
