// Mailbox resync protocol (spec.md §4.3): picking up messages and sequence changes made directly
// on disk by something other than this server, the way another MH tool or a concurrent session
// would.

mod common;

use pretty_assertions::assert_eq;
use std::fs;
use test_log::test;

#[test]
fn externally_dropped_message_file_is_picked_up_as_new() {
  let mut fixture = common::fixture();
  fixture.command("a SELECT INBOX");
  // Drop a message straight into the MH folder the way `rcvstore`/procmail would, bypassing
  // this server's own APPEND path entirely.
  fs::write(fixture.root.path().join("1"), common::email("external", "dropped on disk")).unwrap();
  let response = fixture.command("a CHECK");
  assert!(response.contains("a OK CHECK completed"));
  let status = fixture.command("a STATUS INBOX (MESSAGES)");
  assert!(status.contains("MESSAGES 1"));
}

#[test]
fn externally_removed_message_file_triggers_expunge_on_check() {
  let mut fixture = common::fixture();
  fixture.append("INBOX", &common::email("a", "one"));
  fixture.command("a SELECT INBOX");
  fs::remove_file(fixture.root.path().join("1")).unwrap();
  let response = fixture.command("a CHECK");
  assert!(response.contains("a OK CHECK completed"));
  let status = fixture.command("a STATUS INBOX (MESSAGES)");
  assert!(status.contains("MESSAGES 0"));
}

#[test]
fn externally_edited_mh_sequences_updates_flags_on_resync() {
  let mut fixture = common::fixture();
  fixture.append("INBOX", &common::email("a", "one"));
  fixture.command("a SELECT INBOX");
  // Mark message 1 (key 1) as replied the way another MH tool would, by rewriting the sequences
  // file directly.
  fs::write(fixture.root.path().join(".mh_sequences"), "replied: 1\n").unwrap();
  fixture.command("a CHECK");
  let response = fixture.command("a FETCH 1 (FLAGS)");
  assert!(response.contains("\\Answered"));
}

#[test]
fn uidvalidity_is_stable_across_repeated_selects() {
  let mut fixture = common::fixture();
  fixture.append("INBOX", &common::email("a", "one"));
  let first = fixture.command("a SELECT INBOX");
  let second = fixture.command("a SELECT INBOX");
  let extract = |s: &str| s.lines().find(|l| l.contains("UIDVALIDITY")).unwrap().to_string();
  assert_eq!(extract(&first), extract(&second));
}
