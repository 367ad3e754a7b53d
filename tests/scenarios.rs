// End-to-end command scenarios: SELECT, APPEND, FETCH, STORE, EXPUNGE, UNSELECT/CLOSE behavior.

mod common;

use test_log::test;

#[test]
fn select_on_empty_inbox_reports_zero_exists() {
  let mut fixture = common::fixture();
  let response = fixture.command("a SELECT INBOX");
  assert!(response.contains("* 0 EXISTS"));
  assert!(response.contains("* 0 RECENT"));
  assert!(response.contains("a OK [READ-WRITE] SELECT completed"));
}

#[test]
fn append_then_select_sees_the_message() {
  let mut fixture = common::fixture();
  let append_response = fixture.append("INBOX", &common::email("hello", "body text"));
  assert!(append_response.contains("OK [APPENDUID"));
  let response = fixture.command("a SELECT INBOX");
  assert!(response.contains("* 1 EXISTS"));
}

#[test]
fn fetch_flags_and_body_after_append() {
  let mut fixture = common::fixture();
  fixture.append("INBOX", &common::email("hi", "hello world"));
  fixture.command("a SELECT INBOX");
  let response = fixture.command("a FETCH 1 (FLAGS UID RFC822.SIZE)");
  assert!(response.contains("* 1 FETCH ("));
  assert!(response.contains("UID 1"));
  assert!(response.contains("a OK FETCH completed"));
}

#[test]
fn fetch_body_sets_seen_flag() {
  let mut fixture = common::fixture();
  fixture.append("INBOX", &common::email("hi", "hello world"));
  fixture.command("a SELECT INBOX");
  fixture.command("a FETCH 1 (BODY[])");
  let response = fixture.command("a FETCH 1 (FLAGS)");
  assert!(response.contains("\\Seen"));
}

#[test]
fn store_add_deleted_flag_then_expunge_removes_it() {
  let mut fixture = common::fixture();
  fixture.append("INBOX", &common::email("bye", "doomed"));
  fixture.command("a SELECT INBOX");
  let store_response = fixture.command("a STORE 1 +FLAGS (\\Deleted)");
  assert!(store_response.contains("\\Deleted"));
  let expunge_response = fixture.command("a EXPUNGE");
  assert!(expunge_response.contains("* 1 EXPUNGE"));
  assert!(expunge_response.contains("a OK EXPUNGE completed"));
  let status_response = fixture.command("a STATUS INBOX (MESSAGES)");
  assert!(status_response.contains("MESSAGES 0"));
}

#[test]
fn store_silent_omits_untagged_fetch_response() {
  let mut fixture = common::fixture();
  fixture.append("INBOX", &common::email("s", "body"));
  fixture.command("a SELECT INBOX");
  let response = fixture.command("a STORE 1 +FLAGS.SILENT (\\Flagged)");
  assert!(!response.contains("FETCH"));
  assert!(response.contains("a OK STORE completed"));
}

#[test]
fn close_expunges_deleted_without_reporting_them() {
  let mut fixture = common::fixture();
  fixture.append("INBOX", &common::email("bye", "doomed"));
  fixture.command("a SELECT INBOX");
  fixture.command("a STORE 1 +FLAGS (\\Deleted)");
  let close_response = fixture.command("a CLOSE");
  assert!(!close_response.contains("EXPUNGE"));
  assert!(close_response.contains("a OK CLOSE completed"));
}

#[test]
fn unselect_leaves_messages_untouched() {
  let mut fixture = common::fixture();
  fixture.append("INBOX", &common::email("keep", "body"));
  fixture.command("a SELECT INBOX");
  fixture.command("a STORE 1 +FLAGS (\\Deleted)");
  fixture.command("a UNSELECT");
  let status_response = fixture.command("a STATUS INBOX (MESSAGES)");
  assert!(status_response.contains("MESSAGES 1"));
}

#[test]
fn create_list_and_delete_a_subfolder() {
  let mut fixture = common::fixture();
  fixture.command("a CREATE Archive");
  let list_response = fixture.command("a LIST \"\" \"*\"");
  assert!(list_response.contains("Archive"));
  fixture.command("a DELETE Archive");
  let list_after = fixture.command("a LIST \"\" \"*\"");
  assert!(!list_after.contains("Archive"));
}

#[test]
fn idle_completes_on_done() {
  let mut fixture = common::fixture();
  fixture.command("a SELECT INBOX");
  fixture.pipe.push_input(b"a IDLE\r\n");
  fixture.pipe.push_input(b"DONE\r\n");
  fixture.session.step().unwrap();
  let response = fixture.pipe.take_output();
  assert!(response.contains("+ idling"));
  assert!(response.contains("a OK IDLE terminated"));
}
