// SEARCH / ESEARCH / SORT / ESORT scenarios.

mod common;

use test_log::test;

// Bodies are deliberately of strictly increasing length (111 < 150 < 187 bytes once wrapped in
// headers) so SORT SIZE has an unambiguous, clock-independent ordering to check.
fn seed(fixture: &mut common::Fixture) {
  fixture.append("INBOX", &common::email("alpha", "short"));
  fixture.append("INBOX", &common::email("beta", "a medium length message mentions bananas here"));
  fixture.append("INBOX", &common::email("gamma", "a substantially longer message body than the other two for size ordering purposes"));
  fixture.command("a SELECT INBOX");
}

#[test]
fn search_all_returns_every_message() {
  let mut fixture = common::fixture();
  seed(&mut fixture);
  let response = fixture.command("a SEARCH ALL");
  assert!(response.contains("* SEARCH 1 2 3"));
}

#[test]
fn search_by_subject_substring() {
  let mut fixture = common::fixture();
  seed(&mut fixture);
  let response = fixture.command("a SEARCH SUBJECT beta");
  assert!(response.contains("* SEARCH 2"));
  assert!(!response.contains("* SEARCH 1"));
}

#[test]
fn search_body_substring_case_insensitive() {
  let mut fixture = common::fixture();
  seed(&mut fixture);
  let response = fixture.command("a SEARCH BODY bananas");
  assert!(response.contains("* SEARCH 2"));
}

#[test]
fn esearch_return_count() {
  let mut fixture = common::fixture();
  seed(&mut fixture);
  let response = fixture.command("a SEARCH RETURN (COUNT) ALL");
  assert!(response.contains("ESEARCH (TAG \"a\") COUNT 3"));
}

#[test]
fn esearch_return_min_and_max() {
  let mut fixture = common::fixture();
  seed(&mut fixture);
  let response = fixture.command("a SEARCH RETURN (MIN MAX) ALL");
  assert!(response.contains("MIN 1"));
  assert!(response.contains("MAX 3"));
}

#[test]
fn search_deleted_after_marking_one_message() {
  let mut fixture = common::fixture();
  seed(&mut fixture);
  fixture.command("a STORE 2 +FLAGS (\\Deleted)");
  let response = fixture.command("a SEARCH DELETED");
  assert!(response.contains("* SEARCH 2"));
  let response = fixture.command("a SEARCH UNDELETED");
  assert!(response.contains("1 3"));
}

#[test]
fn sort_by_subject() {
  let mut fixture = common::fixture();
  seed(&mut fixture);
  let response = fixture.command("a SORT (SUBJECT) ALL");
  assert!(response.starts_with("* SORT 1 2 3"));
}

#[test]
fn sort_reverse_size_is_largest_first() {
  let mut fixture = common::fixture();
  seed(&mut fixture);
  let response = fixture.command("a SORT (REVERSE SIZE) ALL");
  assert!(response.starts_with("* SORT 3 2 1"));
}
