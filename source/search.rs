// SEARCH predicate evaluator (spec.md §4.4). One predicate, one message; `search.rs` doesn't
// know about sequence numbers vs UIDs, which is `session.rs`'s job once it has a `Vec<bool>`.

use crate::mailbox::MessageRecord;
use crate::message::ParsedMessage;
use crate::wire::types::{Date, SearchKey};

pub struct Context<'a> {
  pub record: &'a MessageRecord,
  pub sequence_number: u32,
  pub parsed: &'a ParsedMessage<'a>,
}

fn date_to_days(d: Date) -> i64 {
  let Date::Ymd(y, m, day) = d;
  chrono::NaiveDate::from_ymd_opt(y, m, day)
    .map(|d| d.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp() / 86400)
    .unwrap_or(0)
}

fn internal_date_days(seconds: i64) -> i64 {
  seconds.div_euclid(86400)
}

fn header_contains(ctx: &Context, name: &str, needle: &str) -> bool {
  ctx
    .parsed
    .section(&format!("HEADER.FIELDS ({})", name.to_ascii_uppercase()))
    .windows(needle.len().max(1))
    .any(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}

fn body_contains(ctx: &Context, needle: &str) -> bool {
  let text = ctx.parsed.section("TEXT");
  String::from_utf8_lossy(&text).to_lowercase().contains(&needle.to_lowercase())
}

fn whole_message_contains(ctx: &Context, needle: &str) -> bool {
  String::from_utf8_lossy(ctx.parsed.raw).to_lowercase().contains(&needle.to_lowercase())
}

pub fn eval(key: &SearchKey, ctx: &Context) -> bool {
  use crate::wire::types::StandardFlag::*;
  let has = |f: crate::wire::types::StandardFlag| ctx.record.flags.contains(&crate::wire::types::Flag::Standard(f));
  match key {
    SearchKey::All => true,
    SearchKey::Answered => has(Answered),
    SearchKey::Unanswered => !has(Answered),
    SearchKey::Deleted => has(Deleted),
    SearchKey::Undeleted => !has(Deleted),
    SearchKey::Draft => has(Draft),
    SearchKey::Undraft => !has(Draft),
    SearchKey::Flagged => has(Flagged),
    SearchKey::Unflagged => !has(Flagged),
    SearchKey::Seen => has(Seen),
    SearchKey::Unseen => !has(Seen),
    SearchKey::Recent => has(Recent),
    SearchKey::New => has(Recent) && !has(Seen),
    SearchKey::Old => !has(Recent),
    SearchKey::Keyword(k) => ctx.record.flags.iter().any(|f| matches!(f, crate::wire::types::Flag::Keyword(kw) if kw == k)),
    SearchKey::Unkeyword(k) => !ctx.record.flags.iter().any(|f| matches!(f, crate::wire::types::Flag::Keyword(kw) if kw == k)),
    SearchKey::Larger(n) => ctx.record.size > *n,
    SearchKey::Smaller(n) => ctx.record.size < *n,
    SearchKey::Bcc(s) => header_contains(ctx, "Bcc", s),
    SearchKey::Cc(s) => header_contains(ctx, "Cc", s),
    SearchKey::From(s) => header_contains(ctx, "From", s),
    SearchKey::To(s) => header_contains(ctx, "To", s),
    SearchKey::Subject(s) => header_contains(ctx, "Subject", s),
    SearchKey::Header(name, s) => header_contains(ctx, name, s),
    SearchKey::Body(s) => body_contains(ctx, s),
    SearchKey::Text(s) => whole_message_contains(ctx, s),
    SearchKey::Before(d) => internal_date_days(ctx.record.internal_date) < date_to_days(*d),
    SearchKey::On(d) => internal_date_days(ctx.record.internal_date) == date_to_days(*d),
    SearchKey::Since(d) => internal_date_days(ctx.record.internal_date) >= date_to_days(*d),
    SearchKey::SentBefore(d) => internal_date_days(ctx.record.internal_date) < date_to_days(*d),
    SearchKey::SentOn(d) => internal_date_days(ctx.record.internal_date) == date_to_days(*d),
    SearchKey::SentSince(d) => internal_date_days(ctx.record.internal_date) >= date_to_days(*d),
    SearchKey::Uid(set) => set.iter().any(|r| r.contains(ctx.record.uid)),
    SearchKey::SequenceNumbers(set) => set.iter().any(|r| r.contains(ctx.sequence_number)),
    SearchKey::Not(inner) => !eval(inner, ctx),
    SearchKey::Or(a, b) => eval(a, ctx) || eval(b, ctx),
    SearchKey::And(keys) => keys.iter().all(|k| eval(k, ctx)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mailbox::MessageRecord;
  use crate::wire::types::{Flag, StandardFlag};

  fn record(uid: u32, size: u32, flags: Vec<Flag>) -> MessageRecord {
    MessageRecord { uid, key: uid, size, internal_date: 1_700_000_000, flags }
  }

  #[test]
  fn all_matches_everything() {
    let parsed = ParsedMessage::parse(b"Subject: x\r\n\r\nbody\r\n").unwrap();
    let rec = record(1, 5, vec![]);
    let ctx = Context { record: &rec, sequence_number: 1, parsed: &parsed };
    assert!(eval(&SearchKey::All, &ctx));
  }

  #[test]
  fn seen_and_unseen_are_complementary() {
    let parsed = ParsedMessage::parse(b"Subject: x\r\n\r\nbody\r\n").unwrap();
    let rec = record(1, 5, vec![Flag::Standard(StandardFlag::Seen)]);
    let ctx = Context { record: &rec, sequence_number: 1, parsed: &parsed };
    assert!(eval(&SearchKey::Seen, &ctx));
    assert!(!eval(&SearchKey::Unseen, &ctx));
  }

  #[test]
  fn or_and_not_compose() {
    let parsed = ParsedMessage::parse(b"Subject: x\r\n\r\nbody\r\n").unwrap();
    let rec = record(1, 5, vec![Flag::Standard(StandardFlag::Flagged)]);
    let ctx = Context { record: &rec, sequence_number: 1, parsed: &parsed };
    let key = SearchKey::Or(Box::new(SearchKey::Not(Box::new(SearchKey::Seen))), Box::new(SearchKey::Deleted));
    assert!(eval(&key, &ctx));
  }

  #[test]
  fn larger_and_smaller_compare_size() {
    let parsed = ParsedMessage::parse(b"Subject: x\r\n\r\nbody\r\n").unwrap();
    let rec = record(1, 100, vec![]);
    let ctx = Context { record: &rec, sequence_number: 1, parsed: &parsed };
    assert!(eval(&SearchKey::Larger(50), &ctx));
    assert!(!eval(&SearchKey::Smaller(50), &ctx));
  }
}
