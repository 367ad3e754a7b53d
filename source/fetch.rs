// Renders a single message's `msg_att` response line for FETCH (spec.md §4.4). Sequence-number
// vs UID framing and the surrounding `* n FETCH (...)` wrapper are `session.rs`'s job; this
// module only turns one `FetchItem` into its rendered piece.

use crate::mailbox::MessageRecord;
use crate::message::ParsedMessage;
use crate::wire::response::flag_list;
use crate::wire::types::FetchItem;

/// Appends one rendered `msg_att` piece to `out`. Takes raw bytes rather than building a `String`
/// so a `BODY[...]` fetch of a non-UTF-8 message returns the exact octets that were APPENDed
/// (spec.md §8), instead of replacing invalid sequences with U+FFFD.
pub fn render_item(out: &mut Vec<u8>, item: &FetchItem, record: &MessageRecord, parsed: &ParsedMessage) {
  match item {
    FetchItem::Flags => out.extend_from_slice(format!("FLAGS {}", flag_list(&record.flags)).as_bytes()),
    FetchItem::InternalDate => {
      let date = chrono::DateTime::<chrono::Utc>::from_timestamp(record.internal_date, 0).unwrap_or_default();
      out.extend_from_slice(format!("INTERNALDATE \"{}\"", ParsedMessage::render_internal_date(date)).as_bytes());
    }
    FetchItem::Rfc822Size => out.extend_from_slice(format!("RFC822.SIZE {}", record.size).as_bytes()),
    FetchItem::Uid => out.extend_from_slice(format!("UID {}", record.uid).as_bytes()),
    FetchItem::Envelope => out.extend_from_slice(format!("ENVELOPE {}", parsed.envelope()).as_bytes()),
    FetchItem::BodyStructure => out.extend_from_slice(format!("BODYSTRUCTURE {}", parsed.body_structure()).as_bytes()),
    FetchItem::Body => out.extend_from_slice(format!("BODY {}", parsed.body_structure()).as_bytes()),
    FetchItem::BodySection { peek: _, section, partial } => {
      let mut data = parsed.section(&section.raw);
      let mut offset = 0u32;
      if let Some((start, len)) = partial {
        offset = *start;
        let start = (*start as usize).min(data.len());
        let end = start.saturating_add(*len as usize).min(data.len());
        data = data[start..end].to_vec();
      }
      let tag = if section.raw.is_empty() { String::new() } else { section.raw.clone() };
      let partial_suffix = if partial.is_some() { format!("<{offset}>") } else { String::new() };
      out.extend_from_slice(format!("BODY[{tag}]{partial_suffix} {{{}}}\r\n", data.len()).as_bytes());
      out.extend_from_slice(&data);
    }
  }
}

/// `\Seen` is implicitly set by a non-peek `BODY[...]` fetch (RFC 3501 §6.4.5); callers check
/// this before persisting flags.
pub fn sets_seen(item: &FetchItem) -> bool {
  matches!(item, FetchItem::BodySection { peek: false, .. })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::wire::types::Section;

  fn record() -> MessageRecord {
    MessageRecord { uid: 7, key: 7, size: 42, internal_date: 1_700_000_000, flags: vec![] }
  }

  fn render(item: &FetchItem, record: &MessageRecord, parsed: &ParsedMessage) -> String {
    let mut out = Vec::new();
    render_item(&mut out, item, record, parsed);
    String::from_utf8(out).unwrap()
  }

  #[test]
  fn renders_uid_and_size() {
    let parsed = ParsedMessage::parse(b"Subject: x\r\n\r\nbody\r\n").unwrap();
    let rec = record();
    assert_eq!(render(&FetchItem::Uid, &rec, &parsed), "UID 7");
    assert_eq!(render(&FetchItem::Rfc822Size, &rec, &parsed), "RFC822.SIZE 42");
  }

  #[test]
  fn non_peek_body_section_sets_seen() {
    assert!(sets_seen(&FetchItem::BodySection { peek: false, section: Section { raw: String::new() }, partial: None }));
    assert!(!sets_seen(&FetchItem::BodySection { peek: true, section: Section { raw: String::new() }, partial: None }));
  }

  #[test]
  fn body_section_renders_literal_with_length() {
    let parsed = ParsedMessage::parse(b"Subject: x\r\n\r\nhello\r\n").unwrap();
    let rec = record();
    let rendered = render(
      &FetchItem::BodySection { peek: true, section: Section { raw: "TEXT".into() }, partial: None },
      &rec,
      &parsed,
    );
    assert!(rendered.starts_with("BODY[TEXT] {"));
  }
}
