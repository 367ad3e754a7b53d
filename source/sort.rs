// SORT/ESORT (RFC 5256 subset, spec.md §4.4): stable sort on the requested key list, final
// tie-break by UID ascending.

use crate::mailbox::MessageRecord;
use crate::message::ParsedMessage;
use crate::wire::types::{SortCriterion, SortKey};
use std::cmp::Ordering;

pub struct Item<'a> {
  pub record: &'a MessageRecord,
  pub parsed: &'a ParsedMessage<'a>,
}

fn header(item: &Item, name: &str) -> String {
  let bytes = item.parsed.section(&format!("HEADER.FIELDS ({})", name.to_ascii_uppercase()));
  String::from_utf8_lossy(&bytes).trim().to_lowercase()
}

fn compare_one(a: &Item, b: &Item, key: SortKey) -> Ordering {
  match key {
    SortKey::Arrival => a.record.internal_date.cmp(&b.record.internal_date),
    SortKey::Date => a.record.internal_date.cmp(&b.record.internal_date),
    SortKey::Size => a.record.size.cmp(&b.record.size),
    SortKey::Cc => header(a, "Cc").cmp(&header(b, "Cc")),
    SortKey::From => header(a, "From").cmp(&header(b, "From")),
    SortKey::Subject => header(a, "Subject").cmp(&header(b, "Subject")),
    SortKey::To => header(a, "To").cmp(&header(b, "To")),
  }
}

pub fn sort<'a>(mut items: Vec<Item<'a>>, criteria: &[SortCriterion]) -> Vec<Item<'a>> {
  items.sort_by(|a, b| {
    for criterion in criteria {
      let ordering = compare_one(a, b, criterion.key);
      let ordering = if criterion.reverse { ordering.reverse() } else { ordering };
      if ordering != Ordering::Equal {
        return ordering;
      }
    }
    a.record.uid.cmp(&b.record.uid)
  });
  items
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::wire::types::Flag;

  fn record(uid: u32, size: u32, date: i64) -> MessageRecord {
    MessageRecord { uid, key: uid, size, internal_date: date, flags: Vec::<Flag>::new() }
  }

  #[test]
  fn sorts_by_size_ascending() {
    let parsed = ParsedMessage::parse(b"Subject: x\r\n\r\n\r\n").unwrap();
    let r1 = record(1, 300, 0);
    let r2 = record(2, 100, 0);
    let r3 = record(3, 200, 0);
    let items = vec![
      Item { record: &r1, parsed: &parsed },
      Item { record: &r2, parsed: &parsed },
      Item { record: &r3, parsed: &parsed },
    ];
    let sorted = sort(items, &[SortCriterion { key: SortKey::Size, reverse: false }]);
    let uids: Vec<u32> = sorted.iter().map(|i| i.record.uid).collect();
    assert_eq!(uids, vec![2, 3, 1]);
  }

  #[test]
  fn ties_break_by_ascending_uid() {
    let parsed = ParsedMessage::parse(b"Subject: x\r\n\r\n\r\n").unwrap();
    let r1 = record(5, 100, 0);
    let r2 = record(2, 100, 0);
    let items = vec![Item { record: &r1, parsed: &parsed }, Item { record: &r2, parsed: &parsed }];
    let sorted = sort(items, &[SortCriterion { key: SortKey::Size, reverse: false }]);
    let uids: Vec<u32> = sorted.iter().map(|i| i.record.uid).collect();
    assert_eq!(uids, vec![2, 5]);
  }

  #[test]
  fn reverse_flips_the_key_not_the_tiebreak() {
    let parsed = ParsedMessage::parse(b"Subject: x\r\n\r\n\r\n").unwrap();
    let r1 = record(1, 100, 10);
    let r2 = record(2, 100, 20);
    let items = vec![Item { record: &r1, parsed: &parsed }, Item { record: &r2, parsed: &parsed }];
    let sorted = sort(items, &[SortCriterion { key: SortKey::Date, reverse: true }]);
    let uids: Vec<u32> = sorted.iter().map(|i| i.record.uid).collect();
    assert_eq!(uids, vec![2, 1]);
  }
}
