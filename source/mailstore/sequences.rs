// `.mh_sequences`: one line per named set, `name: <tokens>` where each token is either a bare
// key or a hyphenated range (`a-b`), space separated. The classic MH private sequences (`cur`)
// are preserved verbatim but ignored by the IMAP layer; the reserved names this server cares
// about are mapped by `mailbox.rs` onto the IMAP system flags (spec.md §4.3): `unseen`'s
// complement is `\Seen`, `replied` is `\Answered`, `flagged` is `\Flagged`, `deleted` is
// `\Deleted`.

use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sequences {
  sets: BTreeMap<String, Vec<u32>>,
}

impl Sequences {
  pub fn parse(contents: &str) -> anyhow::Result<Self> {
    let mut sets = BTreeMap::new();
    for line in contents.lines() {
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }
      let Some((name, rest)) = line.split_once(':') else {
        continue;
      };
      let mut keys = Vec::new();
      for token in rest.split_whitespace() {
        if let Some((a, b)) = token.split_once('-') {
          let (a, b): (u32, u32) = (a.parse()?, b.parse()?);
          keys.extend(a..=b);
        } else {
          keys.push(token.parse()?);
        }
      }
      sets.insert(name.trim().to_string(), keys);
    }
    Ok(Self { sets })
  }

  pub fn render(&self) -> String {
    let mut out = String::new();
    for (name, keys) in &self.sets {
      if keys.is_empty() {
        continue;
      }
      let mut sorted = keys.clone();
      sorted.sort_unstable();
      sorted.dedup();
      let mut tokens = Vec::new();
      let mut i = 0;
      while i < sorted.len() {
        let start = sorted[i];
        let mut end = start;
        while i + 1 < sorted.len() && sorted[i + 1] == end + 1 {
          end = sorted[i + 1];
          i += 1;
        }
        if start == end {
          tokens.push(start.to_string());
        } else {
          tokens.push(format!("{start}-{end}"));
        }
        i += 1;
      }
      let _ = writeln!(out, "{name}: {}", tokens.join(" "));
    }
    out
  }

  pub fn get(&self, name: &str) -> &[u32] {
    self.sets.get(name).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn contains(&self, name: &str, key: u32) -> bool {
    self.sets.get(name).is_some_and(|keys| keys.binary_search(&key).is_ok())
  }

  pub fn set(&mut self, name: &str, keys: Vec<u32>) {
    if keys.is_empty() {
      self.sets.remove(name);
    } else {
      self.sets.insert(name.to_string(), keys);
    }
  }

  pub fn add(&mut self, name: &str, key: u32) {
    let keys = self.sets.entry(name.to_string()).or_default();
    if let Err(pos) = keys.binary_search(&key) {
      keys.insert(pos, key);
    }
  }

  pub fn remove(&mut self, name: &str, key: u32) {
    if let Some(keys) = self.sets.get_mut(name) {
      if let Ok(pos) = keys.binary_search(&key) {
        keys.remove(pos);
      }
    }
  }

  pub fn remove_key_everywhere(&mut self, key: u32) {
    for keys in self.sets.values_mut() {
      if let Ok(pos) = keys.binary_search(&key) {
        keys.remove(pos);
      }
    }
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.sets.keys().map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_ranges_and_bare_keys() {
    let seq = Sequences::parse("unseen: 1-3 5 7-9\nflagged: 2\n").unwrap();
    assert_eq!(seq.get("unseen"), &[1, 2, 3, 5, 7, 8, 9]);
    assert_eq!(seq.get("flagged"), &[2]);
  }

  #[test]
  fn ignores_blank_lines_and_comments() {
    let seq = Sequences::parse("\n# a comment\nreplied: 4\n").unwrap();
    assert_eq!(seq.get("replied"), &[4]);
  }

  #[test]
  fn render_collapses_runs_and_round_trips() {
    let mut seq = Sequences::default();
    seq.set("deleted", vec![1, 2, 3, 5]);
    let rendered = seq.render();
    assert_eq!(rendered, "deleted: 1-3 5\n");
    let reparsed = Sequences::parse(&rendered).unwrap();
    assert_eq!(reparsed, seq);
  }

  #[test]
  fn add_keeps_sorted_and_deduplicated() {
    let mut seq = Sequences::default();
    seq.add("flagged", 5);
    seq.add("flagged", 1);
    seq.add("flagged", 5);
    assert_eq!(seq.get("flagged"), &[1, 5]);
  }

  #[test]
  fn empty_set_is_removed_on_write() {
    let mut seq = Sequences::default();
    seq.set("deleted", vec![1]);
    seq.remove("deleted", 1);
    assert_eq!(seq.get("deleted"), &[] as &[u32]);
    assert_eq!(seq.render(), "");
  }
}
