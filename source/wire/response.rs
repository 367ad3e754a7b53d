// Response serialization: the encode side of the codec, counterpart to `grammar.rs`.
//
// Follows the same string/literal choice rule the teacher's parser decodes (`imap.rs`'s
// `string`/`literal` rules): an atom when every octet is plain ATOM-CHAR, a quoted string when
// it additionally needs no NUL/CR/LF/high-bit octet, and a literal otherwise. Numeric-set
// collapsing (consecutive runs rendered as `a:b`) follows RFC 3501's own EXAMPLE sections, which
// is also how the teacher's `sequence_set`/`uid_set` grammar groups ranges.

use super::types::{Flag, Range, SequenceSet, StandardFlag};

pub fn quote_or_literal(out: &mut Vec<u8>, s: &[u8]) {
  if s.is_empty() {
    out.extend_from_slice(b"\"\"");
    return;
  }
  let needs_literal = s.iter().any(|&b| b == 0 || b == b'\r' || b == b'\n' || b >= 0x80);
  if needs_literal {
    out.extend_from_slice(format!("{{{}}}\r\n", s.len()).as_bytes());
    out.extend_from_slice(s);
    return;
  }
  let needs_quote = s.iter().any(|&b| matches!(b, b' ' | b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b'\\') || b < 0x20);
  if !needs_quote {
    out.extend_from_slice(s);
    return;
  }
  out.push(b'"');
  for &b in s {
    if b == b'"' || b == b'\\' {
      out.push(b'\\');
    }
    out.push(b);
  }
  out.push(b'"');
}

pub fn flag_to_bytes(flag: &Flag) -> Vec<u8> {
  match flag {
    Flag::Standard(StandardFlag::Answered) => b"\\Answered".to_vec(),
    Flag::Standard(StandardFlag::Flagged) => b"\\Flagged".to_vec(),
    Flag::Standard(StandardFlag::Deleted) => b"\\Deleted".to_vec(),
    Flag::Standard(StandardFlag::Seen) => b"\\Seen".to_vec(),
    Flag::Standard(StandardFlag::Draft) => b"\\Draft".to_vec(),
    Flag::Standard(StandardFlag::Recent) => b"\\Recent".to_vec(),
    Flag::Keyword(k) => k.clone().into_bytes(),
    Flag::Star => b"\\*".to_vec(),
  }
}

pub fn flag_list(flags: &[Flag]) -> String {
  let rendered: Vec<String> = flags.iter().map(|f| String::from_utf8_lossy(&flag_to_bytes(f)).into_owned()).collect();
  format!("({})", rendered.join(" "))
}

/// Collapses a sorted, deduplicated list of numbers into RFC 3501 sequence-set notation,
/// merging adjacent runs into `a:b` ranges (e.g. `[1,2,3,5]` -> `"1:3,5"`).
pub fn collapse_set(mut numbers: Vec<u32>) -> String {
  numbers.sort_unstable();
  numbers.dedup();
  let mut parts = Vec::new();
  let mut i = 0;
  while i < numbers.len() {
    let start = numbers[i];
    let mut end = start;
    while i + 1 < numbers.len() && numbers[i + 1] == end + 1 {
      end = numbers[i + 1];
      i += 1;
    }
    if start == end {
      parts.push(start.to_string());
    } else {
      parts.push(format!("{start}:{end}"));
    }
    i += 1;
  }
  if parts.is_empty() {
    String::new()
  } else {
    parts.join(",")
  }
}

pub fn render_sequence_set(set: &SequenceSet) -> String {
  set
    .iter()
    .map(|Range(a, b)| if a == b { a.to_string() } else { format!("{a}:{b}") })
    .collect::<Vec<_>>()
    .join(",")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::wire::types::Range;

  #[test]
  fn plain_atom_is_unquoted() {
    let mut out = Vec::new();
    quote_or_literal(&mut out, b"INBOX");
    assert_eq!(out, b"INBOX");
  }

  #[test]
  fn space_forces_quoting() {
    let mut out = Vec::new();
    quote_or_literal(&mut out, b"My Folder");
    assert_eq!(out, b"\"My Folder\"");
  }

  #[test]
  fn embedded_quote_is_escaped() {
    let mut out = Vec::new();
    quote_or_literal(&mut out, br#"say "hi""#);
    assert_eq!(out, br#""say \"hi\"""#);
  }

  #[test]
  fn high_bit_octet_forces_literal() {
    let mut out = Vec::new();
    quote_or_literal(&mut out, &[0xC3, 0xA9]);
    assert_eq!(out, b"{2}\r\n\xC3\xA9");
  }

  #[test]
  fn collapses_consecutive_runs() {
    assert_eq!(collapse_set(vec![1, 2, 3, 5, 7, 8]), "1:3,5,7:8");
  }

  #[test]
  fn renders_sequence_set_ranges() {
    assert_eq!(render_sequence_set(&vec![Range(1, 1), Range(3, 5)]), "1,3:5");
  }
}
