// Password file verification (spec.md §6): `username:hash:maildir-root` lines, hash format
// `pbkdf2_sha256$<iterations>$<base64 salt>$<base64 derived key>`. Re-opened fresh on every
// authentication attempt so a live edit of the password file takes effect without a restart.

use anyhow::{bail, Context as _};
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use std::path::Path;
use zeroize::Zeroize;

pub struct Account {
  pub username: String,
  pub maildir_root: String,
}

struct Record {
  username: String,
  hash: String,
  maildir_root: String,
}

fn parse_line(line: &str) -> Option<Record> {
  let mut parts = line.splitn(3, ':');
  let username = parts.next()?.to_string();
  let hash = parts.next()?.to_string();
  let maildir_root = parts.next()?.to_string();
  Some(Record { username, hash, maildir_root })
}

fn verify_hash(hash: &str, mut password: Vec<u8>) -> bool {
  let result = (|| -> Option<bool> {
    let mut parts = hash.split('$');
    if parts.next()? != "pbkdf2_sha256" {
      return Some(false);
    }
    let iterations: u32 = parts.next()?.parse().ok()?;
    let salt = base64::engine::general_purpose::STANDARD.decode(parts.next()?).ok()?;
    let expected = base64::engine::general_purpose::STANDARD.decode(parts.next()?).ok()?;
    let mut derived = vec![0u8; expected.len()];
    pbkdf2_hmac::<Sha256>(&password, &salt, iterations, &mut derived);
    Some(constant_time_eq(&derived, &expected))
  })();
  password.zeroize();
  result.unwrap_or(false)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
  if a.len() != b.len() {
    return false;
  }
  let mut diff = 0u8;
  for (x, y) in a.iter().zip(b) {
    diff |= x ^ y;
  }
  diff == 0
}

/// Re-reads the password file and checks `username`/`password` against it. Returns `None` on
/// any failure (unknown user, bad hash, wrong password) without distinguishing which, per
/// spec.md §6's "no user enumeration via timing/response" intent.
pub fn authenticate(pwfile: &Path, username: &str, password: Vec<u8>) -> anyhow::Result<Option<Account>> {
  let contents = std::fs::read_to_string(pwfile).with_context(|| format!("reading {pwfile:?}"))?;
  for line in contents.lines() {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }
    let Some(record) = parse_line(line) else { continue };
    if record.username == username {
      return Ok(verify_hash(&record.hash, password).then_some(Account {
        username: record.username,
        maildir_root: record.maildir_root,
      }));
    }
  }
  Ok(None)
}

pub fn hash_password(password: &[u8], salt: &[u8], iterations: u32) -> anyhow::Result<String> {
  if salt.is_empty() {
    bail!("salt must not be empty");
  }
  let mut derived = vec![0u8; 32];
  pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut derived);
  Ok(format!(
    "pbkdf2_sha256${}${}${}",
    iterations,
    base64::engine::general_purpose::STANDARD.encode(salt),
    base64::engine::general_purpose::STANDARD.encode(derived),
  ))
}

/// RFC 3501 §6.2.2 AUTHENTICATE PLAIN SASL payload: `NUL authzid? NUL authcid NUL password`,
/// base64-encoded on the wire (already decoded by `wire::grammar` before reaching here).
pub fn parse_plain(initial: &[u8]) -> Option<(String, Vec<u8>)> {
  let mut fields = initial.splitn(3, |&b| b == 0);
  let _authzid = fields.next()?;
  let authcid = fields.next()?;
  let password = fields.next()?;
  Some((String::from_utf8(authcid.to_vec()).ok()?, password.to_vec()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn authenticates_known_user_with_correct_password() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("passwd");
    let hash = hash_password(b"sekret", b"fixed-salt-bytes", 1000).unwrap();
    std::fs::write(&path, format!("fred:{hash}:/home/fred/Mail\n")).unwrap();
    let account = authenticate(&path, "fred", b"sekret".to_vec()).unwrap().unwrap();
    assert_eq!(account.username, "fred");
    assert_eq!(account.maildir_root, "/home/fred/Mail");
  }

  #[test]
  fn rejects_wrong_password() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("passwd");
    let hash = hash_password(b"sekret", b"fixed-salt-bytes", 1000).unwrap();
    std::fs::write(&path, format!("fred:{hash}:/home/fred/Mail\n")).unwrap();
    assert!(authenticate(&path, "fred", b"wrong".to_vec()).unwrap().is_none());
  }

  #[test]
  fn rejects_unknown_user() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("passwd");
    std::fs::write(&path, "").unwrap();
    assert!(authenticate(&path, "nobody", b"x".to_vec()).unwrap().is_none());
  }

  #[test]
  fn parses_sasl_plain_payload() {
    let payload = [0u8].iter().chain(b"fred").chain([0u8].iter()).chain(b"sekret").copied().collect::<Vec<u8>>();
    let (user, pass) = parse_plain(&payload).unwrap();
    assert_eq!(user, "fred");
    assert_eq!(pass, b"sekret");
  }
}
