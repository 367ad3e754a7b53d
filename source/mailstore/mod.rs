// https://rfc-editor.org/rfc/rfc2076 (MH mailbox format, informally) -- one directory per
// folder, messages named by positive decimal integers, a `.mh_sequences` file naming
// flag-like message sets.
//
// Grounded on the shape of the teacher's `maildir.rs` (a `Builder` that resolves a mailbox name
// to a canonicalized on-disk directory, a folder type that exposes the handful of filesystem
// operations the rest of the program needs) but holding MH semantics rather than Maildir++: no
// cur/new/tmp, no `maildirfolder` marker, hierarchy via `.` in the directory name rather than a
// configurable separator (MH has no Maildir++-style separator concept).

pub mod sequences;

use anyhow::Context as _;
use std::{fs, io, path};

pub use sequences::Sequences;

#[derive(Debug)]
pub struct Builder {
  root: path::PathBuf,
}

#[derive(Debug)]
pub struct Folder {
  path: path::PathBuf,
  root: bool,
}

impl Builder {
  pub fn new(root: &path::Path) -> io::Result<Self> {
    fs::create_dir_all(root)?;
    Ok(Self { root: root.to_path_buf() })
  }

  pub fn root(&self) -> &path::Path {
    self.root.as_path()
  }

  /// Resolves an IMAP mailbox name (already UTF-7 decoded, `/`-separated) to its on-disk MH
  /// folder, creating the directory (but not the folder's contents) if `create` is set.
  pub fn folder(&self, mailbox: &str, create: bool) -> io::Result<Folder> {
    let (path, root) = if mailbox.eq_ignore_ascii_case("INBOX") {
      (self.root.clone(), true)
    } else {
      let mut directory = String::new();
      for segment in mailbox.split('/') {
        directory.push('.');
        directory.push_str(segment);
      }
      (self.root.join(directory), false)
    };
    Folder::new(path, root, create)
  }

  /// Enumerates existing subfolders under the root, for the background "find new folders" scan.
  pub fn list_folders(&self) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(&self.root)? {
      let entry = entry?;
      let file_name = entry.file_name();
      let Some(name) = file_name.to_str() else { continue };
      if let Some(stripped) = name.strip_prefix('.') {
        if entry.file_type()?.is_dir() {
          names.push(stripped.replace('.', "/"));
        }
      }
    }
    Ok(names)
  }
}

impl Folder {
  fn new(path: path::PathBuf, root: bool, create: bool) -> io::Result<Self> {
    if create {
      fs::create_dir_all(&path)?;
    }
    let path = if path.exists() { path.canonicalize()? } else { path };
    Ok(Self { path, root })
  }

  pub fn path(&self) -> &path::Path {
    self.path.as_path()
  }

  pub fn is_inbox(&self) -> bool {
    self.root
  }

  pub fn exists(&self) -> bool {
    self.path.is_dir()
  }

  pub fn remove(&self) -> io::Result<()> {
    fs::remove_dir_all(&self.path)
  }

  pub fn rename_to(&self, destination: &Folder) -> io::Result<()> {
    fs::rename(&self.path, &destination.path)
  }

  pub fn sequences_path(&self) -> path::PathBuf {
    self.path.join(".mh_sequences")
  }

  /// Sorted list of message keys currently present (MH messages are positive decimal integer
  /// filenames; anything else in the directory is ignored).
  pub fn message_keys(&self) -> io::Result<Vec<u32>> {
    let mut keys = Vec::new();
    for entry in fs::read_dir(&self.path)? {
      let entry = entry?;
      if let Some(name) = entry.file_name().to_str() {
        if let Ok(key) = name.parse::<u32>() {
          keys.push(key);
        }
      }
    }
    keys.sort_unstable();
    Ok(keys)
  }

  pub fn message_path(&self, key: u32) -> path::PathBuf {
    self.path.join(key.to_string())
  }

  pub fn read_message(&self, key: u32) -> io::Result<Vec<u8>> {
    fs::read(self.message_path(key))
  }

  /// Appends `data` as a new message, picking the next unused integer filename. MH has no
  /// reservation protocol across processes; the directory scan + rename-into-place pattern is
  /// the same "trust the filesystem's atomicity, re-read to detect interference" approach the
  /// teacher uses for its own tmp-file handoff in `maildir.rs`.
  pub fn append_message(&self, data: &[u8]) -> io::Result<u32> {
    let next = self.message_keys()?.last().copied().unwrap_or(0) + 1;
    let tmp = self.path.join(format!(".{next},"));
    fs::write(&tmp, data)?;
    fs::rename(&tmp, self.message_path(next))?;
    Ok(next)
  }

  pub fn remove_message(&self, key: u32) -> io::Result<()> {
    fs::remove_file(self.message_path(key))
  }

  pub fn metadata(&self) -> io::Result<fs::Metadata> {
    fs::metadata(&self.path)
  }

  pub fn sequences_metadata(&self) -> io::Result<Option<fs::Metadata>> {
    match fs::metadata(self.sequences_path()) {
      Ok(m) => Ok(Some(m)),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e),
    }
  }

  pub fn read_sequences(&self) -> anyhow::Result<Sequences> {
    match fs::read_to_string(self.sequences_path()) {
      Ok(contents) => Sequences::parse(&contents),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Sequences::default()),
      Err(e) => Err(e).with_context(|| format!("reading {:?}", self.sequences_path())),
    }
  }

  /// Rewrite `.mh_sequences` atomically (temp file + rename), matching the teacher's
  /// write-then-sync-then-rename discipline for message delivery.
  pub fn write_sequences(&self, sequences: &Sequences) -> anyhow::Result<()> {
    use std::io::Write as _;
    let tmp = self.path.join(".mh_sequences.tmp");
    let mut file = fs::File::create(&tmp).with_context(|| format!("creating {tmp:?}"))?;
    file.write_all(sequences.render().as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp, self.sequences_path())?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn inbox_resolves_to_root() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let folder = Builder::new(dir.path())?.folder("INBOX", false)?;
    assert_eq!(folder.path(), dir.path());
    assert!(folder.is_inbox());
    Ok(())
  }

  #[test]
  fn nested_mailbox_resolves_to_dotted_directory() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let builder = Builder::new(dir.path())?;
    let folder = builder.folder("Archive/2024", true)?;
    assert_eq!(folder.path(), dir.path().join(".Archive.2024"));
    assert!(!folder.is_inbox());
    assert!(folder.exists());
    Ok(())
  }

  #[test]
  fn append_message_picks_next_integer_filename() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let folder = Builder::new(dir.path())?.folder("INBOX", true)?;
    let k1 = folder.append_message(b"one")?;
    let k2 = folder.append_message(b"two")?;
    assert_eq!(k1, 1);
    assert_eq!(k2, 2);
    assert_eq!(folder.message_keys()?, vec![1, 2]);
    assert_eq!(folder.read_message(1)?, b"one");
    Ok(())
  }

  #[test]
  fn list_folders_strips_leading_dot_and_restores_hierarchy() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let builder = Builder::new(dir.path())?;
    builder.folder("Archive/2024", true)?;
    let mut names = builder.list_folders()?;
    names.sort();
    assert_eq!(names, vec!["Archive/2024".to_string()]);
    Ok(())
  }
}
