// CLI surface (spec.md §6): every flag mirrored by an environment variable via clap's `env`
// feature, matching the teacher's `clap::Args`-derived `Arguments` in the old `source/lib.rs`.

use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct Arguments {
  /// Address to listen on.
  #[arg(long, env = "ADDRESS", default_value = "::")]
  pub address: String,

  /// Port to listen on (993 for implicit TLS, 143 for STARTTLS).
  #[arg(long, env = "PORT", default_value_t = 993)]
  pub port: u16,

  /// TLS certificate chain, PEM encoded.
  #[arg(long, env = "SSL_CERT")]
  pub cert: PathBuf,

  /// TLS private key, PEM encoded.
  #[arg(long, env = "SSL_KEY")]
  pub key: PathBuf,

  /// Password file (`user:hash:maildir-root` lines).
  #[arg(long, env = "PWFILE")]
  pub pwfile: PathBuf,

  /// Enable verbose protocol debugging.
  #[arg(long, env = "DEBUG")]
  pub debug: bool,

  /// log4rs config file; falls back to the built-in console+file config when absent.
  #[arg(long, env = "LOG_CONFIG")]
  pub log_config: Option<PathBuf>,

  /// Record every frame exchanged with clients as JSON under this directory.
  #[arg(long, env = "TRACE_DIR")]
  pub trace_dir: Option<PathBuf>,

  /// Take an OS advisory lock around every `.mh_sequences` read/rewrite.
  #[arg(long, env = "ENABLE_MH_FILE_LOCKING")]
  pub enable_mh_file_locking: bool,

  /// Maximum literal size accepted from a client, in bytes.
  #[arg(long, default_value_t = 20 * 1024 * 1024)]
  pub literal_cap: usize,
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser)]
  struct Wrapper {
    #[command(flatten)]
    args: Arguments,
  }

  #[test]
  fn environment_variables_populate_required_flags() {
    let wrapper = Wrapper::try_parse_from([
      "asimapd",
      "--cert",
      "/tmp/cert.pem",
      "--key",
      "/tmp/key.pem",
      "--pwfile",
      "/tmp/passwd",
    ])
    .unwrap();
    assert_eq!(wrapper.args.port, 993);
    assert_eq!(wrapper.args.address, "::");
  }

  #[test]
  fn missing_required_flag_is_a_parse_error() {
    assert!(Wrapper::try_parse_from(["asimapd"]).is_err());
  }
}
