// Server-side TLS (spec.md §4.6, §6): `rustls::ServerConfig` loaded from `--cert`/`--key` PEM
// files via `rustls-pemfile`. The teacher only ever builds a `ClientConnection` (it's a client);
// this is the server-side counterpart of the same `rustls` major version, keeping `tls12` enabled
// for interoperability with older IMAP clients the way the teacher's feature set does.

use anyhow::{bail, Context as _};
use rustls::{Certificate, PrivateKey, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

pub fn load_server_config(cert_path: &Path, key_path: &Path) -> anyhow::Result<Arc<ServerConfig>> {
  let certs = load_certs(cert_path)?;
  let key = load_key(key_path)?;
  let config = ServerConfig::builder()
    .with_safe_defaults()
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .context("building rustls ServerConfig from cert/key")?;
  Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> anyhow::Result<Vec<Certificate>> {
  let file = File::open(path).with_context(|| format!("opening cert file {path:?}"))?;
  let mut reader = BufReader::new(file);
  let raw = rustls_pemfile::certs(&mut reader).with_context(|| format!("parsing PEM certs from {path:?}"))?;
  if raw.is_empty() {
    bail!("no certificates found in {path:?}");
  }
  Ok(raw.into_iter().map(Certificate).collect())
}

fn load_key(path: &Path) -> anyhow::Result<PrivateKey> {
  let file = File::open(path).with_context(|| format!("opening key file {path:?}"))?;
  let mut reader = BufReader::new(file);
  let pkcs8 = rustls_pemfile::pkcs8_private_keys(&mut reader).with_context(|| format!("parsing PKCS8 key from {path:?}"))?;
  if let Some(key) = pkcs8.into_iter().next() {
    return Ok(PrivateKey(key));
  }
  let file = File::open(path)?;
  let mut reader = BufReader::new(file);
  let rsa = rustls_pemfile::rsa_private_keys(&mut reader).with_context(|| format!("parsing RSA key from {path:?}"))?;
  rsa.into_iter().next().map(PrivateKey).with_context(|| format!("no private key found in {path:?}"))
}
