// Main dispatcher (spec.md §4.6): accepts TLS connections, enforces auth throttling, and drives
// each authenticated connection's `Session` loop on its own thread. Per SPEC_FULL.md §5/§9, the
// "per-user worker process" of the original design is modeled here as a `UserServer` reached
// through `Arc`, not a forked/setuid OS process (see DESIGN.md for the rationale).

use crate::config::Arguments;
use crate::session::Session;
use crate::userserver::{new_registry, UserRegistry};
use anyhow::Context as _;
use log::{error, info, warn};
use rustls::{ServerConnection, StreamOwned};
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const AUTH_FAILURE_WINDOW: Duration = Duration::from_secs(90);
const AUTH_FAILURE_LIMIT: usize = 3;
/// New-folder sweep interval (spec.md §4.3): how often each running `UserServer` rescans its
/// mailstore for folders created outside this server (e.g. by another MH tool).
const FOLDER_SCAN_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Worker eviction rule (spec.md §4.6 point 3): a `UserServer` with no open connections for this
/// long is dropped from the registry.
const WORKER_IDLE_TIMEOUT_SECS: i64 = 30 * 60;

#[derive(Default)]
struct Throttle {
  failures: HashMap<std::net::IpAddr, Vec<Instant>>,
}

impl Throttle {
  fn record_failure(&mut self, addr: std::net::IpAddr) {
    let now = Instant::now();
    let entries = self.failures.entry(addr).or_default();
    entries.retain(|t| now.duration_since(*t) < AUTH_FAILURE_WINDOW);
    entries.push(now);
  }

  fn is_throttled(&mut self, addr: std::net::IpAddr) -> bool {
    let now = Instant::now();
    let entries = self.failures.entry(addr).or_default();
    entries.retain(|t| now.duration_since(*t) < AUTH_FAILURE_WINDOW);
    entries.len() >= AUTH_FAILURE_LIMIT
  }
}

pub struct Dispatcher {
  args: Arguments,
  tls_config: Arc<rustls::ServerConfig>,
  throttle: Arc<Mutex<Throttle>>,
  users: UserRegistry,
}

impl Dispatcher {
  pub fn new(args: Arguments) -> anyhow::Result<Self> {
    let tls_config = crate::tls::load_server_config(&args.cert, &args.key).context("loading TLS material")?;
    Ok(Self { args, tls_config, throttle: Arc::new(Mutex::new(Throttle::default())), users: new_registry() })
  }

  pub fn run(&self) -> anyhow::Result<()> {
    let supervisor_users = self.users.clone();
    std::thread::spawn(move || run_supervisor(supervisor_users));

    let listener = TcpListener::bind((self.args.address.as_str(), self.args.port))
      .with_context(|| format!("binding {}:{}", self.args.address, self.args.port))?;
    info!("listening on {}:{}", self.args.address, self.args.port);
    for incoming in listener.incoming() {
      let stream = match incoming {
        Ok(s) => s,
        Err(e) => {
          warn!("accept failed: {e}");
          continue;
        }
      };
      let peer = stream.peer_addr().ok();
      let tls_config = self.tls_config.clone();
      let throttle = self.throttle.clone();
      let pwfile = self.args.pwfile.clone();
      let literal_cap = self.args.literal_cap;
      let users = self.users.clone();
      std::thread::spawn(move || {
        if let Err(e) = handle_connection(stream, peer, tls_config, throttle, pwfile, literal_cap, users) {
          error!("connection error: {e:#}");
        }
      });
    }
    Ok(())
  }
}

/// Background housekeeping (spec.md §4.3, §4.6 point 3): periodically sweeps every running
/// `UserServer` for folders created outside this server, and evicts workers that have sat with no
/// open connections past the idle timeout.
fn run_supervisor(users: UserRegistry) {
  loop {
    std::thread::sleep(FOLDER_SCAN_INTERVAL);
    let snapshot: Vec<Arc<crate::userserver::UserServer>> = users.lock().unwrap().values().cloned().collect();
    for server in &snapshot {
      match server.scan_for_new_folders() {
        Ok(discovered) if !discovered.is_empty() => info!("{}: discovered new folders {discovered:?}", server.username),
        Ok(_) => {}
        Err(e) => warn!("{}: folder scan failed: {e:#}", server.username),
      }
    }
    users.lock().unwrap().retain(|_, server| !server.idle_past(WORKER_IDLE_TIMEOUT_SECS));
  }
}

fn handle_connection(
  stream: TcpStream,
  peer: Option<SocketAddr>,
  tls_config: Arc<rustls::ServerConfig>,
  throttle: Arc<Mutex<Throttle>>,
  pwfile: std::path::PathBuf,
  literal_cap: usize,
  users: UserRegistry,
) -> anyhow::Result<()> {
  if let Some(addr) = peer {
    if throttle.lock().unwrap().is_throttled(addr.ip()) {
      return Ok(());
    }
  }
  let connection = ServerConnection::new(tls_config).context("starting TLS handshake")?;
  let tls_stream = StreamOwned::new(connection, stream);
  let mut session = Session::new(tls_stream, literal_cap, pwfile, users);
  session.greet()?;
  let mut last_seen_failures = 0;
  loop {
    match session.step() {
      Ok(true) => {
        if session.auth_failures > last_seen_failures {
          last_seen_failures = session.auth_failures;
          if let Some(addr) = peer {
            throttle.lock().unwrap().record_failure(addr.ip());
          }
          // spec.md §4.6: the connection is closed after the fourth failure within it.
          if session.auth_failures >= 4 {
            break;
          }
        }
      }
      Ok(false) => break,
      Err(e) => {
        warn!("session error: {e:#}");
        break;
      }
    }
  }
  Ok(())
}
