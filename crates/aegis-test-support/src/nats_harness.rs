//! A local `nats-server` process for integration tests: tests need a real
//! JetStream backend (KV buckets, streams, queue groups) rather than a mock,
//! so this spawns the real binary on a scratch port and store directory.

use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::time::Duration as StdDuration;

use tempfile::TempDir;

use aegis_config::CoreConfig;

/// A running `nats-server -js` instance, torn down when dropped.
///
/// Requires `nats-server` to be on `PATH`; this is a test-only dependency on
/// the environment, never exercised outside `#[cfg(test)]`/integration
/// binaries.
pub struct NatsServerHarness {
    child: Child,
    port: u16,
    _store_dir: TempDir,
}

impl NatsServerHarness {
    /// Starts `nats-server -js` on an OS-assigned free port, storing
    /// JetStream state in a fresh temp directory.
    pub fn start() -> std::io::Result<Self> {
        let port = free_port()?;
        let store_dir = TempDir::new()?;

        let child = Command::new("nats-server")
            .arg("-js")
            .arg("-p")
            .arg(port.to_string())
            .arg("-sd")
            .arg(store_dir.path())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self {
            child,
            port,
            _store_dir: store_dir,
        })
    }

    /// The `nats://127.0.0.1:<port>` URL this instance is listening on.
    pub fn url(&self) -> String {
        format!("nats://127.0.0.1:{}", self.port)
    }

    /// A [`CoreConfig`] pointed at this instance, otherwise left at its
    /// defaults.
    pub fn config(&self) -> CoreConfig {
        CoreConfig {
            servers: vec![self.url()],
            ..CoreConfig::default()
        }
    }

    /// Blocks (with polling) until the server accepts TCP connections, or
    /// `timeout` elapses.
    pub fn wait_ready(&self, timeout: StdDuration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if std::net::TcpStream::connect(("127.0.0.1", self.port)).is_ok() {
                return true;
            }
            std::thread::sleep(StdDuration::from_millis(50));
        }
        false
    }
}

impl Drop for NatsServerHarness {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_port_is_nonzero() {
        let port = free_port().expect("binding an ephemeral port must succeed");
        assert!(port > 0);
    }
}
