use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// "Is some IP-capable network currently up" — consulted before every send
/// attempt and before every drain pass.
pub trait Connectivity: Send + Sync {
    fn is_up(&self) -> bool;
}

/// Probes connectivity by dialing a well-known endpoint with a short
/// timeout. A failed dial is reported as offline, never as an error.
pub struct TcpProbe {
    target: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        TcpProbe {
            target: target.into(),
            timeout,
        }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        // DNS-over-TCP port of a public resolver.
        Self::new("1.1.1.1:53", Duration::from_secs(1))
    }
}

impl Connectivity for TcpProbe {
    fn is_up(&self) -> bool {
        let Ok(addrs) = self.target.to_socket_addrs() else {
            return false;
        };
        for addr in addrs {
            if TcpStream::connect_timeout(&addr, self.timeout).is_ok() {
                return true;
            }
        }
        false
    }
}

/// Settable connectivity state, for tests and for hosts that push network
/// status instead of being polled.
pub struct Switch {
    up: AtomicBool,
}

impl Switch {
    pub fn new(up: bool) -> Self {
        Switch {
            up: AtomicBool::new(up),
        }
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::Relaxed);
    }
}

impl Connectivity for Switch {
    fn is_up(&self) -> bool {
        self.up.load(Ordering::Relaxed)
    }
}
