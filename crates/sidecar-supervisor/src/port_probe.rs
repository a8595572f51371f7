//! Port availability checking.

use crate::LOOPBACK_HOST;

use std::io::ErrorKind;
use std::net::TcpListener;

use tracing::warn;

pub struct PortProbe;

impl PortProbe {
    /// Check if something already holds the port on the loopback interface.
    ///
    /// Attempts to bind 127.0.0.1:port. The socket is released as soon as
    /// the listener is dropped. Any bind failure counts as bound; a
    /// permission failure is logged because it usually means the port is
    /// reserved rather than occupied.
    pub fn is_port_bound(port: u16) -> bool {
        Self::is_port_bound_on(LOOPBACK_HOST, port)
    }

    /// Same check against a configured loopback host name.
    pub fn is_port_bound_on(host: &str, port: u16) -> bool {
        match TcpListener::bind((host, port)) {
            Ok(_) => false,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                warn!("Not permitted to bind {host}:{port}, treating it as bound: {e}");
                true
            }
            Err(_) => true,
        }
    }
}
