use std::net::{SocketAddr, TcpListener};

use tracing::{debug, error};

use crate::error::SupervisorError;

/// Check that `addr` can be bound, without keeping it.
///
/// A throwaway listener is bound and dropped right away, so the caller can
/// bind for real. A conflict is fatal: the supervisor never retries and never
/// attempts the real bind after a failed check.
pub fn ensure_port_available(addr: SocketAddr) -> Result<(), SupervisorError> {
    match TcpListener::bind(addr) {
        Ok(listener) => {
            debug!("port check passed for {}", addr);
            drop(listener);
            Ok(())
        }
        Err(source) => {
            error!("port check failed for {}: {}", addr, source);
            Err(SupervisorError::PortUnavailable {
                addr: addr.to_string(),
                source,
            })
        }
    }
}
