use log::{error, info};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::routes::routes;
use crate::error_handling::types::WebError;
use crate::launcher::Launcher;

/// Local HTTP control interface and status page
pub struct WebServer {
    launcher: Arc<Launcher>,
}

impl WebServer {
    pub fn new(launcher: Arc<Launcher>) -> Self {
        Self { launcher }
    }

    /// The control interface only ever listens on loopback.
    pub fn address(port: u16) -> SocketAddr {
        ([127, 0, 0, 1], port).into()
    }

    /// Binding inside the server panics, so probe the address first.
    fn check_bind(addr: SocketAddr) -> Result<(), WebError> {
        let listener = TcpListener::bind(addr).map_err(|e| {
            error!("Cannot listen on {}: {}", addr, e);
            WebError::BindFailed(format!("{}: {}", addr, e))
        })?;
        drop(listener);
        Ok(())
    }

    /// Serves until `shutdown` is cancelled.
    pub async fn start(&self, port: u16, shutdown: CancellationToken) -> Result<(), WebError> {
        let addr = Self::address(port);
        Self::check_bind(addr)?;

        info!("Control interface listening on http://{}", addr);
        let server = warp::serve(routes(self.launcher.clone())).run(addr);

        tokio::select! {
            _ = server => {}
            _ = shutdown.cancelled() => info!("Control interface shutting down"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_check_reports_port_in_use() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        match WebServer::check_bind(addr) {
            Err(WebError::BindFailed(msg)) => assert!(msg.contains(&addr.to_string())),
            Ok(()) => panic!("bind to an occupied port should fail"),
        }

        drop(taken);
        assert!(WebServer::check_bind(addr).is_ok());
    }

    #[test]
    fn listens_on_loopback_only() {
        assert!(WebServer::address(8890).ip().is_loopback());
    }
}
