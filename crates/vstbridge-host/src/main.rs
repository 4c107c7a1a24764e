//! Host executable: binds the loopback listener, announces the port on
//! stdout, accepts one client and serves it until shutdown.

use std::io::Write as _;

use tracing::{error, info};

use vstbridge_host::server::{bind_loopback, ProtocolServer};

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let listener = match bind_loopback() {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "failed to bind loopback listener");
            return std::process::ExitCode::FAILURE;
        }
    };
    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            error!(error = %e, "listener has no local address");
            return std::process::ExitCode::FAILURE;
        }
    };

    // Out-of-band handshake: the client scrapes this line off stdout.
    println!("PORT={port}");
    let _ = std::io::stdout().flush();
    info!(port, "listening on 127.0.0.1, waiting for one client");

    let stream = match listener.accept() {
        Ok((stream, peer)) => {
            info!(%peer, "client connected");
            stream
        }
        Err(e) => {
            error!(error = %e, "accept failed");
            return std::process::ExitCode::FAILURE;
        }
    };
    drop(listener);

    let mut server = ProtocolServer::new();
    if let Err(e) = server.run(stream) {
        error!(error = %e, "session ended with error");
        return std::process::ExitCode::FAILURE;
    }

    info!("host shut down");
    std::process::ExitCode::SUCCESS
}
