use std::io::{self, Read};
use std::net::TcpListener;
use std::thread;

use tracing::{info, warn};

/// Listen on the Root's shutdown port for the configured shutdown command.
///
/// Accepts loopback connections; the first connection that sends exactly
/// the command triggers `on_shutdown` and ends the monitor. Anything else
/// is logged and ignored.
pub fn spawn_shutdown_monitor(
    port: u16,
    command: String,
    on_shutdown: impl FnOnce() + Send + 'static,
) -> io::Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    thread::Builder::new()
        .name("arbor-shutdown".to_string())
        .spawn(move || {
            let mut on_shutdown = Some(on_shutdown);
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut buf = [0u8; 128];
                let n = stream.read(&mut buf).unwrap_or(0);
                let received = String::from_utf8_lossy(&buf[..n]);
                if received.trim() == command {
                    info!(port = port, "Shutdown command received");
                    if let Some(f) = on_shutdown.take() {
                        f();
                    }
                    break;
                }
                warn!(port = port, "Invalid shutdown command received");
            }
        })?;
    Ok(())
}
