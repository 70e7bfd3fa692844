//! TCP command server: thread-per-connection, one line in, one line out
//! Chosen over an async runtime because the dispatcher needs
//! to change the *OS* scheduler priority of the thread handling each
//! command, which has no clean analogue for a task scheduled
//! onto a shared executor — the same reasoning `strand-cam` applies to its
//! own capture loops (`std::thread::spawn`, not `tokio::spawn`).

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::commands;
use crate::instrument::Instrument;

const ACCEPT_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Accept connections on `instrument.config.command.port_number` until
/// `shutdown` sets [`crate::state::ProcessState::shutdown_requested`].
/// Returns once the listener has been torn down.
pub fn run(instrument: Arc<Instrument>) -> std::io::Result<()> {
    let port = instrument.config.command.port_number;
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    listener.set_nonblocking(true)?;
    tracing::info!(port, "command server listening");

    while !instrument.state.shutdown_requested() {
        match listener.accept() {
            Ok((stream, addr)) => {
                let instrument = Arc::clone(&instrument);
                tracing::debug!(%addr, "accepted connection");
                std::thread::spawn(move || handle_connection(&instrument, stream));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_TIMEOUT);
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }

    tracing::info!("command server shutting down");
    Ok(())
}

/// One command per connection: read a line, dispatch it, write the reply,
/// close. There is no persistent session, so the simplest
/// faithful rendition is one line and done.
fn handle_connection(instrument: &Instrument, stream: TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!(error = %e, "failed to set TCP_NODELAY");
    }

    let peer = stream.peer_addr().ok();
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to clone connection for reading");
            return;
        }
    });
    let mut writer = stream;

    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => return, // peer closed without sending anything
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(?peer, error = %e, "failed to read command line");
            return;
        }
    }

    let reply = commands::handle(instrument, &line);
    if let Err(e) = writeln!(writer, "{reply}") {
        tracing::warn!(?peer, error = %e, "failed to write reply");
    }
}
