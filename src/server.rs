//! Listening socket and per-connection threads.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::protocol::timeouts;
use crate::session::Session;

pub struct Server {
    listener: TcpListener,
    root: PathBuf,
    chunk_size: u32,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    pub fn bind(config: &ServerConfig) -> Result<Self> {
        config.validate()?;
        let root = config
            .root
            .canonicalize()
            .with_context(|| format!("failed to canonicalize root path: {}", config.root.display()))?;
        let listener =
            TcpListener::bind(&config.bind).with_context(|| format!("bind {}", config.bind))?;
        listener
            .set_nonblocking(true)
            .context("set listener non-blocking")?;
        Ok(Self {
            listener,
            root,
            chunk_size: config.chunk_size,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Set to true to stop accepting; sessions close on their next idle poll.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Accept until shutdown, then wait for every session thread to end.
    pub fn serve(&self) -> Result<()> {
        info!(
            addr = %self.local_addr()?,
            root = %self.root.display(),
            chunk_size = self.chunk_size,
            "ferry daemon listening"
        );
        let mut sessions: Vec<JoinHandle<()>> = Vec::new();

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    info!(%peer, "connection accepted");
                    let root = self.root.clone();
                    let chunk_size = self.chunk_size;
                    let shutdown = Arc::clone(&self.shutdown);
                    let spawned = thread::Builder::new()
                        .name(format!("session-{}", peer))
                        .spawn(move || {
                            let session = Session::new(root, chunk_size);
                            match handle_conn(stream, session, &shutdown) {
                                Ok(()) => info!(%peer, "client disconnected"),
                                Err(e) => warn!(%peer, error = %e, "session ended with error"),
                            }
                        });
                    match spawned {
                        Ok(handle) => sessions.push(handle),
                        Err(e) => error!(%peer, error = %e, "cannot spawn session thread"),
                    }
                    sessions.retain(|h| !h.is_finished());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(timeouts::ACCEPT_POLL_MS));
                }
                Err(e) => {
                    warn!(error = %e, "accept error");
                }
            }
        }

        info!(active = sessions.len(), "shutting down, waiting for sessions");
        for handle in sessions {
            let _ = handle.join();
        }
        Ok(())
    }
}

/// Service one connection: announce the chunk size, then feed every read to
/// the session and write its replies back.
pub fn handle_conn(
    mut stream: TcpStream,
    mut session: Session,
    shutdown: &AtomicBool,
) -> Result<(), Error> {
    let result = (|| -> Result<(), Error> {
        stream.set_nonblocking(false).map_err(Error::Connection)?;
        stream.set_nodelay(true).map_err(Error::Connection)?;
        stream
            .set_read_timeout(Some(Duration::from_millis(timeouts::SESSION_POLL_MS)))
            .map_err(Error::Connection)?;
        write_message(&mut stream, &session.greeting().encode())?;

        let mut buf = [0u8; 4096];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    if shutdown.load(Ordering::SeqCst) {
                        debug!(idle = session.is_idle(), "closing session for shutdown");
                        return Ok(());
                    }
                    continue;
                }
                Err(e) => return Err(Error::Connection(e)),
            };
            for reply in session.on_bytes(&buf[..n])? {
                write_message(&mut stream, &reply.encode())?;
            }
        }
    })();
    session.close();
    result
}

fn write_message(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), Error> {
    stream.write_all(bytes).map_err(Error::Connection)
}
