//! Server entry points: a TCP listener producing server-role sessions, or
//! taking over an established duplex transport directly.

use std::net::SocketAddr;

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::net::TcpListener;
use tokio::net::ToSocketAddrs;

use crate::headers::HeaderCodec;
use crate::headers::PlainHeaderCodec;
use crate::mux::conf::Config;
use crate::mux::driver;
use crate::mux::event::SessionEvents;
use crate::mux::handle::Session;
use crate::mux::role::Role;

/// Listens for connections; each accepted connection becomes one
/// server-role [`Session`]. Peer-initiated request streams arrive as
/// `SessionEvent::Stream` events.
pub struct Server {
    listener: TcpListener,
    conf: Config,
}

impl Server {
    pub async fn bind<A: ToSocketAddrs>(addr: A, conf: Config) -> crate::Result<Server> {
        conf.settings.validate()?;
        let listener = TcpListener::bind(addr).await?;
        Ok(Server { listener, conf })
    }

    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one connection and run a session over it.
    pub async fn accept(&self) -> crate::Result<(Session, SessionEvents)> {
        let (socket, peer) = self.listener.accept().await?;
        debug!("accepted connection from {}", peer);
        socket.set_nodelay(true)?;
        Ok(handshake(socket, self.conf.clone())?)
    }
}

/// Run a server-role session over an established duplex transport,
/// taking full ownership of it.
pub fn handshake<S>(io: S, conf: Config) -> crate::Result<(Session, SessionEvents)>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    handshake_with_codec(io, conf, Box::new(PlainHeaderCodec::default()))
}

/// [`handshake`] with a custom header compression engine.
pub fn handshake_with_codec<S>(
    io: S,
    conf: Config,
    codec: Box<dyn HeaderCodec>,
) -> crate::Result<(Session, SessionEvents)>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    conf.settings.validate()?;
    Ok(driver::start(
        io,
        Role::Server,
        conf,
        codec,
        None,
        "http".to_owned(),
    ))
}
