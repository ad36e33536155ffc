//! Client entry points: connect to an authority over TCP, or take over an
//! already-established duplex transport.

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;

use crate::error::Error;
use crate::headers::HeaderCodec;
use crate::headers::PlainHeaderCodec;
use crate::mux::conf::Config;
use crate::mux::driver;
use crate::mux::event::SessionEvents;
use crate::mux::handle::Session;
use crate::mux::role::Role;

/// Scheme, host and port of a connect authority.
#[derive(Debug, PartialEq, Eq)]
pub struct Authority {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

/// Parse `[scheme://]host[:port]`, defaulting the port by scheme
/// (80 for `http`, 443 for `https`).
pub fn parse_authority(authority: &str) -> crate::Result<Authority> {
    let (scheme, rest) = match authority.find("://") {
        Some(pos) => (&authority[..pos], &authority[pos + 3..]),
        None => ("http", authority),
    };

    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        other => return Err(Error::UnsupportedScheme(other.to_owned())),
    };

    let rest = rest.trim_end_matches('/');
    let (host, port) = match rest.rfind(':') {
        Some(pos) => {
            let port = rest[pos + 1..]
                .parse::<u16>()
                .map_err(|_| Error::InvalidAuthority(authority.to_owned()))?;
            (&rest[..pos], port)
        }
        None => (rest, default_port),
    };

    if host.is_empty() {
        return Err(Error::InvalidAuthority(authority.to_owned()));
    }

    Ok(Authority {
        scheme: scheme.to_owned(),
        host: host.to_owned(),
        port,
    })
}

/// Connect to `authority` and run a client-role session over the
/// connection.
///
/// Returns immediately: the session handle is usable at once, and
/// operations issued before the socket is connected are queued and
/// replayed in order. Connection failures surface as an `Error` followed
/// by `Closed` on the event queue.
///
/// Only plain `http` is dialed here; for `https`, establish TLS first and
/// hand the stream to [`handshake`].
pub fn connect(authority: &str, conf: Config) -> crate::Result<(Session, SessionEvents)> {
    conf.settings.validate()?;
    let authority = parse_authority(authority)?;
    if authority.scheme != "http" {
        return Err(Error::UnsupportedScheme(authority.scheme));
    }

    let addr = format!("{}:{}", authority.host, authority.port);
    let host_authority = format!("{}:{}", authority.host, authority.port);

    Ok(driver::start_connect(
        async move { TcpStream::connect(addr).await.map_err(Error::from) },
        Role::Client,
        conf,
        Box::new(PlainHeaderCodec::default()),
        Some(host_authority),
        authority.scheme,
    ))
}

/// Run a client-role session over an established duplex transport,
/// taking full ownership of it. `authority` fills in `:authority` and
/// `:scheme` defaults on requests.
pub fn handshake<S>(io: S, authority: &str, conf: Config) -> crate::Result<(Session, SessionEvents)>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    handshake_with_codec(io, authority, conf, Box::new(PlainHeaderCodec::default()))
}

/// [`handshake`] with a custom header compression engine.
pub fn handshake_with_codec<S>(
    io: S,
    authority: &str,
    conf: Config,
    codec: Box<dyn HeaderCodec>,
) -> crate::Result<(Session, SessionEvents)>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    conf.settings.validate()?;
    let authority = parse_authority(authority)?;
    let host_authority = format!("{}:{}", authority.host, authority.port);
    Ok(driver::start(
        io,
        Role::Client,
        conf,
        codec,
        Some(host_authority),
        authority.scheme,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_host() {
        assert_eq!(
            Authority {
                scheme: "http".to_owned(),
                host: "example.com".to_owned(),
                port: 80,
            },
            parse_authority("example.com").unwrap()
        );
    }

    #[test]
    fn parse_scheme_defaults_port() {
        assert_eq!(443, parse_authority("https://example.com").unwrap().port);
        assert_eq!(80, parse_authority("http://example.com/").unwrap().port);
    }

    #[test]
    fn parse_explicit_port() {
        let authority = parse_authority("http://localhost:8080").unwrap();
        assert_eq!("localhost", authority.host);
        assert_eq!(8080, authority.port);
    }

    #[test]
    fn parse_rejects_unknown_scheme() {
        assert!(matches!(
            parse_authority("ftp://example.com"),
            Err(Error::UnsupportedScheme(..))
        ));
    }

    #[test]
    fn parse_rejects_empty_host() {
        assert!(parse_authority("http://").is_err());
    }
}
