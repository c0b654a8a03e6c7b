use std::fmt;
use std::io;
use std::net::{AddrParseError, Ipv4Addr, SocketAddr, SocketAddrV4};
#[cfg(unix)]
use std::path::PathBuf;
use std::str::FromStr;

use tarpc::{client, serde_transport, tokio_serde::formats::Json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::ServiceClient;

/// Reduce outputs travel inside a single `finish` frame, so allow the largest
/// frame a 4-byte length prefix can describe.
const MAX_FRAME_LENGTH: usize = u32::MAX as usize;

/// Where the coordinator listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Default for Endpoint {
    #[cfg(unix)]
    fn default() -> Self {
        Endpoint::Unix(PathBuf::from(format!(
            "/var/tmp/mr-{}.sock",
            whoami::username()
        )))
    }

    #[cfg(not(unix))]
    fn default() -> Self {
        Endpoint::Tcp(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1234).into())
    }
}

/// Accepts `unix:<path>`, `tcp:<addr>` or a bare socket address.
impl FromStr for Endpoint {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        #[cfg(unix)]
        if let Some(path) = s.strip_prefix("unix:") {
            return Ok(Endpoint::Unix(path.into()));
        }
        let addr = s.strip_prefix("tcp:").unwrap_or(s);
        Ok(Endpoint::Tcp(addr.parse()?))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp:{}", addr),
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// A bound coordinator socket.
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Endpoint {
    /// Loopback TCP endpoint on `port`.
    pub fn local(port: u16) -> Self {
        Endpoint::Tcp(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port).into())
    }

    pub async fn bind(&self) -> io::Result<Listener> {
        match self {
            Endpoint::Tcp(addr) => Ok(Listener::Tcp(TcpListener::bind(addr).await?)),
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                // A previous coordinator may have left its socket behind.
                self.unlink()?;
                Ok(Listener::Unix(UnixListener::bind(path)?))
            }
        }
    }

    /// Remove the socket file of a unix endpoint. A missing file is not an
    /// error; TCP endpoints have nothing to remove.
    pub fn unlink(&self) -> io::Result<()> {
        match self {
            Endpoint::Tcp(_) => Ok(()),
            #[cfg(unix)]
            Endpoint::Unix(path) => match std::fs::remove_file(path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        }
    }

    /// Dial the coordinator. There is no retry; callers treat failure as fatal.
    pub async fn connect(&self) -> io::Result<ServiceClient> {
        match self {
            Endpoint::Tcp(addr) => Ok(client_over(TcpStream::connect(addr).await?)),
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(client_over(UnixStream::connect(path).await?)),
        }
    }
}

pub(crate) fn framed<S>(stream: S) -> Framed<S, LengthDelimitedCodec>
where
    S: AsyncRead + AsyncWrite,
{
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_framed(stream)
}

fn client_over<S>(stream: S) -> ServiceClient
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let transport = serde_transport::new(framed(stream), Json::default());
    ServiceClient::new(client::Config::default(), transport).spawn()
}
