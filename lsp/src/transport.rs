//! Transport selection: how a client reaches its language server.
//!
//! [`select_transport`] turns the configured [`TransportMode`] into a
//! [`ConnectionDescriptor`]. Subprocess descriptors are launched by the
//! client; socket descriptors carry a deferred [`SocketConnector`] that is
//! only dialled when the client starts.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use jimple_types::TransportMode;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Boxed read half of a protocol channel.
pub type ProtocolReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a protocol channel.
pub type ProtocolWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Duplex byte stream the protocol runs over.
pub struct StreamPair {
    pub reader: ProtocolReader,
    pub writer: ProtocolWriter,
}

impl fmt::Debug for StreamPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPair").finish_non_exhaustive()
    }
}

/// A command line for one launch profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    pub command: String,
    pub args: Vec<String>,
}

/// Run and debug launch profiles.
///
/// Both profiles are identical today; the split exists because hosts
/// distinguish run and debug launches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub run: Executable,
    pub debug: Executable,
}

impl ServerOptions {
    #[must_use]
    pub fn profile(&self, debug: bool) -> &Executable {
        if debug { &self.debug } else { &self.run }
    }
}

/// Dials the language server over TCP on localhost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConnector {
    addr: SocketAddr,
}

impl SocketConnector {
    #[must_use]
    pub fn localhost(port: u16) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        }
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Open the connection. The raw stream is used as the protocol channel
    /// with no framing beyond the protocol's own.
    pub async fn connect(&self) -> io::Result<StreamPair> {
        let stream = TcpStream::connect(self.addr).await?;
        stream.set_nodelay(true)?;
        tracing::debug!(addr = %self.addr, "Connected to language server socket");
        let (reader, writer) = stream.into_split();
        Ok(StreamPair {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }
}

/// Everything a client needs to establish its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionDescriptor {
    Subprocess(ServerOptions),
    Socket(SocketConnector),
}

impl ConnectionDescriptor {
    #[must_use]
    pub fn mode(&self) -> TransportMode {
        match self {
            Self::Subprocess(_) => TransportMode::Stdio,
            Self::Socket(_) => TransportMode::Socket,
        }
    }
}

/// Arguments that launch the server jar.
#[must_use]
pub fn launch_args(server_artifact: &Path) -> Vec<String> {
    vec![
        "-jar".to_string(),
        server_artifact.to_string_lossy().into_owned(),
    ]
}

/// Pick a connection descriptor for `mode`.
///
/// Returns `None` for an unrecognized mode; callers must not start a client
/// without a descriptor.
#[must_use]
pub fn select_transport(
    mode: &TransportMode,
    executable: &str,
    args: &[String],
    port: u16,
) -> Option<ConnectionDescriptor> {
    match mode {
        TransportMode::Stdio => {
            let profile = Executable {
                command: executable.to_string(),
                args: args.to_vec(),
            };
            Some(ConnectionDescriptor::Subprocess(ServerOptions {
                run: profile.clone(),
                debug: profile,
            }))
        }
        TransportMode::Socket => Some(ConnectionDescriptor::Socket(SocketConnector::localhost(
            port,
        ))),
        TransportMode::Unrecognized(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn args() -> Vec<String> {
        launch_args(Path::new("/opt/jimple/jimplelsp.jar"))
    }

    #[test]
    fn stdio_uses_identical_run_and_debug_profiles() {
        let Some(ConnectionDescriptor::Subprocess(options)) =
            select_transport(&TransportMode::Stdio, "java", &args(), 2403)
        else {
            panic!("expected a subprocess descriptor");
        };
        assert_eq!(options.run, options.debug);
        assert_eq!(options.run.command, "java");
        assert_eq!(options.run.args, vec!["-jar", "/opt/jimple/jimplelsp.jar"]);
        assert_eq!(options.profile(true), options.profile(false));
    }

    #[test]
    fn socket_targets_localhost_port() {
        let descriptor = select_transport(&TransportMode::Socket, "java", &args(), 2403).unwrap();
        assert_eq!(descriptor.mode(), TransportMode::Socket);
        let ConnectionDescriptor::Socket(connector) = descriptor else {
            panic!("expected a socket descriptor");
        };
        assert_eq!(connector.addr(), "127.0.0.1:2403".parse().unwrap());
    }

    #[test]
    fn descriptor_exists_only_for_recognized_modes() {
        let modes = [
            TransportMode::Stdio,
            TransportMode::Socket,
            TransportMode::parse("tcp"),
            TransportMode::parse(""),
        ];
        for mode in modes {
            let descriptor = select_transport(&mode, "java", &args(), 2403);
            assert_eq!(descriptor.is_some(), mode.is_recognized(), "{mode}");
        }
    }

    #[tokio::test]
    async fn connector_yields_duplex_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let mut pair = SocketConnector::localhost(port).connect().await.unwrap();
        pair.writer.write_all(b"ping").await.unwrap();
        let mut echoed = [0u8; 4];
        pair.reader.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connector_reports_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = SocketConnector::localhost(port).connect().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
