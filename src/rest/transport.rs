//! Blocking TLS socket transport.
//!
//! Grounded on `src/source/network_api.c` of the reference producer: a
//! blocking connect, a write loop that retries until every byte is sent, a
//! non-blocking availability check before each read, and a plain blocking
//! read otherwise. The reference drives mbed TLS directly over a raw fd and
//! uses `select()` for the availability check; this port drives `rustls`
//! over `std::net::TcpStream` and uses `TcpStream::set_read_timeout` to the
//! same effect (a zero-duration peek would not be portable across
//! platforms the way `select` is in C, so a short poll timeout substitutes).

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{KvsError, Result};

/// A connected, handshaked TLS stream plus the timeouts it was opened with.
pub struct TlsTransport {
    stream: rustls::StreamOwned<rustls::ClientConnection, TcpStream>,
    recv_timeout: Duration,
}

fn root_store_from_native_or_webpki() -> rustls::RootCertStore {
    let mut store = rustls::RootCertStore::empty();
    if let Ok(certs) = rustls_native_certs::load_native_certs() {
        for cert in certs {
            let _ = store.add(cert);
        }
    }
    if store.is_empty() {
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    store
}

impl TlsTransport {
    /// Connect to `host:port` and complete a TLS handshake using the system
    /// trust store (the static-credentials path; no client certificate).
    pub fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        Self::connect_with(host, port, connect_timeout, root_store_from_native_or_webpki(), None)
    }

    /// Connect with an explicit root CA and client certificate/key, used by
    /// the IoT credential exchange which authenticates via mutual TLS.
    pub fn connect_with_client_cert(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        root_ca_pem: &[u8],
        cert_chain_pem: &[u8],
        private_key_pem: &[u8],
    ) -> Result<Self> {
        let mut store = rustls::RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut &root_ca_pem[..]) {
            let cert = cert.map_err(|e| KvsError::TlsHandshake(e.to_string()))?;
            store
                .add(cert)
                .map_err(|e| KvsError::TlsHandshake(e.to_string()))?;
        }

        let certs: Vec<_> = rustls_pemfile::certs(&mut &cert_chain_pem[..])
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| KvsError::TlsHandshake(e.to_string()))?;
        let key = rustls_pemfile::private_key(&mut &private_key_pem[..])
            .map_err(|e| KvsError::TlsHandshake(e.to_string()))?
            .ok_or_else(|| KvsError::TlsHandshake("no private key found in PEM".into()))?;

        Self::connect_with(host, port, connect_timeout, store, Some((certs, key)))
    }

    fn connect_with(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        root_store: rustls::RootCertStore,
        client_auth: Option<(Vec<rustls::pki_types::CertificateDer<'static>>, rustls::pki_types::PrivateKeyDer<'static>)>,
    ) -> Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(KvsError::Connect)?
            .next()
            .ok_or_else(|| KvsError::TlsHandshake(format!("could not resolve {host}:{port}")))?;

        let tcp = TcpStream::connect_timeout(&addr, connect_timeout).map_err(KvsError::Connect)?;
        tcp.set_nodelay(true).map_err(KvsError::Io)?;

        let config_builder = rustls::ClientConfig::builder().with_root_certificates(root_store);
        let config = match client_auth {
            Some((certs, key)) => config_builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| KvsError::TlsHandshake(e.to_string()))?,
            None => config_builder.with_no_client_auth(),
        };

        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| KvsError::TlsHandshake(e.to_string()))?;
        let conn = rustls::ClientConnection::new(Arc::new(config), server_name)
            .map_err(|e| KvsError::TlsHandshake(e.to_string()))?;

        Ok(Self {
            stream: rustls::StreamOwned::new(conn, tcp),
            recv_timeout: connect_timeout,
        })
    }

    pub fn set_recv_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.recv_timeout = timeout;
        self.stream.sock.set_read_timeout(Some(timeout)).map_err(KvsError::Io)
    }

    pub fn set_send_timeout(&self, timeout: Duration) -> Result<()> {
        self.stream.sock.set_write_timeout(Some(timeout)).map_err(KvsError::Io)
    }

    /// Send every byte, retrying short writes (mirrors `networkSend`'s loop).
    pub fn send_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.stream.write(buf).map_err(|e| {
                if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut {
                    KvsError::SendTimeout
                } else {
                    KvsError::Io(e)
                }
            })?;
            if n == 0 {
                return Err(KvsError::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "TLS write returned zero bytes",
                )));
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// True if a short, non-blocking-equivalent read would return data now.
    /// Used by `Kvs_putMediaDoWork`'s poll loop (`isRecvDataAvailable`).
    pub fn is_data_available(&mut self) -> bool {
        let _ = self.stream.sock.set_read_timeout(Some(Duration::from_millis(1)));
        let mut probe = [0u8; 1];
        let available = match self.stream.sock.peek(&mut probe) {
            Ok(n) => n > 0,
            Err(_) => false,
        };
        let _ = self.stream.sock.set_read_timeout(Some(self.recv_timeout));
        available
    }

    /// Blocking read into `buf`, returning the number of bytes read.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut {
                KvsError::RecvTimeout
            } else {
                KvsError::Io(e)
            }
        })
    }
}
