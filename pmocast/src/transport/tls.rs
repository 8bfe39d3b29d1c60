//! Cast v2 over TCP + TLS.
//!
//! Each connection gets one I/O thread. The thread performs the handshake,
//! then alternates between flushing queued outbound frames and polling the
//! socket with a short read timeout. Devices present self-signed certificates,
//! so the server certificate is accepted as is; handshake signatures are still
//! checked against the presented key.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme, StreamOwned};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::errors::{CastError, Result};
use crate::transport::frame::{CastMessage, FrameDecoder, encode_frame};
use crate::transport::{
    CastChannel, CastConnection, CastTransport, ChannelRoute, TransportEvent, TransportEvents,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const READ_POLL: Duration = Duration::from_millis(200);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// Opens TLS connections to Cast devices.
pub struct TlsTransport {
    config: Arc<ClientConfig>,
}

impl TlsTransport {
    pub fn new() -> Result<Self> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let verifier = Arc::new(AcceptAnyCertificate {
            algorithms: provider.signature_verification_algorithms,
        });
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
        })
    }
}

impl CastTransport for TlsTransport {
    fn connect(
        &mut self,
        address: SocketAddr,
        events: TransportEvents,
    ) -> Result<Box<dyn CastConnection>> {
        let (outbound_tx, outbound_rx) = unbounded::<Vec<u8>>();
        let stop = Arc::new(AtomicBool::new(false));

        let config = Arc::clone(&self.config);
        let thread_stop = Arc::clone(&stop);
        thread::Builder::new()
            .name(format!("pmocast-{}", events.connection()))
            .spawn(move || run_connection(address, config, events, outbound_rx, thread_stop))?;

        Ok(Box::new(TlsConnection {
            address,
            outbound: outbound_tx,
            stop,
        }))
    }
}

struct TlsConnection {
    address: SocketAddr,
    outbound: Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
}

impl CastConnection for TlsConnection {
    fn open_channel(&mut self, route: ChannelRoute) -> Box<dyn CastChannel> {
        debug!(address = %self.address, %route, "opening channel");
        Box::new(TlsChannel {
            route,
            outbound: self.outbound.clone(),
            open: true,
        })
    }

    fn close(&mut self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            debug!(address = %self.address, "closing connection");
        }
    }
}

impl Drop for TlsConnection {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

struct TlsChannel {
    route: ChannelRoute,
    outbound: Sender<Vec<u8>>,
    open: bool,
}

impl CastChannel for TlsChannel {
    fn route(&self) -> &ChannelRoute {
        &self.route
    }

    fn send(&mut self, payload: &Value) -> Result<()> {
        if !self.open {
            return Err(CastError::channel_closed(&self.route.namespace));
        }
        trace!(route = %self.route, %payload, "-> cast message");
        let frame = encode_frame(&CastMessage::json(&self.route, payload))?;
        self.outbound
            .send(frame)
            .map_err(|_| CastError::channel_closed(&self.route.namespace))
    }

    fn close(&mut self) {
        self.open = false;
    }
}

fn run_connection(
    address: SocketAddr,
    config: Arc<ClientConfig>,
    events: TransportEvents,
    outbound: Receiver<Vec<u8>>,
    stop: Arc<AtomicBool>,
) {
    let mut stream = match open_stream(address, config) {
        Ok(stream) => stream,
        Err(e) => {
            if !stop.load(Ordering::SeqCst) {
                events.emit(TransportEvent::Error(e.to_string()));
            }
            return;
        }
    };

    debug!(%address, "cast connection established");
    if !events.emit(TransportEvent::Connected) {
        return;
    }

    match pump(&mut stream, &events, &outbound, &stop) {
        Ok(()) => {
            stream.conn.send_close_notify();
            let _ = stream.flush();
            debug!(%address, "cast connection closed");
        }
        Err(e) => {
            if !stop.load(Ordering::SeqCst) {
                warn!(%address, error = %e, "cast connection failed");
                events.emit(TransportEvent::Error(e.to_string()));
            }
        }
    }
}

fn open_stream(address: SocketAddr, config: Arc<ClientConfig>) -> Result<TlsStream> {
    let tcp = TcpStream::connect_timeout(&address, CONNECT_TIMEOUT)?;
    tcp.set_nodelay(true)?;
    tcp.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    tcp.set_write_timeout(Some(WRITE_TIMEOUT))?;

    let connection = ClientConnection::new(config, ServerName::from(address.ip()))?;
    let mut stream = StreamOwned::new(connection, tcp);
    while stream.conn.is_handshaking() {
        stream.conn.complete_io(&mut stream.sock)?;
    }

    stream.sock.set_read_timeout(Some(READ_POLL))?;
    Ok(stream)
}

/// Runs until `stop` is raised (`Ok`) or the connection fails (`Err`).
fn pump(
    stream: &mut TlsStream,
    events: &TransportEvents,
    outbound: &Receiver<Vec<u8>>,
    stop: &AtomicBool,
) -> Result<()> {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];

    loop {
        if stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut wrote = false;
        while let Ok(frame) = outbound.try_recv() {
            stream.write_all(&frame)?;
            wrote = true;
        }
        if wrote {
            stream.flush()?;
        }

        let read = match stream.read(&mut buf) {
            Ok(0) => return Err(CastError::transport("connection closed by device")),
            Ok(read) => read,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => return Err(e.into()),
        };

        decoder.push(&buf[..read]);
        while let Some(message) = decoder.next_message()? {
            match message.into_inbound() {
                Ok(inbound) => {
                    trace!(
                        source = %inbound.source_id,
                        namespace = %inbound.namespace,
                        payload = %inbound.payload,
                        "<- cast message"
                    );
                    if !events.emit(TransportEvent::Message(inbound)) {
                        return Ok(());
                    }
                }
                Err(e) => debug!(error = %e, "skipping undecodable cast message"),
            }
        }
    }
}

#[derive(Debug)]
struct AcceptAnyCertificate {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
