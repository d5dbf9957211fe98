//! Shared fixtures for integration tests (§9 "dummy connection" design
//! note), mirroring `zeekoe/tests/common.rs`'s role for its own
//! `tests/tezos.rs`: a fake in-memory framer pair and a loopback connection
//! pair, so the transport/pool/coordinator plumbing can be exercised
//! without a real DUT.

use mash_conformance::transport::{Connection, Framer, IoHandle};
use tokio::io::DuplexStream;
use tokio::net::{TcpListener, TcpStream};

/// An in-memory duplex pair, framed on both ends. No socket, no TLS — just
/// the length-prefixed CBOR layer.
#[allow(dead_code)]
pub fn duplex_framer_pair(buf_size: usize) -> (Framer<DuplexStream>, Framer<DuplexStream>) {
    let (a, b) = tokio::io::duplex(buf_size);
    (Framer::new(a), Framer::new(b))
}

/// A real loopback TCP pair standing in for a TLS-wrapped socket: dialing a
/// real TLS server in tests would require generating and trusting a
/// throwaway certificate chain, out of scope here (certificate
/// *generation*, as opposed to parsing/validation, is not part of this
/// crate). Good enough to exercise everything above the TLS layer —
/// connection state transitions, framing, zone dispatch.
#[allow(dead_code)]
pub async fn loopback_connection_pair() -> (Connection, Connection) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("binding a loopback listener");
    let addr = listener.local_addr().expect("loopback listener has a local addr");

    let connect = tokio::spawn(async move { TcpStream::connect(addr).await });
    let (server_stream, _peer) = listener.accept().await.expect("accepting loopback connection");
    let client_stream = connect
        .await
        .expect("connect task panicked")
        .expect("connecting to loopback listener");

    let client = Connection::from_handle(IoHandle::Tcp(client_stream));
    let server = Connection::from_handle(IoHandle::Tcp(server_stream));
    (client, server)
}
