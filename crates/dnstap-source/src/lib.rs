//! A minimal length-prefixed protobuf frame receiver over the DNSTap
//! listen socket. Only the subset of the dnstap schema this daemon
//! actually reads is modeled; the framestream handshake itself (the
//! `START`/`STOP`/`DATA` control frames some dnstap producers use) is
//! treated as out of scope and not implemented: the configured
//! `DNSTap.Listen` endpoint is expected to emit bare length-prefixed
//! `Dnstap` protobuf messages, one per DNS message observed.

use net_address::HostOrSocketAddress;
use prost::Message as _;
use std::os::unix::fs::PermissionsExt;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncRead};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;

pub const CHANNEL_CAPACITY: usize = 1024;
const RESPONSE_MESSAGE_TYPE: i32 = 6; // dnstap.Message.Type.CLIENT_RESPONSE

#[derive(Clone, PartialEq, prost::Message)]
pub struct DnstapMessage {
    #[prost(int32, optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(bytes, optional, tag = "10")]
    pub query_message: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "14")]
    pub response_message: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Dnstap {
    #[prost(int32, optional, tag = "15")]
    pub r#type: Option<i32>,
    #[prost(message, optional, tag = "14")]
    pub message: Option<DnstapMessage>,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to decode dnstap frame: {0}")]
    Protobuf(#[from] prost::DecodeError),
    #[error("frame exceeded maximum size of {max} bytes")]
    TooLarge { max: usize },
}

const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Reads one length-prefixed frame from `reader` and extracts the raw
/// DNS response message bytes, if this frame is a CLIENT_RESPONSE.
/// Returns `Ok(None)` for any other frame type (not an error: most
/// dnstap streams interleave query and response records).
pub async fn read_frame(
    reader: &mut (impl AsyncRead + Unpin),
) -> std::io::Result<Option<Vec<u8>>> {
    let len = reader.read_u32().await?;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            DecodeError::TooLarge {
                max: MAX_FRAME_LEN as usize,
            },
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;

    let frame = Dnstap::decode(buf.as_slice())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let Some(message) = frame.message else {
        return Ok(None);
    };
    if message.r#type != Some(RESPONSE_MESSAGE_TYPE) {
        return Ok(None);
    }
    Ok(message.response_message)
}

/// Binds the configured listen endpoint and pushes decoded DNS
/// response payloads onto a bounded channel of capacity
/// [`CHANNEL_CAPACITY`]. Decoder workers pull from the returned
/// receiver; if they fall behind, this task's send blocks, which is
/// the chosen backpressure boundary; frames are never dropped here.
pub async fn listen(
    addr: HostOrSocketAddress,
    unix_perm: Option<u32>,
) -> std::io::Result<mpsc::Receiver<Vec<u8>>> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    match addr {
        HostOrSocketAddress::UnixDomain(path) => {
            let path = path
                .as_pathname()
                .map(|p| p.to_path_buf())
                .ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "unbound unix socket")
                })?;
            let _ = std::fs::remove_file(&path);
            let listener = UnixListener::bind(&path)?;
            if let Some(perm) = unix_perm {
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(perm))?;
            }
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, _)) => {
                            let tx = tx.clone();
                            tokio::spawn(drain_connection(stream, tx));
                        }
                        Err(err) => {
                            tracing::error!(%err, "dnstap unix listener accept failed");
                            return;
                        }
                    }
                }
            });
        }
        HostOrSocketAddress::V4Socket(socket) => {
            bind_tcp(std::net::SocketAddr::V4(*socket), tx).await?;
        }
        HostOrSocketAddress::V6Socket(socket) => {
            bind_tcp(std::net::SocketAddr::V6(*socket), tx).await?;
        }
        HostOrSocketAddress::V4Host(_) | HostOrSocketAddress::V6Host(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "DNSTap.Listen requires an explicit port",
            ));
        }
    }

    Ok(rx)
}

async fn bind_tcp(addr: std::net::SocketAddr, tx: mpsc::Sender<Vec<u8>>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let tx = tx.clone();
                    tokio::spawn(drain_connection(stream, tx));
                }
                Err(err) => {
                    tracing::error!(%err, "dnstap tcp listener accept failed");
                    return;
                }
            }
        }
    });
    Ok(())
}

async fn drain_connection(mut stream: impl AsyncRead + Unpin, tx: mpsc::Sender<Vec<u8>>) {
    loop {
        match read_frame(&mut stream).await {
            Ok(Some(response)) => {
                if tx.send(response).await.is_err() {
                    return;
                }
            }
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(%err, "dropping malformed dnstap frame");
                return;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn encode_frame(frame: &Dnstap) -> Vec<u8> {
        let body = frame.encode_to_vec();
        let mut out = (body.len() as u32).to_be_bytes().to_vec();
        out.extend(body);
        out
    }

    #[tokio::test]
    async fn reads_client_response_payload() {
        let frame = Dnstap {
            r#type: Some(1),
            message: Some(DnstapMessage {
                r#type: Some(RESPONSE_MESSAGE_TYPE),
                query_message: None,
                response_message: Some(vec![1, 2, 3]),
            }),
        };
        let bytes = encode_frame(&frame);
        let mut cursor = Cursor::new(bytes);
        let result = read_frame(&mut cursor).await.unwrap();
        assert_eq!(result, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn ignores_non_response_frames() {
        let frame = Dnstap {
            r#type: Some(1),
            message: Some(DnstapMessage {
                r#type: Some(5), // CLIENT_QUERY
                query_message: Some(vec![9, 9]),
                response_message: None,
            }),
        };
        let bytes = encode_frame(&frame);
        let mut cursor = Cursor::new(bytes);
        let result = read_frame(&mut cursor).await.unwrap();
        assert_eq!(result, None);
    }
}
