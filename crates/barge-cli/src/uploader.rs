//! Uploader role: offers local files and serves the chunk requests
//! that come back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::{debug, info, warn};
use uuid::Uuid;

use barge_files::FileSource;
use barge_net::{Connection, Request, RequestHandler};
use barge_proto::{Body, Message};

/// Request handler driving the uploading side of a transfer.
///
/// Keeps every currently offered file in a map keyed by its wire name;
/// the transfer for a file ends when the receiver's COMPLETE removes
/// it. The driver loop stops once the map is empty.
pub struct UploaderRole {
    peer: Uuid,
    offered: Mutex<HashMap<String, Arc<FileSource>>>,
}

impl UploaderRole {
    /// Role for the given peer identity.
    #[must_use]
    pub fn new(peer: Uuid) -> Self {
        Self {
            peer,
            offered: Mutex::new(HashMap::new()),
        }
    }

    /// Offer a file over the connection. The source already carries the
    /// eagerly computed whole-file digest, so this only records the
    /// offer and sends the frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the offer cannot be serialized or sent.
    pub fn offer(&self, conn: &Connection, source: Arc<FileSource>) -> anyhow::Result<()> {
        let message = Message {
            seq: 1,
            peer: self.peer,
            file_name: source.file_name().to_owned(),
            body: Body::Offer {
                // open() caps sources at u32::MAX bytes
                file_size: source.size() as u32,
                n_chunks: source.n_chunks() as u32,
                file_hash: *source.hash(),
            },
        };

        self.offered
            .lock()
            .unwrap()
            .insert(source.file_name().to_owned(), source.clone());
        conn.send(&message)
            .with_context(|| format!("offer of {} failed", source.file_name()))?;

        info!(
            "offered {} ({} bytes, {} chunks)",
            source.file_name(),
            source.size(),
            source.n_chunks()
        );
        Ok(())
    }

    /// True once every offered file has been acknowledged complete.
    #[must_use]
    pub fn uploads_completed(&self) -> bool {
        self.offered.lock().unwrap().is_empty()
    }
}

impl RequestHandler for UploaderRole {
    fn handle(&self, request: Request) -> anyhow::Result<()> {
        let Some(conn) = request.connection() else {
            return Ok(());
        };
        let Message {
            seq,
            peer,
            file_name,
            body,
        } = request.into_message();

        if peer != self.peer {
            debug!("ignoring message addressed to peer {peer}");
            return Ok(());
        }
        let source = self.offered.lock().unwrap().get(&file_name).cloned();
        let Some(source) = source else {
            warn!("message for a file never offered: {file_name}");
            return Ok(());
        };

        match body {
            Body::ChunkRequest { first_idx, .. } => {
                let chunk = source
                    .chunk(u64::from(first_idx))
                    .with_context(|| format!("chunk {first_idx} of {file_name}"))?;
                let reply = Message {
                    seq,
                    peer: self.peer,
                    file_name,
                    body: Body::ChunkData {
                        idx: first_idx,
                        data: chunk.data,
                        hash: chunk.hash,
                    },
                };
                conn.send(&reply)?;
            }
            Body::Complete => {
                self.offered.lock().unwrap().remove(&file_name);
                info!("upload completed: {file_name}");
            }
            _ => {} // offers and chunk data never flow towards an uploader
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barge_net::Broker;
    use std::fs;
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};
    use std::sync::Weak;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Discard;

    impl RequestHandler for Discard {
        fn handle(&self, _request: Request) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn loopback() -> (Arc<Connection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let remote = TcpStream::connect(addr).unwrap();
        remote
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let (local, _) = listener.accept().unwrap();
        let broker = Arc::new(Broker::new(Arc::new(Discard), 1));
        (Connection::accepted(local, broker).unwrap(), remote)
    }

    fn read_message(remote: &mut TcpStream) -> Message {
        let mut head = [0u8; 6];
        remote.read_exact(&mut head).unwrap();
        let len = usize::from(u16::from_be_bytes([head[4], head[5]]));
        let mut frame = vec![0u8; 6 + len];
        frame[..6].copy_from_slice(&head);
        remote.read_exact(&mut frame[6..]).unwrap();
        Message::decode(&frame).unwrap()
    }

    fn source(dir: &TempDir, name: &str, data: &[u8]) -> Arc<FileSource> {
        let path = dir.path().join(name);
        fs::write(&path, data).unwrap();
        Arc::new(FileSource::open(&path).unwrap())
    }

    fn request(conn: &Arc<Connection>, message: Message) -> Request {
        Request::new(Arc::downgrade(conn), message)
    }

    #[test]
    fn offer_sends_the_announce_frame() {
        let dir = TempDir::new().unwrap();
        let (conn, mut remote) = loopback();
        let role = UploaderRole::new(Uuid::from_bytes([5; 16]));
        let src = source(&dir, "data.bin", &[0x42; 10_000]);

        role.offer(&conn, src.clone()).unwrap();
        assert!(!role.uploads_completed());

        let message = read_message(&mut remote);
        assert_eq!(message.seq, 1);
        assert_eq!(message.peer, Uuid::from_bytes([5; 16]));
        assert_eq!(message.file_name, "data.bin");
        assert_eq!(
            message.body,
            Body::Offer {
                file_size: 10_000,
                n_chunks: 3,
                file_hash: *src.hash(),
            }
        );
    }

    #[test]
    fn chunk_request_is_answered_with_data() {
        let dir = TempDir::new().unwrap();
        let (conn, mut remote) = loopback();
        let peer = Uuid::from_bytes([5; 16]);
        let role = UploaderRole::new(peer);
        let src = source(&dir, "data.bin", &[0x42; 10_000]);
        role.offer(&conn, src.clone()).unwrap();
        let _offer = read_message(&mut remote);

        role.handle(request(
            &conn,
            Message {
                seq: 2,
                peer,
                file_name: "data.bin".into(),
                body: Body::ChunkRequest {
                    first_idx: 1,
                    last_idx: barge_proto::CHUNK_REQ_LAST_UNSPECIFIED,
                },
            },
        ))
        .unwrap();

        let reply = read_message(&mut remote);
        let expected = src.chunk(1).unwrap();
        assert_eq!(reply.seq, 2);
        assert_eq!(
            reply.body,
            Body::ChunkData {
                idx: 1,
                data: expected.data,
                hash: expected.hash,
            }
        );
    }

    #[test]
    fn complete_retires_the_offer() {
        let dir = TempDir::new().unwrap();
        let (conn, mut remote) = loopback();
        let peer = Uuid::from_bytes([5; 16]);
        let role = UploaderRole::new(peer);
        role.offer(&conn, source(&dir, "data.bin", &[1, 2, 3])).unwrap();
        let _offer = read_message(&mut remote);

        role.handle(request(
            &conn,
            Message {
                seq: 3,
                peer,
                file_name: "data.bin".into(),
                body: Body::Complete,
            },
        ))
        .unwrap();

        assert!(role.uploads_completed());
    }

    #[test]
    fn foreign_peer_and_unknown_file_are_ignored() {
        let dir = TempDir::new().unwrap();
        let (conn, mut remote) = loopback();
        let peer = Uuid::from_bytes([5; 16]);
        let role = UploaderRole::new(peer);
        role.offer(&conn, source(&dir, "data.bin", &[1, 2, 3])).unwrap();
        let _offer = read_message(&mut remote);

        // Wrong peer id
        role.handle(request(
            &conn,
            Message {
                seq: 2,
                peer: Uuid::from_bytes([9; 16]),
                file_name: "data.bin".into(),
                body: Body::ChunkRequest {
                    first_idx: 0,
                    last_idx: barge_proto::CHUNK_REQ_LAST_UNSPECIFIED,
                },
            },
        ))
        .unwrap();

        // Right peer, unknown file
        role.handle(request(
            &conn,
            Message {
                seq: 2,
                peer,
                file_name: "other.bin".into(),
                body: Body::ChunkRequest {
                    first_idx: 0,
                    last_idx: barge_proto::CHUNK_REQ_LAST_UNSPECIFIED,
                },
            },
        ))
        .unwrap();

        remote
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let mut buf = [0u8; 1];
        assert!(remote.read_exact(&mut buf).is_err(), "no reply expected");
    }

    #[test]
    fn dead_connection_is_a_clean_no_op() {
        let role = UploaderRole::new(Uuid::from_bytes([5; 16]));
        let gone: Weak<Connection> = Weak::new();
        role.handle(Request::new(
            gone,
            Message {
                seq: 1,
                peer: Uuid::from_bytes([5; 16]),
                file_name: "data.bin".into(),
                body: Body::Complete,
            },
        ))
        .unwrap();
    }
}
