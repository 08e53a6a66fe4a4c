//! Receiver role: accepts offers, pulls chunks one at a time and
//! confirms verified files.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use barge_files::{Chunk, FileSink};
use barge_net::{Request, RequestHandler};
use barge_proto::{Body, Message, CHUNK_REQ_LAST_UNSPECIFIED};

/// Progress lines are throttled to every tenth chunk, and only for
/// files big enough that per-chunk logging would drown the transfer.
const PROGRESS_EVERY: u64 = 10;
const PROGRESS_THRESHOLD: u64 = 100;

/// Request handler driving the receiving side.
///
/// Carries no transfer state of its own: every decision is made against
/// the sidecar on disk, which is what lets any worker thread pick up
/// any chunk of any transfer, and lets an interrupted transfer resume
/// from a cold start.
pub struct ReceiverRole {
    root: PathBuf,
}

impl ReceiverRole {
    /// Role writing under the given root directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Destination for a wire name: `<root>/<peer>/<basename>`. The
    /// name is reduced to its final component so a peer cannot steer
    /// writes outside its own directory.
    fn dest_path(&self, peer: &Uuid, wire_name: &str) -> Option<PathBuf> {
        let name = Path::new(wire_name).file_name()?;
        Some(self.root.join(peer.to_string()).join(name))
    }

    /// Decide the reply after a sink changed: COMPLETE once verified, a
    /// request for the next missing chunk while transferring, nothing
    /// at all when the bitmap is full but verification fails.
    fn advance(
        &self,
        sink: &FileSink,
        seq: u16,
        peer: Uuid,
        file_name: &str,
    ) -> anyhow::Result<Option<Message>> {
        if sink.is_complete()? {
            info!("file transferred: {file_name}");
            return Ok(Some(Message {
                seq,
                peer,
                file_name: file_name.to_owned(),
                body: Body::Complete,
            }));
        }

        match sink.next_missing_chunk()? {
            Some(idx) => {
                if sink.n_chunks() > PROGRESS_THRESHOLD && idx % PROGRESS_EVERY == 0 {
                    info!(
                        "requesting chunk {idx}/{} of {file_name} from {peer}",
                        sink.n_chunks()
                    );
                }
                Ok(Some(Message {
                    seq: seq.wrapping_add(1),
                    peer,
                    file_name: file_name.to_owned(),
                    body: Body::ChunkRequest {
                        // n_chunks fits u32: the offer carried it in one
                        first_idx: idx as u32,
                        last_idx: CHUNK_REQ_LAST_UNSPECIFIED,
                    },
                }))
            }
            None => {
                // Every chunk is on disk yet the digest does not match.
                // The protocol has no invalidate message, so the
                // transfer stops here; the sidecar keeps the state for
                // an operator to inspect.
                error!(
                    "{file_name} from {peer}: all chunks present but the file digest \
                     does not match; transfer aborted"
                );
                Ok(None)
            }
        }
    }
}

impl RequestHandler for ReceiverRole {
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

        let Some(dest) = self.dest_path(&peer, &file_name) else {
            warn!("unusable file name on the wire: {file_name:?}");
            return Ok(());
        };

        let reply = match body {
            Body::Offer {
                file_size,
                file_hash,
                ..
            } => {
                let sink = FileSink::create(&dest, file_hash, u64::from(file_size))?;
                self.advance(&sink, seq, peer, &file_name)?
            }
            Body::ChunkData { idx, data, hash } => match FileSink::open(&dest)? {
                Some(sink) => {
                    sink.save_chunk(&Chunk {
                        idx: u64::from(idx),
                        data,
                        hash,
                    })?;
                    self.advance(&sink, seq, peer, &file_name)?
                }
                None => {
                    debug!("chunk data for a transfer never offered: {}", dest.display());
                    None
                }
            },
            _ => None, // requests and completions never flow towards a receiver
        };

        if let Some(reply) = reply {
            conn.send(&reply)?;
        }
        Ok(())
    }
}
