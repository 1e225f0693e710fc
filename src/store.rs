//! # In-Memory Store Collaborator
//!
//! A store endpoint backing the torrent with a flat in-memory buffer. It
//! serves the manager's write and check requests until its channel
//! closes. Deployments with a real filesystem adapter replace this
//! endpoint; tests and demos run it on a plain thread.

use boring::sha::Sha1;
use crossbeam_channel::Receiver;

use crate::message::StoreMsg;
use crate::piece::{Block, PieceMap};

/// Serves block writes and piece digest checks from an in-memory buffer
/// the size of the torrent.
pub struct MemoryStore {
    map: PieceMap,
    data: Vec<u8>,
}

impl MemoryStore {
    /// Creates a store with a zeroed backing buffer.
    pub fn new(map: PieceMap) -> MemoryStore {
        let data = vec![0; map.total_length() as usize];
        MemoryStore { map, data }
    }

    /// Serves store requests until the channel closes.
    pub fn run(mut self, requests: Receiver<StoreMsg>) {
        for msg in requests {
            match msg {
                StoreMsg::WriteBlock {
                    piece,
                    block,
                    data,
                    reply,
                } => {
                    self.write_block(piece, block, &data);
                    if reply.send(()).is_err() {
                        // Manager is gone
                        return;
                    }
                }
                StoreMsg::CheckPiece { piece, reply } => {
                    if reply.send(self.check_piece(piece)).is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Copies a block payload into the backing buffer.
    fn write_block(&mut self, piece: u32, block: Block, data: &[u8]) {
        if piece as usize >= self.map.len() {
            warn!("Ignoring write for unknown piece {}", piece);
            return;
        }

        let info = self.map.info(piece);
        if block.offset as u64 + data.len() as u64 > info.length as u64 {
            warn!(
                "Ignoring write of block {:?}: it overflows piece {}",
                block, piece
            );
            return;
        }

        let start = (info.offset + block.offset as u64) as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
    }

    /// Recomputes the digest of a piece and compares it to the expected
    /// one. `None` means the store does not track the piece.
    fn check_piece(&self, piece: u32) -> Option<bool> {
        if piece as usize >= self.map.len() {
            return None;
        }

        let info = self.map.info(piece);
        let start = info.offset as usize;
        let end = start + info.length as usize;

        let mut hasher = Sha1::new();
        hasher.update(&self.data[start..end]);
        let digest = hasher.finish();

        Some(digest == info.digest)
    }
}
