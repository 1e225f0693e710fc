//! # Piece Metadata and Block Splitting
//!
//! This module defines the static, per-piece view of a torrent: where each
//! piece lives in the backing file, how long it is, and which SHA-1 digest
//! it must hash to. Pieces are the verification unit of the torrent;
//! blocks are the smaller unit (16KB) actually exchanged over the peer
//! wire.
//!
//! ## Piece Layout
//!
//! All pieces have the uniform length from the metainfo, except the final
//! piece which covers whatever remains of the torrent:
//!
//! ```text
//! |<- piece 0 ->|<- piece 1 ->|<- piece 2 ->|<- 3 ->|
//! |  uniform    |  uniform    |  uniform    | short |
//! ```
//!
//! ## Block Layout
//!
//! A piece splits into fixed-size blocks in ascending offset order, with a
//! final short block when the piece length is not a multiple of the block
//! size.

// Number of bytes requested from a peer in a single block (16KB)
pub const BLOCK_SIZE: u32 = 16384;

/// A sub-piece unit exchanged over the peer wire.
///
/// Identified by its byte offset within the piece and its length in
/// bytes. Two blocks are equal only when both fields match.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    /// Byte offset within the piece
    pub offset: u32,
    /// Length in bytes
    pub size: u32,
}

impl Block {
    /// Creates a new block descriptor.
    pub fn new(offset: u32, size: u32) -> Block {
        Block { offset, size }
    }
}

/// Static metadata of a single piece.
///
/// Immutable after construction; produced once from the parsed metainfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceInfo {
    /// Byte offset of the piece in the backing file
    pub offset: u64,
    /// Length of the piece in bytes
    pub length: u32,
    /// Expected 20-byte SHA-1 digest of the piece data
    pub digest: [u8; 20],
}

/// Total map from piece number to piece metadata.
///
/// Built from the parsed metainfo: one expected digest per piece, a
/// uniform piece length, and the total torrent length. The piece map is
/// flat; the torrent backs a single file.
#[derive(Debug, Clone)]
pub struct PieceMap {
    pieces: Vec<PieceInfo>,
    total_length: u64,
}

impl PieceMap {
    /// Builds the piece map.
    ///
    /// # Arguments
    ///
    /// * `digests` - Expected 20-byte SHA-1 digests, one per piece.
    /// * `piece_length` - The uniform piece length from the metainfo.
    /// * `total_length` - Total torrent length in bytes.
    ///
    /// # Returns
    ///
    /// A `PieceMap` where every piece has the uniform length except the
    /// final one, which covers the remaining bytes.
    pub fn new(digests: Vec<[u8; 20]>, piece_length: u32, total_length: u64) -> PieceMap {
        let nb_pieces = digests.len();
        let mut pieces = Vec::with_capacity(nb_pieces);

        for (index, digest) in digests.into_iter().enumerate() {
            let offset = index as u64 * piece_length as u64;

            // The final piece covers whatever remains of the torrent
            let length = if index == nb_pieces - 1 {
                (total_length - offset) as u32
            } else {
                piece_length
            };

            pieces.push(PieceInfo {
                offset,
                length,
                digest,
            });
        }

        PieceMap {
            pieces,
            total_length,
        }
    }

    /// Looks up the metadata of a piece.
    ///
    /// An out-of-range piece number is a programmer error: every caller
    /// holds piece numbers that came out of this map.
    ///
    /// # Panics
    ///
    /// Panics if `piece` is not a valid piece number.
    pub fn info(&self, piece: u32) -> &PieceInfo {
        match self.pieces.get(piece as usize) {
            Some(info) => info,
            None => panic!(
                "piece {} is out of range, the map has {} pieces",
                piece,
                self.pieces.len()
            ),
        }
    }

    /// Returns the number of pieces in the torrent.
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    /// Returns `true` when the torrent has no pieces.
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Returns the total torrent length in bytes.
    pub fn total_length(&self) -> u64 {
        self.total_length
    }
}

/// Splits a piece into blocks covering `[0, piece_size)`.
///
/// Blocks appear in ascending offset order, each `block_size` bytes long,
/// with a final short block when `piece_size` is not a multiple of
/// `block_size`.
pub fn split_blocks(block_size: u32, piece_size: u32) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut offset = 0;

    while offset < piece_size {
        let size = std::cmp::min(block_size, piece_size - offset);
        blocks.push(Block::new(offset, size));
        offset += size;
    }

    blocks
}
