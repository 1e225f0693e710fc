//! # Piece Database
//!
//! In-memory state of the whole download: which pieces were never opened,
//! which are verified and written, which are partially downloaded, and
//! which blocks are currently checked out to peers.
//!
//! ## State Sets
//!
//! Every piece number is in exactly one of three places:
//!
//! - `pending`: never opened for download
//! - `in_progress`: opened, tracked block by block
//! - `done`: verified and written
//!
//! `downloading` lists the blocks currently checked out to peers; every
//! entry refers to an in-progress piece. The database is owned and
//! mutated exclusively by the manager's event loop, so no locking is
//! involved.
//!
//! ## Consistency Audits
//!
//! [`PieceDb::check`] verifies the cross-set invariants. The event loop
//! runs it every [`ASSERT_INTERVAL`] iterations; a violation means a bug
//! in the manager itself and is fatal.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{bail, Result};

use crate::message::ChokeMsg;
use crate::piece::Block;

// Number of event-loop iterations between two consistency audits
pub const ASSERT_INTERVAL: u32 = 10;

/// Download state of a piece that has been opened but not yet verified.
#[derive(Debug, Clone)]
pub struct InProgressPiece {
    /// Number of blocks the piece splits into
    pub total_blocks: usize,
    /// Blocks stored so far
    pub have_blocks: HashSet<Block>,
    /// Blocks not yet handed to any peer, in hand-out order
    pub pending_blocks: VecDeque<Block>,
}

impl InProgressPiece {
    /// Opens a piece with its full block list pending.
    pub fn new(blocks: Vec<Block>) -> InProgressPiece {
        InProgressPiece {
            total_blocks: blocks.len(),
            have_blocks: HashSet::new(),
            pending_blocks: blocks.into(),
        }
    }
}

/// In-memory state of which pieces are pending, in progress or done, and
/// which blocks are checked out to peers.
#[derive(Debug)]
pub struct PieceDb {
    /// Pieces never opened for download
    pub pending: HashSet<u32>,
    /// Pieces verified and written
    pub done: HashSet<u32>,
    /// Pieces opened for download, tracked block by block
    pub in_progress: HashMap<u32, InProgressPiece>,
    /// Blocks currently checked out to peers
    pub downloading: Vec<(u32, Block)>,
    /// Notifications not yet delivered to the choke subsystem
    pub push_queue: VecDeque<ChokeMsg>,
    /// Latched on the first endgame grab
    pub endgame: bool,
    /// Iterations left until the next consistency audit
    pub assert_countdown: u32,
    /// Total number of pieces in the torrent
    num_pieces: usize,
}

impl PieceDb {
    /// Creates the database from the initial scan results.
    ///
    /// # Arguments
    ///
    /// * `have` - One flag per piece: `true` when the initial scan found
    ///   the piece already verified on disk.
    pub fn new(have: &[bool]) -> PieceDb {
        let mut pending = HashSet::new();
        let mut done = HashSet::new();

        for (index, have_piece) in have.iter().enumerate() {
            if *have_piece {
                done.insert(index as u32);
            } else {
                pending.insert(index as u32);
            }
        }

        PieceDb {
            pending,
            done,
            in_progress: HashMap::new(),
            downloading: Vec::new(),
            push_queue: VecDeque::new(),
            endgame: false,
            assert_countdown: 0,
            num_pieces: have.len(),
        }
    }

    /// Returns the total number of pieces in the torrent.
    pub fn total_pieces(&self) -> usize {
        self.num_pieces
    }

    /// Checks the database invariants.
    ///
    /// Verifies that the three piece sets partition the torrent, that
    /// every checkout refers to an in-progress piece, that no checked-out
    /// block is simultaneously pending or stored, and that per-piece
    /// block accounting holds. Any violation is a bug in the manager; the
    /// error names the invariant and the pieces involved.
    pub fn check(&self) -> Result<()> {
        // The three piece sets are pairwise disjoint
        for piece in &self.pending {
            if self.done.contains(piece) {
                bail!("piece {} is both pending and done", piece);
            }
            if self.in_progress.contains_key(piece) {
                bail!("piece {} is both pending and in progress", piece);
            }
        }
        for piece in &self.done {
            if self.in_progress.contains_key(piece) {
                bail!("piece {} is both done and in progress", piece);
            }
        }

        // Together they cover every piece of the torrent
        let tracked = self.pending.len() + self.done.len() + self.in_progress.len();
        if tracked != self.num_pieces {
            bail!(
                "database tracks {} pieces, the torrent has {}",
                tracked,
                self.num_pieces
            );
        }
        for piece in 0..self.num_pieces as u32 {
            if !self.pending.contains(&piece)
                && !self.done.contains(&piece)
                && !self.in_progress.contains_key(&piece)
            {
                bail!("piece {} is neither pending, done nor in progress", piece);
            }
        }

        // Every checkout refers to an in-progress piece, and a checked-out
        // block is neither waiting to be handed out nor already stored
        for (piece, block) in &self.downloading {
            if self.done.contains(piece) {
                bail!(
                    "block {:?} of piece {} is checked out but the piece is done",
                    block,
                    piece
                );
            }
            let Some(progress) = self.in_progress.get(piece) else {
                bail!(
                    "block {:?} of piece {} is checked out but the piece is not in progress",
                    block,
                    piece
                );
            };
            if progress.pending_blocks.contains(block) {
                bail!(
                    "block {:?} of piece {} is both checked out and pending",
                    block,
                    piece
                );
            }
            if progress.have_blocks.contains(block) {
                bail!(
                    "block {:?} of piece {} is both checked out and stored",
                    block,
                    piece
                );
            }
        }

        // Per-piece block accounting
        for (piece, progress) in &self.in_progress {
            if progress.have_blocks.len() > progress.total_blocks {
                bail!(
                    "piece {} has {} stored blocks but splits into {}",
                    piece,
                    progress.have_blocks.len(),
                    progress.total_blocks
                );
            }
        }

        Ok(())
    }
}
