//! # Piece Manager
//!
//! This module implements the manager that owns the piece database and
//! serves peer workers: it hands out block checkouts, records delivered
//! blocks, orchestrates piece verification through the store
//! collaborator, and notifies the status and choke subsystems about
//! progress.
//!
//! ## Grab Algorithm
//!
//! A grab hands a peer up to `k` blocks among the pieces it advertises:
//!
//! 1. **Drain in-progress pieces first.** Finishing a partially
//!    downloaded piece is always preferred over opening a new one, so the
//!    tail of the download stays short.
//! 2. **Open new pieces.** While budget remains, one pending piece the
//!    peer advertises is picked uniformly at random and opened with its
//!    full block list. Random selection diffuses contention between
//!    peers.
//! 3. **Endgame fallback.** When nothing was grabbed and no piece is
//!    left to open, the remaining checkouts are duplicated to the peer so
//!    the slowest peer cannot stall completion.
//!
//! ## Event Loop
//!
//! [`PieceManager::run`] is a single-threaded loop over rendezvous
//! channels. Each iteration audits the database, then waits on a choice
//! between receiving the next request, receiving the supervisor stop
//! signal, and (when notifications are queued) delivering the head of
//! the queue to the choke subsystem. The loop is the only mutator of the
//! database, so no locks are involved.
//!
//! ## Error Handling
//!
//! Peer misbehavior (duplicate deliveries, put-backs of finished pieces,
//! corrupt piece data) is handled locally and never kills the manager.
//! Invariant violations and collaborator channel breakage are fatal: the
//! loop unwinds and reports a [`ComponentFailure`] to the supervisor.

use std::collections::HashSet;

use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::db::{InProgressPiece, PieceDb, ASSERT_INTERVAL};
use crate::message::{ChokeMsg, ComponentFailure, Grabbed, PieceMsg, StatusMsg, StoreMsg};
use crate::piece::{split_blocks, Block, PieceMap, BLOCK_SIZE};

// Component name reported to the supervisor on fatal failure
const COMPONENT: &str = "piece manager";

/// Channel endpoints connecting the manager to its collaborators.
pub struct Channels {
    /// Inbound requests from peer workers
    pub requests: Receiver<PieceMsg>,
    /// Store collaborator, for block writes and piece checks
    pub store: Sender<StoreMsg>,
    /// Status collaborator, for progress reporting
    pub status: Sender<StatusMsg>,
    /// Choke subsystem, for completion notifications
    pub choke: Sender<ChokeMsg>,
    /// Supervisor stop signal
    pub stop: Receiver<()>,
    /// Supervisor failure reporting
    pub failure: Sender<ComponentFailure>,
}

/// Tracks piece and block state for one torrent and serves peer workers.
///
/// Owned by a single thread; every mutation of the piece database happens
/// inside [`PieceManager::run`] or through the direct methods below.
pub struct PieceManager {
    map: PieceMap,
    db: PieceDb,
    chans: Channels,
    rng: StdRng,
}

impl PieceManager {
    /// Creates a manager over the initial scan results.
    ///
    /// # Arguments
    ///
    /// * `map` - Static per-piece metadata from the metainfo.
    /// * `have` - One flag per piece: `true` when the initial scan found
    ///   the piece already verified on disk.
    /// * `chans` - Channel endpoints to the collaborators.
    pub fn new(map: PieceMap, have: &[bool], chans: Channels) -> PieceManager {
        PieceManager::with_rng(map, have, chans, StdRng::from_entropy())
    }

    /// Same as [`PieceManager::new`] with a caller-provided RNG, so piece
    /// selection can be made reproducible.
    pub fn with_rng(map: PieceMap, have: &[bool], chans: Channels, rng: StdRng) -> PieceManager {
        assert_eq!(
            map.len(),
            have.len(),
            "piece map and have map disagree on the piece count"
        );

        PieceManager {
            db: PieceDb::new(have),
            map,
            chans,
            rng,
        }
    }

    /// Read-only view of the piece database.
    pub fn db(&self) -> &PieceDb {
        &self.db
    }

    /// Runs the event loop until shutdown.
    ///
    /// Returns `Ok(())` on a graceful stop: a supervisor signal, or the
    /// request channel closing because every peer handle is gone. Fatal
    /// errors are reported to the supervisor before being returned.
    pub fn run(mut self) -> Result<()> {
        match self.event_loop() {
            Ok(()) => Ok(()),
            Err(error) => {
                error!("Piece manager failed: {:#}", error);
                let failure = ComponentFailure {
                    component: COMPONENT,
                    cause: format!("{:#}", error),
                };
                // The supervisor itself may already be gone
                let _ = self.chans.failure.send(failure);
                Err(error)
            }
        }
    }

    fn event_loop(&mut self) -> Result<()> {
        loop {
            self.audit()?;

            // Wait on the next request, the stop signal, or - when a
            // notification is queued - the ability to deliver it
            let received = if let Some(note) = self.db.push_queue.front().cloned() {
                select! {
                    recv(self.chans.requests) -> msg => msg,
                    recv(self.chans.stop) -> _ => {
                        info!("Piece manager stopping");
                        return Ok(());
                    }
                    send(self.chans.choke, note) -> sent => {
                        if sent.is_err() {
                            bail!("choke subsystem went away");
                        }
                        self.db.push_queue.pop_front();
                        continue;
                    }
                }
            } else {
                select! {
                    recv(self.chans.requests) -> msg => msg,
                    recv(self.chans.stop) -> _ => {
                        info!("Piece manager stopping");
                        return Ok(());
                    }
                }
            };

            match received {
                Ok(msg) => self.handle(msg)?,
                Err(_) => {
                    // Every peer handle is gone; deliver what is queued
                    // and exit cleanly
                    info!("Request channel closed, piece manager shutting down");
                    self.flush_notifications()?;
                    return Ok(());
                }
            }
        }
    }

    /// Dispatches one inbound request.
    fn handle(&mut self, msg: PieceMsg) -> Result<()> {
        match msg {
            PieceMsg::GrabBlocks { k, eligible, reply } => {
                let grabbed = self.grab_blocks(k, &eligible);
                reply
                    .send(grabbed)
                    .map_err(|_| anyhow!("peer worker hung up before the grab reply"))?;
            }
            PieceMsg::StoreBlock { piece, block, data } => {
                self.store_block(piece, block, data)?;
            }
            PieceMsg::PutbackBlocks { blocks } => {
                self.putback_blocks(blocks)?;
            }
            PieceMsg::AskInterested { pieces, reply } => {
                let interested = self.ask_interested(&pieces);
                reply
                    .send(interested)
                    .map_err(|_| anyhow!("peer worker hung up before the interest reply"))?;
            }
            PieceMsg::GetDone { reply } => {
                reply
                    .send(self.done_pieces())
                    .map_err(|_| anyhow!("peer worker hung up before the done reply"))?;
            }
        }

        Ok(())
    }

    /// Checks out up to `k` blocks for a peer advertising `eligible`.
    ///
    /// Returns `Leech` with the checkouts recorded in `downloading`, or -
    /// once nothing is grabbable and no piece is left to open - `Endgame`
    /// with duplicates of the outstanding checkouts the peer can serve.
    /// `Leech` with an empty list means the peer has nothing we want
    /// right now.
    pub fn grab_blocks(&mut self, k: usize, eligible: &HashSet<u32>) -> Grabbed {
        if k == 0 {
            return Grabbed::Leech(Vec::new());
        }

        let grabbed = self.grab_leech(k, eligible);

        if grabbed.is_empty() && self.db.pending.is_empty() {
            if !self.db.endgame {
                info!("Entering endgame mode");
                self.db.endgame = true;
            }

            // Duplicate the outstanding checkouts the peer can serve
            let mut duplicates: Vec<(u32, Block)> = self
                .db
                .downloading
                .iter()
                .filter(|(piece, _)| eligible.contains(piece))
                .copied()
                .collect();
            duplicates.shuffle(&mut self.rng);
            duplicates.truncate(k);

            debug!("Endgame grab of {} duplicate blocks", duplicates.len());
            return Grabbed::Endgame(duplicates);
        }

        debug!("Grabbed {} blocks", grabbed.len());
        self.db.downloading.extend(grabbed.iter().copied());
        Grabbed::Leech(grabbed)
    }

    /// Drains eligible in-progress pieces, opening random pending pieces
    /// whenever budget remains.
    fn grab_leech(&mut self, k: usize, eligible: &HashSet<u32>) -> Vec<(u32, Block)> {
        let mut grabbed = Vec::new();
        let mut budget = k;

        while budget > 0 {
            // Finish partially downloaded pieces first. Candidates are
            // visited in sorted order; any order is correct, sorted keeps
            // a seeded run reproducible.
            let mut open: Vec<u32> = self
                .db
                .in_progress
                .iter()
                .filter(|(piece, progress)| {
                    eligible.contains(*piece) && !progress.pending_blocks.is_empty()
                })
                .map(|(piece, _)| *piece)
                .collect();
            open.sort_unstable();

            for piece in open {
                if budget == 0 {
                    break;
                }
                if let Some(progress) = self.db.in_progress.get_mut(&piece) {
                    while budget > 0 {
                        let Some(block) = progress.pending_blocks.pop_front() else {
                            break;
                        };
                        grabbed.push((piece, block));
                        budget -= 1;
                    }
                }
            }

            if budget == 0 {
                break;
            }

            // Open a fresh piece, picked uniformly at random among the
            // pending pieces the peer advertises
            let mut candidates: Vec<u32> = self
                .db
                .pending
                .iter()
                .filter(|piece| eligible.contains(*piece))
                .copied()
                .collect();
            candidates.sort_unstable();
            let Some(&piece) = candidates.choose(&mut self.rng) else {
                break;
            };

            self.db.pending.remove(&piece);
            let blocks = split_blocks(BLOCK_SIZE, self.map.info(piece).length);
            self.db.in_progress.insert(piece, InProgressPiece::new(blocks));
            debug!("Opened piece {} for download", piece);
        }

        grabbed
    }

    /// Records a block delivered by a peer.
    ///
    /// The payload is written through to the store collaborator, the
    /// checkout is released, and the piece's progress is updated. When
    /// the last block of a piece arrives the piece is checked: a digest
    /// match finishes it, a mismatch sends it back for re-download.
    ///
    /// Duplicate deliveries (common in endgame) and deliveries for a
    /// piece that already finished are ignored.
    pub fn store_block(&mut self, piece: u32, block: Block, data: Vec<u8>) -> Result<()> {
        if data.len() != block.size as usize {
            warn!(
                "Dropping block {:?} of piece {}: peer sent {} bytes",
                block,
                piece,
                data.len()
            );
            return Ok(());
        }

        debug!("Storing block {:?} of piece {}", block, piece);
        self.write_block(piece, block, data)?;

        // The block is no longer checked out
        if let Some(at) = self
            .db
            .downloading
            .iter()
            .position(|entry| *entry == (piece, block))
        {
            self.db.downloading.remove(at);
        }

        // In endgame the same block may be checked out at several peers;
        // tell the choke subsystem so it can cancel the duplicates
        if self.db.endgame {
            self.db
                .push_queue
                .push_back(ChokeMsg::BlockComplete(piece, block));
        }

        let Some(progress) = self.db.in_progress.get_mut(&piece) else {
            // Stray delivery for a piece that is done or was never opened
            debug!(
                "Ignoring block {:?} of piece {}: piece is not in progress",
                block, piece
            );
            return Ok(());
        };

        if !progress.have_blocks.insert(block) {
            debug!("Ignoring duplicate block {:?} of piece {}", block, piece);
            return Ok(());
        }

        if progress.have_blocks.len() == progress.total_blocks {
            self.piece_complete(piece)?;
        }

        Ok(())
    }

    /// A piece has all of its blocks: check the digest and either finish
    /// the piece or send it back for re-download.
    fn piece_complete(&mut self, piece: u32) -> Result<()> {
        self.assert_complete(piece)?;

        match self.check_piece(piece)? {
            Some(true) => self.piece_done(piece),
            Some(false) => {
                // Some peer sent corrupt data; the whole piece downloads
                // again from scratch
                warn!("Piece {} failed digest verification, downloading again", piece);
                self.db.in_progress.remove(&piece);
                self.db.pending.insert(piece);
                Ok(())
            }
            None => bail!("store does not track piece {}", piece),
        }
    }

    /// Pre-checks before handing a tentatively complete piece to the
    /// store: the stored blocks must tile the piece exactly and nothing
    /// of the piece may still be checked out.
    fn assert_complete(&self, piece: u32) -> Result<()> {
        let length = self.map.info(piece).length;
        let Some(progress) = self.db.in_progress.get(&piece) else {
            bail!("piece {} is tentatively complete but not in progress", piece);
        };

        let mut blocks: Vec<Block> = progress.have_blocks.iter().copied().collect();
        blocks.sort_unstable_by_key(|block| block.offset);

        let mut expected = 0;
        for block in &blocks {
            if block.offset != expected {
                bail!(
                    "piece {} has a gap at offset {}, next stored block starts at {}",
                    piece,
                    expected,
                    block.offset
                );
            }
            expected += block.size;
        }
        if expected != length {
            bail!(
                "piece {} has {} stored bytes out of {}",
                piece,
                expected,
                length
            );
        }

        if let Some((_, block)) = self.db.downloading.iter().find(|(p, _)| *p == piece) {
            bail!(
                "piece {} is tentatively complete but block {:?} is still checked out",
                piece,
                block
            );
        }

        Ok(())
    }

    /// Marks a verified piece as done and notifies the collaborators.
    fn piece_done(&mut self, piece: u32) -> Result<()> {
        info!("Piece {} verified and done", piece);

        self.db.in_progress.remove(&piece);
        self.db.done.insert(piece);
        self.db.push_queue.push_back(ChokeMsg::PieceDone(piece));

        let bytes = self.map.info(piece).length;
        self.chans
            .status
            .send(StatusMsg::CompletedPiece { bytes })
            .map_err(|_| anyhow!("status subsystem went away"))?;

        if self.db.done.len() == self.db.total_pieces() {
            info!("Torrent complete: all {} pieces verified", self.db.total_pieces());
            self.chans
                .status
                .send(StatusMsg::TorrentCompleted)
                .map_err(|_| anyhow!("status subsystem went away"))?;
            self.db.push_queue.push_back(ChokeMsg::TorrentComplete);
        }

        Ok(())
    }

    /// Returns the checkouts of a departed peer to the head of the
    /// hand-out queue, so they are re-requested first.
    ///
    /// Put-backs for a finished piece are endgame strays and ignored. A
    /// put-back for a piece that is neither done nor in progress means
    /// the checkout bookkeeping broke, which is fatal.
    pub fn putback_blocks(&mut self, blocks: Vec<(u32, Block)>) -> Result<()> {
        for (piece, block) in blocks {
            if self.db.done.contains(&piece) {
                // Another peer finished the piece in the meantime
                debug!(
                    "Ignoring putback of block {:?}: piece {} is done",
                    block, piece
                );
                continue;
            }

            let Some(progress) = self.db.in_progress.get_mut(&piece) else {
                bail!(
                    "putback of block {:?} of piece {} which is neither done nor in progress",
                    block,
                    piece
                );
            };

            debug!("Putting back block {:?} of piece {}", block, piece);
            progress.pending_blocks.push_front(block);

            if let Some(at) = self
                .db
                .downloading
                .iter()
                .position(|entry| *entry == (piece, block))
            {
                self.db.downloading.remove(at);
            }
        }

        Ok(())
    }

    /// Whether a peer advertising `pieces` has anything we still want.
    pub fn ask_interested(&self, pieces: &HashSet<u32>) -> bool {
        pieces
            .iter()
            .any(|piece| self.db.pending.contains(piece) || self.db.in_progress.contains_key(piece))
    }

    /// Snapshot of the verified piece numbers, in ascending order.
    pub fn done_pieces(&self) -> Vec<u32> {
        let mut done: Vec<u32> = self.db.done.iter().copied().collect();
        done.sort_unstable();
        done
    }

    /// Periodic consistency audit over the piece database.
    fn audit(&mut self) -> Result<()> {
        if self.db.assert_countdown == 0 {
            self.db.check()?;
            self.db.assert_countdown = ASSERT_INTERVAL;
        } else {
            self.db.assert_countdown -= 1;
        }

        Ok(())
    }

    /// Delivers everything left in the push queue before shutdown.
    fn flush_notifications(&mut self) -> Result<()> {
        while let Some(note) = self.db.push_queue.pop_front() {
            self.chans
                .choke
                .send(note)
                .map_err(|_| anyhow!("choke subsystem went away"))?;
        }

        Ok(())
    }

    /// Synchronous write round-trip to the store collaborator.
    fn write_block(&self, piece: u32, block: Block, data: Vec<u8>) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(0);
        self.chans
            .store
            .send(StoreMsg::WriteBlock {
                piece,
                block,
                data,
                reply: reply_tx,
            })
            .map_err(|_| anyhow!("store subsystem went away"))?;
        reply_rx
            .recv()
            .map_err(|_| anyhow!("store subsystem dropped a write acknowledgement"))?;

        Ok(())
    }

    /// Synchronous digest-check round-trip to the store collaborator.
    fn check_piece(&self, piece: u32) -> Result<Option<bool>> {
        let (reply_tx, reply_rx) = bounded(0);
        self.chans
            .store
            .send(StoreMsg::CheckPiece {
                piece,
                reply: reply_tx,
            })
            .map_err(|_| anyhow!("store subsystem went away"))?;
        reply_rx
            .recv()
            .map_err(|_| anyhow!("store subsystem dropped a piece check reply"))
    }
}
