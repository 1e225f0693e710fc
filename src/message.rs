//! # Channel Message Vocabulary
//!
//! Every channel connecting the piece manager to a collaborator carries
//! one of the typed vocabularies defined here. Requests that expect an
//! answer embed a reply sender; all channels are rendezvous channels, so
//! a send completes only when the other side receives.
//!
//! ## Channels
//!
//! | Channel | Direction | Messages |
//! |---|---|---|
//! | requests | peer workers -> manager | [`PieceMsg`] |
//! | store | manager -> store collaborator | [`StoreMsg`] |
//! | status | manager -> status collaborator | [`StatusMsg`] |
//! | choke | manager -> choke subsystem | [`ChokeMsg`] |
//! | failure | manager -> supervisor | [`ComponentFailure`] |

use std::collections::HashSet;

use crossbeam_channel::Sender;

use crate::piece::Block;

/// Requests accepted by the piece manager on its inbound channel.
#[derive(Debug)]
pub enum PieceMsg {
    /// Check out up to `k` blocks among the pieces the peer advertises
    GrabBlocks {
        k: usize,
        eligible: HashSet<u32>,
        reply: Sender<Grabbed>,
    },
    /// A peer delivered the payload of one block
    StoreBlock {
        piece: u32,
        block: Block,
        data: Vec<u8>,
    },
    /// A peer disconnected or reneged; release its outstanding checkouts
    PutbackBlocks { blocks: Vec<(u32, Block)> },
    /// Does the peer's bitfield intersect anything we still want?
    AskInterested {
        pieces: HashSet<u32>,
        reply: Sender<bool>,
    },
    /// Snapshot of the verified piece numbers, for handshakes and bitfields
    GetDone { reply: Sender<Vec<u32>> },
}

/// Outcome of a grab request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grabbed {
    /// Blocks checked out to this peer alone. May be empty when the peer
    /// has nothing we want right now.
    Leech(Vec<(u32, Block)>),
    /// Tail-of-download duplicates: other peers may hold the same
    /// checkouts, and duplicate deliveries are expected.
    Endgame(Vec<(u32, Block)>),
}

/// Requests to the store collaborator.
///
/// Both variants are synchronous round-trips: the manager blocks on the
/// embedded reply channel until the store answers.
#[derive(Debug)]
pub enum StoreMsg {
    /// Persist the payload of one block. `data.len()` equals `block.size`.
    WriteBlock {
        piece: u32,
        block: Block,
        data: Vec<u8>,
        reply: Sender<()>,
    },
    /// Recompute the digest of a piece and compare it to the expected
    /// one. Replies `Some(true)` on a match, `Some(false)` on a mismatch,
    /// and `None` when the store does not track the piece.
    CheckPiece {
        piece: u32,
        reply: Sender<Option<bool>>,
    },
}

/// Progress notifications to the status collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusMsg {
    /// A piece of the given length was verified and written
    CompletedPiece { bytes: u32 },
    /// Every piece of the torrent is verified
    TorrentCompleted,
}

/// Notifications to the choke subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChokeMsg {
    /// A piece was verified; peers can be sent HAVE
    PieceDone(u32),
    /// An endgame block arrived; duplicate requests at other peers can
    /// be cancelled
    BlockComplete(u32, Block),
    /// Every piece of the torrent is verified
    TorrentComplete,
}

/// Fatal-failure report delivered to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentFailure {
    /// Name of the component that failed
    pub component: &'static str,
    /// Human-readable cause, including the state that broke
    pub cause: String,
}
