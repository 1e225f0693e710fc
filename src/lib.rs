//! # Marmot
//!
//! The piece-tracking core of a BitTorrent client: which pieces and blocks
//! have been downloaded, which are checked out to peers, and which remain
//! outstanding. The manager hands out block requests to peer workers,
//! records the blocks they deliver, drives piece verification, and flips
//! into endgame mode near the tail of the download.
//!
//! ## Architecture
//!
//! The manager is a single-threaded event loop owning all download state.
//! Everything else is an external collaborator reached over a typed
//! rendezvous channel:
//!
//! - **Peer workers** send [`message::PieceMsg`] requests and receive
//!   replies on embedded channels
//! - **Store collaborator** persists blocks and recomputes piece digests
//!   ([`message::StoreMsg`]); an in-memory endpoint lives in [`store`]
//! - **Status collaborator** receives progress updates
//! - **Choke subsystem** receives completion notifications so it can
//!   cancel duplicate requests and re-rank peers
//! - **Supervisor** can stop the loop and is told about fatal failures
//!
//! ## Piece Lifecycle
//!
//! A piece moves `pending -> in progress -> done`, or back to `pending`
//! when its digest check fails. Blocks of an in-progress piece are handed
//! to peers one checkout at a time until endgame, where the remaining
//! checkouts are duplicated to every interested peer.

#[macro_use]
extern crate log;

pub mod db;
pub mod manager;
pub mod message;
pub mod piece;
pub mod store;
