use marmot::db::{InProgressPiece, PieceDb};
use marmot::piece::{split_blocks, Block};

#[test]
fn construction_partitions_the_pieces() {
    let db = PieceDb::new(&[true, false, true, false]);

    assert!(db.done.contains(&0) && db.done.contains(&2));
    assert!(db.pending.contains(&1) && db.pending.contains(&3));
    assert!(db.in_progress.is_empty());
    assert!(db.downloading.is_empty());
    assert!(db.push_queue.is_empty());
    assert!(!db.endgame);
    assert_eq!(db.assert_countdown, 0);
    assert_eq!(db.total_pieces(), 4);

    db.check().unwrap();
}

#[test]
fn check_accepts_a_consistent_download_in_flight() {
    let mut db = PieceDb::new(&[false, false, false]);

    // Piece 1 opened, one block checked out, one stored, one waiting
    let blocks = split_blocks(16384, 49152);
    let mut progress = InProgressPiece::new(blocks.clone());
    progress.pending_blocks.pop_front();
    progress.have_blocks.insert(blocks[1]);
    progress.pending_blocks.retain(|block| *block != blocks[1]);
    db.pending.remove(&1);
    db.in_progress.insert(1, progress);
    db.downloading.push((1, blocks[0]));

    db.check().unwrap();
}

#[test]
fn check_rejects_a_piece_in_two_sets() {
    let mut db = PieceDb::new(&[false, false]);
    db.done.insert(0);

    let error = db.check().unwrap_err().to_string();
    assert!(error.contains("piece 0"), "unexpected diagnostic: {}", error);
}

#[test]
fn check_rejects_an_untracked_piece() {
    let mut db = PieceDb::new(&[false, false]);
    db.pending.remove(&1);

    assert!(db.check().is_err());
}

#[test]
fn check_rejects_a_checkout_of_an_unopened_piece() {
    let mut db = PieceDb::new(&[false]);
    db.downloading.push((0, Block::new(0, 16384)));

    let error = db.check().unwrap_err().to_string();
    assert!(error.contains("not in progress"), "unexpected diagnostic: {}", error);
}

#[test]
fn check_rejects_a_checkout_of_a_done_piece() {
    let mut db = PieceDb::new(&[true]);
    db.downloading.push((0, Block::new(0, 16384)));

    let error = db.check().unwrap_err().to_string();
    assert!(error.contains("done"), "unexpected diagnostic: {}", error);
}

#[test]
fn check_rejects_a_checkout_that_is_still_pending() {
    let mut db = PieceDb::new(&[false]);
    let blocks = split_blocks(16384, 32768);
    db.pending.remove(&0);
    db.in_progress.insert(0, InProgressPiece::new(blocks.clone()));
    db.downloading.push((0, blocks[0]));

    let error = db.check().unwrap_err().to_string();
    assert!(error.contains("pending"), "unexpected diagnostic: {}", error);
}

#[test]
fn check_rejects_a_checkout_that_is_already_stored() {
    let mut db = PieceDb::new(&[false]);
    let blocks = split_blocks(16384, 32768);
    let mut progress = InProgressPiece::new(Vec::new());
    progress.total_blocks = blocks.len();
    progress.have_blocks.insert(blocks[0]);
    db.pending.remove(&0);
    db.in_progress.insert(0, progress);
    db.downloading.push((0, blocks[0]));

    let error = db.check().unwrap_err().to_string();
    assert!(error.contains("stored"), "unexpected diagnostic: {}", error);
}

#[test]
fn check_rejects_more_stored_blocks_than_the_piece_has() {
    let mut db = PieceDb::new(&[false]);
    let mut progress = InProgressPiece::new(Vec::new());
    progress.total_blocks = 1;
    progress.have_blocks.insert(Block::new(0, 16384));
    progress.have_blocks.insert(Block::new(16384, 16384));
    db.pending.remove(&0);
    db.in_progress.insert(0, progress);

    let error = db.check().unwrap_err().to_string();
    assert!(error.contains("splits into"), "unexpected diagnostic: {}", error);
}
