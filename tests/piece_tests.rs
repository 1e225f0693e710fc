use marmot::piece::{split_blocks, Block, PieceMap, BLOCK_SIZE};

#[test]
fn map_gives_every_piece_the_uniform_length_except_the_last() {
    let digests = vec![[0u8; 20]; 3];
    let map = PieceMap::new(digests, 32768, 32768 * 2 + 1000);

    assert_eq!(map.len(), 3);
    assert_eq!(map.total_length(), 66536);

    assert_eq!(map.info(0).offset, 0);
    assert_eq!(map.info(0).length, 32768);
    assert_eq!(map.info(1).offset, 32768);
    assert_eq!(map.info(1).length, 32768);
    assert_eq!(map.info(2).offset, 65536);
    assert_eq!(map.info(2).length, 1000);
}

#[test]
fn map_keeps_the_last_piece_full_when_the_torrent_divides_evenly() {
    let digests = vec![[0u8; 20]; 2];
    let map = PieceMap::new(digests, 32768, 65536);

    assert_eq!(map.info(1).length, 32768);
}

#[test]
fn map_records_the_expected_digests() {
    let digests = vec![[1u8; 20], [2u8; 20]];
    let map = PieceMap::new(digests, 16384, 32768);

    assert_eq!(map.info(0).digest, [1u8; 20]);
    assert_eq!(map.info(1).digest, [2u8; 20]);
}

#[test]
#[should_panic]
fn map_lookup_out_of_range_is_fatal() {
    let map = PieceMap::new(vec![[0u8; 20]], 16384, 16384);
    map.info(1);
}

#[test]
fn blocks_tile_the_piece_exactly_once() {
    for piece_size in [1, 100, BLOCK_SIZE, BLOCK_SIZE + 1, 32768, 40000] {
        let blocks = split_blocks(BLOCK_SIZE, piece_size);

        let mut expected_offset = 0;
        for block in &blocks {
            assert_eq!(block.offset, expected_offset);
            assert!(block.size > 0 && block.size <= BLOCK_SIZE);
            expected_offset += block.size;
        }
        assert_eq!(expected_offset, piece_size);
    }
}

#[test]
fn final_block_is_short_when_the_piece_does_not_divide() {
    let blocks = split_blocks(16384, 40000);

    assert_eq!(
        blocks,
        vec![
            Block::new(0, 16384),
            Block::new(16384, 16384),
            Block::new(32768, 7232),
        ]
    );
}

#[test]
fn a_small_piece_is_a_single_short_block() {
    assert_eq!(split_blocks(16384, 5000), vec![Block::new(0, 5000)]);
    assert_eq!(split_blocks(16384, 16384), vec![Block::new(0, 16384)]);
}
