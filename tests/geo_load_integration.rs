//! Exercises `GeoEngine::load_geodata` against real files on disk: valid regions, an
//! unparseable filename, and out-of-range region coordinates are all present in the same
//! directory and must be handled independently (§6).

use realmcore::geo::{geo_x, geo_y, world_x, world_y, GeoEngine, BLOCKS_PER_REGION};
use tempfile::TempDir;

fn flat_region_bytes(z: i16) -> Vec<u8> {
    let mut data = Vec::new();
    for _ in 0..BLOCKS_PER_REGION {
        data.push(0x00u8);
        data.extend_from_slice(&z.to_le_bytes());
    }
    data
}

#[test]
fn loads_valid_regions_and_skips_bad_names() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("0_0.l2j"), flat_region_bytes(50)).unwrap();
    std::fs::write(dir.path().join("1_1.l2j"), flat_region_bytes(75)).unwrap();
    std::fs::write(dir.path().join("not_a_region.l2j"), b"garbage").unwrap();
    std::fs::write(dir.path().join("99_99.l2j"), flat_region_bytes(10)).unwrap();

    let engine = GeoEngine::new();
    engine.load_geodata(dir.path()).unwrap();

    assert!(engine.has_any_region());
    let wx = world_x(geo_x(world_x(0) + 1));
    let wy = world_y(geo_y(world_y(0) + 1));
    assert!(engine.can_see(wx, wy, 50, wx, wy, 50));
}
