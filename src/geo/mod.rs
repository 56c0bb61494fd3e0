//! Geo engine (C2): per-region store, coordinate conversions, line of sight, A* pathfinding.
//!
//! Regions are published once at load time into a fixed 32x32 array of atomic pointers;
//! every query after that is lock-free. Absence of a region is not an error: every query
//! degrades to an optimistic default (input Z, NSWE=ALL, clear LOS, direct path).

pub mod block;
pub mod pathfinding;

use crate::error::GeoError;
use block::{compute_nswe, nswe, CellGeo, GeoBlock, CELLS_PER_BLOCK_SIDE};
use std::path::Path;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

pub const WORLD_MIN_X: i32 = -655_360;
pub const WORLD_MIN_Y: i32 = -589_824;
pub const CELL_SIZE: i32 = 16;
pub const BLOCKS_PER_REGION_SIDE: i32 = 256;
pub const REGIONS_PER_SIDE: i32 = 32;
pub const CELLS_PER_REGION_SIDE: i32 = BLOCKS_PER_REGION_SIDE * CELLS_PER_BLOCK_SIDE as i32;
pub const BLOCKS_PER_REGION: usize = (BLOCKS_PER_REGION_SIDE * BLOCKS_PER_REGION_SIDE) as usize;

/// Converts world X (or Y) to an absolute geo cell coordinate.
pub fn world_to_geo(world: i32, world_min: i32) -> i32 {
    (world - world_min) / CELL_SIZE
}

/// Inverse of [`world_to_geo`]; centers on the cell.
pub fn geo_to_world(geo: i32, world_min: i32) -> i32 {
    geo * CELL_SIZE + world_min + CELL_SIZE / 2
}

pub fn geo_x(world_x: i32) -> i32 {
    world_to_geo(world_x, WORLD_MIN_X)
}
pub fn geo_y(world_y: i32) -> i32 {
    world_to_geo(world_y, WORLD_MIN_Y)
}
pub fn world_x(geo_x: i32) -> i32 {
    geo_to_world(geo_x, WORLD_MIN_X)
}
pub fn world_y(geo_y: i32) -> i32 {
    geo_to_world(geo_y, WORLD_MIN_Y)
}

/// One loaded region: 65536 blocks, row-major by local block X then Y. Immutable after load.
pub struct Region {
    blocks: Vec<GeoBlock>,
}

impl Region {
    fn block_at(&self, local_block_x: i32, local_block_y: i32) -> &GeoBlock {
        let idx = (local_block_y * BLOCKS_PER_REGION_SIDE + local_block_x) as usize;
        &self.blocks[idx]
    }

    /// Decodes a full region from an in-region block stream (§6: file contract).
    pub fn decode(data: &[u8]) -> Result<Region, GeoError> {
        let mut blocks = Vec::with_capacity(BLOCKS_PER_REGION);
        let mut offset = 0usize;
        for _ in 0..BLOCKS_PER_REGION {
            let (block, consumed) = GeoBlock::decode(data, offset)?;
            blocks.push(block);
            offset += consumed;
        }
        Ok(Region { blocks })
    }
}

/// Resolves a world-space query down to the owning region, block, and in-block cell.
struct CellLocator {
    region_x: i32,
    region_y: i32,
    block_x: i32,
    block_y: i32,
    cell_index: usize,
}

fn locate(gx: i32, gy: i32) -> Option<CellLocator> {
    if gx < 0 || gy < 0 {
        return None;
    }
    let region_x = gx / CELLS_PER_REGION_SIDE;
    let region_y = gy / CELLS_PER_REGION_SIDE;
    if region_x >= REGIONS_PER_SIDE || region_y >= REGIONS_PER_SIDE {
        return None;
    }
    let within_region_x = gx % CELLS_PER_REGION_SIDE;
    let within_region_y = gy % CELLS_PER_REGION_SIDE;
    let block_x = within_region_x / CELLS_PER_BLOCK_SIDE as i32;
    let block_y = within_region_y / CELLS_PER_BLOCK_SIDE as i32;
    let cell_x = within_region_x % CELLS_PER_BLOCK_SIDE as i32;
    let cell_y = within_region_y % CELLS_PER_BLOCK_SIDE as i32;
    let cell_index = (cell_y * CELLS_PER_BLOCK_SIDE as i32 + cell_x) as usize;
    Some(CellLocator { region_x, region_y, block_x, block_y, cell_index })
}

/// Lock-free store of up to 32x32 regions. Only `load_region` writes; reads never block.
pub struct GeoEngine {
    regions: Vec<AtomicPtr<Region>>,
}

impl Default for GeoEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GeoEngine {
    pub fn new() -> Self {
        let mut regions = Vec::with_capacity((REGIONS_PER_SIDE * REGIONS_PER_SIDE) as usize);
        for _ in 0..(REGIONS_PER_SIDE * REGIONS_PER_SIDE) {
            regions.push(AtomicPtr::new(std::ptr::null_mut()));
        }
        GeoEngine { regions }
    }

    fn slot(&self, region_x: i32, region_y: i32) -> &AtomicPtr<Region> {
        &self.regions[(region_y * REGIONS_PER_SIDE + region_x) as usize]
    }

    /// Publishes a decoded region. Last writer for a slot wins; safe only at load time.
    pub fn publish_region(&self, region_x: i32, region_y: i32, region: Region) {
        let boxed = Box::into_raw(Box::new(region));
        let old = self.slot(region_x, region_y).swap(boxed, Ordering::Release);
        if !old.is_null() {
            // SAFETY: no reader can be holding this pointer across a region reload in the
            // documented load-once-then-read-only discipline (§5).
            unsafe {
                drop(Box::from_raw(old));
            }
        }
    }

    fn region(&self, region_x: i32, region_y: i32) -> Option<&Region> {
        if !(0..REGIONS_PER_SIDE).contains(&region_x) || !(0..REGIONS_PER_SIDE).contains(&region_y) {
            return None;
        }
        let ptr = self.slot(region_x, region_y).load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            // SAFETY: once published, the region is never freed except by a later publish to
            // the same slot, and we only ever hand out shared references here.
            Some(unsafe { &*ptr })
        }
    }

    /// Loads every `<regionX>_<regionY>.l2j` file under `dir` in parallel.
    pub fn load_geodata(&self, dir: &Path) -> std::io::Result<()> {
        let entries: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();

        use rayon::prelude::*;
        entries.par_iter().for_each(|path| {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                return;
            };
            let Some((rx, ry)) = parse_region_name(stem) else {
                tracing::warn!("skipping geo file with unparseable name: {:?}", path);
                return;
            };
            if !(0..REGIONS_PER_SIDE).contains(&rx) || !(0..REGIONS_PER_SIDE).contains(&ry) {
                tracing::warn!("skipping geo file with out-of-range region coords: {:?}", path);
                return;
            }
            let data = match std::fs::read(path) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("failed to read geo file {:?}: {}", path, e);
                    return;
                }
            };
            match Region::decode(&data) {
                Ok(region) => self.publish_region(rx, ry, region),
                Err(e) => tracing::warn!("failed to decode geo region {:?}: {}", path, e),
            }
        });
        Ok(())
    }

    fn geo_at(&self, gx: i32, gy: i32, query_z: i32) -> CellGeo {
        match locate(gx, gy).and_then(|loc| {
            self.region(loc.region_x, loc.region_y)
                .map(|r| (r, loc))
        }) {
            Some((region, loc)) => {
                let block = region.block_at(loc.block_x, loc.block_y);
                block.geo_at(loc.cell_index, query_z)
            }
            None => CellGeo { z: query_z as i16, nswe: nswe::ALL, has_geo_data: false },
        }
    }

    fn next_higher_z(&self, gx: i32, gy: i32, query_z: i32) -> i32 {
        match locate(gx, gy).and_then(|loc| self.region(loc.region_x, loc.region_y).map(|r| (r, loc))) {
            Some((region, loc)) => region.block_at(loc.block_x, loc.block_y).next_higher_z(loc.cell_index, query_z) as i32,
            None => query_z,
        }
    }

    /// True if any region is loaded. Callers use this to decide whether pathfinding should
    /// bother running A* at all (§4.2: "when geodata is not loaded").
    pub fn has_any_region(&self) -> bool {
        self.regions.iter().any(|r| !r.load(Ordering::Acquire).is_null())
    }

    /// Line of sight between two world-space points (§4.2).
    pub fn can_see(&self, ax: i32, ay: i32, az: i32, bx: i32, by: i32, bz: i32) -> bool {
        let (agx, agy) = (geo_x(ax), geo_y(ay));
        let (bgx, bgy) = (geo_x(bx), geo_y(by));
        let a_geo = self.geo_at(agx, agy, az);
        let b_geo = self.geo_at(bgx, bgy, bz);

        if agx == bgx && agy == bgy {
            return !a_geo.has_geo_data || a_geo.z == b_geo.z;
        }

        // Traverse starting from the higher-Z endpoint.
        let (mut sx, mut sy, mut sz, ex, ey, ez) = if a_geo.z as i32 >= b_geo.z as i32 {
            (agx, agy, a_geo.z as i32, bgx, bgy, b_geo.z as i32)
        } else {
            (bgx, bgy, b_geo.z as i32, agx, agy, a_geo.z as i32)
        };
        let start_z = sz;

        let dx = (ex - sx).abs();
        let dy = (ey - sy).abs();
        let dz = (ez - sz).abs();
        let step_x = if ex > sx { 1 } else { -1 };
        let step_y = if ey > sy { 1 } else { -1 };
        let step_z = if ez > sz { 1 } else { -1 };

        let dominant = dx.max(dy).max(dz);
        if dominant == 0 {
            return true;
        }

        let mut err1 = dominant / 2;
        let mut err2 = dominant / 2;
        let (mut px, mut py) = (sx, sy);
        let mut index = 0usize;

        loop {
            let reached = sx == ex && sy == ey && sz == ez;
            if reached {
                break;
            }

            let (prev_x, prev_y) = (sx, sy);
            // advance the dominant axis by one step, non-dominant axes by Bresenham error
            if dx == dominant {
                sx += step_x;
                err1 += dy;
                err2 += dz;
                if err1 >= dominant {
                    sy += step_y;
                    err1 -= dominant;
                }
                if err2 >= dominant {
                    sz += step_z;
                    err2 -= dominant;
                }
            } else if dy == dominant {
                sy += step_y;
                err1 += dx;
                err2 += dz;
                if err1 >= dominant {
                    sx += step_x;
                    err1 -= dominant;
                }
                if err2 >= dominant {
                    sz += step_z;
                    err2 -= dominant;
                }
            } else {
                sz += step_z;
                err1 += dx;
                err2 += dy;
                if err1 >= dominant {
                    sx += step_x;
                    err1 -= dominant;
                }
                if err2 >= dominant {
                    sy += step_y;
                    err2 -= dominant;
                }
            }

            if sx == prev_x && sy == prev_y {
                // duplicate cell produced by the iterator; skip without re-testing
                if sx == ex && sy == ey && sz == ez {
                    break;
                }
                continue;
            }

            index += 1;
            let bee_z = sz;
            let max_z = if index < 2 { start_z + 48 } else { bee_z + 48 };

            let step_dir = compute_nswe(prev_x, prev_y, sx, sy);
            let is_diagonal = step_dir.count_ones() == 2;

            let directions: &[u8] = if is_diagonal {
                let (h, v) = split_diagonal(step_dir);
                &[h, v][..]
            } else {
                std::slice::from_ref(&step_dir)
            };

            for &dir in directions {
                let (nx, ny) = step_xy(prev_x, prev_y, dir);
                let prev_cell = self.geo_at(px, py, sz);
                let adjusted_z = if prev_cell.nswe & dir != 0 {
                    self.geo_at(nx, ny, sz).z as i32
                } else {
                    self.next_higher_z(nx, ny, sz)
                };
                if adjusted_z > max_z {
                    return false;
                }
            }

            px = sx;
            py = sy;

            if sx == ex && sy == ey && sz == ez {
                break;
            }
        }
        true
    }

    /// 2D direct-movement check between geo coordinates (§4.2).
    pub fn can_move(&self, fx: i32, fy: i32, fz: i32, tx: i32, ty: i32, tz: i32) -> bool {
        let dx = (tx - fx).abs();
        let dy = (ty - fy).abs();
        let step_x = if tx > fx { 1 } else { -1 };
        let step_y = if ty > fy { 1 } else { -1 };
        let dominant = dx.max(dy);
        if dominant == 0 {
            return true;
        }
        let mut err = dominant / 2;
        let (mut cx, mut cy, mut cz) = (fx, fy, fz);

        loop {
            if cx == tx && cy == ty {
                return true;
            }
            let (prev_x, prev_y) = (cx, cy);
            if dx >= dy {
                cx += step_x;
                err += dy;
                if err >= dominant {
                    cy += step_y;
                    err -= dominant;
                }
            } else {
                cy += step_y;
                err += dx;
                if err >= dominant {
                    cx += step_x;
                    err -= dominant;
                }
            }
            let dir = compute_nswe(prev_x, prev_y, cx, cy);
            let prev_geo = self.geo_at(prev_x, prev_y, cz);
            if !prev_geo.has_geo_data {
                cz = self.geo_at(cx, cy, cz).z as i32;
                continue;
            }
            if prev_geo.nswe & dir == 0 {
                return false;
            }
            let next_geo = self.geo_at(cx, cy, cz);
            if (next_geo.z as i32 - cz).abs() > 40 {
                return false;
            }
            cz = next_geo.z as i32;
        }
    }

    pub(crate) fn geo_cell(&self, gx: i32, gy: i32, query_z: i32) -> CellGeo {
        self.geo_at(gx, gy, query_z)
    }
}

fn split_diagonal(dir: u8) -> (u8, u8) {
    let h = dir & (nswe::EAST | nswe::WEST);
    let v = dir & (nswe::NORTH | nswe::SOUTH);
    (h, v)
}

fn step_xy(x: i32, y: i32, dir: u8) -> (i32, i32) {
    let mut nx = x;
    let mut ny = y;
    if dir & nswe::EAST != 0 {
        nx += 1;
    }
    if dir & nswe::WEST != 0 {
        nx -= 1;
    }
    if dir & nswe::SOUTH != 0 {
        ny += 1;
    }
    if dir & nswe::NORTH != 0 {
        ny -= 1;
    }
    (nx, ny)
}

fn parse_region_name(stem: &str) -> Option<(i32, i32)> {
    let (x_str, y_str) = stem.split_once('_')?;
    let x: i32 = x_str.parse().ok()?;
    let y: i32 = y_str.parse().ok()?;
    Some((x, y))
}

pub type SharedGeoEngine = Arc<GeoEngine>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_roundtrip_within_half_cell() {
        for world_x in [-655_360, -100_000, 0, 100_000, 5_000_000] {
            let g = geo_x(world_x);
            let back = world_x(g);
            assert!((back - world_x).abs() <= 16, "world_x={world_x} back={back}");
        }
    }

    #[test]
    fn no_geodata_is_optimistic() {
        let engine = GeoEngine::new();
        assert!(engine.can_see(0, 0, 0, 1000, 1000, 500));
        assert!(engine.can_move(0, 0, 0, 5, 5, 0));
        assert!(!engine.has_any_region());
    }

    #[test]
    fn los_reflexive_within_single_flat_cell() {
        let engine = GeoEngine::new();
        let mut data = Vec::new();
        for _ in 0..BLOCKS_PER_REGION {
            data.push(0x00u8);
            data.extend_from_slice(&100i16.to_le_bytes());
        }
        let region = Region::decode(&data).unwrap();
        engine.publish_region(0, 0, region);
        let wx = world_x(0) + 1;
        let wy = world_y(0) + 1;
        assert!(engine.can_see(wx, wy, 100, wx, wy, 100));
    }

    #[test]
    fn los_blocked_by_wall() {
        let engine = GeoEngine::new();
        let mut data = Vec::new();
        for block_idx in 0..BLOCKS_PER_REGION {
            if block_idx == 0 {
                data.push(0x01u8);
                for cell in 0..64 {
                    let nswe_mask = if cell == 0 { nswe::EAST | nswe::SOUTH } else { nswe::ALL };
                    let raw = ((96i16 as u16) << 1 & 0xFFF0) | nswe_mask as u16;
                    data.extend_from_slice(&raw.to_le_bytes());
                }
            } else {
                data.push(0x00u8);
                data.extend_from_slice(&96i16.to_le_bytes());
            }
        }
        let region = Region::decode(&data).unwrap();
        engine.publish_region(0, 0, region);

        let base_x = WORLD_MIN_X + 8;
        let base_y = WORLD_MIN_Y + 8;
        // Direct east-south movement from cell (0,0) succeeds (matches its mask).
        assert!(engine.can_move(geo_x(base_x), geo_y(base_y), 96, geo_x(base_x) + 1, geo_y(base_y) + 1, 96));
        // Movement north is blocked: cell (0,0) does not permit NORTH.
        assert!(!engine.can_move(geo_x(base_x), geo_y(base_y), 96, geo_x(base_x), geo_y(base_y) - 1, 96));
    }
}
