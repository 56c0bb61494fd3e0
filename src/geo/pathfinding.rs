//! A* pathfinder (C2).
//!
//! Runs over geo coordinates, expands at most 4 cardinal neighbors per node (gated by the
//! cell's NSWE mask) plus up to 4 diagonals when both adjacent cardinals were produced
//! (anti-corner-cut), and smooths the resulting waypoint chain against the direct-movement
//! check.

use super::block::nswe;
use super::{geo_x, geo_y, geo_to_world, GeoEngine, WORLD_MIN_X, WORLD_MIN_Y};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

const ITERATION_CAP: usize = 7000;
const MAX_SMOOTH_PASSES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Node {
    x: i32,
    y: i32,
    z: i32,
    g: f64,
    h: f64,
}

impl Node {
    fn f(&self) -> f64 {
        self.g + self.h
    }
}

#[derive(Clone, Copy)]
struct HeapEntry {
    f: f64,
    index: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.f == other.f
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap is a max-heap, we want the lowest fCost first
        other.f.partial_cmp(&self.f).unwrap_or(Ordering::Equal)
    }
}

struct Arena {
    nodes: Vec<Node>,
    parent: Vec<Option<usize>>,
}

fn heuristic(x: i32, y: i32, z: i32, tx: i32, ty: i32, tz: i32) -> f64 {
    let dx = (tx - x) as f64;
    let dy = (ty - y) as f64;
    let dz = (tz - z) as f64;
    (dx * dx + dy * dy + dz * dz / 256.0).sqrt()
}

const CARDINALS: [(u8, i32, i32); 4] = [
    (nswe::NORTH, 0, -1),
    (nswe::SOUTH, 0, 1),
    (nswe::EAST, 1, 0),
    (nswe::WEST, -1, 0),
];

const DIAGONALS: [(u8, u8, u8, i32, i32); 4] = [
    (nswe::NE, nswe::NORTH, nswe::EAST, 1, -1),
    (nswe::NW, nswe::NORTH, nswe::WEST, -1, -1),
    (nswe::SE, nswe::SOUTH, nswe::EAST, 1, 1),
    (nswe::SW, nswe::SOUTH, nswe::WEST, -1, 1),
];

/// Finds a path in world coordinates from (sx,sy,sz) to (tx,ty,tz). When no geodata has been
/// loaded at all, returns a single-element path containing just the destination (§4.2: callers
/// treat this as "walk in a straight line").
pub fn find_path(
    engine: &GeoEngine,
    sx: i32,
    sy: i32,
    sz: i32,
    tx: i32,
    ty: i32,
    tz: i32,
) -> Option<Vec<(i32, i32, i32)>> {
    if !engine.has_any_region() {
        return Some(vec![(tx, ty, tz)]);
    }

    let start = (geo_x(sx), geo_y(sy), sz);
    let goal = (geo_x(tx), geo_y(ty), tz);

    let raw = run_astar(engine, start, goal)?;
    let world_path: Vec<(i32, i32, i32)> = raw
        .into_iter()
        .map(|(gx, gy, z)| (geo_to_world(gx, WORLD_MIN_X), geo_to_world(gy, WORLD_MIN_Y), z))
        .collect();

    Some(smooth(engine, world_path))
}

fn run_astar(engine: &GeoEngine, start: (i32, i32, i32), goal: (i32, i32, i32)) -> Option<Vec<(i32, i32, i32)>> {
    let (sx, sy, sz) = start;
    let (tx, ty, tz) = goal;

    let mut arena = Arena { nodes: Vec::new(), parent: Vec::new() };
    let mut open_heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
    let mut closed: HashSet<(i32, i32, i32)> = HashSet::new();
    // per-(x,y): which cardinal directions have been produced as neighbors, for anti-corner-cut
    let mut produced: std::collections::HashMap<(i32, i32), u8> = std::collections::HashMap::new();

    let h0 = heuristic(sx, sy, sz, tx, ty, tz);
    arena.nodes.push(Node { x: sx, y: sy, z: sz, g: 0.0, h: h0 });
    arena.parent.push(None);
    open_heap.push(HeapEntry { f: h0, index: 0 });

    let mut iterations = 0usize;

    while let Some(HeapEntry { index, .. }) = open_heap.pop() {
        iterations += 1;
        if iterations > ITERATION_CAP {
            return None;
        }

        let current = arena.nodes[index];
        if closed.contains(&(current.x, current.y, current.z)) {
            continue;
        }
        closed.insert((current.x, current.y, current.z));

        if current.x == tx && current.y == ty && (current.z - tz).abs() < 64 {
            return Some(reconstruct(&arena, index));
        }

        let cell = engine.geo_cell(current.x, current.y, current.z);
        let nswe_mask = if cell.has_geo_data { cell.nswe } else { nswe::ALL };

        let mut local_produced = 0u8;
        for &(dir, dx, dy) in CARDINALS.iter() {
            if nswe_mask & dir == 0 {
                continue;
            }
            let nx = current.x + dx;
            let ny = current.y + dy;
            if nx < 0 || ny < 0 {
                continue;
            }
            let neighbor_cell = engine.geo_cell(nx, ny, current.z);
            let nz = neighbor_cell.z as i32;
            if closed.contains(&(nx, ny, nz)) {
                local_produced |= dir;
                continue;
            }
            let vertical = (nz - current.z).abs();
            let neighbor_nswe = if neighbor_cell.has_geo_data { neighbor_cell.nswe } else { nswe::ALL };
            let cost = if vertical > 16 || neighbor_nswe != nswe::ALL { 3.0 } else { 0.5 };
            push_node(&mut arena, &mut open_heap, index, nx, ny, nz, current.g + cost, tx, ty, tz);
            local_produced |= dir;
        }
        produced.insert((current.x, current.y), local_produced);

        for &(diag, need_a, need_b, dx, dy) in DIAGONALS.iter() {
            if local_produced & need_a == 0 || local_produced & need_b == 0 {
                continue;
            }
            if nswe_mask & diag != diag {
                continue;
            }
            let nx = current.x + dx;
            let ny = current.y + dy;
            if nx < 0 || ny < 0 {
                continue;
            }
            let neighbor_cell = engine.geo_cell(nx, ny, current.z);
            let nz = neighbor_cell.z as i32;
            if closed.contains(&(nx, ny, nz)) {
                continue;
            }
            let vertical = (nz - current.z).abs();
            let neighbor_nswe = if neighbor_cell.has_geo_data { neighbor_cell.nswe } else { nswe::ALL };
            let cost = if vertical > 16 || neighbor_nswe != nswe::ALL { 3.0 } else { 0.707 };
            push_node(&mut arena, &mut open_heap, index, nx, ny, nz, current.g + cost, tx, ty, tz);
        }
    }
    None
}

#[allow(clippy::too_many_arguments)]
fn push_node(
    arena: &mut Arena,
    heap: &mut BinaryHeap<HeapEntry>,
    parent: usize,
    x: i32,
    y: i32,
    z: i32,
    g: f64,
    tx: i32,
    ty: i32,
    tz: i32,
) {
    let h = heuristic(x, y, z, tx, ty, tz);
    let idx = arena.nodes.len();
    arena.nodes.push(Node { x, y, z, g, h });
    arena.parent.push(Some(parent));
    heap.push(HeapEntry { f: g + h, index: idx });
}

fn reconstruct(arena: &Arena, mut index: usize) -> Vec<(i32, i32, i32)> {
    let mut waypoints = Vec::new();
    loop {
        let node = arena.nodes[index];
        waypoints.push((node.x, node.y, node.z));
        match arena.parent[index] {
            Some(p) => index = p,
            None => break,
        }
    }
    waypoints.reverse();
    waypoints
}

fn smooth(engine: &GeoEngine, path: Vec<(i32, i32, i32)>) -> Vec<(i32, i32, i32)> {
    let mut current = path;
    for _ in 0..MAX_SMOOTH_PASSES {
        if current.len() < 3 {
            break;
        }
        let mut next = Vec::with_capacity(current.len());
        next.push(current[0]);
        let mut removed_any = false;
        let mut i = 1;
        while i < current.len() - 1 {
            let (ax, ay, az) = *next.last().unwrap();
            let (bx, by, bz) = current[i + 1];
            if engine.can_move(geo_x(ax), geo_y(ay), az, geo_x(bx), geo_y(by), bz) {
                removed_any = true;
                i += 1;
                continue;
            }
            next.push(current[i]);
            i += 1;
        }
        next.push(*current.last().unwrap());
        current = next;
        if !removed_any {
            break;
        }
    }
    current
}
