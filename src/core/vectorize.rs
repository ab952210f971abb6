//! Mask vectorisation: connected true-regions become polygons.
//!
//! Regions are 4-connected. Each region's pixel sides facing a different
//! label are collected as directed unit edges (clockwise on the pixel grid)
//! and chained into rings; exterior rings come out with positive shoelace
//! area, holes with negative.

use crate::core::geometry;
use crate::core::projection::transform_polygon;
use crate::types::{CoordinateSystem, GeoTransform, PixelMask, WatchResult, Zone, ZoneType};
use geo::{Coord, LineString, Polygon};
use ndarray::Array2;
use std::collections::{HashMap, VecDeque};

type Vertex = (i64, i64); // (col, row) pixel-corner coordinates

#[derive(Debug, Clone, Copy)]
struct Edge {
    from: Vertex,
    to: Vertex,
}

impl Edge {
    fn direction(&self) -> (i64, i64) {
        (self.to.0 - self.from.0, self.to.1 - self.from.1)
    }
}

/// Label 4-connected true regions; returns labels (0 = background) and region count
pub fn label_regions(mask: &PixelMask) -> (Array2<u32>, usize) {
    let (rows, cols) = mask.dim();
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut count = 0u32;
    let mut queue = VecDeque::new();

    for r in 0..rows {
        for c in 0..cols {
            if !mask[[r, c]] || labels[[r, c]] != 0 {
                continue;
            }
            count += 1;
            labels[[r, c]] = count;
            queue.push_back((r, c));

            while let Some((pr, pc)) = queue.pop_front() {
                let neighbors = [
                    (pr.wrapping_sub(1), pc),
                    (pr + 1, pc),
                    (pr, pc.wrapping_sub(1)),
                    (pr, pc + 1),
                ];
                for (nr, nc) in neighbors {
                    if nr < rows && nc < cols && mask[[nr, nc]] && labels[[nr, nc]] == 0 {
                        labels[[nr, nc]] = count;
                        queue.push_back((nr, nc));
                    }
                }
            }
        }
    }

    (labels, count as usize)
}

/// Boundary edges of every region, indexed by label - 1
fn region_edges(labels: &Array2<u32>, count: usize) -> Vec<Vec<Edge>> {
    let (rows, cols) = labels.dim();
    let mut edges = vec![Vec::new(); count];
    let label_at = |r: i64, c: i64| -> u32 {
        if r < 0 || c < 0 || r >= rows as i64 || c >= cols as i64 {
            0
        } else {
            labels[[r as usize, c as usize]]
        }
    };

    for r in 0..rows as i64 {
        for c in 0..cols as i64 {
            let l = label_at(r, c);
            if l == 0 {
                continue;
            }
            let out = &mut edges[(l - 1) as usize];
            if label_at(r - 1, c) != l {
                out.push(Edge { from: (c, r), to: (c + 1, r) });
            }
            if label_at(r, c + 1) != l {
                out.push(Edge { from: (c + 1, r), to: (c + 1, r + 1) });
            }
            if label_at(r + 1, c) != l {
                out.push(Edge { from: (c + 1, r + 1), to: (c, r + 1) });
            }
            if label_at(r, c - 1) != l {
                out.push(Edge { from: (c, r + 1), to: (c, r) });
            }
        }
    }
    edges
}

/// Preference of an outgoing direction given the incoming one.
/// Left turns win so that diagonal pinches inside one region close holes
/// instead of producing self-touching exteriors.
fn turn_rank(incoming: (i64, i64), outgoing: (i64, i64)) -> u8 {
    let (dx, dy) = incoming;
    if outgoing == (dy, -dx) {
        0
    } else if outgoing == incoming {
        1
    } else if outgoing == (-dy, dx) {
        2
    } else {
        3
    }
}

/// Chain directed edges into closed rings of pixel-corner vertices
fn trace_rings(edges: &[Edge]) -> Vec<Vec<Vertex>> {
    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::new();
    for (i, e) in edges.iter().enumerate() {
        outgoing.entry(e.from).or_default().push(i);
    }

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();

    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let mut ring = vec![edges[start].from];
        let mut current = start;

        loop {
            let at = edges[current].to;
            let incoming = edges[current].direction();
            let next = outgoing
                .get(&at)
                .and_then(|cands| {
                    cands
                        .iter()
                        .copied()
                        .min_by_key(|&i| turn_rank(incoming, edges[i].direction()))
                });
            match next {
                Some(n) if n == start => break,
                Some(n) if !used[n] => {
                    used[n] = true;
                    ring.push(at);
                    current = n;
                }
                _ => {
                    log::warn!("Open boundary while tracing region at {:?}", at);
                    break;
                }
            }
        }
        rings.push(ring);
    }
    rings
}

/// Drop vertices lying on a straight run
fn remove_collinear(ring: &[Vertex]) -> Vec<Vertex> {
    let n = ring.len();
    if n < 4 {
        return ring.to_vec();
    }
    (0..n)
        .filter(|&i| {
            let prev = ring[(i + n - 1) % n];
            let cur = ring[i];
            let next = ring[(i + 1) % n];
            let d1 = (cur.0 - prev.0, cur.1 - prev.1);
            let d2 = (next.0 - cur.0, next.1 - cur.1);
            d1.0 * d2.1 - d1.1 * d2.0 != 0
        })
        .map(|i| ring[i])
        .collect()
}

/// Twice the signed area in pixel-corner coordinates
fn signed_area2(ring: &[Vertex]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let a = ring[i];
            let b = ring[(i + 1) % n];
            a.0 * b.1 - b.0 * a.1
        })
        .sum()
}

fn ring_to_map(ring: &[Vertex], transform: &GeoTransform) -> LineString<f64> {
    let mut coords: Vec<Coord<f64>> = ring
        .iter()
        .map(|&(c, r)| {
            let (x, y) = transform.pixel_to_map(c as f64, r as f64);
            Coord { x, y }
        })
        .collect();
    if let Some(first) = coords.first().copied() {
        coords.push(first);
    }
    LineString::new(coords)
}

/// Polygons (in the grid's map coordinates) outlining each true region
pub fn mask_to_polygons(mask: &PixelMask, transform: &GeoTransform) -> Vec<Polygon<f64>> {
    let (labels, count) = label_regions(mask);
    let mut polygons = Vec::with_capacity(count);

    for edges in region_edges(&labels, count) {
        let mut exteriors: Vec<(i64, Vec<Vertex>)> = Vec::new();
        let mut holes: Vec<Vec<Vertex>> = Vec::new();

        for ring in trace_rings(&edges) {
            let ring = remove_collinear(&ring);
            let area2 = signed_area2(&ring);
            if area2 > 0 {
                exteriors.push((area2, ring));
            } else if area2 < 0 {
                holes.push(ring);
            }
        }

        exteriors.sort_by(|a, b| b.0.cmp(&a.0));
        let mut exteriors = exteriors.into_iter();
        if let Some((_, outer)) = exteriors.next() {
            let interiors = holes.iter().map(|h| ring_to_map(h, transform)).collect();
            polygons.push(Polygon::new(ring_to_map(&outer, transform), interiors));
        }
        for (_, extra) in exteriors {
            polygons.push(Polygon::new(ring_to_map(&extra, transform), vec![]));
        }
    }

    polygons
}

/// Vectorise one change mask into WGS84 zones with hectare areas.
/// Zone ids continue from `first_id`.
pub fn vectorize_zones(
    mask: &PixelMask,
    zone_type: ZoneType,
    transform: &GeoTransform,
    crs: CoordinateSystem,
    first_id: usize,
) -> WatchResult<Vec<Zone>> {
    let mut zones = Vec::new();
    for polygon in mask_to_polygons(mask, transform) {
        let geometry = transform_polygon(&polygon, crs, CoordinateSystem::Geographic);
        let area_ha = geometry::polygon_area_ha(&geometry)?;
        zones.push(Zone {
            id: first_id + zones.len(),
            zone_type,
            area_ha,
            geometry,
        });
    }
    log::debug!("Vectorised {} {} zone(s)", zones.len(), zone_type);
    Ok(zones)
}
