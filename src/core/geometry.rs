//! Vector geometry kernels: unions, metric buffering, containment,
//! areas and polygon rasterisation onto raster grids.

use crate::core::projection::TransverseMercator;
use crate::types::{Aoi, GeoTransform, PixelMask, WatchError, WatchResult};
use geo::{Area, BooleanOps, Centroid, Coord, LineString, MultiPolygon, Polygon};
use std::f64::consts::PI;

/// Segments used to approximate buffer arcs
const BUFFER_SEGMENTS: usize = 16;

/// Relative outside-area below which a polygon still counts as contained
const CONTAINMENT_TOLERANCE: f64 = 1e-9;

pub fn empty() -> MultiPolygon<f64> {
    MultiPolygon::new(Vec::new())
}

/// Union of many polygons, merged pairwise in a balanced tree
pub fn union_all(polygons: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
    union_multi(
        polygons
            .into_iter()
            .filter(|p| p.unsigned_area() > 0.0)
            .map(MultiPolygon::from)
            .collect(),
    )
}

pub fn union_multi(mut parts: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    parts.retain(|mp| !mp.0.is_empty());
    while parts.len() > 1 {
        let mut merged = Vec::with_capacity((parts.len() + 1) / 2);
        let mut iter = parts.into_iter();
        while let Some(a) = iter.next() {
            match iter.next() {
                Some(b) => merged.push(a.union(&b)),
                None => merged.push(a),
            }
        }
        parts = merged;
    }
    parts.pop().unwrap_or_else(empty)
}

pub fn intersection(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    if a.0.is_empty() || b.0.is_empty() {
        return empty();
    }
    a.intersection(b)
}

pub fn difference(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    if a.0.is_empty() {
        return empty();
    }
    if b.0.is_empty() {
        return a.clone();
    }
    a.difference(b)
}

/// True when `inner` lies within `outer` up to floating point noise
pub fn is_within(inner: &Polygon<f64>, outer: &MultiPolygon<f64>) -> bool {
    let inner_area = inner.unsigned_area();
    if inner_area <= 0.0 {
        return false;
    }
    let outside = difference(&MultiPolygon::from(inner.clone()), outer).unsigned_area();
    outside <= inner_area * CONTAINMENT_TOLERANCE
}

/// Geodesically faithful area of a WGS84 polygon in hectares
pub fn polygon_area_ha(polygon: &Polygon<f64>) -> WatchResult<f64> {
    let tm = TransverseMercator::for_polygon(polygon)?;
    Ok(tm.project_polygon(polygon).unsigned_area() / 10_000.0)
}

pub fn multi_polygon_area_ha(mp: &MultiPolygon<f64>) -> WatchResult<f64> {
    if mp.0.is_empty() {
        return Ok(0.0);
    }
    let c = mp
        .centroid()
        .ok_or_else(|| WatchError::InvalidGeometry("multipolygon has no centroid".to_string()))?;
    let tm = TransverseMercator::centered_on(c.x(), c.y());
    Ok(tm.project_multi_polygon(mp).unsigned_area() / 10_000.0)
}

/// Outward buffer of a WGS84 polygon by `distance_m` meters.
///
/// Built in a local transverse Mercator as the union of the polygon, one
/// rectangle per edge and one circle per vertex.
pub fn buffer_polygon_m(polygon: &Polygon<f64>, distance_m: f64) -> WatchResult<MultiPolygon<f64>> {
    if distance_m <= 0.0 {
        return Ok(MultiPolygon::from(polygon.clone()));
    }

    let tm = TransverseMercator::for_polygon(polygon)?;
    let projected = tm.project_polygon(polygon);

    let mut parts = vec![projected.clone()];
    for ring in std::iter::once(projected.exterior()).chain(projected.interiors().iter()) {
        for line in ring.lines() {
            if let Some(quad) = edge_rectangle(line.start, line.end, distance_m) {
                parts.push(quad);
            }
        }
        // Closing coordinate repeats the first
        let n = ring.0.len().saturating_sub(1);
        for c in ring.0.iter().take(n) {
            parts.push(circle(*c, distance_m));
        }
    }

    let buffered = union_all(parts);
    log::debug!(
        "Buffered polygon by {:.0} m into {} part(s)",
        distance_m,
        buffered.0.len()
    );
    Ok(tm.unproject_multi_polygon(&buffered))
}

fn edge_rectangle(a: Coord<f64>, b: Coord<f64>, d: f64) -> Option<Polygon<f64>> {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return None;
    }
    let nx = -dy / len * d;
    let ny = dx / len * d;
    Some(Polygon::new(
        LineString::from(vec![
            (a.x + nx, a.y + ny),
            (b.x + nx, b.y + ny),
            (b.x - nx, b.y - ny),
            (a.x - nx, a.y - ny),
            (a.x + nx, a.y + ny),
        ]),
        vec![],
    ))
}

fn circle(center: Coord<f64>, r: f64) -> Polygon<f64> {
    let mut coords = Vec::with_capacity(BUFFER_SEGMENTS + 1);
    for i in 0..BUFFER_SEGMENTS {
        let angle = 2.0 * PI * i as f64 / BUFFER_SEGMENTS as f64;
        coords.push((center.x + r * angle.cos(), center.y + r * angle.sin()));
    }
    coords.push(coords[0]);
    Polygon::new(LineString::from(coords), vec![])
}

impl Aoi {
    /// AOI boundary grown by its buffer distance (WGS84)
    pub fn buffered(&self) -> WatchResult<MultiPolygon<f64>> {
        buffer_polygon_m(&self.boundary, self.buffer_km * 1000.0)
    }

    pub fn area_ha(&self) -> WatchResult<f64> {
        polygon_area_ha(&self.boundary)
    }

    pub fn as_multi_polygon(&self) -> MultiPolygon<f64> {
        MultiPolygon::from(self.boundary.clone())
    }
}

/// Burn a polygon set into a boolean mask on a north-up grid.
///
/// A pixel is inside when its centre is inside (even-odd rule, so
/// interior rings punch holes).
pub fn rasterize(shape: &MultiPolygon<f64>, transform: &GeoTransform, rows: usize, cols: usize) -> PixelMask {
    let mut mask = PixelMask::from_elem((rows, cols), false);
    if rows == 0 || cols == 0 || shape.0.is_empty() {
        return mask;
    }

    let mut edges: Vec<(Coord<f64>, Coord<f64>)> = Vec::new();
    for polygon in &shape.0 {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors().iter()) {
            edges.extend(ring.lines().map(|l| (l.start, l.end)));
        }
    }

    let mut crossings: Vec<f64> = Vec::new();
    for row in 0..rows {
        let (_, yc) = transform.pixel_to_map(0.5, row as f64 + 0.5);
        crossings.clear();
        for (a, b) in &edges {
            if (a.y <= yc) != (b.y <= yc) {
                let t = (yc - a.y) / (b.y - a.y);
                crossings.push(a.x + t * (b.x - a.x));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        for pair in crossings.chunks_exact(2) {
            let c0 = ((pair[0] - transform.top_left_x) / transform.pixel_width - 0.5).ceil();
            let c1 = ((pair[1] - transform.top_left_x) / transform.pixel_width - 0.5).ceil();
            let start = c0.max(0.0) as usize;
            let end = (c1.max(0.0) as usize).min(cols);
            for col in start..end {
                mask[[row, col]] = true;
            }
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ]
    }

    #[test]
    fn test_union_all_overlapping_squares() {
        let union = union_all(vec![square(0.0, 0.0, 1.0), square(0.5, 0.5, 1.0), square(5.0, 5.0, 1.0)]);
        assert!((union.unsigned_area() - 2.75).abs() < 1e-9);
        assert!(union_all(vec![]).0.is_empty());
    }

    #[test]
    fn test_area_at_equator() {
        // 0.01 deg x 0.01 deg at the equator: 1113.2 m x 1105.7 m
        let area = polygon_area_ha(&square(0.0, 0.0, 0.01)).unwrap();
        assert!((area - 123.09).abs() < 0.5, "got {}", area);
    }

    #[test]
    fn test_buffer_square_by_one_km() {
        let sq = square(0.0, 0.0, 0.01);
        let buffered = buffer_polygon_m(&sq, 1000.0).unwrap();
        let area_m2 = multi_polygon_area_ha(&buffered).unwrap() * 10_000.0;

        let (a, b, d) = (1113.19, 1105.74, 1000.0);
        let inscribed_16gon = 8.0 * (PI / 8.0).sin() * d * d;
        let expected = a * b + 2.0 * d * (a + b) + inscribed_16gon;
        assert!(
            ((area_m2 - expected) / expected).abs() < 0.01,
            "got {} expected {}",
            area_m2,
            expected
        );
        assert!(is_within(&sq, &buffered));
    }

    #[test]
    fn test_containment() {
        let outer = MultiPolygon::from(square(0.0, 0.0, 10.0));
        assert!(is_within(&square(1.0, 1.0, 2.0), &outer));
        assert!(is_within(&square(0.0, 0.0, 2.0), &outer));
        assert!(!is_within(&square(9.0, 9.0, 2.0), &outer));
    }

    #[test]
    fn test_rasterize_pixel_centres() {
        // 10x10 grid of unit pixels, origin top-left at (0, 10)
        let gt = GeoTransform::north_up(0.0, 10.0, 1.0, 1.0);
        let shape = MultiPolygon::from(square(2.0, 2.0, 3.0));
        let mask = rasterize(&shape, &gt, 10, 10);
        assert_eq!(mask.iter().filter(|v| **v).count(), 9);
        // x 2..5 -> cols 2,3,4 ; y 2..5 -> rows 5,6,7
        assert!(mask[[5, 2]] && mask[[7, 4]]);
        assert!(!mask[[4, 2]] && !mask[[5, 5]]);
    }

    #[test]
    fn test_rasterize_honours_holes() {
        let gt = GeoTransform::north_up(0.0, 10.0, 1.0, 1.0);
        let with_hole = Polygon::new(
            square(0.0, 0.0, 10.0).exterior().clone(),
            vec![square(4.0, 4.0, 2.0).exterior().clone()],
        );
        let mask = rasterize(&MultiPolygon::from(with_hole), &gt, 10, 10);
        assert_eq!(mask.iter().filter(|v| **v).count(), 96);
    }
}
