//! WGS84 <-> transverse Mercator projections (Snyder 1987, USGS PP 1395).
//!
//! Covers UTM (EPSG 326xx / 327xx), which is what Sentinel-2 tiles ship in,
//! plus a transverse Mercator centred on an arbitrary point for metric
//! buffering and area measurement.

use crate::types::{CoordinateSystem, WatchError, WatchResult};
use geo::{Centroid, Coord, MapCoords, MultiPolygon, Polygon};

const A: f64 = 6_378_137.0; // WGS84 semi-major axis (m)
const F: f64 = 1.0 / 298.257_223_563;
const E2: f64 = 2.0 * F - F * F;
const E_PRIME2: f64 = E2 / (1.0 - E2);
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Transverse Mercator projection on the WGS84 ellipsoid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransverseMercator {
    /// Central meridian (degrees)
    pub lon0: f64,
    /// Latitude of origin (degrees)
    pub lat0: f64,
    /// Scale factor on the central meridian
    pub k0: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl TransverseMercator {
    pub fn utm(zone: u8, north: bool) -> Self {
        Self {
            lon0: (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0,
            lat0: 0.0,
            k0: UTM_K0,
            false_easting: UTM_FALSE_EASTING,
            false_northing: if north { 0.0 } else { UTM_FALSE_NORTHING_SOUTH },
        }
    }

    /// Unit-scale projection with its origin at (lon, lat)
    pub fn centered_on(lon: f64, lat: f64) -> Self {
        Self {
            lon0: lon,
            lat0: lat,
            k0: 1.0,
            false_easting: 0.0,
            false_northing: 0.0,
        }
    }

    /// Local projection centred on the centroid of `polygon`
    pub fn for_polygon(polygon: &Polygon<f64>) -> WatchResult<Self> {
        let c = polygon
            .centroid()
            .ok_or_else(|| WatchError::InvalidGeometry("polygon has no centroid".to_string()))?;
        Ok(Self::centered_on(c.x(), c.y()))
    }

    /// (lon, lat) degrees -> (easting, northing) meters
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let lat = lat_deg.to_radians();
        let dlon = (lon_deg - self.lon0).to_radians();

        let sin_lat = lat.sin();
        let cos_lat = lat.cos();
        let tan_lat = lat.tan();

        let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
        let t = tan_lat * tan_lat;
        let c = E_PRIME2 * cos_lat * cos_lat;
        let a = cos_lat * dlon;
        let a2 = a * a;
        let a4 = a2 * a2;
        let a6 = a4 * a2;

        let m = meridional_arc(lat);
        let m0 = meridional_arc(self.lat0.to_radians());

        let easting = self.k0
            * n
            * (a + (1.0 - t + c) * a2 * a / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a4 * a / 120.0)
            + self.false_easting;

        let northing = self.k0
            * (m - m0
                + n * tan_lat
                    * (a2 / 2.0
                        + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                        + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0))
            + self.false_northing;

        (easting, northing)
    }

    /// (easting, northing) meters -> (lon, lat) degrees
    pub fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let m = meridional_arc(self.lat0.to_radians()) + (northing - self.false_northing) / self.k0;
        let e4 = E2 * E2;
        let e6 = e4 * E2;
        let mu = m / (A * (1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

        let sqrt_1_e2 = (1.0 - E2).sqrt();
        let e1 = (1.0 - sqrt_1_e2) / (1.0 + sqrt_1_e2);
        let e1_2 = e1 * e1;
        let e1_3 = e1_2 * e1;
        let e1_4 = e1_3 * e1;

        // Footpoint latitude (Snyder eq. 3-26)
        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

        let sin_phi1 = phi1.sin();
        let cos_phi1 = phi1.cos();
        let tan_phi1 = phi1.tan();

        let c1 = E_PRIME2 * cos_phi1 * cos_phi1;
        let t1 = tan_phi1 * tan_phi1;
        let denom = 1.0 - E2 * sin_phi1 * sin_phi1;
        let n1 = A / denom.sqrt();
        let r1 = A * (1.0 - E2) / denom.powf(1.5);
        let d = (easting - self.false_easting) / (n1 * self.k0);
        let d2 = d * d;
        let d3 = d2 * d;
        let d4 = d3 * d;
        let d5 = d4 * d;
        let d6 = d5 * d;

        let lat = phi1
            - (n1 * tan_phi1 / r1)
                * (d2 / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * E_PRIME2) * d4 / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * E_PRIME2 - 3.0 * c1 * c1)
                        * d6
                        / 720.0);

        let lon = (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * E_PRIME2 + 24.0 * t1 * t1) * d5 / 120.0)
            / cos_phi1;

        (self.lon0 + lon.to_degrees(), lat.to_degrees())
    }

    pub fn project_polygon(&self, polygon: &Polygon<f64>) -> Polygon<f64> {
        polygon.map_coords(|c| {
            let (x, y) = self.forward(c.x, c.y);
            Coord { x, y }
        })
    }

    pub fn unproject_polygon(&self, polygon: &Polygon<f64>) -> Polygon<f64> {
        polygon.map_coords(|c| {
            let (lon, lat) = self.inverse(c.x, c.y);
            Coord { x: lon, y: lat }
        })
    }

    pub fn project_multi_polygon(&self, mp: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        mp.map_coords(|c| {
            let (x, y) = self.forward(c.x, c.y);
            Coord { x, y }
        })
    }

    pub fn unproject_multi_polygon(&self, mp: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        mp.map_coords(|c| {
            let (lon, lat) = self.inverse(c.x, c.y);
            Coord { x: lon, y: lat }
        })
    }
}

/// Meridional arc from the equator to `lat` radians (Snyder eq. 3-21)
fn meridional_arc(lat: f64) -> f64 {
    let e4 = E2 * E2;
    let e6 = e4 * E2;

    A * ((1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * E2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

/// UTM zone (1-60) containing a longitude
pub fn utm_zone_for_lon(lon: f64) -> u8 {
    let zone = ((lon + 180.0) / 6.0).floor() as i64 + 1;
    zone.clamp(1, 60) as u8
}

/// UTM coordinate system for a WGS84 point
pub fn utm_for_point(lon: f64, lat: f64) -> CoordinateSystem {
    CoordinateSystem::Utm {
        zone: utm_zone_for_lon(lon),
        north: lat >= 0.0,
    }
}

impl CoordinateSystem {
    pub fn projection(&self) -> Option<TransverseMercator> {
        match self {
            CoordinateSystem::Geographic => None,
            CoordinateSystem::Utm { zone, north } => Some(TransverseMercator::utm(*zone, *north)),
        }
    }

    /// Native coordinates -> WGS84 (lon, lat)
    pub fn to_wgs84(&self, x: f64, y: f64) -> (f64, f64) {
        match self.projection() {
            Some(tm) => tm.inverse(x, y),
            None => (x, y),
        }
    }

    /// WGS84 (lon, lat) -> native coordinates
    pub fn from_wgs84(&self, lon: f64, lat: f64) -> (f64, f64) {
        match self.projection() {
            Some(tm) => tm.forward(lon, lat),
            None => (lon, lat),
        }
    }
}

pub fn transform_point(from: CoordinateSystem, to: CoordinateSystem, x: f64, y: f64) -> (f64, f64) {
    if from == to {
        return (x, y);
    }
    let (lon, lat) = from.to_wgs84(x, y);
    to.from_wgs84(lon, lat)
}

pub fn transform_polygon(polygon: &Polygon<f64>, from: CoordinateSystem, to: CoordinateSystem) -> Polygon<f64> {
    if from == to {
        return polygon.clone();
    }
    polygon.map_coords(|c| {
        let (x, y) = transform_point(from, to, c.x, c.y);
        Coord { x, y }
    })
}

pub fn transform_multi_polygon(
    mp: &MultiPolygon<f64>,
    from: CoordinateSystem,
    to: CoordinateSystem,
) -> MultiPolygon<f64> {
    if from == to {
        return mp.clone();
    }
    mp.map_coords(|c| {
        let (x, y) = transform_point(from, to, c.x, c.y);
        Coord { x, y }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_utm_forward_reference_points() {
        // Madrid, UTM 30N (pyproj reference 440298.94, 4474257.31)
        let (e, n) = TransverseMercator::utm(30, true).forward(-3.7037, 40.4168);
        assert_abs_diff_eq!(e, 440_298.94, epsilon = 1.0);
        assert_abs_diff_eq!(n, 4_474_257.31, epsilon = 1.0);

        // Buenos Aires, UTM 21S (pyproj reference 373317.50, 6170036.17)
        let (e, n) = TransverseMercator::utm(21, false).forward(-58.3816, -34.6037);
        assert_abs_diff_eq!(e, 373_317.50, epsilon = 1.0);
        assert_abs_diff_eq!(n, 6_170_036.17, epsilon = 1.0);
    }

    #[test]
    fn test_inverse_recovers_wgs84() {
        for &(lon, lat, zone, north) in &[
            (-3.7037, 40.4168, 30u8, true),
            (-58.3816, -34.6037, 21u8, false),
            (27.5, -26.2, 35u8, false),
            (121.9, 65.0, 51u8, true),
        ] {
            let tm = TransverseMercator::utm(zone, north);
            let (e, n) = tm.forward(lon, lat);
            let (lon2, lat2) = tm.inverse(e, n);
            assert_abs_diff_eq!(lon2, lon, epsilon = 1e-7);
            assert_abs_diff_eq!(lat2, lat, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_local_projection_origin() {
        let tm = TransverseMercator::centered_on(28.0, -26.0);
        let (x, y) = tm.forward(28.0, -26.0);
        assert_abs_diff_eq!(x, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-6);

        // One arc-second of latitude is roughly 30.8 m
        let (_, y) = tm.forward(28.0, -26.0 + 1.0 / 3600.0);
        assert!((y - 30.8).abs() < 0.3, "got {}", y);
    }

    #[test]
    fn test_zone_lookup() {
        assert_eq!(utm_zone_for_lon(-3.7), 30);
        assert_eq!(utm_zone_for_lon(-180.0), 1);
        assert_eq!(utm_zone_for_lon(180.0), 60);
        assert_eq!(
            utm_for_point(28.0, -26.0),
            CoordinateSystem::Utm { zone: 35, north: false }
        );
    }

    #[test]
    fn test_transform_point_between_systems() {
        let utm = CoordinateSystem::Utm { zone: 35, north: false };
        let (x, y) = transform_point(CoordinateSystem::Geographic, utm, 27.5, -26.2);
        let (lon, lat) = transform_point(utm, CoordinateSystem::Geographic, x, y);
        assert_abs_diff_eq!(lon, 27.5, epsilon = 1e-7);
        assert_abs_diff_eq!(lat, -26.2, epsilon = 1e-7);
    }
}
