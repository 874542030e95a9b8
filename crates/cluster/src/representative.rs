use formats::feature::{Feature, GeoPoint};
use foundation::math::mercator::wrap_lng;
use thiserror::Error;

/// Why a feature cannot be placed on the map. Never fatal for its batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("feature {0} has no geometry")]
    Missing(u64),
    #[error("feature {0} geometry has no coordinates")]
    Empty(u64),
    #[error("feature {0} has non-finite coordinates")]
    NonFinite(u64),
}

/// Centre of the feature's bounding envelope.
///
/// For concave or multi-part shapes this can fall outside the geometry.
/// Longitudes past the antimeridian are wrapped into `[-180, 180)`.
pub fn representative_point(feature: &Feature) -> Result<GeoPoint, GeometryError> {
    let geometry = feature
        .geometry
        .as_ref()
        .ok_or(GeometryError::Missing(feature.id))?;

    let mut finite = true;
    geometry.for_each_position(|p| finite &= p.is_finite());
    if !finite {
        return Err(GeometryError::NonFinite(feature.id));
    }

    let [lon, lat] = geometry
        .envelope()
        .center()
        .ok_or(GeometryError::Empty(feature.id))?;
    Ok(GeoPoint::new(wrap_lng(lon), lat))
}

#[cfg(test)]
mod tests {
    use super::{GeometryError, representative_point};
    use formats::feature::{Feature, GeoPoint, Geometry};
    use serde_json::Map;

    fn feature(id: u64, geometry: Option<Geometry>) -> Feature {
        Feature::new(id, Map::new(), geometry)
    }

    #[test]
    fn point_is_its_own_representative() {
        let f = feature(1, Some(Geometry::Point(GeoPoint::new(3.0, 4.0))));
        assert_eq!(representative_point(&f), Ok(GeoPoint::new(3.0, 4.0)));
    }

    #[test]
    fn polygon_uses_envelope_center() {
        // An L-shape whose bbox centre lies outside the polygon.
        let ring = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(4.0, 0.0),
            GeoPoint::new(4.0, 1.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(1.0, 4.0),
            GeoPoint::new(0.0, 4.0),
            GeoPoint::new(0.0, 0.0),
        ];
        let f = feature(2, Some(Geometry::Polygon(vec![ring])));
        assert_eq!(representative_point(&f), Ok(GeoPoint::new(2.0, 2.0)));
    }

    #[test]
    fn shapes_across_the_antimeridian_wrap() {
        let line = vec![GeoPoint::new(175.0, 0.0), GeoPoint::new(195.0, 2.0)];
        let f = feature(6, Some(Geometry::LineString(line)));
        assert_eq!(representative_point(&f), Ok(GeoPoint::new(-175.0, 1.0)));
    }

    #[test]
    fn degenerate_geometries_fail() {
        assert_eq!(
            representative_point(&feature(3, None)),
            Err(GeometryError::Missing(3))
        );
        assert_eq!(
            representative_point(&feature(4, Some(Geometry::MultiPoint(Vec::new())))),
            Err(GeometryError::Empty(4))
        );
        assert_eq!(
            representative_point(&feature(
                5,
                Some(Geometry::Point(GeoPoint::new(f64::NAN, 0.0)))
            )),
            Err(GeometryError::NonFinite(5))
        );
    }
}
