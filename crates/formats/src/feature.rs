use foundation::bounds::Aabb2;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GeoPoint {
    pub lon_deg: f64,
    pub lat_deg: f64,
}

impl GeoPoint {
    pub fn new(lon_deg: f64, lat_deg: f64) -> Self {
        Self { lon_deg, lat_deg }
    }

    pub fn is_finite(&self) -> bool {
        self.lon_deg.is_finite() && self.lat_deg.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(GeoPoint),
    MultiPoint(Vec<GeoPoint>),
    LineString(Vec<GeoPoint>),
    MultiLineString(Vec<Vec<GeoPoint>>),
    Polygon(Vec<Vec<GeoPoint>>),
    MultiPolygon(Vec<Vec<Vec<GeoPoint>>>),
}

impl Geometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::LineString(_) => "LineString",
            Geometry::MultiLineString(_) => "MultiLineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Visit every coordinate, in document order.
    pub fn for_each_position(&self, mut f: impl FnMut(&GeoPoint)) {
        match self {
            Geometry::Point(p) => f(p),
            Geometry::MultiPoint(ps) | Geometry::LineString(ps) => ps.iter().for_each(f),
            Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => {
                lines.iter().flatten().for_each(f)
            }
            Geometry::MultiPolygon(polys) => polys.iter().flatten().flatten().for_each(f),
        }
    }

    pub fn position_count(&self) -> usize {
        let mut n = 0usize;
        self.for_each_position(|_| n += 1);
        n
    }

    pub fn is_empty(&self) -> bool {
        self.position_count() == 0
    }

    /// Bounding envelope of all coordinates; empty if there are none.
    pub fn envelope(&self) -> Aabb2 {
        let mut b = Aabb2::empty();
        self.for_each_position(|p| b.extend_point([p.lon_deg, p.lat_deg]));
        b
    }

    pub fn to_geojson_value(&self) -> Value {
        let coords = match self {
            Geometry::Point(p) => point_coords(p),
            Geometry::MultiPoint(ps) | Geometry::LineString(ps) => points_coords(ps),
            Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => {
                Value::Array(lines.iter().map(|l| points_coords(l)).collect())
            }
            Geometry::MultiPolygon(polys) => Value::Array(
                polys
                    .iter()
                    .map(|poly| Value::Array(poly.iter().map(|r| points_coords(r)).collect()))
                    .collect(),
            ),
        };
        let mut obj = Map::new();
        obj.insert("type".to_string(), Value::String(self.type_name().to_string()));
        obj.insert("coordinates".to_string(), coords);
        Value::Object(obj)
    }

    pub fn from_geojson_value(value: &Value) -> Result<Self, String> {
        parse_geometry(value)
    }
}

/// One record from the upstream store. Immutable once received.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Store-assigned identifier; also the keyset pagination key.
    pub id: u64,
    pub properties: Map<String, Value>,
    /// `None` when the record carried a null or unparseable geometry.
    pub geometry: Option<Geometry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureError {
    #[error("feature must be a JSON object")]
    NotAnObject,
    #[error("unexpected feature type: {0}")]
    UnexpectedType(String),
    #[error("feature has no numeric id")]
    MissingId,
}

impl Feature {
    pub fn new(id: u64, properties: Map<String, Value>, geometry: Option<Geometry>) -> Self {
        Self {
            id,
            properties,
            geometry,
        }
    }

    /// Parse one GeoJSON `Feature`.
    ///
    /// The id is taken from `id`, then `properties.id` (numbers or numeric
    /// strings), then `fallback_id`. An invalid geometry does not fail the
    /// feature; it is stored as `None`.
    pub fn from_geojson_value(value: &Value, fallback_id: Option<u64>) -> Result<Self, FeatureError> {
        let obj = value.as_object().ok_or(FeatureError::NotAnObject)?;
        match obj.get("type").and_then(|v| v.as_str()) {
            Some("Feature") => {}
            Some(other) => return Err(FeatureError::UnexpectedType(other.to_string())),
            None => return Err(FeatureError::UnexpectedType("<missing>".to_string())),
        }

        let properties = obj
            .get("properties")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let id = obj
            .get("id")
            .and_then(numeric_id)
            .or_else(|| properties.get("id").and_then(numeric_id))
            .or(fallback_id)
            .ok_or(FeatureError::MissingId)?;

        let geometry = match obj.get("geometry") {
            None | Some(Value::Null) => None,
            Some(g) => match parse_geometry(g) {
                Ok(geom) => Some(geom),
                Err(reason) => {
                    debug!(feature_id = id, %reason, "dropping unparseable geometry");
                    None
                }
            },
        };

        Ok(Self {
            id,
            properties,
            geometry,
        })
    }

    pub fn to_geojson_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".to_string(), Value::String("Feature".to_string()));
        obj.insert("id".to_string(), Value::from(self.id));
        obj.insert(
            "properties".to_string(),
            Value::Object(self.properties.clone()),
        );
        obj.insert(
            "geometry".to_string(),
            self.geometry
                .as_ref()
                .map(Geometry::to_geojson_value)
                .unwrap_or(Value::Null),
        );
        Value::Object(obj)
    }
}

fn numeric_id(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("expected GeoJSON FeatureCollection")]
    NotAFeatureCollection,
}

/// A parsed `FeatureCollection`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
    /// Entries that were not valid features (skipped, not fatal).
    pub rejected: usize,
}

impl FeatureCollection {

    pub fn from_geojson_value(value: &Value) -> Result<Self, CollectionError> {
        let obj = value
            .as_object()
            .ok_or(CollectionError::NotAFeatureCollection)?;
        if obj.get("type").and_then(|v| v.as_str()) != Some("FeatureCollection") {
            return Err(CollectionError::NotAFeatureCollection);
        }
        let items = obj
            .get("features")
            .and_then(|v| v.as_array())
            .ok_or(CollectionError::NotAFeatureCollection)?;

        let mut out = Self {
            features: Vec::with_capacity(items.len()),
            rejected: 0,
        };
        for (index, item) in items.iter().enumerate() {
            match Feature::from_geojson_value(item, None) {
                Ok(f) => out.features.push(f),
                Err(err) => {
                    debug!(index, %err, "skipping invalid feature");
                    out.rejected += 1;
                }
            }
        }
        Ok(out)
    }

    pub fn to_geojson_value(&self) -> Value {
        feature_collection_value(self.features.iter())
    }
}

/// Serialize features as a GeoJSON `FeatureCollection`.
pub fn feature_collection_value<'a>(features: impl Iterator<Item = &'a Feature>) -> Value {
    let mut root = Map::new();
    root.insert(
        "type".to_string(),
        Value::String("FeatureCollection".to_string()),
    );
    root.insert(
        "features".to_string(),
        Value::Array(features.map(Feature::to_geojson_value).collect()),
    );
    Value::Object(root)
}

fn point_coords(p: &GeoPoint) -> Value {
    Value::Array(vec![Value::from(p.lon_deg), Value::from(p.lat_deg)])
}

fn points_coords(ps: &[GeoPoint]) -> Value {
    Value::Array(ps.iter().map(point_coords).collect())
}

fn parse_geometry(value: &Value) -> Result<Geometry, String> {
    let obj = value
        .as_object()
        .ok_or("geometry must be an object".to_string())?;
    let ty = obj
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or("geometry missing type".to_string())?;

    let coords = obj
        .get("coordinates")
        .ok_or("geometry missing coordinates".to_string())?;

    match ty {
        "Point" => Ok(Geometry::Point(parse_point(coords)?)),
        "MultiPoint" => Ok(Geometry::MultiPoint(parse_points(coords)?)),
        "LineString" => Ok(Geometry::LineString(parse_points(coords)?)),
        "MultiLineString" => Ok(Geometry::MultiLineString(parse_rings(coords)?)),
        "Polygon" => Ok(Geometry::Polygon(parse_rings(coords)?)),
        "MultiPolygon" => {
            let polys = coords
                .as_array()
                .ok_or("MultiPolygon coordinates must be an array of polygons".to_string())?;
            polys.iter().map(parse_rings).collect::<Result<_, _>>().map(Geometry::MultiPolygon)
        }
        other => Err(format!("unsupported geometry type: {other}")),
    }
}

fn parse_point(coords: &Value) -> Result<GeoPoint, String> {
    let arr = coords
        .as_array()
        .ok_or("Point coordinates must be an array".to_string())?;
    if arr.len() < 2 {
        return Err("Point coordinates must have [lon, lat]".to_string());
    }
    let lon = arr[0]
        .as_f64()
        .ok_or("Point lon must be a number".to_string())?;
    let lat = arr[1]
        .as_f64()
        .ok_or("Point lat must be a number".to_string())?;
    Ok(GeoPoint::new(lon, lat))
}

fn parse_points(coords: &Value) -> Result<Vec<GeoPoint>, String> {
    let arr = coords
        .as_array()
        .ok_or("coordinates must be an array".to_string())?;
    arr.iter().map(parse_point).collect()
}

fn parse_rings(coords: &Value) -> Result<Vec<Vec<GeoPoint>>, String> {
    let arr = coords
        .as_array()
        .ok_or("coordinates must be an array of rings".to_string())?;
    arr.iter().map(parse_points).collect()
}
