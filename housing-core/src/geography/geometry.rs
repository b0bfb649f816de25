// Planar polygon geometry for neighbourhood boundaries (lon/lat degrees)

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub type Position = [f64; 2];

/// A closed ring of positions. The first ring of a polygon is its outer boundary.
pub type Ring = Vec<Position>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Polygon {
    pub rings: Vec<Ring>,
}

/// Neighbourhood boundary: one or more polygons.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Geometry {
    pub polygons: Vec<Polygon>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Position,
    pub max: Position,
}

impl BoundingBox {
    pub fn center(&self) -> Position {
        [
            0.5 * (self.min[0] + self.max[0]),
            0.5 * (self.min[1] + self.max[1]),
        ]
    }

    pub fn union(self, other: BoundingBox) -> BoundingBox {
        BoundingBox {
            min: [self.min[0].min(other.min[0]), self.min[1].min(other.min[1])],
            max: [self.max[0].max(other.max[0]), self.max[1].max(other.max[1])],
        }
    }
}

/// Signed shoelace area and area-weighted centroid of a ring.
fn ring_area_centroid(ring: &[Position]) -> (f64, Position) {
    let mut area2 = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..ring.len() {
        let [x0, y0] = ring[i];
        let [x1, y1] = ring[(i + 1) % ring.len()];
        let cross = x0 * y1 - x1 * y0;
        area2 += cross;
        cx += (x0 + x1) * cross;
        cy += (y0 + y1) * cross;
    }
    if area2 == 0.0 {
        return (0.0, [0.0, 0.0]);
    }
    (area2 / 2.0, [cx / (3.0 * area2), cy / (3.0 * area2)])
}

fn parse_position(value: &Value) -> Option<Position> {
    let coords = value.as_array()?;
    let x = coords.first()?.as_f64()?;
    let y = coords.get(1)?.as_f64()?;
    (x.is_finite() && y.is_finite()).then_some([x, y])
}

fn parse_polygon(value: &Value) -> Option<Polygon> {
    let rings = value
        .as_array()?
        .iter()
        .map(|ring| {
            ring.as_array()?
                .iter()
                .map(parse_position)
                .collect::<Option<Ring>>()
        })
        .collect::<Option<Vec<Ring>>>()?;
    // A polygon needs an outer ring with at least a triangle
    match rings.first() {
        Some(outer) if outer.len() >= 3 => Some(Polygon { rings }),
        _ => None,
    }
}

impl Polygon {
    pub fn outer(&self) -> &[Position] {
        self.rings.first().map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Geometry {
    /// Parse a GeoJSON geometry object. Only Polygon and MultiPolygon are accepted.
    pub fn from_geojson(value: &Value) -> Option<Geometry> {
        let kind = value.get("type")?.as_str()?;
        let coordinates = value.get("coordinates")?;
        let polygons = match kind {
            "Polygon" => vec![parse_polygon(coordinates)?],
            "MultiPolygon" => coordinates
                .as_array()?
                .iter()
                .map(parse_polygon)
                .collect::<Option<Vec<_>>>()?,
            _ => return None,
        };
        if polygons.is_empty() {
            return None;
        }
        Some(Geometry { polygons })
    }

    pub fn to_geojson(&self) -> Value {
        if let [polygon] = self.polygons.as_slice() {
            json!({ "type": "Polygon", "coordinates": polygon.rings })
        } else {
            let coordinates: Vec<&Vec<Ring>> = self.polygons.iter().map(|p| &p.rings).collect();
            json!({ "type": "MultiPolygon", "coordinates": coordinates })
        }
    }

    /// Area-weighted centroid of the outer rings, falling back to the vertex mean
    /// for degenerate (zero-area) shapes.
    pub fn centroid(&self) -> Position {
        let mut total = 0.0;
        let mut acc = [0.0, 0.0];
        for polygon in &self.polygons {
            let (area, c) = ring_area_centroid(polygon.outer());
            total += area;
            acc[0] += c[0] * area;
            acc[1] += c[1] * area;
        }
        if total != 0.0 {
            return [acc[0] / total, acc[1] / total];
        }

        let points: Vec<&Position> = self.polygons.iter().flat_map(|p| p.outer()).collect();
        if points.is_empty() {
            return [0.0, 0.0];
        }
        let n = points.len() as f64;
        [
            points.iter().map(|p| p[0]).sum::<f64>() / n,
            points.iter().map(|p| p[1]).sum::<f64>() / n,
        ]
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let mut points = self.polygons.iter().flat_map(|p| p.outer().iter());
        let first = points.next()?;
        let mut bbox = BoundingBox {
            min: *first,
            max: *first,
        };
        for p in points {
            bbox = bbox.union(BoundingBox { min: *p, max: *p });
        }
        Some(bbox)
    }
}
