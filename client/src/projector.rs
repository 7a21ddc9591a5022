use safehome_shared::{GeoPoint, LocationSample};

/// Where the map sits before any fix is known.
pub const FALLBACK_CENTER: GeoPoint = GeoPoint::new(20.5937, 78.9629);
pub const FALLBACK_ZOOM: u8 = 5;
/// Zoom used once the map follows a subject.
pub const TRACKING_ZOOM: u8 = 14;

const BOUNDS_PADDING: f64 = 0.05;

/// Lat/lng bounding box of a path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub south_west: GeoPoint,
    pub north_east: GeoPoint,
}

impl Bounds {
    pub fn of(points: &[GeoPoint]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut bounds = Bounds {
            south_west: *first,
            north_east: *first,
        };
        for point in rest {
            bounds.south_west.lat = bounds.south_west.lat.min(point.lat);
            bounds.south_west.lng = bounds.south_west.lng.min(point.lng);
            bounds.north_east.lat = bounds.north_east.lat.max(point.lat);
            bounds.north_east.lng = bounds.north_east.lng.max(point.lng);
        }
        Some(bounds)
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.south_west.lat + self.north_east.lat) / 2.0,
            (self.south_west.lng + self.north_east.lng) / 2.0,
        )
    }

    /// Grow each side by 5% of the span, clamped to valid coordinates.
    pub fn padded(&self) -> Self {
        let lat_pad = (self.north_east.lat - self.south_west.lat) * BOUNDS_PADDING;
        let lng_pad = (self.north_east.lng - self.south_west.lng) * BOUNDS_PADDING;
        Bounds {
            south_west: GeoPoint::new(
                (self.south_west.lat - lat_pad).max(-90.0),
                (self.south_west.lng - lng_pad).max(-180.0),
            ),
            north_east: GeoPoint::new(
                (self.north_east.lat + lat_pad).min(90.0),
                (self.north_east.lng + lng_pad).min(180.0),
            ),
        }
    }
}

/// Everything a map renderer needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub center: GeoPoint,
    pub zoom: u8,
    /// Oldest first. Empty unless there are at least two points.
    pub path: Vec<GeoPoint>,
    pub marker: Option<GeoPoint>,
    pub bounds: Option<Bounds>,
}

impl Default for Projection {
    fn default() -> Self {
        project(&[], None)
    }
}

/// Derive map artifacts from a newest-first window and an optional live
/// position that takes priority over the window head.
pub fn project(window: &[LocationSample], current: Option<&LocationSample>) -> Projection {
    let (center, zoom) = match current.or_else(|| window.first()) {
        Some(sample) => (sample.point(), TRACKING_ZOOM),
        None => (FALLBACK_CENTER, FALLBACK_ZOOM),
    };

    let path: Vec<GeoPoint> = if window.len() < 2 {
        Vec::new()
    } else {
        window.iter().rev().map(LocationSample::point).collect()
    };
    let bounds = Bounds::of(&path);

    Projection {
        center,
        zoom,
        path,
        marker: current.map(LocationSample::point),
        bounds,
    }
}
