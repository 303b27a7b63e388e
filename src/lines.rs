use crate::{
    data::{osm::MapCoords, OsmMap},
    errors::{Error, Result},
};

/// One entry of a drawable multi-line buffer: either a coordinate or a break
/// between two disjoint polylines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinePoint<T> {
    Point(T),
    Break,
}

impl<T> LinePoint<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> LinePoint<U> {
        match self {
            LinePoint::Point(value) => LinePoint::Point(f(value)),
            LinePoint::Break => LinePoint::Break,
        }
    }

    pub fn is_break(&self) -> bool {
        matches!(self, LinePoint::Break)
    }
}

pub type Path = Vec<MapCoords>;

/// Concatenates the points of the selected ways, in the given order, with a
/// single break between consecutive ways. Ways without points are skipped and
/// the buffer never starts or ends with a break.
pub fn extract_lines(map: &OsmMap, way_indices: &[usize]) -> Result<Vec<LinePoint<MapCoords>>> {
    let mut lines = Vec::new();
    for &idx in way_indices {
        let way = map.ways.get(idx).ok_or_else(|| {
            Error::invalid_input(format!("way index {} out of range ({} ways)", idx, map.ways.len()))
        })?;
        if way.points.is_empty() {
            continue;
        }
        if !lines.is_empty() {
            lines.push(LinePoint::Break);
        }
        lines.extend(way.points.iter().copied().map(LinePoint::Point));
    }
    Ok(lines)
}

/// Same selection as [`extract_lines`], one path per contributing way.
pub fn extract_polylines(map: &OsmMap, way_indices: &[usize]) -> Result<Vec<Path>> {
    Ok(split_at_breaks(&extract_lines(map, way_indices)?))
}

pub fn split_at_breaks<T: Copy>(lines: &[LinePoint<T>]) -> Vec<Vec<T>> {
    lines.split(LinePoint::is_break)
        .filter(|run| !run.is_empty())
        .map(|run| {
            run.iter()
                .filter_map(|point| match point {
                    LinePoint::Point(value) => Some(*value),
                    LinePoint::Break => None,
                })
                .collect()
        })
        .collect()
}
