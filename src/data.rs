use self::osm::{Node, Way};

pub mod osm;

/// Map data as defined in the .osm file. Only nodes and ways are kept; ways carry
/// their derived points, classification flags and building height.

#[derive(Debug, Default, Clone, PartialEq)]
pub struct OsmMap {
    pub nodes: Vec<Node>,
    pub ways: Vec<Way>,
}

impl OsmMap {
    pub fn highway_indices(&self) -> Vec<usize> {
        self.indices_where(|way| way.is_highway)
    }

    pub fn building_indices(&self) -> Vec<usize> {
        self.indices_where(|way| way.is_building)
    }

    /// Ways that are neither highways nor buildings.
    pub fn other_indices(&self) -> Vec<usize> {
        self.indices_where(|way| !way.is_highway && !way.is_building)
    }

    fn indices_where(&self, predicate: impl Fn(&Way) -> bool) -> Vec<usize> {
        self.ways.iter()
            .enumerate()
            .filter(|(_, way)| predicate(way))
            .map(|(idx, _)| idx)
            .collect()
    }
}
