use std::collections::HashMap;

use crate::errors::{Error, Result};

pub type OsmId = i64;

/// Height of one storey, used when a building only tells us its level count.
pub const AVERAGE_LEVEL_HEIGHT: f64 = 3.0;
pub const DEFAULT_BUILDING_HEIGHT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapCoords {
    pub lat: f64,
    pub lon: f64,
}

impl MapCoords {
    pub fn new(lat: f64, lon: f64) -> Self {
        MapCoords { lat, lon }
    }
}

impl From<&Node> for MapCoords {
    fn from(value: &Node) -> Self {
        MapCoords {
            lat: value.lat,
            lon: value.lon,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: OsmId,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Tag {
            key: key.into(),
            value: value.into(),
        }
    }
}

pub type TagLookup<'a> = HashMap<&'a str, &'a str>;

#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    pub id: OsmId,
    pub node_refs: Vec<OsmId>,
    pub tags: Vec<Tag>,
    pub points: Vec<MapCoords>,
    pub is_highway: bool,
    pub is_building: bool,
    pub building_height: f64,
}

impl Way {
    pub fn new(id: OsmId) -> Self {
        Way {
            id,
            node_refs: Vec::new(),
            tags: Vec::new(),
            points: Vec::new(),
            is_highway: false,
            is_building: false,
            building_height: 0.0,
        }
    }

    /// Tags as a map; on duplicate keys the later value wins.
    pub fn tag_lookup(&self) -> TagLookup<'_> {
        self.tags.iter()
            .map(|tag| (tag.key.as_str(), tag.value.as_str()))
            .collect()
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.iter()
            .rev()
            .find(|tag| tag.key == key)
            .map(|tag| tag.value.as_str())
    }

    /// Recomputes the flags and height from the tags.
    pub fn classify(&mut self) {
        let lookup = self.tag_lookup();
        let is_highway = lookup.contains_key("highway");
        let is_building = lookup.contains_key("building");
        let height = building_height(&lookup);

        self.is_highway = is_highway;
        self.is_building = is_building;
        self.building_height = height;
    }

    /// Fills in every derived field. Unknown node references are dropped unless
    /// `strict` is set, in which case the first one is an error. Returns the
    /// number of dropped references.
    pub fn enrich(&mut self, nodes: &NodeIndex, strict: bool) -> Result<usize> {
        let mut points = Vec::with_capacity(self.node_refs.len());
        let mut dropped = 0;
        for node_ref in &self.node_refs {
            match nodes.get(*node_ref) {
                Some(node) => points.push(node.into()),
                None if strict => {
                    return Err(Error::parse(format!(
                        "way {} references unknown node {}", self.id, node_ref
                    )));
                },
                None => dropped += 1,
            }
        }
        self.points = points;
        self.classify();
        Ok(dropped)
    }
}

/// Height in metres derived from building tags. Non-buildings are 0. A present
/// but unparseable `height` keeps the default rather than falling back to
/// `building:levels`.
pub fn building_height(tags: &TagLookup) -> f64 {
    if !tags.contains_key("building") {
        return 0.0;
    }

    if let Some(height) = tags.get("height") {
        parse_tag_float(height).unwrap_or(DEFAULT_BUILDING_HEIGHT)
    } else if let Some(levels) = tags.get("building:levels") {
        parse_tag_float(levels)
            .map(|levels| levels * AVERAGE_LEVEL_HEIGHT)
            .unwrap_or(DEFAULT_BUILDING_HEIGHT)
    } else {
        DEFAULT_BUILDING_HEIGHT
    }
}

fn parse_tag_float(value: &str) -> Option<f64> {
    value.trim().parse().ok()
}

/// Lookup from node id to node used while ways are being resolved. Re-inserting
/// an id replaces its coordinates but keeps the position of its first insertion.
#[derive(Debug, Default)]
pub struct NodeIndex {
    nodes: Vec<Node>,
    positions: HashMap<OsmId, usize>,
}

impl NodeIndex {
    pub fn insert(&mut self, node: Node) {
        match self.positions.get(&node.id) {
            Some(&pos) => self.nodes[pos] = node,
            None => {
                self.positions.insert(node.id, self.nodes.len());
                self.nodes.push(node);
            },
        }
    }

    pub fn get(&self, id: OsmId) -> Option<&Node> {
        self.positions.get(&id).map(|&pos| &self.nodes[pos])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }
}
