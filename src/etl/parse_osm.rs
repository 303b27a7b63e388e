use std::fmt::Display;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use log::{debug, info};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use xz::bufread::XzDecoder;

use crate::UserConfig;
use crate::data::OsmMap;
use crate::data::osm::{Node, NodeIndex, Tag, Way};
use crate::errors::{Error, ErrorKind, Result};
use crate::etl::Etl;

pub const ETL_NAME: &str = "parse_osm";

#[derive(Debug, Default, Clone, Copy)]
pub struct LoadOptions {
    /// Treat a way referencing an unknown node as a parse error instead of
    /// dropping the reference.
    pub strict_node_refs: bool,
}

/// Reads a whole OSM XML document and returns its nodes and enriched ways.
pub fn load_osm<R: BufRead>(source: R, options: &LoadOptions) -> Result<OsmMap> {
    let mut reader = Reader::from_reader(source);
    reader.trim_text(true);

    let mut parser = DocumentParser::default();
    parser.parse(&mut reader)?;
    let DocumentParser { nodes, mut ways, .. } = parser;

    let mut dropped = 0;
    for way in &mut ways {
        dropped += way.enrich(&nodes, options.strict_node_refs)?;
    }
    if dropped > 0 {
        debug!(dropped_refs = dropped; "Dropped unresolved node references");
    }

    Ok(OsmMap {
        nodes: nodes.into_nodes(),
        ways,
    })
}

/// Opens an .osm file, decompressing on the fly when the name ends in `.xz`.
pub fn open_osm_source(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = fs::File::open(path).map_err(|err| {
        Error::new(ErrorKind::Io, format!("{}: {}", path.display(), err))
    })?;
    let file_reader = BufReader::new(file);

    if path.extension().is_some_and(|ext| ext == "xz") {
        let xz_reader = XzDecoder::new(file_reader);
        Ok(Box::new(BufReader::new(xz_reader)))
    } else {
        Ok(Box::new(file_reader))
    }
}

#[derive(Default)]
struct DocumentParser {
    depth: usize,
    seen_root: bool,
    current_way: Option<Way>,
    nodes: NodeIndex,
    ways: Vec<Way>,
}

impl DocumentParser {
    fn parse<R: BufRead>(&mut self, reader: &mut Reader<R>) -> Result<()> {
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Eof => break,
                Event::Start(e) => {
                    self.open_element(&e, true)?;
                    self.depth += 1;
                },
                Event::Empty(e) => self.open_element(&e, false)?,
                Event::End(_e) => self.close_element(),
                Event::Text(_e) if self.depth == 0 => {
                    return Err(Error::parse("text outside of the root element"));
                },
                // Text inside elements, comments, declarations and the like carry no map data.
                _ => (),
            }
            buf.clear();
        }

        if self.depth != 0 {
            return Err(Error::parse(format!(
                "unexpected end of document with {} unclosed element(s)", self.depth
            )));
        }
        if !self.seen_root {
            return Err(Error::parse("document has no root element"));
        }
        Ok(())
    }

    fn open_element(&mut self, el: &BytesStart, has_children: bool) -> Result<()> {
        match self.depth {
            0 => {
                if self.seen_root {
                    return Err(Error::parse("document has more than one root element"));
                }
                self.seen_root = true;
            },
            1 => match el.name().as_ref() {
                b"node" => self.nodes.insert(parse_node(el)?),
                b"way" => {
                    let way = Way::new(parse_attribute(el, "way", "id")?);
                    if has_children {
                        self.current_way = Some(way);
                    } else {
                        self.ways.push(way);
                    }
                },
                _ => (),
            },
            2 => {
                if let Some(way) = self.current_way.as_mut() {
                    match el.name().as_ref() {
                        b"nd" => way.node_refs.push(parse_attribute(el, "nd", "ref")?),
                        b"tag" => way.tags.push(Tag {
                            key: attribute(el, "tag", "k")?,
                            value: attribute(el, "tag", "v")?,
                        }),
                        _ => (),
                    }
                }
            },
            _ => (),
        }
        Ok(())
    }

    fn close_element(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 1 {
            if let Some(way) = self.current_way.take() {
                self.ways.push(way);
            }
        }
    }
}

fn parse_node(el: &BytesStart) -> Result<Node> {
    Ok(Node {
        id: parse_attribute(el, "node", "id")?,
        lat: parse_attribute(el, "node", "lat")?,
        lon: parse_attribute(el, "node", "lon")?,
    })
}

fn attribute(el: &BytesStart, element: &str, key: &str) -> Result<String> {
    let attribute = el.try_get_attribute(key)?.ok_or_else(|| {
        Error::parse(format!("<{}> is missing attribute '{}'", element, key))
    })?;
    Ok(attribute.unescape_value()?.into_owned())
}

fn parse_attribute<T>(el: &BytesStart, element: &str, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let value = attribute(el, element, key)?;
    value.trim().parse().map_err(|err| {
        Error::parse(format!("invalid {} '{}' on <{}>: {}", key, value, element, err))
    })
}

pub struct ParseOsmEtl<'a> {
    config: &'a UserConfig,
    map: Option<OsmMap>,
}

impl ParseOsmEtl<'_> {
    pub fn new(config: &UserConfig) -> ParseOsmEtl<'_> {
        ParseOsmEtl {
            config,
            map: None,
        }
    }

    fn options(&self) -> LoadOptions {
        LoadOptions {
            strict_node_refs: self.config.strict_node_refs,
        }
    }

    pub fn into_map(self) -> Result<OsmMap> {
        self.map.ok_or_else(|| Error::invalid_input("OSM data was requested before it was parsed"))
    }
}

impl Etl for ParseOsmEtl<'_> {
    type Input = Box<dyn BufRead>;
    type Output = OsmMap;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn extract(&mut self) -> Result<Self::Input> {
        info!(etl_name = ETL_NAME, path = self.config.data_path.as_str(); "Opening OSM file");
        open_osm_source(Path::new(&self.config.data_path))
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let map = load_osm(input, &self.options())?;
        info!(etl_name = ETL_NAME, nodes = map.nodes.len(), ways = map.ways.len(); "Parsed OSM document");
        Ok(map)
    }

    fn load(&mut self, output: Self::Output) -> Result<()> {
        self.map = Some(output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::osm::MapCoords;

    fn load(xml: &str) -> Result<OsmMap> {
        load_osm(xml.as_bytes(), &LoadOptions::default())
    }

    const MINIMAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="test">
  <bounds minlat="0" minlon="0" maxlat="1" maxlon="1"/>
  <node id="1" lat="0" lon="0"/>
  <node id="2" lat="1" lon="1" version="3">
    <tag k="name" v="corner"/>
  </node>
  <way id="10">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="residential"/>
  </way>
</osm>"#;

    #[test]
    fn minimal_document() {
        let map = load(MINIMAL).unwrap();
        assert_eq!(map.nodes.len(), 2);
        assert_eq!(map.ways.len(), 1);

        let way = &map.ways[0];
        assert_eq!(way.id, 10);
        assert_eq!(way.node_refs, vec![1, 2]);
        assert_eq!(way.tags, vec![Tag::new("highway", "residential")]);
        assert!(way.is_highway);
        assert!(!way.is_building);
        assert_eq!(way.points, vec![MapCoords::new(0.0, 0.0), MapCoords::new(1.0, 1.0)]);
        assert_eq!(way.building_height, 0.0);
    }

    #[test]
    fn minimal_document_yields_single_line() {
        let map = load(MINIMAL).unwrap();
        let lines = crate::lines::extract_lines(&map, &map.highway_indices()).unwrap();
        let projected = crate::projection::project(&lines);
        assert_eq!(projected.len(), 2);
        assert!(projected.iter().all(|point| !point.is_break()));
    }

    #[test]
    fn duplicate_node_keeps_later_coordinates() {
        let map = load(r#"<osm>
            <node id="1" lat="10" lon="20"/>
            <node id="2" lat="0" lon="0"/>
            <node id="1" lat="11" lon="21"/>
            <way id="5"><nd ref="1"/></way>
        </osm>"#).unwrap();

        assert_eq!(map.nodes.len(), 2);
        assert_eq!(map.nodes[0], Node { id: 1, lat: 11.0, lon: 21.0 });
        assert_eq!(map.ways[0].points, vec![MapCoords::new(11.0, 21.0)]);
    }

    #[test]
    fn unresolved_refs_are_dropped() {
        let map = load(r#"<osm>
            <node id="1" lat="1" lon="2"/>
            <way id="5"><nd ref="1"/><nd ref="404"/></way>
            <way id="6"><nd ref="405"/></way>
        </osm>"#).unwrap();

        assert_eq!(map.ways[0].points.len(), 1);
        assert_eq!(map.ways[0].node_refs.len(), 2);
        assert!(map.ways[1].points.is_empty());
    }

    #[test]
    fn strict_mode_rejects_unresolved_refs() {
        let xml = r#"<osm><way id="5"><nd ref="404"/></way></osm>"#;
        let err = load_osm(xml.as_bytes(), &LoadOptions { strict_node_refs: true }).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert!(err.message.contains("404"));
    }

    #[test]
    fn missing_attribute_is_an_error() {
        let err = load(r#"<osm><node id="1" lat="1"/></osm>"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert!(err.message.contains("lon"));

        let err = load(r#"<osm><way id="1"><nd/></way></osm>"#).unwrap_err();
        assert!(err.message.contains("ref"));

        let err = load(r#"<osm><way id="1"><tag k="building"/></way></osm>"#).unwrap_err();
        assert!(err.message.contains("'v'"));
    }

    #[test]
    fn unparseable_coordinate_is_an_error() {
        let err = load(r#"<osm><node id="1" lat="north" lon="1"/></osm>"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn malformed_markup_is_an_error() {
        for xml in [
            r#"<osm><node id="1" lat="0" lon="0"></osm>"#,
            r#"<osm><node id="1" lat="0" lon="0"/>"#,
            r#"<osm><node id=1 lat="0" lon="0"/></osm>"#,
            "",
            "<osm/><osm/>",
            "<osm/> trailing",
        ] {
            let err = load(xml).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Parse, "{:?} gave {}", xml, err);
        }
    }

    #[test]
    fn only_top_level_elements_are_read() {
        let map = load(r#"<osm>
            <node id="1" lat="0" lon="0"/>
            <relation id="9">
                <node id="2" lat="5" lon="5"/>
                <way id="99"><nd ref="1"/></way>
            </relation>
            <way id="3">
                <nd ref="1"/>
                <extra><tag k="building" v="yes"/></extra>
            </way>
        </osm>"#).unwrap();

        assert_eq!(map.nodes.len(), 1);
        assert_eq!(map.ways.len(), 1);
        assert_eq!(map.ways[0].id, 3);
        assert!(map.ways[0].tags.is_empty());
    }

    #[test]
    fn empty_way_element() {
        let map = load(r#"<osm><way id="4"/></osm>"#).unwrap();
        assert_eq!(map.ways.len(), 1);
        assert!(map.ways[0].points.is_empty());
    }

    #[test]
    fn tag_values_are_unescaped() {
        let map = load(r#"<osm><way id="4"><tag k="name" v="Fish &amp; Chips"/></way></osm>"#).unwrap();
        assert_eq!(map.ways[0].tag("name"), Some("Fish & Chips"));
    }

    #[test]
    fn building_heights_from_document() {
        let map = load(r#"<osm>
            <way id="1"><tag k="building" v="yes"/><tag k="height" v="10"/></way>
            <way id="2"><tag k="building" v="yes"/><tag k="building:levels" v="4"/></way>
            <way id="3"><tag k="building" v="yes"/><tag k="height" v="not-a-number"/></way>
        </osm>"#).unwrap();

        let heights: Vec<f64> = map.ways.iter().map(|way| way.building_height).collect();
        assert_eq!(heights, vec![10.0, 12.0, 5.0]);
    }

    #[test]
    fn etl_reads_file_from_config() {
        let path = std::env::temp_dir().join(format!("osm_plot_parse_{}.osm", std::process::id()));
        fs::write(&path, MINIMAL).unwrap();
        let config = UserConfig {
            data_path: path.to_string_lossy().into_owned(),
            ..UserConfig::default()
        };

        let mut etl = ParseOsmEtl::new(&config);
        etl.process().unwrap();
        let map = etl.into_map().unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(map.ways.len(), 1);
    }

    #[test]
    fn etl_decompresses_xz_file() {
        use std::io::Write;
        use xz::write::XzEncoder;

        let path = std::env::temp_dir().join(format!("osm_plot_parse_{}.osm.xz", std::process::id()));
        let mut encoder = XzEncoder::new(fs::File::create(&path).unwrap(), 6);
        encoder.write_all(MINIMAL.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let config = UserConfig {
            data_path: path.to_string_lossy().into_owned(),
            ..UserConfig::default()
        };
        let mut etl = ParseOsmEtl::new(&config);
        etl.process().unwrap();
        let map = etl.into_map().unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(map.nodes.len(), 2);
        assert_eq!(map.ways.len(), 1);
        assert!(map.ways[0].is_highway);
    }

    #[test]
    fn etl_reports_missing_file() {
        let config = UserConfig {
            data_path: "does/not/exist.osm".to_string(),
            ..UserConfig::default()
        };
        let err = ParseOsmEtl::new(&config).process().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
    }
}
