use std::fs;
use std::path::PathBuf;

use osm_plot::errors::ErrorKind;
use osm_plot::etl::draw_map::DrawMapEtl;
use osm_plot::etl::parse_osm::ParseOsmEtl;
use osm_plot::etl::Etl;
use osm_plot::lines::{extract_lines, LinePoint};
use osm_plot::projection::{project, project_coords};
use osm_plot::UserConfig;

const TWO_NODES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <node id="1" lat="0" lon="0"/>
  <node id="2" lat="1" lon="1"/>
  <way id="3">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="residential"/>
  </way>
</osm>
"#;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("osm_plot_{}_{}", name, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn osm_file_to_png() {
    let dir = scratch_dir("pipeline");
    let input = dir.join("map.osm");
    let output = dir.join("out").join("map.png");
    fs::write(&input, TWO_NODES).unwrap();

    let config = UserConfig {
        data_path: input.to_string_lossy().into_owned(),
        dest_path: output.to_string_lossy().into_owned(),
        width_px: 64,
        height_px: 64,
        ..UserConfig::default()
    };

    let mut parse_etl = ParseOsmEtl::new(&config);
    parse_etl.process().unwrap();
    let map = parse_etl.into_map().unwrap();

    let way = &map.ways[0];
    assert!(way.is_highway);
    assert!(!way.is_building);
    assert_eq!(way.building_height, 0.0);
    assert_eq!(way.points.len(), 2);

    let lines = extract_lines(&map, &[0]).unwrap();
    let projected = project(&lines);
    assert_eq!(projected.len(), 2);
    assert_eq!(projected[1], LinePoint::Point(project_coords(&way.points[1])));

    DrawMapEtl::new(&config, &map).process().unwrap();
    assert!(output.exists());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn malformed_document_stops_before_rendering() {
    let dir = scratch_dir("malformed");
    let input = dir.join("broken.osm");
    let output = dir.join("never.png");
    fs::write(&input, "<osm><node id=\"1\" lat=\"0\" lon=\"0\"></osm>").unwrap();

    let config = UserConfig {
        data_path: input.to_string_lossy().into_owned(),
        dest_path: output.to_string_lossy().into_owned(),
        ..UserConfig::default()
    };

    let err = ParseOsmEtl::new(&config).process().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Parse);
    assert!(!output.exists());

    fs::remove_dir_all(&dir).unwrap();
}
