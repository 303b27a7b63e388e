//! Plots the roads, buildings and other ways of an OpenStreetMap XML extract.
//!
//! The pipeline is two [`Etl`](etl::Etl) stages: [`ParseOsmEtl`](etl::parse_osm::ParseOsmEtl)
//! loads the document into an [`OsmMap`](data::OsmMap), and
//! [`DrawMapEtl`](etl::draw_map::DrawMapEtl) classifies its ways, turns each class into
//! a line buffer ([`lines`]), projects it to Web Mercator pixels ([`projection`]) and
//! writes a PNG.

pub mod data;
pub mod errors;
pub mod etl;
pub mod lines;
pub mod projection;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;

use crate::etl::draw_map::Theme;
use crate::errors::{Error, ErrorKind, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config/map.json";

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct UserConfig {
    pub data_path: String,
    pub dest_path: String,
    pub width_px: u32,
    pub height_px: u32,
    pub margin_px: u32,
    pub line_width_scale: f32,
    pub draw_grid: bool,
    /// Legend, title and axis labels.
    pub draw_annotations: bool,
    pub title: String,
    /// Font file for the annotations. Without one a system sans-serif font is
    /// looked up, and if none is found only the legend swatches are drawn.
    pub font_path: Option<String>,
    pub strict_node_refs: bool,
    pub log_level: String,
    pub theme: Theme,
}

impl Default for UserConfig {
    fn default() -> Self {
        UserConfig {
            data_path: "map.osm".to_string(),
            dest_path: "output/map.png".to_string(),
            width_px: 1000,
            height_px: 1000,
            margin_px: 40,
            line_width_scale: 2.0,
            draw_grid: true,
            draw_annotations: true,
            title: "OpenStreetMap".to_string(),
            font_path: None,
            strict_node_refs: false,
            log_level: "info".to_string(),
            theme: Theme::default(),
        }
    }
}

fn read_user_config(path: &Path) -> Result<UserConfig> {
    let file = File::open(path).map_err(|err| {
        Error::new(ErrorKind::Io, format!("{}: {}", path.display(), err))
    })?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// An explicit path must exist; without one the default path is used if
/// present, otherwise the built-in defaults.
pub fn load_user_config(path: Option<&str>) -> Result<UserConfig> {
    match path {
        Some(path) => read_user_config(Path::new(path)),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            read_user_config(Path::new(DEFAULT_CONFIG_PATH))
        },
        None => Ok(UserConfig::default()),
    }
}
