use std::{fs, path::Path};

use log::{info, warn};
use raqote::{
    DrawOptions, DrawTarget, LineCap, LineJoin, PathBuilder, Point, SolidSource, Source, StrokeStyle,
    Transform,
};
use serde::Deserialize;

use crate::{
    data::OsmMap,
    errors::{Error, Result},
    lines::{extract_lines, split_at_breaks},
    projection::{project, unproject_coords, PixelCoords, WORLD_SIZE_PX},
    UserConfig,
};

use super::Etl;

pub const ETL_NAME: &str = "draw_map";

mod fk {
    pub use font_kit::family_name::FamilyName;
    pub use font_kit::font::Font;
    pub use font_kit::loader::Loader;
    pub use font_kit::properties::Properties;
    pub use font_kit::source::SystemSource;
}

const TITLE_POINT_SIZE: f32 = 16.0;
const LABEL_POINT_SIZE: f32 = 12.0;
const LEGEND_PADDING: f32 = 6.0;
const LEGEND_ROW_HEIGHT: f32 = 18.0;
const LEGEND_SWATCH_LENGTH: f32 = 24.0;
const MAX_GRID_LINES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WayClass {
    Highway,
    Building,
    Other,
}

impl WayClass {
    /// Stroke width before `line_width_scale` is applied.
    fn line_width(&self) -> f32 {
        match self {
            WayClass::Highway => 1.5,
            WayClass::Building => 0.75,
            WayClass::Other => 0.5,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            WayClass::Highway => "highways",
            WayClass::Building => "building",
            WayClass::Other => "other",
        }
    }

    fn color(&self, theme: &Theme) -> SolidSource {
        match self {
            WayClass::Highway => theme.highway,
            WayClass::Building => theme.building,
            WayClass::Other => theme.other,
        }
    }
}

/// Way indices per drawing class. A way tagged both highway and building is
/// listed in both.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ClassifiedWays {
    pub highways: Vec<usize>,
    pub buildings: Vec<usize>,
    pub others: Vec<usize>,
}

impl ClassifiedWays {
    pub fn from_map(map: &OsmMap) -> Self {
        ClassifiedWays {
            highways: map.highway_indices(),
            buildings: map.building_indices(),
            others: map.other_indices(),
        }
    }

    /// In drawing order.
    fn by_class(&self) -> [(WayClass, &[usize]); 3] {
        [
            (WayClass::Highway, self.highways.as_slice()),
            (WayClass::Building, self.buildings.as_slice()),
            (WayClass::Other, self.others.as_slice()),
        ]
    }
}

use serialize_color::deserialize;

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct Theme {
    #[serde(deserialize_with = "deserialize")]
    pub background: SolidSource,

    #[serde(deserialize_with = "deserialize")]
    pub highway: SolidSource,

    #[serde(deserialize_with = "deserialize")]
    pub building: SolidSource,

    #[serde(deserialize_with = "deserialize")]
    pub other: SolidSource,

    #[serde(deserialize_with = "deserialize")]
    pub grid: SolidSource,

    #[serde(deserialize_with = "deserialize")]
    pub text: SolidSource,
}

impl Default for Theme {
    fn default() -> Self {
        Theme {
            background: SolidSource::from_unpremultiplied_argb(0xff, 0xff, 0xff, 0xff),
            highway: SolidSource::from_unpremultiplied_argb(0xff, 0x00, 0x00, 0xff),
            building: SolidSource::from_unpremultiplied_argb(0xff, 0x00, 0x80, 0x00),
            other: SolidSource::from_unpremultiplied_argb(0xff, 0x00, 0x00, 0x00),
            grid: SolidSource::from_unpremultiplied_argb(0xff, 0xdd, 0xdd, 0xdd),
            text: SolidSource::from_unpremultiplied_argb(0xff, 0x00, 0x00, 0x00),
        }
    }
}

mod serialize_color {
    use raqote::SolidSource;
    use serde::{de, Deserializer};
    use serde::de::Visitor;


    struct ColorVisitor;

    impl<'de> Visitor<'de> for ColorVisitor {
        type Value = SolidSource;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(formatter, "a color string like '#rrggbb' or '#rrggbbaa'")
        }

        fn visit_str<E>(self, string: &str) -> Result<Self::Value, E> where E: de::Error {
            if !string.is_ascii() || !string.starts_with('#') || (string.len() != 7 && string.len() != 9) {
                return Err(de::Error::invalid_value(de::Unexpected::Str(string), &self))
            }
            let r = parse_hex_byte(&self, &string[1..3])?;
            let g = parse_hex_byte(&self, &string[3..5])?;
            let b = parse_hex_byte(&self, &string[5..7])?;
            let a = if string.len() == 9 {
                parse_hex_byte(&self, &string[7..9])?
            } else {
                0xff
            };
            Ok(SolidSource::from_unpremultiplied_argb(a, r, g, b))
        }
    }

    fn parse_hex_byte<E>(visitor: &ColorVisitor, string: &str) -> Result<u8, E> where E: de::Error {
        u8::from_str_radix(string, 16).map_err(|_| {
            de::Error::invalid_value(de::Unexpected::Str(string), visitor)
        })
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SolidSource, D::Error>
        where D: Deserializer<'de> {
        deserializer.deserialize_str(ColorVisitor)
    }
}

/// Maps projected pixel coordinates onto the canvas, keeping the aspect ratio
/// and centering the drawing inside the margins.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Viewport {
    min_x: f64,
    min_y: f64,
    scale: f64,
    offset_x: f64,
    offset_y: f64,
}

impl Viewport {
    fn fit<'p>(points: impl IntoIterator<Item = &'p PixelCoords>, width: f64, height: f64, margin: f64) -> Viewport {
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for point in points.into_iter().filter(|point| point.is_finite()) {
            min_x = min_x.min(point.x);
            min_y = min_y.min(point.y);
            max_x = max_x.max(point.x);
            max_y = max_y.max(point.y);
        }
        if min_x > max_x {
            // Nothing to draw, show the whole world.
            (min_x, min_y, max_x, max_y) = (0.0, 0.0, WORLD_SIZE_PX, WORLD_SIZE_PX);
        }

        let inner_width = (width - 2.0 * margin).max(1.0);
        let inner_height = (height - 2.0 * margin).max(1.0);
        let span_x = max_x - min_x;
        let span_y = max_y - min_y;

        let scale_x = if span_x > 0.0 { inner_width / span_x } else { f64::INFINITY };
        let scale_y = if span_y > 0.0 { inner_height / span_y } else { f64::INFINITY };
        let scale = match scale_x.min(scale_y) {
            scale if scale.is_finite() => scale,
            _ => 1.0,
        };

        Viewport {
            min_x,
            min_y,
            scale,
            offset_x: margin + (inner_width - span_x * scale) / 2.0,
            offset_y: margin + (inner_height - span_y * scale) / 2.0,
        }
    }

    /// Projected y already grows southwards, like canvas y, so no flip is needed.
    fn to_canvas(&self, point: &PixelCoords) -> (f32, f32) {
        let x = self.offset_x + (point.x - self.min_x) * self.scale;
        let y = self.offset_y + (point.y - self.min_y) * self.scale;
        (x as f32, y as f32)
    }

    fn from_canvas(&self, x: f64, y: f64) -> PixelCoords {
        PixelCoords {
            x: self.min_x + (x - self.offset_x) / self.scale,
            y: self.min_y + (y - self.offset_y) / self.scale,
        }
    }
}

/// Multiples of `step` within `from..=to`. Empty when the step is too small to
/// move past `from` or the range would need more than `MAX_GRID_LINES` lines.
fn grid_lines(from: f64, to: f64, step: f64) -> Vec<f64> {
    let start = (from / step).ceil() * step;
    if !start.is_finite() || !to.is_finite() || start > to || start + step == start {
        return Vec::new();
    }
    let count = ((to - start) / step).floor();
    if count >= MAX_GRID_LINES as f64 {
        return Vec::new();
    }
    (0..=count as usize)
        .map(|idx| start + idx as f64 * step)
        .collect()
}

fn text_width(font: &fk::Font, point_size: f32, text: &str) -> f32 {
    let units_per_em = font.metrics().units_per_em as f32;
    text.chars()
        .filter_map(|c| font.glyph_for_char(c))
        .filter_map(|id| font.advance(id).ok())
        .map(|advance| advance.x() * point_size / units_per_em)
        .sum()
}

/// An explicit font file, or the system's default sans-serif face.
fn load_font(font_path: Option<&str>) -> Option<fk::Font> {
    let loaded = match font_path {
        Some(path) => <fk::Font as fk::Loader>::from_path(path, 0).map_err(|err| err.to_string()),
        None => fk::SystemSource::new()
            .select_best_match(&[fk::FamilyName::SansSerif], &fk::Properties::new())
            .map_err(|err| err.to_string())
            .and_then(|handle| handle.load().map_err(|err| err.to_string())),
    };
    match loaded {
        Ok(font) => Some(font),
        Err(err) => {
            warn!(etl_name = ETL_NAME, err = err.as_str(); "No font available, drawing without text");
            None
        },
    }
}

/// Legend box in canvas coordinates, with the centre line of each row.
#[derive(Debug, Clone, PartialEq)]
struct LegendLayout {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    rows: Vec<(WayClass, f32)>,
}

/// A 1-2-5 step giving roughly eight grid lines across `span`.
fn grid_step(span: f64) -> Option<f64> {
    if !(span.is_finite() && span > 0.0) {
        return None;
    }
    let raw = span / 8.0;
    let magnitude = 10f64.powf(raw.log10().floor());
    [1.0, 2.0, 5.0, 10.0].iter()
        .map(|factor| factor * magnitude)
        .find(|step| *step >= raw)
}

pub struct DrawMapEtl<'a> {
    user_config: &'a UserConfig,
    map: &'a OsmMap,
    theme: &'a Theme,
    font: Option<fk::Font>,
}

impl DrawMapEtl<'_> {
    pub fn new<'a>(user_config: &'a UserConfig, map: &'a OsmMap) -> DrawMapEtl<'a> {
        let font = if user_config.draw_annotations {
            load_font(user_config.font_path.as_deref())
        } else {
            None
        };

        DrawMapEtl {
            user_config,
            map,
            theme: &user_config.theme,
            font,
        }
    }

    fn stroke(width: f32) -> StrokeStyle {
        StrokeStyle {
            cap: LineCap::Round,
            join: LineJoin::Round,
            width,
            miter_limit: 2.0,
            dash_array: Vec::new(),
            dash_offset: 0.0,
        }
    }

    fn draw_polyline(&self, dt: &mut DrawTarget, viewport: &Viewport, polyline: &[PixelCoords], class: WayClass) {
        if polyline.len() < 2 {
            return;
        }
        let mut pb = PathBuilder::new();
        let mut pen_down = false;
        for point in polyline {
            if !point.is_finite() {
                pen_down = false;
                continue;
            }
            let (x, y) = viewport.to_canvas(point);
            if pen_down {
                pb.line_to(x, y);
            } else {
                pb.move_to(x, y);
                pen_down = true;
            }
        }
        let raqote_path = pb.finish();

        dt.stroke(
            &raqote_path,
            &Source::Solid(class.color(self.theme)),
            &Self::stroke(class.line_width() * self.user_config.line_width_scale),
            &DrawOptions::new(),
        );
    }

    fn draw_grid(&self, dt: &mut DrawTarget, viewport: &Viewport) {
        let width = f64::from(dt.width());
        let height = f64::from(dt.height());
        let top_left = viewport.from_canvas(0.0, 0.0);
        let bottom_right = viewport.from_canvas(width, height);

        let span = (bottom_right.x - top_left.x).max(bottom_right.y - top_left.y);
        let Some(step) = grid_step(span) else {
            return;
        };

        let mut pb = PathBuilder::new();
        for x in grid_lines(top_left.x, bottom_right.x, step) {
            let (cx, _) = viewport.to_canvas(&PixelCoords { x, y: top_left.y });
            pb.move_to(cx, 0.0);
            pb.line_to(cx, height as f32);
        }
        for y in grid_lines(top_left.y, bottom_right.y, step) {
            let (_, cy) = viewport.to_canvas(&PixelCoords { x: top_left.x, y });
            pb.move_to(0.0, cy);
            pb.line_to(width as f32, cy);
        }

        dt.stroke(
            &pb.finish(),
            &Source::Solid(self.theme.grid),
            &Self::stroke(1.0),
            &DrawOptions::new(),
        );
    }

    /// Draws `text` with its baseline starting at `start`, under `transform`.
    fn draw_text(
        &self,
        dt: &mut DrawTarget,
        font: &fk::Font,
        transform: Transform,
        start: Point,
        point_size: f32,
        text: &str,
    ) {
        let units_per_em = font.metrics().units_per_em as f32;
        let mut x = start.x;
        let mut ids = Vec::new();
        let mut positions = Vec::new();
        for c in text.chars() {
            let Some(id) = font.glyph_for_char(c) else {
                continue;
            };
            ids.push(id);
            positions.push(Point::new(x, start.y));
            if let Ok(advance) = font.advance(id) {
                x += advance.x() * point_size / units_per_em;
            }
        }

        dt.set_transform(&transform);
        dt.draw_glyphs(
            font,
            point_size,
            &ids,
            &positions,
            &Source::Solid(self.theme.text),
            &DrawOptions::new(),
        );
        dt.set_transform(&Transform::identity());
    }

    /// Title above the drawing, axis labels below and to the left of it.
    fn draw_labels(&self, dt: &mut DrawTarget, font: &fk::Font) {
        let width = dt.width() as f32;
        let height = dt.height() as f32;
        let margin = self.user_config.margin_px as f32;

        let title = self.user_config.title.as_str();
        let title_x = (width - text_width(font, TITLE_POINT_SIZE, title)) / 2.0;
        let title_start = Point::new(title_x, margin * 0.65);
        self.draw_text(dt, font, Transform::identity(), title_start, TITLE_POINT_SIZE, title);

        let x_label = "Web Mercator X";
        let x_label_x = (width - text_width(font, LABEL_POINT_SIZE, x_label)) / 2.0;
        let x_label_start = Point::new(x_label_x, height - margin * 0.3);
        self.draw_text(dt, font, Transform::identity(), x_label_start, LABEL_POINT_SIZE, x_label);

        // Rotated a quarter turn so the label reads bottom to top.
        let y_label = "Web Mercator Y";
        let y_label_y = (height + text_width(font, LABEL_POINT_SIZE, y_label)) / 2.0;
        let rotated = Transform::new(0.0, -1.0, 1.0, 0.0, margin * 0.6, y_label_y);
        self.draw_text(dt, font, rotated, Point::new(0.0, 0.0), LABEL_POINT_SIZE, y_label);
    }

    fn legend_layout(&self, classes: &[WayClass], canvas_width: f32) -> LegendLayout {
        let label_width = match &self.font {
            Some(font) => classes.iter()
                .map(|class| text_width(font, LABEL_POINT_SIZE, class.label()))
                .fold(0.0, f32::max),
            None => 0.0,
        };
        let margin = self.user_config.margin_px as f32;
        let width = 3.0 * LEGEND_PADDING + LEGEND_SWATCH_LENGTH + label_width;
        let height = 2.0 * LEGEND_PADDING + LEGEND_ROW_HEIGHT * classes.len() as f32;
        let x = canvas_width - margin - width;
        let y = margin;

        LegendLayout {
            x,
            y,
            width,
            height,
            rows: classes.iter()
                .enumerate()
                .map(|(idx, class)| (*class, y + LEGEND_PADDING + LEGEND_ROW_HEIGHT * (idx as f32 + 0.5)))
                .collect(),
        }
    }

    fn draw_legend(&self, dt: &mut DrawTarget, classes: &[WayClass]) {
        if classes.is_empty() {
            return;
        }
        let layout = self.legend_layout(classes, dt.width() as f32);

        let mut pb = PathBuilder::new();
        pb.rect(layout.x, layout.y, layout.width, layout.height);
        let frame = pb.finish();
        dt.fill(&frame, &Source::Solid(self.theme.background), &DrawOptions::new());
        dt.stroke(&frame, &Source::Solid(self.theme.grid), &Self::stroke(1.0), &DrawOptions::new());

        let swatch_x = layout.x + LEGEND_PADDING;
        for (class, row_y) in &layout.rows {
            let mut pb = PathBuilder::new();
            pb.move_to(swatch_x, *row_y);
            pb.line_to(swatch_x + LEGEND_SWATCH_LENGTH, *row_y);
            dt.stroke(
                &pb.finish(),
                &Source::Solid(class.color(self.theme)),
                &Self::stroke(class.line_width() * self.user_config.line_width_scale),
                &DrawOptions::new(),
            );

            if let Some(font) = &self.font {
                let label_start = Point::new(
                    swatch_x + LEGEND_SWATCH_LENGTH + LEGEND_PADDING,
                    row_y + LABEL_POINT_SIZE / 3.0,
                );
                self.draw_text(dt, font, Transform::identity(), label_start, LABEL_POINT_SIZE, class.label());
            }
        }
    }
}

impl Etl for DrawMapEtl<'_> {
    type Input = ClassifiedWays;

    type Output = DrawTarget;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn extract(&mut self) -> Result<Self::Input> {
        let classified = ClassifiedWays::from_map(self.map);
        info!(
            etl_name = ETL_NAME,
            highways = classified.highways.len(),
            buildings = classified.buildings.len(),
            others = classified.others.len();
            "Classified ways"
        );
        Ok(classified)
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        if self.user_config.width_px == 0 || self.user_config.height_px == 0 {
            return Err(Error::render("canvas width and height must be positive"));
        }

        let mut layers = Vec::new();
        for (class, indices) in input.by_class() {
            if indices.is_empty() {
                continue;
            }
            let lines = extract_lines(self.map, indices)?;
            layers.push((class, split_at_breaks(&project(&lines))));
        }

        let viewport = Viewport::fit(
            layers.iter().flat_map(|(_, polylines)| polylines.iter().flatten()),
            f64::from(self.user_config.width_px),
            f64::from(self.user_config.height_px),
            f64::from(self.user_config.margin_px),
        );

        let north_west = unproject_coords(&viewport.from_canvas(0.0, 0.0));
        let south_east = unproject_coords(&viewport.from_canvas(
            f64::from(self.user_config.width_px),
            f64::from(self.user_config.height_px),
        ));
        info!(
            etl_name = ETL_NAME,
            north = north_west.lat,
            west = north_west.lon,
            south = south_east.lat,
            east = south_east.lon;
            "Fitted map extent"
        );

        let mut dt = DrawTarget::new(
            self.user_config.width_px.try_into()?,
            self.user_config.height_px.try_into()?
        );
        dt.clear(self.theme.background);

        if self.user_config.draw_grid {
            self.draw_grid(&mut dt, &viewport);
        }
        for (class, polylines) in &layers {
            for polyline in polylines {
                self.draw_polyline(&mut dt, &viewport, polyline, *class);
            }
        }

        if self.user_config.draw_annotations {
            let classes: Vec<WayClass> = layers.iter().map(|(class, _)| *class).collect();
            self.draw_legend(&mut dt, &classes);
            if let Some(font) = &self.font {
                self.draw_labels(&mut dt, font);
            }
        }
        Ok(dt)
    }

    fn load(&mut self, output: Self::Output) -> Result<()> {
        let dest = Path::new(&self.user_config.dest_path);
        if let Some(parent) = dest.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        output.write_png(dest)
            .map_err(|err| Error::render(format!("couldn't write png: {}", err)))?;
        info!(etl_name = ETL_NAME, path = self.user_config.dest_path.as_str(); "Wrote map image");
        Ok(())
    }
}
