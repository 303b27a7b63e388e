use std::env;
use std::io;

use structured_logger::json::new_writer;
use structured_logger::Builder;

use osm_plot::etl::draw_map::DrawMapEtl;
use osm_plot::etl::parse_osm::ParseOsmEtl;
use osm_plot::etl::Etl;
use osm_plot::errors::Result;
use osm_plot::load_user_config;

fn setup_logging(level: &str) {
    Builder::with_level(level)
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

fn main() -> Result<()> {
    let user_config = load_user_config(env::args().nth(1).as_deref())?;
    setup_logging(&user_config.log_level);

    let mut parse_etl = ParseOsmEtl::new(&user_config);
    parse_etl.process()?;
    let map = parse_etl.into_map()?;

    let mut draw_etl = DrawMapEtl::new(&user_config, &map);
    draw_etl.process()?;

    Ok(())
}
