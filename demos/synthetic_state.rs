// demos/synthetic_state.rs
use geo::polygon;
use ozone_surface::{
    AnalysisConfig, ForecastConfig, KrigingConfig, ModelFamily, Month, OzoneAnalysis, OzoneError, PolygonBoundary,
    ReadingsFrame,
};
use polars::prelude::*;
use std::env;
use std::f64::consts::PI;

#[tokio::main]
async fn main() -> Result<(), OzoneError> {
    // Set RUST_LOG=info to follow the pipeline stages
    env_logger::init();
    configure_polars_display();

    let readings = synthetic_readings(30, 60)?;
    let boundary = PolygonBoundary::new()
        .with_region(
            "north",
            polygon![
                (x: -124.5, y: 37.0),
                (x: -118.0, y: 37.0),
                (x: -118.0, y: 42.0),
                (x: -124.5, y: 42.0),
            ],
        )
        .with_region(
            "south",
            polygon![
                (x: -121.0, y: 32.5),
                (x: -114.0, y: 32.5),
                (x: -114.0, y: 37.0),
                (x: -121.0, y: 37.0),
            ],
        );

    let config = AnalysisConfig::builder()
        .forecast(
            ForecastConfig::builder()
                .candidates(vec![
                    ModelFamily::SeasonalNaive,
                    ModelFamily::Ets,
                    ModelFamily::Arima { box_cox: true },
                ])
                .cv_min_window(48)
                .build(),
        )
        .kriging(KrigingConfig::builder().grid_step(0.25).build())
        .build();

    let report = OzoneAnalysis::new(config)?
        .with_boundary(boundary)
        .run()
        .readings(readings)
        .call()?;

    println!("{}", report.summary());
    println!("{}", report.press_table()?);
    println!("{}", report.forecast_table()?);
    println!("{}", report.surface.to_dataframe()?.tail(Some(10)));

    Ok(())
}

/// Stations scattered over a rough state outline, each with `months` of
/// readings on five days per month.
fn synthetic_readings(stations: usize, months: i64) -> PolarsResult<ReadingsFrame> {
    let mut ids = Vec::new();
    let mut dates = Vec::new();
    let mut ozone = Vec::new();
    let mut longitudes = Vec::new();
    let mut latitudes = Vec::new();

    for s in 0..stations {
        let t = s as f64 / stations as f64;
        let lon = -123.5 + 8.0 * t + 0.6 * (7.0 * t).sin();
        let lat = 41.0 - 8.0 * t + 0.8 * (11.0 * t).cos();
        let inland = (lon + 124.0) / 10.0;
        for i in 0..months {
            let month = Month::new(1, 2019).offset(i);
            let season = (2.0 * PI * (month.month() as f64 - 4.0) / 12.0).sin();
            for (k, day) in [3, 9, 15, 21, 27].into_iter().enumerate() {
                let noise = (((s * 37 + i as usize * 11 + k * 7) % 17) as f64 - 8.0) * 0.0005;
                ids.push(format!("06-{:03}-{:04}", s / 4 + 1, s * 13 % 10_000));
                dates.push(format!("{:04}-{:02}-{day:02}", month.year(), month.month()));
                ozone.push(0.040 + 0.015 * inland + 0.010 * season + noise);
                longitudes.push(lon);
                latitudes.push(lat);
            }
        }
    }

    let df = df!(
        "station_id" => ids,
        "date" => dates,
        "ozone" => ozone,
        "longitude" => longitudes,
        "latitude" => latitudes,
    )?;
    Ok(ReadingsFrame::from_dataframe(df))
}

fn configure_polars_display() {
    env::set_var("POLARS_FMT_MAX_COLS", "-1");
    env::set_var("POLARS_FMT_MAX_ROWS", "20");
}
