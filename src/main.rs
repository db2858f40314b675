use std::{path::PathBuf, time::Instant};

use balloon_assembly::{
    util::merge_regions, AssemblyOptions, BalloonerBuilder, RecognitionResponse, Region, Result,
};
use clap::Parser;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Assemble balloon records from a saved recognition response.
#[derive(Debug, Parser)]
#[command(name = "balloon-assembly", version)]
struct Args {
    /// Recognition response JSON.
    response: PathBuf,
    /// Page the selection was made on.
    #[arg(long, default_value_t = 1)]
    page: u32,
    /// JSON file with assembly options; missing fields keep their defaults.
    #[arg(long)]
    options: Option<PathBuf>,
    /// Selected region as `x,y,width,height`. Defaults to the envelope of
    /// everything in the response.
    #[arg(long, value_parser = parse_region)]
    region: Option<[f32; 4]>,
}

fn parse_region(value: &str) -> std::result::Result<[f32; 4], String> {
    let parts = value
        .split(',')
        .map(|it| it.trim().parse::<f32>().map_err(|err| format!("{it:?}: {err}")))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    parts
        .try_into()
        .map_err(|parts: Vec<f32>| format!("expected 4 numbers, got {}", parts.len()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let options = match &args.options {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => AssemblyOptions::default(),
    };
    let ballooner = BalloonerBuilder::new().options(options).build();

    let response = RecognitionResponse::from_json(&std::fs::read_to_string(&args.response)?)?;
    let batch = response.into_batch();
    let region = match args.region {
        Some([x, y, width, height]) => Region::new(x, y, width, height, args.page),
        None => merge_regions(
            batch
                .dimensions
                .iter()
                .map(|it| &it.bbox)
                .chain(batch.text_detections.iter().map(|it| &it.bounds))
                .chain(batch.gdt_detections.iter().map(|it| &it.bounds)),
            args.page,
        )
        .unwrap_or(Region::new(0.0, 0.0, 0.0, 0.0, args.page)),
    };

    let start = Instant::now();
    let records = ballooner.assemble_batch(batch, region);
    log::debug!("Assembled {} records in {:?}", records.len(), start.elapsed());

    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
