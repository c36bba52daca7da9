use anyhow::{bail, Context as AnyhowContext, Result};
use clap::Parser;
use std::path::Path;

use indicatif::ProgressStyle;
use tracing::Span;
use tracing::{info, info_span, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{filter::LevelFilter, prelude::*};

use point_trajectories::config::*;
use point_trajectories::dataset;
use point_trajectories::detector::Detector;
use point_trajectories::optical_flow::OpticalFlow;
use point_trajectories::record;
use point_trajectories::session::TrackingSession;
use point_trajectories::trajectory::IdGenerator;

#[derive(Parser)]
pub struct Args {
    /// Video file, or a directory of image frames
    pub input: String,
    /// Where to write the trajectory record (JSON)
    pub output: String,
    /// Keep the trajectories already stored in the output record and number
    /// new ones after them
    #[clap(long)]
    pub append: bool,
    /// Log every frame
    #[clap(short, long)]
    pub verbose: bool,
    #[clap(flatten)]
    pub config: Config,
}

fn main() -> Result<()> {
    // parse the config
    let args = Args::parse();
    args.config.validate()?;

    // setup logging
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(indicatif_layer.get_stdout_writer())
                .with_filter(level),
        )
        .with(indicatif_layer)
        .init();

    // open the frame source
    let input = Path::new(&args.input);
    let mut source = dataset::open(input)
        .with_context(|| format!("Failed to open input {}", input.display()))?;

    let output = Path::new(&args.output);
    let previous = if args.append && output.exists() {
        let previous = record::read(output)?;
        info!(
            "appending to {} ({} trajectories)",
            output.display(),
            previous.trajectories.len()
        );
        Some(previous)
    } else {
        None
    };
    let ids = IdGenerator::starting_at(previous.as_ref().map_or(0, |r| r.next_free_id()));

    let config = args.config;
    let max_frames = config.max_frames;
    let max_read_failures = config.max_read_failures;
    let flow = OpticalFlow::new(&config)?;
    let detector = Detector::new(&config);
    let mut session = TrackingSession::new(config, flow, detector, ids)?;

    let header_span = info_span!("header");
    header_span.pb_set_style(&ProgressStyle::default_bar());
    header_span.pb_set_length(
        source
            .length()
            .map_or(max_frames as u64, |n| n.min(max_frames as u64)),
    );
    let header_span_enter = header_span.enter();

    let mut failures = 0;
    let mut gave_up = false;
    for _ in 0..max_frames {
        let step = match source.next_frame() {
            Ok(Some(image)) => session.process_frame(&image).map(|_| ()),
            Ok(None) => break,
            Err(err) => Err(err),
        };
        Span::current().pb_inc(1);
        match step {
            Ok(()) => failures = 0,
            Err(err) => {
                failures += 1;
                warn!("dropping frame at time {}: {:#}", session.time(), err);
                session.skip_frame();
                if failures > max_read_failures {
                    gave_up = true;
                    break;
                }
            }
        }
    }

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    // close the session and save what was tracked, also when giving up
    let mut record = session.finish();
    if let Some(mut previous) = previous {
        previous.trajectories.append(&mut record.trajectories);
        record.trajectories = previous.trajectories;
    }
    record::write(&record, output)?;
    info!(
        "wrote {} trajectories to {}",
        record.trajectories.len(),
        output.display()
    );

    if gave_up {
        bail!("gave up after {} consecutive bad frames", failures);
    }
    Ok(())
}
