// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `texel-decode`: decodes image files through the decode scheduler and
//! reports what each responder was told.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::Sender;
use texel_agents::{DecodeConfig, DecodeService, PoolSize};
use texel_core::{EncodedImage, Raster, Responder};
use texel_lanes::ImageCrateCodec;
use texel_telemetry::{init_logging, MetricsRegistry};

#[derive(Parser, Debug)]
#[command(name = "texel-decode", version, about)]
struct Cli {
    /// TOML file with decode settings.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of pool workers, or "auto".
    #[arg(long)]
    pool_size: Option<PoolSize>,

    /// Pump the queue on a dedicated owner thread.
    #[arg(long)]
    threaded: bool,

    /// Discard level: each level halves both dimensions.
    #[arg(short, long)]
    discard: Option<u8>,

    /// Also decode the auxiliary channel.
    #[arg(long)]
    aux: bool,

    /// Priority of every submission.
    #[arg(short, long, default_value_t = 0)]
    priority: u32,

    /// Images to decode.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

/// What the responder of file `index` was told.
struct Report {
    index: usize,
    success: bool,
    primary: Option<(u32, u32, u8)>,
    aux: Option<(u32, u32, u8)>,
}

fn dims(raster: Option<&Raster>) -> Option<(u32, u32, u8)> {
    raster.map(|r| (r.width(), r.height(), r.channels()))
}

fn reporter(index: usize, tx: Sender<Report>) -> Arc<dyn Responder> {
    Arc::new(
        move |success: bool, primary: Option<Raster>, aux: Option<Raster>| {
            let _ = tx.send(Report {
                index,
                success,
                primary: dims(primary.as_ref()),
                aux: dims(aux.as_ref()),
            });
        },
    )
}

fn load_config(cli: &Cli) -> Result<DecodeConfig> {
    let mut config = match &cli.config {
        Some(path) => DecodeConfig::load(path)?,
        None => DecodeConfig::default(),
    };
    if let Some(pool_size) = cli.pool_size {
        config.pool_size = pool_size;
    }
    config.threaded |= cli.threaded;
    Ok(config)
}

fn main() -> Result<()> {
    init_logging("info");
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    log::debug!("Decode configuration: {config:?}");

    let registry = MetricsRegistry::new();
    let mut service = DecodeService::new(config, Arc::new(ImageCrateCodec), &registry)
        .context("Failed to start the decode service")?;

    let target_detail = cli.discard.map_or(-1, i32::from);
    let (tx, rx) = crossbeam_channel::unbounded();
    for (index, path) in cli.files.iter().enumerate() {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read '{}'", path.display()))?;
        let image = EncodedImage::new(path.display().to_string(), bytes);
        let handle = service.submit_decode(
            image,
            cli.priority,
            target_detail,
            cli.aux,
            Some(reporter(index, tx.clone())),
        );
        log::debug!("Submitted '{}' as {handle}", path.display());
    }
    drop(tx);

    let started = Instant::now();
    let mut reports: Vec<Option<Report>> = cli.files.iter().map(|_| None).collect();
    let mut received = 0;
    let submitter = service.submitter();
    while received < reports.len() {
        let pending = service.pump_default();
        while let Ok(report) = rx.recv_timeout(Duration::from_millis(5)) {
            received += 1;
            let index = report.index;
            reports[index] = Some(report);
        }
        if pending == 0 && submitter.buffered() == 0 {
            break;
        }
    }

    // Waits for pooled decodes and finishes anything still queued.
    service.shutdown();
    for report in rx.try_iter() {
        let index = report.index;
        reports[index] = Some(report);
    }
    log::info!(
        "Decoded {} files in {:.1} ms",
        cli.files.len(),
        started.elapsed().as_secs_f64() * 1000.0
    );

    let mut failures = 0;
    for (path, report) in cli.files.iter().zip(&reports) {
        match report {
            Some(Report {
                success: true,
                primary: Some((w, h, c)),
                aux,
                ..
            }) => match aux {
                Some((aw, ah, _)) => println!("{}: ok {w}x{h}x{c} (aux {aw}x{ah})", path.display()),
                None => println!("{}: ok {w}x{h}x{c}", path.display()),
            },
            Some(_) => {
                failures += 1;
                println!("{}: failed", path.display());
            }
            None => {
                failures += 1;
                println!("{}: dropped", path.display());
            }
        }
    }

    for metric in registry.namespace_metrics("decode") {
        log::debug!("{} = {:?}", metric.id, metric.value);
    }

    if failures > 0 {
        bail!("{failures} of {} images failed to decode", cli.files.len());
    }
    Ok(())
}
