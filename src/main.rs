use std::{
    fs,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Context;
use clap::Parser;
use landmark_meta::{
    Trainer,
    checkpoint::{Checkpoint, CheckpointPolicy},
    config::TrainConfig,
    data::SyntheticFaces,
    history::HistoryTable,
    metrics::JsonlSink,
    network::landmark_regressor,
    trainer::RunSummary,
};
use log::{info, warn};
use rand::{SeedableRng, rngs::StdRng};
use tokio::{signal, task};

const HISTORY_FILE: &str = "log.txt";
const METRICS_FILE: &str = "metrics.jsonl";

fn train(mut config: TrainConfig, stop: &AtomicBool) -> anyhow::Result<RunSummary> {
    config.validate()?;

    let checkpoint = match &config.resume {
        Some(path) => {
            let ckpt = Checkpoint::load(path)
                .with_context(|| format!("no checkpoint found at {}", path.display()))?;
            if let Some(dir) = path.parent() {
                config.out = dir.to_path_buf();
            }
            Some(ckpt)
        }
        None => None,
    };

    fs::create_dir_all(&config.out)
        .with_context(|| format!("creating {}", config.out.display()))?;
    config.save(&config.out)?;

    let faces = SyntheticFaces::new(config.image_side, config.max_shift)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let splits = faces.splits(config.split_sizes(), &mut rng)?;
    info!(
        labeled = config.n_labeled,
        unlabeled = config.n_unlabeled,
        input_dim = faces.input_dim();
        "generated synthetic faces"
    );

    let model = landmark_regressor(faces.input_dim(), config.hidden);
    let live = model.init_state(&mut rng)?;

    let out = config.out.clone();
    let resume = checkpoint.is_some();
    let mut trainer = Trainer::new(config, model, live, splits.into())?;
    if let Some(ckpt) = &checkpoint {
        trainer.restore(ckpt)?;
    }

    let mut history = HistoryTable::open(out.join(HISTORY_FILE), resume)?;
    let mut sink = JsonlSink::open(out.join(METRICS_FILE))?;
    let policy = CheckpointPolicy::new(&out);

    Ok(trainer.run(&mut sink, &mut history, &policy, stop)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = TrainConfig::parse();
    let stop = Arc::new(AtomicBool::new(false));

    let mut handle = task::spawn_blocking({
        let stop = stop.clone();
        move || train(config, &stop)
    });

    let summary = tokio::select! {
        res = &mut handle => res?,
        _ = signal::ctrl_c() => {
            warn!("interrupt received, stopping after the current step");
            stop.store(true, Ordering::Relaxed);
            handle.await?
        }
    }?;

    match summary.best_test {
        Some(err) => println!("Best test error: {err:.6}"),
        None => println!("No epoch finished"),
    }
    info!(best_error = summary.best_error, interrupted = summary.interrupted; "training done");

    Ok(())
}
