mod common;

use std::{fs, sync::atomic::AtomicBool};

use approx::assert_abs_diff_eq;
use landmark_meta::{
    Trainer,
    checkpoint::{Checkpoint, CheckpointPolicy},
    history::HistoryTable,
    metrics::MemorySink,
};

use common::Passthrough;

const KEYS: [&str; 10] = [
    "losses/train_loss",
    "losses/valid_loss",
    "losses/test_loss",
    "accuracy/train_me",
    "accuracy/val_me",
    "accuracy/test_me",
    "accuracy/train_fr",
    "accuracy/val_fr",
    "accuracy/test_fr",
    "accuracy/ema_val_me",
];

#[test]
fn agreeing_views_reduce_the_loss_to_the_labeled_term() {
    let dir = tempfile::tempdir().unwrap();
    let model = Passthrough::new();
    let live = model.state();
    let mut trainer = Trainer::new(common::config(3), model, live, common::data()).unwrap();

    let mut sink = MemorySink::new();
    let mut history = HistoryTable::open(dir.path().join("log.txt"), false).unwrap();
    let policy = CheckpointPolicy::new(dir.path());
    let summary = trainer
        .run(&mut sink, &mut history, &policy, &AtomicBool::new(false))
        .unwrap();

    assert_eq!(summary.epochs.len(), 3);
    for report in &summary.epochs {
        assert_eq!(report.train.loss_u, 0.);
        assert_eq!(report.train.loss, report.train.loss_x);
        assert_abs_diff_eq!(report.train.loss_x, 1., epsilon = 1e-6);

        // one pixel off on both axes with a 10 pixel inter-ocular distance
        assert_abs_diff_eq!(report.val.mean_error, 0.1 * 2f32.sqrt(), epsilon = 1e-6);
        assert_eq!(report.val.failure_rate, 1.);
        // predictions ignore the parameters, so the averaged network scores the same
        assert_abs_diff_eq!(report.ema_val.mean_error, report.val.mean_error, epsilon = 1e-6);
    }

    let best: Vec<_> = summary.epochs.iter().map(|r| r.is_best).collect();
    assert_eq!(best, [true, false, false]);
    assert_eq!(summary.best_test, Some(summary.epochs[0].test.mean_error));

    for key in KEYS {
        let steps: Vec<_> = sink.series(key).into_iter().map(|(step, _)| step).collect();
        assert_eq!(steps, [12, 24, 36], "{key}");
    }

    let table = fs::read_to_string(dir.path().join("log.txt")).unwrap();
    assert_eq!(table.lines().count(), 4);
    assert_eq!(Checkpoint::load(policy.best_path()).unwrap().epoch, 1);
    assert_eq!(Checkpoint::load(policy.latest_path()).unwrap().epoch, 3);
}

#[test]
fn resumed_run_matches_an_uninterrupted_one() {
    let stop = AtomicBool::new(false);

    let full_dir = tempfile::tempdir().unwrap();
    let model = Passthrough::new();
    let live = model.state();
    let mut full = Trainer::new(common::config(10), model, live, common::data()).unwrap();
    let mut history = HistoryTable::open(full_dir.path().join("log.txt"), false).unwrap();
    full.run(
        &mut MemorySink::new(),
        &mut history,
        &CheckpointPolicy::new(full_dir.path()),
        &stop,
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let policy = CheckpointPolicy::new(dir.path());
    let model = Passthrough::new();
    let live = model.state();
    let mut first = Trainer::new(common::config(5), model, live, common::data()).unwrap();
    let mut history = HistoryTable::open(dir.path().join("log.txt"), false).unwrap();
    first
        .run(&mut MemorySink::new(), &mut history, &policy, &stop)
        .unwrap();
    drop(history);

    let model = Passthrough::new();
    let live = model.state();
    let mut resumed = Trainer::new(common::config(10), model, live, common::data()).unwrap();
    resumed
        .restore(&Checkpoint::load(policy.latest_path()).unwrap())
        .unwrap();
    assert_eq!(resumed.epoch(), 5);
    assert_abs_diff_eq!(resumed.learning_rate(), 3e-3, epsilon = 1e-9);

    let mut history = HistoryTable::open(dir.path().join("log.txt"), true).unwrap();
    let summary = resumed
        .run(&mut MemorySink::new(), &mut history, &policy, &stop)
        .unwrap();

    // the decay already applied at epoch 5 isn't applied again, the one at epoch 10 is
    assert_abs_diff_eq!(resumed.learning_rate(), full.learning_rate(), epsilon = 1e-9);
    assert_abs_diff_eq!(resumed.learning_rate(), 3e-4, epsilon = 1e-9);
    assert_eq!(resumed.global_step(), full.global_step());
    assert_eq!(resumed.global_step(), 30);
    assert_eq!(resumed.best_error(), full.best_error());
    assert!(summary.epochs.iter().all(|r| !r.is_best));

    assert_eq!(resumed.checkpoint(), full.checkpoint());

    let table = fs::read_to_string(dir.path().join("log.txt")).unwrap();
    assert_eq!(table.lines().count(), 11);
}
