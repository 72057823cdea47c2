use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{debug, info, warn};
use machine_learning::{
    arch::{
        Mode, Model, Trace,
        loss::{LossFn, Mse},
    },
    optimization::{Optimizer, Sgd},
    params::ModelState,
};

use crate::{
    Result,
    adapter::{InnerLoop, InnerProblem},
    checkpoint::{Checkpoint, CheckpointPolicy},
    config::TrainConfig,
    data::{
        BatchSource, Cyclic, FaceSplits, LabeledBatch, LabeledSet, ShuffledLoader, UnlabeledSet,
    },
    ema::{StabilizedEma, TeacherEma},
    evaluator::evaluate,
    history::HistoryTable,
    landmarks::NormStats,
    meta_step::{MetaStep, PseudoSource},
    meter::AverageMeter,
    metrics::MetricsSink,
    objective::{check_targets, mse_objective},
    pseudo_label,
    ramp::linear_rampup,
};

/// Epochs between learning rate decays.
pub const LR_DECAY_EVERY: usize = 5;

/// Factor applied on every learning rate decay.
pub const LR_DECAY: f32 = 0.1;

/// Every split the driver consumes, plus the labeled target statistics.
#[derive(Debug, Clone)]
pub struct TrainData {
    pub labeled: Arc<LabeledSet>,
    pub unlabeled: Arc<UnlabeledSet>,
    pub val: Arc<LabeledSet>,
    pub test: Arc<LabeledSet>,
    pub stats: NormStats,
}

impl From<FaceSplits> for TrainData {
    fn from(splits: FaceSplits) -> Self {
        Self {
            labeled: Arc::new(splits.labeled),
            unlabeled: Arc::new(splits.unlabeled),
            val: Arc::new(splits.val),
            test: Arc::new(splits.test),
            stats: splits.stats,
        }
    }
}

/// The losses of one training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLosses {
    pub loss: f32,
    pub loss_x: f32,
    pub loss_u: f32,
    pub weight: f32,
    pub meta_loss: f32,
    pub batch_size: usize,
}

/// Sample weighted averages of the losses over an epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainLosses {
    pub loss: f32,
    pub loss_x: f32,
    pub loss_u: f32,
    pub weight: f32,
}

/// Forward only scores of a network on one split, in pixel space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Validation {
    pub loss: f32,
    pub mean_error: f32,
    pub failure_rate: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub learning_rate: f32,
    pub train: TrainLosses,
    pub train_eval: Validation,
    pub val: Validation,
    pub test: Validation,
    pub ema_val: Validation,
    pub is_best: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub best_error: f32,
    /// Test error of the epoch with the best validation error.
    pub best_test: Option<f32>,
    pub epochs: Vec<EpochReport>,
    pub interrupted: bool,
}

/// Scores `state` on every batch of `source` in evaluation mode.
///
/// Predictions are de-normalized and compared against the pixel space targets.
pub fn validate<M, S>(
    model: &M,
    state: &ModelState,
    stats: &NormStats,
    source: &mut S,
) -> Result<Validation>
where
    M: Model,
    S: BatchSource<Batch = LabeledBatch>,
{
    let mut loss = AverageMeter::new();
    let mut me = AverageMeter::new();
    let mut fr = AverageMeter::new();

    source.reset();
    while let Some(batch) = source.next_batch() {
        let trace = model.predict(state, batch.inputs.view(), Mode::Eval)?;
        let pixels = stats.denormalize(trace.output())?;
        check_targets(pixels.view(), batch.targets.view())?;

        let eval = evaluate(pixels.view(), batch.targets.view())?;
        let n = batch.inputs.nrows();
        loss.update(Mse.loss(pixels.view(), batch.targets.view()), n);
        me.update(eval.mean_error, n);
        fr.update(eval.failure_rate, n);
    }

    Ok(Validation {
        loss: loss.avg,
        mean_error: me.avg,
        failure_rate: fr.avg,
    })
}

/// Drives the semi-supervised meta-learning run: per step pseudo-labeling, supervised update,
/// inner adaptation, meta update and tracker updates; per epoch validation, logging and
/// checkpointing.
pub struct Trainer<M: Model> {
    config: TrainConfig,
    model: M,
    stats: NormStats,

    live: ModelState,
    teacher: ModelState,
    stabilized: ModelState,
    /// The stabilized network as scored at the end of the last epoch, before its resync.
    stabilized_eval: ModelState,
    tmp: ModelState,

    optimizer: Sgd,
    inner: InnerLoop,
    meta: MetaStep,
    teacher_ema: TeacherEma,
    stabilizer: StabilizedEma,

    labeled: Cyclic<ShuffledLoader<LabeledSet>>,
    unlabeled: Cyclic<ShuffledLoader<UnlabeledSet>>,
    meta_val: Cyclic<ShuffledLoader<LabeledSet>>,
    labeled_eval: ShuffledLoader<LabeledSet>,
    val: ShuffledLoader<LabeledSet>,
    test: ShuffledLoader<LabeledSet>,

    global_step: u64,
    epoch: usize,
    best_error: f32,
    best_test: Option<f32>,
    lr_decayed_at: Option<usize>,
}

impl<M: Model> Trainer<M> {
    /// Creates a new `Trainer`.
    ///
    /// # Arguments
    /// * `config` - The run configuration, already validated.
    /// * `model` - The regression model.
    /// * `live` - The initial parameters, also the starting point of every tracker.
    /// * `data` - The splits and the labeled target statistics.
    pub fn new(config: TrainConfig, model: M, live: ModelState, data: TrainData) -> Result<Self> {
        model.schema().check_compatible(live.schema())?;

        let optimizer = Sgd::new(
            model.schema(),
            config.lr,
            config.momentum,
            config.weight_decay,
        )?;
        let inner = InnerLoop::new(config.inner_step_size)?;
        let meta = MetaStep::new(config.meta_target, config.inner_step_size, config.fd_radius)?;

        let bs = config.batch_size;
        let seed = config.seed;
        let labeled = ShuffledLoader::shuffled(data.labeled.clone(), bs, seed.wrapping_add(1))?;
        let unlabeled = ShuffledLoader::shuffled(data.unlabeled, bs, seed.wrapping_add(2))?;
        let meta_val = ShuffledLoader::shuffled(data.labeled.clone(), bs, seed.wrapping_add(3))?;

        Ok(Self {
            labeled: Cyclic::new(labeled, "labeled"),
            unlabeled: Cyclic::new(unlabeled, "unlabeled"),
            meta_val: Cyclic::new(meta_val, "meta-validation"),
            labeled_eval: ShuffledLoader::sequential(data.labeled, bs)?,
            val: ShuffledLoader::sequential(data.val, bs)?,
            test: ShuffledLoader::sequential(data.test, bs)?,

            teacher: live.clone(),
            stabilized: live.clone(),
            stabilized_eval: live.clone(),
            tmp: live.clone(),
            live,

            optimizer,
            inner,
            meta,
            teacher_ema: TeacherEma::new(config.ema_decay),
            stabilizer: StabilizedEma::new(config.ema_decay, config.lr),

            global_step: 0,
            epoch: config.start_epoch,
            best_error: f32::MAX,
            best_test: None,
            lr_decayed_at: None,

            stats: data.stats,
            model,
            config,
        })
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// The next epoch to run.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn learning_rate(&self) -> f32 {
        self.optimizer.learning_rate()
    }

    pub fn best_error(&self) -> f32 {
        self.best_error
    }

    /// Applies the step decay due at the start of `epoch`, at most once per epoch.
    ///
    /// # Returns
    /// Whether the learning rate changed.
    pub fn adjust_learning_rate(&mut self, epoch: usize) -> bool {
        if (epoch + 1) % LR_DECAY_EVERY != 0 || self.lr_decayed_at == Some(epoch) {
            return false;
        }

        let lr = self.optimizer.learning_rate() * LR_DECAY;
        self.optimizer.set_learning_rate(lr);
        self.lr_decayed_at = Some(epoch);
        info!(epoch = epoch + 1, lr = lr; "decayed learning rate");
        true
    }

    /// Runs one training iteration.
    pub fn train_step(&mut self) -> Result<StepLosses> {
        let labeled = self.labeled.next()?;
        let unlabeled = self.unlabeled.next()?;
        let meta_val = self.meta_val.next()?;

        let targets_x = self.stats.normalize(labeled.targets.view())?;
        let targets_val = self.stats.normalize(meta_val.targets.view())?;

        // supervised step against the teacher's pseudo-labels
        let targets_u =
            pseudo_label::generate(&self.model, &self.teacher, &unlabeled, &self.stats)?;

        let obj_x = mse_objective(
            &self.model,
            self.live.params(),
            self.live.buffers(),
            labeled.inputs.view(),
            targets_x.view(),
        )?;
        let obj_u = mse_objective(
            &self.model,
            self.live.params(),
            &obj_x.buffers,
            unlabeled.raw.view(),
            targets_u.view(),
        )?;
        self.live.commit_buffers(&obj_u.buffers)?;

        let weight =
            linear_rampup(self.global_step as f32, self.config.rampup_length()) * self.config.lambda_u;
        let loss = obj_x.loss + weight * obj_u.loss;
        if !loss.is_finite() {
            warn!(step = self.global_step, loss_x = obj_x.loss, loss_u = obj_u.loss; "non-finite training loss");
        }

        let grad: Vec<f32> = obj_x
            .grad
            .iter()
            .zip(&obj_u.grad)
            .map(|(gx, gu)| gx + weight * gu)
            .collect();
        self.optimizer.update_params(self.live.params_mut(), &grad)?;

        // meta step through the inner adaptation on the scratch copy's pseudo-labels
        self.tmp.copy_params_from(&self.live)?;
        let (targets_tmp, tmp_trace) =
            pseudo_label::generate_traced(&self.model, &self.tmp, &unlabeled, &self.stats)?;

        let problem = InnerProblem {
            inputs: unlabeled.raw.view(),
            targets: targets_tmp.view(),
        };
        let adaptation = self.inner.adapt(&self.model, &self.live, &problem)?;
        self.live.commit_buffers(&adaptation.buffers)?;

        let meta = self.meta.meta_gradient(
            &self.model,
            &self.live,
            &problem,
            &adaptation,
            PseudoSource {
                params: self.tmp.params(),
                trace: &tmp_trace,
            },
            meta_val.inputs.view(),
            targets_val.view(),
        )?;
        self.meta.apply(&mut self.optimizer, &mut self.live, &meta)?;

        let decay = self
            .teacher_ema
            .update(&mut self.teacher, &self.live, self.global_step)?;
        self.stabilizer.update(&mut self.stabilized, &mut self.live)?;

        debug!(
            step = self.global_step,
            loss = loss,
            loss_u_inner = adaptation.loss,
            meta_loss = meta.val_loss,
            teacher_decay = decay;
            "train step"
        );
        self.global_step += 1;

        Ok(StepLosses {
            loss,
            loss_x: obj_x.loss,
            loss_u: obj_u.loss,
            weight,
            meta_loss: meta.val_loss,
            batch_size: labeled.inputs.nrows(),
        })
    }

    /// Runs `val_iteration` steps.
    ///
    /// # Returns
    /// The epoch's average losses, or `None` if `stop` was raised midway.
    pub fn train_epoch(&mut self, stop: &AtomicBool) -> Result<Option<TrainLosses>> {
        let mut loss = AverageMeter::new();
        let mut loss_x = AverageMeter::new();
        let mut loss_u = AverageMeter::new();
        let mut weight = AverageMeter::new();

        for _ in 0..self.config.val_iteration {
            if stop.load(Ordering::Relaxed) {
                return Ok(None);
            }

            let step = self.train_step()?;
            loss.update(step.loss, step.batch_size);
            loss_x.update(step.loss_x, step.batch_size);
            loss_u.update(step.loss_u, step.batch_size);
            weight.update(step.weight, step.batch_size);
        }

        Ok(Some(TrainLosses {
            loss: loss.avg,
            loss_x: loss_x.avg,
            loss_u: loss_u.avg,
            weight: weight.avg,
        }))
    }

    /// Trains and validates the next epoch.
    ///
    /// # Returns
    /// The epoch report, or `None` if `stop` was raised midway.
    pub fn run_epoch(&mut self, stop: &AtomicBool) -> Result<Option<EpochReport>> {
        let epoch = self.epoch;
        self.adjust_learning_rate(epoch);
        info!(
            epoch = epoch + 1,
            epochs = self.config.epochs,
            lr = self.optimizer.learning_rate();
            "starting epoch"
        );

        let Some(train) = self.train_epoch(stop)? else {
            return Ok(None);
        };

        // the average is scored with the live running statistics, then restarted from live
        self.stabilizer.sync_buffers(&mut self.stabilized, &self.live)?;
        let ema_val = validate(&self.model, &self.stabilized, &self.stats, &mut self.val)?;
        self.stabilized_eval.copy_from(&self.stabilized)?;
        self.stabilizer.resync(&mut self.stabilized, &self.live)?;

        let train_eval = validate(&self.model, &self.live, &self.stats, &mut self.labeled_eval)?;
        let val = validate(&self.model, &self.live, &self.stats, &mut self.val)?;
        let test = validate(&self.model, &self.live, &self.stats, &mut self.test)?;

        let is_best = val.mean_error < self.best_error;
        self.best_error = self.best_error.min(val.mean_error);
        if is_best {
            self.best_test = Some(test.mean_error);
        }
        self.epoch = epoch + 1;

        info!(
            epoch = epoch + 1,
            train_loss = train.loss,
            val_me = val.mean_error,
            val_fr = val.failure_rate,
            test_me = test.mean_error,
            ema_val_me = ema_val.mean_error;
            "finished epoch"
        );

        Ok(Some(EpochReport {
            epoch,
            learning_rate: self.optimizer.learning_rate(),
            train,
            train_eval,
            val,
            test,
            ema_val,
            is_best,
        }))
    }

    /// Runs every remaining epoch, recording and checkpointing each one.
    pub fn run(
        &mut self,
        sink: &mut dyn MetricsSink,
        history: &mut HistoryTable,
        policy: &CheckpointPolicy,
        stop: &AtomicBool,
    ) -> Result<RunSummary> {
        let mut epochs = Vec::new();
        let mut interrupted = false;

        while self.epoch < self.config.epochs {
            let Some(report) = self.run_epoch(stop)? else {
                warn!(epoch = self.epoch + 1; "interrupted, the unfinished epoch is discarded");
                interrupted = true;
                break;
            };

            self.record(&report, sink, history)?;
            policy.save(&self.checkpoint(), report.is_best)?;
            epochs.push(report);
        }

        sink.flush()?;

        Ok(RunSummary {
            best_error: self.best_error,
            best_test: self.best_test,
            epochs,
            interrupted,
        })
    }

    fn record(
        &self,
        report: &EpochReport,
        sink: &mut dyn MetricsSink,
        history: &mut HistoryTable,
    ) -> Result<()> {
        let step = self.config.metrics_step(report.epoch);
        let scalars = [
            ("losses/train_loss", report.train.loss),
            ("losses/valid_loss", report.val.loss),
            ("losses/test_loss", report.test.loss),
            ("accuracy/train_me", report.train_eval.mean_error),
            ("accuracy/val_me", report.val.mean_error),
            ("accuracy/test_me", report.test.mean_error),
            ("accuracy/train_fr", report.train_eval.failure_rate),
            ("accuracy/val_fr", report.val.failure_rate),
            ("accuracy/test_fr", report.test.failure_rate),
            ("accuracy/ema_val_me", report.ema_val.mean_error),
        ];

        for (key, value) in scalars {
            sink.add_scalar(key, value, step)?;
        }

        history.append([
            report.train.loss,
            report.train.loss_x,
            report.train.loss_u,
            report.train_eval.mean_error,
            report.train_eval.failure_rate,
            report.val.loss,
            report.val.mean_error,
            report.val.failure_rate,
            report.test.loss,
            report.test.mean_error,
            report.test.failure_rate,
        ])
    }

    /// Snapshots everything needed to resume after the last finished epoch.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            epoch: self.epoch,
            global_step: self.global_step,
            model: self.live.to_state_dict(),
            teacher: self.teacher.to_state_dict(),
            stabilized: self.stabilized_eval.to_state_dict(),
            best_error: self.best_error,
            best_test: self.best_test,
            optimizer: self.optimizer.state(),
            lr_decayed_at: self.lr_decayed_at,
        }
    }

    /// Restores a run from `checkpoint`.
    ///
    /// # Returns
    /// An error if the checkpoint was written for a differently shaped model.
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.live.load_state_dict(&checkpoint.model)?;
        self.teacher.load_state_dict(&checkpoint.teacher)?;
        self.stabilized_eval.load_state_dict(&checkpoint.stabilized)?;
        self.stabilizer.resync(&mut self.stabilized, &self.live)?;
        self.tmp.copy_from(&self.live)?;
        self.optimizer = Sgd::from_state(self.model.schema(), checkpoint.optimizer.clone())?;

        self.epoch = checkpoint.epoch;
        self.global_step = checkpoint.global_step;
        self.best_error = checkpoint.best_error;
        self.best_test = checkpoint.best_test;
        self.lr_decayed_at = checkpoint.lr_decayed_at;

        info!(
            epoch = self.epoch,
            global_step = self.global_step,
            lr = self.optimizer.learning_rate();
            "resumed from checkpoint"
        );
        Ok(())
    }
}
