//! End-to-end training on a small synthetic dataset.

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use kinship_core::{KnnDataset, SamplerConfig, SubgraphSampler};
use kinship_nn::summary::{read_scalars, METRICS_FILE};
use kinship_nn::{
    evaluate, load_checkpoint, read_meta, CheckpointWriter, Gcn, GcnTrainer, ModelSpec,
    RunOutputs, SummaryWriter, TrainingConfig,
};
use ndarray::{Array1, Array2};

/// Two identities of six nodes each; neighbors are the next nodes of the same
/// identity, with one cross-identity neighbor per row.
fn two_clusters() -> KnnDataset {
    let n = 12;
    let dim = 4;
    let mut features = Array2::<f32>::zeros((n, dim));
    let mut labels = Array1::<i64>::zeros(n);
    let mut knn = Array2::<usize>::zeros((n, 4));
    for i in 0..n {
        let id = i / 6;
        labels[i] = id as i64;
        features[[i, id]] = 1.0;
        features[[i, 2 + i % 2]] = 0.1 * (i % 6) as f32;

        let base = id * 6;
        knn[[i, 0]] = i;
        knn[[i, 1]] = base + (i + 1) % 6;
        knn[[i, 2]] = base + (i + 2) % 6;
        knn[[i, 3]] = (i + 6) % n;
    }
    KnnDataset::from_arrays(features, knn, labels, 4).unwrap()
}

#[test]
fn one_epoch_writes_checkpoints_and_scalars() {
    let dir = tempfile::tempdir().unwrap();
    let device = Device::Cpu;
    let dataset = two_clusters();
    let sampler_config = SamplerConfig::new(vec![3, 2], 2);
    let sampler = SubgraphSampler::new(&dataset, sampler_config.clone()).unwrap();

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let gcn = Gcn::new(dataset.feature_dim(), vb).unwrap();

    let config = TrainingConfig::default()
        .with_epochs(1)
        .with_batch_size(4)
        .with_checkpoint_every(2)
        .with_log_every(1);
    let loader = config.loader(&sampler).unwrap();
    let spec = ModelSpec {
        input_dim: dataset.feature_dim(),
        sampler: sampler_config,
    };
    let mut outputs = RunOutputs {
        summary: Some(SummaryWriter::new(dir.path().join("logs")).unwrap()),
        checkpoints: Some(
            CheckpointWriter::new(dir.path().join("models"), "gcn", 2, spec).unwrap(),
        ),
    };

    let mut seen = Vec::new();
    let mut trainer = GcnTrainer::new(&gcn, &varmap, config, device.clone()).unwrap();
    let report = trainer
        .fit(&loader, &mut outputs, |r| seen.push(r.step))
        .unwrap();

    assert_eq!(report.steps, 3);
    assert_eq!(seen, vec![0, 1, 2]);
    assert_eq!(report.epoch_losses.len(), 1);
    assert!(report.epoch_losses[0].is_finite());
    assert!(report.last_metrics.is_some());

    // steps 0 and 2
    assert_eq!(report.checkpoints.len(), 2);
    assert!(report.checkpoints[0].ends_with("gcn-0000.safetensors"));
    assert!(report.checkpoints[1].ends_with("gcn-0001.safetensors"));
    let meta = read_meta(&report.checkpoints[1]).unwrap();
    assert_eq!(meta.step, 2);
    assert_eq!(meta.spec.input_dim, 4);

    let events = read_scalars(&dir.path().join("logs").join(METRICS_FILE)).unwrap();
    assert_eq!(events.len(), 3 * 4);
    assert!(events.iter().any(|e| e.tag == "Loss" && e.name == "loss"));
    for name in ["Acc", "P", "R"] {
        assert!(events.iter().any(|e| e.tag == "Eva" && e.name == name));
    }
}

#[test]
fn checkpoint_reloads_for_evaluation_and_resume() {
    let dir = tempfile::tempdir().unwrap();
    let device = Device::Cpu;
    let dataset = two_clusters();
    let sampler_config = SamplerConfig::new(vec![3, 2], 2);
    let sampler = SubgraphSampler::new(&dataset, sampler_config.clone()).unwrap();

    let varmap = VarMap::new();
    let gcn = Gcn::new(4, VarBuilder::from_varmap(&varmap, DType::F32, &device)).unwrap();
    let config = TrainingConfig::default()
        .with_epochs(2)
        .with_batch_size(6)
        .with_checkpoint_every(1);
    let loader = config.loader(&sampler).unwrap();
    let spec = ModelSpec {
        input_dim: 4,
        sampler: sampler_config,
    };
    let mut outputs = RunOutputs {
        summary: None,
        checkpoints: Some(CheckpointWriter::new(dir.path(), "gcn", 1, spec).unwrap()),
    };
    let report = GcnTrainer::new(&gcn, &varmap, config.clone(), device.clone())
        .unwrap()
        .fit(&loader, &mut outputs, |_| {})
        .unwrap();
    assert_eq!(report.steps, 4);
    let last = report.checkpoints.last().unwrap().clone();

    let mut restored = VarMap::new();
    let gcn2 = Gcn::new(4, VarBuilder::from_varmap(&restored, DType::F32, &device)).unwrap();
    let meta = load_checkpoint(&mut restored, &last).unwrap();
    assert_eq!((meta.step, meta.epoch), (3, 1));

    let eval_loader = config.clone().with_shuffle(false).loader(&sampler).unwrap();
    let eval = evaluate(&gcn2, &eval_loader, &device, 0.5, true).unwrap();
    assert!(eval.mean_loss.is_finite());
    // three first-hop neighbors per center
    assert_eq!(eval.metrics.support, 12 * 3);
    assert_eq!(eval.scores.len(), 12 * 3);
    assert_eq!(eval.scores[0].center, 0);
    assert!(eval.scores.iter().all(|s| (0.0..=1.0).contains(&s.score)));

    // the last checkpoint closes the run
    let mut resumed = GcnTrainer::new(&gcn2, &restored, config.clone(), device.clone())
        .unwrap()
        .resume(&meta);
    assert_eq!(resumed.global_step(), 4);
    assert_eq!(resumed.remaining_steps(loader.num_batches()), 0);
    let report = resumed
        .fit(&loader, &mut RunOutputs::default(), |_| {})
        .unwrap();
    assert_eq!(report.steps, 0);
    assert!(report.epoch_losses.is_empty());
}

/// Resume from checkpoint `index` and return the `(step, epoch, batch)` of
/// every step trained afterwards.
fn resume_positions(
    checkpoints: &[std::path::PathBuf],
    index: usize,
    config: &TrainingConfig,
    sampler: &SubgraphSampler,
) -> Vec<(usize, usize, usize)> {
    let device = Device::Cpu;
    let mut varmap = VarMap::new();
    let gcn = Gcn::new(4, VarBuilder::from_varmap(&varmap, DType::F32, &device)).unwrap();
    let meta = load_checkpoint(&mut varmap, &checkpoints[index]).unwrap();
    let loader = config.loader(sampler).unwrap();

    let mut trainer = GcnTrainer::new(&gcn, &varmap, config.clone(), device)
        .unwrap()
        .resume(&meta);
    let expected = trainer.remaining_steps(loader.num_batches());
    let mut seen = Vec::new();
    let report = trainer
        .fit(&loader, &mut RunOutputs::default(), |r| {
            seen.push((r.step, r.epoch, r.batch))
        })
        .unwrap();
    assert_eq!(report.steps, expected);
    seen
}

#[test]
fn resume_continues_after_the_saved_batch() {
    let dir = tempfile::tempdir().unwrap();
    let device = Device::Cpu;
    let dataset = two_clusters();
    let sampler_config = SamplerConfig::new(vec![3, 2], 2);
    let sampler = SubgraphSampler::new(&dataset, sampler_config.clone()).unwrap();

    let varmap = VarMap::new();
    let gcn = Gcn::new(4, VarBuilder::from_varmap(&varmap, DType::F32, &device)).unwrap();
    let config = TrainingConfig::default()
        .with_epochs(2)
        .with_batch_size(6)
        .with_checkpoint_every(1);
    let loader = config.loader(&sampler).unwrap();
    let spec = ModelSpec {
        input_dim: 4,
        sampler: sampler_config,
    };
    let mut outputs = RunOutputs {
        summary: None,
        checkpoints: Some(CheckpointWriter::new(dir.path(), "gcn", 1, spec).unwrap()),
    };
    let mut full = Vec::new();
    let report = GcnTrainer::new(&gcn, &varmap, config.clone(), device)
        .unwrap()
        .fit(&loader, &mut outputs, |r| {
            full.push((r.step, r.epoch, r.batch))
        })
        .unwrap();
    assert_eq!(full, vec![(0, 0, 0), (1, 0, 1), (2, 1, 0), (3, 1, 1)]);

    let metas: Vec<_> = report
        .checkpoints
        .iter()
        .map(|path| read_meta(path).unwrap())
        .collect();
    let positions: Vec<_> = metas
        .iter()
        .map(|m| (m.step, m.epoch, m.batch))
        .collect();
    assert_eq!(positions, full);

    // mid-epoch: the rest of epoch 0, then all of epoch 1
    let seen = resume_positions(&report.checkpoints, 0, &config, &sampler);
    assert_eq!(seen, full[1..].to_vec());

    // last batch of epoch 0: rolls over to epoch 1
    let seen = resume_positions(&report.checkpoints, 1, &config, &sampler);
    assert_eq!(seen, full[2..].to_vec());

    let seen = resume_positions(&report.checkpoints, 2, &config, &sampler);
    assert_eq!(seen, full[3..].to_vec());
}
