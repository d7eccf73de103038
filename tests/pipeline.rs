//! End-to-end checks: frame tree -> fold table -> data module -> training run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use burn::backend::Autodiff;
use burn::data::dataset::Dataset;
use burn_ndarray::NdArray;
use image::{Rgb, RgbImage};
use tempfile::TempDir;

use shotclass::backend::Precision;
use shotclass::training::read_metrics;
use shotclass::{
    assign_folds, index_directory, BackboneKind, Checkpoint, ExperimentConfig, FoldConfig,
    LabelMap, SampleRecord, SampleTable, ShotDataModule, ShotError, TrainingDriver,
};

type TrainBackend = Autodiff<NdArray>;

/// `root/clip_<n>/frame_<i>_<label>.jpg`, alternating labels
fn write_frames(root: &Path, labels: &[&str], per_label: usize) {
    for (l, label) in labels.iter().enumerate() {
        for i in 0..per_label {
            let clip = root.join(format!("clip_{}", i % 3));
            std::fs::create_dir_all(&clip).unwrap();
            let shade = (40 * l + 5 * i) as u8;
            RgbImage::from_fn(48, 36, |x, y| Rgb([shade, x as u8 * 4, y as u8 * 6]))
                .save(clip.join(format!("frame_{:03}_{}.jpg", i, label)))
                .unwrap();
        }
    }
}

fn experiment(dir: &Path) -> ExperimentConfig {
    let mut config = ExperimentConfig::default();
    config.data.image_root = dir.join("frames");
    config.data.table_path = dir.join("train_folds.csv");
    config.data.label_map_path = dir.join("label_map.json");
    config.data.image_size = 32;
    config.data.batch_size = 4;
    config.data.num_workers = 0;
    config.data.loader_seed = Some(7);
    config.folds = FoldConfig {
        num_folds: 2,
        seed: Some(11),
    };
    config.model = config
        .model
        .with_num_classes(2)
        .with_backbone(BackboneKind::ResNet18);
    config.training.num_epochs = 1;
    config.training.precision = Precision::Full;
    config.training.log_dir = dir.join("logs");
    config.training.checkpoint_path = dir.join("model1.ckpt");
    config
}

fn prepare(config: &ExperimentConfig) -> LabelMap {
    let indexed = index_directory(&config.data.image_root).unwrap();
    let table = assign_folds(&indexed.table, &config.folds).unwrap();
    table.write_csv(&config.data.table_path).unwrap();
    indexed.label_map.save(&config.data.label_map_path).unwrap();
    indexed.label_map
}

#[test]
fn prepare_writes_table_and_label_map() {
    let dir = TempDir::new().unwrap();
    let config = experiment(dir.path());
    write_frames(&config.data.image_root, &["wide", "closeup", "medium"], 4);

    let label_map = prepare(&config);
    assert_eq!(label_map.classes(), &["closeup", "medium", "wide"]);

    let table = SampleTable::read_csv(&config.data.table_path).unwrap();
    assert_eq!(table.len(), 12);
    assert!(table.iter().all(|r| matches!(r.fold, Some(f) if f < 2)));

    // Codes decode to the label embedded in each file name
    let loaded = LabelMap::load(&config.data.label_map_path).unwrap();
    for record in table.iter() {
        let name = record.image_path.file_name().unwrap().to_string_lossy().to_string();
        let label = loaded.decode(record.label).unwrap();
        assert!(name.ends_with(&format!("_{}.jpg", label)));
        assert_eq!(loaded.encode(label).unwrap(), record.label);
    }
}

#[test]
fn folds_preserve_label_proportions() {
    let counts = [(0usize, 150usize), (1, 90), (2, 60)];
    let table: SampleTable = counts
        .iter()
        .flat_map(|&(label, n)| {
            (0..n).map(move |i| SampleRecord::new(PathBuf::from(format!("f_{}_{}.jpg", label, i)), label))
        })
        .collect();

    let folds = assign_folds(
        &table,
        &FoldConfig {
            num_folds: 5,
            seed: None,
        },
    )
    .unwrap();

    let per_fold = folds.fold_label_counts();
    assert_eq!(per_fold.len(), 5);

    let mut union = 0;
    for fold_counts in per_fold.values() {
        for &(label, total) in &counts {
            let got = fold_counts.get(&label).copied().unwrap_or(0) as i64;
            assert!((got - (total / 5) as i64).abs() <= 1, "label {} has {} rows", label, got);
        }
        union += fold_counts.values().sum::<usize>();
    }
    assert_eq!(union, 300);
}

#[test]
fn dataset_items_have_configured_size() {
    let dir = TempDir::new().unwrap();
    let config = experiment(dir.path());
    write_frames(&config.data.image_root, &["wide", "closeup"], 3);
    prepare(&config);

    let mut data = ShotDataModule::new(config.data.clone());
    data.setup().unwrap();

    let item = data.valid_dataset().unwrap().get(0).unwrap();
    assert_eq!(item.image.len(), 3 * 32 * 32);
}

#[test]
fn training_run_writes_metrics_and_checkpoint() {
    let dir = TempDir::new().unwrap();
    let mut config = experiment(dir.path());
    write_frames(&config.data.image_root, &["wide", "closeup"], 6);
    let label_map = prepare(&config);

    // Evaluate the held-out fold once more as the test split
    let table = SampleTable::read_csv(&config.data.table_path).unwrap();
    let test_path = dir.path().join("test.csv");
    table.in_fold(1).write_csv(&test_path).unwrap();
    config.data.test_table_path = Some(test_path);

    let mut data = ShotDataModule::new(config.data.clone());
    data.setup().unwrap();

    let device = Default::default();
    let outcome = TrainingDriver::new(&config)
        .with_label_map(&label_map)
        .with_progress(false)
        .run::<TrainBackend>(&data, &device)
        .unwrap();

    assert_eq!(outcome.epochs.len(), 1);
    let epoch = &outcome.epochs[0];
    assert!(epoch.train_loss.is_finite());
    assert!((0.0..=1.0).contains(&epoch.train_acc));
    assert!(epoch.val_acc.is_some());
    assert!((epoch.learning_rate - 1e-4).abs() < 1e-12);

    let test = outcome.test_metrics.as_ref().unwrap();
    assert!(test.contains_key("test_loss"));
    assert!(test.contains_key("test_acc"));

    let rows = read_metrics(outcome.log_dir.join("metrics.csv")).unwrap();
    let mut names: BTreeMap<String, usize> = BTreeMap::new();
    for (_, _, name, _) in &rows {
        *names.entry(name.clone()).or_default() += 1;
    }
    for expected in [
        "lr-AdamW",
        "train_loss",
        "train_acc_step",
        "train_loss_epoch",
        "train_acc_epoch",
        "val_loss",
        "val_acc_step",
        "val_loss_epoch",
        "val_acc_epoch",
        "test_loss",
        "test_acc",
    ] {
        assert!(names.contains_key(expected), "missing metric {}", expected);
    }
    assert!(outcome.log_dir.join("hparams.json").exists());
    assert!(outcome.log_dir.ends_with("version_0"));

    let checkpoint = Checkpoint::<NdArray>::load(&outcome.checkpoint_path, &device).unwrap();
    assert_eq!(checkpoint.model.num_classes(), 2);
    assert_eq!(checkpoint.metadata.class_names, vec!["closeup", "wide"]);
}

#[test]
fn missing_image_aborts_training() {
    let dir = TempDir::new().unwrap();
    let config = experiment(dir.path());
    write_frames(&config.data.image_root, &["wide", "closeup"], 4);
    prepare(&config);

    let table = SampleTable::read_csv(&config.data.table_path).unwrap();
    let victim = table.in_fold(0).get(0).unwrap().image_path.clone();
    std::fs::remove_file(victim).unwrap();

    let mut data = ShotDataModule::new(config.data.clone());
    data.setup().unwrap();

    let result = TrainingDriver::new(&config)
        .with_progress(false)
        .run::<TrainBackend>(&data, &Default::default());
    assert!(matches!(result, Err(ShotError::Training(_))));
    assert!(!config.training.checkpoint_path.exists());
}
