//! Dataset discovery, fold generation and batch loading on WAV trees

use skm_audio::audio::write_wav;
use skm_audio::collate::{slicing_pipeline, Payload};
use skm_audio::config::{DatasetConfig, DatasetLayout, LoaderConfig, ReshapeConfig, SpecConfig};
use skm_audio::dataset::{discover_metadata, FoldGenerator};
use skm_audio::error::SkmError;
use skm_audio::loader::materialize;
use std::collections::HashSet;
use std::path::Path;

fn tone(freq: f32, seconds: f32) -> Vec<f32> {
    let n = (seconds * 16000.0) as usize;
    (0..n)
        .map(|i| 0.4 * (2.0 * std::f32::consts::PI * freq * i as f32 / 16000.0).sin())
        .collect()
}

/// `root/<class>/<class>_<i>.wav`
fn write_class_tree(root: &Path, classes: &[&str], per_class: usize, seconds: f32) {
    for (c, class) in classes.iter().enumerate() {
        let dir = root.join(class);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..per_class {
            let freq = 300.0 * (c + 1) as f32 + 20.0 * i as f32;
            write_wav(dir.join(format!("{}_{:02}.wav", class, i)), &tone(freq, seconds), 16000)
                .unwrap();
        }
    }
}

fn kfold_config(root: &Path) -> DatasetConfig {
    DatasetConfig {
        root_path: root.to_path_buf(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_sets_partition_the_dataset() {
        let dir = tempfile::tempdir().unwrap();
        write_class_tree(dir.path(), &["dog", "rain"], 11, 0.1);
        let config = kfold_config(dir.path());

        let metadata = discover_metadata(&config).unwrap();
        assert_eq!(metadata.class_names, vec!["dog", "rain"]);
        assert_eq!(metadata.entries.len(), 22);

        let generator = FoldGenerator::new(metadata, &config).unwrap();
        let mut seen = HashSet::new();
        for fold in 0..5 {
            let (train, val) = generator.fold(fold).unwrap();
            assert_eq!(train.len() + val.len(), 22);
            let train_names: HashSet<&str> = train.filenames().into_iter().collect();
            for name in val.filenames() {
                assert!(!train_names.contains(name));
                assert!(seen.insert(name.to_string()), "{} validated twice", name);
            }
        }
        assert_eq!(seen.len(), 22);
    }

    #[test]
    fn test_labels_follow_sorted_class_names() {
        let dir = tempfile::tempdir().unwrap();
        write_class_tree(dir.path(), &["zebra", "apple"], 5, 0.1);
        let metadata = discover_metadata(&kfold_config(dir.path())).unwrap();
        assert_eq!(metadata.class_names, vec!["apple", "zebra"]);
        for entry in &metadata.entries {
            let expected = if entry.filename.starts_with("apple") { 0 } else { 1 };
            assert_eq!(entry.label, expected);
        }
    }

    #[test]
    fn test_pre_split_layout_uses_fold_directories() {
        let dir = tempfile::tempdir().unwrap();
        for fold in 0..3 {
            let fold_dir = dir.path().join(format!("fold_{:02}", fold));
            write_class_tree(&fold_dir, &["a", "b"], 2, 0.1);
        }
        let config = DatasetConfig {
            root_path: dir.path().to_path_buf(),
            k_folds: 3,
            layout: DatasetLayout::PreSplit,
            ..Default::default()
        };
        let metadata = discover_metadata(&config).unwrap();
        assert_eq!(metadata.entries.len(), 12);

        let generator = FoldGenerator::new(metadata, &config).unwrap();
        let (train, val) = generator.fold(1).unwrap();
        assert_eq!(val.len(), 4);
        assert_eq!(train.len(), 8);
        assert!(val
            .entries
            .iter()
            .all(|e| e.path.to_string_lossy().contains("fold_01")));
    }

    #[test]
    fn test_class_count_mismatch_is_a_dataset_error() {
        let dir = tempfile::tempdir().unwrap();
        write_class_tree(dir.path(), &["a", "b", "c"], 2, 0.1);
        let result = discover_metadata(&kfold_config(dir.path()));
        assert!(matches!(result, Err(SkmError::DatasetError(_))));
    }

    #[test]
    fn test_missing_root_is_a_dataset_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = discover_metadata(&kfold_config(&dir.path().join("absent")));
        assert!(matches!(result, Err(SkmError::DatasetError(_))));
    }

    #[test]
    fn test_materialize_keeps_dataset_order() {
        let dir = tempfile::tempdir().unwrap();
        write_class_tree(dir.path(), &["a", "b"], 7, 1.0);
        let config = kfold_config(dir.path());
        let generator = FoldGenerator::new(discover_metadata(&config).unwrap(), &config).unwrap();
        let (train, _) = generator.fold(0).unwrap();

        let pipeline = slicing_pipeline(None, &SpecConfig::default(), &ReshapeConfig::default());
        let loader = LoaderConfig {
            num_workers: 4,
            batch_size: 3,
        };
        let items = materialize(&train, &pipeline, 16000, &loader).unwrap();

        let names: Vec<&str> = items.iter().map(|i| i.filename.as_str()).collect();
        assert_eq!(names, train.filenames());
        let labels: Vec<usize> = items.iter().map(|i| i.label).collect();
        assert_eq!(labels, train.labels());
        for item in &items {
            // 1 s at 16 kHz: 32 frames, 3 slices
            match &item.payload {
                Payload::Slices(s) => assert_eq!(s.nrows(), 3),
                other => panic!("unexpected payload {}", other.kind()),
            }
        }
    }

    #[test]
    fn test_unreadable_file_fails_loading() {
        let dir = tempfile::tempdir().unwrap();
        write_class_tree(dir.path(), &["a", "b"], 5, 0.5);
        std::fs::write(dir.path().join("a").join("broken.wav"), b"not a wav file").unwrap();
        let config = kfold_config(dir.path());
        let metadata = discover_metadata(&config).unwrap();
        let dataset = skm_audio::Dataset {
            entries: metadata.entries,
        };
        let pipeline = slicing_pipeline(None, &SpecConfig::default(), &ReshapeConfig::default());
        let result = materialize(&dataset, &pipeline, 16000, &LoaderConfig::default());
        assert!(matches!(result, Err(SkmError::AudioFileError(_))));
    }
}
