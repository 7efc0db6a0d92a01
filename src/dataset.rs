use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{info, warn};
use rand::seq::SliceRandom;

use crate::{
    error::{Error, Result},
    utils::{one_hot, seeded_rng, SPLIT_STREAM},
    video::FrameSampler,
    vol::Vol,
    Float,
};

/// Sorted, de-duplicated action names. The position of a name is its
/// class index.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClassLabels {
    names: Vec<String>,
}

impl ClassLabels {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    /// One class per subdirectory of `root`. Hidden directories are ignored.
    pub fn from_dir<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let mut names = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                names.push(name);
            }
        }

        if names.is_empty() {
            return Err(Error::EmptyDataset(root.to_path_buf()));
        }
        Ok(Self::new(names))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.binary_search_by(|candidate| candidate.as_str().cmp(name)).ok()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Frame sequences with their class index and source path, kept in three
/// parallel vectors of equal length.
#[derive(Debug, Clone)]
pub struct Dataset {
    features: Vec<Vol>,
    labels: Vec<usize>,
    paths: Vec<PathBuf>,
    classes: ClassLabels,
}

/// Shuffles `0..len` with the split stream of `seed` and cuts off
/// `ceil(len * test_fraction)` indices for the test partition.
pub fn train_test_indices(len: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(&mut seeded_rng(seed, SPLIT_STREAM));

    let n_test = ((len as f64) * test_fraction).ceil() as usize;
    let n_test = n_test.min(len);
    let train = order.split_off(n_test);
    (train, order)
}

impl Dataset {
    pub fn new(classes: ClassLabels) -> Self {
        Self {
            features: Vec::new(),
            labels: Vec::new(),
            paths: Vec::new(),
            classes,
        }
    }

    pub fn push(&mut self, features: Vol, label: usize, path: PathBuf) {
        debug_assert!(label < self.classes.len());
        self.features.push(features);
        self.labels.push(label);
        self.paths.push(path);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn features(&self) -> &[Vol] {
        &self.features
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn classes(&self) -> &ClassLabels {
        &self.classes
    }

    pub fn one_hot_labels(&self) -> Vec<Vec<Float>> {
        self.labels
            .iter()
            .map(|&label| one_hot(label, self.classes.len()))
            .collect()
    }

    /// Moves the samples into a `(train, test)` pair. Both sides must end
    /// up with at least one sample.
    pub fn split(self, test_fraction: f64, seed: u64) -> Result<(Dataset, Dataset)> {
        let (train_idx, test_idx) = train_test_indices(self.len(), test_fraction, seed);
        if test_idx.is_empty() {
            return Err(Error::EmptyPartition("test"));
        }
        if train_idx.is_empty() {
            return Err(Error::EmptyPartition("train"));
        }

        let classes = self.classes.clone();
        let mut samples: Vec<Option<(Vol, usize, PathBuf)>> = self
            .features
            .into_iter()
            .zip(self.labels)
            .zip(self.paths)
            .map(|((features, label), path)| Some((features, label, path)))
            .collect();

        let mut take = |indices: &[usize]| {
            let mut part = Dataset::new(classes.clone());
            for &i in indices {
                if let Some((features, label, path)) = samples[i].take() {
                    part.push(features, label, path);
                }
            }
            part
        };

        let train = take(&train_idx);
        let test = take(&test_idx);
        Ok((train, test))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedVideo {
    pub path: PathBuf,
    pub reason: String,
}

/// A dataset together with every video that could not be used.
#[derive(Debug)]
pub struct BuildReport {
    pub dataset: Dataset,
    pub skipped: Vec<SkippedVideo>,
}

/// Turns a `root/<class>/<video>` tree into a [`Dataset`].
pub struct DatasetBuilder {
    sampler: FrameSampler,
}

impl DatasetBuilder {
    pub fn new(sampler: FrameSampler) -> Self {
        Self { sampler }
    }

    /// Visits classes in index order and videos sorted by path, so the
    /// result only depends on the directory contents.
    pub fn build<P: AsRef<Path>>(&self, root: P, classes: &ClassLabels) -> Result<BuildReport> {
        let root = root.as_ref();
        let mut dataset = Dataset::new(classes.clone());
        let mut skipped = Vec::new();

        for (label, name) in classes.names().iter().enumerate() {
            info!("Extracting data of class: {name}");

            let mut videos = fs::read_dir(root.join(name))?
                .map(|entry| entry.map(|entry| entry.path()))
                .collect::<std::io::Result<Vec<_>>>()?;
            videos.sort();

            for path in videos {
                match self.sampler.sample(&path) {
                    Ok(frames) => dataset.push(frames, label, path),
                    Err(err) => {
                        warn!("skipping {}: {err}", path.display());
                        skipped.push(SkippedVideo {
                            path,
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        Ok(BuildReport { dataset, skipped })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::vol::Shape;

    fn dataset(n: usize) -> Dataset {
        let mut dataset = Dataset::new(ClassLabels::new(["a", "b"]));
        for i in 0..n {
            dataset.push(
                Vol::with_constant(Shape::new(1, 1, 1, 1), i as Float),
                i % 2,
                PathBuf::from(format!("clip_{i}")),
            );
        }
        dataset
    }

    #[test]
    fn class_labels_are_sorted_and_unique() {
        let classes = ClassLabels::new(["Walk", "Run", "Walk", "Jump"]);
        assert_eq!(classes.names(), &["Jump", "Run", "Walk"]);
        assert_eq!(classes.index_of("Run"), Some(1));
        assert_eq!(classes.index_of("Swim"), None);
    }

    #[test]
    fn class_labels_from_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("Walk")).unwrap();
        fs::create_dir(dir.path().join("Run")).unwrap();
        fs::create_dir(dir.path().join(".cache")).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let classes = ClassLabels::from_dir(dir.path()).unwrap();
        assert_eq!(classes.names(), &["Run", "Walk"]);

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            ClassLabels::from_dir(empty.path()),
            Err(Error::EmptyDataset(_))
        ));
    }

    #[test]
    fn split_is_a_ceil_fraction_partition() {
        for n in [2, 5, 10, 11, 37] {
            let (train, test) = train_test_indices(n, 0.2, 27);
            assert_eq!(test.len(), ((n as f64) * 0.2).ceil() as usize);
            assert_eq!(train.len() + test.len(), n);

            let all: HashSet<usize> = train.iter().chain(&test).copied().collect();
            assert_eq!(all.len(), n);
        }
        assert_eq!(train_test_indices(10, 0.2, 27).1.len(), 2);
    }

    #[test]
    fn split_is_repeatable() {
        assert_eq!(train_test_indices(30, 0.2, 27), train_test_indices(30, 0.2, 27));
        assert_ne!(train_test_indices(30, 0.2, 27), train_test_indices(30, 0.2, 28));
    }

    #[test]
    fn split_moves_samples_with_their_labels() {
        let (train, test) = dataset(10).split(0.2, 27).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);

        for part in [&train, &test] {
            assert_eq!(part.features().len(), part.labels().len());
            assert_eq!(part.paths().len(), part.labels().len());
            for ((features, &label), path) in
                part.features().iter().zip(part.labels()).zip(part.paths())
            {
                let i = features.w[0] as usize;
                assert_eq!(label, i % 2);
                assert_eq!(path, &PathBuf::from(format!("clip_{i}")));
            }
        }
    }

    #[test]
    fn split_needs_two_samples() {
        assert!(matches!(
            dataset(1).split(0.2, 27),
            Err(Error::EmptyPartition("train"))
        ));
    }

    #[test]
    fn one_hot_labels_follow_class_count() {
        assert_eq!(
            dataset(3).one_hot_labels(),
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]]
        );
    }
}
