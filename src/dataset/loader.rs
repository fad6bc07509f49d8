//! Image Folder Scanner
//!
//! Scans one dataset partition laid out as `root/<class_name>/<image>` into an
//! ordered sample list. Classes follow the configured order and files within a
//! class are sorted by name, so two scans of the same tree always agree.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::utils::error::{PipelineError, Result};

/// File extensions recognised as images
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// A single image sample with its label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label index into the configured class list
    pub label: usize,
}

/// One scanned partition (train, val or test)
#[derive(Debug, Clone)]
pub struct ImageFolder {
    /// Root directory of the partition
    pub root_dir: PathBuf,
    /// All samples, class-major then by file name
    pub samples: Vec<ImageSample>,
    /// Class names, index-aligned with labels
    pub class_names: Vec<String>,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

impl ImageFolder {
    /// Scan a partition root and validate it against the class list
    ///
    /// The directory should be structured as:
    /// ```text
    /// root_dir/
    /// ├── melanoma/
    /// │   ├── isic_0001.jpg
    /// │   └── isic_0002.jpg
    /// ├── benign_nevi/
    /// │   └── ...
    /// └── ...
    /// ```
    pub fn scan<P: AsRef<Path>>(root_dir: P, class_names: &[String]) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        debug!("Scanning image folder: {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(PipelineError::DataSource(format!(
                "dataset directory does not exist: {}",
                root_dir.display()
            )));
        }

        let known: HashSet<&str> = class_names.iter().map(String::as_str).collect();
        for entry in std::fs::read_dir(&root_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !known.contains(name.as_str()) {
                return Err(PipelineError::DataSource(format!(
                    "{} contains class directory '{}' which is not in the class list",
                    root_dir.display(),
                    name
                )));
            }
        }

        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let class_dir = root_dir.join(class_name);
            if !class_dir.is_dir() {
                return Err(PipelineError::DataSource(format!(
                    "{} has no subdirectory for class '{}'",
                    root_dir.display(),
                    class_name
                )));
            }

            let before = samples.len();
            for entry in WalkDir::new(&class_dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() && is_image(entry.path()) {
                    samples.push(ImageSample {
                        path: entry.path().to_path_buf(),
                        label,
                    });
                }
            }

            let count = samples.len() - before;
            if count == 0 {
                warn!("Class '{}' has no images in {:?}", class_name, root_dir);
            }
            debug!("Class '{}' (label {}): {} samples", class_name, label, count);
        }

        if samples.is_empty() {
            return Err(PipelineError::DataSource(format!(
                "{} contains no images",
                root_dir.display()
            )));
        }

        info!("Scanned {} samples from {:?}", samples.len(), root_dir);

        Ok(Self {
            root_dir,
            samples,
            class_names: class_names.to_vec(),
        })
    }

    /// Get the number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the partition is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get the number of classes
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Samples per class, index-aligned with the class list
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.num_classes()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }

    /// Get statistics about the partition
    pub fn stats(&self, partition: &str) -> DatasetStats {
        DatasetStats {
            partition: partition.to_string(),
            total_samples: self.samples.len(),
            class_counts: self.class_counts(),
            class_names: self.class_names.clone(),
        }
    }
}

/// Statistics about one partition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub partition: String,
    pub total_samples: usize,
    pub class_counts: Vec<usize>,
    pub class_names: Vec<String>,
}

impl DatasetStats {
    /// Print statistics to console
    pub fn print(&self) {
        println!("\n📊 {} partition:", self.partition);
        println!("  Total samples: {}", self.total_samples);
        println!("  Samples per class:");

        for (idx, (name, count)) in self.class_names.iter().zip(&self.class_counts).enumerate() {
            let bar_len = if self.total_samples > 0 {
                (*count as f32 / self.total_samples as f32 * 40.0) as usize
            } else {
                0
            };
            let bar: String = "█".repeat(bar_len);
            println!("    {:2}. {:28} {:6} {}", idx, name, count, bar);
        }
    }
}
