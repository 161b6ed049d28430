use super::Splitter;
use crate::mapreduce::types::WorkItem;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

type PathPredicate = Box<dyn Fn(&Path) -> bool + Send + Sync>;
type IdGenerator = Box<dyn Fn(&Path, usize) -> String + Send + Sync>;

/// A list of files plus optional context shared by every item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileInput {
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileWorkItemData {
    pub file_path: PathBuf,
    pub context: Option<Value>,
}

/// One work item per file
#[derive(Default)]
pub struct FileSplitter {
    filter: Option<PathPredicate>,
    id_generator: Option<IdGenerator>,
}

impl FileSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only files the predicate accepts
    pub fn with_filter(mut self, filter: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Generate ids from the file path and its index among the kept files
    pub fn with_id_generator(
        mut self,
        generator: impl Fn(&Path, usize) -> String + Send + Sync + 'static,
    ) -> Self {
        self.id_generator = Some(Box::new(generator));
        self
    }

    fn kept_files<'a>(&self, input: &'a FileInput) -> Vec<&'a PathBuf> {
        input
            .files
            .iter()
            .filter(|path| self.filter.as_ref().is_none_or(|f| f(path)))
            .collect()
    }
}

impl Splitter<FileInput, FileWorkItemData> for FileSplitter {
    fn split(&self, input: &FileInput) -> Vec<WorkItem<FileWorkItemData>> {
        let files = self.kept_files(input);
        let total = files.len();

        files
            .into_iter()
            .enumerate()
            .map(|(index, path)| {
                let id = match &self.id_generator {
                    Some(generate) => generate(path, index),
                    None => format!("file-{}", index),
                };
                WorkItem::new(
                    id,
                    FileWorkItemData {
                        file_path: path.clone(),
                        context: input.context.clone(),
                    },
                )
                .with_metadata("index", index)
                .with_metadata("totalFiles", total)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchedFileWorkItemData {
    pub file_paths: Vec<PathBuf>,
    pub context: Option<Value>,
}

/// Groups up to `batch_size` files per work item
pub struct BatchedFileSplitter {
    batch_size: usize,
    filter: Option<PathPredicate>,
}

impl BatchedFileSplitter {
    /// A `batch_size` of 0 is treated as 1
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl Splitter<FileInput, BatchedFileWorkItemData> for BatchedFileSplitter {
    fn split(&self, input: &FileInput) -> Vec<WorkItem<BatchedFileWorkItemData>> {
        let files: Vec<PathBuf> = input
            .files
            .iter()
            .filter(|path| self.filter.as_ref().is_none_or(|f| f(path)))
            .cloned()
            .collect();
        let total_batches = files.len().div_ceil(self.batch_size);

        files
            .chunks(self.batch_size)
            .enumerate()
            .map(|(batch_index, batch)| {
                WorkItem::new(
                    format!("batch-{}", batch_index),
                    BatchedFileWorkItemData {
                        file_paths: batch.to_vec(),
                        context: input.context.clone(),
                    },
                )
                .with_metadata("batchIndex", batch_index)
                .with_metadata("totalBatches", total_batches)
                .with_metadata("filesInBatch", batch.len())
            })
            .collect()
    }
}
