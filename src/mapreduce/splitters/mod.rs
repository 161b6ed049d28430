//! Splitters turn a domain input into an ordered sequence of work items
//!
//! Every splitter returns an empty vector for empty input and leaves its
//! input untouched.

mod chunk;
mod file;
mod rule;

pub use chunk::{ChunkInput, ChunkSplitter, ChunkStrategy, ChunkWorkItemData};
pub use file::{
    BatchedFileSplitter, BatchedFileWorkItemData, FileInput, FileSplitter, FileWorkItemData,
};
pub use rule::{load_rules_from_dir, parse_rule_file, Rule, RuleInput, RuleSplitter, RuleWorkItemData};

use crate::mapreduce::types::WorkItem;

/// Capability to split an input into work items
pub trait Splitter<I, D>: Send + Sync {
    fn split(&self, input: &I) -> Vec<WorkItem<D>>;
}

/// Splitter backed by a plain function
pub struct FnSplitter<F>(pub F);

impl<I, D, F> Splitter<I, D> for FnSplitter<F>
where
    F: Fn(&I) -> Vec<WorkItem<D>> + Send + Sync,
{
    fn split(&self, input: &I) -> Vec<WorkItem<D>> {
        (self.0)(input)
    }
}

/// Lowercase, alphanumeric-and-dash form of a name, usable as an id
pub(crate) fn sanitize_id(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            id.push(ch.to_ascii_lowercase());
        } else if !id.ends_with('-') {
            id.push('-');
        }
    }
    let trimmed = id.trim_matches('-');
    if trimmed.is_empty() {
        "item".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("No Console.Log"), "no-console-log");
        assert_eq!(sanitize_id("__weird__name__"), "weird-name");
        assert_eq!(sanitize_id("..."), "item");
    }

    #[test]
    fn test_fn_splitter() {
        let splitter = FnSplitter(|n: &usize| -> Vec<WorkItem<usize>> {
            (0..*n).map(|i| WorkItem::new(format!("n-{}", i), i)).collect()
        });
        let items = Splitter::<usize, usize>::split(&splitter, &3);
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].id, "n-2");
    }
}
