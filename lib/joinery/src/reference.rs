//! Reference url sets for the semi-join mappers.
//!
//! A source is read in full at task setup, once per map task, and turned into
//! that task's immutable membership state.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::bloom::{BloomConfig, BloomFilter};
use crate::error::JoinError;
use crate::io::{list_files_recursive, read_container_values};
use crate::record::Any;

#[derive(Clone, Debug)]
pub enum ReferenceSource {
    /// A container file, or a directory of them, holding `Any` url records.
    File(PathBuf),
    Inline(Arc<[String]>),
}

impl ReferenceSource {
    pub fn file(path: impl Into<PathBuf>) -> Self { ReferenceSource::File(path.into()) }

    pub fn inline<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ReferenceSource::Inline(urls.into_iter().map(Into::into).collect())
    }

    /// Every url in the source, in stored order. Non-url records are ignored.
    pub fn load_urls(&self) -> Result<Vec<String>, JoinError> {
        match self {
            ReferenceSource::Inline(urls) => Ok(urls.to_vec()),
            ReferenceSource::File(path) => {
                let files = list_files_recursive(path)?;
                if files.is_empty() {
                    return Err(JoinError::Config(format!("reference set {} has no files", path.display())));
                }
                let mut urls = Vec::new();
                for file in files {
                    urls.extend(read_container_values(&file)?.into_iter().filter_map(|v: Any| v.url));
                }
                debug!(path = %path.display(), urls = urls.len(), "loaded reference urls");
                Ok(urls)
            }
        }
    }

    pub fn load_sorted(&self) -> Result<SortedUrls, JoinError> {
        let sorted = SortedUrls::new(self.load_urls()?);
        debug!(distinct = sorted.len(), "built sorted reference list");
        Ok(sorted)
    }

    pub fn load_bloom(&self, config: BloomConfig) -> Result<BloomFilter, JoinError> {
        let mut filter = BloomFilter::from_config(config)?;
        let urls = self.load_urls()?;
        for url in &urls {
            filter.add(url.as_bytes());
        }
        debug!(urls = urls.len(), num_bits = filter.num_bits(), num_hashes = filter.num_hashes(),
               bits_set = filter.bits_set(), est_fp_rate = filter.estimated_fp_rate(urls.len()),
               "built reference bloom filter");
        Ok(filter)
    }
}

/// Sorted, deduplicated urls; membership by binary search.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SortedUrls(Vec<String>);

impl SortedUrls {
    pub fn new(mut urls: Vec<String>) -> Self {
        urls.sort_unstable();
        urls.dedup();
        Self(urls)
    }

    pub fn contains(&self, url: &str) -> bool { self.0.binary_search_by(|u| u.as_str().cmp(url)).is_ok() }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn as_slice(&self) -> &[String] { &self.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::write_container;
    use crate::record::{Session, User};

    #[test]
    fn sorted_urls_dedup_and_search() {
        let urls = SortedUrls::new(vec!["b".into(), "a".into(), "b".into()]);
        assert_eq!(urls.as_slice(), &["a".to_string(), "b".to_string()]);
        assert!(urls.contains("a"));
        assert!(!urls.contains("c"));
        assert!(!SortedUrls::default().contains(""));
    }

    #[test]
    fn file_source_keeps_only_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.jnr");
        let values = vec![Any::url("a"), Any::user(User::new(1, vec![])), Any::session(Session::new(1, "z", vec![])), Any::url("b")];
        write_container(&path, &values).unwrap();
        let source = ReferenceSource::file(&path);
        assert_eq!(source.load_urls().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert!(ReferenceSource::file(dir.path()).load_sorted().unwrap().contains("b"));
    }

    #[test]
    fn missing_reference_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = ReferenceSource::file(dir.path().join("absent"));
        assert!(matches!(source.load_urls(), Err(JoinError::Io(_))));
        assert!(matches!(ReferenceSource::file(dir.path()).load_urls(), Err(JoinError::Config(_))));
    }

    #[test]
    fn bloom_holds_every_reference_url() {
        let source = ReferenceSource::inline(["a", "b", "c"]);
        let filter = source.load_bloom(BloomConfig { num_bits: 4096, num_hashes: 4 }).unwrap();
        for url in ["a", "b", "c"] {
            assert!(filter.contains(url.as_bytes()));
        }
        assert!(source.load_bloom(BloomConfig { num_bits: 0, num_hashes: 4 }).is_err());
    }
}
