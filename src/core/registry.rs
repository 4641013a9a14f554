use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::constants::build_extractor_id;

/// Key extraction function for secondary indexes.
///
/// Receives the stored value and the index's `user_data` blob (`None` when
/// the blob is empty). Returning `None` skips the entry, which is how sparse
/// indexes leave values out. The function must depend only on its inputs.
pub type KeyExtractor = Arc<dyn Fn(&[u8], Option<&[u8]>) -> Option<Vec<u8>> + Send + Sync>;

/// Per-database map from extractor id to extraction function.
#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: RwLock<HashMap<u64, KeyExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: RwLock::new(HashMap::new()),
        }
    }

    /// Bind `extractor` to `(version << 32) | flags` and return that id.
    ///
    /// Re-registering an id replaces the previous binding.
    pub fn register(&self, version: u32, flags: u32, extractor: KeyExtractor) -> u64 {
        let id = build_extractor_id(version, flags);
        self.extractors.write().insert(id, extractor);
        id
    }

    pub fn lookup(&self, extractor_id: u64) -> Option<KeyExtractor> {
        self.extractors.read().get(&extractor_id).cloned()
    }

    pub fn contains(&self, extractor_id: u64) -> bool {
        self.extractors.read().contains_key(&extractor_id)
    }

    pub fn len(&self) -> usize {
        self.extractors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<u64> = self.extractors.read().keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("ExtractorRegistry")
            .field("extractor_ids", &ids)
            .finish()
    }
}
