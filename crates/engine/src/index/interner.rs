use std::collections::HashSet;
use std::sync::Arc;

/// Deduplicates strings during an index build so repeated values (tag
/// names, group DNs, ids) share one allocation.
#[derive(Debug, Default)]
pub struct Interner {
    strings: HashSet<Arc<str>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, value: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(value) {
            return Arc::clone(existing);
        }
        let value: Arc<str> = Arc::from(value);
        self.strings.insert(Arc::clone(&value));
        value
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
