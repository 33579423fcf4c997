use super::{ResourceClient, ResourceError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

/// Serves byte buffers registered under a url. Clones share the same storage.
#[derive(Clone, Debug, Default)]
pub struct MemoryClient {
    resources: Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), Arc::new(bytes));
    }

    pub fn remove(&self, url: &str) -> bool {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url)
            .is_some()
    }

    fn lookup(&self, url: &str) -> Result<Arc<Vec<u8>>, ResourceError> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(url.to_string()))
    }
}

#[async_trait]
impl ResourceClient for MemoryClient {
    async fn get(
        &self,
        url: &str,
        _headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        Ok(self.lookup(url)?.as_ref().clone())
    }

    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: usize,
        _headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        let bytes = self.lookup(url)?;
        let out_of_range = || ResourceError::OutOfRange {
            url: url.to_string(),
            offset,
            length,
        };
        let start = usize::try_from(offset).map_err(|_| out_of_range())?;
        let end = start.checked_add(length).ok_or_else(out_of_range)?;
        bytes.get(start..end).map(<[u8]>::to_vec).ok_or_else(out_of_range)
    }
}
