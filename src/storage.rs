use std::collections::HashMap;

use anyhow::anyhow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageScope {
    Session,
    Local,
}

/// A web storage area. Access can be revoked to mirror pages that throw on
/// storage access (sandboxed frames, disabled cookies).
#[derive(Debug, Clone)]
pub struct Storage {
    scope: StorageScope,
    available: bool,
    entries: HashMap<String, String>,
}

impl Storage {
    pub fn new(scope: StorageScope) -> Self {
        Self {
            scope,
            available: true,
            entries: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    fn check_access(&self) -> anyhow::Result<()> {
        if !self.available {
            return Err(anyhow!("Access to {:?} storage is denied", self.scope));
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.check_access()?;
        Ok(self.entries.get(key).cloned())
    }

    pub fn set(&mut self, key: &str, value: String) -> anyhow::Result<()> {
        self.check_access()?;
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}
