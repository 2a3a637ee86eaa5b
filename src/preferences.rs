//! The small preference record kept between visits.

use std::{cell::RefCell, collections::HashMap};

use serde::{Deserialize, Serialize};

/// Storage key of the serialized [`Preferences`].
pub const PREFERENCES_KEY: &str = "flow-folio:preferences";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    /// Forces reduced motion on or off regardless of the platform setting.
    pub reduced_motion_override: Option<bool>,
    /// Section ids in order of first visit.
    pub visited_sections: Vec<String>,
    /// Milliseconds since the Unix epoch.
    pub last_visit: Option<u64>,
}

impl Preferences {
    /// Read the record, falling back to defaults if it is missing or unreadable.
    pub fn load(store: &dyn PreferenceStore) -> Self {
        let Some(raw) = store.get(PREFERENCES_KEY) else {
            return Self::default();
        };
        match serde_json::from_str(&raw) {
            Ok(preferences) => preferences,
            Err(e) => {
                log::warn!("Ignoring unreadable preferences: {e}");
                Self::default()
            }
        }
    }

    pub fn save(&self, store: &dyn PreferenceStore) -> anyhow::Result<()> {
        store.set(PREFERENCES_KEY, &serde_json::to_string(self)?)
    }

    pub fn record_visit(&mut self, section: &str, now_millis: u64) {
        if !self.visited_sections.iter().any(|s| s == section) {
            self.visited_sections.push(section.to_string());
        }
        self.last_visit = Some(now_millis);
    }
}

/// Key-value storage the preferences live in.
pub trait PreferenceStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// Storage that lasts as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    values: RefCell<HashMap<String, String>>,
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values.borrow_mut().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// The browser's `localStorage`.
#[cfg(target_arch = "wasm32")]
pub struct LocalStorage {
    storage: web_sys::Storage,
}

#[cfg(target_arch = "wasm32")]
impl LocalStorage {
    pub fn new() -> anyhow::Result<Self> {
        let storage = web_sys::window()
            .and_then(|window| window.local_storage().ok().flatten())
            .ok_or_else(|| anyhow::anyhow!("localStorage is not available"))?;
        Ok(Self { storage })
    }
}

#[cfg(target_arch = "wasm32")]
impl PreferenceStore for LocalStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.storage.get_item(key).ok().flatten()
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.storage
            .set_item(key, value)
            .map_err(|e| anyhow::anyhow!("localStorage write failed: {e:?}"))
    }
}

/// The store matching the current platform.
pub fn platform_store() -> Box<dyn PreferenceStore> {
    #[cfg(target_arch = "wasm32")]
    {
        match LocalStorage::new() {
            Ok(storage) => return Box::new(storage),
            Err(e) => log::warn!("{e}, preferences will not persist"),
        }
    }
    Box::new(MemoryStore::default())
}

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    #[cfg(target_arch = "wasm32")]
    {
        web_sys::window()
            .and_then(|window| window.performance())
            .map(|performance| (performance.time_origin() + performance.now()) as u64)
            .unwrap_or(0)
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}
