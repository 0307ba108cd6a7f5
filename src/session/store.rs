//! Persisted token slots and change notifications between clients.
//!
//! A [`TokenStore`] is the local equivalent of the browser's storage area.
//! Changes made by *other* clients sharing the same backing (another
//! process using the same directory, another in-process handle) are
//! delivered as [`StorageEvent`]s on an mpsc channel, which the session
//! manager consumes without knowing which backing produced them.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

pub const ACCESS_TOKEN_SLOT: &str = "access_token";
pub const REFRESH_TOKEN_SLOT: &str = "refresh_token";
/// Slot names used by earlier client versions; cleared on restore and logout
pub const LEGACY_SLOTS: &[&str] = &["token", "authToken", "jwt"];

const STORE_FILE_NAME: &str = "session.json";
const EVENT_CHANNEL_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("token store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Named string slots that survive process restarts
pub trait TokenStore: Send + Sync {
    fn load(&self, slot: &str) -> Result<Option<String>>;
    fn save(&self, slot: &str, value: &str) -> Result<()>;
    fn remove(&self, slot: &str) -> Result<()>;
}

/// A slot changed somewhere else; `new_value` is `None` when it was removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub slot: String,
    pub new_value: Option<String>,
}

type SlotMap = BTreeMap<String, String>;

/// What this handle knows about the file
#[derive(Debug, Default)]
struct Seen {
    /// Contents as of this handle's last write or poll
    slots: SlotMap,
    /// Foreign changes found while writing, not yet handed to the poller.
    /// Latest value per slot.
    pending: BTreeMap<String, Option<String>>,
}

impl Seen {
    /// Take in the file's current contents and return every foreign change
    /// since the last poll, pending ones included
    fn catch_up(&mut self, current: SlotMap) -> Vec<StorageEvent> {
        self.queue(&current);
        self.slots = current;
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(slot, new_value)| StorageEvent { slot, new_value })
            .collect()
    }

    fn queue(&mut self, current: &SlotMap) {
        for event in diff_slots(&self.slots, current) {
            self.pending.insert(event.slot, event.new_value);
        }
    }
}

/// JSON map of slots in `<dir>/session.json`, shared by every process using `<dir>`
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
    seen: Arc<Mutex<Seen>>,
}

impl FileTokenStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(STORE_FILE_NAME);
        let current = read_slots(&path)?;
        debug!(path = %path.display(), slots = current.len(), "Opened token store");

        Ok(Self {
            path,
            seen: Arc::new(Mutex::new(Seen {
                slots: current,
                pending: BTreeMap::new(),
            })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut SlotMap) -> bool,
    {
        let mut seen = self.seen.lock().map_err(|_| StoreError::Poisoned)?;
        let mut slots = read_slots(&self.path)?;
        // Whatever changed since the last poll was someone else's doing.
        seen.queue(&slots);
        let before = slots.clone();
        if apply(&mut slots) {
            write_slots(&self.path, &slots)?;
            // Our write supersedes a foreign change to the same slot.
            for event in diff_slots(&before, &slots) {
                seen.pending.remove(&event.slot);
            }
        }
        seen.slots = slots;
        Ok(())
    }

    /// Poll the file for changes written by other processes.
    ///
    /// The poller stops when the returned receiver is dropped.
    pub fn watch(&self, every: Duration) -> (mpsc::Receiver<StorageEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let path = self.path.clone();
        let seen = Arc::clone(&self.seen);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }

                let events = match poll_changes(&path, &seen) {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Token store poll failed");
                        continue;
                    }
                };

                for event in events {
                    debug!(slot = %event.slot, removed = event.new_value.is_none(), "External token store change");
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });

        (rx, handle)
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self, slot: &str) -> Result<Option<String>> {
        Ok(read_slots(&self.path)?.remove(slot))
    }

    fn save(&self, slot: &str, value: &str) -> Result<()> {
        self.update(|slots| {
            slots.insert(slot.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, slot: &str) -> Result<()> {
        self.update(|slots| slots.remove(slot).is_some())
    }
}

fn poll_changes(path: &Path, seen: &Mutex<Seen>) -> Result<Vec<StorageEvent>> {
    let mut seen = seen.lock().map_err(|_| StoreError::Poisoned)?;
    let current = read_slots(path)?;
    Ok(seen.catch_up(current))
}

fn diff_slots(before: &SlotMap, after: &SlotMap) -> Vec<StorageEvent> {
    let mut events = Vec::new();
    for (slot, old) in before {
        match after.get(slot) {
            None => events.push(StorageEvent {
                slot: slot.clone(),
                new_value: None,
            }),
            Some(new) if new != old => events.push(StorageEvent {
                slot: slot.clone(),
                new_value: Some(new.clone()),
            }),
            Some(_) => {}
        }
    }
    for (slot, new) in after {
        if !before.contains_key(slot) {
            events.push(StorageEvent {
                slot: slot.clone(),
                new_value: Some(new.clone()),
            });
        }
    }
    events
}

/// A missing, empty or unreadable-as-JSON file holds no slots
fn read_slots(path: &Path) -> Result<SlotMap> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SlotMap::new()),
        Err(e) => return Err(e.into()),
    };
    if raw.trim().is_empty() {
        return Ok(SlotMap::new());
    }
    match serde_json::from_str(&raw) {
        Ok(slots) => Ok(slots),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Token store is corrupt, treating as empty");
            Ok(SlotMap::new())
        }
    }
}

/// Replace the file atomically. The temp file is unique per write and
/// created owner-only, so the token is never readable by other users.
fn write_slots(path: &Path, slots: &SlotMap) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&serde_json::to_vec_pretty(slots)?)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// In-process backing shared by several [`MemoryTokenStore`] handles
#[derive(Clone)]
pub struct MemoryStorage {
    slots: Arc<Mutex<HashMap<String, String>>>,
    events: broadcast::Sender<(Uuid, StorageEvent)>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// A new client view over this storage
    pub fn handle(&self) -> MemoryTokenStore {
        MemoryTokenStore {
            id: Uuid::new_v4(),
            storage: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MemoryTokenStore {
    id: Uuid,
    storage: MemoryStorage,
}

impl MemoryTokenStore {
    /// Changes made through other handles of the same storage
    pub fn events(&self) -> mpsc::Receiver<StorageEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let mut source = self.storage.events.subscribe();
        let own_id = self.id;

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok((origin, _)) if origin == own_id => continue,
                    Ok((_, event)) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Storage event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        rx
    }

    fn publish(&self, slot: &str, new_value: Option<String>) {
        // No subscribers is fine.
        let _ = self.storage.events.send((
            self.id,
            StorageEvent {
                slot: slot.to_string(),
                new_value,
            },
        ));
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self, slot: &str) -> Result<Option<String>> {
        let slots = self.storage.slots.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(slots.get(slot).cloned())
    }

    fn save(&self, slot: &str, value: &str) -> Result<()> {
        {
            let mut slots = self.storage.slots.lock().map_err(|_| StoreError::Poisoned)?;
            slots.insert(slot.to_string(), value.to_string());
        }
        self.publish(slot, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, slot: &str) -> Result<()> {
        let removed = {
            let mut slots = self.storage.slots.lock().map_err(|_| StoreError::Poisoned)?;
            slots.remove(slot).is_some()
        };
        if removed {
            self.publish(slot, None);
        }
        Ok(())
    }
}
