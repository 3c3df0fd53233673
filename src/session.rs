use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use indexmap::IndexMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::LoadError;
use crate::models::{AutoUrl, Browser, Entity, FileType, Protocol, Settings};

/// Capacity of the change-notification channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Which of the four entity collections an id or event refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Browser,
    Protocol,
    FileType,
    AutoUrl,
}

/// Transient, session-local handle to an entity.
///
/// The index is the insertion position within the current session; the
/// generation is bumped on every [`EditingSession::load`], so a handle kept
/// across a reload never aliases a different entity.
pub struct EntryId<T> {
    index: u32,
    generation: u32,
    _kind: PhantomData<fn() -> T>,
}

impl<T> EntryId<T> {
    fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _kind: PhantomData,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl<T> Clone for EntryId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EntryId<T> {}

impl<T> PartialEq for EntryId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for EntryId<T> {}

impl<T> Hash for EntryId<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for EntryId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({}@{})", self.index, self.generation)
    }
}

/// Direction for [`EditingSession::move_auto_url`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Typed change notification for whatever UI renders the session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Loaded,
    Added { kind: EntityKind, index: u32 },
    Updated { kind: EntityKind, index: u32 },
    Deleted { kind: EntityKind, index: u32 },
    Reordered { index: u32, direction: Direction },
    DefaultBrowserChanged(Uuid),
    SettingsChanged,
    Committed,
}

/// One insertion-ordered collection of entities keyed by transient index.
#[derive(Debug, Clone)]
pub struct EntityTable<T> {
    entries: IndexMap<u32, T>,
    next_index: u32,
}

impl<T> Default for EntityTable<T> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
            next_index: 0,
        }
    }
}

impl<T: Clone> EntityTable<T> {
    fn reset(&mut self, items: &[T]) {
        self.entries.clear();
        for (i, item) in items.iter().enumerate() {
            self.entries.insert(i as u32, item.clone());
        }
        self.next_index = items.len() as u32;
    }

    fn push(&mut self, item: T) -> u32 {
        let index = self.next_index;
        self.entries.insert(index, item);
        self.next_index += 1;
        index
    }

    fn values(&self) -> Vec<T> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ties an entity type to its table in the session and its list in the
/// settings aggregate.
pub trait SessionEntity: Entity + Sized + 'static {
    const KIND: EntityKind;

    fn table(session: &EditingSession) -> &EntityTable<Self>;
    fn table_mut(session: &mut EditingSession) -> &mut EntityTable<Self>;
    fn stored(settings: &Settings) -> &[Self];
    fn stored_mut(settings: &mut Settings) -> &mut Vec<Self>;

    /// Whether writing this entity should make it the default browser.
    fn claims_default(&self) -> bool {
        false
    }

    /// Adjusts a duplicate before it is inserted.
    fn prepare_clone(&mut self) {}
}

macro_rules! session_entity {
    ($ty:ty, $kind:ident, $field:ident) => {
        impl SessionEntity for $ty {
            const KIND: EntityKind = EntityKind::$kind;

            fn table(session: &EditingSession) -> &EntityTable<Self> {
                &session.$field
            }

            fn table_mut(session: &mut EditingSession) -> &mut EntityTable<Self> {
                &mut session.$field
            }

            fn stored(settings: &Settings) -> &[Self] {
                &settings.$field
            }

            fn stored_mut(settings: &mut Settings) -> &mut Vec<Self> {
                &mut settings.$field
            }
        }
    };
}

impl SessionEntity for Browser {
    const KIND: EntityKind = EntityKind::Browser;

    fn table(session: &EditingSession) -> &EntityTable<Self> {
        &session.browsers
    }

    fn table_mut(session: &mut EditingSession) -> &mut EntityTable<Self> {
        &mut session.browsers
    }

    fn stored(settings: &Settings) -> &[Self] {
        &settings.browsers
    }

    fn stored_mut(settings: &mut Settings) -> &mut Vec<Self> {
        &mut settings.browsers
    }

    fn claims_default(&self) -> bool {
        self.is_default
    }

    fn prepare_clone(&mut self) {
        self.is_default = false;
    }
}

session_entity!(Protocol, Protocol, protocols);
session_entity!(FileType, FileType, file_types);
session_entity!(AutoUrl, AutoUrl, auto_urls);

/// Revertible mutation surface over a [`Settings`] aggregate.
///
/// Entities live in per-kind tables keyed by transient index until
/// [`commit`](Self::commit) flushes them back into the aggregate's ordered
/// lists. Not thread-safe by design; one session belongs to one UI thread.
pub struct EditingSession {
    settings: Settings,
    generation: u32,
    browsers: EntityTable<Browser>,
    protocols: EntityTable<Protocol>,
    file_types: EntityTable<FileType>,
    auto_urls: EntityTable<AutoUrl>,
    modified: bool,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for EditingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl EditingSession {
    /// Creates an empty session over default settings.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            settings: Settings::default(),
            generation: 0,
            browsers: EntityTable::default(),
            protocols: EntityTable::default(),
            file_types: EntityTable::default(),
            auto_urls: EntityTable::default(),
            modified: false,
            events,
        }
    }

    /// Creates a session already loaded with `settings`.
    pub fn with_settings(settings: Settings) -> Self {
        let mut session = Self::new();
        session.load(settings);
        session
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Replaces everything in the session with `settings`.
    ///
    /// Entities get contiguous indices `0..N` in persisted order and every
    /// previously issued [`EntryId`] becomes stale.
    pub fn load(&mut self, settings: Settings) {
        self.generation = self.generation.wrapping_add(1);
        self.browsers.reset(&settings.browsers);
        self.protocols.reset(&settings.protocols);
        self.file_types.reset(&settings.file_types);
        self.auto_urls.reset(&settings.auto_urls);
        self.settings = settings;
        self.modified = false;
        self.emit(SessionEvent::Loaded);
    }

    /// Loads the result of a persistence read, starting from an empty
    /// aggregate when the read failed. The error is handed back so the
    /// caller can tell the user.
    pub fn load_or_default(&mut self, loaded: Result<Settings, LoadError>) -> Result<(), LoadError> {
        match loaded {
            Ok(settings) => {
                self.load(settings);
                Ok(())
            }
            Err(e) => {
                log::warn!("Starting from empty settings: {}", e);
                self.load(Settings::default());
                Err(e)
            }
        }
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Clears the modified flag once the committed aggregate is persisted.
    pub fn mark_saved(&mut self) {
        self.modified = false;
    }

    fn id<T>(&self, index: u32) -> EntryId<T> {
        EntryId::new(index, self.generation)
    }

    fn live_index<T>(&self, id: EntryId<T>) -> Option<u32> {
        (id.generation == self.generation).then_some(id.index)
    }

    /// Adds an entity at the end of its table, minting a Guid if it has none.
    pub fn add<T: SessionEntity>(&mut self, mut entity: T) -> EntryId<T> {
        let guid = entity.ensure_guid();
        let claims_default = entity.claims_default();
        let index = T::table_mut(self).push(entity);
        self.modified = true;
        self.emit(SessionEvent::Added { kind: T::KIND, index });
        if claims_default {
            self.apply_default(guid);
        }
        self.id(index)
    }

    pub fn get<T: SessionEntity>(&self, id: EntryId<T>) -> Option<&T> {
        let index = self.live_index(id)?;
        T::table(self).entries.get(&index)
    }

    /// Replaces the entity behind `id`, keeping its original Guid.
    ///
    /// Returns `false` and changes nothing when `id` is absent or stale.
    pub fn update<T: SessionEntity>(&mut self, id: EntryId<T>, mut entity: T) -> bool {
        let Some(index) = self.live_index(id) else {
            return false;
        };
        let Some(slot) = T::table_mut(self).entries.get_mut(&index) else {
            log::debug!("Ignoring update of missing {:?} {}", T::KIND, index);
            return false;
        };
        let guid = slot.guid();
        let was_default = slot.claims_default();
        entity.set_guid(guid);
        let claims_default = entity.claims_default();
        *slot = entity;
        self.modified = true;
        self.emit(SessionEvent::Updated { kind: T::KIND, index });
        if claims_default {
            self.apply_default(guid);
        } else if was_default && self.settings.default_browser_guid == guid {
            // Unticking the default leaves no default browser.
            self.apply_default(Uuid::nil());
        }
        true
    }

    /// Removes the entity behind `id`, preserving the order of the rest.
    pub fn delete<T: SessionEntity>(&mut self, id: EntryId<T>) -> Option<T> {
        let index = self.live_index(id)?;
        let removed = T::table_mut(self).entries.shift_remove(&index)?;
        self.modified = true;
        self.emit(SessionEvent::Deleted { kind: T::KIND, index });
        Some(removed)
    }

    /// Duplicates the entity behind `id` under a fresh Guid and appends it.
    pub fn duplicate<T: SessionEntity>(&mut self, id: EntryId<T>) -> Option<EntryId<T>> {
        let mut copy = self.get(id)?.clone();
        copy.set_guid(Uuid::new_v4());
        copy.prepare_clone();
        Some(self.add(copy))
    }

    /// Iterates a table in its current order.
    pub fn entries<'a, T: SessionEntity + 'a>(
        &'a self,
    ) -> impl Iterator<Item = (EntryId<T>, &'a T)> + 'a {
        let generation = self.generation;
        T::table(self)
            .entries
            .iter()
            .map(move |(index, entity)| (EntryId::new(*index, generation), entity))
    }

    /// Finds the live id of the entity with the given Guid.
    pub fn find<T: SessionEntity>(&self, guid: Uuid) -> Option<EntryId<T>> {
        self.entries::<T>()
            .find(|(_, entity)| entity.guid() == guid)
            .map(|(id, _)| id)
    }

    pub fn len<T: SessionEntity>(&self) -> usize {
        T::table(self).len()
    }

    /// Swaps a URL pattern with its neighbour. No-op at either end.
    pub fn move_auto_url(&mut self, id: EntryId<AutoUrl>, direction: Direction) -> bool {
        let Some(index) = self.live_index(id) else {
            return false;
        };
        let entries = &mut self.auto_urls.entries;
        let Some(position) = entries.get_index_of(&index) else {
            return false;
        };
        let neighbour = match direction {
            Direction::Up if position > 0 => position - 1,
            Direction::Down if position + 1 < entries.len() => position + 1,
            _ => return false,
        };
        entries.swap_indices(position, neighbour);
        self.modified = true;
        self.emit(SessionEvent::Reordered { index, direction });
        true
    }

    /// Makes the browser behind `id` the single default.
    pub fn set_default_browser(&mut self, id: EntryId<Browser>) -> bool {
        let Some(guid) = self.get(id).map(|b| b.guid) else {
            return false;
        };
        self.apply_default(guid);
        self.modified = true;
        true
    }

    fn apply_default(&mut self, guid: Uuid) {
        for browser in self.browsers.entries.values_mut() {
            browser.is_default = browser.guid == guid;
        }
        self.settings.default_browser_guid = guid;
        self.emit(SessionEvent::DefaultBrowserChanged(guid));
    }

    /// Read access to the scalar settings held by the session.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Mutates scalar settings. Entity lists on the aggregate are
    /// overwritten by [`commit`](Self::commit), so edit entities through
    /// the typed operations instead.
    pub fn update_settings<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Settings),
    {
        f(&mut self.settings);
        self.modified = true;
        self.emit(SessionEvent::SettingsChanged);
    }

    /// Writes every table back into the aggregate in table order and returns
    /// a snapshot of it. The modified flag is left for the caller to clear
    /// after a successful save.
    pub fn commit(&mut self) -> Settings {
        self.flush::<Browser>();
        self.flush::<Protocol>();
        self.flush::<FileType>();
        self.flush::<AutoUrl>();
        self.emit(SessionEvent::Committed);
        self.settings.clone()
    }

    fn flush<T: SessionEntity>(&mut self) {
        let values = T::table(self).values();
        *T::stored_mut(&mut self.settings) = values;
    }

    /// Entities currently persisted on the aggregate (before commit).
    pub fn stored<T: SessionEntity>(&self) -> &[T] {
        T::stored(&self.settings)
    }
}
