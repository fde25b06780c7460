//! Type-keyed state cache.

use dashmap::DashMap;
use machina_core::module::{Links, Module};
use machina_core::state::{AsAny, State};
use machina_core::StateMachine;
use std::any::{Any, TypeId};
use std::sync::Arc;
use tokio::sync::broadcast;

const CACHED_CAPACITY: usize = 64;

/// Keeps one instance per concrete state type so callers can retrieve a
/// previously visited state instead of constructing a fresh one.
///
/// The cache is keyed by the state's concrete [`TypeId`]; inserting a
/// second instance of the same type replaces the first. With `auto_cache`
/// (on by default) every transition target is cached as the transition
/// starts. Multi-link: one cache can back several machines; with
/// `auto_clear` (on by default) it empties once the last machine unlinks.
pub struct StateCacheModule {
    links: Links,
    auto_cache: bool,
    auto_clear: bool,
    states: DashMap<TypeId, Arc<dyn State>>,
    cached_tx: broadcast::Sender<Arc<dyn State>>,
}

impl StateCacheModule {
    pub fn new() -> Self {
        Self::with_flags(true, true)
    }

    pub fn with_flags(auto_cache: bool, auto_clear: bool) -> Self {
        let (cached_tx, _) = broadcast::channel(CACHED_CAPACITY);
        Self {
            links: Links::new(),
            auto_cache,
            auto_clear,
            states: DashMap::new(),
            cached_tx,
        }
    }

    /// Caches a state under its concrete type, replacing any previous
    /// instance of that type.
    pub fn cache(&self, state: Arc<dyn State>) {
        // Dispatch through the trait object: the key must be the concrete
        // state type, not the `Arc` wrapper's.
        let key = state.as_ref().as_any().type_id();
        self.states.insert(key, state.clone());
        let _ = self.cached_tx.send(state);
    }

    /// Typed insert convenience.
    pub fn insert<T: State>(&self, state: Arc<T>) {
        self.cache(state);
    }

    /// The cached instance of `T`, if any.
    pub fn get<T: State>(&self) -> Option<Arc<T>> {
        let state = self.states.get(&TypeId::of::<T>())?.clone();
        downcast_state(state)
    }

    /// The cached instance of `T`, constructing and caching a default one
    /// on a miss.
    pub fn get_or_add<T: State + Default>(&self) -> Arc<T> {
        if let Some(state) = self.get::<T>() {
            return state;
        }

        let state = Arc::new(T::default());
        self.cache(state.clone());
        state
    }

    pub fn contains<T: State>(&self) -> bool {
        self.states.contains_key(&TypeId::of::<T>())
    }

    /// Drops the cached instance of `T`, returning whether one existed.
    pub fn remove<T: State>(&self) -> bool {
        self.states.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn clear(&self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Notified with each state as it is cached.
    pub fn subscribe_cached(&self) -> broadcast::Receiver<Arc<dyn State>> {
        self.cached_tx.subscribe()
    }
}

fn downcast_state<T: State>(state: Arc<dyn State>) -> Option<Arc<T>> {
    let any: Arc<dyn Any + Send + Sync> = state.as_any_arc();
    any.downcast::<T>().ok()
}

impl Default for StateCacheModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for StateCacheModule {
    fn links(&self) -> &Links {
        &self.links
    }

    fn on_unlinked(&self, _machine: &StateMachine) {
        if self.auto_clear && !self.links.is_linked() {
            self.clear();
        }
    }

    fn on_state_pre_changed(&self, _machine: &StateMachine, target: &Arc<dyn State>) {
        if self.auto_cache {
            self.cache(target.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use machina_core::CancellationToken;

    #[derive(Default)]
    struct Menu;

    #[async_trait]
    impl State for Menu {
        async fn enter(&self, _token: CancellationToken) {}
        async fn exit(&self, _token: CancellationToken) {}
    }

    #[derive(Default)]
    struct Game;

    #[async_trait]
    impl State for Game {
        async fn enter(&self, _token: CancellationToken) {}
        async fn exit(&self, _token: CancellationToken) {}
    }

    #[tokio::test]
    async fn insert_get_round_trip() {
        let cache = StateCacheModule::new();
        let menu = Arc::new(Menu);
        cache.insert(menu.clone());

        assert!(cache.contains::<Menu>());
        assert!(!cache.contains::<Game>());
        let fetched = cache.get::<Menu>().unwrap();
        assert!(Arc::ptr_eq(&menu, &fetched));
        assert!(cache.get::<Game>().is_none());
    }

    #[tokio::test]
    async fn keys_are_concrete_state_types() {
        let cache = StateCacheModule::new();
        let menu = Arc::new(Menu);
        let game = Arc::new(Game);
        cache.cache(menu.clone());
        cache.cache(game.clone());

        // Two concrete types, two slots; each typed lookup hits its own.
        assert_eq!(cache.len(), 2);
        assert!(Arc::ptr_eq(&menu, &cache.get::<Menu>().unwrap()));
        assert!(Arc::ptr_eq(&game, &cache.get::<Game>().unwrap()));

        assert!(cache.remove::<Menu>());
        assert!(!cache.contains::<Menu>());
        assert!(cache.contains::<Game>());
    }

    #[tokio::test]
    async fn second_insert_replaces_first() {
        let cache = StateCacheModule::new();
        let first = Arc::new(Menu);
        let second = Arc::new(Menu);

        cache.insert(first.clone());
        cache.insert(second.clone());

        assert_eq!(cache.len(), 1);
        let fetched = cache.get::<Menu>().unwrap();
        assert!(Arc::ptr_eq(&second, &fetched));
        assert!(!Arc::ptr_eq(&first, &fetched));
    }

    #[tokio::test]
    async fn get_or_add_constructs_once() {
        let cache = StateCacheModule::new();
        let first = cache.get_or_add::<Game>();
        let second = cache.get_or_add::<Game>();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn auto_cache_captures_transition_targets() {
        let machine = StateMachine::new();
        let cache = Arc::new(StateCacheModule::new());
        machine.add_module(cache.clone()).unwrap();
        let mut cached = cache.subscribe_cached();

        machine.run().unwrap();
        machine.change_state(Arc::new(Menu)).await.unwrap();

        assert!(cache.contains::<Menu>());
        assert!(cached.try_recv().is_ok());
    }

    #[tokio::test]
    async fn auto_clear_empties_on_last_unlink() {
        let machine = StateMachine::new();
        let cache = Arc::new(StateCacheModule::new());
        machine.add_module(cache.clone()).unwrap();
        cache.insert(Arc::new(Menu));

        assert!(machine.remove_module::<StateCacheModule>());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn manual_cache_survives_unlink_without_auto_clear() {
        let machine = StateMachine::new();
        let cache = Arc::new(StateCacheModule::with_flags(false, false));
        machine.add_module(cache.clone()).unwrap();

        machine.run().unwrap();
        machine.change_state(Arc::new(Game)).await.unwrap();
        // auto_cache off: the transition target was not captured.
        assert!(cache.is_empty());

        cache.insert(Arc::new(Menu));
        machine.stop().unwrap();
        assert!(machine.remove_module::<StateCacheModule>());
        assert!(cache.contains::<Menu>());
    }
}
