//! Instance registry (C5): template registration, instance lifetime, per-character cooldowns.
//!
//! Empty-destroy and expiration are modelled as deferred callbacks on the tokio timer
//! facility. The empty-destroy timer is cancellable (a fresh entrant races it); the
//! expiration timer is not — its callback re-reads state and skips if already destroyed.

use crate::error::InstanceError;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_EMPTY_DELAY: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InstanceState {
    Created = 0,
    Active = 1,
    Destroying = 2,
    Destroyed = 3,
}

impl InstanceState {
    fn from_u8(v: u8) -> InstanceState {
        match v {
            0 => InstanceState::Created,
            1 => InstanceState::Active,
            2 => InstanceState::Destroying,
            _ => InstanceState::Destroyed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstanceTemplate {
    pub id: i32,
    pub name: String,
    pub duration: Duration,
    pub max_players: u32,
    pub min_level: u32,
    pub max_level: u32,
    pub cooldown: Duration,
    pub remove_buffs: bool,
    pub spawn: (i32, i32, i32),
    pub exit: (i32, i32, i32),
}

impl InstanceTemplate {
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        InstanceTemplate {
            id,
            name: name.into(),
            duration: Duration::ZERO,
            max_players: 0,
            min_level: 0,
            max_level: 0,
            cooldown: Duration::ZERO,
            remove_buffs: false,
            spawn: (0, 0, 0),
            exit: (0, 0, 0),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_max_players(mut self, n: u32) -> Self {
        self.max_players = n;
        self
    }

    pub fn with_level_range(mut self, min: u32, max: u32) -> Self {
        self.min_level = min;
        self.max_level = max;
        self
    }
}

pub struct Instance {
    pub id: i32,
    pub template_id: i32,
    pub owner_object_id: i64,
    pub created_at: std::time::Instant,
    pub duration: Duration,
    pub empty_delay: Duration,
    state: AtomicU8,
    players: RwLock<HashSet<i64>>,
    npcs: RwLock<HashSet<i64>>,
    empty_since: RwLock<Option<std::time::Instant>>,
}

impl Instance {
    fn new(id: i32, template: &InstanceTemplate, owner_object_id: i64) -> Self {
        Instance {
            id,
            template_id: template.id,
            owner_object_id,
            created_at: std::time::Instant::now(),
            duration: template.duration,
            empty_delay: DEFAULT_EMPTY_DELAY,
            state: AtomicU8::new(InstanceState::Created as u8),
            players: RwLock::new(HashSet::new()),
            npcs: RwLock::new(HashSet::new()),
            empty_since: RwLock::new(None),
        }
    }

    pub fn state(&self) -> InstanceState {
        InstanceState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: InstanceState) {
        self.state.store(s as u8, Ordering::Release);
    }

    pub fn player_count(&self) -> usize {
        self.players.read().len()
    }

    pub fn is_expired(&self) -> bool {
        self.duration > Duration::ZERO && self.created_at.elapsed() > self.duration
    }

    pub fn contains_player(&self, object_id: i64) -> bool {
        self.players.read().contains(&object_id)
    }
}

/// `(character_id, template_id)` keyed cooldown, in absolute nanoseconds since an arbitrary
/// monotonic epoch chosen by the caller (matches §6's persistence triple shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub character_id: i64,
    pub template_id: i32,
}

struct RegistryInner {
    templates: HashMap<i32, InstanceTemplate>,
    instances: HashMap<i32, Arc<Instance>>,
    player_index: HashMap<i64, i32>,
    next_instance_id: i32,
}

pub struct InstanceRegistry {
    inner: RwLock<RegistryInner>,
    cooldowns: RwLock<HashMap<CooldownKey, i64>>,
    empty_timers: RwLock<HashMap<i32, JoinHandle<()>>>,
    expire_timers: RwLock<HashMap<i32, JoinHandle<()>>>,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceRegistry {
    pub fn new() -> Self {
        InstanceRegistry {
            inner: RwLock::new(RegistryInner {
                templates: HashMap::new(),
                instances: HashMap::new(),
                player_index: HashMap::new(),
                next_instance_id: 1,
            }),
            cooldowns: RwLock::new(HashMap::new()),
            empty_timers: RwLock::new(HashMap::new()),
            expire_timers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_template(&self, template: InstanceTemplate) {
        self.inner.write().templates.insert(template.id, template);
    }

    pub fn template(&self, id: i32) -> Option<InstanceTemplate> {
        self.inner.read().templates.get(&id).cloned()
    }

    /// Creates and activates an instance. If the template has a nonzero duration, schedules
    /// a non-cancellable expiration task on `self`.
    pub fn create_instance(self: &Arc<Self>, template_id: i32, owner_object_id: i64) -> Result<Arc<Instance>, InstanceError> {
        let template = self.template(template_id).ok_or(InstanceError::TemplateNotFound(template_id))?;

        let mut inner = self.inner.write();
        let id = inner.next_instance_id;
        inner.next_instance_id += 1;
        let instance = Arc::new(Instance::new(id, &template, owner_object_id));
        instance.set_state(InstanceState::Active);
        inner.instances.insert(id, instance.clone());
        drop(inner);

        if template.duration > Duration::ZERO {
            let registry = self.clone();
            let instance_id = id;
            let duration = template.duration;
            let handle = tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                registry.on_expire_fired(instance_id);
            });
            self.expire_timers.write().insert(id, handle);
        }

        Ok(instance)
    }

    fn on_expire_fired(&self, instance_id: i32) {
        let inner = self.inner.read();
        let Some(instance) = inner.instances.get(&instance_id).cloned() else {
            return;
        };
        drop(inner);
        if instance.state() == InstanceState::Destroyed {
            return;
        }
        self.destroy_instance(instance_id);
    }

    pub fn enter_instance(&self, instance_id: i32, object_id: i64, character_id: i64, level: u32) -> Result<(), InstanceError> {
        let instance = {
            let inner = self.inner.read();
            inner.instances.get(&instance_id).cloned().ok_or(InstanceError::NotFound(instance_id))?
        };

        if instance.state() != InstanceState::Active {
            return Err(InstanceError::NotActive(instance_id));
        }
        if instance.is_expired() {
            return Err(InstanceError::Expired(instance_id));
        }

        let template = self.template(instance.template_id).ok_or(InstanceError::TemplateNotFound(instance.template_id))?;
        if template.max_players > 0 && instance.player_count() as u32 >= template.max_players {
            return Err(InstanceError::Full(instance_id));
        }
        if template.min_level > 0 && level < template.min_level {
            return Err(InstanceError::LevelTooLow);
        }
        if template.max_level > 0 && level > template.max_level {
            return Err(InstanceError::LevelTooHigh);
        }

        let key = CooldownKey { character_id, template_id: instance.template_id };
        if let Some(until) = self.cooldowns.read().get(&key).copied() {
            if until > now_nanos() {
                return Err(InstanceError::OnCooldown {
                    character_id,
                    template_id: instance.template_id,
                    until_nanos: until,
                });
            }
        }

        // player_index insertion is the single serialization point across instances: the
        // occupancy check and the claim happen under one lock so two concurrent enters for
        // the same player can never both succeed.
        {
            let mut inner = self.inner.write();
            if let Some(&existing) = inner.player_index.get(&object_id) {
                return Err(InstanceError::AlreadyInInstance(object_id, existing));
            }
            inner.player_index.insert(object_id, instance_id);
        }
        instance.players.write().insert(object_id);
        *instance.empty_since.write() = None;

        // a fresh entrant cancels a pending empty-destroy timer for this instance
        if let Some(handle) = self.empty_timers.write().remove(&instance_id) {
            handle.abort();
        }

        Ok(())
    }

    /// Removes a player from their instance. Returns the instance and whether it is now empty.
    pub fn exit_instance(self: &Arc<Self>, object_id: i64, character_id: i64) -> Result<(Arc<Instance>, bool), InstanceError> {
        let instance_id = {
            let mut inner = self.inner.write();
            inner.player_index.remove(&object_id).ok_or(InstanceError::NotInInstance(object_id))?
        };
        let instance = {
            let inner = self.inner.read();
            inner.instances.get(&instance_id).cloned().ok_or(InstanceError::NotFound(instance_id))?
        };
        instance.players.write().remove(&object_id);

        if let Some(template) = self.template(instance.template_id) {
            if template.cooldown > Duration::ZERO {
                let key = CooldownKey { character_id, template_id: instance.template_id };
                self.cooldowns.write().insert(key, now_nanos() + template.cooldown.as_nanos() as i64);
            }
        }

        let now_empty = instance.player_count() == 0;
        if now_empty {
            *instance.empty_since.write() = Some(std::time::Instant::now());
            let registry = self.clone();
            let delay = instance.empty_delay;
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                registry.on_empty_timer_fired(instance_id);
            });
            if let Some(old) = self.empty_timers.write().insert(instance_id, handle) {
                old.abort();
            }
        }

        Ok((instance, now_empty))
    }

    fn on_empty_timer_fired(&self, instance_id: i32) {
        let inner = self.inner.read();
        let Some(instance) = inner.instances.get(&instance_id).cloned() else {
            return;
        };
        drop(inner);
        // double-check: a player may have entered (and cancelled us) in the race window
        if instance.player_count() > 0 || instance.state() == InstanceState::Destroyed {
            return;
        }
        self.destroy_instance(instance_id);
    }

    pub fn destroy_instance(&self, instance_id: i32) {
        let mut inner = self.inner.write();
        let Some(instance) = inner.instances.remove(&instance_id) else {
            return;
        };
        inner.player_index.retain(|_, v| *v != instance_id);
        drop(inner);
        instance.set_state(InstanceState::Destroyed);
    }

    pub fn instance(&self, id: i32) -> Option<Arc<Instance>> {
        self.inner.read().instances.get(&id).cloned()
    }

    pub fn is_on_cooldown(&self, character_id: i64, template_id: i32) -> bool {
        match self.cooldowns.read().get(&CooldownKey { character_id, template_id }) {
            Some(&until) => until > now_nanos(),
            None => false,
        }
    }

    pub fn clear_expired_cooldowns(&self) {
        let now = now_nanos();
        self.cooldowns.write().retain(|_, until| *until > now);
    }

    pub fn export_cooldowns(&self) -> Vec<(i64, i32, i64)> {
        let now = now_nanos();
        self.cooldowns
            .read()
            .iter()
            .filter(|(_, &until)| until > now)
            .map(|(k, &until)| (k.character_id, k.template_id, until))
            .collect()
    }

    pub fn load_cooldowns(&self, rows: Vec<(i64, i32, i64)>) {
        let now = now_nanos();
        let mut cooldowns = self.cooldowns.write();
        for (character_id, template_id, expire_nanos) in rows {
            if expire_nanos <= now {
                continue;
            }
            cooldowns.insert(CooldownKey { character_id, template_id }, expire_nanos);
        }
    }
}

fn now_nanos() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cooldown_blocks_reentry() {
        let registry = Arc::new(InstanceRegistry::new());
        registry.register_template(InstanceTemplate::new(1, "Catacomb").with_cooldown(Duration::from_secs(2 * 3600)));

        let instance = registry.create_instance(1, 100).unwrap();
        registry.enter_instance(instance.id, 1000, 100, 50).unwrap();
        registry.exit_instance(1000, 100).unwrap();

        let instance2 = registry.create_instance(1, 100).unwrap();
        let err = registry.enter_instance(instance2.id, 1000, 100, 50).unwrap_err();
        assert!(matches!(err, InstanceError::OnCooldown { .. }));
    }

    #[tokio::test]
    async fn player_never_in_two_instances() {
        let registry = Arc::new(InstanceRegistry::new());
        registry.register_template(InstanceTemplate::new(1, "Tpl"));
        registry.register_template(InstanceTemplate::new(2, "Tpl2"));
        let i1 = registry.create_instance(1, 1).unwrap();
        let i2 = registry.create_instance(2, 1).unwrap();

        registry.enter_instance(i1.id, 42, 9, 10).unwrap();
        let err = registry.enter_instance(i2.id, 42, 9, 10).unwrap_err();
        assert!(matches!(err, InstanceError::AlreadyInInstance(42, _)));
    }

    #[tokio::test]
    async fn level_and_capacity_gates() {
        let registry = Arc::new(InstanceRegistry::new());
        registry.register_template(
            InstanceTemplate::new(1, "Gated").with_max_players(1).with_level_range(40, 60),
        );
        let instance = registry.create_instance(1, 1).unwrap();
        assert!(matches!(registry.enter_instance(instance.id, 1, 1, 10).unwrap_err(), InstanceError::LevelTooLow));
        assert!(matches!(registry.enter_instance(instance.id, 1, 1, 99).unwrap_err(), InstanceError::LevelTooHigh));
        registry.enter_instance(instance.id, 1, 1, 50).unwrap();
        assert!(matches!(registry.enter_instance(instance.id, 2, 2, 50).unwrap_err(), InstanceError::Full(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_destroy_timer_fires_after_delay() {
        let registry = Arc::new(InstanceRegistry::new());
        registry.register_template(InstanceTemplate::new(1, "Tpl"));
        let instance = registry.create_instance(1, 1).unwrap();
        registry.enter_instance(instance.id, 1, 1, 1).unwrap();
        let (_inst, became_empty) = registry.exit_instance(1, 1).unwrap();
        assert!(became_empty);

        tokio::time::advance(DEFAULT_EMPTY_DELAY + Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert!(registry.instance(instance.id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reentry_cancels_empty_destroy_timer() {
        let registry = Arc::new(InstanceRegistry::new());
        registry.register_template(InstanceTemplate::new(1, "Tpl"));
        let instance = registry.create_instance(1, 1).unwrap();
        registry.enter_instance(instance.id, 1, 1, 1).unwrap();
        registry.exit_instance(1, 1).unwrap();

        registry.enter_instance(instance.id, 2, 2, 1).unwrap();
        tokio::time::advance(DEFAULT_EMPTY_DELAY + Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert!(registry.instance(instance.id).is_some());
    }
}
