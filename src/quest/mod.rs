//! Quest framework (C6): registration, event dispatch, per-character persistent variables.

pub mod repository;
pub mod timer;

use crate::error::QuestError;
use parking_lot::RwLock;
use repository::{QuestRepository, QuestVarRow};
use std::collections::HashMap;
use std::sync::Arc;

pub const RESERVED_STATE_VAR: &str = "<state>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestProgress {
    Created = 0,
    Started = 1,
    Completed = 2,
}

impl QuestProgress {
    /// Reconstructs progress from the reserved `<state>` variable's persisted value (§3, §8.11).
    fn from_reserved_value(value: &str) -> QuestProgress {
        match value {
            "0" => QuestProgress::Created,
            "2" => QuestProgress::Completed,
            "" => QuestProgress::Created,
            _ => QuestProgress::Started,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Talk,
    FirstTalk,
    Kill,
    Attack,
    Spawn,
    SkillSee,
    Aggro,
    ItemUse,
    EnterZone,
    ExitZone,
}

impl EventKind {
    fn is_global(self) -> bool {
        matches!(self, EventKind::ItemUse | EventKind::EnterZone | EventKind::ExitZone)
    }
}

/// A dispatched game event. `npc_id` is the NPC template ID relevant to scoped event kinds.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub player_object_id: i64,
    pub character_id: i64,
    pub npc_id: i32,
    pub target_object_id: i64,
    pub skill_id: i32,
    pub is_pet: bool,
    pub params: HashMap<String, String>,
}

impl Event {
    pub fn new(kind: EventKind, player_object_id: i64, character_id: i64) -> Self {
        Event {
            kind,
            player_object_id,
            character_id,
            npc_id: 0,
            target_object_id: 0,
            skill_id: 0,
            is_pet: false,
            params: HashMap::new(),
        }
    }

    pub fn with_npc(mut self, npc_id: i32) -> Self {
        self.npc_id = npc_id;
        self
    }
}

/// A quest state is the per-(character, quest) EAV bag plus a cached progress enum mirrored
/// from the reserved `<state>` variable.
pub struct QuestState {
    pub quest_id: i32,
    pub quest_name: String,
    pub character_id: i64,
    inner: RwLock<QuestStateInner>,
}

struct QuestStateInner {
    progress: QuestProgress,
    vars: HashMap<String, String>,
    dirty: bool,
}

impl QuestState {
    fn new(quest_id: i32, quest_name: impl Into<String>, character_id: i64) -> Self {
        QuestState {
            quest_id,
            quest_name: quest_name.into(),
            character_id,
            inner: RwLock::new(QuestStateInner {
                progress: QuestProgress::Created,
                vars: HashMap::new(),
                dirty: false,
            }),
        }
    }

    pub fn progress(&self) -> QuestProgress {
        self.inner.read().progress
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.read().dirty
    }

    /// Returns an independent snapshot (§8.10): mutating the result never mutates `self`.
    pub fn vars(&self) -> HashMap<String, String> {
        self.inner.read().vars.clone()
    }

    pub fn get_var(&self, name: &str) -> Option<String> {
        self.inner.read().vars.get(name).cloned()
    }

    pub fn set_var(&self, name: impl Into<String>, value: impl Into<String>) {
        let mut inner = self.inner.write();
        let name = name.into();
        let value = value.into();
        if name == RESERVED_STATE_VAR {
            inner.progress = QuestProgress::from_reserved_value(&value);
        }
        inner.vars.insert(name, value);
        inner.dirty = true;
    }

    pub fn set_cond(&self, cond: i32) {
        self.set_var(RESERVED_STATE_VAR, cond.to_string());
    }

    fn clear_dirty(&self) {
        self.inner.write().dirty = false;
    }
}

pub type HookFn = Arc<dyn Fn(&Event, &QuestState) -> Option<String> + Send + Sync + 'static>;

#[derive(Default)]
struct QuestHooks {
    talk: HashMap<i32, HookFn>,
    first_talk: HashMap<i32, HookFn>,
    kill: HashMap<i32, HookFn>,
    attack: HashMap<i32, HookFn>,
    spawn: HashMap<i32, HookFn>,
    skill_see: HashMap<i32, HookFn>,
    aggro: HashMap<i32, HookFn>,
    item_use: Option<HookFn>,
    enter_zone: Option<HookFn>,
    exit_zone: Option<HookFn>,
}

impl QuestHooks {
    fn scoped_map(&self, kind: EventKind) -> Option<&HashMap<i32, HookFn>> {
        match kind {
            EventKind::Talk => Some(&self.talk),
            EventKind::FirstTalk => Some(&self.first_talk),
            EventKind::Kill => Some(&self.kill),
            EventKind::Attack => Some(&self.attack),
            EventKind::Spawn => Some(&self.spawn),
            EventKind::SkillSee => Some(&self.skill_see),
            EventKind::Aggro => Some(&self.aggro),
            _ => None,
        }
    }

    fn global_hook(&self, kind: EventKind) -> Option<&HookFn> {
        match kind {
            EventKind::ItemUse => self.item_use.as_ref(),
            EventKind::EnterZone => self.enter_zone.as_ref(),
            EventKind::ExitZone => self.exit_zone.as_ref(),
            _ => None,
        }
    }
}

/// A registered quest: identity plus its hook table and declared quest-item IDs.
pub struct Quest {
    pub id: i32,
    pub name: String,
    hooks: QuestHooks,
    pub quest_items: Vec<i32>,
}

/// Builder for registering a quest's hooks before handing it to the [`QuestManager`].
pub struct QuestBuilder {
    id: i32,
    name: String,
    hooks: QuestHooks,
    quest_items: Vec<i32>,
}

impl QuestBuilder {
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        QuestBuilder { id, name: name.into(), hooks: QuestHooks::default(), quest_items: Vec::new() }
    }

    pub fn on_talk(mut self, npc_id: i32, hook: HookFn) -> Self {
        self.hooks.talk.insert(npc_id, hook);
        self
    }

    pub fn on_first_talk(mut self, npc_id: i32, hook: HookFn) -> Self {
        self.hooks.first_talk.insert(npc_id, hook);
        self
    }

    pub fn on_kill(mut self, npc_id: i32, hook: HookFn) -> Self {
        self.hooks.kill.insert(npc_id, hook);
        self
    }

    pub fn on_attack(mut self, npc_id: i32, hook: HookFn) -> Self {
        self.hooks.attack.insert(npc_id, hook);
        self
    }

    pub fn on_spawn(mut self, npc_id: i32, hook: HookFn) -> Self {
        self.hooks.spawn.insert(npc_id, hook);
        self
    }

    pub fn on_skill_see(mut self, npc_id: i32, hook: HookFn) -> Self {
        self.hooks.skill_see.insert(npc_id, hook);
        self
    }

    pub fn on_aggro(mut self, npc_id: i32, hook: HookFn) -> Self {
        self.hooks.aggro.insert(npc_id, hook);
        self
    }

    pub fn on_item_use(mut self, hook: HookFn) -> Self {
        self.hooks.item_use = Some(hook);
        self
    }

    pub fn on_enter_zone(mut self, hook: HookFn) -> Self {
        self.hooks.enter_zone = Some(hook);
        self
    }

    pub fn on_exit_zone(mut self, hook: HookFn) -> Self {
        self.hooks.exit_zone = Some(hook);
        self
    }

    pub fn with_quest_item(mut self, item_id: i32) -> Self {
        self.quest_items.push(item_id);
        self
    }

    pub fn build(self) -> Quest {
        Quest { id: self.id, name: self.name, hooks: self.hooks, quest_items: self.quest_items }
    }
}

type StateKey = (i64, i32);

struct ManagerInner {
    by_id: HashMap<i32, Arc<Quest>>,
    by_name: HashMap<String, i32>,
    states: HashMap<StateKey, Arc<QuestState>>,
    // (kind, npc_id) -> quest ids with a hook for that scoped event
    index: HashMap<(EventKind, i32), Vec<i32>>,
}

/// Central quest registry and event router (C6).
pub struct QuestManager {
    inner: RwLock<ManagerInner>,
    repository: Arc<dyn QuestRepository>,
}

impl QuestManager {
    pub fn new(repository: Arc<dyn QuestRepository>) -> Self {
        QuestManager {
            inner: RwLock::new(ManagerInner {
                by_id: HashMap::new(),
                by_name: HashMap::new(),
                states: HashMap::new(),
                index: HashMap::new(),
            }),
            repository,
        }
    }

    pub fn register(&self, quest: Quest) -> Result<(), QuestError> {
        let mut inner = self.inner.write();
        if inner.by_id.contains_key(&quest.id) {
            return Err(QuestError::DuplicateId(quest.id));
        }
        if inner.by_name.contains_key(&quest.name) {
            return Err(QuestError::DuplicateName(quest.name));
        }

        for kind in [
            EventKind::Talk,
            EventKind::FirstTalk,
            EventKind::Kill,
            EventKind::Attack,
            EventKind::Spawn,
            EventKind::SkillSee,
            EventKind::Aggro,
        ] {
            if let Some(map) = quest.hooks.scoped_map(kind) {
                for &npc_id in map.keys() {
                    inner.index.entry((kind, npc_id)).or_default().push(quest.id);
                }
            }
        }

        inner.by_name.insert(quest.name.clone(), quest.id);
        inner.by_id.insert(quest.id, Arc::new(quest));
        Ok(())
    }

    fn state_for(&self, character_id: i64, quest: &Quest) -> Arc<QuestState> {
        let key = (character_id, quest.id);
        if let Some(existing) = self.inner.read().states.get(&key).cloned() {
            return existing;
        }
        let mut inner = self.inner.write();
        inner
            .states
            .entry(key)
            .or_insert_with(|| Arc::new(QuestState::new(quest.id, quest.name.clone(), character_id)))
            .clone()
    }

    /// Dispatches `event` to every candidate quest, returning the first nonempty hook response.
    pub fn dispatch(&self, event: &Event) -> Option<String> {
        let candidates: Vec<Arc<Quest>> = {
            let inner = self.inner.read();
            let ids = inner.index.get(&(event.kind, event.npc_id)).cloned().unwrap_or_default();
            let mut quests: Vec<Arc<Quest>> = ids.iter().filter_map(|id| inner.by_id.get(id).cloned()).collect();

            if quests.is_empty() && event.kind.is_global() {
                quests = inner
                    .by_id
                    .values()
                    .filter(|q| q.hooks.global_hook(event.kind).is_some())
                    .cloned()
                    .collect();
            }
            quests
        };

        for quest in candidates {
            let hook = if event.kind.is_global() {
                quest.hooks.global_hook(event.kind).cloned()
            } else {
                quest.hooks.scoped_map(event.kind).and_then(|m| m.get(&event.npc_id)).cloned()
            };
            let Some(hook) = hook else { continue };

            let state = self.state_for(event.character_id, &quest);
            let response = hook(event, &state);
            if state.is_dirty() {
                self.write_through(&state);
            }
            if let Some(r) = response {
                if !r.is_empty() {
                    return Some(r);
                }
            }
        }
        None
    }

    fn write_through(&self, state: &Arc<QuestState>) {
        let key = (state.character_id, state.quest_id);
        self.inner.write().states.insert(key, state.clone());
    }

    /// Reconstructs one [`QuestState`] per quest name from persisted EAV rows (§4.6, §8.11).
    pub fn load_player_quests(&self, character_id: i64) -> Result<(), QuestError> {
        let rows = self.repository.load_by_character_id(character_id)?;
        let mut by_quest: HashMap<String, Vec<QuestVarRow>> = HashMap::new();
        for row in rows {
            by_quest.entry(row.quest_name.clone()).or_default().push(row);
        }

        let mut inner = self.inner.write();
        for (quest_name, rows) in by_quest {
            let Some(&quest_id) = inner.by_name.get(&quest_name) else { continue };
            let state = QuestState::new(quest_id, quest_name.clone(), character_id);
            {
                let mut state_inner = state.inner.write();
                for row in rows {
                    if row.var_name == RESERVED_STATE_VAR {
                        state_inner.progress = QuestProgress::from_reserved_value(&row.value);
                    }
                    state_inner.vars.insert(row.var_name, row.value);
                }
            }
            inner.states.insert((character_id, quest_id), Arc::new(state));
        }
        Ok(())
    }

    /// Writes every dirty state's full snapshot through the repository and clears dirty flags.
    pub fn save_player_quests(&self, character_id: i64) -> Result<(), QuestError> {
        let dirty: Vec<Arc<QuestState>> = {
            let inner = self.inner.read();
            inner
                .states
                .iter()
                .filter(|((cid, _), state)| *cid == character_id && state.is_dirty())
                .map(|(_, state)| state.clone())
                .collect()
        };
        for state in dirty {
            self.repository.save_quest_state(character_id, &state.quest_name, &state.vars())?;
            state.clear_dirty();
        }
        Ok(())
    }

    /// `completed = false` discards all progress (in-memory state and persisted rows alike).
    /// `completed = true` leaves the quest in `Completed` progress instead, so the next dispatch
    /// sees post-completion state rather than a clean slate (§8).
    pub fn exit_quest(&self, character_id: i64, quest_name: &str, completed: bool) -> Result<(), QuestError> {
        let quest_id = {
            let inner = self.inner.read();
            *inner.by_name.get(quest_name).ok_or_else(|| QuestError::NotFoundByName(quest_name.to_string()))?
        };

        if completed {
            let state = QuestState::new(quest_id, quest_name.to_string(), character_id);
            state.set_cond(QuestProgress::Completed as i32);
            state.clear_dirty();
            self.inner.write().states.insert((character_id, quest_id), Arc::new(state));
            let mut vars = HashMap::new();
            vars.insert(RESERVED_STATE_VAR.to_string(), (QuestProgress::Completed as i32).to_string());
            self.repository.save_quest_state(character_id, quest_name, &vars)?;
        } else {
            self.inner.write().states.remove(&(character_id, quest_id));
            self.repository.delete_quest(character_id, quest_name)?;
        }
        Ok(())
    }

    pub fn quest_state(&self, character_id: i64, quest_id: i32) -> Option<Arc<QuestState>> {
        self.inner.read().states.get(&(character_id, quest_id)).cloned()
    }

    pub fn quest_by_name(&self, name: &str) -> Option<Arc<Quest>> {
        let inner = self.inner.read();
        let id = *inner.by_name.get(name)?;
        inner.by_id.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repository::InMemoryQuestRepository;

    fn make_manager() -> QuestManager {
        QuestManager::new(Arc::new(InMemoryQuestRepository::default()))
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mgr = make_manager();
        mgr.register(QuestBuilder::new(1, "Q1").build()).unwrap();
        assert!(matches!(mgr.register(QuestBuilder::new(1, "Other").build()), Err(QuestError::DuplicateId(1))));
        assert!(matches!(mgr.register(QuestBuilder::new(2, "Q1").build()), Err(QuestError::DuplicateName(_))));
    }

    #[test]
    fn vars_snapshot_is_independent() {
        let mgr = make_manager();
        mgr.register(
            QuestBuilder::new(1, "Q1")
                .on_talk(100, Arc::new(|_, state| {
                    state.set_var("kills", "1");
                    Some("hi".into())
                }))
                .build(),
        )
        .unwrap();
        let event = Event::new(EventKind::Talk, 1, 1).with_npc(100);
        mgr.dispatch(&event);
        let state = mgr.quest_state(1, 1).unwrap();
        let mut snapshot = state.vars();
        snapshot.insert("kills".to_string(), "999".to_string());
        assert_eq!(state.get_var("kills").unwrap(), "1");
    }

    #[test]
    fn reserved_state_mapping_after_load() {
        struct Repo;
        impl QuestRepository for Repo {
            fn load_by_character_id(&self, _character_id: i64) -> anyhow::Result<Vec<QuestVarRow>> {
                Ok(vec![
                    QuestVarRow { quest_name: "Q1".into(), var_name: RESERVED_STATE_VAR.into(), value: "2".into() },
                ])
            }
            fn save_quest_state(&self, _: i64, _: &str, _: &HashMap<String, String>) -> anyhow::Result<()> {
                Ok(())
            }
            fn delete_quest(&self, _: i64, _: &str) -> anyhow::Result<()> {
                Ok(())
            }
        }
        let mgr = QuestManager::new(Arc::new(Repo));
        mgr.register(QuestBuilder::new(1, "Q1").build()).unwrap();
        mgr.load_player_quests(7).unwrap();
        let state = mgr.quest_state(7, 1).unwrap();
        assert_eq!(state.progress(), QuestProgress::Completed);
    }

    #[test]
    fn full_collect_quest_scenario() {
        let mgr = make_manager();
        mgr.register(
            QuestBuilder::new(303, "Q303")
                .on_kill(20006, Arc::new(|_, state| {
                    let kills: i32 = state.get_var("kills").and_then(|v| v.parse().ok()).unwrap_or(0) + 1;
                    state.set_var("kills", kills.to_string());
                    if kills >= 10 {
                        state.set_cond(2);
                    }
                    None
                }))
                .on_talk(30006, Arc::new(|_, state| {
                    Some(match state.progress() {
                        QuestProgress::Completed => "post-completion".to_string(),
                        _ if state.get_var("kills").as_deref() == Some("10") => "rewards".to_string(),
                        _ => "in-progress".to_string(),
                    })
                }))
                .build(),
        )
        .unwrap();

        for _ in 0..10 {
            mgr.dispatch(&Event::new(EventKind::Kill, 1, 1).with_npc(20006));
        }
        let response = mgr.dispatch(&Event::new(EventKind::Talk, 1, 1).with_npc(30006));
        assert_eq!(response.as_deref(), Some("rewards"));

        mgr.exit_quest(1, "Q303", true).unwrap();
        let state = mgr.quest_state(1, 303).unwrap();
        assert_eq!(state.progress(), QuestProgress::Completed);

        let response2 = mgr.dispatch(&Event::new(EventKind::Talk, 1, 1).with_npc(30006));
        assert_eq!(response2.as_deref(), Some("post-completion"));
    }

    #[test]
    fn global_event_falls_back_to_scan() {
        let mgr = make_manager();
        mgr.register(
            QuestBuilder::new(1, "Q1")
                .on_enter_zone(Arc::new(|_, _| Some("entered".into())))
                .build(),
        )
        .unwrap();
        let response = mgr.dispatch(&Event::new(EventKind::EnterZone, 1, 1));
        assert_eq!(response.as_deref(), Some("entered"));
    }
}
