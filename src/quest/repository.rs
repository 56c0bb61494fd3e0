//! Quest repository interface (§6): the SQL-backed persistence layer is out of scope, modelled
//! here as a trait the quest framework is written against.

use anyhow::Result;
use std::collections::HashMap;

/// A single `(quest_name, var_name, value)` row as persisted externally.
#[derive(Debug, Clone)]
pub struct QuestVarRow {
    pub quest_name: String,
    pub var_name: String,
    pub value: String,
}

pub trait QuestRepository: Send + Sync {
    fn load_by_character_id(&self, character_id: i64) -> Result<Vec<QuestVarRow>>;
    fn save_quest_state(&self, character_id: i64, quest_name: &str, vars: &HashMap<String, String>) -> Result<()>;
    fn delete_quest(&self, character_id: i64, quest_name: &str) -> Result<()>;
}

/// In-memory repository for tests and for embedding consumers that haven't wired SQL yet.
#[derive(Default)]
pub struct InMemoryQuestRepository {
    rows: parking_lot::Mutex<HashMap<i64, HashMap<String, HashMap<String, String>>>>,
}

impl QuestRepository for InMemoryQuestRepository {
    fn load_by_character_id(&self, character_id: i64) -> Result<Vec<QuestVarRow>> {
        let rows = self.rows.lock();
        let mut out = Vec::new();
        if let Some(by_quest) = rows.get(&character_id) {
            for (quest_name, vars) in by_quest {
                for (var_name, value) in vars {
                    out.push(QuestVarRow {
                        quest_name: quest_name.clone(),
                        var_name: var_name.clone(),
                        value: value.clone(),
                    });
                }
            }
        }
        Ok(out)
    }

    fn save_quest_state(&self, character_id: i64, quest_name: &str, vars: &HashMap<String, String>) -> Result<()> {
        let mut rows = self.rows.lock();
        rows.entry(character_id).or_default().insert(quest_name.to_string(), vars.clone());
        Ok(())
    }

    fn delete_quest(&self, character_id: i64, quest_name: &str) -> Result<()> {
        let mut rows = self.rows.lock();
        if let Some(by_quest) = rows.get_mut(&character_id) {
            by_quest.remove(quest_name);
        }
        Ok(())
    }
}
