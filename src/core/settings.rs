//! User settings backed by the key-value store.
//!
//! The orchestration core never reads these directly; the front end gathers
//! them into a [`TurnRequest`](crate::core::orchestrator::TurnRequest) at
//! send time.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::coach::{
    default_coaches, next_coach_id, select_coaches, Coach, CoachEditError, CoachField, CoachId,
    NEW_COACH_EMOJI, NEW_COACH_NAME, NEW_COACH_PROMPT,
};
use crate::core::history::{ChatContext, SessionRestore};
use crate::core::keyring::KeyringVault;
use crate::core::models::{find_model, DEFAULT_MODEL};
use crate::core::store::{self, keys, KeyValueStore, StoreError};

pub const CREDENTIAL_ENV_VAR: &str = "OPENROUTER_API_KEY";

/// Where an API key was found or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    Keyring,
    Store,
}

impl CredentialSource {
    pub fn describe(self) -> &'static str {
        match self {
            CredentialSource::Environment => "environment",
            CredentialSource::Keyring => "system keyring",
            CredentialSource::Store => "local store",
        }
    }
}

pub struct Settings {
    store: Arc<dyn KeyValueStore>,
    vault: KeyringVault,
    env_credential: Option<String>,
}

impl Settings {
    pub fn new(store: Arc<dyn KeyValueStore>, vault: KeyringVault) -> Self {
        let env_credential = std::env::var(CREDENTIAL_ENV_VAR)
            .ok()
            .filter(|key| !key.trim().is_empty());
        Self {
            store,
            vault,
            env_credential,
        }
    }

    /// Override the environment lookup, mainly for tests.
    pub fn with_env_credential(mut self, key: Option<String>) -> Self {
        self.env_credential = key;
        self
    }

    pub fn credential(&self) -> Option<String> {
        self.credential_with_source().map(|(key, _)| key)
    }

    pub fn credential_with_source(&self) -> Option<(String, CredentialSource)> {
        if let Some(key) = &self.env_credential {
            return Some((key.clone(), CredentialSource::Environment));
        }
        match self.vault.get() {
            Ok(Some(key)) => return Some((key, CredentialSource::Keyring)),
            Ok(None) => {}
            Err(err) if err.is_recoverable() => {
                warn!("keyring temporarily unavailable: {err}");
            }
            Err(err) => warn!("keyring lookup failed: {err}"),
        }
        let stored: Option<String> = store::load_or(self.store.as_ref(), keys::CREDENTIAL, None);
        stored
            .filter(|key| !key.trim().is_empty())
            .map(|key| (key, CredentialSource::Store))
    }

    /// Keep the key in the keyring when possible, otherwise in the store.
    pub fn set_credential(&self, key: &str) -> Result<CredentialSource, StoreError> {
        let key = key.trim();
        match self.vault.store(key) {
            Ok(true) => {
                store::discard(self.store.as_ref(), keys::CREDENTIAL);
                info!("stored API key in keyring");
                return Ok(CredentialSource::Keyring);
            }
            Ok(false) => {}
            Err(err) => warn!("falling back to local store, keyring write failed: {err}"),
        }
        self.store
            .set(keys::CREDENTIAL, serde_json::Value::String(key.to_string()))?;
        info!("stored API key in local store");
        Ok(CredentialSource::Store)
    }

    pub fn clear_credential(&self) {
        if let Err(err) = self.vault.remove() {
            warn!("failed to remove keyring entry: {err}");
        }
        store::discard(self.store.as_ref(), keys::CREDENTIAL);
    }

    pub fn model(&self) -> String {
        store::load_or(self.store.as_ref(), keys::SELECTED_MODEL, DEFAULT_MODEL.to_string())
    }

    /// Select `model`. Reasoning is switched on when the model supports it;
    /// returns the reasoning flag afterwards.
    pub fn set_model(&self, model: &str) -> bool {
        store::save(self.store.as_ref(), keys::SELECTED_MODEL, model);
        if find_model(model).is_some_and(|m| m.supports_reasoning) {
            self.set_use_reasoning(true);
            return true;
        }
        self.use_reasoning()
    }

    pub fn use_reasoning(&self) -> bool {
        store::load_or(self.store.as_ref(), keys::USE_REASONING, false)
    }

    pub fn set_use_reasoning(&self, enabled: bool) {
        store::save(self.store.as_ref(), keys::USE_REASONING, &enabled);
    }

    /// The coach roster, seeded with the defaults on first use.
    pub fn coaches(&self) -> Vec<Coach> {
        let stored: Option<Vec<Coach>> = store::load_or(self.store.as_ref(), keys::COACHES, None);
        match stored {
            Some(coaches) => coaches,
            None => {
                debug!("seeding default coaches");
                let coaches = default_coaches();
                self.save_coaches(&coaches);
                coaches
            }
        }
    }

    fn save_coaches(&self, coaches: &[Coach]) {
        store::save(self.store.as_ref(), keys::COACHES, coaches);
    }

    pub fn coach(&self, id: CoachId) -> Option<Coach> {
        self.coaches().into_iter().find(|c| c.id == id)
    }

    pub fn add_coach(&self) -> Coach {
        let mut coaches = self.coaches();
        let coach = Coach::new(
            next_coach_id(&coaches),
            NEW_COACH_NAME,
            NEW_COACH_EMOJI,
            NEW_COACH_PROMPT,
        );
        coaches.push(coach.clone());
        self.save_coaches(&coaches);
        info!(coach = coach.id, "added coach");
        coach
    }

    pub fn update_coach(
        &self,
        id: CoachId,
        field: CoachField,
        value: &str,
    ) -> Result<Coach, CoachEditError> {
        let mut coaches = self.coaches();
        let coach = coaches
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(CoachEditError::NotFound(id))?;
        coach.set_field(field, value)?;
        let updated = coach.clone();
        self.save_coaches(&coaches);
        Ok(updated)
    }

    /// Remove a coach and drop it from the selection. Returns whether it
    /// existed.
    pub fn delete_coach(&self, id: CoachId) -> bool {
        let mut coaches = self.coaches();
        let before = coaches.len();
        coaches.retain(|c| c.id != id);
        if coaches.len() == before {
            return false;
        }
        self.save_coaches(&coaches);

        let mut selection = self.selected_coach_ids();
        if selection.contains(&id) {
            selection.retain(|s| *s != id);
            self.set_selected_coach_ids(&selection);
        }
        info!(coach = id, "deleted coach");
        true
    }

    /// Coach ids picked for the next turns. Empty means "ask everyone".
    pub fn selected_coach_ids(&self) -> Vec<CoachId> {
        store::load_or(self.store.as_ref(), keys::SELECTED_COACH_IDS, Vec::new())
    }

    pub fn set_selected_coach_ids(&self, ids: &[CoachId]) {
        if ids.is_empty() {
            self.clear_selection();
        } else {
            store::save(self.store.as_ref(), keys::SELECTED_COACH_IDS, ids);
        }
    }

    pub fn clear_selection(&self) {
        store::discard(self.store.as_ref(), keys::SELECTED_COACH_IDS);
    }

    /// Current records of the selected coaches, in roster order.
    pub fn selected_coaches(&self) -> Vec<Coach> {
        select_coaches(&self.selected_coach_ids(), &self.coaches())
    }

    pub fn chat_context(&self) -> ChatContext {
        ChatContext {
            selected_coaches: self.selected_coaches().iter().map(|c| c.id).collect(),
            model: self.model(),
            use_reasoning: self.use_reasoning(),
        }
    }
}

/// Restores write straight through to the store, so a shared reference is
/// enough.
impl SessionRestore for &Settings {
    fn restore_model(&mut self, model: &str) {
        store::save(self.store.as_ref(), keys::SELECTED_MODEL, model);
    }

    fn restore_reasoning(&mut self, use_reasoning: bool) {
        self.set_use_reasoning(use_reasoning);
    }

    fn restore_roster(&mut self, coach_ids: &[CoachId]) {
        self.set_selected_coach_ids(coach_ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;
    use serde_json::json;

    fn settings() -> (Arc<MemoryStore>, Settings) {
        let store = Arc::new(MemoryStore::new());
        let settings =
            Settings::new(store.clone(), KeyringVault::disabled()).with_env_credential(None);
        (store, settings)
    }

    #[test]
    fn defaults_apply_when_nothing_is_stored() {
        let (store, settings) = settings();
        assert_eq!(settings.model(), DEFAULT_MODEL);
        assert!(!settings.use_reasoning());
        assert_eq!(settings.credential(), None);
        assert!(settings.selected_coach_ids().is_empty());

        let coaches = settings.coaches();
        assert_eq!(coaches.len(), 3);
        assert!(store.get(keys::COACHES).unwrap().is_some());
    }

    #[test]
    fn credential_prefers_environment() {
        let (_, settings) = settings();
        assert_eq!(settings.set_credential("  sk-store  ").unwrap(), CredentialSource::Store);
        assert_eq!(
            settings.credential_with_source(),
            Some(("sk-store".to_string(), CredentialSource::Store))
        );

        let settings = settings.with_env_credential(Some("sk-env".to_string()));
        assert_eq!(
            settings.credential_with_source(),
            Some(("sk-env".to_string(), CredentialSource::Environment))
        );
    }

    #[test]
    fn clearing_credential_removes_stored_key() {
        let (store, settings) = settings();
        settings.set_credential("sk-1").unwrap();
        settings.clear_credential();
        assert_eq!(settings.credential(), None);
        assert_eq!(store.get(keys::CREDENTIAL).unwrap(), None);
    }

    #[test]
    fn selecting_reasoning_model_enables_reasoning() {
        let (_, settings) = settings();
        assert!(settings.set_model("openai/o4-mini"));
        assert!(settings.use_reasoning());

        settings.set_use_reasoning(false);
        assert!(!settings.set_model("meta-llama/llama-3.3-70b-instruct"));
        assert_eq!(settings.model(), "meta-llama/llama-3.3-70b-instruct");
    }

    #[test]
    fn added_coaches_get_fresh_ids() {
        let (_, settings) = settings();
        let added = settings.add_coach();
        assert_eq!(added.id, 4);
        assert_eq!(added.name, NEW_COACH_NAME);
        assert_eq!(added.emoji, NEW_COACH_EMOJI);

        assert!(settings.delete_coach(2));
        assert_eq!(settings.add_coach().id, 5);
        assert_eq!(settings.coaches().len(), 4);
    }

    #[test]
    fn update_coach_validates_and_persists() {
        let (_, settings) = settings();
        let updated = settings
            .update_coach(1, CoachField::Name, "Tim F.")
            .unwrap();
        assert_eq!(updated.name, "Tim F.");
        assert_eq!(settings.coach(1).unwrap().name, "Tim F.");

        assert_eq!(
            settings.update_coach(1, CoachField::Emoji, "🔥🔥🔥"),
            Err(CoachEditError::EmojiTooLong { glyphs: 3 })
        );
        assert_eq!(
            settings.update_coach(77, CoachField::Name, "x"),
            Err(CoachEditError::NotFound(77))
        );
    }

    #[test]
    fn deleting_a_coach_drops_it_from_selection() {
        let (store, settings) = settings();
        settings.set_selected_coach_ids(&[1, 3]);
        assert!(settings.delete_coach(3));
        assert_eq!(settings.selected_coach_ids(), vec![1]);

        assert!(settings.delete_coach(1));
        assert_eq!(store.get(keys::SELECTED_COACH_IDS).unwrap(), None);
        assert!(!settings.delete_coach(1));
    }

    #[test]
    fn selection_resolves_to_current_coach_records() {
        let (_, settings) = settings();
        settings.set_selected_coach_ids(&[3, 1]);
        settings
            .update_coach(3, CoachField::Name, "Goggins")
            .unwrap();

        let names: Vec<_> = settings
            .selected_coaches()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Tim Ferriss", "Goggins"]);
        assert_eq!(settings.chat_context().selected_coaches, vec![1, 3]);
    }

    #[test]
    fn restore_writes_loaded_settings_without_side_effects() {
        let (store, settings) = settings();
        let mut restore = &settings;
        restore.restore_model("openai/o4-mini");
        restore.restore_reasoning(false);
        restore.restore_roster(&[2]);

        assert_eq!(settings.model(), "openai/o4-mini");
        assert!(!settings.use_reasoning());
        assert_eq!(store.get(keys::SELECTED_COACH_IDS).unwrap(), Some(json!([2])));
    }
}
