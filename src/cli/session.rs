//! Wiring shared by every subcommand that talks to the store or the API.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::core::autosave::{Autosave, ContextSource};
use crate::core::chat_stream::{CompletionTransport, HttpCompletionTransport};
use crate::core::config::data::path_display;
use crate::core::config::Config;
use crate::core::history::ChatHistoryManager;
use crate::core::keyring::KeyringVault;
use crate::core::message::MessageIdAllocator;
use crate::core::orchestrator::{ChatBuffer, ChatOrchestrator};
use crate::core::settings::Settings;
use crate::core::store::{FileStore, KeyValueStore, MemoryStore, StoreChange};

pub struct Session {
    pub config: Config,
    pub settings: Arc<Settings>,
    pub history: Arc<ChatHistoryManager>,
    pub orchestrator: ChatOrchestrator,
    pub transport: Arc<dyn CompletionTransport>,
    file_store: Option<Arc<FileStore>>,
}

type OpenedStore = (Arc<dyn KeyValueStore>, Option<Arc<FileStore>>);

fn open_store(config: &Config, ephemeral: bool) -> Result<OpenedStore, Box<dyn Error>> {
    if ephemeral {
        debug!("using in-memory store");
        return Ok((Arc::new(MemoryStore::new()), None));
    }
    let root: PathBuf = match &config.data_dir {
        Some(dir) => dir.clone(),
        None => FileStore::default_root().ok_or("Could not determine data directory")?,
    };
    let store = Arc::new(FileStore::open(&root)?);
    debug!(path = %path_display(&root), "using file store");
    Ok((Arc::clone(&store) as Arc<dyn KeyValueStore>, Some(store)))
}

impl Session {
    pub fn open(config: Config, ephemeral: bool) -> Result<Self, Box<dyn Error>> {
        let (store, file_store) = open_store(&config, ephemeral)?;
        let vault = if ephemeral {
            KeyringVault::disabled()
        } else {
            KeyringVault::new(config.use_keyring())
        };
        let settings = Arc::new(Settings::new(Arc::clone(&store), vault));

        let transport: Arc<dyn CompletionTransport> = Arc::new(
            HttpCompletionTransport::new(reqwest::Client::new(), config.base_url())
                .with_referer(config.referer.clone())
                .with_app_title(config.app_title()),
        );
        let ids = Arc::new(MessageIdAllocator::new());
        let orchestrator = ChatOrchestrator::new(Arc::clone(&transport), Arc::clone(&ids));
        let history = Arc::new(ChatHistoryManager::new(store, ChatBuffer::new(), ids));

        Ok(Self {
            config,
            settings,
            history,
            orchestrator,
            transport,
            file_store,
        })
    }

    /// Keys another process rewrote since this session last touched them.
    pub fn poll_external_changes(&self) -> Vec<StoreChange> {
        self.file_store
            .as_ref()
            .map(|store| store.poll_external_changes())
            .unwrap_or_default()
    }

    pub fn buffer(&self) -> &ChatBuffer {
        self.history.buffer()
    }

    pub fn context_source(&self) -> ContextSource {
        let settings = Arc::clone(&self.settings);
        Arc::new(move || settings.chat_context())
    }

    pub fn start_autosave(&self) -> Autosave {
        Autosave::spawn(
            Arc::clone(&self.history),
            self.context_source(),
            self.config.autosave_delay(),
        )
    }
}
