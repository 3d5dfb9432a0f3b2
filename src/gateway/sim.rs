//! Simulation gateway - in-memory stand-in for the local query service
//!
//! Used by the test suite and by `lmdesk --sim`. Behaves like the real
//! backend (server-issued ids, not-found on missing sessions, settings
//! normalization) and adds hooks the real one cannot offer:
//! - fault injection per operation (`fail_next`)
//! - call gating so a test can hold a response in flight (`hold`)
//! - call counters and the last query received
//! - scripted catalog pages (`queue_page`)

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::types::{ModelPageRequest, ModelStatus, QueryReply, QueryRequest, RemoteMessage, Sender};
use super::{Gateway, GatewayError, GatewayResult};
use crate::core::{ChatSession, GenerationSettings, ModelEntry, SessionId};

/// Gateway operations, used to target faults and gates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListSessions,
    CreateSession,
    DeleteSession,
    ListMessages,
    SubmitQuery,
    ListModels,
    InstallModel,
    LoadModel,
    ClearHistory,
    GetSettings,
    CommitSettings,
    PersistCredential,
    ModelStatus,
}

/// Test-side handle of a held call
///
/// `entered` resolves once the gated call has reached the gateway;
/// `release` lets it produce its response. Dropping the gate also releases.
pub struct Gate {
    entered: Option<oneshot::Receiver<()>>,
    release: Option<oneshot::Sender<()>>,
}

impl Gate {
    pub async fn entered(&mut self) {
        if let Some(rx) = self.entered.take() {
            let _ = rx.await;
        }
    }

    pub fn release(mut self) {
        if let Some(tx) = self.release.take() {
            let _ = tx.send(());
        }
    }
}

struct GateHandle {
    entered: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

type ReplyFn = Box<dyn Fn(&QueryRequest) -> String + Send + Sync>;
type NormalizeFn = Box<dyn Fn(GenerationSettings) -> GenerationSettings + Send + Sync>;

struct SimState {
    sessions: Vec<ChatSession>,
    messages: HashMap<SessionId, Vec<RemoteMessage>>,
    /// Catalog per credential; `None` is the public catalog
    catalogs: HashMap<Option<String>, Vec<ModelEntry>>,
    scripted_pages: VecDeque<Vec<ModelEntry>>,
    settings: GenerationSettings,
    credential: Option<String>,
    last_query: Option<QueryRequest>,
    last_page_request: Option<ModelPageRequest>,
    loaded_model: Option<String>,
    next_id: u64,
}

impl SimState {
    /// Modification time strictly after every session's, so list order is
    /// deterministic even when calls land in the same clock tick
    fn tick(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.sessions.iter().map(|s| s.last_modified).max() {
            Some(latest) if now <= latest => latest + chrono::Duration::milliseconds(1),
            _ => now,
        }
    }
}

/// In-memory gateway
pub struct SimGateway {
    state: Mutex<SimState>,
    faults: Mutex<HashMap<Op, VecDeque<GatewayError>>>,
    gates: Mutex<HashMap<Op, VecDeque<GateHandle>>>,
    calls: Mutex<HashMap<Op, usize>>,
    reply: Mutex<ReplyFn>,
    normalize: Mutex<NormalizeFn>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                sessions: Vec::new(),
                messages: HashMap::new(),
                catalogs: HashMap::new(),
                scripted_pages: VecDeque::new(),
                settings: GenerationSettings::default(),
                credential: None,
                last_query: None,
                last_page_request: None,
                loaded_model: None,
                next_id: 1,
            }),
            faults: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            reply: Mutex::new(Box::new(|req: &QueryRequest| {
                format!("[{}] {}", req.model, req.text)
            })),
            normalize: Mutex::new(Box::new(GenerationSettings::clamped)),
        }
    }

    /// Backend seeded with a small catalog and one conversation
    pub fn demo() -> Self {
        let sim = Self::new();
        sim.set_catalog(vec![
            ModelEntry::new("Mistral-7B-Instruct", true)
                .with_size(4_700_000_000)
                .with_parameters("7B")
                .with_family("mistral"),
            ModelEntry::new("Llama-2-7B-Chat", false)
                .with_size(3_800_000_000)
                .with_parameters("7B")
                .with_family("llama"),
            ModelEntry::new("Phi-2", false)
                .with_size(1_600_000_000)
                .with_parameters("2.7B")
                .with_family("phi"),
            ModelEntry::new("TinyLlama-1.1B-Chat", true)
                .with_size(670_000_000)
                .with_parameters("1.1B")
                .with_family("llama"),
            ModelEntry::new("Qwen-14B-Chat", false).with_parameters("14B"),
        ]);
        let chat = sim.add_session("Getting started");
        sim.add_message(&chat.id, Sender::User, "What can you do?");
        sim.add_message(
            &chat.id,
            Sender::Other("assistant".to_string()),
            "I answer questions using a model running on this machine.",
        );
        sim
    }

    // === Seeding ===

    pub fn add_session(&self, title: &str) -> ChatSession {
        let mut state = lock(&self.state);
        let session = ChatSession {
            id: SessionId::new(uuid::Uuid::new_v4().to_string()),
            title: title.to_string(),
            model_used: None,
            last_modified: state.tick(),
        };
        state.sessions.push(session.clone());
        state.messages.insert(session.id.clone(), Vec::new());
        session
    }

    pub fn add_message(&self, session: &SessionId, sender: Sender, content: &str) {
        let mut state = lock(&self.state);
        let id = state.next_id;
        state.next_id += 1;
        state
            .messages
            .entry(session.clone())
            .or_default()
            .push(RemoteMessage {
                id: format!("msg-{}", id),
                sender,
                content: content.to_string(),
                timestamp: Utc::now(),
            });
    }

    /// Replace the public catalog
    pub fn set_catalog(&self, entries: Vec<ModelEntry>) {
        lock(&self.state).catalogs.insert(None, entries);
    }

    /// Catalog served when the request carries `credential`
    pub fn set_catalog_for(&self, credential: &str, entries: Vec<ModelEntry>) {
        lock(&self.state)
            .catalogs
            .insert(Some(credential.to_string()), entries);
    }

    /// Serve `entries` verbatim for the next catalog request, whatever its cursor
    pub fn queue_page(&self, entries: Vec<ModelEntry>) {
        lock(&self.state).scripted_pages.push_back(entries);
    }

    pub fn set_settings(&self, settings: GenerationSettings) {
        lock(&self.state).settings = settings;
    }

    /// Override how stored settings are normalized on commit
    pub fn set_settings_normalizer<F>(&self, f: F)
    where
        F: Fn(GenerationSettings) -> GenerationSettings + Send + Sync + 'static,
    {
        *lock(&self.normalize) = Box::new(f);
    }

    pub fn set_reply<F>(&self, f: F)
    where
        F: Fn(&QueryRequest) -> String + Send + Sync + 'static,
    {
        *lock(&self.reply) = Box::new(f);
    }

    // === Test hooks ===

    /// Fail the next call of `op` with `error` (queued, one per call)
    pub fn fail_next(&self, op: Op, error: GatewayError) {
        lock(&self.faults).entry(op).or_default().push_back(error);
    }

    /// Hold the next call of `op` until the returned gate is released
    pub fn hold(&self, op: Op) -> Gate {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        lock(&self.gates).entry(op).or_default().push_back(GateHandle {
            entered: entered_tx,
            release: release_rx,
        });
        Gate {
            entered: Some(entered_rx),
            release: Some(release_tx),
        }
    }

    /// Number of calls made to `op` so far
    pub fn calls(&self, op: Op) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    pub fn loaded_model(&self) -> Option<String> {
        lock(&self.state).loaded_model.clone()
    }

    pub fn last_query(&self) -> Option<QueryRequest> {
        lock(&self.state).last_query.clone()
    }

    pub fn last_page_request(&self) -> Option<ModelPageRequest> {
        lock(&self.state).last_page_request.clone()
    }

    pub fn stored_credential(&self) -> Option<String> {
        lock(&self.state).credential.clone()
    }

    pub fn stored_settings(&self) -> GenerationSettings {
        lock(&self.state).settings
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        lock(&self.state)
            .sessions
            .iter()
            .map(|s| s.id.clone())
            .collect()
    }

    /// Count the call, wait on a gate if one is queued, then apply a fault
    async fn enter(&self, op: Op) -> GatewayResult<()> {
        *lock(&self.calls).entry(op).or_insert(0) += 1;

        let gate = lock(&self.gates).get_mut(&op).and_then(VecDeque::pop_front);
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.await;
        }

        let fault = lock(&self.faults).get_mut(&op).and_then(VecDeque::pop_front);
        match fault {
            Some(err) => {
                tracing::debug!("sim: injecting {:?} into {:?}", err, op);
                Err(err)
            }
            None => Ok(()),
        }
    }
}

impl Default for SimGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn chat_not_found() -> GatewayError {
    GatewayError::NotFound("Chat not found".to_string())
}

#[async_trait]
impl Gateway for SimGateway {
    async fn list_sessions(&self) -> GatewayResult<Vec<ChatSession>> {
        self.enter(Op::ListSessions).await?;
        let mut sessions = lock(&self.state).sessions.clone();
        // Most recently modified first; stable for equal timestamps
        sessions.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(sessions)
    }

    async fn create_session(&self, title: Option<&str>) -> GatewayResult<ChatSession> {
        self.enter(Op::CreateSession).await?;
        let mut state = lock(&self.state);
        let title = match title {
            Some(t) if !t.trim().is_empty() => t.to_string(),
            _ => format!("new_chat {}", state.sessions.len() + 1),
        };
        let session = ChatSession {
            id: SessionId::new(uuid::Uuid::new_v4().to_string()),
            title,
            model_used: None,
            last_modified: state.tick(),
        };
        state.sessions.push(session.clone());
        state.messages.insert(session.id.clone(), Vec::new());
        Ok(session)
    }

    async fn delete_session(&self, id: &SessionId) -> GatewayResult<()> {
        self.enter(Op::DeleteSession).await?;
        let mut state = lock(&self.state);
        let before = state.sessions.len();
        state.sessions.retain(|s| &s.id != id);
        if state.sessions.len() == before {
            return Err(chat_not_found());
        }
        state.messages.remove(id);
        Ok(())
    }

    async fn list_messages(&self, id: &SessionId) -> GatewayResult<Vec<RemoteMessage>> {
        self.enter(Op::ListMessages).await?;
        lock(&self.state)
            .messages
            .get(id)
            .cloned()
            .ok_or_else(chat_not_found)
    }

    async fn submit_query(&self, request: &QueryRequest) -> GatewayResult<QueryReply> {
        self.enter(Op::SubmitQuery).await?;
        let response = {
            let reply = lock(&self.reply);
            (*reply)(request)
        };

        let mut state = lock(&self.state);
        state.last_query = Some(request.clone());

        let installed = state
            .catalogs
            .values()
            .flatten()
            .any(|m| m.name == request.model && m.installed);
        if !installed {
            return Err(GatewayError::ServiceError(format!(
                "Error loading model: {} is not installed",
                request.model
            )));
        }
        state.loaded_model = Some(request.model.clone());

        let modified = state.tick();
        let Some(session) = state.sessions.iter_mut().find(|s| s.id == request.chat_id) else {
            return Err(chat_not_found());
        };
        session.last_modified = modified;
        session.model_used = Some(request.model.clone());

        let base = state.next_id;
        state.next_id += 2;
        let now = Utc::now();
        let thread = state.messages.entry(request.chat_id.clone()).or_default();
        thread.push(RemoteMessage {
            id: format!("msg-{}", base),
            sender: Sender::User,
            content: request.text.clone(),
            timestamp: now,
        });
        thread.push(RemoteMessage {
            id: format!("msg-{}", base + 1),
            sender: Sender::Other("assistant".to_string()),
            content: response.clone(),
            timestamp: now,
        });

        let tokens_used = (request.text.split_whitespace().count()
            + response.split_whitespace().count()) as u32;
        Ok(QueryReply {
            response,
            model: Some(request.model.clone()),
            tokens_used: Some(tokens_used),
        })
    }

    async fn list_models(&self, request: &ModelPageRequest) -> GatewayResult<Vec<ModelEntry>> {
        self.enter(Op::ListModels).await?;
        let mut state = lock(&self.state);
        state.last_page_request = Some(request.clone());

        if let Some(page) = state.scripted_pages.pop_front() {
            return Ok(page);
        }

        let catalog = state
            .catalogs
            .get(&request.credential)
            .or_else(|| state.catalogs.get(&None))
            .cloned()
            .unwrap_or_default();
        Ok(catalog
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect())
    }

    async fn install_model(&self, name: &str) -> GatewayResult<()> {
        self.enter(Op::InstallModel).await?;
        let mut state = lock(&self.state);
        let mut found = false;
        for entry in state.catalogs.values_mut().flatten() {
            if entry.name == name {
                entry.installed = true;
                found = true;
            }
        }
        if found {
            Ok(())
        } else {
            Err(GatewayError::NotFound(format!("Model {} not found", name)))
        }
    }

    async fn load_model(&self, name: &str) -> GatewayResult<()> {
        self.enter(Op::LoadModel).await?;
        let mut state = lock(&self.state);
        let installed = state
            .catalogs
            .values()
            .flatten()
            .any(|m| m.name == name && m.installed);
        if !installed {
            return Err(GatewayError::ServiceError(format!(
                "Error loading model: {} is not installed",
                name
            )));
        }
        state.loaded_model = Some(name.to_string());
        Ok(())
    }

    async fn clear_history(&self) -> GatewayResult<()> {
        self.enter(Op::ClearHistory).await?;
        Ok(())
    }

    async fn get_settings(&self) -> GatewayResult<GenerationSettings> {
        self.enter(Op::GetSettings).await?;
        Ok(lock(&self.state).settings)
    }

    async fn commit_settings(
        &self,
        settings: &GenerationSettings,
    ) -> GatewayResult<GenerationSettings> {
        self.enter(Op::CommitSettings).await?;
        let stored = {
            let normalize = lock(&self.normalize);
            (*normalize)(*settings)
        };
        lock(&self.state).settings = stored;
        Ok(stored)
    }

    async fn persist_credential(&self, value: &str) -> GatewayResult<()> {
        self.enter(Op::PersistCredential).await?;
        lock(&self.state).credential = if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        };
        Ok(())
    }

    async fn model_status(&self) -> GatewayResult<ModelStatus> {
        self.enter(Op::ModelStatus).await?;
        let loaded = lock(&self.state).loaded_model.clone();
        Ok(match loaded {
            Some(name) => ModelStatus {
                status: "Model loaded".to_string(),
                model_name: Some(name),
                context_size: Some(2048),
            },
            None => ModelStatus {
                status: "No model loaded".to_string(),
                model_name: None,
                context_size: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_missing_session_is_not_found() {
        let sim = SimGateway::new();
        let err = sim
            .delete_session(&SessionId::from("nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(sim.calls(Op::DeleteSession), 1);
    }

    #[tokio::test]
    async fn test_fault_is_consumed_once() {
        let sim = SimGateway::new();
        sim.fail_next(Op::ListSessions, GatewayError::Network("down".into()));
        assert!(sim.list_sessions().await.is_err());
        assert!(sim.list_sessions().await.is_ok());
    }

    #[tokio::test]
    async fn test_create_uses_numbered_default_title() {
        let sim = SimGateway::new();
        let first = sim.create_session(None).await.unwrap();
        let second = sim.create_session(Some("Notes")).await.unwrap();
        assert_eq!(first.title, "new_chat 1");
        assert_eq!(second.title, "Notes");
    }

    #[tokio::test]
    async fn test_query_requires_installed_model() {
        let sim = SimGateway::demo();
        let chat = sim.session_ids()[0].clone();
        let req = QueryRequest::new(
            chat.clone(),
            "Llama-2-7B-Chat",
            "hi",
            GenerationSettings::default(),
        );
        let err = sim.submit_query(&req).await.unwrap_err();
        assert!(err.detail().contains("not installed"));

        let req = QueryRequest::new(chat, "Mistral-7B-Instruct", "hi", GenerationSettings::default());
        let reply = sim.submit_query(&req).await.unwrap();
        assert_eq!(reply.response, "[Mistral-7B-Instruct] hi");
    }

    #[tokio::test]
    async fn test_credential_selects_catalog() {
        let sim = SimGateway::new();
        sim.set_catalog(vec![ModelEntry::new("public", true)]);
        sim.set_catalog_for("secret", vec![ModelEntry::new("gated", true)]);

        let page = |credential: Option<&str>| ModelPageRequest {
            offset: 0,
            limit: 10,
            credential: credential.map(str::to_string),
        };
        let public = sim.list_models(&page(None)).await.unwrap();
        assert_eq!(public[0].name, "public");
        let gated = sim.list_models(&page(Some("secret"))).await.unwrap();
        assert_eq!(gated[0].name, "gated");
    }

    #[tokio::test]
    async fn test_load_model_shows_in_status() {
        let sim = SimGateway::demo();
        let status = sim.model_status().await.unwrap();
        assert_eq!(status.model_name, None);

        let err = sim.load_model("Llama-2-7B-Chat").await.unwrap_err();
        assert!(err.detail().contains("not installed"));

        sim.load_model("TinyLlama-1.1B-Chat").await.unwrap();
        let status = sim.model_status().await.unwrap();
        assert_eq!(status.model_name.as_deref(), Some("TinyLlama-1.1B-Chat"));
    }
}
