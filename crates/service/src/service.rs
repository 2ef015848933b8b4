// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Task Service itself (spec §4.6).

use crate::config::ServiceConfig;
use crate::ports::{ObservationRepository, SessionPromptRepository, SummaryRepository};
use memhub_bus::EventBus;
use memhub_core::{ClientType, CoreError, DispatchTrigger, Task, TaskConfig, TaskId, TaskStatus, TaskType};
use memhub_storage::{StorageError, TaskRepository};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn storage_err(err: StorageError) -> CoreError {
    CoreError::StorageFailure(err.to_string())
}

pub struct QueueObservationRequest {
    pub session_id: String,
    pub project: String,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    pub tool_output: serde_json::Value,
    pub prompt_number: Option<u64>,
    pub preferred_provider: Option<String>,
    pub git_branch: Option<String>,
    pub cwd: Option<String>,
    pub target_directory: Option<String>,
}

pub struct QueueSummarizeRequest {
    pub session_id: String,
    pub project: String,
    pub preferred_provider: Option<String>,
}

pub struct QueueEmbeddingRequest {
    pub observation_ids: Vec<String>,
    pub preferred_provider: Option<String>,
}

pub struct QueueContextGenerateRequest {
    pub project: String,
    pub query: Option<String>,
    pub limit: Option<usize>,
}

pub struct QueueClaudeMdRequest {
    pub content_session_id: String,
    pub memory_session_id: String,
    pub project: String,
    pub working_directory: Option<String>,
    pub target_directory: Option<String>,
}

/// Opaque filter blob forwarded into a semantic-search task payload; the
/// worker interprets its shape.
pub type SearchFilters = serde_json::Value;

/// Typed public API over the TaskQueue and the dispatcher's wake signal
/// (spec §4.6).
pub struct TaskService {
    repository: Arc<dyn TaskRepository>,
    bus: Arc<EventBus>,
    dispatch_trigger: Option<Arc<dyn DispatchTrigger>>,
    config: ServiceConfig,
    observations: Arc<dyn ObservationRepository>,
    prompts: Arc<dyn SessionPromptRepository>,
    summaries: Arc<dyn SummaryRepository>,
}

impl TaskService {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        bus: Arc<EventBus>,
        dispatch_trigger: Option<Arc<dyn DispatchTrigger>>,
        config: ServiceConfig,
        observations: Arc<dyn ObservationRepository>,
        prompts: Arc<dyn SessionPromptRepository>,
        summaries: Arc<dyn SummaryRepository>,
    ) -> Self {
        Self { repository, bus, dispatch_trigger, config, observations, prompts, summaries }
    }

    fn check_backpressure(&self) -> Result<(), CoreError> {
        let counts = self.repository.count_by_status().map_err(storage_err)?;
        let active: usize =
            [TaskStatus::Pending, TaskStatus::Assigned, TaskStatus::Processing].iter().map(|s| counts.get(s).copied().unwrap_or(0)).sum();
        if active >= self.config.max_pending_tasks {
            return Err(CoreError::QueueFull { pending_plus_active: active, cap: self.config.max_pending_tasks });
        }
        Ok(())
    }

    fn finish_enqueue(&self, task: &Task) {
        self.bus.publish("task:queued", serde_json::json!({"id": task.id, "taskType": task.task_type.to_string()}));
        if let Some(trigger) = &self.dispatch_trigger {
            trigger.wake();
        }
    }

    pub async fn queue_observation(&self, req: QueueObservationRequest) -> Result<Task, CoreError> {
        self.check_backpressure()?;
        let (required, fallbacks) = self.config.capabilities.resolve(TaskType::Observation, req.preferred_provider.as_deref());
        let seed = format!("{}:{}:{}:{}", req.session_id, req.prompt_number.unwrap_or_default(), req.tool_name, req.tool_output);
        let payload = serde_json::json!({
            "sessionId": req.session_id,
            "project": req.project,
            "toolName": req.tool_name,
            "toolInput": req.tool_input,
            "toolOutput": req.tool_output,
            "promptNumber": req.prompt_number,
            "gitBranch": req.git_branch,
            "cwd": req.cwd,
            "targetDirectory": req.target_directory,
        });
        let config = TaskConfig::builder(TaskType::Observation, required)
            .fallback_capabilities(fallbacks)
            .payload(payload)
            .priority(self.config.priority.priority_for(TaskType::Observation))
            .dedup_seed(seed)
            .build();
        let task = self.repository.create(config).map_err(storage_err)?;
        self.finish_enqueue(&task);
        Ok(task)
    }

    /// Loads the session's user prompt and current observation set so the
    /// worker doesn't need its own repository access (spec §4.6
    /// `queueSummarize`).
    pub async fn queue_summarize(&self, req: QueueSummarizeRequest) -> Result<Task, CoreError> {
        self.check_backpressure()?;
        let (required, fallbacks) = self.config.capabilities.resolve(TaskType::Summarize, req.preferred_provider.as_deref());
        let user_prompt = self.prompts.user_prompt(&req.session_id).await?;
        let observations = self.observations.for_session(&req.session_id).await?;
        let payload = serde_json::json!({
            "sessionId": req.session_id,
            "project": req.project,
            "userPrompt": user_prompt,
            "observations": observations,
        });
        let config = TaskConfig::builder(TaskType::Summarize, required)
            .fallback_capabilities(fallbacks)
            .payload(payload)
            .priority(self.config.priority.priority_for(TaskType::Summarize))
            .dedup_seed(format!("{}:{}", req.session_id, req.project))
            .build();
        let task = self.repository.create(config).map_err(storage_err)?;
        self.finish_enqueue(&task);
        Ok(task)
    }

    pub async fn queue_embedding(&self, req: QueueEmbeddingRequest) -> Result<Task, CoreError> {
        self.check_backpressure()?;
        let (required, fallbacks) = self.config.capabilities.resolve(TaskType::Embedding, req.preferred_provider.as_deref());
        let observations = self.observations.by_ids(&req.observation_ids).await?;
        let payload = serde_json::json!({"observationIds": req.observation_ids, "observations": observations});
        let config = TaskConfig::builder(TaskType::Embedding, required)
            .fallback_capabilities(fallbacks)
            .payload(payload)
            .priority(self.config.priority.priority_for(TaskType::Embedding))
            .dedup_seed(req.observation_ids.join(","))
            .build();
        let task = self.repository.create(config).map_err(storage_err)?;
        self.finish_enqueue(&task);
        Ok(task)
    }

    /// Prefetches recent observations into the payload (spec §4.6
    /// `queueContextGenerate`).
    pub async fn queue_context_generate(&self, req: QueueContextGenerateRequest) -> Result<Task, CoreError> {
        self.check_backpressure()?;
        let (required, fallbacks) = self.config.capabilities.resolve(TaskType::ContextGenerate, None);
        let limit = req.limit.unwrap_or(self.config.default_prefetch_limit);
        let observations = self.observations.recent_for_project(&req.project, None, limit).await?;
        let payload = serde_json::json!({"project": req.project, "query": req.query, "observations": observations});
        let config = TaskConfig::builder(TaskType::ContextGenerate, required)
            .fallback_capabilities(fallbacks)
            .payload(payload)
            .priority(self.config.priority.priority_for(TaskType::ContextGenerate))
            .dedup_seed(format!("{}:{}", req.project, req.query.clone().unwrap_or_default()))
            .build();
        let task = self.repository.create(config).map_err(storage_err)?;
        self.finish_enqueue(&task);
        Ok(task)
    }

    /// Prefetches observations (optionally `cwdPrefix`-filtered) and recent
    /// summaries, then coalesces bursts via `createIfNotExists` (spec §4.6
    /// `queueClaudeMd`). Returns `None` for a coalesced duplicate.
    pub async fn queue_claude_md(&self, req: QueueClaudeMdRequest) -> Result<Option<Task>, CoreError> {
        self.check_backpressure()?;
        let (required, fallbacks) = self.config.capabilities.resolve(TaskType::ClaudeMd, None);
        let cwd_prefix = req.target_directory.as_deref();
        let observations = self.observations.recent_for_project(&req.project, cwd_prefix, self.config.default_prefetch_limit).await?;
        let summaries = self.summaries.recent_for_project(&req.project, self.config.default_prefetch_limit).await?;
        let payload = serde_json::json!({
            "contentSessionId": req.content_session_id,
            "memorySessionId": req.memory_session_id,
            "project": req.project,
            "workingDirectory": req.working_directory,
            "targetDirectory": req.target_directory,
            "observations": observations,
            "summaries": summaries,
        });
        // Dedup key matches on project + memory session id, per the task
        // type's documented scheme (memhub_core::task::dedup_key).
        let config = TaskConfig::builder(TaskType::ClaudeMd, required)
            .fallback_capabilities(fallbacks)
            .payload(payload)
            .priority(self.config.priority.priority_for(TaskType::ClaudeMd))
            .dedup_seed(format!("{}:{}", req.project, req.memory_session_id))
            .build();
        let Some(task) = self.repository.create_if_not_exists(config).map_err(storage_err)? else {
            return Ok(None);
        };
        self.finish_enqueue(&task);
        Ok(Some(task))
    }

    /// Enqueues a semantic-search task, then waits for it to reach a
    /// terminal status and returns its result (spec §4.6
    /// `executeSemanticSearch`). Each call subscribes its own Event Bus
    /// client so a completion published between enqueue and subscribe is
    /// never missed: the repository is always checked once up front before
    /// the wait loop begins.
    pub async fn execute_semantic_search(
        &self,
        query: String,
        filters: Option<SearchFilters>,
        limit: Option<usize>,
        timeout_ms: u64,
    ) -> Result<serde_json::Value, CoreError> {
        self.check_backpressure()?;
        let (required, fallbacks) = self.config.capabilities.resolve(TaskType::SemanticSearch, None);
        let payload = serde_json::json!({"query": query, "filters": filters, "limit": limit});
        let config = TaskConfig::builder(TaskType::SemanticSearch, required)
            .fallback_capabilities(fallbacks)
            .payload(payload)
            .priority(self.config.priority.priority_for(TaskType::SemanticSearch))
            .dedup_seed(TaskId::new().to_string())
            .build();
        let task = self.repository.create(config).map_err(storage_err)?;
        self.finish_enqueue(&task);

        let finished = self.await_terminal(task.id, timeout_ms).await?;
        match finished.status {
            TaskStatus::Completed => Ok(finished.result.unwrap_or(serde_json::Value::Null)),
            TaskStatus::Failed | TaskStatus::Timeout => Err(CoreError::TaskFailed(finished.error.unwrap_or_default())),
            TaskStatus::Pending | TaskStatus::Assigned | TaskStatus::Processing => {
                unreachable!("await_terminal only returns a task once its status is terminal")
            }
        }
    }

    /// Waits on a direct completion signal from the Event Bus rather than
    /// re-querying the repository in a tight loop (spec §9 Design Notes:
    /// "prefer a direct wait on a per-task completion signal"); the repeated
    /// repository check only guards against a signal the ephemeral bus
    /// dropped or never delivered.
    async fn await_terminal(&self, task_id: TaskId, timeout_ms: u64) -> Result<Task, CoreError> {
        let client_id = format!("task-service-search-{task_id}");
        let mailbox =
            self.bus.subscribe(client_id.clone(), ClientType::SseWriter, &["task:completed".to_string(), "task:failed".to_string(), "task:timeout".to_string()], HashSet::new());
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

        let result = loop {
            match self.repository.find_by_id(task_id).map_err(storage_err)? {
                Some(task) if task.status.is_terminal() => break Ok(task),
                Some(_) | None => {}
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break Err(CoreError::Timeout);
            }
            let wait_cap = Duration::from_millis(self.config.poll_interval_ms).min(deadline - now);
            tokio::select! {
                _ = mailbox.recv() => {}
                _ = tokio::time::sleep(wait_cap) => {}
            }
        };

        self.bus.unsubscribe(&client_id, None);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::ports::{ObservationRecord, SummaryRecord};
    use async_trait::async_trait;
    use memhub_core::FakeClock;
    use memhub_storage::{Paging, StatusPatch, TaskFilter, WalTaskRepository};
    use tempfile::tempdir;

    struct NullContext;

    #[async_trait]
    impl ObservationRepository for NullContext {
        async fn for_session(&self, _session_id: &str) -> Result<Vec<ObservationRecord>, CoreError> {
            Ok(Vec::new())
        }

        async fn recent_for_project(&self, _project: &str, _cwd_prefix: Option<&str>, _limit: usize) -> Result<Vec<ObservationRecord>, CoreError> {
            Ok(Vec::new())
        }

        async fn by_ids(&self, _ids: &[String]) -> Result<Vec<ObservationRecord>, CoreError> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl SessionPromptRepository for NullContext {
        async fn user_prompt(&self, _session_id: &str) -> Result<Option<String>, CoreError> {
            Ok(None)
        }
    }

    #[async_trait]
    impl SummaryRepository for NullContext {
        async fn recent_for_project(&self, _project: &str, _limit: usize) -> Result<Vec<SummaryRecord>, CoreError> {
            Ok(Vec::new())
        }
    }

    fn service(repository: Arc<dyn TaskRepository>, bus: Arc<EventBus>, config: ServiceConfig) -> TaskService {
        TaskService::new(repository, bus, None, config, Arc::new(NullContext), Arc::new(NullContext), Arc::new(NullContext))
    }

    fn repo(dir: &std::path::Path) -> Arc<dyn TaskRepository> {
        Arc::new(WalTaskRepository::open(&dir.join("tasks.wal"), &dir.join("tasks.snapshot.zst"), FakeClock::new()).unwrap())
    }

    #[tokio::test]
    async fn queue_observation_resolves_default_provider_and_fallbacks() {
        let dir = tempdir().unwrap();
        let svc = service(repo(dir.path()), Arc::new(EventBus::new()), ServiceConfig::default());

        let task = svc
            .queue_observation(QueueObservationRequest {
                session_id: "s1".into(),
                project: "proj".into(),
                tool_name: "Read".into(),
                tool_input: serde_json::json!({}),
                tool_output: serde_json::json!("x"),
                prompt_number: None,
                preferred_provider: None,
                git_branch: None,
                cwd: None,
                target_directory: None,
            })
            .await
            .unwrap();

        assert_eq!(task.required_capability.as_str(), "observation:mistral");
        let fallback_strs: Vec<_> = task.fallback_capabilities.iter().map(|c| c.as_str()).collect();
        assert_eq!(fallback_strs, vec!["observation:gemini", "observation:openrouter", "observation:openai", "observation:sdk"]);
        assert_eq!(task.priority, 50);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn backpressure_rejects_once_cap_is_exceeded() {
        let dir = tempdir().unwrap();
        let config = ServiceConfig { max_pending_tasks: 1, ..ServiceConfig::default() };
        let svc = service(repo(dir.path()), Arc::new(EventBus::new()), config);

        let request = || QueueContextGenerateRequest { project: "proj".into(), query: None, limit: None };
        svc.queue_context_generate(request()).await.unwrap();
        let err = svc.queue_context_generate(request()).await.unwrap_err();
        assert!(matches!(err, CoreError::QueueFull { .. }));
    }

    #[tokio::test]
    async fn queue_claude_md_coalesces_bursts_by_createifnotexists() {
        let dir = tempdir().unwrap();
        let svc = service(repo(dir.path()), Arc::new(EventBus::new()), ServiceConfig::default());

        let request = || QueueClaudeMdRequest {
            content_session_id: "content-1".into(),
            memory_session_id: "memory-1".into(),
            project: "proj".into(),
            working_directory: None,
            target_directory: None,
        };

        let first = svc.queue_claude_md(request()).await.unwrap();
        assert!(first.is_some());
        for _ in 0..9 {
            let duplicate = svc.queue_claude_md(request()).await.unwrap();
            assert!(duplicate.is_none());
        }
    }

    #[tokio::test]
    async fn execute_semantic_search_returns_result_once_a_worker_completes_it() {
        let dir = tempdir().unwrap();
        let repository = repo(dir.path());
        let bus = Arc::new(EventBus::new());
        let svc = service(repository.clone(), bus.clone(), ServiceConfig::default());

        tokio::spawn(async move {
            loop {
                let filter = TaskFilter { status: Some(TaskStatus::Pending), task_type: Some(TaskType::SemanticSearch) };
                if let Some(task) = repository.list(&filter, Paging::all()).unwrap().into_iter().next() {
                    let patch = StatusPatch { result: Some(serde_json::json!({"hits": []})), error: None };
                    repository.update_status(task.id, TaskStatus::Completed, patch).unwrap();
                    bus.publish("task:completed", serde_json::json!({"id": task.id}));
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let result = svc.execute_semantic_search("find bugs".into(), None, None, 2_000).await.unwrap();
        assert_eq!(result, serde_json::json!({"hits": []}));
    }

    #[tokio::test]
    async fn execute_semantic_search_times_out_when_nothing_completes_it() {
        let dir = tempdir().unwrap();
        let svc = service(repo(dir.path()), Arc::new(EventBus::new()), ServiceConfig::default());

        let err = svc.execute_semantic_search("find bugs".into(), None, None, 50).await.unwrap_err();
        assert!(matches!(err, CoreError::Timeout));
    }
}
