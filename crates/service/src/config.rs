// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capability resolution and priority policy (spec §4.6 "Capability
//! resolution", "Priority").

use memhub_core::{Capability, TaskType};
use std::collections::HashMap;

/// Static `kind -> [provider...]` table backing capability resolution. The
/// first entry in a kind's provider list is its default.
#[derive(Debug, Clone)]
pub struct CapabilityTable {
    providers: HashMap<TaskType, Vec<String>>,
}

impl CapabilityTable {
    /// `providers` must list, for each kind, its default provider first.
    pub fn new(providers: HashMap<TaskType, Vec<String>>) -> Self {
        Self { providers }
    }

    fn providers_for(&self, task_type: TaskType) -> &[String] {
        self.providers.get(&task_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Required capability plus its fallback list, preserving declared
    /// order and excluding the required provider from the fallbacks (spec
    /// §4.6: "Fallbacks = the full provider list for `kind` minus the
    /// required capability").
    pub fn resolve(&self, task_type: TaskType, preferred_provider: Option<&str>) -> (Capability, Vec<Capability>) {
        let providers = self.providers_for(task_type);
        let default = providers.first().map(String::as_str).unwrap_or("default");
        let chosen = preferred_provider.unwrap_or(default);
        let required = Capability::new(task_type.to_string(), chosen);
        let fallbacks = providers.iter().filter(|p| p.as_str() != chosen).map(|p| Capability::new(task_type.to_string(), p)).collect();
        (required, fallbacks)
    }
}

impl Default for CapabilityTable {
    /// Every kind the Task Service queues shares the same provider roster;
    /// only the seed scenario in spec §8 pins a concrete ordering
    /// (`observation:mistral` required, `gemini,openrouter,openai,sdk`
    /// fallback), so the remaining kinds reuse it rather than invent an
    /// unstated one.
    fn default() -> Self {
        let roster = ["mistral", "gemini", "openrouter", "openai", "sdk"].map(String::from).to_vec();
        let mut providers = HashMap::new();
        for task_type in [TaskType::Observation, TaskType::Summarize, TaskType::Embedding, TaskType::ContextGenerate, TaskType::ClaudeMd, TaskType::SemanticSearch] {
            providers.insert(task_type, roster.clone());
        }
        Self::new(providers)
    }
}

/// Per-kind priority offsets from a shared base (spec §4.6 "Priority").
#[derive(Debug, Clone, Copy)]
pub struct PriorityPolicy {
    pub base: i32,
    pub context_generate_offset: i32,
    pub summarize_offset: i32,
    pub embedding_offset: i32,
    pub claude_md_offset: i32,
    pub semantic_search_offset: i32,
}

impl PriorityPolicy {
    pub fn priority_for(&self, task_type: TaskType) -> i32 {
        let offset = match task_type {
            TaskType::Observation => 0,
            TaskType::ContextGenerate => self.context_generate_offset,
            TaskType::Summarize => self.summarize_offset,
            TaskType::Embedding => self.embedding_offset,
            TaskType::ClaudeMd => self.claude_md_offset,
            TaskType::SemanticSearch => self.semantic_search_offset,
            TaskType::QdrantSync | TaskType::Compression => 0,
        };
        self.base + offset
    }
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self { base: 50, context_generate_offset: 10, summarize_offset: -10, embedding_offset: -20, claude_md_offset: -20, semantic_search_offset: 10 }
    }
}

/// Tunables for the Task Service (spec §4.6, §6 "Environment / configuration").
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// `queueX` throws `QueueFull` once `pending + assigned + processing`
    /// exceeds this (spec §4.6 Backpressure).
    pub max_pending_tasks: usize,
    pub priority: PriorityPolicy,
    pub capabilities: CapabilityTable,
    /// How many prefetched observations/summaries to attach to payloads
    /// that don't take an explicit `limit` argument.
    pub default_prefetch_limit: usize,
    /// `executeSemanticSearch`'s poll-fallback interval, used only if the
    /// Event Bus mailbox wait never wakes before the deadline.
    pub poll_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_pending_tasks: 1000,
            priority: PriorityPolicy::default(),
            capabilities: CapabilityTable::default(),
            default_prefetch_limit: 20,
            poll_interval_ms: 250,
        }
    }
}
