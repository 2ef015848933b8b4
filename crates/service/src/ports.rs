// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only seams onto the non-queue persistence the Task Service
//! prefetches into task payloads so workers stay stateless. Storing
//! observations, session prompts, and summaries is out of scope here
//! (spec §1 item 7, §9 Design Notes "In-process singletons"); the
//! composition root supplies concrete implementations.

use async_trait::async_trait;
use memhub_core::CoreError;

/// An observation row, opaque to this crate beyond what it forwards into
/// a task payload.
pub type ObservationRecord = serde_json::Value;

/// A summary row, opaque to this crate beyond what it forwards into a
/// task payload.
pub type SummaryRecord = serde_json::Value;

#[async_trait]
pub trait ObservationRepository: Send + Sync {
    /// Observations for one session, in creation order, for
    /// `queueSummarize`'s stateless payload.
    async fn for_session(&self, session_id: &str) -> Result<Vec<ObservationRecord>, CoreError>;

    /// Most recent observations for a project, optionally narrowed to
    /// those whose working directory starts with `cwd_prefix` (spec §4.6
    /// `queueClaudeMd`: "optionally filtered by `cwdPrefix=targetDirectory`").
    async fn recent_for_project(&self, project: &str, cwd_prefix: Option<&str>, limit: usize) -> Result<Vec<ObservationRecord>, CoreError>;

    /// Observations by id, for `queueEmbedding`.
    async fn by_ids(&self, ids: &[String]) -> Result<Vec<ObservationRecord>, CoreError>;
}

#[async_trait]
pub trait SessionPromptRepository: Send + Sync {
    /// The session's original user prompt, if recorded.
    async fn user_prompt(&self, session_id: &str) -> Result<Option<String>, CoreError>;
}

#[async_trait]
pub trait SummaryRepository: Send + Sync {
    /// Most recent summaries for a project, for `queueClaudeMd`'s payload.
    async fn recent_for_project(&self, project: &str, limit: usize) -> Result<Vec<SummaryRecord>, CoreError>;
}
