// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stand-ins for the non-queue persistence the Task Service reads from to
//! prefetch task payloads (spec §1 item 7, §9 "In-process singletons";
//! `memhub-service`'s `ports` module: "composition root supplies concrete
//! implementations"). Observation/session/summary storage is out of scope
//! for this subsystem, so this binary wires up read-only stubs that always
//! report "nothing recorded" rather than leaving `TaskService` unconstructable.

use async_trait::async_trait;
use memhub_core::CoreError;
use memhub_service::ports::{ObservationRecord, ObservationRepository, SessionPromptRepository, SummaryRecord, SummaryRepository};

pub struct NullObservationRepository;

#[async_trait]
impl ObservationRepository for NullObservationRepository {
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

pub struct NullSessionPromptRepository;

#[async_trait]
impl SessionPromptRepository for NullSessionPromptRepository {
    async fn user_prompt(&self, _session_id: &str) -> Result<Option<String>, CoreError> {
        Ok(None)
    }
}

pub struct NullSummaryRepository;

#[async_trait]
impl SummaryRepository for NullSummaryRepository {
    async fn recent_for_project(&self, _project: &str, _limit: usize) -> Result<Vec<SummaryRecord>, CoreError> {
        Ok(Vec::new())
    }
}
