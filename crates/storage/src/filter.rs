// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Query parameters for [`crate::repository::TaskRepository::list`] (spec §4.1).

use memhub_core::{TaskStatus, TaskType};

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
}

impl TaskFilter {
    pub fn matches(&self, status: TaskStatus, task_type: TaskType) -> bool {
        self.status.map(|s| s == status).unwrap_or(true) && self.task_type.map(|t| t == task_type).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Paging {
    pub offset: usize,
    pub limit: usize,
}

impl Paging {
    pub fn all() -> Self {
        Self { offset: 0, limit: usize::MAX }
    }
}

impl Default for Paging {
    fn default() -> Self {
        Self::all()
    }
}
