//! Task and project entities
//!
//! Entities are owned by storage. The resolver and hybrid search only ever
//! hand out an [`EntityProjection`]; the [`EntityStore`] is the data-access
//! layer that keeps each entity's embedding in step with its text fields.

use crate::embedding::{EmbeddingMode, EmbeddingProvider};
use crate::error::{MemoryError, MemoryResult};
use crate::storage::{
    collections, current_time, from_document, get_path, timestamp_value, to_document, Document,
    Filter, FindOptions, StorageAdapter, Update, ID_FIELD,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Field holding an entity's embedding vector
pub const EMBEDDING_FIELD: &str = "embedding";

/// Field flagging synthetic entities that retrieval must never return
pub const TEST_DATA_FIELD: &str = "is_test_data";

/// Entity class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Project,
}

impl EntityKind {
    /// Collection holding this kind
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Task => collections::TASKS,
            EntityKind::Project => collections::PROJECTS,
        }
    }

    /// Field shown to users and compared lexically by the resolver
    pub fn display_field(&self) -> &'static str {
        match self {
            EntityKind::Task => "title",
            EntityKind::Project => "name",
        }
    }

    /// Fields covered by text search
    pub fn text_fields(&self) -> [&'static str; 2] {
        [self.display_field(), "description"]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Task => "task",
            EntityKind::Project => "project",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "task" | "tasks" => Ok(EntityKind::Task),
            "project" | "projects" => Ok(EntityKind::Project),
            other => Err(MemoryError::validation(
                "entity_type",
                format!("unknown entity type '{other}'"),
            )),
        }
    }
}

/// Task lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
        }
    }
}

/// Task priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

/// Project lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Active,
    Completed,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Archived => "archived",
        }
    }
}

/// One entry of an entity's append-only activity log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// What happened ("created", "status_changed", "note", ...)
    pub action: String,

    /// Free-text detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    /// When it happened
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub at: DateTime<Utc>,
}

impl ActivityEntry {
    /// Create an entry stamped now
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            note: None,
            at: current_time(),
        }
    }

    /// Attach a note
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// A stored task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub status: TaskStatus,

    #[serde(default)]
    pub priority: TaskPriority,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Document-mode embedding of title and description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    #[serde(default)]
    pub activity_log: Vec<ActivityEntry>,

    #[serde(default)]
    pub is_test_data: bool,

    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_microseconds")]
    pub updated_at: DateTime<Utc>,
}

/// A stored project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "_id")]
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub status: ProjectStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    #[serde(default)]
    pub activity_log: Vec<ActivityEntry>,

    #[serde(default)]
    pub is_test_data: bool,

    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_microseconds")]
    pub updated_at: DateTime<Utc>,
}

/// Lightweight view of an entity used for ranking and tool output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityProjection {
    pub id: String,
    pub kind: EntityKind,
    pub display_name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl EntityProjection {
    /// Project a stored document; `None` when it lacks an id or display name
    pub fn from_document(kind: EntityKind, document: &Document) -> Option<Self> {
        let id = document.get(ID_FIELD)?.as_str()?.to_string();
        let display_name = get_path(document, kind.display_field())?.as_str()?.to_string();
        let status = document
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let project_id = document
            .get("project_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(Self {
            id,
            kind,
            display_name,
            status,
            project_id,
        })
    }
}

/// Input for [`EntityStore::create_task`]
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub project_id: Option<String>,
    pub is_test_data: bool,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn in_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Flag as synthetic data excluded from retrieval
    pub fn as_test_data(mut self) -> Self {
        self.is_test_data = true;
        self
    }
}

/// Input for [`EntityStore::create_project`]
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub is_test_data: bool,
}

impl NewProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_status(mut self, status: ProjectStatus) -> Self {
        self.status = status;
        self
    }

    pub fn as_test_data(mut self) -> Self {
        self.is_test_data = true;
        self
    }
}

/// Partial task edit; `None` fields are left unchanged
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub project_id: Option<String>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    fn changes_text(&self) -> bool {
        self.title.is_some() || self.description.is_some()
    }
}

/// Partial project edit; `None` fields are left unchanged
#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
}

impl ProjectPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn status(mut self, status: ProjectStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn changes_text(&self) -> bool {
        self.name.is_some() || self.description.is_some()
    }
}

/// Filter for [`EntityStore::list_tasks`]
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub project_id: Option<String>,
    pub include_test_data: bool,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn in_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn including_test_data(mut self) -> Self {
        self.include_test_data = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Reject ids that are not UUIDs
pub(crate) fn parse_entity_id(entity: &str, id: &str) -> MemoryResult<()> {
    uuid::Uuid::parse_str(id.trim())
        .map(|_| ())
        .map_err(|_| MemoryError::invalid_reference(entity, id))
}

fn embedding_text(display: &str, description: Option<&str>) -> String {
    match description {
        Some(description) if !description.trim().is_empty() => format!("{display}. {description}"),
        _ => display.to_string(),
    }
}

/// Data access for tasks and projects
pub struct EntityStore {
    /// Storage backend
    storage: Arc<dyn StorageAdapter>,

    /// Embeds entity text on create and on text edits
    embedder: Arc<dyn EmbeddingProvider>,
}

impl EntityStore {
    /// Create a new entity store
    pub fn new(storage: Arc<dyn StorageAdapter>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { storage, embedder }
    }

    /// Embed entity text; failures degrade to no embedding
    async fn embed_or_none(&self, kind: EntityKind, text: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(text, EmbeddingMode::Document).await {
            Ok(embedding) => Some(embedding.vector),
            Err(e) => {
                tracing::warn!(
                    entity_type = %kind,
                    error = %e,
                    "Embedding failed, storing entity without embedding"
                );
                None
            }
        }
    }

    /// Create a task
    pub async fn create_task(&self, input: NewTask) -> MemoryResult<Task> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(MemoryError::validation("title", "must not be empty"));
        }
        if let Some(project_id) = &input.project_id {
            if self.get_project(project_id).await?.is_none() {
                return Err(MemoryError::not_found("project", project_id.clone()));
            }
        }

        let embedding = self
            .embed_or_none(
                EntityKind::Task,
                &embedding_text(title, input.description.as_deref()),
            )
            .await;
        let now = current_time();
        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: input.description,
            status: input.status,
            priority: input.priority,
            project_id: input.project_id,
            embedding,
            activity_log: vec![ActivityEntry::new("created")],
            is_test_data: input.is_test_data,
            created_at: now,
            updated_at: now,
        };

        self.storage
            .insert(collections::TASKS, to_document(&task, "task")?)
            .await?;
        tracing::debug!(task_id = %task.id, embedded = task.embedding.is_some(), "Created task");
        Ok(task)
    }

    /// Create a project
    pub async fn create_project(&self, input: NewProject) -> MemoryResult<Project> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(MemoryError::validation("name", "must not be empty"));
        }

        let embedding = self
            .embed_or_none(
                EntityKind::Project,
                &embedding_text(name, input.description.as_deref()),
            )
            .await;
        let now = current_time();
        let project = Project {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: input.description,
            status: input.status,
            embedding,
            activity_log: vec![ActivityEntry::new("created")],
            is_test_data: input.is_test_data,
            created_at: now,
            updated_at: now,
        };

        self.storage
            .insert(collections::PROJECTS, to_document(&project, "project")?)
            .await?;
        tracing::debug!(project_id = %project.id, "Created project");
        Ok(project)
    }

    /// Get a task by id
    pub async fn get_task(&self, id: &str) -> MemoryResult<Option<Task>> {
        parse_entity_id("task", id)?;
        self.storage
            .find_one(collections::TASKS, &Filter::by_id(id.trim()))
            .await?
            .map(|doc| from_document(doc, "task"))
            .transpose()
    }

    /// Get a project by id
    pub async fn get_project(&self, id: &str) -> MemoryResult<Option<Project>> {
        parse_entity_id("project", id)?;
        self.storage
            .find_one(collections::PROJECTS, &Filter::by_id(id.trim()))
            .await?
            .map(|doc| from_document(doc, "project"))
            .transpose()
    }

    /// Projection of any entity by id
    pub async fn get_projection(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> MemoryResult<Option<EntityProjection>> {
        parse_entity_id(kind.as_str(), id)?;
        Ok(self
            .storage
            .find_one(kind.collection(), &Filter::by_id(id.trim()))
            .await?
            .and_then(|doc| EntityProjection::from_document(kind, &doc)))
    }

    /// Apply a partial edit to a task
    ///
    /// When the title or description changes the embedding is regenerated
    /// before the write returns.
    pub async fn update_task(&self, id: &str, patch: TaskPatch) -> MemoryResult<Task> {
        let current = self
            .get_task(id)
            .await?
            .ok_or_else(|| MemoryError::not_found("task", id))?;

        let mut update = Update::new().set("updated_at", timestamp_value(current_time()));
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(MemoryError::validation("title", "must not be empty"));
            }
            update = update.set("title", title.trim());
        }
        if let Some(description) = &patch.description {
            update = update.set("description", description.as_str());
        }
        if let Some(priority) = patch.priority {
            update = update.set("priority", to_value(&priority)?);
        }
        if let Some(project_id) = &patch.project_id {
            if self.get_project(project_id).await?.is_none() {
                return Err(MemoryError::not_found("project", project_id.clone()));
            }
            update = update.set("project_id", project_id.as_str());
        }
        if let Some(status) = patch.status {
            if status != current.status {
                let entry = ActivityEntry::new("status_changed").with_note(format!(
                    "{} -> {}",
                    current.status.as_str(),
                    status.as_str()
                ));
                update = update
                    .set("status", status.as_str())
                    .push("activity_log", to_value(&entry)?);
            }
        }
        if patch.changes_text() {
            let title = patch.title.as_deref().map(str::trim).unwrap_or(&current.title);
            let description = patch.description.as_deref().or(current.description.as_deref());
            let embedding = self
                .embed_or_none(EntityKind::Task, &embedding_text(title, description))
                .await;
            update = update.set(EMBEDDING_FIELD, to_value(&embedding)?);
        }

        if !self
            .storage
            .atomic_conditional_update(collections::TASKS, &Filter::by_id(&current.id), &update)
            .await?
        {
            return Err(MemoryError::not_found("task", id));
        }

        self.get_task(&current.id)
            .await?
            .ok_or_else(|| MemoryError::not_found("task", id))
    }

    /// Apply a partial edit to a project
    pub async fn update_project(&self, id: &str, patch: ProjectPatch) -> MemoryResult<Project> {
        let current = self
            .get_project(id)
            .await?
            .ok_or_else(|| MemoryError::not_found("project", id))?;

        let mut update = Update::new().set("updated_at", timestamp_value(current_time()));
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(MemoryError::validation("name", "must not be empty"));
            }
            update = update.set("name", name.trim());
        }
        if let Some(description) = &patch.description {
            update = update.set("description", description.as_str());
        }
        if let Some(status) = patch.status {
            if status != current.status {
                let entry = ActivityEntry::new("status_changed").with_note(format!(
                    "{} -> {}",
                    current.status.as_str(),
                    status.as_str()
                ));
                update = update
                    .set("status", status.as_str())
                    .push("activity_log", to_value(&entry)?);
            }
        }
        if patch.changes_text() {
            let name = patch.name.as_deref().map(str::trim).unwrap_or(&current.name);
            let description = patch.description.as_deref().or(current.description.as_deref());
            let embedding = self
                .embed_or_none(EntityKind::Project, &embedding_text(name, description))
                .await;
            update = update.set(EMBEDDING_FIELD, to_value(&embedding)?);
        }

        if !self
            .storage
            .atomic_conditional_update(collections::PROJECTS, &Filter::by_id(&current.id), &update)
            .await?
        {
            return Err(MemoryError::not_found("project", id));
        }

        self.get_project(&current.id)
            .await?
            .ok_or_else(|| MemoryError::not_found("project", id))
    }

    /// Append to an entity's activity log
    pub async fn add_activity(
        &self,
        kind: EntityKind,
        id: &str,
        entry: ActivityEntry,
    ) -> MemoryResult<()> {
        parse_entity_id(kind.as_str(), id)?;
        let update = Update::new()
            .push("activity_log", to_value(&entry)?)
            .set("updated_at", timestamp_value(current_time()));

        let updated = self
            .storage
            .atomic_conditional_update(kind.collection(), &Filter::by_id(id.trim()), &update)
            .await?;
        if !updated {
            return Err(MemoryError::not_found(kind.as_str(), id));
        }
        Ok(())
    }

    /// Tasks matching the filter, newest first
    pub async fn list_tasks(&self, filter: &TaskFilter) -> MemoryResult<Vec<Task>> {
        let mut query = Filter::new();
        if let Some(status) = filter.status {
            query = query.eq("status", status.as_str());
        }
        if let Some(project_id) = &filter.project_id {
            query = query.eq("project_id", project_id.as_str());
        }
        if !filter.include_test_data {
            query = query.ne(TEST_DATA_FIELD, true);
        }

        let mut options = FindOptions::new().sort_desc("created_at");
        if let Some(limit) = filter.limit {
            options = options.limit(limit);
        }

        self.storage
            .find_many(collections::TASKS, &query, &options)
            .await?
            .into_iter()
            .map(|doc| from_document(doc, "task"))
            .collect()
    }
}

fn to_value<T: Serialize>(value: &T) -> MemoryResult<Value> {
    serde_json::to_value(value).map_err(|e| MemoryError::serialization("entity field", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{HashEmbeddingProvider, UnavailableEmbeddingProvider};
    use crate::storage::InMemoryStorage;

    fn store() -> EntityStore {
        EntityStore::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(HashEmbeddingProvider::new(64)),
        )
    }

    #[tokio::test]
    async fn test_create_and_get_task() {
        let store = store();
        let project = store
            .create_project(NewProject::new("LangGraph").with_description("Agent framework"))
            .await
            .unwrap();
        let task = store
            .create_task(NewTask::new("Implement checkpointer").in_project(&project.id))
            .await
            .unwrap();

        let fetched = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Implement checkpointer");
        assert_eq!(fetched.project_id.as_deref(), Some(project.id.as_str()));
        assert_eq!(fetched.embedding.as_ref().map(Vec::len), Some(64));
        assert_eq!(fetched.activity_log.len(), 1);

        let projection = store
            .get_projection(EntityKind::Task, &task.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(projection.display_name, "Implement checkpointer");
        assert_eq!(projection.status, "todo");
    }

    #[tokio::test]
    async fn test_invalid_and_missing_references() {
        let store = store();
        let err = store.get_task("not-a-uuid").await.unwrap_err();
        assert!(matches!(err, MemoryError::InvalidReference { .. }));

        let missing = uuid::Uuid::new_v4().to_string();
        assert!(store.get_task(&missing).await.unwrap().is_none());

        let err = store
            .create_task(NewTask::new("Orphan").in_project(&missing))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = store.create_task(NewTask::new("   ")).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_update_regenerates_embedding_and_logs_status() {
        let store = store();
        let task = store.create_task(NewTask::new("Write docs")).await.unwrap();

        let updated = store
            .update_task(
                &task.id,
                TaskPatch::new().title("Write API docs").status(TaskStatus::InProgress),
            )
            .await
            .unwrap();

        assert_eq!(updated.title, "Write API docs");
        assert_eq!(updated.status, TaskStatus::InProgress);
        assert_ne!(updated.embedding, task.embedding);
        assert_eq!(updated.activity_log.len(), 2);
        assert_eq!(updated.activity_log[1].action, "status_changed");
        assert_eq!(updated.created_at, task.created_at);
    }

    #[tokio::test]
    async fn test_activity_log_is_append_only() {
        let store = store();
        let project = store.create_project(NewProject::new("Docs")).await.unwrap();

        for note in ["kickoff", "review"] {
            store
                .add_activity(
                    EntityKind::Project,
                    &project.id,
                    ActivityEntry::new("note").with_note(note),
                )
                .await
                .unwrap();
        }

        let project = store.get_project(&project.id).await.unwrap().unwrap();
        let notes: Vec<_> = project.activity_log.iter().filter_map(|e| e.note.as_deref()).collect();
        assert_eq!(notes, vec!["kickoff", "review"]);

        let missing = uuid::Uuid::new_v4().to_string();
        let err = store
            .add_activity(EntityKind::Task, &missing, ActivityEntry::new("note"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades() {
        let store = EntityStore::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(UnavailableEmbeddingProvider),
        );
        let task = store.create_task(NewTask::new("Offline task")).await.unwrap();
        assert!(task.embedding.is_none());
        assert!(store.get_task(&task.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_tasks_excludes_test_data() {
        let store = store();
        store.create_task(NewTask::new("Real")).await.unwrap();
        store
            .create_task(NewTask::new("Synthetic").as_test_data())
            .await
            .unwrap();
        store
            .create_task(NewTask::new("Finished").with_status(TaskStatus::Done))
            .await
            .unwrap();

        let visible = store.list_tasks(&TaskFilter::new()).await.unwrap();
        assert_eq!(visible.len(), 2);

        let done = store
            .list_tasks(&TaskFilter::new().with_status(TaskStatus::Done))
            .await
            .unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].title, "Finished");

        let all = store
            .list_tasks(&TaskFilter::new().including_test_data())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_entity_kind_parsing() {
        assert_eq!("Task".parse::<EntityKind>().unwrap(), EntityKind::Task);
        assert_eq!("projects".parse::<EntityKind>().unwrap(), EntityKind::Project);
        assert!("note".parse::<EntityKind>().is_err());
    }
}
