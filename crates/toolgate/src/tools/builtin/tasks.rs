use super::super::core::{
    FailureKind, HandlerFuture, ToolDefinition, ToolFailure, ToolHandler, parse_args,
};
use super::super::names::ToolName;
use super::{MANAGE_PROJECTS, MANAGE_TASKS, TASKS_TABLE, finish};
use crate::context::ToolCallContext;
use crate::json_schema_for;
use crate::pagination::{Cursor, InvalidCursor, KeysetQuery, Page, PaginationConfig};
use crate::store::{Query, Row};
use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

const MAX_TITLE_CHARS: usize = 200;
const ORDERING_COLUMN: &str = "created_at";
const ID_COLUMN: &str = "id";

// ── create_task ────────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct CreateTaskArgs {
    /// Short task title.
    title: String,
    #[serde(default)]
    description: Option<String>,
    /// Due date, `YYYY-MM-DD`.
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
}

struct CreateTask;

impl ToolHandler for CreateTask {
    fn call<'a>(&'a self, args: Value, ctx: &'a ToolCallContext) -> HandlerFuture<'a> {
        Box::pin(async move {
            match parse_args::<CreateTaskArgs>(args) {
                Ok(args) => finish(create(args, ctx).await),
                Err(failure) => failure,
            }
        })
    }
}

async fn create(args: CreateTaskArgs, ctx: &ToolCallContext) -> Result<Row, ToolFailure> {
    let title = args.title.trim();
    if title.is_empty() {
        return Err(invalid("title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(invalid(format!(
            "title is longer than {MAX_TITLE_CHARS} characters"
        )));
    }
    if let Some(due) = &args.due_date
        && chrono::NaiveDate::parse_from_str(due, "%Y-%m-%d").is_err()
    {
        return Err(invalid(format!("due_date '{due}' is not a YYYY-MM-DD date")));
    }

    let mut row = Row::new();
    row.insert("id".into(), json!(uuid::Uuid::new_v4().to_string()));
    row.insert("workspace_id".into(), json!(ctx.workspace_id()));
    row.insert("created_by".into(), json!(ctx.user_id()));
    row.insert("title".into(), json!(title));
    row.insert("description".into(), json!(args.description));
    row.insert("due_date".into(), json!(args.due_date));
    row.insert("project_id".into(), json!(args.project_id));
    row.insert(
        "created_at".into(),
        json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    Ok(ctx.data().insert(TASKS_TABLE, row).await?)
}

pub(super) fn create_task() -> ToolDefinition {
    ToolDefinition::new(
        ToolName::CreateTask,
        "Create a task in the current workspace.",
        json_schema_for::<CreateTaskArgs>(),
        CreateTask,
    )
    .requires(MANAGE_TASKS)
}

// ── list_tasks ─────────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct ListTasksArgs {
    /// Page size. Defaults to 20, capped at 100.
    #[serde(default)]
    limit: Option<usize>,
    /// `next_cursor` from the previous page. Omit for the first page.
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
}

struct ListTasks {
    pagination: PaginationConfig,
}

impl ToolHandler for ListTasks {
    fn call<'a>(&'a self, args: Value, ctx: &'a ToolCallContext) -> HandlerFuture<'a> {
        Box::pin(async move {
            match parse_args::<ListTasksArgs>(args) {
                Ok(args) => finish(self.list(args, ctx).await),
                Err(failure) => failure,
            }
        })
    }
}

impl ListTasks {
    async fn list(&self, args: ListTasksArgs, ctx: &ToolCallContext) -> Result<Page<Row>, ToolFailure> {
        let after = args
            .cursor
            .as_deref()
            .map(Cursor::decode)
            .transpose()
            .map_err(|e| invalid(e.to_string()))?;
        let page_size = self.pagination.resolve(args.limit);

        let mut query = Query::table(TASKS_TABLE).eq("workspace_id", ctx.workspace_id());
        if let Some(project) = args.project_id {
            query = query.eq("project_id", project);
        }
        let query = query.keyset(KeysetQuery::new(ORDERING_COLUMN, ID_COLUMN, page_size).after(after));
        tracing::trace!("[list_tasks] {}", query.filter_expression());

        let rows = ctx.data().select(query).await?;
        Page::from_rows(rows, page_size, row_cursor).map_err(|e| {
            ToolFailure::new(
                FailureKind::Internal,
                format!("task row cannot be paged: {e}"),
            )
        })
    }
}

fn row_cursor(row: &Row) -> Result<Cursor, InvalidCursor> {
    Cursor::new(text(row, ORDERING_COLUMN), text(row, ID_COLUMN))
}

fn text<'r>(row: &'r Row, column: &str) -> &'r str {
    row.get(column).and_then(Value::as_str).unwrap_or_default()
}

pub(super) fn list_tasks(pagination: PaginationConfig) -> ToolDefinition {
    ToolDefinition::new(
        ToolName::ListTasks,
        "List tasks in the current workspace, newest first. Pass next_cursor back to get the \
         next page.",
        json_schema_for::<ListTasksArgs>(),
        ListTasks { pagination },
    )
}

// ── delete_task ────────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct DeleteTaskArgs {
    task_id: String,
}

struct DeleteTask;

impl ToolHandler for DeleteTask {
    fn call<'a>(&'a self, args: Value, ctx: &'a ToolCallContext) -> HandlerFuture<'a> {
        Box::pin(async move {
            match parse_args::<DeleteTaskArgs>(args) {
                Ok(args) => finish(delete(args, ctx).await),
                Err(failure) => failure,
            }
        })
    }
}

async fn delete(args: DeleteTaskArgs, ctx: &ToolCallContext) -> Result<Value, ToolFailure> {
    let workspace = ctx.workspace_id();
    let owned = ctx
        .data()
        .select(
            Query::table(TASKS_TABLE)
                .eq("id", args.task_id.as_str())
                .eq("workspace_id", workspace.as_str())
                .limit(1),
        )
        .await?;
    if owned.is_empty() {
        return Err(invalid(format!(
            "task '{}' not found in this workspace",
            args.task_id
        )));
    }
    let removed = ctx.data().delete(TASKS_TABLE, &args.task_id).await?;
    Ok(json!({"deleted": args.task_id, "title": removed.get("title")}))
}

pub(super) fn delete_task() -> ToolDefinition {
    ToolDefinition::new(
        ToolName::DeleteTask,
        "Permanently delete a task by id.",
        json_schema_for::<DeleteTaskArgs>(),
        DeleteTask,
    )
    .requires(MANAGE_PROJECTS)
}

fn invalid(message: impl Into<String>) -> ToolFailure {
    ToolFailure::new(FailureKind::InvalidArguments, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::tools::core::ToolResult;
    use std::sync::Arc;

    fn ctx() -> ToolCallContext {
        ToolCallContext::new("u1", "w1", Arc::new(MemoryStore::new()))
    }

    async fn call(def: &ToolDefinition, args: Value, ctx: &ToolCallContext) -> ToolResult {
        def.handler().call(args, ctx).await
    }

    #[tokio::test]
    async fn create_then_list_then_delete() {
        let ctx = ctx();
        let created = call(&create_task(), json!({"title": "  Write docs  "}), &ctx).await;
        let task = created.payload().unwrap().clone();
        assert_eq!(task["title"], "Write docs");
        assert_eq!(task["workspace_id"], "w1");

        let listed = call(&list_tasks(PaginationConfig::default()), json!({}), &ctx).await;
        let page = listed.payload().unwrap();
        assert_eq!(page["items"].as_array().unwrap().len(), 1);
        assert_eq!(page["has_more"], false);
        assert!(page["next_cursor"].is_null());

        let deleted = call(&delete_task(), json!({"task_id": task["id"]}), &ctx).await;
        assert_eq!(deleted.payload().unwrap()["title"], "Write docs");

        let again = call(&delete_task(), json!({"task_id": task["id"]}), &ctx).await;
        let failure = again.failure_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::InvalidArguments);
        assert!(failure.message.contains("not found"));
    }

    #[tokio::test]
    async fn business_rules_reject_bad_input() {
        let ctx = ctx();
        let def = create_task();
        for args in [
            json!({"title": "   "}),
            json!({"title": "x".repeat(201)}),
            json!({"title": "ok", "due_date": "tomorrow"}),
        ] {
            let result = call(&def, args, &ctx).await;
            assert_eq!(
                result.failure_ref().unwrap().kind,
                FailureKind::InvalidArguments
            );
        }
    }

    #[tokio::test]
    async fn malformed_cursor_is_rejected() {
        let result = call(
            &list_tasks(PaginationConfig::default()),
            json!({"cursor": "garbage"}),
            &ctx(),
        )
        .await;
        let failure = result.failure_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::InvalidArguments);
        assert!(failure.message.starts_with("invalid cursor"));
    }

    #[tokio::test]
    async fn tasks_in_other_workspaces_are_invisible() {
        let store = Arc::new(MemoryStore::new());
        let mine = ToolCallContext::new("u1", "w1", store.clone());
        let theirs = ToolCallContext::new("u2", "w2", store);
        let created = call(&create_task(), json!({"title": "secret"}), &theirs).await;
        let id = created.payload().unwrap()["id"].clone();

        let listed = call(&list_tasks(PaginationConfig::default()), json!({}), &mine).await;
        assert!(listed.payload().unwrap()["items"].as_array().unwrap().is_empty());

        let deleted = call(&delete_task(), json!({"task_id": id}), &mine).await;
        assert!(!deleted.is_success());
    }
}
