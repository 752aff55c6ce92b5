use std::sync::{Arc, Mutex, MutexGuard};

use kestrel::{mutation, query, ApiError, BoxError, Config, ErrorCode, ExportConfig, Router};
use kestrel_axum::{Serve, ServeOptions};
use serde::{Deserialize, Serialize};
use specta::Type;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
#[serde(rename_all = "camelCase")]
struct Todo {
    id: u32,
    title: String,
    done: bool,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize, Type)]
struct NewTodo {
    title: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize, Type)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Filter {
    All,
    Done,
    Pending,
    Tagged { tag: String },
}

#[derive(Debug, thiserror::Error)]
enum TodoError {
    #[error("todo {0} doesn't exist")]
    Missing(u32),
    #[error("a todo needs a title")]
    EmptyTitle,
}

impl From<TodoError> for ApiError {
    fn from(err: TodoError) -> Self {
        let code = match err {
            TodoError::Missing(_) => ErrorCode::NotFound,
            TodoError::EmptyTitle => ErrorCode::BadRequest,
        };
        ApiError::new(code, err.to_string()).with_cause(err)
    }
}

#[derive(Default)]
struct Store {
    next_id: u32,
    todos: Vec<Todo>,
}

type Db = Arc<Mutex<Store>>;

fn lock(db: &Db) -> Result<MutexGuard<'_, Store>, BoxError> {
    db.lock().map_err(|_| "todo store is poisoned".into())
}

fn router(db: Db) -> Router {
    let list = {
        let db = db.clone();
        query("list_todos", move |_, filter: Filter| {
            let db = db.clone();
            async move {
                let store = lock(&db)?;
                let todos = store
                    .todos
                    .iter()
                    .filter(|todo| match &filter {
                        Filter::All => true,
                        Filter::Done => todo.done,
                        Filter::Pending => !todo.done,
                        Filter::Tagged { tag } => todo.tags.contains(tag),
                    })
                    .cloned()
                    .collect::<Vec<_>>();
                Ok::<_, BoxError>(todos)
            }
        })
        .exclude_middleware(["auth"])
    };

    let create = {
        let db = db.clone();
        mutation("create_todo", move |_, new: NewTodo| {
            let db = db.clone();
            async move {
                if new.title.trim().is_empty() {
                    return Err(ApiError::from(TodoError::EmptyTitle).into());
                }

                let mut store = lock(&db)?;
                store.next_id += 1;
                let todo = Todo {
                    id: store.next_id,
                    title: new.title,
                    done: false,
                    tags: new.tags,
                };
                store.todos.push(todo.clone());
                Ok::<_, BoxError>(todo)
            }
        })
    };

    let toggle = {
        let db = db.clone();
        mutation("toggle_todo", move |ctx, id: u32| {
            let db = db.clone();
            async move {
                let mut store = lock(&db)?;
                let todo = store
                    .todos
                    .iter_mut()
                    .find(|todo| todo.id == id)
                    .ok_or_else(|| ApiError::from(TodoError::Missing(id)))?;
                todo.done = !todo.done;
                let user = ctx.get::<String>("user");
                tracing::info!(id, done = todo.done, ?user, "toggled todo");
                Ok::<_, BoxError>(todo.clone())
            }
        })
        .with_alias("todo.toggle")
    };

    let delete = mutation("delete_todo", move |_, id: u32| {
        let db = db.clone();
        async move {
            let mut store = lock(&db)?;
            let before = store.todos.len();
            store.todos.retain(|todo| todo.id != id);
            if store.todos.len() == before {
                return Err(ApiError::from(TodoError::Missing(id)).into());
            }
            Ok::<_, BoxError>(())
        }
    });

    Router::with_config(
        Config::new()
            .debug(true)
            .export(ExportConfig::new("./bindings").schema(false)),
    )
    .add(query("version", |_, _: ()| async {
        Ok::<_, BoxError>(env!("CARGO_PKG_VERSION"))
    }))
    .add(list)
    .add(create)
    .add(toggle)
    .add(delete)
    .use_middleware("auth", |ctx| {
        let user = ctx
            .header("authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string)
            .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "missing bearer token"))?;
        ctx.set("user", user);
        Ok(())
    })
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,kestrel=debug")),
        )
        .init();

    // Set KESTREL_EXPORT_SCHEMA=1 or KESTREL_EXPORT_BINDINGS=1 to write ./bindings/schema.json or
    // ./bindings/bindings.ts on startup.
    let instance = router(Db::default()).build()?;

    instance
        .serve_with(ServeOptions::new(3000).rest(true))
        .await?;
    Ok(())
}
