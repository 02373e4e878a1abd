use actix_cors::Cors;
use actix_web::{
    get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult,
};
use actix_ws::Message;
use flowcore::{context_from_json, Context, FlowError, StoreError, Workflow, WorkflowError};
use flowruntime::{ExecutionStore, FileStore, FlowRuntime, MemoryStore, RuntimeConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    runtime: Arc<FlowRuntime>,
}

/// Request body for starting an execution
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest {
    #[serde(default, alias = "inputs")]
    input: Option<serde_json::Value>,
    #[serde(default)]
    user_id: Option<String>,
}

/// Request body for resuming an execution
#[derive(Debug, Default, Deserialize)]
struct ResumeRequest {
    #[serde(default)]
    input: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    workflow_id: Option<String>,
}

/// Response for workflow creation
#[derive(Debug, Serialize)]
struct WorkflowResponse {
    id: String,
    message: String,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(e: &FlowError) -> HttpResponse {
    let body = ErrorResponse {
        error: e.to_string(),
    };
    match e {
        FlowError::ExecutionNotFound(_) | FlowError::Workflow(WorkflowError::NotFound(_)) => {
            HttpResponse::NotFound().json(body)
        }
        FlowError::ExecutionBusy(_)
        | FlowError::NotResumable { .. }
        | FlowError::Store(StoreError::Conflict { .. }) => HttpResponse::Conflict().json(body),
        FlowError::Workflow(_) => HttpResponse::BadRequest().json(body),
        _ => {
            error!("Request failed: {}", e);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

fn parse_input(input: Option<serde_json::Value>) -> Result<Option<Context>, HttpResponse> {
    match input {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(json) => context_from_json(json).map(Some).ok_or_else(|| {
            HttpResponse::BadRequest().json(ErrorResponse {
                error: "input must be a JSON object".to_string(),
            })
        }),
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "flowengine"
    }))
}

/// List all workflows
#[get("/api/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let workflow_list: Vec<_> = data
        .runtime
        .list_workflows()
        .await
        .iter()
        .map(|w| {
            serde_json::json!({
                "id": w.id,
                "name": w.name,
                "description": w.description,
                "nodes": w.nodes.len(),
                "connections": w.connections.len(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(workflow_list))
}

/// Create a new workflow
#[post("/api/workflows")]
async fn create_workflow(
    data: web::Data<AppState>,
    workflow: web::Json<Workflow>,
) -> ActixResult<impl Responder> {
    let workflow = workflow.into_inner();
    let workflow_id = workflow.id.clone();

    info!("Creating workflow: {} ({})", workflow.name, workflow_id);

    if let Err(e) = data.runtime.register_workflow(workflow).await {
        return Ok(error_response(&e));
    }

    Ok(HttpResponse::Created().json(WorkflowResponse {
        id: workflow_id,
        message: "Workflow created successfully".to_string(),
    }))
}

/// Get a specific workflow
#[get("/api/workflows/{id}")]
async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();

    match data.runtime.workflow(&workflow_id).await {
        Some(workflow) => Ok(HttpResponse::Ok().json(workflow)),
        None => Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: format!("Workflow {} not found", workflow_id),
        })),
    }
}

/// Delete a workflow
#[actix_web::delete("/api/workflows/{id}")]
async fn delete_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();

    match data.runtime.remove_workflow(&workflow_id).await {
        Some(_) => {
            info!("Deleted workflow: {}", workflow_id);
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "message": "Workflow deleted successfully"
            })))
        }
        None => Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: format!("Workflow {} not found", workflow_id),
        })),
    }
}

/// Start an execution of a registered workflow
#[post("/api/workflows/{id}/execute")]
async fn execute_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: Option<web::Json<ExecuteRequest>>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    let req = req.map(web::Json::into_inner).unwrap_or_default();
    let input = match parse_input(req.input) {
        Ok(input) => input.unwrap_or_default(),
        Err(response) => return Ok(response),
    };
    let user_id = req.user_id.unwrap_or_else(|| "anonymous".to_string());

    info!("Executing workflow: {}", workflow_id);

    match data.runtime.run_workflow(&workflow_id, &user_id, input).await {
        Ok(result) => {
            info!(
                "Workflow {} execution {} ended {}",
                workflow_id, result.execution_id, result.status
            );
            Ok(HttpResponse::Ok().json(result))
        }
        Err(e) => Ok(error_response(&e)),
    }
}

/// List stored executions
#[get("/api/executions")]
async fn list_executions(
    data: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> ActixResult<impl Responder> {
    match data
        .runtime
        .list_executions(query.workflow_id.as_deref())
        .await
    {
        Ok(headers) => Ok(HttpResponse::Ok().json(headers)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Get an execution record with its checkpoints
#[get("/api/executions/{id}")]
async fn get_execution(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    match data.runtime.get_state(path.into_inner()).await {
        Ok(record) => Ok(HttpResponse::Ok().json(record)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Continue a paused or failed execution
#[post("/api/executions/{id}/resume")]
async fn resume_execution(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: Option<web::Json<ResumeRequest>>,
) -> ActixResult<impl Responder> {
    let execution_id = path.into_inner();
    let req = req.map(web::Json::into_inner).unwrap_or_default();
    let input = match parse_input(req.input) {
        Ok(input) => input,
        Err(response) => return Ok(response),
    };

    info!("Resuming execution: {}", execution_id);

    let result = match input {
        Some(input) => data.runtime.resume_with_input(execution_id, input).await,
        None => data.runtime.resume(execution_id).await,
    };
    match result {
        Ok(result) => Ok(HttpResponse::Ok().json(result)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Cancel an execution running in this server
#[post("/api/executions/{id}/cancel")]
async fn cancel_execution(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let execution_id = path.into_inner();
    let cancelled = data.runtime.cancel(execution_id);
    if !cancelled {
        warn!("Cancel requested for inactive execution {}", execution_id);
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "cancelled": cancelled })))
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagging, skipped {} events", skipped);
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List available node types
#[get("/api/nodes")]
async fn list_node_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();

    let nodes: Vec<_> = registry
        .list_node_types()
        .iter()
        .map(|node_type| {
            let metadata = registry.get_metadata(node_type);
            serde_json::json!({
                "type": node_type,
                "description": metadata.as_ref().map(|m| m.description.clone()).unwrap_or_default(),
                "category": metadata.as_ref().map(|m| m.category.clone()).unwrap_or_default(),
                "outputs": metadata
                    .as_ref()
                    .map(|m| m.outputs.iter().map(|p| p.name.clone()).collect::<Vec<_>>())
                    .unwrap_or_default(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(nodes))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting Flow Engine Server");

    let config = RuntimeConfig::from_env();
    let store: Arc<dyn ExecutionStore> = match std::env::var("FLOW_STORE_DIR") {
        Ok(dir) => {
            info!("💾 Persisting executions under {}", dir);
            Arc::new(FileStore::open(dir).await?)
        }
        Err(_) => {
            warn!("FLOW_STORE_DIR not set; executions live in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let runtime = FlowRuntime::with_registry(Arc::new(flownodes::standard_registry()), config)
        .with_store(store);

    info!("✅ Runtime initialized with standard nodes");

    let app_state = web::Data::new(AppState {
        runtime: Arc::new(runtime),
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_workflows)
            .service(create_workflow)
            .service(get_workflow)
            .service(delete_workflow)
            .service(execute_workflow)
            .service(list_executions)
            .service(get_execution)
            .service(resume_execution)
            .service(cancel_execution)
            .service(websocket_events)
            .service(list_node_types)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
