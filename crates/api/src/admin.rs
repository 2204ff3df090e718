use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use secron_application::{TaskManager, TaskPatch};
use secron_core::{SecronError, SecronResult};
use secron_domain::{Task, TaskStatus, TaskType};

/// 管理协议服务
///
/// 换行分隔的JSON请求/响应协议：每行一个
/// `{"action": "...", "data": {...}}`，响应为
/// `{"code": ..., "msg": ..., "data": ...}`，一个连接可以连续发多条。
pub struct AdminServer {
    task_manager: Arc<TaskManager>,
}

#[derive(Debug, Deserialize)]
struct AdminRequest {
    action: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct CreateTaskRequest {
    name: String,
    command: String,
    task_type: TaskType,
    cron_expression: String,
    #[serde(default = "default_task_timeout")]
    timeout: i64,
    #[serde(default)]
    lock_time: i64,
}

fn default_task_timeout() -> i64 {
    300
}

#[derive(Debug, Deserialize)]
struct UpdateTaskRequest {
    id: i64,
    #[serde(flatten)]
    patch: TaskPatch,
}

#[derive(Debug, Deserialize)]
struct IdRequest {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ListRequest {
    #[serde(default = "default_list_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_list_limit() -> i64 {
    50
}

impl AdminServer {
    pub fn new(task_manager: Arc<TaskManager>) -> Self {
        Self { task_manager }
    }

    /// 运行监听循环，直到收到关闭信号
    pub async fn run(
        &self,
        bind_address: &str,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> SecronResult<()> {
        let listener = TcpListener::bind(bind_address)
            .await
            .map_err(|e| SecronError::Network(format!("绑定 {bind_address} 失败: {e}")))?;
        info!("管理协议服务监听 {bind_address}");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("管理连接建立: {peer}");
                            let manager = self.task_manager.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, manager).await;
                            });
                        }
                        Err(e) => warn!("接受管理连接失败: {e}"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("管理协议服务收到关闭信号，退出");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, manager: Arc<TaskManager>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_request(&manager, &line).await;
        let mut payload = response.to_string();
        payload.push('\n');
        if writer.write_all(payload.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// 处理一条管理请求，总是返回可序列化的响应体
pub async fn handle_request(manager: &TaskManager, line: &str) -> Value {
    let request: AdminRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return fail(400, format!("无法解析请求: {e}")),
    };

    match dispatch(manager, &request).await {
        Ok(data) => json!({"code": 200, "msg": "success", "data": data}),
        Err(e) => fail(status_code(&e), e.to_string()),
    }
}

/// 错误到响应码的映射
///
/// Serialization只会从请求数据解析产生，响应侧的序列化失败
/// 以Internal上抛，归为服务端错误。
fn status_code(e: &SecronError) -> i64 {
    match e {
        // 未知操作与未找到的资源同样按404处理
        SecronError::TaskNotFound { .. }
        | SecronError::RunLogNotFound { .. }
        | SecronError::CommandInvalid(_) => 404,
        SecronError::Serialization(_) => 400,
        _ => 500,
    }
}

async fn dispatch(manager: &TaskManager, request: &AdminRequest) -> SecronResult<Value> {
    match request.action.as_str() {
        "ping" => Ok(json!("pong")),
        "create_task" => {
            let req: CreateTaskRequest = parse_data(&request.data)?;
            let mut task = Task::new(req.name, req.command, req.task_type, req.cron_expression);
            task.timeout = req.timeout;
            task.lock_time = req.lock_time;
            let created = manager.create_task(task).await?;
            to_json(created)
        }
        "update_task" => {
            let req: UpdateTaskRequest = parse_data(&request.data)?;
            let updated = manager.update_task(req.id, req.patch).await?;
            to_json(updated)
        }
        "delete_task" => {
            let req: IdRequest = parse_data(&request.data)?;
            // 先确认存在，删除不存在的任务应报404而非静默成功
            manager
                .get_task(req.id)
                .await?
                .ok_or(SecronError::TaskNotFound { id: req.id })?;
            manager.delete_task(req.id).await?;
            Ok(Value::Null)
        }
        "execute_task" => {
            let req: IdRequest = parse_data(&request.data)?;
            manager.execute_immediately(req.id).await?;
            Ok(Value::Null)
        }
        "restart_task" => {
            let req: IdRequest = parse_data(&request.data)?;
            manager.restart_task(req.id).await?;
            Ok(Value::Null)
        }
        "toggle_task" => {
            let req: IdRequest = parse_data(&request.data)?;
            let task = manager
                .get_task(req.id)
                .await?
                .ok_or(SecronError::TaskNotFound { id: req.id })?;
            let new_status = match task.status {
                TaskStatus::Enabled => {
                    manager.close_task(req.id).await?;
                    TaskStatus::Disabled
                }
                TaskStatus::Disabled => {
                    manager.start_task(req.id).await?;
                    TaskStatus::Enabled
                }
            };
            Ok(json!({"id": req.id, "status": new_status.as_str()}))
        }
        "get_task_status" => {
            let req: IdRequest = parse_data(&request.data)?;
            let task = manager
                .get_task(req.id)
                .await?
                .ok_or(SecronError::TaskNotFound { id: req.id })?;
            let logs = manager.get_task_logs(req.id, 10, 0).await?;
            Ok(json!({
                "task": to_json(task)?,
                "logs": to_json(logs)?,
            }))
        }
        "list_tasks" => {
            let req: ListRequest = parse_data(&request.data)?;
            let tasks = manager.list_tasks(req.limit, req.offset).await?;
            to_json(tasks)
        }
        other => Err(SecronError::CommandInvalid(format!("未知操作: {other}"))),
    }
}

fn parse_data<T: for<'de> Deserialize<'de>>(data: &Value) -> SecronResult<T> {
    serde_json::from_value(data.clone())
        .map_err(|e| SecronError::Serialization(format!("请求数据无效: {e}")))
}

fn to_json<T: serde::Serialize>(value: T) -> SecronResult<Value> {
    serde_json::to_value(value).map_err(|e| SecronError::Internal(format!("序列化响应失败: {e}")))
}

fn fail(code: i64, msg: String) -> Value {
    json!({"code": code, "msg": msg, "data": null})
}

#[cfg(test)]
mod tests {
    use super::*;
    use secron_infrastructure::in_memory::{
        InMemoryRunLogRepository, InMemoryTaskLock, InMemoryTaskRepository,
    };

    fn manager() -> TaskManager {
        TaskManager::new(
            Arc::new(InMemoryTaskRepository::new()),
            Arc::new(InMemoryRunLogRepository::new()),
            Arc::new(InMemoryTaskLock::new()),
        )
    }

    async fn create_demo(manager: &TaskManager) -> i64 {
        let response = handle_request(
            manager,
            r#"{"action":"create_task","data":{"name":"demo","command":"echo hi","task_type":"command","cron_expression":"0 * * * * *"}}"#,
        )
        .await;
        assert_eq!(response["code"], 200);
        response["data"]["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let manager = manager();
        let response = handle_request(&manager, r#"{"action":"ping"}"#).await;
        assert_eq!(response["code"], 200);
        assert_eq!(response["data"], "pong");
    }

    #[tokio::test]
    async fn test_create_and_get_task() {
        let manager = manager();
        let id = create_demo(&manager).await;

        let response = handle_request(
            &manager,
            &format!(r#"{{"action":"get_task_status","data":{{"id":{id}}}}}"#),
        )
        .await;
        assert_eq!(response["code"], 200);
        assert_eq!(response["data"]["task"]["name"], "demo");
        assert_eq!(response["data"]["task"]["timeout"], 300);
        assert!(response["data"]["logs"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_task_partial() {
        let manager = manager();
        let id = create_demo(&manager).await;

        let response = handle_request(
            &manager,
            &format!(r#"{{"action":"update_task","data":{{"id":{id},"timeout":60}}}}"#),
        )
        .await;
        assert_eq!(response["code"], 200);
        assert_eq!(response["data"]["timeout"], 60);
        assert_eq!(response["data"]["command"], "echo hi");
    }

    #[tokio::test]
    async fn test_toggle_task() {
        let manager = manager();
        let id = create_demo(&manager).await;

        let toggle = format!(r#"{{"action":"toggle_task","data":{{"id":{id}}}}}"#);
        let response = handle_request(&manager, &toggle).await;
        assert_eq!(response["data"]["status"], "disabled");
        let response = handle_request(&manager, &toggle).await;
        assert_eq!(response["data"]["status"], "enabled");
    }

    #[tokio::test]
    async fn test_delete_then_not_found() {
        let manager = manager();
        let id = create_demo(&manager).await;

        let delete = format!(r#"{{"action":"delete_task","data":{{"id":{id}}}}}"#);
        assert_eq!(handle_request(&manager, &delete).await["code"], 200);
        assert_eq!(handle_request(&manager, &delete).await["code"], 404);
    }

    #[tokio::test]
    async fn test_execute_task_marks_due() {
        let manager = manager();
        let id = create_demo(&manager).await;

        let response = handle_request(
            &manager,
            &format!(r#"{{"action":"execute_task","data":{{"id":{id}}}}}"#),
        )
        .await;
        assert_eq!(response["code"], 200);
        assert_eq!(manager.get_due_tasks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_tasks_with_defaults() {
        let manager = manager();
        create_demo(&manager).await;

        let response = handle_request(&manager, r#"{"action":"list_tasks"}"#).await;
        assert_eq!(response["code"], 200);
        assert_eq!(response["data"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(status_code(&SecronError::TaskNotFound { id: 1 }), 404);
        assert_eq!(status_code(&SecronError::RunLogNotFound { id: 1 }), 404);
        assert_eq!(
            status_code(&SecronError::CommandInvalid("未知操作: x".into())),
            404
        );
        assert_eq!(
            status_code(&SecronError::Serialization("请求数据无效".into())),
            400
        );
        // 响应侧序列化失败走Internal，属服务端错误
        assert_eq!(
            status_code(&SecronError::Internal("序列化响应失败".into())),
            500
        );
        assert_eq!(status_code(&SecronError::Database("连接中断".into())), 500);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let manager = manager();
        let unknown = handle_request(&manager, r#"{"action":"drop_everything"}"#).await;
        assert_eq!(unknown["code"], 404);
        let malformed = handle_request(&manager, "not json").await;
        assert_eq!(malformed["code"], 400);
        let missing_field =
            handle_request(&manager, r#"{"action":"create_task","data":{"name":"x"}}"#).await;
        assert_eq!(missing_field["code"], 400);
    }
}
