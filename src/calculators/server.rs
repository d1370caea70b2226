//! # 模型服务进程
//!
//! 势函数与性质预测模型都运行在常驻子进程中，通过 stdin/stdout 以
//! 每行一个 JSON 对象的方式通信：
//!
//! ```text
//! -> {"op":"evaluate","structure":{...}}
//! <- {"energy":-12.3,"forces":[[...],...]}
//! <- {"error":"...","kind":"device_mismatch"}
//! ```
//!
//! 子进程的 stderr 在静默模式下被丢弃，避免模型库的大量输出打乱进度条；
//! 混入 stdout 的非 JSON 行在读取响应时跳过。
//!
//! ## 依赖关系
//! - 被 `calculators/potential.rs`, `calculators/predictor.rs` 使用
//! - 使用 `serde_json`

use crate::error::{PipelineError, Result};

use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// 设备放置不一致时 PyTorch 报出的错误文本
pub const DEVICE_MISMATCH_MARKER: &str = "Expected all tensors to be on the same device";

/// 关闭服务时等待子进程自行退出的时长
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// 常驻模型服务
pub struct ModelServer {
    name: String,
    child: Child,
    /// 关闭后为 `None`
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    /// 上一个请求的编号
    last_id: u64,
}

impl ModelServer {
    /// 启动服务进程
    ///
    /// `argv[0]` 为可执行文件，其余与 `extra_args` 依次追加。
    pub fn spawn(name: &str, argv: &[String], extra_args: &[String], quiet: bool) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| PipelineError::ConfigError(format!("Empty command for {}", name)))?;

        tracing::debug!(server = name, program = %program, ?args, ?extra_args, "spawning model server");

        let mut child = Command::new(program)
            .args(args)
            .args(extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if quiet { Stdio::null() } else { Stdio::inherit() })
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PipelineError::CommandNotFound {
                        command: program.clone(),
                    }
                } else {
                    PipelineError::CommandFailed {
                        command: program.clone(),
                        stderr: e.to_string(),
                    }
                }
            })?;

        let stdin = child.stdin.take().ok_or_else(|| PipelineError::CommandFailed {
            command: program.clone(),
            stderr: "stdin not captured".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| PipelineError::CommandFailed {
            command: program.clone(),
            stderr: "stdout not captured".to_string(),
        })?;

        Ok(ModelServer {
            name: name.to_string(),
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            last_id: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 发送一个请求并等待对应的响应
    ///
    /// 请求对象附带递增的 `id`。模型库打印到 stdout 的非 JSON 行被跳过；
    /// 响应若带 `id`，编号较小的视为过期响应并跳过，编号不符则报错。
    pub fn request(&mut self, request: &Value) -> Result<Value> {
        self.last_id += 1;
        let id = self.last_id;

        let mut request = request.clone();
        if let Some(object) = request.as_object_mut() {
            object.insert("id".to_string(), Value::from(id));
        }
        let line = serde_json::to_string(&request)?;

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(server_gone(&self.name, "Server input already closed"));
        };
        writeln!(stdin, "{}", line)
            .and_then(|_| stdin.flush())
            .map_err(|e| server_gone(&self.name, format!("Failed to send request: {}", e)))?;

        loop {
            let mut response = String::new();
            let read = self
                .stdout
                .read_line(&mut response)
                .map_err(|e| server_gone(&self.name, format!("Failed to read response: {}", e)))?;
            if read == 0 {
                return Err(server_gone(&self.name, "Server closed its output"));
            }

            let text = response.trim();
            let mut value = match serde_json::from_str::<Value>(text) {
                Ok(value) if value.is_object() => value,
                _ => {
                    tracing::trace!(server = %self.name, line = text, "skipping non-protocol output");
                    continue;
                }
            };

            if let Some(echoed) = value.as_object_mut().and_then(|o| o.remove("id")) {
                match echoed.as_u64() {
                    Some(got) if got == id => {}
                    Some(got) if got < id => {
                        tracing::trace!(server = %self.name, got, expected = id, "skipping stale response");
                        continue;
                    }
                    _ => {
                        return Err(server_gone(
                            &self.name,
                            format!("Response id {} does not match request id {}", echoed, id),
                        ))
                    }
                }
            }

            return check_response(&self.name, value);
        }
    }

    /// 关闭服务：发送 `shutdown` 并关闭 stdin，超时仍未退出则强制结束
    pub fn shutdown(&mut self) -> Option<ExitStatus> {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = writeln!(stdin, "{{\"op\":\"shutdown\"}}");
            let _ = stdin.flush();
        }

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                _ => break,
            }
        }

        tracing::debug!(server = %self.name, "server did not exit in time, killing");
        let _ = self.child.kill();
        self.child.wait().ok()
    }
}

impl Drop for ModelServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn server_gone(model: &str, reason: impl Into<String>) -> PipelineError {
    PipelineError::ServerGone {
        model: model.to_string(),
        reason: reason.into(),
    }
}

/// 把 `{"error": ...}` 响应转换为错误，区分设备放置不一致
pub fn check_response(model: &str, value: Value) -> Result<Value> {
    if value.get("error").is_none() {
        return Ok(value);
    }

    let message = &value["error"];
    let reason = message
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| message.to_string());
    let kind = value.get("kind").and_then(Value::as_str).unwrap_or("");

    if kind == "device_mismatch" || reason.contains(DEVICE_MISMATCH_MARKER) {
        Err(PipelineError::DeviceMismatch {
            model: model.to_string(),
            reason,
        })
    } else {
        Err(PipelineError::CalculatorError {
            model: model.to_string(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_response_ok() {
        let value = check_response("m", json!({"energy": -1.0})).unwrap();
        assert_eq!(value["energy"], -1.0);
    }

    #[test]
    fn test_device_mismatch_by_text() {
        let err = check_response(
            "m",
            json!({"error": "RuntimeError: Expected all tensors to be on the same device, but found cuda:0 and cpu"}),
        )
        .unwrap_err();
        assert!(err.is_device_mismatch());
    }

    #[test]
    fn test_device_mismatch_by_kind() {
        let err = check_response("m", json!({"error": "moved", "kind": "device_mismatch"}))
            .unwrap_err();
        assert!(err.is_device_mismatch());
    }

    #[test]
    fn test_other_error() {
        let err = check_response("m", json!({"error": "CUDA out of memory"})).unwrap_err();
        assert!(!err.is_device_mismatch());
        assert!(matches!(err, PipelineError::CalculatorError { .. }));
    }

    #[test]
    fn test_spawn_missing_program() {
        let argv = vec!["definitely-not-a-real-program-xyz".to_string()];
        let err = ModelServer::spawn("m", &argv, &[], true).err().unwrap();
        assert!(matches!(err, PipelineError::CommandNotFound { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_request_round_trip_through_cat() {
        // cat 原样回显请求，足以验证行协议
        let argv = vec!["cat".to_string()];
        let mut server = ModelServer::spawn("echo", &argv, &[], true).unwrap();
        let response = server.request(&json!({"energy": -3.5})).unwrap();
        assert_eq!(response["energy"], -3.5);

        let err = server.request(&json!({"error": "boom"})).unwrap_err();
        assert!(matches!(err, PipelineError::CalculatorError { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_banner_lines_do_not_shift_responses() {
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo loading model weights; echo '[1, 2]'; cat".to_string(),
        ];
        let mut server = ModelServer::spawn("echo", &argv, &[], true).unwrap();

        let first = server.request(&json!({"energy": -1.0})).unwrap();
        assert_eq!(first["energy"], -1.0);
        assert!(first.get("id").is_none());

        let second = server.request(&json!({"energy": -2.0})).unwrap();
        assert_eq!(second["energy"], -2.0);
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_response_is_skipped() {
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"echo '{"id": 0, "energy": 9.0}'; cat"#.to_string(),
        ];
        let mut server = ModelServer::spawn("echo", &argv, &[], true).unwrap();
        let response = server.request(&json!({"energy": -1.0})).unwrap();
        assert_eq!(response["energy"], -1.0);
    }

    #[cfg(unix)]
    #[test]
    fn test_mismatched_id_rejected() {
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"echo '{"id": 7, "energy": 9.0}'; cat"#.to_string(),
        ];
        let mut server = ModelServer::spawn("echo", &argv, &[], true).unwrap();
        let err = server.request(&json!({"energy": -1.0})).unwrap_err();
        assert!(err.is_server_gone());
    }

    #[cfg(unix)]
    #[test]
    fn test_dead_server_is_gone() {
        let argv = vec!["true".to_string()];
        let mut server = ModelServer::spawn("dead", &argv, &[], true).unwrap();
        let err = server.request(&json!({"op": "load"})).unwrap_err();
        assert!(err.is_server_gone());
    }

    #[cfg(unix)]
    #[test]
    fn test_shutdown_lets_server_exit() {
        let argv = vec!["cat".to_string()];
        let mut server = ModelServer::spawn("echo", &argv, &[], true).unwrap();
        server.request(&json!({"energy": -3.5})).unwrap();

        // cat 在 stdin 关闭后正常退出，不应被强制结束
        let status = server.shutdown().unwrap();
        assert!(status.success());

        let err = server.request(&json!({"energy": -3.5})).unwrap_err();
        assert!(err.is_server_gone());
    }
}
