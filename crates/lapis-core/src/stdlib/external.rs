//! Foreign-call bridge.
//!
//! `__native_call(module, function, args...)` forwards to a
//! [`ForeignBridge`]. The bundled [`ProcessBridge`] talks to an external
//! process via JSON-RPC over stdio, one request and one response per line.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BridgeConfig;
use crate::value::{Dictionary, Value};

/// Values nested deeper than this are not sent across the bridge.
const MAX_NESTING: usize = 64;

/// Error type for foreign calls.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to start bridge process '{executable}': {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bridge process I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid bridge response: {0}")]
    Protocol(String),
    #[error("{module}.{function} failed: {message}")]
    Remote {
        module: String,
        function: String,
        code: i64,
        message: String,
    },
    #[error("cannot pass a {0} across the bridge")]
    Unsupported(&'static str),
}

/// Something that can call functions of another runtime.
pub trait ForeignBridge {
    fn call(&mut self, module: &str, function: &str, args: &[Value]) -> Result<Value, BridgeError>;
}

/// JSON-RPC request structure
#[derive(Debug, Clone, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'static str,
    params: CallParams<'a>,
    id: u64,
}

#[derive(Debug, Clone, Serialize)]
struct CallParams<'a> {
    module: &'a str,
    function: &'a str,
    args: Vec<serde_json::Value>,
}

/// JSON-RPC response structure
#[derive(Debug, Clone, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
    id: u64,
}

/// JSON-RPC error structure
#[derive(Debug, Clone, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

struct Connection {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

/// A bridge backed by a long-lived child process, started on first use.
pub struct ProcessBridge {
    config: BridgeConfig,
    connection: Option<Connection>,
    request_id: u64,
}

impl ProcessBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            connection: None,
            request_id: 0,
        }
    }

    /// Start the external process if not already running.
    fn ensure_process(&mut self) -> Result<&mut Connection, BridgeError> {
        if self.connection.is_none() {
            debug!(executable = %self.config.executable, "starting bridge process");
            let mut child = Command::new(&self.config.executable)
                .args(&self.config.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn()
                .map_err(|source| BridgeError::Spawn {
                    executable: self.config.executable.clone(),
                    source,
                })?;
            let stdout = child.stdout.take().ok_or_else(|| {
                BridgeError::Protocol("bridge process has no stdout".to_string())
            })?;
            self.connection = Some(Connection {
                child,
                stdout: BufReader::new(stdout),
            });
        }
        self.connection
            .as_mut()
            .ok_or_else(|| BridgeError::Protocol("bridge process is not running".to_string()))
    }

    /// Send a JSON-RPC request and receive a response.
    fn send_request(&mut self, params: CallParams<'_>) -> Result<serde_json::Value, BridgeError> {
        self.request_id += 1;
        let id = self.request_id;
        let module = params.module.to_string();
        let function = params.function.to_string();
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: "call",
            params,
            id,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| BridgeError::Protocol(format!("failed to serialize request: {}", e)))?;

        let connection = self.ensure_process()?;
        debug!(id, module = %module, function = %function, "bridge request");
        let stdin = connection
            .child
            .stdin
            .as_mut()
            .ok_or_else(|| BridgeError::Protocol("bridge process has no stdin".to_string()))?;
        writeln!(stdin, "{}", request_json)?;
        stdin.flush()?;

        let mut response_line = String::new();
        if connection.stdout.read_line(&mut response_line)? == 0 {
            self.connection = None;
            return Err(BridgeError::Protocol(
                "bridge process closed its output".to_string(),
            ));
        }

        let response: JsonRpcResponse = serde_json::from_str(&response_line).map_err(|e| {
            BridgeError::Protocol(format!("{}. Response was: {}", e, response_line.trim()))
        })?;
        if response.id != id {
            return Err(BridgeError::Protocol(format!(
                "expected response {} but got {}",
                id, response.id
            )));
        }
        if let Some(error) = response.error {
            return Err(BridgeError::Remote {
                module,
                function,
                code: error.code,
                message: error.message,
            });
        }
        response
            .result
            .ok_or_else(|| BridgeError::Protocol("response has no result".to_string()))
    }
}

impl ForeignBridge for ProcessBridge {
    fn call(&mut self, module: &str, function: &str, args: &[Value]) -> Result<Value, BridgeError> {
        let args = args
            .iter()
            .map(|arg| value_to_json(arg, 0))
            .collect::<Result<Vec<_>, _>>()?;
        let result = self.send_request(CallParams {
            module,
            function,
            args,
        })?;
        Ok(json_to_value(result))
    }
}

impl Drop for ProcessBridge {
    fn drop(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            drop(connection.child.stdin.take());
            let _ = connection.child.kill();
            let _ = connection.child.wait();
        }
    }
}

/// Convert a value to JSON. Callables and instances cannot be sent.
pub fn value_to_json(value: &Value, depth: usize) -> Result<serde_json::Value, BridgeError> {
    if depth > MAX_NESTING {
        return Err(BridgeError::Unsupported("value nested this deeply"));
    }
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.to_string()),
        Value::Array(items) => serde_json::Value::Array(
            items
                .borrow()
                .iter()
                .map(|item| value_to_json(item, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Value::Dictionary(dict) => serde_json::Value::Object(
            dict.borrow()
                .iter()
                .map(|(key, value)| Ok((key.to_string(), value_to_json(value, depth + 1)?)))
                .collect::<Result<_, BridgeError>>()?,
        ),
        other => return Err(BridgeError::Unsupported(other.type_name())),
    })
}

/// Convert JSON back to a value. Objects become dictionaries.
pub fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::from(s),
        serde_json::Value::Array(items) => {
            Value::array(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(entries) => Value::dictionary(
            entries
                .into_iter()
                .map(|(key, value)| (key, json_to_value(value)))
                .collect::<Dictionary>(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_to_json() {
        let mut dict = Dictionary::new();
        dict.insert("n", Value::Number(1.5));
        dict.insert("tags", Value::array(vec!["a".into(), Value::Null]));
        let json = value_to_json(&Value::dictionary(dict), 0).unwrap();
        assert_eq!(json, serde_json::json!({"n": 1.5, "tags": ["a", null]}));
    }

    #[test]
    fn test_library_objects_are_not_sent() {
        let err = value_to_json(&Value::Library("Math".into()), 0).unwrap_err();
        assert_eq!(err.to_string(), "cannot pass a module across the bridge");
    }

    #[test]
    fn test_json_to_value() {
        let value = json_to_value(serde_json::json!({"ok": true, "items": [1, "two"]}));
        assert_eq!(value.to_string(), "{items: [1, two], ok: true}");
    }

    #[test]
    fn test_missing_executable() {
        let mut bridge = ProcessBridge::new(BridgeConfig {
            executable: "lapis-bridge-that-does-not-exist".to_string(),
            args: vec![],
        });
        let err = bridge.call("m", "f", &[]).unwrap_err();
        assert!(matches!(err, BridgeError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_round_trip_through_process() {
        let script = r#"while read line; do echo '{"jsonrpc":"2.0","result":{"sum":3},"id":1}'; done"#;
        let mut bridge = ProcessBridge::new(BridgeConfig {
            executable: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        });
        let result = bridge
            .call("math", "add", &[Value::Number(1.0), Value::Number(2.0)])
            .unwrap();
        assert_eq!(result.to_string(), "{sum: 3}");
    }
}
