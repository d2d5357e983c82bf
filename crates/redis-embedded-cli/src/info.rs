//! Machine-readable description of a started server.

use redis_embedded::RedisServer;
use serde::Serialize;
use std::path::PathBuf;

/// What a parent process needs to connect to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub version: String,
    pub pid: Option<u32>,
    pub password_required: bool,
    pub executable: PathBuf,
}

impl ServerInfo {
    pub fn from_server(server: &RedisServer) -> Self {
        let addr = server.addr();
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
            version: server.version().to_string(),
            pid: server.pid(),
            password_required: server.password().is_some(),
            executable: server.executable().to_path_buf(),
        }
    }

    /// The single stdout line announcing the server.
    pub fn announcement(&self, json: bool) -> serde_json::Result<String> {
        if json {
            serde_json::to_string(self)
        } else {
            Ok(format!("REDIS_PORT={}", self.port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample() -> ServerInfo {
        ServerInfo {
            host: "127.0.0.1".to_string(),
            port: 6380,
            version: "2.8.9".to_string(),
            pid: Some(4242),
            password_required: true,
            executable: PathBuf::from("/tmp/abc/redis-server"),
        }
    }

    #[test]
    fn test_plain_announcement() {
        assert_eq!(sample().announcement(false).unwrap(), "REDIS_PORT=6380");
    }

    #[test]
    fn test_json_announcement() {
        let line = sample().announcement(true).unwrap();
        assert!(!line.contains('\n'));

        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["port"], 6380);
        assert_eq!(value["pid"], 4242);
        assert_eq!(value["password_required"], true);
        assert_eq!(value["executable"], "/tmp/abc/redis-server");
    }
}
