use std::env;
use std::fs;

use anyhow::{anyhow, Context, Result};

use crate::policy::Policy;

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub file: Option<String>,
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Policies seeded into the in-memory manager at startup.
    pub policies: Vec<Policy>,
    pub audit: AuditConfig,
    pub port: u16,
    pub max_request_bytes: Option<usize>,
}

impl AppConfig {
    /// Read configuration from the environment:
    ///
    /// * `WARDEN_POLICY_FILE` (optional) – path to a JSON array of policies.
    /// * `AUDIT_LOG_FILE` (optional) – path for newline-delimited decision records.
    /// * `AUDIT_LOG_MAX_BYTES`, `AUDIT_LOG_KEEP`, `AUDIT_LOG_COMPRESS` – rotation.
    /// * `WARDEN_MAX_REQUEST_BYTES` (optional) – inbound body cap.
    /// * `PORT` (optional) – listen port, default 8080.
    pub fn from_env() -> Result<Self> {
        let policies = if let Ok(path) = env::var("WARDEN_POLICY_FILE") {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read WARDEN_POLICY_FILE '{}'", path))?;
            serde_json::from_str::<Vec<Policy>>(&content).with_context(|| {
                format!(
                    "Failed to parse WARDEN_POLICY_FILE '{}': invalid policy JSON",
                    path
                )
            })?
        } else {
            Vec::new()
        };

        let audit = AuditConfig {
            file: env::var("AUDIT_LOG_FILE").ok(),
            max_bytes: parse_optional_u64("AUDIT_LOG_MAX_BYTES")?,
            keep: parse_optional_u64("AUDIT_LOG_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("AUDIT_LOG_COMPRESS")?.unwrap_or(false),
        };

        let max_request_bytes =
            parse_optional_u64("WARDEN_MAX_REQUEST_BYTES")?.map(|value| value as usize);
        let port = parse_optional_u64("PORT")?.unwrap_or(8080) as u16;

        Ok(Self {
            policies,
            audit,
            port,
            max_request_bytes,
        })
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(anyhow!("{} must be a boolean (true/false/1/0)", var)),
            }
        }
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const VARS: &[&str] = &[
        "WARDEN_POLICY_FILE",
        "AUDIT_LOG_FILE",
        "AUDIT_LOG_MAX_BYTES",
        "AUDIT_LOG_KEEP",
        "AUDIT_LOG_COMPRESS",
        "WARDEN_MAX_REQUEST_BYTES",
        "PORT",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn parses_environment_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let cfg = AppConfig::from_env().unwrap();
        assert!(cfg.policies.is_empty());
        assert!(cfg.audit.file.is_none());
        assert_eq!(cfg.audit.keep, 1);
        assert!(!cfg.audit.compress);
        assert_eq!(cfg.port, 8080);
        assert!(cfg.max_request_bytes.is_none());
    }

    #[test]
    fn parses_full_configuration() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let mut temp = NamedTempFile::new().unwrap();
        let policies = serde_json::json!([{
            "id": "p1",
            "description": "seeded",
            "subjects": ["user:<.+>"],
            "effect": "allow",
            "resources": ["articles:<[0-9]+>"],
            "actions": ["create"]
        }]);
        write!(temp, "{}", policies).unwrap();

        std::env::set_var("WARDEN_POLICY_FILE", temp.path());
        std::env::set_var("AUDIT_LOG_FILE", "/tmp/audit.log");
        std::env::set_var("AUDIT_LOG_MAX_BYTES", "1024");
        std::env::set_var("AUDIT_LOG_KEEP", "3");
        std::env::set_var("AUDIT_LOG_COMPRESS", "true");
        std::env::set_var("WARDEN_MAX_REQUEST_BYTES", "2048");
        std::env::set_var("PORT", "9100");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.policies.len(), 1);
        assert_eq!(cfg.policies[0].id, "p1");
        assert_eq!(cfg.audit.file.as_deref(), Some("/tmp/audit.log"));
        assert_eq!(cfg.audit.max_bytes, Some(1024));
        assert_eq!(cfg.audit.keep, 3);
        assert!(cfg.audit.compress);
        assert_eq!(cfg.max_request_bytes, Some(2048));
        assert_eq!(cfg.port, 9100);

        clear_env();
    }

    #[test]
    fn rejects_unreadable_policy_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        std::env::set_var("WARDEN_POLICY_FILE", "/definitely/not/here.json");
        assert!(AppConfig::from_env().is_err());
        clear_env();
    }
}
