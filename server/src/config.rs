// Configuration for the server, read from the environment

use std::{path::PathBuf, str::FromStr, time::Duration};

/// Which synthesis engine the process loads at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    /// In-process placeholder engine, no model required.
    Tone,
    /// External voice-cloning program driven over stdout.
    Command,
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tone" => Ok(EngineKind::Tone),
            "command" => Ok(EngineKind::Command),
            other => Err(format!("unknown SYNTH_ENGINE '{other}' (expected 'tone' or 'command')")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    /// Number of requests allowed to run synthesis at once.
    pub synth_slots: usize,
    pub admission_timeout_ms: u64,
    pub segment_timeout_secs: u64,
    /// How long one body chunk may wait for a client that is not reading.
    pub stream_write_timeout_secs: u64,
    pub stream_chunk_bytes: usize,
    pub max_upload_mb: usize,
    pub scratch_dir: PathBuf,
    pub engine: String,
    pub synth_command: Option<String>,
    pub synth_args: Vec<String>,
    pub model_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            rate_limit_per_minute: 60,
            request_timeout_secs: 180,
            cors_allowed_origins: None,
            synth_slots: 1,
            admission_timeout_ms: 30_000,
            segment_timeout_secs: 120,
            stream_write_timeout_secs: 30,
            stream_chunk_bytes: 1024,
            max_upload_mb: 20,
            scratch_dir: std::env::temp_dir().join("tts-scratch"),
            engine: "tone".to_string(),
            synth_command: None,
            synth_args: Vec::new(),
            model_dir: PathBuf::from("models"),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect()
            });

        let synth_command = std::env::var("SYNTH_COMMAND")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let synth_args = std::env::var("SYNTH_ARGS")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT", defaults.port),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            cors_allowed_origins,
            synth_slots: env_parse("SYNTH_SLOTS", defaults.synth_slots),
            admission_timeout_ms: env_parse("ADMISSION_TIMEOUT_MS", defaults.admission_timeout_ms),
            segment_timeout_secs: env_parse("SEGMENT_TIMEOUT_SECS", defaults.segment_timeout_secs),
            stream_write_timeout_secs: env_parse(
                "STREAM_WRITE_TIMEOUT_SECS",
                defaults.stream_write_timeout_secs,
            ),
            stream_chunk_bytes: env_parse("STREAM_CHUNK_BYTES", defaults.stream_chunk_bytes),
            max_upload_mb: env_parse("MAX_UPLOAD_MB", defaults.max_upload_mb),
            scratch_dir: std::env::var("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            engine: std::env::var("SYNTH_ENGINE").unwrap_or(defaults.engine),
            synth_command,
            synth_args,
            model_dir: std::env::var("SYNTH_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
        }
        .normalized()
    }

    /// Clamp values that must never be zero.
    pub fn normalized(mut self) -> Self {
        self.synth_slots = self.synth_slots.max(1);
        self.stream_chunk_bytes = self.stream_chunk_bytes.max(1);
        self.stream_write_timeout_secs = self.stream_write_timeout_secs.max(1);
        self.max_upload_mb = self.max_upload_mb.max(1);
        self
    }

    pub fn engine_kind(&self) -> Result<EngineKind, String> {
        self.engine.parse()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    pub fn segment_timeout(&self) -> Duration {
        Duration::from_secs(self.segment_timeout_secs)
    }

    pub fn stream_write_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_write_timeout_secs)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.synth_slots, 1);
        assert_eq!(config.stream_chunk_bytes, 1024);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.engine_kind(), Ok(EngineKind::Tone));
        assert_eq!(config.max_upload_bytes(), 20 * 1024 * 1024);
    }

    #[test]
    fn test_normalized_clamps_zero_values() {
        let config = ServerConfig {
            synth_slots: 0,
            stream_chunk_bytes: 0,
            max_upload_mb: 0,
            stream_write_timeout_secs: 0,
            ..ServerConfig::default()
        }
        .normalized();
        assert_eq!(config.synth_slots, 1);
        assert_eq!(config.stream_write_timeout(), Duration::from_secs(1));
        assert_eq!(config.stream_chunk_bytes, 1);
        assert_eq!(config.max_upload_mb, 1);
    }

    #[test]
    fn test_engine_kind_parsing() {
        assert_eq!("Command".parse::<EngineKind>(), Ok(EngineKind::Command));
        assert_eq!(" tone ".parse::<EngineKind>(), Ok(EngineKind::Tone));
        assert!("piper".parse::<EngineKind>().is_err());
    }
}
