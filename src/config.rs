use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_REMOTE_URL: &str = "https://api-inference.huggingface.co";
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// A provider client could not be constructed from the supplied settings.
    #[error("Failed to initialize {provider} client: {reason}")]
    ClientInit {
        /// Provider whose client failed to build.
        provider: &'static str,
        /// Underlying failure description.
        reason: String,
    },
}

/// Runtime configuration for the QuickPrep server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Inference backend used for every model-backed capability.
    pub inference_provider: InferenceProvider,
    /// Base URL of the hosted inference API.
    pub inference_api_url: String,
    /// Bearer credential for the hosted inference API.
    pub inference_api_token: Option<String>,
    /// Base URL of the local Ollama runtime.
    pub ollama_url: String,
    /// Model names per capability.
    pub models: ModelConfig,
    /// Output ceiling for the summarizer.
    pub summary_max_tokens: u32,
    /// Output ceiling for the key-point generator.
    pub keypoints_max_tokens: u32,
    /// Output ceiling for question generation.
    pub questions_max_tokens: u32,
    /// Number of key points requested from the model.
    pub keypoint_count: usize,
    /// Maximum characters of extracted text forwarded to a single-pass stage.
    pub max_input_chars: usize,
    /// Target size of one summarization chunk, in characters.
    pub summary_chunk_chars: usize,
    /// Most chunks summarized for one document.
    pub summary_max_chunks: usize,
    /// Output ceiling for quiz generation.
    pub quiz_max_tokens: u32,
    /// Number of multiple-choice questions requested per quiz.
    pub quiz_question_count: usize,
    /// Shortest extracted text a quiz is generated from.
    pub quiz_min_chars: usize,
    /// Timeout applied to each enrichment stage.
    pub stage_timeout_secs: u64,
    /// Timeout applied to each extractor invocation.
    pub extraction_timeout_secs: u64,
    /// Bounded retries for transient provider transport errors.
    pub inference_max_retries: u32,
    /// Base backoff between retries, doubled per attempt.
    pub inference_retry_backoff_ms: u64,
    /// Scratch directory for request-scoped uploads.
    pub upload_dir: Option<PathBuf>,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Model identifiers for each external capability.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Summarization model.
    pub summary: String,
    /// Key-point model.
    pub keypoints: String,
    /// Question-generation model.
    pub questions: String,
    /// Multiple-choice quiz model.
    pub quiz: String,
    /// OCR model.
    pub ocr: String,
    /// Image-captioning model.
    pub caption: String,
}

/// Supported inference backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceProvider {
    /// Hosted inference API reached with a bearer token.
    Remote,
    /// Local Ollama runtime.
    Ollama,
}

impl InferenceProvider {
    /// Short label used in logs and the health endpoint.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Ollama => "ollama",
        }
    }

    fn default_models(self) -> ModelConfig {
        match self {
            Self::Remote => ModelConfig {
                summary: "facebook/bart-large-cnn".into(),
                keypoints: "google/flan-t5-large".into(),
                questions: "valhalla/t5-small-qg-hl".into(),
                quiz: "google/flan-t5-large".into(),
                ocr: "microsoft/trocr-base-printed".into(),
                caption: "Salesforce/blip-image-captioning-large".into(),
            },
            Self::Ollama => ModelConfig {
                summary: "llama3.2".into(),
                keypoints: "llama3.2".into(),
                questions: "llama3.2".into(),
                quiz: "llama3.2".into(),
                ocr: "llava".into(),
                caption: "llava".into(),
            },
        }
    }
}

impl std::str::FromStr for InferenceProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "remote" | "huggingface" | "hf" => Ok(Self::Remote),
            "ollama" | "local" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let inference_provider = match optional("INFERENCE_PROVIDER") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("INFERENCE_PROVIDER".into()))?,
            None => InferenceProvider::Remote,
        };

        let inference_api_token = optional("INFERENCE_API_TOKEN");
        if inference_provider == InferenceProvider::Remote && inference_api_token.is_none() {
            return Err(ConfigError::MissingVariable("INFERENCE_API_TOKEN".into()));
        }

        let defaults = inference_provider.default_models();
        let models = ModelConfig {
            summary: optional("SUMMARY_MODEL").unwrap_or(defaults.summary),
            keypoints: optional("KEYPOINTS_MODEL").unwrap_or(defaults.keypoints),
            questions: optional("QUESTIONS_MODEL").unwrap_or(defaults.questions),
            quiz: optional("QUIZ_MODEL").unwrap_or(defaults.quiz),
            ocr: optional("OCR_MODEL").unwrap_or(defaults.ocr),
            caption: optional("CAPTION_MODEL").unwrap_or(defaults.caption),
        };

        Ok(Self {
            inference_provider,
            inference_api_url: optional("INFERENCE_API_URL")
                .unwrap_or_else(|| DEFAULT_REMOTE_URL.to_string()),
            inference_api_token,
            ollama_url: optional("OLLAMA_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            models,
            summary_max_tokens: parse_or(optional("SUMMARY_MAX_TOKENS"), "SUMMARY_MAX_TOKENS", 180)?,
            keypoints_max_tokens: parse_or(
                optional("KEYPOINTS_MAX_TOKENS"),
                "KEYPOINTS_MAX_TOKENS",
                256,
            )?,
            questions_max_tokens: parse_or(
                optional("QUESTIONS_MAX_TOKENS"),
                "QUESTIONS_MAX_TOKENS",
                128,
            )?,
            keypoint_count: parse_or(optional("KEYPOINT_COUNT"), "KEYPOINT_COUNT", 5)?,
            max_input_chars: parse_or(optional("MAX_INPUT_CHARS"), "MAX_INPUT_CHARS", 6000)?,
            summary_chunk_chars: parse_or(
                optional("SUMMARY_CHUNK_CHARS"),
                "SUMMARY_CHUNK_CHARS",
                800,
            )?,
            summary_max_chunks: parse_or(
                optional("SUMMARY_MAX_CHUNKS"),
                "SUMMARY_MAX_CHUNKS",
                16,
            )?,
            quiz_max_tokens: parse_or(optional("QUIZ_MAX_TOKENS"), "QUIZ_MAX_TOKENS", 1024)?,
            quiz_question_count: parse_or(
                optional("QUIZ_QUESTION_COUNT"),
                "QUIZ_QUESTION_COUNT",
                10,
            )?,
            quiz_min_chars: parse_or(optional("QUIZ_MIN_CHARS"), "QUIZ_MIN_CHARS", 100)?,
            stage_timeout_secs: parse_or(optional("STAGE_TIMEOUT_SECS"), "STAGE_TIMEOUT_SECS", 60)?,
            extraction_timeout_secs: parse_or(
                optional("EXTRACTION_TIMEOUT_SECS"),
                "EXTRACTION_TIMEOUT_SECS",
                90,
            )?,
            inference_max_retries: parse_or(
                optional("INFERENCE_MAX_RETRIES"),
                "INFERENCE_MAX_RETRIES",
                0,
            )?,
            inference_retry_backoff_ms: parse_or(
                optional("INFERENCE_RETRY_BACKOFF_MS"),
                "INFERENCE_RETRY_BACKOFF_MS",
                500,
            )?,
            upload_dir: optional("UPLOAD_DIR").map(PathBuf::from),
            max_upload_bytes: parse_or(
                optional("MAX_UPLOAD_BYTES"),
                "MAX_UPLOAD_BYTES",
                DEFAULT_MAX_UPLOAD_BYTES,
            )?,
            server_port: optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }

    /// Timeout applied to each enrichment stage.
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Timeout applied to each extractor invocation.
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        provider = config.inference_provider.as_str(),
        summary_model = %config.models.summary,
        keypoints_model = %config.models.keypoints,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
