use serde::Deserialize;
use toml;

use crate::error::Error;
use crate::utils::{path_absolute_join, path_absolute_parent, path_join};

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    pub name: String,

    pub log: LoggingSettings,
    pub server: ServerSettings,
    pub token: TokenSettings,
    pub llama: LlamaSettings,
    pub agent: AgentSettings,

    #[serde(skip)]
    pub reldir: String,
}

/// Logging settings
#[derive(Deserialize, Debug, Clone)]
pub struct LoggingSettings {
    /// Directory where to store log messages
    pub dir: String,

    /// Whether to output debug messages.
    pub verbose: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ServerSettings {
    pub address: String,
    pub port: u16,

    /// Origins that browsers are allowed to call the API from.
    pub allowed_origins: Vec<String>,

    /// Maximum size of an uploaded CSV file, in bytes.
    pub max_upload_bytes: usize,

    /// Maximum size of a JSON request body, in bytes.
    pub max_json_payload: usize,
}

/// Settings for the access tokens handed out for uploaded files.
#[derive(Deserialize, Debug, Clone)]
pub struct TokenSettings {
    /// Secret used to sign tokens with HMAC-SHA256
    pub secret_key: String,

    /// How long a token (and the data stored under it) stays valid.
    pub expire_minutes: u32,
}

/// Settings for the llama.cpp command line interface
#[derive(Deserialize, Debug, Clone)]
pub struct LlamaSettings {
    /// Directory containing the llama-cli executable
    pub libs_dir: String,

    /// Directory containing the .gguf model
    pub models_dir: String,

    /// Number of tokens to predict
    pub n_predict: u32,

    /// Number of CPU threads used by llama.cpp
    pub threads: u32,

    /// Context window size
    pub ctx_size: u32,

    pub temperature: f32,

    /// Run llama-cli in conversation mode
    pub conversation: bool,

    /// Kill llama-cli if it has not finished after this many seconds.
    pub timeout_seconds: u64,

    /// Upper bound on what we accept from llama-cli on stdout and stderr.
    pub max_output_bytes: usize,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AgentSettings {
    /// What running the inference machine costs for a whole year, in cents.
    pub yearly_compute_cost_cents: f64,
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, Error>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::from(format!("Invalid value \"{value}\" for {var}: {e}")))
}

impl Settings {
    /// Loads settings from the specified path
    pub fn load(path: &str) -> Result<Self, Error> {
        let contents: String = std::fs::read_to_string(path)
            .inspect_err(|e| eprintln!("Could not load settings from \"{path}\": {e}"))?;
        let mut s = Self::from_toml_str(&contents)
            .inspect_err(|e| eprintln!("Error parsing settings from \"{path}\": {e}"))?;

        s.reldir = path_absolute_parent(&path)?;

        s.log.dir = path_absolute_join(&s.reldir, &s.log.dir)?;
        s.llama.libs_dir = path_absolute_join(&s.reldir, &s.llama.libs_dir)?;
        s.llama.models_dir = path_absolute_join(&s.reldir, &s.llama.models_dir)?;

        s.apply_env_overrides()?;
        Ok(s)
    }

    /// Parses settings without resolving any paths.
    pub fn from_toml_str(contents: &str) -> Result<Self, Error> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self) -> Result<(), Error> {
        if let Ok(log_dir) = std::env::var("CHARTAGENT_LOG_DIR") {
            self.log.dir = log_dir;
        }
        if let Ok(truth_value) = std::env::var("CHARTAGENT_LOG_VERBOSE") {
            self.log.verbose = matches!(
                truth_value.to_lowercase().as_str(),
                "true" | "t" | "yes" | "y"
            );
        }

        // Server
        if let Ok(address) = std::env::var("CHARTAGENT_SERVER_ADDRESS") {
            self.server.address = address;
        }
        if let Ok(port) = std::env::var("CHARTAGENT_SERVER_PORT") {
            self.server.port = parse_env("CHARTAGENT_SERVER_PORT", &port)?;
        }
        if let Ok(origins) = std::env::var("CHARTAGENT_SERVER_ALLOWED_ORIGINS") {
            self.server.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }

        // Token
        if let Ok(secret_key) = std::env::var("CHARTAGENT_TOKEN_SECRET_KEY") {
            self.token.secret_key = secret_key;
        }
        if let Ok(minutes) = std::env::var("CHARTAGENT_TOKEN_EXPIRE_MINUTES") {
            self.token.expire_minutes = parse_env("CHARTAGENT_TOKEN_EXPIRE_MINUTES", &minutes)?;
        }

        // llama.cpp
        if let Ok(libs_dir) = std::env::var("CHARTAGENT_LLAMA_LIBS_DIR") {
            self.llama.libs_dir = libs_dir;
        }
        if let Ok(models_dir) = std::env::var("CHARTAGENT_LLAMA_MODELS_DIR") {
            self.llama.models_dir = models_dir;
        }
        if let Ok(threads) = std::env::var("CHARTAGENT_LLAMA_THREADS") {
            self.llama.threads = parse_env("CHARTAGENT_LLAMA_THREADS", &threads)?;
        }
        if let Ok(timeout) = std::env::var("CHARTAGENT_LLAMA_TIMEOUT_SECONDS") {
            self.llama.timeout_seconds = parse_env("CHARTAGENT_LLAMA_TIMEOUT_SECONDS", &timeout)?;
        }

        Ok(())
    }

    /// Sets up logging for the current process.
    pub fn setup_logging(self: &Self, prockind: &str) -> Result<(), Error> {
        use log::LevelFilter::{Debug, Info};

        std::fs::create_dir_all(&self.log.dir).map_err(|e| {
            eprintln!(
                "Error creating directory {} for the log file: {}",
                &self.log.dir, e
            );
            e.to_string()
        })?;

        let path_logfile = path_join(&self.log.dir, "log.out")?;
        let prockind = prockind.to_string();
        fern::Dispatch::new()
            .format(move |out, message, record| {
                out.finish(format_args!(
                    "[{0} {1} ({4}-{5}) {2}:{3}] {6}",
                    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.target(),
                    record.line().unwrap_or(0),
                    prockind,
                    std::process::id(),
                    message
                ))
            })
            .level(if self.log.verbose { Debug } else { Info })
            .chain(std::io::stderr())
            .chain(
                fern::log_file(&path_logfile).inspect_err(|e| {
                    eprintln!("Error setting up log file {}: {}", &path_logfile, e)
                })?,
            )
            .apply()?;
        Ok(())
    }
}
