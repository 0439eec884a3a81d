// Text completion through the llama.cpp command line interface.

use std::{path::Path, time::Duration};

use serde::Serialize;

use crate::{
    error::Error,
    settings::LlamaSettings,
    utils::{path_join, run_with_timeout, CommandLimits},
};

/// Something that can continue a prompt.
pub trait TextCompletion: Send + Sync {
    /// Returns the continuation of `prompt`, cut at the first of the `stop`
    /// sequences if any of them occurs.
    fn complete(&self, prompt: &str, stop: &[String]) -> Result<String, Error>;
}

#[cfg(windows)]
const EXECUTABLE_NAME: &str = "llama-cli.exe";
#[cfg(not(windows))]
const EXECUTABLE_NAME: &str = "llama-cli";

const MODEL_SUFFIX: &str = ".gguf";

/// Parameters identifying a `LlamaCli` instance, for diagnostics.
#[derive(Serialize, Debug, Clone)]
pub struct LlamaParams {
    pub executable_path: String,
    pub model_path: String,
    pub n_predict: u32,
    pub threads: u32,
    pub ctx_size: u32,
    pub temperature: f32,
    pub conversation: bool,
}

/// Runs `llama-cli` once per completion.
#[derive(Debug, Clone)]
pub struct LlamaCli {
    params: LlamaParams,
    timeout: Duration,
    max_output_bytes: usize,
}

/// Returns the first `.gguf` file in `models_dir`, by file name.
fn find_model(models_dir: &str) -> Result<String, Error> {
    if !Path::new(models_dir).is_dir() {
        return Error::err_string(format!(
            "Models directory not found at {models_dir}. Please create it and place your .gguf model inside."
        ));
    }

    let mut candidates: Vec<String> = vec![];
    for entry in std::fs::read_dir(models_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.to_lowercase().ends_with(MODEL_SUFFIX) {
                candidates.push(name.to_string());
            }
        }
    }
    candidates.sort();

    match candidates.first() {
        Some(name) => path_join(models_dir, name),
        None => Error::err_string(format!(
            "No .gguf model found in {models_dir}. Please place at least one .gguf model file in this directory."
        )),
    }
}

/// Removes the prompt if llama-cli echoed it, then cuts the output at the
/// first stop sequence that occurs in it.
pub fn clean_output(raw: &str, prompt: &str, stop: &[String]) -> String {
    let mut output = raw.trim();
    if let Some(rest) = output.strip_prefix(prompt) {
        output = rest.trim();
    }
    for s in stop.iter().filter(|s| !s.is_empty()) {
        if let Some((head, _)) = output.split_once(s.as_str()) {
            return head.trim().to_string();
        }
    }
    output.to_string()
}

impl LlamaCli {
    /// Finds the executable and model according to the settings.
    pub fn locate(settings: &LlamaSettings) -> Result<Self, Error> {
        let executable_path = path_join(&settings.libs_dir, EXECUTABLE_NAME)?;
        if !Path::new(&executable_path).is_file() {
            return Error::err_string(format!(
                "Llama CLI executable not found at {executable_path}. Please ensure it's in the '{}' directory.",
                settings.libs_dir
            ));
        }
        let model_path = find_model(&settings.models_dir)?;
        log::info!("Using llama-cli at {executable_path} with model {model_path}");

        Ok(LlamaCli {
            params: LlamaParams {
                executable_path,
                model_path,
                n_predict: settings.n_predict,
                threads: settings.threads,
                ctx_size: settings.ctx_size,
                temperature: settings.temperature,
                conversation: settings.conversation,
            },
            timeout: Duration::from_secs(settings.timeout_seconds),
            max_output_bytes: settings.max_output_bytes,
        })
    }

    pub fn identifying_params(&self) -> &LlamaParams {
        &self.params
    }

    /// Command line for a single completion.
    pub fn command(&self, prompt: &str, stop: &[String]) -> Vec<String> {
        let p = &self.params;
        let mut cmd: Vec<String> = vec![
            p.executable_path.to_owned(),
            "-m".to_string(),
            p.model_path.to_owned(),
            "-n".to_string(),
            p.n_predict.to_string(),
            "-t".to_string(),
            p.threads.to_string(),
            "-p".to_string(),
            prompt.to_string(),
            "-ngl".to_string(),
            "0".to_string(),
            "-c".to_string(),
            p.ctx_size.to_string(),
            "--temp".to_string(),
            p.temperature.to_string(),
            "-b".to_string(),
            "1".to_string(),
        ];
        // Recent llama-cli builds enter chat mode on their own for models
        // with a chat template, so one-shot mode is requested explicitly.
        cmd.push(if p.conversation { "-cnv" } else { "-no-cnv" }.to_string());
        for s in stop {
            cmd.push("--reverse-prompt".to_string());
            cmd.push(s.to_owned());
        }
        cmd
    }
}

impl TextCompletion for LlamaCli {
    fn complete(&self, prompt: &str, stop: &[String]) -> Result<String, Error> {
        let cmd = self.command(prompt, stop);
        let output = run_with_timeout(
            &cmd,
            CommandLimits {
                timeout: self.timeout,
                max_stdout_length: self.max_output_bytes,
                max_stderr_length: self.max_output_bytes,
            },
        )
        .inspect_err(|e| log::error!("Could not run llama-cli: {e}"))?;

        if output.code != 0 {
            log::error!(
                "llama-cli exited with code {} (model {})",
                output.code,
                self.params.model_path
            );
            return Err(Error::LlamaCliError {
                code: output.code,
                stderr: output.stderr,
            });
        }
        if !output.stderr.is_empty() {
            log::debug!("STDERR from llama-cli: {}", output.stderr);
        }

        Ok(clean_output(&output.stdout, prompt, stop))
    }
}
