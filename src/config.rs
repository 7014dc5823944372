use std::env;
use std::os::unix::ffi::OsStringExt;

const PROMPT_KEY: &str = "PIPESH_PROMPT";
const LOG_KEY: &str = "PIPESH_LOG";

const DEFAULT_PROMPT: &[u8] = b"pipesh> ";
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
	pub prompt: Vec<u8>,
	/// `tracing_subscriber::EnvFilter` directive.
	pub log_filter: String,
}

impl Default for Config {
	fn default() -> Config {
		Config { prompt: DEFAULT_PROMPT.to_vec(), log_filter: DEFAULT_LOG_FILTER.to_string() }
	}
}

impl Config {
	pub fn from_env() -> Config {
		let mut config = Config::default();
		if let Some(prompt) = env::var_os(PROMPT_KEY) {
			config.prompt = prompt.into_vec();
		}
		if let Ok(filter) = env::var(LOG_KEY) {
			config.log_filter = filter;
		}
		config
	}
}
