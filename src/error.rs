use std::io;

use nix::unistd::Pid;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
	#[error("unterminated quote: missing closing {0}")]
	UnterminatedQuote(char),
	#[error("missing command")]
	EmptyStage,
	#[error("missing file name after '{0}'")]
	MissingRedirectTarget(char),
	#[error("'{0}' is not supported")]
	UnsupportedOperator(char),
}

#[derive(Debug, Error)]
pub enum ShellError {
	#[error("empty pipeline")]
	EmptyPipeline,

	#[error("stage {index} has no command")]
	EmptyStage { index: usize },

	#[error("{target}: {source}")]
	Redirection {
		target: String,
		#[source]
		source: io::Error,
	},

	#[error("cannot create pipe: {0}")]
	Pipe(#[source] nix::Error),

	#[error("cannot fork: {0}")]
	Spawn(#[source] nix::Error),

	#[error("{command}: command not found")]
	CommandNotFound { command: String },

	#[error("{command}: {source}")]
	Exec {
		command: String,
		#[source]
		source: io::Error,
	},

	#[error("cannot wait for process {pid}: {source}")]
	Wait {
		pid: Pid,
		#[source]
		source: nix::Error,
	},
}

impl ShellError {
	/// Status a child reports when it dies with this error.
	pub fn exit_code(&self) -> u8 {
		match *self {
			ShellError::CommandNotFound { .. } => 127,
			ShellError::Exec { .. } => 126,
			_ => 1,
		}
	}

	/// Errors that end the whole shell rather than one pipeline.
	pub fn is_fatal(&self) -> bool {
		matches!(*self, ShellError::Spawn(_))
	}
}
