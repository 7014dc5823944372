use std::borrow::Cow;
use std::mem;
use std::os::fd::OwnedFd;

use crate::error::ShellError;

/// Pipe end assigned to a stage's standard stream by the orchestrator.
#[derive(Debug, Default)]
pub enum Endpoint {
	#[default]
	Inherited,
	Pipe(OwnedFd),
}

impl Endpoint {
	pub fn is_inherited(&self) -> bool {
		matches!(*self, Endpoint::Inherited)
	}

	pub fn take(&mut self) -> Endpoint {
		mem::take(self)
	}
}

#[derive(Debug, Default)]
pub struct Stage {
	pub arguments: Vec<Vec<u8>>,
	pub input_file: Option<Vec<u8>>,
	pub output_file: Option<Vec<u8>>,
	pub input_endpoint: Endpoint,
	pub output_endpoint: Endpoint,
}

impl Stage {
	#[cfg(test)]
	pub fn new<I, A>(arguments: I) -> Stage
		where I: IntoIterator<Item = A>, A: Into<Vec<u8>>
	{
		Stage { arguments: arguments.into_iter().map(Into::into).collect(), ..Stage::default() }
	}

	pub fn name(&self) -> &[u8] {
		self.arguments.first().map_or(&b""[..], |a| &a[..])
	}

	pub fn display_name(&self) -> Cow<'_, str> {
		String::from_utf8_lossy(self.name())
	}

	/// Closes this process's copies of the assigned pipe ends.
	pub fn release_endpoints(&mut self) {
		drop(self.input_endpoint.take());
		drop(self.output_endpoint.take());
	}
}

#[derive(Debug, Default)]
pub struct Pipeline {
	pub stages: Vec<Stage>,
}

impl Pipeline {
	pub fn validate(&self) -> Result<(), ShellError> {
		if self.stages.is_empty() {
			return Err(ShellError::EmptyPipeline);
		}
		match self.stages.iter().position(|s| s.arguments.is_empty()) {
			Some(index) => Err(ShellError::EmptyStage { index }),
			None => Ok(()),
		}
	}

	pub fn release_endpoints(&mut self) {
		for stage in &mut self.stages {
			stage.release_endpoints();
		}
	}
}

/// Result of evaluating one line, as seen by the read-eval loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
	Continue(u8),
	Terminate(u8),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_pipeline_is_rejected() {
		let pipeline = Pipeline::default();
		assert!(matches!(pipeline.validate(), Err(ShellError::EmptyPipeline)));
	}

	#[test]
	fn stage_without_arguments_is_rejected() {
		let pipeline = Pipeline { stages: vec![Stage::new(vec!["ls"]), Stage::default()] };
		assert!(matches!(pipeline.validate(), Err(ShellError::EmptyStage { index: 1 })));
	}

	#[test]
	fn stage_defaults_to_inherited_streams() {
		let stage = Stage::new(vec!["cat", "-n"]);
		assert_eq!(stage.name(), b"cat");
		assert!(stage.input_endpoint.is_inherited());
		assert!(stage.output_endpoint.is_inherited());
		assert!(stage.input_file.is_none() && stage.output_file.is_none());
	}
}
