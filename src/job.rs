use nix::errno::Errno;
use nix::sys::wait::{self, WaitStatus};
use nix::unistd::{self, Pid};
use tracing::{debug, warn};

use crate::error::ShellError;

pub trait WaitStatusExt {
	fn code(self) -> u8;
}

impl WaitStatusExt for WaitStatus {
	fn code(self) -> u8 {
		match self {
			WaitStatus::Exited(_, code) => code as u8,
			WaitStatus::Signaled(_, signal, _) => (128 + signal as i32) as u8,
			_ => 1,
		}
	}
}

/// A forked stage, identified by its pid.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ChildHandle {
	pub pid: Pid,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Process {
	Running(ChildHandle),
	Finished(u8),
	/// Waiting failed; the status is unknown.
	Lost,
}

#[derive(Debug)]
pub struct Job {
	pub processes: Vec<Process>,
}

impl Job {
	/// Reaps every running process in spawn order and returns the last
	/// stage's status, or 1 if any status could not be observed.
	pub fn wait(&mut self) -> u8 {
		for pr in &mut self.processes {
			if let Process::Running(child) = *pr {
				*pr = match wait_child(child) {
					Ok(status) => {
						debug!(pid = %child.pid, status = ?status, "reaped stage");
						Process::Finished(status.code())
					},
					Err(e) => {
						warn!(error = %e, "lost track of stage");
						Process::Lost
					},
				};
			}
		}
		if self.processes.contains(&Process::Lost) {
			return 1;
		}
		match self.processes.last() {
			Some(&Process::Finished(code)) => code,
			_ => 1,
		}
	}
}

fn wait_child(child: ChildHandle) -> Result<WaitStatus, ShellError> {
	loop {
		match wait::waitpid(child.pid, None) {
			Ok(status @ WaitStatus::Exited(..)) | Ok(status @ WaitStatus::Signaled(..)) => return Ok(status),
			Ok(_) | Err(Errno::EINTR) => continue,
			Err(e) => return Err(ShellError::Wait { pid: child.pid, source: e }),
		}
	}
}

#[derive(Debug)]
pub struct JobBuilder {
	imp: Job,
}

impl JobBuilder {
	pub fn new(size_hint: usize) -> JobBuilder {
		JobBuilder {
			imp: Job { processes: Vec::with_capacity(size_hint) }
		}
	}

	/// Forks, recording the child in the parent. The child must exec or `_exit`.
	pub fn push_fork(&mut self) -> Result<unistd::ForkResult, ShellError> {
		// The child only touches descriptors before exec or _exit.
		let r = unsafe { unistd::fork() }.map_err(ShellError::Spawn)?;
		if let unistd::ForkResult::Parent { child } = r {
			self.imp.processes.push(Process::Running(ChildHandle { pid: child }));
		}
		Ok(r)
	}

	/// Records a stage that failed before a process could be created.
	pub fn push_finished(&mut self, code: u8) {
		self.imp.processes.push(Process::Finished(code));
	}

	pub fn build(self) -> Job {
		self.imp
	}
}
