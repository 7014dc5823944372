use std::convert::Infallible;
use std::ffi::CString;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg, OFlag};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd;
use tracing::{debug, instrument, warn};

use crate::builtin;
use crate::error::ShellError;
use crate::global;
use crate::job::{ChildHandle, JobBuilder};
use crate::redirect;
use crate::types::{Endpoint, ExitStatus, Pipeline, Stage};

fn report(e: &ShellError) {
	let _ = writeln!(io::stderr(), "pipesh: {}", e);
}

/// One stage ready to be forked, with its argument vector already converted.
pub struct SpawnRequest<'a> {
	stage: &'a mut Stage,
	argv: Vec<CString>,
}

fn stage_argv(stage: &Stage) -> Result<Vec<CString>, ShellError> {
	if stage.arguments.is_empty() {
		return Err(ShellError::EmptyStage { index: 0 });
	}
	stage.arguments.iter().map(|a| CString::new(a.clone())).collect::<Result<Vec<_>, _>>().map_err(|e| ShellError::Exec {
		command: stage.display_name().into_owned(),
		source: io::Error::new(io::ErrorKind::InvalidInput, e),
	})
}

impl<'a> SpawnRequest<'a> {
	/// Forks the stage. The parent drops its copies of the stage's pipe ends;
	/// the child never returns.
	pub fn spawn(self, job_builder: &mut JobBuilder) -> Result<ChildHandle, ShellError> {
		let SpawnRequest { stage, argv } = self;
		match job_builder.push_fork()? {
			unistd::ForkResult::Parent { child } => {
				stage.release_endpoints();
				debug!(pid = %child, command = %stage.display_name(), "spawned stage");
				Ok(ChildHandle { pid: child })
			},
			unistd::ForkResult::Child => exec_stage(stage, &argv),
		}
	}
}

fn do_exec_stage(stage: &mut Stage, argv: &[CString]) -> Result<Infallible, ShellError> {
	// The Rust runtime ignores SIGPIPE, and an ignored signal survives exec.
	unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigDfl) }.map_err(|e| ShellError::Exec {
		command: stage.display_name().into_owned(),
		source: e.into(),
	})?;
	redirect::apply(stage)?;
	unistd::execvp(&argv[0], argv).map_err(|e| match e {
		Errno::ENOENT => ShellError::CommandNotFound { command: stage.display_name().into_owned() },
		e => ShellError::Exec { command: stage.display_name().into_owned(), source: e.into() },
	})
}

fn exec_stage(stage: &mut Stage, argv: &[CString]) -> ! {
	let code = match do_exec_stage(stage, argv) {
		Ok(never) => match never {},
		Err(e) => {
			report(&e);
			e.exit_code()
		},
	};
	unsafe { libc::_exit(code as libc::c_int) }
}

fn spawn_stages(pipeline: &mut Pipeline, job_builder: &mut JobBuilder) -> Result<(), ShellError> {
	let last = pipeline.stages.len() - 1;
	for i in 0 .. pipeline.stages.len() {
		if i != last {
			let (pipe_read, pipe_write) = unistd::pipe2(OFlag::O_CLOEXEC).map_err(ShellError::Pipe)?;
			debug!(read = pipe_read.as_raw_fd(), write = pipe_write.as_raw_fd(), stage = i, "created pipe");
			pipeline.stages[i].output_endpoint = Endpoint::Pipe(pipe_write);
			pipeline.stages[i + 1].input_endpoint = Endpoint::Pipe(pipe_read);
		}

		let stage = &mut pipeline.stages[i];
		if (stage.input_file.is_some() && !stage.input_endpoint.is_inherited())
			|| (stage.output_file.is_some() && !stage.output_endpoint.is_inherited()) {
			warn!(command = %stage.display_name(), "pipe overrides file redirection");
		}
		match stage_argv(stage) {
			Ok(argv) => { SpawnRequest { stage, argv }.spawn(job_builder)?; },
			Err(e) => {
				report(&e);
				stage.release_endpoints();
				job_builder.push_finished(e.exit_code());
			},
		}
	}
	Ok(())
}

/// Runs every stage of `pipeline` as a child process connected by pipes
/// and returns the last stage's status.
#[instrument(skip_all, fields(stages = pipeline.stages.len()))]
pub fn run_pipeline(pipeline: &mut Pipeline) -> Result<u8, ShellError> {
	pipeline.validate()?;
	let mut job_builder = JobBuilder::new(pipeline.stages.len());
	let r = spawn_stages(pipeline, &mut job_builder);
	// Unspawned stages still hold pipe ends; close them so spawned ones see EOF.
	pipeline.release_endpoints();
	let status = job_builder.build().wait();
	r.map(|()| status)
}

// Keep saved copies clear of the low descriptors a redirection may target.
const SAVED_FD_MIN: RawFd = 10;

fn save_stream(fd: RawFd) -> Result<OwnedFd, ShellError> {
	let saved = fcntl::fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(SAVED_FD_MIN)).map_err(|e| ShellError::Redirection {
		target: "saved standard stream".to_string(),
		source: e.into(),
	})?;
	Ok(unsafe { OwnedFd::from_raw_fd(saved) })
}

/// The shell's own standard input and output, put back on drop.
struct SavedStreams {
	stdin: OwnedFd,
	stdout: OwnedFd,
}

impl SavedStreams {
	fn save() -> Result<SavedStreams, ShellError> {
		let stdin = save_stream(libc::STDIN_FILENO)?;
		let stdout = save_stream(libc::STDOUT_FILENO)?;
		Ok(SavedStreams { stdin, stdout })
	}
}

impl Drop for SavedStreams {
	fn drop(&mut self) {
		let _ = io::stdout().flush();
		for (saved, target) in [(&self.stdin, libc::STDIN_FILENO), (&self.stdout, libc::STDOUT_FILENO)] {
			if let Err(e) = unistd::dup2(saved.as_raw_fd(), target) {
				warn!(fd = target, error = %e, "cannot restore shell stream");
			}
		}
	}
}

/// Runs a builtin in this process with the stage's redirections applied,
/// restoring the shell's streams afterwards on every path.
#[instrument(skip_all, fields(command = %stage.display_name()))]
pub fn run_builtin(state: &mut global::State, stage: &mut Stage, handler: builtin::Handler) -> Result<ExitStatus, ShellError> {
	let _ = io::stdout().flush();
	let saved = SavedStreams::save()?;
	redirect::apply(stage)?;
	let status = handler(state, &stage.arguments);
	drop(saved);
	Ok(status)
}

/// Evaluates one parsed line. Only fatal errors are returned; everything
/// else is reported on stderr and folded into the status.
pub fn eval(state: &mut global::State, pipeline: &mut Pipeline) -> Result<ExitStatus, ShellError> {
	if pipeline.stages.len() == 1 {
		if let Some(handler) = builtin::match_builtin(pipeline.stages[0].name()) {
			return Ok(run_builtin(state, &mut pipeline.stages[0], handler).unwrap_or_else(|e| {
				report(&e);
				ExitStatus::Continue(e.exit_code())
			}));
		}
	}
	match run_pipeline(pipeline) {
		Ok(code) => Ok(ExitStatus::Continue(code)),
		Err(e) => if e.is_fatal() {
			Err(e)
		} else {
			report(&e);
			Ok(ExitStatus::Continue(1))
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use std::io::Read;
	use std::os::unix::fs::MetadataExt;
	use std::path::Path;
	use serial_test::serial;

	use crate::config::Config;

	fn count_fds() -> usize {
		fs::read_dir("/proc/self/fd").unwrap().count()
	}

	fn stream_identity(fd: RawFd) -> (u64, u64) {
		let meta = fs::metadata(format!("/proc/self/fd/{}", fd)).unwrap();
		(meta.dev(), meta.ino())
	}

	fn path_arg(path: &Path) -> Vec<u8> {
		path.to_str().unwrap().as_bytes().to_vec()
	}

	fn pipeline(stages: Vec<Stage>) -> Pipeline {
		Pipeline { stages }
	}

	#[test]
	#[serial]
	fn single_stage_status() {
		assert_eq!(run_pipeline(&mut pipeline(vec![Stage::new(vec!["true"])])).unwrap(), 0);
		assert_eq!(run_pipeline(&mut pipeline(vec![Stage::new(vec!["sh", "-c", "exit 3"])])).unwrap(), 3);
	}

	#[test]
	#[serial]
	fn stages_are_connected() {
		let dir = tempfile::tempdir().unwrap();
		let out = dir.path().join("count.txt");
		let mut last = Stage::new(vec!["wc", "-l"]);
		last.output_file = Some(path_arg(&out));
		let mut p = pipeline(vec![
			Stage::new(vec!["printf", "a\\nb\\nc\\n"]),
			Stage::new(vec!["sort", "-r"]),
			last,
		]);
		assert_eq!(run_pipeline(&mut p).unwrap(), 0);
		assert_eq!(fs::read_to_string(&out).unwrap().trim(), "3");
	}

	#[test]
	#[serial]
	fn last_stage_status_wins() {
		let dir = tempfile::tempdir().unwrap();
		let out = dir.path().join("out.txt");
		let mut last = Stage::new(vec!["cat"]);
		last.output_file = Some(path_arg(&out));
		let mut p = pipeline(vec![Stage::new(vec!["sh", "-c", "echo partial; exit 1"]), last]);
		assert_eq!(run_pipeline(&mut p).unwrap(), 0);
		assert_eq!(fs::read_to_string(&out).unwrap(), "partial\n");

		let mut p = pipeline(vec![
			Stage::new(vec!["true"]),
			Stage::new(vec!["sh", "-c", "cat >/dev/null; exit 4"]),
		]);
		assert_eq!(run_pipeline(&mut p).unwrap(), 4);
	}

	#[test]
	#[serial]
	fn output_then_input_redirection_round_trips() {
		let dir = tempfile::tempdir().unwrap();
		let first = dir.path().join("first.txt");
		let second = dir.path().join("second.txt");

		let mut writer = Stage::new(vec!["printf", "hello world"]);
		writer.output_file = Some(path_arg(&first));
		assert_eq!(run_pipeline(&mut pipeline(vec![writer])).unwrap(), 0);

		let mut copier = Stage::new(vec!["cat"]);
		copier.input_file = Some(path_arg(&first));
		copier.output_file = Some(path_arg(&second));
		assert_eq!(run_pipeline(&mut pipeline(vec![copier])).unwrap(), 0);
		assert_eq!(fs::read(&second).unwrap(), b"hello world");
	}

	#[test]
	#[serial]
	fn missing_command_only_fails_its_stage() {
		let dir = tempfile::tempdir().unwrap();
		let out = dir.path().join("bytes.txt");
		let mut last = Stage::new(vec!["wc", "-c"]);
		last.output_file = Some(path_arg(&out));
		let mut p = pipeline(vec![Stage::new(vec!["pipesh-no-such-command"]), last]);
		assert_eq!(run_pipeline(&mut p).unwrap(), 0);
		assert_eq!(fs::read_to_string(&out).unwrap().trim(), "0");

		let mut p = pipeline(vec![Stage::new(vec!["pipesh-no-such-command"])]);
		assert_eq!(run_pipeline(&mut p).unwrap(), 127);
	}

	#[test]
	#[serial]
	fn missing_input_file_fails_child() {
		let dir = tempfile::tempdir().unwrap();
		let mut stage = Stage::new(vec!["cat"]);
		stage.input_file = Some(path_arg(&dir.path().join("absent.txt")));
		assert_eq!(run_pipeline(&mut pipeline(vec![stage])).unwrap(), 1);
	}

	#[test]
	#[serial]
	fn nul_byte_argument_fails_stage_without_fork() {
		let mut p = pipeline(vec![Stage::new(vec![&b"echo\0x"[..]]), Stage::new(vec!["true"])]);
		assert_eq!(run_pipeline(&mut p).unwrap(), 0);
		let mut p = pipeline(vec![Stage::new(vec!["true"]), Stage::new(vec![&b"echo\0x"[..]])]);
		assert_eq!(run_pipeline(&mut p).unwrap(), 126);
	}

	#[test]
	#[serial]
	fn no_descriptors_leak() {
		let dir = tempfile::tempdir().unwrap();
		let out = dir.path().join("out.txt");
		let before = count_fds();

		let mut last = Stage::new(vec!["tr", "a-z", "A-Z"]);
		last.output_file = Some(path_arg(&out));
		let mut p = pipeline(vec![Stage::new(vec!["printf", "abc"]), Stage::new(vec!["cat"]), last]);
		assert_eq!(run_pipeline(&mut p).unwrap(), 0);
		assert_eq!(count_fds(), before);

		let mut p = pipeline(vec![Stage::new(vec!["pipesh-no-such-command"]), Stage::new(vec!["false"])]);
		assert_eq!(run_pipeline(&mut p).unwrap(), 1);
		assert_eq!(count_fds(), before);
		assert_eq!(fs::read(&out).unwrap(), b"ABC");
	}

	#[test]
	#[serial]
	fn empty_stage_is_rejected_before_spawning() {
		let before = count_fds();
		let mut p = pipeline(vec![Stage::new(vec!["true"]), Stage::default()]);
		assert!(matches!(run_pipeline(&mut p), Err(ShellError::EmptyStage { index: 1 })));
		assert!(matches!(run_pipeline(&mut Pipeline::default()), Err(ShellError::EmptyPipeline)));
		assert_eq!(count_fds(), before);
	}

	fn read_marker(_: &mut global::State, _: &[Vec<u8>]) -> ExitStatus {
		let mut buf = vec![];
		match io::stdin().lock().read_to_end(&mut buf) {
			Ok(_) if buf == b"marker" => ExitStatus::Continue(0),
			_ => ExitStatus::Continue(1),
		}
	}

	fn leave(_: &mut global::State, args: &[Vec<u8>]) -> ExitStatus {
		ExitStatus::Terminate(args.len() as u8)
	}

	#[test]
	#[serial]
	fn builtin_redirection_is_undone() {
		let dir = tempfile::tempdir().unwrap();
		let input = dir.path().join("in.txt");
		fs::write(&input, b"marker").unwrap();
		let mut state = global::State::new(Config::default());
		let stdin_before = stream_identity(libc::STDIN_FILENO);
		let fds_before = count_fds();

		let mut stage = Stage::new(vec!["read-marker"]);
		stage.input_file = Some(path_arg(&input));
		let status = run_builtin(&mut state, &mut stage, read_marker).unwrap();
		assert_eq!(status, ExitStatus::Continue(0));
		assert_eq!(stream_identity(libc::STDIN_FILENO), stdin_before);
		assert_eq!(count_fds(), fds_before);
	}

	#[test]
	#[serial]
	fn builtin_redirection_failure_restores_streams() {
		let dir = tempfile::tempdir().unwrap();
		let mut state = global::State::new(Config::default());
		let stdin_before = stream_identity(libc::STDIN_FILENO);
		let fds_before = count_fds();

		let mut stage = Stage::new(vec!["read-marker"]);
		stage.input_file = Some(path_arg(&dir.path().join("absent.txt")));
		match run_builtin(&mut state, &mut stage, read_marker) {
			Err(ShellError::Redirection { .. }) => {},
			other => panic!("unexpected {:?}", other),
		}
		assert_eq!(stream_identity(libc::STDIN_FILENO), stdin_before);
		assert_eq!(count_fds(), fds_before);
	}

	#[test]
	#[serial]
	fn builtin_termination_propagates() {
		let mut state = global::State::new(Config::default());
		let mut stage = Stage::new(vec!["leave", "now"]);
		assert_eq!(run_builtin(&mut state, &mut stage, leave).unwrap(), ExitStatus::Terminate(2));
	}
}
