use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;

use nix::fcntl::{self, FcntlArg, FdFlag};
use nix::unistd;

use crate::error::ShellError;
use crate::types::{Endpoint, Stage};

const OUTPUT_FILE_MODE: u32 = 0o644;

fn stream_name(fd: RawFd) -> &'static str {
	match fd {
		libc::STDIN_FILENO => "standard input",
		libc::STDOUT_FILENO => "standard output",
		_ => "descriptor",
	}
}

fn file_error(path: &[u8], e: io::Error) -> ShellError {
	ShellError::Redirection { target: String::from_utf8_lossy(path).into_owned(), source: e }
}

fn stream_error(fd: RawFd, e: nix::Error) -> ShellError {
	ShellError::Redirection { target: stream_name(fd).to_string(), source: e.into() }
}

pub fn open_input(path: &[u8]) -> Result<File, ShellError> {
	File::open(OsStr::from_bytes(path)).map_err(|e| file_error(path, e))
}

pub fn open_output(path: &[u8]) -> Result<File, ShellError> {
	OpenOptions::new()
		.write(true)
		.create(true)
		.truncate(true)
		.mode(OUTPUT_FILE_MODE)
		.open(OsStr::from_bytes(path))
		.map_err(|e| file_error(path, e))
}

/// Makes `target` refer to what `fd` refers to, then closes `fd`.
pub fn replace_stream(fd: OwnedFd, target: RawFd) -> Result<(), ShellError> {
	if fd.as_raw_fd() == target {
		// Already in place: keep it, and keep it open across exec.
		let fd = fd.into_raw_fd();
		fcntl::fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty())).map_err(|e| stream_error(target, e))?;
		return Ok(());
	}
	unistd::dup2(fd.as_raw_fd(), target).map_err(|e| stream_error(target, e))?;
	Ok(())
}

/// Rewires the calling process's standard input and output for `stage`.
///
/// Files are applied first, then pipe endpoints, so an assigned pipe end
/// overrides a file on the same stream. Pipe endpoints are consumed.
pub fn apply(stage: &mut Stage) -> Result<(), ShellError> {
	if let Some(ref path) = stage.input_file {
		let file = open_input(path)?;
		replace_stream(file.into(), libc::STDIN_FILENO)?;
	}
	if let Some(ref path) = stage.output_file {
		let file = open_output(path)?;
		replace_stream(file.into(), libc::STDOUT_FILENO)?;
	}
	if let Endpoint::Pipe(fd) = stage.input_endpoint.take() {
		replace_stream(fd, libc::STDIN_FILENO)?;
	}
	if let Endpoint::Pipe(fd) = stage.output_endpoint.take() {
		replace_stream(fd, libc::STDOUT_FILENO)?;
	}
	Ok(())
}
