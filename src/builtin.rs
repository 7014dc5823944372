use std::env;
use std::ffi::OsStr;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::str;

use crate::global;
use crate::types::ExitStatus;

pub type Handler = fn(&mut global::State, &[Vec<u8>]) -> ExitStatus;

pub fn builtin_cd(_: &mut global::State, args: &[Vec<u8>]) -> ExitStatus {
	let target = match args.get(1) {
		Some(dir) => OsStr::from_bytes(dir).to_os_string(),
		None => match env::var_os("HOME") {
			Some(home) => home,
			None => {
				let _ = writeln!(io::stderr(), "cd: HOME not set");
				return ExitStatus::Continue(1);
			},
		},
	};
	match env::set_current_dir(&target) {
		Ok(()) => ExitStatus::Continue(0),
		Err(e) => {
			let _ = writeln!(io::stderr(), "cd: {}: {}", target.to_string_lossy(), e);
			ExitStatus::Continue(1)
		},
	}
}

pub fn builtin_pwd(_: &mut global::State, _: &[Vec<u8>]) -> ExitStatus {
	let mut stdout = io::stdout();
	let r = env::current_dir().and_then(|dir| {
		stdout.write_all(dir.as_os_str().as_bytes())?;
		stdout.write_all(b"\n")?;
		stdout.flush()
	});
	match r {
		Ok(()) => ExitStatus::Continue(0),
		Err(e) => {
			let _ = writeln!(io::stderr(), "pwd: {}", e);
			ExitStatus::Continue(1)
		},
	}
}

pub fn builtin_echo(_: &mut global::State, args: &[Vec<u8>]) -> ExitStatus {
	let mut line: Vec<u8> = args.get(1..).unwrap_or(&[]).join(&b' ');
	line.push(b'\n');
	let mut stdout = io::stdout();
	match stdout.write_all(&line).and_then(|()| stdout.flush()) {
		Ok(()) => ExitStatus::Continue(0),
		Err(e) => {
			let _ = writeln!(io::stderr(), "echo: {}", e);
			ExitStatus::Continue(1)
		},
	}
}

pub fn builtin_exit(state: &mut global::State, args: &[Vec<u8>]) -> ExitStatus {
	match args.get(1) {
		None => ExitStatus::Terminate(state.last_status),
		Some(arg) => match str::from_utf8(arg).ok().and_then(|s| s.parse::<i64>().ok()) {
			Some(n) => ExitStatus::Terminate(n as u8),
			None => {
				let _ = writeln!(io::stderr(), "exit: {}: numeric argument required", String::from_utf8_lossy(arg));
				ExitStatus::Terminate(2)
			},
		},
	}
}

pub fn match_builtin(name: &[u8]) -> Option<Handler> {
	match name {
		b"cd" => Some(builtin_cd),
		b"pwd" => Some(builtin_pwd),
		b"echo" => Some(builtin_echo),
		b"exit" => Some(builtin_exit),
		_ => None,
	}
}
