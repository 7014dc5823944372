mod types;
mod error;
mod parser;
mod config;
mod global;
mod builtin;
mod job;
mod redirect;
mod eval;

use std::io;
use std::process;
use io::{BufRead, IsTerminal, Write};

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use types::ExitStatus;

fn init_logging(config: &config::Config) {
	let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("warn"));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(io::stderr)
		.init();
}

fn run() -> anyhow::Result<u8> {
	let config = config::Config::from_env();
	init_logging(&config);
	let mut state = global::State::new(config);

	let interactive = io::stdin().is_terminal();
	let mut stdout = io::stdout();
	let stdin = io::stdin();
	let mut stdin_locked = stdin.lock();
	loop {
		if interactive {
			stdout.write_all(&state.config.prompt).context("writing prompt")?;
			stdout.flush().context("writing prompt")?;
		}
		let mut line: Vec<u8> = vec![];
		if stdin_locked.read_until(b'\n', &mut line).context("reading command line")? == 0 {
			return Ok(state.last_status);
		}
		if parser::is_blank(&line) {
			continue;
		}
		let mut pipeline = match parser::parse(&line) {
			Ok(pipeline) => pipeline,
			Err(e) => {
				let _ = writeln!(io::stderr(), "pipesh: {}", e);
				state.last_status = 2;
				continue;
			},
		};
		match eval::eval(&mut state, &mut pipeline)? {
			ExitStatus::Continue(code) => state.last_status = code,
			ExitStatus::Terminate(code) => return Ok(code),
		}
	}
}

fn main() {
	match run() {
		Ok(code) => process::exit(code as i32),
		Err(e) => {
			let _ = writeln!(io::stderr(), "pipesh: {:#}", e);
			process::exit(1);
		},
	}
}
