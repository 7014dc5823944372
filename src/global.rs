use crate::config::Config;

pub struct State {
	pub config: Config,
	pub last_status: u8,
}

impl State {
	pub fn new(config: Config) -> State {
		State { config, last_status: 0 }
	}
}
