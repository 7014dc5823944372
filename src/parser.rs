use crate::error::ParseError;
use crate::types::*;

type ParseResult<T> = Result<T, ParseError>;

struct Parser<'a> {
	line: &'a [u8],
	i: usize,
}

impl<'a> Parser<'a> {
	fn proceed_while<F>(&mut self, f: F) where F: Fn(u8) -> bool {
		while let Some(c) = self.line.get(self.i) {
			if !f(*c) { break; }
			self.i += 1;
		}
	}

	fn peek(&self) -> Option<u8> {
		self.line.get(self.i).cloned()
	}

	fn is_whitespace(c: u8) -> bool {
		matches!(c, b' ' | b'\t' | b'\n' | b'\r')
	}

	fn is_letter(c: u8) -> bool {
		match c {
			b'>' | b'<' | b'&' | b'|' | b'\'' | b'"' => false,
			_ => !Parser::is_whitespace(c),
		}
	}

	fn skip_whitespaces(&mut self) {
		self.proceed_while(Parser::is_whitespace);
	}

	/// Reads one word, joining bare and quoted segments that touch.
	fn read_word(&mut self) -> ParseResult<Option<Vec<u8>>> {
		let mut word: Vec<u8> = vec![];
		let mut found = false;
		loop {
			match self.peek() {
				Some(quote) if quote == b'\'' || quote == b'"' => {
					self.i += 1;
					let orig = self.i;
					self.proceed_while(|c| c != quote);
					if self.peek() != Some(quote) {
						return Err(ParseError::UnterminatedQuote(quote as char));
					}
					word.extend_from_slice(&self.line[orig .. self.i]);
					self.i += 1;
				},
				Some(c) if Parser::is_letter(c) => {
					let orig = self.i;
					self.proceed_while(Parser::is_letter);
					word.extend_from_slice(&self.line[orig .. self.i]);
				},
				_ => { break; },
			}
			found = true;
		}
		Ok(if found { Some(word) } else { None })
	}

	fn parse_redirect_target(&mut self, op: u8) -> ParseResult<Vec<u8>> {
		self.i += 1;
		self.skip_whitespaces();
		match self.read_word()? {
			Some(target) => Ok(target),
			None => Err(ParseError::MissingRedirectTarget(op as char)),
		}
	}

	fn parse_stage(&mut self) -> ParseResult<Stage> {
		let mut stage = Stage::default();
		loop {
			self.skip_whitespaces();
			match self.peek() {
				Some(b'<') => stage.input_file = Some(self.parse_redirect_target(b'<')?),
				Some(b'>') => stage.output_file = Some(self.parse_redirect_target(b'>')?),
				_ => match self.read_word()? {
					Some(word) => stage.arguments.push(word),
					None => { break; },
				},
			}
		}
		if stage.arguments.is_empty() {
			return Err(ParseError::EmptyStage);
		}
		Ok(stage)
	}

	fn parse_pipeline(&mut self) -> ParseResult<Pipeline> {
		let mut stages: Vec<Stage> = vec![];
		loop {
			stages.push(self.parse_stage()?);
			match self.peek() {
				Some(b'|') => { self.i += 1; },
				Some(c) => { return Err(ParseError::UnsupportedOperator(c as char)); },
				None => { break; },
			}
		}
		Ok(Pipeline { stages })
	}
}

pub fn is_blank(line: &[u8]) -> bool {
	line.iter().all(|&c| Parser::is_whitespace(c))
}

pub fn parse(line: &[u8]) -> ParseResult<Pipeline> {
	let mut parser = Parser { line, i: 0 };
	parser.parse_pipeline()
}
