//! This module contains the backend that hands queries to an external
//! SMT-LIB 2 solver process, such as `z3 -in -smt2`.

use std::{
    io::{Read, Write},
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use bimap::BiMap;
use ethnum::U256;

use crate::{
    error::solver::{Error, Result},
    expr::{smtlib, Symbol, SymbolicValue},
    solver::{Answer, Backend, Model, UnknownReason},
};

/// How long to sleep between polls of a running solver process.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A backend that runs one external solver process per query, killing it if
/// it exceeds its timeout.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessBackend {
    command: Vec<String>,
}

impl ProcessBackend {
    /// Constructs a new backend that runs `command`, with the program as the
    /// first element and its arguments following.
    #[must_use]
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn run(&self, script: &str, timeout: Duration) -> std::result::Result<Option<String>, String> {
        let (program, args) = self.command.split_first().ok_or("empty solver command")?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("failed to start {program}: {e}"))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(error) = stdin.write_all(script.as_bytes()) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(format!("failed to send the query to {program}: {error}"));
            }
        }

        // Drain the output on its own thread so a chatty solver cannot block
        // on a full pipe while we wait for it.
        let mut stdout = child.stdout.take().ok_or("solver stdout was not captured")?;
        let reader = thread::spawn(move || {
            let mut output = String::new();
            stdout.read_to_string(&mut output).map(|_| output)
        });

        if !wait_with_timeout(&mut child, timeout).map_err(|e| e.to_string())? {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }

        let output = reader
            .join()
            .map_err(|_| "solver output reader panicked".to_string())?
            .map_err(|e| e.to_string())?;
        Ok(Some(output))
    }
}

impl Backend for ProcessBackend {
    fn name(&self) -> &str {
        self.command.first().map_or("external", String::as_str)
    }

    fn check(&self, constraints: &[SymbolicValue], timeout: Duration) -> Answer {
        let query = smtlib::encode(constraints, true);
        match self.run(&query.script, timeout) {
            Ok(Some(output)) => match parse_output(&output, &query.names) {
                Ok(answer) => answer,
                Err(error) => Answer::Unknown(UnknownReason::Unavailable(error.to_string())),
            },
            Ok(None) => Answer::Unknown(UnknownReason::Timeout),
            Err(reason) => Answer::Unknown(UnknownReason::Unavailable(reason)),
        }
    }
}

/// Waits for `child` to exit, returning `false` if `timeout` passes first.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<bool> {
    let start = Instant::now();
    loop {
        if child.try_wait()?.is_some() {
            return Ok(true);
        }
        if start.elapsed() >= timeout {
            return Ok(false);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Parses the output of a `check-sat` followed by a `get-model`, mapping the
/// model's names back to symbols through `names`.
///
/// # Errors
///
/// If the output does not start with a satisfiability verdict, or the model
/// cannot be read.
pub fn parse_output(output: &str, names: &BiMap<String, Symbol>) -> Result<Answer> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    let verdict = lines.next().unwrap_or_default();
    match verdict {
        "unsat" => Ok(Answer::Unsat),
        "unknown" | "timeout" => Ok(Answer::Unknown(UnknownReason::Incomplete)),
        "sat" => {
            let rest = lines.collect::<Vec<_>>().join(" ");
            parse_model(&rest, names).map(Answer::Sat)
        }
        other => Err(Error::MalformedOutput(other.to_string())),
    }
}

/// Splits SMT-LIB text into parentheses and atoms.
fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (index, c) in text.char_indices() {
        match c {
            '(' | ')' => {
                if let Some(s) = start.take() {
                    tokens.push(&text[s..index]);
                }
                tokens.push(&text[index..index + 1]);
            }
            c if c.is_whitespace() => {
                if let Some(s) = start.take() {
                    tokens.push(&text[s..index]);
                }
            }
            _ => {
                if start.is_none() {
                    start = Some(index);
                }
            }
        }
    }
    if let Some(s) = start {
        tokens.push(&text[s..]);
    }
    tokens
}

fn parse_model(text: &str, names: &BiMap<String, Symbol>) -> Result<Model> {
    let tokens = tokenize(text);
    let mut model = Model::new();
    let mut index = 0;
    while index < tokens.len() {
        if tokens[index] != "define-fun" {
            index += 1;
            continue;
        }
        let name = tokens.get(index + 1).copied().unwrap_or_default();
        let body_start = index + 2;

        // Skip the argument list and the sort, which are both parenthesized
        // for bit-vector constants.
        let mut cursor = skip_form(&tokens, body_start)?;
        cursor = skip_form(&tokens, cursor)?;
        let (value, next) = parse_value(&tokens, cursor)?;

        if let Some(symbol) = names.get_by_left(name) {
            model.insert(symbol.clone(), value);
        }
        index = next;
    }
    Ok(model)
}

/// Skips the form that starts at `start`, returning the index just past it.
fn skip_form(tokens: &[&str], start: usize) -> Result<usize> {
    match tokens.get(start) {
        Some(&"(") => {
            let mut depth = 0usize;
            for (offset, token) in tokens[start..].iter().enumerate() {
                match *token {
                    "(" => depth += 1,
                    ")" => {
                        depth -= 1;
                        if depth == 0 {
                            return Ok(start + offset + 1);
                        }
                    }
                    _ => (),
                }
            }
            Err(Error::MalformedOutput("unbalanced parentheses in model".into()))
        }
        Some(_) => Ok(start + 1),
        None => Err(Error::MalformedOutput("truncated model".into())),
    }
}

/// Parses a bit-vector literal starting at `start`.
fn parse_value(tokens: &[&str], start: usize) -> Result<(U256, usize)> {
    let malformed = |token: &str| Error::MalformedOutput(format!("unsupported model value {token:?}"));
    match tokens.get(start).copied() {
        Some(literal) if literal.starts_with("#x") => U256::from_str_radix(&literal[2..], 16)
            .map(|v| (v, start + 1))
            .map_err(|_| malformed(literal)),
        Some(literal) if literal.starts_with("#b") => U256::from_str_radix(&literal[2..], 2)
            .map(|v| (v, start + 1))
            .map_err(|_| malformed(literal)),
        Some("(") => {
            // (_ bvN W)
            let literal = tokens.get(start + 2).copied().unwrap_or_default();
            let digits = literal.strip_prefix("bv").ok_or_else(|| malformed(literal))?;
            let value = U256::from_str_radix(digits, 10).map_err(|_| malformed(literal))?;
            Ok((value, skip_form(tokens, start)?))
        }
        Some(other) => Err(malformed(other)),
        None => Err(Error::MalformedOutput("truncated model".into())),
    }
}
