use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nom::branch::alt;
use nom::bytes::complete::{is_not, tag};
use nom::character::complete::{char, digit1};
use nom::combinator::{all_consuming, map, map_res, opt, value};
use nom::error::{Error, ErrorKind};
use nom::multi::separated_list0;
use nom::sequence::{delimited, separated_pair};
use nom::{IResult, Parser};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

/// The reply to one submitted command: `[token]^class[,body]`.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub token: Option<u64>,
    pub class: ResultClass,
    pub results: Value,
}

/// Read MI records line-by-line from the debugger's stdout and route them.
///
/// Result records (and parse failures on their bodies) go to `result_pipe`;
/// everything else out-of-band is forwarded to `log_pipe` as
/// `"(<sigil>) <rest>"`. The `(gdb)` terminator is consumed here and never
/// reaches a consumer. Returns on EOF, which closes both queues.
pub async fn process_output<T: AsyncRead + Unpin>(
    output: T,
    result_pipe: mpsc::Sender<AppResult<ResultRecord>>,
    log_pipe: mpsc::UnboundedSender<String>,
    is_running: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(output);

    loop {
        let mut buffer = String::new();
        match reader.read_line(&mut buffer).await {
            Ok(0) => return,
            Ok(_) => {
                let line = buffer.trim_end();
                info!("{}", line);
                if line.is_empty() || line == "(gdb)" {
                    continue;
                }

                match result_prefix(line) {
                    Ok((rest, (token, class))) => {
                        match class {
                            ResultClass::Running => is_running.store(true, Ordering::SeqCst),
                            // gdb sometimes claims to be running, only to
                            // fail the command right after
                            ResultClass::Error => is_running.store(false, Ordering::SeqCst),
                            _ => {}
                        }
                        let body = rest.strip_prefix(',').unwrap_or(rest);
                        let record = match parse_results(body) {
                            Ok(results) => Ok(ResultRecord { token, class, results }),
                            Err(body) => Err(AppError::ParseError(body)),
                        };
                        debug!("{:?}", record);
                        if result_pipe.send(record).await.is_err() {
                            return;
                        }
                    }
                    Err(_) => {
                        // async and stream records may carry a token prefix
                        let bare = line.trim_start_matches(|c: char| c.is_ascii_digit());
                        if bare.starts_with("*stopped") {
                            is_running.store(false, Ordering::SeqCst);
                        }
                        let mut chars = bare.chars();
                        let sigil = chars.next().unwrap_or(' ');
                        // a dropped log consumer must not end the session
                        let _ = log_pipe.send(format!("({}) {}", sigil, chars.as_str()));
                    }
                }
            }
            Err(e) => {
                debug!("MI stream read failed: {}", e);
                return;
            }
        }
    }
}

/// Parse the body of a result or async record, i.e. the comma-separated
/// `name=value` run after the class. An empty body is the empty tuple. On
/// failure the original body is handed back for error reporting.
pub fn parse_results(input: &str) -> Result<Value, String> {
    if input.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    match all_consuming(separated_list0(char(','), key_value)).parse(input) {
        Ok((_, results)) => Ok(Value::Object(results.into_iter().collect())),
        Err(_) => Err(input.to_string()),
    }
}

/// `[token] "^" result-class`, leaving the (possibly empty) `,body` suffix
/// unconsumed. Fails on any line that is not a result record.
fn result_prefix(input: &str) -> IResult<&str, (Option<u64>, ResultClass)> {
    map((opt(token), char('^'), result_class), |(t, _, c)| (t, c)).parse(input)
}

/// One of: done, running, connected, error, exit
fn result_class(input: &str) -> IResult<&str, ResultClass> {
    alt((
        value(ResultClass::Done, tag("done")),
        value(ResultClass::Running, tag("running")),
        value(ResultClass::Connected, tag("connected")),
        value(ResultClass::Error, tag("error")),
        value(ResultClass::Exit, tag("exit")),
    ))
    .parse(input)
}

fn token(input: &str) -> IResult<&str, u64> {
    map_res(digit1, str::parse).parse(input)
}

/// cstring ::= '"' (escape | plain)* '"'
///
/// MI strings are C-style: backslash escapes for control characters,
/// quotes and backslashes. An unknown escape keeps the escaped character,
/// so `\\000` runs come through as literal text for the value heuristics.
fn cstring(input: &str) -> IResult<&str, String> {
    let unterminated = || nom::Err::Error(Error::new(input, ErrorKind::Char));
    let body = input.strip_prefix('"').ok_or_else(unterminated)?;

    let mut text = String::new();
    let mut chars = body.char_indices();
    while let Some((offset, c)) = chars.next() {
        match c {
            '"' => return Ok((&body[offset + 1..], text)),
            '\\' => text.push(match chars.next().ok_or_else(unterminated)?.1 {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                'b' => '\u{08}',
                'f' => '\u{0C}',
                other => other,
            }),
            _ => text.push(c),
        }
    }
    Err(unterminated())
}

/// value ::= cstring | tuple | list, where list entries may be keyed
fn mi_value(input: &str) -> IResult<&str, Value> {
    alt((
        map(cstring, Value::String),
        map(
            delimited(char('{'), separated_list0(char(','), key_value), char('}')),
            |fields| Value::Object(fields.into_iter().collect()),
        ),
        map(
            delimited(char('['), separated_list0(char(','), mi_value), char(']')),
            Value::Array,
        ),
        // list entries may be `name=value` pairs whose names repeat
        // ([frame={…},frame={…}]); only the values carry information
        map(
            delimited(char('['), separated_list0(char(','), key_value), char(']')),
            |entries| Value::Array(entries.into_iter().map(|(_, value)| value).collect()),
        ),
    ))
    .parse(input)
}

// Against its own grammar, gdb sometimes emits multiple comma-separated
// values for a single key; absorb them as a list.
fn value_run(input: &str) -> IResult<&str, Value> {
    map(separated_list0(tag(","), mi_value), |mut values| {
        match values.len() {
            1 => values.remove(0),
            _ => Value::Array(values),
        }
    })
    .parse(input)
}

/// key=value, not a json object
fn key_value(input: &str) -> IResult<&str, (String, Value)> {
    map(
        separated_pair(is_not("=,{}[]"), char('='), value_run),
        |(name, val)| (name.to_string(), val),
    )
    .parse(input)
}
