use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::Error;

use tokio::io::AsyncWriteExt;
use tracing::info;

/// One MI command line: `<token>-<operation> [options] [-- parameters]`.
#[derive(Debug, Clone, Default)]
pub struct MiCommand {
    pub operation: &'static str,
    pub options: Option<Vec<OsString>>,
    pub parameters: Option<Vec<OsString>>,
}

/// Breakpoint numbers are `major` or `major.minor` for the locations of a
/// multi-location breakpoint.
#[derive(Copy, Clone, Hash, PartialEq, Eq)]
pub struct BreakPointNumber {
    pub major: usize,
    pub minor: Option<usize>,
}

impl std::str::FromStr for BreakPointNumber {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = match s.split_once('.') {
            Some((major, minor)) => (major, Some(minor)),
            None => (s, None),
        };
        let number = |part: &str| {
            part.parse::<usize>()
                .map_err(|e| format!("breakpoint number {:?}: {}", s, e))
        };
        Ok(BreakPointNumber {
            major: number(major)?,
            minor: minor.map(number).transpose()?,
        })
    }
}

impl fmt::Display for BreakPointNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.major)?;
        if let Some(minor) = self.minor {
            write!(f, ".{}", minor)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BreakPointNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Wrap an expression in double quotes, escaping everything MI would
/// otherwise interpret inside the command line.
fn quote_expression(expression: &str) -> String {
    let mut quoted = String::with_capacity(expression.len() + 2);
    quoted.push('"');
    for c in expression.chars() {
        if matches!(c, '\\' | '"' | '\r' | '\n') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

impl MiCommand {
    pub async fn write_interpreter_string<S: AsyncWriteExt + Unpin>(
        &self,
        sink: &mut S,
        token: u64,
    ) -> Result<(), Error> {
        // `--` keeps option-like parameters from being eaten by GDB
        let separator = OsString::from("--");
        let mut words: Vec<&OsStr> = Vec::new();
        if let Some(options) = &self.options {
            words.extend(options.iter().map(OsString::as_os_str));
            if self.parameters.is_some() {
                words.push(separator.as_os_str());
            }
        }
        if let Some(parameters) = &self.parameters {
            words.extend(parameters.iter().map(OsString::as_os_str));
        }

        let mut line = OsString::from(format!("{}-{}", token, self.operation));
        for word in words {
            line.push(" ");
            line.push(word);
        }
        line.push("\n");
        info!(
            "Writing GDB command: {}",
            String::from_utf8_lossy(line.as_encoded_bytes()).trim_end()
        );

        sink.write_all(line.as_encoded_bytes()).await?;
        sink.flush().await?;
        Ok(())
    }

    pub fn symbol_info_functions() -> MiCommand {
        MiCommand {
            operation: "symbol-info-functions",
            ..Default::default()
        }
    }

    pub fn break_insert(location: &str) -> MiCommand {
        MiCommand {
            operation: "break-insert",
            options: Some(vec![location.into()]),
            parameters: None,
        }
    }

    pub fn exec_run() -> MiCommand {
        MiCommand {
            operation: "exec-run",
            ..Default::default()
        }
    }

    pub fn exec_next() -> MiCommand {
        MiCommand {
            operation: "exec-next",
            ..Default::default()
        }
    }

    pub fn exit() -> MiCommand {
        MiCommand {
            operation: "gdb-exit",
            ..Default::default()
        }
    }

    pub fn stack_select_frame(frame_number: u64) -> MiCommand {
        MiCommand {
            operation: "stack-select-frame",
            options: Some(vec![frame_number.to_string().into()]),
            parameters: None,
        }
    }

    pub fn stack_list_frames() -> MiCommand {
        MiCommand {
            operation: "stack-list-frames",
            ..Default::default()
        }
    }

    pub fn stack_list_variables(
        thread_number: Option<usize>,
        frame_number: Option<usize>,
    ) -> MiCommand {
        let mut parameters = vec![];
        if let Some(thread_number) = thread_number {
            parameters.push("--thread".into());
            parameters.push(thread_number.to_string().into());
        }
        if let Some(frame_number) = frame_number {
            parameters.push("--frame".into());
            parameters.push(frame_number.to_string().into());
        }
        parameters.push("--all-values".into());
        MiCommand {
            operation: "stack-list-variables",
            options: None,
            parameters: Some(parameters),
        }
    }

    pub fn data_evaluate_expression(expression: &str) -> MiCommand {
        MiCommand {
            operation: "data-evaluate-expression",
            options: Some(vec![quote_expression(expression).into()]),
            parameters: None,
        }
    }

    /// `-var-create <name> * <expression>`: `*` pins the variable object to
    /// the currently selected frame.
    pub fn var_create(name: impl Into<OsString>, expression: &str) -> MiCommand {
        MiCommand {
            operation: "var-create",
            options: None,
            parameters: Some(vec![
                name.into(),
                "*".into(),
                quote_expression(expression).into(),
            ]),
        }
    }

    pub fn var_info_type(name: impl Into<OsString>) -> MiCommand {
        MiCommand {
            operation: "var-info-type",
            options: None,
            parameters: Some(vec![name.into()]),
        }
    }

    pub fn var_list_children(name: impl Into<OsString>) -> MiCommand {
        MiCommand {
            operation: "var-list-children",
            options: None,
            parameters: Some(vec![name.into()]),
        }
    }

    pub fn var_delete(name: impl Into<OsString>) -> MiCommand {
        MiCommand {
            operation: "var-delete",
            options: None,
            parameters: Some(vec![name.into()]),
        }
    }
}
