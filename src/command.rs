//! Command construction
//!
//! Turns a runtime's command template into the argument vector handed to the
//! container. Templates are a closed set of tokens, so expansion is total and
//! user content can never be reinterpreted as command syntax:
//! - Interpreted languages always produce a direct argv (no shell at all)
//! - Compiled languages chain `compile && run` through `/bin/sh -c`, with
//!   every argv element single-quoted on its own before joining

use serde::Deserialize;

/// Mount point of the staging directory inside the container
pub const CODE_DIR: &str = "/code";

/// Shell used to chain the compile and run stages
pub const SHELL: &str = "/bin/sh";

/// A single element of a command template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandToken {
    /// Absolute in-container path of the entry file
    File,
    /// User-supplied arguments, one element each
    Args,
    /// Entry class name (class-based languages only)
    ClassName,
    /// Passed through unchanged
    Literal(String),
}

impl CommandToken {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "{file}" => CommandToken::File,
            "{args}" => CommandToken::Args,
            "{classname}" => CommandToken::ClassName,
            other => CommandToken::Literal(other.to_string()),
        }
    }
}

/// Ordered list of tokens, deserialized from a list of strings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<String>")]
pub struct CommandTemplate(Vec<CommandToken>);

impl From<Vec<String>> for CommandTemplate {
    fn from(raw: Vec<String>) -> Self {
        Self(raw.iter().map(|s| CommandToken::parse(s)).collect())
    }
}

impl CommandTemplate {
    pub fn tokens(&self) -> &[CommandToken] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn has_args_slot(&self) -> bool {
        self.0.contains(&CommandToken::Args)
    }
}

/// What the container is asked to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Executed as-is, no shell involved
    Direct(Vec<String>),
    /// A pre-escaped command line run by `/bin/sh -c`
    Shell(String),
}

impl Invocation {
    /// Argument vector for the container's `Cmd`
    pub fn to_argv(&self) -> Vec<String> {
        match self {
            Invocation::Direct(argv) => argv.clone(),
            Invocation::Shell(line) => vec![SHELL.to_string(), "-c".to_string(), line.clone()],
        }
    }

    pub fn is_shell(&self) -> bool {
        matches!(self, Invocation::Shell(_))
    }
}

/// Expand a template against the entry file and user arguments.
///
/// `{args}` splices the arguments in place; templates without it get the
/// arguments appended. `{classname}` is dropped when no entry symbol is given.
pub fn build(
    template: &CommandTemplate,
    entry_file: &str,
    args: &[String],
    entry_symbol: Option<&str>,
) -> Vec<String> {
    let mut argv = Vec::with_capacity(template.tokens().len() + args.len());

    for token in template.tokens() {
        match token {
            CommandToken::File => argv.push(format!("{}/{}", CODE_DIR, entry_file)),
            CommandToken::Args => argv.extend(args.iter().cloned()),
            CommandToken::ClassName => {
                if let Some(symbol) = entry_symbol.filter(|s| !s.is_empty()) {
                    argv.push(symbol.to_string());
                }
            }
            CommandToken::Literal(value) => argv.push(value.clone()),
        }
    }

    if !template.has_args_slot() {
        argv.extend(args.iter().cloned());
    }

    argv
}

/// Fuse already-built compile and run vectors into one shell line.
///
/// The run stage only executes when compilation exits 0.
pub fn shell_chain(compile_argv: &[String], run_argv: &[String]) -> Invocation {
    Invocation::Shell(format!(
        "{} && {}",
        shell_join(compile_argv),
        shell_join(run_argv)
    ))
}

/// POSIX single-quote escaping; the result is always one shell word
pub fn shell_escape(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", arg.replace('\'', "'\\''"))
}

fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|a| shell_escape(a))
        .collect::<Vec<_>>()
        .join(" ")
}
