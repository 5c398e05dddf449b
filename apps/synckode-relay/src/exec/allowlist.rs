//! Raw command admission.
//!
//! Only the first whitespace-delimited token is checked. Commands are spawned
//! without a shell, but an allowed interpreter (`bash -c ...`, `node -e ...`)
//! still runs whatever it is handed; the allowlist is a convenience filter,
//! not a sandbox.

use thiserror::Error;

use super::CommandLine;

pub const ALLOWED_PROGRAMS: &[&str] = &[
    "node", "nodemon", "npm", "npx", "python", "python3", "go", "java", "javac", "gcc", "g++",
    "rustc", "cargo", "php", "ruby", "bash", "sh", "lua", "rscript", "perl", "swift", "echo",
    "dir", "ls", "pwd", "cat", "type", "git", "pip", "pip3", "mvn", "gradle",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandRejected {
    #[error("empty command")]
    Empty,
    #[error("Permission denied: \"{0}\" is not in the allowed list.")]
    NotAllowed(String),
}

impl CommandRejected {
    /// Text streamed to the terminal on rejection.
    pub fn terminal_message(&self) -> String {
        format!(
            "{self}\nAllowed: node, python, go, java, gcc, g++, php, ruby, bash, git, pip, npm, npx…\n"
        )
    }
}

pub fn is_allowed(program: &str) -> bool {
    ALLOWED_PROGRAMS
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(program))
}

/// Split a command line on whitespace and check its program name.
pub fn admit(line: &str) -> Result<CommandLine, CommandRejected> {
    let mut parts = line.split_whitespace();
    let program = parts.next().ok_or(CommandRejected::Empty)?;
    if !is_allowed(program) {
        return Err(CommandRejected::NotAllowed(program.to_string()));
    }
    Ok(CommandLine::new(program, parts))
}
