//! Scriptable [`CommandRunner`] for unit tests

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use super::{CommandOutput, CommandRunner};

#[derive(Debug, Clone)]
enum Outcome {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    Missing,
}

#[derive(Debug, Clone)]
struct Rule {
    program: String,
    arg: Option<String>,
    outcome: Outcome,
}

/// Records every invocation and answers with scripted outcomes.
///
/// Unscripted commands exit 0 with empty output. Later rules win.
#[derive(Default)]
pub(crate) struct FakeRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    rules: Mutex<Vec<Rule>>,
    touches: Mutex<Vec<(String, PathBuf)>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_rule(&self, program: &str, arg: Option<&str>, outcome: Outcome) {
        self.rules.lock().unwrap().push(Rule {
            program: program.to_string(),
            arg: arg.map(str::to_string),
            outcome,
        });
    }

    pub fn fail_with(&self, program: &str, code: i32, stderr: &str) {
        self.push_rule(
            program,
            None,
            Outcome::Exit {
                code,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        );
    }

    /// `program` exits with `code` only when `arg` is one of its arguments.
    pub fn fail_when(&self, program: &str, arg: &str, code: i32) {
        self.push_rule(
            program,
            Some(arg),
            Outcome::Exit {
                code,
                stdout: String::new(),
                stderr: String::new(),
            },
        );
    }

    pub fn respond(&self, program: &str, code: i32, stdout: &str, stderr: &str) {
        self.push_rule(
            program,
            None,
            Outcome::Exit {
                code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        );
    }

    pub fn missing(&self, program: &str) {
        self.push_rule(program, None, Outcome::Missing);
    }

    pub fn clear_rules(&self) {
        self.rules.lock().unwrap().clear();
    }

    /// Bump the mtime of `path` whenever a call carries `arg`.
    pub fn touch_on(&self, arg: &str, path: &Path) {
        self.touches
            .lock()
            .unwrap()
            .push((arg.to_string(), path.to_path_buf()));
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, program: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|(p, _)| p == program)
            .map(|(_, args)| args)
            .collect()
    }

    pub fn count_with_arg(&self, arg: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(_, args)| args.iter().any(|a| a == arg))
            .count()
    }
}

fn bump_mtime(path: &Path) -> std::io::Result<()> {
    let next = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|t| t + Duration::from_secs(1))
        .unwrap_or_else(|_| SystemTime::now());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.set_modified(next)
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));

        let outcome = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| {
                r.program == program
                    && r.arg
                        .as_ref()
                        .map_or(true, |a| args.iter().any(|x| x == a))
            })
            .map(|r| r.outcome.clone());

        match outcome {
            Some(Outcome::Missing) => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No such file or directory (os error 2)",
            )),
            Some(Outcome::Exit {
                code,
                stdout,
                stderr,
            }) => {
                if code == 0 {
                    self.apply_touches(args)?;
                }
                Ok(CommandOutput {
                    code: Some(code),
                    stdout,
                    stderr,
                })
            }
            None => {
                self.apply_touches(args)?;
                Ok(CommandOutput {
                    code: Some(0),
                    ..CommandOutput::default()
                })
            }
        }
    }
}

impl FakeRunner {
    fn apply_touches(&self, args: &[String]) -> std::io::Result<()> {
        let touches = self.touches.lock().unwrap().clone();
        for (arg, path) in touches {
            if args.iter().any(|a| *a == arg) {
                bump_mtime(&path)?;
            }
        }
        Ok(())
    }
}
