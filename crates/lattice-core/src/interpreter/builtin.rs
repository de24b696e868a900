//! Interpreters shipped with every interpreter process.
//!
//! - `echo` returns its script, honouring a leading display directive.
//! - `pool` reads and writes the resource pool, one command per line.
//! - `angular` manipulates note-scoped angular objects and runs paragraphs.

use serde_json::Value;

use super::{
    Interpreter, InterpreterContext, InterpreterFactory, InterpreterResult, Properties,
    SchedulerKind,
};
use crate::error::{Error, Result};
use crate::resource::{LOCATION_ANY, NAME_ANY};
use crate::runtime::outbox::parse_angular_value;

/// Register every built-in interpreter.
pub fn register(factory: &mut InterpreterFactory) {
    factory
        .register("echo", |properties| {
            Ok(Box::new(EchoInterpreter::from_properties(properties)?) as Box<dyn Interpreter>)
        })
        .register("pool", |_| Ok(Box::new(ResourcePoolInterpreter) as Box<dyn Interpreter>))
        .register("angular", |_| Ok(Box::new(AngularInterpreter) as Box<dyn Interpreter>));
}

/// Returns the script as its result.
#[derive(Debug, Default)]
pub struct EchoInterpreter {
    parallelism: Option<usize>,
}

impl EchoInterpreter {
    /// `parallelism = N` runs up to N paragraphs at once.
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        let parallelism = match properties.get("parallelism") {
            Some(value) => Some(value.parse::<usize>().map_err(|e| {
                Error::Interpreter(format!("invalid parallelism '{}': {}", value, e))
            })?),
            None => None,
        };
        Ok(Self { parallelism })
    }
}

impl Interpreter for EchoInterpreter {
    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn interpret(&self, script: &str, _context: &InterpreterContext) -> Result<InterpreterResult> {
        Ok(InterpreterResult::success(script))
    }

    fn scheduler_kind(&self) -> SchedulerKind {
        match self.parallelism {
            Some(n) if n > 1 => SchedulerKind::Parallel(n),
            _ => SchedulerKind::Fifo,
        }
    }
}

/// Split a command line into its verb and up to two arguments.
fn command(line: &str) -> (&str, Option<&str>, Option<&str>) {
    let mut parts = line.trim().splitn(3, char::is_whitespace);
    let verb = parts.next().unwrap_or_default();
    let first = parts.next().map(str::trim).filter(|s| !s.is_empty());
    let rest = parts.next().map(str::trim).filter(|s| !s.is_empty());
    (verb, first, rest)
}

fn missing(verb: &str, what: &str) -> Error {
    Error::Interpreter(format!("{}: missing {}", verb, what))
}

/// Run each non-empty line through `run`, collecting the outputs.
fn run_lines(
    script: &str,
    mut run: impl FnMut(&str, Option<&str>, Option<&str>) -> Result<String>,
) -> InterpreterResult {
    let mut output = Vec::new();
    for line in script.lines().filter(|line| !line.trim().is_empty()) {
        let (verb, first, rest) = command(line);
        match run(verb, first, rest) {
            Ok(text) => output.push(text),
            Err(e) => {
                output.push(e.to_string());
                return InterpreterResult::error(output.join("\n"));
            }
        }
    }
    InterpreterResult::success(output.join("\n"))
}

/// Commands against the process's resource pool:
///
/// ```text
/// put <name> <json>
/// get <name> [<location>]
/// search [<pattern>] [<location>]
/// remove <name>
/// ```
///
/// `get` and `search` reach other processes unless a location is given.
#[derive(Debug, Default)]
pub struct ResourcePoolInterpreter;

impl Interpreter for ResourcePoolInterpreter {
    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn interpret(&self, script: &str, context: &InterpreterContext) -> Result<InterpreterResult> {
        let pool = context
            .resource_pool()
            .ok_or_else(|| Error::Interpreter("no resource pool in context".to_string()))?;

        Ok(run_lines(script, |verb, first, rest| match verb {
            "put" => {
                let name = first.ok_or_else(|| missing(verb, "name"))?;
                let value = parse_angular_value(rest.ok_or_else(|| missing(verb, "value"))?);
                pool.put(name, value);
                Ok(format!("put {}", name))
            }
            "get" => {
                let name = first.ok_or_else(|| missing(verb, "name"))?;
                let location = rest.unwrap_or(LOCATION_ANY);
                match pool.get_in(location, name) {
                    Some(value) => match value.as_json() {
                        Some(json) => Ok(json.to_string()),
                        None => Err(Error::Interpreter(format!("{} is not serializable", name))),
                    },
                    None => Err(Error::Interpreter(format!("{} not found", name))),
                }
            }
            "search" => {
                let pattern = first.unwrap_or(NAME_ANY);
                let location = rest.unwrap_or(LOCATION_ANY);
                let mut infos = pool.search_in(location, pattern);
                infos.sort_by(|a, b| (&a.name, &a.location).cmp(&(&b.name, &b.location)));
                Ok(serde_json::to_string(&infos)?)
            }
            "remove" => {
                let name = first.ok_or_else(|| missing(verb, "name"))?;
                match pool.remove(name) {
                    Some(_) => Ok(format!("removed {}", name)),
                    None => Err(Error::Interpreter(format!("{} not found", name))),
                }
            }
            other => Err(Error::Interpreter(format!("unknown command: {}", other))),
        }))
    }
}

/// Commands against the note's angular objects:
///
/// ```text
/// add <name> <json>
/// update <name> <json>
/// remove <name>
/// get <name>
/// run <paragraph id>
/// ```
#[derive(Debug, Default)]
pub struct AngularInterpreter;

impl Interpreter for AngularInterpreter {
    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn interpret(&self, script: &str, context: &InterpreterContext) -> Result<InterpreterResult> {
        let registry = context
            .angular_registry()
            .ok_or_else(|| Error::Interpreter("no angular registry in context".to_string()))?;
        let note_id = Some(context.note_id());

        Ok(run_lines(script, |verb, first, rest| {
            let value = |rest: Option<&str>| -> Result<Value> {
                Ok(parse_angular_value(rest.ok_or_else(|| missing(verb, "value"))?))
            };
            match verb {
                "add" => {
                    let name = first.ok_or_else(|| missing(verb, "name"))?;
                    registry.add(name, value(rest)?, note_id, None, true);
                    Ok(format!("added {}", name))
                }
                "update" => {
                    let name = first.ok_or_else(|| missing(verb, "name"))?;
                    registry
                        .update(name, note_id, None, value(rest)?, true)
                        .ok_or_else(|| Error::Interpreter(format!("{} not found", name)))?;
                    Ok(format!("updated {}", name))
                }
                "remove" => {
                    let name = first.ok_or_else(|| missing(verb, "name"))?;
                    registry
                        .remove(name, note_id, None, true)
                        .ok_or_else(|| Error::Interpreter(format!("{} not found", name)))?;
                    Ok(format!("removed {}", name))
                }
                "get" => {
                    let name = first.ok_or_else(|| missing(verb, "name"))?;
                    registry
                        .get(name, note_id, None)
                        .map(|object| object.value.to_string())
                        .ok_or_else(|| Error::Interpreter(format!("{} not found", name)))
                }
                "run" => {
                    let paragraph_id = first.ok_or_else(|| missing(verb, "paragraph id"))?;
                    let runner = context.runner(paragraph_id).ok_or_else(|| {
                        Error::Interpreter(format!("no runner for paragraph {}", paragraph_id))
                    })?;
                    runner.run();
                    Ok(format!("run {}", paragraph_id))
                }
                other => Err(Error::Interpreter(format!("unknown command: {}", other))),
            }
        }))
    }
}
