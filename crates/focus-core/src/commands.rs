use std::io::{BufRead, Write};

use anyhow::anyhow;
use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::filter::TaskFilter;
use crate::render::Renderer;
use crate::task::{Category, Priority, TaskId};
use crate::view_model::ViewModel;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "email", "password", "mode", "auth", "logout", "title", "category", "priority", "add",
        "toggle", "delete", "filter", "list", "help", "quit",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Email(String),
    Password(String),
    Mode,
    Auth,
    Logout,
    Title(String),
    Category(Category),
    Priority(Priority),
    Add(Option<String>),
    Toggle(usize),
    Delete(usize),
    Filter(TaskFilter),
    List,
    Help,
    Quit,
}

impl Command {
    /// Parses one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> anyhow::Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        let known = known_command_names();
        let name = expand_command_abbrev(head, &known)
            .ok_or_else(|| anyhow!("unknown command: {head} (try `help`)"))?;

        let cmd = match name {
            "email" => Command::Email(rest.to_string()),
            "password" => Command::Password(rest.to_string()),
            "mode" => Command::Mode,
            "auth" => Command::Auth,
            "logout" => Command::Logout,
            "title" => Command::Title(rest.to_string()),
            "category" => Command::Category(rest.parse()?),
            "priority" => Command::Priority(rest.parse()?),
            "add" => Command::Add((!rest.is_empty()).then(|| rest.to_string())),
            "toggle" => Command::Toggle(parse_row(rest)?),
            "delete" => Command::Delete(parse_row(rest)?),
            "filter" => Command::Filter(rest.parse()?),
            "list" => Command::List,
            "help" => Command::Help,
            "quit" => Command::Quit,
            other => return Err(anyhow!("unknown command: {other}")),
        };
        Ok(Some(cmd))
    }
}

fn parse_row(text: &str) -> anyhow::Result<usize> {
    let row: usize = text
        .parse()
        .map_err(|_| anyhow!("expected a task number, got: {text:?}"))?;
    if row == 0 {
        return Err(anyhow!("task numbers start at 1"));
    }
    Ok(row)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Line-oriented front end: read a command, apply it, redraw.
#[instrument(skip_all)]
pub fn repl<R: BufRead, W: Write>(
    vm: &ViewModel,
    renderer: &Renderer,
    mut input: R,
    out: &mut W,
) -> anyhow::Result<()> {
    renderer.print_view(out, &vm.state(), Utc::now())?;
    vm.take_notice();

    loop {
        write!(out, "> ")?;
        out.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            debug!("input closed");
            break;
        }

        let cmd = match Command::parse(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(err) => {
                writeln!(out, "error: {err}")?;
                continue;
            }
        };

        match dispatch(vm, cmd, &mut input, out)? {
            Flow::Quit => break,
            Flow::Continue => {
                renderer.print_view(out, &vm.state(), Utc::now())?;
                vm.take_notice();
            }
        }
    }

    info!("front end closed");
    Ok(())
}

#[instrument(skip_all)]
pub fn dispatch<R: BufRead, W: Write>(
    vm: &ViewModel,
    cmd: Command,
    input: &mut R,
    out: &mut W,
) -> anyhow::Result<Flow> {
    match cmd {
        Command::Email(email) => vm.set_email(email),
        Command::Password(password) => vm.set_password(password),
        Command::Mode => vm.toggle_auth_mode(),
        Command::Auth => vm.handle_auth(),
        Command::Logout => vm.logout(),
        Command::Title(title) => vm.set_new_task_title(title),
        Command::Category(category) => vm.set_new_task_category(category),
        Command::Priority(priority) => vm.set_new_task_priority(priority),
        Command::Add(title) => {
            if let Some(title) = title {
                vm.set_new_task_title(title);
            }
            vm.add_task();
        }
        Command::Toggle(row) => match task_at(vm, row) {
            Some(id) => vm.toggle_task(&id),
            None => writeln!(out, "error: no task #{row} in this view")?,
        },
        Command::Delete(row) => match task_at(vm, row) {
            Some(id) => {
                vm.delete_task(&id, |prompt| ask(prompt, input, out).unwrap_or(false))
            }
            None => writeln!(out, "error: no task #{row} in this view")?,
        },
        Command::Filter(filter) => vm.set_filter(filter),
        Command::List => {}
        Command::Help => print_help(out)?,
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn task_at(vm: &ViewModel, row: usize) -> Option<TaskId> {
    vm.filtered_tasks()
        .into_iter()
        .nth(row.checked_sub(1)?)
        .map(|task| task.id)
}

fn ask<R: BufRead, W: Write>(prompt: &str, input: &mut R, out: &mut W) -> anyhow::Result<bool> {
    write!(out, "{prompt} [y/N] ")?;
    out.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn print_help<W: Write>(out: &mut W) -> anyhow::Result<()> {
    writeln!(
        out,
        "\
email <addr>          set the email field
password <pw>         set the password field
mode                  switch between sign in and sign up
auth                  submit credentials
logout                sign out
title <text>          set the new task title
category <c>          personal | work | study | health
priority <p>          high | medium | low
add [title]           add a task from the entry fields
toggle <n>            flip completion of task n
delete <n>            delete task n
filter <f>            all | pending | completed
list                  redraw
quit                  exit"
    )?;
    Ok(())
}
