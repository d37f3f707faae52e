use std::io::{IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Local, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::filter::TaskFilter;
use crate::task::{Priority, Task};
use crate::view_model::{SessionState, ViewState};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => std::io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all)]
    pub fn print_view<W: Write>(
        &self,
        out: &mut W,
        state: &ViewState,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        match &state.session {
            SessionState::Loading => writeln!(out, "Loading...")?,
            SessionState::Unauthenticated => self.print_auth_form(out, state)?,
            SessionState::Authenticated(principal) => {
                let who = if principal.email.is_empty() {
                    principal.uid.to_string()
                } else {
                    principal.email.clone()
                };
                writeln!(
                    out,
                    "{}  {}",
                    self.paint(&who, "1"),
                    now.with_timezone(&Local).format("%A, %B %-d")
                )?;
                self.print_filter_bar(out, state)?;
                self.print_task_table(out, &state.filtered_tasks())?;
                writeln!(
                    out,
                    "next: [{}] [{}] {}",
                    state.new_task_category,
                    state.new_task_priority,
                    state.new_task_title
                )?;
            }
        }

        if let Some(notice) = &state.notice {
            writeln!(out, "{}", self.paint(&format!("! {notice}"), "33"))?;
        }
        Ok(())
    }

    fn print_auth_form<W: Write>(&self, out: &mut W, state: &ViewState) -> anyhow::Result<()> {
        let mode = if state.is_sign_up {
            "Create account"
        } else {
            "Sign in"
        };
        writeln!(out, "{}", self.paint(mode, "1"))?;
        writeln!(out, "email     {}", state.email)?;
        writeln!(out, "password  {}", "*".repeat(state.password.chars().count()))?;
        if let Some(err) = &state.auth_error {
            writeln!(out, "{}", self.paint(err, "31"))?;
        }
        let alt = if state.is_sign_up {
            "have an account? `mode` to sign in"
        } else {
            "no account? `mode` to sign up"
        };
        writeln!(out, "{alt}")?;
        Ok(())
    }

    fn print_filter_bar<W: Write>(&self, out: &mut W, state: &ViewState) -> anyhow::Result<()> {
        let parts: Vec<String> = TaskFilter::ALL
            .into_iter()
            .map(|filter| {
                let label = format!("{} ({})", filter, state.count(filter));
                if filter == state.active_filter {
                    self.paint(&format!("[{label}]"), "36")
                } else {
                    format!(" {label} ")
                }
            })
            .collect();
        writeln!(out, "{}", parts.join(" "))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, out, tasks))]
    pub fn print_task_table<W: Write>(&self, out: &mut W, tasks: &[Task]) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = vec![
            "#".to_string(),
            "Done".to_string(),
            "Priority".to_string(),
            "Category".to_string(),
            "Created".to_string(),
            "Title".to_string(),
        ];

        let mut rows = Vec::with_capacity(tasks.len());
        for (idx, task) in tasks.iter().enumerate() {
            let done = if task.completed { "x" } else { " " };
            let priority = match task.priority {
                Priority::High => self.paint(task.priority.as_str(), "31"),
                Priority::Medium => self.paint(task.priority.as_str(), "33"),
                Priority::Low => task.priority.to_string(),
            };
            let created = task
                .created_at
                .map(|ts| ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            let title = if task.completed {
                self.paint(&task.title, "2")
            } else {
                task.title.clone()
            };

            rows.push(vec![
                self.paint(&(idx + 1).to_string(), "33"),
                format!("[{done}]"),
                priority,
                task.category.to_string(),
                created,
                title,
            ]);
        }

        write_table(out, headers, rows)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    writer: &mut W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
