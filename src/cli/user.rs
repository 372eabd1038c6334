//! User directory and reminder commands

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;

use super::output::Output;
use super::task::Session;
use crate::domain::{NotificationKind, NotificationSetting, User, UserId};
use crate::engine::background::{ReminderSweeper, TracingNotifier};
use crate::storage::{RequestContext, UserRepository};

#[derive(Subcommand)]
pub enum UserCommands {
    /// Add or replace a user
    Add {
        id: String,

        #[arg(long)]
        email: String,

        #[arg(long, default_value = "")]
        name: String,

        /// Notify when a task is assigned
        #[arg(long)]
        on_assign: bool,

        /// Notify when a task is started
        #[arg(long)]
        on_start: bool,

        /// Remind this many days before a due date, repeatable
        #[arg(long = "remind-days", value_name = "DAYS")]
        remind_days: Vec<u32>,
    },

    /// List users
    List,
}

pub fn run(cmd: UserCommands, session: &Session, output: &Output) -> Result<()> {
    let directory = session.workspace().user_directory();

    match cmd {
        UserCommands::Add {
            id,
            email,
            name,
            on_assign,
            on_start,
            remind_days,
        } => {
            let id: UserId = id.parse()?;
            let mut user = User::new(id, email, name);
            if on_assign {
                user = user.with_setting(setting(NotificationKind::OnAssign, 0));
            }
            if on_start {
                user = user.with_setting(setting(NotificationKind::OnStart, 0));
            }
            for days in remind_days {
                user = user.with_setting(setting(NotificationKind::DaysBeforeDue, days));
            }

            directory.upsert(user.clone())?;
            if output.is_json() {
                output.data(&user);
            } else {
                output.success(&format!("Saved user {} <{}>", user.id, user.email));
            }
        }
        UserCommands::List => {
            let users = directory.list_all(&RequestContext::new())?;
            if output.is_json() {
                output.data(&users);
            } else if users.is_empty() {
                println!("No users");
            } else {
                for user in &users {
                    println!("{:<16} {:<28} {}", user.id.as_str(), user.email, user.name);
                }
            }
        }
    }

    Ok(())
}

/// Runs one due-date reminder sweep
pub fn remind(session: &Session, output: &Output) -> Result<()> {
    let Some(users) = session.workspace().user_repository() else {
        output.success("No users configured; nothing to remind");
        return Ok(());
    };

    let config = &session.workspace().config().workspace.background;
    let sweeper = ReminderSweeper::new(
        session.service().engine().repository().clone(),
        Arc::new(users),
        Arc::new(TracingNotifier),
        config.reminder_interval(),
    );
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start reminder runtime")?;
    let delivered = runtime.block_on(sweeper.sweep_once(&RequestContext::background("remind")))?;

    if output.is_json() {
        output.data(&serde_json::json!({ "delivered": delivered }));
    } else {
        output.success(&format!("Sent {} reminder(s)", delivered));
    }
    Ok(())
}

fn setting(kind: NotificationKind, days_before: u32) -> NotificationSetting {
    NotificationSetting {
        kind,
        enabled: true,
        days_before,
    }
}
