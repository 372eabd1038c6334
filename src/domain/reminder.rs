//! Due-date reminder selection
//!
//! Pure function over users and tasks; delivery lives in the engine's
//! background module.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::id::{TaskId, UserId};
use super::task::Task;
use super::user::User;

/// A reminder that should be delivered now
#[derive(Debug, Clone, PartialEq)]
pub struct Reminder {
    pub user_id: UserId,
    pub email: String,
    pub task_id: TaskId,
    pub task_name: String,
    pub due: DateTime<Utc>,
    pub days_before: u32,
}

/// Whole days between `now` and `due`, truncated toward zero
pub fn days_until(due: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (due - now).num_days()
}

/// Selects every (user, task) pair whose distance to the due date matches
/// one of the user's enabled `DaysBeforeDue` settings.
///
/// Completed and cancelled tasks never produce reminders.
pub fn select_due_reminders(users: &[User], tasks: &[Task], now: DateTime<Utc>) -> Vec<Reminder> {
    let owners: HashMap<&UserId, &User> = users.iter().map(|u| (&u.id, u)).collect();
    let mut reminders = Vec::new();

    for task in tasks {
        if task.status.is_terminal() {
            continue;
        }
        let Some(due) = task.schedule.due else {
            continue;
        };
        let Some(user) = owners.get(&task.user_id) else {
            continue;
        };

        let remaining = days_until(due, now);
        if remaining < 0 {
            continue;
        }
        for days_before in user.reminder_days() {
            if i64::from(days_before) == remaining {
                reminders.push(Reminder {
                    user_id: user.id.clone(),
                    email: user.email.clone(),
                    task_id: task.id.clone(),
                    task_name: task.name.clone(),
                    due,
                    days_before,
                });
            }
        }
    }
    reminders
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskStatus;
    use crate::domain::user::{NotificationKind, NotificationSetting};
    use chrono::Duration;

    fn user_with_reminder(days: u32) -> User {
        User::new("u1".parse().unwrap(), "u1@example.com", "U").with_setting(NotificationSetting {
            kind: NotificationKind::DaysBeforeDue,
            enabled: true,
            days_before: days,
        })
    }

    fn task_due_in(hours: i64, now: DateTime<Utc>) -> Task {
        let mut task = Task::new("Report", "", "u1".parse().unwrap());
        task.schedule.due = Some(now + Duration::hours(hours));
        task
    }

    #[test]
    fn matches_exact_day_offset() {
        let now = Utc::now();
        let users = vec![user_with_reminder(1)];
        let tasks = vec![task_due_in(30, now), task_due_in(60, now), task_due_in(5, now)];

        let reminders = select_due_reminders(&users, &tasks, now);
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].task_id, tasks[0].id);
        assert_eq!(reminders[0].days_before, 1);
    }

    #[test]
    fn skips_terminal_and_undated_tasks() {
        let now = Utc::now();
        let users = vec![user_with_reminder(0)];
        let mut done = task_due_in(2, now);
        done.status = TaskStatus::Completed;
        let undated = Task::new("No due", "", "u1".parse().unwrap());

        assert!(select_due_reminders(&users, &[done, undated], now).is_empty());
    }

    #[test]
    fn skips_overdue_and_unknown_owner() {
        let now = Utc::now();
        let users = vec![user_with_reminder(0)];
        let overdue = task_due_in(-30, now);
        let mut other = task_due_in(2, now);
        other.user_id = "someone-else".parse().unwrap();

        assert!(select_due_reminders(&users, &[overdue, other], now).is_empty());
    }

    #[test]
    fn disabled_setting_never_fires() {
        let now = Utc::now();
        let users = vec![User::new("u1".parse().unwrap(), "e", "n").with_setting(
            NotificationSetting {
                kind: NotificationKind::DaysBeforeDue,
                enabled: false,
                days_before: 0,
            },
        )];
        assert!(select_due_reminders(&users, &[task_due_in(2, now)], now).is_empty());
    }
}
