//! Read-side projection over the loaded active collection: view mode,
//! priority, due-date bucket and free-text search. Nothing here is stored.

use chrono::{Datelike, NaiveDate, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::domain::task::{Priority, Task};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PriorityFilter {
    #[default]
    All,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DueFilter {
    #[default]
    All,
    Overdue,
    Today,
    Tomorrow,
    ThisWeek,
    NoDueDate,
}

pub fn is_due_today(task: &Task, today: NaiveDate) -> bool {
    task.due_date == Some(today)
}

pub fn is_due_tomorrow(task: &Task, today: NaiveDate) -> bool {
    task.due_date.is_some_and(|d| Some(d) == today.succ_opt())
}

/// Past its due date and still open. A task due today is not overdue.
pub fn is_overdue(task: &Task, today: NaiveDate) -> bool {
    !task.completed && task.due_date.is_some_and(|d| d < today)
}

/// Due between today and the end of the current Sunday-based week.
pub fn is_due_this_week(task: &Task, today: NaiveDate) -> bool {
    let end = today + TimeDelta::days(7 - i64::from(today.weekday().num_days_from_sunday()));
    task.due_date.is_some_and(|d| d >= today && d <= end)
}

impl PriorityFilter {
    pub fn matches(&self, task: &Task) -> bool {
        match self {
            PriorityFilter::All => true,
            PriorityFilter::High => task.priority == Priority::High,
            PriorityFilter::Medium => task.priority == Priority::Medium,
            PriorityFilter::Low => task.priority == Priority::Low,
        }
    }
}

impl DueFilter {
    pub fn matches(&self, task: &Task, today: NaiveDate) -> bool {
        match self {
            DueFilter::All => true,
            DueFilter::Overdue => is_overdue(task, today),
            DueFilter::Today => is_due_today(task, today),
            DueFilter::Tomorrow => is_due_tomorrow(task, today),
            DueFilter::ThisWeek => is_due_this_week(task, today),
            DueFilter::NoDueDate => task.due_date.is_none(),
        }
    }
}

impl ViewMode {
    pub fn matches(&self, task: &Task) -> bool {
        match self {
            ViewMode::Active => !task.completed,
            ViewMode::Completed => task.completed,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TaskQuery {
    #[serde(default)]
    pub view: ViewMode,
    #[serde(default)]
    pub priority: PriorityFilter,
    #[serde(default)]
    pub due: DueFilter,
    #[serde(default, rename = "q")]
    pub search: String,
}

impl TaskQuery {
    pub fn matches(&self, task: &Task, today: NaiveDate) -> bool {
        self.view.matches(task)
            && self.priority.matches(task)
            && self.due.matches(task, today)
            && matches_search(task, &self.search)
    }

    /// Tasks passing every predicate, in their original order.
    pub fn apply<'a>(&self, tasks: &'a [Task], today: NaiveDate) -> Vec<&'a Task> {
        tasks.iter().filter(|t| self.matches(t, today)).collect()
    }
}

fn matches_search(task: &Task, query: &str) -> bool {
    let needle = query.to_lowercase();
    task.title.to_lowercase().contains(&needle) || task.description.to_lowercase().contains(&needle)
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct TaskStats {
    pub active: usize,
    pub completed: usize,
    pub due_today: usize,
    pub overdue: usize,
    pub total: usize,
}

impl TaskStats {
    pub fn compute(tasks: &[Task], today: NaiveDate) -> Self {
        tasks.iter().fold(Self { total: tasks.len(), ..Self::default() }, |mut stats, t| {
            if t.completed {
                stats.completed += 1;
            } else {
                stats.active += 1;
                if is_due_today(t, today) { stats.due_today += 1; }
                if is_overdue(t, today) { stats.overdue += 1; }
            }
            stats
        })
    }
}
