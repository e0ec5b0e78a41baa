//! Deferred one-shot commands
//!
//! `schedule TIME COMMAND` stores a command that the housekeeping tick later
//! feeds back through the dispatcher as if it had just arrived.

use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub id: u32,
    pub execution_time: i64,
    pub sender: String,
    pub command: String,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    next_id: u32,
}

impl Scheduler {
    pub fn schedule(&mut self, at: i64, sender: &str, command: &str) -> u32 {
        self.next_id += 1;
        let id = self.next_id;
        self.tasks.push(ScheduledTask {
            id,
            execution_time: at,
            sender: sender.to_string(),
            command: command.to_string(),
        });
        id
    }

    pub fn cancel(&mut self, id: u32) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|task| task.id != id);
        before != self.tasks.len()
    }

    pub fn list(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    /// `id|time|sender|command` lines, command newlines escaped
    pub fn listing(&self) -> String {
        self.tasks.iter().fold(String::new(), |mut out, task| {
            let _ = writeln!(
                out,
                "{}|{}|{}|{}",
                task.id,
                task.execution_time,
                task.sender,
                crate::util::nlencode(&task.command)
            );
            out
        })
    }

    /// Remove and return every task due at `now`
    pub fn take_due(&mut self, now: i64) -> Vec<ScheduledTask> {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|task| task.execution_time <= now);
        self.tasks = pending;
        due
    }

    /// Re-insert a task restored from a checkpoint
    pub fn restore(&mut self, task: ScheduledTask) {
        self.next_id = self.next_id.max(task.id);
        self.tasks.push(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
