/*
 * Locates the real target process when the launched (or adopted) process is
 * only a bootstrap stub. After an unconditional initial wait that lets the
 * stub spawn its children, the process table is polled until an entry
 * matches the tracking criteria or the budget is spent. The first match in
 * enumeration order wins; duplicates are not disambiguated further.
 */
use crate::config::ExternalAppConfiguration;
use crate::error::{EmbedError, Result};
use crate::platform::ProcessApi;
use crate::polling::{CancellationToken, PollTiming, poll_budget};
use crate::process_table::command_line_contains;
use crate::types::ProcessEntry;

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessQuery {
    pub name: Option<String>,
    pub command_line_match: Option<String>,
    pub min_wait_secs: u32,
    pub max_wait_secs: u32,
}

impl ProcessQuery {
    /// The query configured for `config`, or `None` when no tracking criteria are set.
    pub fn from_config(config: &ExternalAppConfiguration) -> Option<Self> {
        let name = config.tracked_process_name().map(str::to_string);
        let command_line_match = config.tracked_command_line().map(str::to_string);
        if name.is_none() && command_line_match.is_none() {
            return None;
        }
        Some(Self {
            name,
            command_line_match,
            min_wait_secs: config.min_wait_secs,
            max_wait_secs: config.max_wait_secs,
        })
    }

    /*
     * Entries without a readable command line are never accepted. Without a
     * command-line fragment the first remaining candidate matches.
     */
    pub fn matches(&self, entry: &ProcessEntry) -> bool {
        if entry.command_line.trim().is_empty() {
            return false;
        }
        match &self.command_line_match {
            Some(fragment) => command_line_contains(&entry.command_line, fragment),
            None => true,
        }
    }
}

pub fn find_process(
    processes: &dyn ProcessApi,
    query: &ProcessQuery,
    timing: &PollTiming,
    cancel: &CancellationToken,
) -> Result<ProcessEntry> {
    log::debug!(
        "ProcessFinder: looking for name {:?}, command line fragment {:?}.",
        query.name,
        query.command_line_match
    );
    cancel.sleep(Duration::from_secs(query.min_wait_secs as u64))?;

    let budget = poll_budget(query.max_wait_secs);
    let mut inspected = 0usize;
    for attempt in 1..=budget {
        cancel.check()?;

        let entries = processes.query_processes(query.name.as_deref())?;
        inspected += entries.len();
        if let Some(entry) = entries.into_iter().find(|entry| query.matches(entry)) {
            log::debug!(
                "ProcessFinder: matched process {} ({}) on attempt {attempt}: {}",
                entry.process_id,
                entry.name,
                entry.command_line
            );
            return Ok(entry);
        }

        if attempt < budget {
            cancel.sleep(timing.poll_interval)?;
        }
    }

    log::debug!(
        "ProcessFinder: no match after {budget} attempts ({inspected} entries inspected)."
    );
    Err(EmbedError::ProcessNotFound(format!(
        "no process matched name {:?} and command line {:?} within {} seconds",
        query.name, query.command_line_match, query.max_wait_secs
    )))
}
