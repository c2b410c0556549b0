/*
 * Snapshot of the OS process table with command lines, backed by `sysinfo`.
 * Used by the process finder through `ProcessApi::query_processes`.
 */
use crate::types::{ProcessEntry, ProcessId};

use sysinfo::System;

/*
 * Compares a process name against the configured name to track. The match is
 * case-insensitive and accepts the configured name with or without the
 * `.exe` suffix, so `cmd`, `CMD.EXE` and `cmd.exe` all select `cmd.exe`.
 */
pub fn name_matches(process_name: &str, wanted: &str) -> bool {
    fn stem(name: &str) -> String {
        let lower = name.trim().to_ascii_lowercase();
        match lower.strip_suffix(".exe") {
            Some(stem) => stem.to_string(),
            None => lower,
        }
    }
    !wanted.trim().is_empty() && stem(process_name) == stem(wanted)
}

/// Case-insensitive substring test used for command-line matching.
pub fn command_line_contains(command_line: &str, fragment: &str) -> bool {
    command_line
        .to_lowercase()
        .contains(&fragment.to_lowercase())
}

/// Reads the current process table, ordered by process id.
pub fn query_process_table(name: Option<&str>) -> Vec<ProcessEntry> {
    let mut system = System::new();
    system.refresh_processes();

    let mut entries: Vec<ProcessEntry> = system
        .processes()
        .iter()
        .filter(|(_, process)| name.is_none_or(|wanted| name_matches(process.name(), wanted)))
        .map(|(pid, process)| ProcessEntry {
            process_id: ProcessId(pid.as_u32()),
            name: process.name().to_string(),
            command_line: process.cmd().join(" "),
        })
        .collect();
    entries.sort_by_key(|entry| entry.process_id);

    log::trace!(
        "ProcessTable: {} processes matched name filter {name:?}.",
        entries.len()
    );
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_matching_ignores_case_and_exe_suffix() {
        assert!(name_matches("cmd.exe", "cmd"));
        assert!(name_matches("CMD.EXE", "cmd.exe"));
        assert!(name_matches("cmd", "Cmd.Exe"));
        assert!(!name_matches("cmdhelper.exe", "cmd"));
        assert!(!name_matches("cmd.exe", ""));
    }

    #[test]
    fn command_line_match_is_case_insensitive() {
        assert!(command_line_contains(
            r#""C:\Tools\App.exe" --Profile Work"#,
            "--profile work"
        ));
        assert!(!command_line_contains("app.exe --other", "--profile"));
    }

    #[test]
    fn process_table_contains_the_current_process() {
        let own = ProcessId(std::process::id());
        let entries = query_process_table(None);
        assert!(entries.iter().any(|entry| entry.process_id == own));
        assert!(
            entries
                .windows(2)
                .all(|pair| pair[0].process_id <= pair[1].process_id)
        );
    }
}
