//! Plain-text table rendering for `status`/`list`/`dlq list`/`config list`
//! output. Deliberately minimal: no table-drawing crate, just padded
//! columns, matching the thin-CLI-surface framing of the core.

use queue_core::{Job, StateCounts, WorkerRegistration};

pub fn jobs_table(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "(no jobs)".to_string();
    }
    let mut out = String::new();
    out.push_str("ID                                   STATE       ATTEMPTS  COMMAND\n");
    for job in jobs {
        out.push_str(&format!(
            "{:<37} {:<11} {:<9} {}\n",
            job.id, job.state, job.attempts, job.command
        ));
    }
    out.pop();
    out
}

pub fn status_summary(counts: &StateCounts, workers: &[WorkerRegistration]) -> String {
    let mut out = format!(
        "pending={} processing={} failed={} completed={} dead={}\n",
        counts.pending, counts.processing, counts.failed, counts.completed, counts.dead
    );
    if workers.is_empty() {
        out.push_str("workers: (none)");
    } else {
        let pids: Vec<String> = workers.iter().map(|w| w.pid.to_string()).collect();
        out.push_str(&format!("workers: {}", pids.join(", ")));
    }
    out
}

pub fn config_table(entries: &[(String, String)]) -> String {
    if entries.is_empty() {
        return "(no config set, defaults apply)".to_string();
    }
    let mut out = String::new();
    for (key, value) in entries {
        out.push_str(&format!("{key}={value}\n"));
    }
    out.pop();
    out
}
