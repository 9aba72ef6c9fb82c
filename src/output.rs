//! Human-readable output: aligned tables, ambiguity and conflict reports.

use crate::model::{Branch, Snapshot, Volume, VolumeSet};
use crate::resolve::Candidates;
use crate::sync::{Conflict, ConflictSet};
use colored::Colorize;

const NONE: &str = "-";

/// Plain-text table with a bold header row and width-aligned columns.
pub struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(header: &[&str]) -> Self {
        Self {
            header: header.iter().map(|s| s.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.header.iter().map(String::len).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.len());
                }
            }
        }

        let mut out = String::new();
        for (i, h) in self.header.iter().enumerate() {
            // Pad the plain text first; escape codes must not count toward
            // the column width.
            let padded = format!("{:<width$}", h, width = widths[i]);
            out.push_str(&format!("{}  ", padded.bold()));
        }
        out.push('\n');
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                out.push_str(&format!("{:<width$}  ", cell, width = widths[i]));
            }
            out.push('\n');
        }
        out
    }
}

fn opt(s: &Option<String>) -> String {
    s.clone().unwrap_or_else(|| NONE.to_string())
}

fn short_id(id: &str) -> String {
    if id.len() > 12 {
        id[..12].to_string()
    } else {
        id.to_string()
    }
}

fn created(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

pub fn volume_set_table(sets: &[VolumeSet]) -> Table {
    let mut t = Table::new(&["ID", "NAME", "CREATED", "DESCRIPTION"]);
    for vs in sets {
        t.row(vec![
            vs.id.to_string(),
            vs.qualified_name(),
            created(&vs.created_at),
            vs.description.clone(),
        ]);
    }
    t
}

pub fn volume_table(volumes: &[Volume]) -> Table {
    let mut t = Table::new(&["ID", "NAME", "VOLUMESET", "BASE", "MOUNT"]);
    for v in volumes {
        t.row(vec![
            v.id.to_string(),
            opt(&v.name),
            short_id(v.volume_set.as_str()),
            v.base
                .as_ref()
                .map(|s| short_id(s.as_str()))
                .unwrap_or_else(|| NONE.to_string()),
            v.mount_path.display().to_string(),
        ]);
    }
    t
}

pub fn snapshot_table(snapshots: &[Snapshot]) -> Table {
    let mut t = Table::new(&["ID", "NAME", "VOLUMESET", "PARENT", "CREATED", "CONTENT"]);
    for s in snapshots {
        t.row(vec![
            s.id.to_string(),
            opt(&s.name),
            short_id(s.volume_set.as_str()),
            s.parent
                .as_ref()
                .map(|p| short_id(p.as_str()))
                .unwrap_or_else(|| NONE.to_string()),
            created(&s.created_at),
            if s.content.is_some() { "yes".into() } else { "no".into() },
        ]);
    }
    t
}

pub fn branch_table(branches: &[Branch]) -> Table {
    let mut t = Table::new(&["VOLUMESET", "NAME", "TIP", "MODE"]);
    for b in branches {
        t.row(vec![
            short_id(b.volume_set.as_str()),
            b.name.clone(),
            short_id(b.tip.as_str()),
            b.mode.to_string(),
        ]);
    }
    t
}

/// Render an ambiguity report: one table per kind that matched, so the user
/// can see every candidate and retry with a unique token.
pub fn render_ambiguity(token: &str, candidates: &Candidates) -> String {
    let mut out = format!(
        "{} '{}' matches {} objects:\n\n",
        "ambiguous:".yellow().bold(),
        token,
        candidates.total()
    );
    if !candidates.volume_sets.is_empty() {
        out.push_str(&format!("{}\n", "volumesets".underline()));
        out.push_str(&volume_set_table(&candidates.volume_sets).render());
        out.push('\n');
    }
    if !candidates.volumes.is_empty() {
        out.push_str(&format!("{}\n", "volumes".underline()));
        out.push_str(&volume_table(&candidates.volumes).render());
        out.push('\n');
    }
    if !candidates.snapshots.is_empty() {
        out.push_str(&format!("{}\n", "snapshots".underline()));
        out.push_str(&snapshot_table(&candidates.snapshots).render());
        out.push('\n');
    }
    if !candidates.branches.is_empty() {
        out.push_str(&format!("{}\n", "branches".underline()));
        out.push_str(&branch_table(&candidates.branches).render());
        out.push('\n');
    }
    out
}

fn conflict_rows<T>(
    table: &mut Table,
    conflicts: &[Conflict<T>],
    describe: impl Fn(&T) -> String,
) {
    for c in conflicts {
        let cell = |side: &Option<T>| side.as_ref().map(&describe).unwrap_or_else(|| NONE.to_string());
        table.row(vec![cell(&c.init), cell(&c.cur), cell(&c.tgt)]);
    }
}

/// Render divergence conflicts with their baseline (Init), displaced local
/// (Cur) and adopted remote (Tgt) values, so no local state is silently
/// lost even though the remote value won.
pub fn render_conflicts(conflicts: &ConflictSet) -> String {
    if !conflicts.has_conflicts() {
        return String::new();
    }
    let mut out = format!(
        "{} {} divergence(s); remote values adopted, displaced local values shown under Cur:\n\n",
        "conflicts:".red().bold(),
        conflicts.total()
    );

    if !conflicts.volume_sets.is_empty() {
        out.push_str(&format!("{}\n", "volumesets".underline()));
        let mut t = Table::new(&["INIT", "CUR", "TGT"]);
        conflict_rows(&mut t, &conflicts.volume_sets, |vs: &VolumeSet| {
            vs.qualified_name()
        });
        out.push_str(&t.render());
        out.push('\n');
    }
    if !conflicts.snapshots.is_empty() {
        out.push_str(&format!("{}\n", "snapshots".underline()));
        let mut t = Table::new(&["INIT", "CUR", "TGT"]);
        conflict_rows(&mut t, &conflicts.snapshots, |s: &Snapshot| {
            format!("{} ({})", short_id(s.id.as_str()), opt(&s.name))
        });
        out.push_str(&t.render());
        out.push('\n');
    }
    if !conflicts.branches.is_empty() {
        out.push_str(&format!("{}\n", "branches".underline()));
        let mut t = Table::new(&["INIT", "CUR", "TGT"]);
        conflict_rows(&mut t, &conflicts.branches, |b: &Branch| {
            format!("{} -> {}", b.name, short_id(b.tip.as_str()))
        });
        out.push_str(&t.render());
        out.push('\n');
    }
    out
}
