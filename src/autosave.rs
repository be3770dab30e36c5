use std::collections::{HashMap, HashSet};

use serde::Serialize;

pub const DEFAULT_DEBOUNCE_MS: i64 = 2000;

/// Identity of one editable score cell on the entry surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub student_id: String,
    pub sub_exam_id: String,
}

impl CellKey {
    pub fn new(student_id: impl Into<String>, sub_exam_id: impl Into<String>) -> Self {
        CellKey {
            student_id: student_id.into(),
            sub_exam_id: sub_exam_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Saved,
    Saving,
    Unsaved,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutosaveCell {
    pub pending_value: Option<f64>,
    pub confirmed_value: Option<f64>,
    pub status: CellStatus,
    /// Pending value is outside [0, maxScore]; never dispatched.
    pub invalid: bool,
}

impl AutosaveCell {
    fn seeded(confirmed: f64) -> Self {
        AutosaveCell {
            pending_value: None,
            confirmed_value: Some(confirmed),
            status: CellStatus::Saved,
            invalid: false,
        }
    }

    fn fresh() -> Self {
        AutosaveCell {
            pending_value: None,
            confirmed_value: None,
            status: CellStatus::Saved,
            invalid: false,
        }
    }
}

/// A write the host must perform against the store. The value is captured at
/// dispatch time, so edits that land while the write is in flight do not
/// change what goes over the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCommand {
    pub key: CellKey,
    pub value: f64,
}

/// Per-cell autosave state machine for one open score-entry surface.
///
/// Owns the cell map, the per-key debounce deadline table, and the in-flight
/// guard set. Time is injected as epoch milliseconds and I/O is delegated:
/// `due_writes`/`flush_all` hand back `WriteCommand`s, the host performs
/// them and reports each outcome through `settle_ok`/`settle_err`. Cross-cell
/// writes may settle in any order.
pub struct Reconciler {
    cells: HashMap<CellKey, AutosaveCell>,
    /// sub_exam_id -> max_score; the validation bound for every cell in the
    /// sub-exam's column.
    bounds: HashMap<String, f64>,
    deadlines: HashMap<CellKey, i64>,
    in_flight: HashSet<CellKey>,
    debounce_ms: i64,
}

impl Reconciler {
    pub fn new(bounds: HashMap<String, f64>, debounce_ms: i64) -> Self {
        Reconciler {
            cells: HashMap::new(),
            bounds,
            deadlines: HashMap::new(),
            in_flight: HashSet::new(),
            debounce_ms,
        }
    }

    /// Seeds a cell's confirmed value from the store's bulk fetch.
    pub fn seed(&mut self, key: CellKey, confirmed: f64) {
        self.cells.insert(key, AutosaveCell::seeded(confirmed));
    }

    fn in_bounds(&self, key: &CellKey, value: f64) -> bool {
        match self.bounds.get(&key.sub_exam_id) {
            Some(max) => value >= 0.0 && value <= *max,
            // Unknown sub-exam: never write.
            None => false,
        }
    }

    /// User typed a value: the cell goes unsaved immediately and its own
    /// debounce window restarts. Timers are per-cell; editing one student's
    /// score does not delay another's save.
    pub fn edit(&mut self, key: CellKey, value: f64, now_ms: i64) {
        let invalid = !self.in_bounds(&key, value);
        let cell = self.cells.entry(key.clone()).or_insert_with(AutosaveCell::fresh);
        cell.pending_value = Some(value);
        cell.status = CellStatus::Unsaved;
        cell.invalid = invalid;
        self.deadlines.insert(key, now_ms + self.debounce_ms);
    }

    /// Processes every debounce deadline at or before `now_ms` and returns
    /// the writes to perform. Per cell:
    /// - pending equals confirmed: saved, no write (no-op optimization)
    /// - pending out of bounds: stays unsaved, flagged invalid, no write
    /// - a write already in flight for the key: no-op, the settle and any
    ///   later edit's own window reconcile it
    /// - otherwise: saving, write dispatched
    pub fn due_writes(&mut self, now_ms: i64) -> Vec<WriteCommand> {
        let mut due: Vec<CellKey> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now_ms)
            .map(|(k, _)| k.clone())
            .collect();
        // Deterministic dispatch order for the host.
        due.sort_by(|a, b| {
            (a.student_id.as_str(), a.sub_exam_id.as_str())
                .cmp(&(b.student_id.as_str(), b.sub_exam_id.as_str()))
        });

        let mut commands = Vec::new();
        for key in due {
            self.deadlines.remove(&key);
            if let Some(cmd) = self.fire(&key) {
                commands.push(cmd);
            }
        }
        commands
    }

    fn fire(&mut self, key: &CellKey) -> Option<WriteCommand> {
        if self.in_flight.contains(key) {
            return None;
        }
        let in_bounds = self
            .cells
            .get(key)
            .and_then(|c| c.pending_value)
            .map(|v| self.in_bounds(key, v));
        let cell = self.cells.get_mut(key)?;
        let pending = cell.pending_value?;

        if cell.confirmed_value == Some(pending) {
            cell.status = CellStatus::Saved;
            cell.invalid = false;
            return None;
        }
        if in_bounds != Some(true) {
            cell.status = CellStatus::Unsaved;
            cell.invalid = true;
            return None;
        }

        cell.status = CellStatus::Saving;
        cell.invalid = false;
        self.in_flight.insert(key.clone());
        Some(WriteCommand {
            key: key.clone(),
            value: pending,
        })
    }

    /// "Save All": dispatches a write for every in-bounds cell whose pending
    /// value differs from its confirmed value, skipping keys already in
    /// flight. Pending debounce timers for the flushed cells are dropped;
    /// the flush supersedes them.
    pub fn flush_all(&mut self) -> Vec<WriteCommand> {
        let mut dirty: Vec<CellKey> = self
            .cells
            .iter()
            .filter(|(_, c)| {
                matches!(c.pending_value, Some(p) if c.confirmed_value != Some(p))
            })
            .map(|(k, _)| k.clone())
            .collect();
        dirty.sort_by(|a, b| {
            (a.student_id.as_str(), a.sub_exam_id.as_str())
                .cmp(&(b.student_id.as_str(), b.sub_exam_id.as_str()))
        });

        let mut commands = Vec::new();
        for key in dirty {
            if self.in_flight.contains(&key) {
                continue;
            }
            let pending = match self.cells.get(&key).and_then(|c| c.pending_value) {
                Some(p) => p,
                None => continue,
            };
            if !self.in_bounds(&key, pending) {
                if let Some(cell) = self.cells.get_mut(&key) {
                    cell.status = CellStatus::Unsaved;
                    cell.invalid = true;
                }
                continue;
            }
            self.deadlines.remove(&key);
            let cell = self.cells.get_mut(&key).expect("dirty cell exists");
            cell.status = CellStatus::Saving;
            cell.invalid = false;
            self.in_flight.insert(key.clone());
            commands.push(WriteCommand {
                key,
                value: pending,
            });
        }
        commands
    }

    /// Store acknowledged the write. If the user edited the cell to a
    /// different value while the write was in flight, the cell stays unsaved
    /// and its own debounce cycle reconciles it.
    pub fn settle_ok(&mut self, key: &CellKey, confirmed: f64) {
        self.in_flight.remove(key);
        if let Some(cell) = self.cells.get_mut(key) {
            cell.confirmed_value = Some(confirmed);
            if cell.pending_value == Some(confirmed) {
                cell.status = CellStatus::Saved;
                cell.invalid = false;
            } else {
                cell.status = CellStatus::Unsaved;
            }
        }
    }

    /// Write failed: back to unsaved with the pending value retained for the
    /// next edit or bulk flush. Never retried automatically.
    pub fn settle_err(&mut self, key: &CellKey) {
        self.in_flight.remove(key);
        if let Some(cell) = self.cells.get_mut(key) {
            cell.status = CellStatus::Unsaved;
        }
    }

    /// Display/aggregation value: the optimistic pending value when present,
    /// otherwise the last confirmed one.
    pub fn derived(&self, key: &CellKey) -> Option<f64> {
        self.cells
            .get(key)
            .and_then(|c| c.pending_value.or(c.confirmed_value))
    }

    /// Derived values for every cell, for live totals over a surface where
    /// some writes may still be pending or in flight.
    pub fn snapshot(&self) -> Vec<(CellKey, f64)> {
        self.cells
            .iter()
            .filter_map(|(k, c)| c.pending_value.or(c.confirmed_value).map(|v| (k.clone(), v)))
            .collect()
    }

    pub fn cell(&self, key: &CellKey) -> Option<&AutosaveCell> {
        self.cells.get(key)
    }

    pub fn cells(&self) -> impl Iterator<Item = (&CellKey, &AutosaveCell)> {
        self.cells.iter()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}
