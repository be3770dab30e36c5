use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::autosave::Reconciler;
use crate::calc::SubExamDef;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// One open score-entry surface. Created by `grid.open`, destroyed by
/// `grid.close` or by opening another surface; its reconciler state is not
/// persisted.
pub struct GridSession {
    pub class_id: String,
    pub subject_id: String,
    pub term_id: String,
    /// (id, display name) in roster order.
    pub students: Vec<(String, String)>,
    pub sub_exams: Vec<SubExamDef>,
    pub recon: Reconciler,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub grid: Option<GridSession>,
}
