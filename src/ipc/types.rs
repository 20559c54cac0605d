use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::selection::Selection;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Ephemeral checkbox state; reset whenever a workspace is selected.
    pub selection: Selection,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            selection: Selection::default(),
        }
    }
}
