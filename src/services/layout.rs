//! Idempotent "make sure the controller panels exist" for dashboard layouts.
//!
//! A layout document is stored as `<layout_dir>/<dashboard-id>.json`. Panels
//! are identified by the widget type they render; fields this module does
//! not know about are carried through untouched.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutDocument {
    #[serde(default)]
    pub panels: Vec<Panel>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    pub id: String,
    /// Widget type consumed by this panel.
    pub widget: String,
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
    #[serde(default = "default_span")]
    pub w: u32,
    #[serde(default = "default_span")]
    pub h: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_span() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelDefinition {
    pub widget: &'static str,
    pub title: &'static str,
    pub w: u32,
    pub h: u32,
}

/// Panels the controller views need on every dashboard.
pub const CONTROLLER_PANELS: &[PanelDefinition] = &[
    PanelDefinition {
        widget: "thermostats",
        title: "Thermostats",
        w: 6,
        h: 4,
    },
    PanelDefinition {
        widget: "scripts",
        title: "Scripts",
        w: 3,
        h: 3,
    },
    PanelDefinition {
        widget: "actions",
        title: "Actions",
        w: 3,
        h: 3,
    },
    PanelDefinition {
        widget: "schedules",
        title: "Schedules",
        w: 6,
        h: 3,
    },
];

/// Append every definition whose widget has no panel yet, stacked below the
/// lowest existing panel. Returns how many were added.
pub fn ensure_panels(doc: &mut LayoutDocument, required: &[PanelDefinition]) -> usize {
    let mut next_y = doc.panels.iter().map(|p| p.y.saturating_add(p.h)).max().unwrap_or(0);
    let mut added = 0;

    for def in required {
        if doc.panels.iter().any(|p| p.widget == def.widget) {
            continue;
        }
        let panel = Panel {
            id: unique_id(doc, def.widget),
            widget: def.widget.to_string(),
            x: 0,
            y: next_y,
            w: def.w,
            h: def.h,
            title: Some(def.title.to_string()),
            extra: Map::new(),
        };
        debug!("Adding panel {} at y={}", panel.id, panel.y);
        next_y = next_y.saturating_add(def.h);
        doc.panels.push(panel);
        added += 1;
    }

    added
}

fn unique_id(doc: &LayoutDocument, base: &str) -> String {
    let taken = |id: &str| doc.panels.iter().any(|p| p.id == id);
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}-{}", base, n))
        .find(|id| !taken(id))
        .unwrap_or_else(|| base.to_string())
}

/// Only plain file stems are accepted as dashboard ids.
pub fn dashboard_path(dir: &Path, dashboard_id: &str) -> Result<PathBuf, String> {
    let valid = !dashboard_id.is_empty()
        && dashboard_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(format!("invalid dashboard id: {:?}", dashboard_id));
    }
    Ok(dir.join(format!("{}.json", dashboard_id)))
}

pub fn load_layout(path: &Path) -> Result<LayoutDocument, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let de = &mut serde_json::Deserializer::from_str(&text);
    serde_path_to_error::deserialize(de)
        .map_err(|e| format!("{}: invalid layout at {}: {}", path.display(), e.path(), e.inner()))
}

/// Write via a sibling temp file so a crash never leaves half a document.
pub fn save_layout(path: &Path, doc: &LayoutDocument) -> Result<(), String> {
    let text = serde_json::to_string_pretty(doc).map_err(|e| format!("failed to encode layout: {}", e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text).map_err(|e| format!("failed to write {}: {}", tmp.display(), e))?;
    fs::rename(&tmp, path).map_err(|e| format!("failed to replace {}: {}", path.display(), e))
}

/// Ensure the controller panels on a stored dashboard; writes only when
/// something was added.
pub fn ensure_dashboard(dir: &Path, dashboard_id: &str) -> Result<usize, String> {
    let path = dashboard_path(dir, dashboard_id)?;
    let mut doc = load_layout(&path)?;
    let added = ensure_panels(&mut doc, CONTROLLER_PANELS);
    if added > 0 {
        save_layout(&path, &doc)?;
        info!("Dashboard {}: added {} panel(s)", dashboard_id, added);
    } else {
        debug!("Dashboard {}: all panels present", dashboard_id);
    }
    Ok(added)
}
