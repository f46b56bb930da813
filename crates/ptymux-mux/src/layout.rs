//! Pane layout trees
//!
//! A layout is a tree of splits and panes. Each split lays its children out
//! along one axis and gives every child a share of that axis according to
//! its [`SizeSpec`]. Layouts are loaded from TOML or JSON files:
//!
//! ```toml
//! direction = "horizontal"
//!
//! [[children]]
//! size = "30%"
//! command = "htop"
//!
//! [[children]]
//! direction = "vertical"
//! children = [{ command = "bash", focus = true }, { size = 8, command = "bash" }]
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ptymux_types::SpawnSpec;
use ratatui::layout::Rect;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("failed to read layout file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported layout format '{0}' (expected .toml or .json)")]
    UnsupportedFormat(String),

    #[error("invalid TOML layout: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON layout: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid size '{0}': expected cells, a percentage, a fraction or \"auto\"")]
    InvalidSize(String),

    #[error("invalid layout at {at}: {reason}")]
    Invalid { at: String, reason: String },
}

/// How much of its parent's extent a child asks for.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(try_from = "RawSize")]
pub enum SizeSpec {
    /// Fixed number of terminal cells
    Cells(u16),
    /// Percentage of the parent, `0..=100`
    Percent(f64),
    /// Fraction of the parent, `0..=1`
    Fraction(f64),
    /// Equal share of whatever is left
    #[default]
    Auto,
}

impl SizeSpec {
    fn percent(value: f64, raw: &str) -> Result<Self, LayoutError> {
        if value.is_finite() && (0.0..=100.0).contains(&value) {
            Ok(Self::Percent(value))
        } else {
            Err(LayoutError::InvalidSize(raw.to_string()))
        }
    }

    fn fraction(value: f64, raw: &str) -> Result<Self, LayoutError> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self::Fraction(value))
        } else {
            Err(LayoutError::InvalidSize(raw.to_string()))
        }
    }
}

impl FromStr for SizeSpec {
    type Err = LayoutError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let s = raw.trim();
        let invalid = || LayoutError::InvalidSize(raw.to_string());

        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        if let Some(percent) = s.strip_suffix('%') {
            let value: f64 = percent.trim().parse().map_err(|_| invalid())?;
            return Self::percent(value, raw);
        }
        if s.contains('.') {
            let value: f64 = s.parse().map_err(|_| invalid())?;
            return Self::fraction(value, raw);
        }
        s.parse().map(Self::Cells).map_err(|_| invalid())
    }
}

impl fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cells(cells) => write!(f, "{}", cells),
            Self::Percent(percent) => write!(f, "{}%", percent),
            Self::Fraction(fraction) => write!(f, "{}", fraction),
            Self::Auto => f.write_str("auto"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSize {
    Cells(u64),
    Number(f64),
    Text(String),
}

impl TryFrom<RawSize> for SizeSpec {
    type Error = LayoutError;

    fn try_from(raw: RawSize) -> Result<Self, Self::Error> {
        match raw {
            RawSize::Cells(cells) => u16::try_from(cells)
                .map(Self::Cells)
                .map_err(|_| LayoutError::InvalidSize(cells.to_string())),
            RawSize::Number(value) => Self::fraction(value, &value.to_string()),
            RawSize::Text(text) => text.parse(),
        }
    }
}

/// Axis along which a split places its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Left to right
    Horizontal,
    /// Top to bottom
    #[default]
    Vertical,
}

/// One pane: the process to run in it and how to present it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PaneSpec {
    /// Program to run; the user's shell when absent
    pub command: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Take focus when the multiplexer starts
    pub focus: bool,
    pub title: Option<String>,
}

impl PaneSpec {
    pub fn to_spawn_spec(&self, cols: u16, rows: u16) -> SpawnSpec {
        SpawnSpec {
            command: self.command.clone(),
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            env: self.env.clone(),
            cols: cols.max(1),
            rows: rows.max(1),
            title: self.title.clone(),
        }
    }

    /// Title shown on the pane border
    pub fn display_title(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        match &self.command {
            Some(command) if self.args.is_empty() => command.clone(),
            Some(command) => format!("{} {}", command, self.args.join(" ")),
            None => "shell".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub direction: Direction,
    pub children: Vec<Child>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Child {
    pub size: SizeSpec,
    pub node: Node,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Split(Split),
    Pane(PaneSpec),
}

/// On-disk form of a node. Splits and panes share one table shape so that
/// layout files stay flat; `into_node` sorts out which one was meant.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNode {
    #[serde(default)]
    size: SizeSpec,
    direction: Option<Direction>,
    children: Option<Vec<RawNode>>,
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    cwd: Option<PathBuf>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    focus: bool,
    title: Option<String>,
}

impl RawNode {
    fn into_node(self, at: &str) -> Result<Node, LayoutError> {
        let invalid = |reason: &str| LayoutError::Invalid {
            at: at.to_string(),
            reason: reason.to_string(),
        };

        let Some(children) = self.children else {
            if self.direction.is_some() {
                return Err(invalid("a split needs children"));
            }
            return Ok(Node::Pane(PaneSpec {
                command: self.command,
                args: self.args,
                cwd: self.cwd,
                env: self.env,
                focus: self.focus,
                title: self.title,
            }));
        };

        if self.command.is_some() || !self.args.is_empty() || self.cwd.is_some() {
            return Err(invalid("a node cannot be both a split and a pane"));
        }
        if children.is_empty() {
            return Err(invalid("a split needs at least one child"));
        }

        let children = children
            .into_iter()
            .enumerate()
            .map(|(i, child)| {
                let size = child.size;
                let node = child.into_node(&format!("{}.children[{}]", at, i))?;
                Ok(Child { size, node })
            })
            .collect::<Result<Vec<_>, LayoutError>>()?;

        Ok(Node::Split(Split {
            direction: self.direction.unwrap_or_default(),
            children,
        }))
    }
}

/// Share `extent` cells between children with the given sizes.
///
/// Fixed cells are served first, then percentages and fractions of the full
/// extent, in child order; a request that no longer fits is cut down to what
/// is left. The rest is divided equally between `auto` children, the
/// earliest ones taking the remainder cells. Without any `auto` child the
/// last child absorbs the rest. The result always sums to `extent` unless
/// `sizes` is empty.
pub fn allocate(sizes: &[SizeSpec], extent: u16) -> Vec<u16> {
    let mut lengths = vec![0u16; sizes.len()];
    let mut remaining = extent;

    for (length, size) in lengths.iter_mut().zip(sizes) {
        if let SizeSpec::Cells(cells) = *size {
            *length = cells.min(remaining);
            remaining -= *length;
        }
    }

    for (length, size) in lengths.iter_mut().zip(sizes) {
        let share = match *size {
            SizeSpec::Percent(percent) => percent / 100.0,
            SizeSpec::Fraction(fraction) => fraction,
            _ => continue,
        };
        let wanted = (f64::from(extent) * share).floor() as u16;
        *length = wanted.min(remaining);
        remaining -= *length;
    }

    let autos: Vec<usize> = sizes
        .iter()
        .enumerate()
        .filter(|(_, size)| matches!(size, SizeSpec::Auto))
        .map(|(i, _)| i)
        .collect();

    if !autos.is_empty() {
        let count = autos.len() as u16;
        let (share, extra) = (remaining / count, remaining % count);
        for (k, &i) in autos.iter().enumerate() {
            lengths[i] = share + u16::from((k as u16) < extra);
        }
    } else if let Some(last) = lengths.last_mut() {
        *last += remaining;
    }

    lengths
}

fn place(node: &Node, area: Rect, out: &mut Vec<Rect>) {
    let split = match node {
        Node::Pane(_) => {
            out.push(area);
            return;
        }
        Node::Split(split) => split,
    };

    let extent = match split.direction {
        Direction::Horizontal => area.width,
        Direction::Vertical => area.height,
    };
    let sizes: Vec<SizeSpec> = split.children.iter().map(|child| child.size).collect();

    let mut offset = 0;
    for (child, length) in split.children.iter().zip(allocate(&sizes, extent)) {
        let rect = match split.direction {
            Direction::Horizontal => Rect::new(area.x + offset, area.y, length, area.height),
            Direction::Vertical => Rect::new(area.x, area.y + offset, area.width, length),
        };
        offset += length;
        place(&child.node, rect, out);
    }
}

fn collect_panes<'a>(node: &'a Node, out: &mut Vec<&'a PaneSpec>) {
    match node {
        Node::Pane(pane) => out.push(pane),
        Node::Split(split) => {
            for child in &split.children {
                collect_panes(&child.node, out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    root: Node,
}

impl Layout {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    /// One focused pane running the user's shell
    pub fn default_shell() -> Self {
        Self::new(Node::Pane(PaneSpec {
            focus: true,
            ..PaneSpec::default()
        }))
    }

    /// Load a layout file, picking the format from its extension.
    pub fn load(path: &Path) -> Result<Self, LayoutError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let read = || {
            std::fs::read_to_string(path).map_err(|source| LayoutError::Read {
                path: path.to_path_buf(),
                source,
            })
        };

        match extension.as_str() {
            "toml" => Self::from_toml_str(&read()?),
            "json" => Self::from_json_str(&read()?),
            other => Err(LayoutError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, LayoutError> {
        let raw: RawNode = toml::from_str(content)?;
        Ok(Self::new(raw.into_node("root")?))
    }

    pub fn from_json_str(content: &str) -> Result<Self, LayoutError> {
        let raw: RawNode = serde_json::from_str(content)?;
        Ok(Self::new(raw.into_node("root")?))
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Every pane, depth first. This is the focus cycling order.
    pub fn panes(&self) -> Vec<&PaneSpec> {
        let mut panes = Vec::new();
        collect_panes(&self.root, &mut panes);
        panes
    }

    /// The first pane flagged `focus`, else the first pane
    pub fn initial_focus(&self) -> Option<usize> {
        let panes = self.panes();
        if panes.is_empty() {
            return None;
        }
        Some(panes.iter().position(|pane| pane.focus).unwrap_or(0))
    }

    /// Rectangle of every pane within `area`, in the same order as `panes`.
    pub fn pane_rects(&self, area: Rect) -> Vec<Rect> {
        let mut rects = Vec::new();
        place(&self.root, area, &mut rects);
        rects
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::default_shell()
    }
}
