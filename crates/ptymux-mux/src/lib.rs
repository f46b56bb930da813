//! Terminal multiplexer
//!
//! Tiles pty-backed panes according to a layout tree, routes keys to the
//! focused pane and keeps a small set of prefixed commands for itself.

pub mod app;
pub mod focus;
pub mod keys;
pub mod layout;
pub mod render;

pub use app::{run, Mux, MuxOptions, Pane, MUX_GROUP};
pub use focus::FocusRing;
pub use keys::{parse_prefix, Action, Command, KeyRouter, Mode, DOUBLE_INTERRUPT_WINDOW};
pub use layout::{allocate, Child, Direction, Layout, LayoutError, Node, PaneSpec, SizeSpec, Split};
