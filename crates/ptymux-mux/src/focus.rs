/// Which pane has focus, cycling over live panes in layout order.
///
/// Exactly one live pane is focused while any exists; once every pane has
/// exited nothing is.
#[derive(Debug, Clone)]
pub struct FocusRing {
    live: Vec<bool>,
    focused: Option<usize>,
}

impl FocusRing {
    pub fn new(count: usize, initial: Option<usize>) -> Self {
        let focused = match initial {
            Some(index) if index < count => Some(index),
            _ if count > 0 => Some(0),
            _ => None,
        };
        Self {
            live: vec![true; count],
            focused,
        }
    }

    pub fn focused(&self) -> Option<usize> {
        self.focused
    }

    pub fn is_live(&self, index: usize) -> bool {
        self.live.get(index).copied().unwrap_or(false)
    }

    pub fn live_count(&self) -> usize {
        self.live.iter().filter(|live| **live).count()
    }

    pub fn all_exited(&self) -> bool {
        self.focused.is_none()
    }

    pub fn next(&mut self) {
        self.focused = self.focused.and_then(|current| self.step(current, true));
    }

    pub fn prev(&mut self) {
        self.focused = self.focused.and_then(|current| self.step(current, false));
    }

    /// Focus `index` if it is still live.
    pub fn focus(&mut self, index: usize) -> bool {
        if self.is_live(index) {
            self.focused = Some(index);
        }
        self.focused == Some(index)
    }

    /// Take a pane out of the ring. Focus moves on to the next live pane.
    pub fn mark_exited(&mut self, index: usize) {
        let Some(live) = self.live.get_mut(index) else {
            return;
        };
        *live = false;
        if self.focused == Some(index) {
            self.focused = self.step(index, true);
        }
    }

    /// Nearest live pane after (or before) `from`, wrapping around and
    /// ending back at `from` itself if it is the only one left.
    fn step(&self, from: usize, forward: bool) -> Option<usize> {
        let count = self.live.len();
        (1..=count)
            .map(|offset| {
                if forward {
                    (from + offset) % count
                } else {
                    (from + count - offset) % count
                }
            })
            .find(|&index| self.live[index])
    }
}
