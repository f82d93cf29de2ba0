//! Menu model shared by every interactive decision point.

#![allow(missing_docs)]

/// Headers, items, and selection rules of one menu.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuModel {
    pub headers: Vec<String>,
    pub items: Vec<String>,
    /// Direct item codes from the device are ignored; only Invoke selects.
    pub menu_only: bool,
    /// A Refresh key ends the menu instead of being swallowed.
    pub refreshable: bool,
    pub is_main: bool,
}

impl MenuModel {
    #[must_use]
    pub fn new<H, I>(headers: H, items: I) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            items: items.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn menu_only(mut self) -> Self {
        self.menu_only = true;
        self
    }

    #[must_use]
    pub fn refreshable(mut self) -> Self {
        self.refreshable = true;
        self
    }

    #[must_use]
    pub fn main(mut self) -> Self {
        self.is_main = true;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Highlight position with wrap-around moves and clamped scrolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Highlight {
    index: usize,
    len: usize,
}

impl Highlight {
    #[must_use]
    pub fn new(initial: usize, len: usize) -> Self {
        Self {
            index: initial,
            len,
        }
    }

    /// Highlighted item, or `None` when the position is outside the menu.
    #[must_use]
    pub fn current(&self) -> Option<usize> {
        (self.index < self.len).then_some(self.index)
    }

    pub fn set(&mut self, index: usize) {
        self.index = index;
    }

    pub fn up(&mut self) {
        if self.len == 0 {
            return;
        }
        self.index = if self.index == 0 || self.index >= self.len {
            self.len - 1
        } else {
            self.index - 1
        };
    }

    pub fn down(&mut self) {
        if self.len == 0 {
            return;
        }
        self.index = if self.index + 1 >= self.len {
            0
        } else {
            self.index + 1
        };
    }

    /// Move by `delta` without wrapping.
    pub fn scroll(&mut self, delta: isize) {
        if self.len == 0 {
            return;
        }
        let max = self.len - 1;
        self.index = self.index.min(max).saturating_add_signed(delta).min(max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_flags() {
        let menu = MenuModel::new(["Wipe cache?"], [" No", " Yes"])
            .menu_only()
            .refreshable();
        assert_eq!(menu.len(), 2);
        assert!(menu.menu_only);
        assert!(menu.refreshable);
        assert!(!menu.is_main);
    }

    #[test]
    fn highlight_wraps() {
        let mut h = Highlight::new(0, 3);
        h.up();
        assert_eq!(h.current(), Some(2));
        h.down();
        assert_eq!(h.current(), Some(0));
    }

    #[test]
    fn scroll_clamps() {
        let mut h = Highlight::new(1, 4);
        h.scroll(10);
        assert_eq!(h.current(), Some(3));
        h.scroll(-10);
        assert_eq!(h.current(), Some(0));
    }

    #[test]
    fn out_of_range_initial_has_no_current() {
        let h = Highlight::new(5, 2);
        assert_eq!(h.current(), None);
        let empty = Highlight::new(0, 0);
        assert_eq!(empty.current(), None);
    }
}
