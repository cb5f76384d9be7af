use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use crate::domain::{Item, ItemStatus};
use crate::store::{Notice, Observer};
use crate::view::View;

/// Tallies of one rendered list.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ListSummary {
    pub total: usize,
    pub unread: usize,
    pub favorites: usize,
    pub pending: usize,
}

impl ListSummary {
    pub fn of(items: &[Item]) -> Self {
        items.iter().fold(Self::default(), |mut s, item| {
            s.total += 1;
            if item.status == ItemStatus::Unread {
                s.unread += 1;
            }
            if item.favorite {
                s.favorites += 1;
            }
            if item.is_pending() {
                s.pending += 1;
            }
            s
        })
    }
}

/// Line-oriented view for `watch`: prints a summary whenever the list changes
/// and every notice as it arrives.
pub struct ConsoleView<W: Write + Send> {
    slot: String,
    out: Mutex<W>,
    last: Mutex<Option<ListSummary>>,
}

impl ConsoleView<std::io::Stdout> {
    pub fn stdout(slot: &str) -> Arc<Self> {
        Arc::new(Self::new(slot, std::io::stdout()))
    }
}

impl<W: Write + Send> ConsoleView<W> {
    pub fn new(slot: &str, out: W) -> Self {
        Self {
            slot: slot.to_string(),
            out: Mutex::new(out),
            last: Mutex::new(None),
        }
    }

    fn write_line(&self, line: &str) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = writeln!(out, "{}", line);
        let _ = out.flush();
    }
}

impl<W: Write + Send> Observer for ConsoleView<W> {
    fn on_change(&self, items: Arc<[Item]>) {
        let summary = ListSummary::of(&items);
        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if *last == Some(summary) {
                return;
            }
            *last = Some(summary);
        }
        self.write_line(&format!(
            "[{}] {} items: {} unread, {} favorites, {} pending",
            chrono::Local::now().format("%H:%M:%S"),
            summary.total,
            summary.unread,
            summary.favorites,
            summary.pending
        ));
    }

    fn on_notice(&self, notice: &Notice) {
        self.write_line(&format!("! {}", notice));
    }
}

impl<W: Write + Send> View for ConsoleView<W> {
    fn slot(&self) -> &str {
        &self.slot
    }

    fn unload(&self) {
        self.write_line("Stopped watching.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::remote_item;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(String::from)
                .collect()
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut fav = remote_item("1");
        fav.favorite = true;
        let mut archived = remote_item("2");
        archived.status = ItemStatus::Archived;
        let local = Item::local("https://example.com/new");

        let summary = ListSummary::of(&[fav, archived, local]);
        assert_eq!(
            summary,
            ListSummary {
                total: 3,
                unread: 2,
                favorites: 1,
                pending: 1,
            }
        );
    }

    #[test]
    fn test_prints_only_when_summary_changes() {
        let buf = SharedBuf::default();
        let view = ConsoleView::new("pocket", buf.clone());
        let items: Arc<[Item]> = vec![remote_item("1")].into();

        view.on_change(items.clone());
        view.on_change(items);
        view.on_notice(&Notice::ReauthRequired);
        view.unload();

        let lines = buf.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("1 items: 1 unread, 0 favorites, 0 pending"));
        assert!(lines[1].starts_with("! "));
        assert_eq!(lines[2], "Stopped watching.");
    }
}
