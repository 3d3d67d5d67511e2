use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::sync::Mutex;

const MAX_LOG_LINES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Info,
    Http,
    Retry,
    Search,
    Extract,
}

impl Kind {
    pub fn tag(&self) -> &'static str {
        match self {
            Kind::Info => "",
            Kind::Http => "[net] ",
            Kind::Retry => "[retry] ",
            Kind::Search => "[search] ",
            Kind::Extract => "[file] ",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub text: String,
    pub kind: Kind,
}

/// Bounded activity feed. The shell reads the global one; tests build their own.
pub struct ActivityLog {
    lines: Mutex<VecDeque<Entry>>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, kind: Kind, text: String) {
        if let Ok(mut buf) = self.lines.lock() {
            if buf.len() >= self.capacity { buf.pop_front(); }
            buf.push_back(Entry { text, kind });
        }
    }

    pub fn recent(&self, n: usize) -> Vec<Entry> {
        if let Ok(buf) = self.lines.lock() {
            let len = buf.len();
            let take = n.min(len);
            buf.iter().skip(len - take).cloned().collect()
        } else {
            Vec::new()
        }
    }

    pub fn clear(&self) {
        if let Ok(mut buf) = self.lines.lock() {
            buf.clear();
        }
    }
}

static ACTIVITY_LOG: Lazy<ActivityLog> = Lazy::new(|| ActivityLog::new(MAX_LOG_LINES));

pub fn log<T: Into<String>>(line: T) {
    log_with(Kind::Info, line);
}

pub fn log_with<T: Into<String>>(kind: Kind, line: T) {
    ACTIVITY_LOG.push(kind, line.into());
}

/// Latest line, shown under the spinner while a request runs.
pub fn latest() -> Option<Entry> {
    ACTIVITY_LOG.recent(1).pop()
}

pub fn clear() {
    ACTIVITY_LOG.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_keeps_order() {
        let log = ActivityLog::new(10);
        log.push(Kind::Info, "first".into());
        log.push(Kind::Retry, "second".into());

        let entries = log.recent(10);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "first");
        assert_eq!(entries[1].kind, Kind::Retry);
        assert_eq!(log.recent(1)[0].text, "second");
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let log = ActivityLog::new(3);
        for i in 0..5 {
            log.push(Kind::Http, format!("line {}", i));
        }
        let texts: Vec<String> = log.recent(usize::MAX).into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["line 2", "line 3", "line 4"]);

        log.clear();
        assert!(log.recent(5).is_empty());
    }
}
