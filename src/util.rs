use std::task;
use std::vec;

pub struct Notifier {
    wakers: parking_lot::Mutex<vec::Vec<task::Waker>>,
}

impl Notifier {
    pub fn new() -> Notifier {
        Notifier {
            wakers: parking_lot::Mutex::new(vec::Vec::new()),
        }
    }

    pub fn notify(&self) {
        for w in self.wakers.lock().drain(..) {
            w.wake();
        }
    }

    pub fn enroll(&self, cx: &task::Context) {
        let waker = cx.waker();
        let mut wakers = self.wakers.lock();
        if !wakers.iter().any(|w| w.will_wake(waker)) {
            wakers.push(waker.clone());
        }
    }
}

impl Default for Notifier {
    fn default() -> Notifier {
        Notifier::new()
    }
}

impl std::ops::Drop for Notifier {
    fn drop(&mut self) {
        self.notify();
    }
}

/// Appends " (n)" to `base`, with the smallest n >= 1 that `taken` doesn't reject.
pub fn unique_name<F: Fn(&str) -> bool>(base: &str, taken: F) -> String {
    if !taken(base) {
        return base.to_string();
    }

    /* "Foo (2)" should become "Foo (3)", not "Foo (2) (1)" */
    let stem = match base.rfind(" (") {
        Some(i) if base.ends_with(')') && base[i + 2..base.len() - 1].parse::<u64>().is_ok() => &base[..i],
        _ => base,
    };

    (1u64..)
        .map(|n| format!("{} ({})", stem, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}
