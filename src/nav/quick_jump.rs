//! Type-ahead jump to the next element whose name starts with the typed text

#[derive(Debug)]
pub struct QuickJump {
    buffer: String,
    last_key_at: Option<u64>,
    reset_ms: u64,
    max_len: usize,
}

impl QuickJump {
    pub fn new(reset_ms: u64, max_len: usize) -> Self {
        Self { buffer: String::new(), last_key_at: None, reset_ms, max_len: max_len.max(1) }
    }

    /// Append a key, starting over if the previous key was too long ago
    pub fn push(&mut self, ch: char, now: u64) -> &str {
        if let Some(last) = self.last_key_at {
            if now.saturating_sub(last) > self.reset_ms {
                self.buffer.clear();
            }
        }
        self.last_key_at = Some(now);
        if self.buffer.chars().count() < self.max_len {
            self.buffer.push(ch);
        }
        &self.buffer
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn overlay_text(&self) -> String {
        self.buffer.to_uppercase()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.last_key_at = None;
    }
}

/// Plain ASCII letters and digits only
pub fn is_jump_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// First name starting with `prefix`, searching from just after `focused`
/// to the end and then wrapping to the start
pub fn find_match<S: AsRef<str>>(names: &[S], prefix: &str, focused: Option<usize>) -> Option<usize> {
    let p = normalize(prefix);
    if p.is_empty() || names.is_empty() {
        return None;
    }
    let n = names.len();
    let start = focused.map(|f| (f.min(n - 1) + 1) % n).unwrap_or(0);
    (0..n)
        .map(|offset| (start + offset) % n)
        .find(|&i| normalize(names[i].as_ref()).starts_with(&p))
}
