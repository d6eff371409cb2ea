//! Periodic-pattern detection over a session's rolling tool-call
//! signatures (§4.13). Grounded on the teacher's `llm::loop_detector`
//! module (`LoopDetector`, pattern-length scanning) but follows
//! original_source's simpler tiling rule rather than the teacher's
//! exact-duplicate/oscillation heuristics.

/// Accumulates tool-call signatures across rounds and checks whether the
/// trailing window is fully tiled by a short repeating period.
#[derive(Debug, Default)]
pub struct LoopDetector {
    signatures: Vec<String>,
    window_size: usize,
}

impl LoopDetector {
    pub fn new(window_size: usize) -> Self {
        LoopDetector { signatures: Vec::new(), window_size }
    }

    pub fn record(&mut self, signature: impl Into<String>) {
        self.signatures.push(signature.into());
    }

    pub fn record_round(&mut self, round_signatures: impl IntoIterator<Item = String>) {
        self.signatures.extend(round_signatures);
    }

    /// `len(signatures) >= window_size` is required to fire. Let `s =
    /// signatures[-window_size:]`. For each `k` in {1, 2, 3} with
    /// `window_size % k == 0`, check whether `s[0:k]` tiles `s`.
    pub fn check(&self) -> bool {
        detect_periodic(&self.signatures, self.window_size)
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }
}

/// Free function form for callers that maintain their own rolling list.
pub fn detect_periodic(signatures: &[String], window_size: usize) -> bool {
    if window_size == 0 || signatures.len() < window_size {
        return false;
    }
    let s = &signatures[signatures.len() - window_size..];
    for k in [1usize, 2, 3] {
        if window_size % k != 0 {
            continue;
        }
        if tiles(s, k) {
            return true;
        }
    }
    false
}

fn tiles(s: &[String], k: usize) -> bool {
    let period = &s[..k];
    s.chunks(k).all(|chunk| chunk == period)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sigs(vals: &[&str]) -> Vec<String> {
        vals.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn requires_full_window_to_fire() {
        let s = sigs(&["a", "a", "a"]);
        assert!(!detect_periodic(&s, 10));
    }

    #[test]
    fn detects_period_one_repetition() {
        let s = sigs(&["a", "a", "a", "a", "a", "a", "a", "a", "a", "a"]);
        assert!(detect_periodic(&s, 10));
    }

    #[test]
    fn detects_period_two_oscillation() {
        let s = sigs(&["a", "b", "a", "b", "a", "b", "a", "b", "a", "b"]);
        assert!(detect_periodic(&s, 10));
    }

    #[test]
    fn detects_period_three() {
        let s = sigs(&["a", "b", "c", "a", "b", "c", "a", "b", "c"]);
        assert!(detect_periodic(&s, 9));
    }

    #[test]
    fn non_periodic_window_does_not_fire() {
        let s = sigs(&["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"]);
        assert!(!detect_periodic(&s, 10));
    }

    #[test]
    fn only_checks_trailing_window_ignoring_older_history() {
        let mut detector = LoopDetector::new(4);
        detector.record("x");
        detector.record("y");
        detector.record("a");
        detector.record("b");
        detector.record("a");
        detector.record("b");
        assert!(detector.check());
    }
}
