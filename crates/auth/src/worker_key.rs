//! Shared API key presented by worker processes.

/// Expected worker key. Comparison does not short-circuit on the first mismatching byte.
#[derive(Clone)]
pub struct WorkerKey(Vec<u8>);

impl WorkerKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into().into_bytes())
    }

    pub fn verify(&self, presented: &str) -> bool {
        let presented = presented.as_bytes();
        if presented.len() != self.0.len() || self.0.is_empty() {
            return false;
        }
        self.0
            .iter()
            .zip(presented)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl core::fmt::Debug for WorkerKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("WorkerKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_exact_key_only() {
        let key = WorkerKey::new("worker-secret");
        assert!(key.verify("worker-secret"));
        assert!(!key.verify("worker-secreT"));
        assert!(!key.verify("worker"));
        assert!(!WorkerKey::new("").verify(""));
    }
}
