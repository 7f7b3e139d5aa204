use std::collections::HashMap;

/// Teacher display names keyed by teacher id, scoped to one kiosk run.
#[derive(Debug, Default)]
pub struct TeacherCache {
    names: HashMap<String, String>,
    hits: u64,
    misses: u64,
}

impl TeacherCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, teacher_id: &str) -> Option<String> {
        match self.names.get(teacher_id) {
            Some(name) => {
                self.hits += 1;
                Some(name.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, teacher_id: &str, name: &str) {
        self.names.insert(teacher_id.to_string(), name.to_string());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_and_miss() {
        let mut cache = TeacherCache::new();
        assert_eq!(cache.get("3"), None);
        cache.insert("3", "Ms. Rivera");
        assert_eq!(cache.get("3").as_deref(), Some("Ms. Rivera"));
        assert_eq!(cache.stats(), (1, 1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_instances_do_not_share_state() {
        let mut a = TeacherCache::new();
        let mut b = TeacherCache::new();
        a.insert("3", "Ms. Rivera");
        assert!(b.get("3").is_none());
    }
}
