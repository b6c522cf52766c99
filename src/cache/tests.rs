#[cfg(test)]
mod tests {
    use crate::cache::CacheManager;
    use crate::config::CacheConfig;
    use crate::llm::client::types::{ChatMessage, ModelRequest};
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir, enabled: bool) -> CacheManager {
        CacheManager::new(CacheConfig {
            enabled,
            cache_dir: dir.path().to_path_buf(),
            expire_hours: 1,
        })
    }

    fn request(user: &str) -> ModelRequest {
        ModelRequest::new(
            "Qwen/Qwen2.5-Coder-7B-Instruct",
            vec![ChatMessage::system("sys"), ChatMessage::user(user)],
            0.5,
            500,
        )
    }

    #[test]
    fn test_hash_request_is_stable_and_sensitive() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, true);

        assert_eq!(cache.hash_request(&request("a")), cache.hash_request(&request("a")));
        assert_ne!(cache.hash_request(&request("a")), cache.hash_request(&request("b")));

        let mut hotter = request("a");
        hotter.temperature = 0.9;
        assert_ne!(cache.hash_request(&request("a")), cache.hash_request(&hotter));
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, true);
        let req = request("Analyze this code");

        assert!(cache.get(&req).await.is_none());
        cache.set(&req, "{\"ok\":true}", "cloud").await.unwrap();

        let entry = cache.get(&req).await.unwrap();
        assert_eq!(entry.text, "{\"ok\":true}");
        assert_eq!(entry.backend, "cloud");

        let report = cache.report();
        assert_eq!(report.cache_hits, 1);
        assert_eq!(report.cache_misses, 1);
        assert_eq!(report.cache_writes, 1);
        assert_eq!(report.hit_rate, 0.5);
    }

    #[tokio::test]
    async fn test_disabled_cache_never_stores() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, false);
        let req = request("x");

        cache.set(&req, "text", "local").await.unwrap();
        assert!(cache.get(&req).await.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_entry_counts_as_error() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, true);
        let req = request("x");

        let hash = cache.hash_request(&req);
        let category_dir = dir.path().join("inference");
        std::fs::create_dir_all(&category_dir).unwrap();
        std::fs::write(category_dir.join(format!("{}.json", hash)), "not json").unwrap();

        assert!(cache.get(&req).await.is_none());
        assert_eq!(cache.report().cache_errors, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed() {
        let dir = TempDir::new().unwrap();
        let cache = CacheManager::new(CacheConfig {
            enabled: true,
            cache_dir: dir.path().to_path_buf(),
            expire_hours: 0,
        });
        let req = request("x");
        let hash = cache.hash_request(&req);
        let path = dir.path().join("inference").join(format!("{}.json", hash));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            format!(
                r#"{{"text":"old","backend":"cloud","model_id":"m","timestamp":1,"request_hash":"{}"}}"#,
                hash
            ),
        )
        .unwrap();

        assert!(cache.get(&req).await.is_none());
        assert!(!path.exists());
    }
}
